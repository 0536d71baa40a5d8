//! Error types and result aliases for tally.
//!
//! This module defines the shared error taxonomy used across all tally
//! components. Errors are structured for programmatic handling: writers
//! retry [`Error::StoreUnavailable`], readers propagate, and convergence
//! counts per-action failures without aborting a pass.

use std::fmt;

/// The result type used throughout tally.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tally operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested key is absent from the store.
    #[error("not found: {0}")]
    NotFound(String),

    /// The store is unreachable. Writers retry this kind with backoff;
    /// readers bubble it up.
    #[error("store unavailable: {message}")]
    StoreUnavailable {
        /// Description of the transport failure.
        message: String,
    },

    /// A compare-and-swap lost, or a presence/lock key is already held.
    #[error("resource busy: {message}")]
    ResourceBusy {
        /// Description of the contended resource.
        message: String,
    },

    /// A payload failed to decode.
    #[error("malformed entry at {key}: {message}")]
    Malformed {
        /// The store key holding the offending payload.
        key: String,
        /// Description of the decode failure.
        message: String,
    },

    /// A domain was required but absent.
    #[error("missing domain")]
    MissingDomain,

    /// A process guid was required but absent.
    #[error("missing process guid")]
    MissingProcessGuid,

    /// An executor id was required but absent.
    #[error("missing executor id")]
    MissingExecutorId,

    /// A container handle was required but absent.
    #[error("missing container handle")]
    MissingContainerHandle,

    /// A caller precondition was violated. Unrecoverable: never retried,
    /// never masked.
    #[error("programmer error: {message}")]
    Programmer {
        /// Description of the violated precondition.
        message: String,
    },

    /// An unclassified store adapter fault.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new store-unavailable error with the given message.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new resource-busy error with the given message.
    #[must_use]
    pub fn busy(message: impl Into<String>) -> Self {
        Self::ResourceBusy {
            message: message.into(),
        }
    }

    /// Creates a new malformed-entry error for the given key.
    #[must_use]
    pub fn malformed(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Malformed {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Creates a new programmer error with the given message.
    #[must_use]
    pub fn programmer(message: impl Into<String>) -> Self {
        Self::Programmer {
            message: message.into(),
        }
    }

    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if the error is transient and the operation may be
    /// retried. Only store unavailability qualifies.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    /// Returns true if the error reports a violated caller precondition
    /// (a missing required field or an explicit programmer error). These
    /// abort the calling operation immediately.
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::MissingDomain
                | Self::MissingProcessGuid
                | Self::MissingExecutorId
                | Self::MissingContainerHandle
                | Self::Programmer { .. }
        )
    }
}
