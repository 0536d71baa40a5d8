//! Symmetric serialization of domain records to store payloads.
//!
//! Every persisted record round-trips through JSON: `decode(encode(v))`
//! equals `v`. Decode failures surface as [`Error::Malformed`] carrying
//! the offending key for diagnostic context.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Encodes a record into a store payload.
pub fn encode<T: Serialize>(record: &T) -> Result<Bytes> {
    let json = serde_json::to_vec(record).map_err(|e| Error::Storage {
        message: format!("failed to serialize record: {e}"),
        source: Some(Box::new(e)),
    })?;
    Ok(Bytes::from(json))
}

/// Decodes a store payload read from `key`.
///
/// # Errors
///
/// Returns [`Error::Malformed`] with the offending key on syntactically
/// invalid bytes.
pub fn decode<T: DeserializeOwned>(key: &str, value: &[u8]) -> Result<T> {
    serde_json::from_slice(value).map_err(|e| Error::malformed(key, e))
}
