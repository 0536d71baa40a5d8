//! Coordinator configuration.

use std::time::Duration;

/// Tunables for writers, the fan-out reader, and convergence.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// TTL on a task claim. A claim that is never started lapses after
    /// this long and convergence re-kicks the pending entry.
    pub task_claim_ttl: Duration,
    /// TTL on the advisory task-convergence lock.
    pub convergence_lock_ttl: Duration,
    /// Worker-pool width for directory hydration.
    pub fanout_width: usize,
    /// Initial backoff when a writer retries a transient store failure.
    pub retry_backoff_base: Duration,
    /// Backoff ceiling for writer retries.
    pub retry_backoff_max: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            task_claim_ttl: Duration::from_secs(10),
            convergence_lock_ttl: Duration::from_secs(30),
            fanout_width: 50,
            retry_backoff_base: Duration::from_millis(100),
            retry_backoff_max: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.task_claim_ttl, Duration::from_secs(10));
        assert_eq!(config.convergence_lock_ttl, Duration::from_secs(30));
        assert_eq!(config.fanout_width, 50);
        assert_eq!(config.retry_backoff_base, Duration::from_millis(100));
        assert_eq!(config.retry_backoff_max, Duration::from_secs(5));
    }
}
