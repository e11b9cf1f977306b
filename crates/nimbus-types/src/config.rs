//! Configuration primitives for Nimbus
//!
//! Validated numeric newtypes and retry/timeout policies shared by the
//! engine and the CLI. Per-run configuration is immutable once a run starts;
//! these types make invalid values unrepresentable at construction time.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Worker pool size with validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCount(usize);

impl WorkerCount {
    /// Minimum pool size
    pub const MIN: usize = 1;
    /// Maximum pool size
    pub const MAX: usize = 256;
    /// Default number of comparison workers
    pub const DEFAULT_CHECKERS: WorkerCount = WorkerCount(8);
    /// Default number of transfer workers
    pub const DEFAULT_TRANSFERS: WorkerCount = WorkerCount(4);

    /// Create a new worker count with validation
    pub fn new(count: usize) -> Result<Self, String> {
        if count < Self::MIN {
            Err(format!("worker count {} is below minimum {}", count, Self::MIN))
        } else if count > Self::MAX {
            Err(format!("worker count {} exceeds maximum {}", count, Self::MAX))
        } else {
            Ok(Self(count))
        }
    }

    /// Get the worker count value
    pub fn get(self) -> usize {
        self.0
    }
}

/// Stream buffer size with validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferSize(usize);

impl BufferSize {
    /// Minimum buffer size (4KB)
    pub const MIN: usize = 4 * 1024;
    /// Maximum buffer size (64MB)
    pub const MAX: usize = 64 * 1024 * 1024;
    /// Default buffer size (1MB)
    pub const DEFAULT: usize = 1024 * 1024;

    /// Create a new buffer size with validation
    pub fn new(size: usize) -> Result<Self, String> {
        if size < Self::MIN {
            Err(format!("buffer size {} is below minimum {}", size, Self::MIN))
        } else if size > Self::MAX {
            Err(format!("buffer size {} exceeds maximum {}", size, Self::MAX))
        } else if !size.is_power_of_two() {
            Err(format!("buffer size {} must be a power of two", size))
        } else {
            Ok(Self(size))
        }
    }

    /// Get the buffer size value
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for BufferSize {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

/// Retry policy for the transfer primitive and the whole run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Whole-run reruns when counted errors remain
    pub run_retries: u32,
    /// Per-transfer attempts inside the transfer primitive
    pub low_level_retries: u32,
    /// Initial delay between low-level attempts
    pub initial_delay: Duration,
    /// Maximum delay between low-level attempts
    pub max_delay: Duration,
    /// Backoff multiplier applied per attempt
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Create a new retry policy with validation
    pub fn new(
        run_retries: u32,
        low_level_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self, String> {
        if backoff_multiplier < 1.0 {
            return Err("backoff multiplier must be at least 1.0".to_string());
        }
        if initial_delay > max_delay {
            return Err("initial delay cannot be greater than max delay".to_string());
        }
        Ok(Self {
            run_retries,
            low_level_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
        })
    }

    /// Calculate the delay before the given low-level attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let delay_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            run_retries: 3,
            low_level_retries: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

/// Timeout policy for backend operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    /// Bound on establishing a backend connection
    pub connect_timeout: Duration,
    /// Bound on a single transfer attempt, `None` disables it
    pub io_timeout: Option<Duration>,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(60),
            io_timeout: Some(Duration::from_secs(5 * 60)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_worker_count_valid_range(count in WorkerCount::MIN..=WorkerCount::MAX) {
            let workers = WorkerCount::new(count).unwrap();
            prop_assert_eq!(workers.get(), count);
        }

        #[test]
        fn test_worker_count_rejects_invalid(count in (WorkerCount::MAX + 1)..1000usize) {
            prop_assert!(WorkerCount::new(count).is_err());
        }

        #[test]
        fn test_buffer_size_power_of_two_invariant(exp in 12u32..26u32) {
            let size = 1usize << exp;
            let buffer = BufferSize::new(size).unwrap();
            prop_assert!(buffer.get().is_power_of_two());
        }

        #[test]
        fn test_buffer_size_rejects_non_power_of_two(base in 12u32..25u32) {
            let size = (1usize << base) + 1;
            prop_assert!(BufferSize::new(size).is_err());
        }

        #[test]
        fn test_retry_delay_bounded(attempt in 0u32..20u32) {
            let policy = RetryPolicy::default();
            prop_assert!(policy.delay_for_attempt(attempt) <= policy.max_delay);
        }
    }

    #[test]
    fn test_worker_count_zero_rejected() {
        assert!(WorkerCount::new(0).is_err());
    }

    #[test]
    fn test_default_pool_sizes() {
        assert_eq!(WorkerCount::DEFAULT_CHECKERS.get(), 8);
        assert_eq!(WorkerCount::DEFAULT_TRANSFERS.get(), 4);
    }

    #[test]
    fn test_retry_policy_invalid_backoff() {
        let result = RetryPolicy::new(
            3,
            10,
            Duration::from_millis(100),
            Duration::from_secs(30),
            0.5,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_retry_policy_invalid_delay_order() {
        let result = RetryPolicy::new(
            3,
            10,
            Duration::from_secs(60),
            Duration::from_millis(100),
            2.0,
        );
        assert!(result.is_err());
    }
}
