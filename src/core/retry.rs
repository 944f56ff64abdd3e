//! Transient-failure classification for catalog calls.
//!
//! The policy only answers "may this attempt be repeated?". The waiting and
//! re-execution live in `catalog::executor`.

use std::time::Duration;

use crate::defaults::RetryConfig;

/// Attempts permitted for one catalog call, the first attempt included.
pub const MAX_ATTEMPTS: u32 = 10;

/// Fixed spacing between attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Backend error numbers treated as transient: connection loss, login
/// throttling, resource governance, deadlock victim and timeouts.
pub const TRANSIENT_ERROR_NUMBERS: &[i32] = &[
    -2,    // client timeout
    20,    // instance does not support encryption / dropped connection
    53,    // network path not found
    64,    // specified network name no longer available
    121,   // semaphore timeout
    233,   // no process on the other end of the pipe
    1205,  // deadlock victim
    4060,  // cannot open database
    4221,  // login to read-secondary failed during redo
    10053, // connection aborted by host software
    10054, // connection reset by peer
    10060, // connection attempt timed out
    10928, // resource limit reached
    10929, // resource governance minimum not met
    11001, // host not found
    40143, // replica cannot accept connections
    40197, // service error processing request
    40501, // service busy
    40540, // service encountered an error
    40613, // database unavailable
    49918, // not enough resources to process request
    49919, // too many create/update operations
    49920, // too many operations in progress
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            delay: RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Build a policy; `max_attempts` is clamped to `1..=MAX_ATTEMPTS`.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS),
            delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.delay_ms))
    }

    pub fn is_transient(error_number: i32) -> bool {
        TRANSIENT_ERROR_NUMBERS.contains(&error_number)
    }

    /// Decide whether a failed attempt may be repeated.
    ///
    /// `attempt_count` is the number of attempts made before the failing one
    /// (0 for the first call), so a retry is granted only while another
    /// attempt still fits under the ceiling.
    pub fn should_retry(&self, error_number: i32, attempt_count: u32) -> bool {
        if attempt_count.saturating_add(1) >= self.max_attempts {
            return false;
        }
        Self::is_transient(error_number)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
