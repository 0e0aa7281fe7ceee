//! Write/read retry constants.

/// Total attempts (first try included) for rate-limited or server-side failures.
pub const MAX_TRANSIENT_ATTEMPTS: u32 = 3;

/// Backoff delays in seconds between transient attempts.
/// The delay before attempt `n + 1` is entry `n - 1`; the last entry repeats.
pub const BACKOFF_SCHEDULE_SECS: &[u64] = &[1, 2, 4];

/// Retries granted to a write that hit a conflict.
pub const CONFLICT_RETRIES: u32 = 1;

/// Delay in seconds before retrying a conflicted write.
pub const CONFLICT_RETRY_DELAY_SECS: u64 = 1;
