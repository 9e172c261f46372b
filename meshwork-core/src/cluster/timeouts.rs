//! Request timeout bounds for join and view queries

use std::time::Duration;

use crate::config::{DEFAULT_REQUEST_TIMEOUT_SECS, MAX_REQUEST_TIMEOUT_SECS, MIN_REQUEST_TIMEOUT_SECS};

/// Zero selects the default; anything else is clamped to 1-30s
pub fn clamp_request_timeout(timeout: Duration) -> Duration {
    if timeout.is_zero() {
        return Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS);
    }
    timeout.clamp(
        Duration::from_secs(MIN_REQUEST_TIMEOUT_SECS),
        Duration::from_secs(MAX_REQUEST_TIMEOUT_SECS),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 5_000; "zero uses default")]
    #[test_case(10, 1_000; "raised to minimum")]
    #[test_case(2_500, 2_500; "inside range")]
    #[test_case(120_000, 30_000; "lowered to maximum")]
    fn test_clamp(input_ms: u64, expected_ms: u64) {
        assert_eq!(
            clamp_request_timeout(Duration::from_millis(input_ms)),
            Duration::from_millis(expected_ms)
        );
    }
}
