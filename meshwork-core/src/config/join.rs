//! Join retry and request timeout configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;
use super::parse_duration_from_env;
use crate::cluster::backoff::Backoff;
use crate::error::{MeshworkError, MeshworkResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JoinConfig {
    /// Timeout for join and get-view requests, clamped to 1-30s
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub retry_initial_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub retry_max_delay: Duration,

    pub retry_multiplier: f64,

    pub retry_jitter: bool,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry_initial_delay: Duration::from_millis(DEFAULT_JOIN_RETRY_INITIAL_MS),
            retry_max_delay: Duration::from_secs(DEFAULT_JOIN_RETRY_MAX_SECS),
            retry_multiplier: DEFAULT_JOIN_RETRY_MULTIPLIER,
            retry_jitter: true,
        }
    }
}

impl JoinConfig {
    pub fn from_env() -> MeshworkResult<Self> {
        let mut config = Self::default();
        config.request_timeout =
            parse_duration_from_env("MESHWORK_REQUEST_TIMEOUT_MS", config.request_timeout);
        config.retry_initial_delay =
            parse_duration_from_env("MESHWORK_JOIN_RETRY_INITIAL_MS", config.retry_initial_delay);
        config.retry_max_delay =
            parse_duration_from_env("MESHWORK_JOIN_RETRY_MAX_MS", config.retry_max_delay);
        Ok(config)
    }

    /// Backoff calculator for join retries
    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial: self.retry_initial_delay,
            max: self.retry_max_delay,
            factor: self.retry_multiplier,
            jitter: self.retry_jitter,
        }
    }

    pub fn validate(&self) -> MeshworkResult<()> {
        if self.retry_initial_delay.is_zero() {
            return Err(MeshworkError::configuration(
                "join.retry_initial_delay",
                "must be greater than zero",
            ));
        }
        if self.retry_max_delay < self.retry_initial_delay {
            return Err(MeshworkError::configuration(
                "join.retry_max_delay",
                "must not be smaller than retry_initial_delay",
            ));
        }
        if !(self.retry_multiplier.is_finite() && self.retry_multiplier >= 1.0) {
            return Err(MeshworkError::configuration(
                "join.retry_multiplier",
                "must be a finite value >= 1.0",
            ));
        }
        Ok(())
    }
}
