//! Failure detection configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;
use super::parse_duration_from_env;
use crate::error::{MeshworkError, MeshworkResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FailureDetectionConfig {
    /// Silence after which a same-DC member is suspected (or removed)
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Explicit timeout for members in other datacenters
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub cross_dc_timeout: Option<Duration>,

    /// Multiplier applied to `timeout` for cross-DC members when no explicit
    /// cross-DC timeout is set
    pub cross_dc_multiplier: f64,

    /// Grace period a member stays Suspect before removal. Unset means
    /// members past the timeout are removed directly.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub suspect_confirmation: Option<Duration>,

    /// Interval between failure detection ticks
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Number of seeds probed for their view after quorum is lost
    pub recovery_seed_count: usize,
}

impl Default for FailureDetectionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_FAILURE_DETECTION_TIMEOUT_MS),
            cross_dc_timeout: None,
            cross_dc_multiplier: DEFAULT_CROSS_DC_TIMEOUT_MULTIPLIER,
            suspect_confirmation: None,
            interval: Duration::from_millis(DEFAULT_FAILURE_DETECTION_INTERVAL_MS),
            recovery_seed_count: DEFAULT_QUORUM_RECOVERY_SEEDS,
        }
    }
}

impl FailureDetectionConfig {
    pub fn from_env() -> MeshworkResult<Self> {
        let mut config = Self::default();

        config.timeout = parse_duration_from_env("MESHWORK_FAILURE_TIMEOUT_MS", config.timeout);
        config.interval = parse_duration_from_env("MESHWORK_FAILURE_INTERVAL_MS", config.interval);

        if let Ok(val) = std::env::var("MESHWORK_SUSPECT_CONFIRMATION_MS") {
            let millis: u64 = val.parse().map_err(|_| {
                MeshworkError::configuration("failure.suspect_confirmation", "not an integer")
            })?;
            config.suspect_confirmation = Some(Duration::from_millis(millis));
        }

        Ok(config)
    }

    pub fn validate(&self) -> MeshworkResult<()> {
        if self.timeout.is_zero() {
            return Err(MeshworkError::configuration(
                "failure.timeout",
                "must be greater than zero",
            ));
        }
        if self.interval.is_zero() {
            return Err(MeshworkError::configuration(
                "failure.interval",
                "must be greater than zero",
            ));
        }
        if !(self.cross_dc_multiplier.is_finite() && self.cross_dc_multiplier >= 1.0) {
            return Err(MeshworkError::configuration(
                "failure.cross_dc_multiplier",
                "must be a finite value >= 1.0",
            ));
        }
        Ok(())
    }
}
