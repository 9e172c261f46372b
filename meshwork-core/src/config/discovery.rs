//! Seed and gossip fan-out configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::defaults::*;
use super::{parse_duration_from_env, parse_list_from_env};
use crate::error::{MeshworkError, MeshworkResult};

/// Discovery configuration: where to find peers and how often to gossip
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Seed addresses (`host:port`) without datacenter affinity
    pub seeds: Vec<String>,

    /// Seed addresses grouped by datacenter label
    pub datacenter_seeds: BTreeMap<String, Vec<String>>,

    /// Interval between intra-DC gossip rounds
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Interval between cross-DC gossip rounds
    #[serde(with = "humantime_serde")]
    pub cross_dc_interval: Duration,

    /// Fan-out of each intra-DC round
    pub max_targets_per_tick: usize,

    /// Fan-out of each cross-DC round, zero disables cross-DC rounds
    pub max_cross_dc_targets_per_tick: usize,

    /// How long a peer's last reported version vector suppresses sends to it
    #[serde(with = "humantime_serde")]
    pub peer_version_ttl: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            datacenter_seeds: BTreeMap::new(),
            interval: Duration::from_millis(DEFAULT_DISCOVERY_INTERVAL_MS),
            cross_dc_interval: Duration::from_millis(DEFAULT_CROSS_DC_DISCOVERY_INTERVAL_MS),
            max_targets_per_tick: DEFAULT_MAX_TARGETS_PER_TICK,
            max_cross_dc_targets_per_tick: DEFAULT_MAX_CROSS_DC_TARGETS_PER_TICK,
            peer_version_ttl: Duration::from_millis(DEFAULT_PEER_VERSION_TTL_MS),
        }
    }
}

impl DiscoveryConfig {
    /// Load discovery configuration from environment variables
    pub fn from_env() -> MeshworkResult<Self> {
        let mut config = Self::default();

        if let Some(seeds) = parse_list_from_env("MESHWORK_SEEDS") {
            config.seeds = seeds;
        }

        config.interval = parse_duration_from_env("MESHWORK_DISCOVERY_INTERVAL_MS", config.interval);
        config.cross_dc_interval =
            parse_duration_from_env("MESHWORK_CROSS_DC_INTERVAL_MS", config.cross_dc_interval);

        if let Ok(val) = std::env::var("MESHWORK_MAX_TARGETS_PER_TICK") {
            config.max_targets_per_tick = val.parse().map_err(|_| {
                MeshworkError::configuration("discovery.max_targets_per_tick", "not an integer")
            })?;
        }

        Ok(config)
    }

    /// Number of configured seeds across the flat and per-DC lists
    pub fn seed_count(&self) -> usize {
        self.seeds.len() + self.datacenter_seeds.values().map(Vec::len).sum::<usize>()
    }

    /// Validate discovery configuration
    pub fn validate(&self) -> MeshworkResult<()> {
        if self.interval.is_zero() {
            return Err(MeshworkError::configuration(
                "discovery.interval",
                "must be greater than zero",
            ));
        }

        if self.max_cross_dc_targets_per_tick > 0 && self.cross_dc_interval.is_zero() {
            return Err(MeshworkError::configuration(
                "discovery.cross_dc_interval",
                "must be greater than zero when cross-DC fan-out is enabled",
            ));
        }

        let all_seeds = self
            .seeds
            .iter()
            .chain(self.datacenter_seeds.values().flatten());
        for seed in all_seeds {
            if !seed.contains(':') {
                return Err(MeshworkError::configuration(
                    "discovery.seeds",
                    format!("seed '{}' must be host:port", seed),
                ));
            }
        }

        Ok(())
    }
}
