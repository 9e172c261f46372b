//! Quorum, protocol and merge configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;
use crate::cluster::quorum::QuorumStrategy;
use crate::cluster::view::ConcurrentMergeStrategy;
use crate::error::{MeshworkError, MeshworkResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MembershipConfig {
    pub quorum_strategy: QuorumStrategy,

    /// Datacenters that must each have a healthy member for quorum
    pub required_datacenters: Vec<String>,

    /// Lowest accepted gossip protocol version
    pub min_protocol_version: u16,

    /// Highest accepted gossip protocol version
    pub max_protocol_version: u16,

    /// Upper bound on version vector entries kept after pruning
    pub max_version_vector_entries: usize,

    /// Remote epoch/timestamp is not adopted when it differs from ours by more
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub max_clock_skew: Option<Duration>,

    /// How epoch/timestamp are reconciled for concurrent views
    pub concurrent_merge: ConcurrentMergeStrategy,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            quorum_strategy: QuorumStrategy::default(),
            required_datacenters: Vec::new(),
            min_protocol_version: DEFAULT_MIN_PROTOCOL_VERSION,
            max_protocol_version: DEFAULT_MAX_PROTOCOL_VERSION,
            max_version_vector_entries: DEFAULT_MAX_VERSION_VECTOR_ENTRIES,
            max_clock_skew: None,
            concurrent_merge: ConcurrentMergeStrategy::default(),
        }
    }
}

impl MembershipConfig {
    pub fn from_env() -> MeshworkResult<Self> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MESHWORK_QUORUM_STRATEGY") {
            config.quorum_strategy = val.parse()?;
        }

        if let Some(dcs) = super::parse_list_from_env("MESHWORK_REQUIRED_DATACENTERS") {
            config.required_datacenters = dcs;
        }

        Ok(config)
    }

    pub fn validate(&self) -> MeshworkResult<()> {
        if self.min_protocol_version > self.max_protocol_version {
            return Err(MeshworkError::configuration(
                "membership.min_protocol_version",
                format!(
                    "min {} exceeds max {}",
                    self.min_protocol_version, self.max_protocol_version
                ),
            ));
        }
        if self.max_version_vector_entries == 0
            || self.max_version_vector_entries > crate::cluster::version_vector::MAX_VERSION_VECTOR_ENTRIES
        {
            return Err(MeshworkError::configuration(
                "membership.max_version_vector_entries",
                "must be between 1 and 65535",
            ));
        }
        Ok(())
    }
}
