//! Configuration for Meshwork cluster membership
//!
//! Every section derives `serde` with `#[serde(default)]`, so a TOML file only
//! needs the keys it overrides. Values can also be taken from `MESHWORK_*`
//! environment variables. [`ClusterConfig::validate`] runs before a node starts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::cluster::node_state::{LABEL_DATACENTER, LABEL_REGION};
use crate::error::{MeshworkError, MeshworkResult};

pub mod defaults;
pub mod discovery;
pub mod failure;
pub mod join;
pub mod membership;
pub mod security;

pub use defaults::*;
pub use discovery::DiscoveryConfig;
pub use failure::FailureDetectionConfig;
pub use join::JoinConfig;
pub use membership::MembershipConfig;
pub use security::{RateLimitConfig, SecurityConfig};

/// Root configuration for one cluster node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    /// Clustering can be switched off, in which case every cluster operation
    /// fails with `ClusterDisabled`
    pub enabled: bool,

    pub cluster_name: String,

    pub node: NodeConfig,

    pub discovery: DiscoveryConfig,

    pub failure: FailureDetectionConfig,

    pub membership: MembershipConfig,

    pub security: SecurityConfig,

    pub rate_limit: RateLimitConfig,

    pub join: JoinConfig,
}

/// Identity and topology of the local node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    /// Stable node identifier. Empty means a random id is generated at start.
    pub id: String,

    /// Address other nodes use to reach this one (`host:port`)
    pub address: String,

    /// Topology labels: `datacenter`, `region`, `rack`, `zone`
    pub labels: BTreeMap<String, String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            address: DEFAULT_NODE_ADDRESS.to_string(),
            labels: BTreeMap::new(),
        }
    }
}

impl NodeConfig {
    pub fn datacenter(&self) -> Option<&str> {
        self.labels.get(LABEL_DATACENTER).map(String::as_str)
    }

    /// Fill in a random identifier when none is configured
    pub fn ensure_id(&mut self) -> &str {
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        &self.id
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            node: NodeConfig::default(),
            discovery: DiscoveryConfig::default(),
            failure: FailureDetectionConfig::default(),
            membership: MembershipConfig::default(),
            security: SecurityConfig::default(),
            rate_limit: RateLimitConfig::default(),
            join: JoinConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> MeshworkResult<Self> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MESHWORK_ENABLED") {
            config.enabled = val.parse().map_err(|_| {
                MeshworkError::configuration("enabled", "MESHWORK_ENABLED must be true or false")
            })?;
        }
        if let Ok(name) = std::env::var("MESHWORK_CLUSTER_NAME") {
            config.cluster_name = name;
        }
        if let Ok(id) = std::env::var("MESHWORK_NODE_ID") {
            config.node.id = id;
        }
        if let Ok(address) = std::env::var("MESHWORK_NODE_ADDRESS") {
            config.node.address = address;
        }
        if let Ok(dc) = std::env::var("MESHWORK_DATACENTER") {
            config.node.labels.insert(LABEL_DATACENTER.to_string(), dc);
        }
        if let Ok(region) = std::env::var("MESHWORK_REGION") {
            config.node.labels.insert(LABEL_REGION.to_string(), region);
        }

        config.discovery = DiscoveryConfig::from_env()?;
        config.failure = FailureDetectionConfig::from_env()?;
        config.membership = MembershipConfig::from_env()?;
        config.security = SecurityConfig::from_env()?;
        config.join = JoinConfig::from_env()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> MeshworkResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MeshworkError::configuration("file", format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> MeshworkResult<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| MeshworkError::configuration("file", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> MeshworkResult<String> {
        toml::to_string_pretty(self).map_err(|e| MeshworkError::configuration("file", e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> MeshworkResult<()> {
        if self.cluster_name.is_empty() {
            return Err(MeshworkError::configuration(
                "cluster_name",
                "cannot be empty",
            ));
        }
        if self.node.address.is_empty() || !self.node.address.contains(':') {
            return Err(MeshworkError::configuration(
                "node.address",
                format!("'{}' must be host:port", self.node.address),
            ));
        }
        if self.node.address.len() > crate::cluster::node_state::MAX_ADDRESS_LEN {
            return Err(MeshworkError::configuration("node.address", "address too long"));
        }

        self.discovery.validate()?;
        self.failure.validate()?;
        self.membership.validate()?;
        self.security.validate()?;
        self.rate_limit.validate()?;
        self.join.validate()?;

        Ok(())
    }

    /// Create a test configuration with short timings
    pub fn test(address: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.cluster_name = "test".to_string();
        config.node.address = address.into();
        config.discovery.interval = Duration::from_millis(50);
        config.discovery.cross_dc_interval = Duration::from_millis(100);
        config.discovery.peer_version_ttl = Duration::from_millis(50);
        config.failure.timeout = Duration::from_millis(200);
        config.failure.interval = Duration::from_millis(50);
        config.join.retry_initial_delay = Duration::from_millis(20);
        config.join.retry_max_delay = Duration::from_millis(200);
        config.join.retry_jitter = false;
        config
    }
}

/// Builder for ClusterConfig
pub struct ClusterConfigBuilder {
    config: ClusterConfig,
}

impl ClusterConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClusterConfig::default(),
        }
    }

    pub fn cluster_name(mut self, name: impl Into<String>) -> Self {
        self.config.cluster_name = name.into();
        self
    }

    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.config.node.id = id.into();
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.node.address = address.into();
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.node.labels.insert(key.into(), value.into());
        self
    }

    pub fn datacenter(self, dc: impl Into<String>) -> Self {
        self.label(LABEL_DATACENTER, dc)
    }

    pub fn seeds<I, S>(mut self, seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.discovery.seeds = seeds.into_iter().map(Into::into).collect();
        self
    }

    pub fn join_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.security.join_secret = Some(secret.into());
        self
    }

    pub fn admin_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.security.admin_secret = Some(secret.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.config.discovery = discovery;
        self
    }

    pub fn failure(mut self, failure: FailureDetectionConfig) -> Self {
        self.config.failure = failure;
        self
    }

    pub fn membership(mut self, membership: MembershipConfig) -> Self {
        self.config.membership = membership;
        self
    }

    pub fn security(mut self, security: SecurityConfig) -> Self {
        self.config.security = security;
        self
    }

    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    pub fn join(mut self, join: JoinConfig) -> Self {
        self.config.join = join;
        self
    }

    pub fn build(self) -> MeshworkResult<ClusterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ClusterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper functions for duration parsing
pub(crate) fn parse_duration_from_env(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Comma separated list, empty items dropped
pub(crate) fn parse_list_from_env(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
}
