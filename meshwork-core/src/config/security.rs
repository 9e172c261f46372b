//! Join admission and admin authentication configuration

use serde::{Deserialize, Serialize};
use std::fmt;

use super::defaults::*;
use crate::error::{MeshworkError, MeshworkResult};

/// Shared secrets and allow-lists guarding cluster admission
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Secret used to sign and verify join tokens. Unset disables join auth.
    pub join_secret: Option<String>,

    /// Secret used for admin tokens. Unset disables admin authentication.
    pub admin_secret: Option<String>,

    /// Exact host, `host:port` or CIDR entries. Empty allows every address.
    pub allowed_addresses: Vec<String>,

    /// Datacenter labels allowed to join. Empty allows every datacenter.
    pub allowed_datacenters: Vec<String>,
}

// Secrets never reach log output
impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("join_secret", &self.join_secret.as_ref().map(|_| "<redacted>"))
            .field("admin_secret", &self.admin_secret.as_ref().map(|_| "<redacted>"))
            .field("allowed_addresses", &self.allowed_addresses)
            .field("allowed_datacenters", &self.allowed_datacenters)
            .finish()
    }
}

impl SecurityConfig {
    pub fn from_env() -> MeshworkResult<Self> {
        let mut config = Self::default();

        if let Ok(secret) = std::env::var("MESHWORK_JOIN_SECRET") {
            config.join_secret = Some(secret);
        }
        if let Ok(secret) = std::env::var("MESHWORK_ADMIN_SECRET") {
            config.admin_secret = Some(secret);
        }
        if let Some(addresses) = super::parse_list_from_env("MESHWORK_ALLOWED_ADDRESSES") {
            config.allowed_addresses = addresses;
        }
        if let Some(dcs) = super::parse_list_from_env("MESHWORK_ALLOWED_DATACENTERS") {
            config.allowed_datacenters = dcs;
        }

        Ok(config)
    }

    pub fn validate(&self) -> MeshworkResult<()> {
        crate::cluster::allowlist::AddressAllowlist::parse(&self.allowed_addresses)?;
        Ok(())
    }
}

/// Token bucket parameters for join admission and outbound gossip
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Join attempts per second allowed from one address
    pub join_rate: f64,

    pub join_burst: u32,

    /// Addresses tracked before the oldest entry is evicted
    pub join_max_entries: usize,

    /// Outbound gossip sends per second across all peers, <= 0 is unlimited
    pub gossip_rate: f64,

    pub gossip_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            join_rate: DEFAULT_JOIN_RATE_PER_SEC,
            join_burst: DEFAULT_JOIN_BURST,
            join_max_entries: DEFAULT_JOIN_RATE_MAX_ENTRIES,
            gossip_rate: DEFAULT_GOSSIP_RATE_PER_SEC,
            gossip_burst: DEFAULT_GOSSIP_BURST,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> MeshworkResult<()> {
        if !self.join_rate.is_finite() || !self.gossip_rate.is_finite() {
            return Err(MeshworkError::configuration(
                "rate_limit",
                "rates must be finite numbers",
            ));
        }
        if self.join_rate > 0.0 && self.join_burst == 0 {
            return Err(MeshworkError::configuration(
                "rate_limit.join_burst",
                "must be at least 1 when join rate limiting is enabled",
            ));
        }
        if self.join_max_entries == 0 {
            return Err(MeshworkError::configuration(
                "rate_limit.join_max_entries",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}
