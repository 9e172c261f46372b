//! Default configuration values for Meshwork
//!
//! This module centralizes all default values to make them easy to find and modify.

// Cluster identity
pub const DEFAULT_CLUSTER_NAME: &str = "meshwork";
pub const DEFAULT_NODE_ADDRESS: &str = "127.0.0.1:7946";

// Discovery and gossip
pub const DEFAULT_DISCOVERY_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_CROSS_DC_DISCOVERY_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_MAX_TARGETS_PER_TICK: usize = 20;
pub const DEFAULT_MAX_CROSS_DC_TARGETS_PER_TICK: usize = 3;
pub const DEFAULT_PEER_VERSION_TTL_MS: u64 = 5_000;

// Failure detection
pub const DEFAULT_FAILURE_DETECTION_TIMEOUT_MS: u64 = 40_000;
pub const DEFAULT_FAILURE_DETECTION_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_CROSS_DC_TIMEOUT_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_QUORUM_RECOVERY_SEEDS: usize = 3;

// Membership and protocol
pub const DEFAULT_MIN_PROTOCOL_VERSION: u16 = 1;
pub const DEFAULT_MAX_PROTOCOL_VERSION: u16 = 1;
pub const DEFAULT_MAX_VERSION_VECTOR_ENTRIES: usize = 1_000;

// Rate limiting
pub const DEFAULT_JOIN_RATE_PER_SEC: f64 = 5.0;
pub const DEFAULT_JOIN_BURST: u32 = 10;
pub const DEFAULT_JOIN_RATE_MAX_ENTRIES: usize = 10_000;
pub const DEFAULT_GOSSIP_RATE_PER_SEC: f64 = 0.0; // unlimited
pub const DEFAULT_GOSSIP_BURST: u32 = 100;

// Join and request timeouts
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;
pub const MIN_REQUEST_TIMEOUT_SECS: u64 = 1;
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 30;

// Join retry backoff
pub const DEFAULT_JOIN_RETRY_INITIAL_MS: u64 = 500;
pub const DEFAULT_JOIN_RETRY_MAX_SECS: u64 = 30;
pub const DEFAULT_JOIN_RETRY_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_BACKOFF_JITTER_FRACTION: f64 = 0.2; // +/-20%
