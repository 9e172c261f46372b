//! Gossip-based cluster membership
//!
//! The data model ([`VersionVector`], [`NodeState`], [`ClusterView`]) and the
//! policy helpers around it are plain values with no I/O. [`NodeActor`] is the
//! only place where they are combined with the transport, scheduler and event
//! bus; [`Cluster`] starts one and hands back a [`ClusterHandle`].

pub mod allowlist;
pub mod backoff;
pub mod codec;
pub mod events;
pub mod failure_detector;
pub mod gossip_selector;
pub mod handle;
pub mod join_auth;
pub mod messages;
pub mod node_actor;
pub mod node_state;
pub mod quorum;
pub mod rate_limit;
pub mod seeds;
pub mod timeouts;
pub mod version_vector;
pub mod view;

pub use events::{BroadcastEventBus, ClusterEvent, ClusterEventPublisher, EventBus};
pub use handle::{Cluster, ClusterHandle, ClusterRuntime, ClusterState};
pub use messages::{ClusterMessage, RejectKind, Rejection};
pub use node_actor::{NodeActor, NodeCommand, NodeDeps, Tick, CLIENT_PATH, NODE_PATH};
pub use node_state::{MemberStatus, NodeState};
pub use quorum::{
    datacenter_health, leader_address, DatacenterHealth, QuorumCalculator, QuorumStrategy, QuorumTally,
};
pub use version_vector::{CausalOrder, VersionVector};
pub use view::{ClusterView, ConcurrentMergeStrategy, MergeOptions, CLUSTER_PROTOCOL_VERSION};
