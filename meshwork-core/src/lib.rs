//! Meshwork: gossip-based cluster membership for an embeddable actor runtime
//!
//! Nodes discover each other through seeds, exchange membership views by
//! gossip, detect failures by heartbeat age and agree on a leader
//! deterministically. Singletons registered with the cluster run on the
//! leader only while it is in quorum.
//!
//! ```no_run
//! use meshwork_core::cluster::{Cluster, ClusterRuntime};
//! use meshwork_core::config::ClusterConfig;
//! use meshwork_core::runtime::InMemoryNetwork;
//!
//! # async fn demo() -> meshwork_core::error::MeshworkResult<()> {
//! let network = InMemoryNetwork::new();
//! let config = ClusterConfig::test("127.0.0.1:7001");
//! let runtime = ClusterRuntime::new(network.transport("127.0.0.1:7001"));
//! let cluster = Cluster::start(config, runtime).await?;
//! println!("leader: {:?}", cluster.leader().await?);
//! cluster.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod config;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod runtime;
pub mod singleton;

pub use cluster::{Cluster, ClusterEvent, ClusterHandle, ClusterRuntime, ClusterState};
pub use config::ClusterConfig;
pub use error::{MeshworkError, MeshworkResult};
