//! Leader-affinity singletons
//!
//! A [`SingletonManager`] runs on every node and keeps one instance of each
//! registered singleton alive on the node that is both leader and in quorum.
//! Callers never address the instance directly: they talk to the local
//! [`SingletonProxy`] for the name, which follows leadership changes and
//! buffers messages while no location is known.

pub mod manager;
pub mod proxy;
pub mod proxy_manager;

pub use manager::{SingletonManager, SingletonProvider};
pub use proxy::SingletonProxy;
pub use proxy_manager::SingletonProxyManager;

/// Path of the singleton manager on every node
pub const SINGLETONS_PATH: &str = "/@cluster-singletons";

/// Parent path of the per-name proxies on every node
pub const PROXIES_PATH: &str = "/@cluster-singleton-proxies";

/// Where the instance named `name` lives on the leader
pub fn singleton_path(name: &str) -> String {
    format!("{}/{}", SINGLETONS_PATH, name)
}

pub fn proxy_path(name: &str) -> String {
    format!("{}/{}", PROXIES_PATH, name)
}
