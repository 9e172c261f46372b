use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tracing::debug;

use super::proxy::SingletonProxy;
use super::proxy_path;
use crate::error::MeshworkResult;
use crate::runtime::{ActorHandle, ActorPath, ActorRuntime};

/// One proxy per singleton name, created on first use
pub struct SingletonProxyManager {
    runtime: ActorRuntime,
    proxies: DashMap<String, ActorHandle>,
    retry_interval: Duration,
    request_timeout: Duration,
}

impl SingletonProxyManager {
    pub fn new(runtime: ActorRuntime, retry_interval: Duration, request_timeout: Duration) -> Self {
        Self {
            runtime,
            proxies: DashMap::new(),
            retry_interval,
            request_timeout,
        }
    }

    /// Path of the proxy for `name`, spawning it if needed
    pub fn get_or_create(&self, name: &str) -> MeshworkResult<ActorPath> {
        match self.proxies.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().path().clone()),
            Entry::Vacant(entry) => {
                let proxy = SingletonProxy::new(name, self.retry_interval, self.request_timeout);
                let handle = self.runtime.spawn(&proxy_path(name), Box::new(proxy))?;
                let path = handle.path().clone();
                debug!(singleton = %name, proxy = %path, "created singleton proxy");
                entry.insert(handle);
                Ok(path)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Stop every proxy
    pub async fn shutdown(&self) {
        let names: Vec<String> = self.proxies.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, handle)) = self.proxies.remove(&name) {
                handle.stop().await;
            }
        }
    }
}
