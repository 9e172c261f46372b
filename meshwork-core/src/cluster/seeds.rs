//! Seed discovery: static seed lists plus pluggable dynamic resolution

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use super::gossip_selector::SeedEntry;
use crate::config::DiscoveryConfig;
use crate::error::{MeshworkError, MeshworkResult};

/// Source of seed addresses that can change while a node runs
#[async_trait]
pub trait SeedsResolver: Send + Sync {
    /// Resolve the current seed set
    async fn resolve(&self) -> MeshworkResult<Vec<SeedEntry>>;

    /// Name of this resolver, used in logs
    fn name(&self) -> &str;
}

/// Resolves `host:port` names through the system resolver
pub struct DnsSeedsResolver {
    names: Vec<String>,
    datacenter: Option<String>,
}

impl DnsSeedsResolver {
    pub fn new(names: Vec<String>, datacenter: Option<String>) -> Self {
        Self { names, datacenter }
    }
}

#[async_trait]
impl SeedsResolver for DnsSeedsResolver {
    async fn resolve(&self) -> MeshworkResult<Vec<SeedEntry>> {
        let mut seeds = Vec::new();
        for name in &self.names {
            match tokio::net::lookup_host(name.as_str()).await {
                Ok(addrs) => seeds.extend(addrs.map(|addr| SeedEntry {
                    address: addr.to_string(),
                    datacenter: self.datacenter.clone(),
                })),
                Err(e) => warn!(name = %name, error = %e, "Failed to resolve seed name"),
            }
        }
        if seeds.is_empty() && !self.names.is_empty() {
            return Err(MeshworkError::transport(
                self.names.join(","),
                "no seed name resolved",
            ));
        }
        Ok(seeds)
    }

    fn name(&self) -> &str {
        "dns"
    }
}

/// Seed addresses for join, gossip and quorum recovery.
///
/// Shared between the node actor and outside callers, so resolved seeds live
/// behind a lock.
pub struct SeedsProvider {
    static_seeds: Vec<SeedEntry>,
    resolver: Option<Arc<dyn SeedsResolver>>,
    resolved: RwLock<Vec<SeedEntry>>,
}

impl SeedsProvider {
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self::from_lists(&config.seeds, &config.datacenter_seeds)
    }

    pub fn from_lists(seeds: &[String], datacenter_seeds: &BTreeMap<String, Vec<String>>) -> Self {
        let mut static_seeds: Vec<SeedEntry> = seeds
            .iter()
            .map(|address| SeedEntry {
                address: address.clone(),
                datacenter: None,
            })
            .collect();
        for (dc, addresses) in datacenter_seeds {
            static_seeds.extend(addresses.iter().map(|address| SeedEntry {
                address: address.clone(),
                datacenter: Some(dc.clone()),
            }));
        }
        Self {
            static_seeds,
            resolver: None,
            resolved: RwLock::new(Vec::new()),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn SeedsResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Refresh dynamically resolved seeds. Failures keep the previous set.
    pub async fn refresh(&self) {
        let Some(resolver) = &self.resolver else {
            return;
        };
        match resolver.resolve().await {
            Ok(seeds) => {
                debug!(resolver = resolver.name(), count = seeds.len(), "Resolved seeds");
                *self.resolved.write() = seeds;
            }
            Err(e) => warn!(resolver = resolver.name(), error = %e, "Seed resolution failed"),
        }
    }

    /// Every known seed with its datacenter, deduplicated by address
    pub fn all_seeds_with_dc(&self) -> Vec<SeedEntry> {
        let resolved = self.resolved.read();
        let mut seen = HashSet::new();
        self.static_seeds
            .iter()
            .chain(resolved.iter())
            .filter(|seed| seen.insert(seed.address.clone()))
            .cloned()
            .collect()
    }

    pub fn all_addresses(&self) -> Vec<String> {
        self.all_seeds_with_dc().into_iter().map(|s| s.address).collect()
    }

    /// Seeds to try when joining: same-DC seeds first, each group shuffled
    pub fn seeds_for_join(&self, local_dc: &str) -> Vec<String> {
        let (mut local, mut remote): (Vec<SeedEntry>, Vec<SeedEntry>) = self
            .all_seeds_with_dc()
            .into_iter()
            .partition(|seed| seed.datacenter.as_deref() == Some(local_dc));

        let mut rng = rand::thread_rng();
        local.shuffle(&mut rng);
        remote.shuffle(&mut rng);
        local.into_iter().chain(remote).map(|s| s.address).collect()
    }

    /// A node with no seeds, or listed as a seed itself, bootstraps the cluster
    pub fn is_bootstrap(&self, self_address: &str) -> bool {
        let all = self.all_seeds_with_dc();
        all.is_empty() || all.iter().any(|s| s.address == self_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResolver(Vec<SeedEntry>);

    #[async_trait]
    impl SeedsResolver for FixedResolver {
        async fn resolve(&self) -> MeshworkResult<Vec<SeedEntry>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn provider() -> SeedsProvider {
        let mut dc_seeds = BTreeMap::new();
        dc_seeds.insert("dc1".to_string(), vec!["a:1".to_string(), "b:1".to_string()]);
        dc_seeds.insert("dc2".to_string(), vec!["c:1".to_string()]);
        SeedsProvider::from_lists(&["b:1".to_string(), "d:1".to_string()], &dc_seeds)
    }

    #[test]
    fn test_all_seeds_deduplicated() {
        let mut addresses = provider().all_addresses();
        addresses.sort();
        assert_eq!(addresses, vec!["a:1", "b:1", "c:1", "d:1"]);
    }

    #[test]
    fn test_join_order_prefers_local_dc() {
        let p = SeedsProvider::from_lists(&[], &{
            let mut m = BTreeMap::new();
            m.insert("dc1".to_string(), vec!["a:1".to_string(), "b:1".to_string()]);
            m.insert("dc2".to_string(), vec!["c:1".to_string()]);
            m
        });
        for _ in 0..10 {
            let order = p.seeds_for_join("dc2");
            assert_eq!(order[0], "c:1");
            assert_eq!(order.len(), 3);
        }
    }

    #[test]
    fn test_bootstrap_detection() {
        let empty = SeedsProvider::from_lists(&[], &BTreeMap::new());
        assert!(empty.is_bootstrap("x:1"));
        assert!(provider().is_bootstrap("d:1"));
        assert!(!provider().is_bootstrap("z:1"));
    }

    #[tokio::test]
    async fn test_resolver_results_merged() {
        let p = SeedsProvider::from_lists(&["a:1".to_string()], &BTreeMap::new()).with_resolver(
            Arc::new(FixedResolver(vec![SeedEntry {
                address: "r:1".into(),
                datacenter: Some("dc9".into()),
            }])),
        );
        assert_eq!(p.all_addresses(), vec!["a:1"]);

        p.refresh().await;
        assert_eq!(p.all_addresses(), vec!["a:1", "r:1"]);
        assert_eq!(p.seeds_for_join("dc9")[0], "r:1");
    }
}
