//! Anti-entropy: periodic gossip rounds and inbound gossip handling

use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, trace, Instrument};

use super::{NodeActor, Phase, NODE_PATH};
use crate::cluster::gossip_selector::GossipTarget;
use crate::cluster::messages::ClusterMessage;
use crate::cluster::node_state::MemberStatus;
use crate::cluster::version_vector::VersionVector;
use crate::cluster::view::ClusterView;
use crate::error::{MeshworkError, MeshworkResult};
use crate::observability::gossip_span;
use crate::runtime::ActorPath;

/// Last version vector exchanged with each peer address.
///
/// A round skips peers whose recorded vector already covers ours. Entries
/// expire after `ttl` so quiet peers still receive periodic heartbeats, and
/// the map never holds more than `max_entries` addresses.
#[derive(Debug)]
pub struct PeerVersionCache {
    entries: HashMap<String, (VersionVector, i64)>,
    ttl: Duration,
    max_entries: usize,
}

impl PeerVersionCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn record(&mut self, address: &str, version: &VersionVector, now: i64) {
        if !self.entries.contains_key(address) && self.entries.len() >= self.max_entries {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (_, at))| *at)
                .map(|(addr, _)| addr.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries
            .insert(address.to_string(), (version.clone(), now));
    }

    /// Whether `address` is known to have everything in `ours`
    pub fn is_current(&self, address: &str, ours: &VersionVector, now: i64) -> bool {
        match self.entries.get(address) {
            Some((theirs, at)) => {
                let age = now.saturating_sub(*at).max(0) as u128;
                age < self.ttl.as_nanos() && theirs.dominates_or_equals(ours)
            }
            None => false,
        }
    }

    /// Forget addresses that are no longer members or seeds
    pub fn retain(&mut self, known: &HashSet<&str>) {
        self.entries.retain(|addr, _| known.contains(addr.as_str()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl NodeActor {
    /// Merge a peer's view. Fails only for protocol versions out of range.
    pub(super) async fn on_gossip(
        &mut self,
        mut incoming: ClusterView,
        sender: Option<&ActorPath>,
    ) -> MeshworkResult<()> {
        let min = self.config.membership.min_protocol_version;
        let max = self.config.membership.max_protocol_version;
        if incoming.protocol_version < min || incoming.protocol_version > max {
            return Err(MeshworkError::ProtocolVersionMismatch {
                version: incoming.protocol_version,
                min,
                max,
            });
        }

        if self.phase != Phase::Up {
            trace!("ignoring gossip while not up");
            return Ok(());
        }

        let now = self.now();
        let before = self.view.clone();
        let mut revived = false;

        if let Some(sender) = sender {
            if let Some(peer) = self.view.member_by_address(&sender.address) {
                let peer_id = peer.id.clone();
                let was_suspect = peer.status == MemberStatus::Suspect;
                self.view.touch(&peer_id, now);
                if was_suspect {
                    debug!(peer = %peer_id, "suspect member is alive again");
                    revived = self.view.set_status(&peer_id, MemberStatus::Up);
                }
            }
            self.peer_versions
                .record(&sender.address, incoming.version_vector(), now);
        }

        let departed = self.strip_departed(&mut incoming);
        let changed = self.view.merge_from(&incoming, &self.merge_options, now) || departed > 0;
        self.reassert_local(now);

        if changed {
            self.broadcast().await;
        }
        if changed || revived {
            self.after_change(&before);
        }
        Ok(())
    }

    /// Periodic intra-DC round
    pub(super) async fn gossip_round(&mut self) {
        if self.phase != Phase::Up {
            return;
        }
        let now = self.now();
        self.refresh_heartbeat(now);

        let seeds = self.deps.seeds.all_seeds_with_dc();
        {
            let mut known: HashSet<&str> = self.view.members().map(|m| m.address.as_str()).collect();
            known.extend(seeds.iter().map(|s| s.address.as_str()));
            self.peer_versions.retain(&known);
        }

        let targets: Vec<GossipTarget> = self
            .selector
            .select(&self.view, &self.local, &seeds)
            .into_iter()
            .filter(|t| {
                !self
                    .peer_versions
                    .is_current(&t.address, self.view.version_vector(), now)
            })
            .collect();

        let span = gossip_span(&self.local.id, "local");
        span.record("targets", targets.len());
        trace!(targets = targets.len(), "gossip round");
        self.send_gossip(&targets).instrument(span).await;
    }

    /// Periodic round towards other datacenters
    pub(super) async fn cross_dc_round(&mut self) {
        if self.phase != Phase::Up {
            return;
        }
        let now = self.now();
        self.refresh_heartbeat(now);

        let targets = self.selector.select_cross_dc(&self.view, &self.local);
        let span = gossip_span(&self.local.id, "cross-dc");
        span.record("targets", targets.len());
        self.send_gossip(&targets).instrument(span).await;
    }

    /// Push the current view to every other member immediately
    pub(super) async fn broadcast(&mut self) {
        self.broadcast_except(None).await;
    }

    /// Broadcast, skipping `skip` (a joiner that already holds this view)
    pub(super) async fn broadcast_except(&mut self, skip: Option<&str>) {
        let targets: Vec<GossipTarget> = self
            .view
            .members()
            .filter(|m| {
                m.id != self.local.id
                    && Some(m.id.as_str()) != skip
                    && !matches!(m.status, MemberStatus::Down | MemberStatus::Removed)
            })
            .map(|m| GossipTarget {
                address: m.address.clone(),
                node_id: Some(m.id.clone()),
            })
            .collect();
        self.send_gossip(&targets).await;
    }

    fn refresh_heartbeat(&mut self, now: i64) {
        self.local.last_seen = now;
        self.view.touch(&self.local.id, now);
    }

    async fn send_gossip(&mut self, targets: &[GossipTarget]) {
        if targets.is_empty() {
            return;
        }
        let now = self.now();
        let snapshot = self.view.snapshot();
        let mut sent = 0;

        for target in targets {
            if !self.gossip_limiter.allow() {
                debug!(target = %target.address, "gossip send rate limited");
                self.metrics.gossip_rate_limited();
                continue;
            }
            let to = ActorPath::new(target.address.clone(), NODE_PATH);
            let message = ClusterMessage::Gossip {
                view: snapshot.clone(),
            };
            match self
                .deps
                .transport
                .tell(&to, Some(self.self_path.clone()), message)
                .await
            {
                Ok(()) => {
                    sent += 1;
                    self.peer_versions
                        .record(&target.address, snapshot.version_vector(), now);
                }
                Err(e) => debug!(target = %target.address, error = %e, "gossip send failed"),
            }
        }
        self.metrics.gossip_sent(sent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vv(entries: &[(&str, u64)]) -> VersionVector {
        VersionVector::from_entries(entries.iter().map(|(k, v)| (k.to_string(), *v))).unwrap()
    }

    #[test]
    fn test_cache_skips_only_fresh_and_covering_entries() {
        let mut cache = PeerVersionCache::new(Duration::from_millis(100), 4);
        let ours = vv(&[("a", 2)]);
        cache.record("peer:1", &vv(&[("a", 2)]), 0);

        assert!(cache.is_current("peer:1", &ours, 50_000_000));
        // expired
        assert!(!cache.is_current("peer:1", &ours, 200_000_000));
        // behind
        assert!(!cache.is_current("peer:1", &vv(&[("a", 3)]), 10));
        assert!(!cache.is_current("unknown:1", &ours, 10));
    }

    #[test]
    fn test_cache_is_bounded() {
        let mut cache = PeerVersionCache::new(Duration::from_secs(1), 2);
        let v = VersionVector::new();
        cache.record("a", &v, 1);
        cache.record("b", &v, 2);
        cache.record("c", &v, 3);
        assert_eq!(cache.len(), 2);
        assert!(!cache.is_current("a", &v, 4));
        assert!(cache.is_current("c", &v, 4));
    }

    #[test]
    fn test_cache_retains_known_addresses() {
        let mut cache = PeerVersionCache::new(Duration::from_secs(1), 8);
        let v = VersionVector::new();
        cache.record("a", &v, 1);
        cache.record("b", &v, 1);
        cache.retain(&HashSet::from(["a"]));
        assert_eq!(cache.len(), 1);
    }
}
