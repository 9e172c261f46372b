//! Topology-aware selection of gossip peers

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;

use super::node_state::{MemberStatus, NodeState};
use super::view::ClusterView;
use crate::config::DEFAULT_MAX_TARGETS_PER_TICK;

/// A peer chosen for one gossip send
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GossipTarget {
    pub address: String,
    /// Known when the peer is already a member
    pub node_id: Option<String>,
}

/// A seed address with the datacenter it was configured under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedEntry {
    pub address: String,
    pub datacenter: Option<String>,
}

struct Candidate {
    target: GossipTarget,
    datacenter: Option<String>,
    region: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GossipTargetSelector {
    max_targets: usize,
    max_cross_dc_targets: usize,
}

impl GossipTargetSelector {
    /// A zero fan-out falls back to the default bound rather than "unlimited"
    pub fn new(max_targets: usize, max_cross_dc_targets: usize) -> Self {
        Self {
            max_targets: if max_targets == 0 {
                DEFAULT_MAX_TARGETS_PER_TICK
            } else {
                max_targets
            },
            max_cross_dc_targets,
        }
    }

    pub fn max_targets(&self) -> usize {
        self.max_targets
    }

    /// Targets for an intra-DC round ranked by affinity to `local`
    pub fn select(&self, view: &ClusterView, local: &NodeState, seeds: &[SeedEntry]) -> Vec<GossipTarget> {
        self.select_with_rng(view, local, seeds, &mut rand::thread_rng())
    }

    pub fn select_with_rng<R: Rng + ?Sized>(
        &self,
        view: &ClusterView,
        local: &NodeState,
        seeds: &[SeedEntry],
        rng: &mut R,
    ) -> Vec<GossipTarget> {
        let local_dc = local.datacenter();
        let local_region = local.region();

        // Tiers: same region and DC, same region, same DC, everyone else
        let mut tiers: [Vec<GossipTarget>; 4] = Default::default();
        for candidate in candidates(view, local, seeds) {
            let same_dc = candidate.datacenter.as_deref() == Some(local_dc);
            let same_region = local_region.is_some() && candidate.region.as_deref() == local_region;
            let tier = match (same_region, same_dc) {
                (true, true) => 0,
                (true, false) => 1,
                (false, true) => 2,
                (false, false) => 3,
            };
            tiers[tier].push(candidate.target);
        }

        let mut selected = Vec::with_capacity(self.max_targets);
        for tier in tiers.iter_mut() {
            tier.shuffle(rng);
            selected.extend(tier.drain(..));
            if selected.len() >= self.max_targets {
                break;
            }
        }
        selected.truncate(self.max_targets);
        selected
    }

    /// Members in other datacenters, limited by the cross-DC fan-out
    pub fn select_cross_dc(&self, view: &ClusterView, local: &NodeState) -> Vec<GossipTarget> {
        if self.max_cross_dc_targets == 0 {
            return Vec::new();
        }
        let local_dc = local.datacenter();
        let mut remote: Vec<GossipTarget> = view
            .members()
            .filter(|m| m.id != local.id && is_gossipable(m) && m.datacenter() != local_dc)
            .map(|m| GossipTarget {
                address: m.address.clone(),
                node_id: Some(m.id.clone()),
            })
            .collect();
        remote.shuffle(&mut rand::thread_rng());
        remote.truncate(self.max_cross_dc_targets);
        remote
    }
}

/// Members worth talking to: anything not on its way out
fn is_gossipable(member: &NodeState) -> bool {
    !matches!(
        member.status,
        MemberStatus::Down | MemberStatus::Exiting | MemberStatus::Removed
    ) && !member.address.is_empty()
}

fn candidates(view: &ClusterView, local: &NodeState, seeds: &[SeedEntry]) -> Vec<Candidate> {
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(local.address.clone());

    let mut out = Vec::new();
    for member in view.members().filter(|m| m.id != local.id && is_gossipable(m)) {
        if !seen.insert(member.address.clone()) {
            continue;
        }
        out.push(Candidate {
            target: GossipTarget {
                address: member.address.clone(),
                node_id: Some(member.id.clone()),
            },
            datacenter: Some(member.datacenter().to_string()),
            region: member.region().map(String::from),
        });
    }
    for seed in seeds {
        if !seen.insert(seed.address.clone()) {
            continue;
        }
        out.push(Candidate {
            target: GossipTarget {
                address: seed.address.clone(),
                node_id: None,
            },
            datacenter: seed.datacenter.clone(),
            region: None,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node_state::{LABEL_DATACENTER, LABEL_REGION};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn node(id: &str, region: &str, dc: &str) -> NodeState {
        let mut s = NodeState::new(id, "test", format!("{}:7000", id), 0);
        s.status = MemberStatus::Up;
        s.labels.insert(LABEL_REGION.into(), region.into());
        s.labels.insert(LABEL_DATACENTER.into(), dc.into());
        s
    }

    fn view(members: &[NodeState]) -> ClusterView {
        ClusterView::from_parts("v".into(), 0, 0, members.iter().cloned(), Default::default(), 1, 0)
    }

    #[test]
    fn test_tiers_ordered_by_affinity() {
        let local = node("self", "eu", "eu-1");
        let v = view(&[
            local.clone(),
            node("other", "us", "us-1"),
            node("same-dc-only", "ap", "eu-1"),
            node("same-region", "eu", "eu-2"),
            node("same-both", "eu", "eu-1"),
        ]);
        let selector = GossipTargetSelector::new(10, 0);
        let mut rng = StdRng::seed_from_u64(7);

        let picked: Vec<String> = selector
            .select_with_rng(&v, &local, &[], &mut rng)
            .into_iter()
            .map(|t| t.address)
            .collect();
        assert_eq!(
            picked,
            vec![
                "same-both:7000",
                "same-region:7000",
                "same-dc-only:7000",
                "other:7000"
            ]
        );
    }

    #[test]
    fn test_truncates_to_fan_out() {
        let local = node("self", "eu", "eu-1");
        let mut members = vec![local.clone()];
        for i in 0..10 {
            members.push(node(&format!("n{}", i), "eu", "eu-1"));
        }
        let selector = GossipTargetSelector::new(3, 0);
        assert_eq!(selector.select(&view(&members), &local, &[]).len(), 3);
    }

    #[test]
    fn test_zero_fan_out_uses_default_bound() {
        let selector = GossipTargetSelector::new(0, 0);
        assert_eq!(selector.max_targets(), DEFAULT_MAX_TARGETS_PER_TICK);
    }

    #[test]
    fn test_seeds_included_once_and_self_excluded() {
        let local = node("self", "eu", "eu-1");
        let peer = node("peer", "eu", "eu-1");
        let seeds = vec![
            SeedEntry { address: "self:7000".into(), datacenter: None },
            SeedEntry { address: "peer:7000".into(), datacenter: None },
            SeedEntry { address: "seed:7000".into(), datacenter: Some("eu-1".into()) },
        ];
        let targets = GossipTargetSelector::new(10, 0).select(&view(&[local.clone(), peer]), &local, &seeds);
        let mut addresses: Vec<String> = targets.into_iter().map(|t| t.address).collect();
        addresses.sort();
        assert_eq!(addresses, vec!["peer:7000", "seed:7000"]);
    }

    #[test]
    fn test_excludes_departing_members() {
        let local = node("self", "eu", "eu-1");
        let mut gone = node("gone", "eu", "eu-1");
        gone.status = MemberStatus::Exiting;
        let targets = GossipTargetSelector::new(10, 0).select(&view(&[local.clone(), gone]), &local, &[]);
        assert!(targets.is_empty());
    }

    #[test]
    fn test_cross_dc_only_other_datacenters() {
        let local = node("self", "eu", "eu-1");
        let v = view(&[
            local.clone(),
            node("near", "eu", "eu-1"),
            node("far1", "us", "us-1"),
            node("far2", "us", "us-2"),
            node("far3", "ap", "ap-1"),
        ]);
        let selector = GossipTargetSelector::new(10, 2);
        let targets = selector.select_cross_dc(&v, &local);
        assert_eq!(targets.len(), 2);
        assert!(targets.iter().all(|t| t.address.starts_with("far")));

        assert!(GossipTargetSelector::new(10, 0).select_cross_dc(&v, &local).is_empty());
    }
}
