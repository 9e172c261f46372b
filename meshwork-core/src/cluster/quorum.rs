//! Quorum policy and deterministic leader election

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use super::node_state::DEFAULT_DATACENTER;
use super::view::{quorum_size_for, ClusterView};
use crate::error::MeshworkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumStrategy {
    /// A majority of known members is healthy
    #[default]
    GlobalMajority,
    /// At least half (rounded up) of the known datacenters have a healthy member
    MajorityDatacenters,
    /// Every known datacenter has a healthy member
    AtLeastOnePerDatacenter,
}

impl FromStr for QuorumStrategy {
    type Err = MeshworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global_majority" => Ok(Self::GlobalMajority),
            "majority_datacenters" => Ok(Self::MajorityDatacenters),
            "at_least_one_per_datacenter" => Ok(Self::AtLeastOnePerDatacenter),
            other => Err(MeshworkError::configuration(
                "membership.quorum_strategy",
                format!("unknown strategy '{}'", other),
            )),
        }
    }
}

/// Healthy and total member counts of one datacenter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DatacenterHealth {
    pub healthy: usize,
    pub total: usize,
}

impl DatacenterHealth {
    pub fn is_healthy(&self) -> bool {
        self.healthy > 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct QuorumCalculator {
    strategy: QuorumStrategy,
    required_datacenters: Vec<String>,
}

impl QuorumCalculator {
    pub fn new(strategy: QuorumStrategy, required_datacenters: Vec<String>) -> Self {
        let required_datacenters = required_datacenters
            .into_iter()
            .map(|dc| if dc.is_empty() { DEFAULT_DATACENTER.to_string() } else { dc })
            .collect();
        Self {
            strategy,
            required_datacenters,
        }
    }

    pub fn strategy(&self) -> QuorumStrategy {
        self.strategy
    }

    pub fn satisfies(&self, view: &ClusterView) -> bool {
        if view.healthy_count() == 0 {
            return false;
        }

        let health = datacenter_health(view);
        self.tally_with(view, &health).is_met()
            && self
                .required_datacenters
                .iter()
                .all(|dc| health.get(dc).is_some_and(DatacenterHealth::is_healthy))
    }

    /// Healthy and required counts in the unit the strategy votes with:
    /// members for [`QuorumStrategy::GlobalMajority`], datacenters otherwise
    pub fn tally(&self, view: &ClusterView) -> QuorumTally {
        self.tally_with(view, &datacenter_health(view))
    }

    fn tally_with(&self, view: &ClusterView, health: &BTreeMap<String, DatacenterHealth>) -> QuorumTally {
        let participating = health.values().filter(|h| h.is_healthy()).count();
        match self.strategy {
            QuorumStrategy::GlobalMajority => QuorumTally {
                healthy: view.healthy_count(),
                required: quorum_size_for(view.len()),
            },
            QuorumStrategy::MajorityDatacenters => QuorumTally {
                healthy: participating,
                required: health.len().div_ceil(2),
            },
            QuorumStrategy::AtLeastOnePerDatacenter => QuorumTally {
                healthy: participating,
                required: health.len(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumTally {
    pub healthy: usize,
    pub required: usize,
}

impl QuorumTally {
    fn is_met(&self) -> bool {
        self.healthy >= self.required
    }
}

/// Per-datacenter health, keyed by datacenter label
pub fn datacenter_health(view: &ClusterView) -> BTreeMap<String, DatacenterHealth> {
    let mut health: BTreeMap<String, DatacenterHealth> = BTreeMap::new();
    for member in view.members() {
        let entry = health.entry(member.datacenter().to_string()).or_default();
        entry.total += 1;
        if member.status.is_healthy() {
            entry.healthy += 1;
        }
    }
    health
}

/// Smallest address among Up members. Any two nodes holding the same view
/// agree on the result.
pub fn leader_address(view: &ClusterView) -> Option<String> {
    view.members()
        .filter(|m| m.status.is_healthy() && !m.address.is_empty())
        .map(|m| m.address.as_str())
        .min()
        .map(String::from)
}
