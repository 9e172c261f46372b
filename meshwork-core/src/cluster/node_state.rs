//! Member identity, status and incarnation ordering

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::MeshworkError;

/// Longest accepted network address
pub const MAX_ADDRESS_LEN: usize = 256;

pub const LABEL_DATACENTER: &str = "datacenter";
pub const LABEL_RACK: &str = "rack";
pub const LABEL_REGION: &str = "region";
pub const LABEL_ZONE: &str = "zone";

/// Datacenter name used for members without a datacenter label
pub const DEFAULT_DATACENTER: &str = "_default";

/// Membership status of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Joining,
    Up,
    Suspect,
    Unreachable,
    Down,
    Leaving,
    Exiting,
    Removed,
}

impl MemberStatus {
    /// Only Up members count towards quorum
    pub fn is_healthy(self) -> bool {
        matches!(self, MemberStatus::Up)
    }

    pub fn as_u8(self) -> u8 {
        match self {
            MemberStatus::Joining => 0,
            MemberStatus::Up => 1,
            MemberStatus::Suspect => 2,
            MemberStatus::Unreachable => 3,
            MemberStatus::Down => 4,
            MemberStatus::Leaving => 5,
            MemberStatus::Exiting => 6,
            MemberStatus::Removed => 7,
        }
    }
}

impl TryFrom<u8> for MemberStatus {
    type Error = MeshworkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => MemberStatus::Joining,
            1 => MemberStatus::Up,
            2 => MemberStatus::Suspect,
            3 => MemberStatus::Unreachable,
            4 => MemberStatus::Down,
            5 => MemberStatus::Leaving,
            6 => MemberStatus::Exiting,
            7 => MemberStatus::Removed,
            other => {
                return Err(MeshworkError::codec(
                    "member status",
                    format!("unknown status byte {}", other),
                ))
            }
        })
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemberStatus::Joining => "joining",
            MemberStatus::Up => "up",
            MemberStatus::Suspect => "suspect",
            MemberStatus::Unreachable => "unreachable",
            MemberStatus::Down => "down",
            MemberStatus::Leaving => "leaving",
            MemberStatus::Exiting => "exiting",
            MemberStatus::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// One member's identity and status as seen by the cluster.
///
/// `generation` distinguishes process incarnations of the same id,
/// `logical_clock` counts state changes within one incarnation and
/// `timestamp` (unix nanos) breaks remaining ties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    pub id: String,
    pub cluster_name: String,
    pub address: String,
    pub generation: u64,
    pub logical_clock: u64,
    pub timestamp: i64,
    pub status: MemberStatus,
    /// Unix nanos of the last direct or gossiped sign of life
    pub last_seen: i64,
    pub labels: BTreeMap<String, String>,
    /// Application state published by the node itself
    pub custom_state: BTreeMap<String, String>,
}

impl NodeState {
    /// Fresh state for a starting node: Joining, generation 1
    pub fn new(
        id: impl Into<String>,
        cluster_name: impl Into<String>,
        address: impl Into<String>,
        now: i64,
    ) -> Self {
        Self {
            id: id.into(),
            cluster_name: cluster_name.into(),
            address: address.into(),
            generation: 1,
            logical_clock: 1,
            timestamp: now,
            status: MemberStatus::Joining,
            last_seen: now,
            labels: BTreeMap::new(),
            custom_state: BTreeMap::new(),
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Total order over incarnations of the same node; never true in both
    /// directions.
    pub fn is_newer_than(&self, other: &NodeState) -> bool {
        if self.generation != other.generation {
            return self.generation > other.generation;
        }
        if self.id == other.id && self.logical_clock != other.logical_clock {
            return self.logical_clock > other.logical_clock;
        }
        self.timestamp > other.timestamp
    }

    /// Record a local state change: bumps the logical clock and timestamp
    pub fn advance(&mut self, now: i64) {
        self.logical_clock = self.logical_clock.saturating_add(1);
        self.timestamp = self.timestamp.max(now);
    }

    /// Move past a prior incarnation found in the cluster. Fails, leaving
    /// `self` untouched, when the prior's counters are already exhausted.
    pub fn supersede(&mut self, prior: &NodeState, now: i64) -> Result<(), MeshworkError> {
        let exhausted = || {
            MeshworkError::internal(format!(
                "incarnation of {} cannot move past generation {} clock {}",
                prior.id, prior.generation, prior.logical_clock
            ))
        };
        let generation = self
            .generation
            .max(prior.generation)
            .checked_add(1)
            .ok_or_else(exhausted)?;
        let logical_clock = self
            .logical_clock
            .max(prior.logical_clock)
            .checked_add(1)
            .ok_or_else(exhausted)?;
        self.generation = generation;
        self.logical_clock = logical_clock;
        self.timestamp = now.max(prior.timestamp);
        Ok(())
    }

    /// Whether this member announced a graceful departure
    pub fn is_departing(&self) -> bool {
        matches!(self.status, MemberStatus::Leaving | MemberStatus::Exiting)
    }

    pub fn datacenter(&self) -> &str {
        match self.labels.get(LABEL_DATACENTER) {
            Some(dc) if !dc.is_empty() => dc,
            _ => DEFAULT_DATACENTER,
        }
    }

    pub fn region(&self) -> Option<&str> {
        self.labels.get(LABEL_REGION).map(String::as_str).filter(|r| !r.is_empty())
    }

    pub fn rack(&self) -> Option<&str> {
        self.labels.get(LABEL_RACK).map(String::as_str)
    }

    pub fn zone(&self) -> Option<&str> {
        self.labels.get(LABEL_ZONE).map(String::as_str)
    }
}
