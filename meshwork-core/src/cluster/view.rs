//! Cluster view: the membership map and its merge algebra

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use super::node_state::{MemberStatus, NodeState};
use super::version_vector::{CausalOrder, VersionVector};
use crate::error::{MeshworkError, MeshworkResult};

/// Wire protocol version carried by every view
pub const CLUSTER_PROTOCOL_VERSION: u16 = 1;

/// How epoch and timestamp are reconciled when two views are concurrent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrentMergeStrategy {
    /// Adopt the larger epoch and timestamp
    #[default]
    TakeMax,
    /// Keep local epoch and timestamp
    PreferLocal,
    /// Adopt the remote epoch and timestamp when larger
    PreferRemote,
}

impl FromStr for ConcurrentMergeStrategy {
    type Err = MeshworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "take_max" => Ok(Self::TakeMax),
            "prefer_local" => Ok(Self::PreferLocal),
            "prefer_remote" => Ok(Self::PreferRemote),
            other => Err(MeshworkError::configuration(
                "membership.concurrent_merge",
                format!("unknown strategy '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MergeOptions {
    /// Skip epoch/timestamp adoption when the remote view timestamp is
    /// further than this from `now`
    pub max_clock_skew: Option<Duration>,
    pub concurrent: ConcurrentMergeStrategy,
}

/// A node's picture of the cluster.
///
/// Counts and quorum size are derived from `members` and refreshed on every
/// mutation, so they can only be read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterView {
    pub view_id: String,
    pub epoch: u64,
    pub timestamp: i64,
    members: BTreeMap<String, NodeState>,
    healthy_count: usize,
    unhealthy_count: usize,
    quorum_size: usize,
    version_vector: VersionVector,
    pub protocol_version: u16,
    /// Bound applied when pruning the version vector, zero disables pruning
    pub max_vv_entries: usize,
}

impl ClusterView {
    pub fn new(now: i64, max_vv_entries: usize) -> Self {
        Self {
            view_id: uuid::Uuid::new_v4().to_string(),
            epoch: 0,
            timestamp: now,
            members: BTreeMap::new(),
            healthy_count: 0,
            unhealthy_count: 0,
            quorum_size: 0,
            version_vector: VersionVector::new(),
            protocol_version: CLUSTER_PROTOCOL_VERSION,
            max_vv_entries,
        }
    }

    /// Rebuild a view from decoded parts; derived counts are recomputed
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        view_id: String,
        epoch: u64,
        timestamp: i64,
        members: impl IntoIterator<Item = NodeState>,
        version_vector: VersionVector,
        protocol_version: u16,
        max_vv_entries: usize,
    ) -> Self {
        let mut view = Self {
            view_id,
            epoch,
            timestamp,
            members: members.into_iter().map(|m| (m.id.clone(), m)).collect(),
            healthy_count: 0,
            unhealthy_count: 0,
            quorum_size: 0,
            version_vector,
            protocol_version,
            max_vv_entries,
        };
        view.recompute_counts();
        view
    }

    /// Insert `state` unless the existing entry is at least as new.
    /// Returns whether the view changed.
    pub fn add_member(&mut self, state: &NodeState) -> bool {
        if let Some(existing) = self.members.get(&state.id) {
            if !state.is_newer_than(existing) {
                return false;
            }
        }
        self.members.insert(state.id.clone(), state.clone());
        self.recompute_counts();
        true
    }

    pub fn remove_member(&mut self, id: &str) -> Option<NodeState> {
        let removed = self.members.remove(id);
        if removed.is_some() {
            self.recompute_counts();
        }
        removed
    }

    /// Change a member's status without touching its incarnation. The change
    /// stays local until the owner publishes a newer state.
    pub fn set_status(&mut self, id: &str, status: MemberStatus) -> bool {
        match self.members.get_mut(id) {
            Some(member) if member.status != status => {
                member.status = status;
                self.recompute_counts();
                true
            }
            _ => false,
        }
    }

    /// Refresh a member's last-seen time
    pub fn touch(&mut self, id: &str, now: i64) {
        if let Some(member) = self.members.get_mut(id) {
            member.last_seen = member.last_seen.max(now);
        }
    }

    /// Merge `other` into this view. Returns whether anything changed.
    pub fn merge_from(&mut self, other: &ClusterView, options: &MergeOptions, now: i64) -> bool {
        if other.members.is_empty() {
            return false;
        }

        let order = self.version_vector.compare(&other.version_vector);
        let mut changed = false;

        for (id, theirs) in &other.members {
            match self.members.get_mut(id) {
                None => {
                    self.members.insert(id.clone(), theirs.clone());
                    changed = true;
                }
                Some(ours) if theirs.is_newer_than(ours) => {
                    let last_seen = ours.last_seen.max(theirs.last_seen);
                    *ours = theirs.clone();
                    ours.last_seen = last_seen;
                    changed = true;
                }
                Some(ours) => {
                    // Same incarnation: only carry the heartbeat forward
                    if ours.generation == theirs.generation
                        && ours.logical_clock == theirs.logical_clock
                    {
                        ours.last_seen = ours.last_seen.max(theirs.last_seen);
                    }
                }
            }
        }

        let merged = self.version_vector.merge(&other.version_vector);
        if merged != self.version_vector {
            self.version_vector = merged;
            changed = true;
        }
        self.recompute_counts();

        let skewed = options.max_clock_skew.is_some_and(|max| {
            let diff = now.saturating_sub(other.timestamp).unsigned_abs();
            diff > max.as_nanos().min(u64::MAX as u128) as u64
        });
        let adopt = !skewed
            && !(order == CausalOrder::Concurrent
                && options.concurrent == ConcurrentMergeStrategy::PreferLocal);
        if adopt {
            if other.epoch > self.epoch {
                self.epoch = other.epoch;
                changed = true;
            }
            if other.timestamp > self.timestamp {
                self.timestamp = other.timestamp;
                changed = true;
            }
        }

        if other.protocol_version > self.protocol_version {
            self.protocol_version = other.protocol_version;
            changed = true;
        }

        changed
    }

    /// Bump the local component of the version vector
    pub fn increment_version(&mut self, node_id: &str) -> MeshworkResult<()> {
        self.version_vector = self.version_vector.increment(node_id)?;
        Ok(())
    }

    /// Record a local membership change: new epoch, timestamp and vector entry
    pub fn record_local_change(&mut self, node_id: &str, now: i64) -> MeshworkResult<()> {
        self.increment_version(node_id)?;
        self.epoch = self.epoch.saturating_add(1);
        self.timestamp = self.timestamp.max(now);
        Ok(())
    }

    /// Deep copy safe to hand across the node boundary
    pub fn snapshot(&self) -> ClusterView {
        self.clone()
    }

    fn recompute_counts(&mut self) {
        self.healthy_count = self.members.values().filter(|m| m.status.is_healthy()).count();
        self.unhealthy_count = self.members.len() - self.healthy_count;
        self.quorum_size = quorum_size_for(self.healthy_count);
        if self.max_vv_entries > 0 {
            self.version_vector = self
                .version_vector
                .prune_with_max(self.members.keys().map(String::as_str), self.max_vv_entries);
        }
    }

    pub fn member(&self, id: &str) -> Option<&NodeState> {
        self.members.get(id)
    }

    pub fn member_by_address(&self, address: &str) -> Option<&NodeState> {
        self.members.values().find(|m| m.address == address)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains_key(id)
    }

    /// Members sorted by id
    pub fn members(&self) -> impl Iterator<Item = &NodeState> {
        self.members.values()
    }

    pub fn member_ids(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn healthy_count(&self) -> usize {
        self.healthy_count
    }

    pub fn unhealthy_count(&self) -> usize {
        self.unhealthy_count
    }

    pub fn quorum_size(&self) -> usize {
        self.quorum_size
    }

    pub fn version_vector(&self) -> &VersionVector {
        &self.version_vector
    }
}

/// Classic majority: `healthy / 2 + 1`, zero for an empty cluster
pub fn quorum_size_for(healthy: usize) -> usize {
    if healthy == 0 {
        0
    } else {
        healthy / 2 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn member(id: &str, address: &str, status: MemberStatus) -> NodeState {
        let mut s = NodeState::new(id, "test", address, 1_000);
        s.status = status;
        s
    }

    fn view_with(members: &[NodeState]) -> ClusterView {
        let mut view = ClusterView::new(1_000, 100);
        for m in members {
            view.add_member(m);
        }
        view
    }

    #[test_case(0, 0; "empty")]
    #[test_case(1, 1; "one")]
    #[test_case(2, 2; "two")]
    #[test_case(3, 2; "three")]
    #[test_case(4, 3; "four")]
    #[test_case(5, 3; "five")]
    fn test_quorum_size(healthy: usize, expected: usize) {
        assert_eq!(quorum_size_for(healthy), expected);
    }

    #[test]
    fn test_add_member_twice_is_noop() {
        let a = member("a", "10.0.0.1:1", MemberStatus::Up);
        let mut view = view_with(&[a.clone()]);
        let before = (view.len(), view.healthy_count(), view.quorum_size());

        assert!(!view.add_member(&a));
        assert_eq!((view.len(), view.healthy_count(), view.quorum_size()), before);
    }

    #[test]
    fn test_add_member_rejects_older_state() {
        let mut newer = member("a", "10.0.0.1:1", MemberStatus::Up);
        newer.logical_clock = 5;
        let mut older = newer.clone();
        older.logical_clock = 2;
        older.status = MemberStatus::Joining;

        let mut view = view_with(&[newer]);
        assert!(!view.add_member(&older));
        assert_eq!(view.member("a").unwrap().status, MemberStatus::Up);
    }

    #[test]
    fn test_suspect_is_unhealthy() {
        let view = view_with(&[
            member("a", "10.0.0.1:1", MemberStatus::Up),
            member("b", "10.0.0.2:1", MemberStatus::Up),
            member("c", "10.0.0.3:1", MemberStatus::Suspect),
        ]);
        assert_eq!(view.healthy_count(), 2);
        assert_eq!(view.unhealthy_count(), 1);
        assert_eq!(view.quorum_size(), 2);
    }

    #[test]
    fn test_remove_recomputes_and_prunes_vector() {
        let mut view = view_with(&[
            member("a", "10.0.0.1:1", MemberStatus::Up),
            member("b", "10.0.0.2:1", MemberStatus::Up),
        ]);
        view.increment_version("a").unwrap();
        view.increment_version("b").unwrap();

        view.remove_member("b");
        assert_eq!(view.healthy_count(), 1);
        assert_eq!(view.version_vector().get("b"), 0);
        assert_eq!(view.version_vector().get("a"), 1);
    }

    #[test]
    fn test_merge_adopts_newer_members_and_reports_change() {
        let mut local = view_with(&[member("a", "10.0.0.1:1", MemberStatus::Up)]);
        let mut remote = view_with(&[
            member("a", "10.0.0.1:1", MemberStatus::Up),
            member("b", "10.0.0.2:1", MemberStatus::Up),
        ]);
        remote.increment_version("b").unwrap();

        assert!(local.merge_from(&remote, &MergeOptions::default(), 1_000));
        assert_eq!(local.len(), 2);
        assert_eq!(local.version_vector().get("b"), 1);

        // Nothing new the second time round
        assert!(!local.merge_from(&remote, &MergeOptions::default(), 1_000));
    }

    #[test]
    fn test_merge_carries_heartbeat_without_change() {
        let a = member("a", "10.0.0.1:1", MemberStatus::Up);
        let mut local = view_with(&[a.clone()]);
        let mut remote = view_with(&[a]);
        remote.touch("a", 9_999);

        assert!(!local.merge_from(&remote, &MergeOptions::default(), 1_000));
        assert_eq!(local.member("a").unwrap().last_seen, 9_999);
    }

    #[test]
    fn test_prefer_local_keeps_epoch_for_concurrent_views() {
        let a = member("a", "10.0.0.1:1", MemberStatus::Up);
        let b = member("b", "10.0.0.2:1", MemberStatus::Up);
        let mut local = view_with(&[a.clone(), b.clone()]);
        local.increment_version("a").unwrap();
        let mut remote = view_with(&[a, b]);
        remote.increment_version("b").unwrap();
        remote.epoch = 7;

        let options = MergeOptions {
            max_clock_skew: None,
            concurrent: ConcurrentMergeStrategy::PreferLocal,
        };
        local.merge_from(&remote, &options, 1_000);
        assert_eq!(local.epoch, 0);

        let mut take_max = local.clone();
        take_max.merge_from(&remote, &MergeOptions::default(), 1_000);
        assert_eq!(take_max.epoch, 7);
    }

    #[test]
    fn test_clock_skew_blocks_epoch_adoption() {
        let a = member("a", "10.0.0.1:1", MemberStatus::Up);
        let mut local = view_with(&[a.clone()]);
        let mut remote = view_with(&[a]);
        remote.epoch = 3;
        remote.timestamp = 1_000 + Duration::from_secs(60).as_nanos() as i64;

        let options = MergeOptions {
            max_clock_skew: Some(Duration::from_secs(1)),
            concurrent: ConcurrentMergeStrategy::TakeMax,
        };
        local.merge_from(&remote, &options, 1_000);
        assert_eq!(local.epoch, 0);
    }

    #[test]
    fn test_snapshot_does_not_alias() {
        let mut view = view_with(&[member("a", "10.0.0.1:1", MemberStatus::Up)]);
        let snapshot = view.snapshot();
        view.set_status("a", MemberStatus::Suspect);
        assert_eq!(snapshot.member("a").unwrap().status, MemberStatus::Up);
        assert_eq!(snapshot.healthy_count(), 1);
    }
}
