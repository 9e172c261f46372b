//! Membership events and the bus they are published on

use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::node_state::NodeState;
use super::quorum::DatacenterHealth;
use super::view::ClusterView;

/// Observable membership transitions
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterEvent {
    MembersChanged {
        members: Vec<NodeState>,
        added: Vec<NodeState>,
        removed: Vec<NodeState>,
    },
    ViewChanged {
        view: ClusterView,
    },
    QuorumLost,
    QuorumReached,
    LeaderChanged {
        leader_address: Option<String>,
        i_am_leader: bool,
        in_quorum: bool,
    },
    DatacenterHealthChanged {
        datacenter: String,
        healthy: usize,
        total: usize,
    },
    LeaveCompleted {
        node_id: String,
    },
}

impl ClusterEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterEvent::MembersChanged { .. } => "members_changed",
            ClusterEvent::ViewChanged { .. } => "view_changed",
            ClusterEvent::QuorumLost => "quorum_lost",
            ClusterEvent::QuorumReached => "quorum_reached",
            ClusterEvent::LeaderChanged { .. } => "leader_changed",
            ClusterEvent::DatacenterHealthChanged { .. } => "datacenter_health_changed",
            ClusterEvent::LeaveCompleted { .. } => "leave_completed",
        }
    }
}

/// Publish/subscribe contract for cluster events
pub trait EventBus: Send + Sync {
    fn publish(&self, event: ClusterEvent);

    fn subscribe(&self) -> broadcast::Receiver<ClusterEvent>;
}

/// [`EventBus`] over a tokio broadcast channel. Slow subscribers lag and
/// skip events rather than block the publisher.
#[derive(Debug, Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<ClusterEvent>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus for BroadcastEventBus {
    fn publish(&self, event: ClusterEvent) {
        debug!(kind = event.kind(), "publishing cluster event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.sender.subscribe()
    }
}

/// Remembers the last published quorum, leader and datacenter health so each
/// transition is published exactly once
#[derive(Debug, Default)]
pub struct ClusterEventPublisher {
    in_quorum: Option<bool>,
    leader: Option<Option<String>>,
    datacenters: BTreeMap<String, DatacenterHealth>,
}

impl ClusterEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Membership diff between two views, or None when the member set and
    /// every member state are identical
    pub fn members_changed(before: &ClusterView, after: &ClusterView) -> Option<ClusterEvent> {
        let added: Vec<NodeState> = after
            .members()
            .filter(|m| !before.contains(&m.id))
            .cloned()
            .collect();
        let removed: Vec<NodeState> = before
            .members()
            .filter(|m| !after.contains(&m.id))
            .cloned()
            .collect();
        let status_changed = after.members().any(|m| {
            before
                .member(&m.id)
                .is_some_and(|old| old.status != m.status || old.generation != m.generation)
        });

        if added.is_empty() && removed.is_empty() && !status_changed {
            return None;
        }
        Some(ClusterEvent::MembersChanged {
            members: after.members().cloned().collect(),
            added,
            removed,
        })
    }

    /// Quorum transition, if any
    pub fn quorum(&mut self, in_quorum: bool) -> Option<ClusterEvent> {
        let previous = self.in_quorum.replace(in_quorum);
        match (previous, in_quorum) {
            (Some(true), false) => {
                info!("cluster quorum lost");
                Some(ClusterEvent::QuorumLost)
            }
            (Some(false), true) | (None, true) => {
                info!("cluster quorum reached");
                Some(ClusterEvent::QuorumReached)
            }
            (None, false) => Some(ClusterEvent::QuorumLost),
            _ => None,
        }
    }

    /// Leader transition, if the address or quorum state changed
    pub fn leader(
        &mut self,
        leader_address: Option<String>,
        self_address: &str,
        in_quorum: bool,
        quorum_changed: bool,
    ) -> Option<ClusterEvent> {
        let unchanged = self.leader.as_ref() == Some(&leader_address);
        if unchanged && !quorum_changed {
            return None;
        }
        if !unchanged {
            info!(leader = ?leader_address, "cluster leader changed");
        }
        self.leader = Some(leader_address.clone());
        let i_am_leader = leader_address.as_deref() == Some(self_address);
        Some(ClusterEvent::LeaderChanged {
            leader_address,
            i_am_leader,
            in_quorum,
        })
    }

    /// Per-datacenter health transitions, including datacenters that vanished
    pub fn datacenters(&mut self, current: BTreeMap<String, DatacenterHealth>) -> Vec<ClusterEvent> {
        let mut events = Vec::new();

        for (dc, health) in &current {
            if self.datacenters.get(dc) != Some(health) {
                events.push(ClusterEvent::DatacenterHealthChanged {
                    datacenter: dc.clone(),
                    healthy: health.healthy,
                    total: health.total,
                });
            }
        }
        for dc in self.datacenters.keys() {
            if !current.contains_key(dc) {
                events.push(ClusterEvent::DatacenterHealthChanged {
                    datacenter: dc.clone(),
                    healthy: 0,
                    total: 0,
                });
            }
        }

        self.datacenters = current;
        events
    }

    pub fn last_in_quorum(&self) -> Option<bool> {
        self.in_quorum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node_state::MemberStatus;

    fn view_with(ids: &[&str]) -> ClusterView {
        let mut view = ClusterView::new(0, 0);
        for (i, id) in ids.iter().enumerate() {
            let mut state = NodeState::new(*id, "c", format!("10.0.0.{}:7000", i + 1), 0);
            state.status = MemberStatus::Up;
            view.add_member(&state);
        }
        view
    }

    #[test]
    fn test_members_changed_diff() {
        let before = view_with(&["a", "b"]);
        let after = view_with(&["a", "c"]);

        match ClusterEventPublisher::members_changed(&before, &after) {
            Some(ClusterEvent::MembersChanged { added, removed, members }) => {
                assert_eq!(added.len(), 1);
                assert_eq!(added[0].id, "c");
                assert_eq!(removed[0].id, "b");
                assert_eq!(members.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(ClusterEventPublisher::members_changed(&before, &before).is_none());
    }

    #[test]
    fn test_quorum_transitions_published_once() {
        let mut publisher = ClusterEventPublisher::new();
        assert_eq!(publisher.quorum(true), Some(ClusterEvent::QuorumReached));
        assert_eq!(publisher.quorum(true), None);
        assert_eq!(publisher.quorum(false), Some(ClusterEvent::QuorumLost));
        assert_eq!(publisher.quorum(false), None);
        assert_eq!(publisher.quorum(true), Some(ClusterEvent::QuorumReached));
    }

    #[test]
    fn test_leader_change_reports_self() {
        let mut publisher = ClusterEventPublisher::new();
        let event = publisher.leader(Some("a:1".into()), "a:1", true, false);
        assert_eq!(
            event,
            Some(ClusterEvent::LeaderChanged {
                leader_address: Some("a:1".into()),
                i_am_leader: true,
                in_quorum: true,
            })
        );
        assert!(publisher.leader(Some("a:1".into()), "a:1", true, false).is_none());
        assert!(publisher.leader(Some("a:1".into()), "a:1", false, true).is_some());
    }

    #[test]
    fn test_datacenter_health_changes() {
        let mut publisher = ClusterEventPublisher::new();
        let mut current = BTreeMap::new();
        current.insert("dc1".to_string(), DatacenterHealth { healthy: 2, total: 2 });
        assert_eq!(publisher.datacenters(current.clone()).len(), 1);
        assert!(publisher.datacenters(current).is_empty());

        let events = publisher.datacenters(BTreeMap::new());
        assert_eq!(
            events,
            vec![ClusterEvent::DatacenterHealthChanged {
                datacenter: "dc1".into(),
                healthy: 0,
                total: 0,
            }]
        );
    }

    #[tokio::test]
    async fn test_broadcast_bus_delivers() {
        let bus = BroadcastEventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(ClusterEvent::QuorumReached);
        assert_eq!(rx.recv().await.unwrap(), ClusterEvent::QuorumReached);
    }
}
