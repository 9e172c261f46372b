//! Leave, administrative operations and local state updates

use std::collections::BTreeMap;
use tracing::{info, warn};

use super::{NodeActor, Phase};
use crate::cluster::events::ClusterEvent;
use crate::cluster::join_auth::verify_admin_token;
use crate::cluster::messages::ClusterMessage;
use crate::cluster::node_state::MemberStatus;
use crate::error::{MeshworkError, MeshworkResult};
use crate::runtime::ActorPath;

impl NodeActor {
    /// Graceful leave. Mid-join the node exits without telling anyone.
    pub(super) async fn on_leave(&mut self) -> ClusterMessage {
        let was_up = match self.phase {
            Phase::Exited => return ClusterMessage::LeaveAck,
            Phase::Up => true,
            Phase::Joining { .. } => false,
        };

        self.cancel_schedules();
        let now = self.now();
        let before = self.view.clone();

        if was_up {
            self.set_local_status(MemberStatus::Leaving, now);
            self.record_local_change(now);
            self.broadcast().await;
        }
        self.set_local_status(MemberStatus::Exiting, now);
        self.phase = Phase::Exited;

        info!(node_id = %self.local.id, announced = was_up, "left cluster");
        self.after_change(&before);
        self.deps.events.publish(ClusterEvent::LeaveCompleted {
            node_id: self.local.id.clone(),
        });
        ClusterMessage::LeaveAck
    }

    pub(super) async fn on_force_member_down(
        &mut self,
        node_id: &str,
        admin_token: &str,
    ) -> MeshworkResult<()> {
        self.authorize_admin("force_member_down", admin_token)?;

        if node_id == self.local.id {
            return Err(MeshworkError::NodeStatusMismatch {
                node_id: node_id.to_string(),
                expected: "remote member".to_string(),
                actual: "local node".to_string(),
            });
        }

        let now = self.now();
        let before = self.view.clone();
        if self.view.remove_member(node_id).is_some() {
            warn!(member = %node_id, "member forced down by administrator");
            self.metrics.members_removed(1);
            self.record_local_change(now);
            self.broadcast().await;
            self.after_change(&before);
        }
        Ok(())
    }

    pub(super) async fn on_trigger_broadcast(&mut self, admin_token: &str) -> MeshworkResult<()> {
        self.authorize_admin("trigger_view_broadcast", admin_token)?;
        if self.phase == Phase::Up {
            info!("view broadcast triggered by administrator");
            let now = self.now();
            self.local.last_seen = now;
            self.view.touch(&self.local.id, now);
            self.broadcast().await;
        }
        Ok(())
    }

    /// Publish new custom state for this node. Only accepted from the local
    /// address.
    pub(super) async fn on_update_state(
        &mut self,
        custom_state: BTreeMap<String, String>,
        sender: Option<&ActorPath>,
    ) -> MeshworkResult<()> {
        if sender.map(|s| s.address.as_str()) != Some(self.local.address.as_str()) {
            return Err(MeshworkError::admin_auth_failed("update_node_state"));
        }
        if self.phase == Phase::Exited {
            return Err(MeshworkError::NodeStatusMismatch {
                node_id: self.local.id.clone(),
                expected: MemberStatus::Up.to_string(),
                actual: self.local.status.to_string(),
            });
        }

        let now = self.now();
        let before = self.view.clone();
        self.local.custom_state = custom_state;
        let status = self.local.status;
        self.set_local_status(status, now);
        self.record_local_change(now);
        if self.phase == Phase::Up {
            self.broadcast().await;
        }
        self.after_change(&before);
        Ok(())
    }

    fn authorize_admin(&self, operation: &str, token: &str) -> MeshworkResult<()> {
        if verify_admin_token(self.config.security.admin_secret.as_deref(), token) {
            Ok(())
        } else {
            warn!(operation, "admin authentication failed");
            Err(MeshworkError::admin_auth_failed(operation))
        }
    }
}
