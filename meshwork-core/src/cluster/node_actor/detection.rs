//! Failure detection and quorum recovery

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{NodeActor, NodeCommand, Phase, NODE_PATH};
use crate::cluster::messages::ClusterMessage;
use crate::cluster::node_state::MemberStatus;
use crate::cluster::view::ClusterView;
use crate::runtime::ActorPath;

impl NodeActor {
    pub(super) async fn detect_failures(&mut self) {
        if self.phase != Phase::Up {
            return;
        }
        let now = self.now();
        self.local.last_seen = now;
        self.view.touch(&self.local.id, now);

        let detection = self
            .detector
            .detect(&self.view, &self.local.id, self.local.datacenter(), now);

        if !detection.is_empty() {
            let before = self.view.clone();

            for id in &detection.suspect {
                if self.view.set_status(id, MemberStatus::Suspect) {
                    warn!(member = %id, "member suspected after missed heartbeats");
                }
            }
            let mut removed = 0;
            for id in &detection.remove {
                if let Some(member) = self.view.remove_member(id) {
                    warn!(member = %id, address = %member.address, "member removed after failure timeout");
                    removed += 1;
                }
            }
            self.metrics.members_removed(removed);

            self.record_local_change(now);
            self.broadcast().await;
            self.after_change(&before);
        }

        if !self.in_quorum() {
            self.start_recovery();
        }
    }

    /// Ask a few seeds for their view in the background
    fn start_recovery(&mut self) {
        if self.recovery_in_flight {
            return;
        }
        let seeds: Vec<String> = self
            .deps
            .seeds
            .all_addresses()
            .into_iter()
            .filter(|addr| *addr != self.local.address)
            .take(self.config.failure.recovery_seed_count)
            .collect();
        if seeds.is_empty() {
            debug!("quorum lost and no seeds to recover from");
            return;
        }

        info!(seeds = seeds.len(), "quorum lost, probing seeds for their view");
        self.recovery_in_flight = true;

        let transport = Arc::clone(&self.deps.transport);
        let commands = self.commands.clone();
        let self_path = self.self_path.clone();
        let timeout = self.request_timeout;

        tokio::spawn(async move {
            let probes = seeds.into_iter().map(|seed| {
                let transport = Arc::clone(&transport);
                let self_path = self_path.clone();
                async move {
                    let target = ActorPath::new(seed.clone(), NODE_PATH);
                    match transport
                        .ask(&target, Some(self_path), ClusterMessage::GetViewRequest, timeout)
                        .await
                    {
                        Ok(ClusterMessage::GetViewResponse { view, .. }) => Some(view),
                        Ok(other) => {
                            debug!(seed = %seed, message = other.name(), "unexpected recovery reply");
                            None
                        }
                        Err(e) => {
                            debug!(seed = %seed, error = %e, "recovery probe failed");
                            None
                        }
                    }
                }
            });
            let views: Vec<ClusterView> = futures::future::join_all(probes)
                .await
                .into_iter()
                .flatten()
                .collect();
            let _ = commands.send(NodeCommand::RecoveredViews(views));
        });
    }

    pub(super) async fn on_recovered_views(&mut self, views: Vec<ClusterView>) {
        self.recovery_in_flight = false;
        if self.phase != Phase::Up || views.is_empty() {
            return;
        }

        let now = self.now();
        let before = self.view.clone();
        let collected = views.len();
        let mut changed = false;
        for mut view in views {
            changed |= self.strip_departed(&mut view) > 0;
            changed |= self.view.merge_from(&view, &self.merge_options, now);
        }
        self.reassert_local(now);

        if changed {
            info!(
                views = collected,
                in_quorum = self.in_quorum(),
                "merged views from seeds during quorum recovery"
            );
            self.broadcast().await;
            self.after_change(&before);
        }
    }
}
