//! Joining an existing cluster and admitting joiners

use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{NodeActor, NodeCommand, Phase, Tick, NODE_PATH};
use crate::cluster::join_auth::{join_token, verify_join_token};
use crate::cluster::messages::ClusterMessage;
use crate::cluster::node_state::{MemberStatus, NodeState, MAX_ADDRESS_LEN};
use crate::cluster::view::ClusterView;
use crate::error::{MeshworkError, MeshworkResult};
use crate::runtime::ActorPath;

impl NodeActor {
    /// Try every seed once in the background; the outcome comes back as a
    /// [`NodeCommand::JoinOutcome`]
    pub(super) fn begin_join(&mut self, attempt: u32) {
        self.phase = Phase::Joining {
            attempt,
            in_flight: true,
        };

        let token = match self.config.security.join_secret.as_deref() {
            Some(secret) if !secret.is_empty() => join_token(
                secret,
                &self.config.cluster_name,
                &self.local.id,
                &self.local.address,
            )
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to compute join token");
                String::new()
            }),
            _ => String::new(),
        };

        let transport = Arc::clone(&self.deps.transport);
        let seeds = Arc::clone(&self.deps.seeds);
        let commands = self.commands.clone();
        let self_path = self.self_path.clone();
        let state = self.local.clone();
        let timeout = self.request_timeout;

        tokio::spawn(async move {
            seeds.refresh().await;
            let mut last_error = None;

            for seed in seeds.seeds_for_join(state.datacenter()) {
                if seed == state.address {
                    continue;
                }
                let target = ActorPath::new(seed.clone(), NODE_PATH);
                let request = ClusterMessage::JoinRequest {
                    state: state.clone(),
                    auth_token: token.clone(),
                };
                let result = transport
                    .ask(&target, Some(self_path.clone()), request, timeout)
                    .await
                    .and_then(ClusterMessage::into_result);

                match result {
                    Ok(ClusterMessage::JoinResponse { view }) => {
                        debug!(seed = %seed, attempt, "join accepted");
                        let _ = commands.send(NodeCommand::JoinOutcome {
                            attempt,
                            result: Ok(view),
                        });
                        return;
                    }
                    Ok(other) => {
                        last_error = Some(MeshworkError::unexpected_response(
                            "join",
                            format!("seed {} answered with {}", seed, other.name()),
                        ));
                    }
                    Err(e) => {
                        debug!(seed = %seed, attempt, error = %e, "join attempt failed");
                        last_error = Some(e);
                    }
                }
            }

            let error = last_error
                .unwrap_or_else(|| MeshworkError::join_not_allowed("no reachable seed configured"));
            let _ = commands.send(NodeCommand::JoinOutcome {
                attempt,
                result: Err(error),
            });
        });
    }

    pub(super) async fn on_join_outcome(&mut self, attempt: u32, result: MeshworkResult<ClusterView>) {
        match self.phase {
            Phase::Joining { attempt: current, .. } if current == attempt => {}
            _ => {
                debug!(attempt, "ignoring stale join outcome");
                return;
            }
        }

        let outcome = match result {
            Ok(view) => self.complete_join(view).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            let delay = self.backoff.delay(attempt);
            warn!(
                node_id = %self.local.id,
                attempt,
                retry_in = ?delay,
                error = %e,
                "failed to join cluster"
            );
            self.phase = Phase::Joining {
                attempt: attempt.saturating_add(1),
                in_flight: false,
            };
            self.deps.scheduler.schedule_once(
                &self.schedule_key(Tick::JoinRetry),
                delay,
                self.tick_task(Tick::JoinRetry),
            );
        }
    }

    pub(super) fn retry_join(&mut self) {
        if let Phase::Joining {
            attempt,
            in_flight: false,
        } = self.phase
        {
            self.begin_join(attempt);
        }
    }

    /// Adopt the seed's view and become Up
    async fn complete_join(&mut self, mut view: ClusterView) -> MeshworkResult<()> {
        let now = self.now();
        let before = self.view.clone();

        // A prior incarnation of this id that differs from what we sent must
        // be superseded, or its stale state could win merges later
        if let Some(prior) = view.member(&self.local.id) {
            let stale_twin = prior.generation > self.local.generation
                || (prior.generation == self.local.generation
                    && (prior.logical_clock, prior.timestamp)
                        != (self.local.logical_clock, self.local.timestamp));
            if stale_twin {
                info!(
                    node_id = %self.local.id,
                    prior_generation = prior.generation,
                    "found prior incarnation in cluster view, bumping generation"
                );
                self.local.supersede(prior, now)?;
            }
        }

        self.strip_departed(&mut view);
        self.view.merge_from(&view, &self.merge_options, now);
        self.set_local_status(MemberStatus::Up, now);
        self.record_local_change(now);
        self.phase = Phase::Up;
        self.schedule_periodic();

        info!(
            node_id = %self.local.id,
            members = self.view.len(),
            generation = self.local.generation,
            "joined cluster"
        );

        self.broadcast().await;
        self.after_change(&before);
        Ok(())
    }

    /// Admission control for an inbound join, then admit. The joiner gets its
    /// response before the new view is broadcast.
    pub(super) async fn on_join_request(
        &mut self,
        joiner: NodeState,
        token: &str,
        reply: Option<oneshot::Sender<ClusterMessage>>,
        sender: Option<&ActorPath>,
    ) {
        if let Err(e) = self.check_admission(&joiner, token) {
            warn!(
                joiner = %joiner.id,
                address = %joiner.address,
                error = %e,
                "rejected join request"
            );
            self.metrics.join_rejected(reject_reason(&e));
            self.respond(reply, sender, e.into()).await;
            return;
        }

        let now = self.now();
        let before = self.view.clone();

        let mut member = joiner;
        member.status = MemberStatus::Up;
        member.last_seen = now;
        if !self.view.add_member(&member) {
            debug!(joiner = %member.id, "view already holds a newer state for joiner");
        }
        self.record_local_change(now);
        info!(joiner = %member.id, address = %member.address, "admitted node to cluster");

        let response = ClusterMessage::JoinResponse {
            view: self.view.snapshot(),
        };
        self.respond(reply, sender, response).await;
        self.broadcast_except(Some(&member.id)).await;
        self.after_change(&before);
    }

    fn check_admission(&self, joiner: &NodeState, token: &str) -> MeshworkResult<()> {
        if joiner.cluster_name != self.config.cluster_name {
            return Err(MeshworkError::NameMismatch {
                expected: self.config.cluster_name.clone(),
                actual: joiner.cluster_name.clone(),
            });
        }

        if joiner.status != MemberStatus::Joining {
            return Err(MeshworkError::NodeStatusMismatch {
                node_id: joiner.id.clone(),
                expected: MemberStatus::Joining.to_string(),
                actual: joiner.status.to_string(),
            });
        }

        if joiner.id.is_empty() || joiner.address.is_empty() || joiner.address.len() > MAX_ADDRESS_LEN {
            return Err(MeshworkError::join_not_allowed("joiner identity is malformed"));
        }

        let secret = self.config.security.join_secret.as_deref().unwrap_or("");
        if !verify_join_token(
            secret,
            &self.config.cluster_name,
            &joiner.id,
            &joiner.address,
            token,
        ) {
            return Err(MeshworkError::JoinAuthFailed {
                node_id: joiner.id.clone(),
            });
        }

        if !self.address_allowlist.allows(&joiner.address) {
            return Err(MeshworkError::join_not_allowed(format!(
                "address {} is not in the allow-list",
                joiner.address
            )));
        }

        if !self.dc_allowlist.allows(joiner.datacenter()) {
            return Err(MeshworkError::join_not_allowed(format!(
                "datacenter {} is not in the allow-list",
                joiner.datacenter()
            )));
        }

        if !self.join_limiter.allow(&joiner.address) {
            return Err(MeshworkError::JoinRateLimited {
                address: joiner.address.clone(),
            });
        }

        if !self.in_quorum() {
            let tally = self.quorum.tally(&self.view);
            return Err(MeshworkError::NotInQuorum {
                healthy: tally.healthy,
                required: tally.required,
            });
        }

        Ok(())
    }
}

fn reject_reason(error: &MeshworkError) -> &'static str {
    match error {
        MeshworkError::NameMismatch { .. } => "name_mismatch",
        MeshworkError::NodeStatusMismatch { .. } => "status_mismatch",
        MeshworkError::JoinAuthFailed { .. } => "auth_failed",
        MeshworkError::JoinNotAllowed { .. } => "not_allowed",
        MeshworkError::JoinRateLimited { .. } => "rate_limited",
        MeshworkError::NotInQuorum { .. } => "not_in_quorum",
        _ => "other",
    }
}
