//! The per-node membership state machine
//!
//! A `NodeActor` owns the local [`ClusterView`] and the node's own
//! [`NodeState`]. It runs on a single tokio task and processes one input at a
//! time, either a [`NodeCommand`] (scheduler ticks, outcomes of background
//! joins and recovery probes) or an [`Envelope`] from the transport. All view
//! mutation happens on that task, so none of the state here is locked.
//!
//! ```text
//!   Joining ──join ok──▶ Up ◀──▶ Suspect ──▶ removed
//!      │                 │
//!      └──leave──┐       └──leave──▶ Leaving ──▶ Exiting
//!                ▼
//!             Exiting
//! ```

mod admin;
mod detection;
mod gossip;
mod join;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use super::allowlist::{AddressAllowlist, DatacenterAllowlist};
use super::backoff::Backoff;
use super::events::{ClusterEvent, ClusterEventPublisher, EventBus};
use super::failure_detector::FailureDetector;
use super::gossip_selector::GossipTargetSelector;
use super::messages::ClusterMessage;
use super::node_state::{MemberStatus, NodeState};
use super::quorum::{datacenter_health, leader_address, QuorumCalculator};
use super::rate_limit::{GossipRateLimiter, JoinRateLimiter};
use super::seeds::SeedsProvider;
use super::timeouts::clamp_request_timeout;
use super::view::{ClusterView, MergeOptions};
use crate::config::ClusterConfig;
use crate::error::{MeshworkError, MeshworkResult};
use crate::metrics::MetricsUpdater;
use crate::runtime::{ActorPath, Clock, Envelope, Mailbox, ScheduledTask, Scheduler, Transport};

pub use gossip::PeerVersionCache;

/// Path of the membership actor on every node
pub const NODE_PATH: &str = "/@cluster";

/// Path local clients use as sender when talking to their own node
pub const CLIENT_PATH: &str = "/@cluster-client";

/// Periodic work delivered by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Gossip,
    CrossDcGossip,
    FailureDetection,
    JoinRetry,
}

impl Tick {
    fn schedule_name(self) -> &'static str {
        match self {
            Tick::Gossip => "gossip",
            Tick::CrossDcGossip => "cross-dc-gossip",
            Tick::FailureDetection => "failure-detection",
            Tick::JoinRetry => "join-retry",
        }
    }
}

/// Inputs posted to the node's own queue
#[derive(Debug)]
pub enum NodeCommand {
    Tick(Tick),
    /// Result of one background join attempt across all seeds
    JoinOutcome {
        attempt: u32,
        result: MeshworkResult<ClusterView>,
    },
    /// Views collected from seeds after quorum was lost
    RecoveredViews(Vec<ClusterView>),
    /// Stop the actor; the sender is notified once it has stopped
    Shutdown(oneshot::Sender<()>),
}

/// Collaborators a node needs from its host
#[derive(Clone)]
pub struct NodeDeps {
    pub transport: Arc<dyn Transport>,
    pub scheduler: Arc<dyn Scheduler>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventBus>,
    pub seeds: Arc<SeedsProvider>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Joining { attempt: u32, in_flight: bool },
    Up,
    Exited,
}

pub struct NodeActor {
    config: ClusterConfig,
    deps: NodeDeps,
    self_path: ActorPath,
    commands: mpsc::UnboundedSender<NodeCommand>,

    phase: Phase,
    /// Authoritative copy of this node's own state
    local: NodeState,
    view: ClusterView,

    quorum: QuorumCalculator,
    detector: FailureDetector,
    selector: GossipTargetSelector,
    join_limiter: JoinRateLimiter,
    gossip_limiter: GossipRateLimiter,
    address_allowlist: AddressAllowlist,
    dc_allowlist: DatacenterAllowlist,
    backoff: Backoff,
    request_timeout: Duration,
    merge_options: MergeOptions,
    peer_versions: PeerVersionCache,
    recovery_in_flight: bool,

    publisher: ClusterEventPublisher,
    metrics: MetricsUpdater,
}

impl NodeActor {
    /// Build a node from validated configuration. `config.node.id` must be set.
    pub fn new(
        config: ClusterConfig,
        deps: NodeDeps,
        commands: mpsc::UnboundedSender<NodeCommand>,
    ) -> MeshworkResult<Self> {
        if config.node.id.is_empty() {
            return Err(MeshworkError::configuration("node.id", "must be set before start"));
        }

        let now = deps.clock.now_nanos();
        let local = NodeState::new(
            config.node.id.clone(),
            config.cluster_name.clone(),
            config.node.address.clone(),
            now,
        )
        .with_labels(config.node.labels.clone());

        let mut view = ClusterView::new(now, config.membership.max_version_vector_entries);
        view.add_member(&local);

        let self_path = ActorPath::new(config.node.address.clone(), NODE_PATH);

        Ok(Self {
            quorum: QuorumCalculator::new(
                config.membership.quorum_strategy,
                config.membership.required_datacenters.clone(),
            ),
            detector: FailureDetector::new(&config.failure),
            selector: GossipTargetSelector::new(
                config.discovery.max_targets_per_tick,
                config.discovery.max_cross_dc_targets_per_tick,
            ),
            join_limiter: JoinRateLimiter::from_config(&config.rate_limit),
            gossip_limiter: GossipRateLimiter::from_config(&config.rate_limit),
            address_allowlist: AddressAllowlist::parse(&config.security.allowed_addresses)?,
            dc_allowlist: DatacenterAllowlist::new(&config.security.allowed_datacenters),
            backoff: config.join.backoff(),
            request_timeout: clamp_request_timeout(config.join.request_timeout),
            merge_options: MergeOptions {
                max_clock_skew: config.membership.max_clock_skew,
                concurrent: config.membership.concurrent_merge,
            },
            peer_versions: PeerVersionCache::new(
                config.discovery.peer_version_ttl,
                config.discovery.max_targets_per_tick.max(1) * 8,
            ),
            recovery_in_flight: false,
            publisher: ClusterEventPublisher::new(),
            metrics: MetricsUpdater::new(config.node.id.clone()),
            phase: Phase::Joining {
                attempt: 0,
                in_flight: false,
            },
            local,
            view,
            self_path,
            commands,
            deps,
            config,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.local.id
    }

    /// Drive the node until it is shut down or its inbox closes
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<NodeCommand>, mut inbox: Mailbox) {
        self.start().await;

        let mut shutdown_ack = None;
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(NodeCommand::Shutdown(ack)) => {
                        shutdown_ack = Some(ack);
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                envelope = inbox.recv() => match envelope {
                    Some(envelope) => self.handle_envelope(envelope).await,
                    None => break,
                },
            }
        }

        self.cancel_schedules();
        self.deps.transport.deregister(NODE_PATH);
        info!(node_id = %self.local.id, "node actor stopped");
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    async fn start(&mut self) {
        self.deps.seeds.refresh().await;
        // Initial quorum, leader and datacenter state
        self.publish_status();

        if self.deps.seeds.is_bootstrap(&self.local.address) {
            self.bootstrap();
        } else {
            info!(
                node_id = %self.local.id,
                address = %self.local.address,
                seeds = self.deps.seeds.all_addresses().len(),
                "joining cluster"
            );
            self.begin_join(0);
        }
    }

    /// Start a new cluster with this node as its only member
    fn bootstrap(&mut self) {
        let now = self.now();
        let before = self.view.clone();

        self.set_local_status(MemberStatus::Up, now);
        self.record_local_change(now);
        self.phase = Phase::Up;
        self.schedule_periodic();

        info!(
            node_id = %self.local.id,
            address = %self.local.address,
            "bootstrapped cluster as seed node"
        );
        self.after_change(&before);
    }

    async fn handle_command(&mut self, command: NodeCommand) {
        match command {
            NodeCommand::Tick(Tick::Gossip) => self.gossip_round().await,
            NodeCommand::Tick(Tick::CrossDcGossip) => self.cross_dc_round().await,
            NodeCommand::Tick(Tick::FailureDetection) => self.detect_failures().await,
            NodeCommand::Tick(Tick::JoinRetry) => self.retry_join(),
            NodeCommand::JoinOutcome { attempt, result } => {
                self.on_join_outcome(attempt, result).await
            }
            NodeCommand::RecoveredViews(views) => self.on_recovered_views(views).await,
            // Handled by the run loop
            NodeCommand::Shutdown(_) => {}
        }
    }

    #[instrument(skip(self, envelope), fields(node_id = %self.local.id, message = envelope.message.name()))]
    async fn handle_envelope(&mut self, envelope: Envelope) {
        let Envelope {
            sender,
            message,
            reply,
        } = envelope;

        match message {
            ClusterMessage::JoinRequest { state, auth_token } => {
                self.on_join_request(state, &auth_token, reply, sender.as_ref())
                    .await;
            }
            ClusterMessage::JoinResponse { view } => {
                // Join replies normally arrive through `ask`; a transport that
                // routes replies by sender delivers them here instead
                if let Phase::Joining { attempt, .. } = self.phase {
                    self.on_join_outcome(attempt, Ok(view)).await;
                }
            }
            ClusterMessage::Gossip { view } => {
                if let Err(e) = self.on_gossip(view, sender.as_ref()).await {
                    debug!(error = %e, "dropped gossip");
                    if reply.is_some() {
                        self.respond(reply, None, e.into()).await;
                    }
                }
            }
            ClusterMessage::GetViewRequest => {
                let response = self.view_response();
                self.respond(reply, sender.as_ref(), response).await;
            }
            ClusterMessage::LeaveRequest => {
                let response = self.on_leave().await;
                self.respond(reply, sender.as_ref(), response).await;
            }
            ClusterMessage::ForceMemberDown {
                node_id,
                admin_token,
            } => {
                let response = match self.on_force_member_down(&node_id, &admin_token).await {
                    Ok(()) => ClusterMessage::AdminAck,
                    Err(e) => e.into(),
                };
                self.respond(reply, sender.as_ref(), response).await;
            }
            ClusterMessage::TriggerViewBroadcast { admin_token } => {
                let response = match self.on_trigger_broadcast(&admin_token).await {
                    Ok(()) => ClusterMessage::AdminAck,
                    Err(e) => e.into(),
                };
                self.respond(reply, sender.as_ref(), response).await;
            }
            ClusterMessage::UpdateNodeState { custom_state } => {
                let response = match self.on_update_state(custom_state, sender.as_ref()).await {
                    Ok(()) => ClusterMessage::AdminAck,
                    Err(e) => e.into(),
                };
                self.respond(reply, sender.as_ref(), response).await;
            }
            other @ (ClusterMessage::GetViewResponse { .. }
            | ClusterMessage::LeaveAck
            | ClusterMessage::AdminAck
            | ClusterMessage::Rejected(_)
            | ClusterMessage::User { .. }) => {
                debug!(message = other.name(), "ignoring unsolicited message");
            }
        }
    }

    /// Answer a request through its reply channel, or by telling the sender
    async fn respond(
        &self,
        reply: Option<oneshot::Sender<ClusterMessage>>,
        sender: Option<&ActorPath>,
        message: ClusterMessage,
    ) {
        match (reply, sender) {
            (Some(reply), _) => {
                let _ = reply.send(message);
            }
            (None, Some(sender)) => {
                if let Err(e) = self
                    .deps
                    .transport
                    .tell(sender, Some(self.self_path.clone()), message)
                    .await
                {
                    debug!(to = %sender, error = %e, "failed to deliver response");
                }
            }
            (None, None) => {}
        }
    }

    fn view_response(&self) -> ClusterMessage {
        ClusterMessage::GetViewResponse {
            view: self.view.snapshot(),
            in_quorum: self.in_quorum(),
            leader_address: leader_address(&self.view),
        }
    }

    fn now(&self) -> i64 {
        self.deps.clock.now_nanos()
    }

    fn in_quorum(&self) -> bool {
        self.phase == Phase::Up && self.quorum.satisfies(&self.view)
    }

    /// Change this node's status and publish it as a newer incarnation state
    fn set_local_status(&mut self, status: MemberStatus, now: i64) {
        self.local.status = status;
        self.local.advance(now);
        self.local.last_seen = now;
        self.view.add_member(&self.local);
    }

    fn record_local_change(&mut self, now: i64) {
        if let Err(e) = self.view.record_local_change(&self.local.id, now) {
            warn!(error = %e, "failed to record local view change");
        }
    }

    /// Keep the view's entry for this node in line with `self.local`
    fn reassert_local(&mut self, now: i64) {
        match self.view.member(&self.local.id) {
            Some(seen) if seen.is_newer_than(&self.local) => {
                // Someone holds a newer incarnation of our id
                let seen = seen.clone();
                warn!(
                    node_id = %self.local.id,
                    seen_generation = seen.generation,
                    "view holds a newer state for this node, superseding it"
                );
                if let Err(e) = self.local.supersede(&seen, now) {
                    warn!(node_id = %self.local.id, error = %e, "cannot supersede foreign incarnation");
                    return;
                }
                self.local.last_seen = now;
                self.view.add_member(&self.local);
                self.record_local_change(now);
            }
            Some(_) => {}
            None => {
                self.local.last_seen = now;
                self.view.add_member(&self.local);
            }
        }
    }

    /// Drop members that announced a graceful leave, both from `incoming`
    /// and from our view unless we hold a newer incarnation of them.
    /// Returns how many members left our view.
    fn strip_departed(&mut self, incoming: &mut ClusterView) -> usize {
        let departing: Vec<NodeState> = incoming
            .members()
            .filter(|m| m.is_departing() && m.id != self.local.id)
            .cloned()
            .collect();

        let mut removed = 0;
        for state in departing {
            incoming.remove_member(&state.id);
            let superseded = self
                .view
                .member(&state.id)
                .is_some_and(|ours| !ours.is_newer_than(&state));
            if superseded && self.view.remove_member(&state.id).is_some() {
                info!(member = %state.id, address = %state.address, "member left the cluster");
                removed += 1;
            }
        }
        if removed > 0 {
            self.metrics.members_removed(removed);
        }
        removed
    }

    fn schedule_key(&self, tick: Tick) -> String {
        format!("{}{}/{}", self.local.address, NODE_PATH, tick.schedule_name())
    }

    fn tick_task(&self, tick: Tick) -> ScheduledTask {
        let commands = self.commands.clone();
        Arc::new(move || {
            let _ = commands.send(NodeCommand::Tick(tick));
        })
    }

    fn schedule_periodic(&self) {
        let scheduler = &self.deps.scheduler;
        scheduler.cancel(&self.schedule_key(Tick::JoinRetry));
        scheduler.schedule_repeating(
            &self.schedule_key(Tick::Gossip),
            self.config.discovery.interval,
            self.tick_task(Tick::Gossip),
        );
        if self.config.discovery.max_cross_dc_targets_per_tick > 0 {
            scheduler.schedule_repeating(
                &self.schedule_key(Tick::CrossDcGossip),
                self.config.discovery.cross_dc_interval,
                self.tick_task(Tick::CrossDcGossip),
            );
        }
        scheduler.schedule_repeating(
            &self.schedule_key(Tick::FailureDetection),
            self.config.failure.interval,
            self.tick_task(Tick::FailureDetection),
        );
    }

    fn cancel_schedules(&self) {
        for tick in [
            Tick::Gossip,
            Tick::CrossDcGossip,
            Tick::FailureDetection,
            Tick::JoinRetry,
        ] {
            self.deps.scheduler.cancel(&self.schedule_key(tick));
        }
    }

    /// Publish membership, view, quorum, leader and datacenter events for a
    /// transition from `before` to the current view
    fn after_change(&mut self, before: &ClusterView) {
        if let Some(event) = ClusterEventPublisher::members_changed(before, &self.view) {
            self.deps.events.publish(event);
        }
        if before != &self.view {
            self.deps.events.publish(ClusterEvent::ViewChanged {
                view: self.view.snapshot(),
            });
        }
        self.publish_status();
    }

    fn publish_status(&mut self) {
        let in_quorum = self.in_quorum();
        let quorum_event = self.publisher.quorum(in_quorum);
        let quorum_changed = quorum_event.is_some();
        if let Some(event) = quorum_event {
            self.deps.events.publish(event);
        }

        if let Some(event) = self.publisher.leader(
            leader_address(&self.view),
            &self.local.address,
            in_quorum,
            quorum_changed,
        ) {
            self.deps.events.publish(event);
        }

        for event in self.publisher.datacenters(datacenter_health(&self.view)) {
            self.deps.events.publish(event);
        }

        self.metrics.record_view(&self.view, in_quorum);
    }
}
