//! Starting a node and talking to it

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::events::{BroadcastEventBus, ClusterEvent, EventBus};
use super::messages::ClusterMessage;
use super::node_actor::{NodeActor, NodeCommand, NodeDeps, CLIENT_PATH, NODE_PATH};
use super::node_state::NodeState;
use super::seeds::{SeedsProvider, SeedsResolver};
use super::timeouts::clamp_request_timeout;
use super::view::ClusterView;
use crate::config::ClusterConfig;
use crate::error::{MeshworkError, MeshworkResult};
use crate::runtime::{
    ActorHandle, ActorPath, ActorRuntime, Clock, Scheduler, SystemClock, TokioScheduler, Transport,
};
use crate::singleton::{SingletonManager, SingletonProvider, SingletonProxyManager, SINGLETONS_PATH};

/// Host services a node runs on
#[derive(Clone)]
pub struct ClusterRuntime {
    pub transport: Arc<dyn Transport>,
    pub scheduler: Arc<dyn Scheduler>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventBus>,
    pub seeds_resolver: Option<Arc<dyn SeedsResolver>>,
    pub singletons: BTreeMap<String, Arc<dyn SingletonProvider>>,
}

impl ClusterRuntime {
    /// Tokio scheduler, system clock and a fresh broadcast bus over `transport`
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            scheduler: TokioScheduler::new(),
            clock: Arc::new(SystemClock),
            events: Arc::new(BroadcastEventBus::default()),
            seeds_resolver: None,
            singletons: BTreeMap::new(),
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_seeds_resolver(mut self, resolver: Arc<dyn SeedsResolver>) -> Self {
        self.seeds_resolver = Some(resolver);
        self
    }

    /// Register a singleton that runs on the leader
    pub fn with_singleton(mut self, name: impl Into<String>, provider: Arc<dyn SingletonProvider>) -> Self {
        self.singletons.insert(name.into(), provider);
        self
    }
}

/// Snapshot answered by the node actor
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterState {
    pub view: ClusterView,
    pub in_quorum: bool,
    pub leader_address: Option<String>,
}

pub struct Cluster;

impl Cluster {
    /// Validate `config`, start the node actor and, when singletons are
    /// registered, the singleton manager. A disabled config starts nothing.
    pub async fn start(mut config: ClusterConfig, runtime: ClusterRuntime) -> MeshworkResult<ClusterHandle> {
        if !config.enabled {
            info!("clustering disabled");
            return Ok(ClusterHandle { inner: None });
        }
        config.validate()?;
        config.node.ensure_id();

        if runtime.transport.local_address() != config.node.address {
            return Err(MeshworkError::configuration(
                "node.address",
                format!(
                    "transport is bound to {} but the node is configured for {}",
                    runtime.transport.local_address(),
                    config.node.address
                ),
            ));
        }

        let mut seeds = SeedsProvider::new(&config.discovery);
        if let Some(resolver) = runtime.seeds_resolver.clone() {
            seeds = seeds.with_resolver(resolver);
        }

        let deps = NodeDeps {
            transport: Arc::clone(&runtime.transport),
            scheduler: Arc::clone(&runtime.scheduler),
            clock: Arc::clone(&runtime.clock),
            events: Arc::clone(&runtime.events),
            seeds: Arc::new(seeds),
        };

        let inbox = runtime.transport.register(NODE_PATH)?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let node = match NodeActor::new(config.clone(), deps, commands_tx.clone()) {
            Ok(node) => node,
            Err(e) => {
                runtime.transport.deregister(NODE_PATH);
                return Err(e);
            }
        };
        info!(
            node_id = %config.node.id,
            address = %config.node.address,
            cluster = %config.cluster_name,
            "starting cluster node"
        );
        let task = tokio::spawn(node.run(commands_rx, inbox));

        let request_timeout = clamp_request_timeout(config.join.request_timeout);
        let actors = ActorRuntime::new(Arc::clone(&runtime.transport), Arc::clone(&runtime.events));

        let singleton_manager = if runtime.singletons.is_empty() {
            None
        } else {
            let manager = SingletonManager::new(runtime.singletons.clone(), request_timeout);
            Some(actors.spawn(SINGLETONS_PATH, Box::new(manager))?)
        };

        let proxies = SingletonProxyManager::new(
            actors.clone(),
            config.discovery.interval,
            request_timeout,
        );

        Ok(ClusterHandle {
            inner: Some(Arc::new(HandleInner {
                node_id: config.node.id.clone(),
                address: config.node.address.clone(),
                client: ActorPath::new(config.node.address.clone(), CLIENT_PATH),
                node: ActorPath::new(config.node.address.clone(), NODE_PATH),
                transport: Arc::clone(&runtime.transport),
                events: Arc::clone(&runtime.events),
                request_timeout,
                commands: commands_tx,
                task: Mutex::new(Some(task)),
                singleton_manager: Mutex::new(singleton_manager),
                proxies,
            })),
        })
    }
}

struct HandleInner {
    node_id: String,
    address: String,
    client: ActorPath,
    node: ActorPath,
    transport: Arc<dyn Transport>,
    events: Arc<dyn EventBus>,
    request_timeout: Duration,
    commands: mpsc::UnboundedSender<NodeCommand>,
    task: Mutex<Option<JoinHandle<()>>>,
    singleton_manager: Mutex<Option<ActorHandle>>,
    proxies: SingletonProxyManager,
}

/// Cheap-to-clone client of one running node. Every method fails with
/// `ClusterDisabled` when clustering is switched off.
#[derive(Clone)]
pub struct ClusterHandle {
    inner: Option<Arc<HandleInner>>,
}

impl ClusterHandle {
    fn inner(&self) -> MeshworkResult<&HandleInner> {
        self.inner.as_deref().ok_or(MeshworkError::ClusterDisabled)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn node_id(&self) -> MeshworkResult<&str> {
        Ok(&self.inner()?.node_id)
    }

    pub fn address(&self) -> MeshworkResult<&str> {
        Ok(&self.inner()?.address)
    }

    async fn request(&self, message: ClusterMessage) -> MeshworkResult<ClusterMessage> {
        let inner = self.inner()?;
        inner
            .transport
            .ask(&inner.node, Some(inner.client.clone()), message, inner.request_timeout)
            .await?
            .into_result()
    }

    pub async fn state(&self) -> MeshworkResult<ClusterState> {
        match self.request(ClusterMessage::GetViewRequest).await? {
            ClusterMessage::GetViewResponse {
                view,
                in_quorum,
                leader_address,
            } => Ok(ClusterState {
                view,
                in_quorum,
                leader_address,
            }),
            other => Err(unexpected("get_view", &other)),
        }
    }

    pub async fn view(&self) -> MeshworkResult<ClusterView> {
        Ok(self.state().await?.view)
    }

    /// Members sorted by id
    pub async fn members(&self) -> MeshworkResult<Vec<NodeState>> {
        Ok(self.view().await?.members().cloned().collect())
    }

    pub async fn in_quorum(&self) -> MeshworkResult<bool> {
        Ok(self.state().await?.in_quorum)
    }

    pub async fn leader(&self) -> MeshworkResult<Option<String>> {
        Ok(self.state().await?.leader_address)
    }

    /// Leave gracefully. The node stops gossiping but keeps answering queries
    /// until [`ClusterHandle::shutdown`].
    pub async fn leave(&self) -> MeshworkResult<()> {
        match self.request(ClusterMessage::LeaveRequest).await? {
            ClusterMessage::LeaveAck => Ok(()),
            other => Err(unexpected("leave", &other)),
        }
    }

    pub async fn update_node_state(&self, custom_state: BTreeMap<String, String>) -> MeshworkResult<()> {
        self.expect_ack("update_node_state", ClusterMessage::UpdateNodeState { custom_state })
            .await
    }

    pub async fn force_member_down(&self, node_id: &str, admin_token: &str) -> MeshworkResult<()> {
        self.expect_ack(
            "force_member_down",
            ClusterMessage::ForceMemberDown {
                node_id: node_id.to_string(),
                admin_token: admin_token.to_string(),
            },
        )
        .await
    }

    pub async fn trigger_view_broadcast(&self, admin_token: &str) -> MeshworkResult<()> {
        self.expect_ack(
            "trigger_view_broadcast",
            ClusterMessage::TriggerViewBroadcast {
                admin_token: admin_token.to_string(),
            },
        )
        .await
    }

    async fn expect_ack(&self, operation: &str, message: ClusterMessage) -> MeshworkResult<()> {
        match self.request(message).await? {
            ClusterMessage::AdminAck => Ok(()),
            other => Err(unexpected(operation, &other)),
        }
    }

    /// Address of the local proxy for singleton `name`
    pub fn singleton_proxy(&self, name: &str) -> MeshworkResult<ActorPath> {
        self.inner()?.proxies.get_or_create(name)
    }

    pub fn subscribe(&self) -> MeshworkResult<broadcast::Receiver<ClusterEvent>> {
        Ok(self.inner()?.events.subscribe())
    }

    /// Stop proxies, singletons and the node actor
    pub async fn shutdown(&self) -> MeshworkResult<()> {
        let inner = self.inner()?;
        inner.proxies.shutdown().await;
        if let Some(manager) = inner.singleton_manager.lock().await.take() {
            manager.stop().await;
        }

        let Some(task) = inner.task.lock().await.take() else {
            return Ok(());
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if inner.commands.send(NodeCommand::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        if let Err(e) = task.await {
            warn!(error = %e, "node actor task ended abnormally");
        }
        Ok(())
    }
}

fn unexpected(operation: &str, message: &ClusterMessage) -> MeshworkError {
    MeshworkError::unexpected_response(operation, format!("got {}", message.name()))
}
