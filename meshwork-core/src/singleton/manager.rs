use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::singleton_path;
use crate::cluster::events::ClusterEvent;
use crate::cluster::messages::ClusterMessage;
use crate::cluster::node_actor::NODE_PATH;
use crate::error::MeshworkResult;
use crate::runtime::{Actor, ActorContext, ActorHandle, ActorPath, Envelope};

/// Builds a fresh instance of one singleton every time this node takes over
pub trait SingletonProvider: Send + Sync {
    fn provide(&self) -> Box<dyn Actor>;
}

impl<F> SingletonProvider for F
where
    F: Fn() -> Box<dyn Actor> + Send + Sync,
{
    fn provide(&self) -> Box<dyn Actor> {
        self()
    }
}

/// Starts every registered singleton while this node is leader and in quorum,
/// and stops them as soon as either stops being true
pub struct SingletonManager {
    templates: BTreeMap<String, Arc<dyn SingletonProvider>>,
    children: BTreeMap<String, ActorHandle>,
    request_timeout: Duration,
}

impl SingletonManager {
    pub fn new(
        templates: BTreeMap<String, Arc<dyn SingletonProvider>>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            templates,
            children: BTreeMap::new(),
            request_timeout,
        }
    }

    pub fn running(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    async fn reconcile(&mut self, ctx: &mut ActorContext, is_leader: bool, in_quorum: bool) {
        if is_leader && in_quorum {
            let mut started = Vec::new();
            for (name, provider) in &self.templates {
                if self.children.contains_key(name) {
                    continue;
                }
                match ctx.spawn(&singleton_path(name), provider.provide()) {
                    Ok(handle) => {
                        self.children.insert(name.clone(), handle);
                        started.push(name.clone());
                    }
                    Err(e) => warn!(singleton = %name, error = %e, "singleton spawn failed"),
                }
            }
            if !started.is_empty() {
                info!(singletons = ?started, "singletons started on leader");
            }
            return;
        }

        if self.children.is_empty() {
            return;
        }
        let stopped: Vec<String> = self.children.keys().cloned().collect();
        for (_, handle) in std::mem::take(&mut self.children) {
            handle.stop().await;
        }
        info!(
            singletons = ?stopped,
            is_leader,
            in_quorum,
            "singletons stopped: not leader or not in quorum"
        );
    }
}

#[async_trait]
impl Actor for SingletonManager {
    async fn started(&mut self, ctx: &mut ActorContext) -> MeshworkResult<()> {
        ctx.subscribe_events();

        let node = ActorPath::new(ctx.path().address.clone(), NODE_PATH);
        match ctx
            .ask(&node, ClusterMessage::GetViewRequest, self.request_timeout)
            .await
        {
            Ok(ClusterMessage::GetViewResponse {
                in_quorum,
                leader_address,
                ..
            }) => {
                let is_leader = leader_address.as_deref() == Some(ctx.path().address.as_str());
                self.reconcile(ctx, is_leader, in_quorum).await;
            }
            Ok(other) => debug!(message = other.name(), "unexpected view reply"),
            Err(e) => warn!(error = %e, "singleton manager could not read the cluster view"),
        }
        Ok(())
    }

    async fn handle(&mut self, _ctx: &mut ActorContext, envelope: Envelope) {
        debug!(message = envelope.message.name(), "singleton manager ignores messages");
    }

    async fn on_event(&mut self, ctx: &mut ActorContext, event: ClusterEvent) {
        if let ClusterEvent::LeaderChanged {
            i_am_leader,
            in_quorum,
            ..
        } = event
        {
            self.reconcile(ctx, i_am_leader, in_quorum).await;
        }
    }

    async fn stopped(&mut self, _ctx: &mut ActorContext) {
        for (_, handle) in std::mem::take(&mut self.children) {
            handle.stop().await;
        }
    }
}
