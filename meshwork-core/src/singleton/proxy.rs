use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::singleton_path;
use crate::cluster::events::ClusterEvent;
use crate::cluster::messages::ClusterMessage;
use crate::cluster::node_actor::NODE_PATH;
use crate::error::MeshworkResult;
use crate::runtime::{Actor, ActorContext, ActorPath, Envelope};

const RETRY_TIMER: &str = "retry";

struct Pending {
    sender: Option<ActorPath>,
    message: ClusterMessage,
}

/// Local stand-in for the singleton `name`, wherever it currently runs.
///
/// Tells are forwarded with the original sender so the singleton can answer
/// the caller directly. While no location is known, or the last delivery
/// failed, messages queue up and are flushed in arrival order. Asks are
/// relayed and their reply piped back to the caller.
pub struct SingletonProxy {
    name: String,
    location: Option<ActorPath>,
    buffer: VecDeque<Pending>,
    retry_interval: Duration,
    request_timeout: Duration,
    retry_armed: bool,
}

impl SingletonProxy {
    pub fn new(name: impl Into<String>, retry_interval: Duration, request_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            location: None,
            buffer: VecDeque::new(),
            retry_interval,
            request_timeout,
            retry_armed: false,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn location_for(&self, leader: Option<&str>) -> Option<ActorPath> {
        leader.map(|address| ActorPath::new(address, singleton_path(&self.name)))
    }

    async fn update_location(&mut self, ctx: &mut ActorContext, location: Option<ActorPath>) {
        if location != self.location {
            info!(
                singleton = %self.name,
                from = ?self.location.as_ref().map(ToString::to_string),
                to = ?location.as_ref().map(ToString::to_string),
                "singleton location changed"
            );
        }
        self.location = location;
        self.flush(ctx).await;
    }

    /// Deliver buffered messages in order, stopping at the first failure
    async fn flush(&mut self, ctx: &mut ActorContext) {
        let Some(location) = self.location.clone() else {
            return;
        };
        while let Some(pending) = self.buffer.pop_front() {
            if let Err(e) = ctx
                .forward(&location, pending.sender.clone(), pending.message.clone())
                .await
            {
                debug!(singleton = %self.name, error = %e, "singleton delivery failed, buffering");
                self.buffer.push_front(pending);
                self.arm_retry(ctx);
                return;
            }
        }
    }

    fn arm_retry(&mut self, ctx: &mut ActorContext) {
        if !self.retry_armed {
            self.retry_armed = true;
            ctx.start_timer(RETRY_TIMER, self.retry_interval);
        }
    }

    fn relay_ask(
        &self,
        ctx: &ActorContext,
        location: ActorPath,
        sender: Option<ActorPath>,
        message: ClusterMessage,
        reply: oneshot::Sender<ClusterMessage>,
    ) {
        let transport = Arc::clone(ctx.runtime().transport());
        let timeout = self.request_timeout;
        tokio::spawn(async move {
            let answer = transport
                .ask(&location, sender, message, timeout)
                .await
                .unwrap_or_else(ClusterMessage::from);
            let _ = reply.send(answer);
        });
    }
}

#[async_trait]
impl Actor for SingletonProxy {
    async fn started(&mut self, ctx: &mut ActorContext) -> MeshworkResult<()> {
        ctx.subscribe_events();

        let node = ActorPath::new(ctx.path().address.clone(), NODE_PATH);
        match ctx
            .ask(&node, ClusterMessage::GetViewRequest, self.request_timeout)
            .await
        {
            Ok(ClusterMessage::GetViewResponse { leader_address, .. }) => {
                let location = self.location_for(leader_address.as_deref());
                self.update_location(ctx, location).await;
            }
            Ok(other) => debug!(message = other.name(), "unexpected view reply"),
            Err(e) => warn!(singleton = %self.name, error = %e, "proxy could not read the cluster view"),
        }
        Ok(())
    }

    async fn handle(&mut self, ctx: &mut ActorContext, envelope: Envelope) {
        let Envelope {
            sender,
            message,
            reply,
        } = envelope;

        if let Some(reply) = reply {
            match self.location.clone() {
                Some(location) => self.relay_ask(ctx, location, sender, message, reply),
                None => {
                    let _ = reply.send(ClusterMessage::from(
                        crate::error::MeshworkError::ActorNotFound {
                            path: singleton_path(&self.name),
                        },
                    ));
                }
            }
            return;
        }

        self.buffer.push_back(Pending { sender, message });
        if self.location.is_none() {
            debug!(singleton = %self.name, buffered = self.buffer.len(), "no singleton location, buffering");
            return;
        }
        // Earlier messages still waiting for a retry keep their place
        if !self.retry_armed {
            self.flush(ctx).await;
        }
    }

    async fn on_event(&mut self, ctx: &mut ActorContext, event: ClusterEvent) {
        if let ClusterEvent::LeaderChanged { leader_address, .. } = event {
            let location = self.location_for(leader_address.as_deref());
            self.update_location(ctx, location).await;
        }
    }

    async fn on_timer(&mut self, ctx: &mut ActorContext, timer: &str) {
        if timer == RETRY_TIMER {
            self.retry_armed = false;
            self.flush(ctx).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_follows_leader_address() {
        let proxy = SingletonProxy::new("registry", Duration::from_millis(10), Duration::from_secs(1));
        assert_eq!(
            proxy.location_for(Some("10.0.0.1:7946")),
            Some(ActorPath::new("10.0.0.1:7946", "/@cluster-singletons/registry"))
        );
        assert_eq!(proxy.location_for(None), None);
        assert_eq!(proxy.buffered(), 0);
    }
}
