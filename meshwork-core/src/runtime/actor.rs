//! Minimal actor runtime used for singletons and their proxies
//!
//! An actor owns a mailbox registered with the [`Transport`], receives cluster
//! events once it subscribes, and may arm named one-shot timers. Each actor
//! runs on its own tokio task and handles one input at a time.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::transport::{ActorPath, Envelope, Transport};
use crate::cluster::events::{ClusterEvent, EventBus};
use crate::cluster::messages::ClusterMessage;
use crate::error::MeshworkResult;

#[async_trait]
pub trait Actor: Send + 'static {
    async fn started(&mut self, _ctx: &mut ActorContext) -> MeshworkResult<()> {
        Ok(())
    }

    async fn handle(&mut self, ctx: &mut ActorContext, envelope: Envelope);

    async fn on_event(&mut self, _ctx: &mut ActorContext, _event: ClusterEvent) {}

    async fn on_timer(&mut self, _ctx: &mut ActorContext, _timer: &str) {}

    async fn stopped(&mut self, _ctx: &mut ActorContext) {}
}

/// Spawns actors against a transport and an event bus
#[derive(Clone)]
pub struct ActorRuntime {
    transport: Arc<dyn Transport>,
    events: Arc<dyn EventBus>,
}

impl ActorRuntime {
    pub fn new(transport: Arc<dyn Transport>, events: Arc<dyn EventBus>) -> Self {
        Self { transport, events }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn events(&self) -> &Arc<dyn EventBus> {
        &self.events
    }

    pub fn local_address(&self) -> &str {
        self.transport.local_address()
    }

    /// Register `path` and start `actor` on its own task
    pub fn spawn(&self, path: &str, mut actor: Box<dyn Actor>) -> MeshworkResult<ActorHandle> {
        let mut mailbox = self.transport.register(path)?;
        let self_path = ActorPath::new(self.transport.local_address(), path);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let (timer_tx, mut timer_rx) = mpsc::unbounded_channel::<String>();

        let mut ctx = ActorContext {
            path: self_path.clone(),
            runtime: self.clone(),
            sender: None,
            pending_events: None,
            subscribed: false,
            timers: timer_tx,
        };
        let transport = Arc::clone(&self.transport);
        let registered = path.to_string();

        let join = tokio::spawn(async move {
            if let Err(e) = actor.started(&mut ctx).await {
                warn!(path = %ctx.path, error = %e, "actor failed to start");
                transport.deregister(&registered);
                return;
            }
            let mut events = ctx.pending_events.take();

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    envelope = mailbox.recv() => match envelope {
                        Some(envelope) => {
                            ctx.sender = envelope.sender.clone();
                            actor.handle(&mut ctx, envelope).await;
                            ctx.sender = None;
                        }
                        None => break,
                    },
                    Some(timer) = timer_rx.recv() => {
                        actor.on_timer(&mut ctx, &timer).await;
                    }
                    Some(event) = next_event(&mut events) => {
                        actor.on_event(&mut ctx, event).await;
                    }
                }
                if events.is_none() {
                    events = ctx.pending_events.take();
                }
            }

            actor.stopped(&mut ctx).await;
            transport.deregister(&registered);
            debug!(path = %ctx.path, "actor stopped");
        });

        Ok(ActorHandle {
            path: self_path,
            stop: Some(stop_tx),
            join,
        })
    }
}

async fn next_event(events: &mut Option<broadcast::Receiver<ClusterEvent>>) -> Option<ClusterEvent> {
    let Some(rx) = events.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "actor lagged behind cluster events");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Everything an actor can do while handling an input
pub struct ActorContext {
    path: ActorPath,
    runtime: ActorRuntime,
    sender: Option<ActorPath>,
    pending_events: Option<broadcast::Receiver<ClusterEvent>>,
    subscribed: bool,
    timers: mpsc::UnboundedSender<String>,
}

impl ActorContext {
    pub fn path(&self) -> &ActorPath {
        &self.path
    }

    pub fn runtime(&self) -> &ActorRuntime {
        &self.runtime
    }

    /// Sender of the envelope currently being handled
    pub fn sender(&self) -> Option<&ActorPath> {
        self.sender.as_ref()
    }

    /// Start receiving cluster events through [`Actor::on_event`]. Events
    /// published from this call on are delivered.
    pub fn subscribe_events(&mut self) {
        if !self.subscribed {
            self.subscribed = true;
            self.pending_events = Some(self.runtime.events.subscribe());
        }
    }

    pub async fn tell(&self, to: &ActorPath, message: ClusterMessage) -> MeshworkResult<()> {
        self.runtime
            .transport
            .tell(to, Some(self.path.clone()), message)
            .await
    }

    /// Send on behalf of another sender so replies go straight back to it
    pub async fn forward(
        &self,
        to: &ActorPath,
        sender: Option<ActorPath>,
        message: ClusterMessage,
    ) -> MeshworkResult<()> {
        self.runtime.transport.tell(to, sender, message).await
    }

    pub async fn ask(
        &self,
        to: &ActorPath,
        message: ClusterMessage,
        timeout: Duration,
    ) -> MeshworkResult<ClusterMessage> {
        self.runtime
            .transport
            .ask(to, Some(self.path.clone()), message, timeout)
            .await
    }

    /// Deliver `name` to [`Actor::on_timer`] after `delay`
    pub fn start_timer(&self, name: impl Into<String>, delay: Duration) {
        let timers = self.timers.clone();
        let name = name.into();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timers.send(name);
        });
    }

    pub fn spawn(&self, path: &str, actor: Box<dyn Actor>) -> MeshworkResult<ActorHandle> {
        self.runtime.spawn(path, actor)
    }
}

/// Owner handle of a running actor
#[derive(Debug)]
pub struct ActorHandle {
    path: ActorPath,
    stop: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl ActorHandle {
    pub fn path(&self) -> &ActorPath {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Stop the actor and wait for `stopped` to complete
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.join).await {
            warn!(path = %self.path, error = %e, "actor task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::events::BroadcastEventBus;
    use crate::runtime::memory::InMemoryNetwork;

    struct Echo;

    #[async_trait]
    impl Actor for Echo {
        async fn handle(&mut self, _ctx: &mut ActorContext, mut envelope: Envelope) {
            let message = envelope.message.clone();
            envelope.respond(message);
        }
    }

    struct Recorder {
        seen: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl Actor for Recorder {
        async fn started(&mut self, ctx: &mut ActorContext) -> MeshworkResult<()> {
            ctx.subscribe_events();
            ctx.start_timer("wake", Duration::from_millis(5));
            Ok(())
        }

        async fn handle(&mut self, _ctx: &mut ActorContext, _envelope: Envelope) {}

        async fn on_event(&mut self, _ctx: &mut ActorContext, event: ClusterEvent) {
            let _ = self.seen.send(event.kind().to_string());
        }

        async fn on_timer(&mut self, _ctx: &mut ActorContext, timer: &str) {
            let _ = self.seen.send(format!("timer:{}", timer));
        }

        async fn stopped(&mut self, _ctx: &mut ActorContext) {
            let _ = self.seen.send("stopped".to_string());
        }
    }

    fn runtime() -> (ActorRuntime, Arc<BroadcastEventBus>) {
        let network = InMemoryNetwork::new();
        let bus = Arc::new(BroadcastEventBus::default());
        (ActorRuntime::new(network.transport("a:1"), bus.clone()), bus)
    }

    #[tokio::test]
    async fn test_spawned_actor_answers_ask() {
        let (runtime, _bus) = runtime();
        let handle = runtime.spawn("/echo", Box::new(Echo)).unwrap();

        let reply = runtime
            .transport()
            .ask(handle.path(), None, ClusterMessage::LeaveAck, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, ClusterMessage::LeaveAck);

        handle.stop().await;
        assert!(runtime
            .transport()
            .tell(&ActorPath::new("a:1", "/echo"), None, ClusterMessage::LeaveAck)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_events_timers_and_stop() {
        let (runtime, bus) = runtime();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = runtime.spawn("/rec", Box::new(Recorder { seen: tx })).unwrap();

        assert_eq!(rx.recv().await.unwrap(), "timer:wake");
        bus.publish(ClusterEvent::QuorumReached);
        assert_eq!(rx.recv().await.unwrap(), "quorum_reached");

        handle.stop().await;
        assert_eq!(rx.recv().await.unwrap(), "stopped");
    }
}
