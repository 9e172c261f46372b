//! In-process transport for running whole clusters inside one tokio runtime
//!
//! Every message crossing the network is encoded and decoded with the wire
//! codec, so simulated clusters exercise the same bytes a socket would carry.
//! Links can be cut per node or per pair to simulate partitions.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use super::transport::{ActorPath, Envelope, Mailbox, Transport};
use crate::cluster::codec;
use crate::cluster::messages::ClusterMessage;
use crate::error::{MeshworkError, MeshworkResult};

/// Shared registry of every mailbox in the simulated network
#[derive(Debug, Default)]
pub struct InMemoryNetwork {
    mailboxes: DashMap<ActorPath, mpsc::UnboundedSender<Envelope>>,
    isolated: DashSet<String>,
    /// Unordered pairs of addresses that cannot reach each other
    cut_links: DashSet<(String, String)>,
}

impl InMemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport bound to `address` on this network
    pub fn transport(self: &Arc<Self>, address: impl Into<String>) -> Arc<InMemoryTransport> {
        Arc::new(InMemoryTransport {
            network: Arc::clone(self),
            address: address.into(),
        })
    }

    /// Drop all traffic to and from `address`
    pub fn isolate(&self, address: &str) {
        self.isolated.insert(address.to_string());
    }

    /// Cut the link between two nodes in both directions
    pub fn partition(&self, a: &str, b: &str) {
        self.cut_links.insert(link_key(a, b));
    }

    /// Restore all links of `address`
    pub fn heal(&self, address: &str) {
        self.isolated.remove(address);
        self.cut_links.retain(|(x, y)| x != address && y != address);
    }

    pub fn heal_all(&self) {
        self.isolated.clear();
        self.cut_links.clear();
    }

    pub fn is_registered(&self, path: &ActorPath) -> bool {
        self.mailboxes.contains_key(path)
    }

    fn reachable(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        !self.isolated.contains(from)
            && !self.isolated.contains(to)
            && !self.cut_links.contains(&link_key(from, to))
    }

    fn deliver(&self, from: &str, to: &ActorPath, envelope: Envelope) -> MeshworkResult<()> {
        if !self.reachable(from, &to.address) {
            return Err(MeshworkError::transport(
                to.to_string(),
                format!("{} is unreachable from {}", to.address, from),
            ));
        }

        let mailbox = self
            .mailboxes
            .get(to)
            .ok_or_else(|| MeshworkError::ActorNotFound {
                path: to.to_string(),
            })?;

        mailbox.send(envelope).map_err(|_| MeshworkError::ActorNotFound {
            path: to.to_string(),
        })
    }
}

fn link_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Round trip through the wire codec
fn over_the_wire(message: &ClusterMessage) -> MeshworkResult<ClusterMessage> {
    codec::decode(codec::encode(message)?)
}

/// One node's view of an [`InMemoryNetwork`]
#[derive(Debug, Clone)]
pub struct InMemoryTransport {
    network: Arc<InMemoryNetwork>,
    address: String,
}

impl InMemoryTransport {
    pub fn network(&self) -> &Arc<InMemoryNetwork> {
        &self.network
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn local_address(&self) -> &str {
        &self.address
    }

    fn register(&self, path: &str) -> MeshworkResult<Mailbox> {
        let key = ActorPath::new(self.address.clone(), path);
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(existing) = self.network.mailboxes.get(&key) {
            if !existing.is_closed() {
                return Err(MeshworkError::internal(format!(
                    "mailbox {} is already registered",
                    key
                )));
            }
        }
        self.network.mailboxes.insert(key, tx);
        Ok(rx)
    }

    fn deregister(&self, path: &str) {
        self.network
            .mailboxes
            .remove(&ActorPath::new(self.address.clone(), path));
    }

    async fn tell(
        &self,
        to: &ActorPath,
        sender: Option<ActorPath>,
        message: ClusterMessage,
    ) -> MeshworkResult<()> {
        trace!(to = %to, message = message.name(), "tell");
        let message = over_the_wire(&message)?;
        self.network
            .deliver(&self.address, to, Envelope::new(sender, message))
    }

    async fn ask(
        &self,
        to: &ActorPath,
        sender: Option<ActorPath>,
        message: ClusterMessage,
        timeout: Duration,
    ) -> MeshworkResult<ClusterMessage> {
        trace!(to = %to, message = message.name(), "ask");
        let operation = message.name();
        let message = over_the_wire(&message)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            sender,
            message,
            reply: Some(reply_tx),
        };
        self.network.deliver(&self.address, to, envelope)?;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => {
                if !self.network.reachable(&to.address, &self.address) {
                    return Err(MeshworkError::transport(
                        to.to_string(),
                        "reply dropped by partition",
                    ));
                }
                over_the_wire(&reply)
            }
            Ok(Err(_)) => Err(MeshworkError::transport(
                to.to_string(),
                "receiver dropped the request without replying",
            )),
            Err(_) => Err(MeshworkError::timeout(operation, timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tell_delivers_decoded_message() {
        let network = InMemoryNetwork::new();
        let a = network.transport("a:1");
        let b = network.transport("b:1");
        let mut inbox = b.register("/inbox").unwrap();

        a.tell(
            &ActorPath::new("b:1", "/inbox"),
            Some(ActorPath::new("a:1", "/sender")),
            ClusterMessage::LeaveRequest,
        )
        .await
        .unwrap();

        let envelope = inbox.recv().await.unwrap();
        assert_eq!(envelope.message, ClusterMessage::LeaveRequest);
        assert_eq!(envelope.sender, Some(ActorPath::new("a:1", "/sender")));
    }

    #[tokio::test]
    async fn test_unknown_path_is_actor_not_found() {
        let network = InMemoryNetwork::new();
        let a = network.transport("a:1");
        let err = a
            .tell(&ActorPath::new("b:1", "/nobody"), None, ClusterMessage::AdminAck)
            .await
            .unwrap_err();
        assert!(matches!(err, MeshworkError::ActorNotFound { .. }));
    }

    #[tokio::test]
    async fn test_ask_round_trip_and_partition() {
        let network = InMemoryNetwork::new();
        let a = network.transport("a:1");
        let b = network.transport("b:1");
        let mut inbox = b.register("/svc").unwrap();

        tokio::spawn(async move {
            while let Some(mut envelope) = inbox.recv().await {
                envelope.respond(ClusterMessage::AdminAck);
            }
        });

        let target = ActorPath::new("b:1", "/svc");
        let reply = a
            .ask(&target, None, ClusterMessage::GetViewRequest, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, ClusterMessage::AdminAck);

        network.partition("b:1", "a:1");
        let err = a
            .ask(&target, None, ClusterMessage::GetViewRequest, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, MeshworkError::Transport { .. }));

        network.heal("a:1");
        assert!(a
            .ask(&target, None, ClusterMessage::GetViewRequest, Duration::from_secs(1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_ask_times_out_when_nobody_answers() {
        let network = InMemoryNetwork::new();
        let a = network.transport("a:1");
        let _inbox = a.register("/silent").unwrap();
        let err = a
            .ask(
                &ActorPath::new("a:1", "/silent"),
                None,
                ClusterMessage::GetViewRequest,
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MeshworkError::Timeout { .. }));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let network = InMemoryNetwork::new();
        let a = network.transport("a:1");
        let _first = a.register("/x").unwrap();
        assert!(a.register("/x").is_err());
        a.deregister("/x");
        assert!(a.register("/x").is_ok());
    }
}
