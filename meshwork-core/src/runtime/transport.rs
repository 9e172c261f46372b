//! Message transport contract

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::cluster::messages::ClusterMessage;
use crate::error::MeshworkResult;

/// Where an actor lives: a node address plus a path on that node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorPath {
    pub address: String,
    pub path: String,
}

impl ActorPath {
    pub fn new(address: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for ActorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.address, self.path)
    }
}

/// A delivered message. `reply` is set when the sender used `ask`.
#[derive(Debug)]
pub struct Envelope {
    pub sender: Option<ActorPath>,
    pub message: ClusterMessage,
    pub reply: Option<oneshot::Sender<ClusterMessage>>,
}

impl Envelope {
    pub fn new(sender: Option<ActorPath>, message: ClusterMessage) -> Self {
        Self {
            sender,
            message,
            reply: None,
        }
    }

    /// Answer an `ask`. Returns false when nobody is waiting.
    pub fn respond(&mut self, message: ClusterMessage) -> bool {
        match self.reply.take() {
            Some(reply) => reply.send(message).is_ok(),
            None => false,
        }
    }

    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }
}

pub type Mailbox = mpsc::UnboundedReceiver<Envelope>;

/// Messaging between actors on this and other nodes
#[async_trait]
pub trait Transport: Send + Sync {
    /// Address other nodes use to reach this transport
    fn local_address(&self) -> &str;

    /// Create the mailbox for `path` on this node
    fn register(&self, path: &str) -> MeshworkResult<Mailbox>;

    fn deregister(&self, path: &str);

    /// Fire-and-forget send
    async fn tell(
        &self,
        to: &ActorPath,
        sender: Option<ActorPath>,
        message: ClusterMessage,
    ) -> MeshworkResult<()>;

    /// Request/response send, failing after `timeout`
    async fn ask(
        &self,
        to: &ActorPath,
        sender: Option<ActorPath>,
        message: ClusterMessage,
        timeout: Duration,
    ) -> MeshworkResult<ClusterMessage>;

    /// Reference to `path` on the node at `address`
    fn resolve(&self, address: &str, path: &str) -> ActorPath {
        ActorPath::new(address, path)
    }
}
