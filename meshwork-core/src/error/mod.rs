//! Error handling for Meshwork
//!
//! Errors fall into two groups:
//!
//! ### Caller-facing rejections
//! Returned to whoever triggered an operation: a joining node, an admin tool or
//! a local caller of [`ClusterHandle`](crate::cluster::ClusterHandle). These map
//! one-to-one onto [`RejectKind`](crate::cluster::messages::RejectKind) so they
//! survive a trip across the wire.
//!
//! ### Background failures
//! A failed gossip send or an unreachable seed is logged and skipped. The
//! protocol converges again on the next round, so these never bubble up out of
//! the node actor.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                 Meshwork Error Taxonomy                   │
//! ├───────────────────────────────────────────────────────────┤
//! │ Admission            │ Protocol            │ Runtime      │
//! │ • NameMismatch       │ • ProtocolVersion   │ • Timeout    │
//! │ • NodeStatusMismatch │ • InvalidVersion    │ • Transport  │
//! │ • JoinAuthFailed     │   Vector            │ • ActorNot   │
//! │ • JoinRateLimited    │ • Codec             │   Found      │
//! │ • JoinNotAllowed     │                     │ • Cluster    │
//! │ • NotInQuorum        │ Configuration       │   Disabled   │
//! │ • AdminAuthFailed    │                     │              │
//! └───────────────────────────────────────────────────────────┘
//! ```

mod constructors;
mod types;

pub use types::{MeshworkError, MeshworkResult, Result};
