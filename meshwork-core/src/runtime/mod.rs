//! Contracts consumed from the hosting actor runtime
//!
//! Membership code talks to its environment only through these traits:
//! - [`Transport`] for fire-and-forget and request/response messaging
//! - [`Scheduler`] for periodic and one-shot ticks
//! - [`Clock`] for wall-clock readings
//! - [`ActorRuntime`] for spawning child actors such as singletons
//!
//! In-process implementations are provided so a whole cluster can run inside
//! one tokio runtime.

pub mod actor;
pub mod clock;
pub mod memory;
pub mod scheduler;
pub mod transport;

pub use actor::{Actor, ActorContext, ActorHandle, ActorRuntime};
pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::{InMemoryNetwork, InMemoryTransport};
pub use scheduler::{ManualScheduler, ScheduledTask, Scheduler, TokioScheduler};
pub use transport::{ActorPath, Envelope, Mailbox, Transport};
