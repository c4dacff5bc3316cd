//! Distributed in-process actor runtime with embedded Lua scripting.
//!
//! See `SPEC_FULL.md` for the full design; `DESIGN.md` for where each part
//! of this crate is grounded.

pub mod actor;
pub mod bridge;
pub mod config;
pub mod discovery;
pub mod error;
pub mod vmpool;

pub use actor::coordinator::Coordinator;
pub use actor::runtime::{ClusterEvent, ClusterStats, DistributedRuntime};
pub use actor::{ActorHandle, ActorMetadata, ActorType, Envelope, RegisteredActor};
pub use bridge::ScriptedActorBridge;
pub use config::Config;
pub use error::{Error, Result};
pub use vmpool::{Lease, VmPool};
