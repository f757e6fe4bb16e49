//! The startup/shutdown sequencer.
//!
//! - `core` - `Orchestrator`: ordered bring-up with port policing
//! - `session` - `Session`: one started fleet, route refresh
//! - `shutdown` - reverse-order teardown and the leftover-process sweep
//! - `lifecycle` - per-service state machine and status events

mod builder;
mod core;
mod lifecycle;
mod session;
mod shutdown;

pub use self::core::Orchestrator;
pub use builder::OrchestratorBuilder;
pub use lifecycle::{LifecycleState, LifecycleTable, ServiceRecord};
pub use session::Session;
