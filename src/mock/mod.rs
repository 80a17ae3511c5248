//! In-memory cloud
//!
//! `MockCloud` implements both `ProvisioningApi` and `MessageBus` against
//! in-process state, with failure injection for testing error paths.
//!
//! It enforces the provider rules the orchestrator depends on:
//! - resources appear only once their operation reaches `DONE`
//! - a template referenced by a live group cannot be deleted
//! - a group cannot be created from a missing template
//! - deleted groups linger in listings while their members shut down
//!
//! Workers are simulated with `finish_worker`, which publishes a status
//! message and starts the group's self-removal, like the runner script does.

mod cloud;
mod failure;
mod state;

pub use cloud::MockCloud;
pub use failure::{FailureConfig, FailureInjector, FailureKind, MockOp};
pub use state::{MockCall, MockState};
