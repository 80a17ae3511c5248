//! Clash Protocol Types
//!
//! Wire types exchanged between the orchestrator, the cloud provider APIs and
//! the workers it boots: long-running operations, resource paths, message bus
//! envelopes, and the status message a worker publishes when it finishes.

pub mod error;
pub mod operation;
pub mod pubsub;
pub mod resource;
pub mod status;

pub use error::ProtocolError;
pub use operation::{Operation, OperationError, OperationErrorItem, OperationScope, OperationStatus};
pub use pubsub::{PubsubMessage, ReceivedMessage};
pub use resource::{InstanceGroupManagerSpec, InstanceTemplateSpec, SubscriptionPath, TopicPath};
pub use status::{StatusMessage, SUCCESS_CODE};
