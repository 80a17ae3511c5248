//! Cloud client interfaces
//!
//! The orchestrator only talks to the provider through two traits:
//! - `ProvisioningApi`: instance templates, managed instance groups, operations
//! - `MessageBus`: topics, subscriptions, pull/acknowledge/publish
//!
//! `gcp` implements both over the public REST APIs; `crate::mock::MockCloud`
//! implements both in memory for tests.

pub mod gcp;

use std::sync::Arc;
use std::time::Duration;

use clash_protocol::{
    InstanceGroupManagerSpec, InstanceTemplateSpec, Operation, OperationScope, ReceivedMessage,
    SubscriptionPath, TopicPath,
};

/// Errors raised by cloud clients
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

pub type CloudResult<T> = Result<T, CloudError>;

/// Compute provisioning operations used by a job.
pub trait ProvisioningApi: Send + Sync {
    fn insert_instance_template(
        &self,
        project: &str,
        template: &InstanceTemplateSpec,
    ) -> CloudResult<Operation>;

    fn delete_instance_template(&self, project: &str, name: &str) -> CloudResult<Operation>;

    fn insert_instance_group_manager(
        &self,
        project: &str,
        zone: &str,
        group: &InstanceGroupManagerSpec,
    ) -> CloudResult<Operation>;

    fn delete_instance_group_manager(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> CloudResult<Operation>;

    fn get_operation(
        &self,
        project: &str,
        scope: &OperationScope,
        name: &str,
    ) -> CloudResult<Operation>;

    /// Names of the instance groups currently present in a zone.
    fn list_instance_groups(&self, project: &str, zone: &str) -> CloudResult<Vec<String>>;

    /// Self link of the newest image in an image family.
    fn get_image_from_family(&self, project: &str, family: &str) -> CloudResult<String>;
}

/// Message bus operations used by a job.
pub trait MessageBus: Send + Sync {
    /// Create a topic. An empty region list creates it without a storage policy.
    fn create_topic(
        &self,
        topic: &TopicPath,
        allowed_persistence_regions: &[String],
    ) -> CloudResult<()>;

    fn delete_topic(&self, topic: &TopicPath) -> CloudResult<()>;

    fn list_topics(&self, project: &str) -> CloudResult<Vec<TopicPath>>;

    fn create_subscription(
        &self,
        subscription: &SubscriptionPath,
        topic: &TopicPath,
    ) -> CloudResult<()>;

    fn delete_subscription(&self, subscription: &SubscriptionPath) -> CloudResult<()>;

    /// Pull at most one message, blocking up to `max_wait`.
    fn pull(
        &self,
        subscription: &SubscriptionPath,
        max_wait: Duration,
    ) -> CloudResult<Option<ReceivedMessage>>;

    fn acknowledge(&self, subscription: &SubscriptionPath, ack_ids: &[String]) -> CloudResult<()>;

    /// Publish raw bytes, returning the message id.
    fn publish(&self, topic: &TopicPath, data: &[u8]) -> CloudResult<String>;
}

/// The pair of clients a job works with. Cheap to clone.
#[derive(Clone)]
pub struct CloudClients {
    pub provisioning: Arc<dyn ProvisioningApi>,
    pub bus: Arc<dyn MessageBus>,
}

impl CloudClients {
    pub fn new(provisioning: Arc<dyn ProvisioningApi>, bus: Arc<dyn MessageBus>) -> Self {
        Self { provisioning, bus }
    }
}

impl std::fmt::Debug for CloudClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudClients").finish_non_exhaustive()
    }
}
