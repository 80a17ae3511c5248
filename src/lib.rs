//! clash - ephemeral cloud jobs
//!
//! A job runs a shell command on a single short-lived VM. `Job::run`
//! creates a status topic and subscription, an instance template carrying
//! the rendered cloud-init, and a managed instance group of size one. The
//! worker publishes `{"status": N}` when the command exits and deletes its
//! own group; `Job::clean_up` removes what is left.

pub mod cloud;
pub mod config;
pub mod error;
pub mod group;
pub mod job;
pub mod mock;
pub mod operation;
pub mod poll;
pub mod render;

pub use clash_protocol::{StatusMessage, SUCCESS_CODE};
pub use cloud::{CloudClients, CloudError, MessageBus, ProvisioningApi};
pub use config::{JobConfig, JobConfigBuilder, PollingConfig};
pub use error::{ClashError, Result};
pub use group::{CompletionCodes, JobFactory, JobGroup};
pub use job::{Job, JobResources, JobRuntimeSpec, JobState};
pub use poll::PollConfig;
pub use render::{translate_args_to_script, TemplateRenderer};
