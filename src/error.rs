//! Error taxonomy for job orchestration.

use std::time::Duration;

use clash_protocol::{OperationError, ProtocolError};

use crate::cloud::CloudError;
use crate::config::ConfigError;
use crate::render::RenderError;

/// Errors surfaced by `Job` and `JobGroup`.
#[derive(Debug, thiserror::Error)]
pub enum ClashError {
    /// A provider operation finished with an error payload, or the provider
    /// refused to start it.
    #[error("{context} failed: {error}")]
    Provisioning {
        context: String,
        error: OperationError,
    },

    /// A bounded wait on a provider operation ran out.
    #[error("{operation} did not finish within {}s", .waited.as_secs())]
    OperationTimeout { operation: String, waited: Duration },

    /// Topic or subscription creation/deletion failed.
    #[error("{context}: {source}")]
    Messaging {
        context: String,
        #[source]
        source: CloudError,
    },

    /// The environment does not look the way the job expects.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("job {0} is not running")]
    JobNotStarted(String),

    #[error("job {0} was already started")]
    JobAlreadyStarted(String),

    /// `attach` gave up waiting for the job's status.
    #[error("the job took longer than {:.1} seconds", .waited.as_secs_f64())]
    JobTimeout { waited: Duration },

    #[error("invalid status payload: {0}")]
    StatusPayload(#[from] ProtocolError),

    #[error("failed to render boot configuration: {0}")]
    Render(#[from] RenderError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("provider request failed: {0}")]
    Cloud(#[from] CloudError),

    /// One or more jobs of a group failed to clean up.
    #[error("cleanup failed for {}", failed_jobs(.failures))]
    Cleanup { failures: Vec<(String, ClashError)> },
}

fn failed_jobs(failures: &[(String, ClashError)]) -> String {
    failures
        .iter()
        .map(|(job, e)| format!("{} ({})", job, e))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ClashError {
    pub(crate) fn messaging(context: impl Into<String>, source: CloudError) -> Self {
        ClashError::Messaging {
            context: context.into(),
            source,
        }
    }

    /// A provider request that was refused before an operation existed.
    pub(crate) fn provisioning_request(context: impl Into<String>, source: CloudError) -> Self {
        ClashError::Provisioning {
            context: context.into(),
            error: OperationError::single("REQUEST_REJECTED", source.to_string()),
        }
    }

    /// Process exit code used by the CLI for orchestration failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            ClashError::Configuration(_) | ClashError::Config(_) => 64,
            ClashError::JobTimeout { .. } | ClashError::OperationTimeout { .. } => 124,
            ClashError::Provisioning { .. } => 70,
            ClashError::Messaging { .. } => 71,
            ClashError::Cloud(_) => 69,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClashError>;
