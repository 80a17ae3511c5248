//! Waiting on long-running provider operations.

use clash_protocol::{Operation, OperationScope};
use tracing::debug;

use crate::cloud::ProvisioningApi;
use crate::error::{ClashError, Result};
use crate::poll::{poll_until, PollConfig, PollError};

/// Poll `operation` until it is `DONE`.
///
/// A finished operation carrying an error becomes `ClashError::Provisioning`
/// with the provider payload; running past the poll deadline becomes
/// `ClashError::OperationTimeout`. `what` names the step, e.g.
/// `"create instance template clash-job-1"`.
pub fn wait_for_operation(
    api: &dyn ProvisioningApi,
    project: &str,
    scope: &OperationScope,
    operation: Operation,
    poll: &PollConfig,
    what: &str,
) -> Result<Operation> {
    let name = operation.name.clone();
    let mut current = Some(operation);

    let finished = poll_until(poll, what, || -> Result<Option<Operation>> {
        let op = match current.take() {
            Some(op) => op,
            None => api.get_operation(project, scope, &name)?,
        };
        debug!(operation = %op.name, status = ?op.status, "operation status");
        Ok(op.is_done().then_some(op))
    })
    .map_err(|e| match e {
        PollError::DeadlineExceeded { elapsed } => ClashError::OperationTimeout {
            operation: what.to_string(),
            waited: elapsed,
        },
        PollError::Failed(e) => e,
    })?;

    match finished.failure() {
        Some(error) => Err(ClashError::Provisioning {
            context: what.to_string(),
            error: error.clone(),
        }),
        None => Ok(finished),
    }
}
