//! Long-running provider operations.
//!
//! Every create/delete call on the provisioning API returns an `Operation`
//! handle which has to be polled until its status is `DONE`. A finished
//! operation may still carry an `error` payload.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a provider operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
}

impl OperationStatus {
    /// Returns true once the operation can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Done)
    }
}

/// Where an operation lives. Template operations are global, group
/// operations are zonal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationScope {
    Global,
    Zone(String),
}

impl OperationScope {
    /// Relative URL segment for the operations collection of this scope.
    pub fn collection(&self, project: &str) -> String {
        match self {
            OperationScope::Global => format!("projects/{}/global/operations", project),
            OperationScope::Zone(zone) => {
                format!("projects/{}/zones/{}/operations", project, zone)
            }
        }
    }
}

/// One entry of an operation's error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationErrorItem {
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Error payload attached to a finished operation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub errors: Vec<OperationErrorItem>,
}

impl OperationError {
    /// Build a payload with a single error entry.
    pub fn single(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            errors: vec![OperationErrorItem {
                code: code.into(),
                message: message.into(),
                location: None,
            }],
        }
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "unspecified provider error");
        }
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// A provider operation as returned by insert/delete/get calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
}

impl Operation {
    /// A freshly submitted operation.
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: OperationStatus::Pending,
            operation_type: None,
            target_link: None,
            error: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status.is_terminal()
    }

    /// The error payload, if the operation finished unsuccessfully.
    pub fn failure(&self) -> Option<&OperationError> {
        if self.is_done() {
            self.error.as_ref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_running_operation() {
        let json = r#"{
            "kind": "compute#operation",
            "name": "operation-1699-abc",
            "operationType": "insert",
            "targetLink": "https://compute.googleapis.com/compute/v1/projects/p/global/instanceTemplates/t",
            "status": "RUNNING"
        }"#;
        let op: Operation = serde_json::from_str(json).unwrap();
        assert_eq!(op.name, "operation-1699-abc");
        assert_eq!(op.status, OperationStatus::Running);
        assert_eq!(op.operation_type.as_deref(), Some("insert"));
        assert!(!op.is_done());
        assert!(op.failure().is_none());
    }

    #[test]
    fn test_decode_failed_operation() {
        let json = r#"{
            "name": "operation-2",
            "status": "DONE",
            "error": {"errors": [{"code": "QUOTA_EXCEEDED", "message": "Quota 'CPUS' exceeded."}]}
        }"#;
        let op: Operation = serde_json::from_str(json).unwrap();
        let failure = op.failure().expect("finished with error");
        assert_eq!(failure.errors[0].code, "QUOTA_EXCEEDED");
        assert_eq!(failure.to_string(), "QUOTA_EXCEEDED: Quota 'CPUS' exceeded.");
    }

    #[test]
    fn test_error_on_unfinished_operation_is_not_a_failure() {
        let mut op = Operation::pending("op");
        op.error = Some(OperationError::single("X", "y"));
        assert!(op.failure().is_none());
    }

    #[test]
    fn test_scope_collection() {
        assert_eq!(
            OperationScope::Global.collection("p"),
            "projects/p/global/operations"
        );
        assert_eq!(
            OperationScope::Zone("europe-west1-b".into()).collection("p"),
            "projects/p/zones/europe-west1-b/operations"
        );
    }

    #[test]
    fn test_empty_error_display() {
        assert_eq!(OperationError::default().to_string(), "unspecified provider error");
    }
}
