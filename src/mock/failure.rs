//! Failure injection for the mock cloud.

use std::collections::HashMap;
use std::time::Duration;

use clash_protocol::OperationError;

/// Mock cloud operations that can be failed or delayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    CreateTopic,
    DeleteTopic,
    ListTopics,
    CreateSubscription,
    DeleteSubscription,
    Pull,
    Acknowledge,
    Publish,
    InsertTemplate,
    DeleteTemplate,
    InsertGroup,
    DeleteGroup,
    GetOperation,
    ListGroups,
    GetImage,
}

/// How an injected failure manifests.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureKind {
    /// The call itself returns an error.
    Reject(String),
    /// The call succeeds but its operation finishes with this error.
    /// Calls that do not return operations treat this like `Reject`.
    OperationError(OperationError),
    /// Only the delay applies.
    None,
}

/// Failure configuration for an operation
#[derive(Debug, Clone)]
pub struct FailureConfig {
    pub kind: FailureKind,
    /// Delay before the call is handled
    pub delay: Option<Duration>,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    pub fn reject(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Reject(message.into()),
            delay: None,
            fail_count: None,
        }
    }

    pub fn operation_error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::OperationError(OperationError::single(code, message)),
            delay: None,
            fail_count: None,
        }
    }

    pub fn delay(duration: Duration) -> Self {
        Self {
            kind: FailureKind::None,
            delay: Some(duration),
            fail_count: None,
        }
    }

    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

/// Per-operation failure configs with call counting.
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<MockOp, FailureConfig>,
    call_counts: HashMap<MockOp, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&mut self, op: MockOp, config: FailureConfig) {
        self.configs.insert(op, config);
        self.call_counts.insert(op, 0);
    }

    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    pub fn clear_op(&mut self, op: MockOp) {
        self.configs.remove(&op);
        self.call_counts.remove(&op);
    }

    /// Count a call and return the failure that applies to it, if any.
    pub fn check(&mut self, op: MockOp) -> Option<FailureConfig> {
        let config = self.configs.get(&op)?;
        let count = self.call_counts.entry(op).or_insert(0);
        *count += 1;

        if let Some(limit) = config.fail_count {
            if *count > limit {
                return None;
            }
        }
        Some(config.clone())
    }
}
