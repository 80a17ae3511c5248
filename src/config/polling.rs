//! Polling intervals and deadlines used by a job.

use std::time::Duration;

use crate::poll::PollConfig;

/// How often and how long a job waits on the provider and the message bus.
///
/// The defaults poll at fixed intervals and never give up.
#[derive(Debug, Clone, PartialEq)]
pub struct PollingConfig {
    /// Provider operation polling (create/delete template and group).
    pub operation: PollConfig,
    /// Waiting for a self-removing instance group to disappear.
    pub group_removal: PollConfig,
    /// Longest time a single status pull blocks.
    pub pull_wait: Duration,
    /// Re-check interval of `JobGroup::wait`.
    pub group_wait_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            operation: PollConfig::fixed(Duration::from_secs(1)),
            group_removal: PollConfig::fixed(Duration::from_secs(30)),
            pull_wait: Duration::from_secs(30),
            group_wait_interval: Duration::from_secs(1),
        }
    }
}

impl PollingConfig {
    /// Same interval everywhere; convenient for tests and local fakes.
    pub fn uniform(interval: Duration) -> Self {
        Self {
            operation: PollConfig::fixed(interval),
            group_removal: PollConfig::fixed(interval),
            pull_wait: interval,
            group_wait_interval: interval,
        }
    }

    /// Bound every provider wait by `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.operation.deadline = Some(deadline);
        self.group_removal.deadline = Some(deadline);
        self
    }
}
