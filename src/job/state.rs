//! Job state machine
//!
//! Job states: NOT_STARTED → RUNNING → {SUCCEEDED | FAILED}
//! with NOT_STARTED → FAILED when `run` fails

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Job state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// `run` has not been called, or is still creating resources
    NotStarted,
    /// Worker resources exist; no status received yet
    Running,
    /// The worker reported status 0
    Succeeded,
    /// The worker reported a non-zero status, or `run` failed
    Failed,
}

impl JobState {
    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: JobState) -> bool {
        matches!(
            (self, target),
            (JobState::NotStarted, JobState::Running)
                | (JobState::NotStarted, JobState::Failed)
                | (JobState::Running, JobState::Succeeded)
                | (JobState::Running, JobState::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Terminal state for a reported status code.
    pub fn from_status(status: i32) -> Self {
        if status == clash_protocol::SUCCESS_CODE {
            JobState::Succeeded
        } else {
            JobState::Failed
        }
    }
}

/// State cell shared between a job and its status listeners.
#[derive(Debug, Clone)]
pub(crate) struct SharedState(Arc<Mutex<JobState>>);

impl SharedState {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Mutex::new(JobState::NotStarted)))
    }

    pub(crate) fn get(&self) -> JobState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a transition; invalid ones are ignored.
    pub(crate) fn transition(&self, job: &str, target: JobState) -> bool {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.can_transition_to(target) {
            debug!(job, from = ?*state, to = ?target, "ignoring state transition");
            return false;
        }
        *state = target;
        true
    }
}
