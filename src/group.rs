//! Job groups
//!
//! A `JobGroup` launches one job per added spec, named `{group}-{index}`,
//! and collects each job's status code through its `on_finish` listener.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::cloud::CloudClients;
use crate::config::{JobConfig, PollingConfig};
use crate::error::{ClashError, Result};
use crate::job::{Job, JobRuntimeSpec};
use crate::poll::Deadline;

/// Creates jobs sharing one config and one set of clients.
#[derive(Debug, Clone)]
pub struct JobFactory {
    config: Arc<JobConfig>,
    clients: CloudClients,
    polling: PollingConfig,
}

impl JobFactory {
    pub fn new(config: Arc<JobConfig>, clients: CloudClients) -> Self {
        Self {
            config,
            clients,
            polling: PollingConfig::default(),
        }
    }

    pub fn polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    pub fn polling_config(&self) -> &PollingConfig {
        &self.polling
    }

    /// A job with exactly this name.
    pub fn create(&self, name: &str) -> Job {
        Job::with_name(name, self.config.clone(), self.clients.clone())
            .polling(self.polling.clone())
    }

    /// A job named `{prefix}-clash-job-<random>`.
    pub fn create_with_prefix(&self, prefix: &str) -> Job {
        Job::with_name_prefix(prefix, self.config.clone(), self.clients.clone())
            .polling(self.polling.clone())
    }
}

/// Status codes reported by a group's jobs, at most one per job.
#[derive(Debug, Default)]
pub struct CompletionCodes {
    codes: Mutex<BTreeMap<String, i32>>,
    recorded: Condvar,
}

impl CompletionCodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a job's code. A repeated delivery for the same job is dropped.
    pub fn record(&self, job: &str, code: i32) -> bool {
        let mut codes = self.codes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(first) = codes.get(job) {
            warn!(job, code, first = *first, "dropping duplicate status");
            return false;
        }
        codes.insert(job.to_string(), code);
        self.recorded.notify_all();
        true
    }

    pub fn len(&self) -> usize {
        self.codes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> BTreeMap<String, i32> {
        self.codes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn all_succeeded(&self) -> bool {
        self.snapshot().values().all(|code| *code == clash_protocol::SUCCESS_CODE)
    }

    /// Block until `count` codes are recorded, re-checking every `interval`.
    /// Returns false if `limit` passed first.
    pub fn wait_for(&self, count: usize, interval: Duration, limit: Option<Duration>) -> bool {
        let deadline = Deadline::new(limit);
        let mut codes = self.codes.lock().unwrap_or_else(PoisonError::into_inner);
        while codes.len() < count {
            if deadline.is_expired() {
                return false;
            }
            let (guard, _) = self
                .recorded
                .wait_timeout(codes, deadline.cap(interval))
                .unwrap_or_else(PoisonError::into_inner);
            codes = guard;
        }
        true
    }
}

/// Jobs launched together under one name.
pub struct JobGroup {
    name: String,
    factory: JobFactory,
    pending: Vec<JobRuntimeSpec>,
    jobs: Vec<Job>,
    next_index: usize,
    codes: Arc<CompletionCodes>,
}

impl JobGroup {
    pub fn new(name: impl Into<String>, factory: JobFactory) -> Self {
        Self {
            name: name.into(),
            factory,
            pending: Vec::new(),
            jobs: Vec::new(),
            next_index: 0,
            codes: Arc::new(CompletionCodes::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a job. Nothing is created until `run`.
    pub fn add_job(&mut self, spec: JobRuntimeSpec) {
        self.pending.push(spec);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Launch every queued job.
    ///
    /// Stops at the first job that fails to start; that job has already
    /// rolled back, and the specs after it stay queued.
    pub fn run(&mut self) -> Result<()> {
        let mut pending = std::mem::take(&mut self.pending).into_iter();
        let mut failure = None;
        for spec in pending.by_ref() {
            let index = self.next_index;
            self.next_index += 1;

            let mut job = self.factory.create(&format!("{}-{}", self.name, index));
            if let Err(e) = job.run(&spec, false) {
                warn!(group = %self.name, job = %job.name(), error = %e, "job failed to start");
                failure = Some(e);
                break;
            }

            let codes = self.codes.clone();
            let job_name = job.name().to_string();
            let registered = job.on_finish(move |code| {
                codes.record(&job_name, code);
            });
            info!(group = %self.name, job = %job.name(), "launched job");
            self.jobs.push(job);
            if let Err(e) = registered {
                failure = Some(e);
                break;
            }
        }
        self.pending.extend(pending);

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Block until every launched job reported; true iff all succeeded.
    pub fn wait(&self) -> bool {
        let interval = self.factory.polling_config().group_wait_interval;
        self.codes.wait_for(self.jobs.len(), interval, None);
        self.codes.all_succeeded()
    }

    /// Like `wait`, giving up with `JobTimeout` after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        let interval = self.factory.polling_config().group_wait_interval;
        let started = Instant::now();
        if !self.codes.wait_for(self.jobs.len(), interval, Some(timeout)) {
            return Err(ClashError::JobTimeout {
                waited: started.elapsed(),
            });
        }
        Ok(self.codes.all_succeeded())
    }

    /// Clean up every launched job, in launch order. Failures are collected
    /// and do not stop the remaining jobs.
    pub fn clean_up(&mut self) -> Result<()> {
        let mut failures = Vec::new();
        for job in &mut self.jobs {
            if let Err(e) = job.clean_up() {
                warn!(group = %self.name, job = %job.name(), error = %e, "job cleanup failed");
                failures.push((job.name().to_string(), e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ClashError::Cleanup { failures })
        }
    }

    /// Run `f` with this group, then clean up every launched job.
    ///
    /// An error from `f` wins over a cleanup error.
    pub fn with_cleanup<T, F>(mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut JobGroup) -> Result<T>,
    {
        let result = f(&mut self);
        let cleanup = self.clean_up();
        match (result, cleanup) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup_error)) => {
                warn!(
                    group = %self.name,
                    error = %cleanup_error,
                    "cleanup failed after group error"
                );
                Err(e)
            }
        }
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Codes reported so far, by job name.
    pub fn codes(&self) -> BTreeMap<String, i32> {
        self.codes.snapshot()
    }
}

impl std::fmt::Debug for JobGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobGroup")
            .field("name", &self.name)
            .field("pending", &self.pending.len())
            .field("jobs", &self.jobs.len())
            .field("codes", &self.codes.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_record_first_wins() {
        let codes = CompletionCodes::new();
        assert!(codes.record("a", 0));
        assert!(!codes.record("a", 1));
        assert_eq!(codes.len(), 1);
        assert_eq!(codes.snapshot()["a"], 0);
        assert!(codes.all_succeeded());
    }

    #[test]
    fn test_any_failure() {
        let codes = CompletionCodes::new();
        codes.record("a", 0);
        codes.record("b", 2);
        assert!(!codes.all_succeeded());
    }

    #[test]
    fn test_wait_for_wakes_on_record() {
        let codes = Arc::new(CompletionCodes::new());
        let writer = codes.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.record("a", 0);
            writer.record("b", 0);
        });

        let start = Instant::now();
        assert!(codes.wait_for(2, Duration::from_secs(10), None));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_for_limit() {
        let codes = CompletionCodes::new();
        codes.record("a", 0);
        assert!(!codes.wait_for(2, Duration::from_millis(5), Some(Duration::from_millis(30))));
    }

    #[test]
    fn test_wait_for_nothing() {
        let codes = CompletionCodes::new();
        assert!(codes.wait_for(0, Duration::from_secs(10), None));
        assert!(codes.is_empty());
    }
}
