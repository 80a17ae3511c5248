//! Job lifecycle
//!
//! A `Job` owns one status topic, one status subscription, one instance
//! template and one managed instance group, created in that order by `run`.
//!
//! Teardown runs in reverse dependency order: the group must be gone from the
//! zone listing before its template can be deleted. A failed `run` removes
//! the group, topic and subscription it created and leaves the template
//! behind.

mod listener;
mod runtime;
mod state;

pub use listener::StatusListener;
pub use runtime::JobRuntimeSpec;
pub use state::JobState;

use std::sync::Arc;
use std::time::Duration;

use clash_protocol::{
    InstanceGroupManagerSpec, InstanceTemplateSpec, OperationScope, StatusMessage,
    SubscriptionPath, TopicPath,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cloud::{CloudClients, CloudError};
use crate::config::{JobConfig, PollingConfig};
use crate::error::{ClashError, Result};
use crate::operation::wait_for_operation;
use crate::poll::{poll_until, Deadline, PollError};
use crate::render::{MachineConfig, TemplateRenderer};

use state::SharedState;

/// Provider resources a job has created so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobResources {
    pub topic: Option<TopicPath>,
    pub subscription: Option<SubscriptionPath>,
    pub template: Option<String>,
    pub group: Option<String>,
}

/// One worker, from provisioning to teardown.
pub struct Job {
    name: String,
    config: Arc<JobConfig>,
    clients: CloudClients,
    polling: PollingConfig,
    /// Default `attach` timeout for `run(.., true)`
    timeout: Option<Duration>,
    state: SharedState,
    /// `run` was called
    run_attempted: bool,
    /// All four resources were created
    started: bool,
    cleaned_up: bool,
    resources: JobResources,
    listeners: Vec<StatusListener>,
}

/// `clash-job-` plus 16 hex chars of a random UUID.
fn generate_name(prefix: Option<&str>) -> String {
    let id = Uuid::new_v4().simple().to_string();
    let name = format!("clash-job-{}", &id[..16]);
    match prefix {
        Some(prefix) => format!("{}-{}", prefix, name),
        None => name,
    }
}

impl Job {
    pub fn new(config: Arc<JobConfig>, clients: CloudClients) -> Self {
        Self::with_name(generate_name(None), config, clients)
    }

    pub fn with_name_prefix(prefix: &str, config: Arc<JobConfig>, clients: CloudClients) -> Self {
        Self::with_name(generate_name(Some(prefix)), config, clients)
    }

    pub fn with_name(
        name: impl Into<String>,
        config: Arc<JobConfig>,
        clients: CloudClients,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            clients,
            polling: PollingConfig::default(),
            timeout: None,
            state: SharedState::new(),
            run_attempted: false,
            started: false,
            cleaned_up: false,
            resources: JobResources::default(),
            listeners: Vec::new(),
        }
    }

    pub fn polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    /// Limit how long `run(.., true)` waits for the status.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn state(&self) -> JobState {
        self.state.get()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn resources(&self) -> &JobResources {
        &self.resources
    }

    // === Creation ===

    /// Create the job's resources and start its worker.
    ///
    /// With `wait_for_result`, blocks on `attach` using the job's timeout and
    /// returns the worker's status. Any failure rolls back what was created
    /// and returns the original error.
    pub fn run(
        &mut self,
        spec: &JobRuntimeSpec,
        wait_for_result: bool,
    ) -> Result<Option<StatusMessage>> {
        if self.run_attempted {
            return Err(ClashError::JobAlreadyStarted(self.name.clone()));
        }
        self.run_attempted = true;

        if let Err(e) = self.config.validate() {
            self.state.transition(&self.name, JobState::Failed);
            return Err(ClashError::Configuration(e.to_string()));
        }

        info!(job = %self.name, script = %spec.script(), "starting job");
        let template = match self.render_template(spec) {
            Ok(template) => template,
            Err(e) => {
                self.state.transition(&self.name, JobState::Failed);
                return Err(e);
            }
        };

        if let Err(e) = self.provision(template) {
            self.roll_back();
            self.state.transition(&self.name, JobState::Failed);
            return Err(e);
        }
        self.started = true;
        self.state.transition(&self.name, JobState::Running);
        info!(job = %self.name, zone = %self.config.zone, "job running");

        if !wait_for_result {
            return Ok(None);
        }
        match self.attach(self.timeout) {
            Ok(status) => Ok(Some(status)),
            Err(e) => {
                self.roll_back();
                self.state.transition(&self.name, JobState::Failed);
                Err(e)
            }
        }
    }

    fn render_template(&self, spec: &JobRuntimeSpec) -> Result<InstanceTemplateSpec> {
        let renderer = TemplateRenderer::new()?;
        let cloud_init = spec.cloud_init(&self.name).render(&renderer, &self.config)?;

        let disk = &self.config.disk_image;
        let source_image = self
            .clients
            .provisioning
            .get_image_from_family(&disk.project, &disk.family)?;
        debug!(job = %self.name, image = %source_image, "resolved boot image");

        let properties = MachineConfig::new(&self.name, &source_image, &cloud_init)
            .build(&renderer, &self.config)?;
        Ok(InstanceTemplateSpec {
            name: self.name.clone(),
            properties,
        })
    }

    fn provision(&mut self, template: InstanceTemplateSpec) -> Result<()> {
        let project = self.config.project_id.clone();
        let bus = self.clients.bus.clone();
        let provisioning = self.clients.provisioning.clone();

        let topic = TopicPath::new(&project, &self.name);
        bus.create_topic(&topic, &self.config.allowed_persistence_regions)
            .map_err(|e| ClashError::messaging(format!("create topic {}", topic), e))?;
        self.resources.topic = Some(topic.clone());
        info!(job = %self.name, topic = %topic, "created status topic");

        // Listing can lag behind creation; subscribing to a topic the bus
        // does not list yet is not attempted.
        let topics = bus
            .list_topics(&project)
            .map_err(|e| ClashError::messaging(format!("list topics of {}", project), e))?;
        if !topics.contains(&topic) {
            return Err(ClashError::Configuration(format!(
                "could not find status topic for job {}",
                self.name
            )));
        }
        let subscription = SubscriptionPath::new(&project, &self.name);
        bus.create_subscription(&subscription, &topic).map_err(|e| {
            ClashError::messaging(format!("create subscription {}", subscription), e)
        })?;
        self.resources.subscription = Some(subscription.clone());
        info!(job = %self.name, subscription = %subscription, "created status subscription");

        let what = format!("create instance template {}", template.name);
        let op = provisioning
            .insert_instance_template(&project, &template)
            .map_err(|e| ClashError::provisioning_request(&what, e))?;
        wait_for_operation(
            provisioning.as_ref(),
            &project,
            &OperationScope::Global,
            op,
            &self.polling.operation,
            &what,
        )?;
        self.resources.template = Some(template.name.clone());
        info!(job = %self.name, template = %template.name, "created instance template");

        let group = InstanceGroupManagerSpec::for_template(&self.name, 1);
        let what = format!("create instance group {}", group.name);
        let op = provisioning
            .insert_instance_group_manager(&project, &self.config.zone, &group)
            .map_err(|e| ClashError::provisioning_request(&what, e))?;
        wait_for_operation(
            provisioning.as_ref(),
            &project,
            &self.zone_scope(),
            op,
            &self.polling.operation,
            &what,
        )?;
        self.resources.group = Some(group.name.clone());
        info!(job = %self.name, group = %group.name, "created instance group");

        Ok(())
    }

    /// Best-effort removal of the group, topic and subscription, in that order.
    fn roll_back(&mut self) {
        self.stop_listeners();

        if let Some(group) = self.resources.group.clone() {
            match self.remove_group(&group) {
                Ok(()) => info!(job = %self.name, group = %group, "rolled back instance group"),
                Err(e) => warn!(
                    job = %self.name,
                    resource = "instance group",
                    name = %group,
                    error = %e,
                    "could not remove resource during rollback"
                ),
            }
        }
        if let Some(topic) = self.resources.topic.clone() {
            match self.clients.bus.delete_topic(&topic) {
                Ok(()) => {
                    self.resources.topic = None;
                    info!(job = %self.name, topic = %topic, "rolled back status topic");
                }
                Err(e) => warn!(
                    job = %self.name,
                    resource = "topic",
                    name = %topic,
                    error = %e,
                    "could not remove resource during rollback"
                ),
            }
        }
        if let Some(subscription) = self.resources.subscription.clone() {
            match self.clients.bus.delete_subscription(&subscription) {
                Ok(()) => {
                    self.resources.subscription = None;
                    info!(
                        job = %self.name,
                        subscription = %subscription,
                        "rolled back status subscription"
                    );
                }
                Err(e) => warn!(
                    job = %self.name,
                    resource = "subscription",
                    name = %subscription,
                    error = %e,
                    "could not remove resource during rollback"
                ),
            }
        }
    }

    // === Completion ===

    fn require_subscription(&self) -> Result<&SubscriptionPath> {
        match (&self.resources.subscription, self.started && !self.cleaned_up) {
            (Some(subscription), true) => Ok(subscription),
            _ => Err(ClashError::JobNotStarted(self.name.clone())),
        }
    }

    /// Block until the worker reports its status.
    ///
    /// The message is acknowledged before it is returned. `None` waits
    /// forever; a message arriving after the timeout is left unacknowledged.
    pub fn attach(&self, timeout: Option<Duration>) -> Result<StatusMessage> {
        let subscription = self.require_subscription()?;
        let bus = &self.clients.bus;
        let deadline = Deadline::new(timeout);

        loop {
            let wait = deadline.cap(self.polling.pull_wait);
            let received = bus
                .pull(subscription, wait)
                .map_err(|e| ClashError::messaging(format!("pull {}", subscription), e))?;

            if deadline.is_expired() {
                if received.is_some() {
                    debug!(job = %self.name, "status arrived after the deadline");
                }
                return Err(ClashError::JobTimeout {
                    waited: deadline.elapsed(),
                });
            }

            if let Some(received) = received {
                bus.acknowledge(subscription, std::slice::from_ref(&received.ack_id))
                    .map_err(|e| {
                        ClashError::messaging(format!("acknowledge {}", subscription), e)
                    })?;
                let status = StatusMessage::from_slice(&received.message.decode_data()?)?;
                info!(job = %self.name, status = status.status, "job finished");
                self.state.transition(&self.name, JobState::from_status(status.status));
                return Ok(status);
            }
        }
    }

    /// Call `callback` with the status code of every status message, on a
    /// background thread, until the job is cleaned up.
    pub fn on_finish<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(i32) + Send + 'static,
    {
        let subscription = self.require_subscription()?.clone();
        let job = self.name.clone();
        let state = self.state.clone();

        let listener = StatusListener::spawn(
            &self.name,
            self.clients.bus.clone(),
            subscription,
            self.polling.pull_wait,
            move |status| {
                state.transition(&job, JobState::from_status(status.status));
                callback(status.status);
            },
        );
        self.listeners.push(listener);
        Ok(())
    }

    fn stop_listeners(&mut self) {
        for mut listener in self.listeners.drain(..) {
            listener.stop();
        }
    }

    // === Teardown ===

    /// Delete what the finished job left behind.
    ///
    /// Waits for the self-removing group to leave the zone, deletes the
    /// template, then the subscription and topic. A job whose `run` failed
    /// has nothing to clean up. Calling it again after success is a no-op.
    pub fn clean_up(&mut self) -> Result<()> {
        if !self.run_attempted {
            return Err(ClashError::JobNotStarted(self.name.clone()));
        }
        self.clean_up_started()
    }

    fn clean_up_started(&mut self) -> Result<()> {
        if !self.started || self.cleaned_up {
            return Ok(());
        }
        self.stop_listeners();

        if let Some(template) = self.resources.template.clone() {
            self.wait_for_group_removal()?;
            self.resources.group = None;
            self.remove_template(&template)?;
            self.resources.template = None;
        }
        if let Some(subscription) = self.resources.subscription.clone() {
            ignore_not_found(self.clients.bus.delete_subscription(&subscription)).map_err(|e| {
                ClashError::messaging(format!("delete subscription {}", subscription), e)
            })?;
            self.resources.subscription = None;
        }
        if let Some(topic) = self.resources.topic.clone() {
            ignore_not_found(self.clients.bus.delete_topic(&topic))
                .map_err(|e| ClashError::messaging(format!("delete topic {}", topic), e))?;
            self.resources.topic = None;
        }

        self.cleaned_up = true;
        info!(job = %self.name, "job cleaned up");
        Ok(())
    }

    /// Stop a running job: delete its group, then clean up.
    pub fn cancel(&mut self) -> Result<()> {
        if !self.started || self.cleaned_up {
            return Err(ClashError::JobNotStarted(self.name.clone()));
        }
        self.stop_listeners();
        warn!(job = %self.name, "cancelling job");

        let active = self
            .clients
            .provisioning
            .list_instance_groups(&self.config.project_id, &self.config.zone)?;
        if active.contains(&self.name) {
            self.remove_group(&self.name)?;
        }
        self.state.transition(&self.name, JobState::Failed);
        self.clean_up_started()
    }

    /// Run `f` with this job, then clean up whatever it started.
    ///
    /// An error from `f` wins over a cleanup error.
    pub fn with_cleanup<T, F>(mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Job) -> Result<T>,
    {
        let result = f(&mut self);
        let cleanup = self.clean_up_started();
        match (result, cleanup) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup_error)) => {
                warn!(job = %self.name, error = %cleanup_error, "cleanup failed after job error");
                Err(e)
            }
        }
    }

    fn wait_for_group_removal(&self) -> Result<()> {
        let provisioning = &self.clients.provisioning;
        let what = format!("removal of instance group {}", self.name);
        poll_until(&self.polling.group_removal, &what, || -> Result<Option<()>> {
            let active =
                provisioning.list_instance_groups(&self.config.project_id, &self.config.zone)?;
            if active.contains(&self.name) {
                debug!(job = %self.name, "instance group is still active");
                return Ok(None);
            }
            Ok(Some(()))
        })
        .map_err(|e| match e {
            PollError::DeadlineExceeded { elapsed } => ClashError::OperationTimeout {
                operation: what.clone(),
                waited: elapsed,
            },
            PollError::Failed(e) => e,
        })
    }

    fn remove_group(&self, group: &str) -> Result<()> {
        let provisioning = self.clients.provisioning.as_ref();
        let what = format!("delete instance group {}", group);
        let op = provisioning
            .delete_instance_group_manager(&self.config.project_id, &self.config.zone, group)
            .map_err(|e| ClashError::provisioning_request(&what, e))?;
        wait_for_operation(
            provisioning,
            &self.config.project_id,
            &self.zone_scope(),
            op,
            &self.polling.operation,
            &what,
        )?;
        debug!(job = %self.name, group, "removed instance group");
        Ok(())
    }

    fn remove_template(&self, template: &str) -> Result<()> {
        let provisioning = self.clients.provisioning.as_ref();
        let what = format!("delete instance template {}", template);
        let op = provisioning
            .delete_instance_template(&self.config.project_id, template)
            .map_err(|e| ClashError::provisioning_request(&what, e))?;
        wait_for_operation(
            provisioning,
            &self.config.project_id,
            &OperationScope::Global,
            op,
            &self.polling.operation,
            &what,
        )?;
        debug!(job = %self.name, template, "removed instance template");
        Ok(())
    }

    fn zone_scope(&self) -> OperationScope {
        OperationScope::Zone(self.config.zone.clone())
    }
}

fn ignore_not_found(
    result: std::result::Result<(), CloudError>,
) -> std::result::Result<(), CloudError> {
    match result {
        Err(CloudError::NotFound(_)) => Ok(()),
        other => other,
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("started", &self.started)
            .field("resources", &self.resources)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCloud;

    fn job(cloud: &MockCloud) -> Job {
        Job::new(Arc::new(JobConfig::default()), cloud.clients())
            .polling(PollingConfig::uniform(Duration::from_millis(2)))
    }

    #[test]
    fn test_generated_name() {
        let name = generate_name(None);
        assert!(name.starts_with("clash-job-"));
        assert_eq!(name.len(), "clash-job-".len() + 16);
        assert!(name["clash-job-".len()..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_name(None), generate_name(None));
    }

    #[test]
    fn test_prefixed_name() {
        let cloud = MockCloud::new();
        let job = Job::with_name_prefix("nightly", Arc::new(JobConfig::default()), cloud.clients());
        assert!(job.name().starts_with("nightly-clash-job-"));
    }

    #[test]
    fn test_run_without_wait_records_resources() {
        let cloud = MockCloud::new();
        let mut job = job(&cloud);
        let result = job.run(&JobRuntimeSpec::new(["echo", "hi"]), false).unwrap();

        assert!(result.is_none());
        assert!(job.is_started());
        assert_eq!(job.state(), JobState::Running);
        let resources = job.resources();
        assert_eq!(resources.topic.as_ref().unwrap().name, job.name());
        assert_eq!(resources.subscription.as_ref().unwrap().name, job.name());
        assert_eq!(resources.template.as_deref(), Some(job.name()));
        assert_eq!(resources.group.as_deref(), Some(job.name()));
        assert_eq!(cloud.group_target_size(job.name()), Some(1));
    }

    #[test]
    fn test_template_carries_cloud_init() {
        let cloud = MockCloud::new();
        let mut job = job(&cloud);
        job.run(&JobRuntimeSpec::new(["echo", "hello world"]), false).unwrap();

        let properties = cloud.template_properties(job.name()).unwrap();
        let payload = properties["metadata"]["items"][0]["value"].as_str().unwrap();
        assert!(payload.starts_with("#cloud-config"));
        assert!(payload.contains("echo 'hello world'"));
        assert!(properties["disks"][0]["initializeParams"]["sourceImage"]
            .as_str()
            .unwrap()
            .contains("cos-stable"));
    }

    #[test]
    fn test_script_file_reaches_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.sh");
        let body = "set -e\ncd /data\npython train.py --epochs \"$EPOCHS\"\n";
        std::fs::write(&path, body).unwrap();

        let cloud = MockCloud::new();
        let mut job = job(&cloud);
        let spec = JobRuntimeSpec::from_script_file(&path).unwrap().with_env("EPOCHS", "3");
        job.run(&spec, false).unwrap();

        let properties = cloud.template_properties(job.name()).unwrap();
        let payload = properties["metadata"]["items"][0]["value"].as_str().unwrap();
        for line in body.lines() {
            assert!(payload.contains(&format!("      {}\n", line)), "missing line: {}", line);
        }
        assert!(payload.contains("EPOCHS=3"));
    }

    #[test]
    fn test_invalid_config_makes_no_calls() {
        let cloud = MockCloud::new();
        let mut config = JobConfig::default();
        config.zone = "us-central1-a".to_string();
        let mut job = Job::new(Arc::new(config), cloud.clients());

        let err = job.run(&JobRuntimeSpec::new(["true"]), false).unwrap_err();
        assert!(matches!(err, ClashError::Configuration(_)));
        assert!(cloud.calls().is_empty());
        assert_eq!(job.state(), JobState::Failed);
    }

    #[test]
    fn test_second_run_rejected() {
        let cloud = MockCloud::new();
        let mut job = job(&cloud);
        job.run(&JobRuntimeSpec::new(["true"]), false).unwrap();
        let calls = cloud.calls().len();

        let err = job.run(&JobRuntimeSpec::new(["true"]), false).unwrap_err();
        assert!(matches!(err, ClashError::JobAlreadyStarted(_)));
        assert_eq!(cloud.calls().len(), calls);
    }

    #[test]
    fn test_clean_up_after_failed_run_is_noop() {
        let cloud = MockCloud::new();
        cloud.inject_error(crate::mock::MockOp::CreateTopic, "denied");
        let mut job = job(&cloud);
        assert!(job.run(&JobRuntimeSpec::new(["true"]), false).is_err());

        let calls = cloud.calls().len();
        job.clean_up().unwrap();
        assert_eq!(cloud.calls().len(), calls);
    }

    #[test]
    fn test_ignore_not_found() {
        assert!(ignore_not_found(Err(CloudError::NotFound("x".into()))).is_ok());
        assert!(ignore_not_found(Err(CloudError::Rejected("x".into()))).is_err());
    }
}
