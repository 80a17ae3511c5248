//! Mock cloud implementation

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use clash_protocol::{
    InstanceGroupManagerSpec, InstanceTemplateSpec, Operation, OperationError, OperationScope,
    ReceivedMessage, StatusMessage, SubscriptionPath, TopicPath,
};

use crate::cloud::{CloudClients, CloudError, CloudResult, MessageBus, ProvisioningApi};

use super::failure::{FailureConfig, FailureInjector, FailureKind, MockOp};
use super::state::{MockCall, MockState};

/// In-memory provider implementing both cloud client traits.
///
/// Clones share state, so a test can keep one handle for inspection while a
/// job holds another through `clients()`.
#[derive(Clone)]
pub struct MockCloud {
    state: Arc<Mutex<MockState>>,
    /// Signalled whenever a message is published or redelivered
    messages: Arc<Condvar>,
    failures: Arc<Mutex<FailureInjector>>,
}

impl Default for MockCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCloud {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::new())),
            messages: Arc::new(Condvar::new()),
            failures: Arc::new(Mutex::new(FailureInjector::new())),
        }
    }

    /// Client handles backed by this mock.
    pub fn clients(&self) -> CloudClients {
        let shared = Arc::new(self.clone());
        CloudClients::new(shared.clone(), shared)
    }

    // === Test configuration ===

    /// Fail or delay an operation.
    pub fn inject_failure(&self, op: MockOp, config: FailureConfig) {
        self.failures.lock().unwrap().inject(op, config);
    }

    /// Make every call of an operation return an error.
    pub fn inject_error(&self, op: MockOp, message: &str) {
        self.inject_failure(op, FailureConfig::reject(message));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Number of RUNNING answers before an operation completes.
    pub fn set_operation_polls(&self, polls: u32) {
        self.state.lock().unwrap().operation_polls = polls;
    }

    /// Number of listings a deleted group keeps showing up in.
    pub fn set_group_removal_polls(&self, polls: u32) {
        self.state.lock().unwrap().group_removal_polls = polls;
    }

    /// Make `list_topics` return nothing, as if listing lagged behind creation.
    pub fn hide_topics_from_listing(&self, hide: bool) {
        self.state.lock().unwrap().hide_topics = hide;
    }

    // === Worker simulation ===

    /// Publish a status to the job's topic.
    pub fn publish_status(&self, job_name: &str, status: i32) -> CloudResult<String> {
        let payload = StatusMessage::new(status).to_vec();
        self.publish_raw(job_name, &payload)
    }

    /// Publish arbitrary bytes to the job's topic.
    pub fn publish_raw(&self, job_name: &str, payload: &[u8]) -> CloudResult<String> {
        let mut state = self.state.lock().unwrap();
        let topic = topic_for_job(&state, job_name)?;
        let id = state.publish(&topic, payload)?;
        self.messages.notify_all();
        Ok(id)
    }

    /// Behave like the runner script at exit: report the status, then remove
    /// the job's own group.
    pub fn finish_worker(&self, job_name: &str, status: i32) -> CloudResult<()> {
        self.publish_status(job_name, status)?;
        self.state.lock().unwrap().begin_group_removal(job_name);
        Ok(())
    }

    /// Make every unacknowledged message deliverable again.
    pub fn redeliver_unacked(&self) {
        self.state.lock().unwrap().redeliver_unacked();
        self.messages.notify_all();
    }

    // === Inspection ===

    pub fn topics(&self) -> Vec<String> {
        self.state.lock().unwrap().topics.keys().cloned().collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().unwrap().subscriptions.keys().cloned().collect()
    }

    pub fn templates(&self) -> Vec<String> {
        self.state.lock().unwrap().templates.keys().cloned().collect()
    }

    /// Template properties as they were submitted.
    pub fn template_properties(&self, name: &str) -> Option<serde_json::Value> {
        self.state.lock().unwrap().templates.get(name).cloned()
    }

    /// Groups present, including ones being removed.
    pub fn groups(&self) -> Vec<String> {
        self.state.lock().unwrap().groups.keys().cloned().collect()
    }

    pub fn group_target_size(&self, name: &str) -> Option<u32> {
        self.state.lock().unwrap().groups.get(name).map(|g| g.target_size)
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn removal_calls(&self) -> Vec<MockCall> {
        self.calls().into_iter().filter(MockCall::is_removal).collect()
    }

    /// Messages delivered on a subscription but not yet acknowledged.
    pub fn unacked_count(&self, subscription: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .get(subscription)
            .map(|s| s.outstanding.len())
            .unwrap_or(0)
    }

    /// Messages waiting for delivery on a subscription.
    pub fn queued_count(&self, subscription: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .get(subscription)
            .map(|s| s.queue.len())
            .unwrap_or(0)
    }

    /// True if nothing this mock created is left.
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.topics.is_empty()
            && state.subscriptions.is_empty()
            && state.templates.is_empty()
            && state.groups.is_empty()
    }

    // === Call handling ===

    /// Record a call, apply any injected delay, and decide its fate.
    ///
    /// `Ok(Some(_))` means the call goes through but its operation must fail.
    fn begin(&self, op: MockOp, call: MockCall) -> CloudResult<Option<OperationError>> {
        self.state.lock().unwrap().calls.push(call);

        let failure = self.failures.lock().unwrap().check(op);
        let Some(failure) = failure else {
            return Ok(None);
        };
        if let Some(delay) = failure.delay {
            thread::sleep(delay);
        }
        match failure.kind {
            FailureKind::Reject(message) => Err(CloudError::Rejected(message)),
            FailureKind::OperationError(error) => Ok(Some(error)),
            FailureKind::None => Ok(None),
        }
    }

    /// Like `begin`, for calls that do not produce an operation.
    fn begin_call(&self, op: MockOp, call: MockCall) -> CloudResult<MutexGuard<'_, MockState>> {
        if let Some(error) = self.begin(op, call)? {
            return Err(CloudError::Rejected(error.to_string()));
        }
        Ok(self.state.lock().unwrap())
    }
}

fn topic_for_job(state: &MockState, job_name: &str) -> CloudResult<String> {
    let suffix = format!("/topics/{}", job_name);
    state
        .topics
        .keys()
        .find(|path| path.ends_with(&suffix))
        .cloned()
        .ok_or_else(|| CloudError::NotFound(format!("no topic for job {}", job_name)))
}

/// Pub/Sub resource ids: 3-255 chars, starting with a letter.
fn check_resource_id(kind: &str, id: &str) -> CloudResult<()> {
    let valid_chars = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_.~+%".contains(c));
    let starts_with_letter = id.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
    if (3..=255).contains(&id.len())
        && valid_chars
        && starts_with_letter
        && !id.starts_with("goog")
    {
        Ok(())
    } else {
        Err(CloudError::Rejected(format!("invalid {} id: {:?}", kind, id)))
    }
}

impl ProvisioningApi for MockCloud {
    fn insert_instance_template(
        &self,
        _project: &str,
        template: &InstanceTemplateSpec,
    ) -> CloudResult<Operation> {
        let injected = self.begin(
            MockOp::InsertTemplate,
            MockCall::InsertTemplate(template.name.clone()),
        )?;
        Ok(self.state.lock().unwrap().insert_template(template, injected))
    }

    fn delete_instance_template(&self, _project: &str, name: &str) -> CloudResult<Operation> {
        let injected =
            self.begin(MockOp::DeleteTemplate, MockCall::DeleteTemplate(name.to_string()))?;
        Ok(self.state.lock().unwrap().delete_template(name, injected))
    }

    fn insert_instance_group_manager(
        &self,
        _project: &str,
        zone: &str,
        group: &InstanceGroupManagerSpec,
    ) -> CloudResult<Operation> {
        let injected = self.begin(MockOp::InsertGroup, MockCall::InsertGroup(group.name.clone()))?;
        Ok(self.state.lock().unwrap().insert_group(zone, group, injected))
    }

    fn delete_instance_group_manager(
        &self,
        _project: &str,
        zone: &str,
        name: &str,
    ) -> CloudResult<Operation> {
        let injected = self.begin(MockOp::DeleteGroup, MockCall::DeleteGroup(name.to_string()))?;
        Ok(self.state.lock().unwrap().delete_group(zone, name, injected))
    }

    fn get_operation(
        &self,
        _project: &str,
        scope: &OperationScope,
        name: &str,
    ) -> CloudResult<Operation> {
        let mut state =
            self.begin_call(MockOp::GetOperation, MockCall::GetOperation(name.to_string()))?;
        state.poll_operation(scope, name)
    }

    fn list_instance_groups(&self, _project: &str, zone: &str) -> CloudResult<Vec<String>> {
        let mut state =
            self.begin_call(MockOp::ListGroups, MockCall::ListGroups(zone.to_string()))?;
        Ok(state.list_groups(zone))
    }

    fn get_image_from_family(&self, project: &str, family: &str) -> CloudResult<String> {
        let image = format!("{}/{}", project, family);
        let _state = self.begin_call(MockOp::GetImage, MockCall::GetImage(image))?;
        Ok(format!(
            "https://compute.googleapis.com/compute/v1/projects/{}/global/images/{}-v20240101",
            project, family
        ))
    }
}

impl MessageBus for MockCloud {
    fn create_topic(
        &self,
        topic: &TopicPath,
        allowed_persistence_regions: &[String],
    ) -> CloudResult<()> {
        let mut state =
            self.begin_call(MockOp::CreateTopic, MockCall::CreateTopic(topic.to_string()))?;
        check_resource_id("topic", &topic.name)?;
        state.create_topic(topic.to_string(), allowed_persistence_regions.to_vec())
    }

    fn delete_topic(&self, topic: &TopicPath) -> CloudResult<()> {
        let mut state =
            self.begin_call(MockOp::DeleteTopic, MockCall::DeleteTopic(topic.to_string()))?;
        state.delete_topic(&topic.to_string())
    }

    fn list_topics(&self, project: &str) -> CloudResult<Vec<TopicPath>> {
        let state = self.begin_call(MockOp::ListTopics, MockCall::ListTopics(project.to_string()))?;
        if state.hide_topics {
            return Ok(Vec::new());
        }
        Ok(state
            .topics
            .keys()
            .filter_map(|path| path.parse::<TopicPath>().ok())
            .filter(|topic| topic.project == project)
            .collect())
    }

    fn create_subscription(
        &self,
        subscription: &SubscriptionPath,
        topic: &TopicPath,
    ) -> CloudResult<()> {
        let mut state = self.begin_call(
            MockOp::CreateSubscription,
            MockCall::CreateSubscription(subscription.to_string()),
        )?;
        check_resource_id("subscription", &subscription.name)?;
        state.create_subscription(subscription.to_string(), topic.to_string())
    }

    fn delete_subscription(&self, subscription: &SubscriptionPath) -> CloudResult<()> {
        let mut state = self.begin_call(
            MockOp::DeleteSubscription,
            MockCall::DeleteSubscription(subscription.to_string()),
        )?;
        state.delete_subscription(&subscription.to_string())
    }

    fn pull(
        &self,
        subscription: &SubscriptionPath,
        max_wait: Duration,
    ) -> CloudResult<Option<ReceivedMessage>> {
        let mut state = self.begin_call(MockOp::Pull, MockCall::Pull(subscription.to_string()))?;
        let path = subscription.to_string();
        let deadline = Instant::now() + max_wait;
        loop {
            if let Some(received) = state.pull(&path)? {
                return Ok(Some(received));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = self.messages.wait_timeout(state, deadline - now).unwrap();
            state = guard;
        }
    }

    fn acknowledge(&self, subscription: &SubscriptionPath, ack_ids: &[String]) -> CloudResult<()> {
        let mut state = self.begin_call(
            MockOp::Acknowledge,
            MockCall::Acknowledge(subscription.to_string()),
        )?;
        state.acknowledge(&subscription.to_string(), ack_ids)
    }

    fn publish(&self, topic: &TopicPath, data: &[u8]) -> CloudResult<String> {
        let mut state = self.begin_call(MockOp::Publish, MockCall::Publish(topic.to_string()))?;
        let id = state.publish(&topic.to_string(), data)?;
        self.messages.notify_all();
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic() -> TopicPath {
        TopicPath::new("p", "clash-job-1")
    }

    fn subscription() -> SubscriptionPath {
        SubscriptionPath::new("p", "clash-job-1")
    }

    #[test]
    fn test_pull_times_out_empty() {
        let cloud = MockCloud::new();
        cloud.create_topic(&topic(), &[]).unwrap();
        cloud.create_subscription(&subscription(), &topic()).unwrap();

        let start = Instant::now();
        let received = cloud.pull(&subscription(), Duration::from_millis(50)).unwrap();
        assert!(received.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_pull_wakes_on_publish() {
        let cloud = MockCloud::new();
        cloud.create_topic(&topic(), &[]).unwrap();
        cloud.create_subscription(&subscription(), &topic()).unwrap();

        let publisher = cloud.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            publisher.publish_status("clash-job-1", 3).unwrap();
        });

        let received = cloud.pull(&subscription(), Duration::from_secs(5)).unwrap().unwrap();
        handle.join().unwrap();
        let status = StatusMessage::from_slice(&received.message.decode_data().unwrap()).unwrap();
        assert_eq!(status.status, 3);
        assert_eq!(cloud.unacked_count("projects/p/subscriptions/clash-job-1"), 1);
    }

    #[test]
    fn test_injected_reject() {
        let cloud = MockCloud::new();
        cloud.inject_error(MockOp::CreateTopic, "quota exceeded");
        let err = cloud.create_topic(&topic(), &[]).unwrap_err();
        assert!(matches!(err, CloudError::Rejected(ref m) if m == "quota exceeded"));
        assert!(cloud.topics().is_empty());
        assert_eq!(cloud.calls(), vec![MockCall::CreateTopic(topic().to_string())]);
    }

    #[test]
    fn test_fail_count_recovers() {
        let cloud = MockCloud::new();
        cloud.inject_failure(MockOp::CreateTopic, FailureConfig::reject("busy").with_fail_count(1));
        assert!(cloud.create_topic(&topic(), &[]).is_err());
        assert!(cloud.create_topic(&topic(), &[]).is_ok());
    }

    #[test]
    fn test_invalid_topic_name_rejected() {
        let cloud = MockCloud::new();
        let err = cloud.create_topic(&TopicPath::new("p", "1-bad"), &[]).unwrap_err();
        assert!(matches!(err, CloudError::Rejected(_)));
    }

    #[test]
    fn test_finish_worker_starts_group_removal() {
        let cloud = MockCloud::new();
        cloud.set_operation_polls(0);
        cloud.set_group_removal_polls(0);
        cloud.create_topic(&topic(), &[]).unwrap();
        let template = InstanceTemplateSpec {
            name: "clash-job-1".into(),
            properties: serde_json::json!({}),
        };
        let op = cloud.insert_instance_template("p", &template).unwrap();
        cloud.get_operation("p", &OperationScope::Global, &op.name).unwrap();
        let group = InstanceGroupManagerSpec::for_template("clash-job-1", 1);
        let op = cloud.insert_instance_group_manager("p", "z", &group).unwrap();
        cloud
            .get_operation("p", &OperationScope::Zone("z".into()), &op.name)
            .unwrap();
        assert_eq!(cloud.groups(), vec!["clash-job-1".to_string()]);

        cloud.finish_worker("clash-job-1", 0).unwrap();
        assert!(cloud.list_instance_groups("p", "z").unwrap().is_empty());
        assert!(cloud.groups().is_empty());
    }

    #[test]
    fn test_hidden_topics() {
        let cloud = MockCloud::new();
        cloud.create_topic(&topic(), &[]).unwrap();
        assert_eq!(cloud.list_topics("p").unwrap(), vec![topic()]);
        assert!(cloud.list_topics("other").unwrap().is_empty());
        cloud.hide_topics_from_listing(true);
        assert!(cloud.list_topics("p").unwrap().is_empty());
    }
}
