//! Mock cloud state.
//!
//! Plain data plus the provider rules; locking and failure injection live in
//! `MockCloud`.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::Utc;
use clash_protocol::{
    InstanceGroupManagerSpec, InstanceTemplateSpec, Operation, OperationError, OperationScope,
    OperationStatus, PubsubMessage, ReceivedMessage,
};

use crate::cloud::CloudError;

/// A call made against the mock, with the resource it targeted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    CreateTopic(String),
    DeleteTopic(String),
    ListTopics(String),
    CreateSubscription(String),
    DeleteSubscription(String),
    Pull(String),
    Acknowledge(String),
    Publish(String),
    InsertTemplate(String),
    DeleteTemplate(String),
    InsertGroup(String),
    DeleteGroup(String),
    GetOperation(String),
    ListGroups(String),
    GetImage(String),
}

impl MockCall {
    /// True for calls that delete a resource.
    pub fn is_removal(&self) -> bool {
        matches!(
            self,
            MockCall::DeleteTopic(_)
                | MockCall::DeleteSubscription(_)
                | MockCall::DeleteTemplate(_)
                | MockCall::DeleteGroup(_)
        )
    }
}

/// A subscription and its undelivered / unacknowledged messages.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionState {
    pub topic: String,
    pub queue: VecDeque<PubsubMessage>,
    pub outstanding: BTreeMap<String, PubsubMessage>,
}

/// A managed instance group.
#[derive(Debug, Clone)]
pub struct GroupState {
    pub zone: String,
    pub template: String,
    pub target_size: u32,
    /// Set once deletion started: listings left before the group disappears.
    pub removal_polls: Option<u32>,
}

#[derive(Debug, Clone)]
enum Effect {
    CreateTemplate(InstanceTemplateSpec),
    DeleteTemplate(String),
    CreateGroup { zone: String, spec: InstanceGroupManagerSpec },
    DeleteGroup(String),
}

#[derive(Debug, Clone)]
struct MockOperation {
    operation: Operation,
    scope: OperationScope,
    remaining_polls: u32,
    effect: Option<Effect>,
    injected: Option<OperationError>,
}

/// Mock cloud state container
#[derive(Debug)]
pub struct MockState {
    /// Topic path -> allowed persistence regions
    pub topics: BTreeMap<String, Vec<String>>,
    /// Subscription path -> state
    pub subscriptions: BTreeMap<String, SubscriptionState>,
    /// Template name -> properties
    pub templates: BTreeMap<String, serde_json::Value>,
    /// Group name -> state
    pub groups: BTreeMap<String, GroupState>,
    /// Every call, in order
    pub calls: Vec<MockCall>,
    /// `get_operation` calls answering RUNNING before an operation completes
    pub operation_polls: u32,
    /// Listings a deleted group still shows up in
    pub group_removal_polls: u32,
    /// Simulate listing lag: `list_topics` returns nothing
    pub hide_topics: bool,
    operations: HashMap<String, MockOperation>,
    id_counter: u64,
}

impl Default for MockState {
    fn default() -> Self {
        Self::new()
    }
}

impl MockState {
    pub fn new() -> Self {
        Self {
            topics: BTreeMap::new(),
            subscriptions: BTreeMap::new(),
            templates: BTreeMap::new(),
            groups: BTreeMap::new(),
            calls: Vec::new(),
            operation_polls: 1,
            group_removal_polls: 1,
            hide_topics: false,
            operations: HashMap::new(),
            id_counter: 0,
        }
    }

    pub fn next_id(&mut self, prefix: &str) -> String {
        self.id_counter += 1;
        format!("{}-{:08x}", prefix, self.id_counter)
    }

    // === Provisioning ===

    pub fn insert_template(
        &mut self,
        template: &InstanceTemplateSpec,
        injected: Option<OperationError>,
    ) -> Operation {
        self.submit(
            "insert",
            OperationScope::Global,
            Effect::CreateTemplate(template.clone()),
            injected,
        )
    }

    pub fn delete_template(&mut self, name: &str, injected: Option<OperationError>) -> Operation {
        self.submit(
            "delete",
            OperationScope::Global,
            Effect::DeleteTemplate(name.to_string()),
            injected,
        )
    }

    pub fn insert_group(
        &mut self,
        zone: &str,
        spec: &InstanceGroupManagerSpec,
        injected: Option<OperationError>,
    ) -> Operation {
        self.submit(
            "insert",
            OperationScope::Zone(zone.to_string()),
            Effect::CreateGroup {
                zone: zone.to_string(),
                spec: spec.clone(),
            },
            injected,
        )
    }

    pub fn delete_group(
        &mut self,
        zone: &str,
        name: &str,
        injected: Option<OperationError>,
    ) -> Operation {
        self.submit(
            "delete",
            OperationScope::Zone(zone.to_string()),
            Effect::DeleteGroup(name.to_string()),
            injected,
        )
    }

    fn submit(
        &mut self,
        kind: &str,
        scope: OperationScope,
        effect: Effect,
        injected: Option<OperationError>,
    ) -> Operation {
        let mut operation = Operation::pending(self.next_id("operation"));
        operation.operation_type = Some(kind.to_string());
        self.operations.insert(
            operation.name.clone(),
            MockOperation {
                operation: operation.clone(),
                scope,
                remaining_polls: self.operation_polls,
                effect: Some(effect),
                injected,
            },
        );
        operation
    }

    /// Advance an operation by one poll.
    pub fn poll_operation(
        &mut self,
        scope: &OperationScope,
        name: &str,
    ) -> Result<Operation, CloudError> {
        let mut entry = match self.operations.remove(name) {
            Some(entry) if &entry.scope == scope => entry,
            Some(entry) => {
                self.operations.insert(name.to_string(), entry);
                return Err(CloudError::NotFound(format!("operation {} in {:?}", name, scope)));
            }
            None => return Err(CloudError::NotFound(format!("operation {}", name))),
        };

        if entry.remaining_polls > 0 {
            entry.remaining_polls -= 1;
            entry.operation.status = OperationStatus::Running;
        } else if let Some(effect) = entry.effect.take() {
            let error = match entry.injected.take() {
                Some(error) => Some(error),
                None => self.apply(effect).err(),
            };
            entry.operation.status = OperationStatus::Done;
            entry.operation.error = error;
        }

        let operation = entry.operation.clone();
        self.operations.insert(name.to_string(), entry);
        Ok(operation)
    }

    fn apply(&mut self, effect: Effect) -> Result<(), OperationError> {
        match effect {
            Effect::CreateTemplate(template) => {
                if self.templates.contains_key(&template.name) {
                    return Err(already_exists("instanceTemplate", &template.name));
                }
                self.templates.insert(template.name, template.properties);
            }
            Effect::DeleteTemplate(name) => {
                if !self.templates.contains_key(&name) {
                    return Err(not_found("instanceTemplate", &name));
                }
                if let Some((group, _)) = self.groups.iter().find(|(_, g)| g.template == name) {
                    return Err(OperationError::single(
                        "RESOURCE_IN_USE_BY_ANOTHER_RESOURCE",
                        format!("instance template {} is used by instance group {}", name, group),
                    ));
                }
                self.templates.remove(&name);
            }
            Effect::CreateGroup { zone, spec } => {
                let template = spec.template_name().to_string();
                if !self.templates.contains_key(&template) {
                    return Err(not_found("instanceTemplate", &template));
                }
                if self.groups.contains_key(&spec.name) {
                    return Err(already_exists("instanceGroupManager", &spec.name));
                }
                self.groups.insert(
                    spec.name.clone(),
                    GroupState {
                        zone,
                        template,
                        target_size: spec.target_size,
                        removal_polls: None,
                    },
                );
            }
            Effect::DeleteGroup(name) => {
                let removal_polls = self.group_removal_polls;
                match self.groups.get_mut(&name) {
                    Some(group) => {
                        group.removal_polls.get_or_insert(removal_polls);
                    }
                    None => return Err(not_found("instanceGroupManager", &name)),
                }
            }
        }
        Ok(())
    }

    /// Start removing a group, as its own worker would.
    pub fn begin_group_removal(&mut self, name: &str) -> bool {
        let removal_polls = self.group_removal_polls;
        match self.groups.get_mut(name) {
            Some(group) => {
                group.removal_polls.get_or_insert(removal_polls);
                true
            }
            None => false,
        }
    }

    /// Groups visible in a zone listing; groups being removed count down and vanish.
    pub fn list_groups(&mut self, zone: &str) -> Vec<String> {
        let mut visible = Vec::new();
        let mut gone = Vec::new();
        for (name, group) in self.groups.iter_mut().filter(|(_, g)| g.zone == zone) {
            match group.removal_polls {
                Some(0) => gone.push(name.clone()),
                Some(n) => {
                    group.removal_polls = Some(n - 1);
                    visible.push(name.clone());
                }
                None => visible.push(name.clone()),
            }
        }
        for name in gone {
            self.groups.remove(&name);
        }
        visible
    }

    // === Message bus ===

    pub fn create_topic(&mut self, path: String, regions: Vec<String>) -> Result<(), CloudError> {
        if self.topics.contains_key(&path) {
            return Err(CloudError::Rejected(format!("topic {} already exists", path)));
        }
        self.topics.insert(path, regions);
        Ok(())
    }

    pub fn delete_topic(&mut self, path: &str) -> Result<(), CloudError> {
        self.topics
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| CloudError::NotFound(format!("topic {}", path)))
    }

    pub fn create_subscription(&mut self, path: String, topic: String) -> Result<(), CloudError> {
        if !self.topics.contains_key(&topic) {
            return Err(CloudError::NotFound(format!("topic {}", topic)));
        }
        if self.subscriptions.contains_key(&path) {
            return Err(CloudError::Rejected(format!("subscription {} already exists", path)));
        }
        self.subscriptions.insert(
            path,
            SubscriptionState {
                topic,
                ..Default::default()
            },
        );
        Ok(())
    }

    pub fn delete_subscription(&mut self, path: &str) -> Result<(), CloudError> {
        self.subscriptions
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| CloudError::NotFound(format!("subscription {}", path)))
    }

    /// Fan a message out to every subscription of the topic.
    pub fn publish(&mut self, topic: &str, data: &[u8]) -> Result<String, CloudError> {
        if !self.topics.contains_key(topic) {
            return Err(CloudError::NotFound(format!("topic {}", topic)));
        }
        let mut message = PubsubMessage::from_bytes(data);
        message.message_id = self.next_id("message");
        message.publish_time = Some(Utc::now());

        for subscription in self.subscriptions.values_mut().filter(|s| s.topic == topic) {
            subscription.queue.push_back(message.clone());
        }
        Ok(message.message_id)
    }

    /// Take the next message of a subscription, if any.
    pub fn pull(&mut self, subscription: &str) -> Result<Option<ReceivedMessage>, CloudError> {
        let ack_id = self.next_id("ack");
        let state = self
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| CloudError::NotFound(format!("subscription {}", subscription)))?;

        Ok(state.queue.pop_front().map(|message| {
            state.outstanding.insert(ack_id.clone(), message.clone());
            ReceivedMessage {
                ack_id,
                message,
                delivery_attempt: None,
            }
        }))
    }

    pub fn acknowledge(
        &mut self,
        subscription: &str,
        ack_ids: &[String],
    ) -> Result<(), CloudError> {
        let state = self
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| CloudError::NotFound(format!("subscription {}", subscription)))?;
        for ack_id in ack_ids {
            state.outstanding.remove(ack_id);
        }
        Ok(())
    }

    /// Put every unacknowledged message back at the front of its queue.
    pub fn redeliver_unacked(&mut self) {
        for state in self.subscriptions.values_mut() {
            let outstanding = std::mem::take(&mut state.outstanding);
            for message in outstanding.into_values().rev() {
                state.queue.push_front(message);
            }
        }
    }
}

fn not_found(kind: &str, name: &str) -> OperationError {
    OperationError::single(
        "RESOURCE_NOT_FOUND",
        format!("The resource '{}' {} was not found", kind, name),
    )
}

fn already_exists(kind: &str, name: &str) -> OperationError {
    OperationError::single(
        "ALREADY_EXISTS",
        format!("The resource '{}' {} already exists", kind, name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_completion(
        state: &mut MockState,
        scope: &OperationScope,
        op: &Operation,
    ) -> Operation {
        loop {
            let polled = state.poll_operation(scope, &op.name).unwrap();
            if polled.is_done() {
                return polled;
            }
        }
    }

    fn template(name: &str) -> InstanceTemplateSpec {
        InstanceTemplateSpec {
            name: name.to_string(),
            properties: serde_json::json!({}),
        }
    }

    #[test]
    fn test_resource_appears_when_operation_completes() {
        let mut state = MockState::new();
        let op = state.insert_template(&template("t"), None);
        assert!(state.templates.is_empty());

        let first = state.poll_operation(&OperationScope::Global, &op.name).unwrap();
        assert_eq!(first.status, OperationStatus::Running);
        assert!(state.templates.is_empty());

        let done = run_to_completion(&mut state, &OperationScope::Global, &op);
        assert!(done.error.is_none());
        assert!(state.templates.contains_key("t"));
    }

    #[test]
    fn test_template_in_use_cannot_be_deleted() {
        let mut state = MockState::new();
        state.operation_polls = 0;
        let op = state.insert_template(&template("t"), None);
        run_to_completion(&mut state, &OperationScope::Global, &op);

        let zone = OperationScope::Zone("z".into());
        let op = state.insert_group("z", &InstanceGroupManagerSpec::for_template("t", 1), None);
        run_to_completion(&mut state, &zone, &op);

        let op = state.delete_template("t", None);
        let done = run_to_completion(&mut state, &OperationScope::Global, &op);
        assert_eq!(done.error.unwrap().errors[0].code, "RESOURCE_IN_USE_BY_ANOTHER_RESOURCE");
        assert!(state.templates.contains_key("t"));
    }

    #[test]
    fn test_group_requires_template() {
        let mut state = MockState::new();
        state.operation_polls = 0;
        let zone = OperationScope::Zone("z".into());
        let group = InstanceGroupManagerSpec::for_template("missing", 1);
        let op = state.insert_group("z", &group, None);
        let done = run_to_completion(&mut state, &zone, &op);
        assert_eq!(done.error.unwrap().errors[0].code, "RESOURCE_NOT_FOUND");
        assert!(state.groups.is_empty());
    }

    #[test]
    fn test_injected_error_skips_effect() {
        let mut state = MockState::new();
        let op = state.insert_template(&template("t"), Some(OperationError::single("QUOTA", "no")));
        let done = run_to_completion(&mut state, &OperationScope::Global, &op);
        assert_eq!(done.error.unwrap().errors[0].code, "QUOTA");
        assert!(state.templates.is_empty());
    }

    #[test]
    fn test_wrong_scope_is_not_found() {
        let mut state = MockState::new();
        let op = state.insert_template(&template("t"), None);
        let result = state.poll_operation(&OperationScope::Zone("z".into()), &op.name);
        assert!(matches!(result, Err(CloudError::NotFound(_))));
        assert!(state.poll_operation(&OperationScope::Global, &op.name).is_ok());
    }

    #[test]
    fn test_group_lingers_during_removal() {
        let mut state = MockState::new();
        state.operation_polls = 0;
        state.group_removal_polls = 2;
        let op = state.insert_template(&template("t"), None);
        run_to_completion(&mut state, &OperationScope::Global, &op);
        let zone = OperationScope::Zone("z".into());
        let op = state.insert_group("z", &InstanceGroupManagerSpec::for_template("t", 1), None);
        run_to_completion(&mut state, &zone, &op);

        assert!(state.begin_group_removal("t"));
        assert_eq!(state.list_groups("z"), vec!["t".to_string()]);
        assert_eq!(state.list_groups("z"), vec!["t".to_string()]);
        assert!(state.list_groups("z").is_empty());
        assert!(state.groups.is_empty());
        assert!(state.list_groups("other").is_empty());
    }

    #[test]
    fn test_publish_fans_out_and_pull_acknowledge() {
        let mut state = MockState::new();
        state.create_topic("projects/p/topics/t".into(), vec![]).unwrap();
        state
            .create_subscription("projects/p/subscriptions/a".into(), "projects/p/topics/t".into())
            .unwrap();
        state
            .create_subscription("projects/p/subscriptions/b".into(), "projects/p/topics/t".into())
            .unwrap();

        state.publish("projects/p/topics/t", b"hello").unwrap();

        let received = state.pull("projects/p/subscriptions/a").unwrap().unwrap();
        assert_eq!(received.message.decode_data().unwrap(), b"hello".to_vec());
        assert_eq!(state.subscriptions["projects/p/subscriptions/a"].outstanding.len(), 1);
        state
            .acknowledge("projects/p/subscriptions/a", &[received.ack_id])
            .unwrap();
        assert!(state.subscriptions["projects/p/subscriptions/a"].outstanding.is_empty());
        assert!(state.pull("projects/p/subscriptions/a").unwrap().is_none());
        assert!(state.pull("projects/p/subscriptions/b").unwrap().is_some());
    }

    #[test]
    fn test_redeliver_unacked() {
        let mut state = MockState::new();
        state.create_topic("projects/p/topics/t".into(), vec![]).unwrap();
        state
            .create_subscription("projects/p/subscriptions/s".into(), "projects/p/topics/t".into())
            .unwrap();
        state.publish("projects/p/topics/t", b"1").unwrap();
        assert!(state.pull("projects/p/subscriptions/s").unwrap().is_some());
        assert!(state.pull("projects/p/subscriptions/s").unwrap().is_none());

        state.redeliver_unacked();
        let again = state.pull("projects/p/subscriptions/s").unwrap().unwrap();
        assert_eq!(again.message.decode_data().unwrap(), b"1".to_vec());
    }

    #[test]
    fn test_subscription_requires_topic() {
        let mut state = MockState::new();
        let result = state.create_subscription(
            "projects/p/subscriptions/s".into(),
            "projects/p/topics/missing".into(),
        );
        assert!(matches!(result, Err(CloudError::NotFound(_))));
    }

    #[test]
    fn test_removal_calls() {
        assert!(MockCall::DeleteGroup("g".into()).is_removal());
        assert!(!MockCall::InsertGroup("g".into()).is_removal());
        assert!(!MockCall::Pull("s".into()).is_removal());
    }
}
