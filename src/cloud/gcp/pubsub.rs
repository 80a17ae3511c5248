//! Pub/Sub v1 client.

use std::sync::Arc;
use std::time::Duration;

use clash_protocol::{PubsubMessage, ReceivedMessage, SubscriptionPath, TopicPath};
use serde::Deserialize;
use serde_json::{json, Value};

use super::auth::TokenSource;
use super::http::RestClient;
use crate::cloud::{CloudError, CloudResult, MessageBus};

pub const PUBSUB_API: &str = "https://pubsub.googleapis.com/v1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopicList {
    #[serde(default)]
    topics: Vec<TopicEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TopicEntry {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

fn topic_body(allowed_persistence_regions: &[String]) -> Value {
    if allowed_persistence_regions.is_empty() {
        json!({})
    } else {
        json!({
            "messageStoragePolicy": {
                "allowedPersistenceRegions": allowed_persistence_regions,
            }
        })
    }
}

/// `MessageBus` over the Pub/Sub REST API.
#[derive(Debug, Clone)]
pub struct PubsubClient {
    rest: RestClient,
}

impl PubsubClient {
    pub fn new(tokens: Arc<TokenSource>) -> CloudResult<Self> {
        Self::with_base(PUBSUB_API, tokens)
    }

    pub fn with_base(base: &str, tokens: Arc<TokenSource>) -> CloudResult<Self> {
        Ok(Self {
            rest: RestClient::new(base, tokens)?,
        })
    }
}

impl MessageBus for PubsubClient {
    fn create_topic(
        &self,
        topic: &TopicPath,
        allowed_persistence_regions: &[String],
    ) -> CloudResult<()> {
        let _: Value = self
            .rest
            .put(&topic.to_string(), &topic_body(allowed_persistence_regions))?;
        Ok(())
    }

    fn delete_topic(&self, topic: &TopicPath) -> CloudResult<()> {
        let _: Value = self.rest.delete(&topic.to_string())?;
        Ok(())
    }

    fn list_topics(&self, project: &str) -> CloudResult<Vec<TopicPath>> {
        let path = format!("projects/{}/topics", project);
        let mut topics = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let query: Vec<(&str, &str)> = match &page_token {
                Some(token) => vec![("pageToken", token.as_str())],
                None => Vec::new(),
            };
            let page: TopicList = self.rest.get(&path, &query)?;
            for entry in page.topics {
                let topic = entry
                    .name
                    .parse::<TopicPath>()
                    .map_err(|e| CloudError::Decode(e.to_string()))?;
                topics.push(topic);
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(topics),
            }
        }
    }

    fn create_subscription(
        &self,
        subscription: &SubscriptionPath,
        topic: &TopicPath,
    ) -> CloudResult<()> {
        let _: Value = self
            .rest
            .put(&subscription.to_string(), &json!({ "topic": topic.to_string() }))?;
        Ok(())
    }

    fn delete_subscription(&self, subscription: &SubscriptionPath) -> CloudResult<()> {
        let _: Value = self.rest.delete(&subscription.to_string())?;
        Ok(())
    }

    fn pull(
        &self,
        subscription: &SubscriptionPath,
        max_wait: Duration,
    ) -> CloudResult<Option<ReceivedMessage>> {
        let result: CloudResult<PullResponse> = self.rest.post_with_timeout(
            &format!("{}:pull", subscription),
            &json!({ "maxMessages": 1 }),
            max_wait,
        );
        match result {
            Ok(response) => Ok(response.received_messages.into_iter().next()),
            Err(CloudError::Timeout(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn acknowledge(&self, subscription: &SubscriptionPath, ack_ids: &[String]) -> CloudResult<()> {
        let _: Value = self.rest.post(
            &format!("{}:acknowledge", subscription),
            &json!({ "ackIds": ack_ids }),
        )?;
        Ok(())
    }

    fn publish(&self, topic: &TopicPath, data: &[u8]) -> CloudResult<String> {
        let message = PubsubMessage::from_bytes(data);
        let response: PublishResponse = self.rest.post(
            &format!("{}:publish", topic),
            &json!({ "messages": [message] }),
        )?;
        response
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| CloudError::Decode("publish returned no message id".to_string()))
    }
}
