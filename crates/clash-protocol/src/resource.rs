//! Resource names and request bodies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

fn parse_path(
    path: &str,
    kind: &'static str,
    collection: &str,
) -> Result<(String, String), ProtocolError> {
    let invalid = || ProtocolError::InvalidPath {
        kind,
        path: path.to_string(),
    };
    let mut parts = path.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("projects"), Some(project), Some(c), Some(name), None)
            if c == collection && !project.is_empty() && !name.is_empty() =>
        {
            Ok((project.to_string(), name.to_string()))
        }
        _ => Err(invalid()),
    }
}

/// Fully qualified topic name: `projects/<project>/topics/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPath {
    pub project: String,
    pub name: String,
}

impl TopicPath {
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TopicPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "projects/{}/topics/{}", self.project, self.name)
    }
}

impl FromStr for TopicPath {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (project, name) = parse_path(s, "topic", "topics")?;
        Ok(Self { project, name })
    }
}

/// Fully qualified subscription name: `projects/<project>/subscriptions/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionPath {
    pub project: String,
    pub name: String,
}

impl SubscriptionPath {
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SubscriptionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "projects/{}/subscriptions/{}", self.project, self.name)
    }
}

impl FromStr for SubscriptionPath {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (project, name) = parse_path(s, "subscription", "subscriptions")?;
        Ok(Self { project, name })
    }
}

/// Request body for creating an instance template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceTemplateSpec {
    pub name: String,
    /// Instance properties (machine type, disks, metadata, ...).
    pub properties: serde_json::Value,
}

/// Request body for creating a managed instance group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceGroupManagerSpec {
    pub name: String,
    pub base_instance_name: String,
    /// Relative template reference, e.g. `global/instanceTemplates/<name>`.
    pub instance_template: String,
    pub target_size: u32,
}

impl InstanceGroupManagerSpec {
    /// A group named after `name` whose members boot from the template of the same name.
    pub fn for_template(name: &str, target_size: u32) -> Self {
        Self {
            name: name.to_string(),
            base_instance_name: name.to_string(),
            instance_template: format!("global/instanceTemplates/{}", name),
            target_size,
        }
    }

    /// Name of the referenced template (last path segment).
    pub fn template_name(&self) -> &str {
        self.instance_template
            .rsplit('/')
            .next()
            .unwrap_or(&self.instance_template)
    }
}
