//! Compute Engine v1 client.

use std::sync::Arc;

use clash_protocol::{InstanceGroupManagerSpec, InstanceTemplateSpec, Operation, OperationScope};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::auth::TokenSource;
use super::http::RestClient;
use crate::cloud::{CloudError, CloudResult, ProvisioningApi};

pub const COMPUTE_API: &str = "https://compute.googleapis.com/compute/v1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamedList {
    #[serde(default)]
    items: Vec<Named>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Image {
    self_link: String,
}

fn to_body<T: Serialize>(value: &T) -> CloudResult<Value> {
    serde_json::to_value(value).map_err(|e| CloudError::Decode(e.to_string()))
}

/// `ProvisioningApi` over the Compute Engine REST API.
#[derive(Debug, Clone)]
pub struct ComputeClient {
    rest: RestClient,
}

impl ComputeClient {
    pub fn new(tokens: Arc<TokenSource>) -> CloudResult<Self> {
        Self::with_base(COMPUTE_API, tokens)
    }

    pub fn with_base(base: &str, tokens: Arc<TokenSource>) -> CloudResult<Self> {
        Ok(Self {
            rest: RestClient::new(base, tokens)?,
        })
    }
}

impl ProvisioningApi for ComputeClient {
    fn insert_instance_template(
        &self,
        project: &str,
        template: &InstanceTemplateSpec,
    ) -> CloudResult<Operation> {
        self.rest.post(
            &format!("projects/{}/global/instanceTemplates", project),
            &to_body(template)?,
        )
    }

    fn delete_instance_template(&self, project: &str, name: &str) -> CloudResult<Operation> {
        self.rest
            .delete(&format!("projects/{}/global/instanceTemplates/{}", project, name))
    }

    fn insert_instance_group_manager(
        &self,
        project: &str,
        zone: &str,
        group: &InstanceGroupManagerSpec,
    ) -> CloudResult<Operation> {
        self.rest.post(
            &format!("projects/{}/zones/{}/instanceGroupManagers", project, zone),
            &to_body(group)?,
        )
    }

    fn delete_instance_group_manager(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> CloudResult<Operation> {
        self.rest.delete(&format!(
            "projects/{}/zones/{}/instanceGroupManagers/{}",
            project, zone, name
        ))
    }

    fn get_operation(
        &self,
        project: &str,
        scope: &OperationScope,
        name: &str,
    ) -> CloudResult<Operation> {
        self.rest
            .get(&format!("{}/{}", scope.collection(project), name), &[])
    }

    fn list_instance_groups(&self, project: &str, zone: &str) -> CloudResult<Vec<String>> {
        let path = format!("projects/{}/zones/{}/instanceGroups", project, zone);
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let query: Vec<(&str, &str)> = match &page_token {
                Some(token) => vec![("pageToken", token.as_str())],
                None => Vec::new(),
            };
            let page: NamedList = self.rest.get(&path, &query)?;
            names.extend(page.items.into_iter().map(|item| item.name));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(names),
            }
        }
    }

    fn get_image_from_family(&self, project: &str, family: &str) -> CloudResult<String> {
        let image: Image = self
            .rest
            .get(&format!("projects/{}/global/images/family/{}", project, family), &[])?;
        Ok(image.self_link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_group_list() {
        let page: NamedList = serde_json::from_str(
            r#"{"kind": "compute#instanceGroupList",
                "items": [{"name": "clash-job-1", "size": 1}, {"name": "other"}],
                "nextPageToken": "abc"}"#,
        )
        .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].name, "clash-job-1");
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_decode_empty_group_list() {
        let page: NamedList =
            serde_json::from_str(r#"{"kind": "compute#instanceGroupList"}"#).unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn test_group_body() {
        let body = to_body(&InstanceGroupManagerSpec::for_template("clash-job-1", 1)).unwrap();
        assert_eq!(body["baseInstanceName"], "clash-job-1");
        assert_eq!(body["instanceTemplate"], "global/instanceTemplates/clash-job-1");
        assert_eq!(body["targetSize"], 1);
    }
}
