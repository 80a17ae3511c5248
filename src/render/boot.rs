//! Cloud-init document and machine configuration.

use std::collections::BTreeMap;

use minijinja::context;
use serde_json::Value;

use crate::config::JobConfig;

use super::{script, RenderError, TemplateRenderer, CLOUD_INIT, MACHINE_CONFIG, RUNNER};

/// Boot configuration of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudInitConfig {
    pub vm_name: String,
    /// Shell line the worker runs.
    pub script: String,
    pub env_vars: BTreeMap<String, String>,
    /// Bucket -> path inside the container.
    pub gcs_mounts: BTreeMap<String, String>,
    /// Path inside the container -> storage URL the results are copied to.
    pub gcs_target: BTreeMap<String, String>,
}

impl CloudInitConfig {
    pub fn new(vm_name: impl Into<String>, args: &[String]) -> Self {
        Self::from_script(vm_name, script::translate_args_to_script(args))
    }

    /// Boot a worker that runs `script` as written.
    pub fn from_script(vm_name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            vm_name: vm_name.into(),
            script: script.into(),
            env_vars: BTreeMap::new(),
            gcs_mounts: BTreeMap::new(),
            gcs_target: BTreeMap::new(),
        }
    }

    pub fn with_env_vars(mut self, env_vars: BTreeMap<String, String>) -> Self {
        self.env_vars = env_vars;
        self
    }

    pub fn with_gcs_mounts(mut self, gcs_mounts: BTreeMap<String, String>) -> Self {
        self.gcs_mounts = gcs_mounts;
        self
    }

    pub fn with_gcs_target(mut self, gcs_target: BTreeMap<String, String>) -> Self {
        self.gcs_target = gcs_target;
        self
    }

    /// Docker env-file contents, one `NAME=value` per line.
    pub fn env_var_file(&self) -> String {
        self.env_vars
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn render(
        &self,
        renderer: &TemplateRenderer,
        config: &JobConfig,
    ) -> Result<String, RenderError> {
        let topic = format!("projects/{}/topics/{}", config.project_id, self.vm_name);
        let runner = renderer.render(
            RUNNER,
            context! {
                vm_name => self.vm_name,
                zone => config.zone,
                topic => topic,
                image => config.image,
                privileged => config.privileged,
                gcs_mounts => self.gcs_mounts,
                gcs_target => self.gcs_target,
            },
        )?;

        renderer.render(
            CLOUD_INIT,
            context! {
                vm_name => self.vm_name,
                clash_runner_script => runner,
                script => self.script,
                env_var_file => self.env_var_file(),
            },
        )
    }
}

/// Instance-template properties for one worker.
#[derive(Debug, Clone)]
pub struct MachineConfig<'a> {
    vm_name: &'a str,
    source_image: &'a str,
    cloud_init: &'a str,
}

impl<'a> MachineConfig<'a> {
    /// `source_image` is the self link of the boot image.
    pub fn new(vm_name: &'a str, source_image: &'a str, cloud_init: &'a str) -> Self {
        Self {
            vm_name,
            source_image,
            cloud_init,
        }
    }

    /// Render the properties document and inject the cloud-init payload.
    pub fn build(
        &self,
        renderer: &TemplateRenderer,
        config: &JobConfig,
    ) -> Result<Value, RenderError> {
        let rendered = renderer.render(
            MACHINE_CONFIG,
            context! {
                vm_name => self.vm_name,
                source_image => self.source_image,
                project_id => config.project_id,
                machine_type => config.machine_type,
                region => config.region,
                scopes => config.scopes,
                subnetwork => config.subnetwork,
                preemptible => config.preemptible,
                service_account => config.service_account,
                labels => config.labels,
            },
        )?;
        let mut properties: Value = serde_json::from_str(&rendered)?;
        inject_startup_payload(&mut properties, self.cloud_init)?;
        Ok(properties)
    }
}

/// Overwrite `metadata.items[0].value` with the boot payload.
pub(crate) fn inject_startup_payload(
    properties: &mut Value,
    payload: &str,
) -> Result<(), RenderError> {
    let slot = properties
        .pointer_mut("/metadata/items/0/value")
        .ok_or(RenderError::MissingStartupPayload)?;
    *slot = Value::String(payload.to_string());
    Ok(())
}
