//! Per-run job parameters.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::render::{translate_args_to_script, CloudInitConfig};

/// What one job runs, and with which inputs and outputs.
///
/// In job files the maps are spelled `env`, `mounts` and `targets`:
///
/// ```toml
/// [[job]]
/// args = ["python", "train.py"]
/// env = { EPOCHS = "3" }
/// mounts = { "training-data" = "/data" }
/// targets = { "/out" = "gs://results/run-1" }
/// ```
///
/// A job can carry a whole bash script instead of `args`; the body is then
/// written to the worker unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRuntimeSpec {
    #[serde(default)]
    pub args: Vec<String>,
    /// Script body, used instead of `args` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, rename = "env")]
    pub env_vars: BTreeMap<String, String>,
    /// Bucket -> path inside the container.
    #[serde(default, rename = "mounts")]
    pub gcs_mounts: BTreeMap<String, String>,
    /// Path inside the container -> storage URL.
    #[serde(default, rename = "targets")]
    pub gcs_target: BTreeMap<String, String>,
}

impl JobRuntimeSpec {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Run `body` as the job script.
    pub fn from_script(body: impl Into<String>) -> Self {
        Self {
            script: Some(body.into()),
            ..Default::default()
        }
    }

    /// Run the bash script stored at `path`.
    pub fn from_script_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let body = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_script(body))
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(name.into(), value.into());
        self
    }

    pub fn with_mount(mut self, bucket: impl Into<String>, path: impl Into<String>) -> Self {
        self.gcs_mounts.insert(bucket.into(), path.into());
        self
    }

    pub fn with_target(mut self, path: impl Into<String>, url: impl Into<String>) -> Self {
        self.gcs_target.insert(path.into(), url.into());
        self
    }

    /// What the worker executes: the script body, or `args` as one shell line.
    pub fn script(&self) -> String {
        match &self.script {
            Some(body) => body.clone(),
            None => translate_args_to_script(&self.args),
        }
    }

    pub fn cloud_init(&self, vm_name: &str) -> CloudInitConfig {
        CloudInitConfig::from_script(vm_name, self.script())
            .with_env_vars(self.env_vars.clone())
            .with_gcs_mounts(self.gcs_mounts.clone())
            .with_gcs_target(self.gcs_target.clone())
    }
}
