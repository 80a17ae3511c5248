//! Fluent builder for `JobConfig`.

use std::collections::BTreeMap;

use super::defaults::{DiskImage, JobConfig};

/// Builds job configurations on top of a base (the built-in defaults unless given).
#[derive(Debug, Clone, Default)]
pub struct JobConfigBuilder {
    config: JobConfig,
}

impl JobConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration instead of the defaults.
    pub fn from_base(base: JobConfig) -> Self {
        Self { config: base }
    }

    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.config.project_id = project_id.into();
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.config.image = image.into();
        self
    }

    pub fn privileged(mut self, privileged: bool) -> Self {
        self.config.privileged = privileged;
        self
    }

    pub fn preemptible(mut self, preemptible: bool) -> Self {
        self.config.preemptible = preemptible;
        self
    }

    pub fn zone(mut self, zone: impl Into<String>) -> Self {
        self.config.zone = zone.into();
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.region = region.into();
        self
    }

    pub fn subnetwork(mut self, subnetwork: impl Into<String>) -> Self {
        self.config.subnetwork = subnetwork.into();
        self
    }

    pub fn machine_type(mut self, machine_type: impl Into<String>) -> Self {
        self.config.machine_type = machine_type.into();
        self
    }

    pub fn service_account(mut self, service_account: impl Into<String>) -> Self {
        self.config.service_account = service_account.into();
        self
    }

    pub fn disk_image(mut self, project: impl Into<String>, family: impl Into<String>) -> Self {
        self.config.disk_image = DiskImage {
            project: project.into(),
            family: family.into(),
        };
        self
    }

    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.config.scopes = scopes;
        self
    }

    pub fn allowed_persistence_regions(mut self, regions: Vec<String>) -> Self {
        self.config.allowed_persistence_regions = regions;
        self
    }

    pub fn labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.config.labels = labels;
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.labels.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> JobConfig {
        self.config
    }
}
