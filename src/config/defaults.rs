//! Built-in defaults and the typed configuration record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::merge::merge_layers;
use super::ConfigError;

/// Boot disk image, resolved through its image family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskImage {
    pub project: String,
    pub family: String,
}

/// Deployment parameters for a job. Never mutated by a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub project_id: String,
    /// Container image the script runs in.
    pub image: String,
    pub privileged: bool,
    pub preemptible: bool,
    pub zone: String,
    pub region: String,
    pub subnetwork: String,
    pub machine_type: String,
    pub service_account: String,
    pub disk_image: DiskImage,
    pub scopes: Vec<String>,
    /// Regions the status topic may persist messages in. Empty means no policy.
    pub allowed_persistence_regions: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/bigquery",
    "https://www.googleapis.com/auth/compute",
    "https://www.googleapis.com/auth/devstorage.read_write",
    "https://www.googleapis.com/auth/devstorage.full_control",
    "https://www.googleapis.com/auth/logging.write",
    "https://www.googleapis.com/auth/monitoring",
    "https://www.googleapis.com/auth/pubsub",
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/cloudplatformprojects",
];

const DEFAULT_PERSISTENCE_REGIONS: &[&str] =
    &["europe-north1", "europe-west1", "europe-west3", "europe-west4"];

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            project_id: "my-gcp-project".to_string(),
            image: "google/cloud-sdk".to_string(),
            privileged: false,
            preemptible: false,
            zone: "europe-west1-b".to_string(),
            region: "europe-west1".to_string(),
            subnetwork: "default-europe-west1".to_string(),
            machine_type: "n1-standard-4".to_string(),
            service_account: "default".to_string(),
            disk_image: DiskImage {
                project: "gce-uefi-images".to_string(),
                family: "cos-stable".to_string(),
            },
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            allowed_persistence_regions: DEFAULT_PERSISTENCE_REGIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            labels: BTreeMap::new(),
        }
    }
}

impl JobConfig {
    /// Load configuration from defaults, an optional TOML file and optional overrides.
    ///
    /// Objects are deep-merged; arrays and scalars of later layers replace earlier ones.
    pub fn load(
        path: Option<&Path>,
        overrides: Option<serde_json::Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = vec![Self::default().to_value()?];

        if let Some(path) = path {
            layers.push(Self::load_toml_file(path)?);
        }
        if let Some(overrides) = overrides {
            layers.push(overrides);
        }

        let config: JobConfig = serde_json::from_value(merge_layers(layers))
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document layered over the defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let layer = Self::parse_toml(contents)?;
        let config: JobConfig =
            serde_json::from_value(merge_layers(vec![Self::default().to_value()?, layer]))
                .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, ConfigError> {
        serde_json::to_value(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check the parameters every provider call depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("project_id", &self.project_id),
            ("zone", &self.zone),
            ("region", &self.region),
            ("machine_type", &self.machine_type),
            ("image", &self.image),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} must not be empty", field)));
            }
        }

        if !self.zone.starts_with(&format!("{}-", self.region)) {
            return Err(ConfigError::Invalid(format!(
                "zone {} is not in region {}",
                self.zone, self.region
            )));
        }

        Ok(())
    }

    fn load_toml_file(path: &Path) -> Result<serde_json::Value, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_toml(&contents)
    }

    fn parse_toml(contents: &str) -> Result<serde_json::Value, ConfigError> {
        let value: toml::Value = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(format!("TOML parse error: {}", e)))?;
        Ok(toml_to_json(value))
    }
}

fn toml_to_json(value: toml::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = JobConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.zone, "europe-west1-b");
        assert_eq!(config.scopes.len(), 9);
        assert_eq!(config.allowed_persistence_regions.len(), 4);
        assert!(!config.preemptible);
    }

    #[test]
    fn test_toml_layer_overrides_scalars_and_keeps_nested_defaults() {
        let config = JobConfig::from_toml_str(
            r#"
            project_id = "analytics"
            preemptible = true

            [disk_image]
            family = "cos-beta"
            "#,
        )
        .unwrap();
        assert_eq!(config.project_id, "analytics");
        assert!(config.preemptible);
        assert_eq!(config.disk_image.family, "cos-beta");
        assert_eq!(config.disk_image.project, "gce-uefi-images");
        assert_eq!(config.machine_type, "n1-standard-4");
    }

    #[test]
    fn test_toml_arrays_replace() {
        let config = JobConfig::from_toml_str(r#"allowed_persistence_regions = []"#).unwrap();
        assert!(config.allowed_persistence_regions.is_empty());
    }

    #[test]
    fn test_load_file_then_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "project_id = \"from-file\"\nmachine_type = \"n1-standard-1\"").unwrap();

        let config = JobConfig::load(
            Some(file.path()),
            Some(serde_json::json!({"machine_type": "e2-small", "labels": {"team": "data"}})),
        )
        .unwrap();
        assert_eq!(config.project_id, "from-file");
        assert_eq!(config.machine_type, "e2-small");
        assert_eq!(config.labels["team"], "data");
    }

    #[test]
    fn test_missing_file() {
        let result = JobConfig::load(Some(Path::new("/nonexistent/clash.toml")), None);
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_zone_outside_region_rejected() {
        let result = JobConfig::from_toml_str(r#"zone = "us-central1-a""#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_empty_project_rejected() {
        let config = JobConfig {
            project_id: " ".to_string(),
            ..JobConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let result = JobConfig::from_toml_str(r#"preemptible = "yes""#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
