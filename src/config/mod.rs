//! Job configuration
//!
//! A `JobConfig` holds the deployment parameters shared by every job of a
//! run: project, zone, machine shape, boot image, service account and so on.
//! It is assembled from three layers:
//! 1. Built-in defaults
//! 2. A TOML file (optional)
//! 3. Explicit overrides (CLI flags or builder calls)

mod builder;
mod defaults;
mod merge;
mod polling;

pub use builder::JobConfigBuilder;
pub use defaults::{DiskImage, JobConfig};
pub use merge::{deep_merge, merge_layers};
pub use polling::PollingConfig;

use std::path::PathBuf;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
