//! Bearer tokens for the REST backend.
//!
//! Authentication is delegated: a token comes from `CLASH_ACCESS_TOKEN`, or
//! from `gcloud auth print-access-token`.

use std::process::Command;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::cloud::{CloudError, CloudResult};

pub const TOKEN_ENV: &str = "CLASH_ACCESS_TOKEN";

/// gcloud tokens live for an hour; refresh well before that.
const TOKEN_LIFETIME: Duration = Duration::from_secs(45 * 60);

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    fetched_at: Instant,
}

/// Where access tokens come from.
#[derive(Debug)]
pub struct TokenSource {
    /// A fixed token, e.g. from the environment.
    fixed: Option<String>,
    /// Last token printed by gcloud.
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    /// `CLASH_ACCESS_TOKEN` if set, else gcloud.
    pub fn from_env() -> Self {
        match std::env::var(TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Self::fixed(token.trim()),
            _ => Self::gcloud(),
        }
    }

    pub fn fixed(token: &str) -> Self {
        Self {
            fixed: Some(token.to_string()),
            cached: Mutex::new(None),
        }
    }

    pub fn gcloud() -> Self {
        Self {
            fixed: None,
            cached: Mutex::new(None),
        }
    }

    pub fn token(&self) -> CloudResult<String> {
        if let Some(token) = &self.fixed {
            return Ok(token.clone());
        }
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = cached.as_ref() {
            if token.fetched_at.elapsed() < TOKEN_LIFETIME {
                return Ok(token.value.clone());
            }
        }
        let value = print_access_token()?;
        *cached = Some(CachedToken {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        Ok(value)
    }
}

fn print_access_token() -> CloudResult<String> {
    debug!("fetching access token from gcloud");
    let output = Command::new("gcloud")
        .args(["auth", "print-access-token"])
        .output()
        .map_err(|e| CloudError::Auth(format!("failed to run gcloud: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CloudError::Auth(format!(
            "gcloud auth print-access-token failed: {}",
            stderr.trim()
        )));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(CloudError::Auth("gcloud returned an empty token".to_string()));
    }
    Ok(token)
}
