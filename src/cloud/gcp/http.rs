//! JSON over HTTPS with bearer auth.

use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::auth::TokenSource;
use crate::cloud::{CloudError, CloudResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A REST API rooted at `base`.
#[derive(Debug, Clone)]
pub(crate) struct RestClient {
    http: Client,
    base: String,
    tokens: Arc<TokenSource>,
}

impl RestClient {
    pub(crate) fn new(base: &str, tokens: Arc<TokenSource>) -> CloudResult<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CloudError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub(crate) fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> CloudResult<T> {
        self.send(Method::GET, path, query, None, None)
    }

    pub(crate) fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> CloudResult<T> {
        self.send(Method::POST, path, &[], Some(body), None)
    }

    pub(crate) fn put<T: DeserializeOwned>(&self, path: &str, body: &Value) -> CloudResult<T> {
        self.send(Method::PUT, path, &[], Some(body), None)
    }

    pub(crate) fn delete<T: DeserializeOwned>(&self, path: &str) -> CloudResult<T> {
        self.send(Method::DELETE, path, &[], None, None)
    }

    /// POST with a per-request timeout; a timeout is `CloudError::Timeout`.
    pub(crate) fn post_with_timeout<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
        timeout: Duration,
    ) -> CloudResult<T> {
        self.send(Method::POST, path, &[], Some(body), Some(timeout))
    }

    fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> CloudResult<T> {
        let url = format!("{}/{}", self.base, path.trim_start_matches('/'));
        debug!(method = %method, url = %url, "request");

        let mut request = self
            .http
            .request(method, &url)
            .bearer_auth(self.tokens.token()?)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().map_err(|e| transport_error(&url, e))?;
        decode(&url, response)
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> CloudError {
    if e.is_timeout() {
        CloudError::Timeout(url.to_string())
    } else {
        CloudError::Transport(format!("{}: {}", url, e))
    }
}

fn decode<T: DeserializeOwned>(url: &str, response: Response) -> CloudResult<T> {
    let status = response.status();
    let text = response.text().map_err(|e| transport_error(url, e))?;
    if !status.is_success() {
        return Err(status_error(url, status, text));
    }
    let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
    serde_json::from_str(text).map_err(|e| CloudError::Decode(format!("{}: {}", url, e)))
}

fn status_error(url: &str, status: StatusCode, body: String) -> CloudError {
    match status {
        StatusCode::NOT_FOUND => CloudError::NotFound(url.to_string()),
        StatusCode::CONFLICT => CloudError::Rejected(format!("{}: {}", url, body)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            CloudError::Auth(format!("{}: {}", url, body))
        }
        _ => CloudError::Http {
            status: status.as_u16(),
            body,
        },
    }
}
