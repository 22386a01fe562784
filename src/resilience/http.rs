//! JSON HTTP client for sibling services.
//!
//! `ServiceClient` performs one attempt and classifies the outcome into a
//! [`CallError`]. `ResilientServiceClient` wraps it in a [`ResilientClient`]
//! so every verb goes through the target's breaker, retries and timeout.

use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use url::Url;

use crate::resilience::client::ResilientClient;
use crate::resilience::errors::{CallError, ResilienceError};

/// Single-attempt JSON client bound to one base URL.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    base_url: Url,
    http: reqwest::Client,
    timeout: Duration,
}

impl ServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CallError> {
        // A trailing slash makes `join` append instead of replacing the last segment.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|e| CallError::InvalidRequest(format!("base url `{base_url}`: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CallError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            base_url,
            http,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn url_for(&self, path: &str) -> Result<Url, CallError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| CallError::InvalidRequest(format!("path `{path}`: {e}")))
    }

    /// One request. An empty response body decodes to `Value::Null`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, CallError> {
        let url = self.url_for(path)?;
        let mut builder = self.http.request(method.clone(), url);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            let message = String::from_utf8_lossy(&bytes).into_owned();
            tracing::debug!(%method, path, status = status.as_u16(), "Downstream returned error status");
            return Err(CallError::from_status(status.as_u16(), message));
        }

        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| CallError::Decode(e.to_string()))
    }

    fn classify(&self, err: reqwest::Error) -> CallError {
        if err.is_timeout() {
            CallError::Timeout(self.timeout)
        } else if err.is_builder() {
            CallError::InvalidRequest(err.to_string())
        } else if err.is_decode() {
            CallError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            CallError::from_status(status.as_u16(), err.to_string())
        } else {
            CallError::Transient(err.to_string())
        }
    }
}

/// [`ServiceClient`] with breaker, retries and timeout applied to every verb.
#[derive(Debug, Clone)]
pub struct ResilientServiceClient {
    client: ServiceClient,
    resilient: ResilientClient,
}

impl ResilientServiceClient {
    pub fn new(client: ServiceClient, resilient: ResilientClient) -> Self {
        Self { client, resilient }
    }

    pub fn resilient(&self) -> &ResilientClient {
        &self.resilient
    }

    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ResilienceError> {
        let client = &self.client;
        self.resilient
            .execute(move || client.request(method.clone(), path, body))
            .await
    }

    pub async fn get(&self, path: &str) -> Result<Value, ResilienceError> {
        self.send(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, ResilienceError> {
        self.send(Method::POST, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Value, ResilienceError> {
        self.send(Method::PUT, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, ResilienceError> {
        self.send(Method::DELETE, path, None).await
    }
}
