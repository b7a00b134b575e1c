//! REST client for the stream backend.
//!
//! Wraps the five `/api` endpoints the panel consumes. Non-success responses are
//! mapped to [`ApiError::Rejected`] carrying the backend's `detail` text when present.

use crate::model::{PanelConfig, RunState, Settings};
use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend rejected request ({status}): {}", .detail.as_deref().unwrap_or("no detail"))]
    Rejected {
        status: StatusCode,
        detail: Option<String>,
    },
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Human-readable detail supplied by the backend, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Rejected { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    api_base: String,
}

impl BackendClient {
    pub fn new(cfg: &PanelConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .user_agent(cfg.user_agent.clone())
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            client,
            api_base: format!("{}/api", cfg.base_url.trim_end_matches('/')),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    pub async fn get_settings(&self) -> Result<Settings, ApiError> {
        let resp = self.client.get(self.url("/settings")).send().await?;
        decode(resp).await
    }

    /// Submit a full settings record; returns the backend's canonical copy.
    pub async fn save_settings(&self, settings: &Settings) -> Result<Settings, ApiError> {
        let resp = self
            .client
            .post(self.url("/settings"))
            .json(settings)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn status(&self) -> Result<RunState, ApiError> {
        let resp = self.client.get(self.url("/status")).send().await?;
        decode(resp).await
    }

    pub async fn start(&self) -> Result<RunState, ApiError> {
        let resp = self.client.post(self.url("/start")).send().await?;
        decode(resp).await
    }

    pub async fn stop(&self) -> Result<RunState, ApiError> {
        let resp = self.client.post(self.url("/stop")).send().await?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
    let status = resp.status();
    let url = resp.url().path().to_string();
    let body = resp.text().await?;
    if !status.is_success() {
        debug!(%status, path = %url, "backend returned error");
        return Err(ApiError::Rejected {
            status,
            detail: extract_detail(&body),
        });
    }
    Ok(serde_json::from_str(&body)?)
}

/// Pull `detail` out of an error body. Validation errors arrive as a list of
/// `{ "msg": ... }` objects and are joined into one line.
fn extract_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let detail = match value.get("detail")? {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| match item.get("msg") {
                Some(serde_json::Value::String(msg)) => Some(msg.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("; "),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };
    (!detail.is_empty()).then_some(detail)
}
