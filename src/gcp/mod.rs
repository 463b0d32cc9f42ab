//! Thin REST clients for the Google Cloud services the pipelines talk to.
//!
//! Every call goes through [`GcpClient`], which carries the bearer token and
//! turns non-2xx responses into [`ApiError::Status`]. Retries are left to the
//! caller; the request timeout is fixed per client.

pub mod auth;
pub mod bigquery;
pub mod pubsub;
pub mod storage;

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::GcpSettings;

const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("could not obtain access token: {0}")]
    Auth(String),

    #[error("unexpected response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("job {job_id} failed: {message}")]
    Job { job_id: String, message: String },

    #[error("timed out waiting for {0}")]
    Timeout(String),
}

/// Authenticated session for one project.
#[derive(Clone)]
pub struct GcpClient {
    http: reqwest::Client,
    token: String,
    project: String,
    region: String,
}

impl GcpClient {
    pub async fn connect(settings: &GcpSettings) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|source| ApiError::Transport {
                url: String::new(),
                source,
            })?;
        let token = auth::access_token(&http, settings.access_token.as_deref()).await?;
        Ok(Self {
            http,
            token,
            project: settings.project.clone(),
            region: settings.region.clone(),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub(crate) fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http.request(method, url).bearer_auth(&self.token)
    }

    /// Send and decode a JSON response body (empty bodies decode to `Null`).
    pub(crate) async fn send_json(&self, req: RequestBuilder) -> Result<Value, ApiError> {
        let (url, response) = self.execute(req).await?;
        read_json(url, response).await
    }

    /// Like [`send_json`](Self::send_json) but maps 404 to `None`.
    pub(crate) async fn send_json_optional(
        &self,
        req: RequestBuilder,
    ) -> Result<Option<Value>, ApiError> {
        let (url, response) = self.execute(req).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json(url, response).await.map(Some)
    }

    async fn execute(&self, req: RequestBuilder) -> Result<(String, Response), ApiError> {
        let request = req.build().map_err(|source| ApiError::Transport {
            url: String::new(),
            source,
        })?;
        let url = request.url().to_string();
        debug!("{} {}", request.method(), url);
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|source| ApiError::Transport {
                url: url.clone(),
                source,
            })?;
        Ok((url, response))
    }
}

async fn read_json(url: String, response: Response) -> Result<Value, ApiError> {
    let status = response.status();
    let body = response.text().await.map_err(|source| ApiError::Transport {
        url: url.clone(),
        source,
    })?;
    if !status.is_success() {
        return Err(ApiError::Status {
            url,
            status: status.as_u16(),
            body,
        });
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| ApiError::Decode {
        url,
        reason: e.to_string(),
    })
}
