// reqwest implementation of the job API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace};

use super::types::{
    CancelRequest, CancelResponse, ErrorBody, HostMap, JobId, JobSnapshot, PlaybookInfo,
    RunRequest, RunResponse,
};
use super::{ApiClient, ApiError};

/// HTTP client bound to one dashboard server
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    base_url: String,
    client: Client,
}

impl HttpApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = normalize_base_url(base_url)?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("playdeck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| ApiError::Transport {
                url: base_url.clone(),
                source,
            })?;

        Ok(HttpApiClient { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Status endpoint for a job, with the id escaped as a single path segment
    fn status_url(&self, job_id: &str) -> Result<String, ApiError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|_| ApiError::InvalidUrl(self.base_url.clone()))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["api", "status"])
            .push(job_id);
        Ok(url.into())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.get_url(self.url(path)).await
    }

    async fn get_url<T: DeserializeOwned>(&self, url: String) -> Result<T, ApiError> {
        trace!(%url, "GET");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                url: url.clone(),
                source,
            })?;
        decode(url, response).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        trace!(%url, "POST");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                url: url.clone(),
                source,
            })?;
        decode(url, response).await
    }
}

async fn decode<T: DeserializeOwned>(url: String, response: Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.text().await.map_err(|source| ApiError::Transport {
        url: url.clone(),
        source,
    })?;

    if !status.is_success() {
        return Err(ApiError::Status {
            url,
            status: status.as_u16(),
            message: error_message(&body),
        });
    }

    serde_json::from_str(&body).map_err(|e| ApiError::Decode {
        url,
        message: e.to_string(),
    })
}

/// Pull the message out of an `{"error": ...}` body, falling back to the raw text
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => err.error,
        Err(_) => {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "empty response".to_string()
            } else {
                trimmed.chars().take(200).collect()
            }
        }
    }
}

fn normalize_base_url(raw: &str) -> Result<String, ApiError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let rest = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"));
    match rest {
        Some(host) if !host.is_empty() => Ok(trimmed.to_string()),
        _ => Err(ApiError::InvalidUrl(raw.to_string())),
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn hosts(&self) -> Result<HostMap, ApiError> {
        self.get_json("/api/hosts").await
    }

    async fn playbooks(&self) -> Result<Vec<PlaybookInfo>, ApiError> {
        self.get_json("/api/playbooks").await
    }

    async fn run(&self, request: &RunRequest) -> Result<JobId, ApiError> {
        debug!(playbook = %request.playbook, hosts = ?request.hosts, "launching job");
        let response: RunResponse = self.post_json("/api/run", request).await?;
        Ok(response.job_id)
    }

    async fn status(&self, job_id: &str) -> Result<JobSnapshot, ApiError> {
        let url = self.status_url(job_id)?;
        self.get_url(url).await
    }

    async fn cancel(&self, job_id: &str) -> Result<bool, ApiError> {
        let request = CancelRequest {
            job_id: job_id.to_string(),
        };
        let response: CancelResponse = self.post_json("/api/cancel", &request).await?;
        Ok(response.success)
    }
}
