// Client side of the dashboard backend's job API

use async_trait::async_trait;
use thiserror::Error;

pub mod http;
pub mod types;

pub use http::HttpApiClient;
pub use types::{
    CancelRequest, CancelResponse, HostEntry, HostFacts, HostMap, JobId, JobSnapshot, JobStatus,
    PlaybookInfo, RunRequest, RunResponse,
};

/// Errors talking to the backend
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid server URL '{0}'")]
    InvalidUrl(String),

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}: {message}")]
    Status {
        url: String,
        status: u16,
        message: String,
    },

    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl ApiError {
    /// Whether retrying the same request later could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::InvalidUrl(_) => false,
            ApiError::Transport { .. } => true,
            ApiError::Status { status, .. } => *status >= 500 || *status == 429,
            ApiError::Decode { .. } => true,
        }
    }
}

/// Operations the backend exposes.
///
/// The HTTP client is the production implementation; tests substitute an
/// in-memory one.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// `GET /api/hosts`
    async fn hosts(&self) -> Result<HostMap, ApiError>;

    /// `GET /api/playbooks`
    async fn playbooks(&self) -> Result<Vec<PlaybookInfo>, ApiError>;

    /// `POST /api/run`
    async fn run(&self, request: &RunRequest) -> Result<JobId, ApiError>;

    /// `GET /api/status/{job_id}`
    async fn status(&self, job_id: &str) -> Result<JobSnapshot, ApiError>;

    /// `POST /api/cancel`
    async fn cancel(&self, job_id: &str) -> Result<bool, ApiError>;
}
