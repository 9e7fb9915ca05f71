use crate::jobs::JobStatusInfo;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response: {0}")]
    Decode(String),
}

/// Remote job endpoints as seen by the client.
#[async_trait]
pub trait JobsApi: Send + Sync {
    async fn start_job(&self, resource_id: &str) -> Result<JobStatusInfo, ApiError>;
    async fn job_status(&self, resource_id: &str) -> Result<JobStatusInfo, ApiError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// [`JobsApi`] over HTTP.
pub struct HttpJobsApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpJobsApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn job_url(&self, resource_id: &str, action: &str) -> String {
        format!("{}/jobs/{}/{}", self.base_url, resource_id, action)
    }

    async fn decode(response: reqwest::Response) -> Result<JobStatusInfo, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<JobStatusInfo>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl JobsApi for HttpJobsApi {
    async fn start_job(&self, resource_id: &str) -> Result<JobStatusInfo, ApiError> {
        let response = self
            .client
            .post(self.job_url(resource_id, "start"))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    async fn job_status(&self, resource_id: &str) -> Result<JobStatusInfo, ApiError> {
        let response = self
            .client
            .get(self.job_url(resource_id, "status"))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Self::decode(response).await
    }
}
