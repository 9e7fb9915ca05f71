//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per job endpoint.
//! When API routes change, update only this file.

use super::constants::*;
use reqwest::Response;
use scribe_server::JobStatusInfo;
use std::time::Duration;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

#[allow(dead_code)]
impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    // ========================================================================
    // Job Endpoints
    // ========================================================================

    /// POST /jobs/{id}/start
    pub async fn start_job(&self, resource_id: &str) -> Response {
        self.client
            .post(format!("{}/jobs/{}/start", self.base_url, resource_id))
            .send()
            .await
            .expect("Start request failed")
    }

    /// GET /jobs/{id}/status
    pub async fn job_status(&self, resource_id: &str) -> Response {
        self.client
            .get(format!("{}/jobs/{}/status", self.base_url, resource_id))
            .send()
            .await
            .expect("Status request failed")
    }

    /// GET /jobs/{id}/status, decoded
    pub async fn job_status_info(&self, resource_id: &str) -> JobStatusInfo {
        let response = self.job_status(resource_id).await;
        assert!(
            response.status().is_success(),
            "Status request returned {}",
            response.status()
        );
        response.json().await.expect("Invalid status body")
    }

    /// Polls the status endpoint until the job is terminal, collecting every
    /// observed snapshot.
    ///
    /// # Panics
    ///
    /// Panics if the job does not settle within `JOB_SETTLE_TIMEOUT_MS`.
    pub async fn wait_until_settled(&self, resource_id: &str) -> Vec<JobStatusInfo> {
        let start = std::time::Instant::now();
        let mut seen = Vec::new();
        loop {
            let info = self.job_status_info(resource_id).await;
            let done = info.is_terminal();
            seen.push(info);
            if done {
                return seen;
            }
            if start.elapsed() > Duration::from_millis(JOB_SETTLE_TIMEOUT_MS) {
                panic!(
                    "Job {} did not settle within {}ms, last: {:?}",
                    resource_id,
                    JOB_SETTLE_TIMEOUT_MS,
                    seen.last()
                );
            }
            tokio::time::sleep(Duration::from_millis(JOB_POLL_INTERVAL_MS)).await;
        }
    }

    // ========================================================================
    // Server Endpoints
    // ========================================================================

    /// GET /
    pub async fn get_home(&self) -> Response {
        self.client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .expect("Home request failed")
    }
}
