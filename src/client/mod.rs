//! HTTP client for the job API, including the status poller.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::schedule::types::{Job, JobStatusView, JobSubmission};
use crate::utils::http::ApiResponse;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{status} {code}: {message}")]
    Api {
        status: StatusCode,
        code: String,
        message: String,
        field: Option<String>,
    },

    #[error("job {job_id} did not finish within {waited:?}")]
    DeadlineExceeded { job_id: i64, waited: Duration },
}

/// How often and for how long `wait_for_completion` polls.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Give up once this much time has passed. `None` waits forever.
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            deadline: None,
        }
    }
}

pub struct JobClient {
    http: reqwest::Client,
    base_url: String,
}

impl JobClient {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:8000`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn submit(&self, submission: &JobSubmission) -> Result<Job, ClientError> {
        let response = self
            .http
            .post(self.url("/jobs"))
            .json(submission)
            .send()
            .await?;
        read_envelope(response).await
    }

    pub async fn job_status(&self, job_id: i64) -> Result<JobStatusView, ClientError> {
        let response = self.http.get(self.url(&format!("/jobs/{}", job_id))).send().await?;
        read_envelope(response).await
    }

    /// Poll until the job reaches `completed` or `failed` and return that
    /// first terminal observation.
    pub async fn wait_for_completion(&self, job_id: i64, policy: &PollPolicy) -> Result<JobStatusView, ClientError> {
        let started = Instant::now();
        loop {
            let status = self.job_status(job_id).await?;
            if status.status.is_terminal() {
                return Ok(status);
            }
            debug!(job_id, progress = status.progress, "Job still {}", status.status);

            let mut sleep_for = policy.interval;
            if let Some(deadline) = policy.deadline {
                let waited = started.elapsed();
                if waited >= deadline {
                    return Err(ClientError::DeadlineExceeded { job_id, waited });
                }
                sleep_for = sleep_for.min(deadline - waited);
            }
            tokio::time::sleep(sleep_for).await;
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }
}

async fn read_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    let body: ApiResponse<T> = response.json().await?;
    match (body.success, body.data, body.error) {
        (true, Some(data), _) => Ok(data),
        (_, _, Some(error)) => Err(ClientError::Api {
            status,
            code: error.code,
            message: error.message,
            field: error.field,
        }),
        _ => Err(ClientError::Api {
            status,
            code: "EMPTY_RESPONSE".to_string(),
            message: "response carried neither data nor error".to_string(),
            field: None,
        }),
    }
}
