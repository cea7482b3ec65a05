use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::schedule::types::{Job, JobStatus};

/// Notified once a job reaches a terminal state.
#[async_trait]
pub trait JobCallback: Send + Sync {
    async fn on_complete(&self, job: &Job) -> Result<()>;
    async fn on_error(&self, job: &Job, error: &str) -> Result<()>;
}

/// Body POSTed to a job's `callback_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub job_id: i64,
    pub status: JobStatus,
    pub result_location: Option<String>,
    pub error: Option<String>,
}

pub struct HttpCallback {
    client: reqwest::Client,
    callback_url: String,
}

impl HttpCallback {
    pub fn new(callback_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            callback_url,
        }
    }

    async fn send_callback(&self, payload: &CallbackPayload) -> Result<()> {
        self.client
            .post(&self.callback_url)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl JobCallback for HttpCallback {
    async fn on_complete(&self, job: &Job) -> Result<()> {
        self.send_callback(&CallbackPayload {
            job_id: job.id,
            status: JobStatus::Completed,
            result_location: job.result_location.clone(),
            error: None,
        })
        .await
    }

    async fn on_error(&self, job: &Job, error: &str) -> Result<()> {
        self.send_callback(&CallbackPayload {
            job_id: job.id,
            status: JobStatus::Failed,
            result_location: None,
            error: Some(error.to_string()),
        })
        .await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Completed { job_id: i64, result_location: String },
    Failed { job_id: i64, error: String },
}

impl JobEvent {
    pub fn job_id(&self) -> i64 {
        match self {
            JobEvent::Completed { job_id, .. } | JobEvent::Failed { job_id, .. } => *job_id,
        }
    }
}

/// In-process fan-out of terminal transitions.
#[derive(Clone)]
pub struct EventCallback {
    sender: broadcast::Sender<JobEvent>,
}

impl EventCallback {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    // no subscribers is not an error
    fn publish(&self, event: JobEvent) {
        let _ = self.sender.send(event);
    }
}

#[async_trait]
impl JobCallback for EventCallback {
    async fn on_complete(&self, job: &Job) -> Result<()> {
        self.publish(JobEvent::Completed {
            job_id: job.id,
            result_location: job.result_location.clone().unwrap_or_default(),
        });
        Ok(())
    }

    async fn on_error(&self, job: &Job, error: &str) -> Result<()> {
        self.publish(JobEvent::Failed {
            job_id: job.id,
            error: error.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::types::{EffectChain, OutputFormat};
    use chrono::Utc;

    fn job() -> Job {
        Job {
            id: 42,
            name: "scene".into(),
            description: None,
            audio_file_id: 1,
            project_id: None,
            effects_config: EffectChain::default(),
            output_format: OutputFormat::Wav,
            status: JobStatus::Completed,
            progress: 1.0,
            current_step: None,
            callback_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result_location: Some("/out/42.wav".into()),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_event_callback_broadcasts() {
        let events = EventCallback::new(8);
        let mut rx = events.subscribe();

        events.on_complete(&job()).await.unwrap();
        events.on_error(&job(), "timeout").await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            JobEvent::Completed {
                job_id: 42,
                result_location: "/out/42.wav".into()
            }
        );
        let failed = rx.recv().await.unwrap();
        assert_eq!(failed.job_id(), 42);
        assert_eq!(
            failed,
            JobEvent::Failed {
                job_id: 42,
                error: "timeout".into()
            }
        );
    }

    #[tokio::test]
    async fn test_http_callback_to_unreachable_host_errors() {
        let callback = HttpCallback::new("http://127.0.0.1:9/hook".to_string());
        assert!(callback.on_error(&job(), "boom").await.is_err());
    }
}
