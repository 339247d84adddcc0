//! Fixed-interval status polling
//!
//! Reads `GET /api/v1/analysis/{id}/status` until the job reaches COMPLETED or
//! ERROR. Runs independently of the persistent channel.

use async_trait::async_trait;
use mv_common::events::StatusSnapshot;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

const USER_AGENT: &str = concat!("mv-analysis-client/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error, PartialEq)]
pub enum PollError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    /// Network failure or unexpected answer; polling continues
    #[error("Transient status error: {0}")]
    Transient(String),

    #[error("Job {job_id} still not terminal after {polls} polls")]
    Exhausted { job_id: Uuid, polls: u32 },
}

/// Anything that can report a job's current status
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, job_id: Uuid) -> Result<StatusSnapshot, PollError>;
}

/// Status read over HTTP from a running service
pub struct HttpStatusSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatusSource {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, PollError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| PollError::Transient(format!("HTTP client init failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn status_url(&self, job_id: Uuid) -> String {
        format!(
            "{}/api/v1/analysis/{}/status",
            self.base_url.trim_end_matches('/'),
            job_id
        )
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch_status(&self, job_id: Uuid) -> Result<StatusSnapshot, PollError> {
        let response = self
            .client
            .get(self.status_url(job_id))
            .send()
            .await
            .map_err(|e| PollError::Transient(e.to_string()))?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Err(PollError::NotFound(job_id)),
            status if status.is_success() => response
                .json::<StatusSnapshot>()
                .await
                .map_err(|e| PollError::Transient(format!("Malformed status body: {}", e))),
            status => Err(PollError::Transient(format!("HTTP {}", status.as_u16()))),
        }
    }
}

/// Polls a [`StatusSource`] until the job is terminal
#[derive(Debug, Clone)]
pub struct StatusPoller {
    interval: Duration,
    max_polls: Option<u32>,
}

impl Default for StatusPoller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl StatusPoller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_polls: None,
        }
    }

    /// Give up after `max_polls` reads; unbounded by default
    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = Some(max_polls);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the first terminal snapshot observed
    ///
    /// Transient errors are logged and the next poll proceeds on schedule.
    /// A vanished job ends polling.
    pub async fn poll_until_terminal(
        &self,
        source: &dyn StatusSource,
        job_id: Uuid,
    ) -> Result<StatusSnapshot, PollError> {
        let mut polls = 0u32;

        loop {
            polls += 1;
            match source.fetch_status(job_id).await {
                Ok(snapshot) if snapshot.status.is_terminal() => {
                    debug!(job_id = %job_id, status = %snapshot.status, polls, "Terminal status observed");
                    return Ok(snapshot);
                }
                Ok(snapshot) => {
                    debug!(
                        job_id = %job_id,
                        status = %snapshot.status,
                        progress = snapshot.progress_percentage,
                        "Job still running"
                    );
                }
                Err(PollError::Transient(message)) => {
                    warn!(job_id = %job_id, error = %message, "Status poll failed; will retry");
                }
                Err(e) => return Err(e),
            }

            if self.max_polls.is_some_and(|max| polls >= max) {
                return Err(PollError::Exhausted { job_id, polls });
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mv_common::events::JobStatus;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedSource {
        answers: Mutex<VecDeque<Result<StatusSnapshot, PollError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedSource {
        fn new(answers: Vec<Result<StatusSnapshot, PollError>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn fetch_status(&self, job_id: Uuid) -> Result<StatusSnapshot, PollError> {
            *self.calls.lock().unwrap() += 1;
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(snapshot(job_id, JobStatus::Processing, 50.0)))
        }
    }

    fn snapshot(job_id: Uuid, status: JobStatus, progress: f64) -> StatusSnapshot {
        StatusSnapshot {
            job_id,
            status,
            progress_percentage: progress,
            status_message: String::new(),
            error_message: None,
        }
    }

    fn fast() -> StatusPoller {
        StatusPoller::new(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_polls_until_completed() {
        let id = Uuid::new_v4();
        let source = ScriptedSource::new(vec![
            Ok(snapshot(id, JobStatus::Pending, 0.0)),
            Ok(snapshot(id, JobStatus::Processing, 40.0)),
            Ok(snapshot(id, JobStatus::Completed, 100.0)),
        ]);

        let result = fast().poll_until_terminal(&source, id).await.unwrap();
        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_error_status_is_terminal() {
        let id = Uuid::new_v4();
        let mut failed = snapshot(id, JobStatus::Error, 30.0);
        failed.error_message = Some("detector crashed".to_string());
        let source = ScriptedSource::new(vec![Ok(failed)]);

        let result = fast().poll_until_terminal(&source, id).await.unwrap();
        assert_eq!(result.status, JobStatus::Error);
        assert_eq!(result.error_message.as_deref(), Some("detector crashed"));
    }

    #[tokio::test]
    async fn test_transient_errors_do_not_stop_polling() {
        let id = Uuid::new_v4();
        let source = ScriptedSource::new(vec![
            Err(PollError::Transient("connection refused".to_string())),
            Err(PollError::Transient("HTTP 503".to_string())),
            Ok(snapshot(id, JobStatus::Completed, 100.0)),
        ]);

        let result = fast().poll_until_terminal(&source, id).await.unwrap();
        assert_eq!(result.status, JobStatus::Completed);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_not_found_ends_polling() {
        let id = Uuid::new_v4();
        let source = ScriptedSource::new(vec![Err(PollError::NotFound(id))]);

        let err = fast().poll_until_terminal(&source, id).await.unwrap_err();
        assert_eq!(err, PollError::NotFound(id));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_max_polls_bounds_the_loop() {
        let id = Uuid::new_v4();
        let source = ScriptedSource::new(vec![]);

        let err = fast()
            .with_max_polls(4)
            .poll_until_terminal(&source, id)
            .await
            .unwrap_err();
        assert_eq!(err, PollError::Exhausted { job_id: id, polls: 4 });
        assert_eq!(source.calls(), 4);
    }

    #[test]
    fn test_default_interval() {
        assert_eq!(StatusPoller::default().interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_status_url_trims_trailing_slash() {
        let source = HttpStatusSource::new("http://localhost:8000/", Duration::from_secs(5)).unwrap();
        let id = Uuid::nil();
        assert_eq!(
            source.status_url(id),
            format!("http://localhost:8000/api/v1/analysis/{}/status", id)
        );
    }
}
