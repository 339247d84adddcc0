//! Per-job orchestration
//!
//! One driver task per job pulls raw records from the analyzer, records each
//! finding, publishes progress and alerts as it goes, then generates the
//! report and publishes the terminal event. Any analyzer failure ends the job
//! in ERROR with a `failed` event instead.

use futures::StreamExt;
use mv_common::events::{JobEvent, JobStatus, MediaKind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{MediaArtifact, ReportInput};
use crate::services::event_broadcaster::EventHub;
use crate::services::finding_translator::{FindingTranslator, Translation};
use crate::services::job_registry::{JobRegistry, RegistryError};
use crate::services::media_analyzer::{AnalyzerError, MediaAnalyzer, RawRecord, RecordStream};
use crate::services::report_generator::ReportGenerator;
use crate::services::temporal_analysis::detect_patterns;

/// Units after which the unknown-total estimate reaches half of 99%
const UNKNOWN_TOTAL_HALF_POINT: f64 = 25.0;

/// Default bound on waiting for the analyzer to open its stream or yield a record
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
}

/// Progress percentage from the number of processed units
///
/// With a known total the estimate is exact. Without one it approaches 99%
/// asymptotically, so it keeps rising without ever claiming completion.
#[derive(Debug, Clone, Copy)]
pub struct ProgressEstimator {
    total: Option<u64>,
    processed: u64,
}

impl ProgressEstimator {
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|t| *t > 0),
            processed: 0,
        }
    }

    pub fn advance(&mut self) -> f64 {
        self.processed += 1;
        self.current()
    }

    pub fn current(&self) -> f64 {
        let n = self.processed as f64;
        match self.total {
            Some(total) => (100.0 * n / total as f64).min(100.0),
            None => 99.0 * n / (n + UNKNOWN_TOTAL_HALF_POINT),
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }
}

/// Drives jobs from PENDING to a terminal state
pub struct JobDriver {
    registry: JobRegistry,
    hub: EventHub,
    analyzer: Arc<dyn MediaAnalyzer>,
    translator: FindingTranslator,
    reports: Arc<ReportGenerator>,
    retain_uploads: bool,
    idle_timeout: Duration,
}

impl JobDriver {
    pub fn new(
        registry: JobRegistry,
        hub: EventHub,
        analyzer: Arc<dyn MediaAnalyzer>,
        translator: FindingTranslator,
        reports: Arc<ReportGenerator>,
    ) -> Self {
        Self {
            registry,
            hub,
            analyzer,
            translator,
            reports,
            retain_uploads: true,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Fail the job when the analyzer produces nothing for `idle_timeout`
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Delete the uploaded file once its job finished
    pub fn discard_uploads(mut self) -> Self {
        self.retain_uploads = false;
        self
    }

    /// Run a job on its own task
    pub fn spawn(self: &Arc<Self>, job_id: Uuid, artifact: MediaArtifact) -> JoinHandle<JobStatus> {
        let driver = Arc::clone(self);
        tokio::spawn(async move {
            let status = driver.run(job_id, &artifact).await;

            if !driver.retain_uploads {
                if let Err(e) = tokio::fs::remove_file(&artifact.path).await {
                    warn!(job_id = %job_id, path = %artifact.path.display(), error = %e, "Failed to remove upload");
                }
            }
            status
        })
    }

    /// Run a job to completion and return its final status
    ///
    /// The job must already exist in the registry (created by the submit
    /// handler), so subscribers may attach before processing begins.
    pub async fn run(&self, job_id: Uuid, artifact: &MediaArtifact) -> JobStatus {
        let started = Instant::now();
        info!(job_id = %job_id, media_kind = %artifact.media_kind, "Job processing started");

        match self.execute(job_id, artifact).await {
            Ok(status) => {
                info!(
                    job_id = %job_id,
                    status = %status,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job processing finished"
                );
                status
            }
            Err(DriverError::Registry(RegistryError::NotFound(_))) => {
                warn!(job_id = %job_id, "Job disappeared from registry during processing");
                JobStatus::Error
            }
            Err(DriverError::Registry(RegistryError::AlreadyTerminal { status, .. })) => {
                debug!(job_id = %job_id, status = %status, "Job already terminal, driver stopping");
                status
            }
            Err(e) => {
                let message = e.to_string();
                match self.registry.fail(job_id, message.clone()) {
                    Ok(true) => {
                        self.hub.publish(job_id, JobEvent::failed(message));
                    }
                    Ok(false) => {}
                    Err(e) => warn!(job_id = %job_id, error = %e, "Could not record job failure"),
                }
                JobStatus::Error
            }
        }
    }

    async fn execute(&self, job_id: Uuid, artifact: &MediaArtifact) -> Result<JobStatus, DriverError> {
        let media_kind = self.registry.get(job_id)?.media_kind;

        let snapshot = self.registry.update_progress(job_id, 0.0, "Starting analysis")?;
        self.hub.publish(
            job_id,
            JobEvent::progress(snapshot.progress_percentage, snapshot.status_message),
        );

        let stalled = || AnalyzerError::Stalled(self.idle_timeout);
        let RecordStream {
            total_units,
            mut records,
        } = tokio::time::timeout(self.idle_timeout, self.analyzer.analyze(artifact))
            .await
            .map_err(|_| stalled())??;
        debug!(job_id = %job_id, total_units = ?total_units, "Record stream opened");

        let mut progress = ProgressEstimator::new(total_units);
        let mut alert_count = 0u64;

        loop {
            let next = tokio::time::timeout(self.idle_timeout, records.next())
                .await
                .map_err(|_| stalled())?;
            let Some(record) = next else {
                break;
            };
            let record = record?;
            check_media_kind(media_kind, &record)?;

            let Translation { finding, alert } = self.translator.translate(job_id, &record);
            let label = finding.position_label();
            self.registry.append_finding(job_id, finding)?;

            let snapshot =
                self.registry
                    .update_progress(job_id, progress.advance(), format!("Analyzed {}", label))?;
            self.hub.publish(
                job_id,
                JobEvent::progress(snapshot.progress_percentage, snapshot.status_message),
            );

            if let Some(alert) = alert {
                alert_count += 1;
                debug!(
                    job_id = %job_id,
                    severity = %alert.severity,
                    category = %alert.anomaly_category,
                    "Alert raised"
                );
                self.hub.publish(job_id, JobEvent::Alert(alert));
            }
        }

        let snapshot = self
            .registry
            .update_progress(job_id, progress.current(), "Generating report")?;
        self.hub.publish(
            job_id,
            JobEvent::progress(snapshot.progress_percentage, snapshot.status_message),
        );

        let job = self.registry.get(job_id)?;
        let temporal_patterns = detect_patterns(&job.findings);
        if !temporal_patterns.is_empty() {
            debug!(job_id = %job_id, patterns = temporal_patterns.len(), "Temporal patterns found");
        }

        let report = self
            .reports
            .generate(&ReportInput {
                job_id,
                media_kind,
                findings: &job.findings,
                temporal_patterns: &temporal_patterns,
            })
            .await;

        if self.registry.complete(job_id, report, temporal_patterns)? {
            let job = self.registry.get(job_id)?;
            if let Some(summary) = job.completion_summary(alert_count) {
                self.hub.publish(job_id, JobEvent::Completed(summary));
            }
        }

        info!(
            job_id = %job_id,
            units = progress.processed(),
            alerts = alert_count,
            "Analysis finished"
        );
        Ok(self.registry.status(job_id)?.status)
    }
}

fn check_media_kind(expected: MediaKind, record: &RawRecord) -> Result<(), AnalyzerError> {
    let actual = match record {
        RawRecord::Frame(_) => MediaKind::Video,
        RawRecord::Segment(_) => MediaKind::Audio,
    };
    if actual != expected {
        return Err(AnalyzerError::UnexpectedRecord(format!(
            "{} record in a {} job",
            actual, expected
        )));
    }
    Ok(())
}
