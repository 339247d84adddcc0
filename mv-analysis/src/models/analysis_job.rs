//! Analysis job state machine
//!
//! A job progresses `PENDING -> PROCESSING -> COMPLETED | ERROR` and never
//! moves backwards. Only the job registry mutates jobs; everything else sees
//! cloned snapshots.

use chrono::{DateTime, Utc};
use mv_common::events::{
    CompletionSummary, JobStatus, MediaKind, Severity, SeverityCounts, StatusSnapshot,
    TemporalPattern,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::models::{Finding, Report};

/// Analysis job (in-memory state)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    /// Unique job identifier
    pub job_id: Uuid,

    pub media_kind: MediaKind,

    pub status: JobStatus,

    /// Percentage complete (0.0 - 100.0), never decreases
    pub progress_percentage: f64,

    /// Human-readable description of the current step
    pub status_message: String,

    /// Set only when status is ERROR
    pub error_message: Option<String>,

    /// Findings in the order their media units were processed
    pub findings: Vec<Finding>,

    /// Attached exactly once, on completion
    pub report: Option<Report>,

    /// Multi-unit patterns found once the record stream ended
    #[serde(default)]
    pub temporal_patterns: Vec<TemporalPattern>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Time the job entered PROCESSING
    pub started_at: Option<DateTime<Utc>>,

    /// Time the job reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
}

impl AnalysisJob {
    pub fn new(media_kind: MediaKind) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            media_kind,
            status: JobStatus::Pending,
            progress_percentage: 0.0,
            status_message: "Queued for analysis".to_string(),
            error_message: None,
            findings: Vec::new(),
            report: None,
            temporal_patterns: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record progress on a non-terminal job
    ///
    /// Moves PENDING to PROCESSING. Values below the current percentage are
    /// clamped up; NaN keeps the current value.
    pub fn record_progress(&mut self, percentage: f64, message: impl Into<String>) {
        debug_assert!(!self.is_terminal());

        self.begin();

        if !percentage.is_nan() {
            self.progress_percentage = percentage
                .clamp(0.0, 100.0)
                .max(self.progress_percentage);
        }
        self.status_message = message.into();
        self.updated_at = Utc::now();
    }

    /// PENDING -> PROCESSING; no-op in any other state
    pub fn begin(&mut self) {
        if self.status == JobStatus::Pending {
            self.status = JobStatus::Processing;
            self.started_at = Some(Utc::now());
        }
    }

    pub fn push_finding(&mut self, finding: Finding) {
        self.findings.push(finding);
        self.updated_at = Utc::now();
    }

    /// Mark COMPLETED with the final report and temporal patterns
    pub fn finish(&mut self, report: Report, temporal_patterns: Vec<TemporalPattern>) {
        debug_assert_eq!(self.status, JobStatus::Processing);
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.progress_percentage = 100.0;
        self.status_message = "Analysis complete".to_string();
        self.report = Some(report);
        self.temporal_patterns = temporal_patterns;
        self.updated_at = now;
        self.finished_at = Some(now);
    }

    /// Mark ERROR; progress stays where it stopped
    ///
    /// A job that fails before its first progress update still passes
    /// through PROCESSING, so `started_at` is always set on terminal jobs.
    pub fn abort(&mut self, error_message: impl Into<String>) {
        self.begin();
        let now = Utc::now();
        let error_message = error_message.into();
        self.status = JobStatus::Error;
        self.status_message = "Analysis failed".to_string();
        self.error_message = Some(error_message);
        self.updated_at = now;
        self.finished_at = Some(now);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            job_id: self.job_id,
            status: self.status,
            progress_percentage: self.progress_percentage,
            status_message: self.status_message.clone(),
            error_message: self.error_message.clone(),
        }
    }

    pub fn severity_counts(&self) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        for finding in &self.findings {
            counts.record(finding.severity());
        }
        counts
    }

    /// Highest severity across all findings, `Info` when there are none
    pub fn overall_severity(&self) -> Severity {
        self.findings
            .iter()
            .map(Finding::severity)
            .max()
            .unwrap_or(Severity::Info)
    }

    /// Wall-clock seconds between entering PROCESSING and finishing
    pub fn processing_time_seconds(&self) -> f64 {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => {
                (end - start).num_milliseconds().max(0) as f64 / 1000.0
            }
            _ => 0.0,
        }
    }

    /// Summary for the `completed` event; `None` until a report is attached
    pub fn completion_summary(&self, alert_count: u64) -> Option<CompletionSummary> {
        let report = self.report.as_ref()?;
        Some(CompletionSummary {
            job_id: self.job_id,
            media_kind: self.media_kind,
            total_findings: self.findings.len() as u64,
            alert_count,
            severity_counts: self.severity_counts(),
            overall_severity: self.overall_severity(),
            report_source: report.source,
            processing_time_seconds: self.processing_time_seconds(),
            temporal_patterns: self.temporal_patterns.clone(),
        })
    }
}

/// Uploaded media handed to the analyzer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaArtifact {
    pub path: PathBuf,
    pub media_kind: MediaKind,
    /// Sanitized client filename
    pub filename: String,
    pub size_bytes: u64,
}
