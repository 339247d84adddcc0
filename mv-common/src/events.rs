//! Event and status types shared by the analysis service and its clients
//!
//! Everything here is serialized onto the wire, either in the persistent
//! channel envelope (see [`crate::protocol`]) or in the status endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Severity tier, ordered `Info < Warning < Critical`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Critical, Severity::Warning, Severity::Info];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(Error::InvalidInput(format!("unknown severity '{}'", other))),
        }
    }
}

/// Kind of media a job analyzes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            other => Err(Error::InvalidInput(format!("unknown media kind '{}'", other))),
        }
    }
}

/// Job lifecycle status
///
/// Transitions are strictly forward: `PENDING -> PROCESSING -> COMPLETED | ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    /// COMPLETED and ERROR are terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Cheap status view served by the polling endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress_percentage: f64,
    pub status_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Where in the media an alert was raised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "lowercase")]
pub enum AlertPosition {
    Frame {
        frame_number: u64,
        timestamp_seconds: f64,
    },
    Segment {
        start_seconds: f64,
        end_seconds: f64,
    },
}

/// Pattern spanning several media units, found after the stream ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TemporalPattern {
    /// Bleeding detections per frame trend upward across a window of frames
    ProgressiveBleeding {
        start_frame: u64,
        end_frame: u64,
        start_seconds: f64,
        end_seconds: f64,
        /// Steepest least-squares slope (detections per frame) in the span
        slope: f64,
    },
    /// A unit jumps to critical straight after an info or warning unit
    AbruptEscalation {
        position: AlertPosition,
        previous: Severity,
    },
}

impl TemporalPattern {
    pub fn severity(&self) -> Severity {
        match self {
            TemporalPattern::ProgressiveBleeding { .. } => Severity::Warning,
            TemporalPattern::AbruptEscalation { .. } => Severity::Critical,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            TemporalPattern::ProgressiveBleeding {
                start_seconds,
                end_seconds,
                ..
            } => format!(
                "Progressive increase in bleeding between {:.1}s and {:.1}s",
                start_seconds, end_seconds
            ),
            TemporalPattern::AbruptEscalation { position, previous } => {
                let at = match position {
                    AlertPosition::Frame {
                        timestamp_seconds, ..
                    } => format!("{:.1}s", timestamp_seconds),
                    AlertPosition::Segment {
                        start_seconds,
                        end_seconds,
                    } => format!("{:.1}s-{:.1}s", start_seconds, end_seconds),
                };
                format!("Abrupt severity change at {}: {} -> critical", at, previous)
            }
        }
    }
}

/// Real-time notification for a finding at or above the alert threshold
///
/// Alerts are published once and never stored with the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub severity: Severity,
    pub anomaly_category: String,
    pub message: String,
    pub position: AlertPosition,
    pub confidence: f64,
    pub emitted_at: DateTime<Utc>,
}

/// Where a report's narrative came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportSource {
    Generated,
    Fallback,
}

/// Per-severity finding counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: u64,
    pub warning: u64,
    pub info: u64,
}

impl SeverityCounts {
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::Warning => self.warning += 1,
            Severity::Info => self.info += 1,
        }
    }

    pub fn get(&self, severity: Severity) -> u64 {
        match severity {
            Severity::Critical => self.critical,
            Severity::Warning => self.warning,
            Severity::Info => self.info,
        }
    }

    pub fn total(&self) -> u64 {
        self.critical + self.warning + self.info
    }
}

/// Summary carried by the `completed` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionSummary {
    pub job_id: Uuid,
    pub media_kind: MediaKind,
    pub total_findings: u64,
    pub alert_count: u64,
    pub severity_counts: SeverityCounts,
    pub overall_severity: Severity,
    pub report_source: ReportSource,
    pub processing_time_seconds: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub temporal_patterns: Vec<TemporalPattern>,
}

/// Progress payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub percentage: f64,
    pub message: String,
}

/// Terminal failure payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureNotice {
    pub error_message: String,
}

/// Events published for a single job
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Progress(ProgressUpdate),
    Alert(Alert),
    Completed(CompletionSummary),
    Failed(FailureNotice),
    Heartbeat,
}

impl JobEvent {
    pub fn progress(percentage: f64, message: impl Into<String>) -> Self {
        JobEvent::Progress(ProgressUpdate {
            percentage,
            message: message.into(),
        })
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        JobEvent::Failed(FailureNotice {
            error_message: error_message.into(),
        })
    }

    /// `Completed` and `Failed` end the job's event stream and are never dropped
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed(_) | JobEvent::Failed(_))
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Progress(_) => "progress",
            JobEvent::Alert(_) => "alert",
            JobEvent::Completed(_) => "completed",
            JobEvent::Failed(_) => "failed",
            JobEvent::Heartbeat => "heartbeat",
        }
    }
}
