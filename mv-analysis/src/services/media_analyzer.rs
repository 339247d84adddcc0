//! Detection / feature-extraction collaborator contract
//!
//! The detector models live outside this service. An analyzer hands back a
//! lazy stream of raw per-unit records; the job driver pulls one record at a
//! time so findings and alerts are emitted as soon as each unit is scored.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::models::{BoundingBox, MediaArtifact};

/// Errors raised by an analyzer, before or during streaming
#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// Detector could not be reached or dropped the connection
    #[error("Detector unavailable: {0}")]
    Unavailable(String),

    /// Detector answered with a non-success status
    #[error("Detector rejected media (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Detector output could not be decoded
    #[error("Malformed detector output: {0}")]
    Protocol(String),

    /// Detector went quiet for longer than the idle timeout
    #[error("Detector sent no output for {:.1}s", .0.as_secs_f64())]
    Stalled(Duration),

    /// Record did not match the job's media kind
    #[error("Unexpected record: {0}")]
    UnexpectedRecord(String),

    /// Reading the uploaded media failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One detection as reported by the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
    /// Category assigned by the detector's label map; falls back to `label`
    #[serde(default)]
    pub anomaly_category: Option<String>,
}

/// Raw output for one sampled video frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    pub frame_number: u64,
    pub timestamp_seconds: f64,
    #[serde(default)]
    pub detections: Vec<RawDetection>,
}

/// One indicator score as reported by the acoustic extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawIndicator {
    pub category: String,
    pub confidence: f64,
}

/// Raw output for one audio segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSegment {
    pub segment_start: f64,
    pub segment_end: f64,
    #[serde(default)]
    pub indicators: Vec<RawIndicator>,
}

/// One raw per-unit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RawRecord {
    Frame(RawFrame),
    Segment(RawSegment),
}

/// Lazy record sequence plus the unit count, when the analyzer knows it
pub struct RecordStream {
    pub total_units: Option<u64>,
    pub records: BoxStream<'static, Result<RawRecord, AnalyzerError>>,
}

impl std::fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream")
            .field("total_units", &self.total_units)
            .finish_non_exhaustive()
    }
}

/// External media analysis collaborator
#[async_trait]
pub trait MediaAnalyzer: Send + Sync {
    /// Start analyzing `artifact` and return its record stream
    async fn analyze(&self, artifact: &MediaArtifact) -> Result<RecordStream, AnalyzerError>;
}
