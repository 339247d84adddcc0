//! Per-unit findings: one per video frame or audio segment

use mv_common::events::{MediaKind, Severity};
use serde::{Deserialize, Serialize};

/// Pixel-space bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// One object detected in a video frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Clamped to [0, 1]
    pub confidence: f64,
    /// Raw detector label
    pub label: String,
    pub anomaly_category: String,
    pub severity: Severity,
}

/// One psychological indicator scored for an audio segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorScore {
    pub category: String,
    pub confidence: f64,
    pub severity: Severity,
}

/// Classified result for one media unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "media_kind", rename_all = "lowercase")]
pub enum Finding {
    Video {
        frame_number: u64,
        timestamp_seconds: f64,
        detections: Vec<Detection>,
        /// Maximum detection severity; `info` with no detections
        severity: Severity,
    },
    Audio {
        segment_start: f64,
        segment_end: f64,
        /// Strongest indicator, if any scored
        psychological_indicator: Option<String>,
        confidence: f64,
        severity: Severity,
        indicators: Vec<IndicatorScore>,
    },
}

impl Finding {
    pub fn severity(&self) -> Severity {
        match self {
            Finding::Video { severity, .. } | Finding::Audio { severity, .. } => *severity,
        }
    }

    pub fn media_kind(&self) -> MediaKind {
        match self {
            Finding::Video { .. } => MediaKind::Video,
            Finding::Audio { .. } => MediaKind::Audio,
        }
    }

    /// Categories present in this finding, one entry per detection/indicator
    pub fn categories(&self) -> Vec<(&str, Severity)> {
        match self {
            Finding::Video { detections, .. } => detections
                .iter()
                .map(|d| (d.anomaly_category.as_str(), d.severity))
                .collect(),
            Finding::Audio { indicators, .. } => indicators
                .iter()
                .map(|i| (i.category.as_str(), i.severity))
                .collect(),
        }
    }

    /// Short position label: "frame 30 (t=1.0s)" or "segment 10.0s-20.0s"
    pub fn position_label(&self) -> String {
        match self {
            Finding::Video {
                frame_number,
                timestamp_seconds,
                ..
            } => format!("frame {} (t={:.1}s)", frame_number, timestamp_seconds),
            Finding::Audio {
                segment_start,
                segment_end,
                ..
            } => format!("segment {:.1}s-{:.1}s", segment_start, segment_end),
        }
    }
}
