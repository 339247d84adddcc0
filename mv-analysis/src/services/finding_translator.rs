//! Raw detector output -> classified findings and alerts
//!
//! Pure: no registry access, no publishing. The job driver decides what to do
//! with the result.

use chrono::Utc;
use mv_common::events::{Alert, AlertPosition, Severity};
use std::cmp::Ordering;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Detection, Finding, IndicatorScore};
use crate::services::media_analyzer::{RawFrame, RawRecord, RawSegment};
use crate::services::severity_classifier::ThresholdTable;

pub(crate) const BLEEDING_CATEGORY: &str = "surgical_bleeding";

/// Result of translating one raw record
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub finding: Finding,
    /// Present when the finding reaches the alert threshold
    pub alert: Option<Alert>,
}

/// Applies the threshold table and alert threshold to raw records
#[derive(Debug, Clone)]
pub struct FindingTranslator {
    thresholds: Arc<ThresholdTable>,
    alert_threshold: Severity,
}

impl FindingTranslator {
    pub fn new(thresholds: Arc<ThresholdTable>, alert_threshold: Severity) -> Self {
        Self {
            thresholds,
            alert_threshold,
        }
    }

    pub fn alert_threshold(&self) -> Severity {
        self.alert_threshold
    }

    pub fn translate(&self, job_id: Uuid, record: &RawRecord) -> Translation {
        match record {
            RawRecord::Frame(frame) => self.translate_frame(job_id, frame),
            RawRecord::Segment(segment) => self.translate_segment(job_id, segment),
        }
    }

    fn translate_frame(&self, job_id: Uuid, frame: &RawFrame) -> Translation {
        let detections: Vec<Detection> = frame
            .detections
            .iter()
            .map(|raw| {
                let category = raw
                    .anomaly_category
                    .clone()
                    .unwrap_or_else(|| raw.label.clone());
                let confidence = normalize_confidence(raw.confidence);
                Detection {
                    bbox: raw.bbox,
                    confidence,
                    label: raw.label.clone(),
                    severity: self.thresholds.classify(&category, confidence),
                    anomaly_category: category,
                }
            })
            .collect();

        let severity = detections
            .iter()
            .map(|d| d.severity)
            .max()
            .unwrap_or(Severity::Info);

        let alert = if severity >= self.alert_threshold {
            detections
                .iter()
                .max_by(|a, b| rank(a.severity, a.confidence, b.severity, b.confidence))
                .map(|top| Alert {
                    alert_id: format!("alert-{}-{}", job_id, frame.frame_number),
                    severity: top.severity,
                    anomaly_category: top.anomaly_category.clone(),
                    message: alert_message(
                        &top.anomaly_category,
                        top.confidence,
                        &format!(
                            "at frame {} (t={:.1}s)",
                            frame.frame_number, frame.timestamp_seconds
                        ),
                    ),
                    position: AlertPosition::Frame {
                        frame_number: frame.frame_number,
                        timestamp_seconds: frame.timestamp_seconds,
                    },
                    confidence: top.confidence,
                    emitted_at: Utc::now(),
                })
        } else {
            None
        };

        Translation {
            finding: Finding::Video {
                frame_number: frame.frame_number,
                timestamp_seconds: frame.timestamp_seconds,
                detections,
                severity,
            },
            alert,
        }
    }

    fn translate_segment(&self, job_id: Uuid, segment: &RawSegment) -> Translation {
        let indicators: Vec<IndicatorScore> = segment
            .indicators
            .iter()
            .map(|raw| {
                let confidence = normalize_confidence(raw.confidence);
                IndicatorScore {
                    category: raw.category.clone(),
                    confidence,
                    severity: self.thresholds.classify(&raw.category, confidence),
                }
            })
            .collect();

        let strongest = indicators
            .iter()
            .max_by(|a, b| rank(a.severity, a.confidence, b.severity, b.confidence))
            .cloned();

        let severity = strongest
            .as_ref()
            .map(|i| i.severity)
            .unwrap_or(Severity::Info);

        let alert = strongest
            .as_ref()
            .filter(|top| top.severity >= self.alert_threshold)
            .map(|top| Alert {
                alert_id: format!(
                    "alert-{}-s{}",
                    job_id,
                    (segment.segment_start.max(0.0) * 1000.0) as u64
                ),
                severity: top.severity,
                anomaly_category: top.category.clone(),
                message: alert_message(
                    &top.category,
                    top.confidence,
                    &format!(
                        "in segment {:.1}s-{:.1}s",
                        segment.segment_start, segment.segment_end
                    ),
                ),
                position: AlertPosition::Segment {
                    start_seconds: segment.segment_start,
                    end_seconds: segment.segment_end,
                },
                confidence: top.confidence,
                emitted_at: Utc::now(),
            });

        Translation {
            finding: Finding::Audio {
                segment_start: segment.segment_start,
                segment_end: segment.segment_end,
                psychological_indicator: strongest.as_ref().map(|i| i.category.clone()),
                confidence: strongest.as_ref().map(|i| i.confidence).unwrap_or(0.0),
                severity,
                indicators,
            },
            alert,
        }
    }
}

fn rank(a_sev: Severity, a_conf: f64, b_sev: Severity, b_conf: f64) -> Ordering {
    a_sev.cmp(&b_sev).then(a_conf.total_cmp(&b_conf))
}

/// Clamp into [0, 1]; NaN becomes 0
fn normalize_confidence(raw: f64) -> f64 {
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 1.0)
    }
}

/// "surgical_bleeding" -> "Surgical bleeding"
pub fn display_category(category: &str) -> String {
    let spaced = category.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn alert_message(category: &str, confidence: f64, position: &str) -> String {
    let mut message = format!(
        "{} detected with {:.0}% confidence {}",
        display_category(category),
        confidence * 100.0,
        position
    );
    if category == BLEEDING_CATEGORY {
        message.push_str(". Possible abnormal bleeding.");
    }
    message
}
