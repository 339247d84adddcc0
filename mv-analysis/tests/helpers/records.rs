//! Builders for raw detector records

use mv_analysis::models::BoundingBox;
use mv_analysis::services::{RawDetection, RawFrame, RawIndicator, RawRecord, RawSegment};

pub fn detection(label: &str, category: Option<&str>, confidence: f64) -> RawDetection {
    RawDetection {
        label: label.to_string(),
        confidence,
        bbox: BoundingBox {
            x1: 10.0,
            y1: 20.0,
            x2: 110.0,
            y2: 140.0,
        },
        anomaly_category: category.map(str::to_string),
    }
}

/// Video frame at 30 fps
pub fn frame(frame_number: u64, detections: Vec<RawDetection>) -> RawRecord {
    RawRecord::Frame(RawFrame {
        frame_number,
        timestamp_seconds: frame_number as f64 / 30.0,
        detections,
    })
}

pub fn segment(start: f64, end: f64, indicators: &[(&str, f64)]) -> RawRecord {
    RawRecord::Segment(RawSegment {
        segment_start: start,
        segment_end: end,
        indicators: indicators
            .iter()
            .map(|(category, confidence)| RawIndicator {
                category: category.to_string(),
                confidence: *confidence,
            })
            .collect(),
    })
}
