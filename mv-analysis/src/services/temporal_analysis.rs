//! Temporal pattern analysis over a finished job's findings
//!
//! Runs once after the record stream ends. Two patterns are reported:
//! - Progressive bleeding: the least-squares slope of bleeding detections per
//!   frame exceeds [`BLEEDING_SLOPE_THRESHOLD`] over a window of
//!   [`BLEEDING_WINDOW`] frames. Overlapping qualifying windows merge into a
//!   single span.
//! - Abrupt escalation: a unit is critical while the unit before it was not.
//!
//! Pure: takes findings in processing order, returns patterns in media order.

use mv_common::events::{AlertPosition, Severity, TemporalPattern};

use crate::models::Finding;
use crate::services::finding_translator::BLEEDING_CATEGORY;

/// Frames per progressive-bleeding window
pub const BLEEDING_WINDOW: usize = 10;

/// Minimum slope, in bleeding detections per frame, to flag a window
pub const BLEEDING_SLOPE_THRESHOLD: f64 = 0.3;

/// All temporal patterns in `findings`
pub fn detect_patterns(findings: &[Finding]) -> Vec<TemporalPattern> {
    let mut patterns = progressive_bleeding(findings);
    patterns.extend(abrupt_escalations(findings));
    patterns
}

struct FrameSample {
    frame_number: u64,
    timestamp_seconds: f64,
    bleeding: f64,
}

fn progressive_bleeding(findings: &[Finding]) -> Vec<TemporalPattern> {
    let frames: Vec<FrameSample> = findings
        .iter()
        .filter_map(|finding| match finding {
            Finding::Video {
                frame_number,
                timestamp_seconds,
                detections,
                ..
            } => Some(FrameSample {
                frame_number: *frame_number,
                timestamp_seconds: *timestamp_seconds,
                bleeding: detections
                    .iter()
                    .filter(|d| d.anomaly_category == BLEEDING_CATEGORY)
                    .count() as f64,
            }),
            Finding::Audio { .. } => None,
        })
        .collect();

    if frames.len() < BLEEDING_WINDOW {
        return Vec::new();
    }

    // (first index, last index, steepest slope)
    let mut spans: Vec<(usize, usize, f64)> = Vec::new();
    for start in 0..=frames.len() - BLEEDING_WINDOW {
        let end = start + BLEEDING_WINDOW - 1;
        let counts: Vec<f64> = frames[start..=end].iter().map(|f| f.bleeding).collect();
        let slope = linear_slope(&counts);
        if slope <= BLEEDING_SLOPE_THRESHOLD {
            continue;
        }

        match spans.last_mut() {
            Some((_, last, steepest)) if start <= *last => {
                *last = end;
                *steepest = steepest.max(slope);
            }
            _ => spans.push((start, end, slope)),
        }
    }

    spans
        .into_iter()
        .map(|(first, last, slope)| TemporalPattern::ProgressiveBleeding {
            start_frame: frames[first].frame_number,
            end_frame: frames[last].frame_number,
            start_seconds: frames[first].timestamp_seconds,
            end_seconds: frames[last].timestamp_seconds,
            slope,
        })
        .collect()
}

fn abrupt_escalations(findings: &[Finding]) -> Vec<TemporalPattern> {
    findings
        .windows(2)
        .filter(|pair| pair[0].severity() < Severity::Critical && pair[1].severity() == Severity::Critical)
        .map(|pair| TemporalPattern::AbruptEscalation {
            position: position_of(&pair[1]),
            previous: pair[0].severity(),
        })
        .collect()
}

fn position_of(finding: &Finding) -> AlertPosition {
    match finding {
        Finding::Video {
            frame_number,
            timestamp_seconds,
            ..
        } => AlertPosition::Frame {
            frame_number: *frame_number,
            timestamp_seconds: *timestamp_seconds,
        },
        Finding::Audio {
            segment_start,
            segment_end,
            ..
        } => AlertPosition::Segment {
            start_seconds: *segment_start,
            end_seconds: *segment_end,
        },
    }
}

/// Least-squares slope of `values` against their indices
fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 2 {
        return 0.0;
    }
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }
    sxy / sxx
}
