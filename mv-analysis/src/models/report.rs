//! Narrative report attached to a completed job

use chrono::{DateTime, Utc};
use mv_common::events::{MediaKind, ReportSource, TemporalPattern};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Finding;

/// Final report; immutable once attached to a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub content: String,
    /// `generated` when the narrative service answered, `fallback` otherwise
    pub source: ReportSource,
    pub generated_at: DateTime<Utc>,
    /// External calls made while producing this report
    pub attempts: u32,
}

impl Report {
    pub fn is_fallback(&self) -> bool {
        self.source == ReportSource::Fallback
    }
}

/// What the report generator needs to know about a job
#[derive(Debug, Clone, Copy)]
pub struct ReportInput<'a> {
    pub job_id: Uuid,
    pub media_kind: MediaKind,
    pub findings: &'a [Finding],
    pub temporal_patterns: &'a [TemporalPattern],
}
