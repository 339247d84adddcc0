//! Narrative report generation with bounded retries and deterministic fallback
//!
//! **Algorithm:**
//! 1. Build a prompt from the job's findings
//! 2. Call the backend, each attempt bounded by `attempt_timeout`
//! 3. On a transient failure, back off (`base * 2^(attempt-1)`, capped) and retry
//! 4. On a permanent failure, attempt exhaustion, or when the total deadline
//!    would be exceeded, build the fallback report from the findings alone
//!
//! `generate` never fails; every path ends in a [`Report`].

use chrono::Utc;
use mv_common::backoff::BackoffPolicy;
use mv_common::events::{MediaKind, ReportSource, Severity, SeverityCounts};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::models::{Finding, Report, ReportInput};
use crate::services::finding_translator::display_category;
use crate::services::generative_client::{BackendError, ReportBackend};

/// Critical entries listed in prompts and fallback reports
const CRITICAL_LISTING_LIMIT: usize = 20;

/// Retry and timeout settings for report generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// Maximum backend calls per report
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Bound on a single backend call
    pub attempt_timeout_secs: u64,
    /// Bound on the whole retry loop including backoff sleeps
    pub total_timeout_secs: u64,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 8000,
            attempt_timeout_secs: 60,
            total_timeout_secs: 180,
        }
    }
}

impl ReportSettings {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.max_attempts,
        )
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.total_timeout_secs)
    }
}

/// Produces the final report for a job
pub struct ReportGenerator {
    backend: Option<Arc<dyn ReportBackend>>,
    settings: ReportSettings,
    attempt_timeout: Duration,
    total_timeout: Duration,
}

impl ReportGenerator {
    pub fn new(backend: Arc<dyn ReportBackend>, settings: ReportSettings) -> Self {
        Self {
            backend: Some(backend),
            attempt_timeout: settings.attempt_timeout(),
            total_timeout: settings.total_timeout(),
            settings,
        }
    }

    /// Generator with no backend; every report is a fallback
    pub fn fallback_only() -> Self {
        let settings = ReportSettings::default();
        Self {
            backend: None,
            attempt_timeout: settings.attempt_timeout(),
            total_timeout: settings.total_timeout(),
            settings,
        }
    }

    /// Override the timeouts with sub-second precision
    pub fn with_timeouts(mut self, attempt_timeout: Duration, total_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self.total_timeout = total_timeout;
        self
    }

    pub fn settings(&self) -> &ReportSettings {
        &self.settings
    }

    pub async fn generate(&self, input: &ReportInput<'_>) -> Report {
        let Some(backend) = self.backend.as_ref() else {
            debug!(job_id = %input.job_id, "No narrative backend configured, using fallback report");
            return fallback_report(input, 0);
        };

        let prompt = build_prompt(input);
        let backoff = self.settings.backoff();
        let max_attempts = self.settings.max_attempts.max(1);
        let deadline = Instant::now() + self.total_timeout;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(job_id = %input.job_id, attempt, "Report deadline reached, using fallback report");
                return fallback_report(input, attempt - 1);
            }

            let call = backend.generate(&prompt);
            let error = match tokio::time::timeout(self.attempt_timeout.min(remaining), call).await {
                Ok(Ok(text)) if !text.trim().is_empty() => {
                    info!(job_id = %input.job_id, attempt, "Narrative report generated");
                    return Report {
                        content: text,
                        source: ReportSource::Generated,
                        generated_at: Utc::now(),
                        attempts: attempt,
                    };
                }
                Ok(Ok(_)) => BackendError::MalformedResponse("empty narrative".to_string()),
                Ok(Err(e)) => e,
                Err(_) => BackendError::Timeout,
            };

            if !error.is_retryable() {
                warn!(
                    job_id = %input.job_id,
                    attempt,
                    error = %error,
                    "Narrative service refused request, using fallback report"
                );
                return fallback_report(input, attempt);
            }

            if attempt >= max_attempts {
                warn!(
                    job_id = %input.job_id,
                    attempt,
                    error = %error,
                    "Narrative service retries exhausted, using fallback report"
                );
                return fallback_report(input, attempt);
            }

            let delay = backoff.delay_for(attempt);
            if Instant::now() + delay >= deadline {
                warn!(
                    job_id = %input.job_id,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    "Next retry would pass the report deadline, using fallback report"
                );
                return fallback_report(input, attempt);
            }

            warn!(
                job_id = %input.job_id,
                attempt,
                error = %error,
                backoff_ms = delay.as_millis() as u64,
                "Narrative service call failed, will retry after backoff"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn fallback_report(input: &ReportInput<'_>, attempts: u32) -> Report {
    Report {
        content: build_fallback_content(input),
        source: ReportSource::Fallback,
        generated_at: Utc::now(),
        attempts,
    }
}

/// Per-category tallies, sorted by category name
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CategoryCounts {
    pub total: u64,
    pub by_severity: SeverityCounts,
}

pub fn category_counts(findings: &[Finding]) -> BTreeMap<String, CategoryCounts> {
    let mut counts: BTreeMap<String, CategoryCounts> = BTreeMap::new();
    for finding in findings {
        for (category, severity) in finding.categories() {
            let entry = counts.entry(category.to_string()).or_default();
            entry.total += 1;
            entry.by_severity.record(severity);
        }
    }
    counts
}

fn severity_counts(findings: &[Finding]) -> SeverityCounts {
    let mut counts = SeverityCounts::default();
    for finding in findings {
        counts.record(finding.severity());
    }
    counts
}

fn unit_name(media_kind: MediaKind) -> &'static str {
    match media_kind {
        MediaKind::Video => "frames",
        MediaKind::Audio => "segments",
    }
}

/// One-line description of a finding's strongest category
fn describe(finding: &Finding) -> String {
    let top = finding
        .categories()
        .into_iter()
        .filter(|(_, s)| *s == finding.severity())
        .map(|(c, _)| display_category(c))
        .next()
        .unwrap_or_else(|| "No anomaly".to_string());

    let confidence = match finding {
        Finding::Video { detections, .. } => detections
            .iter()
            .filter(|d| d.severity == finding.severity())
            .map(|d| d.confidence)
            .fold(0.0, f64::max),
        Finding::Audio { confidence, .. } => *confidence,
    };

    let mut position = finding.position_label();
    if let Some(first) = position.get_mut(0..1) {
        first.make_ascii_uppercase();
    }

    format!("{}: {} ({:.0}%)", position, top, confidence * 100.0)
}

/// Deterministic summary built from findings only
pub fn build_fallback_content(input: &ReportInput<'_>) -> String {
    let findings = input.findings;
    let severities = severity_counts(findings);
    let categories = category_counts(findings);
    let unit = unit_name(input.media_kind);

    let mut out = String::new();
    let title = match input.media_kind {
        MediaKind::Video => "Surgical Video Analysis Report",
        MediaKind::Audio => "Consultation Audio Analysis Report",
    };
    let _ = writeln!(out, "# {} (automated summary)", title);
    let _ = writeln!(out);
    let _ = writeln!(out, "Job: {}", input.job_id);
    let _ = writeln!(out, "Analyzed {}: {}", unit, findings.len());
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "The narrative report service was unavailable. This summary was produced directly from the detection results and has not been reviewed."
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "## Findings by severity");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Severity | {} |", capitalize(unit));
    let _ = writeln!(out, "|----------|-------|");
    for severity in Severity::ALL {
        let _ = writeln!(out, "| {} | {} |", capitalize(severity.as_str()), severities.get(severity));
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Findings by category");
    let _ = writeln!(out);
    if categories.is_empty() {
        let _ = writeln!(out, "No anomalies were detected.");
    } else {
        let _ = writeln!(out, "| Category | Total | Critical | Warning | Info |");
        let _ = writeln!(out, "|----------|-------|----------|---------|------|");
        for (category, counts) in &categories {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                display_category(category),
                counts.total,
                counts.by_severity.critical,
                counts.by_severity.warning,
                counts.by_severity.info
            );
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Temporal patterns");
    let _ = writeln!(out);
    if input.temporal_patterns.is_empty() {
        let _ = writeln!(out, "None.");
    } else {
        for pattern in input.temporal_patterns {
            let _ = writeln!(out, "- [{}] {}", pattern.severity(), pattern.describe());
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Critical {}", unit);
    let _ = writeln!(out);
    let critical: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.severity() == Severity::Critical)
        .collect();
    if critical.is_empty() {
        let _ = writeln!(out, "None.");
    } else {
        for finding in critical.iter().take(CRITICAL_LISTING_LIMIT) {
            let _ = writeln!(out, "- {}", describe(finding));
        }
        if critical.len() > CRITICAL_LISTING_LIMIT {
            let _ = writeln!(out, "- ... and {} more", critical.len() - CRITICAL_LISTING_LIMIT);
        }
    }

    out
}

/// Prompt for the narrative model
pub fn build_prompt(input: &ReportInput<'_>) -> String {
    let findings = input.findings;
    let severities = severity_counts(findings);
    let categories = category_counts(findings);

    let mut out = String::new();
    match input.media_kind {
        MediaKind::Video => {
            let _ = writeln!(
                out,
                "You are assisting a surgical quality reviewer. Write a concise clinical report on an analyzed surgical video."
            );
            let _ = writeln!(
                out,
                "Cover: overall assessment, notable bleeding or abnormal movement events with timestamps, instruments observed, and recommendations."
            );
        }
        MediaKind::Audio => {
            let _ = writeln!(
                out,
                "You are assisting a mental health clinician. Write a concise summary of an analyzed consultation recording."
            );
            let _ = writeln!(
                out,
                "Cover: overall risk level, segments with elevated psychological indicators, observed patterns, and suggested follow-up. Do not make a diagnosis."
            );
        }
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Units analyzed: {}", findings.len());
    let _ = writeln!(
        out,
        "Severity counts: critical={}, warning={}, info={}",
        severities.critical, severities.warning, severities.info
    );
    for (category, counts) in &categories {
        let _ = writeln!(
            out,
            "Category {}: {} total, {} critical, {} warning",
            category, counts.total, counts.by_severity.critical, counts.by_severity.warning
        );
    }

    let notable: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.severity() >= Severity::Warning)
        .take(CRITICAL_LISTING_LIMIT)
        .collect();
    if !notable.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Notable {}:", unit_name(input.media_kind));
        for finding in notable {
            let _ = writeln!(out, "- [{}] {}", finding.severity(), describe(finding));
        }
    }

    if !input.temporal_patterns.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Patterns over time:");
        for pattern in input.temporal_patterns {
            let _ = writeln!(out, "- [{}] {}", pattern.severity(), pattern.describe());
        }
    }

    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
