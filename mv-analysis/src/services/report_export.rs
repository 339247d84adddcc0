//! Markdown export of completed jobs

use mv_common::events::{MediaKind, Severity};
use std::fmt::Write as _;

use crate::models::{AnalysisJob, Finding};
use crate::services::finding_translator::display_category;
use crate::services::report_generator::category_counts;

/// Rows shown in the "key moments" section
const KEY_MOMENT_LIMIT: usize = 10;

/// Render a completed job as a standalone Markdown document
///
/// Returns `None` if the job has no report yet.
pub fn export_markdown(job: &AnalysisJob) -> Option<String> {
    let report = job.report.as_ref()?;
    let counts = job.severity_counts();

    let mut out = String::new();
    let title = match job.media_kind {
        MediaKind::Video => "Surgical Video Analysis",
        MediaKind::Audio => "Consultation Audio Analysis",
    };
    let _ = writeln!(out, "# {}", title);
    let _ = writeln!(out);
    let _ = writeln!(out, "- **Job ID:** {}", job.job_id);
    let _ = writeln!(out, "- **Submitted:** {}", job.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "- **Processing time:** {:.1}s", job.processing_time_seconds());
    let _ = writeln!(out, "- **Overall severity:** {}", job.overall_severity());
    let _ = writeln!(out, "- **Report source:** {}", if report.is_fallback() { "fallback" } else { "generated" });
    let _ = writeln!(out);

    let _ = writeln!(out, "## Summary");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Critical | Warning | Info | Total |");
    let _ = writeln!(out, "|----------|---------|------|-------|");
    let _ = writeln!(
        out,
        "| {} | {} | {} | {} |",
        counts.critical,
        counts.warning,
        counts.info,
        counts.total()
    );
    let _ = writeln!(out);

    let categories = category_counts(&job.findings);
    if !categories.is_empty() {
        let _ = writeln!(out, "## Detections by category");
        let _ = writeln!(out);
        let _ = writeln!(out, "| Category | Count | Critical | Warning |");
        let _ = writeln!(out, "|----------|-------|----------|---------|");
        for (category, c) in &categories {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} |",
                display_category(category),
                c.total,
                c.by_severity.critical,
                c.by_severity.warning
            );
        }
        let _ = writeln!(out);
    }

    let mut key: Vec<&Finding> = job
        .findings
        .iter()
        .filter(|f| f.severity() >= Severity::Warning)
        .collect();
    // Most severe first; stable sort keeps media order within a tier
    key.sort_by(|a, b| b.severity().cmp(&a.severity()));

    if !key.is_empty() {
        let heading = match job.media_kind {
            MediaKind::Video => "Critical moments",
            MediaKind::Audio => "Segments of concern",
        };
        let _ = writeln!(out, "## {}", heading);
        let _ = writeln!(out);
        for finding in key.iter().take(KEY_MOMENT_LIMIT) {
            let _ = writeln!(out, "- **{}** {}{}", finding.severity(), finding.position_label(), detail(finding));
        }
        let _ = writeln!(out);
    }

    if !job.temporal_patterns.is_empty() {
        let _ = writeln!(out, "## Temporal patterns");
        let _ = writeln!(out);
        for pattern in &job.temporal_patterns {
            let _ = writeln!(out, "- **{}** {}", pattern.severity(), pattern.describe());
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "## Report");
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", report.content.trim_end());

    Some(out)
}

fn detail(finding: &Finding) -> String {
    let parts: Vec<String> = match finding {
        Finding::Video { detections, .. } => detections
            .iter()
            .filter(|d| d.severity >= Severity::Warning)
            .map(|d| format!("{} {:.0}%", display_category(&d.anomaly_category), d.confidence * 100.0))
            .collect(),
        Finding::Audio { indicators, .. } => indicators
            .iter()
            .filter(|i| i.severity >= Severity::Warning)
            .map(|i| format!("{} {:.0}%", display_category(&i.category), i.confidence * 100.0))
            .collect(),
    };

    if parts.is_empty() {
        String::new()
    } else {
        format!(": {}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IndicatorScore, Report};
    use chrono::Utc;
    use mv_common::events::{AlertPosition, ReportSource, TemporalPattern};

    fn audio_job() -> AnalysisJob {
        let mut job = AnalysisJob::new(MediaKind::Audio);
        job.record_progress(10.0, "working");
        job.push_finding(Finding::Audio {
            segment_start: 0.0,
            segment_end: 10.0,
            psychological_indicator: None,
            confidence: 0.0,
            severity: Severity::Info,
            indicators: vec![],
        });
        job.push_finding(Finding::Audio {
            segment_start: 10.0,
            segment_end: 20.0,
            psychological_indicator: Some("anxiety_indicator".to_string()),
            confidence: 0.9,
            severity: Severity::Critical,
            indicators: vec![IndicatorScore {
                category: "anxiety_indicator".to_string(),
                confidence: 0.9,
                severity: Severity::Critical,
            }],
        });
        job
    }

    #[test]
    fn test_no_markdown_before_completion() {
        assert!(export_markdown(&audio_job()).is_none());
    }

    #[test]
    fn test_markdown_sections() {
        let mut job = audio_job();
        job.finish(Report {
            content: "Patient showed elevated anxiety.\n".to_string(),
            source: ReportSource::Generated,
            generated_at: Utc::now(),
            attempts: 1,
        }, vec![]);

        let md = export_markdown(&job).unwrap();
        assert!(md.starts_with("# Consultation Audio Analysis"));
        assert!(md.contains("| 1 | 0 | 1 | 2 |"));
        assert!(md.contains("| Anxiety indicator | 1 | 1 | 0 |"));
        assert!(md.contains("## Segments of concern"));
        assert!(md.contains("- **critical** segment 10.0s-20.0s: Anxiety indicator 90%"));
        assert!(md.trim_end().ends_with("Patient showed elevated anxiety."));
        assert!(!md.contains("## Temporal patterns"));
    }

    #[test]
    fn test_markdown_lists_temporal_patterns() {
        let mut job = audio_job();
        job.finish(
            Report {
                content: "Summary.".to_string(),
                source: ReportSource::Fallback,
                generated_at: Utc::now(),
                attempts: 3,
            },
            vec![TemporalPattern::AbruptEscalation {
                position: AlertPosition::Segment {
                    start_seconds: 10.0,
                    end_seconds: 20.0,
                },
                previous: Severity::Info,
            }],
        );

        let md = export_markdown(&job).unwrap();
        assert!(md.contains(
            "## Temporal patterns\n\n- **critical** Abrupt severity change at 10.0s-20.0s: info -> critical"
        ));
    }
}
