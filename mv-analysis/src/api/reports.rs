//! Report listing and Markdown export
//!
//! GET /api/v1/reports, GET /api/v1/reports/:job_id/markdown

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use mv_common::events::{MediaKind, ReportSource, Severity};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    services::export_markdown,
    AppState,
};

/// One entry of the report listing
#[derive(Debug, Serialize, Deserialize)]
pub struct ReportSummary {
    pub job_id: Uuid,
    pub media_kind: MediaKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub report_source: ReportSource,
    pub overall_severity: Severity,
    pub total_findings: usize,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportListResponse {
    pub reports: Vec<ReportSummary>,
}

/// GET /api/v1/reports
///
/// Completed jobs, newest first.
pub async fn list_reports(State(state): State<AppState>) -> Json<ReportListResponse> {
    let uploads = state.uploads.read().await.clone();

    let reports = state
        .registry
        .list()
        .into_iter()
        .filter_map(|job| {
            let report = job.report.as_ref()?;
            Some(ReportSummary {
                job_id: job.job_id,
                media_kind: job.media_kind,
                filename: uploads.get(&job.job_id).map(|u| u.filename.clone()),
                report_source: report.source,
                overall_severity: job.overall_severity(),
                total_findings: job.findings.len(),
                generated_at: report.generated_at,
            })
        })
        .collect();

    Json(ReportListResponse { reports })
}

/// GET /api/v1/reports/:job_id/markdown
pub async fn export_report_markdown(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let job = state.registry.get(job_id)?;
    let markdown = export_markdown(&job).ok_or_else(|| {
        ApiError::Conflict(format!(
            "Analysis not completed. Current status: {}",
            job.status
        ))
    })?;

    let disposition = format!("attachment; filename=\"analysis-{}.md\"", job_id);
    Ok((
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        markdown,
    ))
}

/// Build report routes
pub fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/reports", get(list_reports))
        .route("/api/v1/reports/:job_id/markdown", get(export_report_markdown))
}
