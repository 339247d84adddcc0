//! Analysis API handlers
//!
//! POST /api/v1/{video,audio}/analyze, GET status/result/critical-frames,
//! DELETE /api/v1/analysis/:job_id

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use mv_common::events::{
    JobStatus, MediaKind, Severity, SeverityCounts, StatusSnapshot, TemporalPattern,
};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    models::{Finding, MediaArtifact, Report},
    utils::{sanitize_filename, upload_path, validate_extension, validate_size, UploadError},
    AppState, UploadRecord,
};

/// Default and maximum `limit` for the critical-frames listing
const DEFAULT_CRITICAL_LIMIT: usize = 10;
const MAX_CRITICAL_LIMIT: usize = 100;

/// POST /api/v1/{kind}/analyze response
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub filename: String,
    pub media_kind: MediaKind,
    pub status: JobStatus,
    pub message: String,
}

/// GET /api/v1/analysis/:job_id/result response
#[derive(Debug, Serialize)]
pub struct ResultResponse {
    pub job_id: Uuid,
    pub media_kind: MediaKind,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub processing_time_seconds: f64,
    pub severity_counts: SeverityCounts,
    pub overall_severity: Severity,
    pub findings: Vec<Finding>,
    pub temporal_patterns: Vec<TemporalPattern>,
    pub report: Report,
}

#[derive(Debug, Deserialize)]
pub struct CriticalQuery {
    pub limit: Option<usize>,
}

/// GET /api/v1/analysis/:job_id/critical-frames response
#[derive(Debug, Serialize)]
pub struct CriticalFindingsResponse {
    pub job_id: Uuid,
    /// Findings at warning or above, before `limit` was applied
    pub total: usize,
    pub findings: Vec<Finding>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub job_id: Uuid,
    pub deleted: bool,
}

/// POST /api/v1/video/analyze
pub async fn submit_video(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    submit(state, MediaKind::Video, multipart).await
}

/// POST /api/v1/audio/analyze
pub async fn submit_audio(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    submit(state, MediaKind::Audio, multipart).await
}

/// Validate and store the upload, register the job, start its driver.
///
/// Returns 202 Accepted; processing continues in the background.
async fn submit(
    state: AppState,
    media_kind: MediaKind,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let (upload, size_bytes) = receive_upload(&state, media_kind, multipart).await?;

    let job_id = state.registry.create(media_kind);
    state.uploads.write().await.insert(job_id, upload.clone());

    tracing::info!(
        job_id = %job_id,
        media_kind = %media_kind,
        filename = %upload.filename,
        size_bytes,
        "Analysis submitted"
    );

    let artifact = MediaArtifact {
        path: upload.path,
        media_kind,
        filename: upload.filename.clone(),
        size_bytes,
    };
    state.driver.spawn(job_id, artifact);

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id,
            filename: upload.filename,
            media_kind,
            status: JobStatus::Pending,
            message: format!(
                "Analysis queued. Connect to /ws/analysis/{} for live updates.",
                job_id
            ),
        }),
    ))
}

/// Stream the `file` field to disk, enforcing extension and size limits
async fn receive_upload(
    state: &AppState,
    media_kind: MediaKind,
    mut multipart: Multipart,
) -> ApiResult<(UploadRecord, u64)> {
    let storage = &state.config.storage;
    let max_bytes = storage.max_upload_bytes();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let original = field
            .file_name()
            .map(str::to_string)
            .ok_or(UploadError::MissingFilename)?;
        let filename = sanitize_filename(&original);
        validate_extension(&filename, storage.extensions_for(media_kind))?;

        tokio::fs::create_dir_all(&storage.upload_dir).await?;
        let path = upload_path(&storage.upload_dir, Uuid::new_v4(), &filename);
        let mut file = tokio::fs::File::create(&path).await?;
        let mut size = 0u64;

        let written = async {
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?
            {
                size += chunk.len() as u64;
                validate_size(size, max_bytes)?;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            validate_size(size, max_bytes)?;
            Ok::<(), ApiError>(())
        }
        .await;

        if let Err(e) = written {
            drop(file);
            if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                tracing::debug!(path = %path.display(), error = %remove_err, "Could not remove rejected upload");
            }
            return Err(e);
        }

        return Ok((UploadRecord { path, filename }, size));
    }

    Err(UploadError::MissingFile.into())
}

/// GET /api/v1/analysis/:job_id/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<StatusSnapshot>> {
    Ok(Json(state.registry.status(job_id)?))
}

/// GET /api/v1/analysis/:job_id/result
///
/// 409 until the job is COMPLETED.
pub async fn get_result(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<ResultResponse>> {
    let job = state.registry.get(job_id)?;

    let report = match (&job.status, &job.report) {
        (JobStatus::Completed, Some(report)) => report.clone(),
        _ => {
            return Err(ApiError::Conflict(format!(
                "Analysis not completed. Current status: {}",
                job.status
            )))
        }
    };

    let filename = state
        .uploads
        .read()
        .await
        .get(&job_id)
        .map(|u| u.filename.clone());

    Ok(Json(ResultResponse {
        job_id,
        media_kind: job.media_kind,
        status: job.status,
        filename,
        created_at: job.created_at,
        finished_at: job.finished_at,
        processing_time_seconds: job.processing_time_seconds(),
        severity_counts: job.severity_counts(),
        overall_severity: job.overall_severity(),
        findings: job.findings,
        temporal_patterns: job.temporal_patterns,
        report,
    }))
}

/// GET /api/v1/analysis/:job_id/critical-frames?limit=N
///
/// Findings at warning or above, most severe first.
pub async fn get_critical_findings(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(query): Query<CriticalQuery>,
) -> ApiResult<Json<CriticalFindingsResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_CRITICAL_LIMIT)
        .clamp(1, MAX_CRITICAL_LIMIT);

    let job = state.registry.get(job_id)?;
    let mut findings: Vec<Finding> = job
        .findings
        .into_iter()
        .filter(|f| f.severity() >= Severity::Warning)
        .collect();
    findings.sort_by(|a, b| b.severity().cmp(&a.severity()));

    let total = findings.len();
    findings.truncate(limit);

    Ok(Json(CriticalFindingsResponse {
        job_id,
        total,
        findings,
    }))
}

/// DELETE /api/v1/analysis/:job_id
///
/// Only finished jobs can be deleted; running jobs answer 409.
pub async fn delete_analysis(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<DeleteResponse>> {
    state.registry.remove(job_id)?;
    state.hub.forget(job_id);

    let upload = state.uploads.write().await.remove(&job_id);
    if let Some(upload) = upload {
        match tokio::fs::remove_file(&upload.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to remove upload");
                state.record_error(format!("Failed to remove upload for {}: {}", job_id, e)).await;
            }
        }
    }

    tracing::info!(job_id = %job_id, "Analysis deleted");
    Ok(Json(DeleteResponse {
        job_id,
        deleted: true,
    }))
}

/// Build analysis routes
pub fn analysis_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/video/analyze", post(submit_video))
        .route("/api/v1/audio/analyze", post(submit_audio))
        .route("/api/v1/analysis/:job_id/status", get(get_status))
        .route("/api/v1/analysis/:job_id/result", get(get_result))
        .route(
            "/api/v1/analysis/:job_id/critical-frames",
            get(get_critical_findings),
        )
        .route("/api/v1/analysis/:job_id", axum::routing::delete(delete_analysis))
}
