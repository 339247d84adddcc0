//! mv-analysis library interface
//!
//! Exposes the service state and router for the binary and for integration
//! tests.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::AnalysisConfig;
use crate::services::{
    EventHub, FindingTranslator, GenerativeReportClient, HttpMediaAnalyzer, JobDriver,
    JobRegistry, MediaAnalyzer, ReportGenerator,
};

/// Multipart framing overhead allowed on top of the upload limit
const MULTIPART_SLACK_BYTES: u64 = 1024 * 1024;

/// Stored upload belonging to a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub path: PathBuf,
    /// Sanitized client filename
    pub filename: String,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AnalysisConfig>,
    /// Job lifecycle store
    pub registry: JobRegistry,
    /// Per-job event fan-out for persistent channels
    pub hub: EventHub,
    /// Runs submitted jobs
    pub driver: Arc<JobDriver>,
    /// Uploaded file per job
    pub uploads: Arc<RwLock<HashMap<Uuid, UploadRecord>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// Build state around explicit collaborators
    pub fn new(
        config: AnalysisConfig,
        analyzer: Arc<dyn MediaAnalyzer>,
        reports: ReportGenerator,
    ) -> Self {
        let registry = JobRegistry::new();
        let hub = EventHub::new(config.events.queue_capacity);
        let translator = FindingTranslator::new(
            Arc::new(config.classification.thresholds.clone()),
            config.classification.alert_threshold,
        );

        let mut driver = JobDriver::new(
            registry.clone(),
            hub.clone(),
            analyzer,
            translator,
            Arc::new(reports),
        )
        .with_idle_timeout(config.detector.idle_timeout());
        if !config.storage.retain_uploads {
            driver = driver.discard_uploads();
        }

        Self {
            config: Arc::new(config),
            registry,
            hub,
            driver: Arc::new(driver),
            uploads: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Build state with the HTTP detector and narrative clients from config
    pub fn from_config(config: AnalysisConfig) -> anyhow::Result<Self> {
        let analyzer = HttpMediaAnalyzer::new(
            config.detector.url.clone(),
            config.detector.connect_timeout(),
        )?;

        let reports = match config.narrative_api_key() {
            Some(key) => {
                let client = GenerativeReportClient::new(
                    config.narrative.base_url.clone(),
                    config.narrative.model.clone(),
                    key,
                    config.report.attempt_timeout(),
                )?;
                ReportGenerator::new(Arc::new(client), config.report.clone())
            }
            None => {
                tracing::warn!("No narrative API key configured; all reports will use the fallback summary");
                ReportGenerator::fallback_only()
            }
        };

        Ok(Self::new(config, Arc::new(analyzer), reports))
    }

    /// Remember an error for the health endpoint
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = state
        .config
        .storage
        .max_upload_bytes()
        .saturating_add(MULTIPART_SLACK_BYTES);

    Router::new()
        .merge(api::analysis_routes())
        .merge(api::report_routes())
        .merge(api::ws_routes())
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(usize::try_from(body_limit).unwrap_or(usize::MAX)))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
