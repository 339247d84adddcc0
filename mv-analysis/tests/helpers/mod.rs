//! Test Helper Utilities
//!
//! Shared utilities for testing mv-analysis

#![allow(dead_code)]

pub mod records;
pub mod scripted;

pub use records::{detection, frame, segment};
pub use scripted::{ScriptedAnalyzer, ScriptedBackend, Step};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mv_analysis::config::AnalysisConfig;
use mv_analysis::services::{ReportGenerator, ReportSettings};
use mv_analysis::AppState;

/// Report retry settings that keep tests fast
pub fn fast_report_settings() -> ReportSettings {
    ReportSettings {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 4,
        attempt_timeout_secs: 5,
        total_timeout_secs: 10,
    }
}

/// Default config writing uploads under `dir`
pub fn test_config(dir: &Path) -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config.storage.upload_dir = dir.join("uploads");
    config.report = fast_report_settings();
    config
}

/// App state around a scripted analyzer and report backend
pub fn test_state(dir: &Path, analyzer: ScriptedAnalyzer, backend: Arc<ScriptedBackend>) -> AppState {
    let reports = ReportGenerator::new(backend, fast_report_settings());
    AppState::new(test_config(dir), Arc::new(analyzer), reports)
}

/// Router over [`test_state`]
pub fn create_test_app(
    dir: &Path,
    analyzer: ScriptedAnalyzer,
    backend: Arc<ScriptedBackend>,
) -> (axum::Router, AppState) {
    let state = test_state(dir, analyzer, backend);
    (mv_analysis::build_router(state.clone()), state)
}

/// Route service logs through the test harness; safe to call repeatedly
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("mv_analysis=debug")
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it returns true or `timeout` elapses
pub async fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
