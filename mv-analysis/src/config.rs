//! Service configuration
//!
//! Layered: compiled defaults, then the TOML file, then `MV_*` environment
//! overrides. CLI flags are applied last by `main`.

use mv_common::config::{env_override, load_toml, resolve_config_path, LoggingConfig};
use mv_common::events::{MediaKind, Severity};
use mv_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::services::report_generator::ReportSettings;
use crate::services::severity_classifier::ThresholdTable;

/// Default config file name, looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "mv-analysis.toml";

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "MV_CONFIG";

/// Smallest accepted heartbeat interval
const MIN_HEARTBEAT_SECS: u64 = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub detector: DetectorConfig,
    pub narrative: NarrativeConfig,
    pub report: ReportSettings,
    pub events: EventsConfig,
    pub classification: ClassificationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory uploaded media is written to
    pub upload_dir: PathBuf,
    pub max_upload_mb: u64,
    /// Keep uploads after their job finished
    pub retain_uploads: bool,
    pub video_extensions: Vec<String>,
    pub audio_extensions: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("./mv_data/uploads"),
            max_upload_mb: 500,
            retain_uploads: true,
            video_extensions: ["mp4", "avi", "mov", "mkv"].map(String::from).to_vec(),
            audio_extensions: ["mp3", "wav", "m4a", "ogg", "webm"].map(String::from).to_vec(),
        }
    }
}

impl StorageConfig {
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn extensions_for(&self, media_kind: MediaKind) -> &[String] {
        match media_kind {
            MediaKind::Video => &self.video_extensions,
            MediaKind::Audio => &self.audio_extensions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub url: String,
    pub connect_timeout_secs: u64,
    /// A job fails once the detector stays silent this long
    pub idle_timeout_secs: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8001".to_string(),
            connect_timeout_secs: 10,
            idle_timeout_secs: 300,
        }
    }
}

impl DetectorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    pub base_url: String,
    pub model: String,
    /// Without a key every report is a fallback report
    pub api_key: Option<String>,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Per-subscription queue bound
    pub queue_capacity: usize,
    pub heartbeat_interval_secs: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            heartbeat_interval_secs: 30,
        }
    }
}

impl EventsConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Findings at or above this severity raise an alert
    pub alert_threshold: Severity,
    pub thresholds: ThresholdTable,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            alert_threshold: Severity::Warning,
            thresholds: ThresholdTable::default(),
        }
    }
}

impl AnalysisConfig {
    /// Resolve, load, override from the environment, and validate
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(cli_path, CONFIG_ENV_VAR, CONFIG_FILE_NAME);
        let mut config: AnalysisConfig = load_toml(path.as_deref())?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(port) = env_override("MV_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| Error::Config(format!("MV_PORT is not a valid port: {}", port)))?;
        }
        if let Some(bind) = env_override("MV_BIND") {
            self.server.bind = bind;
        }
        if let Some(dir) = env_override("MV_STORAGE_DIR") {
            self.storage.upload_dir = PathBuf::from(dir);
        }
        if let Some(url) = env_override("MV_DETECTOR_URL") {
            self.detector.url = url;
        }
        if let Some(key) = env_override("MV_REPORT_API_KEY") {
            self.narrative.api_key = Some(key);
        }
        if let Some(model) = env_override("MV_REPORT_MODEL") {
            self.narrative.model = model;
        }
        if let Some(level) = env_override("MV_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.classification
            .thresholds
            .validate()
            .map_err(Error::Config)?;

        if self.events.queue_capacity == 0 {
            return Err(Error::Config("events.queue_capacity must be at least 1".to_string()));
        }
        if self.events.heartbeat_interval_secs < MIN_HEARTBEAT_SECS {
            return Err(Error::Config(format!(
                "events.heartbeat_interval_secs must be at least {}",
                MIN_HEARTBEAT_SECS
            )));
        }
        if self.report.max_attempts == 0 {
            return Err(Error::Config("report.max_attempts must be at least 1".to_string()));
        }
        if self.report.attempt_timeout_secs == 0 {
            return Err(Error::Config(
                "report.attempt_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.report.total_timeout_secs == 0 {
            return Err(Error::Config("report.total_timeout_secs must be at least 1".to_string()));
        }
        if self.detector.idle_timeout_secs == 0 {
            return Err(Error::Config("detector.idle_timeout_secs must be at least 1".to_string()));
        }
        if self.report.base_delay_ms > self.report.max_delay_ms {
            return Err(Error::Config(
                "report.base_delay_ms must not exceed report.max_delay_ms".to_string(),
            ));
        }
        if self.storage.max_upload_mb == 0 {
            return Err(Error::Config("storage.max_upload_mb must be positive".to_string()));
        }
        Ok(())
    }

    /// Narrative API key, ignoring blank values
    pub fn narrative_api_key(&self) -> Option<&str> {
        self.narrative
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
    }
}
