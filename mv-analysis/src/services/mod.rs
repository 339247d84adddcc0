//! Business logic services for the analysis service
//!
//! The orchestration core (registry, classifier, translator, temporal
//! analysis, event hub, report generator, job driver) plus HTTP clients for the external
//! detection and narrative services.

pub mod detector_client;
pub mod event_broadcaster;
pub mod finding_translator;
pub mod generative_client;
pub mod job_driver;
pub mod job_registry;
pub mod media_analyzer;
pub mod report_export;
pub mod report_generator;
pub mod severity_classifier;
pub mod temporal_analysis;

pub use detector_client::HttpMediaAnalyzer;
pub use event_broadcaster::{EventHub, Subscription};
pub use finding_translator::{FindingTranslator, Translation};
pub use generative_client::{BackendError, GenerativeReportClient, ReportBackend};
pub use job_driver::{DriverError, JobDriver, ProgressEstimator};
pub use job_registry::{JobRegistry, RegistryError};
pub use media_analyzer::{
    AnalyzerError, MediaAnalyzer, RawDetection, RawFrame, RawIndicator, RawRecord, RawSegment,
    RecordStream,
};
pub use report_export::export_markdown;
pub use report_generator::{ReportGenerator, ReportSettings};
pub use severity_classifier::{CategoryThresholds, ThresholdTable};
pub use temporal_analysis::detect_patterns;
