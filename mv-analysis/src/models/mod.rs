//! Data models for the analysis service
//!
//! - Job lifecycle and progress tracking
//! - Findings produced per media unit
//! - Final reports

pub mod analysis_job;
pub mod finding;
pub mod report;

pub use analysis_job::{AnalysisJob, MediaArtifact};
pub use finding::{BoundingBox, Detection, Finding, IndicatorScore};
pub use report::{Report, ReportInput};
