//! In-memory job registry
//!
//! Single owner of every [`AnalysisJob`]. The outer map is only write-locked
//! to insert or remove entries; each job sits behind its own mutex so updates
//! to unrelated jobs never wait on each other. Readers always get a cloned
//! snapshot, never a reference into the registry.

use mv_common::events::{JobStatus, MediaKind, StatusSnapshot, TemporalPattern};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{AnalysisJob, Finding, Report};

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Job {job_id} is already {status}")]
    AlreadyTerminal { job_id: Uuid, status: JobStatus },

    #[error("Job {0} is still running")]
    JobActive(Uuid),

    #[error("Job {0} has not started processing")]
    NotStarted(Uuid),
}

type Entry = Arc<Mutex<AnalysisJob>>;

/// Registry of analysis jobs, cheap to clone
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<Uuid, Entry>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new PENDING job and return its id
    pub fn create(&self, media_kind: MediaKind) -> Uuid {
        let job = AnalysisJob::new(media_kind);
        let job_id = job.job_id;

        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id, Arc::new(Mutex::new(job)));

        info!(job_id = %job_id, media_kind = %media_kind, "Job created");
        job_id
    }

    fn entry(&self, job_id: Uuid) -> Result<Entry, RegistryError> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
            .cloned()
            .ok_or(RegistryError::NotFound(job_id))
    }

    fn lock(entry: &Entry) -> MutexGuard<'_, AnalysisJob> {
        entry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record progress; moves PENDING to PROCESSING
    ///
    /// Returns the snapshot after the update so callers publish the clamped
    /// (never decreasing) percentage.
    pub fn update_progress(
        &self,
        job_id: Uuid,
        percentage: f64,
        message: impl Into<String>,
    ) -> Result<StatusSnapshot, RegistryError> {
        let entry = self.entry(job_id)?;
        let mut job = Self::lock(&entry);

        if job.is_terminal() {
            return Err(RegistryError::AlreadyTerminal {
                job_id,
                status: job.status,
            });
        }

        let previous = job.status;
        job.record_progress(percentage, message);
        if previous != job.status {
            debug!(job_id = %job_id, from = %previous, to = %job.status, "Job status changed");
        }
        Ok(job.snapshot())
    }

    pub fn append_finding(&self, job_id: Uuid, finding: Finding) -> Result<(), RegistryError> {
        let entry = self.entry(job_id)?;
        let mut job = Self::lock(&entry);

        if job.is_terminal() {
            return Err(RegistryError::AlreadyTerminal {
                job_id,
                status: job.status,
            });
        }

        job.push_finding(finding);
        Ok(())
    }

    /// Attach the report and temporal patterns, and mark COMPLETED
    ///
    /// Returns `Ok(false)` without changes if the job is already terminal.
    /// A PENDING job cannot complete; it has to record progress first.
    pub fn complete(
        &self,
        job_id: Uuid,
        report: Report,
        temporal_patterns: Vec<TemporalPattern>,
    ) -> Result<bool, RegistryError> {
        let entry = self.entry(job_id)?;
        let mut job = Self::lock(&entry);

        match job.status {
            JobStatus::Completed | JobStatus::Error => {
                debug!(job_id = %job_id, status = %job.status, "Ignoring complete on terminal job");
                return Ok(false);
            }
            JobStatus::Pending => return Err(RegistryError::NotStarted(job_id)),
            JobStatus::Processing => {}
        }

        let source = report.source;
        job.finish(report, temporal_patterns);
        info!(
            job_id = %job_id,
            findings = job.findings.len(),
            report_source = ?source,
            "Job completed"
        );
        Ok(true)
    }

    /// Mark ERROR with a message
    ///
    /// Returns `Ok(false)` without changes if the job is already terminal.
    /// A PENDING job is moved through PROCESSING on its way to ERROR.
    pub fn fail(&self, job_id: Uuid, error_message: impl Into<String>) -> Result<bool, RegistryError> {
        let entry = self.entry(job_id)?;
        let mut job = Self::lock(&entry);

        if job.is_terminal() {
            debug!(job_id = %job_id, status = %job.status, "Ignoring fail on terminal job");
            return Ok(false);
        }

        let error_message = error_message.into();
        warn!(job_id = %job_id, error = %error_message, "Job failed");
        job.abort(error_message);
        Ok(true)
    }

    /// Full snapshot including findings and report
    pub fn get(&self, job_id: Uuid) -> Result<AnalysisJob, RegistryError> {
        let entry = self.entry(job_id)?;
        let job = Self::lock(&entry);
        Ok(job.clone())
    }

    /// Status-only snapshot; does not clone findings
    pub fn status(&self, job_id: Uuid) -> Result<StatusSnapshot, RegistryError> {
        let entry = self.entry(job_id)?;
        let job = Self::lock(&entry);
        Ok(job.snapshot())
    }

    /// Remove a terminal job
    pub fn remove(&self, job_id: Uuid) -> Result<AnalysisJob, RegistryError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let entry = jobs.get(&job_id).ok_or(RegistryError::NotFound(job_id))?;

        let job = Self::lock(entry).clone();
        if !job.is_terminal() {
            return Err(RegistryError::JobActive(job_id));
        }

        jobs.remove(&job_id);
        info!(job_id = %job_id, "Job removed");
        Ok(job)
    }

    /// Snapshots of every job, newest first
    pub fn list(&self) -> Vec<AnalysisJob> {
        let entries: Vec<Entry> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut jobs: Vec<AnalysisJob> = entries.iter().map(|e| Self::lock(e).clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Jobs not yet in a terminal state
    pub fn active_count(&self) -> usize {
        let entries: Vec<Entry> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        entries.iter().filter(|e| !Self::lock(e).is_terminal()).count()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
