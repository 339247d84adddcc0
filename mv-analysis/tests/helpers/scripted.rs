//! Scripted stand-ins for the detector and narrative services

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mv_analysis::models::MediaArtifact;
use mv_analysis::services::{
    AnalyzerError, BackendError, MediaAnalyzer, RawRecord, RecordStream, ReportBackend,
};

/// One entry of an analyzer script
#[derive(Debug, Clone)]
pub enum Step {
    Record(RawRecord),
    /// Stream error with this message
    Fail(String),
}

/// Replays the same record script for every job
pub struct ScriptedAnalyzer {
    total_units: Option<u64>,
    steps: Vec<Step>,
    open_error: Option<String>,
    delay: Duration,
    calls: Arc<AtomicU32>,
}

impl ScriptedAnalyzer {
    pub fn new(total_units: Option<u64>, records: Vec<RawRecord>) -> Self {
        Self::with_steps(total_units, records.into_iter().map(Step::Record).collect())
    }

    pub fn with_steps(total_units: Option<u64>, steps: Vec<Step>) -> Self {
        Self {
            total_units,
            steps,
            open_error: None,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Analyzer whose `analyze` call itself fails
    pub fn unreachable(message: &str) -> Self {
        let mut analyzer = Self::with_steps(None, vec![]);
        analyzer.open_error = Some(message.to_string());
        analyzer
    }

    /// Sleep before yielding each step
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Shared counter of `analyze` calls
    pub fn call_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl MediaAnalyzer for ScriptedAnalyzer {
    async fn analyze(&self, _artifact: &MediaArtifact) -> Result<RecordStream, AnalyzerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.open_error {
            return Err(AnalyzerError::Unavailable(message.clone()));
        }

        let steps = self.steps.clone();
        let delay = self.delay;
        let records = async_stream::stream! {
            for step in steps {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                match step {
                    Step::Record(record) => yield Ok(record),
                    Step::Fail(message) => yield Err(AnalyzerError::Protocol(message)),
                }
            }
        };

        Ok(RecordStream {
            total_units: self.total_units,
            records: records.boxed(),
        })
    }
}

/// Narrative backend answering from a fixed list, then `Unavailable`
pub struct ScriptedBackend {
    outcomes: Mutex<Vec<Result<String, BackendError>>>,
    calls: AtomicU32,
}

impl ScriptedBackend {
    pub fn new(mut outcomes: Vec<Result<String, BackendError>>) -> Arc<Self> {
        outcomes.reverse();
        Arc::new(Self {
            outcomes: Mutex::new(outcomes),
            calls: AtomicU32::new(0),
        })
    }

    /// Always answers with `text`
    pub fn answering(text: &str) -> Arc<Self> {
        Self::new(vec![Ok(text.to_string()); 32])
    }

    pub fn unavailable() -> Arc<Self> {
        Self::new(vec![])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportBackend for ScriptedBackend {
    async fn generate(&self, _prompt: &str) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Err(BackendError::Unavailable("service down".to_string())))
    }
}
