//! Append-only step trace for one pipeline run.
//!
//! Steps are recorded from concurrently-completing tasks; the log preserves
//! emission order. Hosts that want incremental delivery attach an unbounded
//! channel via `with_stream` and receive every step as it settles; the
//! batched vector is always available at the end of the run.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::types::{PipelineStep, StepStatus};

/// Collector for the run's audit log.
pub struct TraceLog {
    steps: Mutex<Vec<PipelineStep>>,
    stream: Option<mpsc::UnboundedSender<PipelineStep>>,
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceLog {
    pub fn new() -> Self {
        Self {
            steps: Mutex::new(Vec::new()),
            stream: None,
        }
    }

    /// Stream every recorded step to `tx` as it settles, in addition to
    /// batching. A dropped receiver is ignored — streaming is best-effort.
    pub fn with_stream(tx: mpsc::UnboundedSender<PipelineStep>) -> Self {
        Self {
            steps: Mutex::new(Vec::new()),
            stream: Some(tx),
        }
    }

    fn lock_steps(&self) -> MutexGuard<'_, Vec<PipelineStep>> {
        self.steps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one record.
    pub fn record(&self, step: PipelineStep) {
        if let Some(ref tx) = self.stream {
            let _ = tx.send(step.clone());
        }
        self.lock_steps().push(step);
    }

    pub fn success(&self, step_name: &str, message: impl Into<String>) {
        self.record(PipelineStep::now(step_name, StepStatus::Success, message));
    }

    pub fn running(&self, step_name: &str, message: impl Into<String>) {
        self.record(PipelineStep::now(step_name, StepStatus::Running, message));
    }

    pub fn warning(&self, step_name: &str, message: impl Into<String>) {
        self.record(PipelineStep::now(step_name, StepStatus::Warning, message));
    }

    pub fn error(&self, step_name: &str, message: impl Into<String>) {
        self.record(PipelineStep::now(step_name, StepStatus::Error, message));
    }

    /// Messages of every warning/error step recorded so far.
    pub fn carried_warnings(&self) -> Vec<String> {
        self.lock_steps()
            .iter()
            .filter(|s| s.is_warning_or_error())
            .map(|s| format!("{}: {}", s.step_name, s.message))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock_steps().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume the log into the final ordered step list.
    pub fn into_steps(self) -> Vec<PipelineStep> {
        self.steps.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
