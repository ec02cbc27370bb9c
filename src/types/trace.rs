//! Pipeline trace types: PipelineStep, StepStatus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AnalysisKind;

/// Outcome of one pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Warning,
    Error,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// One append-only trace record.
///
/// Write-once: records accumulate across the run and are returned to the
/// caller as an audit log regardless of overall success. Emission order is
/// timestamp order and may interleave across concurrently-completing codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Stage or per-item step name (e.g. "parse", "resolve:70553")
    pub step_name: String,
    /// Sub-analysis that produced the step, when applicable
    pub tool: Option<AnalysisKind>,
    /// Step outcome
    pub status: StepStatus,
    /// Human-readable outcome message
    pub message: String,
    /// Optional structured detail
    pub data: Option<serde_json::Value>,
    /// Emission time
    pub timestamp: DateTime<Utc>,
}

impl PipelineStep {
    /// Build a step stamped with the current time
    pub fn now(
        step_name: impl Into<String>,
        status: StepStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            tool: None,
            status,
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the sub-analysis kind
    #[must_use]
    pub fn with_tool(mut self, tool: AnalysisKind) -> Self {
        self.tool = Some(tool);
        self
    }

    /// Attach structured detail
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_warning_or_error(&self) -> bool {
        matches!(self.status, StepStatus::Warning | StepStatus::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_builder() {
        let step = PipelineStep::now("resolve:70553", StepStatus::Warning, "lookup exhausted")
            .with_tool(AnalysisKind::RateAudit)
            .with_data(serde_json::json!({"attempts": 3}));
        assert_eq!(step.step_name, "resolve:70553");
        assert_eq!(step.tool, Some(AnalysisKind::RateAudit));
        assert!(step.is_warning_or_error());
        assert_eq!(step.data.unwrap()["attempts"], 3);
    }
}
