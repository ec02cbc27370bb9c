//! Sub-analysis types: AnalysisKind, AnalysisStatus, SubAnalysisResult

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed enumeration of sub-analysis kinds.
///
/// Dispatch is by variant, never by string comparison; the registry in
/// `analysis::default_analyses` maps each kind to its implementation at
/// startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalysisKind {
    /// Local billing-error detection (duplicates, zero lines, rate outliers)
    ErrorScan,
    /// Per-code rate calculation from resolved lookup data
    RateAudit,
    /// Opaque external appeal-letter generation call
    AppealDraft,
}

impl AnalysisKind {
    /// Stable name used in trace records and log fields
    pub const fn name(self) -> &'static str {
        match self {
            Self::ErrorScan => "error_scan",
            Self::RateAudit => "rate_audit",
            Self::AppealDraft => "appeal_draft",
        }
    }
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Settled state of one sub-analysis invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisStatus {
    Success,
    Error,
}

/// One outcome per sub-analysis invocation.
///
/// Created when the analysis is invoked, immutable once settled, consumed
/// only by the aggregation stage. Failed analyses carry their error message
/// and an empty payload; they never abort the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAnalysisResult {
    /// Which analysis produced this result
    pub tool: AnalysisKind,
    /// Success or error
    pub status: AnalysisStatus,
    /// Opaque result payload (shape owned by the analysis)
    pub payload: serde_json::Value,
    /// Error message when status is Error
    pub error_message: Option<String>,
}

impl SubAnalysisResult {
    /// Successful result with a payload
    pub fn success(tool: AnalysisKind, payload: serde_json::Value) -> Self {
        Self {
            tool,
            status: AnalysisStatus::Success,
            payload,
            error_message: None,
        }
    }

    /// Failed result carrying the error message
    pub fn error(tool: AnalysisKind, message: impl Into<String>) -> Self {
        Self {
            tool,
            status: AnalysisStatus::Error,
            payload: serde_json::Value::Null,
            error_message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == AnalysisStatus::Success
    }
}

/// Failure of an independent sub-analysis. Recorded, never fatal to the run.
#[derive(Debug, Error)]
pub enum SubAnalysisError {
    #[error("analysis backend unavailable: {0}")]
    Backend(String),

    #[error("analysis timed out after {0} ms")]
    Timeout(u64),

    #[error("analysis cancelled before completion")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(AnalysisKind::ErrorScan.name(), "error_scan");
        assert_eq!(AnalysisKind::RateAudit.name(), "rate_audit");
        assert_eq!(AnalysisKind::AppealDraft.name(), "appeal_draft");
    }

    #[test]
    fn test_error_result_has_null_payload() {
        let result = SubAnalysisResult::error(AnalysisKind::AppealDraft, "boom");
        assert!(!result.is_success());
        assert!(result.payload.is_null());
        assert_eq!(result.error_message.as_deref(), Some("boom"));
    }
}
