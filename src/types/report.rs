//! Final report types: ItemBreakdown, AggregatedReport, RiskLevel, RunStatus

use serde::{Deserialize, Serialize};

use super::{PipelineStep, SubAnalysisResult};

/// Which precedence rule produced an item's overcharge value.
///
/// Ordered by the aggregation precedence: reported savings, then reported
/// overcharge, then reported flat amount, then the computed billed-minus-
/// expected difference, then none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverchargeBasis {
    ReportedSavings,
    ReportedOvercharge,
    ReportedAmount,
    ComputedDifference,
    None,
}

impl std::fmt::Display for OverchargeBasis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ReportedSavings => "reported-savings",
            Self::ReportedOvercharge => "reported-overcharge",
            Self::ReportedAmount => "reported-amount",
            Self::ComputedDifference => "computed-difference",
            Self::None => "none",
        };
        f.write_str(s)
    }
}

/// Terminal state of a pipeline run.
///
/// `Aborted` is not represented here: a Parse failure surfaces as the `Err`
/// arm of `run` and produces no report at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// All stages ran to completion (warnings may still be recorded)
    Complete,
    /// The run was cancelled or hit its deadline; unresolved codes used the
    /// documented fallback estimate
    Degraded,
}

/// Risk classification derived from the aggregate billed-vs-expected variance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    /// Classify a variance percentage (billed over expected).
    pub fn from_variance_percent(variance: f64) -> Self {
        if variance >= 100.0 {
            Self::Critical
        } else if variance >= 40.0 {
            Self::High
        } else if variance >= 10.0 {
            Self::Moderate
        } else {
            Self::Low
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Moderate => "MODERATE",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Per-item row of the final report, in the caller's original input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemBreakdown {
    /// Procedure code as billed
    pub code: String,
    /// Description from the lookup, when resolved
    pub description: Option<String>,
    /// Amount billed for this line (USD)
    pub billed_amount: f64,
    /// Expected cost used for this line (lookup rate or fallback estimate)
    pub expected_cost: f64,
    /// Computed overcharge for this line (USD, never negative)
    pub overcharge: f64,
    /// Which precedence rule produced the overcharge
    pub basis: OverchargeBasis,
    /// Whether the lookup for this code settled successfully
    pub resolved: bool,
}

/// The final output of one pipeline run.
///
/// Created once at the end of the pipeline from the full set of
/// SubAnalysisResults plus cache-resolved per-code data; never mutated after
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedReport {
    /// Terminal state (Complete, possibly Degraded on cancellation)
    pub status: RunStatus,
    /// Sum of billed amounts (USD)
    pub total_billed: f64,
    /// Sum of expected costs (USD)
    pub total_expected: f64,
    /// Aggregate overcharge (USD)
    pub total_overcharge: f64,
    /// Billed-over-expected variance percentage
    pub variance_percent: f64,
    /// Risk classification of the batch
    pub risk_level: RiskLevel,
    /// Per-item breakdown, preserving input order
    pub items: Vec<ItemBreakdown>,
    /// Every sub-analysis outcome, including failures
    pub analyses: Vec<SubAnalysisResult>,
    /// Human-readable summary composed by the Summarize stage
    pub summary: String,
    /// Full ordered step trace for the run
    pub steps: Vec<PipelineStep>,
}

impl AggregatedReport {
    /// Count of warning/error steps carried in the trace
    pub fn warning_count(&self) -> usize {
        self.steps.iter().filter(|s| s.is_warning_or_error()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_thresholds() {
        assert_eq!(RiskLevel::from_variance_percent(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_variance_percent(9.9), RiskLevel::Low);
        assert_eq!(RiskLevel::from_variance_percent(10.0), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_variance_percent(40.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_variance_percent(250.0), RiskLevel::Critical);
    }

    #[test]
    fn test_risk_level_display() {
        assert_eq!(RiskLevel::High.to_string(), "HIGH");
    }
}
