//! Sub-analysis trait and implementations.
//!
//! Each sub-analysis consumes the batch plus the resolved per-code data and
//! settles into one `SubAnalysisResult`; failures are recorded, never
//! propagated. Dispatch is by the closed `AnalysisKind` enumeration — the
//! registry is built once at startup and injected into the orchestrator, so
//! no string comparison decides behavior anywhere in the pipeline.
//!
//! ## Analyses
//!
//! 1. **ErrorScan** — local billing-error detection (duplicates, zero
//!    lines, unverified codes, rate outliers)
//! 2. **RateAudit** — per-code rate calculation from resolved lookup data
//! 3. **AppealDraft** — opaque external appeal-letter generation call

pub mod appeal;
pub mod error_scan;
pub mod rate_check;

pub use appeal::{AppealClient, AppealDraft, AppealRequest, NoopAppealClient};
pub use error_scan::ErrorScan;
pub use rate_check::RateAudit;

use std::sync::Arc;

use async_trait::async_trait;

use crate::types::{AnalysisKind, BillingItem, ResolvedCode, SubAnalysisResult};

/// Input shared by every sub-analysis in one run.
///
/// Built once after the resolve barrier and `Arc`-shared across the
/// concurrently-running analyses.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    /// The batch in original order
    pub items: Vec<BillingItem>,
    /// Per-code resolution outcomes, parallel to `items`
    pub resolved: Vec<ResolvedCode>,
}

/// Trait for sub-analyses.
///
/// Every implementation must be thread-safe (Send + Sync) since the
/// orchestrator fans analyses out across async tasks. `invoke` never
/// fails at the type level — an analysis failure settles as an `Error`
/// result the aggregation stage can skip.
#[async_trait]
pub trait SubAnalysis: Send + Sync {
    /// Which member of the closed enumeration this analysis implements
    fn kind(&self) -> AnalysisKind;

    /// Run the analysis and settle into a result
    async fn invoke(&self, input: &AnalysisInput) -> SubAnalysisResult;
}

/// Build the default registry: error scan, rate audit, and appeal drafting
/// through the given external client.
pub fn default_analyses(appeal_client: Arc<dyn AppealClient>) -> Vec<Arc<dyn SubAnalysis>> {
    vec![
        Arc::new(ErrorScan),
        Arc::new(RateAudit),
        Arc::new(AppealDraft::new(appeal_client)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_kinds() {
        let analyses = default_analyses(Arc::new(NoopAppealClient));
        let kinds: Vec<AnalysisKind> = analyses.iter().map(|a| a.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                AnalysisKind::ErrorScan,
                AnalysisKind::RateAudit,
                AnalysisKind::AppealDraft
            ]
        );
    }
}
