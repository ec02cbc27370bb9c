//! Per-code rate calculation over resolved lookup data.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use super::{AnalysisInput, SubAnalysis};
use crate::types::{AnalysisKind, SubAnalysisResult};

/// One audited line in the payload.
#[derive(Debug, Clone, Serialize)]
struct AuditedLine {
    code: String,
    description: String,
    rate: f64,
    billed: f64,
    overcharge: f64,
}

/// Computes billed-versus-reference figures for every code the lookup
/// resolved. Unresolved codes are skipped here — their contribution comes
/// from the aggregation fallback, not from a fabricated rate.
///
/// The per-line `overcharge` fields feed the aggregation precedence rule
/// for explicitly reported overcharges.
pub struct RateAudit;

#[async_trait]
impl SubAnalysis for RateAudit {
    fn kind(&self) -> AnalysisKind {
        AnalysisKind::RateAudit
    }

    async fn invoke(&self, input: &AnalysisInput) -> SubAnalysisResult {
        let mut lines = Vec::new();
        let mut total_reference = 0.0;

        for resolved in &input.resolved {
            let Some(ref info) = resolved.info else {
                continue;
            };
            total_reference += info.rate;
            lines.push(AuditedLine {
                code: resolved.item.code.clone(),
                description: info.description.clone(),
                rate: info.rate,
                billed: resolved.item.billed_amount,
                overcharge: (resolved.item.billed_amount - info.rate).max(0.0),
            });
        }

        debug!(
            audited = lines.len(),
            skipped = input.resolved.len() - lines.len(),
            total_reference,
            "rate audit complete"
        );

        SubAnalysisResult::success(
            AnalysisKind::RateAudit,
            json!({ "items": lines, "total_reference": total_reference }),
        )
    }
}
