//! Local billing-error detection.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use super::{AnalysisInput, SubAnalysis};
use crate::config::defaults::ERROR_SCAN_RATE_MULTIPLE;
use crate::types::{AnalysisKind, SubAnalysisResult};

/// One flagged line in the scan payload.
#[derive(Debug, Clone, Serialize)]
struct Finding {
    code: String,
    kind: &'static str,
    message: String,
}

/// Scans the batch for common billing errors without any external call:
/// duplicate code+amount lines, zero-amount lines, codes the lookup could
/// not verify, and lines billed at a multiple of the reference rate.
pub struct ErrorScan;

#[async_trait]
impl SubAnalysis for ErrorScan {
    fn kind(&self) -> AnalysisKind {
        AnalysisKind::ErrorScan
    }

    async fn invoke(&self, input: &AnalysisInput) -> SubAnalysisResult {
        let mut findings = Vec::new();
        let mut seen: std::collections::HashMap<(String, i64), usize> =
            std::collections::HashMap::new();

        for item in &input.items {
            let cents = (item.billed_amount * 100.0).round() as i64;
            let occurrences = seen.entry((item.code.clone(), cents)).or_insert(0);
            *occurrences += 1;
            if *occurrences == 2 {
                findings.push(Finding {
                    code: item.code.clone(),
                    kind: "duplicate_charge",
                    message: format!(
                        "code {} billed more than once at ${:.2}",
                        item.code, item.billed_amount
                    ),
                });
            }

            if item.billed_amount == 0.0 {
                findings.push(Finding {
                    code: item.code.clone(),
                    kind: "zero_amount",
                    message: format!("code {} billed at $0.00", item.code),
                });
            }
        }

        for resolved in &input.resolved {
            if !resolved.resolved {
                findings.push(Finding {
                    code: resolved.item.code.clone(),
                    kind: "unverified_code",
                    message: format!(
                        "code {} could not be verified against the rate provider",
                        resolved.item.code
                    ),
                });
                continue;
            }
            if let Some(ref info) = resolved.info {
                if info.rate > 0.0
                    && resolved.item.billed_amount > info.rate * ERROR_SCAN_RATE_MULTIPLE
                {
                    findings.push(Finding {
                        code: resolved.item.code.clone(),
                        kind: "rate_outlier",
                        message: format!(
                            "code {} billed ${:.2} against reference rate ${:.2}",
                            resolved.item.code, resolved.item.billed_amount, info.rate
                        ),
                    });
                }
            }
        }

        debug!(findings = findings.len(), "error scan complete");

        let count = findings.len();
        SubAnalysisResult::success(
            AnalysisKind::ErrorScan,
            json!({ "findings": findings, "count": count }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BillingItem, CodeInfo, ResolvedCode};

    fn resolved(code: &str, billed: f64, rate: Option<f64>) -> ResolvedCode {
        let item = BillingItem::new(code, billed);
        match rate {
            Some(rate) => ResolvedCode {
                info: Some(CodeInfo {
                    code: code.to_string(),
                    description: format!("procedure {code}"),
                    rate,
                }),
                expected_cost: rate,
                resolved: true,
                item,
            },
            None => ResolvedCode {
                info: None,
                expected_cost: 100.0,
                resolved: false,
                item,
            },
        }
    }

    fn input(resolved: Vec<ResolvedCode>) -> AnalysisInput {
        AnalysisInput {
            items: resolved.iter().map(|r| r.item.clone()).collect(),
            resolved,
        }
    }

    #[tokio::test]
    async fn test_clean_batch_has_no_findings() {
        let result = ErrorScan
            .invoke(&input(vec![resolved("70553", 450.0, Some(400.0))]))
            .await;
        assert!(result.is_success());
        assert_eq!(result.payload["count"], 0);
    }

    #[tokio::test]
    async fn test_duplicate_charge_flagged_once() {
        let rows = vec![
            resolved("99213", 92.0, Some(92.0)),
            resolved("99213", 92.0, Some(92.0)),
            resolved("99213", 92.0, Some(92.0)),
        ];
        let result = ErrorScan.invoke(&input(rows)).await;
        let findings = result.payload["findings"].as_array().unwrap();
        let duplicates: Vec<_> = findings
            .iter()
            .filter(|f| f["kind"] == "duplicate_charge")
            .collect();
        assert_eq!(duplicates.len(), 1);
    }

    #[tokio::test]
    async fn test_rate_outlier_and_unverified_flagged() {
        let rows = vec![
            resolved("70553", 8500.0, Some(400.0)),
            resolved("99999", 50.0, None),
        ];
        let result = ErrorScan.invoke(&input(rows)).await;
        let findings = result.payload["findings"].as_array().unwrap();
        assert!(findings.iter().any(|f| f["kind"] == "rate_outlier"));
        assert!(findings.iter().any(|f| f["kind"] == "unverified_code"));
    }

    #[tokio::test]
    async fn test_zero_amount_flagged() {
        let result = ErrorScan
            .invoke(&input(vec![resolved("99213", 0.0, Some(92.0))]))
            .await;
        let findings = result.payload["findings"].as_array().unwrap();
        assert!(findings.iter().any(|f| f["kind"] == "zero_amount"));
    }
}
