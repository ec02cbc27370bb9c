//! Opaque external appeal-letter generation.
//!
//! The generator (an LLM service or similar) lives entirely behind the
//! `AppealClient` trait; this module only adapts the call into a
//! `SubAnalysisResult`. The pipeline records `{status, payload|error}` and
//! nothing else about the exchange.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{AnalysisInput, SubAnalysis};
use crate::types::{AnalysisKind, SubAnalysisResult};

/// One line handed to the external generator.
#[derive(Debug, Clone, Serialize)]
pub struct AppealLine {
    pub code: String,
    pub description: Option<String>,
    pub billed_amount: f64,
    pub expected_cost: f64,
}

/// Request payload for the external generator.
#[derive(Debug, Clone, Serialize)]
pub struct AppealRequest {
    pub lines: Vec<AppealLine>,
}

impl AppealRequest {
    fn from_input(input: &AnalysisInput) -> Self {
        Self {
            lines: input
                .resolved
                .iter()
                .map(|r| AppealLine {
                    code: r.item.code.clone(),
                    description: r.info.as_ref().map(|i| i.description.clone()),
                    billed_amount: r.item.billed_amount,
                    expected_cost: r.expected_cost,
                })
                .collect(),
        }
    }
}

/// Trait for external appeal-letter generators.
///
/// The error surface is deliberately opaque (`anyhow`): whatever the
/// backend reports is recorded verbatim and never interpreted.
#[async_trait]
pub trait AppealClient: Send + Sync {
    /// Ask the backend to draft an appeal for the given lines
    async fn draft_appeal(&self, request: &AppealRequest) -> anyhow::Result<serde_json::Value>;

    /// Client name for logging
    fn client_name(&self) -> &'static str;
}

/// Client for hosts that do not wire a generator.
///
/// Settles successfully with an empty payload — "no letter" is a valid
/// operational state, not a failure.
pub struct NoopAppealClient;

#[async_trait]
impl AppealClient for NoopAppealClient {
    async fn draft_appeal(&self, _request: &AppealRequest) -> anyhow::Result<serde_json::Value> {
        Ok(json!({ "letter": null }))
    }

    fn client_name(&self) -> &'static str {
        "Noop"
    }
}

/// Sub-analysis wrapper around the external client.
pub struct AppealDraft {
    client: Arc<dyn AppealClient>,
}

impl AppealDraft {
    pub fn new(client: Arc<dyn AppealClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SubAnalysis for AppealDraft {
    fn kind(&self) -> AnalysisKind {
        AnalysisKind::AppealDraft
    }

    async fn invoke(&self, input: &AnalysisInput) -> SubAnalysisResult {
        let request = AppealRequest::from_input(input);
        match self.client.draft_appeal(&request).await {
            Ok(payload) => {
                debug!(client = self.client.client_name(), "appeal draft complete");
                SubAnalysisResult::success(AnalysisKind::AppealDraft, payload)
            }
            Err(err) => {
                warn!(
                    client = self.client.client_name(),
                    error = %err,
                    "appeal draft failed"
                );
                SubAnalysisResult::error(AnalysisKind::AppealDraft, err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BillingItem, ResolvedCode};

    struct FailingClient;

    #[async_trait]
    impl AppealClient for FailingClient {
        async fn draft_appeal(&self, _request: &AppealRequest) -> anyhow::Result<serde_json::Value> {
            anyhow::bail!("generator offline")
        }

        fn client_name(&self) -> &'static str {
            "Failing"
        }
    }

    fn input() -> AnalysisInput {
        AnalysisInput {
            items: vec![BillingItem::new("70553", 8500.0)],
            resolved: vec![ResolvedCode {
                item: BillingItem::new("70553", 8500.0),
                info: None,
                expected_cost: 100.0,
                resolved: false,
            }],
        }
    }

    #[tokio::test]
    async fn test_noop_client_settles_successfully() {
        let analysis = AppealDraft::new(Arc::new(NoopAppealClient));
        let result = analysis.invoke(&input()).await;
        assert!(result.is_success());
        assert!(result.payload["letter"].is_null());
    }

    #[tokio::test]
    async fn test_backend_failure_recorded_not_propagated() {
        let analysis = AppealDraft::new(Arc::new(FailingClient));
        let result = analysis.invoke(&input()).await;
        assert!(!result.is_success());
        assert_eq!(result.error_message.as_deref(), Some("generator offline"));
    }
}
