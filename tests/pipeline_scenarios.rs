//! End-to-End Pipeline Scenarios
//!
//! Exercises the full pipeline — orchestrator, coalescing cache, retry
//! controller, and sub-analyses — against an in-process flaky lookup
//! service. Timing-sensitive scenarios run under tokio's paused clock so
//! backoff and TTL assertions are deterministic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use claimlens::{
    BillingItem, CoalescingCache, CodeInfo, LookupError, LookupService, PipelineOrchestrator,
    RiskLevel, RunOptions, RunStatus,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Lookup service with per-code delays and scripted transient failures.
struct FlakyLookup {
    rates: HashMap<String, f64>,
    delays: HashMap<String, Duration>,
    failures_remaining: Mutex<HashMap<String, u32>>,
    calls: AtomicU32,
}

impl FlakyLookup {
    fn new(rows: &[(&str, f64)]) -> Self {
        Self {
            rates: rows.iter().map(|(c, r)| (c.to_string(), *r)).collect(),
            delays: HashMap::new(),
            failures_remaining: Mutex::new(HashMap::new()),
            calls: AtomicU32::new(0),
        }
    }

    fn with_delay(mut self, code: &str, delay: Duration) -> Self {
        self.delays.insert(code.to_string(), delay);
        self
    }

    fn with_failures(self, code: &str, count: u32) -> Self {
        self.failures_remaining
            .lock()
            .unwrap()
            .insert(code.to_string(), count);
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LookupService for FlakyLookup {
    async fn lookup(&self, code: &str) -> Result<CodeInfo, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(code) {
            tokio::time::sleep(*delay).await;
        }
        {
            let mut failures = self.failures_remaining.lock().unwrap();
            if let Some(remaining) = failures.get_mut(code) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(LookupError::Status(503));
                }
            }
        }
        self.rates
            .get(code)
            .map(|&rate| CodeInfo {
                code: code.to_string(),
                description: format!("procedure {code}"),
                rate,
            })
            .ok_or_else(|| LookupError::UnknownCode(code.to_string()))
    }

    fn service_name(&self) -> &'static str {
        "FlakyLookup"
    }
}

fn orchestrator_with(lookup: Arc<FlakyLookup>) -> PipelineOrchestrator {
    let service: Arc<dyn LookupService> = lookup;
    PipelineOrchestrator::new(CoalescingCache::new(), service)
}

/// Two items: A billed 300 against reference 100, B billed 50 against 80.
/// Per-item overcharges 200 and 0; aggregate overcharge 200.
#[tokio::test]
async fn scenario_two_items_overcharge_200() {
    init_tracing();
    let lookup = Arc::new(FlakyLookup::new(&[("10001", 100.0), ("10002", 80.0)]));
    let orchestrator = orchestrator_with(Arc::clone(&lookup));

    let report = orchestrator
        .run(
            vec![
                BillingItem::new("10001", 300.0),
                BillingItem::new("10002", 50.0),
            ],
            RunOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.items[0].overcharge, 200.0);
    assert_eq!(report.items[1].overcharge, 0.0);
    assert_eq!(report.total_overcharge, 200.0);
    assert!(report.summary.contains("$200.00 in overcharges"));
}

/// A lookup fails twice then succeeds on the third attempt: total elapsed
/// time is at least 100 + 200 ms of backoff, and the successful value is
/// cached afterwards.
#[tokio::test(start_paused = true)]
async fn scenario_retry_then_success_caches_value() {
    init_tracing();
    let lookup = Arc::new(FlakyLookup::new(&[("30001", 250.0)]).with_failures("30001", 2));
    let orchestrator = orchestrator_with(Arc::clone(&lookup));
    let options = RunOptions {
        max_attempts: 3,
        base_delay: Duration::from_millis(100),
        backoff_multiplier: 2.0,
        ..RunOptions::default()
    };

    let start = tokio::time::Instant::now();
    let report = orchestrator
        .run(vec![BillingItem::new("30001", 400.0)], options.clone())
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_millis(300));
    assert_eq!(lookup.calls(), 3);
    assert!(report.items[0].resolved);
    assert_eq!(report.items[0].expected_cost, 250.0);

    // Second run is served from cache — no further lookup calls
    let report = orchestrator
        .run(vec![BillingItem::new("30001", 400.0)], options)
        .await
        .unwrap();
    assert_eq!(lookup.calls(), 3);
    assert!(report.items[0].resolved);
}

/// Retries exhausted: the run still completes, the item uses the fallback
/// estimate, and the failure is carried as a warning.
#[tokio::test(start_paused = true)]
async fn scenario_exhausted_retries_fall_back() {
    init_tracing();
    let lookup = Arc::new(FlakyLookup::new(&[("30001", 250.0)]).with_failures("30001", 10));
    let orchestrator = orchestrator_with(Arc::clone(&lookup));

    let report = orchestrator
        .run(
            vec![BillingItem::new("30001", 400.0)],
            RunOptions {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(lookup.calls(), 3);
    assert!(!report.items[0].resolved);
    assert_eq!(report.items[0].expected_cost, 100.0);
    assert!(report.warning_count() >= 1);
    assert!(report.summary.contains("warning(s) recorded"));
}

/// Breakdown order matches input order even when completion order is
/// reversed by per-code delays.
#[tokio::test(start_paused = true)]
async fn scenario_order_preserved_under_reversed_completion() {
    init_tracing();
    let lookup = Arc::new(
        FlakyLookup::new(&[("40001", 10.0), ("40002", 20.0), ("40003", 30.0)])
            .with_delay("40001", Duration::from_millis(300))
            .with_delay("40002", Duration::from_millis(200))
            .with_delay("40003", Duration::from_millis(100)),
    );
    let orchestrator = orchestrator_with(Arc::clone(&lookup));

    let report = orchestrator
        .run(
            vec![
                BillingItem::new("40001", 15.0),
                BillingItem::new("40002", 25.0),
                BillingItem::new("40003", 35.0),
            ],
            RunOptions::default(),
        )
        .await
        .unwrap();

    let codes: Vec<&str> = report.items.iter().map(|i| i.code.as_str()).collect();
    assert_eq!(codes, vec!["40001", "40002", "40003"]);

    // The trace shows 40003 settling first
    let resolve_steps: Vec<&str> = report
        .steps
        .iter()
        .filter(|s| s.step_name.starts_with("resolve:"))
        .map(|s| s.step_name.as_str())
        .collect();
    assert_eq!(resolve_steps.first(), Some(&"resolve:40003"));
}

/// Ten concurrent runs over one shared cache trigger exactly one producer
/// call for the common code; every report sees the same rate.
#[tokio::test(start_paused = true)]
async fn scenario_concurrent_runs_coalesce() {
    init_tracing();
    let lookup = Arc::new(
        FlakyLookup::new(&[("50001", 120.0)]).with_delay("50001", Duration::from_millis(50)),
    );
    let service: Arc<dyn LookupService> = lookup.clone();
    let orchestrator = Arc::new(PipelineOrchestrator::new(CoalescingCache::new(), service));

    let runs = (0..10).map(|_| {
        let orchestrator = Arc::clone(&orchestrator);
        async move {
            orchestrator
                .run(vec![BillingItem::new("50001", 200.0)], RunOptions::default())
                .await
        }
    });
    let reports = join_all(runs).await;

    assert_eq!(lookup.calls(), 1);
    for report in reports {
        let report = report.unwrap();
        assert_eq!(report.items[0].expected_cost, 120.0);
        assert!(report.items[0].resolved);
    }
}

/// A failing external sub-analysis is recorded and never aborts the run.
#[tokio::test]
async fn scenario_sub_analysis_failure_is_non_fatal() {
    init_tracing();

    struct OfflineClient;

    #[async_trait]
    impl claimlens::AppealClient for OfflineClient {
        async fn draft_appeal(
            &self,
            _request: &claimlens::AppealRequest,
        ) -> anyhow::Result<serde_json::Value> {
            anyhow::bail!("generator offline")
        }

        fn client_name(&self) -> &'static str {
            "Offline"
        }
    }

    let lookup = Arc::new(FlakyLookup::new(&[("60001", 100.0)]));
    let service: Arc<dyn LookupService> = lookup;
    let orchestrator = PipelineOrchestrator::with_analyses(
        CoalescingCache::new(),
        service,
        claimlens::default_analyses(Arc::new(OfflineClient)),
    );

    let report = orchestrator
        .run(vec![BillingItem::new("60001", 300.0)], RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    let appeal = report
        .analyses
        .iter()
        .find(|a| a.tool == claimlens::AnalysisKind::AppealDraft)
        .unwrap();
    assert!(!appeal.is_success());
    assert_eq!(appeal.error_message.as_deref(), Some("generator offline"));
    // Aggregation still ran from the remaining analyses
    assert_eq!(report.total_overcharge, 200.0);
}

/// Cancelling mid-run keeps settled results and degrades the rest.
#[tokio::test(start_paused = true)]
async fn scenario_cancellation_produces_partial_report() {
    init_tracing();
    let lookup = Arc::new(
        FlakyLookup::new(&[("70001", 100.0), ("70002", 100.0)])
            .with_delay("70001", Duration::from_millis(10))
            .with_delay("70002", Duration::from_secs(60)),
    );
    let service: Arc<dyn LookupService> = lookup.clone();
    let orchestrator = Arc::new(PipelineOrchestrator::new(CoalescingCache::new(), service));
    let cancel = CancellationToken::new();

    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            orchestrator
                .run_cancellable(
                    vec![
                        BillingItem::new("70001", 250.0),
                        BillingItem::new("70002", 250.0),
                    ],
                    RunOptions::default(),
                    cancel,
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    let report = run.await.unwrap().unwrap();

    assert_eq!(report.status, RunStatus::Degraded);
    assert!(report.items[0].resolved, "fast code settled before cancel");
    assert!(!report.items[1].resolved, "slow code fell back");
    assert_eq!(report.items[1].expected_cost, 100.0);
    assert!(report.summary.contains("Run degraded"));
}

/// Summary and risk level reflect the computed variance on a hot batch.
#[tokio::test]
async fn scenario_risk_level_reflects_variance() {
    init_tracing();
    let lookup = Arc::new(FlakyLookup::new(&[("80001", 400.0)]));
    let orchestrator = orchestrator_with(Arc::clone(&lookup));

    let report = orchestrator
        .run(vec![BillingItem::new("80001", 8500.0)], RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.risk_level, RiskLevel::Critical);
    assert!(report.variance_percent > 100.0);

    // The error scan flagged the rate outlier
    let scan = report
        .analyses
        .iter()
        .find(|a| a.tool == claimlens::AnalysisKind::ErrorScan)
        .unwrap();
    let findings = scan.payload["findings"].as_array().unwrap();
    assert!(findings.iter().any(|f| f["kind"] == "rate_outlier"));
}

/// A clean batch reports no overcharge and a LOW risk level.
#[tokio::test]
async fn scenario_clean_batch_reports_no_overcharge() {
    init_tracing();
    let lookup = Arc::new(FlakyLookup::new(&[("90001", 100.0), ("90002", 80.0)]));
    let orchestrator = orchestrator_with(Arc::clone(&lookup));

    let report = orchestrator
        .run(
            vec![
                BillingItem::new("90001", 100.0),
                BillingItem::new("90002", 75.0),
            ],
            RunOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.total_overcharge, 0.0);
    assert_eq!(report.risk_level, RiskLevel::Low);
    assert!(report.summary.contains("No overcharge identified"));
}
