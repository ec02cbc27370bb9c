//! Pipeline orchestrator — sequential stages over concurrent workers.
//!
//! ```text
//! Parse            fatal on failure (no partial report)
//! PerCodeResolve   per-code fan-out through cache/coalescer + retry
//! SubAnalyses      registered analyses over the resolved batch
//! Aggregate        precedence rule over per-code + analysis results
//! Summarize        always runs; restates computed values only
//! ```
//!
//! There is no backward transition. Past Parse the pipeline never returns
//! an error: lookup failures, sub-analysis failures, and cancellation all
//! degrade into trace warnings and documented fallbacks.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analysis::{AnalysisInput, SubAnalysis};
use crate::cache::{CoalescingCache, SharedResult};
use crate::config::RunOptions;
use crate::fingerprint;
use crate::lookup::LookupService;
use crate::retry::RetryPolicy;
use crate::types::{
    AggregatedReport, BillingItem, CodeInfo, PipelineStep, ResolvedCode, RunStatus, StepStatus,
    SubAnalysisError, SubAnalysisResult, ValidationError, validate_items,
};

use super::aggregate;
use super::summarize;
use super::trace::TraceLog;

/// Drives one batch through the full stage sequence.
///
/// The orchestrator owns nothing process-wide: the cache is injected (and
/// may be shared with other orchestrators), the lookup service and the
/// sub-analysis registry are trait objects bound at construction.
pub struct PipelineOrchestrator {
    cache: CoalescingCache<CodeInfo>,
    lookup: Arc<dyn LookupService>,
    analyses: Vec<Arc<dyn SubAnalysis>>,
    runs_completed: AtomicU64,
    runs_degraded: AtomicU64,
}

impl PipelineOrchestrator {
    /// Orchestrator with the default sub-analysis registry (no external
    /// appeal generator wired).
    pub fn new(cache: CoalescingCache<CodeInfo>, lookup: Arc<dyn LookupService>) -> Self {
        let analyses =
            crate::analysis::default_analyses(Arc::new(crate::analysis::NoopAppealClient));
        Self::with_analyses(cache, lookup, analyses)
    }

    /// Orchestrator with an explicit sub-analysis registry.
    pub fn with_analyses(
        cache: CoalescingCache<CodeInfo>,
        lookup: Arc<dyn LookupService>,
        analyses: Vec<Arc<dyn SubAnalysis>>,
    ) -> Self {
        info!(
            lookup = lookup.service_name(),
            analyses = analyses.len(),
            "initializing pipeline orchestrator"
        );
        Self {
            cache,
            lookup,
            analyses,
            runs_completed: AtomicU64::new(0),
            runs_degraded: AtomicU64::new(0),
        }
    }

    /// The shared cache handle (for sweeper wiring and stats).
    pub fn cache(&self) -> &CoalescingCache<CodeInfo> {
        &self.cache
    }

    /// Run statistics.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_degraded: self.runs_degraded.load(Ordering::Relaxed),
        }
    }

    /// Run a batch to completion.
    ///
    /// Fails fast (no partial report) only on structurally invalid input;
    /// every later failure is folded into the report.
    pub async fn run(
        &self,
        items: Vec<BillingItem>,
        options: RunOptions,
    ) -> Result<AggregatedReport, ValidationError> {
        self.run_cancellable(items, options, CancellationToken::new())
            .await
    }

    /// Run a batch under an external cancellation signal.
    ///
    /// On cancellation (or deadline expiry) the run degrades: settled
    /// results are kept, unresolved codes fall back to the documented
    /// estimate, and the report's status is `Degraded`.
    pub async fn run_cancellable(
        &self,
        items: Vec<BillingItem>,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Result<AggregatedReport, ValidationError> {
        self.run_inner(items, options, cancel, TraceLog::new()).await
    }

    /// Run a batch, streaming every pipeline step to `step_tx` as it
    /// settles. The batched trace still arrives on the report.
    pub async fn run_streaming(
        &self,
        items: Vec<BillingItem>,
        options: RunOptions,
        cancel: CancellationToken,
        step_tx: mpsc::UnboundedSender<PipelineStep>,
    ) -> Result<AggregatedReport, ValidationError> {
        self.run_inner(items, options, cancel, TraceLog::with_stream(step_tx))
            .await
    }

    async fn run_inner(
        &self,
        items: Vec<BillingItem>,
        options: RunOptions,
        cancel: CancellationToken,
        trace: TraceLog,
    ) -> Result<AggregatedReport, ValidationError> {
        let run_start = Instant::now();

        // ── Parse ───────────────────────────────────────────────────────
        options.validate()?;
        validate_items(&items, &options.code_pattern)?;
        trace.record(
            PipelineStep::now(
                "parse",
                StepStatus::Success,
                format!("validated {} billing line(s)", items.len()),
            )
            .with_data(json!({ "items": items.len() })),
        );

        // Deadline and external cancellation share one child token; the
        // caller's token is never cancelled from in here.
        let cancel = cancel.child_token();
        let watchdog = options.deadline.map(|deadline| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                warn!(
                    deadline_ms = deadline.as_millis() as u64,
                    "run deadline reached, degrading"
                );
                cancel.cancel();
            })
        });

        // ── PerCodeResolve ──────────────────────────────────────────────
        let mut degraded = false;
        let resolved = self
            .resolve_stage(&items, &options, &cancel, &trace, &mut degraded)
            .await;

        // ── SubAnalyses ─────────────────────────────────────────────────
        let analysis_results = self
            .analysis_stage(&items, &resolved, &options, &cancel, &trace, &mut degraded)
            .await;

        // ── Aggregate ───────────────────────────────────────────────────
        let outcome = aggregate::aggregate(&resolved, &analysis_results);
        trace.record(
            PipelineStep::now(
                "aggregate",
                StepStatus::Success,
                format!(
                    "total billed ${:.2}, reference ${:.2}, overcharge ${:.2}",
                    outcome.total_billed, outcome.total_expected, outcome.total_overcharge
                ),
            )
            .with_data(json!({
                "total_overcharge": outcome.total_overcharge,
                "variance_percent": outcome.variance_percent,
                "cross_check": outcome.cross_check_applied,
            })),
        );

        // ── Summarize ───────────────────────────────────────────────────
        let status = if degraded {
            RunStatus::Degraded
        } else {
            RunStatus::Complete
        };
        let risk = summarize::risk_level(&outcome);
        let summary = summarize::compose_summary(status, &outcome, risk, &trace.carried_warnings());
        trace.success("summarize", format!("risk level {risk}"));

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        if degraded {
            self.runs_degraded.fetch_add(1, Ordering::Relaxed);
        }

        info!(
            elapsed_ms = run_start.elapsed().as_millis() as u64,
            items = outcome.items.len(),
            total_overcharge = outcome.total_overcharge,
            status = ?status,
            risk = %risk,
            "pipeline run complete"
        );
        debug!(cache = %self.cache.stats(), runs = %self.stats(), "run counters");

        Ok(AggregatedReport {
            status,
            total_billed: outcome.total_billed,
            total_expected: outcome.total_expected,
            total_overcharge: outcome.total_overcharge,
            variance_percent: outcome.variance_percent,
            risk_level: risk,
            items: outcome.items,
            analyses: analysis_results,
            summary,
            steps: trace.into_steps(),
        })
    }

    /// Future resolving one code through cache → coalescer → retry → lookup.
    ///
    /// Fully owned (`'static`) so the orchestrator can abandon it on
    /// cancellation without touching the underlying flight.
    fn resolver_for(
        &self,
        code: &str,
        retry: &RetryPolicy,
        ttl: Duration,
    ) -> impl Future<Output = SharedResult<CodeInfo>> + Send + 'static {
        let cache = self.cache.clone();
        let lookup = Arc::clone(&self.lookup);
        let retry = retry.clone();
        let code = code.to_string();
        async move {
            let key = fingerprint::rate_lookup(&code);
            cache
                .resolve(&key, ttl, move || async move {
                    retry
                        .run(|| {
                            let lookup = Arc::clone(&lookup);
                            let code = code.clone();
                            async move { lookup.lookup(&code).await }
                        })
                        .await
                })
                .await
        }
    }

    async fn resolve_stage(
        &self,
        items: &[BillingItem],
        options: &RunOptions,
        cancel: &CancellationToken,
        trace: &TraceLog,
        degraded: &mut bool,
    ) -> Vec<ResolvedCode> {
        trace.running(
            "per_code_resolve",
            format!(
                "resolving {} code(s) via {} ({})",
                items.len(),
                self.lookup.service_name(),
                if options.parallel { "parallel" } else { "sequential" }
            ),
        );

        let retry = RetryPolicy::new(
            options.max_attempts,
            options.base_delay,
            options.backoff_multiplier,
        );
        let mut outcomes: Vec<Option<SharedResult<CodeInfo>>> =
            (0..items.len()).map(|_| None).collect();

        if options.parallel {
            let mut tasks: JoinSet<(usize, SharedResult<CodeInfo>)> = JoinSet::new();
            for (index, item) in items.iter().enumerate() {
                let resolver = self.resolver_for(&item.code, &retry, options.ttl);
                tasks.spawn(async move { (index, resolver.await) });
            }
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        *degraded = true;
                        // Abandon our waiters; in-flight cache producers
                        // keep running for callers on other runs.
                        tasks.abort_all();
                        break;
                    }
                    joined = tasks.join_next() => match joined {
                        None => break,
                        Some(Ok((index, result))) => {
                            self.record_resolution(trace, &items[index], &result, options);
                            outcomes[index] = Some(result);
                        }
                        Some(Err(err)) if err.is_cancelled() => {}
                        Some(Err(err)) => {
                            warn!(error = %err, "resolve task failed to join");
                        }
                    }
                }
            }
        } else {
            for (index, item) in items.iter().enumerate() {
                let resolver = self.resolver_for(&item.code, &retry, options.ttl);
                tokio::select! {
                    () = cancel.cancelled() => {
                        *degraded = true;
                        break;
                    }
                    result = resolver => {
                        self.record_resolution(trace, item, &result, options);
                        outcomes[index] = Some(result);
                    }
                }
            }
        }

        items
            .iter()
            .zip(outcomes)
            .map(|(item, outcome)| match outcome {
                Some(Ok(info)) => ResolvedCode {
                    item: item.clone(),
                    expected_cost: info.rate,
                    info: Some(info),
                    resolved: true,
                },
                Some(Err(_)) => ResolvedCode {
                    item: item.clone(),
                    info: None,
                    expected_cost: options.fallback_expected_cost,
                    resolved: false,
                },
                None => {
                    trace.warning(
                        &format!("resolve:{}", item.code),
                        format!(
                            "abandoned on cancellation; using fallback estimate ${:.2}",
                            options.fallback_expected_cost
                        ),
                    );
                    ResolvedCode {
                        item: item.clone(),
                        info: None,
                        expected_cost: options.fallback_expected_cost,
                        resolved: false,
                    }
                }
            })
            .collect()
    }

    fn record_resolution(
        &self,
        trace: &TraceLog,
        item: &BillingItem,
        result: &SharedResult<CodeInfo>,
        options: &RunOptions,
    ) {
        let step_name = format!("resolve:{}", item.code);
        match result {
            Ok(info) => {
                debug!(code = %item.code, rate = info.rate, "code resolved");
                trace.record(
                    PipelineStep::now(
                        step_name,
                        StepStatus::Success,
                        format!("{} at reference rate ${:.2}", info.description, info.rate),
                    )
                    .with_data(json!({ "rate": info.rate })),
                );
            }
            Err(err) => {
                warn!(code = %item.code, error = %err, "lookup exhausted, using fallback");
                trace.warning(
                    &step_name,
                    format!(
                        "lookup failed after {} attempt(s): {err}; using fallback estimate ${:.2}",
                        options.max_attempts, options.fallback_expected_cost
                    ),
                );
            }
        }
    }

    async fn analysis_stage(
        &self,
        items: &[BillingItem],
        resolved: &[ResolvedCode],
        options: &RunOptions,
        cancel: &CancellationToken,
        trace: &TraceLog,
        degraded: &mut bool,
    ) -> Vec<SubAnalysisResult> {
        let input = Arc::new(AnalysisInput {
            items: items.to_vec(),
            resolved: resolved.to_vec(),
        });
        let mut slots: Vec<Option<SubAnalysisResult>> =
            (0..self.analyses.len()).map(|_| None).collect();

        if !*degraded {
            if options.parallel {
                let mut tasks: JoinSet<(usize, SubAnalysisResult)> = JoinSet::new();
                for (index, analysis) in self.analyses.iter().enumerate() {
                    let analysis = Arc::clone(analysis);
                    let input = Arc::clone(&input);
                    tasks.spawn(async move { (index, analysis.invoke(&input).await) });
                }
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            *degraded = true;
                            tasks.abort_all();
                            break;
                        }
                        joined = tasks.join_next() => match joined {
                            None => break,
                            Some(Ok((index, result))) => {
                                self.record_analysis(trace, &result);
                                slots[index] = Some(result);
                            }
                            Some(Err(err)) if err.is_cancelled() => {}
                            Some(Err(err)) => {
                                warn!(error = %err, "analysis task failed to join");
                            }
                        }
                    }
                }
            } else {
                for (index, analysis) in self.analyses.iter().enumerate() {
                    let input = Arc::clone(&input);
                    tokio::select! {
                        () = cancel.cancelled() => {
                            *degraded = true;
                            break;
                        }
                        result = analysis.invoke(&input) => {
                            self.record_analysis(trace, &result);
                            slots[index] = Some(result);
                        }
                    }
                }
            }
        }

        // Analyses the cancellation cut short settle as recorded errors
        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    let kind = self.analyses[index].kind();
                    trace.record(
                        PipelineStep::now(
                            format!("analysis:{kind}"),
                            StepStatus::Warning,
                            "cancelled before completion",
                        )
                        .with_tool(kind),
                    );
                    SubAnalysisResult::error(kind, SubAnalysisError::Cancelled.to_string())
                })
            })
            .collect()
    }

    fn record_analysis(&self, trace: &TraceLog, result: &SubAnalysisResult) {
        let step_name = format!("analysis:{}", result.tool);
        if result.is_success() {
            trace.record(
                PipelineStep::now(step_name, StepStatus::Success, "analysis complete")
                    .with_tool(result.tool)
                    .with_data(result.payload.clone()),
            );
        } else {
            let message = result
                .error_message
                .clone()
                .unwrap_or_else(|| "analysis failed".to_string());
            trace.record(
                PipelineStep::now(step_name, StepStatus::Warning, message).with_tool(result.tool),
            );
        }
    }
}

/// Run counters, matching the cache's stats convention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub runs_completed: u64,
    pub runs_degraded: u64,
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pipeline: {} runs ({} degraded)",
            self.runs_completed, self.runs_degraded
        )
    }
}
