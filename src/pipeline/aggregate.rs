//! Aggregation: fold per-code results and sub-analysis outputs into the
//! per-item breakdown and batch totals.
//!
//! The per-item overcharge follows a fixed precedence over explicitly
//! reported fields and the computed difference; the totals carry one
//! cross-check fallback that replaces (never adds to) a zero per-item sum.

use tracing::debug;

use crate::types::{
    ItemBreakdown, OverchargeBasis, ResolvedCode, SubAnalysisResult,
};

/// Explicitly reported per-item fields harvested from sub-analysis payloads.
#[derive(Debug, Clone, Copy, Default)]
struct ReportedFields {
    savings: Option<f64>,
    overcharge: Option<f64>,
    amount: Option<f64>,
}

/// Output of the aggregation stage.
#[derive(Debug, Clone)]
pub struct AggregateOutcome {
    pub items: Vec<ItemBreakdown>,
    pub total_billed: f64,
    pub total_expected: f64,
    pub total_overcharge: f64,
    pub variance_percent: f64,
    /// Whether the totals-shortfall cross-check supplied the overcharge
    pub cross_check_applied: bool,
}

/// Scan successful sub-analysis payloads for per-item entries matching
/// `code`. Payload convention: an `items` array of objects keyed by
/// `code`, optionally carrying `savings` / `overcharge` / `amount`.
/// The first non-null value per field wins, in analysis order.
fn reported_fields_for(code: &str, analyses: &[SubAnalysisResult]) -> ReportedFields {
    let mut fields = ReportedFields::default();
    for analysis in analyses.iter().filter(|a| a.is_success()) {
        let Some(entries) = analysis.payload.get("items").and_then(|v| v.as_array()) else {
            continue;
        };
        for entry in entries {
            if entry.get("code").and_then(|c| c.as_str()) != Some(code) {
                continue;
            }
            if fields.savings.is_none() {
                fields.savings = entry.get("savings").and_then(serde_json::Value::as_f64);
            }
            if fields.overcharge.is_none() {
                fields.overcharge = entry.get("overcharge").and_then(serde_json::Value::as_f64);
            }
            if fields.amount.is_none() {
                fields.amount = entry.get("amount").and_then(serde_json::Value::as_f64);
            }
        }
    }
    fields
}

/// Per-item precedence: (a) reported savings, (b) reported overcharge,
/// (c) reported flat amount — each only when present and positive — then
/// (d) the computed `billed - expected` difference when positive, else
/// (e) zero.
fn overcharge_for(billed: f64, expected: f64, reported: ReportedFields) -> (f64, OverchargeBasis) {
    match reported.savings {
        Some(savings) if savings > 0.0 => return (savings, OverchargeBasis::ReportedSavings),
        _ => {}
    }
    match reported.overcharge {
        Some(overcharge) if overcharge > 0.0 => {
            return (overcharge, OverchargeBasis::ReportedOvercharge)
        }
        _ => {}
    }
    match reported.amount {
        Some(amount) if amount > 0.0 => return (amount, OverchargeBasis::ReportedAmount),
        _ => {}
    }
    let difference = billed - expected;
    if difference > 0.0 {
        (difference, OverchargeBasis::ComputedDifference)
    } else {
        (0.0, OverchargeBasis::None)
    }
}

/// Batch-level cross-check: a zero per-item sum with billed totals above
/// expected totals still reports the shortfall. The fallback replaces the
/// per-item sum, it is never added on top of it, so values from the
/// precedence rules cannot be double-counted.
fn cross_checked_total(item_sum: f64, total_billed: f64, total_expected: f64) -> (f64, bool) {
    let shortfall = total_billed - total_expected;
    if item_sum == 0.0 && shortfall > 0.0 {
        (shortfall, true)
    } else {
        (item_sum, false)
    }
}

/// Fold resolved codes and sub-analysis results into the final breakdown
/// and totals. The breakdown preserves the order of `resolved`, which is
/// the caller's original input order.
pub fn aggregate(resolved: &[ResolvedCode], analyses: &[SubAnalysisResult]) -> AggregateOutcome {
    let mut items = Vec::with_capacity(resolved.len());
    let mut total_billed = 0.0;
    let mut total_expected = 0.0;
    let mut item_sum = 0.0;

    for entry in resolved {
        let billed = entry.item.billed_amount;
        let expected = entry.expected_cost;
        let reported = reported_fields_for(&entry.item.code, analyses);
        let (overcharge, basis) = overcharge_for(billed, expected, reported);

        total_billed += billed;
        total_expected += expected;
        item_sum += overcharge;

        items.push(ItemBreakdown {
            code: entry.item.code.clone(),
            description: entry.info.as_ref().map(|i| i.description.clone()),
            billed_amount: billed,
            expected_cost: expected,
            overcharge,
            basis,
            resolved: entry.resolved,
        });
    }

    let (total_overcharge, cross_check_applied) =
        cross_checked_total(item_sum, total_billed, total_expected);

    let variance_percent = if total_expected > 0.0 {
        (total_billed - total_expected) / total_expected * 100.0
    } else {
        0.0
    };

    debug!(
        items = items.len(),
        total_billed,
        total_expected,
        total_overcharge,
        cross_check_applied,
        "aggregation complete"
    );

    AggregateOutcome {
        items,
        total_billed,
        total_expected,
        total_overcharge,
        variance_percent,
        cross_check_applied,
    }
}
