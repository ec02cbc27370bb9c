//! Template-based run summary.
//!
//! Composes the report's human-readable summary from the computed
//! aggregate. Deterministic by construction: the text only restates values
//! the aggregation stage actually produced (a run with no overcharge says
//! so), and every warning recorded in the trace is carried forward.

use crate::types::{RiskLevel, RunStatus};

use super::aggregate::AggregateOutcome;

/// Derive the batch risk level from the aggregate variance.
pub fn risk_level(outcome: &AggregateOutcome) -> RiskLevel {
    RiskLevel::from_variance_percent(outcome.variance_percent)
}

/// Compose the summary text for the report.
pub fn compose_summary(
    status: RunStatus,
    outcome: &AggregateOutcome,
    risk: RiskLevel,
    carried_warnings: &[String],
) -> String {
    let mut lines = Vec::new();

    lines.push(format!(
        "Reviewed {} billed line(s) totaling ${:.2} against a reference total of ${:.2}.",
        outcome.items.len(),
        outcome.total_billed,
        outcome.total_expected
    ));

    if outcome.total_overcharge > 0.0 {
        lines.push(format!(
            "Identified ${:.2} in overcharges ({:.1}% above reference). Risk level: {}.",
            outcome.total_overcharge, outcome.variance_percent, risk
        ));
        if outcome.cross_check_applied {
            lines.push(
                "Overcharge derived from the billed-vs-reference totals shortfall; \
                 no single line exceeded its reference rate."
                    .to_string(),
            );
        }
        let flagged: Vec<String> = outcome
            .items
            .iter()
            .filter(|item| item.overcharge > 0.0)
            .map(|item| format!("{} (${:.2} over reference)", item.code, item.overcharge))
            .collect();
        if !flagged.is_empty() {
            lines.push(format!("Flagged lines: {}.", flagged.join(", ")));
        }
    } else {
        lines.push(format!("No overcharge identified. Risk level: {risk}."));
    }

    if status == RunStatus::Degraded {
        lines.push(
            "Run degraded: cancelled before every lookup settled; unresolved codes \
             use the flat expected-cost estimate."
                .to_string(),
        );
    }

    if !carried_warnings.is_empty() {
        lines.push(format!(
            "{} warning(s) recorded: {}",
            carried_warnings.len(),
            carried_warnings.join("; ")
        ));
    }

    lines.join(" ")
}
