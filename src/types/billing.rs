//! Billing input types: BillingItem, CodeInfo, ResolvedCode, ValidationError

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Parse stage: caller input
// ============================================================================

/// One billed line item submitted by the caller.
///
/// Immutable once submitted to the pipeline. Format checks (code pattern,
/// non-negative amount) run in the Parse stage before any lookup happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingItem {
    /// Procedure code as billed (e.g. "70553" or "29881-59")
    pub code: String,
    /// Amount billed for this line (USD)
    pub billed_amount: f64,
}

impl BillingItem {
    pub fn new(code: impl Into<String>, billed_amount: f64) -> Self {
        Self {
            code: code.into(),
            billed_amount,
        }
    }
}

/// Structurally invalid input. The only error the pipeline surfaces to the
/// caller; everything past the Parse stage degrades into trace warnings.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("billing item list is empty")]
    EmptyBatch,

    #[error("procedure code '{code}' does not match required format {pattern}")]
    MalformedCode { code: String, pattern: String },

    #[error("billed amount for code '{code}' is negative: {amount}")]
    NegativeAmount { code: String, amount: f64 },

    #[error("invalid run option: {0}")]
    InvalidOption(String),
}

/// Validate a batch of billing items against the caller-supplied code pattern.
///
/// Fails fast on the first structural problem: empty batch, malformed code,
/// or negative amount. Runs before the retry controller or any lookup —
/// retrying a malformed request is never useful.
pub fn validate_items(items: &[BillingItem], pattern: &Regex) -> Result<(), ValidationError> {
    if items.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    for item in items {
        if !pattern.is_match(&item.code) {
            return Err(ValidationError::MalformedCode {
                code: item.code.clone(),
                pattern: pattern.as_str().to_string(),
            });
        }
        if item.billed_amount < 0.0 {
            return Err(ValidationError::NegativeAmount {
                code: item.code.clone(),
                amount: item.billed_amount,
            });
        }
    }
    Ok(())
}

// ============================================================================
// PerCodeResolve stage: lookup results
// ============================================================================

/// Result of a rate lookup for one procedure code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeInfo {
    /// Procedure code this entry describes
    pub code: String,
    /// Human-readable procedure description
    pub description: String,
    /// Reference rate for the procedure (USD)
    pub rate: f64,
}

/// Per-item resolution outcome consumed by the aggregation stage.
///
/// `expected_cost` is the lookup rate when resolved, or the documented
/// fallback estimate when the lookup failed or was abandoned on cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedCode {
    /// The original billed line item
    pub item: BillingItem,
    /// Lookup result, if the lookup settled successfully
    pub info: Option<CodeInfo>,
    /// Expected cost used for aggregation (rate or fallback estimate)
    pub expected_cost: f64,
    /// Whether the lookup settled successfully
    pub resolved: bool,
}
