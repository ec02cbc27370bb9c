//! Lookup Service boundary
//!
//! Abstracts the external rate/description provider behind a trait so
//! different backends can be swapped:
//! - `StaticRateTable`: read-only table injected by the host (current)
//! - Future: an HTTP-backed provider living behind the same trait
//!
//! Lookups are idempotent reads. They may be slow or transiently
//! unavailable, which is why the pipeline wraps them in retry + cache.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::CodeInfo;

/// Failure modes of a rate lookup.
///
/// The retry controller does not classify errors; `is_transient` is a
/// caller-supplied classification for hosts that want to filter before
/// retrying.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("rate service unavailable: {0}")]
    Unavailable(String),

    #[error("rate service timed out after {0} ms")]
    Timeout(u64),

    #[error("rate service returned status {0}")]
    Status(u16),

    #[error("no entry for procedure code {0}")]
    UnknownCode(String),

    #[error("lookup task aborted before completing")]
    Aborted,
}

impl LookupError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Timeout(_) => true,
            Self::Status(status) => *status >= 500,
            Self::UnknownCode(_) | Self::Aborted => false,
        }
    }
}

/// Trait for rate/description providers.
///
/// Every implementation must be thread-safe (Send + Sync) since the
/// orchestrator shares the service across concurrent per-code tasks.
#[async_trait]
pub trait LookupService: Send + Sync {
    /// Fetch the description and reference rate for a procedure code
    async fn lookup(&self, code: &str) -> Result<CodeInfo, LookupError>;

    /// Provider name for logging and trace records
    fn service_name(&self) -> &'static str;
}

/// In-memory provider over an injected read-only table.
///
/// The table itself is external data; this type only adapts it to the
/// `LookupService` interface for hosts and tests.
pub struct StaticRateTable {
    rates: HashMap<String, CodeInfo>,
}

impl StaticRateTable {
    /// Build from `(code, description, rate)` rows.
    pub fn new<I, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = (S, S, f64)>,
        S: Into<String>,
    {
        let rates = rows
            .into_iter()
            .map(|(code, description, rate)| {
                let code = code.into();
                (
                    code.clone(),
                    CodeInfo {
                        code,
                        description: description.into(),
                        rate,
                    },
                )
            })
            .collect();
        Self { rates }
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

#[async_trait]
impl LookupService for StaticRateTable {
    async fn lookup(&self, code: &str) -> Result<CodeInfo, LookupError> {
        self.rates
            .get(code)
            .cloned()
            .ok_or_else(|| LookupError::UnknownCode(code.to_string()))
    }

    fn service_name(&self) -> &'static str {
        "StaticRateTable"
    }
}
