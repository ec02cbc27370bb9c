//! System-wide default constants.
//!
//! Centralises magic numbers that would otherwise scatter across the
//! codebase. Grouped by subsystem for easy discovery.

use std::time::Duration;

// ============================================================================
// Cache
// ============================================================================

/// Default time-to-live for cached lookup results.
///
/// 300 s covers a typical interactive analysis session without letting a
/// stale rate survive a provider update for long.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Interval between background sweeper passes over the cache.
pub const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// Retry
// ============================================================================

/// Default maximum lookup attempts (initial call + retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the second attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Default backoff multiplier between attempts.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Hard cap on any single computed backoff delay.
///
/// `base * multiplier^(n-1)` grows without bound; the cap keeps a large
/// multiplier from stalling a pipeline run.
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

// ============================================================================
// Pipeline
// ============================================================================

/// Expected-cost estimate used when a code's lookup fails or is abandoned.
///
/// Flat per-procedure estimate (USD). Items resolved through the fallback
/// are flagged `resolved: false` in the report breakdown.
pub const FALLBACK_EXPECTED_COST: f64 = 100.0;

/// Default procedure code format: 5 digits, optional 2-alphanumeric modifier.
pub const DEFAULT_CODE_PATTERN: &str = r"^\d{5}(-[A-Za-z0-9]{2})?$";

/// Billed-to-rate ratio above which the error scan flags a line.
pub const ERROR_SCAN_RATE_MULTIPLE: f64 = 3.0;
