//! Run configuration for the cost-variance pipeline.
//!
//! `RunOptions` carries the caller-tunable knobs for one pipeline
//! invocation: cache TTL, retry shape, fan-out mode, code format, the
//! fallback estimate, and an optional overall deadline. Defaults live in
//! [`defaults`].

pub mod defaults;

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::types::ValidationError;
use self::defaults::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_BASE_DELAY, DEFAULT_CODE_PATTERN, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_TTL, FALLBACK_EXPECTED_COST,
};

/// Compiled default procedure-code pattern (5 digits, optional modifier).
pub fn default_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // The pattern is a constant; compilation cannot fail.
    PATTERN.get_or_init(|| Regex::new(DEFAULT_CODE_PATTERN).expect("default code pattern compiles"))
}

/// Caller-tunable options for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Cache TTL for lookup results. `Duration::ZERO` disables storing
    /// (values are still coalesced while in flight).
    pub ttl: Duration,
    /// Maximum lookup attempts per code (initial call + retries), >= 1
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Backoff multiplier between attempts, >= 1.0
    pub backoff_multiplier: f64,
    /// Resolve codes concurrently (true) or one at a time (false)
    pub parallel: bool,
    /// Required format for procedure codes
    pub code_pattern: Regex,
    /// Expected-cost estimate for codes whose lookup fails
    pub fallback_expected_cost: f64,
    /// Overall wall-clock budget; on expiry the run degrades rather than fails
    pub deadline: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            parallel: true,
            code_pattern: default_code_pattern().clone(),
            fallback_expected_cost: FALLBACK_EXPECTED_COST,
            deadline: None,
        }
    }
}

impl RunOptions {
    /// Check option invariants before the run starts.
    ///
    /// Violations are structural input errors and abort with no partial
    /// report, same as a malformed code.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::InvalidOption(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ValidationError::InvalidOption(format!(
                "backoff_multiplier must be a finite value >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if !self.fallback_expected_cost.is_finite() || self.fallback_expected_cost < 0.0 {
            return Err(ValidationError::InvalidOption(format!(
                "fallback_expected_cost must be a finite value >= 0, got {}",
                self.fallback_expected_cost
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RunOptions::default().validate().is_ok());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let options = RunOptions {
            max_attempts: 0,
            ..RunOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(ValidationError::InvalidOption(_))
        ));
    }

    #[test]
    fn test_sub_unit_multiplier_rejected() {
        let options = RunOptions {
            backoff_multiplier: 0.5,
            ..RunOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_negative_fallback_rejected() {
        let options = RunOptions {
            fallback_expected_cost: -10.0,
            ..RunOptions::default()
        };
        assert!(options.validate().is_err());
    }
}
