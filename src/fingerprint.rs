//! Deterministic cache/coalescing key construction.
//!
//! A fingerprint is derived from exactly the fields that determine a
//! lookup's outcome, so two logically identical requests always share a key
//! (the cache-hit and dedup invariant). Amounts are canonicalised to integer
//! cents before formatting; float formatting differences can never split a
//! key.
//!
//! Collision-freedom: procedure codes are validated upstream against a
//! pattern that admits only digits, `-`, and alphanumerics, so the `:`
//! separator cannot occur inside a field. Each constructor notes the inputs
//! it covers.

/// Fingerprint for a rate lookup. Covers the procedure code alone — the
/// rate provider's answer depends on nothing else.
pub fn rate_lookup(code: &str) -> String {
    format!("rate:{code}")
}

/// Fingerprint for a combined lookup covering code plus billed amount.
/// The amount participates rounded to cents.
pub fn combined(code: &str, billed_amount: f64) -> String {
    format!("combined:{code}:{}", to_cents(billed_amount))
}

/// Canonicalise a dollar amount to integer cents.
fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_fingerprint_is_deterministic() {
        assert_eq!(rate_lookup("70553"), rate_lookup("70553"));
        assert_eq!(rate_lookup("70553"), "rate:70553");
    }

    #[test]
    fn test_distinct_codes_distinct_fingerprints() {
        assert_ne!(rate_lookup("70553"), rate_lookup("70554"));
        assert_ne!(rate_lookup("70553"), combined("70553", 100.0));
    }

    #[test]
    fn test_combined_rounds_to_cents() {
        // Sub-cent noise must not split the key
        assert_eq!(combined("70553", 100.0), combined("70553", 100.0049));
        assert_eq!(combined("70553", 100.0), "combined:70553:10000");
    }

    #[test]
    fn test_combined_distinguishes_cents() {
        assert_ne!(combined("70553", 100.00), combined("70553", 100.01));
    }
}
