//! Spawn retry policy (§4.5 loop invariant 4), grounded on
//! `enterprise::collaboration::transport::ReconnectStrategy::calculate_delay`'s
//! exponential-backoff shape, extended with the jitter the spec calls
//! for and a regex gate over the failure message instead of an
//! unconditional retry-on-any-error.

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use std::time::Duration;

use crate::bounded::constraints::RetryConfig;

/// Matches the failure messages the spec calls out as transient:
/// timeouts, connection trouble, rate limiting, and 5xx/"overloaded"
/// responses. Anything else is treated as a hard failure — retrying it
/// would just burn the budget.
static RETRYABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)timeout|connection|rate.?limit|\b429\b|\b5\d\d\b|overloaded|temporarily unavailable")
        .expect("static regex is valid")
});

/// Is `message` a transient failure worth retrying?
pub fn is_retryable(message: &str) -> bool {
    RETRYABLE.is_match(message)
}

/// `min(base * 2^attempt, max) ± jitter`, where jitter is a uniform
/// random fraction of the computed delay bounded by `jitter_factor`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let raw = (config.base_delay_ms as f64) * 2f64.powi(attempt as i32);
    let capped = raw.min(config.max_delay_ms as f64);
    let jitter_span = capped * config.jitter_factor;
    let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
    let delayed = (capped + jitter).max(0.0) as u64;
    Duration::from_millis(delayed)
}
