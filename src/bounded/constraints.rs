//! Constraint record and running-total state for a Bounded run (§4.5).

use serde::{Deserialize, Serialize};

/// Retry policy for a single spawn within one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts permitted per turn before the spawn failure is surfaced.
    pub max_retries: u32,
    /// Base delay, doubled on each attempt.
    pub base_delay_ms: u64,
    /// Backoff ceiling regardless of attempt count.
    pub max_delay_ms: u64,
    /// Fraction of the computed delay added/subtracted at random, e.g.
    /// `0.2` means ±20%.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            jitter_factor: 0.2,
        }
    }
}

/// All optional save for `hard_max_iterations`, which always has a
/// default ceiling.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Constraints {
    /// Maximum turns across all agents.
    pub max_turns: Option<u32>,
    /// Maximum cumulative tokens.
    pub max_tokens: Option<u64>,
    /// Maximum cumulative spend.
    pub max_cost_usd: Option<f64>,
    /// Maximum wall-clock seconds since the run started.
    pub max_time_seconds: Option<u64>,
    /// Predictive slack added to the running-average projection.
    pub token_buffer: Option<u64>,
    /// Absolute ceiling on iterations; defaults to 100 via [`Constraints::hard_max_iterations`].
    pub hard_max_iterations: Option<u32>,
    /// Spawn retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Constraints {
    pub fn hard_max_iterations(&self) -> u32 {
        self.hard_max_iterations.unwrap_or(100)
    }
}

/// Running totals accumulated across turns.
#[derive(Debug, Clone, Default)]
pub struct State {
    /// Completed turns so far.
    pub turns: u32,
    /// Cumulative tokens spent.
    pub tokens: u64,
    /// Cumulative cost in USD.
    pub cost_usd: f64,
}

impl State {
    /// Average tokens/turn so far, or `token_buffer` (or 0) when no
    /// turn has completed yet.
    pub fn running_avg_tokens(&self, token_buffer: Option<u64>) -> u64 {
        if self.turns == 0 {
            token_buffer.unwrap_or(0)
        } else {
            self.tokens / self.turns as u64
        }
    }
}

/// Which constraint (if any) is violated by `state`, given `elapsed`
/// wall-clock seconds since the run started. Checked with no buffer
/// (the post-hoc re-check) or with the predictive projection folded in
/// by the caller.
pub fn first_violation(constraints: &Constraints, state: &State, elapsed_secs: u64) -> Option<&'static str> {
    if let Some(max_turns) = constraints.max_turns {
        if state.turns >= max_turns {
            return Some("max_turns");
        }
    }
    if let Some(max_tokens) = constraints.max_tokens {
        if state.tokens > max_tokens {
            return Some("max_tokens");
        }
    }
    if let Some(max_cost) = constraints.max_cost_usd {
        if state.cost_usd > max_cost {
            return Some("max_cost_usd");
        }
    }
    if let Some(max_time) = constraints.max_time_seconds {
        if elapsed_secs > max_time {
            return Some("max_time_seconds");
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_avg_uses_token_buffer_before_first_turn() {
        let state = State::default();
        assert_eq!(state.running_avg_tokens(Some(400)), 400);
        assert_eq!(state.running_avg_tokens(None), 0);
    }

    #[test]
    fn running_avg_after_turns() {
        let state = State {
            turns: 2,
            tokens: 800,
            cost_usd: 0.0,
        };
        assert_eq!(state.running_avg_tokens(Some(400)), 400);
    }

    #[test]
    fn first_violation_reports_max_turns() {
        let constraints = Constraints {
            max_turns: Some(5),
            ..Default::default()
        };
        let state = State {
            turns: 5,
            ..Default::default()
        };
        assert_eq!(first_violation(&constraints, &state, 0), Some("max_turns"));
    }

    #[test]
    fn hard_max_iterations_defaults_to_100() {
        assert_eq!(Constraints::default().hard_max_iterations(), 100);
    }
}
