//! Bounded Execution (§4.5): drive a round-robin multi-agent loop to a
//! goal with a provably terminating iteration count.
//!
//! The loop itself has no teacher analogue (the closest the corpus
//! comes is `enterprise::ratelimit`'s sliding-window admission and
//! `enterprise::collaboration::transport::ReconnectStrategy`'s backoff
//! shape, both reused in [`retry`]); it is assembled from the spec's
//! seven numbered loop invariants directly.

pub mod constraints;
pub mod goal;
pub mod retry;

use std::future::Future;
use std::time::Instant;

use serde_json::Value;

pub use constraints::{Constraints, RetryConfig, State};
pub use goal::{Condition, Goal};

use crate::error::{MascError, MascResult};

/// What one spawn call returned: raw text plus the token/cost usage to
/// fold into the running totals.
#[derive(Debug, Clone)]
pub struct SpawnOutcome {
    /// Raw text the agent returned.
    pub text: String,
    /// Tokens billed for this spawn.
    pub tokens: u64,
    /// Cost billed for this spawn, in USD.
    pub cost_usd: f64,
}

/// Terminal outcome of a Bounded run.
#[derive(Debug, Clone)]
pub enum RunStatus {
    /// The goal was met. `warning` is set when a non-buffered
    /// constraint was also exceeded on the same turn (loop invariant 7).
    GoalReached {
        /// The parsed spawn output the goal matched against.
        output: Value,
        /// Set when a constraint was also exceeded on the same turn.
        warning: Option<String>,
    },
    /// A constraint was hit before the goal was met.
    ConstraintExceeded {
        /// Which constraint fired first.
        reason: String,
        /// The last parsed output, if any turn had completed.
        output: Option<Value>,
    },
    /// The agent list was empty, or every retry was exhausted.
    Error {
        /// Human-readable failure reason.
        reason: String,
    },
}

/// Terminal result: the status plus the accumulated totals.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// How the run ended.
    pub status: RunStatus,
    /// Final turn/token/cost totals.
    pub state: State,
}

/// Parse `text` as JSON; on failure, wrap it in `{"raw": text}` rather
/// than failing the turn (loop invariant 6).
fn parse_output(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::json!({ "raw": text }))
}

/// Run the bounded loop. `spawn` is the external capability; it is
/// retried per `constraints.retry` on transient failures (§`retry`)
/// and otherwise surfaces its error message as a hard [`RunStatus::Error`].
pub async fn run<S, Fut>(
    agents: &[String],
    goal: &Goal,
    constraints: &Constraints,
    prompt: &str,
    spawn: S,
) -> MascResult<RunResult>
where
    S: Fn(String, String) -> Fut,
    Fut: Future<Output = Result<SpawnOutcome, String>>,
{
    if agents.is_empty() {
        return Ok(RunResult {
            status: RunStatus::Error {
                reason: "No agents available".to_string(),
            },
            state: State::default(),
        });
    }

    let started = Instant::now();
    let mut state = State::default();

    loop {
        let hard_max = constraints.hard_max_iterations();
        if state.turns >= hard_max {
            return Ok(terminate(state, "hard_max_iterations", None));
        }

        let avg = state.running_avg_tokens(constraints.token_buffer);
        if let Some(max_tokens) = constraints.max_tokens {
            if state.tokens + avg > max_tokens {
                return Ok(terminate(state, "max_tokens (predictive)", None));
            }
        }
        let elapsed_secs = started.elapsed().as_secs();
        if let Some(reason) = constraints::first_violation(constraints, &state, elapsed_secs) {
            return Ok(terminate(state, reason, None));
        }

        let agent = agents[(state.turns as usize) % agents.len()].clone();

        let outcome = match spawn_with_retry(&spawn, &agent, prompt, &constraints.retry).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                return Ok(RunResult {
                    status: RunStatus::Error { reason },
                    state,
                })
            }
        };

        state.turns += 1;
        state.tokens += outcome.tokens;
        state.cost_usd += outcome.cost_usd;

        let output = parse_output(&outcome.text);
        let goal_met = goal.is_met(&output);

        let elapsed_secs = started.elapsed().as_secs();
        let violation = constraints::first_violation(constraints, &state, elapsed_secs);
        match (goal_met, violation) {
            (true, None) => {
                return Ok(RunResult {
                    status: RunStatus::GoalReached { output, warning: None },
                    state,
                })
            }
            (true, Some(reason)) => {
                return Ok(RunResult {
                    status: RunStatus::GoalReached {
                        output,
                        warning: Some(format!("goal reached but {reason} was also exceeded")),
                    },
                    state,
                })
            }
            (false, Some(reason)) => return Ok(terminate(state, reason, Some(output))),
            (false, None) => continue,
        }
    }
}

fn terminate(state: State, reason: &str, output: Option<Value>) -> RunResult {
    RunResult {
        status: RunStatus::ConstraintExceeded {
            reason: reason.to_string(),
            output,
        },
        state,
    }
}

async fn spawn_with_retry<S, Fut>(
    spawn: &S,
    agent: &str,
    prompt: &str,
    retry_config: &RetryConfig,
) -> Result<SpawnOutcome, String>
where
    S: Fn(String, String) -> Fut,
    Fut: Future<Output = Result<SpawnOutcome, String>>,
{
    let mut attempt = 0;
    loop {
        match spawn(agent.to_string(), prompt.to_string()).await {
            Ok(outcome) => return Ok(outcome),
            Err(message) => {
                if attempt >= retry_config.max_retries || !retry::is_retryable(&message) {
                    return Err(message);
                }
                tokio::time::sleep(retry::backoff_delay(retry_config, attempt)).await;
                attempt += 1;
            }
        }
    }
}

/// Convert a terminal [`RunStatus`] to a [`MascError`] for callers that
/// want to propagate a failed run through `?` rather than match on it.
impl RunStatus {
    pub fn into_result(self) -> MascResult<Value> {
        match self {
            RunStatus::GoalReached { output, .. } => Ok(output),
            RunStatus::ConstraintExceeded { reason, .. } => Err(MascError::Other(format!(
                "constraint exceeded: {reason}"
            ))),
            RunStatus::Error { reason } => Err(MascError::Other(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn goal_score_gte_0_8() -> Goal {
        Goal {
            path: "$.score".to_string(),
            condition: Condition::Gte(0.8),
        }
    }

    #[tokio::test]
    async fn bounded_with_goal_reaches_goal_on_third_turn() {
        let agents = vec!["gemini-alpha".to_string()];
        let constraints = Constraints {
            max_turns: Some(5),
            hard_max_iterations: Some(10),
            ..Default::default()
        };
        let scores = [0.2, 0.5, 0.9];
        let call = Arc::new(AtomicUsize::new(0));

        let result = run(&agents, &goal_score_gte_0_8(), &constraints, "go", |_agent, _prompt| {
            let call = call.clone();
            async move {
                let i = call.fetch_add(1, Ordering::SeqCst);
                Ok(SpawnOutcome {
                    text: format!("{{\"score\":{}}}", scores[i]),
                    tokens: 0,
                    cost_usd: 0.0,
                })
            }
        })
        .await
        .unwrap();

        assert!(matches!(result.status, RunStatus::GoalReached { warning: None, .. }));
        assert_eq!(result.state.turns, 3);
    }

    #[tokio::test]
    async fn bounded_predictive_limit_terminates_before_exceeding_budget() {
        let agents = vec!["agent-1".to_string()];
        let constraints = Constraints {
            max_tokens: Some(1000),
            token_buffer: Some(400),
            hard_max_iterations: Some(10),
            ..Default::default()
        };
        let goal = Goal {
            path: "$.score".to_string(),
            condition: Condition::Gte(2.0), // unreachable, forces constraint path
        };

        let result = run(&agents, &goal, &constraints, "go", |_agent, _prompt| async move {
            Ok(SpawnOutcome {
                text: "{\"score\":0.1}".to_string(),
                tokens: 400,
                cost_usd: 0.0,
            })
        })
        .await
        .unwrap();

        match result.status {
            RunStatus::ConstraintExceeded { reason, .. } => {
                assert!(reason.contains("max_tokens"));
            }
            other => panic!("expected ConstraintExceeded, got {other:?}"),
        }
        assert_eq!(result.state.turns, 2);
    }

    #[tokio::test]
    async fn empty_agent_list_is_an_error() {
        let result = run(&[], &goal_score_gte_0_8(), &Constraints::default(), "go", |_a, _p| async move {
            Ok(SpawnOutcome {
                text: "{}".to_string(),
                tokens: 0,
                cost_usd: 0.0,
            })
        })
        .await
        .unwrap();
        assert!(matches!(result.status, RunStatus::Error { .. }));
    }

    #[tokio::test]
    async fn retryable_failure_is_retried_then_succeeds() {
        let call = Arc::new(AtomicUsize::new(0));
        let agents = vec!["agent-1".to_string()];
        let constraints = Constraints {
            max_turns: Some(1),
            hard_max_iterations: Some(5),
            retry: RetryConfig {
                max_retries: 2,
                base_delay_ms: 1,
                max_delay_ms: 2,
                jitter_factor: 0.0,
            },
            ..Default::default()
        };

        let result = run(&agents, &goal_score_gte_0_8(), &constraints, "go", |_agent, _prompt| {
            let call = call.clone();
            async move {
                if call.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("connection reset".to_string())
                } else {
                    Ok(SpawnOutcome {
                        text: "{\"score\":0.9}".to_string(),
                        tokens: 0,
                        cost_usd: 0.0,
                    })
                }
            }
        })
        .await
        .unwrap();

        assert!(matches!(result.status, RunStatus::GoalReached { .. }));
    }

    #[tokio::test]
    async fn non_retryable_failure_is_a_hard_error() {
        let agents = vec!["agent-1".to_string()];
        let result = run(&agents, &goal_score_gte_0_8(), &Constraints::default(), "go", |_a, _p| async move {
            Err("invalid api key".to_string())
        })
        .await
        .unwrap();
        assert!(matches!(result.status, RunStatus::Error { reason } if reason == "invalid api key"));
    }
}
