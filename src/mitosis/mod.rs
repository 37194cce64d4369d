//! Mitosis Lifecycle (§4.6): two-phase context handoff between
//! generations of a cell, so a long-running agent can keep working
//! past a single context window by spawning its replacement with a
//! distilled "DNA" of everything that mattered.

pub mod cell;
pub mod dna;
pub mod stempool;

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use cell::{Cell, CellPhase, CellState};
pub use stempool::StemPool;

use crate::backend::Backend;
use crate::error::MascResult;

/// Tunables for the two-phase protocol; defaults match §4.6.
#[derive(Debug, Clone)]
pub struct MitosisConfig {
    /// Context ratio at which Phase 1 (Prepare) fires.
    pub prepare_threshold: f64,
    /// Context ratio at which Phase 2 (Handoff) fires.
    pub handoff_threshold: f64,
    /// Fraction of `|ctx|` taken as the Prepare-phase DNA slice.
    pub compression_ratio: f64,
    /// Below this context length, Phase 2 skips the delta entirely.
    pub min_context_for_delta: usize,
    /// Below this compressed-delta length, Phase 2 skips the delta entirely.
    pub min_delta_len: usize,
    /// Time-elapsed trigger, if configured.
    pub time_trigger: Option<Duration>,
    /// Task-completion-count trigger, if configured.
    pub task_trigger: Option<u32>,
    /// Tool-call-count trigger, if configured.
    pub tool_trigger: Option<u32>,
}

impl Default for MitosisConfig {
    fn default() -> Self {
        Self {
            prepare_threshold: 0.5,
            handoff_threshold: 0.8,
            compression_ratio: 0.125,
            min_context_for_delta: 1000,
            min_delta_len: 100,
            time_trigger: None,
            task_trigger: None,
            tool_trigger: None,
        }
    }
}

/// Result of one `auto_check` call.
#[derive(Debug)]
pub enum CheckResult {
    /// Neither threshold was reached.
    NoOp,
    /// Phase 1 ran (or had already run — idempotent).
    Prepared,
    /// Phase 2 ran: `child` is the newly activated cell, already
    /// handed its DNA and spawned.
    Handoff {
        /// The newly activated successor.
        child: Cell,
    },
}

/// Whether any of the non-ratio triggers fire. Ratio is checked
/// directly by `auto_check` against the two thresholds, so it isn't
/// part of this helper.
pub fn non_ratio_trigger_fired(config: &MitosisConfig, cell: &Cell) -> bool {
    if let Some(t) = config.time_trigger {
        if cell.age_seconds() as u64 >= t.as_secs() {
            return true;
        }
    }
    if let Some(k) = config.task_trigger {
        if cell.task_completions >= k {
            return true;
        }
    }
    if let Some(m) = config.tool_trigger {
        if cell.tool_calls >= m {
            return true;
        }
    }
    false
}

fn handoff_prompt(dna: &str) -> String {
    format!("You are taking over from a prior generation. Context DNA:\n{dna}")
}

/// Build the successor DNA from a cell already in `ReadyForHandoff`,
/// applying the delta-skip thresholds from §4.6.
fn prepared_handoff_dna(dna: &str, context_len: usize, ctx: &str, config: &MitosisConfig) -> String {
    if ctx.chars().count() < config.min_context_for_delta {
        return dna.to_string();
    }
    let full_len = ctx.chars().count();
    let delta = dna::safe_sub(ctx, context_len, full_len);
    let compressed = dna::dedup_lines(&delta, dna);
    if compressed.len() < config.min_delta_len {
        return dna.to_string();
    }
    format!("{dna}\n## Recent Updates\n{compressed}")
}

/// Run one mitosis check for `cell` against the current context
/// `ctx`/`ctx_ratio`. `spawn` is invoked with the handoff prompt only
/// when Phase 2 actually fires. On the Phase 2 branch, the handoff and
/// its synapse-graph edge are durably recorded to `backend` (§6) before
/// this returns.
pub async fn auto_check<S, Fut>(
    cell: &mut Cell,
    pool: &mut StemPool,
    ctx: &str,
    ctx_ratio: f64,
    config: &MitosisConfig,
    backend: &Backend,
    spawn: S,
) -> MascResult<CheckResult>
where
    S: FnOnce(String) -> Fut,
    Fut: Future<Output = ()>,
{
    if ctx_ratio >= config.handoff_threshold {
        let child_dna = match &cell.phase {
            CellPhase::ReadyForHandoff { dna, context_len } => {
                prepared_handoff_dna(dna, *context_len, ctx, config)
            }
            // Emergency path: the ratio jumped straight past handoff
            // without ever passing prepare — one-phase extraction from
            // the full context.
            CellPhase::Idle => ctx.to_string(),
        };

        let mut child = pool.activate_one().activate(child_dna.clone(), cell.generation);
        spawn(handoff_prompt(&child_dna)).await;
        let parent_snapshot = cell.clone();
        cell.begin_apoptosis();
        pool.replenish(child.generation + 1);
        child.state = CellState::Active;
        record_handover(backend, &parent_snapshot, &child).await?;
        return Ok(CheckResult::Handoff { child });
    }

    if ctx_ratio >= config.prepare_threshold {
        if cell.is_prepared() {
            return Ok(CheckResult::Prepared);
        }
        let prepared_dna = dna::leading_slice(ctx, config.compression_ratio);
        cell.phase = CellPhase::ReadyForHandoff {
            dna: prepared_dna,
            context_len: ctx.chars().count(),
        };
        cell.state = CellState::Prepared;
        return Ok(CheckResult::Prepared);
    }

    Ok(CheckResult::NoOp)
}

/// A durable record of one handoff, written to
/// `handovers/<id>.json` (§6 on-disk layout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoverRecord {
    /// Record id, also its key suffix under `handovers/`.
    pub id: String,
    /// Parent cell id.
    pub parent: String,
    /// Child cell id.
    pub child: String,
    /// Parent's generation at handoff time.
    pub parent_generation: u32,
    /// Child's generation.
    pub child_generation: u32,
    /// Character length of the child's DNA, for observability.
    pub dna_len: usize,
    /// When the handoff was recorded.
    pub ts: chrono::DateTime<chrono::Utc>,
}

fn handover_key(id: &str) -> String {
    format!("handovers:{id}")
}

const SYNAPSE_GRAPH_KEY: &str = "synapses:graph";

/// Record a handoff: the record itself, plus an edge in the
/// parent→children adjacency graph used to reconstruct lineage.
pub async fn record_handover(backend: &Backend, parent: &Cell, child: &Cell) -> MascResult<()> {
    let record = HandoverRecord {
        id: uuid::Uuid::new_v4().to_string(),
        parent: parent.id.clone(),
        child: child.id.clone(),
        parent_generation: parent.generation,
        child_generation: child.generation,
        dna_len: child.current_dna.chars().count(),
        ts: chrono::Utc::now(),
    };
    backend
        .set(&handover_key(&record.id), &serde_json::to_vec(&record)?)
        .await?;

    let mut graph: HashMap<String, Vec<String>> = match backend.get(SYNAPSE_GRAPH_KEY).await? {
        Some(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        None => HashMap::new(),
    };
    graph.entry(parent.id.clone()).or_default().push(child.id.clone());
    backend.set(SYNAPSE_GRAPH_KEY, &serde_json::to_vec(&graph)?).await?;
    Ok(())
}
