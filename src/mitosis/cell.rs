//! A `Cell` models one agent's effective lifetime (§4.6): state,
//! phase, and the counters that feed the handoff triggers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellState {
    /// In the pool, unactivated.
    Stem,
    /// Activated and operating.
    Active,
    /// Phase 1 has run; DNA is stashed for a future handoff.
    Prepared,
    /// Handoff is in flight.
    Dividing,
    /// Superseded by a child; eligible for `complete_apoptosis`.
    Apoptotic,
}

/// Handoff phase. `ReadyForHandoff` carries the DNA stashed by Prepare
/// along with the context length at the time it was stashed, so the
/// later delta computation knows exactly where the "new" context
/// begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum CellPhase {
    /// Phase 1 has not run.
    Idle,
    /// Phase 1 has run; holds the stashed DNA and the context length
    /// at stash time.
    ReadyForHandoff {
        /// DNA extracted during Prepare.
        dna: String,
        /// `|ctx|` at Prepare time, the delta's starting offset.
        context_len: usize,
    },
}

/// One cell in the mitosis lineage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    /// Stable identifier, also used as the key under `handovers/`.
    pub id: String,
    /// Lineage depth; bumped on every activation.
    pub generation: u32,
    /// Current lifecycle state.
    pub state: CellState,
    /// Current handoff phase.
    pub phase: CellPhase,
    /// When this cell was activated (or minted, for a Stem cell).
    pub born_at: DateTime<Utc>,
    /// Completed tasks since activation; feeds the task-count trigger.
    pub task_completions: u32,
    /// Tool invocations since activation; feeds the tool-count trigger.
    pub tool_calls: u32,
    /// The DNA this cell is currently operating from.
    pub current_dna: String,
}

impl Cell {
    /// A fresh Stem cell awaiting activation.
    pub fn new_stem(id: impl Into<String>, generation: u32) -> Self {
        Self {
            id: id.into(),
            generation,
            state: CellState::Stem,
            phase: CellPhase::Idle,
            born_at: Utc::now(),
            task_completions: 0,
            tool_calls: 0,
            current_dna: String::new(),
        }
    }

    /// Activate a Stem cell into an Active one carrying `dna`, the
    /// next generation after `parent_generation`.
    pub fn activate(mut self, dna: String, parent_generation: u32) -> Self {
        self.state = CellState::Active;
        self.generation = parent_generation + 1;
        self.current_dna = dna;
        self.born_at = Utc::now();
        self
    }

    /// Whether Phase 1 has already run (idempotency guard for `prepare`).
    pub fn is_prepared(&self) -> bool {
        matches!(self.phase, CellPhase::ReadyForHandoff { .. })
    }

    pub fn record_task_completion(&mut self) {
        self.task_completions += 1;
    }

    pub fn record_tool_call(&mut self) {
        self.tool_calls += 1;
    }

    /// Seconds elapsed since this cell was activated/born.
    pub fn age_seconds(&self) -> i64 {
        Utc::now().signed_duration_since(self.born_at).num_seconds().max(0)
    }

    /// Begin apoptosis after handing off to a child.
    pub fn begin_apoptosis(&mut self) {
        self.state = CellState::Apoptotic;
    }

    /// Finalize apoptosis. Callable only once the cell has handed off;
    /// idempotent.
    pub fn complete_apoptosis(&mut self) {
        self.state = CellState::Apoptotic;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_stem_cell_starts_idle() {
        let cell = Cell::new_stem("stem-1", 0);
        assert_eq!(cell.state, CellState::Stem);
        assert!(!cell.is_prepared());
    }

    #[test]
    fn activate_bumps_generation_past_parent() {
        let cell = Cell::new_stem("stem-1", 5).activate("dna".to_string(), 7);
        assert_eq!(cell.generation, 8);
        assert_eq!(cell.state, CellState::Active);
    }
}
