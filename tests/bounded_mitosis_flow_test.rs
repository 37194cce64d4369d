// Integration test driving a bounded multi-agent loop whose growing
// context crosses the mitosis handoff thresholds mid-run.

#[cfg(test)]
mod bounded_mitosis_flow_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use masc::backend::Backend;
    use masc::bounded::{run, Condition, Constraints, Goal, RunStatus, SpawnOutcome};
    use masc::mitosis::{auto_check, CellPhase, CellState};
    use masc::mitosis::cell::Cell;
    use masc::mitosis::stempool::StemPool;
    use masc::mitosis::MitosisConfig;

    #[tokio::test]
    async fn growing_context_triggers_prepare_then_handoff_across_turns() {
        let mut cell = Cell::new_stem("cell-0", 0).activate(String::new(), 0);
        let mut pool = StemPool::seeded(1, 2);
        let config = MitosisConfig::default();
        let backend = Backend::memory();

        // Turn 1: context ratio crosses prepare_threshold (0.5) but not handoff.
        let ctx_turn1 = "a".repeat(4000);
        let result = auto_check(&mut cell, &mut pool, &ctx_turn1, 0.55, &config, &backend, |_p| async {})
            .await
            .unwrap();
        assert!(matches!(result, masc::mitosis::CheckResult::Prepared));
        assert!(cell.is_prepared());
        assert_eq!(cell.state, CellState::Prepared);

        // Turn 2: context keeps growing and crosses handoff_threshold (0.8).
        let ctx_turn2 = format!("{ctx_turn1}{}", "b".repeat(1500));
        let mut handoff_prompt = String::new();
        let result = auto_check(&mut cell, &mut pool, &ctx_turn2, 0.85, &config, &backend, |prompt| {
            handoff_prompt = prompt;
            async {}
        })
        .await
        .unwrap();

        match result {
            masc::mitosis::CheckResult::Handoff { child } => {
                assert_eq!(child.generation, 2);
                assert!(child.current_dna.contains("## Recent Updates"));
                assert!(handoff_prompt.contains(&child.current_dna));
            }
            other => panic!("expected Handoff, got {other:?}"),
        }
        assert_eq!(cell.state, CellState::Apoptotic);
        assert!(matches!(cell.phase, CellPhase::ReadyForHandoff { .. }));
    }

    #[tokio::test]
    async fn bounded_loop_records_tool_calls_that_feed_a_mitosis_trigger() {
        // The bounded loop and the cell are driven independently here
        // (no call site wires them together directly), but a caller
        // coordinating both uses the same turn count to decide when to
        // check mitosis triggers — this test exercises that handshake.
        let agents = vec!["gemini-alpha".to_string()];
        let goal = Goal {
            path: "$.score".to_string(),
            condition: Condition::Gte(0.9),
        };
        let constraints = Constraints {
            max_turns: Some(10),
            hard_max_iterations: Some(10),
            ..Default::default()
        };

        let call = Arc::new(AtomicUsize::new(0));
        let mut cell = Cell::new_stem("cell-0", 0).activate(String::new(), 0);
        let config = MitosisConfig {
            task_trigger: Some(3),
            ..Default::default()
        };

        let result = run(&agents, &goal, &constraints, "begin", |_agent, _prompt| {
            let call = call.clone();
            async move {
                let i = call.fetch_add(1, Ordering::SeqCst);
                let score = [0.3, 0.5, 0.7, 0.95][i.min(3)];
                Ok(SpawnOutcome {
                    text: format!("{{\"score\":{score}}}"),
                    tokens: 10,
                    cost_usd: 0.0,
                })
            }
        })
        .await
        .unwrap();

        assert!(matches!(result.status, RunStatus::GoalReached { .. }));
        assert_eq!(result.state.turns, 4);

        for _ in 0..result.state.turns {
            cell.record_task_completion();
        }
        let mut pool = StemPool::new();
        let fired = masc::mitosis::non_ratio_trigger_fired(&config, &cell);
        assert!(fired);
        let _ = pool.activate_one(); // pool stays usable even though unused by this trigger path.
    }
}
