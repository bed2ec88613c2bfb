//! Integration tests for end-to-end Cadence execution.
//!
//! These tests verify the full pipeline:
//! Graph → Synthesize → Run on worker threads → Verify trace

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use cadence_compiler::{PrecedenceGraph, ReactionNode, SynthesisConfig, TagShape};
use cadence_runtime::bundle::{read_table, write_table};
use cadence_runtime::{
    Error, Instruction, Periodic, Program, QsScheduler, ReactionContext, ReactionId, ReactionTable,
    RunOptions, ScheduleVariant, SchedulerConfig, Tag, TagDecision, run,
};
use cadence_tests::TestHarness;

include!("../fixtures/two_chains.rs");

fn r(id: u32) -> ReactionId {
    ReactionId(id)
}

fn all(n: u32) -> Vec<ReactionId> {
    (0..n).map(ReactionId).collect()
}

/// Whether `Exec(a)` happens before `Exec(b)` through program order and
/// NOTIFY → WAIT pairs
fn happens_before(variant: &ScheduleVariant, a: ReactionId, b: ReactionId) -> bool {
    let Some(start) = variant.locate(a) else {
        return false;
    };
    let Some(goal) = variant.locate(b) else {
        return false;
    };
    let mut waits = HashMap::new();
    for (w, tape) in variant.tapes.iter().enumerate() {
        for (pc, inst) in tape.instructions().iter().enumerate() {
            if let Instruction::Wait(c) = inst {
                waits.insert(*c, (w, pc));
            }
        }
    }

    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([(start.0.index(), start.1)]);
    while let Some((w, pc)) = queue.pop_front() {
        if (w, pc) == (goal.0.index(), goal.1) {
            return true;
        }
        if !seen.insert((w, pc)) {
            continue;
        }
        let tape = &variant.tapes[w];
        if pc + 1 < tape.len() {
            queue.push_back((w, pc + 1));
        }
        if let Some(Instruction::Notify(c)) = tape.get(pc)
            && let Some(target) = waits.get(c)
        {
            queue.push_back(*target);
        }
    }
    false
}

/// Layered graph: every reaction of a layer depends on two of the previous
const LAYERED: &[(u32, u32)] = &[
    (0, 3),
    (1, 3),
    (1, 4),
    (2, 4),
    (2, 5),
    (0, 5),
    (3, 6),
    (4, 6),
    (4, 7),
    (5, 7),
];

// ============================================================================
// Synthesis properties
// ============================================================================

/// Every variant runs each covered reaction exactly once across its tapes.
#[test]
fn test_coverage_and_uniqueness_for_every_variant() {
    let shapes = [
        TagShape::new("left", vec![r(0)]),
        TagShape::new("right", vec![r(2)]),
    ];
    for workers in 1..=4 {
        let harness = TestHarness::with_shapes(8, LAYERED, workers, &shapes);
        let table = harness.table();
        assert_eq!(table.variants.len(), 3);

        for variant in &table.variants {
            let mut seen: HashMap<ReactionId, usize> = HashMap::new();
            for tape in &variant.tapes {
                for reaction in tape.reactions() {
                    *seen.entry(reaction).or_default() += 1;
                }
            }
            for reaction in variant.reactions() {
                assert_eq!(seen.get(reaction), Some(&1), "{} in {}", reaction, variant.name);
            }
            assert_eq!(seen.len(), variant.reactions().len());
        }
    }
}

/// Without pruning every cross-worker edge gets its own NOTIFY after the
/// source and WAIT before the target.
#[test]
fn test_cross_edges_get_notify_and_wait() {
    let mut graph = PrecedenceGraph::new();
    for id in 0..8 {
        graph.add_reaction(r(id), "").unwrap();
    }
    for (a, b) in LAYERED {
        graph.add_edge(r(*a), r(*b)).unwrap();
    }
    let mut config = SynthesisConfig::with_workers(3);
    config.prune_redundant_sync = false;
    let harness = TestHarness::from_graph(graph, &config, &[]);
    let variant = &harness.table().variants[0];

    let mut cross = 0;
    for (a, b) in LAYERED {
        let (wa, pa) = variant.locate(r(*a)).unwrap();
        let (wb, pb) = variant.locate(r(*b)).unwrap();
        if wa == wb {
            assert!(pa < pb);
            continue;
        }
        cross += 1;
        let notified: Vec<_> = variant.tapes[wa.index()].instructions()[pa + 1..]
            .iter()
            .take_while(|inst| matches!(inst, Instruction::Notify(_)))
            .filter_map(Instruction::channel)
            .collect();
        let waited: Vec<_> = variant.tapes[wb.index()].instructions()[..pb]
            .iter()
            .rev()
            .take_while(|inst| matches!(inst, Instruction::Wait(_)))
            .filter_map(Instruction::channel)
            .collect();
        assert!(
            notified.iter().any(|c| waited.contains(c)),
            "edge r{} -> r{} has no channel",
            a,
            b
        );
    }
    assert_eq!(harness.table().channel_count, cross);
}

/// Pruned schedules still order every edge.
#[test]
fn test_pruned_schedules_order_every_edge() {
    for workers in 2..=4 {
        let harness = TestHarness::from_edges(8, LAYERED, workers);
        let variant = &harness.table().variants[0];
        for (a, b) in LAYERED {
            assert!(
                happens_before(variant, r(*a), r(*b)),
                "r{} -> r{} unordered with {} workers",
                a,
                b,
                workers
            );
        }
    }
}

// ============================================================================
// Runtime properties
// ============================================================================

/// With nothing triggered every worker walks its tape to STOP and no
/// reaction runs.
#[test]
fn test_idle_tags_run_nothing() {
    let harness = TestHarness::from_edges(4, &[(0, 1), (2, 3)], 2);
    let result = harness.run_script(vec![vec![], vec![], vec![]]);
    assert!(result.trace.is_empty());
    assert_eq!(result.report.tags, 3);
    assert_eq!(result.stats.dispatched, 0);
    assert_eq!(result.stats.skipped, 3 * 4);
}

/// Triggered reactions run exactly once per tag.
#[test]
fn test_triggered_reactions_run_exactly_once() {
    let harness = TestHarness::from_edges(8, LAYERED, 3);
    let result = harness.run_script(vec![all(8); 5]);
    for tag in 0..5 {
        let counts = result.run_counts(tag);
        assert_eq!(counts.len(), 8);
        assert!(counts.values().all(|c| *c == 1), "tag {}: {:?}", tag, counts);
    }
    assert_eq!(result.report.total_executed(), 40);
}

/// Exactly one worker leads each tag advance.
#[test]
fn test_one_leader_per_tag() {
    let harness = TestHarness::from_edges(8, LAYERED, 4);
    let calls: Arc<Mutex<Vec<(u64, Option<String>)>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&calls);
    let advancer = move |reactions: &ReactionTable, next: Tag| -> cadence_runtime::Result<TagDecision> {
        recorded
            .lock()
            .push((next.index, std::thread::current().name().map(str::to_string)));
        if next.index >= 6 {
            return Ok(TagDecision::Stop);
        }
        for id in 0..8 {
            reactions.trigger(ReactionId(id))?;
        }
        Ok(TagDecision::Continue)
    };

    let result = harness.run_with(advancer, |_| Ok(()));
    assert_eq!(result.report.tags, 6);

    let calls = calls.lock();
    let tags: Vec<u64> = calls.iter().map(|(tag, _)| *tag).collect();
    assert_eq!(tags, (0..=6).collect::<Vec<_>>());
    // Tag 0 is advanced by the caller, later tags by a worker thread.
    for (tag, name) in calls.iter().skip(1) {
        let name = name.as_deref().unwrap_or_default();
        assert!(name.starts_with("cadence-worker-"), "tag {} led by '{}'", tag, name);
    }
}

/// Two independent chains on two workers need no synchronisation.
#[test]
fn test_two_chains_on_two_workers() {
    let harness = TestHarness::from_edges(4, &[(0, 1), (2, 3)], 2);
    assert_eq!(harness.table().channel_count, 0);

    let result = harness.run_script(vec![all(4); 3]);
    for tag in 0..3 {
        assert_eq!(result.executed_at(tag), all(4));
        assert!(result.ordered(tag, r(0), r(1)));
        assert!(result.ordered(tag, r(2), r(3)));
    }
    assert_eq!(result.report.executed, vec![6, 6]);
}

/// A join node waits for both inputs whatever the thread timing.
#[test]
fn test_cross_worker_order_under_random_delays() {
    let mut harness = TestHarness::from_edges(3, &[(0, 2), (1, 2)], 2);
    assert!(harness.table().channel_count >= 1);

    let tags = 40;
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    for tag in 0..tags {
        for id in 0..3 {
            harness.set_delay(tag, r(id), Duration::from_micros(rng.u64(0..400)));
        }
    }

    let result = harness.run_script(vec![all(3); tags as usize]);
    for tag in 0..tags {
        assert!(result.ordered(tag, r(0), r(2)), "tag {}", tag);
        assert!(result.ordered(tag, r(1), r(2)), "tag {}", tag);
    }
}

/// A reaction body may trigger its downstream reactions at the same tag.
#[test]
fn test_downstream_trigger_within_tag() {
    let shapes = [TagShape::new("startup", vec![r(0)])];
    let harness = TestHarness::with_shapes(4, &[(0, 1), (2, 3), (3, 1)], 2, &shapes);
    assert_eq!(harness.table().variants[0].reactions(), &[r(0), r(1)]);

    let result = harness.run_with(
        cadence_runtime::TagScript::new(vec![vec![r(0)], vec![r(2)], vec![r(0), r(2)]]),
        |ctx: &ReactionContext| {
            if ctx.reaction == ReactionId(0) || ctx.reaction == ReactionId(3) {
                ctx.trigger(ReactionId(1))?;
            }
            if ctx.reaction == ReactionId(2) {
                ctx.trigger(ReactionId(3))?;
            }
            Ok(())
        },
    );
    assert_eq!(result.executed_at(0), vec![r(0), r(1)]);
    assert_eq!(result.executed_at(1), vec![r(1), r(2), r(3)]);
    assert_eq!(result.executed_at(2), all(4));
    assert_eq!(result.run_counts(2).get(&r(1)), Some(&1));
    assert_eq!(result.stats.stale_triggers, 0);
}

/// A failing reaction stops every worker and surfaces as the run error.
#[test]
fn test_reaction_failure_stops_the_run() {
    let harness = TestHarness::from_edges(3, &[(0, 2), (1, 2)], 2);
    let err = harness
        .try_run_with(Periodic::new(all(3), 10), |ctx: &ReactionContext| {
            if ctx.tag.index == 2 && ctx.reaction == ReactionId(1) {
                return Err(Error::ReactionFailed {
                    reaction: ctx.reaction,
                    message: "sensor offline".into(),
                });
            }
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, Error::ReactionFailed { reaction, .. } if reaction == ReactionId(1)));
}

// ============================================================================
// Artefacts
// ============================================================================

/// Synthesized tables survive both bundle formats unchanged.
#[test]
fn test_bundle_round_trip_from_synthesis() {
    let shapes = [TagShape::new("left", vec![r(0)])];
    let harness = TestHarness::with_shapes(8, LAYERED, 3, &shapes);
    let dir = tempfile::tempdir().unwrap();

    for name in ["layered.cqs", "layered.json"] {
        let path = dir.path().join(name);
        write_table(&path, harness.table()).unwrap();
        assert_eq!(&read_table(&path).unwrap(), harness.table());
    }
}

/// Graphs load from JSON with per-reaction costs.
#[test]
fn test_graph_file_drives_synthesis() {
    let json = r#"{
        "reactions": [
            { "id": 0, "name": "read", "cost": 1 },
            { "id": 1, "name": "filter", "cost": 8 },
            { "id": 2, "name": "log", "cost": 8 },
            { "id": 3, "name": "write", "cost": 1 }
        ],
        "edges": [[0, 1], [0, 2], [1, 3], [2, 3]]
    }"#;
    let graph = PrecedenceGraph::from_json(json).unwrap();
    assert_eq!(
        graph.node(r(1)),
        Some(&ReactionNode {
            name: "filter".into(),
            cost: 8
        })
    );

    let harness = TestHarness::from_graph(graph, &SynthesisConfig::with_workers(2), &[]);
    let variant = &harness.table().variants[0];
    let (w1, _) = variant.locate(r(1)).unwrap();
    let (w2, _) = variant.locate(r(2)).unwrap();
    assert_ne!(w1, w2, "the two costly reactions should run in parallel");

    let result = harness.run_script(vec![all(4); 2]);
    assert!(result.ordered(1, r(0), r(1)));
    assert!(result.ordered(1, r(2), r(3)));
}

/// A table compiled into the binary as static arrays runs like a loaded one.
#[test]
fn test_static_table_fixture_runs() {
    let table = two_chains::table().unwrap();
    assert_eq!(table.channel_count, two_chains::CHANNEL_COUNT);

    let scheduler =
        QsScheduler::initialize(SchedulerConfig::default(), table, Periodic::new(all(4), 4)).unwrap();
    let report = run(&scheduler, &Program::noop(4), &RunOptions::default()).unwrap();
    assert_eq!(report.tags, 4);
    assert_eq!(report.total_executed(), 16);
    let stats = scheduler.shutdown();
    assert_eq!(stats.waits, 4);
    assert_eq!(stats.notifies, 4);
}

/// The checked-in fixture is exactly what the emitter writes for its table.
#[test]
fn test_static_fixture_matches_emitter() {
    let table = two_chains::table().unwrap();
    let emitted = cadence_compiler::emit_rust(&table, "two_chains");
    assert_eq!(emitted, include_str!("../fixtures/two_chains.rs"));
}
