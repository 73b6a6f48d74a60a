//! Property-based invariant tests for the reactive graph.
//!
//! A random population of sources, sum-computeds, and observing effects is
//! driven through random operation sequences while a plain reference model
//! tracks expected values. These tests verify invariants that must hold
//! for any operation sequence:
//!
//! 1. Computed reads always agree with the reference model.
//! 2. Edge totals are symmetric: the number of dependency edges equals the
//!    number of subscriber edges.
//! 3. Each effect runs exactly once per flush in which one of its inputs
//!    was dirtied, and zero times otherwise.
//! 4. Writing an equal value produces no observable propagation.
//! 5. Peeks leave no trace on subscriber sets.
//! 6. Operations on one graph never run effects of another graph.
//! 7. Disposal is idempotent and post-disposal reads stay stable.

use std::cell::Cell;
use std::collections::HashSet;
use std::rc::Rc;

use proptest::prelude::*;

use trellis_core::{Computed, Effect, Graph, Source};

// ── Harness ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Write { source: usize, value: i32 },
    Update { source: usize, delta: i32 },
    BatchWrites { writes: Vec<(usize, i32)> },
    ReadComputed { computed: usize },
    PeekSource { source: usize },
}

struct Harness {
    graph: Graph,
    sources: Vec<Source<i32>>,
    computeds: Vec<Computed<i32>>,
    inputs: Vec<Vec<usize>>,
    effects: Vec<Effect>,
    model: Vec<i32>,
}

impl Harness {
    fn build(initial: Vec<i32>, inputs: Vec<Vec<usize>>) -> Self {
        let graph = Graph::new();
        let sources: Vec<Source<i32>> =
            initial.iter().map(|&v| graph.create_source(v)).collect();

        let computeds: Vec<Computed<i32>> = inputs
            .iter()
            .map(|set| {
                let handles: Vec<Source<i32>> =
                    set.iter().map(|&i| sources[i].clone()).collect();
                graph.create_computed(move || handles.iter().map(Source::read).sum())
            })
            .collect();

        let effects: Vec<Effect> = computeds
            .iter()
            .map(|c| {
                let c = c.clone();
                graph.create_effect(move || {
                    c.read();
                })
            })
            .collect();

        Self {
            graph,
            sources,
            computeds,
            inputs,
            effects,
            model: initial,
        }
    }

    fn expected(&self, computed: usize) -> i32 {
        self.inputs[computed].iter().map(|&i| self.model[i]).sum()
    }

    /// Apply one operation to graph and model. Returns the indices of the
    /// sources whose value actually changed (passed the equality gate).
    fn apply(&mut self, op: &Op) -> HashSet<usize> {
        let mut dirtied = HashSet::new();
        match op {
            Op::Write { source, value } => {
                let source = source % self.sources.len();
                if self.model[source] != *value {
                    dirtied.insert(source);
                }
                self.sources[source].write(*value);
                self.model[source] = *value;
            }
            Op::Update { source, delta } => {
                let source = source % self.sources.len();
                if *delta != 0 {
                    dirtied.insert(source);
                }
                self.sources[source].update(|v| v + delta);
                self.model[source] += delta;
            }
            Op::BatchWrites { writes } => {
                let sources = &self.sources;
                let model = &mut self.model;
                self.graph.batch(|| {
                    for (source, value) in writes {
                        let source = source % sources.len();
                        if model[source] != *value {
                            dirtied.insert(source);
                        }
                        sources[source].write(*value);
                        model[source] = *value;
                    }
                });
            }
            Op::ReadComputed { computed } => {
                let computed = computed % self.computeds.len();
                assert_eq!(self.computeds[computed].read(), self.expected(computed));
            }
            Op::PeekSource { source } => {
                let source = source % self.sources.len();
                assert_eq!(self.sources[source].peek(), self.model[source]);
            }
        }
        dirtied
    }

    fn run_counts(&self) -> Vec<usize> {
        self.effects.iter().map(Effect::run_count).collect()
    }

    /// Total dependency edges and total subscriber edges over every node.
    fn edge_totals(&self) -> (usize, usize) {
        let deps = self
            .computeds
            .iter()
            .map(Computed::dependency_count)
            .chain(self.effects.iter().map(Effect::dependency_count))
            .sum();
        let subs = self
            .sources
            .iter()
            .map(Source::subscriber_count)
            .chain(self.computeds.iter().map(Computed::subscriber_count))
            .sum();
        (deps, subs)
    }
}

// ── Strategies ──────────────────────────────────────────────────────────

const SOURCES: usize = 4;
const COMPUTEDS: usize = 3;

fn initial_strategy() -> impl Strategy<Value = Vec<i32>> {
    proptest::collection::vec(-50..50i32, SOURCES)
}

fn inputs_strategy() -> impl Strategy<Value = Vec<Vec<usize>>> {
    proptest::collection::vec(
        proptest::collection::vec(0..SOURCES, 1..=3),
        COMPUTEDS,
    )
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..SOURCES, -50..50i32).prop_map(|(source, value)| Op::Write { source, value }),
        (0..SOURCES, -3..=3i32).prop_map(|(source, delta)| Op::Update { source, delta }),
        proptest::collection::vec((0..SOURCES, -50..50i32), 1..=4)
            .prop_map(|writes| Op::BatchWrites { writes }),
        (0..COMPUTEDS).prop_map(|computed| Op::ReadComputed { computed }),
        (0..SOURCES).prop_map(|source| Op::PeekSource { source }),
    ]
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(op_strategy(), 1..24)
}

// ═════════════════════════════════════════════════════════════════════════
// 1–4, 6. Model agreement, edge symmetry, exactly-once dispatch, equality
// gating, and isolation, over arbitrary operation sequences
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn random_op_sequences_preserve_graph_invariants(
        initial in initial_strategy(),
        inputs in inputs_strategy(),
        ops in ops_strategy(),
    ) {
        let mut harness = Harness::build(initial, inputs);

        // A bystander graph that must never be touched.
        let foreign = Graph::new();
        let foreign_source = foreign.create_source(0);
        let foreign_runs = Rc::new(Cell::new(0));
        let _foreign_effect = foreign.create_effect({
            let foreign_source = foreign_source.clone();
            let foreign_runs = Rc::clone(&foreign_runs);
            move || {
                foreign_source.read();
                foreign_runs.set(foreign_runs.get() + 1);
            }
        });

        for op in &ops {
            let before = harness.run_counts();
            let dirtied = harness.apply(op);
            let after = harness.run_counts();

            // 3 + 4: each effect ran exactly once if one of its computed's
            // inputs was dirtied in this flush, and zero times otherwise.
            for (k, (b, a)) in before.iter().zip(&after).enumerate() {
                let observed = harness.inputs[k].iter().any(|i| dirtied.contains(i));
                let expected_delta = usize::from(observed);
                prop_assert_eq!(
                    a - b,
                    expected_delta,
                    "effect {} ran {} times for op {:?}",
                    k,
                    a - b,
                    op
                );
            }

            // 2: every dependency edge has a matching subscriber edge.
            let (deps, subs) = harness.edge_totals();
            prop_assert_eq!(deps, subs);
        }

        // 1: after the dust settles every computed agrees with the model.
        for k in 0..harness.computeds.len() {
            prop_assert_eq!(harness.computeds[k].read(), harness.expected(k));
        }

        // 6: the bystander graph saw nothing.
        prop_assert_eq!(foreign_runs.get(), 1);
        prop_assert_eq!(foreign_source.subscriber_count(), 1);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Peeks leave no trace
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn peeking_consumers_record_no_edges(values in proptest::collection::vec(-50..50i32, 1..8)) {
        let graph = Graph::new();
        let sources: Vec<Source<i32>> =
            values.iter().map(|&v| graph.create_source(v)).collect();

        let _effect = graph.create_effect({
            let sources = sources.clone();
            move || {
                for source in &sources {
                    source.peek();
                }
            }
        });

        for source in &sources {
            prop_assert_eq!(source.subscriber_count(), 0);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 7. Disposal idempotence and post-disposal stability
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn disposal_is_idempotent(
        initial in initial_strategy(),
        inputs in inputs_strategy(),
        ops in ops_strategy(),
    ) {
        let mut harness = Harness::build(initial, inputs);
        for op in &ops {
            harness.apply(op);
        }
        let committed: Vec<i32> =
            (0..harness.computeds.len()).map(|k| harness.computeds[k].read()).collect();

        harness.graph.dispose();
        let once = (harness.graph.signal_count(), harness.graph.effect_count());
        harness.graph.dispose();
        let twice = (harness.graph.signal_count(), harness.graph.effect_count());

        prop_assert!(harness.graph.is_disposed());
        prop_assert_eq!(once, twice);

        // Post-disposal: source reads return stored values, computed reads
        // return the last committed value, with no propagation.
        for (source, value) in harness.sources.iter().zip(&harness.model) {
            prop_assert_eq!(source.read(), *value);
        }
        for (computed, value) in harness.computeds.iter().zip(&committed) {
            prop_assert_eq!(computed.read(), *value);
        }
        let runs_before = harness.run_counts();
        harness.sources[0].write(9999);
        prop_assert_eq!(harness.run_counts(), runs_before);
    }
}
