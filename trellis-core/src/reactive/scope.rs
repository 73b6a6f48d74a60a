//! Scoped Graph State
//!
//! The current-consumer slots, the tracking flag, the compute stack, and
//! the batch depth are dynamically scoped state on the graph: an operation
//! installs a new value, runs user code, and must restore the previous
//! value on every exit path, including unwinds out of user callbacks.
//!
//! Each guard here follows the same shape: construction installs, `Drop`
//! restores. Holding the guard across the user call is what makes the
//! engine panic-safe.

use std::cell::Cell;

use crate::graph::NodeId;

use super::graph::GraphInner;

/// Sets a boolean cell for the guard's lifetime, restoring the previous
/// value on drop. Re-entrant: nested guards restore in reverse order.
pub(crate) struct FlagGuard<'a> {
    cell: &'a Cell<bool>,
    prev: bool,
}

impl<'a> FlagGuard<'a> {
    pub(crate) fn set(cell: &'a Cell<bool>, value: bool) -> Self {
        let prev = cell.replace(value);
        Self { cell, prev }
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.cell.set(self.prev);
    }
}

/// Saves both consumer slots, installs a new consumer, and restores the
/// slots on drop.
pub(crate) struct ConsumerGuard<'a> {
    graph: &'a GraphInner,
    prev_effect: Option<NodeId>,
    prev_computed: Option<NodeId>,
}

impl<'a> ConsumerGuard<'a> {
    /// Install `id` as the current computed. The current effect slot is
    /// left in place; consumer resolution prefers the computed.
    pub(crate) fn enter_computed(graph: &'a GraphInner, id: NodeId) -> Self {
        let prev_effect = graph.current_effect.get();
        let prev_computed = graph.current_computed.replace(Some(id));
        Self {
            graph,
            prev_effect,
            prev_computed,
        }
    }

    /// Install `id` as the current effect and clear the current computed.
    pub(crate) fn enter_effect(graph: &'a GraphInner, id: NodeId) -> Self {
        let prev_effect = graph.current_effect.replace(Some(id));
        let prev_computed = graph.current_computed.replace(None);
        Self {
            graph,
            prev_effect,
            prev_computed,
        }
    }
}

impl Drop for ConsumerGuard<'_> {
    fn drop(&mut self) {
        self.graph.current_effect.set(self.prev_effect);
        self.graph.current_computed.set(self.prev_computed);
    }
}

/// Pushes a computed onto the graph's compute stack for cycle detection;
/// pops it on drop.
pub(crate) struct ComputeStackGuard<'a> {
    graph: &'a GraphInner,
    id: NodeId,
}

impl<'a> ComputeStackGuard<'a> {
    pub(crate) fn push(graph: &'a GraphInner, id: NodeId) -> Self {
        graph.compute_stack.borrow_mut().push(id);
        Self { graph, id }
    }
}

impl Drop for ComputeStackGuard<'_> {
    fn drop(&mut self) {
        let popped = self.graph.compute_stack.borrow_mut().pop();
        debug_assert_eq!(
            popped,
            Some(self.id),
            "compute stack mismatch: expected {:?}, got {popped:?}",
            self.id
        );
    }
}

/// Raises the graph's batch depth; lowers it on drop. The flush decision
/// belongs to the caller: only the outermost exit flushes, and never while
/// unwinding.
pub(crate) struct BatchGuard<'a> {
    depth: &'a Cell<u32>,
}

impl<'a> BatchGuard<'a> {
    pub(crate) fn enter(graph: &'a GraphInner) -> Self {
        graph.batch_depth.set(graph.batch_depth.get() + 1);
        Self {
            depth: &graph.batch_depth,
        }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

/// Re-marks an effect dirty if its run unwinds, so a later propagation
/// retries it. Disarmed when the run completes.
pub(crate) struct DirtyOnUnwind<'a> {
    graph: &'a GraphInner,
    id: NodeId,
    armed: bool,
}

impl<'a> DirtyOnUnwind<'a> {
    pub(crate) fn arm(graph: &'a GraphInner, id: NodeId) -> Self {
        Self {
            graph,
            id,
            armed: true,
        }
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for DirtyOnUnwind<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.graph.scheduler.borrow_mut().mark_dirty(self.id);
        }
    }
}
