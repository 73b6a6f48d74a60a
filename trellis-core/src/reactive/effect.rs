//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever a value
//! it observed changes.
//!
//! # How Effects Work
//!
//! 1. On creation, the effect runs once, synchronously, to establish its
//!    initial dependencies, even inside a batch.
//!
//! 2. When a dependency changes, the effect is marked dirty and queued;
//!    the flush runs it at most once per drain pass.
//!
//! 3. Before each run, the old dependency set is dropped and the pending
//!    cleanup (if one was registered) is invoked.
//!
//! # Cleanup
//!
//! During a run, the effect body may call [`on_cleanup`] to register a
//! function that executes before the next run or at disposal, whichever
//! comes first. Cleanup failures are swallowed (and logged) so the next
//! run or the disposal always proceeds.
//!
//! # Differences from Computed
//!
//! - Computeds return a value; effects do not.
//! - Computeds are lazy (recompute on read); effects are eager (run when
//!   their dependencies change).
//! - Effects never appear as producers; they are leaves of the graph.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Weak;

use crate::graph::NodeId;

use super::graph::{Graph, GraphInner};

thread_local! {
    /// Innermost-last stack of effects currently running on this thread.
    ///
    /// [`on_cleanup`] registers against the top entry. A stack rather than
    /// a slot because effects may create (and therefore synchronously run)
    /// other effects, possibly on a different graph.
    static RUNNING_EFFECTS: RefCell<Vec<(Weak<GraphInner>, NodeId)>> =
        const { RefCell::new(Vec::new()) };
}

/// Register a cleanup for the innermost effect currently running on this
/// thread.
///
/// The cleanup executes before that effect's next run or at its disposal,
/// whichever comes first. An effect holds one cleanup slot; registering
/// again replaces the pending cleanup. Outside an effect run this is a
/// no-op.
pub fn on_cleanup<F>(cleanup: F)
where
    F: FnOnce() + 'static,
{
    let scope = RUNNING_EFFECTS.with(|stack| stack.borrow().last().cloned());
    let Some((graph, id)) = scope else {
        return;
    };
    if let Some(graph) = graph.upgrade() {
        graph.register_cleanup(id, Box::new(cleanup));
    }
}

/// Marks an effect as running on this thread for the guard's lifetime, so
/// [`on_cleanup`] can find it. Popped on all exit paths.
pub(crate) struct EffectScopeGuard {
    id: NodeId,
}

impl EffectScopeGuard {
    pub(crate) fn enter(graph: Weak<GraphInner>, id: NodeId) -> Self {
        RUNNING_EFFECTS.with(|stack| stack.borrow_mut().push((graph, id)));
        Self { id }
    }
}

impl Drop for EffectScopeGuard {
    fn drop(&mut self) {
        RUNNING_EFFECTS.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert_eq!(
                popped.map(|(_, id)| id),
                Some(self.id),
                "running-effect stack mismatch"
            );
        });
    }
}

/// A re-runnable side effect whose producers are captured automatically.
///
/// # Example
///
/// ```rust,ignore
/// let count = graph.create_source(0);
///
/// let effect = graph.create_effect({
///     let count = count.clone();
///     move || println!("count is {}", count.read())
/// });
///
/// count.write(5); // prints: count is 5
/// effect.dispose();
/// count.write(6); // prints nothing
/// ```
pub struct Effect {
    graph: Weak<GraphInner>,
    id: NodeId,
}

impl Effect {
    pub(crate) fn new(graph: Weak<GraphInner>, id: NodeId) -> Self {
        Self { graph, id }
    }

    /// The effect's id within its graph.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The owning graph.
    ///
    /// # Panics
    ///
    /// Panics if every [`Graph`] handle has been dropped.
    pub fn context(&self) -> Graph {
        Graph::from_inner(self.graph.upgrade().expect("graph has been dropped"))
    }

    /// Dispose of the effect: its cleanup runs, its subscriptions are
    /// dropped, and it never runs again. Idempotent.
    pub fn dispose(&self) {
        if let Some(graph) = self.graph.upgrade() {
            graph.dispose_effect(self.id);
        }
    }

    /// Whether the effect has been disposed (directly or with its graph).
    pub fn is_disposed(&self) -> bool {
        match self.graph.upgrade() {
            Some(graph) => !graph.effects.borrow().contains_key(&self.id),
            None => true,
        }
    }

    /// Number of completed runs.
    pub fn run_count(&self) -> usize {
        self.graph
            .upgrade()
            .map_or(0, |g| g.effects.borrow().get(&self.id).map_or(0, |s| s.run_count))
    }

    /// Number of producers the last run read from.
    pub fn dependency_count(&self) -> usize {
        self.graph
            .upgrade()
            .map_or(0, |g| g.scheduler.borrow().dependency_count(self.id))
    }

    /// Whether the effect is awaiting a re-run.
    pub fn is_dirty(&self) -> bool {
        self.graph
            .upgrade()
            .and_then(|g| g.scheduler.borrow().is_dirty(self.id))
            .unwrap_or(false)
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            graph: Weak::clone(&self.graph),
            id: self.id,
        }
    }
}

impl Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
