//! Computed Implementation
//!
//! A Computed is a cached derived value that recomputes only when a
//! dependency has changed, and only when read.
//!
//! # How Computeds Work
//!
//! 1. A computed starts dirty with no committed value; the first read runs
//!    the computation.
//!
//! 2. When a dependency changes, the computed is marked dirty. Nothing
//!    recomputes during propagation.
//!
//! 3. The next read recomputes: the old dependency set is dropped, the
//!    computation runs with this node installed as the consumer, and the
//!    reads it performs become the new dependency set. Conditional reads
//!    therefore re-subscribe exactly to what the current branch uses.
//!
//! 4. A computed that is never read stays dirty, costing nothing.
//!
//! # Failure
//!
//! A recompute that panics leaves the node dirty so a later read retries;
//! the consumer slots, tracking flag, and compute stack are restored on
//! unwind. A read whose recompute depends on its own value fails with
//! [`ReactiveError::Cycle`] naming the node chain.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::panic::{catch_unwind, panic_any, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::graph::NodeId;

use super::error::{ReactiveError, Result};
use super::graph::{Graph, GraphInner};
use super::scope::{ComputeStackGuard, ConsumerGuard, FlagGuard};

/// A memoized pure function of other nodes' values.
///
/// # Example
///
/// ```rust,ignore
/// let count = graph.create_source(2);
/// let doubled = graph.create_computed({
///     let count = count.clone();
///     move || count.read() * 2
/// });
///
/// assert_eq!(doubled.read(), 4);
/// count.write(10);
/// assert_eq!(doubled.read(), 20);
/// ```
pub struct Computed<T>
where
    T: Clone + 'static,
{
    graph: Weak<GraphInner>,
    id: NodeId,
    value: Rc<RefCell<Option<T>>>,
    compute: Rc<dyn Fn() -> T>,
}

impl<T> Computed<T>
where
    T: Clone + 'static,
{
    pub(crate) fn new(graph: Weak<GraphInner>, id: NodeId, compute: Rc<dyn Fn() -> T>) -> Self {
        Self {
            graph,
            id,
            value: Rc::new(RefCell::new(None)),
            compute,
        }
    }

    /// The computed's id within its graph.
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

    /// The current value, recomputing first if a dependency changed.
    ///
    /// If a consumer is running and tracking is on, it is subscribed to
    /// this computed.
    ///
    /// # Panics
    ///
    /// Panics with [`ReactiveError::Cycle`] if the computation depends on
    /// its own value, and propagates any panic raised by the computation
    /// itself. Use [`Computed::try_read`] to recover from either.
    pub fn read(&self) -> T {
        let Some(graph) = self.graph.upgrade() else {
            return self.committed();
        };
        if graph.is_disposed() {
            return self.committed();
        }
        if graph.scheduler.borrow().is_dirty(self.id).unwrap_or(false) {
            self.recompute(&graph);
            graph.flush_if_idle();
        }
        graph.record_read(self.id);
        self.committed()
    }

    /// Alias for [`Computed::read`].
    pub fn get(&self) -> T {
        self.read()
    }

    /// Fallible variant of [`Computed::read`].
    ///
    /// Cycles come back as [`ReactiveError::Cycle`] and panics out of the
    /// computation as [`ReactiveError::ComputeFailed`]; in both cases the
    /// node stays dirty so a later read retries.
    pub fn try_read(&self) -> Result<T> {
        let Some(graph) = self.graph.upgrade() else {
            return Ok(self.committed());
        };
        if graph.is_disposed() {
            return Ok(self.committed());
        }
        if graph.scheduler.borrow().is_dirty(self.id).unwrap_or(false) {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.recompute(&graph))) {
                return Err(match payload.downcast::<ReactiveError>() {
                    Ok(err) => *err,
                    Err(payload) => ReactiveError::ComputeFailed {
                        id: self.id,
                        message: panic_message(payload.as_ref()),
                    },
                });
            }
            graph.flush_if_idle();
        }
        graph.record_read(self.id);
        Ok(self.committed())
    }

    /// The last committed value, without recomputing and without recording
    /// an edge.
    ///
    /// # Panics
    ///
    /// Panics if the computed has never been successfully read.
    pub fn peek(&self) -> T {
        self.committed()
    }

    /// Whether a value has ever been committed.
    pub fn has_value(&self) -> bool {
        self.value.borrow().is_some()
    }

    /// Whether a dependency changed since the last committed value.
    pub fn is_dirty(&self) -> bool {
        self.graph
            .upgrade()
            .and_then(|g| g.scheduler.borrow().is_dirty(self.id))
            .unwrap_or(false)
    }

    /// Number of producers the last recompute read from.
    pub fn dependency_count(&self) -> usize {
        self.graph
            .upgrade()
            .map_or(0, |g| g.scheduler.borrow().dependency_count(self.id))
    }

    /// Number of consumers currently subscribed to this computed.
    pub fn subscriber_count(&self) -> usize {
        self.graph
            .upgrade()
            .map_or(0, |g| g.scheduler.borrow().subscriber_count(self.id))
    }

    fn committed(&self) -> T {
        self.value
            .borrow()
            .clone()
            .expect("computed read before first evaluation")
    }

    /// Run the computation with this node as the consumer and commit the
    /// result. Panics with the engine error as payload on a cycle; any
    /// unwind leaves the node dirty and the scoped state restored.
    fn recompute(&self, graph: &Rc<GraphInner>) {
        {
            let stack = graph.compute_stack.borrow();
            if stack.contains(&self.id) {
                let mut chain = stack.clone();
                chain.push(self.id);
                drop(stack);
                panic_any(ReactiveError::Cycle { chain });
            }
        }

        // Drop the previous dependency set; the run below captures the new
        // one through the tracked read paths.
        graph.scheduler.borrow_mut().detach_consumer(self.id);

        let _stack = ComputeStackGuard::push(graph, self.id);
        let _consumer = ConsumerGuard::enter_computed(graph, self.id);
        let _tracking = FlagGuard::set(&graph.tracking, true);
        // Writes performed by the computation enqueue without flushing;
        // the caller drains them once the commit is done.
        let _dispatch = FlagGuard::set(&graph.flushing, true);

        let value = (self.compute)();

        *self.value.borrow_mut() = Some(value);
        graph.scheduler.borrow_mut().mark_clean(self.id);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "recompute panicked".to_string()
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + 'static,
{
    fn clone(&self) -> Self {
        Self {
            graph: Weak::clone(&self.graph),
            id: self.id,
            value: Rc::clone(&self.value),
            compute: Rc::clone(&self.compute),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.id)
            .field("dirty", &self.is_dirty())
            .field("has_value", &self.has_value())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn computed_is_lazy() {
        let graph = Graph::new();
        let calls = Rc::new(Cell::new(0));

        let computed = graph.create_computed({
            let calls = Rc::clone(&calls);
            move || {
                calls.set(calls.get() + 1);
                42
            }
        });

        assert!(!computed.has_value());
        assert_eq!(calls.get(), 0);

        assert_eq!(computed.read(), 42);
        assert_eq!(calls.get(), 1);
        assert!(computed.has_value());
    }

    #[test]
    fn computed_caches_until_a_dependency_changes() {
        let graph = Graph::new();
        let source = graph.create_source(1);
        let calls = Rc::new(Cell::new(0));

        let computed = graph.create_computed({
            let source = source.clone();
            let calls = Rc::clone(&calls);
            move || {
                calls.set(calls.get() + 1);
                source.read() * 10
            }
        });

        assert_eq!(computed.read(), 10);
        assert_eq!(computed.read(), 10);
        assert_eq!(computed.read(), 10);
        assert_eq!(calls.get(), 1);

        source.write(2);
        assert!(computed.is_dirty());
        assert_eq!(computed.read(), 20);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn computed_chains_recompute_lazily() {
        let graph = Graph::new();
        let source = graph.create_source(5);
        let doubled = graph.create_computed({
            let source = source.clone();
            move || source.read() * 2
        });
        let plus_ten = graph.create_computed({
            let doubled = doubled.clone();
            move || doubled.read() + 10
        });

        assert_eq!(plus_ten.read(), 20);

        source.write(10);
        assert_eq!(plus_ten.read(), 30);
        assert_eq!(doubled.read(), 20);
    }

    #[test]
    fn recompute_replaces_the_dependency_set() {
        let graph = Graph::new();
        let cond = graph.create_source(true);
        let a = graph.create_source(10);
        let b = graph.create_source(20);

        let picked = graph.create_computed({
            let cond = cond.clone();
            let a = a.clone();
            let b = b.clone();
            move || if cond.read() { a.read() } else { b.read() }
        });

        assert_eq!(picked.read(), 10);
        assert_eq!(picked.dependency_count(), 2); // cond + a
        assert_eq!(a.subscriber_count(), 1);
        assert_eq!(b.subscriber_count(), 0);

        cond.write(false);
        assert_eq!(picked.read(), 20);
        assert_eq!(picked.dependency_count(), 2); // cond + b
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);
    }

    #[test]
    fn self_cycle_is_detected() {
        let graph = Graph::new();
        let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));

        let computed = graph.create_computed({
            let slot = Rc::clone(&slot);
            move || slot.borrow().as_ref().map_or(0, |c| c.read()) + 1
        });
        *slot.borrow_mut() = Some(computed.clone());

        let err = computed.try_read().unwrap_err();
        match err {
            ReactiveError::Cycle { chain } => {
                assert_eq!(chain.first(), Some(&computed.id()));
                assert_eq!(chain.last(), Some(&computed.id()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
        // A later read retries (and fails the same way, deterministically).
        assert!(computed.try_read().is_err());
    }

    #[test]
    fn mutual_cycle_is_detected_and_named() {
        let graph = Graph::new();
        let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));

        let a = graph.create_computed({
            let slot = Rc::clone(&slot);
            move || slot.borrow().as_ref().map_or(0, |b| b.read()) + 1
        });
        let b = graph.create_computed({
            let a = a.clone();
            move || a.read() + 1
        });
        *slot.borrow_mut() = Some(b.clone());

        let err = a.try_read().unwrap_err();
        match err {
            ReactiveError::Cycle { chain } => {
                assert!(chain.contains(&a.id()));
                assert!(chain.contains(&b.id()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn failed_recompute_stays_dirty_and_retries() {
        let graph = Graph::new();
        let trigger = graph.create_source(false);

        let computed = graph.create_computed({
            let trigger = trigger.clone();
            move || {
                if trigger.read() {
                    panic!("recompute rejected");
                }
                42
            }
        });

        assert_eq!(computed.read(), 42);

        trigger.write(true);
        let err = computed.try_read().unwrap_err();
        assert!(matches!(err, ReactiveError::ComputeFailed { .. }));
        assert!(computed.is_dirty());
        // The committed value is still observable through peek.
        assert_eq!(computed.peek(), 42);

        trigger.write(false);
        assert_eq!(computed.read(), 42);
        assert!(!computed.is_dirty());
    }

    #[test]
    fn consumer_state_is_restored_after_a_failed_recompute() {
        let graph = Graph::new();
        let source = graph.create_source(1);
        let failing = graph.create_computed(|| -> i32 { panic!("always fails") });

        assert!(failing.try_read().is_err());

        // Tracking still works after the unwind.
        let doubled = graph.create_computed({
            let source = source.clone();
            move || source.read() * 2
        });
        assert_eq!(doubled.read(), 2);
        assert_eq!(source.subscriber_count(), 1);
        source.write(3);
        assert_eq!(doubled.read(), 6);
    }

    #[test]
    fn reads_after_disposal_return_the_cached_value() {
        let graph = Graph::new();
        let source = graph.create_source(4);
        let computed = graph.create_computed({
            let source = source.clone();
            move || source.read() + 1
        });
        assert_eq!(computed.read(), 5);

        graph.dispose();

        source.write(100);
        assert_eq!(computed.read(), 5);
        assert_eq!(computed.peek(), 5);
    }

    #[test]
    fn clone_shares_the_cache() {
        let graph = Graph::new();
        let calls = Rc::new(Cell::new(0));
        let first = graph.create_computed({
            let calls = Rc::clone(&calls);
            move || {
                calls.set(calls.get() + 1);
                7
            }
        });
        let second = first.clone();

        assert_eq!(first.read(), 7);
        assert_eq!(second.read(), 7);
        assert_eq!(calls.get(), 1);
        assert_eq!(first.id(), second.id());
    }
}
