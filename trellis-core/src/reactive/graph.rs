//! Reactive Graph
//!
//! The graph is the arena that owns a population of reactive nodes and the
//! machinery that keeps them consistent. It holds the node table and the
//! propagation queues, the effect table, the current-consumer slots used
//! for automatic dependency capture, and the batch/flush state.
//!
//! # How It Works
//!
//! 1. Factories allocate an id, insert a structural record, and hand back
//!    a typed handle carrying a weak back-reference to the graph.
//!
//! 2. When a source or computed is read while a consumer is installed and
//!    tracking is on, the graph records a bidirectional edge.
//!
//! 3. When a source changes, its subscribers are marked dirty and queued.
//!    Outside a batch this triggers a flush: the update queue drains to
//!    fixpoint (structural marking only), then queued effects run in
//!    insertion order. Writes performed by running effects append to the
//!    live drain, so the loop continues until both queues are empty.
//!
//! 4. Dirty computeds recompute lazily, on the next read.
//!
//! # Thread Model
//!
//! A graph is strictly single-threaded: handles hold `Rc`/`Weak`
//! references and are not `Send`. Each thread gets its own lazily created
//! default graph; [`reset_default_graph`] drops the thread's reference
//! without disposing the graph.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::graph::{Node, NodeId, NodeKind, Scheduler};

use super::computed::Computed;
use super::effect::{Effect, EffectScopeGuard};
use super::error::{ReactiveError, Result};
use super::scope::{BatchGuard, ConsumerGuard, DirtyOnUnwind, FlagGuard};
use super::source::Source;

thread_local! {
    static DEFAULT_GRAPH: RefCell<Option<Graph>> = const { RefCell::new(None) };
}

/// This thread's default graph, created lazily on first use.
///
/// Each thread observes a distinct default; nodes must never be moved
/// between threads.
pub fn default_graph() -> Graph {
    DEFAULT_GRAPH.with(|slot| slot.borrow_mut().get_or_insert_with(Graph::new).clone())
}

/// Drop this thread's reference to the default graph without disposing it.
///
/// The next call to [`default_graph`] creates a fresh graph. Nodes created
/// on the old default keep working for as long as something holds a
/// reference to it.
pub fn reset_default_graph() {
    DEFAULT_GRAPH.with(|slot| slot.borrow_mut().take());
}

/// The runnable side of an effect: its function, the pending cleanup, and
/// a run counter.
pub(crate) struct EffectSlot {
    pub(crate) run: Rc<dyn Fn()>,
    pub(crate) cleanup: Option<Box<dyn FnOnce()>>,
    pub(crate) run_count: usize,
}

/// Shared state behind a [`Graph`] handle.
pub(crate) struct GraphInner {
    pub(crate) self_weak: Weak<GraphInner>,
    next_id: Cell<u64>,
    pub(crate) scheduler: RefCell<Scheduler>,
    pub(crate) effects: RefCell<HashMap<NodeId, EffectSlot>>,
    pub(crate) current_effect: Cell<Option<NodeId>>,
    pub(crate) current_computed: Cell<Option<NodeId>>,
    pub(crate) tracking: Cell<bool>,
    pub(crate) batch_depth: Cell<u32>,
    pub(crate) flushing: Cell<bool>,
    pub(crate) compute_stack: RefCell<Vec<NodeId>>,
    pub(crate) disposed: Cell<bool>,
}

impl GraphInner {
    fn alloc_id(&self) -> NodeId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        NodeId::from_raw(id)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    fn in_batch(&self) -> bool {
        self.batch_depth.get() > 0
    }

    /// The consumer edges are recorded against: the recomputing computed
    /// if one is installed, otherwise the running effect.
    fn current_consumer(&self) -> Option<NodeId> {
        self.current_computed.get().or_else(|| self.current_effect.get())
    }

    /// Record that the current consumer (if any) read `producer`.
    pub(crate) fn record_read(&self, producer: NodeId) {
        if self.disposed.get() || !self.tracking.get() {
            return;
        }
        let Some(consumer) = self.current_consumer() else {
            return;
        };
        self.scheduler.borrow_mut().add_edge(producer, consumer);
    }

    /// Mark the source `id` as changed: every subscriber is marked dirty
    /// and enqueued. Outside a batch this flushes immediately; inside a
    /// flush the new marks join the live drain.
    pub(crate) fn mark_changed(&self, id: NodeId) -> Result<()> {
        if self.disposed.get() {
            // Post-disposal writes mutate in place without propagation.
            return Ok(());
        }
        {
            let mut sched = self.scheduler.borrow_mut();
            match sched.kind(id) {
                Some(NodeKind::Source) => sched.enqueue_subscribers(id),
                Some(_) | None => return Err(ReactiveError::InvalidTarget { id }),
            }
        }
        self.flush_if_idle();
        Ok(())
    }

    /// Flush when there is queued work and no batch or flush is already
    /// responsible for draining it.
    pub(crate) fn flush_if_idle(&self) {
        if self.in_batch() || self.flushing.get() {
            return;
        }
        if self.scheduler.borrow().has_pending_work() {
            self.flush();
        }
    }

    /// Drain the update queue to fixpoint, then run queued effects, until
    /// both queues are empty.
    ///
    /// A panicking effect does not stop the drain: every other effect
    /// queued in the same flush still runs, and the first panic is
    /// re-raised once both queues are empty.
    pub(crate) fn flush(&self) {
        if self.flushing.get() {
            return;
        }
        let _flushing = FlagGuard::set(&self.flushing, true);
        // Each dispatch is unwind-isolated: effects drained out of the
        // queue alongside a panicking one must still get their run. The
        // failed effect was re-marked dirty by its run guard.
        let mut first_panic: Option<Box<dyn std::any::Any + Send>> = None;
        loop {
            self.scheduler.borrow_mut().propagate();
            let pending = self.scheduler.borrow_mut().take_pending_effects();
            if pending.is_empty() {
                break;
            }
            for id in pending {
                let runnable = self.scheduler.borrow().is_dirty(id).unwrap_or(false)
                    && self.effects.borrow().contains_key(&id);
                if !runnable {
                    continue;
                }
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.run_effect(id))) {
                    tracing::warn!(effect = %id, "effect panicked during flush; draining remaining effects");
                    if first_panic.is_none() {
                        first_panic = Some(payload);
                    }
                }
            }
        }
        if let Some(payload) = first_panic {
            resume_unwind(payload);
        }
    }

    /// Run one effect: previous cleanup first, then the body under a fresh
    /// dependency set with this effect installed as the consumer.
    ///
    /// Writes performed by the body (or the cleanup) enqueue into the
    /// graph's queues and are drained by a later pass, never recursively
    /// within this dispatch.
    pub(crate) fn run_effect(&self, id: NodeId) {
        if self.disposed.get() {
            return;
        }
        let _dispatch = FlagGuard::set(&self.flushing, true);

        let cleanup = self
            .effects
            .borrow_mut()
            .get_mut(&id)
            .and_then(|slot| slot.cleanup.take());
        if let Some(cleanup) = cleanup {
            run_cleanup(id, cleanup);
        }

        // The cleanup may have disposed the effect.
        let Some(run) = self.effects.borrow().get(&id).map(|slot| Rc::clone(&slot.run)) else {
            return;
        };

        {
            let mut sched = self.scheduler.borrow_mut();
            sched.detach_consumer(id);
            sched.mark_clean(id);
        }

        let _scope = EffectScopeGuard::enter(self.self_weak.clone(), id);
        let _consumer = ConsumerGuard::enter_effect(self, id);
        let redirty = DirtyOnUnwind::arm(self, id);
        run();
        redirty.disarm();

        if let Some(slot) = self.effects.borrow_mut().get_mut(&id) {
            slot.run_count += 1;
        }
    }

    /// Replace the pending cleanup of `effect`. No-op if the effect is not
    /// resident.
    pub(crate) fn register_cleanup(&self, effect: NodeId, cleanup: Box<dyn FnOnce()>) {
        if let Some(slot) = self.effects.borrow_mut().get_mut(&effect) {
            slot.cleanup = Some(cleanup);
        }
    }

    /// Dispose one effect: run its cleanup, drop its subscriptions, remove
    /// it from the tables. Idempotent.
    pub(crate) fn dispose_effect(&self, id: NodeId) {
        let Some(slot) = self.effects.borrow_mut().remove(&id) else {
            return;
        };
        if let Some(cleanup) = slot.cleanup {
            run_cleanup(id, cleanup);
        }
        self.scheduler.borrow_mut().remove(id);
    }

    /// Dispose the whole graph. Idempotent, best-effort, never panics.
    pub(crate) fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        tracing::debug!("disposing reactive graph");

        let slots: Vec<(NodeId, EffectSlot)> = self.effects.borrow_mut().drain().collect();
        for (id, slot) in slots {
            if let Some(cleanup) = slot.cleanup {
                run_cleanup(id, cleanup);
            }
        }

        self.scheduler.borrow_mut().clear();
        self.compute_stack.borrow_mut().clear();
        self.current_effect.set(None);
        self.current_computed.set(None);
    }
}

/// Cleanup failures are swallowed so the next run or disposal proceeds.
fn run_cleanup(id: NodeId, cleanup: Box<dyn FnOnce()>) {
    if catch_unwind(AssertUnwindSafe(cleanup)).is_err() {
        tracing::warn!(effect = %id, "effect cleanup panicked; continuing");
    }
}

/// Handle to a reactive graph.
///
/// Cloning is cheap and yields a handle to the same graph. All node
/// factories live here; see the module docs for the propagation model.
///
/// # Example
///
/// ```rust,ignore
/// use trellis_core::reactive::Graph;
///
/// let graph = Graph::new();
/// let count = graph.create_source(0);
/// let doubled = graph.create_computed({
///     let count = count.clone();
///     move || count.read() * 2
/// });
///
/// let _watch = graph.create_effect({
///     let doubled = doubled.clone();
///     move || println!("doubled = {}", doubled.read())
/// });
///
/// count.write(5); // effect prints: doubled = 10
/// ```
#[derive(Clone)]
pub struct Graph {
    inner: Rc<GraphInner>,
}

impl Graph {
    /// Create a fresh, live graph.
    pub fn new() -> Self {
        let inner = Rc::new_cyclic(|self_weak| GraphInner {
            self_weak: self_weak.clone(),
            next_id: Cell::new(0),
            scheduler: RefCell::new(Scheduler::new()),
            effects: RefCell::new(HashMap::new()),
            current_effect: Cell::new(None),
            current_computed: Cell::new(None),
            tracking: Cell::new(true),
            batch_depth: Cell::new(0),
            flushing: Cell::new(false),
            compute_stack: RefCell::new(Vec::new()),
            disposed: Cell::new(false),
        });
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Rc<GraphInner>) -> Self {
        Self { inner }
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &GraphInner {
        &self.inner
    }

    pub(crate) fn downgrade(&self) -> Weak<GraphInner> {
        Rc::downgrade(&self.inner)
    }

    /// Create a source holding `value`.
    ///
    /// # Panics
    ///
    /// Panics with [`ReactiveError::GraphDisposed`] if the graph has been
    /// disposed. Use [`Graph::try_create_source`] to recover instead.
    pub fn create_source<T>(&self, value: T) -> Source<T>
    where
        T: Clone + PartialEq + 'static,
    {
        self.try_create_source(value).unwrap_or_else(|err| panic!("{err}"))
    }

    /// Fallible variant of [`Graph::create_source`].
    pub fn try_create_source<T>(&self, value: T) -> Result<Source<T>>
    where
        T: Clone + PartialEq + 'static,
    {
        if self.inner.is_disposed() {
            return Err(ReactiveError::GraphDisposed);
        }
        let id = self.inner.alloc_id();
        self.inner.scheduler.borrow_mut().insert(id, Node::source());
        Ok(Source::new(self.downgrade(), id, value))
    }

    /// Create a computed whose value is `compute` applied to whatever it
    /// reads. The computation does not run until the first read.
    ///
    /// # Panics
    ///
    /// Panics with [`ReactiveError::GraphDisposed`] if the graph has been
    /// disposed. Use [`Graph::try_create_computed`] to recover instead.
    pub fn create_computed<T, F>(&self, compute: F) -> Computed<T>
    where
        T: Clone + 'static,
        F: Fn() -> T + 'static,
    {
        self.try_create_computed(compute).unwrap_or_else(|err| panic!("{err}"))
    }

    /// Fallible variant of [`Graph::create_computed`].
    pub fn try_create_computed<T, F>(&self, compute: F) -> Result<Computed<T>>
    where
        T: Clone + 'static,
        F: Fn() -> T + 'static,
    {
        if self.inner.is_disposed() {
            return Err(ReactiveError::GraphDisposed);
        }
        let id = self.inner.alloc_id();
        self.inner.scheduler.borrow_mut().insert(id, Node::computed());
        Ok(Computed::new(self.downgrade(), id, Rc::new(compute)))
    }

    /// Create an effect. It runs once, synchronously, to capture its
    /// initial dependencies, even inside a batch.
    ///
    /// # Panics
    ///
    /// Panics with [`ReactiveError::GraphDisposed`] if the graph has been
    /// disposed. Use [`Graph::try_create_effect`] to recover instead.
    pub fn create_effect<F>(&self, run: F) -> Effect
    where
        F: Fn() + 'static,
    {
        self.try_create_effect(run).unwrap_or_else(|err| panic!("{err}"))
    }

    /// Fallible variant of [`Graph::create_effect`].
    pub fn try_create_effect<F>(&self, run: F) -> Result<Effect>
    where
        F: Fn() + 'static,
    {
        if self.inner.is_disposed() {
            return Err(ReactiveError::GraphDisposed);
        }
        let id = self.inner.alloc_id();
        self.inner.scheduler.borrow_mut().insert(id, Node::effect());
        self.inner.effects.borrow_mut().insert(
            id,
            EffectSlot {
                run: Rc::new(run),
                cleanup: None,
                run_count: 0,
            },
        );
        self.inner.run_effect(id);
        // Writes performed by the initial run were deferred; drain them
        // now unless a batch or an enclosing flush will.
        self.inner.flush_if_idle();
        Ok(Effect::new(self.downgrade(), id))
    }

    /// Alias for [`Graph::create_source`].
    pub fn create_state<T>(&self, value: T) -> Source<T>
    where
        T: Clone + PartialEq + 'static,
    {
        self.create_source(value)
    }

    /// Alias for [`Graph::create_computed`].
    pub fn create_derived<T, F>(&self, compute: F) -> Computed<T>
    where
        T: Clone + 'static,
        F: Fn() -> T + 'static,
    {
        self.create_computed(compute)
    }

    /// Alias for [`Graph::create_computed`].
    pub fn create_memo<T, F>(&self, compute: F) -> Computed<T>
    where
        T: Clone + 'static,
        F: Fn() -> T + 'static,
    {
        self.create_computed(compute)
    }

    /// Alias for [`Graph::create_effect`].
    pub fn create_watcher<F>(&self, run: F) -> Effect
    where
        F: Fn() + 'static,
    {
        self.create_effect(run)
    }

    /// Low-level change notification: mark the source `id` changed and
    /// propagate, as if it had been written with a fresh value.
    ///
    /// [`Source::write`] calls this internally; it is exposed for callers
    /// that mutate state a source merely mirrors. Fails with
    /// [`ReactiveError::InvalidTarget`] if `id` does not name a writable
    /// source of this graph.
    pub fn mark_changed(&self, id: NodeId) -> Result<()> {
        self.inner.mark_changed(id)
    }

    /// Run `body` with dependency capture disabled.
    ///
    /// Reads inside the body record no edges even though a consumer may be
    /// installed. Re-entrant; the previous tracking state is restored on
    /// all exit paths.
    pub fn untrack<R>(&self, body: impl FnOnce() -> R) -> R {
        let _tracking = FlagGuard::set(&self.inner.tracking, false);
        body()
    }

    /// Run `body` with flushes deferred.
    ///
    /// Writes inside the body mark and enqueue as usual but nothing runs
    /// until the outermost batch exits; nested batches do not flush. If
    /// the body panics the pending marks are kept and drain on the next
    /// write or batch.
    pub fn batch<R>(&self, body: impl FnOnce() -> R) -> R {
        let guard = BatchGuard::enter(&self.inner);
        let value = body();
        drop(guard);
        if !self.inner.in_batch() {
            self.inner.flush();
        }
        value
    }

    /// Dispose the graph: run every effect's cleanup, clear all tables and
    /// queues. Idempotent and never panics.
    ///
    /// Afterwards, creating nodes fails with
    /// [`ReactiveError::GraphDisposed`]; writes mutate in place without
    /// propagation; reads return stored or last-cached values.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Whether the graph has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Number of resident sources and computeds.
    pub fn signal_count(&self) -> usize {
        self.inner.scheduler.borrow().signal_count()
    }

    /// Number of resident effects.
    pub fn effect_count(&self) -> usize {
        self.inner.effects.borrow().len()
    }

    /// Whether dependency capture is currently enabled.
    pub fn is_tracking(&self) -> bool {
        self.inner.tracking.get()
    }

    /// Whether a batch is currently open.
    pub fn in_batch(&self) -> bool {
        self.inner.in_batch()
    }

    /// Whether `self` and `other` are handles to the same graph.
    pub fn ptr_eq(&self, other: &Graph) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("signals", &self.signal_count())
            .field("effects", &self.effect_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
