//! Source Implementation
//!
//! A Source is the fundamental writable cell. It holds a value and the
//! graph tracks which consumers depend on it.
//!
//! # How Sources Work
//!
//! 1. When a source is read while a consumer (computed or effect) is
//!    running and tracking is on, the graph records a bidirectional edge.
//!
//! 2. When a source's value changes, every subscriber is marked dirty and
//!    enqueued; effects re-run in the flush, computeds recompute on their
//!    next read.
//!
//! 3. Writing a value equal to the current one is a no-op: no marking, no
//!    flush, no effect runs.
//!
//! # Ownership
//!
//! The value lives in the handle, shared between clones; the graph's node
//! table carries only the structural record. A source therefore keeps
//! working after the graph is disposed (or dropped): reads return the
//! stored value and writes mutate in place without propagation.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use crate::graph::NodeId;

use super::graph::{Graph, GraphInner};

/// A writable reactive cell holding a value of type T.
///
/// # Example
///
/// ```rust,ignore
/// let count = graph.create_source(0);
///
/// // Tracked read
/// let value = count.read();
///
/// // Equality-gated write (marks subscribers dirty and flushes)
/// count.write(5);
/// ```
pub struct Source<T>
where
    T: Clone + PartialEq + 'static,
{
    graph: Weak<GraphInner>,
    id: NodeId,
    value: Rc<RefCell<T>>,
}

impl<T> Source<T>
where
    T: Clone + PartialEq + 'static,
{
    pub(crate) fn new(graph: Weak<GraphInner>, id: NodeId, value: T) -> Self {
        Self {
            graph,
            id,
            value: Rc::new(RefCell::new(value)),
        }
    }

    /// The source's id within its graph.
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

    /// The current value.
    ///
    /// If a consumer is running and tracking is on, it is subscribed to
    /// this source.
    pub fn read(&self) -> T {
        if let Some(graph) = self.graph.upgrade() {
            graph.record_read(self.id);
        }
        self.value.borrow().clone()
    }

    /// Alias for [`Source::read`].
    pub fn get(&self) -> T {
        self.read()
    }

    /// The current value, without recording an edge.
    pub fn peek(&self) -> T {
        self.value.borrow().clone()
    }

    /// Replace the value and propagate.
    ///
    /// A write equal to the current value (by `PartialEq`) is a no-op.
    /// Outside a batch, dependents are brought up to date before this
    /// returns; on a disposed graph the value is stored with no
    /// propagation.
    pub fn write(&self, value: T) {
        {
            let current = self.value.borrow();
            if *current == value {
                return;
            }
        }
        self.value.replace(value);

        let Some(graph) = self.graph.upgrade() else {
            return;
        };
        graph
            .mark_changed(self.id)
            .expect("source id registered with its graph");
    }

    /// Alias for [`Source::write`].
    pub fn set(&self, value: T) {
        self.write(value)
    }

    /// Replace the value with `f` applied to the current value.
    ///
    /// The read is untracked: updating a source inside a consumer does not
    /// subscribe the consumer to it.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.peek();
        self.write(f(&current));
    }

    /// Number of consumers currently subscribed to this source.
    pub fn subscriber_count(&self) -> usize {
        self.graph
            .upgrade()
            .map_or(0, |g| g.scheduler.borrow().subscriber_count(self.id))
    }
}

impl<T> Clone for Source<T>
where
    T: Clone + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            graph: Weak::clone(&self.graph),
            id: self.id,
            value: Rc::clone(&self.value),
        }
    }
}

impl<T> Debug for Source<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.id)
            .field("value", &self.peek())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
