//! Graph Nodes
//!
//! This module defines the structural records that live in a graph's node
//! table: an id, a kind tag, a dirty flag, and both sides of the node's
//! edges. The records carry no values and no closures; those live with the
//! handles and the effect table respectively.

use std::collections::HashSet;
use std::fmt;

/// Unique identifier for a node within its owning graph.
///
/// Ids are allocated by a monotonic counter on the graph that created the
/// node and are never reused for that graph's lifetime. Ids from different
/// graphs are unrelated and must not be mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A writable cell. Sources are the roots of the graph: they have no
    /// dependencies, only subscribers.
    Source,

    /// A memoized derived value. Computeds have dependencies and may have
    /// subscribers of their own.
    Computed,

    /// A side effect. Effects are the leaves of the graph: they have
    /// dependencies but never appear as a producer.
    Effect,
}

/// Structural record for a single node.
///
/// For every edge in the graph, the producer's `subscribers` set and the
/// consumer's `dependencies` set are updated together; the scheduler owns
/// that invariant.
#[derive(Debug)]
pub struct Node {
    kind: NodeKind,
    dirty: bool,
    dependencies: HashSet<NodeId>,
    subscribers: HashSet<NodeId>,
}

impl Node {
    /// Create a new record of the given kind.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            // Sources are never dirty. Computeds and effects start dirty so
            // their first evaluation always runs.
            dirty: kind != NodeKind::Source,
            dependencies: HashSet::new(),
            subscribers: HashSet::new(),
        }
    }

    /// Create a source record.
    pub fn source() -> Self {
        Self::new(NodeKind::Source)
    }

    /// Create a computed record.
    pub fn computed() -> Self {
        Self::new(NodeKind::Computed)
    }

    /// Create an effect record.
    pub fn effect() -> Self {
        Self::new(NodeKind::Effect)
    }

    /// The node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Whether the node needs re-evaluation before its value or effect is
    /// observable. Always false for sources.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the node as needing re-evaluation.
    pub fn mark_dirty(&mut self) {
        if self.kind != NodeKind::Source {
            self.dirty = true;
        }
    }

    /// Mark the node as up-to-date.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Record that this node reads from `producer`.
    pub fn add_dependency(&mut self, producer: NodeId) {
        self.dependencies.insert(producer);
    }

    /// Forget that this node reads from `producer`.
    pub fn remove_dependency(&mut self, producer: NodeId) {
        self.dependencies.remove(&producer);
    }

    /// The producers this node currently reads from.
    pub fn dependencies(&self) -> &HashSet<NodeId> {
        &self.dependencies
    }

    /// Drop all dependencies. The producer-side subscriber sets must be
    /// updated by the caller.
    pub fn clear_dependencies(&mut self) {
        self.dependencies.clear();
    }

    /// Record that `consumer` reads from this node.
    pub fn add_subscriber(&mut self, consumer: NodeId) {
        self.subscribers.insert(consumer);
    }

    /// Forget that `consumer` reads from this node.
    pub fn remove_subscriber(&mut self, consumer: NodeId) {
        self.subscribers.remove(&consumer);
    }

    /// The consumers currently reading from this node.
    pub fn subscribers(&self) -> &HashSet<NodeId> {
        &self.subscribers
    }
}
