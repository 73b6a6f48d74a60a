//! Update Scheduling
//!
//! The scheduler owns the node table and the two propagation queues, and
//! implements the structural half of an update: marking subscribers dirty
//! and draining the update queue to fixpoint.
//!
//! # Algorithm
//!
//! 1. When a source changes, every subscriber is marked dirty and enqueued:
//!    computeds into the update queue, effects into the effect queue.
//! 2. The update queue is drained in insertion order. Each queued computed
//!    enqueues its subscribers: clean computeds are marked and queued,
//!    already-dirty computeds are skipped, and effects are queued
//!    regardless of their dirty flag. This repeats until the update queue
//!    is empty.
//! 3. The effect queue is handed to the graph's flush loop, which runs the
//!    effects.
//!
//! Computed values are never recomputed here. Dirty-marking is cheap and
//! monotonic; recomputation is pulled lazily by reads, so even in diamond
//! topologies a computed recomputes at most once per flush.

use std::collections::{HashMap, HashSet, VecDeque};

use super::node::{Node, NodeId, NodeKind};

/// Insertion-ordered queue of node ids, deduplicated on insert.
///
/// An id appears at most once per drain pass; re-inserting an id that was
/// already drained starts a fresh entry for the next pass.
#[derive(Debug, Default)]
pub struct DirtyQueue {
    order: VecDeque<NodeId>,
    queued: HashSet<NodeId>,
}

impl DirtyQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `id` at the back unless it is already queued.
    ///
    /// Returns whether the id was inserted.
    pub fn insert(&mut self, id: NodeId) -> bool {
        if self.queued.insert(id) {
            self.order.push_back(id);
            true
        } else {
            false
        }
    }

    /// Whether the queue holds no ids.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number of queued ids.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Take the current contents in insertion order, leaving the queue
    /// empty and ready to accept the same ids again.
    pub fn drain(&mut self) -> Vec<NodeId> {
        self.queued.clear();
        self.order.drain(..).collect()
    }

    /// Discard all queued ids.
    pub fn clear(&mut self) {
        self.order.clear();
        self.queued.clear();
    }
}

/// The structural dependency graph: node records plus the update and
/// effect queues.
#[derive(Debug, Default)]
pub struct Scheduler {
    nodes: HashMap<NodeId, Node>,
    update_queue: DirtyQueue,
    effect_queue: DirtyQueue,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node record under the given id.
    pub fn insert(&mut self, id: NodeId, node: Node) {
        self.nodes.insert(id, node);
    }

    /// Whether a record exists for `id`.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// The kind of the node, if present.
    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&id).map(Node::kind)
    }

    /// Remove a node and both sides of every edge involving it.
    pub fn remove(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.remove(&id) {
            for dep in node.dependencies() {
                if let Some(producer) = self.nodes.get_mut(dep) {
                    producer.remove_subscriber(id);
                }
            }
            for sub in node.subscribers() {
                if let Some(consumer) = self.nodes.get_mut(sub) {
                    consumer.remove_dependency(id);
                }
            }
        }
    }

    /// Record that `consumer` read `producer`. Both sides of the edge are
    /// kept in step; the edge is added only if both nodes are resident.
    pub fn add_edge(&mut self, producer: NodeId, consumer: NodeId) {
        if !self.nodes.contains_key(&producer) || !self.nodes.contains_key(&consumer) {
            return;
        }
        if let Some(node) = self.nodes.get_mut(&producer) {
            node.add_subscriber(consumer);
        }
        if let Some(node) = self.nodes.get_mut(&consumer) {
            node.add_dependency(producer);
        }
    }

    /// Remove the edge between `producer` and `consumer`, both sides.
    pub fn remove_edge(&mut self, producer: NodeId, consumer: NodeId) {
        if let Some(node) = self.nodes.get_mut(&producer) {
            node.remove_subscriber(consumer);
        }
        if let Some(node) = self.nodes.get_mut(&consumer) {
            node.remove_dependency(producer);
        }
    }

    /// Drop every edge in which `consumer` is the reading side.
    ///
    /// Called before a computed recomputes or an effect re-runs so the new
    /// run captures its dependency set from scratch.
    pub fn detach_consumer(&mut self, consumer: NodeId) {
        let deps: Vec<NodeId> = match self.nodes.get(&consumer) {
            Some(node) => node.dependencies().iter().copied().collect(),
            None => return,
        };
        for dep in deps {
            if let Some(producer) = self.nodes.get_mut(&dep) {
                producer.remove_subscriber(consumer);
            }
        }
        if let Some(node) = self.nodes.get_mut(&consumer) {
            node.clear_dependencies();
        }
    }

    /// Write path: mark every subscriber of `id` dirty and enqueue it.
    pub fn enqueue_subscribers(&mut self, id: NodeId) {
        let subs: Vec<NodeId> = match self.nodes.get(&id) {
            Some(node) => node.subscribers().iter().copied().collect(),
            None => return,
        };
        for sub in subs {
            self.mark_and_enqueue(sub, false);
        }
    }

    /// Drain the update queue to fixpoint.
    ///
    /// Each queued computed enqueues its subscribers: clean computeds are
    /// marked and queued, already-dirty computeds are skipped, and effects
    /// are queued regardless of their dirty flag. Re-dirtying during a
    /// pass appends to the next pass, never the current one: each pass
    /// iterates a drained snapshot.
    pub fn propagate(&mut self) {
        while !self.update_queue.is_empty() {
            let batch = self.update_queue.drain();
            for id in batch {
                if self.kind(id) != Some(NodeKind::Computed) {
                    continue;
                }
                let subs: Vec<NodeId> = self.nodes[&id].subscribers().iter().copied().collect();
                for sub in subs {
                    self.mark_and_enqueue(sub, true);
                }
            }
        }
    }

    fn mark_and_enqueue(&mut self, id: NodeId, skip_dirty_computeds: bool) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        match node.kind() {
            NodeKind::Computed => {
                // Transitive passes mark only clean computeds: every pass
                // shrinks the clean population, so the drain terminates.
                // A dirty computed's subscribers were already marked when
                // it became dirty.
                if skip_dirty_computeds && node.is_dirty() {
                    return;
                }
                node.mark_dirty();
                self.update_queue.insert(id);
            }
            NodeKind::Effect => {
                // Queue membership, not the dirty flag, decides the next
                // drain: a failed run leaves an effect dirty but dequeued,
                // and the next propagation that reaches it must queue it
                // again.
                node.mark_dirty();
                self.effect_queue.insert(id);
            }
            NodeKind::Source => {}
        }
    }

    /// Take the effects currently awaiting re-run, in insertion order.
    pub fn take_pending_effects(&mut self) -> Vec<NodeId> {
        self.effect_queue.drain()
    }

    /// Whether any effects are awaiting re-run.
    pub fn has_pending_effects(&self) -> bool {
        !self.effect_queue.is_empty()
    }

    /// Whether either queue holds work.
    pub fn has_pending_work(&self) -> bool {
        !self.update_queue.is_empty() || !self.effect_queue.is_empty()
    }

    /// Whether the node is dirty. `None` if no record exists.
    pub fn is_dirty(&self, id: NodeId) -> Option<bool> {
        self.nodes.get(&id).map(Node::is_dirty)
    }

    /// Mark the node dirty, if present.
    pub fn mark_dirty(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.mark_dirty();
        }
    }

    /// Mark the node clean, if present.
    pub fn mark_clean(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.mark_clean();
        }
    }

    /// Number of producers the node currently reads from.
    pub fn dependency_count(&self, id: NodeId) -> usize {
        self.nodes.get(&id).map_or(0, |n| n.dependencies().len())
    }

    /// Number of consumers currently reading from the node.
    pub fn subscriber_count(&self, id: NodeId) -> usize {
        self.nodes.get(&id).map_or(0, |n| n.subscribers().len())
    }

    /// Read access to a node record, for invariant checks.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Number of source and computed nodes.
    pub fn signal_count(&self) -> usize {
        self.nodes.values().filter(|n| n.kind() != NodeKind::Effect).count()
    }

    /// Number of effect nodes.
    pub fn effect_count(&self) -> usize {
        self.nodes.values().filter(|n| n.kind() == NodeKind::Effect).count()
    }

    /// Drop every record and queued id.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.update_queue.clear();
        self.effect_queue.clear();
    }
}
