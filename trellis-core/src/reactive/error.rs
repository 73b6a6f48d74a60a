//! Error types for the reactive engine.

use thiserror::Error;

use crate::graph::NodeId;

/// Result alias for fallible graph operations.
pub type Result<T> = std::result::Result<T, ReactiveError>;

/// Errors surfaced by graph operations.
///
/// The infallible operations (`read`, `create_source`, ...) panic with the
/// corresponding error as payload; the `try_` variants return it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A computed's recompute function depends, transitively, on its own
    /// value. The chain lists the in-progress computeds outermost first,
    /// ending with the repeated node.
    #[error("dependency cycle detected: {}", format_chain(.chain))]
    Cycle {
        /// In-progress computed ids, outermost first, ending with the node
        /// whose read closed the cycle.
        chain: Vec<NodeId>,
    },

    /// The operation would create or observably mutate reactive structure
    /// on a graph that has been disposed.
    #[error("graph has been disposed")]
    GraphDisposed,

    /// A change notification targeted a node that is not a writable source.
    #[error("node {id} is not a writable source")]
    InvalidTarget {
        /// The offending node.
        id: NodeId,
    },

    /// A user-supplied recompute function panicked. The computed is left
    /// dirty so a later read retries.
    #[error("recompute of {id} failed: {message}")]
    ComputeFailed {
        /// The computed whose recompute panicked.
        id: NodeId,
        /// The panic message, if one could be extracted.
        message: String,
    },
}

fn format_chain(chain: &[NodeId]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
