//! Trellis Core
//!
//! This crate provides the core runtime for the Trellis reactive state
//! graph. It implements:
//!
//! - Reactive primitives (sources, computeds, effects)
//! - Automatic dependency capture with push-based dirty propagation and
//!   pull-based recomputation
//! - Batched update coalescing, cycle detection, and effect cleanup
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `reactive`: the node handles, the owning [`Graph`], tracking scopes,
//!   and error types
//! - `graph`: the structural dependency graph (node records, ordered
//!   queues, dirty propagation)
//!
//! Every node belongs to exactly one [`Graph`]. Graphs are single-threaded
//! arenas: handles are not `Send`, and each thread gets its own lazily
//! created default graph.
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{default_graph, on_cleanup};
//!
//! let graph = default_graph();
//!
//! // A writable cell.
//! let count = graph.create_source(0);
//!
//! // A derived value, recomputed lazily when count changes.
//! let doubled = graph.create_computed({
//!     let count = count.clone();
//!     move || count.read() * 2
//! });
//!
//! // A side effect, re-run whenever a value it read changes.
//! let effect = graph.create_effect({
//!     let count = count.clone();
//!     let doubled = doubled.clone();
//!     move || {
//!         println!("count: {}, doubled: {}", count.read(), doubled.read());
//!         on_cleanup(|| println!("about to re-run"));
//!     }
//! });
//!
//! count.write(5); // effect re-runs, prints: count: 5, doubled: 10
//! effect.dispose();
//! ```

pub mod graph;
pub mod reactive;

pub use graph::{NodeId, NodeKind};
pub use reactive::{
    default_graph, on_cleanup, reset_default_graph, Computed, Effect, Graph, ReactiveError,
    Result, Source,
};
