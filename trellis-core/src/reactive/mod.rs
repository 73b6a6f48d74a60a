//! Reactive Primitives
//!
//! This module implements the reactive system: sources, computeds, and
//! effects, owned and coordinated by a [`Graph`].
//!
//! # Concepts
//!
//! ## Sources
//!
//! A Source is a container for mutable state. When a source is read while
//! a consumer (a recomputing computed or a running effect) is active, the
//! graph records the consumer as a subscriber. When the source's value
//! changes, subscribers are marked dirty and effects are queued.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It recomputes
//! only when one of its dependencies changed, and only when read. Each
//! recompute captures its dependency set from scratch, so conditional
//! reads subscribe exactly to what the taken branch uses.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that re-runs whenever its
//! dependencies change. Effects synchronize reactive state with the
//! outside world and may register a cleanup that runs before the next run
//! or at disposal.
//!
//! # Implementation Notes
//!
//! Dependencies are captured automatically: the graph keeps a current
//! consumer, and tracked reads record an edge against it. This approach
//! ("transparent reactivity") is the one used by SolidJS, Vue 3, and
//! Leptos.
//!
//! A graph is strictly single-threaded; each thread has its own lazily
//! created default graph.

mod computed;
mod effect;
mod error;
mod graph;
mod scope;
mod source;

pub use computed::Computed;
pub use effect::{on_cleanup, Effect};
pub use error::{ReactiveError, Result};
pub use graph::{default_graph, reset_default_graph, Graph};
pub use source::Source;
