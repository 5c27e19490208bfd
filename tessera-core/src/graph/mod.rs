//! Dependency Graph
//!
//! This module holds the pieces of the reactive graph that are independent of
//! any particular value type: node identity, the tagged edge variants, and the
//! update scheduler.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes are signals, computeds, or effects
//! - A dependency edge points from a reader to the value it read
//! - Each readable node keeps the reverse index (its dependents) so that a
//!   write can be propagated without searching the graph
//!
//! Effects are always leaves: nothing can read an effect.
//!
//! # Design Decisions
//!
//! 1. Edges are stored on the nodes themselves rather than in a central
//!    table. A write only ever touches the writer's dependents, so there is
//!    nothing to gain from a global index.
//!
//! 2. Every edge is a closed enum ([`Dependency`], and `Subscriber` on the
//!    reading side). Propagation matches on the variant instead of asking a
//!    node what it is.
//!
//! 3. Edges hold weak references. A node that has been dropped simply stops
//!    receiving notifications.

mod node;
mod scheduler;

pub use node::{NodeId, NodeKind};
pub(crate) use node::{ComputedNode, Dependency, SourceNode};
pub use scheduler::UpdateScheduler;
