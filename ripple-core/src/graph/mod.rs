//! Dependency Graph
//!
//! This module implements the data structures behind the reactive runtime:
//! the nodes, the edges between them, and the queues that order effect
//! execution.
//!
//! # Overview
//!
//! The dependency graph is a directed graph where:
//!
//! - Nodes represent reactive values (signals) or computations (computeds,
//!   effects)
//! - Edges represent dependencies: if A reads B, there is an edge from B to A
//!
//! When a signal changes, we traverse the graph to find all affected nodes
//! and mark them. Computeds recompute when next read; effects are placed in
//! a height-ordered heap so a node only runs after everything it depends on.
//!
//! # Design Decisions
//!
//! 1. We use a centralized graph rather than distributed linked lists
//!    because it keeps every node behind a `Copy` ID and makes disposal a
//!    single removal.
//!
//! 2. The graph is indexed by node ID for O(1) lookups.
//!
//! 3. We maintain both forward (sources) and reverse (observers) edges to
//!    enable efficient traversal in both directions.

pub(crate) mod heap;
pub(crate) mod node;
pub(crate) mod queue;
pub(crate) mod store;

pub use heap::Heap;
pub use node::{NodeId, NodeKind, NodeState};
pub use queue::{CollectStatus, Phase, QueueId};
