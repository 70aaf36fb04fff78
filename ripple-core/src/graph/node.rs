//! Graph Nodes
//!
//! This module defines the node type that lives in the dependency graph.
//! Signals, computeds and effects share one representation; the `kind`
//! decides which of the optional payload fields are populated.

use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;
use serde::Serialize;
use smallvec::SmallVec;

use super::queue::{Phase, QueueId};
use crate::error::{ReactiveError, Result};
use crate::reactive::{Cleanup, OwnerId};

/// Type-erased node value. Cloning is a refcount bump.
pub(crate) type Value = Rc<dyn Any>;

/// Derivation of a computed or effect.
pub(crate) type ComputeFn = Rc<dyn Fn() -> Result<Value>>;

/// Equality used to suppress no-op writes and unchanged recomputations.
pub(crate) type EqualsFn = Rc<dyn Fn(&dyn Any, &dyn Any) -> bool>;

/// Side-effect half of an effect: `(new, previous)`.
pub(crate) type EffectFn = Rc<dyn Fn(&dyn Any, Option<&dyn Any>) -> Option<Cleanup>>;

/// Error handler of an effect; `Ok` recovers with a fallback value.
pub(crate) type ErrorFn = Rc<dyn Fn(ReactiveError) -> Result<Value>>;

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A writable source. Roots of the graph, height 0.
    Signal,

    /// A memoized derivation, recomputed lazily on read.
    Computed,

    /// A leaf the scheduler runs eagerly for its side effect.
    Effect,
}

/// Recomputation state of a node.
///
/// The variants are ordered: marking only ever raises a node's state, and
/// `Disposed` absorbs everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// The value is up-to-date.
    Clean,

    /// A transitive source may have changed; sources must be verified
    /// before deciding whether to recompute.
    Check,

    /// A direct source changed; the node must recompute before its next read.
    Stale,

    /// The node was disposed and rejects reads and writes.
    Disposed,
}

/// Scheduler bookkeeping carried by effect nodes.
pub(crate) struct EffectSlot {
    pub(crate) phase: Phase,
    pub(crate) queue: QueueId,
    pub(crate) run: EffectFn,
    pub(crate) on_error: Option<ErrorFn>,
    pub(crate) cleanup: Option<Cleanup>,
    pub(crate) previous: Option<Value>,
    /// Set when the compute produced a new value the side effect has not seen.
    pub(crate) pending: bool,
    /// `defer`: swallow the side effect for the initial value.
    pub(crate) skip_next: bool,
    /// Boundary queue this effect's error is currently collected in.
    pub(crate) reported: Option<QueueId>,
    pub(crate) runs: usize,
}

impl EffectSlot {
    pub(crate) fn new(phase: Phase, queue: QueueId, run: EffectFn) -> Self {
        Self {
            phase,
            queue,
            run,
            on_error: None,
            cleanup: None,
            previous: None,
            pending: false,
            skip_next: false,
            reported: None,
            runs: 0,
        }
    }
}

/// A node in the dependency graph.
pub(crate) struct Node {
    pub(crate) id: NodeId,
    pub(crate) kind: NodeKind,
    pub(crate) state: NodeState,
    pub(crate) value: Option<Value>,
    pub(crate) error: Option<ReactiveError>,

    /// Nodes read during the last evaluation, in read order.
    pub(crate) sources: SmallVec<[NodeId; 4]>,

    /// Nodes that read this node during their last evaluation.
    pub(crate) observers: IndexSet<NodeId>,

    pub(crate) height: usize,
    pub(crate) name: Option<String>,
    pub(crate) equals: Option<EqualsFn>,
    pub(crate) compute: Option<ComputeFn>,

    /// Owner scope that holds whatever this node creates while evaluating.
    pub(crate) scope: Option<OwnerId>,

    pub(crate) computing: bool,

    /// Clock tick of the last value change.
    pub(crate) updated_at: u64,

    pub(crate) effect: Option<EffectSlot>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            state: match kind {
                NodeKind::Signal => NodeState::Clean,
                // Start stale to ensure the first read computes.
                NodeKind::Computed | NodeKind::Effect => NodeState::Stale,
            },
            value: None,
            error: None,
            sources: SmallVec::new(),
            observers: IndexSet::new(),
            height: 0,
            name: None,
            equals: None,
            compute: None,
            scope: None,
            computing: false,
            updated_at: 0,
            effect: None,
        }
    }

    /// Create a new signal node holding `value`.
    pub(crate) fn signal(value: Value, equals: Option<EqualsFn>) -> Self {
        let mut node = Self::new(NodeKind::Signal);
        node.value = Some(value);
        node.equals = equals;
        node
    }

    /// Create a new computed node.
    pub(crate) fn computed(compute: ComputeFn, equals: Option<EqualsFn>) -> Self {
        let mut node = Self::new(NodeKind::Computed);
        node.compute = Some(compute);
        node.equals = equals;
        node
    }

    /// Create a new effect node.
    pub(crate) fn effect(compute: ComputeFn, equals: Option<EqualsFn>, slot: EffectSlot) -> Self {
        let mut node = Self::new(NodeKind::Effect);
        node.compute = Some(compute);
        node.equals = equals;
        node.effect = Some(slot);
        node
    }

    pub(crate) fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub(crate) fn is_clean(&self) -> bool {
        self.state == NodeState::Clean
    }

    pub(crate) fn is_effect(&self) -> bool {
        self.kind == NodeKind::Effect
    }

    /// Raise the state to `state` if it is currently lower.
    ///
    /// Returns `true` if the state changed.
    pub(crate) fn raise(&mut self, state: NodeState) -> bool {
        if self.state >= state {
            return false;
        }
        self.state = state;
        true
    }

    pub(crate) fn mark_clean(&mut self) {
        if self.state != NodeState::Disposed {
            self.state = NodeState::Clean;
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("height", &self.height)
            .field("name", &self.name)
            .field("sources", &self.sources)
            .field("observers", &self.observers)
            .finish()
    }
}
