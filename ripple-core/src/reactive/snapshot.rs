//! Serializable view of the dependency graph.

use serde::Serialize;

use crate::graph::{NodeId, NodeKind, NodeState};

/// One node as seen by [`crate::Runtime::snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub kind: NodeKind,
    pub state: NodeState,
    pub height: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub sources: Vec<NodeId>,
    pub observers: Vec<NodeId>,
    /// Clock tick of the last value change.
    pub updated_at: u64,
}

/// The whole graph of the current thread, ordered by node ID.
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub clock: u64,
    pub owners: usize,
    /// Effects waiting in any queue.
    pub queued: usize,
    pub nodes: Vec<NodeSnapshot>,
}

impl GraphSnapshot {
    pub fn node(&self, id: NodeId) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
