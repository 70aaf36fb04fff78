//! Scheduling queues.
//!
//! Every owner notifies a queue when one of its effects becomes dirty. Queues
//! form a tree that mirrors the owner tree: the root queue belongs to the
//! runtime, and each boundary adds a child queue for its subtree.
//!
//! A queue keeps one [`Heap`] per [`Phase`]. Flushing runs the render phase
//! over the whole tree before the user phase, so structural effects settle
//! before user code observes them.
//!
//! The variants are a closed set:
//!
//! - `Plain` forwards everything.
//! - `Collection` gathers nodes that failed with a given status (pending or
//!   errored) and holds user effects while it is non-empty.
//! - `Conditional` holds user effects while its condition says the subtree
//!   is hidden.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::heap::Heap;
use super::node::NodeId;
use crate::error::ReactiveError;

/// Unique identifier for a scheduling queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId(u64);

impl QueueId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Effect phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Structural effects; never held by boundaries.
    Render,

    /// User side effects; held while a boundary is gated.
    User,
}

impl Phase {
    /// Both phases, in the order a flush runs them.
    pub const ALL: [Phase; 2] = [Phase::Render, Phase::User];

    fn index(self) -> usize {
        match self {
            Phase::Render => 0,
            Phase::User => 1,
        }
    }
}

/// What a collection queue gathers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectStatus {
    /// Nodes reading values that are not ready yet.
    Pending,

    /// Nodes whose derivation failed.
    Error,
}

impl CollectStatus {
    /// The status an error is collected under.
    pub fn of(err: &ReactiveError) -> Self {
        if err.is_not_ready() {
            CollectStatus::Pending
        } else {
            CollectStatus::Error
        }
    }
}

pub(crate) enum QueueKind {
    Plain,
    Collection {
        status: CollectStatus,
        nodes: IndexMap<NodeId, ReactiveError>,
        /// Signal bumped whenever `nodes` changes, so boundaries re-derive.
        revision: NodeId,
    },
    Conditional {
        condition: NodeId,
        hidden: bool,
    },
}

impl QueueKind {
    pub(crate) fn collection(status: CollectStatus, revision: NodeId) -> Self {
        QueueKind::Collection {
            status,
            nodes: IndexMap::new(),
            revision,
        }
    }

    pub(crate) fn conditional(condition: NodeId) -> Self {
        QueueKind::Conditional {
            condition,
            hidden: false,
        }
    }
}

pub(crate) struct Queue {
    parent: Option<QueueId>,
    children: Vec<QueueId>,
    heaps: [Heap; 2],
    kind: QueueKind,
}

impl Queue {
    fn new(parent: Option<QueueId>, kind: QueueKind) -> Self {
        Self {
            parent,
            children: Vec::new(),
            heaps: [Heap::new(), Heap::new()],
            kind,
        }
    }

    fn is_gated(&self) -> bool {
        match &self.kind {
            QueueKind::Plain => false,
            QueueKind::Collection { nodes, .. } => !nodes.is_empty(),
            QueueKind::Conditional { hidden, .. } => *hidden,
        }
    }

    /// Whether work of `phase` is held back instead of running.
    fn holds(&self, phase: Phase) -> bool {
        phase == Phase::User && self.is_gated()
    }
}

/// The tree of queues, rooted at the runtime's queue.
pub(crate) struct QueueTree {
    queues: HashMap<QueueId, Queue>,
    root: QueueId,
}

impl QueueTree {
    pub(crate) fn new() -> Self {
        let root = QueueId::new();
        let mut queues = HashMap::new();
        queues.insert(root, Queue::new(None, QueueKind::Plain));
        Self { queues, root }
    }

    pub(crate) fn root(&self) -> QueueId {
        self.root
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: QueueId) -> bool {
        self.queues.contains_key(&id)
    }

    /// Add a child queue under `parent` (the root if `parent` is gone).
    pub(crate) fn create(&mut self, parent: QueueId, kind: QueueKind) -> QueueId {
        let parent = if self.queues.contains_key(&parent) {
            parent
        } else {
            self.root
        };
        let id = QueueId::new();
        self.queues.insert(id, Queue::new(Some(parent), kind));
        if let Some(queue) = self.queues.get_mut(&parent) {
            queue.children.push(id);
        }
        id
    }

    /// Remove a queue and its whole subtree. The root cannot be removed.
    pub(crate) fn remove(&mut self, id: QueueId) {
        if id == self.root {
            return;
        }
        let Some(queue) = self.queues.remove(&id) else {
            return;
        };
        if let Some(parent) = queue.parent.and_then(|p| self.queues.get_mut(&p)) {
            parent.children.retain(|&c| c != id);
        }
        for child in queue.children {
            self.remove(child);
        }
    }

    pub(crate) fn children(&self, id: QueueId) -> Vec<QueueId> {
        self.queues
            .get(&id)
            .map(|q| q.children.clone())
            .unwrap_or_default()
    }

    /// Insert `node` into the `phase` heap of `queue`.
    ///
    /// Returns `true` if the notification reaches the root, i.e. a flush is
    /// needed, and `false` if a gated boundary on the way absorbed it.
    pub(crate) fn enqueue(&mut self, queue: QueueId, phase: Phase, node: NodeId, height: usize) -> bool {
        let queue = if self.queues.contains_key(&queue) {
            queue
        } else {
            self.root
        };
        if let Some(q) = self.queues.get_mut(&queue) {
            q.heaps[phase.index()].insert(node, height);
        }

        let mut cursor = Some(queue);
        while let Some(id) = cursor {
            let Some(q) = self.queues.get(&id) else {
                break;
            };
            if q.holds(phase) {
                return false;
            }
            cursor = q.parent;
        }
        true
    }

    /// Remove `node` from both heaps of `queue`.
    pub(crate) fn dequeue(&mut self, queue: QueueId, node: NodeId) -> bool {
        let Some(q) = self.queues.get_mut(&queue) else {
            return false;
        };
        let render = q.heaps[Phase::Render.index()].remove(node);
        let user = q.heaps[Phase::User.index()].remove(node);
        render || user
    }

    /// Pop the next runnable node of `phase`, unless the queue holds it.
    pub(crate) fn pop(&mut self, queue: QueueId, phase: Phase) -> Option<NodeId> {
        let q = self.queues.get_mut(&queue)?;
        if q.holds(phase) {
            return None;
        }
        q.heaps[phase.index()].pop_min()
    }

    /// Whether `queue` or any descendant has runnable work.
    pub(crate) fn has_pending(&self, queue: QueueId) -> bool {
        let Some(q) = self.queues.get(&queue) else {
            return false;
        };
        let own = Phase::ALL
            .iter()
            .any(|&phase| !q.holds(phase) && !q.heaps[phase.index()].is_empty());
        own || q.children.iter().any(|&c| self.has_pending(c))
    }

    /// Number of queued nodes in `queue` and its descendants, held or not.
    pub(crate) fn queued(&self, queue: QueueId) -> usize {
        let Some(q) = self.queues.get(&queue) else {
            return 0;
        };
        let own: usize = q.heaps.iter().map(Heap::len).sum();
        own + q.children.iter().map(|&c| self.queued(c)).sum::<usize>()
    }

    /// Drop every queued node in the tree and return what was dropped.
    pub(crate) fn drain_all(&mut self) -> Vec<NodeId> {
        let mut dropped = Vec::new();
        for queue in self.queues.values_mut() {
            for heap in &mut queue.heaps {
                dropped.extend(heap.iter());
                heap.clear();
            }
        }
        dropped
    }

    #[cfg(test)]
    pub(crate) fn is_gated(&self, queue: QueueId) -> bool {
        self.queues.get(&queue).is_some_and(Queue::is_gated)
    }

    /// Nearest collection queue for `status`, starting at `from` itself.
    pub(crate) fn find_collector(&self, from: QueueId, status: CollectStatus) -> Option<QueueId> {
        let mut cursor = Some(from);
        while let Some(id) = cursor {
            let q = self.queues.get(&id)?;
            if let QueueKind::Collection { status: s, .. } = &q.kind {
                if *s == status {
                    return Some(id);
                }
            }
            cursor = q.parent;
        }
        None
    }

    /// Record `node` as failed in a collection queue.
    ///
    /// Returns the revision signal to bump when the collection changed.
    pub(crate) fn collect(&mut self, queue: QueueId, node: NodeId, err: ReactiveError) -> Option<NodeId> {
        match self.queues.get_mut(&queue).map(|q| &mut q.kind) {
            Some(QueueKind::Collection { nodes, revision, .. }) => {
                let fresh = nodes.insert(node, err).is_none();
                fresh.then_some(*revision)
            }
            _ => None,
        }
    }

    /// Forget `node` in a collection queue.
    ///
    /// Returns the revision signal to bump when the collection changed.
    pub(crate) fn release(&mut self, queue: QueueId, node: NodeId) -> Option<NodeId> {
        match self.queues.get_mut(&queue).map(|q| &mut q.kind) {
            Some(QueueKind::Collection { nodes, revision, .. }) => {
                nodes.shift_remove(&node).map(|_| *revision)
            }
            _ => None,
        }
    }

    /// Forget every collected node.
    pub(crate) fn clear_collected(&mut self, queue: QueueId) -> Option<NodeId> {
        match self.queues.get_mut(&queue).map(|q| &mut q.kind) {
            Some(QueueKind::Collection { nodes, revision, .. }) if !nodes.is_empty() => {
                nodes.clear();
                Some(*revision)
            }
            _ => None,
        }
    }

    pub(crate) fn collected(&self, queue: QueueId) -> Vec<NodeId> {
        match self.queues.get(&queue).map(|q| &q.kind) {
            Some(QueueKind::Collection { nodes, .. }) => nodes.keys().copied().collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn first_collected(&self, queue: QueueId) -> Option<ReactiveError> {
        match self.queues.get(&queue).map(|q| &q.kind) {
            Some(QueueKind::Collection { nodes, .. }) => nodes.values().next().cloned(),
            _ => None,
        }
    }

    /// Every queue in the tree, parents before children.
    pub(crate) fn walk(&self) -> Vec<QueueId> {
        let mut order = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(q) = self.queues.get(&id) {
                stack.extend(q.children.iter().rev().copied());
            }
        }
        order
    }

    /// Condition node of a conditional queue.
    pub(crate) fn condition(&self, queue: QueueId) -> Option<NodeId> {
        match self.queues.get(&queue).map(|q| &q.kind) {
            Some(QueueKind::Conditional { condition, .. }) => Some(*condition),
            _ => None,
        }
    }

    pub(crate) fn set_hidden(&mut self, queue: QueueId, value: bool) {
        if let Some(QueueKind::Conditional { hidden, .. }) = self.queues.get_mut(&queue).map(|q| &mut q.kind) {
            *hidden = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_and_pop_by_height() {
        let mut tree = QueueTree::new();
        let root = tree.root();
        let (a, b) = (NodeId::new(), NodeId::new());

        assert!(tree.enqueue(root, Phase::User, b, 2));
        assert!(tree.enqueue(root, Phase::User, a, 1));
        assert!(tree.has_pending(root));

        assert_eq!(tree.pop(root, Phase::Render), None);
        assert_eq!(tree.pop(root, Phase::User), Some(a));
        assert_eq!(tree.pop(root, Phase::User), Some(b));
        assert!(!tree.has_pending(root));
    }

    #[test]
    fn removing_a_queue_removes_its_subtree() {
        let mut tree = QueueTree::new();
        let root = tree.root();
        let child = tree.create(root, QueueKind::Plain);
        let grandchild = tree.create(child, QueueKind::Plain);

        tree.remove(child);

        assert!(!tree.contains(child));
        assert!(!tree.contains(grandchild));
        assert!(tree.children(root).is_empty());

        tree.remove(root);
        assert!(tree.contains(root));
    }

    #[test]
    fn gated_collection_holds_user_work_only() {
        let mut tree = QueueTree::new();
        let root = tree.root();
        let boundary = tree.create(root, QueueKind::collection(CollectStatus::Pending, NodeId::new()));
        let pending = NodeId::new();
        tree.collect(boundary, pending, ReactiveError::NotReady);

        let user = NodeId::new();
        let render = NodeId::new();
        assert!(!tree.enqueue(boundary, Phase::User, user, 1));
        assert!(tree.enqueue(boundary, Phase::Render, render, 1));

        assert_eq!(tree.pop(boundary, Phase::User), None);
        assert_eq!(tree.pop(boundary, Phase::Render), Some(render));
        assert!(!tree.has_pending(root));
        assert_eq!(tree.queued(root), 1);

        tree.release(boundary, pending);
        assert!(tree.has_pending(root));
        assert_eq!(tree.pop(boundary, Phase::User), Some(user));
    }

    #[test]
    fn collector_lookup_matches_status() {
        let mut tree = QueueTree::new();
        let root = tree.root();
        let errors = tree.create(root, QueueKind::collection(CollectStatus::Error, NodeId::new()));
        let loading = tree.create(errors, QueueKind::collection(CollectStatus::Pending, NodeId::new()));
        let inner = tree.create(loading, QueueKind::Plain);

        assert_eq!(tree.find_collector(inner, CollectStatus::Pending), Some(loading));
        assert_eq!(tree.find_collector(inner, CollectStatus::Error), Some(errors));
        assert_eq!(tree.find_collector(root, CollectStatus::Error), None);
    }

    #[test]
    fn collect_reports_revision_only_on_change() {
        let mut tree = QueueTree::new();
        let revision = NodeId::new();
        let queue = tree.create(tree.root(), QueueKind::collection(CollectStatus::Error, revision));
        let node = NodeId::new();

        assert_eq!(tree.collect(queue, node, ReactiveError::msg("boom")), Some(revision));
        assert_eq!(tree.collect(queue, node, ReactiveError::msg("again")), None);
        assert_eq!(tree.collected(queue), vec![node]);
        assert!(tree.first_collected(queue).is_some());

        assert_eq!(tree.release(queue, node), Some(revision));
        assert_eq!(tree.release(queue, node), None);
        assert_eq!(tree.clear_collected(queue), None);
    }

    #[test]
    fn hidden_conditional_absorbs_user_notifications() {
        let mut tree = QueueTree::new();
        let root = tree.root();
        let queue = tree.create(root, QueueKind::conditional(NodeId::new()));
        let nested = tree.create(queue, QueueKind::Plain);

        tree.set_hidden(queue, true);
        assert!(tree.is_gated(queue));
        assert!(!tree.enqueue(nested, Phase::User, NodeId::new(), 0));

        tree.set_hidden(queue, false);
        assert!(tree.enqueue(nested, Phase::User, NodeId::new(), 0));
    }

    #[test]
    fn walk_visits_parents_first() {
        let mut tree = QueueTree::new();
        let root = tree.root();
        let a = tree.create(root, QueueKind::Plain);
        let b = tree.create(a, QueueKind::Plain);
        let c = tree.create(root, QueueKind::Plain);

        assert_eq!(tree.walk(), vec![root, a, b, c]);
    }

    #[test]
    fn dequeue_removes_from_both_phases() {
        let mut tree = QueueTree::new();
        let root = tree.root();
        let node = NodeId::new();
        tree.enqueue(root, Phase::Render, node, 0);

        assert!(tree.dequeue(root, node));
        assert!(!tree.dequeue(root, node));
        assert!(!tree.has_pending(root));
    }
}
