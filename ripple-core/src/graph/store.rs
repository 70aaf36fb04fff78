//! Dependency graph store.
//!
//! Holds every live node, indexed by ID, together with both edge directions.
//! It knows nothing about running user code: it rebuilds edges after an
//! evaluation and propagates dirty states after a write.
//!
//! # Marking
//!
//! When a source changes:
//!
//! 1. Its direct observers become `Stale` (they definitely read a new value).
//! 2. Everything further downstream becomes `Check` (something upstream
//!    changed, but a memoized value in between may absorb it).
//! 3. Effects that were clean are returned so the caller can enqueue them.
//!
//! A node that was already dirty stops the walk: its downstream was marked
//! when it first became dirty.

use std::collections::HashMap;

use smallvec::SmallVec;

use super::node::{Node, NodeId, NodeState};

/// All nodes in the graph, indexed by ID.
#[derive(Debug, Default)]
pub(crate) struct DependencyGraph {
    nodes: HashMap<NodeId, Node>,
}

impl DependencyGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a node to the graph.
    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph, severing every edge it takes part in.
    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&id)?;

        for source in &node.sources {
            if let Some(source) = self.nodes.get_mut(source) {
                source.observers.shift_remove(&id);
            }
        }

        for observer in &node.observers {
            if let Some(observer) = self.nodes.get_mut(observer) {
                observer.sources.retain(|s| *s != id);
            }
        }

        Some(node)
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// State of a node; missing nodes read as disposed.
    pub(crate) fn state(&self, id: NodeId) -> NodeState {
        self.nodes
            .get(&id)
            .map_or(NodeState::Disposed, |node| node.state)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Replace the sources of `id` with the ones read during its last
    /// evaluation and recompute its height.
    ///
    /// Sources that no longer exist are dropped.
    pub(crate) fn replace_sources(&mut self, id: NodeId, sources: SmallVec<[NodeId; 4]>) {
        let sources: SmallVec<[NodeId; 4]> = sources
            .into_iter()
            .filter(|s| *s != id && self.nodes.contains_key(s))
            .collect();

        let old = match self.nodes.get_mut(&id) {
            Some(node) => std::mem::replace(&mut node.sources, sources.clone()),
            None => return,
        };

        for stale in old.iter().filter(|s| !sources.contains(s)) {
            if let Some(source) = self.nodes.get_mut(stale) {
                source.observers.shift_remove(&id);
            }
        }

        let mut height = 0;
        for fresh in &sources {
            if let Some(source) = self.nodes.get_mut(fresh) {
                source.observers.insert(id);
                height = height.max(source.height + 1);
            }
        }

        if let Some(node) = self.nodes.get_mut(&id) {
            node.height = height;
        }
    }

    /// Mark everything downstream of a changed signal.
    ///
    /// Returns the effects that went from clean to dirty.
    pub(crate) fn mark_changed(&mut self, source: NodeId) -> Vec<NodeId> {
        let observers = match self.nodes.get(&source) {
            Some(node) => node.observers.iter().copied().collect(),
            None => Vec::new(),
        };
        self.propagate(observers)
    }

    /// Mark the direct observers of a recomputed node whose value changed.
    ///
    /// They are normally already `Check`; this confirms them `Stale`.
    pub(crate) fn mark_observers_stale(&mut self, id: NodeId) -> Vec<NodeId> {
        let observers = match self.nodes.get(&id) {
            Some(node) => node.observers.iter().copied().collect(),
            None => Vec::new(),
        };
        self.propagate(observers)
    }

    fn propagate(&mut self, direct: Vec<NodeId>) -> Vec<NodeId> {
        let mut effects = Vec::new();
        let mut stack: Vec<(NodeId, NodeState)> = direct
            .into_iter()
            .rev()
            .map(|id| (id, NodeState::Stale))
            .collect();

        while let Some((id, state)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            let was_clean = node.is_clean();
            if !node.raise(state) || !was_clean {
                continue;
            }
            if node.is_effect() {
                effects.push(id);
            }
            stack.extend(node.observers.iter().rev().map(|&o| (o, NodeState::Check)));
        }

        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::{EffectSlot, NodeKind, Value};
    use crate::graph::queue::{Phase, QueueTree};
    use smallvec::smallvec;
    use std::rc::Rc;

    fn signal(graph: &mut DependencyGraph) -> NodeId {
        graph.insert(Node::signal(Rc::new(0_i32), None))
    }

    fn computed(graph: &mut DependencyGraph, sources: &[NodeId]) -> NodeId {
        let id = graph.insert(Node::computed(Rc::new(|| Ok(Rc::new(0_i32) as Value)), None));
        graph.replace_sources(id, sources.iter().copied().collect());
        graph.get_mut(id).unwrap().mark_clean();
        id
    }

    fn effect(graph: &mut DependencyGraph, sources: &[NodeId]) -> NodeId {
        let queue = QueueTree::new().root();
        let slot = EffectSlot::new(Phase::User, queue, Rc::new(|_, _| None));
        let node = Node::effect(Rc::new(|| Ok(Rc::new(()) as Value)), None, slot);
        let id = graph.insert(node);
        graph.replace_sources(id, sources.iter().copied().collect());
        graph.get_mut(id).unwrap().mark_clean();
        id
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut graph = DependencyGraph::new();
        let source = signal(&mut graph);
        let derived = computed(&mut graph, &[source]);

        assert_eq!(graph.len(), 2);

        graph.remove(source);
        assert_eq!(graph.len(), 1);
        assert!(!graph.contains(source));
        assert!(graph.get(derived).unwrap().sources.is_empty());
        assert_eq!(graph.state(source), NodeState::Disposed);
    }

    #[test]
    fn replace_sources_rewires_edges() {
        let mut graph = DependencyGraph::new();
        let a = signal(&mut graph);
        let b = signal(&mut graph);
        let derived = computed(&mut graph, &[a]);

        assert!(graph.get(a).unwrap().observers.contains(&derived));

        graph.replace_sources(derived, smallvec![b]);

        assert!(!graph.get(a).unwrap().observers.contains(&derived));
        assert!(graph.get(b).unwrap().observers.contains(&derived));
        assert_eq!(graph.get(derived).unwrap().sources.as_slice(), &[b]);
    }

    #[test]
    fn heights_follow_longest_chain() {
        let mut graph = DependencyGraph::new();
        let a = signal(&mut graph);
        let b = computed(&mut graph, &[a]);
        let c = computed(&mut graph, &[b]);
        let d = computed(&mut graph, &[a, c]);

        assert_eq!(graph.get(a).unwrap().height, 0);
        assert_eq!(graph.get(b).unwrap().height, 1);
        assert_eq!(graph.get(c).unwrap().height, 2);
        assert_eq!(graph.get(d).unwrap().height, 3);
    }

    #[test]
    fn mark_changed_distinguishes_stale_and_check() {
        let mut graph = DependencyGraph::new();

        // Chain: source -> derived1 -> derived2 -> effect
        let source = signal(&mut graph);
        let derived1 = computed(&mut graph, &[source]);
        let derived2 = computed(&mut graph, &[derived1]);
        let sink = effect(&mut graph, &[derived2]);

        let effects = graph.mark_changed(source);

        assert_eq!(graph.state(derived1), NodeState::Stale);
        assert_eq!(graph.state(derived2), NodeState::Check);
        assert_eq!(graph.state(sink), NodeState::Check);
        assert_eq!(effects, vec![sink]);
        assert_eq!(graph.get(sink).unwrap().kind, NodeKind::Effect);
    }

    #[test]
    fn dirty_nodes_are_not_reported_twice() {
        let mut graph = DependencyGraph::new();
        let a = signal(&mut graph);
        let b = signal(&mut graph);
        let sink = effect(&mut graph, &[a, b]);

        assert_eq!(graph.mark_changed(a), vec![sink]);
        assert!(graph.mark_changed(b).is_empty());
        assert_eq!(graph.state(sink), NodeState::Stale);
    }

    #[test]
    fn observers_confirmed_stale_after_change() {
        let mut graph = DependencyGraph::new();
        let source = signal(&mut graph);
        let derived = computed(&mut graph, &[source]);
        let downstream = computed(&mut graph, &[derived]);

        graph.mark_changed(source);
        assert_eq!(graph.state(downstream), NodeState::Check);

        graph.mark_observers_stale(derived);
        assert_eq!(graph.state(downstream), NodeState::Stale);
    }
}
