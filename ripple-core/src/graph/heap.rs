//! Height-indexed work heap.
//!
//! Effects waiting to run are bucketed by their height in the dependency
//! graph. Draining always takes the lowest occupied height first, so a node
//! is only processed after everything it depends on has settled. Within a
//! height, nodes come out in insertion order.
//!
//! Nodes inserted while a drain is in progress are still picked up by the
//! same drain, whatever their height, because every pop rescans from the
//! lowest occupied bucket.

use std::collections::{HashMap, VecDeque};

use super::node::NodeId;

/// A bucketed priority structure keyed by node height.
#[derive(Debug, Default)]
pub struct Heap {
    buckets: Vec<VecDeque<NodeId>>,
    slots: HashMap<NodeId, usize>,
    min: usize,
    max: usize,
}

impl Heap {
    /// Create an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `node` in the bucket for `height`.
    ///
    /// A node lives in at most one bucket: inserting it again at the same
    /// height is a no-op, at a different height it moves.
    pub fn insert(&mut self, node: NodeId, height: usize) {
        if let Some(&current) = self.slots.get(&node) {
            if current == height {
                return;
            }
            self.remove(node);
        }

        if height >= self.buckets.len() {
            self.buckets.resize_with(height + 1, VecDeque::new);
        }

        if self.slots.is_empty() {
            self.min = height;
            self.max = height;
        } else {
            self.min = self.min.min(height);
            self.max = self.max.max(height);
        }

        self.buckets[height].push_back(node);
        self.slots.insert(node, height);
    }

    /// Remove `node` from the heap. Returns `false` if it was not present.
    pub fn remove(&mut self, node: NodeId) -> bool {
        let Some(height) = self.slots.remove(&node) else {
            return false;
        };
        let bucket = &mut self.buckets[height];
        if let Some(pos) = bucket.iter().position(|&n| n == node) {
            bucket.remove(pos);
        }
        true
    }

    /// Take the lowest-height node, oldest first.
    pub fn pop_min(&mut self) -> Option<NodeId> {
        if self.slots.is_empty() {
            return None;
        }
        while self.min <= self.max {
            if let Some(node) = self.buckets[self.min].pop_front() {
                self.slots.remove(&node);
                return Some(node);
            }
            self.min += 1;
        }
        None
    }

    /// Whether `node` is waiting in the heap.
    pub fn contains(&self, node: NodeId) -> bool {
        self.slots.contains_key(&node)
    }

    /// Height bucket `node` currently sits in.
    pub fn height_of(&self, node: NodeId) -> Option<usize> {
        self.slots.get(&node).copied()
    }

    /// Number of nodes waiting.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no work is pending.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The occupied height range, if any work is pending.
    ///
    /// The bounds may be loose after removals; they never exclude a node.
    pub fn range(&self) -> Option<(usize, usize)> {
        if self.is_empty() {
            None
        } else {
            Some((self.min, self.max))
        }
    }

    /// Drop all pending nodes.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.slots.clear();
        self.min = 0;
        self.max = 0;
    }

    /// Iterate over pending nodes in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_height_order() {
        let mut heap = Heap::new();
        let (a, b, c) = (NodeId::new(), NodeId::new(), NodeId::new());

        heap.insert(c, 3);
        heap.insert(a, 1);
        heap.insert(b, 2);

        assert_eq!(heap.range(), Some((1, 3)));
        assert_eq!(heap.pop_min(), Some(a));
        assert_eq!(heap.pop_min(), Some(b));
        assert_eq!(heap.pop_min(), Some(c));
        assert_eq!(heap.pop_min(), None);
        assert!(heap.is_empty());
    }

    #[test]
    fn same_height_is_fifo() {
        let mut heap = Heap::new();
        let first = NodeId::new();
        let second = NodeId::new();

        heap.insert(first, 2);
        heap.insert(second, 2);

        assert_eq!(heap.pop_min(), Some(first));
        assert_eq!(heap.pop_min(), Some(second));
    }

    #[test]
    fn reinsert_moves_between_buckets() {
        let mut heap = Heap::new();
        let node = NodeId::new();

        heap.insert(node, 1);
        heap.insert(node, 1);
        assert_eq!(heap.len(), 1);

        heap.insert(node, 5);
        assert_eq!(heap.len(), 1);
        assert_eq!(heap.height_of(node), Some(5));
    }

    #[test]
    fn removing_absent_node_is_a_noop() {
        let mut heap = Heap::new();
        assert!(!heap.remove(NodeId::new()));

        let node = NodeId::new();
        heap.insert(node, 0);
        assert!(heap.remove(node));
        assert!(!heap.remove(node));
        assert_eq!(heap.pop_min(), None);
    }

    #[test]
    fn insertions_during_drain_are_visited() {
        let mut heap = Heap::new();
        let low = NodeId::new();
        let high = NodeId::new();
        let late_low = NodeId::new();
        let late_high = NodeId::new();

        heap.insert(high, 4);
        heap.insert(low, 1);

        let mut order = Vec::new();
        while let Some(node) = heap.pop_min() {
            order.push(node);
            if node == low {
                // Work discovered mid-drain, below and above the cursor.
                heap.insert(late_high, 9);
                heap.insert(late_low, 0);
            }
        }

        assert_eq!(order, vec![low, late_low, high, late_high]);
    }

    #[test]
    fn grows_for_tall_nodes() {
        let mut heap = Heap::new();
        let node = NodeId::new();
        heap.insert(node, 128);
        assert!(heap.contains(node));
        assert_eq!(heap.pop_min(), Some(node));
    }
}
