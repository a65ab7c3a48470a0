//! Balanced index of the lineages resident in one population
//!
//! Each population keeps its extant lineages in an AVL tree keyed by the head
//! segment's left endpoint (with the lineage id as tiebreaker, so the order is
//! total). Subtree sizes make rank selection O(log n), which is how "draw a
//! lineage uniformly at random" stays deterministic given the PRNG state.

use std::cmp::Ordering;

use crate::sim::heap::ObjectHeap;

/// Key identifying one lineage inside a population index
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct LineageKey {
    /// Left endpoint of the lineage's head segment
    pub position: f64,
    /// Stable lineage id, also the lineage's Fenwick index
    pub lineage: u32,
}

impl PartialEq for LineageKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LineageKey {}

impl PartialOrd for LineageKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LineageKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.position
            .total_cmp(&other.position)
            .then_with(|| self.lineage.cmp(&other.lineage))
    }
}

/// One node of the balanced index, stored in a slot arena
#[derive(Clone, Copy, Debug, Default)]
struct AvlNode {
    key: LineageKey,
    left: Option<u32>,
    right: Option<u32>,
    height: i32,
    /// Subtree size including this node, for rank selection
    size: u32,
}

/// Arena-backed AVL tree with order statistics
#[derive(Debug)]
pub(crate) struct AvlTree {
    heap: ObjectHeap<AvlNode>,
    root: Option<u32>,
}

impl AvlTree {
    /// Create an empty index
    pub fn new() -> Self {
        Self {
            heap: ObjectHeap::new(16, None),
            root: None,
        }
    }

    /// Number of lineages in the index
    pub fn len(&self) -> usize {
        self.size_of(self.root) as usize
    }

    /// Whether the index holds no lineages
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Insert `key`, which must not already be present
    pub fn insert(&mut self, key: LineageKey) {
        self.root = Some(self.insert_at(self.root, key));
    }

    /// Remove `key`, which must be present
    pub fn remove(&mut self, key: &LineageKey) {
        self.root = self.remove_at(self.root, key);
    }

    /// The `rank`-th key in ascending order, `rank` in `0..len()`
    pub fn select(&self, rank: usize) -> LineageKey {
        assert!(rank < self.len(), "rank out of range");
        let mut current = self.root;
        let mut rank = rank;
        loop {
            let node = self.heap.get(current.expect("rank within a valid subtree"));
            let left_size = self.size_of(node.left) as usize;
            match rank.cmp(&left_size) {
                Ordering::Less => current = node.left,
                Ordering::Equal => return node.key,
                Ordering::Greater => {
                    rank -= left_size + 1;
                    current = node.right;
                }
            }
        }
    }

    /// In-order (ascending) iteration over the stored keys
    pub fn iter(&self) -> InOrderIter<'_> {
        let mut iter = InOrderIter {
            tree: self,
            stack: Vec::new(),
        };
        iter.push_leftmost(self.root);
        iter
    }

    fn size_of(&self, node: Option<u32>) -> u32 {
        node.map_or(0, |n| self.heap.get(n).size)
    }

    fn height_of(&self, node: Option<u32>) -> i32 {
        node.map_or(0, |n| self.heap.get(n).height)
    }

    fn refresh(&mut self, node: u32) {
        let (left, right) = {
            let n = self.heap.get(node);
            (n.left, n.right)
        };
        let height = 1 + self.height_of(left).max(self.height_of(right));
        let size = 1 + self.size_of(left) + self.size_of(right);
        let n = self.heap.get_mut(node);
        n.height = height;
        n.size = size;
    }

    fn balance_factor(&self, node: u32) -> i32 {
        let n = self.heap.get(node);
        self.height_of(n.left) - self.height_of(n.right)
    }

    fn rotate_right(&mut self, node: u32) -> u32 {
        let pivot = self.heap.get(node).left.expect("left-heavy rotation");
        let moved = self.heap.get(pivot).right;
        self.heap.get_mut(node).left = moved;
        self.heap.get_mut(pivot).right = Some(node);
        self.refresh(node);
        self.refresh(pivot);
        pivot
    }

    fn rotate_left(&mut self, node: u32) -> u32 {
        let pivot = self.heap.get(node).right.expect("right-heavy rotation");
        let moved = self.heap.get(pivot).left;
        self.heap.get_mut(node).right = moved;
        self.heap.get_mut(pivot).left = Some(node);
        self.refresh(node);
        self.refresh(pivot);
        pivot
    }

    fn rebalance(&mut self, node: u32) -> u32 {
        self.refresh(node);
        let factor = self.balance_factor(node);
        if factor > 1 {
            let left = self.heap.get(node).left.expect("left-heavy subtree");
            if self.balance_factor(left) < 0 {
                let rotated = self.rotate_left(left);
                self.heap.get_mut(node).left = Some(rotated);
            }
            self.rotate_right(node)
        } else if factor < -1 {
            let right = self.heap.get(node).right.expect("right-heavy subtree");
            if self.balance_factor(right) > 0 {
                let rotated = self.rotate_right(right);
                self.heap.get_mut(node).right = Some(rotated);
            }
            self.rotate_left(node)
        } else {
            node
        }
    }

    fn insert_at(&mut self, node: Option<u32>, key: LineageKey) -> u32 {
        let node = match node {
            None => {
                return self
                    .heap
                    .alloc(AvlNode {
                        key,
                        left: None,
                        right: None,
                        height: 1,
                        size: 1,
                    })
                    .expect("uncapped index arena");
            }
            Some(node) => node,
        };

        match key.cmp(&self.heap.get(node).key) {
            Ordering::Less => {
                let child = self.insert_at(self.heap.get(node).left, key);
                self.heap.get_mut(node).left = Some(child);
            }
            Ordering::Greater => {
                let child = self.insert_at(self.heap.get(node).right, key);
                self.heap.get_mut(node).right = Some(child);
            }
            Ordering::Equal => panic!("duplicate lineage key in population index"),
        }
        self.rebalance(node)
    }

    fn remove_at(&mut self, node: Option<u32>, key: &LineageKey) -> Option<u32> {
        let node = node.expect("removing a lineage that is not in the index");
        let node_key = self.heap.get(node).key;
        match key.cmp(&node_key) {
            Ordering::Less => {
                let child = self.remove_at(self.heap.get(node).left, key);
                self.heap.get_mut(node).left = child;
                Some(self.rebalance(node))
            }
            Ordering::Greater => {
                let child = self.remove_at(self.heap.get(node).right, key);
                self.heap.get_mut(node).right = child;
                Some(self.rebalance(node))
            }
            Ordering::Equal => {
                let (left, right) = {
                    let n = self.heap.get(node);
                    (n.left, n.right)
                };
                match (left, right) {
                    (None, None) => {
                        self.heap.free(node);
                        None
                    }
                    (Some(only), None) | (None, Some(only)) => {
                        self.heap.free(node);
                        Some(only)
                    }
                    (Some(_), Some(right)) => {
                        // Splice the in-order successor into this node
                        let (new_right, successor) = self.take_min(right);
                        {
                            let n = self.heap.get_mut(node);
                            n.key = successor;
                            n.right = new_right;
                        }
                        Some(self.rebalance(node))
                    }
                }
            }
        }
    }

    fn take_min(&mut self, node: u32) -> (Option<u32>, LineageKey) {
        match self.heap.get(node).left {
            None => {
                let n = *self.heap.get(node);
                self.heap.free(node);
                (n.right, n.key)
            }
            Some(left) => {
                let (new_left, key) = self.take_min(left);
                self.heap.get_mut(node).left = new_left;
                (Some(self.rebalance(node)), key)
            }
        }
    }
}

/// Ascending iterator over an `AvlTree`
pub(crate) struct InOrderIter<'a> {
    tree: &'a AvlTree,
    stack: Vec<u32>,
}

impl InOrderIter<'_> {
    fn push_leftmost(&mut self, mut node: Option<u32>) {
        while let Some(n) = node {
            self.stack.push(n);
            node = self.tree.heap.get(n).left;
        }
    }
}

impl Iterator for InOrderIter<'_> {
    type Item = LineageKey;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        let n = self.tree.heap.get(node);
        self.push_leftmost(n.right);
        Some(n.key)
    }
}

#[cfg(test)]
mod tests {
    use rand::prelude::SliceRandom;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    use super::{AvlTree, LineageKey};

    fn key(position: f64, lineage: u32) -> LineageKey {
        LineageKey { position, lineage }
    }

    #[test]
    fn keeps_keys_ordered_and_selectable() {
        let mut rng = Pcg64::seed_from_u64(3);
        let mut keys: Vec<LineageKey> = (0..200).map(|i| key(f64::from(i % 17), i)).collect();
        keys.shuffle(&mut rng);

        let mut tree = AvlTree::new();
        for k in &keys {
            tree.insert(*k);
        }
        assert_eq!(tree.len(), keys.len());

        let mut sorted = keys.clone();
        sorted.sort();
        let in_order: Vec<_> = tree.iter().collect();
        assert_eq!(in_order, sorted);
        for (rank, expected) in sorted.iter().enumerate() {
            assert_eq!(tree.select(rank), *expected);
        }
    }

    #[test]
    fn removal_preserves_order_and_ranks() {
        let mut rng = Pcg64::seed_from_u64(5);
        let mut keys: Vec<LineageKey> = (0..128).map(|i| key((i as f64) * 0.25, i)).collect();
        keys.shuffle(&mut rng);

        let mut tree = AvlTree::new();
        for k in &keys {
            tree.insert(*k);
        }

        let (removed, kept) = keys.split_at(64);
        for k in removed {
            tree.remove(k);
        }
        assert_eq!(tree.len(), kept.len());

        let mut sorted = kept.to_vec();
        sorted.sort();
        let in_order: Vec<_> = tree.iter().collect();
        assert_eq!(in_order, sorted);
        for (rank, expected) in sorted.iter().enumerate() {
            assert_eq!(tree.select(rank), *expected);
        }
    }

    #[test]
    fn duplicate_positions_order_by_lineage_id() {
        let mut tree = AvlTree::new();
        tree.insert(key(0.0, 5));
        tree.insert(key(0.0, 1));
        tree.insert(key(0.0, 3));

        let order: Vec<u32> = tree.iter().map(|k| k.lineage).collect();
        assert_eq!(order, vec![1, 3, 5]);
        assert_eq!(tree.select(0).lineage, 1);
        assert_eq!(tree.select(2).lineage, 5);
    }

    #[test]
    #[should_panic(expected = "not in the index")]
    fn removing_a_missing_key_is_fatal() {
        let mut tree = AvlTree::new();
        tree.insert(key(1.0, 0));
        tree.remove(&key(2.0, 1));
    }
}
