//! Tree sequences: the ordered genealogies produced by a simulation
//!
//! A tree sequence is the set of coalescence records emitted by one replicate,
//! sorted by `(time, left)` and indexed by two permutations (insertion order
//! along the genome and removal order) so that walking the genome updates the
//! current tree in amortised constant time per record.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One parent/children relation valid over a genomic interval
///
/// On `[left, right)`, `parent` is the immediate ancestor of each node in
/// `children`; `time` is the parent's birth time and `population` where the
/// coalescence happened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoalescenceRecord {
    /// Left end of the interval (inclusive)
    pub left: f64,
    /// Right end of the interval (exclusive)
    pub right: f64,
    /// Parent node id
    pub parent: u32,
    /// Child node ids, sorted ascending, at least two
    pub children: Vec<u32>,
    /// Time of the coalescence in generations
    pub time: f64,
    /// Population the coalescence happened in
    pub population: u32,
}

/// An error raised while assembling a tree sequence from records
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeSequenceError {
    /// A finished replicate always emits at least one record
    #[error("tree sequence must contain at least one record")]
    NoRecords,
    /// Record intervals must be non-empty and inside the genome
    #[error("record {index} has an empty or out-of-bounds interval")]
    BadInterval {
        /// Index of the offending record (after sorting)
        index: usize,
    },
    /// Children must be sorted, distinct, and at least two
    #[error("record {index} has fewer than two children or an unsorted child list")]
    BadChildren {
        /// Index of the offending record (after sorting)
        index: usize,
    },
    /// Every node a record names must exist in the node table
    #[error("record {index} references node {node} outside the node table")]
    UnknownNode {
        /// Index of the offending record (after sorting)
        index: usize,
        /// The missing node
        node: u32,
    },
    /// Parents must be strictly older than their children
    #[error("record {index} has a parent no older than one of its children")]
    TimeOrder {
        /// Index of the offending record (after sorting)
        index: usize,
    },
}

/// A finished, indexed tree sequence
#[derive(Clone, Debug)]
pub struct TreeSequence {
    sample_size: u32,
    sequence_length: f64,
    node_time: Vec<f64>,
    node_population: Vec<u32>,
    records: Vec<CoalescenceRecord>,
    /// Record indices sorted by (left, time): order of entry walking rightward
    insertion_order: Vec<u32>,
    /// Record indices sorted by (right, time): order of exit walking rightward
    removal_order: Vec<u32>,
}

impl TreeSequence {
    /// Assemble a tree sequence from a replicate's outputs
    ///
    /// Records may arrive in any order; they are sorted by `(time, left)` and
    /// validated against the node table.
    pub fn new(
        sample_size: u32,
        sequence_length: f64,
        node_time: Vec<f64>,
        node_population: Vec<u32>,
        mut records: Vec<CoalescenceRecord>,
    ) -> Result<Self, TreeSequenceError> {
        if records.is_empty() {
            return Err(TreeSequenceError::NoRecords);
        }
        records.sort_by(|a, b| a.time.total_cmp(&b.time).then(a.left.total_cmp(&b.left)));

        let num_nodes = node_time.len() as u32;
        for (index, record) in records.iter().enumerate() {
            if !(record.left < record.right)
                || record.left < 0.0
                || record.right > sequence_length
            {
                return Err(TreeSequenceError::BadInterval { index });
            }
            if record.children.len() < 2
                || record.children.windows(2).any(|pair| pair[0] >= pair[1])
            {
                return Err(TreeSequenceError::BadChildren { index });
            }
            if record.parent >= num_nodes {
                return Err(TreeSequenceError::UnknownNode {
                    index,
                    node: record.parent,
                });
            }
            for child in &record.children {
                if *child >= num_nodes {
                    return Err(TreeSequenceError::UnknownNode {
                        index,
                        node: *child,
                    });
                }
                if node_time[*child as usize] >= node_time[record.parent as usize] {
                    return Err(TreeSequenceError::TimeOrder { index });
                }
            }
        }

        let mut insertion_order: Vec<u32> = (0..records.len() as u32).collect();
        insertion_order.sort_by(|a, b| {
            let (ra, rb) = (&records[*a as usize], &records[*b as usize]);
            ra.left.total_cmp(&rb.left).then(ra.time.total_cmp(&rb.time))
        });
        let mut removal_order: Vec<u32> = (0..records.len() as u32).collect();
        removal_order.sort_by(|a, b| {
            let (ra, rb) = (&records[*a as usize], &records[*b as usize]);
            ra.right
                .total_cmp(&rb.right)
                .then(ra.time.total_cmp(&rb.time))
        });

        Ok(Self {
            sample_size,
            sequence_length,
            node_time,
            node_population,
            records,
            insertion_order,
            removal_order,
        })
    }

    /// Number of sampled chromosomes (the leaves `0..sample_size`)
    pub fn sample_size(&self) -> u32 {
        self.sample_size
    }

    /// Physical length of the genome the sequence covers
    pub fn sequence_length(&self) -> f64 {
        self.sequence_length
    }

    /// Number of genealogy nodes, leaves included
    pub fn num_nodes(&self) -> usize {
        self.node_time.len()
    }

    /// Number of coalescence records
    pub fn num_records(&self) -> usize {
        self.records.len()
    }

    /// The records, sorted by `(time, left)`
    pub fn records(&self) -> &[CoalescenceRecord] {
        &self.records
    }

    /// Birth time of `node` in generations
    pub fn node_time(&self, node: u32) -> f64 {
        self.node_time[node as usize]
    }

    /// Population `node` was born in
    pub fn node_population(&self, node: u32) -> u32 {
        self.node_population[node as usize]
    }

    /// Distinct interior record boundaries: the recombination breakpoints that
    /// survived to affect the genealogy, sorted ascending
    pub fn breakpoints(&self) -> Vec<f64> {
        let mut positions: Vec<f64> = self
            .records
            .iter()
            .map(|r| r.left)
            .filter(|left| *left > 0.0)
            .collect();
        positions.sort_by(|a, b| a.total_cmp(b));
        positions.dedup();
        positions
    }

    /// Cursor over `(interval, tree)` pairs, leftmost tree first
    pub fn trees(&self) -> TreeCursor<'_> {
        TreeCursor {
            ts: self,
            parent: vec![None; self.num_nodes()],
            insert_ptr: 0,
            remove_ptr: 0,
            position: 0.0,
            direction: Direction::Forward,
            done: false,
        }
    }

    /// Cursor over `(interval, tree)` pairs, rightmost tree first
    pub fn trees_reversed(&self) -> TreeCursor<'_> {
        TreeCursor {
            ts: self,
            parent: vec![None; self.num_nodes()],
            insert_ptr: 0,
            remove_ptr: 0,
            position: self.sequence_length,
            direction: Direction::Reverse,
            done: false,
        }
    }
}

/// Direction a [`TreeCursor`] walks the genome in
#[derive(Clone, Copy, Debug, PartialEq)]
enum Direction {
    Forward,
    Reverse,
}

/// Streaming cursor over the trees of a sequence
///
/// Yields borrowed [`TreeView`]s, so each view must be dropped before the next
/// call to [`TreeCursor::next_tree`].
#[derive(Debug)]
pub struct TreeCursor<'a> {
    ts: &'a TreeSequence,
    parent: Vec<Option<u32>>,
    /// Records entered so far (meaning depends on direction)
    insert_ptr: usize,
    /// Records exited so far (meaning depends on direction)
    remove_ptr: usize,
    position: f64,
    direction: Direction,
    done: bool,
}

impl TreeCursor<'_> {
    /// Advance to the next tree, or `None` past the end of the genome
    pub fn next_tree(&mut self) -> Option<TreeView<'_>> {
        if self.done {
            return None;
        }
        match self.direction {
            Direction::Forward => self.advance_forward(),
            Direction::Reverse => self.advance_reverse(),
        }
    }

    fn record(&self, index: u32) -> &CoalescenceRecord {
        &self.ts.records[index as usize]
    }

    fn enter(&mut self, index: u32) {
        let record = &self.ts.records[index as usize];
        for child in &record.children {
            self.parent[*child as usize] = Some(record.parent);
        }
    }

    fn exit(&mut self, index: u32) {
        let record = &self.ts.records[index as usize];
        for child in &record.children {
            self.parent[*child as usize] = None;
        }
    }

    fn advance_forward(&mut self) -> Option<TreeView<'_>> {
        let num_records = self.ts.records.len();
        let left = self.position;

        while self.remove_ptr < num_records
            && self.record(self.ts.removal_order[self.remove_ptr]).right == left
        {
            let index = self.ts.removal_order[self.remove_ptr];
            self.exit(index);
            self.remove_ptr += 1;
        }
        while self.insert_ptr < num_records
            && self.record(self.ts.insertion_order[self.insert_ptr]).left == left
        {
            let index = self.ts.insertion_order[self.insert_ptr];
            self.enter(index);
            self.insert_ptr += 1;
        }

        let mut right = self.ts.sequence_length;
        if self.insert_ptr < num_records {
            right = right.min(self.record(self.ts.insertion_order[self.insert_ptr]).left);
        }
        if self.remove_ptr < num_records {
            right = right.min(self.record(self.ts.removal_order[self.remove_ptr]).right);
        }

        self.position = right;
        if right >= self.ts.sequence_length {
            self.done = true;
        }
        Some(TreeView {
            ts: self.ts,
            left,
            right,
            parent: &self.parent,
        })
    }

    fn advance_reverse(&mut self) -> Option<TreeView<'_>> {
        let num_records = self.ts.records.len();
        let right = self.position;

        // Walking leftward, records are exited in descending left order as the
        // cursor moves past their left edge, and entered in descending right
        // order as it reaches their right edge
        while self.remove_ptr < num_records {
            let index = self.ts.insertion_order[num_records - 1 - self.remove_ptr];
            if self.record(index).left == right {
                self.exit(index);
                self.remove_ptr += 1;
            } else {
                break;
            }
        }
        while self.insert_ptr < num_records {
            let index = self.ts.removal_order[num_records - 1 - self.insert_ptr];
            if self.record(index).right == right {
                self.enter(index);
                self.insert_ptr += 1;
            } else {
                break;
            }
        }

        let mut left: f64 = 0.0;
        if self.insert_ptr < num_records {
            left = left.max(
                self.record(self.ts.removal_order[num_records - 1 - self.insert_ptr])
                    .right,
            );
        }
        if self.remove_ptr < num_records {
            left = left.max(
                self.record(self.ts.insertion_order[num_records - 1 - self.remove_ptr])
                    .left,
            );
        }

        self.position = left;
        if left <= 0.0 {
            self.done = true;
        }
        Some(TreeView {
            ts: self.ts,
            left,
            right,
            parent: &self.parent,
        })
    }
}

/// One tree of the sequence: a parent array over an interval
#[derive(Debug)]
pub struct TreeView<'a> {
    ts: &'a TreeSequence,
    left: f64,
    right: f64,
    parent: &'a [Option<u32>],
}

impl TreeView<'_> {
    /// Genomic interval this tree applies to
    pub fn interval(&self) -> (f64, f64) {
        (self.left, self.right)
    }

    /// Width of the interval
    pub fn span(&self) -> f64 {
        self.right - self.left
    }

    /// Parent of `node`, `None` at a root
    pub fn parent(&self, node: u32) -> Option<u32> {
        self.parent[node as usize]
    }

    /// The full parent array, indexed by node id
    pub fn parent_array(&self) -> &[Option<u32>] {
        self.parent
    }

    /// Number of entries in the parent array
    pub fn num_nodes(&self) -> usize {
        self.parent.len()
    }

    /// Birth time of `node`
    pub fn time(&self, node: u32) -> f64 {
        self.ts.node_time(node)
    }

    /// Root above `node`
    pub fn root_of(&self, node: u32) -> u32 {
        let mut current = node;
        while let Some(parent) = self.parent[current as usize] {
            current = parent;
        }
        current
    }

    /// Root of the tree containing sample 0
    pub fn root(&self) -> u32 {
        self.root_of(0)
    }

    /// Sum of branch lengths over every node with a parent
    pub fn total_branch_length(&self) -> f64 {
        self.parent
            .iter()
            .enumerate()
            .filter_map(|(node, parent)| {
                parent.map(|p| self.ts.node_time(p) - self.ts.node_time(node as u32))
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::{CoalescenceRecord, TreeSequence, TreeSequenceError};

    fn record(left: f64, right: f64, parent: u32, children: [u32; 2], time: f64) -> CoalescenceRecord {
        CoalescenceRecord {
            left,
            right,
            parent,
            children: children.to_vec(),
            time,
            population: 0,
        }
    }

    /// Two samples over [0, 10) with one surviving breakpoint at 5
    fn two_tree_sequence() -> TreeSequence {
        TreeSequence::new(
            2,
            10.0,
            vec![0.0, 0.0, 1.0, 2.5],
            vec![0, 0, 0, 0],
            vec![
                record(5.0, 10.0, 3, [0, 1], 2.5),
                record(0.0, 5.0, 2, [0, 1], 1.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn records_are_sorted_by_time_then_left() {
        let ts = two_tree_sequence();
        let times: Vec<f64> = ts.records().iter().map(|r| r.time).collect();
        assert_eq!(times, vec![1.0, 2.5]);
        assert_eq!(ts.num_records(), 2);
        assert_eq!(ts.num_nodes(), 4);
    }

    #[test]
    fn forward_iteration_tiles_the_genome() {
        let ts = two_tree_sequence();
        let mut cursor = ts.trees();

        let tree = cursor.next_tree().unwrap();
        assert_eq!(tree.interval(), (0.0, 5.0));
        assert_eq!(tree.parent(0), Some(2));
        assert_eq!(tree.parent(1), Some(2));
        assert_eq!(tree.parent(2), None);
        assert_eq!(tree.root(), 2);
        assert!((tree.total_branch_length() - 2.0).abs() < 1e-12);

        let tree = cursor.next_tree().unwrap();
        assert_eq!(tree.interval(), (5.0, 10.0));
        assert_eq!(tree.root(), 3);
        assert!((tree.total_branch_length() - 5.0).abs() < 1e-12);

        assert!(cursor.next_tree().is_none());
    }

    #[test]
    fn reverse_iteration_visits_trees_right_to_left() {
        let ts = two_tree_sequence();
        let mut cursor = ts.trees_reversed();

        let tree = cursor.next_tree().unwrap();
        assert_eq!(tree.interval(), (5.0, 10.0));
        assert_eq!(tree.root(), 3);

        let tree = cursor.next_tree().unwrap();
        assert_eq!(tree.interval(), (0.0, 5.0));
        assert_eq!(tree.root(), 2);
        assert_eq!(tree.parent(0), Some(2));

        assert!(cursor.next_tree().is_none());
    }

    #[test]
    fn breakpoints_are_interior_distinct_lefts() {
        let ts = two_tree_sequence();
        assert_eq!(ts.breakpoints(), vec![5.0]);
    }

    #[test]
    fn rejects_malformed_records() {
        let nodes = (vec![0.0, 0.0, 1.0], vec![0, 0, 0]);

        let empty: Vec<CoalescenceRecord> = Vec::new();
        assert_eq!(
            TreeSequence::new(2, 1.0, nodes.0.clone(), nodes.1.clone(), empty).unwrap_err(),
            TreeSequenceError::NoRecords
        );

        let inverted = vec![record(0.8, 0.2, 2, [0, 1], 1.0)];
        assert_eq!(
            TreeSequence::new(2, 1.0, nodes.0.clone(), nodes.1.clone(), inverted).unwrap_err(),
            TreeSequenceError::BadInterval { index: 0 }
        );

        let unsorted_children = vec![CoalescenceRecord {
            left: 0.0,
            right: 1.0,
            parent: 2,
            children: vec![1, 0],
            time: 1.0,
            population: 0,
        }];
        assert_eq!(
            TreeSequence::new(2, 1.0, nodes.0.clone(), nodes.1.clone(), unsorted_children)
                .unwrap_err(),
            TreeSequenceError::BadChildren { index: 0 }
        );

        let bad_node = vec![record(0.0, 1.0, 9, [0, 1], 1.0)];
        assert_eq!(
            TreeSequence::new(2, 1.0, nodes.0.clone(), nodes.1.clone(), bad_node).unwrap_err(),
            TreeSequenceError::UnknownNode { index: 0, node: 9 }
        );

        let time_inverted = vec![record(0.0, 1.0, 2, [0, 1], 1.0)];
        let result = TreeSequence::new(2, 1.0, vec![0.0, 5.0, 1.0], vec![0, 0, 0], time_inverted);
        assert_eq!(result.unwrap_err(), TreeSequenceError::TimeOrder { index: 0 });
    }

    #[test]
    fn shared_breakpoint_swaps_parents_cleanly() {
        // Three samples, one breakpoint, where only part of the tree changes
        let ts = TreeSequence::new(
            3,
            4.0,
            vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0],
            vec![0; 6],
            vec![
                record(0.0, 4.0, 3, [0, 1], 1.0),
                record(0.0, 2.0, 4, [2, 3], 2.0),
                record(2.0, 4.0, 5, [2, 3], 3.0),
            ],
        )
        .unwrap();

        let mut cursor = ts.trees();
        let tree = cursor.next_tree().unwrap();
        assert_eq!(tree.interval(), (0.0, 2.0));
        assert_eq!(tree.parent(3), Some(4));
        assert_eq!(tree.root(), 4);

        let tree = cursor.next_tree().unwrap();
        assert_eq!(tree.interval(), (2.0, 4.0));
        assert_eq!(tree.parent(3), Some(5));
        assert_eq!(tree.parent(0), Some(3));
        assert_eq!(tree.root(), 5);
        assert!(cursor.next_tree().is_none());
    }
}
