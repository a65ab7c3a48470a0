//! Summarizing operations for finished tree sequences

use crate::treeseq::TreeSequence;

/// Number of distinct trees along the genome
pub fn num_trees(ts: &TreeSequence) -> usize {
    let mut count = 0;
    let mut cursor = ts.trees();
    while cursor.next_tree().is_some() {
        count += 1;
    }
    count
}

/// Number of coalescence records in the sequence
pub fn num_records(ts: &TreeSequence) -> usize {
    ts.num_records()
}

/// Number of genealogy nodes, leaves included
pub fn num_nodes(ts: &TreeSequence) -> usize {
    ts.num_nodes()
}

/// Number of distinct recombination breakpoints that survived into the genealogy
pub fn num_breakpoints(ts: &TreeSequence) -> usize {
    ts.breakpoints().len()
}

/// Oldest root time anywhere on the genome
///
/// For a sequence without recombination this is the TMRCA of the sample.
pub fn max_root_time(ts: &TreeSequence) -> f64 {
    let mut max = 0.0f64;
    let mut cursor = ts.trees();
    while let Some(tree) = cursor.next_tree() {
        max = max.max(tree.time(tree.root()));
    }
    max
}

/// Mean root time over the distinct trees, each tree counted once
pub fn mean_root_time(ts: &TreeSequence) -> f64 {
    let mut sum = 0.0;
    let mut count = 0;
    let mut cursor = ts.trees();
    while let Some(tree) = cursor.next_tree() {
        sum += tree.time(tree.root());
        count += 1;
    }
    sum / count as f64
}

/// Genome-integrated total branch length: the sum over trees of the tree's
/// branch length total weighted by the interval it spans
///
/// Multiplying by a per-base per-generation mutation rate gives the expected
/// number of infinite-sites mutations.
pub fn total_branch_length(ts: &TreeSequence) -> f64 {
    let mut sum = 0.0;
    let mut cursor = ts.trees();
    while let Some(tree) = cursor.next_tree() {
        sum += tree.span() * tree.total_branch_length();
    }
    sum
}

#[cfg(test)]
mod tests {
    use crate::treeseq::{CoalescenceRecord, TreeSequence};

    use super::{
        max_root_time, mean_root_time, num_breakpoints, num_trees, total_branch_length,
    };

    fn sequence() -> TreeSequence {
        let record = |left: f64, right: f64, parent: u32, time: f64| CoalescenceRecord {
            left,
            right,
            parent,
            children: vec![0, 1],
            time,
            population: 0,
        };
        TreeSequence::new(
            2,
            10.0,
            vec![0.0, 0.0, 1.0, 4.0],
            vec![0; 4],
            vec![record(0.0, 5.0, 2, 1.0), record(5.0, 10.0, 3, 4.0)],
        )
        .unwrap()
    }

    #[test]
    fn counts_and_roots() {
        let ts = sequence();
        assert_eq!(num_trees(&ts), 2);
        assert_eq!(num_breakpoints(&ts), 1);
        assert!((max_root_time(&ts) - 4.0).abs() < 1e-12);
        assert!((mean_root_time(&ts) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn branch_length_integrates_over_spans() {
        let ts = sequence();
        // First tree: span 5, branch total 2; second: span 5, branch total 8
        assert!((total_branch_length(&ts) - (5.0 * 2.0 + 5.0 * 8.0)).abs() < 1e-12);
    }
}
