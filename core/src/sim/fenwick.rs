//! Binary indexed tree over per-lineage recombination weights
//!
//! Supports point update, prefix sum and find-by-prefix in O(log n), which is
//! what turns a uniform draw over the total recombinable length into the
//! lineage that recombines.

/// 1-indexed Fenwick tree over `f64` weights
///
/// Stored weights are kept in a sidecar array so that growing the index space
/// preserves every weight bit-exactly.
#[derive(Debug, Clone)]
pub(crate) struct FenwickTree {
    /// Partial sums, `tree[0]` unused
    tree: Vec<f64>,
    /// Raw weight per index, `values[0]` unused
    values: Vec<f64>,
}

/// Least significant set bit of `n`
fn lsb(n: usize) -> usize {
    n & n.wrapping_neg()
}

impl FenwickTree {
    /// Create a tree over indices `1..=len`, all weights zero
    pub fn new(len: usize) -> Self {
        Self {
            tree: vec![0.0; len + 1],
            values: vec![0.0; len + 1],
        }
    }

    /// Largest valid index
    pub fn len(&self) -> usize {
        self.tree.len() - 1
    }

    /// Grow the index space to at least `new_len`, preserving stored weights
    ///
    /// Doubles rather than creeping so repeated lineage creation stays amortised
    /// O(log n) per call.
    pub fn grow(&mut self, new_len: usize) {
        if new_len <= self.len() {
            return;
        }
        let new_len = new_len.max(self.len() * 2);

        self.values.resize(new_len + 1, 0.0);
        self.tree = vec![0.0; new_len + 1];
        // Linear-time rebuild: seed with the raw values, then push each node's
        // total into its parent
        self.tree[1..].copy_from_slice(&self.values[1..]);
        for index in 1..self.tree.len() {
            let parent = index + lsb(index);
            if parent < self.tree.len() {
                self.tree[parent] += self.tree[index];
            }
        }
    }

    /// Raw weight stored at `index`
    pub fn value(&self, index: usize) -> f64 {
        self.values[index]
    }

    /// Set the weight at `index` to exactly `weight`
    pub fn set(&mut self, index: usize, weight: f64) {
        assert!(index >= 1 && index <= self.len());
        let delta = weight - self.values[index];
        self.values[index] = weight;
        self.add_to_tree(index, delta);
    }

    /// Add `delta` to the weight at `index`
    pub fn increment(&mut self, index: usize, delta: f64) {
        assert!(index >= 1 && index <= self.len());
        self.values[index] += delta;
        self.add_to_tree(index, delta);
    }

    fn add_to_tree(&mut self, index: usize, delta: f64) {
        let mut index = index;
        while index <= self.len() {
            self.tree[index] += delta;
            index += lsb(index);
        }
    }

    /// Sum of the weights at `1..=index`
    pub fn prefix_sum(&self, index: usize) -> f64 {
        assert!(index <= self.len());
        let mut sum = 0.0;
        let mut index = index;
        while index > 0 {
            sum += self.tree[index];
            index -= lsb(index);
        }
        sum
    }

    /// Sum of all weights
    pub fn total(&self) -> f64 {
        self.prefix_sum(self.len())
    }

    /// Smallest `index` such that `prefix_sum(index) >= target`
    ///
    /// Ties break to the smallest index, which keeps replicate streams
    /// reproducible. `target` must not exceed `total()`.
    pub fn find(&self, target: f64) -> usize {
        let mut index = 0;
        let mut remaining = target;
        let mut step = self.len().next_power_of_two();
        while step > 0 {
            let probe = index + step;
            if probe <= self.len() && self.tree[probe] < remaining {
                index = probe;
                remaining -= self.tree[probe];
            }
            step >>= 1;
        }
        index + 1
    }
}
