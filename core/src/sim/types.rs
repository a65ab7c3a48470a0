//! Containers for the engine's mutable state
//!
//! Segments live in a slot arena and are doubly linked into lineages; lineage
//! ids are recycled through a LIFO freelist so the Fenwick index stays compact
//! and replicate streams stay reproducible.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::sim::avl::AvlTree;
use crate::sim::heap::ObjectHeap;

/// One maximal contiguous interval of genome carried by a lineage
///
/// Within a lineage, segments are non-overlapping and sorted ascending;
/// `prev == None` marks the head.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct Segment {
    /// Left endpoint (inclusive)
    pub left: f64,
    /// Right endpoint (exclusive)
    pub right: f64,
    /// Most recent genealogy node carrying this material
    pub node: u32,
    /// Population the owning lineage currently resides in
    pub population: u32,
    /// Previous segment in the lineage, `None` at the head
    pub prev: Option<u32>,
    /// Next segment in the lineage, `None` at the tail
    pub next: Option<u32>,
}

/// Slot arena holding every live segment
pub(crate) type SegmentArena = ObjectHeap<Segment>;

/// Lineage id registry: head slot per id, with LIFO id recycling
///
/// The id doubles as the lineage's Fenwick index (offset by one), so reuse
/// must be deterministic: released ids are handed back newest-first over a
/// monotone high-water mark.
#[derive(Debug, Default)]
pub(crate) struct LineageTable {
    heads: Vec<Option<u32>>,
    freelist: Vec<u32>,
}

impl LineageTable {
    /// Allocate a lineage id with no head yet
    pub fn alloc(&mut self) -> u32 {
        match self.freelist.pop() {
            Some(id) => id,
            None => {
                let id = self.heads.len() as u32;
                self.heads.push(None);
                id
            }
        }
    }

    /// Release `id` for reuse
    pub fn free(&mut self, id: u32) {
        self.heads[id as usize] = None;
        self.freelist.push(id);
    }

    /// Head segment slot of lineage `id`
    pub fn head(&self, id: u32) -> u32 {
        self.heads[id as usize].expect("lineage has a head segment")
    }

    /// Point lineage `id` at a new head segment
    pub fn set_head(&mut self, id: u32, head: u32) {
        self.heads[id as usize] = Some(head);
    }

    /// High-water mark of ids ever allocated; sizes the Fenwick index
    pub fn high_water(&self) -> usize {
        self.heads.len()
    }
}

/// State of one population during a replicate
#[derive(Debug)]
pub(crate) struct PopulationState {
    /// Size at `start_time`
    pub initial_size: f64,
    /// Exponential growth rate (per generation, forward in time)
    pub growth_rate: f64,
    /// Time the current size/growth parameters took effect
    pub start_time: f64,
    /// Extant lineages resident here
    pub ancestors: AvlTree,
}

impl PopulationState {
    /// Create a population with `initial_size` and `growth_rate` effective from time 0
    pub fn new(initial_size: f64, growth_rate: f64) -> Self {
        Self {
            initial_size,
            growth_rate,
            start_time: 0.0,
            ancestors: AvlTree::new(),
        }
    }

    /// Effective size at simulation time `t >= start_time`
    pub fn size_at(&self, t: f64) -> f64 {
        self.initial_size * (-self.growth_rate * (t - self.start_time)).exp()
    }

    /// Re-anchor the parameters at time `t`, carrying the current size forward
    /// when no new size is given
    pub fn change_parameters(
        &mut self,
        t: f64,
        initial_size: Option<f64>,
        growth_rate: Option<f64>,
    ) {
        self.initial_size = initial_size.unwrap_or_else(|| self.size_at(t));
        if let Some(growth_rate) = growth_rate {
            self.growth_rate = growth_rate;
        }
        self.start_time = t;
    }
}

/// Append-only table of genealogy nodes
///
/// Leaves `0..n` are the sampled chromosomes at time 0; internal nodes are
/// appended in coalescence order, so ids increase with time.
#[derive(Debug, Default)]
pub(crate) struct NodeTable {
    time: Vec<f64>,
    population: Vec<u32>,
}

impl NodeTable {
    /// Append a node, returning its id
    pub fn add_row(&mut self, time: f64, population: u32) -> u32 {
        let id = self.time.len() as u32;
        self.time.push(time);
        self.population.push(population);
        id
    }

    /// Consume the table into its columns
    pub fn into_columns(self) -> (Vec<f64>, Vec<u32>) {
        (self.time, self.population)
    }
}

/// Genome position usable as an ordered map key
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct PosKey(pub f64);

impl Eq for PosKey {}

impl PartialOrd for PosKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PosKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Running count of extant ancestral segments per genomic interval
///
/// Maps a breakpoint position to the number of segments covering
/// `[position, next_position)` that must still merge before that stretch has
/// found its most recent common ancestor. The count starts at the sample size
/// over `[0, L)`; when a merge brings it down to one, the stretch is finished
/// and its material is dropped from further tracking. That drop is what drives
/// termination.
#[derive(Debug)]
pub(crate) struct OverlapCounter {
    counts: BTreeMap<PosKey, i64>,
}

impl OverlapCounter {
    /// Counter covering `[0, length)` with `samples` overlapping segments
    pub fn new(samples: i64, length: f64) -> Self {
        let mut counts = BTreeMap::new();
        counts.insert(PosKey(0.0), samples);
        // Sentinel so every in-range position has a successor key
        counts.insert(PosKey(length), -1);
        Self { counts }
    }

    /// Ensure a key exists exactly at `pos`, copying the covering count
    pub fn ensure_breakpoint(&mut self, pos: f64) {
        if !self.counts.contains_key(&PosKey(pos)) {
            let covering = self.value_at(pos);
            self.counts.insert(PosKey(pos), covering);
        }
    }

    /// Count covering `pos` (value at the greatest key `<= pos`)
    pub fn value_at(&self, pos: f64) -> i64 {
        let (_, v) = self
            .counts
            .range(..=PosKey(pos))
            .next_back()
            .expect("position inside the tracked genome");
        *v
    }

    /// Value stored at an exact existing key
    pub fn get(&self, pos: f64) -> i64 {
        *self.counts.get(&PosKey(pos)).expect("exact breakpoint key")
    }

    /// Overwrite the value at an exact existing key
    pub fn set(&mut self, pos: f64, value: i64) {
        let slot = self
            .counts
            .get_mut(&PosKey(pos))
            .expect("exact breakpoint key");
        *slot = value;
    }

    /// Smallest key strictly greater than `pos`
    pub fn next_key(&self, pos: f64) -> f64 {
        let (k, _) = self
            .counts
            .range((Bound::Excluded(PosKey(pos)), Bound::Unbounded))
            .next()
            .expect("sentinel bounds every in-range position");
        k.0
    }
}
