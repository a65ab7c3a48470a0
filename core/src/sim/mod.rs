//! The simulation engine: competing-hazard event loop over ancestral lineages
//!
//! The engine walks backward in time from the sampled chromosomes, splitting
//! lineages at recombination breakpoints, merging them at common-ancestor
//! events, moving them between populations, and executing scheduled
//! demographic changes, until every site of the genome has found its most
//! recent common ancestor. Each merge emits the coalescence records that
//! become the replicate's tree sequence.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use rand::prelude::Rng;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use thiserror::Error;

use crate::cfg::{ConfigError, DemographicEvent, SimulationConfig};
use crate::recomb_map::RecombinationMap;
use crate::sim::avl::LineageKey;
use crate::sim::fenwick::FenwickTree;
use crate::sim::types::{
    LineageTable, NodeTable, OverlapCounter, PopulationState, Segment, SegmentArena,
};
use crate::treeseq::{CoalescenceRecord, TreeSequence};

mod avl;
pub(crate) mod distr;
mod fenwick;
mod heap;
mod mechanics;
mod types;

pub mod summarize;

/// An error raised while simulating a replicate
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    /// The configuration failed validation
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// No process can fire and no scheduled event remains, but lineages do
    #[error(
        "no event can occur at time {time} with {lineages} lineages remaining; \
         the configuration cannot fully coalesce"
    )]
    Stalled {
        /// Simulation time the replicate stalled at
        time: f64,
        /// Number of lineages still extant
        lineages: usize,
    },
    /// A non-finite value was produced mid-simulation
    #[error("non-finite value produced at time {time}: {detail}")]
    Numeric {
        /// Simulation time of the failure
        time: f64,
        /// What went non-finite
        detail: String,
    },
    /// The configured iteration budget ran out before coalescence completed
    #[error("step budget of {max_steps} iterations exhausted")]
    StepBudgetExhausted {
        /// The configured budget
        max_steps: u64,
    },
    /// The segment heap's configured cap was exhausted
    #[error("segment heap exhausted")]
    OutOfMemory,
    /// Cooperative cancellation was signalled
    #[error("simulation cancelled")]
    Cancelled,
    /// An internal invariant was violated; indicates a bug
    #[error("internal invariant violated: {detail}")]
    Internal {
        /// Description of the violation
        detail: String,
    },
}

/// RNG used for the simulations  
/// Will be a type that implements the `Rng` trait from `rand`   
pub type SimRng = Pcg64;

/// Instantiate RNG to use for the simulations  
///
/// Uses seed if one is given, otherwise seeds from system entropy  
fn default_sim_rng(cfg: &SimulationConfig) -> SimRng {
    match cfg.random_seed {
        Some(seed) => SimRng::seed_from_u64(seed),
        None => SimRng::from_entropy(),
    }
}

/// A demographic event queued for execution
///
/// Ordered by time with the submission index as tiebreaker, so simultaneous
/// events execute in the order they were submitted.
#[derive(Clone, Debug)]
pub(crate) struct ScheduledEvent {
    time: f64,
    seq: usize,
    event: DemographicEvent,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// The next sampled process to fire
#[derive(Clone, Copy, Debug, PartialEq)]
enum PendingEvent {
    Recombination,
    CommonAncestor(usize),
    Migration,
}

/// Mutable state of one replicate
pub(crate) struct EngineState {
    /// Current simulation time in generations
    pub time: f64,
    /// Per-population sizes, growth rates and lineage indexes
    pub populations: Vec<PopulationState>,
    /// Backward migration rates currently in force
    pub migration: Vec<Vec<f64>>,
    /// Slot arena holding every live segment
    pub segments: SegmentArena,
    /// Lineage id registry
    pub lineages: LineageTable,
    /// Per-lineage recombinable genetic length, indexed by lineage id + 1
    pub links: FenwickTree,
    /// Per-interval count of segments still to merge
    pub overlap: OverlapCounter,
    /// Append-only genealogy nodes
    pub nodes: NodeTable,
    /// Records emitted so far
    pub records: Vec<CoalescenceRecord>,
    /// Scheduled demographic events, earliest (then first-submitted) first
    pub events: BinaryHeap<Reverse<ScheduledEvent>>,
    /// Physical/genetic coordinate map
    pub map: RecombinationMap,
    /// Number of sampled chromosomes
    pub sample_size: u32,
    /// Physical genome length
    pub sequence_length: f64,
}

impl EngineState {
    /// Fresh state for one replicate: one lineage per sampled chromosome
    fn new(cfg: &InternalConfig) -> Result<Self, SimulationError> {
        let sample_size = cfg.sample_populations.len() as u32;
        let sequence_length = cfg.sequence_length;

        let mut state = Self {
            time: 0.0,
            populations: cfg
                .population_parameters
                .iter()
                .map(|(size, growth)| PopulationState::new(*size, *growth))
                .collect(),
            migration: cfg.migration.clone(),
            segments: SegmentArena::new(2 * sample_size as usize, cfg.inner.max_segments),
            lineages: LineageTable::default(),
            links: FenwickTree::new(sample_size as usize),
            overlap: OverlapCounter::new(i64::from(sample_size), sequence_length),
            nodes: NodeTable::default(),
            records: Vec::new(),
            events: cfg
                .inner
                .demographic_events
                .iter()
                .enumerate()
                .map(|(seq, event)| {
                    Reverse(ScheduledEvent {
                        time: event.time(),
                        seq,
                        event: event.clone(),
                    })
                })
                .collect(),
            map: cfg.inner.recombination_map.clone(),
            sample_size,
            sequence_length,
        };

        let genetic_length = state.map.total_genetic_length();
        for (sample, population) in cfg.sample_populations.iter().enumerate() {
            state.nodes.add_row(0.0, *population);
            let slot = state.alloc_segment(Segment {
                left: 0.0,
                right: sequence_length,
                node: sample as u32,
                population: *population,
                prev: None,
                next: None,
            })?;
            let lineage = state.lineages.alloc();
            state.lineages.set_head(lineage, slot);
            state.links.set(lineage as usize + 1, genetic_length);
            state.populations[*population as usize]
                .ancestors
                .insert(LineageKey {
                    position: 0.0,
                    lineage,
                });
        }
        Ok(state)
    }

    /// Allocate a segment, surfacing heap exhaustion
    pub fn alloc_segment(&mut self, segment: Segment) -> Result<u32, SimulationError> {
        self.segments
            .alloc(segment)
            .ok_or(SimulationError::OutOfMemory)
    }

    /// Total number of extant lineages across populations
    pub fn num_ancestors(&self) -> usize {
        self.populations.iter().map(|p| p.ancestors.len()).sum()
    }

    /// Tail segment slot of the lineage headed at `head`
    pub fn tail_slot(&self, head: u32) -> u32 {
        let mut slot = head;
        while let Some(next) = self.segments.get(slot).next {
            slot = next;
        }
        slot
    }

    /// Recompute a lineage's Fenwick weight from its current span
    ///
    /// The weight is the genetic length between the head's left end and the
    /// tail's right end; recombination anywhere in that span (trapped
    /// non-ancestral material included) splits the lineage.
    pub fn refresh_link_weight(&mut self, lineage: u32) {
        let head = self.lineages.head(lineage);
        let tail = self.tail_slot(head);
        let weight = self.map.physical_to_genetic(self.segments.get(tail).right)
            - self.map.physical_to_genetic(self.segments.get(head).left);
        self.links.set(lineage as usize + 1, weight);
    }

    /// Sum of per-pair migration hazards `k_i * M[i][j]`
    pub fn total_migration_rate(&self) -> f64 {
        let mut total = 0.0;
        for (source, population) in self.populations.iter().enumerate() {
            if population.ancestors.is_empty() {
                continue;
            }
            let k = population.ancestors.len() as f64;
            for rate in &self.migration[source] {
                total += k * rate;
            }
        }
        total
    }
}

/// Waiting time until the next common-ancestor event in `population`
///
/// Draws `u ~ Exp(k(k-1)/2)` and inverts the integrated pair hazard
/// `1/(2N(t))`. Under exponential growth the inversion is closed-form; a
/// shrinking (backward in time) hazard may never accumulate enough mass, in
/// which case the event never fires.
fn common_ancestor_waiting_time<R: Rng>(
    population: &PopulationState,
    now: f64,
    rng: &mut R,
) -> Result<f64, SimulationError> {
    let k = population.ancestors.len() as f64;
    let u = distr::exponential(k * (k - 1.0) / 2.0, rng);
    let growth_rate = population.growth_rate;

    let wait = if growth_rate == 0.0 {
        2.0 * population.initial_size * u
    } else {
        let dt = now - population.start_time;
        let z = 1.0 + 2.0 * population.initial_size * growth_rate * u * (-growth_rate * dt).exp();
        if z > 0.0 {
            z.ln() / growth_rate
        } else {
            f64::INFINITY
        }
    };

    if wait.is_nan() {
        return Err(SimulationError::Numeric {
            time: now,
            detail: format!(
                "common ancestor waiting time in a population of size {}",
                population.size_at(now)
            ),
        });
    }
    Ok(wait)
}

/// Configuration pre-processed for the engine, including values that must be
/// computed from the external config
struct InternalConfig {
    /// Underlying external config
    inner: SimulationConfig,
    /// Population of each sample, in node-id order
    sample_populations: Vec<u32>,
    /// Initial size and growth rate per population, with `Ne` applied
    population_parameters: Vec<(f64, f64)>,
    /// Migration matrix with the zero default applied
    migration: Vec<Vec<f64>>,
    /// Physical genome length
    sequence_length: f64,
}

impl InternalConfig {
    /// Pre-process a validated `SimulationConfig`
    fn new(cfg: SimulationConfig) -> Self {
        Self {
            sample_populations: cfg.sample_populations(),
            population_parameters: cfg.population_parameters(),
            migration: cfg.effective_migration_matrix(),
            sequence_length: cfg.sequence_length(),
            inner: cfg,
        }
    }
}

/// Handler running the configured replicates, exposing finished tree sequences
/// through an iterator-like interface
pub struct Simulator {
    /// Replicates completed so far
    replicate: u32,
    /// Pre-processed configuration
    cfg: InternalConfig,
    /// RNG shared by all replicates, so one seed fixes the whole stream
    rng: SimRng,
    /// Cooperative cancellation flag checked between loop iterations
    cancel: Option<Arc<AtomicBool>>,
}

impl Simulator {
    /// Create a `Simulator`, validating `cfg` first
    ///
    /// All configuration errors surface here; a constructed simulator can only
    /// fail for runtime reasons.
    pub fn new(cfg: SimulationConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self {
            replicate: 0,
            rng: default_sim_rng(&cfg),
            cfg: InternalConfig::new(cfg),
            cancel: None,
        })
    }

    /// The validated configuration driving this simulator
    pub fn config(&self) -> &SimulationConfig {
        &self.cfg.inner
    }

    /// Number of replicates completed so far
    pub fn replicates_completed(&self) -> u32 {
        self.replicate
    }

    /// Whether all configured replicates have been simulated
    pub fn is_finished(&self) -> bool {
        self.replicate == self.cfg.inner.num_replicates
    }

    /// Install a cancellation flag; raising it aborts the running replicate
    /// with [`SimulationError::Cancelled`]
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    /// Simulate the next replicate, or `None` when all replicates are done
    ///
    /// A failed replicate is reported once and its in-progress state
    /// discarded; subsequent calls continue with the next replicate.
    pub fn next_replicate(&mut self) -> Option<Result<TreeSequence, SimulationError>> {
        if self.is_finished() {
            return None;
        }
        self.replicate += 1;
        Some(self.run_replicate())
    }

    /// Run every remaining replicate, stopping at the first failure
    pub fn run_all(&mut self) -> Result<Vec<TreeSequence>, SimulationError> {
        let mut results = Vec::new();
        while let Some(result) = self.next_replicate() {
            results.push(result?);
        }
        Ok(results)
    }

    /// The main event loop for one replicate
    fn run_replicate(&mut self) -> Result<TreeSequence, SimulationError> {
        let mut state = EngineState::new(&self.cfg)?;
        let rng = &mut self.rng;
        let mut steps: u64 = 0;

        while state.num_ancestors() > 0 {
            if let Some(flag) = &self.cancel {
                if flag.load(AtomicOrdering::Relaxed) {
                    return Err(SimulationError::Cancelled);
                }
            }
            steps += 1;
            if let Some(max_steps) = self.cfg.inner.max_steps {
                if steps > max_steps {
                    return Err(SimulationError::StepBudgetExhausted { max_steps });
                }
            }

            // Draw each process's waiting time; the minimum fires. The draw
            // order (recombination, then populations in id order, then
            // migration) is part of the reproducible stream.
            let mut wait = f64::INFINITY;
            let mut pending = None;

            let recombination_rate = state.links.total();
            if recombination_rate > 0.0 {
                let candidate = distr::exponential(recombination_rate, rng);
                if candidate < wait {
                    wait = candidate;
                    pending = Some(PendingEvent::Recombination);
                }
            }

            for index in 0..state.populations.len() {
                if state.populations[index].ancestors.len() >= 2 {
                    let candidate =
                        common_ancestor_waiting_time(&state.populations[index], state.time, rng)?;
                    if candidate < wait {
                        wait = candidate;
                        pending = Some(PendingEvent::CommonAncestor(index));
                    }
                }
            }

            let migration_rate = state.total_migration_rate();
            if migration_rate > 0.0 {
                let candidate = distr::exponential(migration_rate, rng);
                if candidate < wait {
                    wait = candidate;
                    pending = Some(PendingEvent::Migration);
                }
            }

            // A scheduled event inside the sampled waiting time preempts it;
            // nothing else is consumed for this iteration
            if let Some(Reverse(next_event)) = state.events.peek() {
                if wait.is_infinite() || next_event.time <= state.time + wait {
                    let Reverse(scheduled) = state.events.pop().expect("peeked event");
                    assert!(
                        scheduled.time >= state.time,
                        "demographic event scheduled in the past"
                    );
                    state.time = scheduled.time;
                    mechanics::apply_demographic_event(&mut state, &scheduled.event, rng);
                    continue;
                }
            }

            let pending = match pending {
                Some(pending) => pending,
                None => {
                    return Err(SimulationError::Stalled {
                        time: state.time,
                        lineages: state.num_ancestors(),
                    })
                }
            };

            state.time += wait;
            if !state.time.is_finite() {
                return Err(SimulationError::Numeric {
                    time: state.time,
                    detail: "simulation clock overflowed".to_string(),
                });
            }

            match pending {
                PendingEvent::Recombination => mechanics::recombination_event(&mut state, rng)?,
                PendingEvent::CommonAncestor(population) => {
                    mechanics::common_ancestor_event(&mut state, population, rng)?
                }
                PendingEvent::Migration => mechanics::migration_event(&mut state, rng),
            }
        }

        let EngineState {
            nodes,
            records,
            sample_size,
            sequence_length,
            ..
        } = state;
        let (node_time, node_population) = nodes.into_columns();
        TreeSequence::new(
            sample_size,
            sequence_length,
            node_time,
            node_population,
            records,
        )
        .map_err(|error| SimulationError::Internal {
            detail: error.to_string(),
        })
    }
}
