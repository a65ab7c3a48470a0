//! Mechanics of the coalescence, recombination and migration processes
//!
//! Mid-level details between the high level event loop and the low-level
//! segment, index and weight bookkeeping. Every function here mutates one
//! engine state under a caller-advanced clock.

use rand::prelude::Rng;

use crate::cfg::DemographicEvent;
use crate::sim::avl::LineageKey;
use crate::sim::types::Segment;
use crate::sim::{EngineState, SimulationError};
use crate::treeseq::CoalescenceRecord;

/// Execute one recombination: split a Fenwick-selected lineage at a breakpoint
///
/// The breakpoint is drawn uniformly on the total genetic length, mapped back
/// to physical coordinates, and clamped into the chosen lineage's span. A draw
/// that clamps onto the span boundary splits nothing and is consumed as a
/// no-op.
pub(super) fn recombination_event<R: Rng>(
    state: &mut EngineState,
    rng: &mut R,
) -> Result<(), SimulationError> {
    let total = state.links.total();
    assert!(total > 0.0, "recombination fired with no recombinable length");

    let draw = rng.gen_range(0.0, total);
    let index = state.links.find(draw);
    let lineage = (index - 1) as u32;
    let genetic_offset = draw - state.links.prefix_sum(index - 1);

    let head_slot = state.lineages.head(lineage);
    let head = *state.segments.get(head_slot);
    let tail_slot = state.tail_slot(head_slot);
    let tail_right = state.segments.get(tail_slot).right;

    let genetic_start = state.map.physical_to_genetic(head.left);
    let breakpoint = state
        .map
        .genetic_to_physical((genetic_start + genetic_offset).min(state.map.total_genetic_length()));
    if breakpoint <= head.left || breakpoint >= tail_right {
        return Ok(());
    }

    // First segment whose material reaches past the breakpoint
    let mut slot = head_slot;
    loop {
        let segment = *state.segments.get(slot);
        if segment.right > breakpoint {
            break;
        }
        slot = segment.next.expect("breakpoint lies inside the lineage span");
    }

    let segment = *state.segments.get(slot);
    let new_head = if segment.left >= breakpoint {
        // The cut falls between segments: the lineage splits at an existing
        // boundary and no new segment is needed
        let prev = segment.prev.expect("interior segment has a predecessor");
        state.segments.get_mut(prev).next = None;
        state.segments.get_mut(slot).prev = None;
        slot
    } else {
        // Straddle: the right half starts the new lineage
        let right_half = state.alloc_segment(Segment {
            left: breakpoint,
            right: segment.right,
            node: segment.node,
            population: segment.population,
            prev: None,
            next: segment.next,
        })?;
        if let Some(next) = segment.next {
            state.segments.get_mut(next).prev = Some(right_half);
        }
        let left_half = state.segments.get_mut(slot);
        left_half.right = breakpoint;
        left_half.next = None;
        right_half
    };

    let new_lineage = state.lineages.alloc();
    if state.lineages.high_water() > state.links.len() {
        state.links.grow(state.lineages.high_water());
    }
    state.lineages.set_head(new_lineage, new_head);
    state.refresh_link_weight(lineage);
    state.refresh_link_weight(new_lineage);

    let new_head_segment = *state.segments.get(new_head);
    state.populations[new_head_segment.population as usize]
        .ancestors
        .insert(LineageKey {
            position: new_head_segment.left,
            lineage: new_lineage,
        });
    Ok(())
}

/// Execute one common-ancestor event in `population`
///
/// Two distinct lineages are drawn by rank from the population index and their
/// segment lists merged.
pub(super) fn common_ancestor_event<R: Rng>(
    state: &mut EngineState,
    population: usize,
    rng: &mut R,
) -> Result<(), SimulationError> {
    let k = state.populations[population].ancestors.len();
    assert!(k >= 2, "common ancestor event in a population with {} lineages", k);

    let first = state.populations[population]
        .ancestors
        .select(rng.gen_range(0, k));
    state.populations[population].ancestors.remove(&first);
    let second = state.populations[population]
        .ancestors
        .select(rng.gen_range(0, k - 1));
    state.populations[population].ancestors.remove(&second);

    merge_two_lineages(state, population as u32, first.lineage, second.lineage)
}

/// Merge the segment lists of two lineages into their common ancestor
///
/// Sub-intervals carried by both parents coalesce: a record is emitted and the
/// material continues under a node allocated once for the whole event, except
/// where the merge completes the interval's genealogy, in which case the
/// material is dropped. Material carried by one parent passes through.
fn merge_two_lineages(
    state: &mut EngineState,
    population: u32,
    first: u32,
    second: u32,
) -> Result<(), SimulationError> {
    let mut x = Some(state.lineages.head(first));
    let mut y = Some(state.lineages.head(second));

    // Ids are released before the merged lineage allocates, so the merged
    // lineage deterministically reuses the most recently freed id
    state.links.set(first as usize + 1, 0.0);
    state.links.set(second as usize + 1, 0.0);
    state.lineages.free(first);
    state.lineages.free(second);

    let time = state.time;
    let mut coalescence = false;
    let mut parent = 0u32;
    let mut merged_head: Option<u32> = None;
    let mut merged_tail: Option<u32> = None;

    while x.is_some() || y.is_some() {
        let mut alpha: Option<u32> = None;
        match (x, y) {
            (None, Some(rest)) => {
                alpha = Some(rest);
                y = None;
            }
            (Some(rest), None) => {
                alpha = Some(rest);
                x = None;
            }
            (Some(mut xs), Some(mut ys)) => {
                if state.segments.get(ys).left < state.segments.get(xs).left {
                    std::mem::swap(&mut xs, &mut ys);
                }
                x = Some(xs);
                y = Some(ys);
                let x_seg = *state.segments.get(xs);
                let y_seg = *state.segments.get(ys);

                if x_seg.right <= y_seg.left {
                    // Disjoint: x passes through untouched
                    x = x_seg.next;
                    state.segments.get_mut(xs).next = None;
                    alpha = Some(xs);
                } else if x_seg.left != y_seg.left {
                    // Overlap starts inside x: carve off the leading piece
                    alpha = Some(state.alloc_segment(Segment {
                        left: x_seg.left,
                        right: y_seg.left,
                        node: x_seg.node,
                        population,
                        prev: None,
                        next: None,
                    })?);
                    state.segments.get_mut(xs).left = y_seg.left;
                } else {
                    // Both parents carry [left, right_bound): coalesce
                    let left = x_seg.left;
                    let right_bound = x_seg.right.min(y_seg.right);
                    if !coalescence {
                        coalescence = true;
                        parent = state.nodes.add_row(time, population);
                    }

                    state.overlap.ensure_breakpoint(left);
                    state.overlap.ensure_breakpoint(right_bound);

                    let right;
                    if state.overlap.get(left) == 2 {
                        // This stretch has found its most recent common
                        // ancestor; drop it from further tracking
                        state.overlap.set(left, 0);
                        right = state.overlap.next_key(left);
                    } else {
                        let mut walk = left;
                        while walk < right_bound && state.overlap.get(walk) != 2 {
                            let count = state.overlap.get(walk);
                            state.overlap.set(walk, count - 1);
                            walk = state.overlap.next_key(walk);
                        }
                        right = walk;
                        alpha = Some(state.alloc_segment(Segment {
                            left,
                            right,
                            node: parent,
                            population,
                            prev: None,
                            next: None,
                        })?);
                    }

                    let mut children = [x_seg.node, y_seg.node];
                    children.sort_unstable();
                    state.records.push(CoalescenceRecord {
                        left,
                        right,
                        parent,
                        children: children.to_vec(),
                        time,
                        population,
                    });

                    if x_seg.right == right {
                        x = x_seg.next;
                        state.segments.free(xs);
                    } else {
                        state.segments.get_mut(xs).left = right;
                    }
                    if y_seg.right == right {
                        y = y_seg.next;
                        state.segments.free(ys);
                    } else {
                        state.segments.get_mut(ys).left = right;
                    }
                }
            }
            (None, None) => unreachable!("loop condition"),
        }

        if let Some(alpha) = alpha {
            match merged_tail {
                None => {
                    state.segments.get_mut(alpha).prev = None;
                    merged_head = Some(alpha);
                    merged_tail = Some(alpha);
                }
                Some(tail) => {
                    let tail_seg = *state.segments.get(tail);
                    let alpha_seg = *state.segments.get(alpha);
                    if tail_seg.right == alpha_seg.left && tail_seg.node == alpha_seg.node {
                        // Contiguous material under the same node squashes
                        // into one segment
                        let tail_mut = state.segments.get_mut(tail);
                        tail_mut.right = alpha_seg.right;
                        tail_mut.next = alpha_seg.next;
                        if let Some(next) = alpha_seg.next {
                            state.segments.get_mut(next).prev = Some(tail);
                        }
                        state.segments.free(alpha);
                    } else {
                        state.segments.get_mut(tail).next = Some(alpha);
                        state.segments.get_mut(alpha).prev = Some(tail);
                        merged_tail = Some(alpha);
                    }
                }
            }
        }
    }

    if let Some(head) = merged_head {
        let merged = state.lineages.alloc();
        if state.lineages.high_water() > state.links.len() {
            state.links.grow(state.lineages.high_water());
        }
        state.lineages.set_head(merged, head);
        state.refresh_link_weight(merged);
        let head_left = state.segments.get(head).left;
        state.populations[population as usize]
            .ancestors
            .insert(LineageKey {
                position: head_left,
                lineage: merged,
            });
    }
    Ok(())
}

/// Execute one migration: move a lineage between populations
///
/// The (source, destination) pair is drawn by one uniform sweep over the
/// row-major per-pair rates, the lineage by rank within the source index.
pub(super) fn migration_event<R: Rng>(state: &mut EngineState, rng: &mut R) {
    let total = state.total_migration_rate();
    assert!(total > 0.0, "migration fired with zero total rate");

    let draw = rng.gen_range(0.0, total);
    let mut acc = 0.0;
    let num_populations = state.populations.len();
    let mut chosen = None;
    'pairs: for source in 0..num_populations {
        let k = state.populations[source].ancestors.len() as f64;
        for destination in 0..num_populations {
            acc += k * state.migration[source][destination];
            if draw < acc {
                chosen = Some((source, destination));
                break 'pairs;
            }
        }
    }
    // Rounding in the sweep can leave the draw unassigned; the last positive
    // entry takes it
    let (source, destination) = match chosen {
        Some(pair) => pair,
        None => last_positive_pair(state),
    };

    let k = state.populations[source].ancestors.len();
    let key = state.populations[source].ancestors.select(rng.gen_range(0, k));
    move_lineage(state, key, source, destination);
}

fn last_positive_pair(state: &EngineState) -> (usize, usize) {
    let num_populations = state.populations.len();
    let mut result = None;
    for source in 0..num_populations {
        let k = state.populations[source].ancestors.len() as f64;
        for destination in 0..num_populations {
            if k * state.migration[source][destination] > 0.0 {
                result = Some((source, destination));
            }
        }
    }
    result.expect("positive total migration rate")
}

/// Move one lineage from `source` to `destination`, relabelling its segments
fn move_lineage(state: &mut EngineState, key: LineageKey, source: usize, destination: usize) {
    state.populations[source].ancestors.remove(&key);

    let mut slot = Some(state.lineages.head(key.lineage));
    while let Some(current) = slot {
        let segment = state.segments.get_mut(current);
        segment.population = destination as u32;
        slot = segment.next;
    }

    state.populations[destination].ancestors.insert(key);
}

/// Apply one scheduled demographic event at the current clock
pub(super) fn apply_demographic_event<R: Rng>(
    state: &mut EngineState,
    event: &DemographicEvent,
    rng: &mut R,
) {
    match event {
        DemographicEvent::PopulationParametersChange {
            time,
            population,
            initial_size,
            growth_rate,
        } => {
            let targets: Vec<usize> = match population {
                Some(p) => vec![*p],
                None => (0..state.populations.len()).collect(),
            };
            for target in targets {
                state.populations[target].change_parameters(*time, *initial_size, *growth_rate);
            }
        }
        DemographicEvent::MigrationRateChange {
            rate, matrix_index, ..
        } => match matrix_index {
            Some((i, j)) => state.migration[*i][*j] = *rate,
            None => {
                for i in 0..state.migration.len() {
                    for j in 0..state.migration.len() {
                        if i != j {
                            state.migration[i][j] = *rate;
                        }
                    }
                }
            }
        },
        DemographicEvent::MassMigration {
            source,
            destination,
            proportion,
            ..
        } => {
            // Snapshot the index so moved lineages are not revisited
            let keys: Vec<LineageKey> = state.populations[*source].ancestors.iter().collect();
            for key in keys {
                if rng.gen_bool(*proportion) {
                    move_lineage(state, key, *source, *destination);
                }
            }
        }
    }
}
