use std::cmp::Ordering;

use reqdist_common::requisition::Factors;

use crate::node::NodeRef;

/// Default divisor of the "small difference" fairness override.
///
/// A gap in assigned factor smaller than `factor / divisor` is treated as no
/// gap at all. The value is a heuristic kept for compatibility and can be
/// tuned with [`LoadBalancer::with_fairness_divisor`].
pub const DEFAULT_FAIRNESS_DIVISOR: f64 = 10.0;

/// Outcome of a node selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Index of the chosen node in the scanned slice.
    Chosen(usize),
    /// Every node is saturated on a dimension the unit declares; wait for
    /// capacity and select again.
    Saturated,
    /// There are no nodes at all.
    Unavailable,
}

/// Picks the node best able to absorb a unit, given its declared factors.
///
/// Selection is a pure function of the node slice and the factors:
///
/// - A dimension takes part only if the unit declares a factor of at least 1
///   for it.
/// - Idle nodes are always eligible. Busy nodes are eligible only while every
///   considered dimension's assigned factor is below the declared capacity.
/// - Among eligible nodes three leaders are tracked: *lowest load* (fewest
///   units, then higher clock, higher memory, lower assigned clock, lower
///   assigned memory), *lowest clock use* and *lowest memory use* (lowest
///   assigned factor, ties to the higher capacity). Earlier nodes win ties.
/// - Both dimensions: lowest clock use, unless lowest memory use has no more
///   units in flight. One dimension: its lowest-use leader, unless the
///   lowest-load leader is within the fairness margin of it. Neither: lowest
///   load.
#[derive(Debug, Clone)]
pub struct LoadBalancer {
    fairness_divisor: f64,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::with_fairness_divisor(DEFAULT_FAIRNESS_DIVISOR)
    }

    pub fn with_fairness_divisor(fairness_divisor: f64) -> Self {
        Self { fairness_divisor }
    }

    pub fn fairness_divisor(&self) -> f64 {
        self.fairness_divisor
    }

    /// Selects a node for a unit with `factors`.
    pub fn select(&self, nodes: &[NodeRef], factors: &Factors) -> Selection {
        if nodes.is_empty() {
            return Selection::Unavailable;
        }

        let mut lowest_load: Option<usize> = None;
        let mut lowest_clock_use: Option<usize> = None;
        let mut lowest_memory_use: Option<usize> = None;

        for (index, node) in nodes.iter().enumerate() {
            if !node.is_eligible(factors) {
                continue;
            }
            if lowest_load.map_or(true, |best| is_less_loaded(node, &nodes[best])) {
                lowest_load = Some(index);
            }
            if lowest_clock_use.map_or(true, |best| {
                is_better_use(node.usage.clock, nodes[best].usage.clock, node.clock(), nodes[best].clock())
            }) {
                lowest_clock_use = Some(index);
            }
            if lowest_memory_use.map_or(true, |best| {
                is_better_use(node.usage.memory, nodes[best].usage.memory, node.memory(), nodes[best].memory())
            }) {
                lowest_memory_use = Some(index);
            }
        }

        // All three leaders are set together, so one check covers them
        let (Some(load), Some(clock), Some(memory)) = (lowest_load, lowest_clock_use, lowest_memory_use) else {
            return Selection::Saturated;
        };

        let chosen = match (factors.considers_processing(), factors.considers_memory()) {
            (true, true) => {
                if nodes[clock].usage.units <= nodes[memory].usage.units {
                    clock
                } else {
                    memory
                }
            }
            (true, false) => {
                let gap = nodes[load].usage.clock - nodes[clock].usage.clock;
                if load != clock && self.is_small_difference(gap, factors.processing) {
                    load
                } else {
                    clock
                }
            }
            (false, true) => {
                let gap = nodes[load].usage.memory - nodes[memory].usage.memory;
                if load != memory && self.is_small_difference(gap, factors.memory) {
                    load
                } else {
                    memory
                }
            }
            (false, false) => load,
        };

        Selection::Chosen(chosen)
    }

    fn is_small_difference(&self, gap: i64, factor: i64) -> bool {
        (gap as f64) < factor as f64 / self.fairness_divisor
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}

fn is_less_loaded(candidate: &NodeRef, best: &NodeRef) -> bool {
    candidate
        .usage
        .units
        .cmp(&best.usage.units)
        .then_with(|| best.clock().cmp(&candidate.clock()))
        .then_with(|| best.memory().cmp(&candidate.memory()))
        .then_with(|| candidate.usage.clock.cmp(&best.usage.clock))
        .then_with(|| candidate.usage.memory.cmp(&best.usage.memory))
        == Ordering::Less
}

fn is_better_use(candidate_used: i64, best_used: i64, candidate_capacity: i64, best_capacity: i64) -> bool {
    candidate_used < best_used || (candidate_used == best_used && candidate_capacity > best_capacity)
}
