//! Seed scheduling: cycle-aware selection with a bias towards favored seeds,
//! and the power schedule sizing each seed's mutation budget.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::corpus::{Seed, SeedId, SeedQueue};

/// Chance of drawing from the unused favored seeds when any remain.
const FAVORED_BIAS: f64 = 0.9;

/// Lower and upper bound on the per-seed mutation budget.
const MIN_MUTATIONS: usize = 1;
const MAX_MUTATIONS: usize = 1000;

/// Outcome of one scheduling request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub seed: SeedId,
    /// True when this request started a fresh pass over the queue; the
    /// caller recomputes the favored set on it.
    pub new_cycle: bool,
}

/// Tracks which seeds were already selected in the running cycle.
///
/// A cycle covers the seeds present when it began; seeds admitted mid-cycle
/// become eligible the next time around.
#[derive(Debug)]
pub struct CycleScheduler {
    used: HashSet<SeedId>,
    cycle_size: usize,
}

impl CycleScheduler {
    pub fn new(initial_queue_len: usize) -> Self {
        Self {
            used: HashSet::new(),
            cycle_size: initial_queue_len,
        }
    }

    /// Picks the next seed to fuzz, or `None` on an empty queue.
    pub fn next<R: Rng>(&mut self, queue: &SeedQueue, rng: &mut R) -> Option<Selection> {
        if queue.is_empty() {
            return None;
        }

        let mut new_cycle = false;
        if self.used.len() >= self.cycle_size {
            self.used.clear();
            self.cycle_size = queue.len();
            new_cycle = true;
        }

        let unused: Vec<SeedId> = queue
            .iter()
            .map(Seed::id)
            .filter(|id| !self.used.contains(id))
            .collect();
        let unused_favored: Vec<SeedId> = unused
            .iter()
            .copied()
            .filter(|&id| queue.get(id).is_favored())
            .collect();

        let pick = if !unused_favored.is_empty() && rng.gen::<f64>() < FAVORED_BIAS {
            *unused_favored
                .choose(rng)
                .expect("non-empty favored selection pool")
        } else {
            *unused
                .choose(rng)
                .expect("used set is strictly smaller than the queue")
        };

        self.used.insert(pick);
        Some(Selection {
            seed: pick,
            new_cycle,
        })
    }
}

/// Number of mutated children to generate from `seed`.
///
/// Fast seeds (relative to the rolling average `avg_exec_time`, in seconds)
/// and seeds with broad coverage get a larger budget.
pub fn power_schedule(seed: &Seed, avg_exec_time: f64) -> usize {
    let mut score = 100.0;

    let exec_time = seed.exec_time().as_secs_f64();
    if exec_time > 0.0 && avg_exec_time > 0.0 {
        let time_factor = (avg_exec_time / exec_time).clamp(0.1, 3.0);
        score *= time_factor;
    }

    score *= 1.0 + seed.edges().len() as f64 / 100.0;

    (score as usize).clamp(MIN_MUTATIONS, MAX_MUTATIONS)
}
