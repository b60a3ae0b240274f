//! Test-case generation: havoc and splice mutators over the seed queue, with
//! an epsilon-greedy bandit arbitrating between the two from observed
//! coverage and crash reward.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use rand::Rng;

use crate::corpus::{Seed, SeedQueue};

pub mod dictionary;
mod havoc;

pub use dictionary::Dictionary;

/// Exploration rate of the operator bandit.
const EPSILON: f64 = 0.1;

/// Weight of a crash relative to one newly covered edge.
const CRASH_REWARD: u64 = 10;

/// Splice participants need at least this many bytes.
const MIN_SPLICE_LEN: usize = 4;

/// The two top-level mutation operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Havoc,
    Splice,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Havoc => write!(f, "havoc"),
            Operator::Splice => write!(f, "splice"),
        }
    }
}

/// Reward bookkeeping for one operator.
#[derive(Debug, Default, Clone)]
pub struct OperatorStats {
    uses: u64,
    reward: u64,
    crashes: u64,
}

impl OperatorStats {
    /// Average payoff per use; crashes count ten-fold.
    pub fn score(&self) -> f64 {
        (self.reward + CRASH_REWARD * self.crashes) as f64 / self.uses.max(1) as f64
    }

    pub fn uses(&self) -> u64 {
        self.uses
    }

    pub fn crashes(&self) -> u64 {
        self.crashes
    }
}

/// Generates mutated children into the current-input file and learns which
/// operator pays off.
#[derive(Debug)]
pub struct MutationEngine {
    dictionary: Dictionary,
    epsilon: f64,
    havoc: OperatorStats,
    splice: OperatorStats,
}

impl MutationEngine {
    pub fn new(dictionary: Dictionary) -> Self {
        Self::with_epsilon(dictionary, EPSILON)
    }

    /// An engine with a custom exploration rate. Zero makes selection purely
    /// greedy.
    pub fn with_epsilon(dictionary: Dictionary, epsilon: f64) -> Self {
        Self {
            dictionary,
            epsilon,
            havoc: OperatorStats::default(),
            splice: OperatorStats::default(),
        }
    }

    pub fn stats(&self, operator: Operator) -> &OperatorStats {
        match operator {
            Operator::Havoc => &self.havoc,
            Operator::Splice => &self.splice,
        }
    }

    /// Epsilon-greedy operator choice: explore uniformly with probability
    /// epsilon, otherwise exploit the higher-scoring operator (ties go to
    /// havoc).
    pub fn select_operator<R: Rng>(&self, rng: &mut R) -> Operator {
        if rng.gen::<f64>() < self.epsilon {
            if rng.gen::<bool>() {
                Operator::Havoc
            } else {
                Operator::Splice
            }
        } else if self.havoc.score() >= self.splice.score() {
            Operator::Havoc
        } else {
            Operator::Splice
        }
    }

    /// Produces one mutated child of `seed` at `out`.
    ///
    /// Havoc rewrites a havoc'd copy of the seed file; splice combines the
    /// seed with a second one and havocs the spliced buffer. A seed below the
    /// havoc minimum leaves `out` untouched.
    pub fn apply<R: Rng>(
        &self,
        operator: Operator,
        seed: &Seed,
        queue: &SeedQueue,
        out: &Path,
        rng: &mut R,
    ) -> io::Result<()> {
        match operator {
            Operator::Havoc => self.havoc_file(seed.path(), out, rng),
            Operator::Splice => self.splice(seed, queue, out, rng),
        }
    }

    /// Feeds one run's outcome back into the bandit. `new_edges` is the
    /// number of edges first covered by this child (zero for crashes).
    pub fn record(&mut self, operator: Operator, new_edges: usize, crashed: bool) {
        let stats = match operator {
            Operator::Havoc => &mut self.havoc,
            Operator::Splice => &mut self.splice,
        };
        stats.uses += 1;
        stats.reward += new_edges as u64;
        if crashed {
            stats.crashes += 1;
        }
    }

    fn havoc_file<R: Rng>(&self, seed_path: &Path, out: &Path, rng: &mut R) -> io::Result<()> {
        let mut data = fs::read(seed_path)?;
        if data.len() < havoc::MIN_INPUT_LEN {
            log::debug!("seed {} too short to havoc", seed_path.display());
            return Ok(());
        }
        havoc::havoc_bytes(&mut data, &self.dictionary, rng);
        fs::write(out, &data)
    }

    fn splice<R: Rng>(
        &self,
        seed: &Seed,
        queue: &SeedQueue,
        out: &Path,
        rng: &mut R,
    ) -> io::Result<()> {
        let Some(other) = queue.pick_other(seed.id(), rng) else {
            return self.havoc_file(seed.path(), out, rng);
        };
        let first = fs::read(seed.path())?;
        let second = fs::read(other.path())?;
        if first.len() < MIN_SPLICE_LEN || second.len() < MIN_SPLICE_LEN {
            return self.havoc_file(seed.path(), out, rng);
        }
        let split_first = rng.gen_range(1..=first.len() - 2);
        let split_second = rng.gen_range(1..=second.len() - 2);
        let mut spliced = splice_buffers(&first, &second, split_first, split_second);
        havoc::havoc_bytes(&mut spliced, &self.dictionary, rng);
        fs::write(out, &spliced)
    }
}

/// Prefix of `first` up to `split_first` followed by the suffix of `second`
/// from `split_second`.
fn splice_buffers(first: &[u8], second: &[u8], split_first: usize, split_second: usize) -> Vec<u8> {
    let mut spliced = Vec::with_capacity(split_first + second.len() - split_second);
    spliced.extend_from_slice(&first[..split_first]);
    spliced.extend_from_slice(&second[split_second..]);
    spliced
}
