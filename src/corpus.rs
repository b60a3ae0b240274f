//! The seed queue: every input retained for further mutation, the inverted
//! edge index over it, and the favored-seed minimisation.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::coverage::EdgeId;
use crate::error::{Error, Result};

/// Dense, insertion-ordered seed identifier. The `i`-th seed added to the
/// queue has id `i`; ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeedId(pub usize);

impl fmt::Display for SeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One retained input. Immutable after creation except for the favored flag,
/// which belongs to the minimisation pass.
#[derive(Debug)]
pub struct Seed {
    id: SeedId,
    path: PathBuf,
    edges: HashSet<EdgeId>,
    exec_time: Duration,
    file_size: u64,
    favored: bool,
}

impl Seed {
    pub fn id(&self) -> SeedId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn edges(&self) -> &HashSet<EdgeId> {
        &self.edges
    }

    pub fn exec_time(&self) -> Duration {
        self.exec_time
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn is_favored(&self) -> bool {
        self.favored
    }

    /// Minimisation key; lower is better.
    pub fn valuation(&self) -> f64 {
        self.exec_time.as_secs_f64() * self.file_size as f64
    }
}

/// Append-only, id-indexed seed store with an edge to seed-ids inverted
/// index maintained on insertion.
#[derive(Debug, Default)]
pub struct SeedQueue {
    seeds: Vec<Seed>,
    edge_index: HashMap<EdgeId, Vec<SeedId>>,
}

impl SeedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    pub fn get(&self, id: SeedId) -> &Seed {
        &self.seeds[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Seed> {
        self.seeds.iter()
    }

    /// Admits a new seed, assigning the next dense id and extending the edge
    /// index with every edge the seed covers.
    pub fn add(
        &mut self,
        path: PathBuf,
        edges: HashSet<EdgeId>,
        exec_time: Duration,
    ) -> Result<SeedId> {
        let file_size = fs::metadata(&path)
            .map_err(|source| Error::Seed {
                path: path.clone(),
                source,
            })?
            .len();
        let id = SeedId(self.seeds.len());
        for &edge in &edges {
            self.edge_index.entry(edge).or_default().push(id);
        }
        self.seeds.push(Seed {
            id,
            path,
            edges,
            exec_time,
            file_size,
            favored: false,
        });
        Ok(id)
    }

    /// Recomputes the favored set: every seed is unmarked, then for each
    /// indexed edge the covering seed with the smallest `(valuation, id)` is
    /// marked. The marked seeds form a near-minimal cover of the global
    /// coverage.
    pub fn recompute_favored(&mut self) {
        let mut winners: HashSet<SeedId> = HashSet::new();
        for ids in self.edge_index.values() {
            let best = ids.iter().copied().min_by(|&a, &b| {
                self.seeds[a.0]
                    .valuation()
                    .total_cmp(&self.seeds[b.0].valuation())
                    .then(a.cmp(&b))
            });
            if let Some(best) = best {
                winners.insert(best);
            }
        }
        for seed in &mut self.seeds {
            seed.favored = winners.contains(&seed.id);
        }
        log::debug!(
            "favored recomputation done: {} of {} seeds favored",
            winners.len(),
            self.seeds.len()
        );
    }

    /// A uniformly chosen seed other than `id`, for splicing. `None` when the
    /// queue has no second seed.
    pub fn pick_other<R: Rng>(&self, id: SeedId, rng: &mut R) -> Option<&Seed> {
        let others: Vec<&Seed> = self.seeds.iter().filter(|seed| seed.id != id).collect();
        others.choose(rng).copied()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn seed_file(dir: &Path, name: &str, size: usize) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, vec![b'x'; size]).unwrap();
        path
    }

    fn millis(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn ids_are_dense_and_insertion_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = SeedQueue::new();
        for i in 0..5 {
            let path = seed_file(dir.path(), &format!("s{i}"), 8);
            let id = queue.add(path, HashSet::from([i as EdgeId]), millis(1)).unwrap();
            assert_eq!(id, SeedId(i));
        }
        assert_eq!(queue.len(), 5);
    }

    #[test]
    fn edge_index_contains_every_covering_seed() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let mut queue = SeedQueue::new();

        for i in 0..50 {
            let edges: HashSet<EdgeId> =
                (0..rng.gen_range(1..20)).map(|_| rng.gen_range(0..500)).collect();
            let path = seed_file(dir.path(), &format!("s{i}"), rng.gen_range(1..64));
            queue.add(path, edges, millis(rng.gen_range(1..50))).unwrap();
        }

        for seed in queue.iter() {
            for &edge in seed.edges() {
                assert!(
                    queue.edge_index[&edge].contains(&seed.id()),
                    "seed {} missing from index entry for edge {edge}",
                    seed.id()
                );
            }
        }
    }

    #[test]
    fn favored_pass_marks_exactly_one_minimal_seed_per_edge() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(99);
        let mut queue = SeedQueue::new();

        for i in 0..40 {
            let edges: HashSet<EdgeId> =
                (0..rng.gen_range(1..10)).map(|_| rng.gen_range(0..100)).collect();
            let path = seed_file(dir.path(), &format!("s{i}"), rng.gen_range(1..128));
            queue.add(path, edges, millis(rng.gen_range(1..100))).unwrap();
        }
        queue.recompute_favored();

        let covered: HashSet<EdgeId> = queue
            .iter()
            .flat_map(|seed| seed.edges().iter().copied())
            .collect();
        for edge in covered {
            let coverers = &queue.edge_index[&edge];
            let best = coverers
                .iter()
                .copied()
                .min_by(|&a, &b| {
                    queue
                        .get(a)
                        .valuation()
                        .total_cmp(&queue.get(b).valuation())
                        .then(a.cmp(&b))
                })
                .unwrap();
            assert!(queue.get(best).is_favored());
            // every edge is covered by at least one favored seed
            assert!(coverers.iter().any(|&id| queue.get(id).is_favored()));
        }
    }

    #[test]
    fn disjoint_edges_keep_both_seeds_favored() {
        // Seed a and seed b share edge 10; a has the smaller valuation, so a
        // wins the shared edge, and b stays favored through its private edge.
        let dir = tempfile::tempdir().unwrap();
        let mut queue = SeedQueue::new();

        let a = seed_file(dir.path(), "a", 10);
        let b = seed_file(dir.path(), "b", 10);
        let id_a = queue
            .add(a, HashSet::from([1, 10]), Duration::from_secs(1))
            .unwrap();
        let id_b = queue
            .add(b, HashSet::from([2, 10]), Duration::from_secs(2))
            .unwrap();
        queue.recompute_favored();

        assert!(queue.get(id_a).is_favored());
        assert!(queue.get(id_b).is_favored());
        // the shared edge belongs to the cheaper seed
        assert_eq!(queue.edge_index[&10], [id_a, id_b]);
    }

    #[test]
    fn pick_other_never_returns_the_current_seed() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let mut queue = SeedQueue::new();
        for i in 0..3 {
            let path = seed_file(dir.path(), &format!("s{i}"), 8);
            queue.add(path, HashSet::new(), millis(1)).unwrap();
        }
        for _ in 0..100 {
            let other = queue.pick_other(SeedId(1), &mut rng).unwrap();
            assert_ne!(other.id(), SeedId(1));
        }
    }
}
