//! The core fuzzing session: dry run of the initial corpus, then the
//! indefinite select/mutate/execute/observe loop.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::SeedableRng;
use signal_hook::consts::TERM_SIGNALS;

use crate::config::FuzzerConfig;
use crate::corpus::{SeedId, SeedQueue};
use crate::coverage::{CoverageShm, EdgeId, GlobalCoverage};
use crate::error::Result;
use crate::executor::{classify, status::signal_name, ExitClass, ForkserverExecutor};
use crate::mutation::{Dictionary, MutationEngine, Operator};
use crate::schedule::{power_schedule, CycleScheduler};
use crate::stats::SessionStats;

/// All state of one fuzzing session, owned in one place and threaded through
/// the loop.
pub struct Fuzzer {
    config: FuzzerConfig,
    executor: ForkserverExecutor,
    queue: SeedQueue,
    global: GlobalCoverage,
    scheduler: CycleScheduler,
    engine: MutationEngine,
    stats: SessionStats,
    rng: StdRng,
}

impl Fuzzer {
    /// Brings up the shared-memory map and the fork server and assembles the
    /// session. [`FuzzerConfig::prepare`] must have run already.
    pub fn new(config: FuzzerConfig) -> Result<Self> {
        let dictionary = match &config.dictionary_file {
            Some(path) => Dictionary::load(path)?,
            None => Dictionary::default(),
        };
        let map = CoverageShm::new()?;
        let executor = ForkserverExecutor::new(&config, map)?;
        Ok(Self {
            config,
            executor,
            queue: SeedQueue::new(),
            global: GlobalCoverage::new(),
            scheduler: CycleScheduler::new(0),
            engine: MutationEngine::new(dictionary),
            stats: SessionStats::new(),
            rng: StdRng::from_entropy(),
        })
    }

    /// Replays the initial corpus, then fuzzes until interrupted.
    pub fn run(&mut self) -> Result<()> {
        self.dry_run()?;
        self.fuzz_loop()
    }

    /// Replays every file in the queue folder once. Inputs that crash or time
    /// out are dropped; the rest become the initial seeds.
    fn dry_run(&mut self) -> Result<()> {
        let mut corpus: Vec<PathBuf> = fs::read_dir(&self.config.queue_folder)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        corpus.sort();

        for path in corpus {
            fs::copy(&path, &self.config.current_input)?;
            let execution = self.executor.run()?;
            match classify(execution.status) {
                ExitClass::Timeout => {
                    log::warn!("seed {} timed out during the dry run", path.display());
                    continue;
                }
                ExitClass::Crash { signal, .. } => {
                    log::warn!(
                        "seed {} crashed during the dry run ({})",
                        path.display(),
                        signal_name(signal)
                    );
                    continue;
                }
                ExitClass::Normal => {}
            }
            let edges = self.executor.edges();
            self.global.merge(&edges);
            self.stats.record_execution(execution.elapsed);
            let id = self.queue.add(path, edges, execution.elapsed)?;
            log::debug!("admitted seed {id}");
        }

        self.queue.recompute_favored();
        self.scheduler = CycleScheduler::new(self.queue.len());
        log::info!(
            "dry run finished: {} seeds, initial coverage {} edges",
            self.queue.len(),
            self.global.len()
        );
        Ok(())
    }

    /// The main loop. Returns cleanly on an empty queue or a termination
    /// signal; everything else it reports through the error type.
    fn fuzz_loop(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            log::warn!("no seeds survived the dry run, nothing to fuzz");
            return Ok(());
        }

        let quitting = Arc::new(AtomicBool::new(false));
        for signal in TERM_SIGNALS {
            signal_hook::flag::register(*signal, Arc::clone(&quitting))?;
        }
        log::info!("entering the fuzzing loop, press Ctrl-C to stop");

        'session: loop {
            let Some(selection) = self.scheduler.next(&self.queue, &mut self.rng) else {
                log::warn!("no seeds available");
                break;
            };
            if selection.new_cycle {
                self.stats.record_cycle();
                self.queue.recompute_favored();
                log::info!("starting cycle {}", self.stats.cycles());
            }

            let budget = power_schedule(
                self.queue.get(selection.seed),
                self.stats.avg_exec_time(),
            );
            log::debug!("fuzzing seed {} with {budget} mutations", selection.seed);

            for _ in 0..budget {
                if quitting.load(Ordering::Relaxed) {
                    log::info!("received a termination signal, ending the session");
                    break 'session;
                }

                let operator = self.engine.select_operator(&mut self.rng);
                if let Err(err) = self.engine.apply(
                    operator,
                    self.queue.get(selection.seed),
                    &self.queue,
                    &self.config.current_input,
                    &mut self.rng,
                ) {
                    log::warn!("skipping a {operator} mutation: {err}");
                    continue;
                }

                let execution = self.executor.run()?;
                self.stats.record_execution(execution.elapsed);

                match classify(execution.status) {
                    ExitClass::Timeout => {
                        self.stats.record_timeout();
                        log::debug!("timeout, skipping this input");
                    }
                    ExitClass::Crash { signal, core_dump } => {
                        self.stats.record_crash();
                        let crash_path = self.save_crash(selection.seed)?;
                        log::info!(
                            "crash! {}{} saved to {}",
                            signal_name(signal),
                            if core_dump { " (core dumped)" } else { "" },
                            crash_path.display()
                        );
                        self.engine.record(operator, 0, true);
                    }
                    ExitClass::Normal => {
                        let edges = self.executor.edges();
                        let discovered = self.global.count_new(&edges);
                        if discovered > 0 {
                            self.global.merge(&edges);
                            self.admit_seed(edges, execution.elapsed)?;
                        }
                        self.engine.record(operator, discovered, false);
                    }
                }

                if self.stats.should_report() {
                    self.stats.report(
                        self.global.len(),
                        self.queue.len(),
                        &self.config.stats_file,
                    );
                    let havoc = self.engine.stats(Operator::Havoc);
                    let splice = self.engine.stats(Operator::Splice);
                    log::info!(
                        "bandit: havoc score {:.2} ({} uses, {} crashes), \
                         splice score {:.2} ({} uses, {} crashes)",
                        havoc.score(),
                        havoc.uses(),
                        havoc.crashes(),
                        splice.score(),
                        splice.uses(),
                        splice.crashes(),
                    );
                }
            }
        }
        Ok(())
    }

    /// Retains the current input as a new seed named after its id.
    fn admit_seed(&mut self, edges: HashSet<EdgeId>, elapsed: Duration) -> Result<SeedId> {
        let path = self
            .config
            .queue_folder
            .join(format!("id_{}", self.queue.len()));
        fs::copy(&self.config.current_input, &path)?;
        let id = self.queue.add(path, edges, elapsed)?;
        log::info!(
            "new coverage, total {} edges, seed {id} admitted",
            self.global.len()
        );
        Ok(id)
    }

    /// Copies the crashing input into the crashes folder, named by wall time
    /// and the seed the mutation started from.
    fn save_crash(&self, origin: SeedId) -> Result<PathBuf> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        let origin_name = self
            .queue
            .get(origin)
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| origin.to_string());
        let crash_path = self
            .config
            .crashes_folder
            .join(format!("crash_{timestamp}_{origin_name}"));
        fs::copy(&self.config.current_input, &crash_path)?;
        Ok(crash_path)
    }
}
