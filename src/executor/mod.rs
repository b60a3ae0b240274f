//! Target execution: the fork-server driver and the coverage-observing
//! executor built on top of it.

use std::collections::HashSet;
use std::time::Duration;

use crate::config::FuzzerConfig;
use crate::coverage::{CoverageShm, EdgeId};
use crate::error::Result;

pub mod forkserver;
pub mod status;

pub use forkserver::{Forkserver, FORKSRV_FD};
pub use status::{classify, ExitClass, TIMEOUT_STATUS};

/// Outcome of one target execution.
#[derive(Debug, Clone, Copy)]
pub struct Execution {
    /// Raw wait status, or [`TIMEOUT_STATUS`] for a killed run.
    pub status: i32,
    /// Wall time from run request to status report.
    pub elapsed: Duration,
}

/// Runs test cases through the fork server and reads the coverage each run
/// left in shared memory.
///
/// The map is zeroed right before every run request; grandchildren execute
/// strictly one at a time, so the edges read afterwards belong to exactly
/// that run.
#[derive(Debug)]
pub struct ForkserverExecutor {
    forkserver: Forkserver,
    map: CoverageShm,
}

impl ForkserverExecutor {
    /// Takes ownership of the coverage map and brings up the fork server
    /// attached to it.
    pub fn new(config: &FuzzerConfig, map: CoverageShm) -> Result<Self> {
        let forkserver = Forkserver::start(config, map.id())?;
        Ok(Self { forkserver, map })
    }

    /// Executes the target once on the current input file.
    pub fn run(&mut self) -> Result<Execution> {
        self.map.clear();
        self.forkserver.run_once()
    }

    /// Edge set of the last run.
    pub fn edges(&self) -> HashSet<EdgeId> {
        self.map.edges()
    }
}
