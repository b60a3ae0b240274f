//! Session statistics: the rolling execution-time average the power schedule
//! feeds on, plus periodic progress reporting to the log and to a JSON
//! snapshot on disk.

use std::fs::File;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Minimum distance between two progress reports.
const REPORT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug)]
pub struct SessionStats {
    start: Instant,
    last_report: Instant,
    total_exec_time: Duration,
    executions: u64,
    crashes: u64,
    timeouts: u64,
    cycles: u64,
}

/// One point-in-time view of the session, as written to the stats file.
#[derive(Debug, Serialize)]
struct Snapshot {
    uptime_secs: u64,
    executions: u64,
    execs_per_sec: f64,
    crashes: u64,
    timeouts: u64,
    cycles: u64,
    edges_covered: usize,
    queue_len: usize,
}

impl SessionStats {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_report: now,
            total_exec_time: Duration::ZERO,
            executions: 0,
            crashes: 0,
            timeouts: 0,
            cycles: 0,
        }
    }

    pub fn record_execution(&mut self, elapsed: Duration) {
        self.executions += 1;
        self.total_exec_time += elapsed;
    }

    pub fn record_crash(&mut self) {
        self.crashes += 1;
    }

    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub fn record_cycle(&mut self) {
        self.cycles += 1;
    }

    pub fn executions(&self) -> u64 {
        self.executions
    }

    pub fn crashes(&self) -> u64 {
        self.crashes
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Mean target execution time in seconds, zero before the first run.
    pub fn avg_exec_time(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.total_exec_time.as_secs_f64() / self.executions as f64
        }
    }

    pub fn should_report(&self) -> bool {
        self.last_report.elapsed() >= REPORT_INTERVAL
    }

    /// Logs a progress line and refreshes the on-disk snapshot.
    pub fn report(
        &mut self,
        edges_covered: usize,
        queue_len: usize,
        stats_file: &Path,
    ) {
        self.last_report = Instant::now();
        let snapshot = self.snapshot(edges_covered, queue_len);
        log::info!(
            "execs {} ({:.0}/sec), edges {}, queue {}, crashes {}, cycles {}",
            snapshot.executions,
            snapshot.execs_per_sec,
            snapshot.edges_covered,
            snapshot.queue_len,
            snapshot.crashes,
            snapshot.cycles,
        );
        if let Err(err) = self.write_snapshot(&snapshot, stats_file) {
            log::warn!("could not write stats to {}: {err}", stats_file.display());
        }
    }

    fn snapshot(&self, edges_covered: usize, queue_len: usize) -> Snapshot {
        let uptime = self.start.elapsed();
        let execs_per_sec = if uptime.as_secs_f64() > 0.0 {
            self.executions as f64 / uptime.as_secs_f64()
        } else {
            0.0
        };
        Snapshot {
            uptime_secs: uptime.as_secs(),
            executions: self.executions,
            execs_per_sec,
            crashes: self.crashes,
            timeouts: self.timeouts,
            cycles: self.cycles,
            edges_covered,
            queue_len,
        }
    }

    fn write_snapshot(&self, snapshot: &Snapshot, stats_file: &Path) -> io::Result<()> {
        let file = File::create(stats_file)?;
        serde_json::to_writer_pretty(file, snapshot)?;
        Ok(())
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_tracks_recorded_executions() {
        let mut stats = SessionStats::new();
        assert_eq!(stats.avg_exec_time(), 0.0);

        stats.record_execution(Duration::from_millis(100));
        stats.record_execution(Duration::from_millis(300));
        assert!((stats.avg_exec_time() - 0.2).abs() < 1e-9);
        assert_eq!(stats.executions(), 2);
    }

    #[test]
    fn snapshot_lands_on_disk_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let mut stats = SessionStats::new();
        stats.record_execution(Duration::from_millis(5));
        stats.record_crash();
        stats.report(17, 3, &path);

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["executions"], 1);
        assert_eq!(parsed["crashes"], 1);
        assert_eq!(parsed["edges_covered"], 17);
        assert_eq!(parsed["queue_len"], 3);
    }
}
