//! Edge coverage feedback: the shared-memory trace map written by the
//! instrumented target, and the fuzzer-side bookkeeping derived from it.
//!
//! The target attaches the System V segment whose id it finds in
//! [`SHM_ENV_VAR`] and bumps one byte per control-flow edge. The fuzzer only
//! ever zeroes the map and reads it back; any non-zero byte counts as "edge
//! exercised in this run".

use std::collections::HashSet;

use nix::libc;

use crate::error::{Error, Result};

/// Number of entries in the coverage map, matching the AFL instrumentation.
pub const MAP_SIZE: usize = 1 << 16;

/// Environment variable through which the target learns the segment id.
pub const SHM_ENV_VAR: &str = "__AFL_SHM_ID";

/// Index of one edge in the coverage map.
pub type EdgeId = u16;

/// Owner of the shared-memory coverage map.
///
/// The segment is created private and removed again when this value drops,
/// so a fuzzer exit (normal or by panic unwind) never leaks it.
#[derive(Debug)]
pub struct CoverageShm {
    id: i32,
    base: *mut u8,
}

impl CoverageShm {
    pub fn new() -> Result<Self> {
        // Safety: plain libc calls; the returned mapping is MAP_SIZE bytes
        // and stays valid until shmdt in Drop.
        let id = unsafe {
            libc::shmget(
                libc::IPC_PRIVATE,
                MAP_SIZE,
                libc::IPC_CREAT | libc::IPC_EXCL | 0o600,
            )
        };
        if id < 0 {
            return Err(Error::SharedMemory(format!(
                "shmget failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        let base = unsafe { libc::shmat(id, std::ptr::null(), 0) };
        if base as isize == -1 {
            let attach_err = std::io::Error::last_os_error();
            unsafe {
                libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut());
            }
            return Err(Error::SharedMemory(format!(
                "shmat failed for segment {id}: {attach_err}"
            )));
        }
        log::debug!("created coverage shared memory, shmid {id}");
        Ok(Self {
            id,
            base: base.cast(),
        })
    }

    /// The System V segment id, exported to the target's environment.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Zeroes the whole map. Called immediately before each run request.
    pub fn clear(&mut self) {
        unsafe {
            std::ptr::write_bytes(self.base, 0, MAP_SIZE);
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.base, MAP_SIZE) }
    }

    /// The edge set of the last run.
    pub fn edges(&self) -> HashSet<EdgeId> {
        extract_edges(self.as_slice())
    }

    #[cfg(test)]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.base, MAP_SIZE) }
    }
}

impl Drop for CoverageShm {
    fn drop(&mut self) {
        log::debug!("removing coverage shared memory, shmid {}", self.id);
        unsafe {
            if libc::shmdt(self.base.cast()) != 0 {
                log::warn!(
                    "shmdt failed for segment {}: {}",
                    self.id,
                    std::io::Error::last_os_error()
                );
            }
            if libc::shmctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) != 0 {
                log::warn!(
                    "failed to remove shared memory segment {}: {}",
                    self.id,
                    std::io::Error::last_os_error()
                );
            }
        }
    }
}

/// Indices of all non-zero map bytes.
pub fn extract_edges(map: &[u8]) -> HashSet<EdgeId> {
    map.iter()
        .enumerate()
        .filter(|(_, &byte)| byte != 0)
        .map(|(idx, _)| idx as EdgeId)
        .collect()
}

/// Union of the edge sets of every retained seed.
#[derive(Debug, Default)]
pub struct GlobalCoverage {
    edges: HashSet<EdgeId>,
}

impl GlobalCoverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// How many edges of `edges` are not seen globally yet. Measured before
    /// any merge, this is the discovery reward of a run.
    pub fn count_new(&self, edges: &HashSet<EdgeId>) -> usize {
        edges.difference(&self.edges).count()
    }

    pub fn merge(&mut self, edges: &HashSet<EdgeId>) {
        self.edges.extend(edges.iter().copied());
    }
}
