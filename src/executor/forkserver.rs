//! The fork-server protocol driver.
//!
//! The target binary is spawned once with its control/status pipes placed on
//! the fixed descriptors its instrumentation expects. Its startup stub then
//! writes a 4-byte hello, and for every run request (any 4 bytes on the
//! control pipe) forks a grandchild on the current input, reporting first the
//! grandchild's pid and then its wait status, 4 bytes each.
//!
//! The driver is a small state machine: the handshake happens in
//! [`Forkserver::start`], so an existing value is always ready for the
//! request/pid/status sequence of [`Forkserver::run_once`]. A status word
//! that fails to arrive in time means a stuck grandchild; it is killed via
//! the pid reported earlier and its late status drained, keeping the framing
//! intact for the next run.

use std::io::{Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::libc;
use nix::sys::select::{pselect, FdSet};
use nix::sys::signal::{kill, SigSet, Signal};
use nix::sys::time::TimeSpec;
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use os_pipe::{PipeReader, PipeWriter};

use crate::config::FuzzerConfig;
use crate::coverage::SHM_ENV_VAR;
use crate::error::{Error, Result};
use crate::executor::status::TIMEOUT_STATUS;
use crate::executor::Execution;

/// Descriptor the instrumented target reads run requests from; the next one
/// up carries its status reports.
pub const FORKSRV_FD: i32 = 198;

/// How long to wait for the initial hello.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period for the status word of a freshly killed grandchild.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const KILL_SIGNAL: Signal = Signal::SIGKILL;

/// Pre-exec configuration of the fork-server child.
trait ConfigTarget {
    /// Duplicates the pipe ends onto the fixed fork-server descriptors.
    fn setpipe(&mut self, ctl_read: i32, st_write: i32) -> &mut Self;
}

impl ConfigTarget for Command {
    fn setpipe(&mut self, ctl_read: i32, st_write: i32) -> &mut Self {
        let func = move || {
            // Safety: dup2 is async-signal-safe; the source descriptors stay
            // open in the parent until after spawn.
            if unsafe { libc::dup2(ctl_read, FORKSRV_FD) } < 0 {
                return Err(std::io::Error::last_os_error());
            }
            if unsafe { libc::dup2(st_write, FORKSRV_FD + 1) } < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        };
        unsafe { self.pre_exec(func) }
    }
}

/// Communication channel with the persistent fork-server child.
#[derive(Debug)]
pub struct Forkserver {
    server: Child,
    st_pipe: PipeReader,
    ctl_pipe: PipeWriter,
    /// Pid of the grandchild currently executing, if any.
    child_pid: Option<Pid>,
    timeout: TimeSpec,
}

impl Forkserver {
    /// Spawns the target with the fork-server descriptors and shared-memory
    /// id in place and performs the hello handshake.
    pub fn start(config: &FuzzerConfig, shm_id: i32) -> Result<Self> {
        let (st_read, st_write) = os_pipe::pipe()?;
        let (ctl_read, ctl_write) = os_pipe::pipe()?;

        let (stdout, stderr) = if config.debug_child {
            (Stdio::inherit(), Stdio::inherit())
        } else {
            (Stdio::null(), Stdio::null())
        };

        let mut command = Command::new(&config.target);
        command
            .args(&config.target_args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .env(SHM_ENV_VAR, shm_id.to_string())
            .env("LD_BIND_NOW", "1")
            .setpipe(ctl_read.as_raw_fd(), st_write.as_raw_fd());

        let server = command.spawn().map_err(|err| {
            Error::ForkServer(format!(
                "could not spawn the fork server [{}]: {err}",
                config.target.display()
            ))
        })?;

        // the child-side ends live on in the child only
        drop(ctl_read);
        drop(st_write);

        let mut forkserver = Self {
            server,
            st_pipe: st_read,
            ctl_pipe: ctl_write,
            child_pid: None,
            timeout: TimeSpec::from_duration(config.exec_timeout),
        };

        match forkserver.read_status_timed(&TimeSpec::from_duration(HANDSHAKE_TIMEOUT))? {
            Some(hello) => {
                log::info!("fork server is up (hello {hello:#010x})");
                Ok(forkserver)
            }
            None => Err(Error::ForkServer(
                "no hello from the fork server; is the target instrumented?".into(),
            )),
        }
    }

    /// Runs the target once on the current input.
    ///
    /// Returns the raw wait status of the grandchild, or [`TIMEOUT_STATUS`]
    /// when it had to be killed, together with the wall time between the run
    /// request and the status report.
    pub fn run_once(&mut self) -> Result<Execution> {
        let timeout = self.timeout;
        let start = Instant::now();

        self.write_ctl(0)?;

        let pid = self
            .read_status_timed(&timeout)?
            .ok_or_else(|| Error::ForkServer("no pid from the fork server".into()))?;
        if pid <= 0 {
            return Err(Error::ForkServer(format!(
                "fork server reported nonsense pid {pid} (OOM?)"
            )));
        }
        self.child_pid = Some(Pid::from_raw(pid));

        let reported = self.read_status_timed(&timeout)?;
        let elapsed = start.elapsed();

        let status = match reported {
            Some(status) => {
                self.child_pid = None;
                status
            }
            None => {
                self.kill_stuck_child()?;
                TIMEOUT_STATUS
            }
        };

        Ok(Execution { status, elapsed })
    }

    /// Kills the grandchild whose status never arrived and drains the status
    /// word its death makes the stub emit.
    fn kill_stuck_child(&mut self) -> Result<()> {
        if let Some(pid) = self.child_pid.take() {
            log::debug!("run timed out, killing child {pid}");
            if let Err(err) = kill(pid, KILL_SIGNAL) {
                log::warn!("failed to kill stuck child {pid}: {err}");
            }
        }
        match self.read_status_timed(&TimeSpec::from_duration(DRAIN_TIMEOUT))? {
            Some(_) => Ok(()),
            None => Err(Error::ForkServer(
                "fork server went silent after a timed-out run".into(),
            )),
        }
    }

    /// Requests a run. The word's content is irrelevant to the stub.
    fn write_ctl(&mut self, value: i32) -> Result<()> {
        self.ctl_pipe
            .write_all(&value.to_ne_bytes())
            .map_err(|err| Error::ForkServer(format!("unable to request a run: {err}")))
    }

    /// Reads one 4-byte status word, giving up after `timeout`.
    fn read_status_timed(&mut self, timeout: &TimeSpec) -> Result<Option<i32>> {
        let raw_fd = self.st_pipe.as_raw_fd();
        let ready = loop {
            // Safety: the fd belongs to the pipe reader we hold.
            let st_read = unsafe { BorrowedFd::borrow_raw(raw_fd) };
            let mut readfds = FdSet::new();
            readfds.insert(&st_read);
            match pselect(
                Some(raw_fd + 1),
                &mut readfds,
                None,
                None,
                Some(timeout),
                Some(&SigSet::empty()),
            ) {
                Err(Errno::EINTR) => continue,
                other => break other?,
            }
        };
        if ready == 0 {
            return Ok(None);
        }
        let mut buf = [0u8; 4];
        self.st_pipe.read_exact(&mut buf).map_err(|err| {
            Error::ForkServer(format!("unable to read from the fork server: {err}"))
        })?;
        Ok(Some(i32::from_ne_bytes(buf)))
    }
}

impl Drop for Forkserver {
    fn drop(&mut self) {
        log::debug!("shutting down the fork server");

        if let Some(pid) = self.child_pid {
            let _ = kill(pid, KILL_SIGNAL);
        }

        let server_pid = Pid::from_raw(self.server.id() as i32);
        if let Err(err) = kill(server_pid, KILL_SIGNAL) {
            log::warn!("failed to deliver {KILL_SIGNAL} to fork server {server_pid}: {err}");
        } else if let Err(err) = waitpid(server_pid, None) {
            log::warn!("waitpid on fork server {server_pid} failed: {err}");
        }
    }
}
