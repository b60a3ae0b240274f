//! Error type shared by all fuzzer components.

use std::io;
use std::path::PathBuf;

/// Errors that abort the fuzzing session.
///
/// Per-run conditions (timeouts, crashes of the target) are not errors; they
/// are ordinary outcomes reported through
/// [`crate::executor::status::ExitClass`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("os error: {0}")]
    Os(#[from] nix::Error),

    #[error("shared memory error: {0}")]
    SharedMemory(String),

    #[error("fork server error: {0}")]
    ForkServer(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot read seed {}: {source}", path.display())]
    Seed {
        path: PathBuf,
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
