//! The settings record driving a fuzzing session, plus preparation of the
//! on-disk output workspace.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Everything the fuzzer needs to know about one session.
///
/// Built once (by the command line front end) and treated as read-only
/// afterwards.
#[derive(Debug, Clone)]
pub struct FuzzerConfig {
    /// The instrumented target binary.
    pub target: PathBuf,
    /// Arguments passed to the target. Occurrences of `@@` have already been
    /// replaced with the path of [`Self::current_input`].
    pub target_args: Vec<String>,
    /// Directory holding the initial seed corpus.
    pub seeds_folder: PathBuf,
    /// Working seed directory, populated from `seeds_folder` at startup.
    pub queue_folder: PathBuf,
    /// Where crashing inputs are copied to.
    pub crashes_folder: PathBuf,
    /// The file every generated test case is written to before a run.
    pub current_input: PathBuf,
    /// Optional token dictionary for the mutation engine.
    pub dictionary_file: Option<PathBuf>,
    /// Periodic session statistics snapshot.
    pub stats_file: PathBuf,
    /// Root of the output workspace.
    pub out_dir: PathBuf,
    /// Hard limit for a single target execution.
    pub exec_timeout: Duration,
    /// Pass the target's stdout/stderr through instead of discarding them.
    pub debug_child: bool,
}

impl FuzzerConfig {
    /// Derives the full settings record from the user-facing knobs.
    pub fn new(
        target: PathBuf,
        target_args: Vec<String>,
        seeds_folder: PathBuf,
        out_dir: PathBuf,
        exec_timeout: Duration,
        dictionary_file: Option<PathBuf>,
        debug_child: bool,
    ) -> Self {
        let current_input = out_dir.join(".cur_input");
        let target_args = target_args
            .into_iter()
            .map(|arg| {
                if arg == "@@" {
                    current_input.display().to_string()
                } else {
                    arg
                }
            })
            .collect();
        Self {
            target,
            target_args,
            seeds_folder,
            queue_folder: out_dir.join("queue"),
            crashes_folder: out_dir.join("crashes"),
            current_input,
            dictionary_file,
            stats_file: out_dir.join("stats.json"),
            out_dir,
            exec_timeout,
            debug_child,
        }
    }

    /// Validates the inputs and lays out the output workspace: the out dir
    /// must be empty or absent, `queue/` and `crashes/` are created, and the
    /// seed corpus is copied into `queue/`.
    pub fn prepare(&self) -> Result<()> {
        if !self.target.is_file() {
            return Err(Error::Config(format!(
                "target [{}] does not exist",
                self.target.display()
            )));
        }
        if !self.seeds_folder.is_dir() {
            return Err(Error::Config(format!(
                "seeds folder [{}] is not a directory",
                self.seeds_folder.display()
            )));
        }
        if self.out_dir.exists() {
            if self.out_dir.read_dir()?.next().is_some() {
                return Err(Error::Config(format!(
                    "out dir [{}] must be empty or not exist",
                    self.out_dir.display()
                )));
            }
        } else {
            fs::create_dir_all(&self.out_dir)?;
        }
        fs::create_dir(&self.queue_folder)?;
        fs::create_dir(&self.crashes_folder)?;
        copy_corpus(&self.seeds_folder, &self.queue_folder)?;
        Ok(())
    }
}

/// Copies the regular files of `from` into `to`, flat.
fn copy_corpus(from: &Path, to: &Path) -> Result<()> {
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            fs::copy(entry.path(), to.join(entry.file_name()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(root: &Path) -> FuzzerConfig {
        FuzzerConfig::new(
            root.join("target"),
            vec!["@@".into(), "-x".into()],
            root.join("seeds"),
            root.join("out"),
            Duration::from_millis(1200),
            None,
            false,
        )
    }

    #[test]
    fn at_at_is_replaced_with_current_input() {
        let config = config_for(Path::new("/work"));
        assert_eq!(config.target_args[0], "/work/out/.cur_input");
        assert_eq!(config.target_args[1], "-x");
    }

    #[test]
    fn prepare_copies_seeds_and_creates_dirs() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("target"), b"#!/bin/sh\n").unwrap();
        fs::create_dir(root.path().join("seeds")).unwrap();
        fs::write(root.path().join("seeds").join("a"), b"aaaa").unwrap();
        fs::write(root.path().join("seeds").join("b"), b"bbbb").unwrap();

        let config = config_for(root.path());
        config.prepare().unwrap();

        assert!(config.queue_folder.join("a").is_file());
        assert!(config.queue_folder.join("b").is_file());
        assert!(config.crashes_folder.is_dir());
    }

    #[test]
    fn prepare_rejects_non_empty_out_dir() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("target"), b"").unwrap();
        fs::create_dir(root.path().join("seeds")).unwrap();
        fs::create_dir(root.path().join("out")).unwrap();
        fs::write(root.path().join("out").join("stale"), b"x").unwrap();

        let config = config_for(root.path());
        assert!(matches!(config.prepare(), Err(Error::Config(_))));
    }
}
