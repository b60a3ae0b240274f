//! greybox, a coverage-guided grey-box fuzzer for AFL-instrumented targets.

pub mod config;
pub mod corpus;
pub mod coverage;
pub mod executor;
pub mod fuzzer;
pub mod mutation;
pub mod schedule;
pub mod stats;

mod error;

pub use error::{Error, Result};
