//! The command line interface of the fuzzer

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(about = "A lightweight coverage-guided grey-box fuzzer")]
pub struct Cli {
    #[arg(
        help = "The instrumented binary we want to fuzz",
        name = "EXEC",
        required = true
    )]
    pub executable: PathBuf,

    #[arg(
        help = "Arguments passed to the target; @@ is replaced with the current input file",
        name = "arguments",
        num_args(1..),
        allow_hyphen_values = true,
    )]
    pub arguments: Vec<String>,

    #[arg(
        help = "The directory to read initial inputs from ('seeds')",
        short = 'i',
        long = "in-dir",
        required = true
    )]
    pub in_dir: PathBuf,

    #[arg(
        help = "The directory to store all outputs in",
        short = 'o',
        long = "out-dir",
        required = true
    )]
    pub out_dir: PathBuf,

    #[arg(
        help = "Timeout for each individual execution, in milliseconds",
        short = 't',
        long = "timeout",
        default_value = "1200"
    )]
    pub timeout: u64,

    #[arg(
        help = "Dictionary file with tokens for the mutation engine",
        short = 'x',
        long = "dict"
    )]
    pub dictionary: Option<PathBuf>,

    #[arg(
        help = "If not set, the child's stdout and stderror will be redirected to /dev/null",
        short = 'd',
        long = "debug-child",
        default_value = "false"
    )]
    pub debug_child: bool,
}
