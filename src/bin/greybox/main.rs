mod cli;

use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use greybox::config::FuzzerConfig;
use greybox::fuzzer::Fuzzer;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = cli::Cli::parse();

    let config = FuzzerConfig::new(
        cli.executable,
        cli.arguments,
        cli.in_dir,
        cli.out_dir,
        Duration::from_millis(cli.timeout),
        cli.dictionary,
        cli.debug_child,
    );
    config.prepare().context("preparing the output workspace")?;

    let mut fuzzer = Fuzzer::new(config).context("setting up the fuzzing session")?;
    fuzzer.run().context("fuzzing session failed")?;

    Ok(())
}
