//! Holdfast Node Binary
//!
//! Entry point for the Holdfast finality node.

#![allow(missing_docs)]

mod sim;

use clap::{Parser, Subcommand};
use holdfast_chainspec::HoldfastChainSpec;
use tracing_subscriber::EnvFilter;

/// Holdfast BTC-staked finality node
#[derive(Debug, Parser)]
#[command(name = "holdfast")]
#[command(about = "BTC-stake-backed finality gadget for rollup blocks")]
struct Cli {
    /// Chain to run against (mainnet, testnet, dev)
    #[arg(long, default_value = "dev", env = "HOLDFAST_CHAIN")]
    chain: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the resolved chain specification as JSON
    Spec,
    /// Run a deterministic local simulation of the finality pipeline
    Sim(sim::SimArgs),
}

fn main() -> eyre::Result<()> {
    // Enable backtraces
    if std::env::var_os("RUST_BACKTRACE").is_none() {
        unsafe { std::env::set_var("RUST_BACKTRACE", "1") };
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let spec = HoldfastChainSpec::from_name(&cli.chain)
        .ok_or_else(|| eyre::eyre!("unknown chain: {}", cli.chain))?;
    spec.params.validate()?;

    match cli.command {
        Command::Spec => println!("{}", serde_json::to_string_pretty(spec)?),
        Command::Sim(args) => sim::run(spec, args)?,
    }
    Ok(())
}
