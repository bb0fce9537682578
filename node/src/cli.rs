//! # CLI Interface
//!
//! Defines the command-line argument structure for `tally-node` using
//! `clap` derive. Two subcommands: `run` and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tally_engine::config::{DEFAULT_API_PORT, DEFAULT_METRICS_PORT};

use crate::logging::LogFormat;

/// Tally points ledger node.
///
/// Serves the wallet, transfer, gift and spend gateway over HTTP and
/// exposes Prometheus metrics on a separate port.
#[derive(Parser, Debug)]
#[command(
    name = "tally-node",
    about = "Tally points ledger node",
    version,
    propagate_version = true
)]
pub struct TallyNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway.
    Run(RunArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory for the sled database.
    ///
    /// Created on first run if it does not exist. When omitted the ledger
    /// lives in memory and is lost on exit.
    #[arg(long, short = 'd', env = "TALLY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Port for the REST gateway.
    #[arg(long, env = "TALLY_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "TALLY_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Shared secret that callers of `PUT /gifts` must send in the
    /// `x-mint-key` header. Minting is disabled when unset.
    #[arg(long, env = "TALLY_MINT_KEY", hide_env_values = true)]
    pub mint_key: Option<String>,

    /// Log output format.
    #[arg(long, value_enum, env = "TALLY_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Mint the demo wallets on startup if the ledger is empty.
    #[arg(long)]
    pub seed_demo: bool,

    /// After seeding, replay the demo transfers into the last demo wallet.
    #[arg(long, requires = "seed_demo")]
    pub replay_demo: bool,
}
