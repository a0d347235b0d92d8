use std::path::PathBuf;

use clap::Parser;
use starkup_deploy::Network;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "starkup")]
#[command(
    author,
    version,
    about = "Declare, deploy and wire up the referral contracts on Starknet"
)]
pub struct Cli {
    /// The network to deploy to (devnet, testnet or mainnet).
    #[arg(env = "STARKUP_NETWORK")]
    pub network: Network,

    /// The verbosity level.
    #[arg(short, long, env = "STARKUP_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file.
    ///
    /// If not provided, `Starkup.toml` is read from the working directory when present.
    #[arg(short, long, alias = "conf", env = "STARKUP_CONFIG")]
    pub config: Option<PathBuf>,
}
