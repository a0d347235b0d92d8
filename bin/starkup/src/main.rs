//! starkup declares, deploys and configures the referral contracts on a Starknet network.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;

use cli::Cli;
use starkup_deploy::{
    ArtifactRegistry, DeclarePolicy, DeployConfig, Orchestrator, StarkliClient, StateRecorder,
    network_plan, summary_table,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = DeployConfig::load(cli.config.as_deref())?;

    let network_config = config.network(cli.network)?;
    let policy = DeclarePolicy::from_reuse_flag(config.reuse);
    let plan = network_plan(cli.network, &config.contracts, &network_config.constants)?;

    let registry = ArtifactRegistry::new(&config.build_dir);
    let recorder = StateRecorder::open(&config.state_dir, cli.network)?;

    tracing::info!(
        network = %cli.network,
        build_dir = %registry.build_dir().display(),
        state_dir = %recorder.dir().display(),
        policy = %policy,
        "Loaded deployment plan"
    );

    let client = StarkliClient::connect(&config.starkli, network_config).await?;
    let mut orchestrator = Orchestrator::new(&client, &registry, &recorder, policy)?;

    let result = orchestrator.run(&plan).await;

    // Whatever happened, show what is on record now.
    println!("{}", summary_table(orchestrator.state()));

    let report = result.with_context(|| format!("Deployment to {} failed", cli.network))?;

    tracing::info!(
        steps = report.steps.len(),
        reused = report.reused(),
        "✓ Deployment complete!"
    );

    Ok(())
}
