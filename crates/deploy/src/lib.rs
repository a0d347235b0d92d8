//! starkup-deploy - Deployment library for Starknet contracts.
//!
//! This crate declares compiled Cairo contracts, deploys them, and replays the
//! configuration calls that wire them together. Identifiers produced along
//! the way are recorded per network, so later runs and later steps can refer
//! to them.
//!
//! ```rust,ignore
//! let config = DeployConfig::load(None)?;
//! let network_config = config.network(Network::Devnet)?;
//!
//! let client = StarkliClient::connect(&config.starkli, network_config).await?;
//! let registry = ArtifactRegistry::new(&config.build_dir);
//! let recorder = StateRecorder::open(&config.state_dir, Network::Devnet)?;
//!
//! let plan = network_plan(Network::Devnet, &config.contracts, &network_config.constants)?;
//! let mut orchestrator = Orchestrator::new(&client, &registry, &recorder, DeclarePolicy::Redeclare)?;
//! orchestrator.run(&plan).await?;
//! ```

mod artifact;
pub use artifact::{ArtifactRegistry, CompiledArtifact};

pub mod client;
pub use client::{Call, ChainClient, Declared, InMemoryChain, StarkliClient, Submission, TxStatus};

mod config;
pub use config::{CONFIG_FILENAME, DeployConfig, ENV_PREFIX, ETH_TOKEN_ADDRESS, NetworkConfig, PlanConstants};

mod error;
pub use error::{DeployError, PlanError, ReferenceKind};

pub mod felt;
pub use starknet::core::types::Felt;

mod fs;

mod network;
pub use network::Network;

mod orchestrator;
pub use orchestrator::{DeclarePolicy, Orchestrator};

pub mod plan;
pub use plan::{Arg, Plan, Step, network_plan};

mod report;
pub use report::{RunReport, StepOutcome, StepReport, summary_table};

pub mod rpc;

mod state;
pub use state::{
    ClassRecord, Declarations, DeploymentRecord, DeploymentState, Deployments, StateRecorder,
};
