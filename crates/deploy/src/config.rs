//! Deployment configuration.
//!
//! Everything the plans need from the outside world (endpoints, signing
//! credentials, pre-existing contract addresses, numeric thresholds) lives in
//! [`DeployConfig`]. It is assembled by layering, in order:
//! 1. built-in defaults,
//! 2. the `Starkup.toml` file,
//! 3. `STARKUP_`-prefixed environment variables, with `__` separating nested
//!    keys (e.g. `STARKUP_NETWORKS__DEVNET__ACCOUNT_ADDRESS`).
//!
//! Field elements (addresses, encoded domains) are written as `0x`-prefixed
//! hex strings.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{DeployError, Felt, Network};

/// The default name for the configuration file.
pub const CONFIG_FILENAME: &str = "Starkup.toml";

/// Prefix of the environment variables overriding the configuration.
pub const ENV_PREFIX: &str = "STARKUP_";

/// Address of the ETH ERC-20 token on every public Starknet network and on devnet.
pub const ETH_TOKEN_ADDRESS: &str =
    "0x049d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Directory holding the Scarb build output (`*.contract_class.json`).
    pub build_dir: PathBuf,
    /// Directory holding one sub-directory of persisted records per network.
    pub state_dir: PathBuf,
    /// Contracts declared by every plan, in declaration order.
    pub contracts: Vec<String>,
    /// Reuse persisted class hashes instead of redeclaring.
    #[serde(default)]
    pub reuse: bool,
    /// Path or name of the `starkli` executable.
    pub starkli: String,
    /// Per-network settings, keyed by network name.
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        let networks = [Network::Devnet, Network::Testnet, Network::Mainnet]
            .into_iter()
            .map(|network| (network.to_string(), NetworkConfig::for_network(network)))
            .collect();

        Self {
            build_dir: PathBuf::from("target/dev"),
            state_dir: PathBuf::from("deployments"),
            contracts: vec![
                "referral_Naming".to_string(),
                "referral_Referral".to_string(),
            ],
            reuse: false,
            starkli: "starkli".to_string(),
            networks,
        }
    }
}

impl DeployConfig {
    /// Load the configuration.
    ///
    /// When `path` is given the file must exist; otherwise `Starkup.toml` is
    /// picked up from the working directory if present.
    pub fn load(path: Option<&Path>) -> Result<Self, DeployError> {
        let mut figment = Figment::from(Serialized::defaults(DeployConfig::default()));

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(DeployError::Config(format!(
                        "configuration file not found: {}",
                        path.display()
                    )));
                }
                figment = figment.merge(Toml::file_exact(path));
            }
            None => figment = figment.merge(Toml::file(CONFIG_FILENAME)),
        }

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| DeployError::Config(e.to_string()))?;

        tracing::debug!(
            build_dir = %config.build_dir.display(),
            state_dir = %config.state_dir.display(),
            reuse = config.reuse,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), DeployError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DeployError::Config(format!("failed to serialize configuration: {e}")))?;
        std::fs::write(path, content).map_err(|e| {
            DeployError::Config(format!("failed to write {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Settings of the given network.
    pub fn network(&self, network: Network) -> Result<&NetworkConfig, DeployError> {
        self.networks
            .get(network.as_ref())
            .ok_or_else(|| DeployError::Config(format!("network `{network}` is not configured")))
    }
}

/// Settings of one target network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Starknet JSON-RPC endpoint.
    pub rpc_url: Url,
    /// Address of the deployer account.
    pub account_address: Option<Felt>,
    /// Path to the starkli account descriptor.
    pub account: Option<PathBuf>,
    /// Path to an encrypted keystore holding the account's signing key.
    pub keystore: Option<PathBuf>,
    /// Raw signing key, used when no keystore is given.
    pub private_key: Option<String>,
    /// How long to wait for a transaction to be accepted.
    pub confirmation_timeout_secs: u64,
    /// Interval between two receipt polls.
    pub poll_interval_ms: u64,
    /// Fixed inputs of the network plan.
    #[serde(default)]
    pub constants: PlanConstants,
}

impl NetworkConfig {
    fn for_network(network: Network) -> Self {
        Self {
            rpc_url: Url::parse(network.default_rpc_url())
                .expect("Built-in RPC URLs should always parse"),
            account_address: None,
            account: None,
            keystore: None,
            private_key: None,
            confirmation_timeout_secs: 300,
            poll_interval_ms: 2_000,
            constants: PlanConstants::default(),
        }
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The deployer account address, which every network must provide.
    pub fn require_account_address(&self) -> Result<Felt, DeployError> {
        self.account_address
            .ok_or_else(|| DeployError::Config("`account_address` is not set".to_string()))
    }
}

/// Fixed inputs of the deployment plans: addresses of pre-existing contracts
/// and numeric parameters of the Referral contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConstants {
    /// Admin of the Referral contract on mainnet.
    pub admin: Option<Felt>,
    /// Already-deployed Naming contract, on networks that do not deploy it.
    pub naming_address: Option<Felt>,
    pub eth_token_address: Felt,
    /// Minimum amount a referrer can claim.
    pub min_claim_amount: u64,
    /// Share of each sale paid to the referrer, in percent.
    pub default_share: u64,
    /// Amount of wei sent to the Referral contract on devnet.
    pub referral_funding: u64,
    /// Encoded domain bought when seeding devnet.
    pub seed_domain: Felt,
    /// Number of domains bought when seeding devnet.
    pub seed_domain_count: u32,
    /// Amount claimed from the Referral contract when seeding devnet.
    pub seed_claim_amount: u64,
}

impl Default for PlanConstants {
    fn default() -> Self {
        Self {
            admin: None,
            naming_address: None,
            eth_token_address: Felt::from_hex(ETH_TOKEN_ADDRESS)
                .expect("Built-in token address should always parse"),
            min_claim_amount: 1,
            default_share: 5,
            referral_funding: 10_000_000_000_000_000,
            seed_domain: Felt::from(390_000_000_000_000_180u64),
            seed_domain_count: 9,
            seed_claim_amount: 100_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_defaults_cover_every_network() {
        let config = DeployConfig::default();
        for network in [Network::Devnet, Network::Testnet, Network::Mainnet] {
            let net = config.network(network).expect("network should be configured");
            assert_eq!(net.rpc_url.as_str(), network.default_rpc_url());
        }
        assert!(!config.reuse);
    }

    #[test]
    fn test_load_merges_file_over_defaults() {
        let temp_dir = TempDir::new("starkup-config").expect("Failed to create temp dir");
        let path = temp_dir.path().join(CONFIG_FILENAME);
        std::fs::write(
            &path,
            r#"
reuse = true
build_dir = "contracts/target/dev"

[networks.devnet]
rpc_url = "http://localhost:5050/rpc"
account_address = "0x1234"

[networks.devnet.constants]
referral_funding = 42
seed_domain_count = 2
"#,
        )
        .expect("Failed to write config");

        let config = DeployConfig::load(Some(&path)).expect("Failed to load config");
        assert!(config.reuse);
        assert_eq!(config.build_dir, PathBuf::from("contracts/target/dev"));
        // Untouched keys keep their defaults.
        assert_eq!(config.state_dir, PathBuf::from("deployments"));

        let devnet = config.network(Network::Devnet).unwrap();
        assert_eq!(devnet.require_account_address().unwrap(), Felt::from(0x1234u64));
        assert_eq!(devnet.constants.referral_funding, 42);
        assert_eq!(devnet.constants.seed_domain_count, 2);
        assert_eq!(devnet.constants.default_share, 5);
    }

    #[test]
    fn test_saved_config_loads_back() {
        let temp_dir = TempDir::new("starkup-config").expect("Failed to create temp dir");
        let path = temp_dir.path().join(CONFIG_FILENAME);

        let mut config = DeployConfig::default();
        config.reuse = true;
        config
            .networks
            .get_mut("testnet")
            .unwrap()
            .constants
            .naming_address = Some(Felt::from(0xbeefu64));

        config.save_to_file(&path).expect("Failed to save config");
        let loaded = DeployConfig::load(Some(&path)).expect("Failed to load config");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let temp_dir = TempDir::new("starkup-config").expect("Failed to create temp dir");
        let result = DeployConfig::load(Some(&temp_dir.path().join("nope.toml")));
        assert!(matches!(result, Err(DeployError::Config(_))));
    }

    #[test]
    fn test_missing_account_address() {
        let config = DeployConfig::default();
        let mainnet = config.network(Network::Mainnet).unwrap();
        assert!(matches!(
            mainnet.require_account_address(),
            Err(DeployError::Config(_))
        ));
    }
}
