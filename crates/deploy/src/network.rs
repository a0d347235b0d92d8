//! Target networks.

use serde::{Deserialize, Serialize};

/// A deployment target. Each network has its own configuration section, its
/// own plan, and its own persisted state.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    Devnet,
    Testnet,
    Mainnet,
}

impl Network {
    /// The JSON-RPC endpoint used when the configuration does not set one.
    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Network::Devnet => "http://127.0.0.1:5050/rpc",
            Network::Testnet => "https://starknet-sepolia.public.blastapi.io/rpc/v0_7",
            Network::Mainnet => "https://starknet-mainnet.public.blastapi.io/rpc/v0_7",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_network_names_round_trip() {
        for network in Network::iter() {
            let parsed: Network = network.to_string().parse().unwrap();
            assert_eq!(parsed, network);
        }
        assert_eq!("devnet".parse::<Network>().unwrap(), Network::Devnet);
        assert!("goerli".parse::<Network>().is_err());
    }
}
