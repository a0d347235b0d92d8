//! The plan run against each network.

use alloy_core::primitives::U256;

use super::{Arg, Plan};
use crate::{DeployError, Network, PlanConstants};

pub const NAMING_CONTRACT: &str = "referral_Naming";
pub const REFERRAL_CONTRACT: &str = "referral_Referral";

/// Build the plan of `network`.
///
/// Every plan starts by declaring `contracts`, in order.
pub fn network_plan(
    network: Network,
    contracts: &[String],
    constants: &PlanConstants,
) -> Result<Plan, DeployError> {
    let declared = contracts
        .iter()
        .fold(Plan::new(), |plan, contract| plan.declare(contract.as_str()));

    match network {
        Network::Devnet => Ok(devnet(declared, constants)),
        Network::Testnet => testnet(declared, constants),
        Network::Mainnet => mainnet(declared, constants),
    }
}

/// Deploy both contracts, wire them together, fund the Referral contract and
/// seed some activity.
fn devnet(plan: Plan, constants: &PlanConstants) -> Plan {
    let eth = Arg::Felt(constants.eth_token_address);

    let plan = plan
        .deploy(NAMING_CONTRACT, vec![])
        .deploy(
            REFERRAL_CONTRACT,
            vec![
                Arg::Account,
                Arg::address_of(NAMING_CONTRACT),
                eth.clone(),
                Arg::u256(U256::from(constants.min_claim_amount)),
                Arg::u256(U256::from(constants.default_share)),
            ],
        )
        .invoke(
            NAMING_CONTRACT,
            "set_referral_addr",
            vec![Arg::address_of(REFERRAL_CONTRACT)],
        )
        .transfer(
            eth.clone(),
            Arg::Account,
            Arg::address_of(REFERRAL_CONTRACT),
            U256::from(constants.referral_funding),
        )
        .call(
            "referral_balance",
            eth,
            "balanceOf",
            vec![Arg::address_of(REFERRAL_CONTRACT)],
        );

    (0..constants.seed_domain_count)
        .fold(plan, |plan, _| {
            plan.invoke(
                NAMING_CONTRACT,
                "buy_domain",
                vec![Arg::Felt(constants.seed_domain), Arg::felt(0u64), Arg::Account],
            )
        })
        .invoke(
            REFERRAL_CONTRACT,
            "claim",
            vec![Arg::u256(U256::from(constants.seed_claim_amount))],
        )
}

/// Deploy the Referral contract against the existing Naming contract.
fn testnet(plan: Plan, constants: &PlanConstants) -> Result<Plan, DeployError> {
    referral_only(plan, Arg::Account, constants)
}

/// Like testnet, with the configured admin owning the Referral contract.
fn mainnet(plan: Plan, constants: &PlanConstants) -> Result<Plan, DeployError> {
    let admin = constants
        .admin
        .ok_or_else(|| DeployError::Config("`admin` is required on mainnet".to_string()))?;
    referral_only(plan, Arg::Felt(admin), constants)
}

fn referral_only(plan: Plan, admin: Arg, constants: &PlanConstants) -> Result<Plan, DeployError> {
    let naming = constants.naming_address.ok_or_else(|| {
        DeployError::Config("`naming_address` is required when Naming is not deployed".to_string())
    })?;

    Ok(plan.deploy(
        REFERRAL_CONTRACT,
        vec![
            admin,
            Arg::Felt(naming),
            Arg::Felt(constants.eth_token_address),
            Arg::u256(U256::from(constants.min_claim_amount)),
            Arg::u256(U256::from(constants.default_share)),
        ],
    ))
}
