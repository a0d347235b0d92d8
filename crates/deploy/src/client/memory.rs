//! An in-process Starknet simulation.
//!
//! [`InMemoryChain`] keeps declared classes, deployed contracts and ERC-20
//! balances in memory. The test-suite runs plans against it.
//!
//! Hashes are derived from a running counter, so declaring the same artifact
//! twice yields two different class hashes, and every deployment lands at a
//! fresh address.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
};

use alloy_core::primitives::U256;
use anyhow::Context;
use starknet::core::utils::starknet_keccak;

use super::{Call, ChainClient, Declared, Submission, TxStatus};
use crate::{CompiledArtifact, Felt, felt};

/// A transaction sent to the chain, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    Declare { contract: String, class_hash: Felt },
    Deploy { class_hash: Felt, address: Felt, constructor_args: Vec<Felt> },
    Invoke { tx_hash: Felt, calls: Vec<Call> },
}

#[derive(Debug, Clone)]
struct DeployedContract {
    artifact: CompiledArtifact,
    constructor_args: Vec<Felt>,
    /// Calldata of every successful invocation, per entrypoint.
    invocations: BTreeMap<String, Vec<Vec<Felt>>>,
}

#[derive(Debug, Clone, Default)]
struct Token {
    balances: HashMap<Felt, U256>,
    allowances: HashMap<(Felt, Felt), U256>,
}

impl Token {
    fn balance(&self, holder: Felt) -> U256 {
        self.balances.get(&holder).copied().unwrap_or_default()
    }

    fn allowance(&self, owner: Felt, spender: Felt) -> U256 {
        self.allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default()
    }

    fn move_funds(&mut self, from: Felt, to: Felt, amount: U256) -> Result<(), String> {
        let balance = self.balance(from);
        if balance < amount {
            return Err("ERC20: insufficient balance".to_string());
        }
        self.balances.insert(from, balance - amount);
        *self.balances.entry(to).or_default() += amount;
        Ok(())
    }

    /// Execute an ERC-20 entrypoint on behalf of `caller`.
    fn execute(&mut self, caller: Felt, call: &Call) -> Result<(), String> {
        match (call.entrypoint.as_str(), call.calldata.as_slice()) {
            ("approve", [spender, low, high]) => {
                self.allowances
                    .insert((caller, *spender), felt::join_u256(*low, *high));
                Ok(())
            }
            ("transfer", [recipient, low, high]) => {
                self.move_funds(caller, *recipient, felt::join_u256(*low, *high))
            }
            ("transferFrom" | "transfer_from", [sender, recipient, low, high]) => {
                let amount = felt::join_u256(*low, *high);
                let allowance = self.allowance(*sender, caller);
                if allowance < amount {
                    return Err("ERC20: insufficient allowance".to_string());
                }
                self.move_funds(*sender, *recipient, amount)?;
                self.allowances.insert((*sender, caller), allowance - amount);
                Ok(())
            }
            (entrypoint, _) => Err(format!("ERC20: unsupported call to `{entrypoint}`")),
        }
    }

    fn query(&self, call: &Call) -> Result<Vec<Felt>, String> {
        let value = match (call.entrypoint.as_str(), call.calldata.as_slice()) {
            ("balanceOf" | "balance_of", [holder]) => self.balance(*holder),
            ("allowance", [owner, spender]) => self.allowance(*owner, *spender),
            (entrypoint, _) => return Err(format!("ERC20: unsupported query `{entrypoint}`")),
        };
        Ok(felt::split_u256(value).to_vec())
    }
}

#[derive(Debug, Clone, Default)]
struct ChainState {
    counter: u64,
    classes: HashMap<Felt, CompiledArtifact>,
    contracts: HashMap<Felt, DeployedContract>,
    tokens: HashMap<Felt, Token>,
    receipts: HashMap<Felt, TxStatus>,
    history: Vec<Submitted>,
    rejected_declarations: BTreeSet<String>,
    reverting_entrypoints: BTreeSet<String>,
}

impl ChainState {
    fn next_hash(&mut self, domain: &str, data: &[u8]) -> Felt {
        self.counter += 1;
        let mut preimage = domain.as_bytes().to_vec();
        preimage.extend_from_slice(&self.counter.to_be_bytes());
        preimage.extend_from_slice(data);
        starknet_keccak(&preimage)
    }

    fn execute(&mut self, caller: Felt, call: &Call) -> Result<(), String> {
        if let Some(token) = self.tokens.get_mut(&call.to) {
            return token.execute(caller, call);
        }

        let contract = self
            .contracts
            .get_mut(&call.to)
            .ok_or_else(|| format!("no contract deployed at {:#x}", call.to))?;
        if !contract.artifact.has_entrypoint(&call.entrypoint) {
            return Err(format!(
                "entrypoint `{}` not found in {}",
                call.entrypoint, contract.artifact.contract_name
            ));
        }
        if self.reverting_entrypoints.contains(&call.entrypoint) {
            return Err(format!("`{}` reverted", call.entrypoint));
        }

        contract
            .invocations
            .entry(call.entrypoint.clone())
            .or_default()
            .push(call.calldata.clone());
        Ok(())
    }
}

/// A simulated chain. See the [module documentation](self).
#[derive(Debug)]
pub struct InMemoryChain {
    account: Felt,
    batching: bool,
    state: Mutex<ChainState>,
}

impl InMemoryChain {
    /// An empty chain where `account` signs every transaction.
    pub fn new(account: Felt) -> Self {
        Self {
            account,
            batching: true,
            state: Mutex::new(ChainState::default()),
        }
    }

    /// Toggle support for multicall transactions.
    pub fn with_batching(mut self, batching: bool) -> Self {
        self.batching = batching;
        self
    }

    /// Install an ERC-20 token at `address`, crediting `holder` with `balance`.
    pub fn with_token(self, address: Felt, holder: Felt, balance: U256) -> Self {
        let mut token = Token::default();
        token.balances.insert(holder, balance);
        self.state().tokens.insert(address, token);
        self
    }

    /// Make every future declaration of `contract` fail at submission.
    pub fn reject_declarations_of(&self, contract: &str) {
        self.state()
            .rejected_declarations
            .insert(contract.to_string());
    }

    /// Make every future transaction calling `entrypoint` revert.
    pub fn revert_calls_to(&self, entrypoint: &str) {
        self.state()
            .reverting_entrypoints
            .insert(entrypoint.to_string());
    }

    /// Every transaction submitted so far.
    pub fn history(&self) -> Vec<Submitted> {
        self.state().history.clone()
    }

    /// Number of declarations submitted so far.
    pub fn declaration_count(&self) -> usize {
        self.state()
            .history
            .iter()
            .filter(|tx| matches!(tx, Submitted::Declare { .. }))
            .count()
    }

    /// Whether a contract is deployed at `address`.
    pub fn is_deployed(&self, address: Felt) -> bool {
        self.state().contracts.contains_key(&address)
    }

    /// Constructor calldata of the contract deployed at `address`.
    pub fn constructor_args(&self, address: Felt) -> Option<Vec<Felt>> {
        self.state()
            .contracts
            .get(&address)
            .map(|contract| contract.constructor_args.clone())
    }

    /// Calldata of every successful call to `entrypoint` on `address`.
    pub fn invocations(&self, address: Felt, entrypoint: &str) -> Vec<Vec<Felt>> {
        self.state()
            .contracts
            .get(&address)
            .and_then(|contract| contract.invocations.get(entrypoint).cloned())
            .unwrap_or_default()
    }

    /// ERC-20 balance of `holder`.
    pub fn balance_of(&self, token: Felt, holder: Felt) -> U256 {
        self.state()
            .tokens
            .get(&token)
            .map(|token| token.balance(holder))
            .unwrap_or_default()
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChainClient for InMemoryChain {
    fn account_address(&self) -> Felt {
        self.account
    }

    fn supports_batching(&self) -> bool {
        self.batching
    }

    async fn declare(&self, artifact: &CompiledArtifact) -> anyhow::Result<Declared> {
        let mut state = self.state();
        if state.rejected_declarations.contains(&artifact.contract_name) {
            anyhow::bail!("declaration of {} rejected by the node", artifact.contract_name);
        }

        let class_hash = state.next_hash("class", &artifact.sierra_class_hash.to_bytes_be());
        let tx_hash = state.next_hash("declare", artifact.contract_name.as_bytes());
        state.classes.insert(class_hash, artifact.clone());
        state.receipts.insert(tx_hash, TxStatus::Accepted);
        state.history.push(Submitted::Declare {
            contract: artifact.contract_name.clone(),
            class_hash,
        });

        Ok(Declared::Submitted(Submission {
            value: class_hash,
            tx_hash,
        }))
    }

    async fn deploy(
        &self,
        class_hash: Felt,
        constructor_args: &[Felt],
    ) -> anyhow::Result<Submission<Felt>> {
        let mut state = self.state();
        let artifact = state
            .classes
            .get(&class_hash)
            .cloned()
            .with_context(|| format!("class {class_hash:#x} is not declared"))?;

        let address = state.next_hash("contract", &class_hash.to_bytes_be());
        let tx_hash = state.next_hash("deploy", &address.to_bytes_be());
        state.contracts.insert(
            address,
            DeployedContract {
                artifact,
                constructor_args: constructor_args.to_vec(),
                invocations: BTreeMap::new(),
            },
        );
        state.receipts.insert(tx_hash, TxStatus::Accepted);
        state.history.push(Submitted::Deploy {
            class_hash,
            address,
            constructor_args: constructor_args.to_vec(),
        });

        Ok(Submission {
            value: address,
            tx_hash,
        })
    }

    async fn invoke(&self, calls: &[Call]) -> anyhow::Result<Felt> {
        if calls.len() > 1 && !self.batching {
            anyhow::bail!("multicall transactions are not supported");
        }

        let mut state = self.state();
        let tx_hash = state.next_hash("invoke", &(calls.len() as u64).to_be_bytes());

        // All calls of a transaction apply, or none does.
        let mut scratch = state.clone();
        let outcome = calls
            .iter()
            .try_for_each(|call| scratch.execute(self.account, call));
        let status = match outcome {
            Ok(()) => {
                *state = scratch;
                TxStatus::Accepted
            }
            Err(reason) => TxStatus::Reverted { reason },
        };

        state.receipts.insert(tx_hash, status);
        state.history.push(Submitted::Invoke {
            tx_hash,
            calls: calls.to_vec(),
        });

        Ok(tx_hash)
    }

    async fn call(&self, call: &Call) -> anyhow::Result<Vec<Felt>> {
        let state = self.state();
        match state.tokens.get(&call.to) {
            Some(token) => token.query(call).map_err(anyhow::Error::msg),
            None => anyhow::bail!("no queryable contract at {:#x}", call.to),
        }
    }

    async fn wait_for_confirmation(&self, tx_hash: Felt) -> anyhow::Result<TxStatus> {
        self.state()
            .receipts
            .get(&tx_hash)
            .cloned()
            .with_context(|| format!("unknown transaction {tx_hash:#x}"))
    }
}
