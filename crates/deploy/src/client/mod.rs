//! Chain client adapters.
//!
//! The orchestrator never signs or encodes transactions itself. Everything
//! that touches the network goes through a [`ChainClient`].

use std::future::Future;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{CompiledArtifact, Felt};

pub mod memory;
mod starkli;

pub use memory::InMemoryChain;
pub use starkli::StarkliClient;

/// One contract call, as found in an invoke transaction or a read-only query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub to: Felt,
    pub entrypoint: String,
    pub calldata: Vec<Felt>,
}

impl Call {
    pub fn new(to: Felt, entrypoint: impl Into<String>, calldata: Vec<Felt>) -> Self {
        Self {
            to,
            entrypoint: entrypoint.into(),
            calldata,
        }
    }
}

/// The value produced by a transaction, and the hash of that transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission<T> {
    pub value: T,
    pub tx_hash: Felt,
}

/// Outcome of a declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declared {
    /// A declaration transaction was sent.
    Submitted(Submission<Felt>),
    /// The network already knew the class, nothing was sent.
    Known { class_hash: Felt },
}

impl Declared {
    pub fn class_hash(&self) -> Felt {
        match self {
            Declared::Submitted(submission) => submission.value,
            Declared::Known { class_hash } => *class_hash,
        }
    }

    pub fn tx_hash(&self) -> Option<Felt> {
        match self {
            Declared::Submitted(submission) => Some(submission.tx_hash),
            Declared::Known { .. } => None,
        }
    }
}

/// Final status of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Included and executed successfully.
    Accepted,
    /// Included, but execution reverted.
    Reverted { reason: String },
    /// Never included.
    Rejected { reason: String },
}

impl TxStatus {
    /// Turn anything but [`TxStatus::Accepted`] into an error.
    pub fn ensure_accepted(self, tx_hash: Felt) -> Result<()> {
        match self {
            TxStatus::Accepted => Ok(()),
            TxStatus::Reverted { reason } => {
                anyhow::bail!("transaction {tx_hash:#x} reverted: {reason}")
            }
            TxStatus::Rejected { reason } => {
                anyhow::bail!("transaction {tx_hash:#x} rejected: {reason}")
            }
        }
    }
}

/// Operations the orchestrator needs from the target network.
///
/// Submissions return as soon as the transaction is accepted by the node;
/// callers use [`ChainClient::wait_for_confirmation`] to await the outcome.
pub trait ChainClient: Send + Sync {
    /// Address of the account signing every transaction.
    fn account_address(&self) -> Felt;

    /// Whether several calls can be bundled in one atomic transaction.
    fn supports_batching(&self) -> bool {
        true
    }

    /// Declare a compiled class.
    fn declare(&self, artifact: &CompiledArtifact) -> impl Future<Output = Result<Declared>> + Send;

    /// Deploy an instance of a declared class, returning its address.
    ///
    /// A deployment always sends a transaction, so adapters must fail when
    /// they cannot tell which one.
    fn deploy(
        &self,
        class_hash: Felt,
        constructor_args: &[Felt],
    ) -> impl Future<Output = Result<Submission<Felt>>> + Send;

    /// Send one transaction executing `calls` in order, returning its hash.
    fn invoke(&self, calls: &[Call]) -> impl Future<Output = Result<Felt>> + Send;

    /// Read-only call.
    fn call(&self, call: &Call) -> impl Future<Output = Result<Vec<Felt>>> + Send;

    /// Wait until the transaction reaches a final status.
    fn wait_for_confirmation(&self, tx_hash: Felt) -> impl Future<Output = Result<TxStatus>> + Send;
}
