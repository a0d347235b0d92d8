//! Error types raised by the deployment orchestrator and its collaborators.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a deployment run.
#[derive(Debug, Error)]
pub enum DeployError {
    /// No compiled output exists for the contract.
    #[error("no compiled artifact for `{contract}` in {}", build_dir.display())]
    ArtifactNotFound { contract: String, build_dir: PathBuf },

    /// The compiled output exists but cannot be read.
    #[error("compiled artifact for `{contract}` is unreadable")]
    ArtifactInvalid {
        contract: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("declaration of `{contract}` failed")]
    DeclareFailed {
        contract: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("deployment of `{contract}` failed")]
    DeployFailed {
        contract: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invocation of `{target}.{entrypoint}` failed")]
    InvokeFailed {
        target: String,
        entrypoint: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("call to `{target}.{entrypoint}` failed")]
    CallFailed {
        target: String,
        entrypoint: String,
        #[source]
        source: anyhow::Error,
    },

    /// A step references a contract that has no recorded class or address yet.
    #[error("unresolved reference to the {kind} of `{contract}`")]
    UnresolvedReference {
        contract: String,
        kind: ReferenceKind,
    },

    /// A step cannot be executed as written.
    #[error("invalid step: {0}")]
    InvalidStep(String),

    /// A persisted state file is unreadable or malformed.
    #[error("state file {} is corrupt", path.display())]
    PersistCorrupt {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// A persisted state file could not be written.
    #[error("failed to persist state file {}", path.display())]
    PersistFailed {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// Another run holds the state lock for this network.
    #[error("state directory {} is locked by another run", path.display())]
    StateLocked { path: PathBuf },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// What a symbolic reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ReferenceKind {
    Address,
    ClassHash,
}

/// A plan aborted at a given step.
#[derive(Debug, Error)]
#[error("step #{step_index} ({step}) failed: {error}")]
pub struct PlanError {
    /// Zero-based position of the failing step in the plan.
    pub step_index: usize,
    /// Human-readable description of the failing step.
    pub step: String,
    #[source]
    pub error: DeployError,
}
