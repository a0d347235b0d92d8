//! Lookup of compiled contract artifacts.
//!
//! Scarb writes one Sierra class per contract to
//! `<build_dir>/<package>_<Contract>.contract_class.json`, and the matching
//! CASM to `<package>_<Contract>.compiled_contract_class.json` when
//! `casm = true` is enabled. The contract name used throughout the plans is
//! the `<package>_<Contract>` stem.

use std::path::{Path, PathBuf};

use anyhow::Context;
use starknet::core::types::contract::{AbiEntry, SierraClass};

use crate::{DeployError, Felt};

const SIERRA_SUFFIX: &str = "contract_class.json";
const CASM_SUFFIX: &str = "compiled_contract_class.json";

/// A compiled contract, ready to be declared.
#[derive(Debug, Clone)]
pub struct CompiledArtifact {
    pub contract_name: String,
    /// Path of the Sierra class.
    pub sierra_path: PathBuf,
    /// Path of the CASM class, if the compiler emitted one.
    pub casm_path: Option<PathBuf>,
    pub class: SierraClass,
    /// Hash of the Sierra class. Only changes when the compiled class does.
    pub sierra_class_hash: Felt,
}

impl CompiledArtifact {
    /// Build an artifact from a parsed class, computing its hash.
    pub fn new(
        contract_name: impl Into<String>,
        sierra_path: PathBuf,
        casm_path: Option<PathBuf>,
        class: SierraClass,
    ) -> anyhow::Result<Self> {
        if class.sierra_program.is_empty() {
            anyhow::bail!("Sierra program is empty");
        }
        let sierra_class_hash = class
            .class_hash()
            .map_err(|e| anyhow::anyhow!("Failed to compute class hash: {e}"))?;

        Ok(Self {
            contract_name: contract_name.into(),
            sierra_path,
            casm_path,
            class,
            sierra_class_hash,
        })
    }

    /// Whether the ABI exposes a function with this name, either at the top
    /// level or inside an interface.
    pub fn has_entrypoint(&self, name: &str) -> bool {
        fn walk(entries: &[AbiEntry], name: &str) -> bool {
            entries.iter().any(|entry| match entry {
                AbiEntry::Function(function) => function.name == name,
                AbiEntry::Interface(interface) => walk(&interface.items, name),
                _ => false,
            })
        }
        walk(&self.class.abi, name)
    }
}

/// Read-only view over a build output directory.
#[derive(Debug, Clone)]
pub struct ArtifactRegistry {
    build_dir: PathBuf,
}

impl ArtifactRegistry {
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
        }
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Load the compiled artifact of `contract`.
    pub fn get(&self, contract: &str) -> Result<CompiledArtifact, DeployError> {
        let sierra_path = self.build_dir.join(format!("{contract}.{SIERRA_SUFFIX}"));
        if !sierra_path.is_file() {
            return Err(DeployError::ArtifactNotFound {
                contract: contract.to_string(),
                build_dir: self.build_dir.clone(),
            });
        }

        let invalid = |source: anyhow::Error| DeployError::ArtifactInvalid {
            contract: contract.to_string(),
            source,
        };

        let content = std::fs::read(&sierra_path)
            .with_context(|| format!("Failed to read {}", sierra_path.display()))
            .map_err(invalid)?;
        let class: SierraClass = serde_json::from_slice(&content)
            .with_context(|| format!("Failed to parse {} as a Sierra class", sierra_path.display()))
            .map_err(invalid)?;

        let casm_path = self.build_dir.join(format!("{contract}.{CASM_SUFFIX}"));
        let casm_path = casm_path.is_file().then_some(casm_path);

        let artifact =
            CompiledArtifact::new(contract, sierra_path, casm_path, class).map_err(invalid)?;

        tracing::debug!(
            contract = %artifact.contract_name,
            sierra_class_hash = %format!("{:#x}", artifact.sierra_class_hash),
            has_casm = artifact.casm_path.is_some(),
            "Loaded compiled artifact"
        );

        Ok(artifact)
    }
}
