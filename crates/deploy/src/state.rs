//! Persisted deployment state.
//!
//! Each network gets its own directory under the state root:
//!
//! ```text
//! <state_dir>/<network>/declarations.json   contract name -> class record
//! <state_dir>/<network>/deployments.json    contract name -> deployment record
//! <state_dir>/<network>/.lock               held for the duration of a run
//! ```
//!
//! Both files are pretty-printed JSON objects with sorted keys, meant to be
//! inspected or edited by hand between runs. Records are only ever written
//! after the corresponding transaction has been accepted on-chain.

use std::{
    collections::BTreeMap,
    fs::File,
    path::{Path, PathBuf},
};

use anyhow::Context;
use derive_more::{Deref, DerefMut};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{DeployError, Felt, Network, fs::FsHandler};

/// A declared contract class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub class_hash: Felt,
    /// Hash of the Sierra class that was declared, as computed locally.
    pub sierra_class_hash: Felt,
    /// Declaration transaction, absent when the class was already known to the network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<Felt>,
    /// Unix timestamp of the confirmation.
    pub declared_at: i64,
}

/// A deployed contract instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub address: Felt,
    pub class_hash: Felt,
    /// Constructor calldata, after symbolic references were resolved.
    pub constructor_args: Vec<Felt>,
    pub tx_hash: Felt,
    /// Unix timestamp of the confirmation.
    pub deployed_at: i64,
}

/// Class records keyed by contract name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Deref, DerefMut)]
#[serde(transparent)]
pub struct Declarations(BTreeMap<String, ClassRecord>);

/// Deployment records keyed by contract name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Deref, DerefMut)]
#[serde(transparent)]
pub struct Deployments(BTreeMap<String, DeploymentRecord>);

/// Everything recorded for one network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentState {
    pub declarations: Declarations,
    pub deployments: Deployments,
}

/// Loads and saves the [`DeploymentState`] of one network.
///
/// Opening a recorder takes an exclusive lock on the network directory, so
/// two runs against the same network cannot interleave their writes.
#[derive(Debug)]
pub struct StateRecorder {
    dir: PathBuf,
    network: Network,
    _lock: File,
}

impl StateRecorder {
    pub const DECLARATIONS_FILE: &'static str = "declarations.json";
    pub const DEPLOYMENTS_FILE: &'static str = "deployments.json";
    pub const LOCK_FILE: &'static str = ".lock";

    /// Open the state of `network` under `state_dir`, creating it if needed.
    pub fn open(state_dir: &Path, network: Network) -> Result<Self, DeployError> {
        let dir = state_dir.join(network.as_ref());

        FsHandler::create_state_directory(&dir).map_err(|source| DeployError::PersistFailed {
            path: dir.clone(),
            source,
        })?;

        let lock_path = dir.join(Self::LOCK_FILE);
        let lock = FsHandler::try_lock(&lock_path)
            .map_err(|source| DeployError::PersistFailed {
                path: lock_path.clone(),
                source,
            })?
            .ok_or(DeployError::StateLocked { path: dir.clone() })?;

        tracing::debug!(network = %network, dir = %dir.display(), "Opened state directory");

        Ok(Self {
            dir,
            network,
            _lock: lock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn declarations_path(&self) -> PathBuf {
        self.dir.join(Self::DECLARATIONS_FILE)
    }

    pub fn deployments_path(&self) -> PathBuf {
        self.dir.join(Self::DEPLOYMENTS_FILE)
    }

    /// Load both record files. Missing files load as empty mappings.
    pub fn load(&self) -> Result<DeploymentState, DeployError> {
        let state = DeploymentState {
            declarations: Self::read_file(&self.declarations_path())?,
            deployments: Self::read_file(&self.deployments_path())?,
        };

        tracing::debug!(
            network = %self.network,
            declarations = state.declarations.len(),
            deployments = state.deployments.len(),
            "Loaded deployment state"
        );

        Ok(state)
    }

    /// Save both record files.
    pub fn save(&self, state: &DeploymentState) -> Result<(), DeployError> {
        self.save_declarations(&state.declarations)?;
        self.save_deployments(&state.deployments)
    }

    pub fn save_declarations(&self, declarations: &Declarations) -> Result<(), DeployError> {
        Self::write_file(&self.declarations_path(), declarations)
    }

    pub fn save_deployments(&self, deployments: &Deployments) -> Result<(), DeployError> {
        Self::write_file(&self.deployments_path(), deployments)
    }

    fn read_file<T: DeserializeOwned + Default>(path: &Path) -> Result<T, DeployError> {
        if !path.exists() {
            return Ok(T::default());
        }

        let corrupt = |source: anyhow::Error| DeployError::PersistCorrupt {
            path: path.to_path_buf(),
            source,
        };

        let content = std::fs::read_to_string(path)
            .context("Failed to read state file")
            .map_err(corrupt)?;
        serde_json::from_str(&content)
            .context("Failed to parse state file JSON")
            .map_err(corrupt)
    }

    fn write_file<T: Serialize>(path: &Path, value: &T) -> Result<(), DeployError> {
        let failed = |source: anyhow::Error| DeployError::PersistFailed {
            path: path.to_path_buf(),
            source,
        };

        let mut json = serde_json::to_string_pretty(value)
            .context("Failed to serialize state")
            .map_err(failed)?;
        json.push('\n');

        FsHandler::write_atomic(path, json.as_bytes()).map_err(failed)?;
        tracing::trace!(path = %path.display(), "State file saved");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn sample_state() -> DeploymentState {
        let mut state = DeploymentState::default();
        state.declarations.insert(
            "referral_Naming".to_string(),
            ClassRecord {
                class_hash: Felt::from(0xc1a55u64),
                sierra_class_hash: Felt::from(0x5e4au64),
                tx_hash: Some(Felt::from(0x77u64)),
                declared_at: 1_737_316_800,
            },
        );
        state.deployments.insert(
            "referral_Naming".to_string(),
            DeploymentRecord {
                address: Felt::from(0xadd0u64),
                class_hash: Felt::from(0xc1a55u64),
                constructor_args: vec![Felt::from(1u64), Felt::ZERO],
                tx_hash: Felt::from(0x78u64),
                deployed_at: 1_737_316_900,
            },
        );
        state
    }

    #[test]
    fn test_missing_files_load_empty() {
        let temp_dir = TempDir::new("starkup-state").expect("Failed to create temp dir");
        let recorder = StateRecorder::open(temp_dir.path(), Network::Devnet).unwrap();

        assert_eq!(recorder.load().unwrap(), DeploymentState::default());
        assert_eq!(recorder.dir(), temp_dir.path().join("devnet"));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new("starkup-state").expect("Failed to create temp dir");
        let recorder = StateRecorder::open(temp_dir.path(), Network::Devnet).unwrap();

        let state = sample_state();
        recorder.save(&state).unwrap();

        assert_eq!(recorder.load().unwrap(), state);

        // Human-readable, hex-encoded felts.
        let raw = std::fs::read_to_string(recorder.deployments_path()).unwrap();
        assert!(raw.contains("\"address\": \"0xadd0\""));
    }

    #[test]
    fn test_networks_do_not_collide() {
        let temp_dir = TempDir::new("starkup-state").expect("Failed to create temp dir");
        let devnet = StateRecorder::open(temp_dir.path(), Network::Devnet).unwrap();
        let mainnet = StateRecorder::open(temp_dir.path(), Network::Mainnet).unwrap();

        devnet.save(&sample_state()).unwrap();

        assert_eq!(mainnet.load().unwrap(), DeploymentState::default());
        assert_eq!(devnet.load().unwrap(), sample_state());
    }

    #[test]
    fn test_failed_save_keeps_previous_records() {
        let temp_dir = TempDir::new("starkup-state").expect("Failed to create temp dir");
        let recorder = StateRecorder::open(temp_dir.path(), Network::Devnet).unwrap();
        let state = sample_state();
        recorder.save(&state).unwrap();

        // Nothing can be created at the scratch path, so the write fails
        // before the records file is touched.
        let scratch = FsHandler::temp_path(&recorder.deployments_path());
        std::fs::create_dir(&scratch).unwrap();

        let mut updated = state.clone();
        updated.deployments.clear();
        let result = recorder.save_deployments(&updated.deployments);
        assert!(matches!(
            result,
            Err(DeployError::PersistFailed { path, .. }) if path == recorder.deployments_path()
        ));
        assert_eq!(recorder.load().unwrap(), state);

        // Once the scratch path is usable again, saves go through.
        std::fs::remove_dir(&scratch).unwrap();
        recorder.save_deployments(&updated.deployments).unwrap();
        assert_eq!(recorder.load().unwrap(), updated);
        assert!(!scratch.exists());
    }

    #[test]
    fn test_leftover_scratch_file_is_ignored() {
        let temp_dir = TempDir::new("starkup-state").expect("Failed to create temp dir");
        let recorder = StateRecorder::open(temp_dir.path(), Network::Devnet).unwrap();
        let state = sample_state();
        recorder.save(&state).unwrap();

        let scratch = FsHandler::temp_path(&recorder.deployments_path());
        std::fs::write(&scratch, "{\n  \"referral_Naming\": {\n    \"addr").unwrap();

        assert_eq!(recorder.load().unwrap(), state);
        recorder.save(&state).unwrap();
        assert!(!scratch.exists());
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let temp_dir = TempDir::new("starkup-state").expect("Failed to create temp dir");
        let recorder = StateRecorder::open(temp_dir.path(), Network::Testnet).unwrap();
        std::fs::write(recorder.declarations_path(), "{ invalid json }").unwrap();

        let result = recorder.load();
        assert!(matches!(
            result,
            Err(DeployError::PersistCorrupt { path, .. }) if path == recorder.declarations_path()
        ));
    }

    #[test]
    fn test_concurrent_runs_are_rejected() {
        let temp_dir = TempDir::new("starkup-state").expect("Failed to create temp dir");
        let recorder = StateRecorder::open(temp_dir.path(), Network::Devnet).unwrap();

        let second = StateRecorder::open(temp_dir.path(), Network::Devnet);
        assert!(matches!(second, Err(DeployError::StateLocked { .. })));

        drop(recorder);
        assert!(StateRecorder::open(temp_dir.path(), Network::Devnet).is_ok());
    }
}
