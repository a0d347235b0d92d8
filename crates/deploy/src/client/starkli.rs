//! [`ChainClient`] backed by the `starkli` command-line tool.
//!
//! Signing, fee estimation and nonce handling are left to `starkli`; this
//! adapter only builds the command lines and parses what comes back.
//! Confirmations are polled directly from the JSON-RPC endpoint.

use std::{path::PathBuf, process::Output, time::Duration};

use anyhow::Context;
use backon::{ConstantBuilder, Retryable};
use tokio::process::Command;

use super::{Call, ChainClient, Declared, Submission, TxStatus};
use crate::{CompiledArtifact, Felt, NetworkConfig, rpc::StarknetRpc};

/// Drives a Starknet network through `starkli`.
#[derive(Debug, Clone)]
pub struct StarkliClient {
    binary: String,
    account_address: Felt,
    account: Option<PathBuf>,
    keystore: Option<PathBuf>,
    private_key: Option<String>,
    confirmation_timeout: Duration,
    poll_interval: Duration,
    rpc: StarknetRpc,
}

impl StarkliClient {
    /// Build a client for the given network and check that its RPC endpoint answers.
    pub async fn connect(binary: &str, network: &NetworkConfig) -> anyhow::Result<Self> {
        let client = Self::new(binary, network)?;

        let chain_id = client
            .rpc
            .chain_id()
            .await
            .with_context(|| format!("Failed to reach RPC endpoint {}", client.rpc.url()))?;

        tracing::info!(
            rpc_url = %client.rpc.url(),
            chain_id = %chain_id,
            account = %hex(&client.account_address),
            "Connected to Starknet node"
        );

        Ok(client)
    }

    fn new(binary: &str, network: &NetworkConfig) -> anyhow::Result<Self> {
        let account_address = network.require_account_address()?;
        if network.keystore.is_none() && network.private_key.is_none() {
            anyhow::bail!("Either `keystore` or `private_key` must be configured to sign transactions");
        }

        Ok(Self {
            binary: binary.to_string(),
            account_address,
            account: network.account.clone(),
            keystore: network.keystore.clone(),
            private_key: network.private_key.clone(),
            confirmation_timeout: network.confirmation_timeout(),
            poll_interval: network.poll_interval(),
            rpc: StarknetRpc::new(network.rpc_url.clone())?,
        })
    }

    /// A `starkli <subcommand>` invocation with the network and signer options set.
    fn command(&self, subcommand: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(subcommand).arg("--rpc").arg(self.rpc.url().as_str());

        if subcommand != "call" {
            if let Some(account) = &self.account {
                cmd.arg("--account").arg(account);
            }
            match (&self.keystore, &self.private_key) {
                (Some(keystore), _) => {
                    cmd.arg("--keystore").arg(keystore);
                }
                // Passed through the environment to keep it off the process list.
                (None, Some(private_key)) => {
                    cmd.env("STARKNET_PRIVATE_KEY", private_key);
                }
                (None, None) => {}
            }
        }

        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command) -> anyhow::Result<Output> {
        tracing::trace!(args = ?cmd.as_std().get_args().collect::<Vec<_>>(), "Running starkli");

        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to run `{}`", self.binary))?;

        if !output.status.success() {
            anyhow::bail!(
                "starkli exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(output)
    }

    /// One poll of the transaction status. Pending transactions are reported as errors.
    async fn poll_status(&self, tx_hash: Felt) -> anyhow::Result<TxStatus> {
        let status = self.rpc.transaction_status(tx_hash).await?;

        match status.finality_status.as_str() {
            "REJECTED" => Ok(TxStatus::Rejected {
                reason: status.failure_reason.unwrap_or_default(),
            }),
            "ACCEPTED_ON_L2" | "ACCEPTED_ON_L1" => {
                if status.execution_status.as_deref() == Some("REVERTED") {
                    Ok(TxStatus::Reverted {
                        reason: status.failure_reason.unwrap_or_default(),
                    })
                } else {
                    Ok(TxStatus::Accepted)
                }
            }
            other => anyhow::bail!("transaction is still {other}"),
        }
    }
}

impl ChainClient for StarkliClient {
    fn account_address(&self) -> Felt {
        self.account_address
    }

    async fn declare(&self, artifact: &CompiledArtifact) -> anyhow::Result<Declared> {
        let mut cmd = self.command("declare");
        cmd.arg(&artifact.sierra_path);
        if let Some(casm_path) = &artifact.casm_path {
            cmd.arg("--casm-file").arg(casm_path);
        }

        let output = self.run(cmd).await?;
        let class_hash =
            parse_last_felt(&output.stdout).context("Failed to read declared class hash")?;

        match find_tx_hash(&output) {
            Some(tx_hash) => Ok(Declared::Submitted(Submission {
                value: class_hash,
                tx_hash,
            })),
            None if mentions(&output, "already declared") => Ok(Declared::Known { class_hash }),
            None => anyhow::bail!("starkli did not report a declaration transaction"),
        }
    }

    async fn deploy(
        &self,
        class_hash: Felt,
        constructor_args: &[Felt],
    ) -> anyhow::Result<Submission<Felt>> {
        let salt = Felt::from_bytes_be(&rand::random::<[u8; 32]>());

        let mut cmd = self.command("deploy");
        cmd.arg(hex(&class_hash))
            .args(constructor_args.iter().map(hex))
            .arg("--salt")
            .arg(hex(&salt));

        let output = self.run(cmd).await?;
        let address = parse_last_felt(&output.stdout)
            .context("Failed to read deployed contract address")?;
        let tx_hash =
            find_tx_hash(&output).context("starkli did not report a deployment transaction")?;

        Ok(Submission {
            value: address,
            tx_hash,
        })
    }

    async fn invoke(&self, calls: &[Call]) -> anyhow::Result<Felt> {
        let mut cmd = self.command("invoke");
        for (index, call) in calls.iter().enumerate() {
            if index > 0 {
                cmd.arg("/");
            }
            cmd.arg(hex(&call.to))
                .arg(&call.entrypoint)
                .args(call.calldata.iter().map(hex));
        }

        let output = self.run(cmd).await?;
        find_tx_hash(&output)
            .map(Ok)
            .unwrap_or_else(|| parse_last_felt(&output.stdout))
            .context("Failed to read invoke transaction hash")
    }

    async fn call(&self, call: &Call) -> anyhow::Result<Vec<Felt>> {
        let mut cmd = self.command("call");
        cmd.arg(hex(&call.to))
            .arg(&call.entrypoint)
            .args(call.calldata.iter().map(hex));

        let output = self.run(cmd).await?;
        serde_json::from_slice(&output.stdout).context("Failed to parse call result")
    }

    async fn wait_for_confirmation(&self, tx_hash: Felt) -> anyhow::Result<TxStatus> {
        let max_polls = (self.confirmation_timeout.as_millis()
            / self.poll_interval.as_millis().max(1))
        .max(1) as usize;

        tracing::debug!(tx_hash = %hex(&tx_hash), "Waiting for transaction confirmation");

        (|| async { self.poll_status(tx_hash).await })
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.poll_interval)
                    .with_max_times(max_polls),
            )
            .sleep(tokio::time::sleep)
            .notify(|e: &anyhow::Error, _| {
                tracing::trace!(tx_hash = %hex(&tx_hash), error = %e, "Transaction not final yet, retrying...");
            })
            .await
            .with_context(|| {
                format!(
                    "Transaction {tx_hash:#x} was not confirmed within {} seconds",
                    self.confirmation_timeout.as_secs()
                )
            })
    }
}

fn hex(felt: &Felt) -> String {
    format!("{felt:#x}")
}

/// The last non-empty line of `stdout`, parsed as a felt.
fn parse_last_felt(stdout: &[u8]) -> anyhow::Result<Felt> {
    let stdout = String::from_utf8_lossy(stdout);
    let line = stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .context("starkli printed nothing")?;
    Felt::from_hex(line).map_err(|_| anyhow::anyhow!("Unexpected starkli output: {line}"))
}

/// The hash printed on a `... transaction: 0x...` line, on either stream.
fn find_tx_hash(output: &Output) -> Option<Felt> {
    [&output.stderr, &output.stdout].into_iter().find_map(|stream| {
        String::from_utf8_lossy(stream).lines().find_map(|line| {
            let (label, value) = line.rsplit_once(':')?;
            if !label.to_lowercase().ends_with("transaction") {
                return None;
            }
            Felt::from_hex(value.trim()).ok()
        })
    })
}

/// Whether either stream contains `needle`, ignoring case.
fn mentions(output: &Output, needle: &str) -> bool {
    [&output.stderr, &output.stdout]
        .into_iter()
        .any(|stream| String::from_utf8_lossy(stream).to_lowercase().contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ArtifactRegistry, ClassRecord, DeclarePolicy, DeployConfig, DeployError, DeploymentState,
        Network, Orchestrator, Plan, StateRecorder, artifact::fixtures,
    };
    use tempdir::TempDir;

    #[cfg(unix)]
    fn output(stdout: &str, stderr: &str) -> Output {
        use std::os::unix::process::ExitStatusExt;

        Output {
            status: std::process::ExitStatus::from_raw(0),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    /// Install a `starkli` stand-in printing fixed output, whatever its arguments.
    #[cfg(unix)]
    fn fake_starkli(dir: &std::path::Path, stdout: &str, stderr: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("starkli");
        let script = format!("#!/bin/sh\ncat <<'OUT'\n{stdout}OUT\ncat >&2 <<'ERR'\n{stderr}ERR\n");
        std::fs::write(&path, script).expect("Failed to write fake starkli");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to make fake starkli executable");
        path.to_string_lossy().into_owned()
    }

    fn client(binary: &str) -> StarkliClient {
        let mut network = DeployConfig::default()
            .network(Network::Devnet)
            .expect("devnet should be configured")
            .clone();
        network.account_address = Some(Felt::from(0xacc0u64));
        network.private_key = Some("0x1".to_string());
        StarkliClient::new(binary, &network).expect("Failed to build client")
    }

    #[test]
    fn test_parse_last_felt() {
        let stdout = b"Class hash declared:\n0x0123abc\n\n";
        assert_eq!(parse_last_felt(stdout).unwrap(), Felt::from(0x0123abcu64));
        assert!(parse_last_felt(b"\n \n").is_err());
        assert!(parse_last_felt(b"Error: nope").is_err());
    }

    #[test]
    fn test_signer_is_required() {
        let mut network = DeployConfig::default()
            .network(Network::Devnet)
            .unwrap()
            .clone();
        network.account_address = Some(Felt::from(0xacc0u64));
        assert!(StarkliClient::new("starkli", &network).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_find_tx_hash() {
        let declared = output(
            "Class hash declared:\n0x1111\n",
            "Declaring Cairo 1 class: 0x1111\nCASM class hash: 0x2222\nContract declaration transaction: 0x3333\n",
        );
        assert_eq!(find_tx_hash(&declared), Some(Felt::from(0x3333u64)));

        let already_declared = output(
            "Not declaring class as it's already declared. Class hash:\n0x1111\n",
            "",
        );
        assert_eq!(find_tx_hash(&already_declared), None);
        assert!(mentions(&already_declared, "already declared"));

        let invoked = output("", "Invoke transaction: 0x4444\n");
        assert_eq!(find_tx_hash(&invoked), Some(Felt::from(0x4444u64)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deploy_reports_address_and_transaction() {
        let temp_dir = TempDir::new("starkup-starkli").expect("Failed to create temp dir");
        let binary = fake_starkli(
            temp_dir.path(),
            "Contract deployed:\n0x1234\n",
            "Deploying class 0xc1a55 with salt 0x2...\nContract deployment transaction: 0x99\n",
        );

        let submission = client(&binary)
            .deploy(Felt::from(0xc1a55u64), &[Felt::from(7u64)])
            .await
            .expect("deploy should succeed");
        assert_eq!(
            submission,
            Submission {
                value: Felt::from(0x1234u64),
                tx_hash: Felt::from(0x99u64),
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deploy_without_transaction_is_not_recorded() {
        let temp_dir = TempDir::new("starkup-starkli").expect("Failed to create temp dir");
        let binary = fake_starkli(temp_dir.path(), "Contract deployed:\n0x1234\n", "");
        let client = client(&binary);

        let err = client.deploy(Felt::from(0xc1a55u64), &[]).await.unwrap_err();
        assert!(err.to_string().contains("deployment transaction"));

        let recorder = StateRecorder::open(&temp_dir.path().join("state"), Network::Devnet)
            .expect("Failed to open state recorder");
        let mut state = DeploymentState::default();
        state.declarations.insert(
            "referral_Naming".to_string(),
            ClassRecord {
                class_hash: Felt::from(0xc1a55u64),
                sierra_class_hash: Felt::from(0x5u64),
                tx_hash: None,
                declared_at: 0,
            },
        );
        recorder.save(&state).unwrap();

        let registry = ArtifactRegistry::new(temp_dir.path());
        let mut orchestrator =
            Orchestrator::new(&client, &registry, &recorder, DeclarePolicy::Redeclare).unwrap();
        let err = orchestrator
            .run(&Plan::new().deploy("referral_Naming", vec![]))
            .await
            .unwrap_err();

        assert!(matches!(err.error, DeployError::DeployFailed { .. }));
        assert!(orchestrator.state().deployments.is_empty());
        assert!(recorder.load().unwrap().deployments.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_declare_outcomes() {
        let artifact = fixtures::artifact("referral_Naming", &["set_referral_addr"]);

        let temp_dir = TempDir::new("starkup-starkli").expect("Failed to create temp dir");
        let binary = fake_starkli(
            temp_dir.path(),
            "Class hash declared:\n0x1111\n",
            "Contract declaration transaction: 0x3333\n",
        );
        let declared = client(&binary).declare(&artifact).await.unwrap();
        assert_eq!(declared.class_hash(), Felt::from(0x1111u64));
        assert_eq!(declared.tx_hash(), Some(Felt::from(0x3333u64)));

        let temp_dir = TempDir::new("starkup-starkli").expect("Failed to create temp dir");
        let binary = fake_starkli(
            temp_dir.path(),
            "0x1111\n",
            "Not declaring class as it's already declared. Class hash:\n",
        );
        let declared = client(&binary).declare(&artifact).await.unwrap();
        assert_eq!(
            declared,
            Declared::Known {
                class_hash: Felt::from(0x1111u64)
            }
        );

        let temp_dir = TempDir::new("starkup-starkli").expect("Failed to create temp dir");
        let binary = fake_starkli(temp_dir.path(), "0x1111\n", "");
        assert!(client(&binary).declare(&artifact).await.is_err());
    }
}
