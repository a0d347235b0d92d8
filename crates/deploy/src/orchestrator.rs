//! Plan execution.
//!
//! The [`Orchestrator`] runs the steps of a [`Plan`] one after the other,
//! waiting for each transaction to be confirmed before moving on. Class and
//! deployment records are saved as soon as they are confirmed, so a run that
//! fails halfway keeps everything it achieved.

use alloy_core::primitives::U256;
use strum::{Display, EnumString};

use crate::{
    ArtifactRegistry, DeployError, DeploymentState, Felt, PlanError, ReferenceKind,
    StateRecorder,
    client::{Call, ChainClient},
    felt::split_u256,
    plan::{Arg, Plan, Step},
    report::{RunReport, StepOutcome, StepReport},
    state::{ClassRecord, DeploymentRecord},
};

/// What to do with a contract that already has a class record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum DeclarePolicy {
    /// Declare again on every run.
    #[default]
    Redeclare,
    /// Keep the recorded class hash when the compiled class did not change,
    /// and the recorded deployment when its class and constructor arguments
    /// did not change.
    ///
    /// Only declarations and deployments are recorded. Invoke, transfer and
    /// call steps run again on every run, so re-running a plan that funds a
    /// contract funds it again.
    Reuse,
}

impl DeclarePolicy {
    pub fn from_reuse_flag(reuse: bool) -> Self {
        if reuse { Self::Reuse } else { Self::Redeclare }
    }
}

pub struct Orchestrator<'a, C> {
    client: &'a C,
    registry: &'a ArtifactRegistry,
    recorder: &'a StateRecorder,
    policy: DeclarePolicy,
    state: DeploymentState,
}

impl<'a, C: ChainClient> Orchestrator<'a, C> {
    /// Create an orchestrator, loading the records of the recorder's network.
    pub fn new(
        client: &'a C,
        registry: &'a ArtifactRegistry,
        recorder: &'a StateRecorder,
        policy: DeclarePolicy,
    ) -> Result<Self, DeployError> {
        let state = recorder.load()?;
        Ok(Self {
            client,
            registry,
            recorder,
            policy,
            state,
        })
    }

    /// The records as of the last confirmed step.
    pub fn state(&self) -> &DeploymentState {
        &self.state
    }

    /// Run every step of `plan`, stopping at the first failure.
    ///
    /// The plan is validated before anything is submitted.
    pub async fn run(&mut self, plan: &Plan) -> Result<RunReport, PlanError> {
        plan.validate(&self.state)?;

        tracing::info!(
            network = %self.recorder.network(),
            steps = plan.len(),
            policy = %self.policy,
            "Running deployment plan"
        );

        let mut report = RunReport::default();
        for (index, step) in plan.steps().iter().enumerate() {
            tracing::info!(step = index, "{step}");

            let outcome = self
                .execute(step, &mut report)
                .await
                .map_err(|error| PlanError {
                    step_index: index,
                    step: step.to_string(),
                    error,
                })?;

            tracing::debug!(step = index, outcome = ?outcome, "Step done");
            report.steps.push(StepReport {
                index,
                step: step.to_string(),
                outcome,
            });
        }

        tracing::info!(
            steps = report.steps.len(),
            reused = report.reused(),
            "Deployment plan complete"
        );

        Ok(report)
    }

    async fn execute(
        &mut self,
        step: &Step,
        report: &mut RunReport,
    ) -> Result<StepOutcome, DeployError> {
        match step {
            Step::Declare { contract } => self.declare(contract).await,
            Step::Deploy {
                contract,
                constructor_args,
            } => self.deploy(contract, constructor_args).await,
            Step::Invoke {
                contract,
                entrypoint,
                args,
            } => self.invoke(contract, entrypoint, args).await,
            Step::Transfer {
                token,
                from,
                to,
                amount,
            } => self.transfer(token, from, to, *amount).await,
            Step::Call {
                label,
                target,
                entrypoint,
                args,
            } => {
                let result = self.call(target, entrypoint, args).await?;
                tracing::info!(
                    label = %label,
                    result = ?result.iter().map(|felt| format!("{felt:#x}")).collect::<Vec<_>>(),
                    "Query result"
                );
                report.queries.insert(label.clone(), result.clone());
                Ok(StepOutcome::Queried { result })
            }
        }
    }

    async fn declare(&mut self, contract: &str) -> Result<StepOutcome, DeployError> {
        let artifact = self.registry.get(contract)?;

        if self.policy == DeclarePolicy::Reuse {
            if let Some(record) = self.state.declarations.get(contract) {
                if record.sierra_class_hash == artifact.sierra_class_hash {
                    tracing::info!(
                        contract,
                        class_hash = %format!("{:#x}", record.class_hash),
                        "Reusing recorded class"
                    );
                    return Ok(StepOutcome::Reused);
                }
                tracing::info!(contract, "Compiled class changed since last declaration");
            }
        }

        let failed = |source| DeployError::DeclareFailed {
            contract: contract.to_string(),
            source,
        };

        let declared = self.client.declare(&artifact).await.map_err(failed)?;
        if let Some(tx_hash) = declared.tx_hash() {
            self.confirm(tx_hash).await.map_err(failed)?;
        }

        tracing::info!(
            contract,
            class_hash = %format!("{:#x}", declared.class_hash()),
            "Class declared"
        );

        let record = ClassRecord {
            class_hash: declared.class_hash(),
            sierra_class_hash: artifact.sierra_class_hash,
            tx_hash: declared.tx_hash(),
            declared_at: chrono::Utc::now().timestamp(),
        };
        if let Some(previous) = self.state.declarations.insert(contract.to_string(), record) {
            tracing::debug!(
                contract,
                previous = %format!("{:#x}", previous.class_hash),
                "Replaced class record"
            );
        }
        self.recorder.save_declarations(&self.state.declarations)?;

        Ok(StepOutcome::Confirmed {
            tx_hash: declared.tx_hash(),
        })
    }

    async fn deploy(
        &mut self,
        contract: &str,
        constructor_args: &[Arg],
    ) -> Result<StepOutcome, DeployError> {
        let class_hash = self.resolve_single(&Arg::class_hash_of(contract))?;
        let args = self.resolve_all(constructor_args)?;

        if self.policy == DeclarePolicy::Reuse {
            if let Some(record) = self.state.deployments.get(contract) {
                if record.class_hash == class_hash && record.constructor_args == args {
                    tracing::info!(
                        contract,
                        address = %format!("{:#x}", record.address),
                        "Reusing recorded deployment"
                    );
                    return Ok(StepOutcome::Reused);
                }
            }
        }

        let failed = |source| DeployError::DeployFailed {
            contract: contract.to_string(),
            source,
        };

        let submission = self
            .client
            .deploy(class_hash, &args)
            .await
            .map_err(failed)?;
        self.confirm(submission.tx_hash).await.map_err(failed)?;

        tracing::info!(
            contract,
            address = %format!("{:#x}", submission.value),
            "Contract deployed"
        );

        let record = DeploymentRecord {
            address: submission.value,
            class_hash,
            constructor_args: args,
            tx_hash: submission.tx_hash,
            deployed_at: chrono::Utc::now().timestamp(),
        };
        if let Some(previous) = self.state.deployments.insert(contract.to_string(), record) {
            tracing::info!(
                contract,
                previous = %format!("{:#x}", previous.address),
                "Replaced deployment record"
            );
        }
        self.recorder.save_deployments(&self.state.deployments)?;

        Ok(StepOutcome::Confirmed {
            tx_hash: Some(submission.tx_hash),
        })
    }

    async fn invoke(
        &self,
        contract: &str,
        entrypoint: &str,
        args: &[Arg],
    ) -> Result<StepOutcome, DeployError> {
        let address = self.resolve_single(&Arg::address_of(contract))?;
        let call = Call::new(address, entrypoint, self.resolve_all(args)?);

        let tx_hash = self.submit(&[call]).await.map_err(|source| DeployError::InvokeFailed {
            target: contract.to_string(),
            entrypoint: entrypoint.to_string(),
            source,
        })?;

        Ok(StepOutcome::Confirmed {
            tx_hash: Some(tx_hash),
        })
    }

    async fn transfer(
        &self,
        token: &Arg,
        from: &Arg,
        to: &Arg,
        amount: U256,
    ) -> Result<StepOutcome, DeployError> {
        let token = self.resolve_single(token)?;
        let from = self.resolve_single(from)?;
        let to = self.resolve_single(to)?;
        let [low, high] = split_u256(amount);

        let approve = Call::new(token, "approve", vec![from, low, high]);
        let transfer_from = Call::new(token, "transferFrom", vec![from, to, low, high]);

        let failed = |entrypoint: &str, source| DeployError::InvokeFailed {
            target: format!("{token:#x}"),
            entrypoint: entrypoint.to_string(),
            source,
        };

        let tx_hash = if self.client.supports_batching() {
            self.submit(&[approve, transfer_from])
                .await
                .map_err(|source| failed("approve+transferFrom", source))?
        } else {
            self.submit(&[approve])
                .await
                .map_err(|source| failed("approve", source))?;
            self.submit(&[transfer_from])
                .await
                .map_err(|source| failed("transferFrom", source))?
        };

        tracing::info!(
            token = %format!("{token:#x}"),
            to = %format!("{to:#x}"),
            amount = %amount,
            "Tokens transferred"
        );

        Ok(StepOutcome::Confirmed {
            tx_hash: Some(tx_hash),
        })
    }

    async fn call(
        &self,
        target: &Arg,
        entrypoint: &str,
        args: &[Arg],
    ) -> Result<Vec<Felt>, DeployError> {
        let call = Call::new(self.resolve_single(target)?, entrypoint, self.resolve_all(args)?);

        self.client
            .call(&call)
            .await
            .map_err(|source| DeployError::CallFailed {
                target: target.to_string(),
                entrypoint: entrypoint.to_string(),
                source,
            })
    }

    /// Send one transaction and wait until it is accepted.
    async fn submit(&self, calls: &[Call]) -> anyhow::Result<Felt> {
        let tx_hash = self.client.invoke(calls).await?;
        self.confirm(tx_hash).await?;
        Ok(tx_hash)
    }

    async fn confirm(&self, tx_hash: Felt) -> anyhow::Result<()> {
        tracing::debug!(tx_hash = %format!("{tx_hash:#x}"), "Waiting for confirmation");
        self.client
            .wait_for_confirmation(tx_hash)
            .await?
            .ensure_accepted(tx_hash)
    }

    /// Resolve an argument into its calldata felts.
    fn resolve(&self, arg: &Arg) -> Result<Vec<Felt>, DeployError> {
        let unresolved = |contract: &str, kind| DeployError::UnresolvedReference {
            contract: contract.to_string(),
            kind,
        };

        Ok(match arg {
            Arg::Felt(value) => vec![*value],
            Arg::U256(value) => split_u256(*value).to_vec(),
            Arg::Account => vec![self.client.account_address()],
            Arg::AddressOf(contract) => vec![
                self.state
                    .deployments
                    .get(contract)
                    .ok_or_else(|| unresolved(contract.as_str(), ReferenceKind::Address))?
                    .address,
            ],
            Arg::ClassHashOf(contract) => vec![
                self.state
                    .declarations
                    .get(contract)
                    .ok_or_else(|| unresolved(contract.as_str(), ReferenceKind::ClassHash))?
                    .class_hash,
            ],
        })
    }

    fn resolve_all(&self, args: &[Arg]) -> Result<Vec<Felt>, DeployError> {
        let mut calldata = Vec::with_capacity(args.len());
        for arg in args {
            calldata.extend(self.resolve(arg)?);
        }
        Ok(calldata)
    }

    /// Resolve an argument that must be a single felt, such as an address.
    fn resolve_single(&self, arg: &Arg) -> Result<Felt, DeployError> {
        match self.resolve(arg)?.as_slice() {
            [value] => Ok(*value),
            _ => Err(DeployError::Config(format!(
                "`{arg}` does not fit in a single field element"
            ))),
        }
    }
}
