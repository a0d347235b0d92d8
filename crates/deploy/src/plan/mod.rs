//! Deployment plans.
//!
//! A [`Plan`] is an ordered list of [`Step`]s. Steps refer to each other's
//! outputs symbolically ([`Arg::AddressOf`], [`Arg::ClassHashOf`]); the
//! references are resolved against the deployment state right before the
//! step executes.
//!
//! ```rust,ignore
//! let plan = Plan::new()
//!     .declare("referral_Naming")
//!     .deploy("referral_Naming", vec![])
//!     .invoke("referral_Naming", "set_admin", vec![Arg::Account]);
//! ```

use std::{collections::HashMap, fmt};

use alloy_core::primitives::U256;

use crate::{DeployError, DeploymentState, Felt, PlanError, ReferenceKind};

mod networks;
pub use networks::{NAMING_CONTRACT, REFERRAL_CONTRACT, network_plan};

/// A calldata argument, possibly referring to the output of another step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// A literal field element.
    Felt(Felt),
    /// A `u256`, encoded as two felts (low then high 128 bits).
    U256(U256),
    /// The address of the account sending the transactions.
    Account,
    /// The address of a contract deployed earlier.
    AddressOf(String),
    /// The class hash of a contract declared earlier.
    ClassHashOf(String),
}

impl Arg {
    pub fn felt(value: impl Into<Felt>) -> Self {
        Self::Felt(value.into())
    }

    pub fn u256(value: U256) -> Self {
        Self::U256(value)
    }

    pub fn address_of(contract: impl Into<String>) -> Self {
        Self::AddressOf(contract.into())
    }

    pub fn class_hash_of(contract: impl Into<String>) -> Self {
        Self::ClassHashOf(contract.into())
    }

    /// The record this argument depends on, if any.
    pub fn reference(&self) -> Option<(&str, ReferenceKind)> {
        match self {
            Arg::AddressOf(contract) => Some((contract.as_str(), ReferenceKind::Address)),
            Arg::ClassHashOf(contract) => Some((contract.as_str(), ReferenceKind::ClassHash)),
            _ => None,
        }
    }
}

impl From<Felt> for Arg {
    fn from(value: Felt) -> Self {
        Self::Felt(value)
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Felt(value) => write!(f, "{value:#x}"),
            Arg::U256(value) => write!(f, "u256:{value}"),
            Arg::Account => write!(f, "<account>"),
            Arg::AddressOf(contract) => write!(f, "<address of {contract}>"),
            Arg::ClassHashOf(contract) => write!(f, "<class hash of {contract}>"),
        }
    }
}

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Declare the compiled class of `contract`.
    Declare { contract: String },
    /// Deploy an instance of the class declared for `contract`.
    Deploy {
        contract: String,
        constructor_args: Vec<Arg>,
    },
    /// Call a state-changing entrypoint of a deployed contract.
    Invoke {
        contract: String,
        entrypoint: String,
        args: Vec<Arg>,
    },
    /// Move ERC-20 funds with an `approve` followed by a `transferFrom`.
    ///
    /// Both calls are signed by the deployer account, so `from` must be
    /// [`Arg::Account`].
    Transfer {
        token: Arg,
        from: Arg,
        to: Arg,
        amount: U256,
    },
    /// Read-only call, its result is reported under `label`.
    Call {
        label: String,
        target: Arg,
        entrypoint: String,
        args: Vec<Arg>,
    },
}

impl Step {
    /// Every record this step reads.
    pub fn references(&self) -> Vec<(&str, ReferenceKind)> {
        let (own, args): (Option<(&str, ReferenceKind)>, Vec<&Arg>) = match self {
            Step::Declare { .. } => (None, Vec::new()),
            Step::Deploy {
                contract,
                constructor_args,
            } => (
                Some((contract.as_str(), ReferenceKind::ClassHash)),
                constructor_args.iter().collect(),
            ),
            Step::Invoke { contract, args, .. } => (
                Some((contract.as_str(), ReferenceKind::Address)),
                args.iter().collect(),
            ),
            Step::Transfer {
                token, from, to, ..
            } => (None, vec![token, from, to]),
            Step::Call { target, args, .. } => {
                (None, std::iter::once(target).chain(args).collect())
            }
        };

        own.into_iter()
            .chain(args.into_iter().filter_map(Arg::reference))
            .collect()
    }

    /// The record this step writes, if any.
    pub fn produces(&self) -> Option<(&str, ReferenceKind)> {
        match self {
            Step::Declare { contract } => Some((contract.as_str(), ReferenceKind::ClassHash)),
            Step::Deploy { contract, .. } => Some((contract.as_str(), ReferenceKind::Address)),
            _ => None,
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Arg]) -> fmt::Result {
    for (index, arg) in args.iter().enumerate() {
        if index > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Declare { contract } => write!(f, "declare {contract}"),
            Step::Deploy {
                contract,
                constructor_args,
            } => {
                write!(f, "deploy {contract}(")?;
                write_args(f, constructor_args)?;
                write!(f, ")")
            }
            Step::Invoke {
                contract,
                entrypoint,
                args,
            } => {
                write!(f, "invoke {contract}.{entrypoint}(")?;
                write_args(f, args)?;
                write!(f, ")")
            }
            Step::Transfer {
                token,
                from,
                to,
                amount,
            } => write!(f, "transfer {amount} of {token} from {from} to {to}"),
            Step::Call {
                label,
                target,
                entrypoint,
                args,
            } => {
                write!(f, "call {label} = {target}.{entrypoint}(")?;
                write_args(f, args)?;
                write!(f, ")")
            }
        }
    }
}

/// An ordered list of steps, built fluently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn declare(self, contract: impl Into<String>) -> Self {
        self.then(Step::Declare {
            contract: contract.into(),
        })
    }

    pub fn deploy(self, contract: impl Into<String>, constructor_args: Vec<Arg>) -> Self {
        self.then(Step::Deploy {
            contract: contract.into(),
            constructor_args,
        })
    }

    pub fn invoke(
        self,
        contract: impl Into<String>,
        entrypoint: impl Into<String>,
        args: Vec<Arg>,
    ) -> Self {
        self.then(Step::Invoke {
            contract: contract.into(),
            entrypoint: entrypoint.into(),
            args,
        })
    }

    pub fn transfer(self, token: Arg, from: Arg, to: Arg, amount: U256) -> Self {
        self.then(Step::Transfer {
            token,
            from,
            to,
            amount,
        })
    }

    pub fn call(
        self,
        label: impl Into<String>,
        target: Arg,
        entrypoint: impl Into<String>,
        args: Vec<Arg>,
    ) -> Self {
        self.then(Step::Call {
            label: label.into(),
            target,
            entrypoint: entrypoint.into(),
            args,
        })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check that every reference can be resolved when its step runs.
    ///
    /// A reference is satisfied by an earlier step of the plan or, when no
    /// step of the plan produces it, by an existing record. Referring to a
    /// record that a later step produces is always an error, even if an
    /// older record exists, since the older value would silently be used.
    ///
    /// Transfers are only accepted from the signing account.
    pub fn validate(&self, state: &DeploymentState) -> Result<(), PlanError> {
        let reject = |index: usize, step: &Step, error| PlanError {
            step_index: index,
            step: step.to_string(),
            error,
        };

        let mut first_producer: HashMap<(&str, ReferenceKind), usize> = HashMap::new();
        for (index, step) in self.steps.iter().enumerate() {
            if let Some(produced) = step.produces() {
                first_producer.entry(produced).or_insert(index);
            }
        }

        for (index, step) in self.steps.iter().enumerate() {
            if let Step::Transfer { from, .. } = step {
                if *from != Arg::Account {
                    return Err(reject(
                        index,
                        step,
                        DeployError::InvalidStep(format!(
                            "transfers can only move funds of the signing account, not {from}"
                        )),
                    ));
                }
            }

            for (contract, kind) in step.references() {
                let resolvable = match first_producer.get(&(contract, kind)) {
                    Some(producer) => *producer < index,
                    None => match kind {
                        ReferenceKind::Address => state.deployments.contains_key(contract),
                        ReferenceKind::ClassHash => state.declarations.contains_key(contract),
                    },
                };

                if !resolvable {
                    return Err(reject(
                        index,
                        step,
                        DeployError::UnresolvedReference {
                            contract: contract.to_string(),
                            kind,
                        },
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClassRecord, DeploymentRecord};

    #[test]
    fn test_step_display() {
        let plan = Plan::new()
            .declare("Naming")
            .deploy(
                "Referral",
                vec![Arg::Account, Arg::address_of("Naming"), Arg::u256(U256::from(5u64))],
            )
            .invoke("Naming", "set_referral_addr", vec![Arg::address_of("Referral")])
            .transfer(Arg::felt(0xe7u64), Arg::Account, Arg::address_of("Referral"), U256::from(10u64))
            .call("balance", Arg::felt(0xe7u64), "balanceOf", vec![Arg::Account]);

        let rendered: Vec<String> = plan.steps().iter().map(Step::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "declare Naming",
                "deploy Referral(<account>, <address of Naming>, u256:5)",
                "invoke Naming.set_referral_addr(<address of Referral>)",
                "transfer 10 of 0xe7 from <account> to <address of Referral>",
                "call balance = 0xe7.balanceOf(<account>)",
            ]
        );
    }

    #[test]
    fn test_step_references() {
        let deploy = Step::Deploy {
            contract: "Referral".to_string(),
            constructor_args: vec![Arg::address_of("Naming"), Arg::class_hash_of("Naming")],
        };
        assert_eq!(
            deploy.references(),
            vec![
                ("Referral", ReferenceKind::ClassHash),
                ("Naming", ReferenceKind::Address),
                ("Naming", ReferenceKind::ClassHash),
            ]
        );
        assert_eq!(deploy.produces(), Some(("Referral", ReferenceKind::Address)));
    }

    #[test]
    fn test_validate_ordered_plan() {
        let plan = Plan::new()
            .declare("Naming")
            .declare("Referral")
            .deploy("Naming", vec![])
            .deploy("Referral", vec![Arg::address_of("Naming")])
            .invoke("Naming", "set_referral_addr", vec![Arg::address_of("Referral")]);

        assert!(plan.validate(&DeploymentState::default()).is_ok());
    }

    #[test]
    fn test_validate_rejects_forward_reference() {
        let plan = Plan::new()
            .declare("Naming")
            .declare("Referral")
            .deploy("Referral", vec![Arg::address_of("Naming")])
            .deploy("Naming", vec![]);

        let err = plan.validate(&DeploymentState::default()).unwrap_err();
        assert_eq!(err.step_index, 2);
        assert!(matches!(
            err.error,
            DeployError::UnresolvedReference { ref contract, kind: ReferenceKind::Address } if contract == "Naming"
        ));
    }

    #[test]
    fn test_validate_uses_existing_records() {
        let plan = Plan::new().deploy("Naming", vec![]).invoke("Naming", "ping", vec![]);

        let err = plan.validate(&DeploymentState::default()).unwrap_err();
        assert_eq!(err.step_index, 0);

        let mut state = DeploymentState::default();
        state.declarations.insert(
            "Naming".to_string(),
            ClassRecord {
                class_hash: Felt::from(1u64),
                sierra_class_hash: Felt::from(1u64),
                tx_hash: None,
                declared_at: 0,
            },
        );
        assert!(plan.validate(&state).is_ok());

        // An existing deployment does not excuse a reference to a later one.
        let plan = Plan::new()
            .invoke("Naming", "ping", vec![])
            .declare("Naming")
            .deploy("Naming", vec![]);
        state.deployments.insert(
            "Naming".to_string(),
            DeploymentRecord {
                address: Felt::from(2u64),
                class_hash: Felt::from(1u64),
                constructor_args: vec![],
                tx_hash: Felt::from(3u64),
                deployed_at: 0,
            },
        );
        assert_eq!(plan.validate(&state).unwrap_err().step_index, 0);
    }

    #[test]
    fn test_validate_rejects_transfer_from_other_holder() {
        let plan = Plan::new()
            .declare("Referral")
            .deploy("Referral", vec![])
            .transfer(
                Arg::felt(0xe7u64),
                Arg::address_of("Referral"),
                Arg::Account,
                U256::from(10u64),
            );

        let err = plan.validate(&DeploymentState::default()).unwrap_err();
        assert_eq!(err.step_index, 2);
        assert!(matches!(err.error, DeployError::InvalidStep(_)));

        let plan = Plan::new().transfer(
            Arg::felt(0xe7u64),
            Arg::Account,
            Arg::felt(0xb0bu64),
            U256::from(10u64),
        );
        assert!(plan.validate(&DeploymentState::default()).is_ok());
    }
}
