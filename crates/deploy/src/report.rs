//! Outcome of a plan run.

use std::collections::{BTreeMap, BTreeSet};

use comfy_table::{Table, presets::UTF8_FULL};

use crate::{DeploymentState, Felt};

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A transaction was confirmed. `tx_hash` is the last one the step sent,
    /// absent when the node had nothing to do (e.g. a class already declared).
    Confirmed { tx_hash: Option<Felt> },
    /// Skipped because a matching record already existed.
    Reused,
    /// A read-only call returned `result`.
    Queried { result: Vec<Felt> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub index: usize,
    pub step: String,
    pub outcome: StepOutcome,
}

/// Per-step outcomes of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
    /// Results of the `Call` steps, by label.
    pub queries: BTreeMap<String, Vec<Felt>>,
}

impl RunReport {
    pub fn query(&self, label: &str) -> Option<&[Felt]> {
        self.queries.get(label).map(Vec::as_slice)
    }

    /// Number of steps that were skipped thanks to existing records.
    pub fn reused(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| step.outcome == StepOutcome::Reused)
            .count()
    }
}

/// Render the recorded contracts as a table.
pub fn summary_table(state: &DeploymentState) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Contract", "Class hash", "Address"]);

    let contracts = state
        .declarations
        .keys()
        .chain(state.deployments.keys())
        .collect::<BTreeSet<_>>();

    for contract in contracts {
        let class_hash = state
            .deployments
            .get(contract)
            .map(|record| record.class_hash)
            .or_else(|| state.declarations.get(contract).map(|record| record.class_hash));
        let address = state.deployments.get(contract).map(|record| record.address);

        table.add_row(vec![
            contract.clone(),
            class_hash.map(|hash| format!("{hash:#x}")).unwrap_or_default(),
            address
                .map(|address| format!("{address:#x}"))
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClassRecord, DeploymentRecord};

    #[test]
    fn test_summary_lists_every_contract() {
        let mut state = DeploymentState::default();
        state.declarations.insert(
            "referral_Naming".to_string(),
            ClassRecord {
                class_hash: Felt::from(0xc1u64),
                sierra_class_hash: Felt::ONE,
                tx_hash: None,
                declared_at: 0,
            },
        );
        state.declarations.insert(
            "referral_Referral".to_string(),
            ClassRecord {
                class_hash: Felt::from(0xc2u64),
                sierra_class_hash: Felt::ONE,
                tx_hash: None,
                declared_at: 0,
            },
        );
        state.deployments.insert(
            "referral_Referral".to_string(),
            DeploymentRecord {
                address: Felt::from(0xadu64),
                class_hash: Felt::from(0xc2u64),
                constructor_args: vec![],
                tx_hash: Felt::from(0x7u64),
                deployed_at: 0,
            },
        );

        let rendered = summary_table(&state).to_string();
        assert!(rendered.contains("referral_Naming"));
        assert!(rendered.contains("0xc1"));
        assert!(rendered.contains("0xad"));
    }

    #[test]
    fn test_report_queries() {
        let mut report = RunReport::default();
        report
            .queries
            .insert("balance".to_string(), vec![Felt::from(5u64), Felt::ZERO]);
        report.steps.push(StepReport {
            index: 0,
            step: "declare referral_Naming".to_string(),
            outcome: StepOutcome::Reused,
        });

        assert_eq!(report.query("balance"), Some(&[Felt::from(5u64), Felt::ZERO][..]));
        assert_eq!(report.query("missing"), None);
        assert_eq!(report.reused(), 1);
    }
}
