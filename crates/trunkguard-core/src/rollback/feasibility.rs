//! Pre-execution veto for rollbacks.

use serde::{Deserialize, Serialize};

use super::decision::{DecisionPolicy, RollbackContext};

/// Why a rollback cannot run, plus non-blocking concerns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feasibility {
    pub blocking_reasons: Vec<String>,
    pub warnings: Vec<String>,
}

impl Feasibility {
    pub fn is_feasible(&self) -> bool {
        self.blocking_reasons.is_empty()
    }
}

pub fn check_feasibility(context: &RollbackContext, policy: &DecisionPolicy) -> Feasibility {
    let mut result = Feasibility::default();

    match (&context.target_version, context.target_exists) {
        (None, _) => result.blocking_reasons.push(format!(
            "no stable revert point is known for '{}'",
            context.trunk
        )),
        (Some(target), false) => result.blocking_reasons.push(format!(
            "target revert point {target} does not exist"
        )),
        (Some(target), true) if context.commits_to_revert == 0 || context.trunk_matches_target => {
            result.blocking_reasons.push(format!(
                "'{}' already matches {target}; nothing to revert",
                context.trunk
            ));
        }
        (Some(_), true) => {}
    }

    if context.operation_in_flight {
        result.blocking_reasons.push(format!(
            "a merge or rollback is in flight on '{}'",
            context.trunk
        ));
    }

    match context.available_bytes {
        Some(free) if free < policy.min_free_bytes => result.blocking_reasons.push(format!(
            "only {free} bytes free, at least {} required",
            policy.min_free_bytes
        )),
        Some(_) => {}
        None => result
            .warnings
            .push("available storage could not be determined".to_string()),
    }

    if !context.migration_files.is_empty() {
        let message = format!(
            "revert range touches migrations: {}",
            context.migration_files.join(", ")
        );
        if policy.block_on_migrations {
            result.blocking_reasons.push(message);
        } else {
            result.warnings.push(message);
        }
    }

    result
}
