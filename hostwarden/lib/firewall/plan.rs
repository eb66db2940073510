use std::fmt::{self, Display};

use serde::Serialize;

use crate::models::RuleDraft;

use super::SourceAddress;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A named step of a reconciliation command sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcileStep {
    /// Remove the address a rule used to have before its address changed.
    RevokeOld,

    /// Add the address a rule has after its address changed.
    AllowNew,

    /// Remove an address whose rule was disabled or deleted.
    Revoke,

    /// Add an address whose rule was created or enabled.
    Allow,

    /// Commit the staged firewall configuration.
    Reload,
}

/// One address-level change the firewall needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    /// Which step this is.
    pub step: ReconcileStep,

    /// The address to add or remove.
    pub address: SourceAddress,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ReconcileStep {
    /// The step name used in errors and audit entries.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileStep::RevokeOld => "revoke-old",
            ReconcileStep::AllowNew => "allow-new",
            ReconcileStep::Revoke => "revoke",
            ReconcileStep::Allow => "allow",
            ReconcileStep::Reload => "reload",
        }
    }

    /// Whether the step adds an address to the allow-list.
    pub fn is_allow(&self) -> bool {
        matches!(self, ReconcileStep::Allow | ReconcileStep::AllowNew)
    }
}

impl PlannedChange {
    fn new(step: ReconcileStep, address: &SourceAddress) -> Self {
        Self {
            step,
            address: address.clone(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Computes the address changes that take the firewall from `previous` to `desired`.
///
/// `previous` is `None` when a rule is being created and `desired` is `None` when it is being
/// deleted. Description-only edits plan nothing. The trailing reload is not part of the plan;
/// the caller issues it once the changes have been applied.
pub fn plan_changes(
    desired: Option<&RuleDraft>,
    previous: Option<&RuleDraft>,
) -> Vec<PlannedChange> {
    let mut changes = Vec::new();

    match (previous, desired) {
        (None, None) => {}
        (None, Some(desired)) => {
            if desired.enabled {
                changes.push(PlannedChange::new(ReconcileStep::Allow, &desired.source_ip));
            }
        }
        (Some(previous), None) => {
            if previous.enabled {
                changes.push(PlannedChange::new(ReconcileStep::Revoke, &previous.source_ip));
            }
        }
        (Some(previous), Some(desired)) if previous.source_ip != desired.source_ip => {
            if previous.enabled {
                changes.push(PlannedChange::new(
                    ReconcileStep::RevokeOld,
                    &previous.source_ip,
                ));
            }
            if desired.enabled {
                changes.push(PlannedChange::new(
                    ReconcileStep::AllowNew,
                    &desired.source_ip,
                ));
            }
        }
        (Some(previous), Some(desired)) => match (previous.enabled, desired.enabled) {
            (true, false) => {
                changes.push(PlannedChange::new(ReconcileStep::Revoke, &desired.source_ip));
            }
            (false, true) => {
                changes.push(PlannedChange::new(ReconcileStep::Allow, &desired.source_ip));
            }
            _ => {}
        },
    }

    changes
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for ReconcileStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
