use crate::executor::SystemCommand;

use super::{PlannedChange, SourceAddress};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Renders firewalld commands for one zone.
///
/// Changes are made to the permanent configuration and only take effect on reload.
#[derive(Debug, Clone)]
pub struct FirewalldCommands {
    program: String,
    zone: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FirewalldCommands {
    /// Creates a renderer that runs `program` (usually `firewall-cmd`) against `zone`.
    pub fn new(program: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            zone: zone.into(),
        }
    }

    /// The zone sources are added to.
    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// `firewall-cmd --permanent --zone=<zone> --add-source=<address>`
    pub fn allow(&self, address: &SourceAddress) -> SystemCommand {
        self.permanent().arg(format!("--add-source={address}"))
    }

    /// `firewall-cmd --permanent --zone=<zone> --remove-source=<address>`
    pub fn revoke(&self, address: &SourceAddress) -> SystemCommand {
        self.permanent().arg(format!("--remove-source={address}"))
    }

    /// `firewall-cmd --reload`
    pub fn reload(&self) -> SystemCommand {
        SystemCommand::new(&self.program).arg("--reload")
    }

    /// The command that carries out `change`.
    pub fn for_change(&self, change: &PlannedChange) -> SystemCommand {
        if change.step.is_allow() {
            self.allow(&change.address)
        } else {
            self.revoke(&change.address)
        }
    }

    fn permanent(&self) -> SystemCommand {
        SystemCommand::new(&self.program)
            .arg("--permanent")
            .arg(format!("--zone={}", self.zone))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
