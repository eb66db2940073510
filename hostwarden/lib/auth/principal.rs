use std::{
    fmt::{self, Display},
    str::FromStr,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{HostwardenError, HostwardenResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The username hostwarden uses for work nobody asked for, such as expiring grants.
pub const SYSTEM_USERNAME: &str = "system";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What a user may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// May do everything, including editing firewall rules and users.
    Admin,

    /// May control services on top of what a viewer may do.
    Operator,

    /// May watch status and allow their own address.
    Viewer,
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// The user id.
    pub id: i64,

    /// The login name.
    pub username: String,

    /// What the caller may do.
    pub role: Role,
}

/// Turns a bearer token into a [`Principal`].
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns the principal the token was issued to, or
    /// [`HostwardenError::Authentication`] if it is invalid or expired.
    async fn authenticate(&self, token: &str) -> HostwardenResult<Principal>;
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Role {
    /// The name stored in the database and carried in tokens.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
            Role::Viewer => "viewer",
        }
    }
}

impl Principal {
    /// Creates a principal.
    pub fn new(id: i64, username: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            username: username.into(),
            role,
        }
    }

    /// The principal background tasks act as.
    pub fn system() -> Self {
        Self::new(0, SYSTEM_USERNAME, Role::Admin)
    }

    /// Fails with [`HostwardenError::PermissionDenied`] unless the principal is an admin.
    pub fn require_admin(&self, action: &str) -> HostwardenResult<()> {
        match self.role {
            Role::Admin => Ok(()),
            _ => Err(self.denied(action)),
        }
    }

    /// Fails with [`HostwardenError::PermissionDenied`] unless the principal is an admin or an
    /// operator.
    pub fn require_operator(&self, action: &str) -> HostwardenResult<()> {
        match self.role {
            Role::Admin | Role::Operator => Ok(()),
            Role::Viewer => Err(self.denied(action)),
        }
    }

    fn denied(&self, action: &str) -> HostwardenError {
        HostwardenError::PermissionDenied(format!(
            "{} ({}) may not {}",
            self.username, self.role, action
        ))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = HostwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "operator" => Ok(Role::Operator),
            "viewer" => Ok(Role::Viewer),
            other => Err(HostwardenError::InvalidInput(format!("unknown role: {other}"))),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
