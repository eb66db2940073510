//! Persisted entities of hostwarden.

use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{auth::Role, firewall::SourceAddress, HostwardenError};

//--------------------------------------------------------------------------------------------------
// Types: Firewall
//--------------------------------------------------------------------------------------------------

/// A persisted statement that a source address should or should not be let through the firewall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallRule {
    /// The unique identifier, assigned by the store.
    pub id: i64,

    /// The IPv4 address or CIDR block the rule is about.
    pub source_ip: SourceAddress,

    /// Free text, may be empty.
    pub description: String,

    /// Whether the address must currently be present in the live allow-list.
    pub enabled: bool,

    /// The id of the operator who created the rule.
    pub created_by: i64,

    /// The username of the operator who created the rule, when it is still known.
    pub created_by_username: Option<String>,

    /// When the rule was created.
    pub created_at: DateTime<Utc>,

    /// When any field of the rule last changed.
    pub updated_at: DateTime<Utc>,
}

/// The desired state of a rule, already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDraft {
    /// The address the rule is about.
    pub source_ip: SourceAddress,

    /// Free text, may be empty.
    pub description: String,

    /// Whether the address should be allowed.
    pub enabled: bool,
}

/// A rule about to be inserted.
#[derive(Debug, Clone)]
pub struct NewFirewallRule {
    /// The validated desired state.
    pub draft: RuleDraft,

    /// The id of the creating operator.
    pub created_by: i64,

    /// The creation time, also used as the first `updated_at`.
    pub created_at: DateTime<Utc>,
}

/// A time-boxed, self-service exception allowing one address through the firewall.
///
/// Grants are only ever created and deleted, never updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporaryIpAccessGrant {
    /// The unique identifier, assigned by the store.
    pub id: i64,

    /// The id of the grantee.
    pub user_id: i64,

    /// The address let through.
    pub ip_address: SourceAddress,

    /// Free text, may be empty.
    pub description: String,

    /// When the sweeper may revoke the grant.
    pub expires_at: DateTime<Utc>,

    /// When the grant was created.
    pub created_at: DateTime<Utc>,
}

/// A grant about to be inserted.
#[derive(Debug, Clone)]
pub struct NewGrant {
    /// The id of the grantee.
    pub user_id: i64,

    /// The address let through.
    pub ip_address: SourceAddress,

    /// Free text, may be empty.
    pub description: String,

    /// When the grant expires.
    pub expires_at: DateTime<Utc>,

    /// When the grant was created.
    pub created_at: DateTime<Utc>,
}

/// Who holds an address open, used to ask whether anyone *else* still needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressHolder {
    /// Nobody yet; the caller is about to create something.
    Nobody,

    /// The rule with this id.
    Rule(i64),

    /// The grant with this id.
    Grant(i64),
}

//--------------------------------------------------------------------------------------------------
// Types: Audit
//--------------------------------------------------------------------------------------------------

/// The area of hostwarden an audit entry comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditCategory {
    /// Service start/stop/restart/status requests.
    Service,

    /// Firewall rule changes.
    Firewall,

    /// Temporary grant creation and revocation.
    Grant,

    /// Background expiry of grants.
    Sweeper,

    /// Logins and user management.
    Auth,
}

/// An append-only record of something an operator or hostwarden itself did.
///
/// A service action record is an entry with [`AuditCategory::Service`], the service action as
/// `action` and the service name as `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// The unique identifier, assigned by the store.
    pub id: i64,

    /// Who did it.
    pub actor_username: String,

    /// The area it belongs to.
    pub category: AuditCategory,

    /// What was done, e.g. `restart` or `create-rule`.
    pub action: String,

    /// What it was done to, e.g. a service name or an address.
    pub target: String,

    /// Captured output or error text.
    pub outcome: String,

    /// Whether it worked.
    pub succeeded: bool,

    /// When it happened.
    pub timestamp: DateTime<Utc>,
}

/// An audit entry about to be appended.
#[derive(Debug, Clone, TypedBuilder)]
pub struct NewAuditEntry {
    /// Who did it.
    #[builder(setter(into))]
    pub actor_username: String,

    /// The area it belongs to.
    pub category: AuditCategory,

    /// What was done.
    #[builder(setter(into))]
    pub action: String,

    /// What it was done to.
    #[builder(setter(into))]
    pub target: String,

    /// Captured output or error text.
    #[builder(setter(into))]
    pub outcome: String,

    /// Whether it worked.
    pub succeeded: bool,

    /// When it happened.
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
}

//--------------------------------------------------------------------------------------------------
// Types: Users
//--------------------------------------------------------------------------------------------------

/// A dashboard user, without credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// The unique identifier.
    pub id: i64,

    /// The login name.
    pub username: String,

    /// What the user may do.
    pub role: Role,

    /// Contact address.
    pub email: String,

    /// When the user last logged in.
    pub last_login: Option<DateTime<Utc>>,

    /// When the user was created.
    pub created_at: DateTime<Utc>,

    /// When the user was last modified.
    pub updated_at: DateTime<Utc>,
}

/// A user together with the stored password hash.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    /// The user.
    pub user: User,

    /// The Argon2id PHC string.
    pub password_hash: String,
}

/// A user about to be inserted.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// The login name.
    pub username: String,

    /// The Argon2id PHC string.
    pub password_hash: String,

    /// What the user may do.
    pub role: Role,

    /// Contact address.
    pub email: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FirewallRule {
    /// The current state of the rule as a draft, for diffing.
    pub fn draft(&self) -> RuleDraft {
        RuleDraft {
            source_ip: self.source_ip.clone(),
            description: self.description.clone(),
            enabled: self.enabled,
        }
    }
}

impl AuditCategory {
    /// The name stored in the audit table.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::Service => "service",
            AuditCategory::Firewall => "firewall",
            AuditCategory::Grant => "grant",
            AuditCategory::Sweeper => "sweeper",
            AuditCategory::Auth => "auth",
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditCategory {
    type Err = HostwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "service" => Ok(AuditCategory::Service),
            "firewall" => Ok(AuditCategory::Firewall),
            "grant" => Ok(AuditCategory::Grant),
            "sweeper" => Ok(AuditCategory::Sweeper),
            "auth" => Ok(AuditCategory::Auth),
            other => Err(HostwardenError::InvalidInput(format!(
                "unknown audit category: {other}"
            ))),
        }
    }
}
