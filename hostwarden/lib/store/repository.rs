//! Storage capabilities the rest of hostwarden is written against.
//!
//! All operations are async. Implementations must support concurrent readers and serialize
//! writers per row (or per append for the audit log).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    firewall::SourceAddress,
    models::{
        AddressHolder, AuditEntry, FirewallRule, NewAuditEntry, NewFirewallRule, NewGrant,
        NewUser, RuleDraft, TemporaryIpAccessGrant, User, UserCredentials,
    },
    HostwardenResult,
};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Durable table of firewall rules and temporary address grants.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All rules, newest first.
    async fn list_rules(&self) -> HostwardenResult<Vec<FirewallRule>>;

    /// The rule with `id`, or [`crate::HostwardenError::NotFound`].
    async fn get_rule(&self, id: i64) -> HostwardenResult<FirewallRule>;

    /// Inserts a rule and returns it with its assigned id.
    async fn insert_rule(&self, rule: NewFirewallRule) -> HostwardenResult<FirewallRule>;

    /// Overwrites the mutable fields of rule `id` and bumps `updated_at`.
    async fn update_rule(
        &self,
        id: i64,
        draft: &RuleDraft,
        updated_at: DateTime<Utc>,
    ) -> HostwardenResult<FirewallRule>;

    /// Deletes rule `id`, or fails with [`crate::HostwardenError::NotFound`].
    async fn delete_rule(&self, id: i64) -> HostwardenResult<()>;

    /// All grants, soonest expiry first.
    async fn list_grants(&self) -> HostwardenResult<Vec<TemporaryIpAccessGrant>>;

    /// The grant with `id`, or [`crate::HostwardenError::NotFound`].
    async fn get_grant(&self, id: i64) -> HostwardenResult<TemporaryIpAccessGrant>;

    /// Inserts a grant and returns it with its assigned id.
    async fn insert_grant(&self, grant: NewGrant) -> HostwardenResult<TemporaryIpAccessGrant>;

    /// Deletes grant `id`, or fails with [`crate::HostwardenError::NotFound`].
    async fn delete_grant(&self, id: i64) -> HostwardenResult<()>;

    /// Grants whose `expires_at` is before `now`.
    async fn find_expired_grants(
        &self,
        now: DateTime<Utc>,
    ) -> HostwardenResult<Vec<TemporaryIpAccessGrant>>;

    /// Whether an enabled rule or an unexpired grant other than `excluding` admits `address`.
    async fn address_in_use(
        &self,
        address: &SourceAddress,
        excluding: AddressHolder,
        now: DateTime<Utc>,
    ) -> HostwardenResult<bool>;
}

/// Append-only sink for operational events.
///
/// Reconciliation and service control only ever append. Reading is for the log viewer.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Appends an entry and returns it with its assigned id.
    async fn append(&self, entry: NewAuditEntry) -> HostwardenResult<AuditEntry>;

    /// The latest `limit` entries, newest first.
    async fn recent(&self, limit: u32) -> HostwardenResult<Vec<AuditEntry>>;
}

/// Dashboard user accounts.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Number of users.
    async fn count_users(&self) -> HostwardenResult<i64>;

    /// All users, oldest first.
    async fn list_users(&self) -> HostwardenResult<Vec<User>>;

    /// The user called `username` together with their password hash.
    async fn find_credentials(&self, username: &str) -> HostwardenResult<Option<UserCredentials>>;

    /// Inserts a user, or fails with [`crate::HostwardenError::Conflict`] if the username or
    /// email is taken.
    async fn create_user(&self, user: NewUser) -> HostwardenResult<User>;

    /// Records a successful login.
    async fn record_login(&self, id: i64, at: DateTime<Utc>) -> HostwardenResult<()>;
}
