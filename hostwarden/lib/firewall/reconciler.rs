use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use typed_builder::TypedBuilder;

use crate::{
    auth::Principal,
    executor::{CommandExecutor, SystemCommand},
    models::{
        AddressHolder, AuditCategory, FirewallRule, NewAuditEntry, NewFirewallRule, NewGrant,
        RuleDraft, TemporaryIpAccessGrant,
    },
    store::{AuditLog, RuleStore},
    HostwardenError, HostwardenResult,
};

use super::{
    plan_changes, AddressLocks, FirewalldCommands, PlannedChange, ReconcileStep, SourceAddress,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Keeps the live firewall allow-list in line with the rule table.
///
/// Every mutation follows the same shape: take the per-address lock, work out which firewall
/// commands are needed, run them, reload, and only then touch the store. If any command fails
/// the store is left alone and a [`HostwardenError::ReconciliationFailure`] names the step.
///
/// An address stays in the allow-list as long as at least one enabled rule or unexpired grant
/// needs it, so commands that would add an address that is already there, or remove one that
/// someone else still relies on, are skipped.
pub struct FirewallReconciler {
    executor: Arc<dyn CommandExecutor>,
    rules: Arc<dyn RuleStore>,
    audit: Arc<dyn AuditLog>,
    commands: FirewalldCommands,
    locks: AddressLocks,
    grant_lifetime: Duration,
}

/// A rule as requested by an operator, not yet validated.
#[derive(Debug, Clone, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct RuleInput {
    /// The IPv4 address or CIDR block.
    #[builder(setter(into))]
    pub source_ip: String,

    /// Free text.
    #[serde(default)]
    #[builder(default, setter(into))]
    pub description: String,

    /// Whether the address should be allowed.
    #[serde(default = "default_enabled")]
    #[builder(default = true)]
    pub enabled: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RuleInput {
    /// Validates the input into a draft.
    pub fn validate(&self) -> HostwardenResult<RuleDraft> {
        Ok(RuleDraft {
            source_ip: SourceAddress::parse(&self.source_ip)?,
            description: self.description.trim().to_string(),
            enabled: self.enabled,
        })
    }
}

impl FirewallReconciler {
    /// Creates a reconciler.
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        rules: Arc<dyn RuleStore>,
        audit: Arc<dyn AuditLog>,
        commands: FirewalldCommands,
        grant_lifetime: Duration,
    ) -> Self {
        Self {
            executor,
            rules,
            audit,
            commands,
            locks: AddressLocks::new(),
            grant_lifetime,
        }
    }

    /// The per-address locks shared by every mutation.
    pub fn locks(&self) -> &AddressLocks {
        &self.locks
    }

    /// All rules, newest first.
    pub async fn list_rules(&self) -> HostwardenResult<Vec<FirewallRule>> {
        self.rules.list_rules().await
    }

    /// All temporary grants, soonest expiry first.
    pub async fn list_grants(&self) -> HostwardenResult<Vec<TemporaryIpAccessGrant>> {
        self.rules.list_grants().await
    }

    /// Creates a rule. Only admins may do this.
    pub async fn create_rule(
        &self,
        input: &RuleInput,
        actor: &Principal,
    ) -> HostwardenResult<FirewallRule> {
        self.apply_rule(input, None, actor).await
    }

    /// Replaces the mutable fields of rule `id`. Only admins may do this.
    pub async fn update_rule(
        &self,
        id: i64,
        input: &RuleInput,
        actor: &Principal,
    ) -> HostwardenResult<FirewallRule> {
        actor.require_admin("edit firewall rules")?;
        let previous = self.rules.get_rule(id).await?;
        self.apply_rule(input, Some(&previous), actor).await
    }

    /// Brings the firewall and the store from `previous` (or nothing) to `input`.
    ///
    /// When `previous` is given it is re-read once its address is locked, so the diff is always
    /// computed against the state the last completed mutation left behind.
    pub async fn apply_rule(
        &self,
        input: &RuleInput,
        previous: Option<&FirewallRule>,
        actor: &Principal,
    ) -> HostwardenResult<FirewallRule> {
        actor.require_admin("edit firewall rules")?;
        let draft = input.validate()?;

        let Some(previous) = previous else {
            let _guard = self.locks.lock(&draft.source_ip).await;
            return self.apply_locked(draft, None, actor).await;
        };

        let mut expected = previous.source_ip.clone();
        loop {
            let guard = self.locks.lock_all([&expected, &draft.source_ip]).await;
            let current = self.rules.get_rule(previous.id).await?;

            if current.source_ip == expected {
                let result = self.apply_locked(draft, Some(current), actor).await;
                drop(guard);
                return result;
            }

            // Someone moved the rule to another address while we waited.
            drop(guard);
            expected = current.source_ip;
        }
    }

    /// Deletes rule `id`, revoking its address first if it was enabled. Only admins may do this.
    pub async fn delete_rule(&self, id: i64, actor: &Principal) -> HostwardenResult<()> {
        actor.require_admin("delete firewall rules")?;

        let mut expected = self.rules.get_rule(id).await?.source_ip;
        let (rule, _guard) = loop {
            let guard = self.locks.lock(&expected).await;
            let current = self.rules.get_rule(id).await?;
            if current.source_ip == expected {
                break (current, guard);
            }
            drop(guard);
            expected = current.source_ip;
        };

        let changes = plan_changes(None, Some(&rule.draft()));
        let changes = self
            .drop_shared(changes, AddressHolder::Rule(rule.id), Utc::now())
            .await?;

        if let Err(e) = self.run_changes(&changes).await {
            self.record(actor, AuditCategory::Firewall, "delete-rule", &rule.source_ip, &e)
                .await;
            return Err(e);
        }

        self.rules.delete_rule(rule.id).await?;

        tracing::info!(rule_id = rule.id, source_ip = %rule.source_ip, actor = %actor.username, "firewall rule deleted");
        self.record_ok(
            actor,
            AuditCategory::Firewall,
            "delete-rule",
            &rule.source_ip,
            command_summary(&changes),
        )
        .await;

        Ok(())
    }

    /// Lets the single host `address` through for the configured grant lifetime. Any
    /// authenticated user may do this; CIDR blocks are refused.
    pub async fn allow_address(
        &self,
        address: &str,
        description: &str,
        actor: &Principal,
    ) -> HostwardenResult<TemporaryIpAccessGrant> {
        let address = SourceAddress::parse_host(address)?;
        let _guard = self.locks.lock(&address).await;

        let now = Utc::now();
        let changes = vec![PlannedChange {
            step: ReconcileStep::Allow,
            address: address.clone(),
        }];
        let changes = self.drop_shared(changes, AddressHolder::Nobody, now).await?;

        if let Err(e) = self.run_changes(&changes).await {
            self.record(actor, AuditCategory::Grant, "allow-address", &address, &e)
                .await;
            return Err(e);
        }

        let grant = self
            .rules
            .insert_grant(NewGrant {
                user_id: actor.id,
                ip_address: address,
                description: description.trim().to_string(),
                expires_at: now + self.grant_lifetime,
                created_at: now,
            })
            .await?;

        tracing::info!(
            grant_id = grant.id,
            source_ip = %grant.ip_address,
            expires_at = %grant.expires_at,
            actor = %actor.username,
            "temporary access granted"
        );
        self.record_ok(
            actor,
            AuditCategory::Grant,
            "allow-address",
            &grant.ip_address,
            format!("expires {}", grant.expires_at.to_rfc3339()),
        )
        .await;

        Ok(grant)
    }

    /// Revokes grant `id` ahead of its expiry. Admins may revoke any grant, other users only
    /// their own.
    pub async fn revoke_grant(&self, id: i64, actor: &Principal) -> HostwardenResult<()> {
        let grant = self.rules.get_grant(id).await?;
        if grant.user_id != actor.id {
            actor.require_admin("revoke other users' grants")?;
        }

        let _guard = self.locks.lock(&grant.ip_address).await;
        let grant = self.rules.get_grant(id).await?;

        let changes = vec![PlannedChange {
            step: ReconcileStep::Revoke,
            address: grant.ip_address.clone(),
        }];
        let changes = self
            .drop_shared(changes, AddressHolder::Grant(grant.id), Utc::now())
            .await?;

        if let Err(e) = self.run_changes(&changes).await {
            self.record(actor, AuditCategory::Grant, "revoke-grant", &grant.ip_address, &e)
                .await;
            return Err(e);
        }

        self.rules.delete_grant(grant.id).await?;

        tracing::info!(grant_id = grant.id, source_ip = %grant.ip_address, actor = %actor.username, "temporary access revoked");
        self.record_ok(
            actor,
            AuditCategory::Grant,
            "revoke-grant",
            &grant.ip_address,
            command_summary(&changes),
        )
        .await;

        Ok(())
    }

    /// Revokes an expired grant without reloading, for batch expiry.
    ///
    /// Returns whether a firewall command was issued, i.e. whether a reload is needed. A grant
    /// that is already gone is not an error. On failure the grant row is kept.
    pub async fn revoke_expired_grant(
        &self,
        grant: &TemporaryIpAccessGrant,
        now: DateTime<Utc>,
    ) -> HostwardenResult<bool> {
        let _guard = self.locks.lock(&grant.ip_address).await;

        let grant = match self.rules.get_grant(grant.id).await {
            Ok(grant) => grant,
            Err(HostwardenError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        let changes = vec![PlannedChange {
            step: ReconcileStep::Revoke,
            address: grant.ip_address.clone(),
        }];
        let changes = self
            .drop_shared(changes, AddressHolder::Grant(grant.id), now)
            .await?;

        for change in &changes {
            self.run(change.step, &self.commands.for_change(change))
                .await?;
        }

        self.rules.delete_grant(grant.id).await?;
        Ok(!changes.is_empty())
    }

    /// Commits staged firewall changes.
    pub async fn reload(&self) -> HostwardenResult<()> {
        self.run(ReconcileStep::Reload, &self.commands.reload())
            .await
    }

    async fn apply_locked(
        &self,
        draft: RuleDraft,
        previous: Option<FirewallRule>,
        actor: &Principal,
    ) -> HostwardenResult<FirewallRule> {
        let action = if previous.is_some() {
            "update-rule"
        } else {
            "create-rule"
        };

        if let Some(previous) = &previous {
            if previous.draft() == draft {
                tracing::debug!(rule_id = previous.id, "rule unchanged, nothing to apply");
                return Ok(previous.clone());
            }
        }

        let now = Utc::now();
        let previous_draft = previous.as_ref().map(FirewallRule::draft);
        let changes = plan_changes(Some(&draft), previous_draft.as_ref());
        let holder = previous
            .as_ref()
            .map_or(AddressHolder::Nobody, |p| AddressHolder::Rule(p.id));
        let changes = self.drop_shared(changes, holder, now).await?;

        if let Err(e) = self.run_changes(&changes).await {
            self.record(actor, AuditCategory::Firewall, action, &draft.source_ip, &e)
                .await;
            return Err(e);
        }

        let rule = match previous {
            Some(previous) => self.rules.update_rule(previous.id, &draft, now).await?,
            None => {
                self.rules
                    .insert_rule(NewFirewallRule {
                        draft,
                        created_by: actor.id,
                        created_at: now,
                    })
                    .await?
            }
        };

        tracing::info!(
            rule_id = rule.id,
            source_ip = %rule.source_ip,
            enabled = rule.enabled,
            actor = %actor.username,
            commands = changes.len(),
            "firewall rule applied"
        );
        self.record_ok(
            actor,
            AuditCategory::Firewall,
            action,
            &rule.source_ip,
            command_summary(&changes),
        )
        .await;

        Ok(rule)
    }

    /// Removes changes that would not alter the allow-list because another rule or grant
    /// already admits the address.
    async fn drop_shared(
        &self,
        changes: Vec<PlannedChange>,
        holder: AddressHolder,
        now: DateTime<Utc>,
    ) -> HostwardenResult<Vec<PlannedChange>> {
        let mut kept = Vec::with_capacity(changes.len());
        for change in changes {
            if self
                .rules
                .address_in_use(&change.address, holder, now)
                .await?
            {
                tracing::debug!(
                    source_ip = %change.address,
                    step = %change.step,
                    "address held by another rule or grant, skipping"
                );
                continue;
            }
            kept.push(change);
        }
        Ok(kept)
    }

    /// Runs `changes` in order followed by one reload. Does nothing if `changes` is empty.
    async fn run_changes(&self, changes: &[PlannedChange]) -> HostwardenResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        for change in changes {
            self.run(change.step, &self.commands.for_change(change))
                .await?;
        }

        self.reload().await
    }

    async fn run(&self, step: ReconcileStep, command: &SystemCommand) -> HostwardenResult<()> {
        match self.executor.execute(command).await {
            Ok(_) => {
                tracing::debug!(%step, %command, "firewall command succeeded");
                Ok(())
            }
            Err(e) => {
                tracing::error!(%step, %command, error = %e, "firewall command failed");
                Err(HostwardenError::ReconciliationFailure {
                    step,
                    command: command.to_string(),
                    error: e.to_string(),
                })
            }
        }
    }

    async fn record(
        &self,
        actor: &Principal,
        category: AuditCategory,
        action: &str,
        target: &SourceAddress,
        error: &HostwardenError,
    ) {
        self.append(actor, category, action, target, error.to_string(), false)
            .await;
    }

    async fn record_ok(
        &self,
        actor: &Principal,
        category: AuditCategory,
        action: &str,
        target: &SourceAddress,
        outcome: String,
    ) {
        self.append(actor, category, action, target, outcome, true)
            .await;
    }

    async fn append(
        &self,
        actor: &Principal,
        category: AuditCategory,
        action: &str,
        target: &SourceAddress,
        outcome: String,
        succeeded: bool,
    ) {
        let entry = NewAuditEntry::builder()
            .actor_username(actor.username.as_str())
            .category(category)
            .action(action)
            .target(target.as_str())
            .outcome(outcome)
            .succeeded(succeeded)
            .build();

        if let Err(e) = self.audit.append(entry).await {
            tracing::error!(error = %e, action, "failed to write audit entry");
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn default_enabled() -> bool {
    true
}

fn command_summary(changes: &[PlannedChange]) -> String {
    if changes.is_empty() {
        return "no firewall change".to_string();
    }

    changes
        .iter()
        .map(|c| format!("{} {}", c.step, c.address))
        .chain(std::iter::once(ReconcileStep::Reload.to_string()))
        .collect::<Vec<_>>()
        .join(", ")
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
