//! Background expiry of temporary grants.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{
    auth::Principal,
    firewall::FirewallReconciler,
    models::{AuditCategory, NewAuditEntry},
    store::{AuditLog, RuleStore},
    HostwardenResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Periodically revokes temporary grants whose expiry has passed.
///
/// Failures never reach an interactive caller. They are logged and audited, and a grant whose
/// revoke failed keeps its row so the next tick tries again.
pub struct ExpirySweeper {
    reconciler: Arc<FirewallReconciler>,
    rules: Arc<dyn RuleStore>,
    audit: Arc<dyn AuditLog>,
    interval: Duration,
    pending_reload: AtomicBool,
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Grants revoked and removed.
    pub revoked: usize,

    /// Grants whose revoke failed and were kept for the next sweep.
    pub failed: usize,

    /// Whether the trailing reload was issued and succeeded.
    pub reloaded: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ExpirySweeper {
    /// Creates a sweeper that ticks every `interval`.
    pub fn new(
        reconciler: Arc<FirewallReconciler>,
        rules: Arc<dyn RuleStore>,
        audit: Arc<dyn AuditLog>,
        interval: Duration,
    ) -> Self {
        Self {
            reconciler,
            rules,
            audit,
            interval,
            pending_reload: AtomicBool::new(false),
        }
    }

    /// Sweeps on every tick until `cancel` fires. The first sweep runs immediately.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(interval_secs = self.interval.as_secs(), "expiry sweeper started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.sweep_once(Utc::now()).await {
                        Ok(report) if report.revoked > 0 || report.failed > 0 => {
                            tracing::info!(
                                revoked = report.revoked,
                                failed = report.failed,
                                reloaded = report.reloaded,
                                "expiry sweep finished"
                            );
                        }
                        Ok(_) => tracing::debug!("expiry sweep found nothing to do"),
                        Err(e) => tracing::error!(error = %e, "expiry sweep failed"),
                    }
                }
            }
        }

        tracing::info!("expiry sweeper stopped");
    }

    /// Revokes every grant that expired before `now`, then reloads once if anything changed.
    ///
    /// Only fails if the expired grants cannot be listed.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> HostwardenResult<SweepReport> {
        let expired = self.rules.find_expired_grants(now).await?;
        let mut report = SweepReport::default();
        let mut needs_reload = self.pending_reload.load(Ordering::Acquire);

        for grant in &expired {
            match self.reconciler.revoke_expired_grant(grant, now).await {
                Ok(issued) => {
                    report.revoked += 1;
                    needs_reload |= issued;
                    tracing::info!(grant_id = grant.id, source_ip = %grant.ip_address, "expired grant revoked");
                    self.record(
                        "expire-grant",
                        grant.ip_address.as_str(),
                        format!("revoked grant {} (expired {})", grant.id, grant.expires_at.to_rfc3339()),
                        true,
                    )
                    .await;
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(grant_id = grant.id, source_ip = %grant.ip_address, error = %e, "failed to revoke expired grant");
                    self.record("expire-grant", grant.ip_address.as_str(), e.to_string(), false)
                        .await;
                }
            }
        }

        if needs_reload {
            match self.reconciler.reload().await {
                Ok(()) => {
                    report.reloaded = true;
                    self.pending_reload.store(false, Ordering::Release);
                }
                Err(e) => {
                    // The removals are staged; the next sweep reloads again.
                    self.pending_reload.store(true, Ordering::Release);
                    tracing::warn!(error = %e, "reload after expiry sweep failed");
                    self.record("reload", "firewall", e.to_string(), false).await;
                }
            }
        }

        Ok(report)
    }

    async fn record(&self, action: &str, target: &str, outcome: String, succeeded: bool) {
        let entry = NewAuditEntry::builder()
            .actor_username(Principal::system().username)
            .category(AuditCategory::Sweeper)
            .action(action)
            .target(target)
            .outcome(outcome)
            .succeeded(succeeded)
            .build();

        if let Err(e) = self.audit.append(entry).await {
            tracing::error!(error = %e, action, "failed to write audit entry");
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        executor::RecordingExecutor, firewall::FirewalldCommands, firewall::SourceAddress,
        models::NewGrant, store::SqliteStore,
    };
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        executor: Arc<RecordingExecutor>,
        store: Arc<SqliteStore>,
        sweeper: Arc<ExpirySweeper>,
    }

    async fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("sweep.db")).await.unwrap());
        let executor = Arc::new(RecordingExecutor::new());
        let reconciler = Arc::new(FirewallReconciler::new(
            executor.clone(),
            store.clone(),
            store.clone(),
            FirewalldCommands::new("firewall-cmd", "public"),
            chrono::Duration::hours(24),
        ));
        let sweeper = Arc::new(ExpirySweeper::new(
            reconciler,
            store.clone(),
            store.clone(),
            Duration::from_secs(3600),
        ));
        Fixture {
            _dir: dir,
            executor,
            store,
            sweeper,
        }
    }

    async fn insert_expired(store: &SqliteStore, ip: &str) -> i64 {
        let now = Utc::now();
        store
            .insert_grant(NewGrant {
                user_id: 1,
                ip_address: SourceAddress::parse(ip).unwrap(),
                description: String::new(),
                expires_at: now - chrono::Duration::minutes(1),
                created_at: now - chrono::Duration::hours(25),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_the_rest() -> anyhow::Result<()> {
        let f = fixture().await;
        insert_expired(&f.store, "10.0.0.1").await;
        let stuck = insert_expired(&f.store, "10.0.0.2").await;
        insert_expired(&f.store, "10.0.0.3").await;
        f.executor.fail_once_when("--remove-source=10.0.0.2");

        let report = f.sweeper.sweep_once(Utc::now()).await?;
        assert_eq!(
            report,
            SweepReport {
                revoked: 2,
                failed: 1,
                reloaded: true
            }
        );

        let lines = f.executor.command_lines();
        assert_eq!(lines.iter().filter(|l| l.ends_with("--reload")).count(), 1);
        assert_eq!(lines.last().map(String::as_str), Some("firewall-cmd --reload"));

        let remaining = f.store.list_grants().await?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, stuck);

        // Retried on the next tick.
        let report = f.sweeper.sweep_once(Utc::now()).await?;
        assert_eq!(report.revoked, 1);
        assert!(f.store.list_grants().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_reload_is_retried_next_sweep() -> anyhow::Result<()> {
        let f = fixture().await;
        insert_expired(&f.store, "10.0.0.1").await;
        f.executor.fail_once_when("--reload");

        let report = f.sweeper.sweep_once(Utc::now()).await?;
        assert_eq!(report.revoked, 1);
        assert!(!report.reloaded);

        f.executor.clear_history();
        let report = f.sweeper.sweep_once(Utc::now()).await?;
        assert!(report.reloaded);
        assert_eq!(f.executor.command_lines(), ["firewall-cmd --reload"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_sweep_issues_nothing() -> anyhow::Result<()> {
        let f = fixture().await;

        let report = f.sweeper.sweep_once(Utc::now()).await?;

        assert_eq!(report, SweepReport::default());
        assert!(f.executor.command_lines().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let f = fixture().await;
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(f.sweeper.clone().run(cancel.clone()));
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }
}
