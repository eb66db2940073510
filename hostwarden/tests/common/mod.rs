#![allow(dead_code)]

use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use hostwarden::{
    auth::{hash_password, Principal, Role},
    executor::RecordingExecutor,
    firewall::{FirewallReconciler, FirewalldCommands},
    models::NewUser,
    status::{CpuStats, DiskStats, HostSnapshot, MemoryStats, NetworkStats, SnapshotSource},
    store::{SqliteStore, UserStore},
    HostwardenResult,
};
use tempfile::TempDir;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A reconciler over a throw-away database and a recording executor.
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<SqliteStore>,
    pub executor: Arc<RecordingExecutor>,
    pub reconciler: Arc<FirewallReconciler>,
}

/// A snapshot source that never touches the host.
pub struct FixedSource;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Harness {
    pub async fn new() -> anyhow::Result<Self> {
        Self::with_executor(RecordingExecutor::new()).await
    }

    pub async fn with_executor(executor: RecordingExecutor) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let store = Arc::new(SqliteStore::open(dir.path().join("hostwarden.db")).await?);
        let executor = Arc::new(executor);
        let reconciler = Arc::new(FirewallReconciler::new(
            executor.clone(),
            store.clone(),
            store.clone(),
            FirewalldCommands::new("firewall-cmd", "public"),
            Duration::hours(24),
        ));

        Ok(Self {
            dir,
            store,
            executor,
            reconciler,
        })
    }

    /// Creates a user with `role` and returns it as a principal.
    pub async fn user(&self, username: &str, role: Role) -> anyhow::Result<Principal> {
        let user = self
            .store
            .create_user(NewUser {
                username: username.to_string(),
                password_hash: hash_password("password123")?,
                role,
                email: format!("{username}@example.com"),
            })
            .await?;

        Ok(Principal::new(user.id, user.username, user.role))
    }

    /// The sources the firewall would admit after replaying every recorded command.
    pub fn admitted(&self) -> BTreeSet<String> {
        let mut admitted = BTreeSet::new();
        for line in self.executor.command_lines() {
            if let Some(address) = source_argument(&line, "--add-source=") {
                admitted.insert(address);
            } else if let Some(address) = source_argument(&line, "--remove-source=") {
                admitted.remove(&address);
            }
        }
        admitted
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl SnapshotSource for FixedSource {
    async fn sample(&self) -> HostwardenResult<HostSnapshot> {
        Ok(HostSnapshot {
            timestamp: Utc::now(),
            cpu: CpuStats {
                usage: 12.5,
                cores: 4,
                temperature: 48.0,
            },
            memory: MemoryStats {
                total: 7962,
                used: 2210,
                cache: 3400,
            },
            disk: DiskStats {
                total: 80,
                used: 21,
                read: 1024.0,
                write: 512.0,
            },
            network: NetworkStats { interfaces: vec![] },
            services: vec![],
            uptime: 3600.0,
            load: [0.1, 0.2, 0.3],
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn source_argument(line: &str, flag: &str) -> Option<String> {
    line.split_whitespace()
        .find_map(|arg| arg.strip_prefix(flag))
        .map(str::to_string)
}
