use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};

use crate::{
    firewall::SourceAddress,
    models::{
        AddressHolder, AuditCategory, AuditEntry, FirewallRule, NewAuditEntry, NewFirewallRule,
        NewGrant, NewUser, RuleDraft, TemporaryIpAccessGrant, User, UserCredentials,
    },
    HostwardenError, HostwardenResult,
};

use super::{init_db, AuditLog, RuleStore, UserStore, HOSTWARDEN_DB_MIGRATOR};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const RULE_COLUMNS: &str = r#"
    fr.id, fr.source_ip, fr.description, fr.enabled, fr.created_by,
    u.username AS created_by_username, fr.created_at, fr.updated_at
"#;

const GRANT_COLUMNS: &str = "id, user_id, ip_address, description, expires_at, created_at";

const USER_COLUMNS: &str =
    "id, username, email, password_hash, role, last_login, created_at, updated_at";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Rule store, audit log and user store backed by one SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SqliteStore {
    /// Wraps an existing, migrated pool.
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Opens (creating and migrating if needed) the database at `db_path`.
    pub async fn open(db_path: impl AsRef<Path>) -> HostwardenResult<Self> {
        let pool = init_db(db_path, &HOSTWARDEN_DB_MIGRATOR).await?;
        Ok(Self::new(pool))
    }

    /// The underlying pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn fetch_rule(&self, id: i64) -> HostwardenResult<FirewallRule> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {RULE_COLUMNS}
            FROM firewall_rules fr
            LEFT JOIN users u ON fr.created_by = u.id
            WHERE fr.id = ?
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| HostwardenError::NotFound(format!("firewall rule {id}")))?;

        rule_from_row(&row)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl RuleStore for SqliteStore {
    async fn list_rules(&self) -> HostwardenResult<Vec<FirewallRule>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RULE_COLUMNS}
            FROM firewall_rules fr
            LEFT JOIN users u ON fr.created_by = u.id
            ORDER BY fr.id DESC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(rule_from_row).collect()
    }

    async fn get_rule(&self, id: i64) -> HostwardenResult<FirewallRule> {
        self.fetch_rule(id).await
    }

    async fn insert_rule(&self, rule: NewFirewallRule) -> HostwardenResult<FirewallRule> {
        let record = sqlx::query(
            r#"
            INSERT INTO firewall_rules (source_ip, description, enabled, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(rule.draft.source_ip.as_str())
        .bind(&rule.draft.description)
        .bind(rule.draft.enabled)
        .bind(rule.created_by)
        .bind(rule.created_at)
        .bind(rule.created_at)
        .fetch_one(&self.pool)
        .await?;

        self.fetch_rule(record.try_get::<i64, _>("id")?).await
    }

    async fn update_rule(
        &self,
        id: i64,
        draft: &RuleDraft,
        updated_at: DateTime<Utc>,
    ) -> HostwardenResult<FirewallRule> {
        let result = sqlx::query(
            r#"
            UPDATE firewall_rules
            SET source_ip = ?, description = ?, enabled = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(draft.source_ip.as_str())
        .bind(&draft.description)
        .bind(draft.enabled)
        .bind(updated_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(HostwardenError::NotFound(format!("firewall rule {id}")));
        }

        self.fetch_rule(id).await
    }

    async fn delete_rule(&self, id: i64) -> HostwardenResult<()> {
        let result = sqlx::query("DELETE FROM firewall_rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(HostwardenError::NotFound(format!("firewall rule {id}")));
        }

        Ok(())
    }

    async fn list_grants(&self) -> HostwardenResult<Vec<TemporaryIpAccessGrant>> {
        let rows = sqlx::query(&format!(
            "SELECT {GRANT_COLUMNS} FROM temporary_ip_access ORDER BY expires_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(grant_from_row).collect()
    }

    async fn get_grant(&self, id: i64) -> HostwardenResult<TemporaryIpAccessGrant> {
        let row = sqlx::query(&format!(
            "SELECT {GRANT_COLUMNS} FROM temporary_ip_access WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| HostwardenError::NotFound(format!("temporary grant {id}")))?;

        grant_from_row(&row)
    }

    async fn insert_grant(&self, grant: NewGrant) -> HostwardenResult<TemporaryIpAccessGrant> {
        let record = sqlx::query(
            r#"
            INSERT INTO temporary_ip_access (user_id, ip_address, description, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(grant.user_id)
        .bind(grant.ip_address.as_str())
        .bind(&grant.description)
        .bind(grant.expires_at)
        .bind(grant.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(TemporaryIpAccessGrant {
            id: record.try_get("id")?,
            user_id: grant.user_id,
            ip_address: grant.ip_address,
            description: grant.description,
            expires_at: grant.expires_at,
            created_at: grant.created_at,
        })
    }

    async fn delete_grant(&self, id: i64) -> HostwardenResult<()> {
        let result = sqlx::query("DELETE FROM temporary_ip_access WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(HostwardenError::NotFound(format!("temporary grant {id}")));
        }

        Ok(())
    }

    async fn find_expired_grants(
        &self,
        now: DateTime<Utc>,
    ) -> HostwardenResult<Vec<TemporaryIpAccessGrant>> {
        let rows = sqlx::query(&format!(
            "SELECT {GRANT_COLUMNS} FROM temporary_ip_access WHERE expires_at < ? ORDER BY id ASC"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(grant_from_row).collect()
    }

    async fn address_in_use(
        &self,
        address: &SourceAddress,
        excluding: AddressHolder,
        now: DateTime<Utc>,
    ) -> HostwardenResult<bool> {
        let (excluded_rule, excluded_grant) = match excluding {
            AddressHolder::Nobody => (None, None),
            AddressHolder::Rule(id) => (Some(id), None),
            AddressHolder::Grant(id) => (None, Some(id)),
        };

        let row = sqlx::query(
            r#"
            SELECT
                EXISTS (
                    SELECT 1 FROM firewall_rules
                    WHERE source_ip = ? AND enabled = 1 AND (? IS NULL OR id != ?)
                )
                OR EXISTS (
                    SELECT 1 FROM temporary_ip_access
                    WHERE ip_address = ? AND expires_at > ? AND (? IS NULL OR id != ?)
                ) AS in_use
            "#,
        )
        .bind(address.as_str())
        .bind(excluded_rule)
        .bind(excluded_rule)
        .bind(address.as_str())
        .bind(now)
        .bind(excluded_grant)
        .bind(excluded_grant)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<bool, _>("in_use")?)
    }
}

#[async_trait]
impl AuditLog for SqliteStore {
    async fn append(&self, entry: NewAuditEntry) -> HostwardenResult<AuditEntry> {
        let record = sqlx::query(
            r#"
            INSERT INTO audit_log (actor_username, category, action, target, outcome, succeeded, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&entry.actor_username)
        .bind(entry.category.as_str())
        .bind(&entry.action)
        .bind(&entry.target)
        .bind(&entry.outcome)
        .bind(entry.succeeded)
        .bind(entry.timestamp)
        .fetch_one(&self.pool)
        .await?;

        Ok(AuditEntry {
            id: record.try_get("id")?,
            actor_username: entry.actor_username,
            category: entry.category,
            action: entry.action,
            target: entry.target,
            outcome: entry.outcome,
            succeeded: entry.succeeded,
            timestamp: entry.timestamp,
        })
    }

    async fn recent(&self, limit: u32) -> HostwardenResult<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, actor_username, category, action, target, outcome, succeeded, created_at
            FROM audit_log
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(audit_from_row).collect()
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn count_users(&self) -> HostwardenResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM users")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("count")?)
    }

    async fn list_users(&self) -> HostwardenResult<Vec<User>> {
        let rows = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id ASC"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(user_from_row).collect()
    }

    async fn find_credentials(&self, username: &str) -> HostwardenResult<Option<UserCredentials>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?"))
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(UserCredentials {
                user: user_from_row(&row)?,
                password_hash: row.try_get("password_hash")?,
            })
        })
        .transpose()
    }

    async fn create_user(&self, user: NewUser) -> HostwardenResult<User> {
        let now = Utc::now();
        let record = sqlx::query(
            r#"
            INSERT INTO users (username, email, password_hash, role, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                HostwardenError::Conflict("username or email already exists".to_string())
            }
            e => HostwardenError::Database(e),
        })?;

        Ok(User {
            id: record.try_get("id")?,
            username: user.username,
            role: user.role,
            email: user.email,
            last_login: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn record_login(&self, id: i64, at: DateTime<Utc>) -> HostwardenResult<()> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn decode_address(raw: String) -> HostwardenResult<SourceAddress> {
    SourceAddress::parse(&raw)
        .map_err(|_| HostwardenError::custom(anyhow::anyhow!("corrupt address in store: {raw}")))
}

fn rule_from_row(row: &SqliteRow) -> HostwardenResult<FirewallRule> {
    Ok(FirewallRule {
        id: row.try_get("id")?,
        source_ip: decode_address(row.try_get("source_ip")?)?,
        description: row.try_get("description")?,
        enabled: row.try_get("enabled")?,
        created_by: row.try_get("created_by")?,
        created_by_username: row.try_get("created_by_username")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn grant_from_row(row: &SqliteRow) -> HostwardenResult<TemporaryIpAccessGrant> {
    Ok(TemporaryIpAccessGrant {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        ip_address: decode_address(row.try_get("ip_address")?)?,
        description: row.try_get("description")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn audit_from_row(row: &SqliteRow) -> HostwardenResult<AuditEntry> {
    Ok(AuditEntry {
        id: row.try_get("id")?,
        actor_username: row.try_get("actor_username")?,
        category: row.try_get::<String, _>("category")?.parse::<AuditCategory>()?,
        action: row.try_get("action")?,
        target: row.try_get("target")?,
        outcome: row.try_get("outcome")?,
        succeeded: row.try_get("succeeded")?,
        timestamp: row.try_get("created_at")?,
    })
}

fn user_from_row(row: &SqliteRow) -> HostwardenResult<User> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        role: row.try_get::<String, _>("role")?.parse()?,
        email: row.try_get("email")?,
        last_login: row.try_get("last_login")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use chrono::Duration;
    use tempfile::{tempdir, TempDir};

    async fn open_store() -> (TempDir, SqliteStore) {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("store.db")).await.unwrap();
        (dir, store)
    }

    fn draft(ip: &str, enabled: bool) -> RuleDraft {
        RuleDraft {
            source_ip: SourceAddress::parse(ip).unwrap(),
            description: format!("rule for {ip}"),
            enabled,
        }
    }

    fn grant(ip: &str, expires_at: DateTime<Utc>) -> NewGrant {
        NewGrant {
            user_id: 1,
            ip_address: SourceAddress::parse(ip).unwrap(),
            description: String::new(),
            expires_at,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_rule_crud() -> anyhow::Result<()> {
        let (_dir, store) = open_store().await;
        let admin = store
            .create_user(NewUser {
                username: "root".to_string(),
                password_hash: "x".to_string(),
                role: Role::Admin,
                email: "root@example.com".to_string(),
            })
            .await?;

        let created_at = Utc::now();
        let rule = store
            .insert_rule(NewFirewallRule {
                draft: draft("10.0.0.5", true),
                created_by: admin.id,
                created_at,
            })
            .await?;

        assert_eq!(rule.source_ip.as_str(), "10.0.0.5");
        assert_eq!(rule.created_by_username.as_deref(), Some("root"));
        assert_eq!(rule.created_at, rule.updated_at);

        let later = created_at + Duration::seconds(5);
        let updated = store
            .update_rule(rule.id, &draft("10.0.0.6/32", false), later)
            .await?;
        assert_eq!(updated.source_ip.as_str(), "10.0.0.6/32");
        assert!(!updated.enabled);
        assert_eq!(updated.updated_at, later);
        assert_eq!(updated.created_at, rule.created_at);

        assert_eq!(store.list_rules().await?.len(), 1);

        store.delete_rule(rule.id).await?;
        assert!(matches!(
            store.get_rule(rule.id).await,
            Err(HostwardenError::NotFound(_))
        ));
        assert!(matches!(
            store.delete_rule(rule.id).await,
            Err(HostwardenError::NotFound(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_find_expired_grants() -> anyhow::Result<()> {
        let (_dir, store) = open_store().await;
        let now = Utc::now();

        let expired = store
            .insert_grant(grant("192.168.1.10", now - Duration::hours(1)))
            .await?;
        let live = store
            .insert_grant(grant("192.168.1.11", now + Duration::hours(1)))
            .await?;

        let found = store.find_expired_grants(now).await?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, expired.id);

        assert_eq!(store.get_grant(live.id).await?.ip_address, live.ip_address);
        assert_eq!(store.list_grants().await?.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_address_in_use_respects_exclusion() -> anyhow::Result<()> {
        let (_dir, store) = open_store().await;
        let now = Utc::now();
        let address = SourceAddress::parse("10.1.1.1")?;

        assert!(!store.address_in_use(&address, AddressHolder::Nobody, now).await?);

        let rule = store
            .insert_rule(NewFirewallRule {
                draft: draft("10.1.1.1", true),
                created_by: 1,
                created_at: now,
            })
            .await?;
        assert!(store.address_in_use(&address, AddressHolder::Nobody, now).await?);
        assert!(!store.address_in_use(&address, AddressHolder::Rule(rule.id), now).await?);

        let grant = store
            .insert_grant(grant("10.1.1.1", now + Duration::hours(1)))
            .await?;
        assert!(store.address_in_use(&address, AddressHolder::Rule(rule.id), now).await?);
        assert!(store.address_in_use(&address, AddressHolder::Grant(grant.id), now).await?);

        // Disabled rules and expired grants do not hold an address open.
        store.update_rule(rule.id, &draft("10.1.1.1", false), now).await?;
        assert!(!store.address_in_use(&address, AddressHolder::Grant(grant.id), now).await?);
        assert!(
            !store
                .address_in_use(&address, AddressHolder::Nobody, now + Duration::hours(2))
                .await?
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_audit_append_and_recent() -> anyhow::Result<()> {
        let (_dir, store) = open_store().await;

        for i in 0..3 {
            store
                .append(
                    NewAuditEntry::builder()
                        .actor_username("ops")
                        .category(AuditCategory::Service)
                        .action("restart")
                        .target(format!("svc{i}"))
                        .outcome("ok")
                        .succeeded(true)
                        .build(),
                )
                .await?;
        }

        let recent = store.recent(2).await?;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].target, "svc2");
        assert_eq!(recent[1].target, "svc1");
        assert_eq!(recent[0].category, AuditCategory::Service);

        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_username_is_a_conflict() -> anyhow::Result<()> {
        let (_dir, store) = open_store().await;
        let new_user = |email: &str| NewUser {
            username: "ops".to_string(),
            password_hash: "x".to_string(),
            role: Role::Operator,
            email: email.to_string(),
        };

        store.create_user(new_user("a@example.com")).await?;
        let err = store.create_user(new_user("b@example.com")).await.unwrap_err();
        assert!(matches!(err, HostwardenError::Conflict(_)));

        assert_eq!(store.count_users().await?, 1);
        let creds = store.find_credentials("ops").await?.expect("user exists");
        assert_eq!(creds.user.role, Role::Operator);
        assert!(store.find_credentials("nobody").await?.is_none());

        Ok(())
    }
}
