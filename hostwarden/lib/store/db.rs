use std::path::Path;

use sqlx::{migrate::Migrator, sqlite::SqlitePoolOptions, Pool, Sqlite};
use tokio::fs;

use crate::HostwardenResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Migrator for the hostwarden database.
pub static HOSTWARDEN_DB_MIGRATOR: Migrator = sqlx::migrate!("lib/store/migrations");

/// Maximum number of pooled connections.
const MAX_CONNECTIONS: u32 = 5;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Initializes the SQLite database at `db_path`, creating it if needed, and runs migrations.
///
/// ## Arguments
///
/// * `db_path` - Path where the SQLite database file lives
/// * `migrator` - SQLx migrator containing database schema migrations to run
pub async fn init_db(
    db_path: impl AsRef<Path>,
    migrator: &Migrator,
) -> HostwardenResult<Pool<Sqlite>> {
    let db_path = db_path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    // Create an empty database file if it doesn't exist
    if !db_path.exists() {
        fs::File::create(&db_path).await?;
    }

    let pool = get_db_pool(db_path).await?;
    migrator.run(&pool).await?;

    tracing::debug!(path = %db_path.display(), "database ready");
    Ok(pool)
}

/// Creates a connection pool for an existing SQLite database.
pub async fn get_db_pool(db_path: impl AsRef<Path>) -> HostwardenResult<Pool<Sqlite>> {
    let db_path = db_path.as_ref();
    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect(&format!("sqlite://{}?mode=rwc", db_path.display()))
        .await?;

    Ok(pool)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_init_db_creates_tables() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("nested").join("hostwarden.db");

        let pool = init_db(&db_path, &HOSTWARDEN_DB_MIGRATOR).await?;

        let tables = sqlx::query("SELECT name FROM sqlite_master WHERE type='table'")
            .fetch_all(&pool)
            .await?;

        let table_names: Vec<String> = tables
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .collect();

        for table in ["users", "firewall_rules", "temporary_ip_access", "audit_log"] {
            assert!(
                table_names.contains(&table.to_string()),
                "{table} table not found"
            );
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_init_db_is_idempotent() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("hostwarden.db");

        init_db(&db_path, &HOSTWARDEN_DB_MIGRATOR).await?.close().await;
        init_db(&db_path, &HOSTWARDEN_DB_MIGRATOR).await?;

        Ok(())
    }
}
