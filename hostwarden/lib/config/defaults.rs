use std::{path::PathBuf, sync::LazyLock};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The directory under the home directory where hostwarden keeps its state.
pub const HOSTWARDEN_HOME_DIR: &str = ".hostwarden";

/// The file name of the SQLite database.
pub const HOSTWARDEN_DB_FILENAME: &str = "hostwarden.db";

/// Default address the HTTP server listens on.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3001";

/// Default firewalld zone sources are added to.
pub const DEFAULT_FIREWALL_ZONE: &str = "public";

/// Default firewalld client.
pub const DEFAULT_FIREWALL_CMD: &str = "firewall-cmd";

/// Default systemd client.
pub const DEFAULT_SYSTEMCTL: &str = "systemctl";

/// Default time budget for one external command.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 10;

/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;

/// Default interval between snapshots pushed to a session.
pub const DEFAULT_BROADCAST_INTERVAL_SECS: u64 = 5;

/// Default lifetime of a temporary grant.
pub const DEFAULT_GRANT_LIFETIME_HOURS: u64 = 24;

/// Default lifetime of a login token.
pub const DEFAULT_TOKEN_LIFETIME_HOURS: u64 = 24;

/// Shortest accepted token signing secret.
pub const MIN_JWT_SECRET_BYTES: usize = 32;

/// Log filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "hostwarden=info";

/// Log filter used with `--verbose` when `RUST_LOG` is not set.
pub const VERBOSE_LOG_FILTER: &str = "hostwarden=debug";

/// The path where all hostwarden state is stored.
pub static DEFAULT_HOSTWARDEN_HOME: LazyLock<PathBuf> = LazyLock::new(|| {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(HOSTWARDEN_HOME_DIR)
});

/// The default database path.
pub static DEFAULT_DB_PATH: LazyLock<PathBuf> =
    LazyLock::new(|| DEFAULT_HOSTWARDEN_HOME.join(HOSTWARDEN_DB_FILENAME));
