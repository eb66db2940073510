use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use getset::{CopyGetters, Getters};
use typed_builder::TypedBuilder;

use crate::{HostwardenError, HostwardenResult};

use super::{
    DEFAULT_BROADCAST_INTERVAL_SECS, DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_DB_PATH,
    DEFAULT_FIREWALL_CMD, DEFAULT_FIREWALL_ZONE, DEFAULT_GRANT_LIFETIME_HOURS,
    DEFAULT_SWEEP_INTERVAL_SECS, DEFAULT_SYSTEMCTL, DEFAULT_TOKEN_LIFETIME_HOURS,
    MIN_JWT_SECRET_BYTES,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Everything `hostwarden serve` needs to run.
#[derive(Debug, Clone, TypedBuilder, Getters, CopyGetters)]
pub struct HostwardenConfig {
    /// Address the HTTP server listens on.
    #[getset(get_copy = "pub")]
    listen_addr: SocketAddr,

    /// Path of the SQLite database.
    #[builder(default = DEFAULT_DB_PATH.clone(), setter(into))]
    #[getset(get = "pub")]
    db_path: PathBuf,

    /// Secret used to sign login tokens.
    #[builder(setter(into))]
    #[getset(get = "pub")]
    jwt_secret: String,

    /// How long a login token stays valid.
    #[builder(default = Duration::from_secs(DEFAULT_TOKEN_LIFETIME_HOURS * 3600))]
    #[getset(get_copy = "pub")]
    token_lifetime: Duration,

    /// firewalld zone sources are added to.
    #[builder(default = DEFAULT_FIREWALL_ZONE.to_string(), setter(into))]
    #[getset(get = "pub")]
    firewall_zone: String,

    /// firewalld client program.
    #[builder(default = DEFAULT_FIREWALL_CMD.to_string(), setter(into))]
    #[getset(get = "pub")]
    firewall_cmd: String,

    /// systemd client program.
    #[builder(default = DEFAULT_SYSTEMCTL.to_string(), setter(into))]
    #[getset(get = "pub")]
    systemctl: String,

    /// Time budget for one external command.
    #[builder(default = Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS))]
    #[getset(get_copy = "pub")]
    command_timeout: Duration,

    /// Interval between expiry sweeps.
    #[builder(default = Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS))]
    #[getset(get_copy = "pub")]
    sweep_interval: Duration,

    /// Interval between snapshots pushed to a session.
    #[builder(default = Duration::from_secs(DEFAULT_BROADCAST_INTERVAL_SECS))]
    #[getset(get_copy = "pub")]
    broadcast_interval: Duration,

    /// Lifetime of a temporary grant.
    #[builder(default = Duration::from_secs(DEFAULT_GRANT_LIFETIME_HOURS * 3600))]
    #[getset(get_copy = "pub")]
    grant_lifetime: Duration,

    /// Password for the `admin` account created on first start. Generated when absent.
    #[builder(default)]
    #[getset(get = "pub")]
    bootstrap_password: Option<String>,

    /// Record firewall and service commands instead of running them.
    #[builder(default)]
    #[getset(get_copy = "pub")]
    dry_run: bool,

    /// Directory for daily rolling log files.
    #[builder(default)]
    #[getset(get = "pub")]
    log_dir: Option<PathBuf>,

    /// Reverse proxies whose `X-Forwarded-For` header is believed. Empty means the header is
    /// ignored and the peer address is used.
    #[builder(default)]
    #[getset(get = "pub")]
    trusted_proxies: Vec<IpAddr>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HostwardenConfig {
    /// Checks the configuration for values hostwarden cannot run with.
    pub fn validate(&self) -> HostwardenResult<()> {
        if self.jwt_secret.len() < MIN_JWT_SECRET_BYTES {
            return Err(HostwardenError::InvalidConfig(format!(
                "jwt secret must be at least {MIN_JWT_SECRET_BYTES} bytes"
            )));
        }

        let intervals = [
            ("command timeout", self.command_timeout),
            ("sweep interval", self.sweep_interval),
            ("broadcast interval", self.broadcast_interval),
            ("grant lifetime", self.grant_lifetime),
            ("token lifetime", self.token_lifetime),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(HostwardenError::InvalidConfig(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        if self.firewall_zone.trim().is_empty() {
            return Err(HostwardenError::InvalidConfig(
                "firewall zone must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// [`Self::grant_lifetime`] as a calendar duration.
    pub fn grant_lifetime_chrono(&self) -> HostwardenResult<chrono::Duration> {
        to_chrono(self.grant_lifetime, "grant lifetime")
    }

    /// [`Self::token_lifetime`] as a calendar duration.
    pub fn token_lifetime_chrono(&self) -> HostwardenResult<chrono::Duration> {
        to_chrono(self.token_lifetime, "token lifetime")
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn to_chrono(value: Duration, name: &str) -> HostwardenResult<chrono::Duration> {
    chrono::Duration::from_std(value)
        .map_err(|_| HostwardenError::InvalidConfig(format!("{name} is out of range")))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
