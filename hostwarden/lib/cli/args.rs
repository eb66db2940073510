use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use clap::{Args, Parser, Subcommand};

use crate::{
    auth::{generate_secret, Role},
    config::{
        HostwardenConfig, DEFAULT_BROADCAST_INTERVAL_SECS, DEFAULT_COMMAND_TIMEOUT_SECS,
        DEFAULT_DB_PATH, DEFAULT_FIREWALL_CMD, DEFAULT_FIREWALL_ZONE,
        DEFAULT_GRANT_LIFETIME_HOURS, DEFAULT_LISTEN_ADDR, DEFAULT_SWEEP_INTERVAL_SECS,
        DEFAULT_SYSTEMCTL, DEFAULT_TOKEN_LIFETIME_HOURS,
    },
    HostwardenError, HostwardenResult,
};

use super::styles;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// hostwarden - firewall allow-list, service control and live status for a single Linux host
#[derive(Debug, Parser)]
#[command(name = "hostwarden", author, about, version, styles=styles::styles())]
pub struct HostwardenArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<HostwardenSubcommand>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Debug, Subcommand)]
pub enum HostwardenSubcommand {
    /// Run the dashboard server
    #[command(name = "serve")]
    Serve(ServeArgs),

    /// Manage dashboard users
    #[command(name = "user")]
    User {
        /// The user subcommand to run
        #[command(subcommand)]
        subcommand: UserSubcommand,
    },
}

/// Subcommands of `hostwarden user`
#[derive(Debug, Subcommand)]
pub enum UserSubcommand {
    /// Add a user directly to the database
    #[command(name = "add")]
    Add {
        /// Login name
        #[arg(required = true)]
        username: String,

        /// Contact address
        #[arg(short, long)]
        email: String,

        /// Role: admin, operator or viewer
        #[arg(short, long, default_value = "viewer", value_parser = parse_role)]
        role: Role,

        /// Password. Generated and printed when omitted
        #[arg(long, env = "HOSTWARDEN_USER_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Path of the SQLite database
        #[arg(long, env = "HOSTWARDEN_DB", default_value_os_t = DEFAULT_DB_PATH.clone())]
        db: PathBuf,
    },
}

/// Flags of `hostwarden serve`. Every flag can also come from the environment or a `.env` file.
#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "HOSTWARDEN_LISTEN", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: SocketAddr,

    /// Port to listen on, overriding the port of --listen
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Path of the SQLite database
    #[arg(long, env = "HOSTWARDEN_DB", default_value_os_t = DEFAULT_DB_PATH.clone())]
    pub db: PathBuf,

    /// Secret used to sign login tokens, at least 32 bytes
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Hours a login token stays valid
    #[arg(long, env = "HOSTWARDEN_TOKEN_LIFETIME_HOURS", default_value_t = DEFAULT_TOKEN_LIFETIME_HOURS)]
    pub token_lifetime_hours: u64,

    /// firewalld zone sources are added to
    #[arg(long, env = "HOSTWARDEN_FIREWALL_ZONE", default_value = DEFAULT_FIREWALL_ZONE)]
    pub firewall_zone: String,

    /// firewalld client program
    #[arg(long, env = "HOSTWARDEN_FIREWALL_CMD", default_value = DEFAULT_FIREWALL_CMD)]
    pub firewall_cmd: String,

    /// systemd client program
    #[arg(long, env = "HOSTWARDEN_SYSTEMCTL", default_value = DEFAULT_SYSTEMCTL)]
    pub systemctl: String,

    /// Seconds an external command may run before it is killed
    #[arg(long, env = "HOSTWARDEN_COMMAND_TIMEOUT_SECS", default_value_t = DEFAULT_COMMAND_TIMEOUT_SECS)]
    pub command_timeout_secs: u64,

    /// Seconds between expiry sweeps
    #[arg(long, env = "HOSTWARDEN_SWEEP_INTERVAL_SECS", default_value_t = DEFAULT_SWEEP_INTERVAL_SECS)]
    pub sweep_interval_secs: u64,

    /// Seconds between status snapshots pushed to a session
    #[arg(long, env = "HOSTWARDEN_BROADCAST_INTERVAL_SECS", default_value_t = DEFAULT_BROADCAST_INTERVAL_SECS)]
    pub broadcast_interval_secs: u64,

    /// Hours a temporary grant lasts
    #[arg(long, env = "HOSTWARDEN_GRANT_LIFETIME_HOURS", default_value_t = DEFAULT_GRANT_LIFETIME_HOURS)]
    pub grant_lifetime_hours: u64,

    /// Password for the admin account created on first start
    #[arg(long, env = "HOSTWARDEN_ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: Option<String>,

    /// Record firewall and service commands instead of running them
    #[arg(long, env = "HOSTWARDEN_DRY_RUN")]
    pub dry_run: bool,

    /// Directory for daily rolling log files
    #[arg(long, env = "HOSTWARDEN_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Reverse proxy allowed to set X-Forwarded-For. Repeat or separate with commas
    #[arg(
        long = "trusted-proxy",
        env = "HOSTWARDEN_TRUSTED_PROXIES",
        value_delimiter = ','
    )]
    pub trusted_proxies: Vec<IpAddr>,
}

//-------------------------------------------------------------------------------------------------
// Methods
//-------------------------------------------------------------------------------------------------

impl ServeArgs {
    /// Turns the flags into a validated configuration.
    ///
    /// Without `--jwt-secret` only a dry run may start, and it signs with a throw-away secret.
    pub fn into_config(self) -> HostwardenResult<HostwardenConfig> {
        let jwt_secret = match (self.jwt_secret, self.dry_run) {
            (Some(secret), _) => secret,
            (None, true) => {
                tracing::warn!("no JWT_SECRET set, signing tokens with an ephemeral secret");
                generate_secret()
            }
            (None, false) => {
                return Err(HostwardenError::InvalidConfig(
                    "JWT_SECRET is required".to_string(),
                ))
            }
        };

        let mut listen_addr = self.listen;
        if let Some(port) = self.port {
            listen_addr.set_port(port);
        }

        let config = HostwardenConfig::builder()
            .listen_addr(listen_addr)
            .db_path(self.db)
            .jwt_secret(jwt_secret)
            .token_lifetime(hours(self.token_lifetime_hours))
            .firewall_zone(self.firewall_zone)
            .firewall_cmd(self.firewall_cmd)
            .systemctl(self.systemctl)
            .command_timeout(Duration::from_secs(self.command_timeout_secs))
            .sweep_interval(Duration::from_secs(self.sweep_interval_secs))
            .broadcast_interval(Duration::from_secs(self.broadcast_interval_secs))
            .grant_lifetime(hours(self.grant_lifetime_hours))
            .bootstrap_password(self.admin_password)
            .dry_run(self.dry_run)
            .log_dir(self.log_dir)
            .trusted_proxies(self.trusted_proxies)
            .build();

        config.validate()?;
        Ok(config)
    }
}

//-------------------------------------------------------------------------------------------------
// Functions: Helpers
//-------------------------------------------------------------------------------------------------

fn hours(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(3600))
}

fn parse_role(value: &str) -> Result<Role, String> {
    value.parse::<Role>().map_err(|e| e.to_string())
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------
