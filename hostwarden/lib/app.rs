//! Process lifecycle: wiring the components together, serving, and shutting down.

use std::{net::SocketAddr, path::Path, sync::Arc};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{
    auth::{
        generate_password, generate_secret, AuthService, Authenticator, JwtAuthenticator,
        Principal, Role, UserRequest, BOOTSTRAP_ADMIN_USERNAME,
    },
    config::HostwardenConfig,
    executor::{CommandExecutor, ProcessExecutor, RecordingExecutor},
    firewall::{FirewallReconciler, FirewalldCommands},
    models::User,
    server::{create_router, ServerState},
    service::ServiceController,
    status::{Broadcaster, HostSampler, SnapshotSource},
    store::SqliteStore,
    sweeper::ExpirySweeper,
    HostwardenResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A fully wired hostwarden instance, ready to serve.
pub struct Hostwarden {
    config: HostwardenConfig,
    store: Arc<SqliteStore>,
    state: ServerState,
    sweeper: Arc<ExpirySweeper>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Hostwarden {
    /// Opens the store, creates the first admin if needed and builds every component.
    ///
    /// In dry-run mode firewall and service commands are recorded instead of run. Status probes
    /// only read from the host and always run for real.
    pub async fn build(config: HostwardenConfig) -> HostwardenResult<Self> {
        let store = Arc::new(SqliteStore::open(config.db_path()).await?);
        tracing::info!(db_path = %config.db_path().display(), "database ready");

        let tokens = Arc::new(JwtAuthenticator::new(
            config.jwt_secret().as_bytes(),
            config.token_lifetime_chrono()?,
        ));
        let auth = Arc::new(AuthService::new(store.clone(), store.clone(), tokens.clone()));

        if let Some(password) = auth
            .bootstrap_admin(config.bootstrap_password().as_deref())
            .await?
        {
            tracing::warn!(
                username = BOOTSTRAP_ADMIN_USERNAME,
                %password,
                "created the admin account with a generated password, change it after logging in"
            );
        }

        let probes: Arc<dyn CommandExecutor> =
            Arc::new(ProcessExecutor::new(config.command_timeout()));
        let mutations: Arc<dyn CommandExecutor> = if config.dry_run() {
            tracing::warn!("dry run: firewall and service commands are recorded, not executed");
            Arc::new(RecordingExecutor::new())
        } else {
            probes.clone()
        };

        let reconciler = Arc::new(FirewallReconciler::new(
            mutations.clone(),
            store.clone(),
            store.clone(),
            FirewalldCommands::new(config.firewall_cmd(), config.firewall_zone()),
            config.grant_lifetime_chrono()?,
        ));
        let controller = Arc::new(ServiceController::new(
            mutations,
            store.clone(),
            config.systemctl(),
        ));
        let sampler: Arc<dyn SnapshotSource> =
            Arc::new(HostSampler::new(probes, config.systemctl()));
        let authenticator: Arc<dyn Authenticator> = tokens;
        let broadcaster = Arc::new(Broadcaster::new(
            sampler.clone(),
            authenticator.clone(),
            config.broadcast_interval(),
        ));
        let sweeper = Arc::new(ExpirySweeper::new(
            reconciler.clone(),
            store.clone(),
            store.clone(),
            config.sweep_interval(),
        ));

        let state = ServerState::builder()
            .auth(auth)
            .authenticator(authenticator)
            .reconciler(reconciler)
            .controller(controller)
            .sampler(sampler)
            .broadcaster(broadcaster)
            .audit(store.clone())
            .trusted_proxies(Arc::new(config.trusted_proxies().clone()))
            .build();

        Ok(Self {
            config,
            store,
            state,
            sweeper,
        })
    }

    /// The state handed to request handlers.
    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Serves HTTP until SIGINT or SIGTERM, then stops the sweeper and every status session.
    pub async fn serve(self) -> HostwardenResult<()> {
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        tracing::info!(
            addr = %listener.local_addr()?,
            dry_run = self.config.dry_run(),
            trusted_proxies = ?self.config.trusted_proxies(),
            "hostwarden listening"
        );

        let cancel = CancellationToken::new();
        let sweeper = tokio::spawn(self.sweeper.clone().run(cancel.child_token()));

        let router = create_router(self.state.clone());
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        tracing::info!("shutting down");
        cancel.cancel();
        if let Err(e) = sweeper.await {
            tracing::warn!(error = %e, "sweeper task ended abnormally");
        }

        self.state.broadcaster().shutdown().await;
        self.store.pool().close().await;

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Adds a user straight to the database at `db_path`, acting as the system.
///
/// Returns the user and, when `password` was `None`, the generated password.
pub async fn add_user(
    db_path: impl AsRef<Path>,
    username: &str,
    email: &str,
    role: Role,
    password: Option<String>,
) -> HostwardenResult<(User, Option<String>)> {
    let store = Arc::new(SqliteStore::open(db_path).await?);

    // Nothing is signed here; the service only needs an authenticator to exist.
    let tokens = Arc::new(JwtAuthenticator::new(
        generate_secret().as_bytes(),
        chrono::Duration::minutes(1),
    ));
    let auth = AuthService::new(store.clone(), store.clone(), tokens);

    let (password, generated) = match password {
        Some(password) => (password, None),
        None => {
            let password = generate_password();
            (password.clone(), Some(password))
        }
    };

    let request = UserRequest::builder()
        .username(username)
        .password(password)
        .email(email)
        .role(role)
        .build();

    let user = auth.create_user(&Principal::system(), request).await?;
    store.pool().close().await;

    Ok((user, generated))
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
