//! Route definitions for the HTTP server.

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use super::{handlers, ws, ServerState};

//-------------------------------------------------------------------------------------------------
// Functions
//-------------------------------------------------------------------------------------------------

/// Creates a new router with all API endpoints and the status socket configured.
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/api/auth/login", post(handlers::login))
        .route("/api/servers/stats", get(handlers::server_stats))
        .route(
            "/api/firewall/rules",
            get(handlers::list_rules).post(handlers::create_rule),
        )
        .route(
            "/api/firewall/rules/{id}",
            put(handlers::update_rule).delete(handlers::delete_rule),
        )
        .route("/api/firewall/grants", get(handlers::list_grants))
        .route("/api/firewall/grants/{id}", delete(handlers::revoke_grant))
        .route("/api/firewall/allow-my-ip", post(handlers::allow_my_ip))
        .route(
            "/api/server/control/{action}",
            post(handlers::control_service),
        )
        .route(
            "/api/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        .route("/api/logs", get(handlers::recent_logs))
        .route("/ws", get(ws::status_socket))
        .with_state(state)
}
