//! HTTP request handlers for the REST API.
//!
//! Handlers authenticate through [`CurrentUser`] and leave permission checks to the component
//! they call, so the same rules apply no matter how an operation is reached.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::{
    auth::{Role, UserRequest},
    firewall::RuleInput,
    models::{AuditEntry, FirewallRule, TemporaryIpAccessGrant, User},
    status::HostSnapshot,
    HostwardenError,
};

use super::{
    ApiResult, ClientAddress, CreateUserRequest, CurrentUser, GrantRequest, LoginRequest,
    LoginResponse, ServerState, ServiceControlRequest, ServiceControlResponse, StatusResponse,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Number of audit entries returned by the log viewer.
pub const LOG_VIEW_LIMIT: u32 = 100;

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// Handler for `POST /api/auth/login`.
pub async fn login(
    State(state): State<ServerState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let outcome = state
        .auth()
        .login(&request.username, &request.password)
        .await?;

    Ok(Json(LoginResponse {
        token: outcome.token,
        user: outcome.user,
    }))
}

/// Handler for `GET /api/servers/stats`.
pub async fn server_stats(
    State(state): State<ServerState>,
    CurrentUser(_): CurrentUser,
) -> ApiResult<Json<HostSnapshot>> {
    Ok(Json(state.sampler().sample().await?))
}

/// Handler for `GET /api/firewall/rules`.
pub async fn list_rules(
    State(state): State<ServerState>,
    CurrentUser(_): CurrentUser,
) -> ApiResult<Json<Vec<FirewallRule>>> {
    Ok(Json(state.reconciler().list_rules().await?))
}

/// Handler for `POST /api/firewall/rules`.
pub async fn create_rule(
    State(state): State<ServerState>,
    CurrentUser(actor): CurrentUser,
    Json(input): Json<RuleInput>,
) -> ApiResult<(StatusCode, Json<FirewallRule>)> {
    let rule = state.reconciler().create_rule(&input, &actor).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// Handler for `PUT /api/firewall/rules/{id}`.
pub async fn update_rule(
    State(state): State<ServerState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
    Json(input): Json<RuleInput>,
) -> ApiResult<Json<FirewallRule>> {
    Ok(Json(state.reconciler().update_rule(id, &input, &actor).await?))
}

/// Handler for `DELETE /api/firewall/rules/{id}`.
pub async fn delete_rule(
    State(state): State<ServerState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<StatusResponse>> {
    state.reconciler().delete_rule(id, &actor).await?;
    Ok(Json(StatusResponse::new("Rule deleted")))
}

/// Handler for `GET /api/firewall/grants`.
pub async fn list_grants(
    State(state): State<ServerState>,
    CurrentUser(_): CurrentUser,
) -> ApiResult<Json<Vec<TemporaryIpAccessGrant>>> {
    Ok(Json(state.reconciler().list_grants().await?))
}

/// Handler for `POST /api/firewall/allow-my-ip`.
///
/// The body is optional; an empty body grants access without a description.
pub async fn allow_my_ip(
    State(state): State<ServerState>,
    CurrentUser(actor): CurrentUser,
    ClientAddress(address): ClientAddress,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<TemporaryIpAccessGrant>)> {
    let request = if body.is_empty() {
        GrantRequest::default()
    } else {
        serde_json::from_slice::<GrantRequest>(&body)
            .map_err(|e| HostwardenError::InvalidInput(format!("request body: {e}")))?
    };

    let grant = state
        .reconciler()
        .allow_address(&address, &request.description, &actor)
        .await?;

    Ok((StatusCode::CREATED, Json(grant)))
}

/// Handler for `DELETE /api/firewall/grants/{id}`.
pub async fn revoke_grant(
    State(state): State<ServerState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<StatusResponse>> {
    state.reconciler().revoke_grant(id, &actor).await?;
    Ok(Json(StatusResponse::new("Access revoked")))
}

/// Handler for `POST /api/server/control/{action}`.
pub async fn control_service(
    State(state): State<ServerState>,
    CurrentUser(actor): CurrentUser,
    Path(action): Path<String>,
    Json(request): Json<ServiceControlRequest>,
) -> ApiResult<Json<ServiceControlResponse>> {
    let output = state
        .controller()
        .control_service(&action, &request.service, &actor)
        .await?;

    Ok(Json(output.into()))
}

/// Handler for `GET /api/users`.
pub async fn list_users(
    State(state): State<ServerState>,
    CurrentUser(actor): CurrentUser,
) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.auth().list_users(&actor).await?))
}

/// Handler for `POST /api/users`.
pub async fn create_user(
    State(state): State<ServerState>,
    CurrentUser(actor): CurrentUser,
    Json(request): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let request = UserRequest::builder()
        .username(request.username)
        .password(request.password)
        .email(request.email)
        .role(request.role.unwrap_or(Role::Viewer))
        .build();

    let user = state.auth().create_user(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Handler for `GET /api/logs`. Open to every authenticated user.
pub async fn recent_logs(
    State(state): State<ServerState>,
    CurrentUser(_): CurrentUser,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    Ok(Json(state.audit().recent(LOG_VIEW_LIMIT).await?))
}
