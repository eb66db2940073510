use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    executor::CommandOutput,
    models::User,
    HostwardenError,
};

//--------------------------------------------------------------------------------------------------
// Types: Requests
//--------------------------------------------------------------------------------------------------

/// Request body for `POST /api/auth/login`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// The login name.
    pub username: String,

    /// The plain-text password.
    pub password: String,
}

/// Request body for `POST /api/firewall/allow-my-ip`.
#[derive(Debug, Default, Deserialize)]
pub struct GrantRequest {
    /// Optional note stored with the grant.
    #[serde(default)]
    pub description: String,
}

/// Request body for `POST /api/server/control/{action}`.
#[derive(Debug, Deserialize)]
pub struct ServiceControlRequest {
    /// The unit to act on.
    pub service: String,
}

/// Request body for `POST /api/users`.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    /// The login name.
    pub username: String,

    /// The plain-text password.
    pub password: String,

    /// Contact address.
    pub email: String,

    /// Role, `viewer` when absent.
    #[serde(default)]
    pub role: Option<crate::auth::Role>,
}

//--------------------------------------------------------------------------------------------------
// Types: Responses
//--------------------------------------------------------------------------------------------------

/// Response body for a successful login.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// Bearer token for later requests and the status stream.
    pub token: String,

    /// The logged-in user.
    pub user: User,
}

/// Response body for service control.
#[derive(Debug, Serialize)]
pub struct ServiceControlResponse {
    /// Whatever the service manager printed on stdout.
    pub output: String,

    /// Whatever the service manager printed on stderr.
    pub error: String,
}

/// Response type for requests that only need an acknowledgement.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Short human readable outcome.
    pub message: String,
}

//--------------------------------------------------------------------------------------------------
// Types: Error Response
//--------------------------------------------------------------------------------------------------

/// Standard error response format
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// HTTP status code
    pub code: u16,

    /// Error message
    pub message: String,

    /// Error type for categorizing errors
    pub error_type: ErrorType,

    /// Optional additional details about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Types of errors that can occur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Invalid request parameters or body
    ValidationError,

    /// Missing, invalid or expired credentials
    AuthenticationError,

    /// The caller's role does not allow the action
    PermissionError,

    /// Resource not found
    NotFound,

    /// The resource already exists
    ConflictError,

    /// A firewall command failed
    FirewallError,

    /// Internal server errors
    InternalError,
}

/// A [`HostwardenError`] on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub HostwardenError);

/// Result type returned by the handlers.
pub type ApiResult<T> = Result<T, ApiError>;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl StatusResponse {
    /// Creates a status response.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(code: u16, message: String, error_type: ErrorType) -> Self {
        Self {
            code,
            message,
            error_type,
            details: None,
        }
    }

    /// Add details to the error response, ignoring details for 500-level errors
    pub fn with_details(mut self, details: String) -> Self {
        // Only include details for non-500 errors
        if self.code < 500 {
            self.details = Some(details);
        }
        self
    }
}

impl ApiError {
    /// The status code and error type `error` is reported with.
    pub fn classify(error: &HostwardenError) -> (StatusCode, ErrorType) {
        match error {
            HostwardenError::InvalidInput(_) => {
                (StatusCode::BAD_REQUEST, ErrorType::ValidationError)
            }
            HostwardenError::Authentication(_) | HostwardenError::Jwt(_) => {
                (StatusCode::UNAUTHORIZED, ErrorType::AuthenticationError)
            }
            HostwardenError::PermissionDenied(_) => {
                (StatusCode::FORBIDDEN, ErrorType::PermissionError)
            }
            HostwardenError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorType::NotFound),
            HostwardenError::Conflict(_) => (StatusCode::CONFLICT, ErrorType::ConflictError),
            HostwardenError::ReconciliationFailure { .. } => {
                (StatusCode::BAD_GATEWAY, ErrorType::FirewallError)
            }
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorType::InternalError,
            ),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<CommandOutput> for ServiceControlResponse {
    fn from(output: CommandOutput) -> Self {
        Self {
            output: output.stdout,
            error: output.stderr,
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<HostwardenError>,
{
    fn from(error: E) -> Self {
        Self(error.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = Self::classify(&self.0);
        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %self.0, "request failed");
                "Internal server error".to_string()
            }
            _ => self.0.to_string(),
        };

        let mut body = ErrorResponse::new(status.as_u16(), message, error_type);
        if let HostwardenError::ReconciliationFailure { step, .. } = &self.0 {
            body.details = Some(format!("failed step: {step}"));
        }

        (status, Json(body)).into_response()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
