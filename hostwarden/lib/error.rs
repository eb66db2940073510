use std::{
    error::Error,
    fmt::{self, Display},
};

use thiserror::Error;

use crate::{executor::CommandError, firewall::ReconcileStep};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a hostwarden-related operation.
pub type HostwardenResult<T> = Result<T, HostwardenError>;

/// An error that occurred while administering the host.
#[derive(pretty_error_debug::Debug, Error)]
pub enum HostwardenError {
    /// The caller supplied a malformed address, an unknown action or a disallowed service name.
    /// Nothing external has been touched when this is returned.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An external firewall command failed or timed out. The store was not updated.
    #[error("reconciliation failed at step `{step}` running `{command}`: {error}")]
    ReconciliationFailure {
        /// The step of the command sequence that failed.
        step: ReconcileStep,

        /// The command line that failed.
        command: String,

        /// The error text reported by the executor.
        error: String,
    },

    /// The actor's role does not allow the requested action.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The referenced rule, grant or user does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A token or a set of credentials was rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The entity being created clashes with an existing one.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An external command failed outside of firewall reconciliation.
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// A database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A token could not be encoded or decoded.
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// A password hash could not be produced or parsed.
    #[error("password hash error: {0}")]
    PasswordHash(String),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HostwardenError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> HostwardenError {
        HostwardenError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Returns `true` if the error was caused by the caller rather than by the host.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            HostwardenError::InvalidInput(_)
                | HostwardenError::PermissionDenied(_)
                | HostwardenError::NotFound(_)
                | HostwardenError::Authentication(_)
                | HostwardenError::Conflict(_)
        )
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `HostwardenResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> HostwardenResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
