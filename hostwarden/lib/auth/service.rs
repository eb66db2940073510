use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use typed_builder::TypedBuilder;

use crate::{
    models::{AuditCategory, NewAuditEntry, NewUser, User},
    store::{AuditLog, UserStore},
    HostwardenError, HostwardenResult,
};

use super::{generate_password, hash_password, verify_password, JwtAuthenticator, Principal, Role};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The username of the account created on first start.
pub const BOOTSTRAP_ADMIN_USERNAME: &str = "admin";

const BOOTSTRAP_ADMIN_EMAIL: &str = "admin@localhost";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Logs users in and manages accounts.
pub struct AuthService {
    users: Arc<dyn UserStore>,
    audit: Arc<dyn AuditLog>,
    tokens: Arc<JwtAuthenticator>,
}

/// A successful login.
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    /// The bearer token to present on later requests.
    pub token: String,

    /// The user that logged in.
    pub user: User,
}

/// A user to be created by an admin.
#[derive(Debug, Clone, TypedBuilder)]
pub struct UserRequest {
    /// The login name.
    #[builder(setter(into))]
    pub username: String,

    /// The plaintext password, hashed before storage.
    #[builder(setter(into))]
    pub password: String,

    /// Contact address.
    #[builder(setter(into))]
    pub email: String,

    /// What the user may do.
    #[builder(default = Role::Viewer)]
    pub role: Role,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl AuthService {
    /// Creates the service.
    pub fn new(
        users: Arc<dyn UserStore>,
        audit: Arc<dyn AuditLog>,
        tokens: Arc<JwtAuthenticator>,
    ) -> Self {
        Self {
            users,
            audit,
            tokens,
        }
    }

    /// Checks `password` for `username` and issues a token.
    ///
    /// Unknown users and wrong passwords fail the same way.
    pub async fn login(&self, username: &str, password: &str) -> HostwardenResult<LoginOutcome> {
        let credentials = self.users.find_credentials(username).await?;

        let verified = match &credentials {
            Some(creds) => verify_password(password, &creds.password_hash)?,
            None => false,
        };

        let Some(credentials) = credentials.filter(|_| verified) else {
            tracing::warn!(username, "rejected login");
            self.record(username, "login", false, "invalid credentials")
                .await;
            return Err(HostwardenError::Authentication(
                "invalid username or password".to_string(),
            ));
        };

        let now = Utc::now();
        self.users.record_login(credentials.user.id, now).await?;

        let mut user = credentials.user;
        user.last_login = Some(now);

        let principal = Principal::new(user.id, user.username.clone(), user.role);
        let token = self.tokens.issue(&principal)?;

        tracing::info!(username, role = %user.role, "user logged in");
        self.record(username, "login", true, "ok").await;

        Ok(LoginOutcome { token, user })
    }

    /// Creates a user. Only admins may do this.
    pub async fn create_user(
        &self,
        actor: &Principal,
        request: UserRequest,
    ) -> HostwardenResult<User> {
        actor.require_admin("create users")?;
        validate_user_request(&request)?;

        let user = self
            .users
            .create_user(NewUser {
                username: request.username,
                password_hash: hash_password(&request.password)?,
                role: request.role,
                email: request.email,
            })
            .await?;

        tracing::info!(actor = %actor.username, username = %user.username, role = %user.role, "user created");
        self.record(&actor.username, "create-user", true, &user.username)
            .await;

        Ok(user)
    }

    /// Lists all users. Only admins may do this.
    pub async fn list_users(&self, actor: &Principal) -> HostwardenResult<Vec<User>> {
        actor.require_admin("list users")?;
        self.users.list_users().await
    }

    /// Creates the `admin` account if there are no users yet.
    ///
    /// Returns the generated password when none was supplied, so the caller can show it once.
    pub async fn bootstrap_admin(
        &self,
        password: Option<&str>,
    ) -> HostwardenResult<Option<String>> {
        if self.users.count_users().await? > 0 {
            return Ok(None);
        }

        let (password, generated) = match password {
            Some(password) => (password.to_string(), false),
            None => (generate_password(), true),
        };

        self.users
            .create_user(NewUser {
                username: BOOTSTRAP_ADMIN_USERNAME.to_string(),
                password_hash: hash_password(&password)?,
                role: Role::Admin,
                email: BOOTSTRAP_ADMIN_EMAIL.to_string(),
            })
            .await?;

        self.record(
            super::SYSTEM_USERNAME,
            "bootstrap-admin",
            true,
            BOOTSTRAP_ADMIN_USERNAME,
        )
        .await;

        Ok(generated.then_some(password))
    }

    async fn record(&self, actor: &str, action: &str, succeeded: bool, outcome: &str) {
        let entry = NewAuditEntry::builder()
            .actor_username(actor)
            .category(AuditCategory::Auth)
            .action(action)
            .target(actor)
            .outcome(outcome)
            .succeeded(succeeded)
            .build();

        if let Err(e) = self.audit.append(entry).await {
            tracing::error!(error = %e, action, "failed to write audit entry");
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn validate_user_request(request: &UserRequest) -> HostwardenResult<()> {
    if request.username.trim().is_empty() {
        return Err(HostwardenError::InvalidInput(
            "username must not be empty".to_string(),
        ));
    }

    if request.password.len() < 8 {
        return Err(HostwardenError::InvalidInput(
            "password must be at least 8 characters".to_string(),
        ));
    }

    if !request.email.contains('@') {
        return Err(HostwardenError::InvalidInput(format!(
            "invalid email address: {}",
            request.email
        )));
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::Authenticator, store::SqliteStore};
    use tempfile::{tempdir, TempDir};

    async fn service() -> (TempDir, Arc<SqliteStore>, AuthService, Arc<JwtAuthenticator>) {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("auth.db")).await.unwrap());
        let tokens = Arc::new(JwtAuthenticator::new(
            b"0123456789abcdef0123456789abcdef",
            chrono::Duration::hours(1),
        ));
        let service = AuthService::new(store.clone(), store.clone(), tokens.clone());
        (dir, store, service, tokens)
    }

    #[tokio::test]
    async fn test_bootstrap_then_login() -> anyhow::Result<()> {
        let (_dir, store, service, tokens) = service().await;

        let generated = service.bootstrap_admin(None).await?.expect("generated");
        assert!(service.bootstrap_admin(None).await?.is_none());
        assert_eq!(store.count_users().await?, 1);

        let outcome = service.login(BOOTSTRAP_ADMIN_USERNAME, &generated).await?;
        assert!(outcome.user.last_login.is_some());

        let principal = tokens.authenticate(&outcome.token).await?;
        assert_eq!(principal.role, Role::Admin);
        assert_eq!(principal.username, BOOTSTRAP_ADMIN_USERNAME);

        Ok(())
    }

    #[tokio::test]
    async fn test_bad_credentials_are_rejected_and_audited() -> anyhow::Result<()> {
        let (_dir, store, service, _) = service().await;
        service.bootstrap_admin(Some("correct horse")).await?;

        let err = service.login("admin", "wrong").await.unwrap_err();
        assert!(matches!(err, HostwardenError::Authentication(_)));

        let err = service.login("ghost", "whatever").await.unwrap_err();
        assert!(matches!(err, HostwardenError::Authentication(_)));

        let failures = store
            .recent(10)
            .await?
            .into_iter()
            .filter(|e| e.action == "login" && !e.succeeded)
            .count();
        assert_eq!(failures, 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_only_admins_manage_users() -> anyhow::Result<()> {
        let (_dir, _store, service, _) = service().await;
        let admin = Principal::new(1, "admin", Role::Admin);
        let operator = Principal::new(2, "ops", Role::Operator);

        let request = UserRequest::builder()
            .username("ops")
            .password("s3cret-pass")
            .email("ops@example.com")
            .role(Role::Operator)
            .build();

        let err = service
            .create_user(&operator, request.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, HostwardenError::PermissionDenied(_)));

        let user = service.create_user(&admin, request.clone()).await?;
        assert_eq!(user.role, Role::Operator);

        let err = service.create_user(&admin, request).await.unwrap_err();
        assert!(matches!(err, HostwardenError::Conflict(_)));

        assert!(service.list_users(&operator).await.is_err());
        assert_eq!(service.list_users(&admin).await?.len(), 1);

        Ok(())
    }
}
