//! Signed bearer tokens for dashboard users.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{HostwardenError, HostwardenResult};

use super::{Authenticator, Principal, Role};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// JWT claims carried by every dashboard token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject, the user id.
    pub sub: i64,

    /// The login name.
    pub username: String,

    /// The role at the time the token was issued.
    pub role: Role,

    /// Issued at (unix timestamp).
    pub iat: i64,

    /// Expiration time (unix timestamp).
    pub exp: i64,
}

/// Issues and verifies HS256 tokens with a shared secret.
#[derive(Clone)]
pub struct JwtAuthenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl JwtAuthenticator {
    /// Creates an authenticator whose tokens are valid for `lifetime`.
    pub fn new(secret: &[u8], lifetime: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            lifetime,
        }
    }

    /// Issues a token for `principal`.
    pub fn issue(&self, principal: &Principal) -> HostwardenResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: principal.id,
            username: principal.username.clone(),
            role: principal.role,
            iat: now.timestamp(),
            exp: (now + self.lifetime).timestamp(),
        };

        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    /// Verifies signature and expiry of `token` and returns its claims.
    pub fn verify(&self, token: &str) -> HostwardenResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    HostwardenError::Authentication("token expired".to_string())
                }
                _ => HostwardenError::Authentication(format!("invalid token: {}", err)),
            })
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, token: &str) -> HostwardenResult<Principal> {
        let claims = self.verify(token)?;
        Ok(Principal::new(claims.sub, claims.username, claims.role))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
