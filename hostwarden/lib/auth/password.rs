//! Password hashing using Argon2id.

use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use rand::{distributions::Alphanumeric, Rng};

use crate::{HostwardenError, HostwardenResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Length of generated bootstrap passwords.
const GENERATED_PASSWORD_LENGTH: usize = 24;

/// Length of token signing secrets generated for dry runs.
const GENERATED_SECRET_LENGTH: usize = 64;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Hashes `password` into an Argon2id PHC string with a fresh salt.
pub fn hash_password(password: &str) -> HostwardenResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| HostwardenError::PasswordHash(e.to_string()))
}

/// Verifies `password` against a PHC string.
///
/// Returns `Ok(false)` on mismatch and an error only if the stored hash is malformed.
pub fn verify_password(password: &str, hash: &str) -> HostwardenResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| HostwardenError::PasswordHash(format!("invalid hash format: {e}")))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(HostwardenError::PasswordHash(format!("verify error: {e}"))),
    }
}

/// Generates a random alphanumeric password.
pub fn generate_password() -> String {
    random_alphanumeric(GENERATED_PASSWORD_LENGTH)
}

/// Generates a throw-away token signing secret. Tokens signed with it die with the process.
pub fn generate_secret() -> String {
    random_alphanumeric(GENERATED_SECRET_LENGTH)
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
