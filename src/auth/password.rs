//! Account password hashing with Argon2id.
//!
//! Provisioning stores the hash of each temporary credential; the plaintext
//! only lives in the checkout session record until the customer logs in.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};

use crate::error::{PlangateError, Result};

/// Argon2id cost parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PasswordConfig {
    /// KiB of memory per hash.
    pub memory_kib: u32,
    pub iterations: u32,
    pub lanes: u32,
}

impl Default for PasswordConfig {
    /// 19 MiB, two passes, one lane.
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            lanes: 1,
        }
    }
}

impl PasswordConfig {
    /// Cheap settings for tests. Not for production.
    pub fn fast() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            lanes: 1,
        }
    }
}

/// Hashes temporary credentials and checks logins against them.
#[derive(Clone, Debug, Default)]
pub struct PasswordHasher {
    config: PasswordConfig,
}

impl PasswordHasher {
    pub fn new(config: PasswordConfig) -> Self {
        Self { config }
    }

    /// PHC string for `password` under a fresh salt.
    pub fn hash(&self, password: &str) -> Result<String> {
        let PasswordConfig {
            memory_kib,
            iterations,
            lanes,
        } = self.config;
        let params = Params::new(memory_kib, iterations, lanes, None)
            .map_err(|e| PlangateError::internal(format!("Invalid Argon2 params: {e}")))?;

        let salt = SaltString::generate(&mut OsRng);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password(password.as_bytes(), &salt)
            .map(|phc| phc.to_string())
            .map_err(|e| PlangateError::internal(format!("Password hashing failed: {e}")))
    }

    /// An empty or malformed stored hash never verifies.
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        match PasswordHash::new(stored) {
            // Cost parameters come from the PHC string, not the config
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}
