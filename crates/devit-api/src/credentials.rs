use anyhow::{Result, anyhow};
use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::{SaltString, rand_core::OsRng},
};
use std::sync::OnceLock;

use tracing::warn;

const DUMMY_PASSWORD: &str = "devit-no-such-account";

/// Password hashing with Argon2id. Digests are PHC strings, so the salt and
/// parameters travel with each hash and old hashes keep verifying after the
/// parameters change.
#[derive(Clone)]
pub struct CredentialStore {
    argon2: Argon2<'static>,
    dummy_digest: OnceLock<String>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self {
            argon2: Argon2::default(),
            dummy_digest: OnceLock::new(),
        }
    }

    pub fn with_params(params: Params) -> Self {
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            dummy_digest: OnceLock::new(),
        }
    }

    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow!("password hashing failed: {}", e))?;
        Ok(hash.to_string())
    }

    pub fn verify(&self, password: &str, digest: &str) -> bool {
        let parsed = match PasswordHash::new(digest) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Stored password hash is unparseable: {}", e);
                return false;
            }
        };

        self.argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    /// Spend one verification's worth of work on a password that has no
    /// account, so a missing user costs as much as a wrong password.
    pub fn verify_dummy(&self, password: &str) {
        let digest = self
            .dummy_digest
            .get_or_init(|| self.hash(DUMMY_PASSWORD).unwrap_or_default());
        if !digest.is_empty() {
            let _ = self.verify(password, digest);
        }
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl CredentialStore {
    pub(crate) fn dummy_primed(&self) -> bool {
        self.dummy_digest.get().is_some()
    }
}

#[cfg(test)]
pub(crate) fn fast_store() -> CredentialStore {
    CredentialStore::with_params(Params::new(1024, 1, 1, None).unwrap())
}
