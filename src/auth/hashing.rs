//! Token-secret hashing and verification utilities using Argon2id.
//!
//! Token fingerprint verification is deliberately slow (memory cost >= 64
//! MiB, three passes): the stored hashes must survive an offline attacker
//! with a dumped database, and a verify that costs tens to hundreds of
//! milliseconds makes online enumeration impractical. The verification cost
//! dominates authentication latency by design; do not cache verification
//! results in the core.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;

use crate::config::AuthConfig;
use crate::errors::{Result, VaultryError};

/// Create an Argon2id hasher from configuration.
///
/// Parameter floors (64 MiB memory, time cost 3, parallelism 1) are
/// enforced at configuration validation; this constructor uses the values
/// as given so tests can trade strength for speed explicitly.
pub fn password_hasher(config: &AuthConfig) -> Result<Argon2<'static>> {
    let params = Params::new(
        config.argon2_memory_kib,
        config.argon2_time_cost,
        config.argon2_parallelism,
        Some(32),
    )
    .map_err(|err| VaultryError::config(format!("Invalid Argon2 parameters: {}", err)))?;

    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a token secret with a random salt.
///
/// Returns a PHC string that embeds algorithm, version, parameters, salt,
/// and digest, so stored hashes survive later parameter changes.
pub fn hash_secret(hasher: &Argon2<'static>, secret: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let hash = hasher
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|err| VaultryError::internal(format!("Failed to hash token secret: {}", err)))?;

    Ok(hash.to_string())
}

/// Verify a candidate secret against a stored PHC hash.
///
/// Returns `Ok(false)` on mismatch; an error only for malformed hashes.
pub fn verify_secret(hasher: &Argon2<'static>, candidate: &str, stored: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored).map_err(|err| {
        VaultryError::internal(format!("Invalid stored token hash format: {}", err))
    })?;

    match hasher.verify_password(candidate.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => {
            Err(VaultryError::internal(format!("Token verification failed: {}", err)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Weak parameters keep the suite fast; production floors are enforced
    // by AppConfig::validate, not here.
    pub(crate) fn fast_config() -> AuthConfig {
        AuthConfig {
            argon2_memory_kib: 1024,
            argon2_time_cost: 1,
            argon2_parallelism: 1,
            ..Default::default()
        }
    }

    #[test]
    fn hash_produces_phc_string() {
        let hasher = password_hasher(&fast_config()).unwrap();
        let hash = hash_secret(&hasher, "vt_example-payload").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hash.contains("$v=19$"));
        assert!(hash.len() > 80);
    }

    #[test]
    fn salts_differ_between_hashes() {
        let hasher = password_hasher(&fast_config()).unwrap();
        let hash1 = hash_secret(&hasher, "same-secret").unwrap();
        let hash2 = hash_secret(&hasher, "same-secret").unwrap();

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn verify_accepts_correct_secret() {
        let hasher = password_hasher(&fast_config()).unwrap();
        let hash = hash_secret(&hasher, "correct-secret").unwrap();

        assert!(verify_secret(&hasher, "correct-secret", &hash).unwrap());
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let hasher = password_hasher(&fast_config()).unwrap();
        let hash = hash_secret(&hasher, "correct-secret").unwrap();

        assert!(!verify_secret(&hasher, "wrong-secret", &hash).unwrap());
        assert!(!verify_secret(&hasher, "correct-secret ", &hash).unwrap());
        assert!(!verify_secret(&hasher, "", &hash).unwrap());
    }

    #[test]
    fn verify_rejects_malformed_hash() {
        let hasher = password_hasher(&fast_config()).unwrap();
        assert!(verify_secret(&hasher, "anything", "not-a-phc-hash").is_err());
        assert!(verify_secret(&hasher, "anything", "").is_err());
    }

    #[test]
    fn invalid_params_are_rejected() {
        let config = AuthConfig {
            argon2_memory_kib: 1, // below argon2's own minimum
            argon2_time_cost: 1,
            argon2_parallelism: 1,
            ..Default::default()
        };
        assert!(password_hasher(&config).is_err());
    }
}
