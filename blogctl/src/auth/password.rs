//! Password hashing and verification (Argon2id).

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::errors::Error;

/// Argon2 cost parameters.
#[derive(Debug, Clone, Copy)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Argon2Params {
    fn to_argon2(self) -> Result<Argon2<'static>, Error> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None).map_err(|e| Error::Internal {
            operation: format!("create argon2 params: {e}"),
        })?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self {
            memory_kib: 19456, // 19 MB
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Hash a password into a PHC string. Uses secure defaults when `params` is `None`.
pub fn hash_password_with_params(password: &str, params: Option<Argon2Params>) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = params.unwrap_or_default().to_argon2()?;

    let hash = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| Error::Internal {
        operation: format!("hash password: {e}"),
    })?;

    Ok(hash.to_string())
}

pub fn hash_password(password: &str) -> Result<String, Error> {
    hash_password_with_params(password, None)
}

/// Check a password against a stored PHC hash.
///
/// The cost parameters are read from the hash itself. An unparseable hash is an internal
/// error, not a mismatch.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, Error> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| Error::Internal {
        operation: format!("parse password hash: {e}"),
    })?;

    Ok(Argon2::default().verify_password(password.as_bytes(), &parsed_hash).is_ok())
}

/// [`verify_password`] on the blocking pool, keeping the hash work off the request workers.
pub async fn verify_password_blocking(password: String, hash: String) -> Result<bool, Error> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("join password verification: {e}"),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> Option<Argon2Params> {
        Some(Argon2Params {
            memory_kib: 128,
            iterations: 1,
            parallelism: 1,
        })
    }

    #[test]
    fn test_password_hashing() {
        let hash = hash_password_with_params("test_password_123", cheap()).unwrap();
        assert!(hash.starts_with("$argon2id$"));

        assert!(verify_password("test_password_123", &hash).unwrap());
        assert!(!verify_password("wrong_password", &hash).unwrap());
    }

    #[test]
    fn test_same_password_different_salts() {
        let hash1 = hash_password_with_params("password", cheap()).unwrap();
        let hash2 = hash_password_with_params("password", cheap()).unwrap();
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_garbage_hash_is_error() {
        assert!(verify_password("password", "not-a-phc-string").is_err());
    }

    #[tokio::test]
    async fn test_blocking_verification() {
        let hash = hash_password_with_params("secret", cheap()).unwrap();
        assert!(verify_password_blocking("secret".to_string(), hash.clone()).await.unwrap());
        assert!(!verify_password_blocking("nope".to_string(), hash).await.unwrap());
    }
}
