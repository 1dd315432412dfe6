//! Password hashing and verification using Argon2
//!
//! Stored hashes are PHC strings so the salt and parameters travel with them.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::types::ConvenioError;

/// Hash a password using Argon2id
pub fn hash_password(password: &str) -> Result<String, ConvenioError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ConvenioError::Auth(format!("Failed to hash password: {e}")))
}

/// Check a login password against the stored hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, ConvenioError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| ConvenioError::Auth(format!("Invalid password hash format: {e}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("clave-segura").unwrap();

        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("clave-segura", &hash).unwrap());
        assert!(!verify_password("otra-clave", &hash).unwrap());
    }

    #[test]
    fn test_hash_never_contains_plaintext() {
        let hash = hash_password("plaintext-visible").unwrap();
        assert!(!hash.contains("plaintext-visible"));
        assert_ne!(hash, hash_password("plaintext-visible").unwrap());
    }

    #[test]
    fn test_invalid_hash_format() {
        assert!(verify_password("password", "not-a-valid-hash").is_err());
    }
}
