//! Password hashing and session token generation.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::Rng;
use rand_distr::Alphanumeric;

pub fn hash_password(plain: &str) -> Result<String> {
    let argon2 = Argon2::default();
    let salt = SaltString::generate(&mut OsRng);
    let hash_string = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|err| anyhow!("{}", err))?
        .to_string();
    Ok(hash_string)
}

pub fn verify_password(plain: &str, target_hash: &str) -> Result<bool> {
    let argon2 = Argon2::default();
    let password_hash = PasswordHash::new(target_hash).map_err(|err| anyhow!("{}", err))?;
    Ok(argon2
        .verify_password(plain.as_bytes(), &password_hash)
        .is_ok())
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct AuthTokenValue(pub String);

impl AuthTokenValue {
    pub fn generate() -> AuthTokenValue {
        let rng = rand::rng();
        let random_string: String = rng
            .sample_iter(&Alphanumeric)
            .take(64)
            .map(char::from)
            .collect();
        AuthTokenValue(random_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_round_trip() {
        let hash = hash_password("123mypw").unwrap();
        assert!(verify_password("123mypw", &hash).unwrap());
        assert!(!verify_password("wrongpw", &hash).unwrap());
    }

    #[test]
    fn test_same_password_hashes_differently() {
        let first = hash_password("123mypw").unwrap();
        let second = hash_password("123mypw").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_generated_tokens_are_long_and_unique() {
        let first = AuthTokenValue::generate();
        let second = AuthTokenValue::generate();
        assert_eq!(first.0.len(), 64);
        assert_ne!(first.0, second.0);
    }
}
