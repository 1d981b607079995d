//! Password hashing and random credential generation
//!
//! bcrypt is CPU-bound, so the async variants run it on the blocking pool.
//! The `_blocking` variants are for callers already off the async runtime
//! (the CLI, `spawn_blocking` closures).

use rand::RngCore;

use crate::error::{ApiError, ApiResult};

fn bcrypt_error(err: bcrypt::BcryptError) -> ApiError {
    ApiError::Internal(format!("bcrypt error: {}", err))
}

pub fn hash_password_blocking(password: &str, cost: u32) -> ApiResult<String> {
    bcrypt::hash(password, cost).map_err(bcrypt_error)
}

/// Compare `password` with a stored hash. A malformed hash never matches.
pub fn verify_password_blocking(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

pub async fn hash_password(password: String, cost: u32) -> ApiResult<String> {
    tokio::task::spawn_blocking(move || hash_password_blocking(&password, cost)).await?
}

pub async fn verify_password(password: String, hash: String) -> ApiResult<bool> {
    Ok(tokio::task::spawn_blocking(move || verify_password_blocking(&password, &hash)).await?)
}

/// `length` bytes from the OS RNG, hex encoded.
pub fn generate_token(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A fresh `(client_id, client_secret)` pair.
pub fn generate_client_credentials() -> (String, String) {
    (generate_token(20), generate_token(32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BCRYPT_MIN_COST;

    #[test]
    fn test_generate_token_length_and_uniqueness() {
        let a = generate_token(32);
        let b = generate_token(32);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_client_credentials() {
        let (id, secret) = generate_client_credentials();
        assert_eq!(id.len(), 40);
        assert_eq!(secret.len(), 64);
    }

    #[tokio::test]
    async fn test_hash_and_verify() {
        let hash = hash_password("s3cret!".into(), BCRYPT_MIN_COST).await.unwrap();
        assert!(verify_password("s3cret!".into(), hash.clone()).await.unwrap());
        assert!(!verify_password("wrong".into(), hash).await.unwrap());
        assert!(!verify_password_blocking("s3cret!", "not-a-hash"));
    }
}
