//! Password hashing. bcrypt is CPU-bound, so both directions run on the
//! blocking pool to keep the async executor free.

use bcrypt::{hash, verify, DEFAULT_COST};

use crate::error::{ApiError, ApiResult};

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn check_strength(password: &str) -> ApiResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub async fn hash_password(password: &str) -> ApiResult<String> {
    let password = password.to_string();
    match tokio::task::spawn_blocking(move || hash(&password, DEFAULT_COST)).await {
        Ok(Ok(h)) => Ok(h),
        Ok(Err(e)) => {
            tracing::error!("Failed to hash password: {}", e);
            Err(ApiError::internal(e))
        }
        Err(e) => {
            tracing::error!("spawn_blocking panic during hash: {}", e);
            Err(ApiError::internal(e))
        }
    }
}

/// `false` for a wrong password and for a malformed stored hash.
pub async fn verify_password(password: &str, password_hash: &str) -> bool {
    if password_hash.is_empty() {
        return false;
    }
    let password = password.to_string();
    let password_hash = password_hash.to_string();
    tokio::task::spawn_blocking(move || verify(&password, &password_hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_strength() {
        assert!(check_strength("short").is_err());
        assert!(check_strength("long-enough").is_ok());
    }

    #[tokio::test]
    async fn test_verify_against_hash() {
        let hashed = bcrypt::hash("correct horse", 4).unwrap();
        assert!(verify_password("correct horse", &hashed).await);
        assert!(!verify_password("battery staple", &hashed).await);
        assert!(!verify_password("anything", "not-a-bcrypt-hash").await);
        assert!(!verify_password("anything", "").await);
    }
}
