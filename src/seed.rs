/**
 * Seeding
 * Bootstrap admin account for an empty user table
 */
use anyhow::Context;
use chrono::Utc;
use uuid::Uuid;

use crate::config::AdminSeed;
use crate::db::models::{Role, User};
use crate::password;
use crate::query::filters::{UserFilter, USER_SORT};
use crate::query::{PageWindow, SortSpec};
use crate::store::Store;

/// A new account with normalized (trimmed, lowercased) username and email.
pub fn new_user(username: &str, email: &str, password_hash: String, role: Role) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        username: username.trim().to_lowercase(),
        email: email.trim().to_lowercase(),
        password_hash,
        first_name: String::new(),
        last_name: String::new(),
        role,
        is_active: true,
        last_login: None,
        avatar: None,
        created_at: now,
        updated_at: now,
    }
}

/// Insert an active admin with the given credentials.
pub async fn create_admin(store: &dyn Store, seed: &AdminSeed) -> anyhow::Result<User> {
    password::check_strength(&seed.password).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let hash = password::hash_password(&seed.password)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let mut user = new_user(&seed.username, &seed.email, hash, Role::Admin);
    user.first_name = "Site".to_string();
    user.last_name = "Administrator".to_string();
    store
        .insert_user(&user)
        .await
        .with_context(|| format!("failed to create admin '{}'", user.username))?;

    tracing::info!(user_id = %user.id, username = %user.username, "Admin account created");
    Ok(user)
}

/// Create the seed admin when no users exist yet. Returns the new account,
/// or `None` when users were already present.
pub async fn ensure_admin(store: &dyn Store, seed: &AdminSeed) -> anyhow::Result<Option<User>> {
    let existing = store
        .list_users(
            &UserFilter::default(),
            &SortSpec::parse(None, USER_SORT, "-createdAt"),
            PageWindow::count_only(),
        )
        .await
        .context("failed to count users")?;
    if existing.total > 0 {
        tracing::debug!(users = existing.total, "User table not empty, skipping admin seed");
        return Ok(None);
    }

    tracing::warn!(
        username = %seed.username,
        "No users found, creating bootstrap admin from ADMIN_* settings"
    );
    create_admin(store, seed).await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn seed() -> AdminSeed {
        AdminSeed {
            username: " Admin ".to_string(),
            email: "Admin@Example.com".to_string(),
            password: "admin12345".to_string(),
        }
    }

    #[tokio::test]
    async fn test_ensure_admin_seeds_empty_store_once() {
        let store = MemoryStore::new();
        let created = ensure_admin(&store, &seed()).await.unwrap().unwrap();
        assert_eq!(created.username, "admin");
        assert_eq!(created.email, "admin@example.com");
        assert_eq!(created.role, Role::Admin);
        assert!(password::verify_password("admin12345", &created.password_hash).await);

        assert!(ensure_admin(&store, &seed()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_admin_rejects_weak_password() {
        let store = MemoryStore::new();
        let mut weak = seed();
        weak.password = "123".to_string();
        assert!(create_admin(&store, &weak).await.is_err());
    }
}
