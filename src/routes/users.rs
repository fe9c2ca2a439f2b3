/**
 * User Routes
 * Account management for administrators
 */
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};

use super::parse_id;
use crate::content::{is_valid_email, is_valid_username};
use crate::db::models::{Role, User};
use crate::error::{ApiError, ApiResponse, ApiResult};
use crate::form::FormData;
use crate::password;
use crate::query::filters::{UserFilter, USER_SORT};
use crate::query::{Pagination, QueryParams};
use crate::seed::new_user;
use crate::session::CurrentUser;
use crate::uploads::ImageKind;
use crate::AppState;

/// Mounted at `/api/admin/users`.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/{id}", get(get_user).put(update_user).delete(delete_user))
}

async fn find_user(state: &AppState, raw_id: &str) -> ApiResult<User> {
    let id = parse_id(raw_id, "User")?;
    state
        .store
        .get_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// GET /api/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Value>> {
    let filter = UserFilter::from_params(&params)?;
    let page = params.page_request(20);
    let sort = params.sort(USER_SORT, "-createdAt");
    let result = state.store.list_users(&filter, &sort, page.window()).await?;
    Ok(Json(json!({
        "users": result.items,
        "pagination": Pagination::compute(result.total, page),
    })))
}

/// GET /api/admin/users/{id}
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = find_user(&state, &id).await?;
    Ok(Json(json!({ "user": user })))
}

fn apply_fields(user: &mut User, form: &FormData, creating: bool) -> ApiResult<()> {
    if form.has("username") || creating {
        let username = form.required("username")?.to_lowercase();
        if !is_valid_username(&username) {
            return Err(ApiError::validation(
                "Username must be 3-30 characters: letters, digits, '.', '_' or '-'",
            ));
        }
        user.username = username;
    }
    if form.has("email") || creating {
        let email = form.required("email")?.to_lowercase();
        if !is_valid_email(&email) {
            return Err(ApiError::validation("Invalid email address"));
        }
        user.email = email;
    }
    form.merge_text("firstName", &mut user.first_name, false, creating)?;
    form.merge_text("lastName", &mut user.last_name, false, creating)?;
    form.merge_choice("role", &mut user.role, false, creating)?;
    form.merge_flag("isActive", &mut user.is_active)?;
    Ok(())
}

/// POST /api/admin/users
pub async fn create_user(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    form: FormData,
) -> ApiResult<ApiResponse<Value>> {
    let password = form.required("password")?;
    password::check_strength(&password)?;

    let mut user = new_user("", "", String::new(), Role::Agent);
    apply_fields(&mut user, &form, true)?;
    user.password_hash = password::hash_password(&password).await?;

    let uploaded = match form.file("avatar") {
        Some(upload) => Some(state.images.save(ImageKind::Avatars, upload).await?),
        None => None,
    };
    user.avatar = uploaded.clone();

    if let Err(e) = state.store.insert_user(&user).await {
        if let Some(url) = &uploaded {
            state.images.remove(ImageKind::Avatars, url).await;
        }
        return Err(e.into());
    }

    tracing::info!(
        user_id = %user.id,
        username = %user.username,
        role = %user.role,
        created_by = %admin.username,
        "User created"
    );
    Ok(ApiResponse::new("User created successfully", json!(user)))
}

/// PUT /api/admin/users/{id}
/// A sent `password` replaces the hash. The last active admin cannot be
/// demoted or deactivated.
pub async fn update_user(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(id): Path<String>,
    form: FormData,
) -> ApiResult<ApiResponse<Value>> {
    let mut user = find_user(&state, &id).await?;
    let was_active = user.is_active;

    apply_fields(&mut user, &form, false)?;

    if let Some(password) = form.text("password") {
        password::check_strength(password)?;
        user.password_hash = password::hash_password(password).await?;
    }

    let old_avatar = user.avatar.clone();
    let mut uploaded = None;
    if let Some(upload) = form.file("avatar") {
        let url = state.images.save(ImageKind::Avatars, upload).await?;
        uploaded = Some(url.clone());
        user.avatar = Some(url);
    } else if form.flag("removeAvatar")? == Some(true) {
        user.avatar = None;
    }
    user.updated_at = Utc::now();

    let saved = state.store.update_user(&user).await;
    if !matches!(saved, Ok(true)) {
        if let Some(url) = &uploaded {
            state.images.remove(ImageKind::Avatars, url).await;
        }
        return Err(match saved {
            Err(e) => e.into(),
            Ok(_) => ApiError::not_found("User not found"),
        });
    }
    if let Some(old) = old_avatar.filter(|old| user.avatar.as_ref() != Some(old)) {
        state.images.remove(ImageKind::Avatars, &old).await;
    }
    if was_active && !user.is_active {
        let dropped = state.sessions.destroy_for_user(user.id);
        tracing::info!(user_id = %user.id, sessions = dropped, "User deactivated, sessions dropped");
    }

    tracing::info!(user_id = %user.id, updated_by = %admin.username, "User updated");
    Ok(ApiResponse::new("User updated successfully", json!(user)))
}

/// DELETE /api/admin/users/{id}
/// Refuses to delete the caller's own account. The store refuses the last
/// active admin.
pub async fn delete_user(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<()>> {
    let user = find_user(&state, &id).await?;
    if user.id == admin.id {
        return Err(ApiError::validation("You cannot delete your own account"));
    }

    state
        .store
        .delete_user(user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    state.sessions.destroy_for_user(user.id);
    if let Some(avatar) = &user.avatar {
        state.images.remove(ImageKind::Avatars, avatar).await;
    }

    tracing::info!(user_id = %user.id, username = %user.username, deleted_by = %admin.username, "User deleted");
    Ok(ApiResponse::message("User deleted successfully"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(pairs: &[(&str, &str)]) -> FormData {
        FormData::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_apply_fields_normalizes_and_validates() {
        let mut user = new_user("", "", String::new(), Role::Agent);
        apply_fields(
            &mut user,
            &form(&[
                ("username", " Jane.Doe "),
                ("email", "Jane@Example.COM"),
                ("role", "manager"),
            ]),
            true,
        )
        .unwrap();
        assert_eq!(user.username, "jane.doe");
        assert_eq!(user.email, "jane@example.com");
        assert_eq!(user.role, Role::Manager);

        assert!(apply_fields(&mut user, &form(&[("username", "x")]), false).is_err());
        assert!(apply_fields(&mut user, &form(&[("email", "nope")]), false).is_err());
        assert!(apply_fields(&mut user, &form(&[("role", "owner")]), false).is_err());
        assert!(apply_fields(&mut user, &form(&[("username", "ok_name")]), true).is_err());
    }
}
