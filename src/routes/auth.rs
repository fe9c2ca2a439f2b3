/**
 * Auth Routes
 * Session login/logout and the signed-in account
 */
use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::db::models::User;
use crate::error::{ApiError, ApiResponse, ApiResult};
use crate::form::FormData;
use crate::password;
use crate::session::{CurrentUser, SessionUser};
use crate::AppState;

/// Check credentials. `login` is a username or an email address.
///
/// Unknown accounts and wrong passwords are indistinguishable to the
/// caller; a disabled account is reported as such.
pub async fn authenticate(state: &AppState, login: &str, password: &str) -> ApiResult<User> {
    let login = login.trim().to_lowercase();
    if login.is_empty() || password.is_empty() {
        return Err(ApiError::validation("Username/email and password are required"));
    }

    let Some(user) = state.store.find_user_by_login(&login).await? else {
        tracing::warn!(login = %login, "Login attempt for unknown user");
        return Err(ApiError::unauthorized("Invalid credentials"));
    };
    if !password::verify_password(password, &user.password_hash).await {
        tracing::warn!(user_id = %user.id, "Failed login attempt");
        return Err(ApiError::unauthorized("Invalid credentials"));
    }
    if !user.is_active {
        tracing::warn!(user_id = %user.id, "Login attempt on disabled account");
        return Err(ApiError::forbidden("Account is disabled"));
    }
    Ok(user)
}

/// Record the login and open a session. Returns the `Set-Cookie` value.
pub async fn start_session(state: &AppState, user: &User, remember: bool) -> ApiResult<String> {
    state.store.record_login(user.id, Utc::now()).await?;
    let issued = state
        .sessions
        .create(user, remember)
        .map_err(ApiError::internal)?;
    tracing::info!(user_id = %user.id, username = %user.username, remember, "Successful login");
    Ok(state.sessions.cookie(&issued))
}

/// Drop the request's session, if any. Returns the clearing `Set-Cookie`.
pub fn end_session(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(token) = state.sessions.token_from_headers(headers) {
        state.sessions.destroy(&token);
    }
    state.sessions.clear_cookie()
}

fn login_field(form: &FormData) -> String {
    form.owned("login")
        .or_else(|| form.owned("username"))
        .or_else(|| form.owned("email"))
        .unwrap_or_default()
}

/// POST /api/auth/login
/// Body: `login` (or `username` / `email`), `password`, `rememberMe`.
pub async fn login(State(state): State<AppState>, form: FormData) -> ApiResult<Response> {
    let password = form.raw("password").unwrap_or_default().to_string();
    let user = authenticate(&state, &login_field(&form), &password).await?;
    let remember = form.flag("rememberMe")?.unwrap_or(false);
    let cookie = start_session(&state, &user, remember).await?;

    Ok((
        [(header::SET_COOKIE, cookie)],
        ApiResponse::new(
            "Login successful",
            json!({ "user": SessionUser::from(&user) }),
        ),
    )
        .into_response())
}

/// POST /api/auth/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let cookie = end_session(&state, &headers);
    (
        [(header::SET_COOKIE, cookie)],
        ApiResponse::message("Logged out successfully"),
    )
        .into_response()
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> ApiResult<Json<Value>> {
    let user = state
        .store
        .get_user(session.id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
    Ok(Json(json!({ "user": user })))
}

/// Verify the current password and store a new one.
pub async fn change_password_for(state: &AppState, user_id: uuid::Uuid, form: &FormData) -> ApiResult<()> {
    let current = form.raw("currentPassword").unwrap_or_default();
    let new = form.raw("newPassword").unwrap_or_default();
    let confirm = form.raw("confirmPassword").unwrap_or_default();
    if current.is_empty() || new.is_empty() {
        return Err(ApiError::validation(
            "Current password and new password are required",
        ));
    }
    password::check_strength(new)?;
    if new != confirm {
        return Err(ApiError::validation("New passwords do not match"));
    }

    let mut user = state
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    if !password::verify_password(current, &user.password_hash).await {
        return Err(ApiError::validation("Current password is incorrect"));
    }

    user.password_hash = password::hash_password(new).await?;
    user.updated_at = Utc::now();
    if !state.store.update_user(&user).await? {
        return Err(ApiError::not_found("User not found"));
    }
    tracing::info!(user_id = %user.id, "Password changed");
    Ok(())
}

/// PUT /api/admin/account/password
pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    form: FormData,
) -> ApiResult<ApiResponse<()>> {
    change_password_for(&state, user.id, &form).await?;
    Ok(ApiResponse::message("Password changed successfully"))
}
