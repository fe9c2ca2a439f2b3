/**
 * Admin Pages
 * Server-rendered admin surface under /admin
 *
 * Gated with page failures: anonymous visitors are redirected to the login
 * page, signed-in users without the role get an access-denied page.
 */
use axum::{
    extract::{Query, State},
    http::header,
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use serde_json::Value;

use super::auth::{authenticate, change_password_for, end_session, start_session};
use super::dashboard::build_summary;
use super::settings::{write_all, SettingWrite};
use crate::db::models::SettingCategory;
use crate::error::ApiError;
use crate::form::FormData;
use crate::gate::{self, safe_redirect_target, FailureMode, Gate, LOGIN_PATH};
use crate::query::QueryParams;
use crate::rate_limit;
use crate::session::{CurrentUser, Principal, SessionUser};
use crate::views::{self, CONTACT_KEYS, SOCIAL_KEYS};
use crate::AppState;

const SETTINGS_PATH: &str = "/admin/settings";

/// The login POST shares the API's per-client budget.
pub fn router(state: &AppState) -> Router<AppState> {
    let signed_in = Router::new()
        .route("/admin/dashboard", get(dashboard))
        .layer(middleware::from_fn_with_state(
            Gate::authenticated(FailureMode::Page),
            gate::enforce,
        ));

    let admins = Router::new()
        .route(SETTINGS_PATH, get(settings))
        .route("/admin/settings/contact", post(save_contact))
        .route("/admin/settings/social", post(save_social))
        .route("/admin/settings/password", post(save_password))
        .layer(middleware::from_fn_with_state(
            Gate::admin(FailureMode::Page),
            gate::enforce,
        ));

    Router::new()
        .route("/admin", get(|| async { Redirect::to("/admin/dashboard") }))
        .route(LOGIN_PATH, get(login_form))
        .route(
            LOGIN_PATH,
            post(login_submit).layer(middleware::from_fn_with_state(
                state.rate_limiter.clone(),
                rate_limit::limit_requests,
            )),
        )
        .route("/admin/logout", get(logout).post(logout))
        .merge(signed_in)
        .merge(admins)
}

fn error_response(err: ApiError, user: Option<&SessionUser>) -> Response {
    views::error_page(err.status(), err.message(), user)
}

/// GET /admin/login
pub async fn login_form(principal: Principal, Query(params): Query<QueryParams>) -> Response {
    let target = safe_redirect_target(params.text("redirect"));
    if principal.is_authenticated() {
        return Redirect::to(target).into_response();
    }
    views::login_page(target, None).into_response()
}

/// POST /admin/login
pub async fn login_submit(State(state): State<AppState>, form: FormData) -> Response {
    let target = safe_redirect_target(form.text("redirect")).to_string();
    let password = form.raw("password").unwrap_or_default().to_string();
    let login = form.owned("login").unwrap_or_default();

    let user = match authenticate(&state, &login, &password).await {
        Ok(user) => user,
        Err(err) => {
            let status = err.status();
            return (status, views::login_page(&target, Some(err.message()))).into_response();
        }
    };
    let remember = matches!(form.flag("rememberMe"), Ok(Some(true)));
    match start_session(&state, &user, remember).await {
        Ok(cookie) => ([(header::SET_COOKIE, cookie)], Redirect::to(&target)).into_response(),
        Err(err) => error_response(err, None),
    }
}

/// GET|POST /admin/logout
pub async fn logout(State(state): State<AppState>, headers: axum::http::HeaderMap) -> Response {
    let cookie = end_session(&state, &headers);
    ([(header::SET_COOKIE, cookie)], Redirect::to(LOGIN_PATH)).into_response()
}

/// GET /admin/dashboard
pub async fn dashboard(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Response {
    match build_summary(state.store.as_ref()).await {
        Ok(summary) => views::dashboard_page(&user, &summary).into_response(),
        Err(err) => error_response(err, Some(&user)),
    }
}

fn notice_for(saved: &str) -> Option<&'static str> {
    match saved {
        "contact" => Some("Contact information saved"),
        "social" => Some("Social links saved"),
        "password" => Some("Password changed"),
        _ => None,
    }
}

/// GET /admin/settings
pub async fn settings(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<QueryParams>,
) -> Response {
    match state.store.list_settings(None).await {
        Ok(all) => views::settings_page(
            &user,
            &all,
            params.text("saved").and_then(notice_for),
            params.text("error"),
        )
        .into_response(),
        Err(err) => error_response(err.into(), Some(&user)),
    }
}

fn back_to_settings(outcome: Result<&str, String>) -> Redirect {
    match outcome {
        Ok(saved) => Redirect::to(&format!("{}?saved={}", SETTINGS_PATH, saved)),
        Err(error) => Redirect::to(&format!(
            "{}?error={}",
            SETTINGS_PATH,
            urlencoding::encode(&error)
        )),
    }
}

async fn save_group(
    state: &AppState,
    form: &FormData,
    keys: &[(&str, &str)],
    category: SettingCategory,
) -> Result<(), String> {
    let writes = keys
        .iter()
        .filter(|(key, _)| form.has(key))
        .map(|(key, _)| {
            let value = form.raw(key).unwrap_or_default().trim().to_string();
            let mut write = SettingWrite::value(*key, Value::String(value)).in_category(category);
            write.kind = Some("string".to_string());
            write
        })
        .collect();
    let outcome = write_all(state.store.as_ref(), writes).await;
    if outcome.failed.is_empty() {
        Ok(())
    } else {
        let keys: Vec<&str> = outcome.failed.iter().map(|f| f.key.as_str()).collect();
        Err(format!("Could not save: {}", keys.join(", ")))
    }
}

/// POST /admin/settings/contact
pub async fn save_contact(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    form: FormData,
) -> Redirect {
    let result = save_group(&state, &form, CONTACT_KEYS, SettingCategory::Contact).await;
    tracing::info!(user = %user.username, ok = result.is_ok(), "Contact settings submitted");
    back_to_settings(result.map(|()| "contact"))
}

/// POST /admin/settings/social
pub async fn save_social(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    form: FormData,
) -> Redirect {
    let result = save_group(&state, &form, SOCIAL_KEYS, SettingCategory::Social).await;
    tracing::info!(user = %user.username, ok = result.is_ok(), "Social settings submitted");
    back_to_settings(result.map(|()| "social"))
}

/// POST /admin/settings/password
pub async fn save_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    form: FormData,
) -> Redirect {
    let result = change_password_for(&state, user.id, &form)
        .await
        .map(|()| "password")
        .map_err(|e| e.message().to_string());
    back_to_settings(result)
}
