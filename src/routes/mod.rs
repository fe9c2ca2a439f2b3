/**
 * Routes Module
 * Route groups, their gates, and helpers shared by the handlers
 */
pub mod admin_pages;
pub mod auth;
pub mod blog;
pub mod contact;
pub mod dashboard;
pub mod health;
pub mod hero;
pub mod properties;
pub mod settings;
pub mod team;
pub mod users;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::db::models::UserSummary;
use crate::error::{ApiError, ApiResult};
use crate::gate::{self, FailureMode, Gate};
use crate::rate_limit;
use crate::store::Store;
use crate::AppState;

/// Everything under `/api`.
///
/// Public, auth and contact routes sit behind the rate limiter. The
/// `/api/admin` groups are gated with JSON failures.
pub fn api_router(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        .merge(properties::public_routes())
        .merge(team::public_routes())
        .merge(blog::public_routes())
        .merge(hero::public_routes())
        .merge(settings::public_routes())
        .merge(contact::routes())
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit::limit_requests,
        ));

    let editors = Router::new()
        .nest("/properties", properties::admin_routes())
        .nest("/blog", blog::admin_routes())
        .layer(middleware::from_fn_with_state(
            Gate::admin_or_agent(FailureMode::Json),
            gate::enforce,
        ));

    let admins = Router::new()
        .nest("/team", team::admin_routes())
        .nest("/hero", hero::admin_routes())
        .nest("/settings", settings::admin_routes())
        .nest("/users", users::admin_routes())
        .layer(middleware::from_fn_with_state(
            Gate::admin(FailureMode::Json),
            gate::enforce,
        ));

    let signed_in = Router::new()
        .route("/dashboard", get(dashboard::summary))
        .route("/account/password", put(auth::change_password))
        .layer(middleware::from_fn_with_state(
            Gate::authenticated(FailureMode::Json),
            gate::enforce,
        ));

    Router::new().nest(
        "/api",
        public
            .route("/health", get(health::health_ping))
            .nest("/admin", editors.merge(admins).merge(signed_in)),
    )
}

/// Path identifiers are UUIDs; anything else cannot name a record.
pub fn parse_id(raw: &str, entity: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::not_found(format!("{} not found", entity)))
}

/// Reduced user projections (names only) for the given ids.
pub async fn user_summaries(
    store: &dyn Store,
    ids: impl IntoIterator<Item = Uuid>,
) -> ApiResult<HashMap<Uuid, UserSummary>> {
    let mut ids: Vec<Uuid> = ids.into_iter().collect();
    ids.sort();
    ids.dedup();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let users = store.users_by_ids(&ids).await?;
    Ok(users.iter().map(|u| (u.id, u.summary())).collect())
}

/// RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        })
}

/// `limit` query value for the short "featured"/"related" lists.
pub fn short_limit(params: &crate::query::QueryParams, default: u64) -> u64 {
    params
        .text("limit")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
        .clamp(1, 50)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string(), "Property").unwrap(), id);
        let err = parse_id("../etc", "Property").unwrap_err();
        assert_eq!(err.message(), "Property not found");
    }

    #[test]
    fn test_parse_instant_accepts_dates_and_timestamps() {
        let day = parse_instant("2025-03-01").unwrap();
        assert_eq!(day.to_rfc3339(), "2025-03-01T00:00:00+00:00");
        let ts = parse_instant("2025-03-01T12:30:00+02:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-03-01T10:30:00+00:00");
        assert!(parse_instant("next tuesday").is_none());
    }
}
