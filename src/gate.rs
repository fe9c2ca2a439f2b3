/*!
 * Authorization Gates
 * Route-group guards over the resolved principal
 *
 * A gate decides from the principal alone. How a denial is rendered is
 * chosen by the route group through [`FailureMode`], never by looking at
 * the request path.
 */
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::db::models::Role;
use crate::error::ApiError;
use crate::session::Principal;
use crate::views;

/// How a denied request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// 401 / 403 JSON errors for API clients.
    Json,
    /// Redirect to the login page, or a rendered access-denied page.
    Page,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    Unauthenticated,
    Forbidden,
}

pub const ADMIN_ONLY: &[Role] = &[Role::Admin];
pub const ADMIN_OR_AGENT: &[Role] = &[Role::Admin, Role::Agent];

pub const LOGIN_PATH: &str = "/admin/login";

#[derive(Debug, Clone, Copy)]
pub struct Gate {
    pub mode: FailureMode,
    /// `None` admits any authenticated principal.
    pub roles: Option<&'static [Role]>,
}

impl Gate {
    pub fn authenticated(mode: FailureMode) -> Self {
        Self { mode, roles: None }
    }

    pub fn role_in(mode: FailureMode, roles: &'static [Role]) -> Self {
        Self {
            mode,
            roles: Some(roles),
        }
    }

    pub fn admin(mode: FailureMode) -> Self {
        Self::role_in(mode, ADMIN_ONLY)
    }

    pub fn admin_or_agent(mode: FailureMode) -> Self {
        Self::role_in(mode, ADMIN_OR_AGENT)
    }

    /// Anonymous is always `Unauthenticated`, checked before any role.
    pub fn check(&self, principal: &Principal) -> Result<(), Denial> {
        let Some(user) = principal.user() else {
            return Err(Denial::Unauthenticated);
        };
        match self.roles {
            Some(roles) if !roles.contains(&user.role) => Err(Denial::Forbidden),
            _ => Ok(()),
        }
    }

    fn deny(&self, denial: Denial, principal: &Principal, original_uri: &str) -> Response {
        match (self.mode, denial) {
            (FailureMode::Json, Denial::Unauthenticated) => {
                ApiError::unauthorized("Authentication required").into_response()
            }
            (FailureMode::Json, Denial::Forbidden) => {
                ApiError::forbidden("Insufficient permissions").into_response()
            }
            (FailureMode::Page, Denial::Unauthenticated) => {
                Redirect::to(&login_redirect(original_uri)).into_response()
            }
            (FailureMode::Page, Denial::Forbidden) => views::access_denied_page(principal.user()),
        }
    }
}

/// Login page URL that returns to `original_uri` after sign-in.
pub fn login_redirect(original_uri: &str) -> String {
    format!("{}?redirect={}", LOGIN_PATH, urlencoding::encode(original_uri))
}

/// Only same-site absolute paths are honoured as post-login targets.
pub fn safe_redirect_target(raw: Option<&str>) -> &str {
    match raw {
        Some(target) if target.starts_with('/') && !target.starts_with("//") => target,
        _ => "/admin/dashboard",
    }
}

/// Middleware form of [`Gate::check`], installed with
/// `middleware::from_fn_with_state(gate, gate::enforce)`. Runs after
/// `session::resolve_principal`.
pub async fn enforce(State(gate): State<Gate>, request: Request, next: Next) -> Response {
    let principal = request
        .extensions()
        .get::<Principal>()
        .cloned()
        .unwrap_or_default();

    match gate.check(&principal) {
        Ok(()) => next.run(request).await,
        Err(denial) => {
            let original = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| request.uri().path().to_string());
            tracing::debug!(
                denial = ?denial,
                mode = ?gate.mode,
                user = ?principal.user().map(|u| &u.username),
                "Request denied: {}",
                original
            );
            gate.deny(denial, &principal, &original)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionUser;
    use axum::body::Body;
    use axum::http::{header, StatusCode};
    use axum::routing::get;
    use axum::{middleware, Router};
    use tower::ServiceExt;
    use uuid::Uuid;

    fn principal(role: Role) -> Principal {
        Principal::User(SessionUser {
            id: Uuid::new_v4(),
            username: "someone".to_string(),
            email: "someone@example.com".to_string(),
            display_name: "Someone".to_string(),
            role,
            avatar: None,
        })
    }

    fn gated(gate: Gate, who: Principal) -> Router {
        Router::new()
            .route("/guarded", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(gate, enforce))
            .layer(middleware::from_fn(
                move |mut req: Request, next: Next| {
                    let who = who.clone();
                    async move {
                        req.extensions_mut().insert(who);
                        next.run(req).await
                    }
                },
            ))
    }

    async fn status_of(app: Router, uri: &str) -> (StatusCode, Option<String>) {
        let res = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let location = res
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        (res.status(), location)
    }

    #[test]
    fn test_anonymous_is_unauthenticated_for_every_gate() {
        for gate in [
            Gate::authenticated(FailureMode::Json),
            Gate::admin(FailureMode::Json),
            Gate::admin_or_agent(FailureMode::Page),
        ] {
            assert_eq!(gate.check(&Principal::Anonymous), Err(Denial::Unauthenticated));
        }
    }

    #[test]
    fn test_role_membership() {
        let admin_only = Gate::admin(FailureMode::Json);
        assert_eq!(admin_only.check(&principal(Role::Admin)), Ok(()));
        assert_eq!(admin_only.check(&principal(Role::Agent)), Err(Denial::Forbidden));
        assert_eq!(admin_only.check(&principal(Role::Manager)), Err(Denial::Forbidden));

        let editors = Gate::admin_or_agent(FailureMode::Json);
        assert_eq!(editors.check(&principal(Role::Agent)), Ok(()));
        assert_eq!(editors.check(&principal(Role::Manager)), Err(Denial::Forbidden));

        let any = Gate::authenticated(FailureMode::Json);
        assert_eq!(any.check(&principal(Role::Manager)), Ok(()));
    }

    #[tokio::test]
    async fn test_json_mode_distinguishes_401_and_403() {
        let gate = Gate::admin(FailureMode::Json);
        let (anon, _) = status_of(gated(gate, Principal::Anonymous), "/guarded").await;
        assert_eq!(anon, StatusCode::UNAUTHORIZED);

        let (agent, _) = status_of(gated(gate, principal(Role::Agent)), "/guarded").await;
        assert_eq!(agent, StatusCode::FORBIDDEN);

        let (admin, _) = status_of(gated(gate, principal(Role::Admin)), "/guarded").await;
        assert_eq!(admin, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_page_mode_redirects_with_original_path() {
        let gate = Gate::authenticated(FailureMode::Page);
        let (status, location) =
            status_of(gated(gate, Principal::Anonymous), "/guarded?tab=2").await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(
            location.as_deref(),
            Some("/admin/login?redirect=%2Fguarded%3Ftab%3D2")
        );
    }

    #[tokio::test]
    async fn test_page_mode_renders_access_denied() {
        let gate = Gate::admin(FailureMode::Page);
        let (status, location) = status_of(gated(gate, principal(Role::Agent)), "/guarded").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(location.is_none());
    }

    #[tokio::test]
    async fn test_missing_principal_extension_counts_as_anonymous() {
        let app = Router::new()
            .route("/guarded", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                Gate::authenticated(FailureMode::Json),
                enforce,
            ));
        let (status, _) = status_of(app, "/guarded").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_safe_redirect_target() {
        assert_eq!(safe_redirect_target(Some("/admin/settings")), "/admin/settings");
        assert_eq!(safe_redirect_target(Some("//evil.example")), "/admin/dashboard");
        assert_eq!(safe_redirect_target(Some("https://evil.example")), "/admin/dashboard");
        assert_eq!(safe_redirect_target(None), "/admin/dashboard");
    }
}
