/*!
 * Sessions
 * Server-side session store keyed by a signed cookie, and principal resolution
 */
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::convert::Infallible;
use std::time::Duration;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::db::models::{Role, User};
use crate::error::ApiError;
use crate::AppState;

/// Public user fields kept in the session and handed to handlers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub avatar: Option<String>,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        let display_name = match user.full_name() {
            name if name.is_empty() => user.username.clone(),
            name => name,
        };
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            display_name,
            role: user.role,
            avatar: user.avatar.clone(),
        }
    }
}

/// The identity a request runs as.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Principal {
    #[default]
    Anonymous,
    User(SessionUser),
}

impl Principal {
    pub fn user(&self) -> Option<&SessionUser> {
        match self {
            Principal::User(user) => Some(user),
            Principal::Anonymous => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.user().map(|u| u.role)
    }

    pub fn is_authenticated(&self) -> bool {
        self.user().is_some()
    }
}

/// Resolved principal; anonymous when `resolve_principal` found nobody.
impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Principal>()
            .cloned()
            .unwrap_or_default())
    }
}

/// The signed-in user; 401 when the request is anonymous.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub SessionUser);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Principal>() {
            Some(Principal::User(user)) => Ok(CurrentUser(user.clone())),
            _ => Err(ApiError::unauthorized("Authentication required")),
        }
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct CookieClaims {
    sid: String,
    exp: i64,
    iat: i64,
}

#[derive(Debug, Clone)]
struct SessionRecord {
    user: SessionUser,
    expires_at: DateTime<Utc>,
}

/// A freshly created session: the cookie value and how long it lives.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub ttl: Duration,
}

pub struct SessionStore {
    config: SessionConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    /// Keyed by the SHA-256 of the session id.
    sessions: DashMap<String, SessionRecord>,
}

fn generate_session_id() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 64)
}

fn hash_session_id(sid: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sid.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            config,
            sessions: DashMap::new(),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    /// Start a session for `user`. `remember` selects the long lifetime.
    pub fn create(
        &self,
        user: &User,
        remember: bool,
    ) -> Result<IssuedSession, jsonwebtoken::errors::Error> {
        let ttl = if remember {
            self.config.remember_ttl
        } else {
            self.config.ttl
        };
        let now = Utc::now();
        let expires_at = now
            + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(24));

        let sid = generate_session_id();
        let claims = CookieClaims {
            sid: sid.clone(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding_key)?;

        self.sessions.insert(
            hash_session_id(&sid),
            SessionRecord {
                user: SessionUser::from(user),
                expires_at,
            },
        );
        Ok(IssuedSession { token, ttl })
    }

    fn session_key(&self, token: &str) -> Option<String> {
        decode::<CookieClaims>(token, &self.decoding_key, &Validation::default())
            .ok()
            .map(|data| hash_session_id(&data.claims.sid))
    }

    /// The stored user for a cookie value, if the signature checks out and
    /// the session has not expired.
    pub fn lookup(&self, token: &str) -> Option<SessionUser> {
        let key = self.session_key(token)?;
        let record = self.sessions.get(&key)?;
        if record.expires_at <= Utc::now() {
            drop(record);
            self.sessions.remove(&key);
            return None;
        }
        Some(record.user.clone())
    }

    /// Replace the public fields stored for a session.
    pub fn refresh(&self, token: &str, user: SessionUser) {
        if let Some(key) = self.session_key(token) {
            if let Some(mut record) = self.sessions.get_mut(&key) {
                record.user = user;
            }
        }
    }

    pub fn destroy(&self, token: &str) {
        if let Some(key) = self.session_key(token) {
            self.sessions.remove(&key);
        }
    }

    /// Drop every session belonging to `user_id`.
    pub fn destroy_for_user(&self, user_id: Uuid) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, record| record.user.id != user_id);
        before.saturating_sub(self.sessions.len())
    }

    /// Evict expired sessions; returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, record| record.expires_at > now);
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// `Set-Cookie` value for a new session.
    pub fn cookie(&self, issued: &IssuedSession) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
            self.config.cookie_name,
            issued.token,
            issued.ttl.as_secs(),
            if self.config.secure { "; Secure" } else { "" }
        )
    }

    /// `Set-Cookie` value that removes the session cookie.
    pub fn clear_cookie(&self) -> String {
        format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0{}",
            self.config.cookie_name,
            if self.config.secure { "; Secure" } else { "" }
        )
    }

    /// The session cookie's value from a request's `Cookie` headers.
    pub fn token_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.config.cookie_name)
            .map(|(_, value)| value.to_string())
            .filter(|value| !value.is_empty())
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Attach the request's [`Principal`]. Never rejects: an unknown cookie, a
/// deleted or deactivated user and storage failures all resolve to
/// anonymous.
pub async fn resolve_principal(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let principal = match state.sessions.token_from_headers(request.headers()) {
        None => Principal::Anonymous,
        Some(token) => resolve_token(&state, &token).await,
    };
    request.extensions_mut().insert(principal);
    next.run(request).await
}

async fn resolve_token(state: &AppState, token: &str) -> Principal {
    let Some(session_user) = state.sessions.lookup(token) else {
        return Principal::Anonymous;
    };
    match state.store.get_user(session_user.id).await {
        Ok(Some(user)) if user.is_active => {
            let fresh = SessionUser::from(&user);
            if fresh != session_user {
                state.sessions.refresh(token, fresh.clone());
            }
            Principal::User(fresh)
        }
        Ok(_) => {
            tracing::info!(user_id = %session_user.id, "Session user missing or disabled, dropping session");
            state.sessions.destroy(token);
            Principal::Anonymous
        }
        Err(e) => {
            tracing::warn!("Failed to resolve session user: {}", e);
            Principal::Anonymous
        }
    }
}
