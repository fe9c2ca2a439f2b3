//! Realty CMS - listings, team, blog and hero content API with an admin surface

pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod form;
pub mod gate;
pub mod logging;
pub mod password;
pub mod query;
pub mod rate_limit;
pub mod routes;
pub mod seed;
pub mod session;
pub mod store;
pub mod uploads;
pub mod views;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::{
    catch_panic::CatchPanicLayer, compression::CompressionLayer, cors::CorsLayer,
    limit::RequestBodyLimitLayer, services::ServeDir, trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::rate_limit::RateLimiter;
use crate::session::SessionStore;
use crate::store::{MemoryStore, PostgresStore, Store};
use crate::uploads::ImageStore;

/// Everything a handler needs, constructed once at startup and injected
/// through axum state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub sessions: Arc<SessionStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub images: Arc<ImageStore>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn Store>) -> Self {
        config::set_environment(config.environment);
        Self {
            sessions: Arc::new(SessionStore::new(config.session.clone())),
            rate_limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            images: Arc::new(ImageStore::new(config.uploads.dir.clone())),
            config: Arc::new(config),
            store,
            started_at: Instant::now(),
        }
    }
}

/// Configure CORS from environment variables.
/// Uses ALLOWED_ORIGINS (comma-separated) or FRONTEND_ORIGIN.
pub fn configure_cors() -> CorsLayer {
    let allowed_origins = std::env::var("ALLOWED_ORIGINS")
        .ok()
        .and_then(|s| {
            let origins: Vec<HeaderValue> = s
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                None
            } else {
                Some(origins)
            }
        })
        .or_else(|| {
            std::env::var("FRONTEND_ORIGIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(|origin| vec![origin])
        })
        .unwrap_or_else(|| {
            vec![
                HeaderValue::from_static("http://localhost:3000"),
                HeaderValue::from_static("http://127.0.0.1:3000"),
            ]
        });

    CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!("Handler panicked: {}", details);
    error::ApiError::internal(details).into_response()
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Route not found" })),
    )
}

/// Build the application router over `state`.
pub fn create_app(state: AppState) -> Router {
    let cors = configure_cors();
    tracing::info!("CORS configured");

    // Multipart bodies carry several images; allow ten at the per-file cap.
    let body_limit = state.config.uploads.max_file_bytes.saturating_mul(10);
    let upload_dir = state.config.uploads.dir.clone();

    Router::new()
        .merge(routes::api_router(&state))
        .merge(routes::admin_pages::router(&state))
        .route("/health", get(routes::health::health_ping))
        .route("/health/detailed", get(routes::health::health_detailed))
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .fallback(not_found)
        .layer(middleware::from_fn(logging::middleware::log_request))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session::resolve_principal,
        ))
        .layer(logging::middleware::propagate_request_id_layer())
        .layer(logging::middleware::request_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(CompressionLayer::new())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Evict expired rate-limit windows and sessions on a fixed interval.
pub fn spawn_sweeper(state: &AppState, every: Duration) -> tokio::task::JoinHandle<()> {
    let limiter = state.rate_limiter.clone();
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let windows = limiter.sweep(Instant::now());
            let expired = sessions.sweep(chrono::Utc::now());
            if windows > 0 || expired > 0 {
                tracing::debug!(windows, sessions = expired, "Swept expired entries");
            }
        }
    })
}

/// Postgres when configured and reachable, otherwise the in-memory store.
async fn connect_store(config: &AppConfig) -> Arc<dyn Store> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set. Using in-memory storage; data will not persist.");
        return Arc::new(MemoryStore::new());
    };

    let db_config = db::DbConfig::new(url);
    match db::connect_with_retry(&db_config, config.db_connect_retries, config.db_retry_delay).await
    {
        Ok(pool) => match db::run_migrations(&pool).await {
            Ok(()) => Arc::new(PostgresStore::new(pool)),
            Err(e) => {
                tracing::error!("Failed to run database migrations: {}", e);
                tracing::warn!("Falling back to in-memory storage");
                Arc::new(MemoryStore::new())
            }
        },
        Err(e) => {
            tracing::warn!(
                "Failed to initialize database pool: {}. Continuing with in-memory storage.",
                e
            );
            Arc::new(MemoryStore::new())
        }
    }
}

/// Run the server (used by main).
pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env();

    // Guards MUST be held for the programme's lifetime; dropping them early
    // shuts down background log-writer threads and loses buffered log lines.
    let _log_guards = logging::init(&config.logging);

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("FATAL: {}", e))?;

    let store = connect_store(&config).await;
    tracing::info!(backend = store.backend(), "Storage ready");

    seed::ensure_admin(store.as_ref(), &config.admin_seed)
        .await
        .context("failed to seed admin account")?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid HOST/PORT configuration")?;

    let state = AppState::new(config, store);
    let _sweeper = spawn_sweeper(&state, Duration::from_secs(60));
    let app = create_app(state);

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(
            AppConfig::for_tests(dir.path()),
            Arc::new(MemoryStore::new()),
        );
        let app = create_app(state).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
        (app, dir)
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let (app, _dir) = app();
        let res = app
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Route not found");
    }

    #[tokio::test]
    async fn test_responses_carry_request_id() {
        let (app, _dir) = app();
        let res = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_sweeper_runs_without_panicking() {
        let (_, dir) = app();
        let state = AppState::new(
            AppConfig::for_tests(dir.path()),
            Arc::new(MemoryStore::new()),
        );
        let handle = spawn_sweeper(&state, Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}
