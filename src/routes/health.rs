/**
 * Health Routes
 * Liveness and storage checks
 */
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::config;
use crate::AppState;

/// Storage check result
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCheck {
    pub status: String,
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Detailed health check response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedHealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub uptime: u64,
    pub environment: String,
    pub database: ServiceCheck,
}

/// Simple health response
#[derive(Debug, Serialize, Deserialize)]
pub struct SimpleHealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// GET /health, GET /api/health
/// Always 200 while the process is serving.
pub async fn health_ping() -> Json<SimpleHealthResponse> {
    Json(SimpleHealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
    })
}

/// GET /health/detailed
/// Still 200 when storage is down; the check itself reports it.
pub async fn health_detailed(State(state): State<AppState>) -> Json<DetailedHealthResponse> {
    let started = Instant::now();
    let database = match state.store.ping().await {
        Ok(()) => ServiceCheck {
            status: "healthy".to_string(),
            backend: state.store.backend().to_string(),
            response_time: Some(started.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Storage health check failed");
            ServiceCheck {
                status: "unhealthy".to_string(),
                backend: state.store.backend().to_string(),
                response_time: None,
                error: Some(e.to_string()),
            }
        }
    };

    Json(DetailedHealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        uptime: state.started_at.elapsed().as_secs(),
        environment: config::environment().as_str().to_string(),
        database,
    })
}
