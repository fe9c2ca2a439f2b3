use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tower_http::request_id::{
    MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};

use crate::session::Principal;

const SLOW_REQUEST: Duration = Duration::from_secs(2);

/// Probes and static files are logged at debug so they don't drown the
/// API traffic.
fn is_quiet(path: &str) -> bool {
    path.starts_with("/health") || path.starts_with("/uploads/")
}

/// First `x-forwarded-for` hop, else the socket peer.
fn client_ip(request: &Request) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Per-request access log. Must run inside the principal resolver so the
/// signed-in user can be attached to the line.
pub async fn log_request(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let req_id: String = request
        .extensions()
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let user = request
        .extensions()
        .get::<Principal>()
        .and_then(Principal::user)
        .map(|u| u.username.clone())
        .unwrap_or_else(|| "-".to_string());
    let client_ip = client_ip(&request);

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let duration_ms = elapsed.as_millis() as u64;
    let status = response.status();

    if status.is_server_error() {
        tracing::error!(
            request_id = %req_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            user = %user,
            client_ip = %client_ip,
            duration_ms,
            "request failed"
        );
    } else if status.is_client_error() && !is_quiet(&path) {
        tracing::warn!(
            request_id = %req_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            user = %user,
            client_ip = %client_ip,
            duration_ms,
            "request rejected"
        );
    } else if elapsed >= SLOW_REQUEST {
        tracing::warn!(
            request_id = %req_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            user = %user,
            duration_ms,
            "slow request"
        );
    } else if is_quiet(&path) {
        tracing::debug!(
            request_id = %req_id,
            path = %path,
            status = status.as_u16(),
            duration_ms,
            "request completed"
        );
    } else {
        tracing::info!(
            request_id = %req_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            user = %user,
            client_ip = %client_ip,
            duration_ms,
            "request completed"
        );
    }

    response
}

pub fn request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::x_request_id(MakeRequestUuid)
}

pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::{middleware, routing::get, Router};
    use tower::ServiceExt;

    #[test]
    fn test_quiet_paths() {
        assert!(is_quiet("/health"));
        assert!(is_quiet("/health/detailed"));
        assert!(is_quiet("/uploads/properties/a.jpg"));
        assert!(!is_quiet("/api/properties"));
    }

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let request = HttpRequest::builder()
            .header("x-forwarded-for", "198.51.100.4, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), "198.51.100.4");

        let request = HttpRequest::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&request), "unknown");
    }

    #[tokio::test]
    async fn test_request_id_is_propagated() {
        let app = Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(middleware::from_fn(log_request))
            .layer(propagate_request_id_layer())
            .layer(request_id_layer())
            .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));

        let res = app
            .oneshot(HttpRequest::get("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().contains_key("x-request-id"));
    }
}
