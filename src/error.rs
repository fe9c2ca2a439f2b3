//! API error taxonomy and the JSON response envelope.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::config;
use crate::store::StoreError;
use crate::uploads::UploadError;

/// Every failure a handler can surface to a client.
#[derive(Debug)]
pub enum ApiError {
    /// 400: missing or malformed input.
    Validation(String),
    /// 401: no session or an invalid one.
    Unauthorized(String),
    /// 403: valid session, insufficient role.
    Forbidden(String),
    /// 404
    NotFound(String),
    /// 409: duplicate unique key.
    Conflict(String),
    /// 429
    RateLimited { retry_after: u64 },
    /// 500: storage failure or bug. `details` is only shown outside production.
    Internal {
        message: String,
        details: Option<String>,
    },
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn internal(details: impl std::fmt::Display) -> Self {
        ApiError::Internal {
            message: "Internal server error".to_string(),
            details: Some(details.to_string()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::Validation(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg) => msg,
            ApiError::RateLimited { .. } => "Too many requests. Please try again later.",
            ApiError::Internal { message, .. } => message,
        }
    }

    /// JSON body for this error. `expose_details` controls whether internal
    /// error text is included.
    pub fn to_json(&self, expose_details: bool) -> serde_json::Value {
        let mut body = json!({ "error": self.message() });
        match self {
            ApiError::RateLimited { retry_after } => {
                body["retryAfter"] = json!(retry_after);
            }
            ApiError::Internal {
                details: Some(details),
                ..
            } if expose_details => {
                body["details"] = json!(details);
            }
            _ => {}
        }
        body
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message(), self.status())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal { details, .. } = &self {
            tracing::error!(details = ?details, "request failed with internal error");
        }

        let expose = !config::environment().is_production();
        let status = self.status();
        let mut response = (status, Json(self.to_json(expose))).into_response();

        if let ApiError::RateLimited { retry_after } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::LastAdmin(msg) => ApiError::Validation(msg.to_string()),
            other => ApiError::Internal {
                message: "Database error".to_string(),
                details: Some(other.to_string()),
            },
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Io(e) => ApiError::Internal {
                message: "Failed to save file".to_string(),
                details: Some(e.to_string()),
            },
            other => ApiError::Validation(other.to_string()),
        }
    }
}

/// Success envelope: `{ "message": ..., "data": ... }`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_match_taxonomy() {
        assert_eq!(ApiError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::unauthorized("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::RateLimited { retry_after: 3 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::internal("boom").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_details_hidden_when_not_exposed() {
        let err = ApiError::internal("connection reset");
        let hidden = err.to_json(false);
        assert!(hidden.get("details").is_none());
        assert_eq!(hidden["error"], "Internal server error");

        let shown = err.to_json(true);
        assert_eq!(shown["details"], "connection reset");
    }

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let body = ApiError::RateLimited { retry_after: 42 }.to_json(false);
        assert_eq!(body["retryAfter"], 42);
    }

    #[test]
    fn test_rate_limited_response_sets_header() {
        let response = ApiError::RateLimited { retry_after: 7 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "7");
    }

    #[test]
    fn test_store_conflict_maps_to_conflict() {
        let err: ApiError = StoreError::Conflict("Slug already exists".into()).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.message(), "Slug already exists");

        let err: ApiError = StoreError::LastAdmin(crate::store::LAST_ADMIN_DELETE).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "Cannot delete the last active admin");
    }

    #[test]
    fn test_success_envelope_omits_missing_data() {
        let body = serde_json::to_value(ApiResponse::message("Deleted")).unwrap();
        assert_eq!(body, json!({ "message": "Deleted" }));
    }
}
