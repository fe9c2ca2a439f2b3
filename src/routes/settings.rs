/**
 * Settings Routes
 * Typed key/value site configuration
 */
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::db::models::{Setting, SettingCategory, SettingValue};
use crate::error::{ApiError, ApiResponse, ApiResult};
use crate::query::QueryParams;
use crate::store::Store;
use crate::AppState;

const MAX_KEY_LEN: usize = 100;

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/settings/public", get(public_settings))
        .route("/settings/company", get(company_settings))
        .route("/settings/social", get(social_settings))
}

/// Mounted at `/api/admin/settings`.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(admin_list).put(bulk_update))
        .route(
            "/{key}",
            get(admin_get).put(put_setting).delete(delete_setting),
        )
}

/// `{ key: value }` with the type tags stripped.
fn value_map(settings: &[Setting]) -> Map<String, Value> {
    settings
        .iter()
        .map(|s| (s.key.clone(), s.value.to_json()))
        .collect()
}

async fn public_map(
    state: &AppState,
    categories: &[SettingCategory],
) -> ApiResult<Json<Value>> {
    let settings = state.store.list_settings(Some(categories)).await?;
    Ok(Json(json!({ "settings": value_map(&settings) })))
}

/// GET /api/settings/public
pub async fn public_settings(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    public_map(&state, SettingCategory::PUBLIC).await
}

/// GET /api/settings/company
pub async fn company_settings(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    public_map(&state, &[SettingCategory::Company]).await
}

/// GET /api/settings/social
pub async fn social_settings(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    public_map(&state, &[SettingCategory::Social]).await
}

// ============================================================================
// Writes
// ============================================================================

/// One upsert request. Unset metadata keeps the stored row's values (or
/// the defaults for a new key).
#[derive(Debug, Clone)]
pub struct SettingWrite {
    pub key: String,
    pub value: Value,
    /// Explicit type tag; defaults to the stored kind, then to inference.
    pub kind: Option<String>,
    pub description: Option<String>,
    pub category: Option<SettingCategory>,
    pub is_editable: Option<bool>,
}

impl SettingWrite {
    pub fn value(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            kind: None,
            description: None,
            category: None,
            is_editable: None,
        }
    }

    pub fn in_category(mut self, category: SettingCategory) -> Self {
        self.category = Some(category);
        self
    }
}

fn validate_key(key: &str) -> ApiResult<()> {
    let ok = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !ok {
        return Err(ApiError::validation(
            "Setting key may only contain letters, digits, '_', '-' and '.'",
        ));
    }
    Ok(())
}

/// Upsert one setting by key. Rows marked non-editable refuse writes.
pub async fn write_setting(store: &dyn Store, write: SettingWrite) -> ApiResult<Setting> {
    let key = write.key.trim().to_string();
    validate_key(&key)?;

    let existing = store.get_setting(&key).await?;
    if let Some(existing) = &existing {
        if !existing.is_editable {
            return Err(ApiError::validation(format!(
                "Setting '{}' is not editable",
                key
            )));
        }
    }

    let kind = write
        .kind
        .or_else(|| existing.as_ref().map(|s| s.value.kind().to_string()));
    let value = match kind {
        Some(kind) => SettingValue::from_json_as(&kind, write.value)
            .map_err(|e| ApiError::validation(format!("Invalid value for '{}': {}", key, e)))?,
        None => SettingValue::from_json(write.value)
            .ok_or_else(|| ApiError::validation(format!("Value for '{}' is required", key)))?,
    };

    let now = Utc::now();
    let setting = Setting {
        value,
        description: write
            .description
            .or_else(|| existing.as_ref().map(|s| s.description.clone()))
            .unwrap_or_default(),
        category: write
            .category
            .or_else(|| existing.as_ref().map(|s| s.category))
            .unwrap_or(SettingCategory::General),
        is_editable: write.is_editable.unwrap_or(true),
        created_at: existing.as_ref().map_or(now, |s| s.created_at),
        updated_at: now,
        key,
    };
    let saved = store.upsert_setting(&setting).await?;
    tracing::info!(key = %saved.key, kind = saved.value.kind(), "Setting saved");
    Ok(saved)
}

#[derive(Debug, Default, Serialize)]
pub struct BulkOutcome {
    pub updated: Vec<String>,
    pub failed: Vec<BulkFailure>,
}

#[derive(Debug, Serialize)]
pub struct BulkFailure {
    pub key: String,
    pub error: String,
}

/// Independent upserts in order. A failure does not undo earlier writes
/// or stop later ones.
pub async fn write_all(store: &dyn Store, writes: Vec<SettingWrite>) -> BulkOutcome {
    let mut outcome = BulkOutcome::default();
    for write in writes {
        let key = write.key.clone();
        match write_setting(store, write).await {
            Ok(saved) => outcome.updated.push(saved.key),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Setting update failed");
                outcome.failed.push(BulkFailure {
                    key,
                    error: e.message().to_string(),
                });
            }
        }
    }
    outcome
}

// ============================================================================
// Admin
// ============================================================================

fn json_body(body: Result<Json<Value>, JsonRejection>) -> ApiResult<Value> {
    body.map(|Json(v)| v)
        .map_err(|rejection| ApiError::validation(rejection.body_text()))
}

/// GET /api/admin/settings
/// Every category, or only `?category=`.
pub async fn admin_list(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Value>> {
    let category = params
        .text("category")
        .map(|raw| {
            raw.parse::<SettingCategory>()
                .map_err(|e| ApiError::validation(format!("Invalid category: {}", e)))
        })
        .transpose()?;
    let settings = match category {
        Some(c) => {
            state
                .store
                .list_settings(Some(std::slice::from_ref(&c)))
                .await?
        }
        None => state.store.list_settings(None).await?,
    };
    Ok(Json(json!({ "settings": settings })))
}

/// GET /api/admin/settings/{key}
pub async fn admin_get(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<Value>> {
    let setting = state
        .store
        .get_setting(key.trim())
        .await?
        .ok_or_else(|| ApiError::not_found("Setting not found"))?;
    Ok(Json(json!({ "setting": setting })))
}

/// PUT /api/admin/settings/{key}
/// Body: `{ value, type?, description?, category?, isEditable? }`.
pub async fn put_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<ApiResponse<Setting>> {
    let Value::Object(mut body) = json_body(body)? else {
        return Err(ApiError::validation("Request body must be a JSON object"));
    };
    let value = body
        .remove("value")
        .ok_or_else(|| ApiError::validation("value is required"))?;

    let text = |v: Option<Value>| v.and_then(|v| v.as_str().map(str::to_string));
    let category = text(body.remove("category"))
        .map(|raw| {
            raw.parse::<SettingCategory>()
                .map_err(|e| ApiError::validation(format!("Invalid category: {}", e)))
        })
        .transpose()?;
    let write = SettingWrite {
        key,
        value,
        kind: text(body.remove("type")),
        description: text(body.remove("description")),
        category,
        is_editable: body.remove("isEditable").and_then(|v| v.as_bool()),
    };

    let setting = write_setting(state.store.as_ref(), write).await?;
    Ok(ApiResponse::new("Setting saved successfully", setting))
}

/// PUT /api/admin/settings
/// Body: `{ settings: { key: value, ... } }`. Not atomic: the response
/// lists which keys were written and which failed.
pub async fn bulk_update(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<ApiResponse<BulkOutcome>> {
    let body = json_body(body)?;
    let Some(Value::Object(entries)) = body.get("settings").cloned() else {
        return Err(ApiError::validation("settings must be an object"));
    };
    let writes = entries
        .into_iter()
        .map(|(key, value)| SettingWrite::value(key, value))
        .collect();
    let outcome = write_all(state.store.as_ref(), writes).await;
    let message = if outcome.failed.is_empty() {
        "Settings updated successfully"
    } else {
        "Some settings could not be updated"
    };
    Ok(ApiResponse::new(message, outcome))
}

/// DELETE /api/admin/settings/{key}
pub async fn delete_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<ApiResponse<()>> {
    let key = key.trim();
    let existing = state
        .store
        .get_setting(key)
        .await?
        .ok_or_else(|| ApiError::not_found("Setting not found"))?;
    if !existing.is_editable {
        return Err(ApiError::validation(format!(
            "Setting '{}' is not editable",
            key
        )));
    }
    state.store.delete_setting(key).await?;
    tracing::info!(key = %key, "Setting deleted");
    Ok(ApiResponse::message("Setting deleted successfully"))
}
