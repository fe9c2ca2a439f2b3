/**
 * Property Routes
 * Public listing catalogue and the admin listing editor
 */
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

use super::{parse_id, short_limit, user_summaries};
use crate::db::models::{
    normalize_primary, Address, Coordinates, Features, Property, PropertyImage, PropertyStatus,
    PropertyType, UserSummary,
};
use crate::error::{ApiError, ApiResponse, ApiResult};
use crate::form::FormData;
use crate::query::filters::{PropertyFilter, PROPERTY_SORT};
use crate::query::{PageWindow, Pagination, QueryParams};
use crate::session::CurrentUser;
use crate::uploads::ImageKind;
use crate::AppState;

const DEFAULT_PAGE_SIZE: u64 = 12;
const ADMIN_PAGE_SIZE: u64 = 20;
const DEFAULT_SORT: &str = "-createdAt";
/// Similar listings are within this fraction of the reference price.
const SIMILAR_PRICE_BAND: f64 = 0.2;

/// `GET /api/properties...`
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/properties", get(list_properties))
        .route("/properties/search/{query}", get(search_properties))
        .route("/properties/featured/list", get(featured_properties))
        .route("/properties/stats/overview", get(property_stats))
        .route("/properties/{id}", get(get_property))
        .route("/properties/{id}/similar", get(similar_properties))
}

/// Mounted at `/api/admin/properties`.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(admin_list).post(create_property))
        .route(
            "/{id}",
            get(admin_get).put(update_property).delete(delete_property),
        )
}

// ============================================================================
// Views
// ============================================================================

/// Listing JSON with the agent joined in and derived fields added.
pub fn property_json(property: &Property, agents: &HashMap<Uuid, UserSummary>) -> Value {
    let mut value = serde_json::to_value(property).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        let agent = match property.agent_id.and_then(|id| agents.get(&id)) {
            Some(summary) => json!(summary),
            None => json!(property.agent_id),
        };
        map.insert("agent".to_string(), agent);
        map.insert("fullAddress".to_string(), json!(property.full_address()));
        map.insert(
            "primaryImage".to_string(),
            json!(property.primary_image().map(|img| &img.url)),
        );
    }
    value
}

async fn render_list(state: &AppState, properties: &[Property]) -> ApiResult<Vec<Value>> {
    let agents = user_summaries(
        state.store.as_ref(),
        properties.iter().filter_map(|p| p.agent_id),
    )
    .await?;
    Ok(properties.iter().map(|p| property_json(p, &agents)).collect())
}

async fn render_one(state: &AppState, property: &Property) -> ApiResult<Value> {
    let agents = user_summaries(state.store.as_ref(), property.agent_id).await?;
    Ok(property_json(property, &agents))
}

async fn paged(
    state: &AppState,
    filter: PropertyFilter,
    params: &QueryParams,
    default_limit: u64,
) -> ApiResult<Json<Value>> {
    let page = params.page_request(default_limit);
    let sort = params.sort(PROPERTY_SORT, DEFAULT_SORT);
    let result = state
        .store
        .list_properties(&filter, &sort, page.window())
        .await?;
    Ok(Json(json!({
        "properties": render_list(state, &result.items).await?,
        "pagination": Pagination::compute(result.total, page),
    })))
}

// ============================================================================
// Public
// ============================================================================

/// GET /api/properties
pub async fn list_properties(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Value>> {
    let filter = PropertyFilter::public(&params)?;
    paged(&state, filter, &params, DEFAULT_PAGE_SIZE).await
}

/// GET /api/properties/{id}
/// Every successful fetch counts as a view; repeat visits are not
/// de-duplicated.
pub async fn get_property(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_id(&id, "Property")?;
    let property = state
        .store
        .increment_property_views(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Property not found"))?;
    Ok(Json(json!({ "property": render_one(&state, &property).await? })))
}

/// GET /api/properties/search/{query}
pub async fn search_properties(
    State(state): State<AppState>,
    Path(query): Path<String>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Value>> {
    let query = query.trim();
    if query.chars().count() < 2 {
        return Err(ApiError::validation(
            "Search query must be at least 2 characters long",
        ));
    }
    let mut filter = PropertyFilter::public(&params)?;
    filter.search = Some(query.to_string());
    paged(&state, filter, &params, DEFAULT_PAGE_SIZE).await
}

/// GET /api/properties/featured/list
pub async fn featured_properties(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Value>> {
    let filter = PropertyFilter {
        active: Some(true),
        featured: Some(true),
        ..PropertyFilter::default()
    };
    let sort = params.sort(PROPERTY_SORT, DEFAULT_SORT);
    let result = state
        .store
        .list_properties(&filter, &sort, PageWindow::first(short_limit(&params, 6)))
        .await?;
    Ok(Json(json!({ "properties": render_list(&state, &result.items).await? })))
}

/// GET /api/properties/{id}/similar
/// Same type, price within ±20%, excluding the listing itself.
pub async fn similar_properties(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Value>> {
    let id = parse_id(&id, "Property")?;
    let reference = state
        .store
        .get_property(id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| ApiError::not_found("Property not found"))?;

    let filter = PropertyFilter {
        active: Some(true),
        property_type: Some(reference.property_type),
        min_price: Some(reference.price * (1.0 - SIMILAR_PRICE_BAND)),
        max_price: Some(reference.price * (1.0 + SIMILAR_PRICE_BAND)),
        exclude_id: Some(reference.id),
        ..PropertyFilter::default()
    };
    let sort = params.sort(PROPERTY_SORT, DEFAULT_SORT);
    let result = state
        .store
        .list_properties(&filter, &sort, PageWindow::first(short_limit(&params, 4)))
        .await?;
    Ok(Json(json!({ "properties": render_list(&state, &result.items).await? })))
}

/// GET /api/properties/stats/overview
pub async fn property_stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let stats = state.store.property_stats().await?;
    Ok(Json(json!({ "stats": stats })))
}

// ============================================================================
// Admin
// ============================================================================

/// GET /api/admin/properties
pub async fn admin_list(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Value>> {
    let filter = PropertyFilter::admin(&params)?;
    paged(&state, filter, &params, ADMIN_PAGE_SIZE).await
}

/// GET /api/admin/properties/{id}
/// Admin reads see inactive listings and do not count as views.
pub async fn admin_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_id(&id, "Property")?;
    let property = state
        .store
        .get_property(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Property not found"))?;
    Ok(Json(json!({ "property": render_one(&state, &property).await? })))
}

fn blank_property(now: chrono::DateTime<Utc>) -> Property {
    Property {
        id: Uuid::new_v4(),
        title: String::new(),
        description: String::new(),
        price: 0.0,
        property_type: PropertyType::House,
        status: PropertyStatus::ForSale,
        address: Address {
            country: "USA".to_string(),
            ..Address::default()
        },
        coordinates: None,
        features: Features::default(),
        amenities: Vec::new(),
        images: Vec::new(),
        agent_id: None,
        is_active: true,
        is_featured: false,
        views: 0,
        created_at: now,
        updated_at: now,
    }
}

/// Merge submitted fields into `property`. Nothing is written here.
fn apply_fields(property: &mut Property, form: &FormData, creating: bool) -> ApiResult<()> {
    form.merge_text("title", &mut property.title, true, creating)?;
    form.merge_text("description", &mut property.description, false, creating)?;
    form.merge_parsed("price", &mut property.price, true, creating)?;
    form.merge_choice("propertyType", &mut property.property_type, true, creating)?;
    form.merge_choice("status", &mut property.status, false, creating)?;

    let address = &mut property.address;
    form.merge_text("address[street]", &mut address.street, true, creating)?;
    form.merge_text("address[city]", &mut address.city, true, creating)?;
    form.merge_text("address[state]", &mut address.state, true, creating)?;
    form.merge_text("address[zipCode]", &mut address.zip_code, true, creating)?;
    form.merge_text("address[country]", &mut address.country, false, creating)?;

    if form.has("coordinates[latitude]") || form.has("coordinates[longitude]") {
        let latitude = form.parse::<f64>("coordinates[latitude]")?;
        let longitude = form.parse::<f64>("coordinates[longitude]")?;
        property.coordinates = match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => {
                if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
                    return Err(ApiError::validation("Coordinates out of range"));
                }
                Some(Coordinates {
                    latitude,
                    longitude,
                })
            }
            (None, None) => None,
            _ => {
                return Err(ApiError::validation(
                    "Both latitude and longitude are required",
                ))
            }
        };
    }

    let features = &mut property.features;
    form.merge_opt_parsed("features[bedrooms]", &mut features.bedrooms)?;
    form.merge_opt_parsed("features[bathrooms]", &mut features.bathrooms)?;
    form.merge_opt_parsed("features[sqft]", &mut features.sqft)?;
    form.merge_opt_parsed("features[lotSize]", &mut features.lot_size)?;
    form.merge_opt_parsed("features[yearBuilt]", &mut features.year_built)?;
    form.merge_opt_parsed("features[garage]", &mut features.garage)?;
    form.merge_opt_parsed("features[stories]", &mut features.stories)?;

    form.merge_list("amenities", &mut property.amenities);
    form.merge_ref("agent", &mut property.agent_id)?;
    form.merge_flag("isActive", &mut property.is_active)?;
    form.merge_flag("isFeatured", &mut property.is_featured)?;
    Ok(())
}

async fn check_agent(state: &AppState, property: &Property) -> ApiResult<()> {
    if let Some(agent_id) = property.agent_id {
        if state.store.get_user(agent_id).await?.is_none() {
            return Err(ApiError::validation("Agent not found"));
        }
    }
    Ok(())
}

fn new_images(urls: Vec<String>, form: &FormData, title: &str) -> Vec<PropertyImage> {
    urls.into_iter()
        .zip(form.files("images"))
        .map(|(url, upload)| PropertyImage {
            url,
            alt: match upload.default_alt() {
                alt if alt.is_empty() => title.to_string(),
                alt => alt,
            },
            is_primary: false,
        })
        .collect()
}

/// POST /api/admin/properties
pub async fn create_property(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    form: FormData,
) -> ApiResult<ApiResponse<Value>> {
    let mut property = blank_property(Utc::now());
    apply_fields(&mut property, &form, true)?;
    if property.agent_id.is_none() {
        property.agent_id = Some(user.id);
    }
    check_agent(&state, &property).await?;

    let urls = state
        .images
        .save_all(ImageKind::Properties, form.files("images"))
        .await?;
    property.images = new_images(urls, &form, &property.title);
    normalize_primary(&mut property.images);

    if let Err(e) = state.store.insert_property(&property).await {
        let urls: Vec<&str> = property.images.iter().map(|i| i.url.as_str()).collect();
        state.images.remove_all(ImageKind::Properties, urls).await;
        return Err(e.into());
    }

    tracing::info!(
        property_id = %property.id,
        user = %user.username,
        images = property.images.len(),
        "Property created"
    );
    Ok(ApiResponse::new(
        "Property created successfully",
        render_one(&state, &property).await?,
    ))
}

/// PUT /api/admin/properties/{id}
pub async fn update_property(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    form: FormData,
) -> ApiResult<ApiResponse<Value>> {
    let id = parse_id(&id, "Property")?;
    let mut property = state
        .store
        .get_property(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Property not found"))?;

    apply_fields(&mut property, &form, false)?;
    check_agent(&state, &property).await?;

    let remove: Vec<String> = form.list("removeImages");
    let append = form.flag("appendImages")?.unwrap_or(false);
    let urls = state
        .images
        .save_all(ImageKind::Properties, form.files("images"))
        .await?;
    let uploaded = new_images(urls, &form, &property.title);

    let previous = property.images.clone();
    let mut kept: Vec<PropertyImage> = previous
        .iter()
        .filter(|img| !remove.contains(&img.url))
        .cloned()
        .collect();
    if !uploaded.is_empty() && !append {
        kept.clear();
    }
    kept.extend(uploaded);
    if let Some(primary) = form.text("primaryImage") {
        if kept.iter().any(|img| img.url == primary) {
            for img in kept.iter_mut() {
                img.is_primary = img.url == primary;
            }
        }
    }
    normalize_primary(&mut kept);
    property.images = kept;
    property.updated_at = Utc::now();

    let saved = state.store.update_property(&property).await;
    if !matches!(saved, Ok(true)) {
        let fresh: Vec<&str> = property
            .images
            .iter()
            .filter(|img| !previous.iter().any(|old| old.url == img.url))
            .map(|img| img.url.as_str())
            .collect();
        state.images.remove_all(ImageKind::Properties, fresh).await;
        return Err(match saved {
            Err(e) => e.into(),
            Ok(_) => ApiError::not_found("Property not found"),
        });
    }
    let dropped: Vec<&str> = previous
        .iter()
        .filter(|old| !property.images.iter().any(|img| img.url == old.url))
        .map(|old| old.url.as_str())
        .collect();
    state.images.remove_all(ImageKind::Properties, dropped).await;

    tracing::info!(property_id = %property.id, user = %user.username, "Property updated");
    Ok(ApiResponse::new(
        "Property updated successfully",
        render_one(&state, &property).await?,
    ))
}

/// DELETE /api/admin/properties/{id}
pub async fn delete_property(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<()>> {
    let id = parse_id(&id, "Property")?;
    let property = state
        .store
        .delete_property(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Property not found"))?;

    let urls: Vec<&str> = property.images.iter().map(|img| img.url.as_str()).collect();
    state.images.remove_all(ImageKind::Properties, urls).await;

    tracing::info!(property_id = %property.id, user = %user.username, "Property deleted");
    Ok(ApiResponse::message("Property deleted successfully"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(pairs: &[(&str, &str)]) -> FormData {
        FormData::from_pairs(pairs.iter().copied())
    }

    fn complete() -> Vec<(&'static str, &'static str)> {
        vec![
            ("title", "Lake House"),
            ("price", "450000"),
            ("propertyType", "house"),
            ("address[street]", "1 Shore Rd"),
            ("address[city]", "Austin"),
            ("address[state]", "TX"),
            ("address[zipCode]", "78701"),
        ]
    }

    #[test]
    fn test_create_requires_core_fields() {
        let mut property = blank_property(Utc::now());
        let err = apply_fields(&mut property, &form(&[("title", "x")]), true).unwrap_err();
        assert_eq!(err.message(), "price is required");
    }

    #[test]
    fn test_create_applies_fields() {
        let mut pairs = complete();
        pairs.extend([
            ("features[bedrooms]", "3"),
            ("features[bathrooms]", "2.5"),
            ("amenities", "pool, dock"),
            ("isFeatured", "true"),
        ]);
        let mut property = blank_property(Utc::now());
        apply_fields(&mut property, &form(&pairs), true).unwrap();
        assert_eq!(property.price, 450000.0);
        assert_eq!(property.features.bedrooms, Some(3));
        assert_eq!(property.features.bathrooms, Some(2.5));
        assert_eq!(property.amenities, vec!["pool", "dock"]);
        assert!(property.is_featured);
        assert_eq!(property.address.country, "USA");
        assert_eq!(property.full_address(), "1 Shore Rd, Austin, TX 78701, USA");
    }

    #[test]
    fn test_update_merges_only_sent_fields() {
        let mut property = blank_property(Utc::now());
        apply_fields(&mut property, &form(&complete()), true).unwrap();

        apply_fields(&mut property, &form(&[("price", "400000")]), false).unwrap();
        assert_eq!(property.price, 400000.0);
        assert_eq!(property.title, "Lake House");

        let err = apply_fields(&mut property, &form(&[("title", "  ")]), false).unwrap_err();
        assert_eq!(err.message(), "title is required");
    }

    #[test]
    fn test_rejects_bad_numbers_and_enums() {
        let mut property = blank_property(Utc::now());
        let mut bad_price = complete();
        bad_price.retain(|(k, _)| *k != "price");
        bad_price.push(("price", "cheap"));
        assert!(apply_fields(&mut property, &form(&bad_price), true).is_err());

        let mut bad_type = complete();
        bad_type.retain(|(k, _)| *k != "propertyType");
        bad_type.push(("propertyType", "castle"));
        assert!(apply_fields(&mut property, &form(&bad_type), true).is_err());
    }

    #[test]
    fn test_coordinates_need_both_parts() {
        let mut property = blank_property(Utc::now());
        let mut pairs = complete();
        pairs.push(("coordinates[latitude]", "30.2"));
        assert!(apply_fields(&mut property, &form(&pairs), true).is_err());
        pairs.push(("coordinates[longitude]", "-97.7"));
        apply_fields(&mut property, &form(&pairs), true).unwrap();
        assert_eq!(property.coordinates.map(|c| c.latitude), Some(30.2));
    }

    #[test]
    fn test_property_json_joins_agent_projection() {
        let mut property = blank_property(Utc::now());
        let agent = Uuid::new_v4();
        property.agent_id = Some(agent);
        let mut agents = HashMap::new();
        agents.insert(
            agent,
            UserSummary {
                id: agent,
                first_name: "Ann".into(),
                last_name: "Agent".into(),
            },
        );
        let value = property_json(&property, &agents);
        assert_eq!(value["agent"]["firstName"], "Ann");
        assert!(value["agent"].get("passwordHash").is_none());
        assert!(value.get("fullAddress").is_some());
    }
}
