/**
 * Team Routes
 * Public agent profiles and admin team management
 */
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use super::parse_id;
use super::properties::property_json;
use crate::content::is_valid_email;
use crate::db::models::{Certification, ImageRef, SocialLinks, TeamMember};
use crate::error::{ApiError, ApiResponse, ApiResult};
use crate::form::FormData;
use crate::query::filters::{PropertyFilter, TeamFilter, PROPERTY_SORT, TEAM_SORT};
use crate::query::{Pagination, QueryParams};
use crate::uploads::ImageKind;
use crate::AppState;

const DEFAULT_PAGE_SIZE: u64 = 20;
const DEFAULT_SORT: &str = "order";

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/team", get(list_team))
        .route("/team/{id}", get(get_member))
        .route("/team/{id}/properties", get(member_properties))
}

/// Mounted at `/api/admin/team`.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(admin_list).post(create_member))
        .route(
            "/{id}",
            get(admin_get).put(update_member).delete(delete_member),
        )
}

pub fn member_json(member: &TeamMember) -> Value {
    let mut value = serde_json::to_value(member).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert("fullName".to_string(), json!(member.full_name()));
        map.insert("formattedPhone".to_string(), json!(member.formatted_phone()));
    }
    value
}

async fn paged(
    state: &AppState,
    filter: TeamFilter,
    params: &QueryParams,
) -> ApiResult<Json<Value>> {
    let page = params.page_request(DEFAULT_PAGE_SIZE);
    let sort = params.sort(TEAM_SORT, DEFAULT_SORT);
    let result = state.store.list_team(&filter, &sort, page.window()).await?;
    Ok(Json(json!({
        "teamMembers": result.items.iter().map(member_json).collect::<Vec<_>>(),
        "pagination": Pagination::compute(result.total, page),
    })))
}

async fn find_member(state: &AppState, raw_id: &str) -> ApiResult<TeamMember> {
    let id = parse_id(raw_id, "Team member")?;
    state
        .store
        .get_team_member(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Team member not found"))
}

// ============================================================================
// Public
// ============================================================================

/// GET /api/team
pub async fn list_team(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Value>> {
    paged(&state, TeamFilter::public(&params), &params).await
}

/// GET /api/team/{id}
pub async fn get_member(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let member = find_member(&state, &id).await?;
    if !member.is_active {
        return Err(ApiError::not_found("Team member not found"));
    }
    Ok(Json(json!({ "teamMember": member_json(&member) })))
}

/// GET /api/team/{id}/properties
/// Active listings whose agent is the member's linked user account.
pub async fn member_properties(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Value>> {
    let member = find_member(&state, &id).await?;
    if !member.is_active {
        return Err(ApiError::not_found("Team member not found"));
    }
    let page = params.page_request(12);

    let Some(user_id) = member.user_id else {
        return Ok(Json(json!({
            "properties": [],
            "pagination": Pagination::compute(0, page),
        })));
    };

    let filter = PropertyFilter {
        active: Some(true),
        agent_id: Some(user_id),
        ..PropertyFilter::default()
    };
    let sort = params.sort(PROPERTY_SORT, "-createdAt");
    let result = state
        .store
        .list_properties(&filter, &sort, page.window())
        .await?;
    let agents = super::user_summaries(state.store.as_ref(), Some(user_id)).await?;
    Ok(Json(json!({
        "properties": result.items.iter().map(|p| property_json(p, &agents)).collect::<Vec<_>>(),
        "pagination": Pagination::compute(result.total, page),
    })))
}

// ============================================================================
// Admin
// ============================================================================

/// GET /api/admin/team
pub async fn admin_list(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Value>> {
    paged(&state, TeamFilter::admin(&params)?, &params).await
}

/// GET /api/admin/team/{id}
pub async fn admin_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let member = find_member(&state, &id).await?;
    Ok(Json(json!({ "teamMember": member_json(&member) })))
}

fn blank_member() -> TeamMember {
    let now = Utc::now();
    TeamMember {
        id: Uuid::new_v4(),
        first_name: String::new(),
        last_name: String::new(),
        position: String::new(),
        bio: String::new(),
        photo: None,
        contact: Default::default(),
        social_media: SocialLinks::default(),
        specialties: Vec::new(),
        languages: Vec::new(),
        experience: Default::default(),
        certifications: Vec::new(),
        user_id: None,
        is_active: true,
        order: 0,
        created_at: now,
        updated_at: now,
    }
}

fn apply_fields(member: &mut TeamMember, form: &FormData, creating: bool) -> ApiResult<()> {
    form.merge_text("firstName", &mut member.first_name, true, creating)?;
    form.merge_text("lastName", &mut member.last_name, true, creating)?;
    form.merge_text("position", &mut member.position, true, creating)?;
    form.merge_text("bio", &mut member.bio, false, creating)?;

    form.merge_text("contact[email]", &mut member.contact.email, true, creating)?;
    if form.has("contact[email]") && !is_valid_email(&member.contact.email) {
        return Err(ApiError::validation("Invalid contact email"));
    }
    member.contact.email = member.contact.email.to_lowercase();
    form.merge_text("contact[phone]", &mut member.contact.phone, true, creating)?;
    form.merge_opt_text("contact[whatsapp]", &mut member.contact.whatsapp);

    for platform in SocialLinks::PLATFORMS {
        let key = format!("socialMedia[{}]", platform);
        if form.has(&key) {
            member.social_media.set(platform, form.owned(&key));
        }
    }

    form.merge_list("specialties", &mut member.specialties);
    form.merge_list("languages", &mut member.languages);

    let experience = &mut member.experience;
    form.merge_parsed("experience[yearsInBusiness]", &mut experience.years_in_business, false, creating)?;
    form.merge_parsed("experience[propertiesSold]", &mut experience.properties_sold, false, creating)?;
    form.merge_parsed("experience[totalSalesVolume]", &mut experience.total_sales_volume, false, creating)?;

    if let Some(certifications) = form.decode::<Vec<Certification>>("certifications")? {
        if certifications.iter().any(|c| c.name.trim().is_empty()) {
            return Err(ApiError::validation("Certification name is required"));
        }
        member.certifications = certifications;
    }

    form.merge_ref("user", &mut member.user_id)?;
    form.merge_flag("isActive", &mut member.is_active)?;
    form.merge_parsed("order", &mut member.order, false, creating)?;
    Ok(())
}

async fn check_user_link(state: &AppState, member: &TeamMember) -> ApiResult<()> {
    if let Some(user_id) = member.user_id {
        if state.store.get_user(user_id).await?.is_none() {
            return Err(ApiError::validation("Linked user not found"));
        }
    }
    Ok(())
}

fn photo_alt(form: &FormData, member: &TeamMember) -> String {
    form.owned("photoAlt").unwrap_or_else(|| member.full_name())
}

/// POST /api/admin/team
pub async fn create_member(
    State(state): State<AppState>,
    form: FormData,
) -> ApiResult<ApiResponse<Value>> {
    let mut member = blank_member();
    apply_fields(&mut member, &form, true)?;
    check_user_link(&state, &member).await?;

    if let Some(upload) = form.file("photo") {
        let url = state.images.save(ImageKind::Team, upload).await?;
        member.photo = Some(ImageRef {
            url,
            alt: photo_alt(&form, &member),
        });
    }

    if let Err(e) = state.store.insert_team_member(&member).await {
        if let Some(photo) = &member.photo {
            state.images.remove(ImageKind::Team, &photo.url).await;
        }
        return Err(e.into());
    }

    tracing::info!(member_id = %member.id, name = %member.full_name(), "Team member created");
    Ok(ApiResponse::new(
        "Team member created successfully",
        member_json(&member),
    ))
}

/// PUT /api/admin/team/{id}
/// A new photo replaces the old one (and its file); `removePhoto=true`
/// drops it.
pub async fn update_member(
    State(state): State<AppState>,
    Path(id): Path<String>,
    form: FormData,
) -> ApiResult<ApiResponse<Value>> {
    let mut member = find_member(&state, &id).await?;
    apply_fields(&mut member, &form, false)?;
    check_user_link(&state, &member).await?;

    let old_photo = member.photo.clone();
    let mut uploaded = None;
    if let Some(upload) = form.file("photo") {
        let url = state.images.save(ImageKind::Team, upload).await?;
        uploaded = Some(url.clone());
        member.photo = Some(ImageRef {
            url,
            alt: photo_alt(&form, &member),
        });
    } else if form.flag("removePhoto")? == Some(true) {
        member.photo = None;
    } else if let (Some(photo), Some(alt)) = (member.photo.as_mut(), form.owned("photoAlt")) {
        photo.alt = alt;
    }
    member.updated_at = Utc::now();

    let saved = state.store.update_team_member(&member).await;
    if !matches!(saved, Ok(true)) {
        if let Some(url) = &uploaded {
            state.images.remove(ImageKind::Team, url).await;
        }
        return Err(match saved {
            Err(e) => e.into(),
            Ok(_) => ApiError::not_found("Team member not found"),
        });
    }
    let current = member.photo.as_ref().map(|p| p.url.as_str());
    if let Some(old) = old_photo.filter(|old| Some(old.url.as_str()) != current) {
        state.images.remove(ImageKind::Team, &old.url).await;
    }

    tracing::info!(member_id = %member.id, "Team member updated");
    Ok(ApiResponse::new(
        "Team member updated successfully",
        member_json(&member),
    ))
}

/// DELETE /api/admin/team/{id}
pub async fn delete_member(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<()>> {
    let id = parse_id(&id, "Team member")?;
    let member = state
        .store
        .delete_team_member(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Team member not found"))?;
    if let Some(photo) = &member.photo {
        state.images.remove(ImageKind::Team, &photo.url).await;
    }
    tracing::info!(member_id = %member.id, "Team member deleted");
    Ok(ApiResponse::message("Team member deleted successfully"))
}
