/**
 * Hero Slide Routes
 * Homepage banner rotation
 */
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{parse_id, parse_instant};
use crate::db::models::{HeroSlide, ImageRef};
use crate::error::{ApiError, ApiResponse, ApiResult};
use crate::form::FormData;
use crate::query::filters::{HeroFilter, HERO_SORT};
use crate::query::{PageWindow, Pagination, QueryParams};
use crate::uploads::ImageKind;
use crate::AppState;

pub fn public_routes() -> Router<AppState> {
    Router::new().route("/hero", get(list_active))
}

/// Mounted at `/api/admin/hero`.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(admin_list).post(create_slide))
        .route("/{id}", get(admin_get).put(update_slide).delete(delete_slide))
}

fn slide_json(slide: &HeroSlide) -> Value {
    let mut value = serde_json::to_value(slide).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert(
            "isCurrentlyActive".to_string(),
            json!(slide.is_currently_active(Utc::now())),
        );
    }
    value
}

/// GET /api/hero
/// Slides that are switched on and inside their visibility window, in
/// display order.
pub async fn list_active(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let filter = HeroFilter::currently_active(Utc::now());
    let sort = crate::query::SortSpec::parse(None, HERO_SORT, "order");
    let result = state
        .store
        .list_hero(&filter, &sort, PageWindow::all())
        .await?;
    Ok(Json(json!({
        "slides": result.items.iter().map(slide_json).collect::<Vec<_>>(),
    })))
}

/// GET /api/admin/hero
pub async fn admin_list(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Value>> {
    let filter = HeroFilter::admin(&params)?;
    let page = params.page_request(20);
    let sort = params.sort(HERO_SORT, "order");
    let result = state.store.list_hero(&filter, &sort, page.window()).await?;
    Ok(Json(json!({
        "slides": result.items.iter().map(slide_json).collect::<Vec<_>>(),
        "pagination": Pagination::compute(result.total, page),
    })))
}

async fn find_slide(state: &AppState, raw_id: &str) -> ApiResult<HeroSlide> {
    let id = parse_id(raw_id, "Hero slide")?;
    state
        .store
        .get_hero(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Hero slide not found"))
}

/// GET /api/admin/hero/{id}
pub async fn admin_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let slide = find_slide(&state, &id).await?;
    Ok(Json(json!({ "slide": slide_json(&slide) })))
}

fn blank_slide() -> HeroSlide {
    let now = Utc::now();
    HeroSlide {
        id: Uuid::new_v4(),
        title: String::new(),
        subtitle: String::new(),
        description: String::new(),
        image: None,
        cta_button: None,
        property_id: None,
        order: 0,
        is_active: true,
        start_date: None,
        end_date: None,
        created_at: now,
        updated_at: now,
    }
}

fn merge_date(
    form: &FormData,
    key: &str,
    target: &mut Option<chrono::DateTime<Utc>>,
) -> ApiResult<()> {
    if !form.has(key) {
        return Ok(());
    }
    *target = match form.text(key) {
        None => None,
        Some(raw) => Some(
            parse_instant(raw)
                .ok_or_else(|| ApiError::validation(format!("Invalid {}: {}", key, raw)))?,
        ),
    };
    Ok(())
}

fn apply_fields(slide: &mut HeroSlide, form: &FormData, creating: bool) -> ApiResult<()> {
    form.merge_text("title", &mut slide.title, true, creating)?;
    form.merge_text("subtitle", &mut slide.subtitle, false, creating)?;
    form.merge_text("description", &mut slide.description, false, creating)?;

    // The button is kept only while it has both a label and a target.
    let keys = ["ctaButton[text]", "ctaButton[link]", "ctaButton[isExternal]"];
    if keys.iter().any(|k| form.has(k)) {
        let mut button = slide.cta_button.clone().unwrap_or_default();
        form.merge_text("ctaButton[text]", &mut button.text, false, false)?;
        form.merge_text("ctaButton[link]", &mut button.link, false, false)?;
        form.merge_flag("ctaButton[isExternal]", &mut button.is_external)?;
        slide.cta_button = match (button.text.is_empty(), button.link.is_empty()) {
            (true, true) => None,
            (false, false) => Some(button),
            _ => {
                return Err(ApiError::validation(
                    "ctaButton needs both text and link",
                ))
            }
        };
    }

    form.merge_ref("property", &mut slide.property_id)?;
    form.merge_parsed("order", &mut slide.order, false, creating)?;
    form.merge_flag("isActive", &mut slide.is_active)?;
    merge_date(form, "startDate", &mut slide.start_date)?;
    merge_date(form, "endDate", &mut slide.end_date)?;

    if let (Some(start), Some(end)) = (slide.start_date, slide.end_date) {
        if end < start {
            return Err(ApiError::validation("endDate must not be before startDate"));
        }
    }
    Ok(())
}

async fn check_property(state: &AppState, slide: &HeroSlide) -> ApiResult<()> {
    if let Some(id) = slide.property_id {
        if state.store.get_property(id).await?.is_none() {
            return Err(ApiError::validation("Linked property not found"));
        }
    }
    Ok(())
}

fn image_alt(form: &FormData, slide: &HeroSlide) -> String {
    form.owned("imageAlt").unwrap_or_else(|| slide.title.clone())
}

/// POST /api/admin/hero
/// Needs an uploaded `image` file or an `image` URL.
pub async fn create_slide(
    State(state): State<AppState>,
    form: FormData,
) -> ApiResult<ApiResponse<Value>> {
    let mut slide = blank_slide();
    apply_fields(&mut slide, &form, true)?;
    check_property(&state, &slide).await?;

    let uploaded = match form.file("image") {
        Some(upload) => Some(state.images.save(ImageKind::Hero, upload).await?),
        None => None,
    };
    let url = match uploaded.clone().or_else(|| form.owned("image")) {
        Some(url) => url,
        None => return Err(ApiError::validation("Slide image is required")),
    };
    slide.image = Some(ImageRef {
        url,
        alt: image_alt(&form, &slide),
    });

    if let Err(e) = state.store.insert_hero(&slide).await {
        if let Some(url) = &uploaded {
            state.images.remove(ImageKind::Hero, url).await;
        }
        return Err(e.into());
    }

    tracing::info!(slide_id = %slide.id, title = %slide.title, "Hero slide created");
    Ok(ApiResponse::new("Hero slide created successfully", slide_json(&slide)))
}

/// PUT /api/admin/hero/{id}
pub async fn update_slide(
    State(state): State<AppState>,
    Path(id): Path<String>,
    form: FormData,
) -> ApiResult<ApiResponse<Value>> {
    let mut slide = find_slide(&state, &id).await?;
    apply_fields(&mut slide, &form, false)?;
    check_property(&state, &slide).await?;

    let old_image = slide.image.clone();
    let mut uploaded = None;
    if let Some(upload) = form.file("image") {
        let url = state.images.save(ImageKind::Hero, upload).await?;
        uploaded = Some(url.clone());
        slide.image = Some(ImageRef {
            url,
            alt: image_alt(&form, &slide),
        });
    } else if let Some(image) = slide.image.as_mut() {
        if let Some(alt) = form.owned("imageAlt") {
            image.alt = alt;
        }
    }
    slide.updated_at = Utc::now();

    let saved = state.store.update_hero(&slide).await;
    if !matches!(saved, Ok(true)) {
        if let Some(url) = &uploaded {
            state.images.remove(ImageKind::Hero, url).await;
        }
        return Err(match saved {
            Err(e) => e.into(),
            Ok(_) => ApiError::not_found("Hero slide not found"),
        });
    }
    if let (Some(old), Some(_)) = (old_image, &uploaded) {
        state.images.remove(ImageKind::Hero, &old.url).await;
    }

    tracing::info!(slide_id = %slide.id, "Hero slide updated");
    Ok(ApiResponse::new("Hero slide updated successfully", slide_json(&slide)))
}

/// DELETE /api/admin/hero/{id}
pub async fn delete_slide(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<()>> {
    let id = parse_id(&id, "Hero slide")?;
    let slide = state
        .store
        .delete_hero(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Hero slide not found"))?;
    if let Some(image) = &slide.image {
        state.images.remove(ImageKind::Hero, &image.url).await;
    }
    tracing::info!(slide_id = %slide.id, "Hero slide deleted");
    Ok(ApiResponse::message("Hero slide deleted successfully"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::CtaButton;

    fn form(pairs: &[(&str, &str)]) -> FormData {
        FormData::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_apply_fields_with_window_and_button() {
        let mut slide = blank_slide();
        apply_fields(
            &mut slide,
            &form(&[
                ("title", "Find your home"),
                ("ctaButton[text]", "Browse"),
                ("ctaButton[link]", "/properties"),
                ("order", "3"),
                ("startDate", "2025-01-01"),
                ("endDate", "2025-02-01T00:00:00Z"),
            ]),
            true,
        )
        .unwrap();

        assert_eq!(slide.order, 3);
        assert_eq!(
            slide.cta_button,
            Some(CtaButton {
                text: "Browse".into(),
                link: "/properties".into(),
                is_external: false,
            })
        );
        assert!(slide.start_date.is_some() && slide.end_date.is_some());

        // Clearing both halves drops the button; blank dates clear the window.
        apply_fields(
            &mut slide,
            &form(&[("ctaButton[text]", ""), ("ctaButton[link]", ""), ("startDate", "")]),
            false,
        )
        .unwrap();
        assert!(slide.cta_button.is_none());
        assert!(slide.start_date.is_none());
    }

    #[test]
    fn test_apply_fields_rejects_bad_input() {
        let mut slide = blank_slide();
        assert!(apply_fields(&mut slide, &form(&[]), true).is_err());
        assert!(apply_fields(
            &mut slide,
            &form(&[("title", "t"), ("startDate", "2025-03-01"), ("endDate", "2025-02-01")]),
            true
        )
        .is_err());

        let mut slide = blank_slide();
        assert!(apply_fields(
            &mut slide,
            &form(&[("title", "t"), ("startDate", "soon")]),
            true
        )
        .is_err());
        assert!(apply_fields(
            &mut slide,
            &form(&[("title", "t"), ("ctaButton[text]", "Go")]),
            true
        )
        .is_err());
    }
}
