/**
 * Blog Routes
 * Published posts for the site, and post management for editors
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
use crate::content::{excerpt_from, is_valid_slug, parse_tags, sanitize_html, slugify};
use crate::db::models::{BlogCategory, BlogPost, BlogStatus, ImageRef, UserSummary};
use crate::error::{ApiError, ApiResponse, ApiResult};
use crate::form::FormData;
use crate::query::filters::{BlogFilter, BLOG_SORT};
use crate::query::{PageWindow, Pagination, QueryParams};
use crate::session::CurrentUser;
use crate::uploads::ImageKind;
use crate::AppState;

const DEFAULT_PAGE_SIZE: u64 = 10;
const ADMIN_PAGE_SIZE: u64 = 20;
const DEFAULT_SORT: &str = "-publishedAt";
const EXCERPT_CHARS: usize = 200;

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/blog", get(list_posts))
        .route("/blog/post/{slug}", get(get_post))
        .route("/blog/post/{slug}/related", get(related_posts))
        .route("/blog/search/{query}", get(search_posts))
        .route("/blog/categories", get(categories))
        .route("/blog/tags", get(tags))
        .route("/blog/featured/list", get(featured_posts))
}

/// Mounted at `/api/admin/blog`.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(admin_list).post(create_post))
        .route("/{id}", get(admin_get).put(update_post).delete(delete_post))
}

// ============================================================================
// Views
// ============================================================================

/// Post JSON with the author projection joined in.
pub fn post_json(post: &BlogPost, authors: &HashMap<Uuid, UserSummary>) -> Value {
    let mut value = serde_json::to_value(post).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        let author = match post.author_id.and_then(|id| authors.get(&id)) {
            Some(summary) => json!(summary),
            None => json!(post.author_id),
        };
        map.insert("author".to_string(), author);
    }
    value
}

async fn render_list(state: &AppState, posts: &[BlogPost]) -> ApiResult<Vec<Value>> {
    let authors = user_summaries(
        state.store.as_ref(),
        posts.iter().filter_map(|p| p.author_id),
    )
    .await?;
    Ok(posts.iter().map(|p| post_json(p, &authors)).collect())
}

async fn render_one(state: &AppState, post: &BlogPost) -> ApiResult<Value> {
    let authors = user_summaries(state.store.as_ref(), post.author_id).await?;
    Ok(post_json(post, &authors))
}

async fn paged(
    state: &AppState,
    filter: BlogFilter,
    params: &QueryParams,
    default_limit: u64,
    default_sort: &str,
) -> ApiResult<Json<Value>> {
    let page = params.page_request(default_limit);
    let sort = params.sort(BLOG_SORT, default_sort);
    let result = state.store.list_posts(&filter, &sort, page.window()).await?;
    Ok(Json(json!({
        "posts": render_list(state, &result.items).await?,
        "pagination": Pagination::compute(result.total, page),
    })))
}

// ============================================================================
// Public
// ============================================================================

/// GET /api/blog
pub async fn list_posts(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Value>> {
    let filter = BlogFilter::public(&params)?;
    paged(&state, filter, &params, DEFAULT_PAGE_SIZE, DEFAULT_SORT).await
}

/// GET /api/blog/post/{slug}
/// Counts a view on every successful fetch of a published post.
pub async fn get_post(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Json<Value>> {
    let post = state
        .store
        .increment_post_views(slug.trim())
        .await?
        .ok_or_else(|| ApiError::not_found("Blog post not found"))?;
    Ok(Json(json!({ "post": render_one(&state, &post).await? })))
}

/// GET /api/blog/post/{slug}/related
/// Other published posts in the same category.
pub async fn related_posts(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Value>> {
    let post = state
        .store
        .get_post_by_slug(slug.trim())
        .await?
        .filter(BlogPost::is_public)
        .ok_or_else(|| ApiError::not_found("Blog post not found"))?;

    let filter = BlogFilter {
        category: Some(post.category),
        exclude_id: Some(post.id),
        ..BlogFilter::published()
    };
    let sort = params.sort(BLOG_SORT, DEFAULT_SORT);
    let result = state
        .store
        .list_posts(&filter, &sort, PageWindow::first(short_limit(&params, 3)))
        .await?;
    Ok(Json(json!({ "posts": render_list(&state, &result.items).await? })))
}

/// GET /api/blog/search/{query}
pub async fn search_posts(
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
    let mut filter = BlogFilter::public(&params)?;
    filter.search = Some(query.to_string());
    paged(&state, filter, &params, DEFAULT_PAGE_SIZE, DEFAULT_SORT).await
}

/// GET /api/blog/categories
/// Published post counts per category, most used first.
pub async fn categories(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let categories = state.store.blog_categories().await?;
    Ok(Json(json!({ "categories": categories })))
}

/// GET /api/blog/tags
pub async fn tags(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let tags = state.store.blog_tags().await?;
    Ok(Json(json!({ "tags": tags })))
}

/// GET /api/blog/featured/list
pub async fn featured_posts(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Value>> {
    let filter = BlogFilter {
        featured: Some(true),
        ..BlogFilter::published()
    };
    let sort = params.sort(BLOG_SORT, DEFAULT_SORT);
    let result = state
        .store
        .list_posts(&filter, &sort, PageWindow::first(short_limit(&params, 3)))
        .await?;
    Ok(Json(json!({ "posts": render_list(&state, &result.items).await? })))
}

// ============================================================================
// Admin
// ============================================================================

/// GET /api/admin/blog
/// All statuses, newest edits first.
pub async fn admin_list(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Value>> {
    let filter = BlogFilter::admin(&params)?;
    paged(&state, filter, &params, ADMIN_PAGE_SIZE, "-updatedAt").await
}

/// GET /api/admin/blog/{id}
pub async fn admin_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_id(&id, "Blog post")?;
    let post = state
        .store
        .get_post(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Blog post not found"))?;
    Ok(Json(json!({ "post": render_one(&state, &post).await? })))
}

fn blank_post(author: Uuid) -> BlogPost {
    let now = Utc::now();
    BlogPost {
        id: Uuid::new_v4(),
        title: String::new(),
        slug: String::new(),
        excerpt: String::new(),
        content: String::new(),
        featured_image: None,
        author_id: Some(author),
        category: BlogCategory::MarketNews,
        tags: Vec::new(),
        status: BlogStatus::Draft,
        published_at: None,
        views: 0,
        is_featured: false,
        created_at: now,
        updated_at: now,
    }
}

/// Merge submitted fields. Returns whether the slug changed.
fn apply_fields(post: &mut BlogPost, form: &FormData, creating: bool) -> ApiResult<bool> {
    form.merge_text("title", &mut post.title, true, creating)?;

    let previous_slug = post.slug.clone();
    match form.text("slug") {
        Some(raw) => {
            let slug = raw.to_lowercase();
            if !is_valid_slug(&slug) {
                return Err(ApiError::validation(
                    "Slug may only contain lowercase letters, numbers and single hyphens",
                ));
            }
            post.slug = slug;
        }
        None if creating => {
            post.slug = slugify(&post.title);
            if post.slug.is_empty() {
                return Err(ApiError::validation(
                    "Title must contain letters or numbers to derive a slug",
                ));
            }
        }
        None => {}
    }

    if form.has("content") || creating {
        let content = sanitize_html(form.raw("content").unwrap_or_default());
        if content.trim().is_empty() {
            return Err(ApiError::validation("content is required"));
        }
        post.content = content;
    }
    form.merge_text("excerpt", &mut post.excerpt, false, creating)?;
    if post.excerpt.is_empty() {
        post.excerpt = excerpt_from(&post.content, EXCERPT_CHARS);
    }

    form.merge_choice("category", &mut post.category, true, creating)?;
    if form.has("tags") {
        post.tags = parse_tags(&form.list("tags").join(","));
    }
    form.merge_flag("isFeatured", &mut post.is_featured)?;

    if let Some(status) = form.choice::<BlogStatus>("status")? {
        post.transition_to(status, Utc::now());
    }

    Ok(post.slug != previous_slug)
}

async fn ensure_unique_slug(state: &AppState, post: &BlogPost) -> ApiResult<()> {
    if state.store.slug_taken(&post.slug, Some(post.id)).await? {
        return Err(ApiError::conflict("A post with this slug already exists"));
    }
    Ok(())
}

fn image_alt(form: &FormData, post: &BlogPost) -> String {
    form.owned("featuredImageAlt")
        .unwrap_or_else(|| post.title.clone())
}

/// POST /api/admin/blog
pub async fn create_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    form: FormData,
) -> ApiResult<ApiResponse<Value>> {
    let mut post = blank_post(user.id);
    apply_fields(&mut post, &form, true)?;
    ensure_unique_slug(&state, &post).await?;

    if let Some(upload) = form.file("featuredImage") {
        let url = state.images.save(ImageKind::Blog, upload).await?;
        post.featured_image = Some(ImageRef {
            url,
            alt: image_alt(&form, &post),
        });
    }

    if let Err(e) = state.store.insert_post(&post).await {
        if let Some(image) = &post.featured_image {
            state.images.remove(ImageKind::Blog, &image.url).await;
        }
        return Err(e.into());
    }

    tracing::info!(
        post_id = %post.id,
        slug = %post.slug,
        status = %post.status,
        user = %user.username,
        "Blog post created"
    );
    Ok(ApiResponse::new(
        "Blog post created successfully",
        render_one(&state, &post).await?,
    ))
}

/// PUT /api/admin/blog/{id}
pub async fn update_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    form: FormData,
) -> ApiResult<ApiResponse<Value>> {
    let id = parse_id(&id, "Blog post")?;
    let mut post = state
        .store
        .get_post(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Blog post not found"))?;

    if apply_fields(&mut post, &form, false)? {
        ensure_unique_slug(&state, &post).await?;
    }

    let old_image = post.featured_image.clone();
    let mut uploaded = None;
    if let Some(upload) = form.file("featuredImage") {
        let url = state.images.save(ImageKind::Blog, upload).await?;
        uploaded = Some(url.clone());
        post.featured_image = Some(ImageRef {
            url,
            alt: image_alt(&form, &post),
        });
    } else if form.flag("removeFeaturedImage")? == Some(true) {
        post.featured_image = None;
    }
    post.updated_at = Utc::now();

    let saved = state.store.update_post(&post).await;
    if !matches!(saved, Ok(true)) {
        if let Some(url) = &uploaded {
            state.images.remove(ImageKind::Blog, url).await;
        }
        return Err(match saved {
            Err(e) => e.into(),
            Ok(_) => ApiError::not_found("Blog post not found"),
        });
    }
    let current = post.featured_image.as_ref().map(|i| i.url.as_str());
    if let Some(old) = old_image.filter(|old| Some(old.url.as_str()) != current) {
        state.images.remove(ImageKind::Blog, &old.url).await;
    }

    tracing::info!(post_id = %post.id, status = %post.status, user = %user.username, "Blog post updated");
    Ok(ApiResponse::new(
        "Blog post updated successfully",
        render_one(&state, &post).await?,
    ))
}

/// DELETE /api/admin/blog/{id}
pub async fn delete_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<()>> {
    let id = parse_id(&id, "Blog post")?;
    let post = state
        .store
        .delete_post(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Blog post not found"))?;
    if let Some(image) = &post.featured_image {
        state.images.remove(ImageKind::Blog, &image.url).await;
    }
    tracing::info!(post_id = %post.id, slug = %post.slug, user = %user.username, "Blog post deleted");
    Ok(ApiResponse::message("Blog post deleted successfully"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(pairs: &[(&str, &str)]) -> FormData {
        FormData::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_create_derives_slug_and_excerpt() {
        let mut post = blank_post(Uuid::new_v4());
        let changed = apply_fields(
            &mut post,
            &form(&[
                ("title", "Spring Market Update!"),
                ("content", "<p>Prices <b>rose</b> again.</p><script>alert(1)</script>"),
                ("category", "market-news"),
                ("tags", "Market, Spring,market"),
            ]),
            true,
        )
        .unwrap();

        assert!(changed);
        assert_eq!(post.slug, "spring-market-update");
        assert_eq!(post.content, "<p>Prices <b>rose</b> again.</p>");
        assert_eq!(post.excerpt, "Prices rose again.");
        assert_eq!(post.tags, vec!["market", "spring"]);
        assert_eq!(post.status, BlogStatus::Draft);
        assert!(post.published_at.is_none());
    }

    #[test]
    fn test_publishing_stamps_published_at_once() {
        let mut post = blank_post(Uuid::new_v4());
        post.title = "Hello".into();
        post.slug = "hello".into();
        post.content = "<p>Hi</p>".into();

        apply_fields(&mut post, &form(&[("status", "published")]), false).unwrap();
        let first = post.published_at.expect("published");

        apply_fields(&mut post, &form(&[("status", "archived")]), false).unwrap();
        apply_fields(&mut post, &form(&[("status", "published")]), false).unwrap();
        assert_eq!(post.published_at, Some(first));
    }

    #[test]
    fn test_update_keeps_slug_when_title_changes() {
        let mut post = blank_post(Uuid::new_v4());
        post.title = "Old".into();
        post.slug = "old".into();
        post.content = "<p>x</p>".into();
        let changed = apply_fields(&mut post, &form(&[("title", "New title")]), false).unwrap();
        assert!(!changed);
        assert_eq!(post.slug, "old");
    }

    #[test]
    fn test_rejects_bad_input() {
        let mut post = blank_post(Uuid::new_v4());
        assert!(apply_fields(&mut post, &form(&[("title", "x")]), true).is_err());
        assert!(apply_fields(
            &mut post,
            &form(&[
                ("title", "x"),
                ("content", "<p>y</p>"),
                ("category", "market-news"),
                ("slug", "Not A Slug"),
            ]),
            true
        )
        .is_err());
        assert!(apply_fields(
            &mut post,
            &form(&[("title", "x"), ("content", "<script></script>"), ("category", "market-news")]),
            true
        )
        .is_err());
    }
}
