/**
 * Dashboard Routes
 * Aggregate counts and recent activity for the admin home page
 */
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::models::BlogStatus;
use crate::error::ApiResult;
use crate::query::filters::{
    BlogFilter, HeroFilter, PropertyFilter, TeamFilter, UserFilter, BLOG_SORT, HERO_SORT,
    PROPERTY_SORT, TEAM_SORT, USER_SORT,
};
use crate::query::{PageWindow, SortSpec};
use crate::store::Store;
use crate::AppState;

const RECENT_PER_KIND: u64 = 5;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCounts {
    pub properties: u64,
    pub active_properties: u64,
    pub featured_properties: u64,
    pub team_members: u64,
    pub blog_posts: u64,
    pub published_posts: u64,
    pub draft_posts: u64,
    pub hero_slides: u64,
    pub users: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    pub kind: &'static str,
    pub id: uuid::Uuid,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub counts: DashboardCounts,
    pub recent_activity: Vec<ActivityItem>,
}

fn newest_first(table: &[crate::query::SortField]) -> SortSpec {
    SortSpec::parse(None, table, "-updatedAt")
}

/// Counts per entity plus the most recently updated properties, posts and
/// users, merged newest first.
pub async fn build_summary(store: &dyn Store) -> ApiResult<DashboardSummary> {
    let count = PageWindow::count_only();
    let property_sort = newest_first(PROPERTY_SORT);
    let blog_sort = newest_first(BLOG_SORT);

    let properties = store
        .list_properties(&PropertyFilter::default(), &property_sort, count)
        .await?
        .total;
    let active_properties = store
        .list_properties(
            &PropertyFilter {
                active: Some(true),
                ..PropertyFilter::default()
            },
            &property_sort,
            count,
        )
        .await?
        .total;
    let featured_properties = store
        .list_properties(
            &PropertyFilter {
                featured: Some(true),
                ..PropertyFilter::default()
            },
            &property_sort,
            count,
        )
        .await?
        .total;

    let posts_with = |status: Option<BlogStatus>| BlogFilter {
        status,
        ..BlogFilter::default()
    };
    let blog_posts = store.list_posts(&posts_with(None), &blog_sort, count).await?.total;
    let published_posts = store
        .list_posts(&posts_with(Some(BlogStatus::Published)), &blog_sort, count)
        .await?
        .total;
    let draft_posts = store
        .list_posts(&posts_with(Some(BlogStatus::Draft)), &blog_sort, count)
        .await?
        .total;

    let team_members = store
        .list_team(&TeamFilter::default(), &newest_first(TEAM_SORT), count)
        .await?
        .total;
    let hero_slides = store
        .list_hero(&HeroFilter::default(), &newest_first(HERO_SORT), count)
        .await?
        .total;
    let users = store
        .list_users(&UserFilter::default(), &newest_first(USER_SORT), count)
        .await?
        .total;

    let recent = PageWindow::first(RECENT_PER_KIND);
    let mut recent_activity: Vec<ActivityItem> = Vec::new();
    for p in store
        .list_properties(&PropertyFilter::default(), &property_sort, recent)
        .await?
        .items
    {
        recent_activity.push(ActivityItem {
            kind: "property",
            id: p.id,
            title: p.title,
            updated_at: p.updated_at,
        });
    }
    for post in store
        .list_posts(&BlogFilter::default(), &blog_sort, recent)
        .await?
        .items
    {
        recent_activity.push(ActivityItem {
            kind: "post",
            id: post.id,
            title: post.title,
            updated_at: post.updated_at,
        });
    }
    for user in store
        .list_users(&UserFilter::default(), &newest_first(USER_SORT), recent)
        .await?
        .items
    {
        recent_activity.push(ActivityItem {
            kind: "user",
            id: user.id,
            title: user.username,
            updated_at: user.updated_at,
        });
    }
    recent_activity.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    Ok(DashboardSummary {
        counts: DashboardCounts {
            properties,
            active_properties,
            featured_properties,
            team_members,
            blog_posts,
            published_posts,
            draft_posts,
            hero_slides,
            users,
        },
        recent_activity,
    })
}

/// GET /api/admin/dashboard
pub async fn summary(State(state): State<AppState>) -> ApiResult<Json<DashboardSummary>> {
    Ok(Json(build_summary(state.store.as_ref()).await?))
}
