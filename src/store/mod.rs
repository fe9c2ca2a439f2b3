/*!
 * Storage
 * The persistence seam shared by the Postgres and in-memory backends
 */
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::models::{
    BlogCategory, BlogPost, HeroSlide, Property, PropertyStatus, PropertyType, Setting,
    SettingCategory, TeamMember, User,
};
use crate::query::filters::{BlogFilter, HeroFilter, PropertyFilter, TeamFilter, UserFilter};
use crate::query::{PageWindow, SortSpec};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique key is already taken.
    #[error("{0}")]
    Conflict(String),
    /// The write would leave no active admin.
    #[error("{0}")]
    LastAdmin(&'static str),
    /// A stored row could not be turned back into a model.
    #[error("corrupt record: {0}")]
    Decode(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub const LAST_ADMIN_DEMOTE: &str = "Cannot demote or deactivate the last active admin";
pub const LAST_ADMIN_DELETE: &str = "Cannot delete the last active admin";

/// One page of rows plus the size of the whole filtered set.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyStats {
    pub total_properties: u64,
    pub featured_properties: u64,
    pub average_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub by_type: Vec<Bucket<PropertyType>>,
    pub by_status: Vec<Bucket<PropertyStatus>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket<K> {
    #[serde(rename = "_id")]
    pub key: K,
    pub count: u64,
}

impl PropertyStats {
    /// Aggregate over active listings.
    pub fn from_properties<'a>(properties: impl IntoIterator<Item = &'a Property>) -> Self {
        let mut stats = PropertyStats::default();
        let mut sum = 0.0;
        for p in properties.into_iter().filter(|p| p.is_active) {
            if stats.total_properties == 0 {
                stats.min_price = p.price;
                stats.max_price = p.price;
            } else {
                stats.min_price = stats.min_price.min(p.price);
                stats.max_price = stats.max_price.max(p.price);
            }
            stats.total_properties += 1;
            if p.is_featured {
                stats.featured_properties += 1;
            }
            sum += p.price;
            bump(&mut stats.by_type, p.property_type);
            bump(&mut stats.by_status, p.status);
        }
        if stats.total_properties > 0 {
            stats.average_price = sum / stats.total_properties as f64;
        }
        stats.by_type.sort_by(|a, b| b.count.cmp(&a.count));
        stats.by_status.sort_by(|a, b| b.count.cmp(&a.count));
        stats
    }
}

fn bump<K: PartialEq>(buckets: &mut Vec<Bucket<K>>, key: K) {
    match buckets.iter_mut().find(|b| b.key == key) {
        Some(bucket) => bucket.count += 1,
        None => buckets.push(Bucket { key, count: 1 }),
    }
}

/// Persistence operations for every entity.
///
/// Updates are whole-record writes (last write wins). Deletes return the
/// removed record so callers can clean up its files.
#[async_trait]
pub trait Store: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> StoreResult<()>;

    // Users
    async fn list_users(
        &self,
        filter: &UserFilter,
        sort: &SortSpec,
        window: PageWindow,
    ) -> StoreResult<Page<User>>;
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    /// Lookup by username or email, case-insensitively.
    async fn find_user_by_login(&self, login: &str) -> StoreResult<Option<User>>;
    async fn users_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<User>>;
    async fn insert_user(&self, user: &User) -> StoreResult<()>;
    /// Both refuse, with [`StoreError::LastAdmin`], a write that would leave
    /// no active admin. The check and the write are one atomic step.
    async fn update_user(&self, user: &User) -> StoreResult<bool>;
    async fn delete_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    // Properties
    async fn list_properties(
        &self,
        filter: &PropertyFilter,
        sort: &SortSpec,
        window: PageWindow,
    ) -> StoreResult<Page<Property>>;
    async fn get_property(&self, id: Uuid) -> StoreResult<Option<Property>>;
    async fn insert_property(&self, property: &Property) -> StoreResult<()>;
    async fn update_property(&self, property: &Property) -> StoreResult<bool>;
    async fn delete_property(&self, id: Uuid) -> StoreResult<Option<Property>>;
    /// Atomically add one view to an active listing and return it.
    async fn increment_property_views(&self, id: Uuid) -> StoreResult<Option<Property>>;
    async fn property_stats(&self) -> StoreResult<PropertyStats>;

    // Team
    async fn list_team(
        &self,
        filter: &TeamFilter,
        sort: &SortSpec,
        window: PageWindow,
    ) -> StoreResult<Page<TeamMember>>;
    async fn get_team_member(&self, id: Uuid) -> StoreResult<Option<TeamMember>>;
    async fn insert_team_member(&self, member: &TeamMember) -> StoreResult<()>;
    async fn update_team_member(&self, member: &TeamMember) -> StoreResult<bool>;
    async fn delete_team_member(&self, id: Uuid) -> StoreResult<Option<TeamMember>>;

    // Blog
    async fn list_posts(
        &self,
        filter: &BlogFilter,
        sort: &SortSpec,
        window: PageWindow,
    ) -> StoreResult<Page<BlogPost>>;
    async fn get_post(&self, id: Uuid) -> StoreResult<Option<BlogPost>>;
    async fn get_post_by_slug(&self, slug: &str) -> StoreResult<Option<BlogPost>>;
    async fn slug_taken(&self, slug: &str, exclude: Option<Uuid>) -> StoreResult<bool>;
    async fn insert_post(&self, post: &BlogPost) -> StoreResult<()>;
    async fn update_post(&self, post: &BlogPost) -> StoreResult<bool>;
    async fn delete_post(&self, id: Uuid) -> StoreResult<Option<BlogPost>>;
    /// Atomically add one view to a published post and return it.
    async fn increment_post_views(&self, slug: &str) -> StoreResult<Option<BlogPost>>;
    /// Published post counts per category, largest first.
    async fn blog_categories(&self) -> StoreResult<Vec<Bucket<BlogCategory>>>;
    /// Published post counts per tag, largest first.
    async fn blog_tags(&self) -> StoreResult<Vec<Bucket<String>>>;

    // Hero slides
    async fn list_hero(
        &self,
        filter: &HeroFilter,
        sort: &SortSpec,
        window: PageWindow,
    ) -> StoreResult<Page<HeroSlide>>;
    async fn get_hero(&self, id: Uuid) -> StoreResult<Option<HeroSlide>>;
    async fn insert_hero(&self, slide: &HeroSlide) -> StoreResult<()>;
    async fn update_hero(&self, slide: &HeroSlide) -> StoreResult<bool>;
    async fn delete_hero(&self, id: Uuid) -> StoreResult<Option<HeroSlide>>;

    // Settings
    /// Settings in the given categories (all when `None`), by category then key.
    async fn list_settings(
        &self,
        categories: Option<&[SettingCategory]>,
    ) -> StoreResult<Vec<Setting>>;
    async fn get_setting(&self, key: &str) -> StoreResult<Option<Setting>>;
    /// Insert or replace by key. An existing row keeps its `created_at`.
    async fn upsert_setting(&self, setting: &Setting) -> StoreResult<Setting>;
    async fn delete_setting(&self, key: &str) -> StoreResult<bool>;
}
