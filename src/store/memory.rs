//! In-memory backend.
//!
//! Used when no database is configured and by the test suite. All tables sit
//! behind one lock so uniqueness checks and writes are atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    Bucket, Page, PropertyStats, Store, StoreError, StoreResult, LAST_ADMIN_DELETE,
    LAST_ADMIN_DEMOTE,
};
use crate::db::models::{
    BlogCategory, BlogPost, BlogStatus, HeroSlide, Property, Setting, SettingCategory, TeamMember,
    User,
};
use crate::query::filters::{BlogFilter, HeroFilter, PropertyFilter, TeamFilter, UserFilter};
use crate::query::{PageWindow, SortSpec};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    properties: HashMap<Uuid, Property>,
    team: HashMap<Uuid, TeamMember>,
    posts: HashMap<Uuid, BlogPost>,
    hero: HashMap<Uuid, HeroSlide>,
    settings: BTreeMap<String, Setting>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// Sorting
// ============================================================================

#[derive(Debug, Clone, PartialEq, PartialOrd)]
enum SortKey {
    Int(i64),
    Num(f64),
    Text(String),
    Time(Option<DateTime<Utc>>),
}

trait Sortable: Clone {
    fn id(&self) -> Uuid;
    fn created_at(&self) -> DateTime<Utc>;
    fn sort_key(&self, field: &str) -> SortKey;
}

impl Sortable for User {
    fn id(&self) -> Uuid {
        self.id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn sort_key(&self, field: &str) -> SortKey {
        match field {
            "username" => SortKey::Text(self.username.clone()),
            "lastLogin" => SortKey::Time(self.last_login),
            "updatedAt" => SortKey::Time(Some(self.updated_at)),
            _ => SortKey::Time(Some(self.created_at)),
        }
    }
}

impl Sortable for Property {
    fn id(&self) -> Uuid {
        self.id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn sort_key(&self, field: &str) -> SortKey {
        match field {
            "price" => SortKey::Num(self.price),
            "views" => SortKey::Int(self.views),
            "title" => SortKey::Text(self.title.to_lowercase()),
            "updatedAt" => SortKey::Time(Some(self.updated_at)),
            _ => SortKey::Time(Some(self.created_at)),
        }
    }
}

impl Sortable for TeamMember {
    fn id(&self) -> Uuid {
        self.id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn sort_key(&self, field: &str) -> SortKey {
        match field {
            "order" => SortKey::Int(self.order as i64),
            "lastName" => SortKey::Text(self.last_name.to_lowercase()),
            "updatedAt" => SortKey::Time(Some(self.updated_at)),
            _ => SortKey::Time(Some(self.created_at)),
        }
    }
}

impl Sortable for BlogPost {
    fn id(&self) -> Uuid {
        self.id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn sort_key(&self, field: &str) -> SortKey {
        match field {
            "publishedAt" => SortKey::Time(self.published_at),
            "views" => SortKey::Int(self.views),
            "title" => SortKey::Text(self.title.to_lowercase()),
            "updatedAt" => SortKey::Time(Some(self.updated_at)),
            _ => SortKey::Time(Some(self.created_at)),
        }
    }
}

impl Sortable for HeroSlide {
    fn id(&self) -> Uuid {
        self.id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn sort_key(&self, field: &str) -> SortKey {
        match field {
            "order" => SortKey::Int(self.order as i64),
            "updatedAt" => SortKey::Time(Some(self.updated_at)),
            _ => SortKey::Time(Some(self.created_at)),
        }
    }
}

/// Sort by the requested field, newest-first then id as tie-breakers, and
/// cut out the window.
fn select<'a, T: Sortable + 'a>(
    rows: impl Iterator<Item = &'a T>,
    keep: impl Fn(&T) -> bool,
    sort: &SortSpec,
    window: PageWindow,
) -> Page<T> {
    let mut rows: Vec<T> = rows.filter(|r| keep(*r)).cloned().collect();
    rows.sort_by(|a, b| {
        let primary = a
            .sort_key(sort.field)
            .partial_cmp(&b.sort_key(sort.field))
            .unwrap_or(Ordering::Equal);
        let primary = if sort.descending {
            primary.reverse()
        } else {
            primary
        };
        primary
            .then_with(|| b.created_at().cmp(&a.created_at()))
            .then_with(|| a.id().cmp(&b.id()))
    });

    let total = rows.len() as u64;
    let skip = usize::try_from(window.skip).unwrap_or(usize::MAX);
    let items = match window.limit {
        Some(limit) => rows
            .into_iter()
            .skip(skip)
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect(),
        None => rows.into_iter().skip(skip).collect(),
    };
    Page { items, total }
}

fn counted<K: Ord>(counts: BTreeMap<K, u64>) -> Vec<Bucket<K>> {
    let mut buckets: Vec<Bucket<K>> = counts
        .into_iter()
        .map(|(key, count)| Bucket { key, count })
        .collect();
    buckets.sort_by(|a, b| b.count.cmp(&a.count));
    buckets
}

fn replace<T>(table: &mut HashMap<Uuid, T>, id: Uuid, row: T) -> bool {
    match table.get_mut(&id) {
        Some(slot) => {
            *slot = row;
            true
        }
        None => false,
    }
}

fn user_conflict(tables: &Tables, user: &User) -> Option<StoreError> {
    tables
        .users
        .values()
        .filter(|u| u.id != user.id)
        .any(|u| u.username == user.username || u.email == user.email)
        .then(|| StoreError::Conflict("Username or email already exists".to_string()))
}

/// `id` is the only active admin left.
fn is_sole_active_admin(tables: &Tables, id: Uuid) -> bool {
    let mut admins = tables.users.values().filter(|u| u.is_active_admin());
    matches!((admins.next(), admins.next()), (Some(only), None) if only.id == id)
}

fn slug_conflict(tables: &Tables, post: &BlogPost) -> Option<StoreError> {
    tables
        .posts
        .values()
        .any(|p| p.id != post.id && p.slug == post.slug)
        .then(|| StoreError::Conflict("A post with this slug already exists".to_string()))
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    // ------------------------------------------------------------------ users

    async fn list_users(
        &self,
        filter: &UserFilter,
        sort: &SortSpec,
        window: PageWindow,
    ) -> StoreResult<Page<User>> {
        let tables = self.tables.read().await;
        Ok(select(
            tables.users.values(),
            |u| filter.matches(u),
            sort,
            window,
        ))
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_login(&self, login: &str) -> StoreResult<Option<User>> {
        let login = login.trim().to_lowercase();
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.username == login || u.email == login)
            .cloned())
    }

    async fn users_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<User>> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.users.get(id).cloned())
            .collect())
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if let Some(err) = user_conflict(&tables, user) {
            return Err(err);
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        if let Some(err) = user_conflict(&tables, user) {
            return Err(err);
        }
        if !user.is_active_admin() && is_sole_active_admin(&tables, user.id) {
            return Err(StoreError::LastAdmin(LAST_ADMIN_DEMOTE));
        }
        Ok(replace(&mut tables.users, user.id, user.clone()))
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let mut tables = self.tables.write().await;
        if is_sole_active_admin(&tables, id) {
            return Err(StoreError::LastAdmin(LAST_ADMIN_DELETE));
        }
        Ok(tables.users.remove(&id))
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(user) = self.tables.write().await.users.get_mut(&id) {
            user.last_login = Some(at);
        }
        Ok(())
    }

    // ------------------------------------------------------------- properties

    async fn list_properties(
        &self,
        filter: &PropertyFilter,
        sort: &SortSpec,
        window: PageWindow,
    ) -> StoreResult<Page<Property>> {
        let tables = self.tables.read().await;
        Ok(select(
            tables.properties.values(),
            |p| filter.matches(p),
            sort,
            window,
        ))
    }

    async fn get_property(&self, id: Uuid) -> StoreResult<Option<Property>> {
        Ok(self.tables.read().await.properties.get(&id).cloned())
    }

    async fn insert_property(&self, property: &Property) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .properties
            .insert(property.id, property.clone());
        Ok(())
    }

    async fn update_property(&self, property: &Property) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(replace(&mut tables.properties, property.id, property.clone()))
    }

    async fn delete_property(&self, id: Uuid) -> StoreResult<Option<Property>> {
        Ok(self.tables.write().await.properties.remove(&id))
    }

    async fn increment_property_views(&self, id: Uuid) -> StoreResult<Option<Property>> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .properties
            .get_mut(&id)
            .filter(|p| p.is_active)
            .map(|p| {
                p.views += 1;
                p.clone()
            }))
    }

    async fn property_stats(&self) -> StoreResult<PropertyStats> {
        let tables = self.tables.read().await;
        Ok(PropertyStats::from_properties(tables.properties.values()))
    }

    // ------------------------------------------------------------------- team

    async fn list_team(
        &self,
        filter: &TeamFilter,
        sort: &SortSpec,
        window: PageWindow,
    ) -> StoreResult<Page<TeamMember>> {
        let tables = self.tables.read().await;
        Ok(select(
            tables.team.values(),
            |m| filter.matches(m),
            sort,
            window,
        ))
    }

    async fn get_team_member(&self, id: Uuid) -> StoreResult<Option<TeamMember>> {
        Ok(self.tables.read().await.team.get(&id).cloned())
    }

    async fn insert_team_member(&self, member: &TeamMember) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .team
            .insert(member.id, member.clone());
        Ok(())
    }

    async fn update_team_member(&self, member: &TeamMember) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(replace(&mut tables.team, member.id, member.clone()))
    }

    async fn delete_team_member(&self, id: Uuid) -> StoreResult<Option<TeamMember>> {
        Ok(self.tables.write().await.team.remove(&id))
    }

    // ------------------------------------------------------------------- blog

    async fn list_posts(
        &self,
        filter: &BlogFilter,
        sort: &SortSpec,
        window: PageWindow,
    ) -> StoreResult<Page<BlogPost>> {
        let tables = self.tables.read().await;
        Ok(select(
            tables.posts.values(),
            |p| filter.matches(p),
            sort,
            window,
        ))
    }

    async fn get_post(&self, id: Uuid) -> StoreResult<Option<BlogPost>> {
        Ok(self.tables.read().await.posts.get(&id).cloned())
    }

    async fn get_post_by_slug(&self, slug: &str) -> StoreResult<Option<BlogPost>> {
        let tables = self.tables.read().await;
        Ok(tables.posts.values().find(|p| p.slug == slug).cloned())
    }

    async fn slug_taken(&self, slug: &str, exclude: Option<Uuid>) -> StoreResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .posts
            .values()
            .any(|p| p.slug == slug && Some(p.id) != exclude))
    }

    async fn insert_post(&self, post: &BlogPost) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if let Some(err) = slug_conflict(&tables, post) {
            return Err(err);
        }
        tables.posts.insert(post.id, post.clone());
        Ok(())
    }

    async fn update_post(&self, post: &BlogPost) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        if let Some(err) = slug_conflict(&tables, post) {
            return Err(err);
        }
        Ok(replace(&mut tables.posts, post.id, post.clone()))
    }

    async fn delete_post(&self, id: Uuid) -> StoreResult<Option<BlogPost>> {
        Ok(self.tables.write().await.posts.remove(&id))
    }

    async fn increment_post_views(&self, slug: &str) -> StoreResult<Option<BlogPost>> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .posts
            .values_mut()
            .find(|p| p.slug == slug && p.status == BlogStatus::Published)
            .map(|p| {
                p.views += 1;
                p.clone()
            }))
    }

    async fn blog_categories(&self) -> StoreResult<Vec<Bucket<BlogCategory>>> {
        let tables = self.tables.read().await;
        let mut counts: BTreeMap<&'static str, (BlogCategory, u64)> = BTreeMap::new();
        for post in tables.posts.values().filter(|p| p.is_public()) {
            counts.entry(post.category.as_str()).or_insert((post.category, 0)).1 += 1;
        }
        let mut buckets: Vec<Bucket<BlogCategory>> = counts
            .into_values()
            .map(|(key, count)| Bucket { key, count })
            .collect();
        buckets.sort_by(|a, b| b.count.cmp(&a.count));
        Ok(buckets)
    }

    async fn blog_tags(&self) -> StoreResult<Vec<Bucket<String>>> {
        let tables = self.tables.read().await;
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for post in tables.posts.values().filter(|p| p.is_public()) {
            for tag in &post.tags {
                *counts.entry(tag.clone()).or_default() += 1;
            }
        }
        Ok(counted(counts))
    }

    // ------------------------------------------------------------------- hero

    async fn list_hero(
        &self,
        filter: &HeroFilter,
        sort: &SortSpec,
        window: PageWindow,
    ) -> StoreResult<Page<HeroSlide>> {
        let tables = self.tables.read().await;
        Ok(select(
            tables.hero.values(),
            |s| filter.matches(s),
            sort,
            window,
        ))
    }

    async fn get_hero(&self, id: Uuid) -> StoreResult<Option<HeroSlide>> {
        Ok(self.tables.read().await.hero.get(&id).cloned())
    }

    async fn insert_hero(&self, slide: &HeroSlide) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .hero
            .insert(slide.id, slide.clone());
        Ok(())
    }

    async fn update_hero(&self, slide: &HeroSlide) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(replace(&mut tables.hero, slide.id, slide.clone()))
    }

    async fn delete_hero(&self, id: Uuid) -> StoreResult<Option<HeroSlide>> {
        Ok(self.tables.write().await.hero.remove(&id))
    }

    // --------------------------------------------------------------- settings

    async fn list_settings(
        &self,
        categories: Option<&[SettingCategory]>,
    ) -> StoreResult<Vec<Setting>> {
        let tables = self.tables.read().await;
        let mut settings: Vec<Setting> = tables
            .settings
            .values()
            .filter(|s| categories.map_or(true, |cats| cats.contains(&s.category)))
            .cloned()
            .collect();
        settings.sort_by(|a, b| {
            a.category
                .as_str()
                .cmp(b.category.as_str())
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(settings)
    }

    async fn get_setting(&self, key: &str) -> StoreResult<Option<Setting>> {
        Ok(self.tables.read().await.settings.get(key).cloned())
    }

    async fn upsert_setting(&self, setting: &Setting) -> StoreResult<Setting> {
        let mut tables = self.tables.write().await;
        let mut row = setting.clone();
        if let Some(existing) = tables.settings.get(&setting.key) {
            row.created_at = existing.created_at;
        }
        tables.settings.insert(row.key.clone(), row.clone());
        Ok(row)
    }

    async fn delete_setting(&self, key: &str) -> StoreResult<bool> {
        Ok(self.tables.write().await.settings.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Address, Features, PropertyStatus, PropertyType, Role, SettingValue};
    use crate::query::filters::{BLOG_SORT, PROPERTY_SORT, USER_SORT};
    use chrono::Duration;

    fn user(username: &str, role: Role) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password_hash: String::new(),
            first_name: "First".to_string(),
            last_name: "Last".to_string(),
            role,
            is_active: true,
            last_login: None,
            avatar: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn listing(title: &str, price: f64, age_minutes: i64) -> Property {
        let at = Utc::now() - Duration::minutes(age_minutes);
        Property {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: String::new(),
            price,
            property_type: PropertyType::House,
            status: PropertyStatus::ForSale,
            address: Address::default(),
            coordinates: None,
            features: Features::default(),
            amenities: vec![],
            images: vec![],
            agent_id: None,
            is_active: true,
            is_featured: false,
            views: 0,
            created_at: at,
            updated_at: at,
        }
    }

    fn post(slug: &str, status: BlogStatus, tags: &[&str]) -> BlogPost {
        let now = Utc::now();
        BlogPost {
            id: Uuid::new_v4(),
            title: slug.to_string(),
            slug: slug.to_string(),
            excerpt: String::new(),
            content: String::new(),
            featured_image: None,
            author_id: None,
            category: BlogCategory::BuyingTips,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            status,
            published_at: None,
            views: 0,
            is_featured: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let store = MemoryStore::new();
        store.insert_user(&user("jane", Role::Agent)).await.unwrap();

        let mut dup = user("jane", Role::Admin);
        dup.email = "other@example.com".to_string();
        let err = store.insert_user(&dup).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_find_user_by_login_accepts_email_or_username() {
        let store = MemoryStore::new();
        let jane = user("jane", Role::Agent);
        store.insert_user(&jane).await.unwrap();

        let by_name = store.find_user_by_login("JANE").await.unwrap().unwrap();
        assert_eq!(by_name.id, jane.id);
        let by_email = store
            .find_user_by_login("Jane@Example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.id, jane.id);
        assert!(store.find_user_by_login("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_properties_sorts_and_windows() {
        let store = MemoryStore::new();
        for (i, price) in [300.0, 100.0, 200.0, 400.0, 500.0].iter().enumerate() {
            store
                .insert_property(&listing(&format!("p{i}"), *price, i as i64))
                .await
                .unwrap();
        }

        let sort = SortSpec::parse(Some("price"), PROPERTY_SORT, "-createdAt");
        let page = store
            .list_properties(
                &PropertyFilter::default(),
                &sort,
                PageWindow {
                    skip: 1,
                    limit: Some(2),
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        let prices: Vec<f64> = page.items.iter().map(|p| p.price).collect();
        assert_eq!(prices, vec![200.0, 300.0]);

        let newest = SortSpec::parse(None, PROPERTY_SORT, "-createdAt");
        let page = store
            .list_properties(&PropertyFilter::default(), &newest, PageWindow::first(1))
            .await
            .unwrap();
        assert_eq!(page.items[0].title, "p0");
    }

    #[tokio::test]
    async fn test_count_only_window_returns_total() {
        let store = MemoryStore::new();
        store.insert_property(&listing("a", 1.0, 0)).await.unwrap();
        store.insert_property(&listing("b", 1.0, 0)).await.unwrap();
        let sort = SortSpec::parse(None, PROPERTY_SORT, "-createdAt");
        let page = store
            .list_properties(&PropertyFilter::default(), &sort, PageWindow::count_only())
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_views_increment_only_active() {
        let store = MemoryStore::new();
        let mut p = listing("a", 1.0, 0);
        store.insert_property(&p).await.unwrap();
        for _ in 0..3 {
            store.increment_property_views(p.id).await.unwrap();
        }
        assert_eq!(store.get_property(p.id).await.unwrap().unwrap().views, 3);

        p.is_active = false;
        store.update_property(&p).await.unwrap();
        assert!(store.increment_property_views(p.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_slug_uniqueness_enforced_on_insert_and_update() {
        let store = MemoryStore::new();
        store
            .insert_post(&post("first", BlogStatus::Draft, &[]))
            .await
            .unwrap();
        let err = store
            .insert_post(&post("first", BlogStatus::Draft, &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let mut second = post("second", BlogStatus::Draft, &[]);
        store.insert_post(&second).await.unwrap();
        assert!(store.slug_taken("first", Some(second.id)).await.unwrap());
        assert!(!store.slug_taken("second", Some(second.id)).await.unwrap());

        second.slug = "first".to_string();
        assert!(store.update_post(&second).await.is_err());
    }

    #[tokio::test]
    async fn test_tag_counts_cover_published_posts() {
        let store = MemoryStore::new();
        for p in [
            post("a", BlogStatus::Published, &["market", "tips"]),
            post("b", BlogStatus::Published, &["market"]),
            post("c", BlogStatus::Draft, &["market", "secret"]),
        ] {
            store.insert_post(&p).await.unwrap();
        }
        let tags = store.blog_tags().await.unwrap();
        assert_eq!(
            tags[0],
            Bucket {
                key: "market".to_string(),
                count: 2
            }
        );
        assert!(tags.iter().all(|b| b.key != "secret"));

        let cats = store.blog_categories().await.unwrap();
        assert_eq!(cats.len(), 1);
        assert_eq!(cats[0].count, 2);

        let sort = SortSpec::parse(None, BLOG_SORT, "-createdAt");
        let page = store
            .list_posts(&BlogFilter::published(), &sort, PageWindow::all())
            .await
            .unwrap();
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn test_upsert_setting_keeps_one_row_per_key() {
        let store = MemoryStore::new();
        let created = Utc::now() - Duration::days(3);
        let mut setting = Setting {
            key: "site_name".to_string(),
            value: SettingValue::String("Acme Realty".to_string()),
            description: String::new(),
            category: SettingCategory::General,
            is_editable: true,
            created_at: created,
            updated_at: created,
        };
        store.upsert_setting(&setting).await.unwrap();

        setting.value = SettingValue::String("Acme Homes".to_string());
        setting.created_at = Utc::now();
        let saved = store.upsert_setting(&setting).await.unwrap();

        assert_eq!(saved.created_at, created);
        let all = store.list_settings(None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].value, SettingValue::String("Acme Homes".to_string()));
    }

    #[tokio::test]
    async fn test_active_admin_count_via_filter() {
        let store = MemoryStore::new();
        store.insert_user(&user("root", Role::Admin)).await.unwrap();
        let mut off = user("old", Role::Admin);
        off.is_active = false;
        store.insert_user(&off).await.unwrap();
        store.insert_user(&user("agent", Role::Agent)).await.unwrap();

        let sort = SortSpec::parse(None, USER_SORT, "-createdAt");
        let page = store
            .list_users(&UserFilter::active_admins(), &sort, PageWindow::count_only())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn test_last_active_admin_survives_demotion_and_delete() {
        let store = MemoryStore::new();
        let root = user("root", Role::Admin);
        store.insert_user(&root).await.unwrap();

        let mut demoted = root.clone();
        demoted.role = Role::Agent;
        let err = store.update_user(&demoted).await.unwrap_err();
        assert!(matches!(err, StoreError::LastAdmin(_)));
        let mut disabled = root.clone();
        disabled.is_active = false;
        assert!(store.update_user(&disabled).await.is_err());
        assert!(matches!(
            store.delete_user(root.id).await,
            Err(StoreError::LastAdmin(_))
        ));
        assert!(store.get_user(root.id).await.unwrap().unwrap().is_active_admin());

        // Other edits to the sole admin still go through.
        let mut renamed = root.clone();
        renamed.first_name = "Rita".into();
        assert!(store.update_user(&renamed).await.unwrap());

        let deputy = user("deputy", Role::Admin);
        store.insert_user(&deputy).await.unwrap();
        assert!(store.delete_user(root.id).await.unwrap().is_some());
        assert!(matches!(
            store.delete_user(deputy.id).await,
            Err(StoreError::LastAdmin(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_admin_deletes_keep_one_admin() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let a = user("alpha", Role::Admin);
        let b = user("bravo", Role::Admin);
        store.insert_user(&a).await.unwrap();
        store.insert_user(&b).await.unwrap();

        let (left, right) = tokio::join!(
            {
                let store = store.clone();
                tokio::spawn(async move { store.delete_user(b.id).await })
            },
            {
                let store = store.clone();
                tokio::spawn(async move { store.delete_user(a.id).await })
            }
        );
        let outcomes = [left.unwrap(), right.unwrap()];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(outcomes.iter().filter(|r| r.is_err()).count(), 1);

        let sort = SortSpec::parse(None, USER_SORT, "-createdAt");
        let page = store
            .list_users(&UserFilter::active_admins(), &sort, PageWindow::count_only())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }
}
