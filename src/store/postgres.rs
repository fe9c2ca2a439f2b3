//! Postgres backend (sqlx).
//!
//! Nested value objects (address parts aside) are stored as JSONB; closed
//! enums are stored as their text form and parsed on the way out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, types::Json, FromRow, PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::{
    Bucket, Page, PropertyStats, Store, StoreError, StoreResult, LAST_ADMIN_DELETE,
    LAST_ADMIN_DEMOTE,
};
use crate::db::models::{
    Address, BlogCategory, BlogPost, Certification, ContactInfo, Coordinates, CtaButton,
    Experience, Features, HeroSlide, ImageRef, Property, PropertyImage, Role, Setting,
    SettingCategory, SettingValue, SocialLinks, TeamMember, User,
};
use crate::query::filters::{BlogFilter, HeroFilter, PropertyFilter, TeamFilter, UserFilter};
use crate::query::{PageWindow, SortSpec};

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the filtered COUNT and, unless only the total is wanted, the
    /// ordered and windowed SELECT.
    async fn fetch_page<R, T>(
        &self,
        table: &str,
        push_filter: impl Fn(&mut Conditions<'_>),
        sort: &SortSpec,
        window: PageWindow,
    ) -> StoreResult<Page<T>>
    where
        R: for<'r> FromRow<'r, PgRow> + Send + Unpin,
        T: TryFrom<R, Error = StoreError> + Send,
    {
        let mut count = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM {table}"));
        push_filter(&mut Conditions::new(&mut count));
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;
        let total = u64::try_from(total).unwrap_or(0);

        if window.limit == Some(0) {
            return Ok(Page {
                items: Vec::new(),
                total,
            });
        }

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT * FROM {table}"));
        push_filter(&mut Conditions::new(&mut select));
        select.push(format!(
            " ORDER BY {} {} NULLS LAST, created_at DESC, id",
            sort.column,
            if sort.descending { "DESC" } else { "ASC" }
        ));
        if let Some(limit) = window.limit {
            select
                .push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        select
            .push(" OFFSET ")
            .push_bind(i64::try_from(window.skip).unwrap_or(i64::MAX));

        let rows: Vec<R> = select.build_query_as().fetch_all(&self.pool).await?;
        let items = rows
            .into_iter()
            .map(T::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page { items, total })
    }
}

// ============================================================================
// WHERE clause construction
// ============================================================================

/// Pushes ` WHERE ` before the first condition and ` AND ` before the rest.
struct Conditions<'b> {
    qb: &'b mut QueryBuilder<'static, Postgres>,
    started: bool,
}

impl<'b> Conditions<'b> {
    fn new(qb: &'b mut QueryBuilder<'static, Postgres>) -> Self {
        Self { qb, started: false }
    }

    fn and(&mut self) -> &mut QueryBuilder<'static, Postgres> {
        self.qb.push(if self.started { " AND " } else { " WHERE " });
        self.started = true;
        &mut *self.qb
    }

    /// `(col1 ILIKE $p OR col2 ILIKE $p ...)`
    fn any_ilike(&mut self, columns: &[&str], needle: &str) {
        let pattern = like_pattern(needle);
        let qb = self.and();
        qb.push("(");
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push(*column).push(" ILIKE ").push_bind(pattern.clone());
        }
        qb.push(")");
    }
}

/// `%needle%` with LIKE wildcards escaped.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn push_user_filter(c: &mut Conditions<'_>, f: &UserFilter) {
    if let Some(role) = f.role {
        c.and().push("role = ").push_bind(role.as_str());
    }
    if let Some(active) = f.active {
        c.and().push("is_active = ").push_bind(active);
    }
    if let Some(q) = &f.search {
        c.any_ilike(&["username", "email", "first_name", "last_name"], q);
    }
}

fn push_property_filter(c: &mut Conditions<'_>, f: &PropertyFilter) {
    if let Some(t) = f.property_type {
        c.and().push("property_type = ").push_bind(t.as_str());
    }
    if let Some(s) = f.status {
        c.and().push("status = ").push_bind(s.as_str());
    }
    if let Some(min) = f.min_price {
        c.and().push("price >= ").push_bind(min);
    }
    if let Some(max) = f.max_price {
        c.and().push("price <= ").push_bind(max);
    }
    if let Some(n) = f.bedrooms {
        c.and()
            .push("(features->>'bedrooms')::BIGINT >= ")
            .push_bind(i64::from(n));
    }
    if let Some(n) = f.bathrooms {
        c.and()
            .push("(features->>'bathrooms')::FLOAT8 >= ")
            .push_bind(n);
    }
    if let Some(city) = &f.city {
        c.and()
            .push("city ILIKE ")
            .push_bind(like_pattern(city));
    }
    if let Some(state) = &f.state {
        c.and()
            .push("state ILIKE ")
            .push_bind(like_pattern(state));
    }
    if let Some(featured) = f.featured {
        c.and().push("is_featured = ").push_bind(featured);
    }
    if let Some(active) = f.active {
        c.and().push("is_active = ").push_bind(active);
    }
    if let Some(agent) = f.agent_id {
        c.and().push("agent_id = ").push_bind(agent);
    }
    if let Some(id) = f.exclude_id {
        c.and().push("id <> ").push_bind(id);
    }
    if let Some(q) = &f.search {
        c.any_ilike(&["title", "description", "street", "city", "state"], q);
    }
}

fn push_team_filter(c: &mut Conditions<'_>, f: &TeamFilter) {
    if let Some(active) = f.active {
        c.and().push("is_active = ").push_bind(active);
    }
    if let Some(s) = &f.specialty {
        c.and()
            .push("EXISTS (SELECT 1 FROM unnest(specialties) x WHERE lower(x) = lower(")
            .push_bind(s.clone())
            .push("))");
    }
    if let Some(l) = &f.language {
        c.and()
            .push("EXISTS (SELECT 1 FROM unnest(languages) x WHERE lower(x) = lower(")
            .push_bind(l.clone())
            .push("))");
    }
    if let Some(q) = &f.search {
        c.any_ilike(&["first_name", "last_name", "position"], q);
    }
}

fn push_blog_filter(c: &mut Conditions<'_>, f: &BlogFilter) {
    if let Some(status) = f.status {
        c.and().push("status = ").push_bind(status.as_str());
    }
    if let Some(category) = f.category {
        c.and().push("category = ").push_bind(category.as_str());
    }
    if let Some(tag) = &f.tag {
        c.and()
            .push("EXISTS (SELECT 1 FROM unnest(tags) x WHERE lower(x) = lower(")
            .push_bind(tag.clone())
            .push("))");
    }
    if let Some(featured) = f.featured {
        c.and().push("is_featured = ").push_bind(featured);
    }
    if let Some(author) = f.author_id {
        c.and().push("author_id = ").push_bind(author);
    }
    if let Some(id) = f.exclude_id {
        c.and().push("id <> ").push_bind(id);
    }
    if let Some(q) = &f.search {
        c.any_ilike(
            &["title", "excerpt", "content", "array_to_string(tags, ' ')"],
            q,
        );
    }
}

fn push_hero_filter(c: &mut Conditions<'_>, f: &HeroFilter) {
    if let Some(active) = f.active {
        c.and().push("is_active = ").push_bind(active);
    }
    if let Some(now) = f.current_at {
        c.and()
            .push("(start_date IS NULL OR start_date <= ")
            .push_bind(now)
            .push(")");
        c.and()
            .push("(end_date IS NULL OR end_date >= ")
            .push_bind(now)
            .push(")");
    }
}

fn conflict_or(err: sqlx::Error, message: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Conflict(message.to_string());
        }
    }
    StoreError::Database(err)
}

/// Lock the active admin rows until `tx` ends and report whether `id` is
/// the only one. A concurrent caller blocks on the same rows, then sees
/// the committed result.
async fn is_sole_active_admin(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> StoreResult<bool> {
    let admins: Vec<Uuid> =
        sqlx::query_scalar("SELECT id FROM users WHERE role = $1 AND is_active FOR UPDATE")
            .bind(Role::Admin.as_str())
            .fetch_all(&mut **tx)
            .await?;
    Ok(admins.len() == 1 && admins[0] == id)
}

fn parse_text<T: std::str::FromStr<Err = String>>(column: &str, raw: &str) -> StoreResult<T> {
    raw.parse()
        .map_err(|e| StoreError::Decode(format!("{column} '{raw}': {e}")))
}

fn count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

// ============================================================================
// Rows
// ============================================================================

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    first_name: String,
    last_name: String,
    role: String,
    is_active: bool,
    last_login: Option<DateTime<Utc>>,
    avatar: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(r: UserRow) -> StoreResult<Self> {
        Ok(User {
            role: parse_text("role", &r.role)?,
            id: r.id,
            username: r.username,
            email: r.email,
            password_hash: r.password_hash,
            first_name: r.first_name,
            last_name: r.last_name,
            is_active: r.is_active,
            last_login: r.last_login,
            avatar: r.avatar,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PropertyRow {
    id: Uuid,
    title: String,
    description: String,
    price: f64,
    property_type: String,
    status: String,
    street: String,
    city: String,
    state: String,
    zip_code: String,
    country: String,
    coordinates: Option<Json<Coordinates>>,
    features: Json<Features>,
    amenities: Vec<String>,
    images: Json<Vec<PropertyImage>>,
    agent_id: Option<Uuid>,
    is_active: bool,
    is_featured: bool,
    views: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PropertyRow> for Property {
    type Error = StoreError;

    fn try_from(r: PropertyRow) -> StoreResult<Self> {
        Ok(Property {
            property_type: parse_text("property_type", &r.property_type)?,
            status: parse_text("status", &r.status)?,
            id: r.id,
            title: r.title,
            description: r.description,
            price: r.price,
            address: Address {
                street: r.street,
                city: r.city,
                state: r.state,
                zip_code: r.zip_code,
                country: r.country,
            },
            coordinates: r.coordinates.map(|c| c.0),
            features: r.features.0,
            amenities: r.amenities,
            images: r.images.0,
            agent_id: r.agent_id,
            is_active: r.is_active,
            is_featured: r.is_featured,
            views: r.views,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TeamRow {
    id: Uuid,
    first_name: String,
    last_name: String,
    position: String,
    bio: String,
    photo: Option<Json<ImageRef>>,
    contact: Json<ContactInfo>,
    social_media: Json<SocialLinks>,
    specialties: Vec<String>,
    languages: Vec<String>,
    experience: Json<Experience>,
    certifications: Json<Vec<Certification>>,
    user_id: Option<Uuid>,
    is_active: bool,
    display_order: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TeamRow> for TeamMember {
    type Error = StoreError;

    fn try_from(r: TeamRow) -> StoreResult<Self> {
        Ok(TeamMember {
            id: r.id,
            first_name: r.first_name,
            last_name: r.last_name,
            position: r.position,
            bio: r.bio,
            photo: r.photo.map(|p| p.0),
            contact: r.contact.0,
            social_media: r.social_media.0,
            specialties: r.specialties,
            languages: r.languages,
            experience: r.experience.0,
            certifications: r.certifications.0,
            user_id: r.user_id,
            is_active: r.is_active,
            order: r.display_order,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct BlogRow {
    id: Uuid,
    title: String,
    slug: String,
    excerpt: String,
    content: String,
    featured_image: Option<Json<ImageRef>>,
    author_id: Option<Uuid>,
    category: String,
    tags: Vec<String>,
    status: String,
    published_at: Option<DateTime<Utc>>,
    views: i64,
    is_featured: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BlogRow> for BlogPost {
    type Error = StoreError;

    fn try_from(r: BlogRow) -> StoreResult<Self> {
        Ok(BlogPost {
            category: parse_text("category", &r.category)?,
            status: parse_text("status", &r.status)?,
            id: r.id,
            title: r.title,
            slug: r.slug,
            excerpt: r.excerpt,
            content: r.content,
            featured_image: r.featured_image.map(|i| i.0),
            author_id: r.author_id,
            tags: r.tags,
            published_at: r.published_at,
            views: r.views,
            is_featured: r.is_featured,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct HeroRow {
    id: Uuid,
    title: String,
    subtitle: String,
    description: String,
    image: Option<Json<ImageRef>>,
    cta_button: Option<Json<CtaButton>>,
    property_id: Option<Uuid>,
    display_order: i32,
    is_active: bool,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<HeroRow> for HeroSlide {
    type Error = StoreError;

    fn try_from(r: HeroRow) -> StoreResult<Self> {
        Ok(HeroSlide {
            id: r.id,
            title: r.title,
            subtitle: r.subtitle,
            description: r.description,
            image: r.image.map(|i| i.0),
            cta_button: r.cta_button.map(|c| c.0),
            property_id: r.property_id,
            order: r.display_order,
            is_active: r.is_active,
            start_date: r.start_date,
            end_date: r.end_date,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SettingRow {
    key: String,
    value: Json<SettingValue>,
    description: String,
    category: String,
    is_editable: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SettingRow> for Setting {
    type Error = StoreError;

    fn try_from(r: SettingRow) -> StoreResult<Self> {
        Ok(Setting {
            category: parse_text("category", &r.category)?,
            key: r.key,
            value: r.value.0,
            description: r.description,
            is_editable: r.is_editable,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

fn decode_all<R, T: TryFrom<R, Error = StoreError>>(rows: Vec<R>) -> StoreResult<Vec<T>> {
    rows.into_iter().map(T::try_from).collect()
}

fn decode_one<R, T: TryFrom<R, Error = StoreError>>(row: Option<R>) -> StoreResult<Option<T>> {
    row.map(T::try_from).transpose()
}

// ============================================================================
// Store
// ============================================================================

#[async_trait]
impl Store for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ------------------------------------------------------------------ users

    async fn list_users(
        &self,
        filter: &UserFilter,
        sort: &SortSpec,
        window: PageWindow,
    ) -> StoreResult<Page<User>> {
        self.fetch_page::<UserRow, User>("users", |c| push_user_filter(c, filter), sort, window)
            .await
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        decode_one(row)
    }

    async fn find_user_by_login(&self, login: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT * FROM users WHERE username = $1 OR email = $1 LIMIT 1",
        )
        .bind(login.trim().to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        decode_one(row)
    }

    async fn users_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await?;
        decode_all(rows)
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, first_name, last_name,
                               role, is_active, last_login, avatar, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(user.last_login)
        .bind(&user.avatar)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, "Username or email already exists"))?;
        Ok(())
    }

    async fn update_user(&self, user: &User) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        if !user.is_active_admin() && is_sole_active_admin(&mut tx, user.id).await? {
            return Err(StoreError::LastAdmin(LAST_ADMIN_DEMOTE));
        }
        let result = sqlx::query(
            r#"
            UPDATE users SET username = $2, email = $3, password_hash = $4, first_name = $5,
                last_name = $6, role = $7, is_active = $8, last_login = $9, avatar = $10,
                updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(user.last_login)
        .bind(&user.avatar)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_or(e, "Username or email already exists"))?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let mut tx = self.pool.begin().await?;
        if is_sole_active_admin(&mut tx, id).await? {
            return Err(StoreError::LastAdmin(LAST_ADMIN_DELETE));
        }
        let row = sqlx::query_as::<_, UserRow>("DELETE FROM users WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;
        decode_one(row)
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------- properties

    async fn list_properties(
        &self,
        filter: &PropertyFilter,
        sort: &SortSpec,
        window: PageWindow,
    ) -> StoreResult<Page<Property>> {
        self.fetch_page::<PropertyRow, Property>(
            "properties",
            |c| push_property_filter(c, filter),
            sort,
            window,
        )
        .await
    }

    async fn get_property(&self, id: Uuid) -> StoreResult<Option<Property>> {
        let row = sqlx::query_as::<_, PropertyRow>("SELECT * FROM properties WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        decode_one(row)
    }

    async fn insert_property(&self, p: &Property) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO properties (id, title, description, price, property_type, status,
                street, city, state, zip_code, country, coordinates, features, amenities,
                images, agent_id, is_active, is_featured, views, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21)
            "#,
        )
        .bind(p.id)
        .bind(&p.title)
        .bind(&p.description)
        .bind(p.price)
        .bind(p.property_type.as_str())
        .bind(p.status.as_str())
        .bind(&p.address.street)
        .bind(&p.address.city)
        .bind(&p.address.state)
        .bind(&p.address.zip_code)
        .bind(&p.address.country)
        .bind(p.coordinates.map(Json))
        .bind(Json(&p.features))
        .bind(&p.amenities)
        .bind(Json(&p.images))
        .bind(p.agent_id)
        .bind(p.is_active)
        .bind(p.is_featured)
        .bind(p.views)
        .bind(p.created_at)
        .bind(p.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_property(&self, p: &Property) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE properties SET title = $2, description = $3, price = $4, property_type = $5,
                status = $6, street = $7, city = $8, state = $9, zip_code = $10, country = $11,
                coordinates = $12, features = $13, amenities = $14, images = $15,
                agent_id = $16, is_active = $17, is_featured = $18, updated_at = $19
            WHERE id = $1
            "#,
        )
        .bind(p.id)
        .bind(&p.title)
        .bind(&p.description)
        .bind(p.price)
        .bind(p.property_type.as_str())
        .bind(p.status.as_str())
        .bind(&p.address.street)
        .bind(&p.address.city)
        .bind(&p.address.state)
        .bind(&p.address.zip_code)
        .bind(&p.address.country)
        .bind(p.coordinates.map(Json))
        .bind(Json(&p.features))
        .bind(&p.amenities)
        .bind(Json(&p.images))
        .bind(p.agent_id)
        .bind(p.is_active)
        .bind(p.is_featured)
        .bind(p.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_property(&self, id: Uuid) -> StoreResult<Option<Property>> {
        let row =
            sqlx::query_as::<_, PropertyRow>("DELETE FROM properties WHERE id = $1 RETURNING *")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        decode_one(row)
    }

    async fn increment_property_views(&self, id: Uuid) -> StoreResult<Option<Property>> {
        let row = sqlx::query_as::<_, PropertyRow>(
            "UPDATE properties SET views = views + 1 WHERE id = $1 AND is_active RETURNING *",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        decode_one(row)
    }

    async fn property_stats(&self) -> StoreResult<PropertyStats> {
        let (total, featured, average, min, max): (i64, i64, f64, f64, f64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE is_featured),
                   COALESCE(AVG(price), 0)::FLOAT8,
                   COALESCE(MIN(price), 0)::FLOAT8,
                   COALESCE(MAX(price), 0)::FLOAT8
            FROM properties WHERE is_active
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let by_type: Vec<(String, i64)> = sqlx::query_as(
            "SELECT property_type, COUNT(*) FROM properties WHERE is_active \
             GROUP BY property_type ORDER BY 2 DESC, 1",
        )
        .fetch_all(&self.pool)
        .await?;
        let by_status: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM properties WHERE is_active \
             GROUP BY status ORDER BY 2 DESC, 1",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(PropertyStats {
            total_properties: count(total),
            featured_properties: count(featured),
            average_price: average,
            min_price: min,
            max_price: max,
            by_type: by_type
                .into_iter()
                .map(|(k, n)| {
                    Ok(Bucket {
                        key: parse_text("property_type", &k)?,
                        count: count(n),
                    })
                })
                .collect::<StoreResult<_>>()?,
            by_status: by_status
                .into_iter()
                .map(|(k, n)| {
                    Ok(Bucket {
                        key: parse_text("status", &k)?,
                        count: count(n),
                    })
                })
                .collect::<StoreResult<_>>()?,
        })
    }

    // ------------------------------------------------------------------- team

    async fn list_team(
        &self,
        filter: &TeamFilter,
        sort: &SortSpec,
        window: PageWindow,
    ) -> StoreResult<Page<TeamMember>> {
        self.fetch_page::<TeamRow, TeamMember>(
            "team_members",
            |c| push_team_filter(c, filter),
            sort,
            window,
        )
        .await
    }

    async fn get_team_member(&self, id: Uuid) -> StoreResult<Option<TeamMember>> {
        let row = sqlx::query_as::<_, TeamRow>("SELECT * FROM team_members WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        decode_one(row)
    }

    async fn insert_team_member(&self, m: &TeamMember) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO team_members (id, first_name, last_name, position, bio, photo, contact,
                social_media, specialties, languages, experience, certifications, user_id,
                is_active, display_order, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(m.id)
        .bind(&m.first_name)
        .bind(&m.last_name)
        .bind(&m.position)
        .bind(&m.bio)
        .bind(m.photo.as_ref().map(Json))
        .bind(Json(&m.contact))
        .bind(Json(&m.social_media))
        .bind(&m.specialties)
        .bind(&m.languages)
        .bind(Json(&m.experience))
        .bind(Json(&m.certifications))
        .bind(m.user_id)
        .bind(m.is_active)
        .bind(m.order)
        .bind(m.created_at)
        .bind(m.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_team_member(&self, m: &TeamMember) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE team_members SET first_name = $2, last_name = $3, position = $4, bio = $5,
                photo = $6, contact = $7, social_media = $8, specialties = $9, languages = $10,
                experience = $11, certifications = $12, user_id = $13, is_active = $14,
                display_order = $15, updated_at = $16
            WHERE id = $1
            "#,
        )
        .bind(m.id)
        .bind(&m.first_name)
        .bind(&m.last_name)
        .bind(&m.position)
        .bind(&m.bio)
        .bind(m.photo.as_ref().map(Json))
        .bind(Json(&m.contact))
        .bind(Json(&m.social_media))
        .bind(&m.specialties)
        .bind(&m.languages)
        .bind(Json(&m.experience))
        .bind(Json(&m.certifications))
        .bind(m.user_id)
        .bind(m.is_active)
        .bind(m.order)
        .bind(m.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_team_member(&self, id: Uuid) -> StoreResult<Option<TeamMember>> {
        let row =
            sqlx::query_as::<_, TeamRow>("DELETE FROM team_members WHERE id = $1 RETURNING *")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        decode_one(row)
    }

    // ------------------------------------------------------------------- blog

    async fn list_posts(
        &self,
        filter: &BlogFilter,
        sort: &SortSpec,
        window: PageWindow,
    ) -> StoreResult<Page<BlogPost>> {
        self.fetch_page::<BlogRow, BlogPost>(
            "blog_posts",
            |c| push_blog_filter(c, filter),
            sort,
            window,
        )
        .await
    }

    async fn get_post(&self, id: Uuid) -> StoreResult<Option<BlogPost>> {
        let row = sqlx::query_as::<_, BlogRow>("SELECT * FROM blog_posts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        decode_one(row)
    }

    async fn get_post_by_slug(&self, slug: &str) -> StoreResult<Option<BlogPost>> {
        let row = sqlx::query_as::<_, BlogRow>("SELECT * FROM blog_posts WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        decode_one(row)
    }

    async fn slug_taken(&self, slug: &str, exclude: Option<Uuid>) -> StoreResult<bool> {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM blog_posts WHERE slug = $1 \
             AND ($2::UUID IS NULL OR id <> $2))",
        )
        .bind(slug)
        .bind(exclude)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken)
    }

    async fn insert_post(&self, p: &BlogPost) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO blog_posts (id, title, slug, excerpt, content, featured_image,
                author_id, category, tags, status, published_at, views, is_featured,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(p.id)
        .bind(&p.title)
        .bind(&p.slug)
        .bind(&p.excerpt)
        .bind(&p.content)
        .bind(p.featured_image.as_ref().map(Json))
        .bind(p.author_id)
        .bind(p.category.as_str())
        .bind(&p.tags)
        .bind(p.status.as_str())
        .bind(p.published_at)
        .bind(p.views)
        .bind(p.is_featured)
        .bind(p.created_at)
        .bind(p.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, "A post with this slug already exists"))?;
        Ok(())
    }

    async fn update_post(&self, p: &BlogPost) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE blog_posts SET title = $2, slug = $3, excerpt = $4, content = $5,
                featured_image = $6, author_id = $7, category = $8, tags = $9, status = $10,
                published_at = $11, is_featured = $12, updated_at = $13
            WHERE id = $1
            "#,
        )
        .bind(p.id)
        .bind(&p.title)
        .bind(&p.slug)
        .bind(&p.excerpt)
        .bind(&p.content)
        .bind(p.featured_image.as_ref().map(Json))
        .bind(p.author_id)
        .bind(p.category.as_str())
        .bind(&p.tags)
        .bind(p.status.as_str())
        .bind(p.published_at)
        .bind(p.is_featured)
        .bind(p.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, "A post with this slug already exists"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_post(&self, id: Uuid) -> StoreResult<Option<BlogPost>> {
        let row = sqlx::query_as::<_, BlogRow>("DELETE FROM blog_posts WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        decode_one(row)
    }

    async fn increment_post_views(&self, slug: &str) -> StoreResult<Option<BlogPost>> {
        let row = sqlx::query_as::<_, BlogRow>(
            "UPDATE blog_posts SET views = views + 1 \
             WHERE slug = $1 AND status = 'published' RETURNING *",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        decode_one(row)
    }

    async fn blog_categories(&self) -> StoreResult<Vec<Bucket<BlogCategory>>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT category, COUNT(*) FROM blog_posts WHERE status = 'published' \
             GROUP BY category ORDER BY 2 DESC, 1",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(k, n)| {
                Ok(Bucket {
                    key: parse_text("category", &k)?,
                    count: count(n),
                })
            })
            .collect()
    }

    async fn blog_tags(&self) -> StoreResult<Vec<Bucket<String>>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT tag, COUNT(*) FROM blog_posts, unnest(tags) AS tag \
             WHERE status = 'published' GROUP BY tag ORDER BY 2 DESC, 1",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(key, n)| Bucket { key, count: count(n) })
            .collect())
    }

    // ------------------------------------------------------------------- hero

    async fn list_hero(
        &self,
        filter: &HeroFilter,
        sort: &SortSpec,
        window: PageWindow,
    ) -> StoreResult<Page<HeroSlide>> {
        self.fetch_page::<HeroRow, HeroSlide>(
            "hero_slides",
            |c| push_hero_filter(c, filter),
            sort,
            window,
        )
        .await
    }

    async fn get_hero(&self, id: Uuid) -> StoreResult<Option<HeroSlide>> {
        let row = sqlx::query_as::<_, HeroRow>("SELECT * FROM hero_slides WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        decode_one(row)
    }

    async fn insert_hero(&self, s: &HeroSlide) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO hero_slides (id, title, subtitle, description, image, cta_button,
                property_id, display_order, is_active, start_date, end_date, created_at,
                updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(s.id)
        .bind(&s.title)
        .bind(&s.subtitle)
        .bind(&s.description)
        .bind(s.image.as_ref().map(Json))
        .bind(s.cta_button.as_ref().map(Json))
        .bind(s.property_id)
        .bind(s.order)
        .bind(s.is_active)
        .bind(s.start_date)
        .bind(s.end_date)
        .bind(s.created_at)
        .bind(s.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_hero(&self, s: &HeroSlide) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE hero_slides SET title = $2, subtitle = $3, description = $4, image = $5,
                cta_button = $6, property_id = $7, display_order = $8, is_active = $9,
                start_date = $10, end_date = $11, updated_at = $12
            WHERE id = $1
            "#,
        )
        .bind(s.id)
        .bind(&s.title)
        .bind(&s.subtitle)
        .bind(&s.description)
        .bind(s.image.as_ref().map(Json))
        .bind(s.cta_button.as_ref().map(Json))
        .bind(s.property_id)
        .bind(s.order)
        .bind(s.is_active)
        .bind(s.start_date)
        .bind(s.end_date)
        .bind(s.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_hero(&self, id: Uuid) -> StoreResult<Option<HeroSlide>> {
        let row = sqlx::query_as::<_, HeroRow>("DELETE FROM hero_slides WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        decode_one(row)
    }

    // --------------------------------------------------------------- settings

    async fn list_settings(
        &self,
        categories: Option<&[SettingCategory]>,
    ) -> StoreResult<Vec<Setting>> {
        let rows = match categories {
            Some(cats) => {
                let names: Vec<String> = cats.iter().map(|c| c.as_str().to_string()).collect();
                sqlx::query_as::<_, SettingRow>(
                    "SELECT * FROM settings WHERE category = ANY($1) ORDER BY category, key",
                )
                .bind(names)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, SettingRow>("SELECT * FROM settings ORDER BY category, key")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        decode_all(rows)
    }

    async fn get_setting(&self, key: &str) -> StoreResult<Option<Setting>> {
        let row = sqlx::query_as::<_, SettingRow>("SELECT * FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        decode_one(row)
    }

    async fn upsert_setting(&self, s: &Setting) -> StoreResult<Setting> {
        let row = sqlx::query_as::<_, SettingRow>(
            r#"
            INSERT INTO settings (key, value, description, category, is_editable,
                                  created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                description = EXCLUDED.description,
                category = EXCLUDED.category,
                is_editable = EXCLUDED.is_editable,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(&s.key)
        .bind(Json(&s.value))
        .bind(&s.description)
        .bind(s.category.as_str())
        .bind(s.is_editable)
        .bind(s.created_at)
        .bind(s.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Setting::try_from(row)
    }

    async fn delete_setting(&self, key: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM settings WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Role;

    fn sql_of(build: impl Fn(&mut Conditions<'_>)) -> String {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM t");
        build(&mut Conditions::new(&mut qb));
        qb.sql().to_string()
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("plain"), "%plain%");
    }

    #[test]
    fn test_empty_filter_has_no_where() {
        let sql = sql_of(|c| push_property_filter(c, &PropertyFilter::default()));
        assert_eq!(sql, "SELECT * FROM t");
    }

    #[test]
    fn test_conditions_join_with_and() {
        let filter = UserFilter {
            role: Some(Role::Admin),
            active: Some(true),
            search: None,
        };
        let sql = sql_of(|c| push_user_filter(c, &filter));
        assert_eq!(sql, "SELECT * FROM t WHERE role = $1 AND is_active = $2");
    }

    #[test]
    fn test_search_binds_once_per_column() {
        let filter = TeamFilter {
            search: Some("ann".to_string()),
            ..TeamFilter::default()
        };
        let sql = sql_of(|c| push_team_filter(c, &filter));
        assert_eq!(
            sql,
            "SELECT * FROM t WHERE (first_name ILIKE $1 OR last_name ILIKE $2 OR position ILIKE $3)"
        );
    }

    #[test]
    fn test_hero_window_condition() {
        let sql = sql_of(|c| push_hero_filter(c, &HeroFilter::currently_active(Utc::now())));
        assert!(sql.contains("is_active = $1"));
        assert!(sql.contains("(start_date IS NULL OR start_date <= $2)"));
        assert!(sql.contains("(end_date IS NULL OR end_date >= $3)"));
    }
}
