//! Per-entity list filters.
//!
//! Each filter is a conjunction of optional conditions. `matches` is the
//! reference predicate used by the in-memory store; the Postgres store
//! translates the same fields into a WHERE clause.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{sort_field, QueryParams, SortField};
use crate::db::models::{
    BlogCategory, BlogPost, BlogStatus, HeroSlide, Property, PropertyStatus, PropertyType, Role,
    TeamMember, User,
};
use crate::error::ApiError;

pub const PROPERTY_SORT: &[SortField] = &[
    sort_field("createdAt", "created_at"),
    sort_field("updatedAt", "updated_at"),
    sort_field("price", "price"),
    sort_field("views", "views"),
    sort_field("title", "title"),
];

pub const TEAM_SORT: &[SortField] = &[
    sort_field("order", "display_order"),
    sort_field("createdAt", "created_at"),
    sort_field("updatedAt", "updated_at"),
    sort_field("lastName", "last_name"),
];

pub const BLOG_SORT: &[SortField] = &[
    sort_field("createdAt", "created_at"),
    sort_field("updatedAt", "updated_at"),
    sort_field("publishedAt", "published_at"),
    sort_field("views", "views"),
    sort_field("title", "title"),
];

pub const HERO_SORT: &[SortField] = &[
    sort_field("order", "display_order"),
    sort_field("createdAt", "created_at"),
    sort_field("updatedAt", "updated_at"),
];

pub const USER_SORT: &[SortField] = &[
    sort_field("createdAt", "created_at"),
    sort_field("updatedAt", "updated_at"),
    sort_field("username", "username"),
    sort_field("lastLogin", "last_login"),
];

/// Case-insensitive substring test.
pub fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn parse_enum<T: std::str::FromStr<Err = String>>(
    params: &QueryParams,
    key: &str,
) -> Result<Option<T>, ApiError> {
    match params.text(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ApiError::validation(format!("Invalid {key}: {e}"))),
    }
}

// ============================================================================
// Properties
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyFilter {
    pub property_type: Option<PropertyType>,
    pub status: Option<PropertyStatus>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    /// Minimum bedrooms.
    pub bedrooms: Option<u32>,
    /// Minimum bathrooms.
    pub bathrooms: Option<f64>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub featured: Option<bool>,
    pub active: Option<bool>,
    pub agent_id: Option<Uuid>,
    pub exclude_id: Option<Uuid>,
    pub search: Option<String>,
}

impl PropertyFilter {
    /// Filter for the public catalog: active listings only.
    pub fn public(params: &QueryParams) -> Result<Self, ApiError> {
        let mut filter = Self::from_params(params)?;
        filter.active = Some(true);
        Ok(filter)
    }

    /// Admin listing: `isActive` is an ordinary optional filter.
    pub fn admin(params: &QueryParams) -> Result<Self, ApiError> {
        let mut filter = Self::from_params(params)?;
        filter.active = params.flag("isActive")?;
        filter.agent_id = params.parse("agent")?;
        Ok(filter)
    }

    fn from_params(params: &QueryParams) -> Result<Self, ApiError> {
        Ok(Self {
            property_type: parse_enum(params, "type")?,
            status: parse_enum(params, "status")?,
            min_price: params.parse("minPrice")?,
            max_price: params.parse("maxPrice")?,
            bedrooms: params.parse("bedrooms")?,
            bathrooms: params.parse("bathrooms")?,
            city: params.owned("city"),
            state: params.owned("state"),
            featured: params.flag("featured")?,
            search: params.owned("search"),
            ..Self::default()
        })
    }

    pub fn matches(&self, p: &Property) -> bool {
        self.property_type.map_or(true, |t| p.property_type == t)
            && self.status.map_or(true, |s| p.status == s)
            && self.min_price.map_or(true, |min| p.price >= min)
            && self.max_price.map_or(true, |max| p.price <= max)
            && self
                .bedrooms
                .map_or(true, |n| p.features.bedrooms.is_some_and(|b| b >= n))
            && self
                .bathrooms
                .map_or(true, |n| p.features.bathrooms.is_some_and(|b| b >= n))
            && self
                .city
                .as_deref()
                .map_or(true, |c| contains_ci(&p.address.city, c))
            && self
                .state
                .as_deref()
                .map_or(true, |s| contains_ci(&p.address.state, s))
            && self.featured.map_or(true, |f| p.is_featured == f)
            && self.active.map_or(true, |a| p.is_active == a)
            && self.agent_id.map_or(true, |id| p.agent_id == Some(id))
            && self.exclude_id.map_or(true, |id| p.id != id)
            && self.search.as_deref().map_or(true, |q| {
                [
                    p.title.as_str(),
                    p.description.as_str(),
                    p.address.street.as_str(),
                    p.address.city.as_str(),
                    p.address.state.as_str(),
                ]
                .iter()
                .any(|field| contains_ci(field, q))
            })
    }
}

// ============================================================================
// Team
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeamFilter {
    pub active: Option<bool>,
    pub specialty: Option<String>,
    pub language: Option<String>,
    pub search: Option<String>,
}

impl TeamFilter {
    pub fn public(params: &QueryParams) -> Self {
        Self {
            active: Some(true),
            specialty: params.owned("specialty"),
            language: params.owned("language"),
            search: params.owned("search"),
        }
    }

    pub fn admin(params: &QueryParams) -> Result<Self, ApiError> {
        Ok(Self {
            active: params.flag("isActive")?,
            ..Self::public(params)
        })
    }

    pub fn matches(&self, m: &TeamMember) -> bool {
        self.active.map_or(true, |a| m.is_active == a)
            && self.specialty.as_deref().map_or(true, |s| {
                m.specialties.iter().any(|x| x.eq_ignore_ascii_case(s))
            })
            && self.language.as_deref().map_or(true, |l| {
                m.languages.iter().any(|x| x.eq_ignore_ascii_case(l))
            })
            && self.search.as_deref().map_or(true, |q| {
                [
                    m.first_name.as_str(),
                    m.last_name.as_str(),
                    m.position.as_str(),
                ]
                .iter()
                .any(|field| contains_ci(field, q))
            })
    }
}

// ============================================================================
// Blog
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlogFilter {
    pub status: Option<BlogStatus>,
    pub category: Option<BlogCategory>,
    pub tag: Option<String>,
    pub featured: Option<bool>,
    pub author_id: Option<Uuid>,
    pub exclude_id: Option<Uuid>,
    pub search: Option<String>,
}

impl BlogFilter {
    /// Public routes only ever see published posts.
    pub fn public(params: &QueryParams) -> Result<Self, ApiError> {
        Ok(Self {
            status: Some(BlogStatus::Published),
            category: parse_enum(params, "category")?,
            tag: params.owned("tag"),
            featured: params.flag("featured")?,
            search: params.owned("search"),
            ..Self::default()
        })
    }

    pub fn admin(params: &QueryParams) -> Result<Self, ApiError> {
        Ok(Self {
            status: parse_enum(params, "status")?,
            author_id: params.parse("author")?,
            ..Self::public(params)?
        })
    }

    pub fn published() -> Self {
        Self {
            status: Some(BlogStatus::Published),
            ..Self::default()
        }
    }

    pub fn matches(&self, post: &BlogPost) -> bool {
        self.status.map_or(true, |s| post.status == s)
            && self.category.map_or(true, |c| post.category == c)
            && self.tag.as_deref().map_or(true, |t| {
                post.tags.iter().any(|x| x.eq_ignore_ascii_case(t))
            })
            && self.featured.map_or(true, |f| post.is_featured == f)
            && self.author_id.map_or(true, |id| post.author_id == Some(id))
            && self.exclude_id.map_or(true, |id| post.id != id)
            && self.search.as_deref().map_or(true, |q| {
                contains_ci(&post.title, q)
                    || contains_ci(&post.excerpt, q)
                    || contains_ci(&post.content, q)
                    || post.tags.iter().any(|t| contains_ci(t, q))
            })
    }
}

// ============================================================================
// Hero slides
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeroFilter {
    pub active: Option<bool>,
    /// Keep only slides whose visibility window contains this instant.
    pub current_at: Option<DateTime<Utc>>,
}

impl HeroFilter {
    pub fn currently_active(now: DateTime<Utc>) -> Self {
        Self {
            active: Some(true),
            current_at: Some(now),
        }
    }

    pub fn admin(params: &QueryParams) -> Result<Self, ApiError> {
        Ok(Self {
            active: params.flag("isActive")?,
            current_at: None,
        })
    }

    pub fn matches(&self, slide: &HeroSlide) -> bool {
        self.active.map_or(true, |a| slide.is_active == a)
            && self
                .current_at
                .map_or(true, |now| slide.is_currently_active(now))
    }
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub active: Option<bool>,
    pub search: Option<String>,
}

impl UserFilter {
    pub fn from_params(params: &QueryParams) -> Result<Self, ApiError> {
        Ok(Self {
            role: parse_enum(params, "role")?,
            active: params.flag("isActive")?,
            search: params.owned("search"),
        })
    }

    pub fn active_admins() -> Self {
        Self {
            role: Some(Role::Admin),
            active: Some(true),
            search: None,
        }
    }

    pub fn matches(&self, user: &User) -> bool {
        self.role.map_or(true, |r| user.role == r)
            && self.active.map_or(true, |a| user.is_active == a)
            && self.search.as_deref().map_or(true, |q| {
                [
                    user.username.as_str(),
                    user.email.as_str(),
                    user.first_name.as_str(),
                    user.last_name.as_str(),
                ]
                .iter()
                .any(|field| contains_ci(field, q))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Address, Features};

    fn listing(price: f64, city: &str, bedrooms: Option<u32>) -> Property {
        let now = Utc::now();
        Property {
            id: Uuid::new_v4(),
            title: "Sunny bungalow".to_string(),
            description: "Close to the beach".to_string(),
            price,
            property_type: PropertyType::House,
            status: PropertyStatus::ForSale,
            address: Address {
                city: city.to_string(),
                state: "CA".to_string(),
                ..Address::default()
            },
            coordinates: None,
            features: Features {
                bedrooms,
                ..Features::default()
            },
            amenities: vec![],
            images: vec![],
            agent_id: None,
            is_active: true,
            is_featured: false,
            views: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_property_filter_combines_with_and() {
        let params = QueryParams::from_pairs([
            ("minPrice", "100000"),
            ("maxPrice", "500000"),
            ("city", "san"),
            ("bedrooms", "3"),
        ]);
        let filter = PropertyFilter::public(&params).unwrap();

        assert!(filter.matches(&listing(250_000.0, "San Diego", Some(4))));
        assert!(!filter.matches(&listing(750_000.0, "San Diego", Some(4))));
        assert!(!filter.matches(&listing(250_000.0, "Fresno", Some(4))));
        assert!(!filter.matches(&listing(250_000.0, "San Diego", Some(2))));
        assert!(!filter.matches(&listing(250_000.0, "San Diego", None)));
    }

    #[test]
    fn test_public_property_filter_hides_inactive() {
        let filter = PropertyFilter::public(&QueryParams::default()).unwrap();
        let mut p = listing(1.0, "Austin", None);
        p.is_active = false;
        assert!(!filter.matches(&p));

        let admin = PropertyFilter::admin(&QueryParams::default()).unwrap();
        assert!(admin.matches(&p));
    }

    #[test]
    fn test_property_filter_rejects_bad_enum() {
        let params = QueryParams::from_pairs([("type", "castle")]);
        assert!(PropertyFilter::public(&params).is_err());
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let params = QueryParams::from_pairs([("search", "BEACH")]);
        let filter = PropertyFilter::public(&params).unwrap();
        assert!(filter.matches(&listing(1.0, "Austin", None)));
    }

    #[test]
    fn test_public_blog_filter_forces_published() {
        let params = QueryParams::from_pairs([("status", "draft")]);
        let filter = BlogFilter::public(&params).unwrap();
        assert_eq!(filter.status, Some(BlogStatus::Published));

        let admin = BlogFilter::admin(&params).unwrap();
        assert_eq!(admin.status, Some(BlogStatus::Draft));
    }
}
