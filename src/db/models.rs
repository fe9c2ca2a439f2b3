//! Domain models shared by both storage backends and the HTTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed string enums: serde names, `as_str`, `FromStr`, `Display` and `ALL`
/// are all generated from one table so they cannot drift apart.
macro_rules! text_enum {
    ($(#[$meta:meta])* pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let needle = s.trim().to_ascii_lowercase();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == needle)
                    .ok_or_else(|| {
                        let allowed: Vec<&str> = $name::ALL.iter().map(|v| v.as_str()).collect();
                        format!("must be one of: {}", allowed.join(", "))
                    })
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ============================================================================
// Users
// ============================================================================

text_enum! {
    pub enum Role {
        Admin => "admin",
        Agent => "agent",
        Manager => "manager",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    /// Lowercase, unique.
    pub username: String,
    /// Lowercase, unique.
    pub email: String,
    /// bcrypt hash; never serialized.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn is_active_admin(&self) -> bool {
        self.role == Role::Admin && self.is_active
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }
}

/// Name-only projection joined into property and blog responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
}

// ============================================================================
// Properties
// ============================================================================

text_enum! {
    pub enum PropertyType {
        House => "house",
        Apartment => "apartment",
        Condo => "condo",
        Townhouse => "townhouse",
        Villa => "villa",
        Land => "land",
        Commercial => "commercial",
    }
}

text_enum! {
    pub enum PropertyStatus {
        ForSale => "for-sale",
        ForRent => "for-rent",
        Sold => "sold",
        Rented => "rented",
        Pending => "pending",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<f64>,
    pub sqft: Option<f64>,
    pub lot_size: Option<f64>,
    pub year_built: Option<u32>,
    pub garage: Option<u32>,
    pub stories: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyImage {
    pub url: String,
    pub alt: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub property_type: PropertyType,
    pub status: PropertyStatus,
    pub address: Address,
    pub coordinates: Option<Coordinates>,
    pub features: Features,
    pub amenities: Vec<String>,
    pub images: Vec<PropertyImage>,
    #[serde(rename = "agent")]
    pub agent_id: Option<Uuid>,
    pub is_active: bool,
    pub is_featured: bool,
    pub views: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Property {
    /// "street, city, state zip, country" with empty parts skipped.
    pub fn full_address(&self) -> String {
        let a = &self.address;
        let state_zip = [a.state.trim(), a.zip_code.trim()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        [a.street.trim(), a.city.trim(), state_zip.as_str(), a.country.trim()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// The image flagged primary, else the first one.
    pub fn primary_image(&self) -> Option<&PropertyImage> {
        self.images
            .iter()
            .find(|img| img.is_primary)
            .or_else(|| self.images.first())
    }
}

/// At most one image stays primary (the first flagged one); with none
/// flagged, the first image becomes primary. Order is preserved.
pub fn normalize_primary(images: &mut [PropertyImage]) {
    let primary = images.iter().position(|img| img.is_primary).unwrap_or(0);
    for (i, img) in images.iter_mut().enumerate() {
        img.is_primary = i == primary;
    }
}

// ============================================================================
// Team
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    pub alt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: String,
    pub phone: String,
    pub whatsapp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialLinks {
    pub facebook: Option<String>,
    pub twitter: Option<String>,
    pub linkedin: Option<String>,
    pub instagram: Option<String>,
    pub youtube: Option<String>,
}

impl SocialLinks {
    pub const PLATFORMS: &'static [&'static str] =
        &["facebook", "twitter", "linkedin", "instagram", "youtube"];

    pub fn set(&mut self, platform: &str, url: Option<String>) {
        match platform {
            "facebook" => self.facebook = url,
            "twitter" => self.twitter = url,
            "linkedin" => self.linkedin = url,
            "instagram" => self.instagram = url,
            "youtube" => self.youtube = url,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experience {
    pub years_in_business: u32,
    pub properties_sold: u32,
    pub total_sales_volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certification {
    pub name: String,
    pub issuing_organization: String,
    pub year: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub position: String,
    pub bio: String,
    pub photo: Option<ImageRef>,
    pub contact: ContactInfo,
    pub social_media: SocialLinks,
    pub specialties: Vec<String>,
    pub languages: Vec<String>,
    pub experience: Experience,
    pub certifications: Vec<Certification>,
    /// Linked login account, used to attribute listings.
    #[serde(rename = "user")]
    pub user_id: Option<Uuid>,
    pub is_active: bool,
    pub order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TeamMember {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn formatted_phone(&self) -> String {
        format_phone(&self.contact.phone)
    }
}

/// North-American style formatting for 10 or 11 digit numbers; anything
/// else is returned as entered.
pub fn format_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        10 => format!("({}) {}-{}", &digits[0..3], &digits[3..6], &digits[6..]),
        11 if digits.starts_with('1') => format!(
            "+1 ({}) {}-{}",
            &digits[1..4],
            &digits[4..7],
            &digits[7..]
        ),
        _ => raw.trim().to_string(),
    }
}

// ============================================================================
// Blog
// ============================================================================

text_enum! {
    pub enum BlogCategory {
        MarketNews => "market-news",
        BuyingTips => "buying-tips",
        SellingTips => "selling-tips",
        Investment => "investment",
        Neighborhoods => "neighborhoods",
        HomeImprovement => "home-improvement",
        Lifestyle => "lifestyle",
        CompanyNews => "company-news",
    }
}

text_enum! {
    pub enum BlogStatus {
        Draft => "draft",
        Published => "published",
        Archived => "archived",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogPost {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub excerpt: String,
    /// Sanitized HTML.
    pub content: String,
    pub featured_image: Option<ImageRef>,
    #[serde(rename = "author")]
    pub author_id: Option<Uuid>,
    pub category: BlogCategory,
    pub tags: Vec<String>,
    pub status: BlogStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub views: i64,
    pub is_featured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BlogPost {
    /// Move to `status`. Entering `Published` stamps `published_at` unless
    /// the post was published before.
    pub fn transition_to(&mut self, status: BlogStatus, now: DateTime<Utc>) {
        if status == BlogStatus::Published && self.published_at.is_none() {
            self.published_at = Some(now);
        }
        self.status = status;
    }

    pub fn is_public(&self) -> bool {
        self.status == BlogStatus::Published
    }
}

// ============================================================================
// Hero slides
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CtaButton {
    pub text: String,
    pub link: String,
    pub is_external: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeroSlide {
    pub id: Uuid,
    pub title: String,
    pub subtitle: String,
    pub description: String,
    pub image: Option<ImageRef>,
    pub cta_button: Option<CtaButton>,
    #[serde(rename = "property")]
    pub property_id: Option<Uuid>,
    pub order: i32,
    pub is_active: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HeroSlide {
    /// Active flag set and `now` inside the optional visibility window
    /// (both bounds inclusive).
    pub fn is_currently_active(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.start_date.map_or(true, |start| start <= now)
            && self.end_date.map_or(true, |end| end >= now)
    }
}

// ============================================================================
// Settings
// ============================================================================

text_enum! {
    pub enum SettingCategory {
        General => "general",
        Company => "company",
        Contact => "contact",
        Social => "social",
        Seo => "seo",
        Theme => "theme",
        Features => "features",
    }
}

impl SettingCategory {
    /// Categories readable without authentication.
    pub const PUBLIC: &'static [SettingCategory] = &[
        SettingCategory::General,
        SettingCategory::Company,
        SettingCategory::Contact,
        SettingCategory::Social,
    ];

    pub fn is_public(self) -> bool {
        Self::PUBLIC.contains(&self)
    }
}

/// A setting's value, tagged with its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum SettingValue {
    String(String),
    Number(f64),
    Boolean(bool),
    Object(serde_json::Map<String, serde_json::Value>),
    Array(Vec<serde_json::Value>),
}

impl SettingValue {
    pub fn kind(&self) -> &'static str {
        match self {
            SettingValue::String(_) => "string",
            SettingValue::Number(_) => "number",
            SettingValue::Boolean(_) => "boolean",
            SettingValue::Object(_) => "object",
            SettingValue::Array(_) => "array",
        }
    }

    /// Infer the kind from an untyped JSON value. `null` has no kind.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        match value {
            Value::String(s) => Some(SettingValue::String(s)),
            Value::Number(n) => n.as_f64().map(SettingValue::Number),
            Value::Bool(b) => Some(SettingValue::Boolean(b)),
            Value::Object(map) => Some(SettingValue::Object(map)),
            Value::Array(items) => Some(SettingValue::Array(items)),
            Value::Null => None,
        }
    }

    /// Coerce to `kind`, the explicit type tag supplied by an editor.
    pub fn from_json_as(kind: &str, value: serde_json::Value) -> Result<Self, String> {
        use serde_json::Value;
        match (kind, value) {
            ("string", Value::String(s)) => Ok(SettingValue::String(s)),
            ("string", other) if !other.is_null() => Ok(SettingValue::String(other.to_string())),
            ("number", Value::Number(n)) => n
                .as_f64()
                .map(SettingValue::Number)
                .ok_or_else(|| "value is not a finite number".to_string()),
            ("number", Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(SettingValue::Number)
                .map_err(|_| format!("'{s}' is not a number")),
            ("boolean", Value::Bool(b)) => Ok(SettingValue::Boolean(b)),
            ("boolean", Value::String(s)) => match s.trim() {
                "true" | "on" | "1" => Ok(SettingValue::Boolean(true)),
                "false" | "off" | "0" => Ok(SettingValue::Boolean(false)),
                _ => Err(format!("'{s}' is not a boolean")),
            },
            ("object", Value::Object(map)) => Ok(SettingValue::Object(map)),
            ("array", Value::Array(items)) => Ok(SettingValue::Array(items)),
            (kind, _) => Err(format!("value does not match type '{kind}'")),
        }
    }

    /// The bare JSON payload without its tag.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            SettingValue::String(s) => Value::String(s.clone()),
            SettingValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SettingValue::Boolean(b) => Value::Bool(*b),
            SettingValue::Object(map) => Value::Object(map.clone()),
            SettingValue::Array(items) => Value::Array(items.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setting {
    pub key: String,
    pub value: SettingValue,
    pub description: String,
    pub category: SettingCategory,
    pub is_editable: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
