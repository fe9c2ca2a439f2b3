/*!
 * Query Engine
 * Pagination arithmetic, sort parsing and typed access to query parameters
 */
pub mod filters;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::ApiError;

/// Upper bound on `limit` accepted from clients.
pub const MAX_PAGE_SIZE: u64 = 100;

// ============================================================================
// Pagination
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub limit: u64,
}

impl PageRequest {
    /// Both values are clamped to at least 1.
    pub fn new(page: u64, limit: u64) -> Self {
        Self {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    pub fn skip(&self) -> u64 {
        (self.page - 1) * self.limit
    }

    pub fn window(&self) -> PageWindow {
        PageWindow {
            skip: self.skip(),
            limit: Some(self.limit),
        }
    }
}

/// Slice of a result set handed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub skip: u64,
    /// `None` returns every row after `skip`.
    pub limit: Option<u64>,
}

impl PageWindow {
    pub fn all() -> Self {
        Self {
            skip: 0,
            limit: None,
        }
    }

    pub fn first(n: u64) -> Self {
        Self {
            skip: 0,
            limit: Some(n),
        }
    }

    /// Only the total is wanted.
    pub fn count_only() -> Self {
        Self::first(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: u64,
    pub total_pages: u64,
    pub total_items: u64,
    pub items_per_page: u64,
    pub has_next: bool,
    pub has_prev: bool,
    pub next_page: Option<u64>,
    pub prev_page: Option<u64>,
}

impl Pagination {
    pub fn compute(total: u64, request: PageRequest) -> Self {
        let current_page = request.page.max(1);
        let items_per_page = request.limit.max(1);
        let total_pages = total.div_ceil(items_per_page);
        let has_next = current_page < total_pages;
        let has_prev = current_page > 1;

        Self {
            current_page,
            total_pages,
            total_items: total,
            items_per_page,
            has_next,
            has_prev,
            next_page: has_next.then_some(current_page + 1),
            prev_page: has_prev.then_some(current_page - 1),
        }
    }
}

// ============================================================================
// Sorting
// ============================================================================

/// A sortable field: public name and backing column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortField {
    pub name: &'static str,
    pub column: &'static str,
}

pub const fn sort_field(name: &'static str, column: &'static str) -> SortField {
    SortField { name, column }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub field: &'static str,
    pub column: &'static str,
    pub descending: bool,
}

impl SortSpec {
    /// Parse `field` or `-field`. Unknown fields fall back to `default`, which
    /// uses the same syntax.
    pub fn parse(raw: Option<&str>, allowed: &[SortField], default: &str) -> Self {
        raw.and_then(|r| Self::lookup(r, allowed))
            .or_else(|| Self::lookup(default, allowed))
            .unwrap_or(SortSpec {
                field: "createdAt",
                column: "created_at",
                descending: true,
            })
    }

    fn lookup(raw: &str, allowed: &[SortField]) -> Option<Self> {
        let raw = raw.trim();
        let (name, descending) = match raw.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (raw, false),
        };
        allowed.iter().find(|f| f.name == name).map(|f| SortSpec {
            field: f.name,
            column: f.column,
            descending,
        })
    }
}

// ============================================================================
// Query parameters
// ============================================================================

/// Raw query string map with typed accessors. Empty values count as absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct QueryParams(HashMap<String, String>);

impl QueryParams {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn owned(&self, key: &str) -> Option<String> {
        self.text(key).map(str::to_string)
    }

    /// Parse a value, rejecting malformed input with a 400.
    pub fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, ApiError> {
        match self.text(key) {
            None => Ok(None),
            Some(raw) if names_non_finite(raw) => {
                Err(ApiError::validation(format!("Invalid value for '{key}': {raw}")))
            }
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|_| ApiError::validation(format!("Invalid value for '{key}': {raw}"))),
        }
    }

    pub fn flag(&self, key: &str) -> Result<Option<bool>, ApiError> {
        match self.text(key) {
            None => Ok(None),
            Some(raw) => parse_flag(raw)
                .map(Some)
                .ok_or_else(|| ApiError::validation(format!("Invalid value for '{key}': {raw}"))),
        }
    }

    /// `page` and `limit`; malformed values fall back to the defaults and
    /// `limit` is capped at [`MAX_PAGE_SIZE`].
    pub fn page_request(&self, default_limit: u64) -> PageRequest {
        let page = self
            .text("page")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(1);
        let limit = self
            .text("limit")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(default_limit)
            .min(MAX_PAGE_SIZE);
        PageRequest::new(page, limit)
    }

    pub fn sort(&self, allowed: &[SortField], default: &str) -> SortSpec {
        SortSpec::parse(self.text("sort"), allowed, default)
    }
}

/// True for `NaN`, `inf` and friends, which `f64::from_str` accepts but no
/// numeric field of ours can hold.
pub fn names_non_finite(raw: &str) -> bool {
    raw.parse::<f64>().is_ok_and(|v| !v.is_finite())
}

pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELDS: &[SortField] = &[
        sort_field("createdAt", "created_at"),
        sort_field("price", "price"),
    ];

    #[test]
    fn test_pagination_middle_page() {
        let request = PageRequest::new(2, 10);
        let p = Pagination::compute(25, request);
        assert_eq!(p.current_page, 2);
        assert_eq!(p.total_pages, 3);
        assert_eq!(request.skip(), 10);
        assert!(p.has_next);
        assert!(p.has_prev);
        assert_eq!(p.next_page, Some(3));
        assert_eq!(p.prev_page, Some(1));
    }

    #[test]
    fn test_pagination_empty_result() {
        let p = Pagination::compute(0, PageRequest::new(1, 10));
        assert_eq!(p.total_pages, 0);
        assert!(!p.has_next);
        assert!(!p.has_prev);
        assert_eq!(p.next_page, None);
    }

    #[test]
    fn test_pagination_identities_hold() {
        for total in 0..40u64 {
            for limit in 1..7u64 {
                for page in 1..9u64 {
                    let request = PageRequest::new(page, limit);
                    let p = Pagination::compute(total, request);
                    assert_eq!(p.total_pages, (total + limit - 1) / limit);
                    assert_eq!(request.skip(), (page - 1) * limit);
                    assert_eq!(p.has_next, page < p.total_pages);
                    assert_eq!(p.has_prev, page > 1);
                }
            }
        }
    }

    #[test]
    fn test_page_request_clamps_to_one() {
        let r = PageRequest::new(0, 0);
        assert_eq!((r.page, r.limit), (1, 1));
    }

    #[test]
    fn test_page_request_from_params() {
        let q = QueryParams::from_pairs([("page", "abc"), ("limit", "500")]);
        let r = q.page_request(12);
        assert_eq!(r.page, 1);
        assert_eq!(r.limit, MAX_PAGE_SIZE);

        let q = QueryParams::default();
        assert_eq!(q.page_request(12).limit, 12);
    }

    #[test]
    fn test_sort_parse() {
        let s = SortSpec::parse(Some("-price"), FIELDS, "-createdAt");
        assert_eq!((s.column, s.descending), ("price", true));

        let s = SortSpec::parse(Some("price"), FIELDS, "-createdAt");
        assert!(!s.descending);

        let s = SortSpec::parse(Some("password"), FIELDS, "-createdAt");
        assert_eq!((s.field, s.descending), ("createdAt", true));
    }

    #[test]
    fn test_malformed_number_is_validation_error() {
        let q = QueryParams::from_pairs([("minPrice", "cheap"), ("maxPrice", " ")]);
        assert!(q.parse::<f64>("minPrice").is_err());
        assert_eq!(q.parse::<f64>("maxPrice").unwrap(), None);
        assert!(q.flag("minPrice").is_err());
    }

    #[test]
    fn test_non_finite_price_filters_are_rejected() {
        for raw in ["NaN", "inf", "-infinity", "+Inf"] {
            let q = QueryParams::from_pairs([("minPrice", raw)]);
            assert!(q.parse::<f64>("minPrice").is_err(), "{raw} accepted");
        }
        let q = QueryParams::from_pairs([("maxPrice", "1e6")]);
        assert_eq!(q.parse::<f64>("maxPrice").unwrap(), Some(1_000_000.0));
    }
}
