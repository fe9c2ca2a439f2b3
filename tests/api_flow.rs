//! End-to-end flows through the full router: sessions, gates, admin CRUD
//! and what the public API exposes afterwards.

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

use realty_cms::config::AppConfig;
use realty_cms::db::models::{Role, User};
use realty_cms::seed::new_user;
use realty_cms::store::MemoryStore;
use realty_cms::{create_app, AppState};

const PASSWORD: &str = "flow-password";

struct Harness {
    app: Router,
    state: AppState,
    _uploads: tempfile::TempDir,
}

async fn harness_with(config: impl FnOnce(&mut AppConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = AppConfig::for_tests(dir.path());
    config(&mut cfg);
    let state = AppState::new(cfg, Arc::new(MemoryStore::new()));
    let app = create_app(state.clone())
        .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
    Harness {
        app,
        state,
        _uploads: dir,
    }
}

async fn harness() -> Harness {
    harness_with(|_| {}).await
}

impl Harness {
    async fn add_user(&self, username: &str, role: Role) -> User {
        let user = new_user(
            username,
            &format!("{}@realty.example", username),
            bcrypt::hash(PASSWORD, 4).unwrap(),
            role,
        );
        self.state.store.insert_user(&user).await.unwrap();
        user
    }

    async fn login(&self, username: &str) -> String {
        let (status, headers, _) = self
            .send(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({ "login": username, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let raw = headers[header::SET_COOKIE].to_str().unwrap();
        raw.split(';').next().unwrap().to_string()
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, axum::http::HeaderMap, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            req = req.header(header::COOKIE, cookie);
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();
        self.dispatch(req).await
    }

    async fn dispatch(&self, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
        let res = self.app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, body)
    }
}

fn listing(title: &str) -> Value {
    json!({
        "title": title,
        "description": "Three bedrooms close to the park",
        "price": 450000,
        "propertyType": "house",
        "address": {
            "street": "12 Elm Street",
            "city": "Springfield",
            "state": "IL",
            "zipCode": "62701"
        },
        "features": { "bedrooms": 3, "bathrooms": 2 }
    })
}

#[tokio::test]
async fn admin_creates_listing_that_public_api_serves() {
    let h = harness().await;
    let boss = h.add_user("boss", Role::Admin).await;
    let cookie = h.login("boss").await;

    let (status, _, body) = h
        .send("POST", "/api/admin/properties", Some(&cookie), Some(listing("Elm House")))
        .await;
    assert_eq!(status, StatusCode::OK);
    let id = body["data"]["id"].as_str().unwrap().to_string();
    let agent = &body["data"]["agent"];
    assert_eq!(agent["id"], boss.id.to_string());
    assert!(agent.get("firstName").is_some());
    assert!(agent.get("username").is_none());
    assert!(agent.get("email").is_none());
    assert!(body["data"]["primaryImage"].is_null());

    let (status, _, body) = h.send("GET", "/api/properties", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["properties"].as_array().unwrap().len(), 1);
    assert_eq!(body["pagination"]["totalItems"], 1);

    let (_, _, _) = h
        .send(
            "PUT",
            &format!("/api/admin/properties/{}", id),
            Some(&cookie),
            Some(json!({ "isActive": false })),
        )
        .await;
    let (_, _, body) = h.send("GET", "/api/properties", None, None).await;
    assert_eq!(body["properties"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn every_detail_fetch_counts_a_view() {
    let h = harness().await;
    h.add_user("boss", Role::Admin).await;
    let cookie = h.login("boss").await;
    let (_, _, body) = h
        .send("POST", "/api/admin/properties", Some(&cookie), Some(listing("Viewed")))
        .await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    for _ in 0..3 {
        let (status, _, _) = h
            .send("GET", &format!("/api/properties/{}", id), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (_, _, body) = h
        .send("GET", &format!("/api/properties/{}", id), None, None)
        .await;
    assert_eq!(body["property"]["views"], 4);
}

#[tokio::test]
async fn admin_user_routes_distinguish_anonymous_from_wrong_role() {
    let h = harness().await;
    h.add_user("agent", Role::Agent).await;

    let (status, _, _) = h.send("GET", "/api/admin/users", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let cookie = h.login("agent").await;
    let (status, _, _) = h.send("GET", "/api/admin/users", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Agents may still manage listings.
    let (status, _, _) = h
        .send("GET", "/api/admin/properties", Some(&cookie), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn last_active_admin_cannot_be_demoted_or_removed() {
    let h = harness().await;
    let boss = h.add_user("boss", Role::Admin).await;
    let cookie = h.login("boss").await;
    let uri = format!("/api/admin/users/{}", boss.id);

    let (status, _, _) = h
        .send("PUT", &uri, Some(&cookie), Some(json!({ "role": "agent" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = h
        .send("PUT", &uri, Some(&cookie), Some(json!({ "isActive": false })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = h.send("DELETE", &uri, Some(&cookie), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "You cannot delete your own account");

    // A second admin makes the demotion legal.
    let deputy = h.add_user("deputy", Role::Admin).await;
    let deputy_cookie = h.login("deputy").await;
    let (status, _, _) = h
        .send(
            "PUT",
            &format!("/api/admin/users/{}", deputy.id),
            Some(&cookie),
            Some(json!({ "role": "agent" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // The deputy's existing session loses admin access on its next request.
    let (status, _, _) = h
        .send("GET", "/api/admin/users", Some(&deputy_cookie), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Boss is the only active admin again.
    let (status, _, body) = h
        .send("PUT", &uri, Some(&cookie), Some(json!({ "isActive": false })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Cannot demote or deactivate the last active admin");
}

#[tokio::test]
async fn admin_can_delete_another_admin() {
    let h = harness().await;
    h.add_user("boss", Role::Admin).await;
    let deputy = h.add_user("deputy", Role::Admin).await;
    let cookie = h.login("boss").await;
    let deputy_cookie = h.login("deputy").await;

    let uri = format!("/api/admin/users/{}", deputy.id);
    let (status, _, body) = h.send("DELETE", &uri, Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "User deleted successfully");

    let (status, _, _) = h.send("GET", &uri, Some(&cookie), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = h
        .send("GET", "/api/admin/users", Some(&deputy_cookie), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn non_finite_prices_are_rejected() {
    let h = harness().await;
    h.add_user("boss", Role::Admin).await;
    let cookie = h.login("boss").await;

    for raw in ["NaN", "inf", "-Infinity"] {
        let mut body = listing("Odd Price");
        body["price"] = json!(raw);
        let (status, _, _) = h
            .send("POST", "/api/admin/properties", Some(&cookie), Some(body))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "price {raw} accepted");

        let mut body = listing("Odd Size");
        body["features"]["sqft"] = json!(raw);
        let (status, _, _) = h
            .send("POST", "/api/admin/properties", Some(&cookie), Some(body))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "sqft {raw} accepted");

        let (status, _, _) = h
            .send("GET", &format!("/api/properties?minPrice={raw}"), None, None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "minPrice {raw} accepted");
    }

    let (_, _, body) = h.send("GET", "/api/admin/properties", Some(&cookie), None).await;
    assert_eq!(body["pagination"]["totalItems"], 0);
}

#[tokio::test]
async fn duplicate_blog_slug_conflicts() {
    let h = harness().await;
    h.add_user("writer", Role::Agent).await;
    let cookie = h.login("writer").await;
    let post = json!({
        "title": "Spring Market Report",
        "content": "<p>Prices are up.</p><script>alert(1)</script>",
        "category": "market-news",
        "status": "published"
    });

    let (status, _, body) = h
        .send("POST", "/api/admin/blog", Some(&cookie), Some(post.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["slug"], "spring-market-report");
    assert!(!body["data"]["content"].as_str().unwrap().contains("<script>"));

    let (status, _, body) = h
        .send("POST", "/api/admin/blog", Some(&cookie), Some(post))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "A post with this slug already exists");

    let (status, _, body) = h
        .send("GET", "/api/blog/post/spring-market-report", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["post"]["views"], 1);
}

#[tokio::test]
async fn hero_lists_only_slides_inside_their_window() {
    let h = harness().await;
    h.add_user("boss", Role::Admin).await;
    let cookie = h.login("boss").await;
    let now = Utc::now();

    let slides = [
        json!({ "title": "Open now", "image": "https://cdn.example/a.jpg", "order": 2 }),
        json!({
            "title": "Coming soon",
            "image": "https://cdn.example/b.jpg",
            "startDate": (now + Duration::days(3)).to_rfc3339()
        }),
        json!({
            "title": "Expired",
            "image": "https://cdn.example/c.jpg",
            "startDate": (now - Duration::days(10)).to_rfc3339(),
            "endDate": (now - Duration::days(1)).to_rfc3339()
        }),
        json!({ "title": "Hidden", "image": "https://cdn.example/d.jpg", "isActive": false }),
        json!({ "title": "First", "image": "https://cdn.example/e.jpg", "order": 1 }),
    ];
    for slide in slides {
        let (status, _, _) = h
            .send("POST", "/api/admin/hero", Some(&cookie), Some(slide))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, _, body) = h.send("GET", "/api/hero", None, None).await;
    let titles: Vec<&str> = body["slides"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["First", "Open now"]);

    let (_, _, body) = h.send("GET", "/api/admin/hero", Some(&cookie), None).await;
    assert_eq!(body["slides"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn rate_limiter_rejects_after_the_budget() {
    let h = harness_with(|cfg| cfg.rate_limit.max_requests = 3).await;

    for _ in 0..3 {
        let (status, _, _) = h.send("GET", "/api/properties", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, headers, body) = h.send("GET", "/api/properties", None, None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["retryAfter"].as_u64().unwrap() > 0);
    assert!(headers.contains_key(header::RETRY_AFTER));

    // Health checks are outside the limited surface.
    let (status, _, _) = h.send("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

const PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D,
];

fn multipart_body(boundary: &str, fields: &[(&str, &str)], files: &[&str]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                boundary, name, value
            )
            .as_bytes(),
        );
    }
    for file in files {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"images\"; filename=\"{}\"\r\nContent-Type: image/png\r\n\r\n",
                boundary, file
            )
            .as_bytes(),
        );
        body.extend_from_slice(PNG);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    body
}

fn multipart_listing(boundary: &str) -> Vec<u8> {
    multipart_body(
        boundary,
        &[
            ("title", "Lake Cabin"),
            ("price", "210000"),
            ("propertyType", "villa"),
            ("address[street]", "1 Shore Rd"),
            ("address[city]", "Lakeside"),
            ("address[state]", "MI"),
            ("address[zipCode]", "49000"),
        ],
        &["front-porch.png", "dock.png"],
    )
}

impl Harness {
    async fn send_multipart(&self, method: &str, uri: &str, cookie: &str, body: Vec<u8>) -> Value {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, cookie)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();
        let (status, _, body) = self.dispatch(req).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }
}

const BOUNDARY: &str = "realty-boundary";

fn image_urls(body: &Value) -> Vec<String> {
    body["data"]["images"]
        .as_array()
        .unwrap()
        .iter()
        .map(|img| img["url"].as_str().unwrap().to_string())
        .collect()
}

fn primary_flags(body: &Value) -> Vec<bool> {
    body["data"]["images"]
        .as_array()
        .unwrap()
        .iter()
        .map(|img| img["isPrimary"].as_bool().unwrap())
        .collect()
}

#[tokio::test]
async fn multipart_listing_stores_images_with_first_primary() {
    let h = harness().await;
    h.add_user("boss", Role::Admin).await;
    let cookie = h.login("boss").await;

    let boundary = "realty-boundary";
    let req = Request::post("/api/admin/properties")
        .header(header::COOKIE, &cookie)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(multipart_listing(boundary)))
        .unwrap();
    let (status, _, body) = h.dispatch(req).await;
    assert_eq!(status, StatusCode::OK);

    let images = body["data"]["images"].as_array().unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images[0]["isPrimary"], true);
    assert_eq!(images[1]["isPrimary"], false);
    assert_eq!(images[0]["alt"], "front porch");
    assert_eq!(body["data"]["primaryImage"], images[0]["url"]);
    assert!(body["data"]["primaryImage"].is_string());

    let url = images[0]["url"].as_str().unwrap();
    assert!(url.starts_with("/uploads/properties/"));
    let on_disk = h
        .state
        .images
        .root()
        .join(url.trim_start_matches("/uploads/"));
    assert!(on_disk.exists());

    let id = body["data"]["id"].as_str().unwrap();
    let (status, _, _) = h
        .send("DELETE", &format!("/api/admin/properties/{}", id), Some(&cookie), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!on_disk.exists());
}

#[tokio::test]
async fn image_updates_preserve_append_remove_and_repoint() {
    let h = harness().await;
    h.add_user("boss", Role::Admin).await;
    let cookie = h.login("boss").await;

    let created = h
        .send_multipart("POST", "/api/admin/properties", &cookie, multipart_listing(BOUNDARY))
        .await;
    let id = created["data"]["id"].as_str().unwrap().to_string();
    let uri = format!("/api/admin/properties/{}", id);
    let original = image_urls(&created);
    assert_eq!(original.len(), 2);

    // No files: order and primary flag survive a field edit.
    let (status, _, body) = h
        .send("PUT", &uri, Some(&cookie), Some(json!({ "price": 199000 })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["price"], 199000.0);
    assert_eq!(body["data"]["images"], created["data"]["images"]);

    // Multipart edit without files behaves the same.
    let body = h
        .send_multipart("PUT", &uri, &cookie, multipart_body(BOUNDARY, &[("title", "Lake Cabin II")], &[]))
        .await;
    assert_eq!(image_urls(&body), original);
    assert_eq!(primary_flags(&body), vec![true, false]);

    // Appending keeps the existing images first.
    let body = h
        .send_multipart(
            "PUT",
            &uri,
            &cookie,
            multipart_body(BOUNDARY, &[("appendImages", "true")], &["boathouse.png"]),
        )
        .await;
    let appended = image_urls(&body);
    assert_eq!(appended.len(), 3);
    assert_eq!(&appended[..2], &original[..]);
    assert_eq!(primary_flags(&body), vec![true, false, false]);

    // Re-point the primary, then drop the old primary.
    let (_, _, body) = h
        .send("PUT", &uri, Some(&cookie), Some(json!({ "primaryImage": appended[2] })))
        .await;
    assert_eq!(primary_flags(&body), vec![false, false, true]);
    assert_eq!(body["data"]["primaryImage"], appended[2].as_str());

    let (_, _, body) = h
        .send("PUT", &uri, Some(&cookie), Some(json!({ "removeImages": [appended[0]] })))
        .await;
    assert_eq!(image_urls(&body), appended[1..].to_vec());
    assert_eq!(primary_flags(&body), vec![false, true]);
    let removed = h
        .state
        .images
        .root()
        .join(appended[0].trim_start_matches("/uploads/"));
    assert!(!removed.exists());

    // New uploads without appendImages replace the list.
    let body = h
        .send_multipart("PUT", &uri, &cookie, multipart_body(BOUNDARY, &[], &["new-front.png"]))
        .await;
    let replaced = image_urls(&body);
    assert_eq!(replaced.len(), 1);
    assert!(!appended.contains(&replaced[0]));
    assert_eq!(primary_flags(&body), vec![true]);
}

#[tokio::test]
async fn public_settings_hide_private_categories() {
    let h = harness().await;
    h.add_user("boss", Role::Admin).await;
    let cookie = h.login("boss").await;

    let (status, _, _) = h
        .send(
            "PUT",
            "/api/admin/settings/company_name",
            Some(&cookie),
            Some(json!({ "value": "Acme Realty", "category": "company" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, body) = h
        .send(
            "PUT",
            "/api/admin/settings",
            Some(&cookie),
            Some(json!({ "settings": { "company_name": "Acme Homes", "primary_color": "#0a3d62" } })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["updated"].as_array().unwrap().len(), 2);
    let (status, _, _) = h
        .send(
            "PUT",
            "/api/admin/settings/primary_color",
            Some(&cookie),
            Some(json!({ "value": "#0a3d62", "category": "theme" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, _, body) = h.send("GET", "/api/settings/company", None, None).await;
    assert_eq!(body["settings"]["company_name"], "Acme Homes");
    let (_, _, body) = h.send("GET", "/api/settings/public", None, None).await;
    assert_eq!(body["settings"]["company_name"], "Acme Homes");
    assert!(body["settings"].get("primary_color").is_none());
}
