//! Server-rendered admin pages.
//!
//! Deliberately plain HTML: every dynamic value goes through [`escape`].

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

use crate::db::models::{Setting, SettingValue};
use crate::routes::dashboard::DashboardSummary;
use crate::session::SessionUser;

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, user: Option<&SessionUser>, body: &str) -> String {
    let nav = match user {
        Some(u) => format!(
            r#"<nav><a href="/admin/dashboard">Dashboard</a> <a href="/admin/settings">Settings</a>
<form method="post" action="/admin/logout" style="display:inline"><button>Log out {}</button></form></nav>"#,
            escape(&u.display_name)
        ),
        None => String::new(),
    };
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>{} | Admin</title></head>
<body>
{}
<main>
{}
</main>
</body>
</html>"#,
        escape(title),
        nav,
        body
    )
}

fn flash(message: Option<&str>, class: &str) -> String {
    message
        .map(|m| format!(r#"<p class="{}">{}</p>"#, class, escape(m)))
        .unwrap_or_default()
}

pub fn login_page(redirect: &str, error: Option<&str>) -> Html<String> {
    let body = format!(
        r#"<h1>Sign in</h1>
{}
<form method="post" action="/admin/login">
  <input type="hidden" name="redirect" value="{}">
  <label>Username or email <input name="login" required></label>
  <label>Password <input type="password" name="password" required></label>
  <label><input type="checkbox" name="rememberMe" value="true"> Remember me</label>
  <button type="submit">Sign in</button>
</form>"#,
        flash(error, "error"),
        escape(redirect)
    );
    Html(layout("Sign in", None, &body))
}

pub fn access_denied_page(user: Option<&SessionUser>) -> Response {
    let body = r#"<h1>Access denied</h1>
<p>You do not have permission to view this page.</p>
<p><a href="/admin/dashboard">Back to dashboard</a></p>"#;
    (StatusCode::FORBIDDEN, Html(layout("Access denied", user, body))).into_response()
}

pub fn error_page(status: StatusCode, message: &str, user: Option<&SessionUser>) -> Response {
    let body = format!(
        "<h1>{}</h1>\n<p>{}</p>",
        status.as_u16(),
        escape(message)
    );
    (status, Html(layout("Error", user, &body))).into_response()
}

pub fn dashboard_page(user: &SessionUser, summary: &DashboardSummary) -> Html<String> {
    let c = &summary.counts;
    let mut body = format!(
        r#"<h1>Welcome, {}</h1>
<section>
<h2>Overview</h2>
<ul>
  <li>Properties: {} ({} active, {} featured)</li>
  <li>Team members: {}</li>
  <li>Blog posts: {} ({} published, {} drafts)</li>
  <li>Hero slides: {}</li>
  <li>Users: {}</li>
</ul>
</section>
<section>
<h2>Recent activity</h2>
<ul>"#,
        escape(&user.display_name),
        c.properties,
        c.active_properties,
        c.featured_properties,
        c.team_members,
        c.blog_posts,
        c.published_posts,
        c.draft_posts,
        c.hero_slides,
        c.users,
    );
    if summary.recent_activity.is_empty() {
        body.push_str("\n  <li>Nothing yet.</li>");
    }
    for item in &summary.recent_activity {
        body.push_str(&format!(
            "\n  <li>[{}] {} <small>{}</small></li>",
            escape(item.kind),
            escape(&item.title),
            item.updated_at.format("%Y-%m-%d %H:%M")
        ));
    }
    body.push_str("\n</ul>\n</section>");
    Html(layout("Dashboard", Some(user), &body))
}

fn setting_text(settings: &[Setting], key: &str) -> String {
    settings
        .iter()
        .find(|s| s.key == key)
        .map(|s| match &s.value {
            SettingValue::String(v) => v.clone(),
            other => other.to_json().to_string(),
        })
        .unwrap_or_default()
}

fn input_rows(settings: &[Setting], keys: &[(&str, &str)]) -> String {
    keys.iter()
        .map(|(key, label)| {
            format!(
                r#"  <label>{} <input name="{}" value="{}"></label>"#,
                escape(label),
                key,
                escape(&setting_text(settings, key))
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub const CONTACT_KEYS: &[(&str, &str)] = &[
    ("contact_email", "Email"),
    ("contact_phone", "Phone"),
    ("contact_address", "Address"),
    ("office_hours", "Office hours"),
];

pub const SOCIAL_KEYS: &[(&str, &str)] = &[
    ("social_facebook", "Facebook"),
    ("social_twitter", "Twitter"),
    ("social_instagram", "Instagram"),
    ("social_linkedin", "LinkedIn"),
    ("social_youtube", "YouTube"),
];

pub fn settings_page(
    user: &SessionUser,
    settings: &[Setting],
    notice: Option<&str>,
    error: Option<&str>,
) -> Html<String> {
    let mut body = format!(
        r#"<h1>Settings</h1>
{}{}
<section>
<h2>Contact information</h2>
<form method="post" action="/admin/settings/contact">
{}
  <button type="submit">Save contact info</button>
</form>
</section>
<section>
<h2>Social links</h2>
<form method="post" action="/admin/settings/social">
{}
  <button type="submit">Save social links</button>
</form>
</section>
<section>
<h2>Change password</h2>
<form method="post" action="/admin/settings/password">
  <label>Current password <input type="password" name="currentPassword" required></label>
  <label>New password <input type="password" name="newPassword" minlength="8" required></label>
  <label>Confirm new password <input type="password" name="confirmPassword" required></label>
  <button type="submit">Change password</button>
</form>
</section>
<section>
<h2>All settings</h2>
<table>
<tr><th>Key</th><th>Category</th><th>Type</th><th>Value</th></tr>"#,
        flash(notice, "notice"),
        flash(error, "error"),
        input_rows(settings, CONTACT_KEYS),
        input_rows(settings, SOCIAL_KEYS),
    );
    for s in settings {
        body.push_str(&format!(
            "\n<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&s.key),
            s.category,
            s.value.kind(),
            escape(&s.value.to_json().to_string())
        ));
    }
    body.push_str("\n</table>\n</section>");
    Html(layout("Settings", Some(user), &body))
}
