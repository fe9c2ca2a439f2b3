/**
 * Contact Routes
 * Visitor enquiries. Nothing is stored; each submission becomes a log line.
 */
use axum::{extract::State, routing::post, Router};

use super::parse_id;
use crate::content::is_valid_email;
use crate::error::{ApiError, ApiResponse, ApiResult};
use crate::form::FormData;
use crate::AppState;

const MAX_MESSAGE_CHARS: usize = 5000;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/contact/submit", post(submit))
        .route("/contact/property-inquiry", post(property_inquiry))
        .route("/contact/callback-request", post(callback_request))
        .route("/contact/newsletter", post(newsletter))
}

fn email(form: &FormData) -> ApiResult<String> {
    let email = form.required("email")?.to_lowercase();
    if !is_valid_email(&email) {
        return Err(ApiError::validation("Please provide a valid email address"));
    }
    Ok(email)
}

fn message(form: &FormData, required: bool) -> ApiResult<Option<String>> {
    let message = if required {
        Some(form.required("message")?)
    } else {
        form.owned("message")
    };
    if message
        .as_ref()
        .is_some_and(|m| m.chars().count() > MAX_MESSAGE_CHARS)
    {
        return Err(ApiError::validation(format!(
            "Message must be at most {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(message)
}

/// POST /api/contact/submit
pub async fn submit(form: FormData) -> ApiResult<ApiResponse<()>> {
    let name = form.required("name")?;
    let email = email(&form)?;
    let message = message(&form, true)?.unwrap_or_default();

    tracing::info!(
        kind = "contact",
        name = %name,
        email = %email,
        phone = form.text("phone").unwrap_or("-"),
        subject = form.text("subject").unwrap_or("-"),
        message_chars = message.chars().count(),
        "Contact form submitted"
    );
    Ok(ApiResponse::message(
        "Thank you for your message. We will get back to you soon.",
    ))
}

/// POST /api/contact/property-inquiry
pub async fn property_inquiry(
    State(state): State<AppState>,
    form: FormData,
) -> ApiResult<ApiResponse<()>> {
    let name = form.required("name")?;
    let email = email(&form)?;
    let property_id = parse_id(&form.required("propertyId")?, "Property")?;
    let message = message(&form, false)?;

    let property = state
        .store
        .get_property(property_id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| ApiError::not_found("Property not found"))?;

    tracing::info!(
        kind = "property_inquiry",
        name = %name,
        email = %email,
        phone = form.text("phone").unwrap_or("-"),
        property_id = %property.id,
        property = %property.title,
        agent_id = ?property.agent_id,
        has_message = message.is_some(),
        "Property inquiry submitted"
    );
    Ok(ApiResponse::message(
        "Thank you for your interest. An agent will contact you shortly.",
    ))
}

/// POST /api/contact/callback-request
pub async fn callback_request(form: FormData) -> ApiResult<ApiResponse<()>> {
    let name = form.required("name")?;
    let phone = form.required("phone")?;
    if phone.chars().filter(|c| c.is_ascii_digit()).count() < 7 {
        return Err(ApiError::validation("Please provide a valid phone number"));
    }

    tracing::info!(
        kind = "callback_request",
        name = %name,
        phone = %phone,
        preferred_time = form.text("preferredTime").unwrap_or("any"),
        "Callback requested"
    );
    Ok(ApiResponse::message(
        "Callback request received. We will call you soon.",
    ))
}

/// POST /api/contact/newsletter
pub async fn newsletter(form: FormData) -> ApiResult<ApiResponse<()>> {
    let email = email(&form)?;
    tracing::info!(kind = "newsletter", email = %email, "Newsletter signup");
    Ok(ApiResponse::message("Successfully subscribed to newsletter"))
}
