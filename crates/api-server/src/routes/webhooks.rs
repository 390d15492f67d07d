//! Stripe webhook receiver.
//!
//! The signature scheme is Stripe's `Stripe-Signature` header: a
//! timestamp and an HMAC-SHA256 of `"{timestamp}.{raw body}"` under the
//! endpoint secret. Verification runs over the raw bytes before any JSON
//! parsing. Handlers must stay idempotent because Stripe redelivers
//! events until it sees a 2xx.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use smartgrid_core::billing::{SubscriptionEvent, SubscriptionStatus};
use smartgrid_core::Error as CoreError;
use uuid::Uuid;

use crate::state::AppState;

use super::auth::{api_error, bad_request, map_core_error, ApiError};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize)]
struct WebhookResponse {
    received: bool,
}

/// Parse `t=<unix>,v1=<hex>[,v1=...]` into the timestamp and candidate
/// signatures.
fn parse_signature_header(raw: &str) -> Option<(String, Vec<String>)> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in raw.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value.to_string()),
            Some(("v1", value)) => signatures.push(value.to_string()),
            _ => {}
        }
    }
    match (timestamp, signatures.is_empty()) {
        (Some(timestamp), false) => Some((timestamp, signatures)),
        _ => None,
    }
}

fn verify_signature(secret: &str, header: &str, payload: &[u8]) -> bool {
    let Some((timestamp, signatures)) = parse_signature_header(header) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());
    signatures.iter().any(|candidate| *candidate == expected)
}

fn parse_period_end(object: &Value) -> Option<DateTime<Utc>> {
    object
        .get("current_period_end")
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}

fn str_field<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

/// Translate a Stripe event envelope into a subscription event. Event
/// types outside the handled set return `None` and are acknowledged
/// without side effects.
fn translate_event(envelope: &Value) -> Result<Option<SubscriptionEvent>, ApiError> {
    let event_type = str_field(envelope, "/type")
        .ok_or_else(|| bad_request("Missing event type"))?;
    let object = envelope
        .pointer("/data/object")
        .ok_or_else(|| bad_request("Missing event object"))?;

    let event = match event_type {
        "checkout.session.completed" => {
            let user_id = str_field(object, "/metadata/supabase_user_id")
                .and_then(|raw| Uuid::parse_str(raw).ok())
                .ok_or_else(|| bad_request("Checkout session missing user metadata"))?;
            let subscription_id = str_field(object, "/subscription")
                .ok_or_else(|| bad_request("Checkout session missing subscription id"))?;
            let price_id = str_field(object, "/metadata/price_id").unwrap_or_default();
            Some(SubscriptionEvent::CheckoutCompleted {
                user_id,
                subscription_id: subscription_id.to_string(),
                price_id: price_id.to_string(),
                plan_name: str_field(object, "/metadata/plan_name").map(str::to_string),
                period_end: parse_period_end(object),
            })
        }
        "customer.subscription.updated" => {
            let subscription_id = str_field(object, "/id")
                .ok_or_else(|| bad_request("Subscription event missing id"))?;
            let status = str_field(object, "/status")
                .map(SubscriptionStatus::parse)
                .ok_or_else(|| bad_request("Subscription event missing status"))?;
            let price_id = str_field(object, "/items/data/0/price/id").unwrap_or_default();
            Some(SubscriptionEvent::SubscriptionUpdated {
                subscription_id: subscription_id.to_string(),
                price_id: price_id.to_string(),
                status,
                period_end: parse_period_end(object),
            })
        }
        "customer.subscription.deleted" => {
            let subscription_id = str_field(object, "/id")
                .ok_or_else(|| bad_request("Subscription event missing id"))?;
            Some(SubscriptionEvent::SubscriptionDeleted {
                subscription_id: subscription_id.to_string(),
            })
        }
        _ => None,
    };
    Ok(event)
}

async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let Some(secret) = state.config().stripe_webhook_secret.as_deref() else {
        return Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Webhook secret not configured",
        ));
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| bad_request("Missing signature header"))?;
    if !verify_signature(secret, signature, body.as_bytes()) {
        tracing::warn!("Webhook signature verification failed");
        return Err(bad_request("Invalid signature"));
    }

    let envelope: Value =
        serde_json::from_str(&body).map_err(|_| bad_request("Invalid JSON payload"))?;
    let event_type = str_field(&envelope, "/type").unwrap_or("unknown").to_string();

    match translate_event(&envelope)? {
        Some(event) => match state.resolver().billing().apply_event(event).await {
            Ok(()) => {}
            // An account may have been deleted between delivery attempts;
            // acknowledging stops the retry loop.
            Err(CoreError::NotFound(reason)) => {
                tracing::warn!(event_type, reason, "Webhook event for missing account");
            }
            Err(err) => return Err(map_core_error(err)),
        },
        None => {
            tracing::debug!(event_type, "Ignoring unhandled webhook event");
        }
    }

    Ok(Json(WebhookResponse { received: true }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/stripe", post(stripe_webhook))
}
