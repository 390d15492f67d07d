//! Credit consumption endpoint used by the product apps.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use smartgrid_core::billing::CreditReceipt;

use crate::identity::resolve_caller;
use crate::state::AppState;

use super::auth::{api_error, bad_request, map_core_error, ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsumeRequest {
    action: Option<String>,
    credits: Option<i64>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ConsumeResponse {
    success: bool,
    #[serde(flatten)]
    receipt: CreditReceipt,
}

/// Debits are always attributed to the logged-in user; the grid-apps
/// secret carries no user identity, so service callers are refused.
async fn consume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ConsumeRequest>,
) -> Result<Json<ConsumeResponse>, ApiError> {
    let caller = resolve_caller(state.config(), &headers).map_err(map_core_error)?;
    let Some(user_id) = caller.interactive_user_id() else {
        return Err(api_error(
            StatusCode::FORBIDDEN,
            "Credit consumption requires a user session",
        ));
    };
    let (Some(action), Some(credits)) = (req.action.as_deref(), req.credits) else {
        return Err(bad_request("action and credits are required"));
    };

    let receipt = state
        .resolver()
        .billing()
        .consume(
            user_id,
            action,
            credits,
            req.metadata.unwrap_or(serde_json::Value::Null),
        )
        .await
        .map_err(map_core_error)?;

    tracing::info!(
        user_id = %user_id,
        action = %receipt.action,
        credits = receipt.credits_consumed,
        remaining = receipt.credits_remaining,
        "Credits consumed"
    );
    Ok(Json(ConsumeResponse {
        success: true,
        receipt,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/credits/consume", post(consume))
}
