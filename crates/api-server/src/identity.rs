//! Caller resolution from request headers.
//!
//! Two authentication methods are accepted: an interactive user's access
//! token, or the static grid-apps secret presented by trusted sibling
//! services. The secret is compared first so a service caller is never
//! misparsed as a malformed JWT.

use axum::http::HeaderMap;
use smartgrid_core::access::Caller;
use smartgrid_core::{Error, Result};
use uuid::Uuid;

use crate::config::Config;
use crate::session;

pub const APP_SOURCE_HEADER: &str = "x-app-source";

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub fn app_source_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(APP_SOURCE_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

pub fn origin_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::ORIGIN)
        .and_then(|value| value.to_str().ok())
}

/// Resolve the caller identity or fail with 401.
pub fn resolve_caller(config: &Config, headers: &HeaderMap) -> Result<Caller> {
    let token =
        bearer_token(headers).ok_or_else(|| Error::Unauthorized("Unauthorized".to_string()))?;

    if let Some(secret) = config.grid_apps_secret.as_deref() {
        if token == secret {
            let source = app_source_header(headers).unwrap_or("unknown").to_string();
            tracing::debug!(source, "Authenticated via grid-apps secret");
            return Ok(Caller::Service { source });
        }
    }

    let claims = session::verify_access_token(config, token)?;
    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| Error::Unauthorized("Invalid token subject".to_string()))?;
    Ok(Caller::Interactive { user_id })
}
