//! Centralized cross-origin policy.
//!
//! One layer serves every route: origins on the allow-list (and any
//! localhost origin, for development) get their own value echoed back
//! with credentials allowed; everything else gets no CORS headers, which
//! is the deny mechanism for browser clients. The layer also answers
//! preflights before any handler or auth logic runs.

use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::Config;

pub fn layer(config: &Config) -> CorsLayer {
    let allowed = config.allowed_origins.clone();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _request_parts| match origin.to_str() {
                Ok(origin) => is_allowed_origin(&allowed, origin),
                Err(_) => false,
            },
        ))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-app-source"),
        ])
        .max_age(Duration::from_secs(86_400))
}

fn is_allowed_origin(allowed: &[String], origin: &str) -> bool {
    allowed.iter().any(|candidate| candidate == origin)
        || origin.starts_with("http://localhost:")
        || origin.starts_with("http://127.0.0.1:")
}
