//! API server for the SmartGrid platform.
//!
//! Serves login, provisioning, member management, credit consumption and
//! Stripe webhooks for the dashboard and every product app.

mod config;
mod cors;
mod identity;
mod mirror;
mod routes;
mod session;
mod state;

use std::net::SocketAddr;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smartgrid_api=debug,smartgrid_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!("Using data directory: {:?}", config.data_dir);
    if config.grid_apps_secret.is_none() {
        tracing::warn!("GRID_APPS_API_SECRET unset; service-to-service calls disabled");
    }
    if config.stripe_webhook_secret.is_none() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET unset; webhook delivery disabled");
    }

    let cors_layer = cors::layer(&config);
    let port = config.port;
    let app_state = AppState::new(config)
        .await
        .expect("Failed to initialize application state");

    let app = Router::new()
        .merge(routes::health::router())
        .merge(routes::auth::router())
        .merge(routes::members::router())
        .merge(routes::credits::router())
        .merge(routes::webhooks::router())
        .with_state(app_state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("API server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind API server port");
    axum::serve(listener, app)
        .await
        .expect("API server exited");
}
