//! Digital Goods Storefront Server
//!
//! Axum-based server: sign-in, catalog, and the redirect checkout flow
//! against the payment gateway.

mod config;
mod handlers;
mod identity;
mod state;
mod views;

use axum::{
    Router,
    body::Body,
    http::Request,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;
use crate::handlers::{
    app, cancel_ec, do_ec_payment, health_check, login, purchases, root, set_ec,
};
use crate::state::AppState;

/// Request span carrying only method and path; query strings hold session
/// ids and return-URL signatures.
fn request_span(request: &Request<Body>) -> tracing::Span {
    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
    )
}

/// Build the application router
fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & landing
        .route("/health", get(health_check))
        .route("/", get(root))
        // Sign-in
        .route("/login", get(login))
        .route("/app", get(app))
        .route("/purchases", get(purchases))
        // Checkout
        .route("/set_ec", post(set_ec))
        .route("/do_ec_payment", get(do_ec_payment))
        .route("/cancel_ec", get(cancel_ec))
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let state = AppState::from_config(&config)?;

    tracing::info!("Catalog has {} products:", state.catalog.len());
    for product in state.catalog.products() {
        tracing::info!("  • {} ({})", product.id, product.amount());
    }

    let app = build_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 digital goods server running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health         - Health check");
    tracing::info!("  GET  /login          - Sign in");
    tracing::info!("  GET  /app            - Sign-in callback, catalog");
    tracing::info!("  GET  /purchases      - Download a purchased item");
    tracing::info!("  POST /set_ec         - Begin checkout");
    tracing::info!("  GET  /do_ec_payment  - Gateway return URL");
    tracing::info!("  GET  /cancel_ec      - Gateway cancel URL");
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
