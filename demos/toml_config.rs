//! Example demonstrating TOML configuration for authorization rules.
//!
//! This example shows two methods:
//! 1. Compile-time embedded configuration (include_str!)
//! 2. Runtime file loading
//!
//! Run with: `cargo run --example toml_config`
//!
//! Test endpoints:
//! ```sh
//! # Public endpoint (no rule, forwarded)
//! curl http://localhost:3000/public/info
//!
//! # API write as editor (allowed)
//! curl -X POST -H "X-Roles: editor" http://localhost:3000/api/users
//!
//! # API write as reader (403)
//! curl -X POST -H "X-Roles: reader" http://localhost:3000/api/users
//!
//! # Admin endpoint with a debug query (admins only)
//! curl -H "X-Roles: admin" "http://localhost:3000/admin/dashboard?debug=1"
//!
//! # Metrics scraped by the monitoring agent
//! curl -H "User-Agent: prometheus/2.0" -H "X-Roles: monitoring" http://localhost:3000/internal/metrics
//! ```

use axum::{routing::get, Router};
use axum_pathauth::PathAuthConfig;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// ============================================================================
// METHOD 1: Compile-time embedded configuration
// ============================================================================
// The configuration is baked into the binary at compile time.
// Changes require recompilation.

const EMBEDDED_CONFIG: &str = r#"
[source]
type = "header"
name = "X-Roles"
delimiter = ","

# Writes to the API need an editor
[[authorization]]
expression = "PathPrefix(`/api`) AND NOT Method(`GET`, `HEAD`)"
allowed = ["editor", "admin"]

# The debug view of the dashboard is admin only
[[authorization]]
match = "Path(`/admin/dashboard`) && Query(`debug=`)"
priority = 500
allowed = ["admin"]

# Metrics only for the scraper
[[authorization]]
expression = "PathPrefix(`/internal`) && HeadersRegexp(`User-Agent`, `^prometheus/`)"
allowed = ["monitoring"]

# Everything else under /internal is closed
[[authorization]]
path = ["^/internal"]
priority = 1
allowed = ["admin"]
"#;

// Alternative: Load from file at compile time
// const EMBEDDED_CONFIG: &str = include_str!("pathauth.toml");

// ============================================================================
// METHOD 2: Runtime file loading (commented out)
// ============================================================================
// fn load_config_from_file() -> axum_pathauth::PathAuthConfig {
//     axum_pathauth::PathAuthConfig::from_toml_file("config/pathauth.toml")
//         .expect("Failed to load authorization config")
// }

// Handlers
async fn public_info() -> &'static str {
    "Public information - accessible to everyone"
}

async fn api_users() -> &'static str {
    "API Users - writes require 'editor' or 'admin' role"
}

async fn admin_dashboard() -> &'static str {
    "Admin Dashboard - debug view requires 'admin' role"
}

async fn internal_metrics() -> &'static str {
    "Internal Metrics - scraper only"
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "axum_pathauth=debug,toml_config=info".into()),
        )
        .init();

    // Load configuration from embedded TOML
    let config = PathAuthConfig::from_toml(EMBEDDED_CONFIG)
        .expect("Failed to parse embedded authorization config");

    // Alternative: Load from file at runtime
    // let config = PathAuthConfig::from_toml_file("demos/pathauth.toml")
    //     .expect("Failed to load authorization config file");

    let layer = config.build_layer().expect("Invalid authorization rules");
    tracing::info!("Loaded {} authorization rules", layer.table().len());
    for entry in layer.table().entries() {
        tracing::info!(
            priority = entry.rule().effective_priority(),
            "  {}",
            entry.rule().expression()
        );
    }

    // Build router
    let app = Router::new()
        .route("/public/info", get(public_info))
        .route("/api/users", get(api_users).post(api_users))
        .route("/admin/dashboard", get(admin_dashboard))
        .route("/internal/metrics", get(internal_metrics))
        .layer(layer);

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Starting server on {}", addr);
    tracing::info!("");
    tracing::info!("Test commands:");
    tracing::info!("  curl http://localhost:3000/public/info                                  # Public (forwarded)");
    tracing::info!("  curl -X POST -H 'X-Roles: editor' http://localhost:3000/api/users         # Editor (allowed)");
    tracing::info!("  curl -X POST -H 'X-Roles: reader' http://localhost:3000/api/users         # Reader (denied)");
    tracing::info!("  curl -H 'X-Roles: admin' 'http://localhost:3000/admin/dashboard?debug=1'  # Admin (allowed)");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
