//! Basic example demonstrating axum-pathauth middleware.
//!
//! Run with: `cargo run --example basic`
//!
//! Test with:
//! ```sh
//! # Public endpoint (no rule matches, forwarded)
//! curl http://localhost:3000/public/info
//!
//! # Reading the admin area is not covered by a rule (forwarded)
//! curl http://localhost:3000/admin/settings
//!
//! # Changing settings as ops (allowed)
//! curl -X PUT -H "X-Roles: viewer,ops" http://localhost:3000/admin/settings
//!
//! # Changing settings as viewer (403)
//! curl -X PUT -H "X-Roles: viewer" http://localhost:3000/admin/settings
//!
//! # Reports need the analyst role, except for the health check
//! curl -H "X-Roles: analyst" http://localhost:3000/reports/q3
//! curl http://localhost:3000/reports/health
//!
//! # Exports with a numeric id, only from localhost
//! curl -H "X-Roles: analyst" http://localhost:3000/exports/42
//! ```

use axum::{
    routing::{get, put},
    Router,
};
use axum_pathauth::{HeaderRoleExtractor, PathAuthLayer, Rule, RuleTable};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Handler functions
async fn public_info() -> &'static str {
    "Public information - no rule covers it"
}

async fn read_settings() -> &'static str {
    "Admin settings - anyone may read"
}

async fn write_settings() -> &'static str {
    "Admin settings updated - requires 'ops' role"
}

async fn report() -> &'static str {
    "Quarterly report - requires 'analyst' role"
}

async fn export() -> &'static str {
    "Export - requires 'analyst' role from localhost"
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "axum_pathauth=debug,basic=debug".into()),
        )
        .init();

    // Build the rule table
    let table = RuleTable::builder()
        // Rule 1: only ops may change anything under /admin
        .rule(Rule::new("PathPrefix(`/admin`) && !Method(`GET`, `HEAD`)").allow("ops"))
        // Rule 2: reports need analysts, the health check excepted
        .rule(
            Rule::new("PathPrefix(`/reports`) && !Path(`/reports/health`)")
                .allow("analyst")
                .allow("admin"),
        )
        // Rule 3: numeric exports are local-only; remote callers match the
        // higher priority rule that nobody is allowed through
        .rule(
            Rule::new("Path(`/exports/{id:[0-9]+}`) && !ClientIP(`127.0.0.1`, `::1`)")
                .priority(1000)
                .allow("nobody"),
        )
        .rule(Rule::new("Path(`/exports/{id:[0-9]+}`)").allow("analyst"))
        .build()
        .expect("invalid rule table");

    tracing::info!("Rule table configured: {} rules", table.len());

    // Build the router with the middleware
    let app = Router::new()
        .route("/public/info", get(public_info))
        .route("/admin/settings", get(read_settings).put(write_settings))
        .route("/reports/{name}", get(report))
        .route("/exports/{id}", put(export).get(export))
        .layer(PathAuthLayer::new(
            table,
            HeaderRoleExtractor::new("X-Roles").with_delimiter(","),
        ));

    // Start the server
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Test with:");
    tracing::info!("  curl http://localhost:3000/public/info");
    tracing::info!("  curl -X PUT -H 'X-Roles: ops' http://localhost:3000/admin/settings");
    tracing::info!("  curl -X PUT -H 'X-Roles: viewer' http://localhost:3000/admin/settings");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();

    // Important: Use into_make_service_with_connect_info for ClientIP matchers
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
