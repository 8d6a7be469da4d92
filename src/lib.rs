//! # axum-pathauth
//!
//! Rule-based request authorization middleware for [axum](https://docs.rs/axum) 0.8.
//!
//! Each rule pairs a boolean match expression with the roles allowed through:
//! - **Expression**: matcher functions combined with `&&`, `||` and `!`
//!   (or `AND`, `OR`, `NOT`), e.g. ``PathPrefix(`/admin`) && !Method(`GET`)``
//! - **Priority**: higher first; `0` uses the length of the expression
//! - **Allowed roles**: a request passes if any of its roles is allowed
//! - **Methods**: optional extra method filter
//!
//! ## Features
//!
//! - **Traefik-style matchers** - `Host`, `HostRegexp`, `HostnameRegexp`,
//!   `ClientIP`, `Path`, `PathPrefix`, `PathRegexp`, `Method`, `Headers`,
//!   `HeadersRegexp` and `Query`
//! - **Compiled once** - expressions are parsed and compiled when a rule is registered
//! - **Fail-open routing** - requests matching no rule are forwarded untouched
//! - **Pluggable role extraction** - a header (optionally delimited) or a custom extractor
//! - **TOML and JSON configuration**
//!
//! ## Quick Start
//!
//! ```no_run
//! use axum::{Router, routing::get};
//! use axum_pathauth::{HeaderRoleExtractor, PathAuthLayer, Rule, RuleTable};
//! use std::net::SocketAddr;
//!
//! async fn public_handler() -> &'static str {
//!     "Public content"
//! }
//!
//! async fn admin_handler() -> &'static str {
//!     "Admin only"
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let table = RuleTable::builder()
//!         // Only ops may change anything under /admin
//!         .rule(Rule::new("PathPrefix(`/admin`) && !Method(`GET`)").allow("ops"))
//!         // Internal tools are reserved to the office network
//!         .rule(Rule::new("Host(`tools.example.com`) && !ClientIP(`10.0.0.0/8`)")
//!             .priority(1000)
//!             .allow("remote-admin"))
//!         .build()
//!         .unwrap();
//!
//!     let app = Router::new()
//!         .route("/public/info", get(public_handler))
//!         .route("/admin/dashboard", get(admin_handler).put(admin_handler))
//!         .layer(PathAuthLayer::new(
//!             table,
//!             HeaderRoleExtractor::new("X-Roles").with_delimiter(","),
//!         ));
//!
//!     // Important: Use into_make_service_with_connect_info for ClientIP matchers
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<SocketAddr>()
//!     ).await.unwrap();
//! }
//! ```
//!
//! ## Rule Evaluation
//!
//! 1. **Matching**: rules are tried by descending priority, ties in
//!    registration order; the first rule whose method filter and expression
//!    accept the request is selected
//! 2. **No match**: the request is forwarded
//! 3. **Match**: the request is forwarded if one of its roles is allowed,
//!    otherwise it is answered with `403 Forbidden`
//!
//! ## Matchers
//!
//! | Function | Arguments | Matches when |
//! |---|---|---|
//! | `Host` | hosts | the host equals one of them (case-insensitive) |
//! | `HostRegexp` | templates | the host matches a template like `{sub:[a-z]+}.example.com` |
//! | `HostnameRegexp` | regexps | the host matches one of them (unanchored) |
//! | `ClientIP` | CIDRs or IPs | the client address is inside one of them |
//! | `Path` | templates | the whole path matches a template like `/users/{id:[0-9]+}` |
//! | `PathPrefix` | templates | the path starts with a template on a segment boundary |
//! | `PathRegexp` | regexps | the path matches one of them (unanchored) |
//! | `Method` | methods | the method is one of them |
//! | `Headers` | name, value pairs | every pair is present |
//! | `HeadersRegexp` | name, regexp pairs | every header matches its regexp |
//! | `Query` | `key=value` pairs | every pair is present; `key=` only needs the key |
//!
//! Function names and keywords are case-insensitive.
//!
//! ## Role Extraction
//!
//! Roles are read from every occurrence of a header. With a delimiter, each
//! occurrence is split:
//!
//! ```
//! use axum_pathauth::HeaderRoleExtractor;
//!
//! // "X-Roles: admin,ops" gives two roles
//! let extractor = HeaderRoleExtractor::new("X-Roles").with_delimiter(",");
//! ```
//!
//! For more complex scenarios, implement the [`RoleExtractor`] trait:
//!
//! ```
//! use axum_pathauth::{RoleExtractor, RoleExtractionResult};
//! use http::Request;
//!
//! /// Roles set by an upstream authentication layer.
//! #[derive(Clone)]
//! struct SessionRoles(Vec<String>);
//!
//! struct SessionRoleExtractor;
//!
//! impl<B> RoleExtractor<B> for SessionRoleExtractor {
//!     fn extract_roles(&self, request: &Request<B>) -> RoleExtractionResult {
//!         match request.extensions().get::<SessionRoles>() {
//!             Some(session) => RoleExtractionResult::Roles(session.0.clone()),
//!             None => RoleExtractionResult::Anonymous,
//!         }
//!     }
//! }
//! ```
//!
//! ## Behind a Reverse Proxy
//!
//! When running behind a reverse proxy, configure the middleware to read the
//! client IP from a header:
//!
//! ```no_run
//! use axum_pathauth::{HeaderRoleExtractor, PathAuthLayer, RuleTable};
//!
//! let layer = PathAuthLayer::new(RuleTable::new(), HeaderRoleExtractor::new("X-Roles"))
//!     .with_forwarded_ip_header("X-Forwarded-For");
//! ```
//!
//! ## Custom Denied Response
//!
//! ```
//! use axum_pathauth::{AccessDenied, AccessDeniedHandler, HeaderRoleExtractor, PathAuthLayer, RuleTable};
//! use axum::response::{IntoResponse, Response};
//! use http::StatusCode;
//!
//! struct JsonHandler;
//!
//! impl AccessDeniedHandler for JsonHandler {
//!     fn handle(&self, denied: &AccessDenied) -> Response {
//!         let body = format!(r#"{{"error":"forbidden","path":"{}"}}"#, denied.path);
//!         (StatusCode::FORBIDDEN, [("content-type", "application/json")], body).into_response()
//!     }
//! }
//!
//! let layer = PathAuthLayer::new(RuleTable::new(), HeaderRoleExtractor::new("X-Roles"))
//!     .with_denied_handler(JsonHandler);
//! ```
//!
//! ## Configuration Files
//!
//! See [`PathAuthConfig`] for the TOML and JSON formats.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod expr;
mod extractor;
mod ip;
mod matcher;
mod middleware;
mod rule;
mod table;

// Re-export main types
pub use config::{AuthorizationConfig, ConfigError, PathAuthConfig, SourceConfig};
pub use error::{AccessDenied, AccessDeniedHandler, DefaultDeniedHandler, RuleError};
pub use expr::{Expr, ParseError, Terminal, MAX_DEPTH};
pub use extractor::{extract_roles, HeaderRoleExtractor, RoleExtractionResult, RoleExtractor};
pub use ip::{ClientIpStrategy, ForwardedHeaderStrategy, IpChecker, RemoteAddrStrategy};
pub use matcher::{CompiledMatcher, MatcherKind, Predicate};
pub use middleware::{Outcome, PathAuthLayer, PathAuthMiddleware, PathAuthState};
pub use rule::{Decision, RequestContext, Rule};
pub use table::{RuleEntry, RuleTable, RuleTableBuilder};

/// Prelude module for convenient imports.
///
/// ```
/// use axum_pathauth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ConfigError, PathAuthConfig};
    pub use crate::error::{AccessDenied, AccessDeniedHandler, RuleError};
    pub use crate::extractor::{HeaderRoleExtractor, RoleExtractionResult, RoleExtractor};
    pub use crate::ip::{ClientIpStrategy, ForwardedHeaderStrategy, RemoteAddrStrategy};
    pub use crate::middleware::{Outcome, PathAuthLayer};
    pub use crate::rule::{Decision, RequestContext, Rule};
    pub use crate::table::RuleTable;
}
