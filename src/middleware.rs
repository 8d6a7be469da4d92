//! Authorization middleware for axum.
//!
//! This module provides the [`PathAuthLayer`] and [`PathAuthMiddleware`]
//! types that integrate with axum's middleware system.
//!
//! For every request the middleware finds the highest-priority matching rule:
//!
//! - no rule matches: the request is forwarded unchanged
//! - a rule matches and one of the request's roles is allowed: forwarded
//! - a rule matches and no role is allowed: answered with `403 Forbidden`

use crate::error::{AccessDenied, AccessDeniedHandler, DefaultDeniedHandler};
use crate::extractor::RoleExtractor;
use crate::ip::{ClientIpStrategy, ForwardedHeaderStrategy, RemoteAddrStrategy};
use crate::rule::{Decision, RequestContext};
use crate::table::RuleTable;

use axum::response::Response;
use futures_util::future::BoxFuture;
use http::Request;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Result of evaluating a request against the rule table.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// No rule matched; the request passes through.
    Unmatched,
    /// A rule matched and allowed one of the request's roles.
    Allowed,
    /// A rule matched and allowed none of the request's roles.
    Denied(AccessDenied),
}

impl Outcome {
    /// Check if the request is forwarded to the inner service.
    pub fn is_forwarded(&self) -> bool {
        !matches!(self, Self::Denied(_))
    }
}

/// Shared state of the authorization middleware.
pub struct PathAuthState<E> {
    /// The rule table.
    pub table: Arc<RuleTable>,
    /// The role extractor.
    pub role_extractor: Arc<E>,
    /// How the client address is resolved for `ClientIP` matchers.
    pub ip_strategy: Arc<dyn ClientIpStrategy>,
    /// The handler for denied requests.
    pub denied_handler: Arc<dyn AccessDeniedHandler>,
}

// Manual Clone impl to avoid requiring E: Clone (it is behind an Arc)
impl<E> Clone for PathAuthState<E> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            role_extractor: self.role_extractor.clone(),
            ip_strategy: self.ip_strategy.clone(),
            denied_handler: self.denied_handler.clone(),
        }
    }
}

impl<E> PathAuthState<E> {
    /// Decide what happens to a request.
    ///
    /// # Example
    /// ```
    /// use axum_pathauth::{HeaderRoleExtractor, Outcome, PathAuthLayer, Rule, RuleTable};
    /// use http::Request;
    ///
    /// let table = RuleTable::builder()
    ///     .rule(Rule::new("PathPrefix(`/admin`) && !Method(`GET`)").allow("ops"))
    ///     .build()
    ///     .unwrap();
    /// let layer = PathAuthLayer::new(table, HeaderRoleExtractor::new("X-Roles"));
    ///
    /// let req = Request::put("/admin/x").header("X-Roles", "viewer").body(()).unwrap();
    /// assert!(matches!(layer.state().evaluate(&req), Outcome::Denied(_)));
    ///
    /// let req = Request::get("/admin/x").header("X-Roles", "viewer").body(()).unwrap();
    /// assert!(matches!(layer.state().evaluate(&req), Outcome::Unmatched));
    /// ```
    pub fn evaluate<B>(&self, request: &Request<B>) -> Outcome
    where
        E: RoleExtractor<B>,
    {
        let client_ip = self
            .ip_strategy
            .client_ip(request.headers(), request.extensions());
        let ctx = RequestContext::from_request(request, client_ip);

        let Some(rule) = self.table.match_request(&ctx) else {
            return Outcome::Unmatched;
        };

        let roles = self.role_extractor.extract_roles(request).into_roles();

        match rule.decide(&roles) {
            Decision::Allow => {
                tracing::trace!(
                    roles = ?roles,
                    method = %request.method(),
                    path = %request.uri().path(),
                    ip = ?client_ip,
                    rule = rule.expression(),
                    "Authorization allowed request"
                );
                Outcome::Allowed
            }
            Decision::Deny => {
                tracing::info!(
                    roles = ?roles,
                    method = %request.method(),
                    path = %request.uri().path(),
                    ip = ?client_ip,
                    rule = rule.expression(),
                    "Authorization denied request"
                );
                Outcome::Denied(AccessDenied::new(
                    request.uri().path(),
                    request.method().as_str(),
                    roles,
                    rule.expression(),
                ))
            }
        }
    }
}

/// A Tower layer that adds authorization to a service.
///
/// # Example
/// ```no_run
/// use axum::{Router, routing::get};
/// use axum_pathauth::{HeaderRoleExtractor, PathAuthLayer, Rule, RuleTable};
/// use std::net::SocketAddr;
///
/// async fn handler() -> &'static str {
///     "Hello, World!"
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let table = RuleTable::builder()
///         .rule(Rule::new("PathPrefix(`/admin`)").allow("admin"))
///         .build()
///         .unwrap();
///     let extractor = HeaderRoleExtractor::new("X-Roles").with_delimiter(",");
///
///     let app = Router::new()
///         .route("/admin", get(handler))
///         .layer(PathAuthLayer::new(table, extractor));
///
///     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
///     axum::serve(
///         listener,
///         app.into_make_service_with_connect_info::<SocketAddr>()
///     ).await.unwrap();
/// }
/// ```
pub struct PathAuthLayer<E> {
    state: PathAuthState<E>,
}

impl<E> Clone for PathAuthLayer<E> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<E> PathAuthLayer<E> {
    /// Create a new layer with the given table and role extractor.
    ///
    /// Uses the peer address for `ClientIP` matchers and the default denied
    /// handler (plain text 403).
    pub fn new(table: impl Into<Arc<RuleTable>>, role_extractor: E) -> Self {
        Self {
            state: PathAuthState {
                table: table.into(),
                role_extractor: Arc::new(role_extractor),
                ip_strategy: Arc::new(RemoteAddrStrategy),
                denied_handler: Arc::new(DefaultDeniedHandler),
            },
        }
    }

    /// Replace the role extractor.
    pub fn with_role_extractor<E2>(self, extractor: E2) -> PathAuthLayer<E2> {
        PathAuthLayer {
            state: PathAuthState {
                table: self.state.table,
                role_extractor: Arc::new(extractor),
                ip_strategy: self.state.ip_strategy,
                denied_handler: self.state.denied_handler,
            },
        }
    }

    /// Set how the client address is resolved.
    pub fn with_ip_strategy(mut self, strategy: impl ClientIpStrategy + 'static) -> Self {
        self.state.ip_strategy = Arc::new(strategy);
        self
    }

    /// Take the client address from a forwarding header (e.g. `X-Forwarded-For`).
    ///
    /// When behind a reverse proxy, the peer address is the proxy's.
    pub fn with_forwarded_ip_header(self, header: impl Into<String>) -> Self {
        self.with_ip_strategy(ForwardedHeaderStrategy::new(header))
    }

    /// Set a custom access denied handler.
    pub fn with_denied_handler(mut self, handler: impl AccessDeniedHandler + 'static) -> Self {
        self.state.denied_handler = Arc::new(handler);
        self
    }

    /// Get a reference to the rule table.
    pub fn table(&self) -> &RuleTable {
        &self.state.table
    }

    /// Get the middleware state.
    pub fn state(&self) -> &PathAuthState<E> {
        &self.state
    }
}

impl<S, E> Layer<S> for PathAuthLayer<E> {
    type Service = PathAuthMiddleware<S, E>;

    fn layer(&self, inner: S) -> Self::Service {
        PathAuthMiddleware {
            inner,
            state: self.state.clone(),
        }
    }
}

/// The authorization middleware service.
pub struct PathAuthMiddleware<S, E> {
    inner: S,
    state: PathAuthState<E>,
}

impl<S: Clone, E> Clone for PathAuthMiddleware<S, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            state: self.state.clone(),
        }
    }
}

impl<S, E, ReqBody> Service<Request<ReqBody>> for PathAuthMiddleware<S, E>
where
    S: Service<Request<ReqBody>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    E: RoleExtractor<ReqBody> + 'static,
    ReqBody: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // Decide synchronously before entering the async block
        let outcome = self.state.evaluate(&request);
        let denied_handler = self.state.denied_handler.clone();
        // The service readied by poll_ready handles this request
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            match outcome {
                Outcome::Denied(denied) => Ok(denied_handler.handle(&denied)),
                Outcome::Allowed | Outcome::Unmatched => inner.call(request).await,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{HeaderRoleExtractor, RoleExtractionResult};
    use crate::rule::Rule;
    use axum::body::Body as AxumBody;
    use axum::response::IntoResponse;
    use axum::routing::{any, get};
    use axum::Router;
    use http::StatusCode;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn handler() -> &'static str {
        "ok"
    }

    fn app(layer: PathAuthLayer<HeaderRoleExtractor>) -> Router {
        Router::new()
            .route("/admin/settings", any(handler))
            .route("/public", get(handler))
            .layer(layer)
    }

    fn admin_layer() -> PathAuthLayer<HeaderRoleExtractor> {
        let table = RuleTable::builder()
            .rule(Rule::new("PathPrefix(`/admin`) AND NOT Method(`GET`)").allow("ops"))
            .build()
            .unwrap();
        PathAuthLayer::new(table, HeaderRoleExtractor::new("X-Roles").with_delimiter(","))
    }

    async fn send(app: Router, method: &str, uri: &str, roles: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(roles) = roles {
            builder = builder.header("X-Roles", roles);
        }
        let response = app.oneshot(builder.body(AxumBody::empty()).unwrap()).await.unwrap();

        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_allowed_role_is_forwarded() {
        let (status, body) = send(app(admin_layer()), "PUT", "/admin/settings", Some("ops")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_unmatched_request_is_forwarded() {
        // The rule excludes GET, so no rule matches and the role is irrelevant
        let (status, _) = send(app(admin_layer()), "GET", "/admin/settings", Some("ops")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(app(admin_layer()), "GET", "/admin/settings", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(app(admin_layer()), "GET", "/public", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_denied_role_gets_forbidden() {
        let (status, body) = send(app(admin_layer()), "PUT", "/admin/settings", Some("viewer")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, "Forbidden");

        let (status, _) = send(app(admin_layer()), "DELETE", "/admin/settings", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_delimited_roles() {
        let (status, _) = send(app(admin_layer()), "PUT", "/admin/settings", Some("viewer,ops")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_client_ip_from_forwarded_header() {
        let table = RuleTable::builder()
            .rule(Rule::new("ClientIP(`10.0.0.0/8`)").allow("internal"))
            .build()
            .unwrap();
        let layer = PathAuthLayer::new(table, HeaderRoleExtractor::new("X-Roles"))
            .with_forwarded_ip_header("X-Forwarded-For");
        let app = Router::new().route("/public", get(handler)).layer(layer);

        let request = |ip: &str| {
            Request::get("/public")
                .header("X-Forwarded-For", ip)
                .body(AxumBody::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(request("10.1.2.3")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app.clone().oneshot(request("192.0.2.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // No resolvable address: ClientIP never matches
        let response = app
            .oneshot(Request::get("/public").body(AxumBody::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_denied_handler() {
        struct Teapot;

        impl AccessDeniedHandler for Teapot {
            fn handle(&self, _denied: &AccessDenied) -> Response {
                StatusCode::IM_A_TEAPOT.into_response()
            }
        }

        let layer = admin_layer().with_denied_handler(Teapot);
        let (status, _) = send(app(layer), "PUT", "/admin/settings", Some("viewer")).await;
        assert_eq!(status, StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn test_request_goes_to_the_readied_service() {
        // Answers 200 only when called after its own poll_ready
        #[derive(Default)]
        struct NeedsReady {
            ready: bool,
        }

        impl Clone for NeedsReady {
            fn clone(&self) -> Self {
                Self::default()
            }
        }

        impl Service<Request<()>> for NeedsReady {
            type Response = Response;
            type Error = std::convert::Infallible;
            type Future = std::future::Ready<Result<Response, Self::Error>>;

            fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
                self.ready = true;
                Poll::Ready(Ok(()))
            }

            fn call(&mut self, _request: Request<()>) -> Self::Future {
                let status = if std::mem::take(&mut self.ready) {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                std::future::ready(Ok(status.into_response()))
            }
        }

        let mut service = admin_layer().layer(NeedsReady::default());

        for (method, roles) in [("PUT", "ops"), ("GET", "viewer"), ("PATCH", "ops")] {
            let request = Request::builder()
                .method(method)
                .uri("/admin/settings")
                .header("X-Roles", roles)
                .body(())
                .unwrap();
            let response = service.ready().await.unwrap().call(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[test]
    fn test_evaluate_with_custom_extractor() {
        struct AlwaysOps;

        impl<B> RoleExtractor<B> for AlwaysOps {
            fn extract_roles(&self, _request: &Request<B>) -> RoleExtractionResult {
                RoleExtractionResult::Roles(vec!["ops".to_string()])
            }
        }

        let layer = admin_layer().with_role_extractor(AlwaysOps);
        assert_eq!(layer.table().len(), 1);

        let req = Request::delete("/admin/x").body(()).unwrap();
        let outcome = layer.state().evaluate(&req);
        assert!(matches!(outcome, Outcome::Allowed));
        assert!(outcome.is_forwarded());
    }

    #[test]
    fn test_denied_outcome_details() {
        let layer = admin_layer();
        let req = Request::post("/admin/x")
            .header("X-Roles", "viewer,guest")
            .body(())
            .unwrap();

        match layer.state().evaluate(&req) {
            Outcome::Denied(denied) => {
                assert_eq!(denied.path, "/admin/x");
                assert_eq!(denied.method, "POST");
                assert_eq!(denied.roles, vec!["viewer", "guest"]);
                assert_eq!(denied.rule, "PathPrefix(`/admin`) AND NOT Method(`GET`)");
            }
            other => panic!("Expected denial, got {other:?}"),
        }
    }
}
