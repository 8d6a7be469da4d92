//! Authorization rules and the request view they are matched against.
//!
//! A [`Rule`] pairs a boolean match expression with the set of roles allowed
//! through when the expression matches:
//!
//! - **Expression**: e.g. ``PathPrefix(`/admin`) && !Method(`GET`)``
//! - **Priority**: higher is tried first; `0` means "length of the expression"
//! - **Allowed roles**: any overlap with the request's roles allows it
//! - **Methods**: optional extra method filter (empty = any)

use http::{HeaderMap, Method, Request, Uri};
use std::collections::HashSet;
use std::net::IpAddr;

/// Borrowed view of a request used during rule matching.
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    /// Request method.
    pub method: &'a Method,
    /// Request URI.
    pub uri: &'a Uri,
    /// Request headers.
    pub headers: &'a HeaderMap,
    /// Client address, when it could be determined.
    pub client_ip: Option<IpAddr>,
    host: String,
}

impl<'a> RequestContext<'a> {
    /// Create a new request context.
    pub fn new(
        method: &'a Method,
        uri: &'a Uri,
        headers: &'a HeaderMap,
        client_ip: Option<IpAddr>,
    ) -> Self {
        Self {
            method,
            uri,
            headers,
            client_ip,
            host: request_host(uri, headers),
        }
    }

    /// Create a context borrowing from a request.
    pub fn from_request<B>(request: &'a Request<B>, client_ip: Option<IpAddr>) -> Self {
        Self::new(request.method(), request.uri(), request.headers(), client_ip)
    }

    /// Lower-cased host without port or IPv6 brackets. Empty when unknown.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Request path.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Raw query string, empty when absent.
    pub fn query(&self) -> &str {
        self.uri.query().unwrap_or("")
    }
}

/// Host from the URI authority, or else from the `Host` header.
fn request_host(uri: &Uri, headers: &HeaderMap) -> String {
    let raw = match uri.host() {
        Some(host) => host,
        None => headers
            .get(http::header::HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(""),
    };

    let host = if let Some(bracketed) = raw.strip_prefix('[') {
        // [::1]:8080
        bracketed.split(']').next().unwrap_or(bracketed)
    } else {
        match raw.rsplit_once(':') {
            Some((host, _port)) => host,
            None => raw,
        }
    };

    host.to_ascii_lowercase()
}

/// Outcome of comparing a request's roles with a rule's allow-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// At least one role is allowed.
    Allow,
    /// No role is allowed.
    Deny,
}

impl Decision {
    /// Check if the request may proceed.
    pub fn is_allow(self) -> bool {
        self == Self::Allow
    }
}

/// An authorization rule.
///
/// # Example
/// ```
/// use axum_pathauth::Rule;
///
/// let rule = Rule::new("PathPrefix(`/admin`) && !Method(`GET`)")
///     .allow("ops")
///     .allow("admin");
/// assert_eq!(rule.effective_priority(), rule.expression().len() as i32);
/// ```
#[derive(Debug, Clone)]
pub struct Rule {
    expression: String,
    priority: i32,
    allowed_roles: HashSet<String>,
    allowed_methods: HashSet<String>,
}

impl Rule {
    /// Create a rule with default priority and no allowed roles.
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            priority: 0,
            allowed_roles: HashSet::new(),
            allowed_methods: HashSet::new(),
        }
    }

    /// Set the priority. `0` falls back to the expression length.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Allow a role.
    pub fn allow(mut self, role: impl Into<String>) -> Self {
        self.allowed_roles.insert(role.into());
        self
    }

    /// Allow several roles.
    pub fn allow_all<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_roles.extend(roles.into_iter().map(Into::into));
        self
    }

    /// Restrict the rule to a method (upper-cased).
    pub fn method(mut self, method: impl AsRef<str>) -> Self {
        self.allowed_methods
            .insert(method.as_ref().to_ascii_uppercase());
        self
    }

    /// Restrict the rule to several methods.
    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_methods
            .extend(methods.into_iter().map(|m| m.as_ref().to_ascii_uppercase()));
        self
    }

    /// The expression source text.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The configured priority, `0` if defaulted.
    pub fn configured_priority(&self) -> i32 {
        self.priority
    }

    /// The priority used for ordering.
    pub fn effective_priority(&self) -> i32 {
        if self.priority == 0 {
            i32::try_from(self.expression.len()).unwrap_or(i32::MAX)
        } else {
            self.priority
        }
    }

    /// Roles allowed through.
    pub fn allowed_roles(&self) -> &HashSet<String> {
        &self.allowed_roles
    }

    /// Methods the rule applies to (empty = any).
    pub fn allowed_methods(&self) -> &HashSet<String> {
        &self.allowed_methods
    }

    /// Check the method filter.
    #[inline]
    pub fn applies_to_method(&self, method: &Method) -> bool {
        self.allowed_methods.is_empty() || self.allowed_methods.contains(method.as_str())
    }

    /// Allow iff any of `roles` is in the allow-set.
    pub fn decide<S: AsRef<str>>(&self, roles: &[S]) -> Decision {
        if roles
            .iter()
            .any(|role| self.allowed_roles.contains(role.as_ref()))
        {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}
