//! Error types for rule compilation and request denial.

use crate::expr::ParseError;
use crate::matcher::MatcherKind;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use std::fmt;

/// Error raised while registering a rule.
///
/// Any of these aborts the registration of the one rule that caused it.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// The rule expression could not be parsed.
    #[error("error while parsing rule {rule}: {source}")]
    Parse {
        /// The offending rule text.
        rule: String,
        /// The parser error.
        #[source]
        source: ParseError,
    },

    /// The rule has no expression.
    #[error("a rule is missing its expression")]
    EmptyExpression,

    /// The rule does not allow any role.
    #[error("rule {0} has not specified who is allowed")]
    NoAllowedRoles(String),

    /// A matcher was called without arguments.
    #[error("no args for matcher {0}")]
    NoArgs(MatcherKind),

    /// A matcher was called with an empty argument.
    #[error("empty args for matcher {matcher}, {args:?}")]
    EmptyArg {
        /// The matcher function.
        matcher: MatcherKind,
        /// All arguments of the call.
        args: Vec<String>,
    },

    /// A host literal or template contains non-ASCII characters.
    #[error("invalid value {value:?} for {matcher} matcher, non-ASCII characters are not allowed")]
    NonAscii {
        /// The matcher function.
        matcher: MatcherKind,
        /// The rejected value.
        value: String,
    },

    /// A template or regular expression could not be compiled.
    #[error("invalid pattern {pattern:?} for {matcher} matcher: {reason}")]
    InvalidPattern {
        /// The matcher function.
        matcher: MatcherKind,
        /// The rejected pattern.
        pattern: String,
        /// Why the pattern was rejected.
        reason: String,
    },

    /// A header matcher got an odd number of arguments.
    #[error("{matcher} matcher expects name/value pairs, got {count} args")]
    UnpairedArgs {
        /// The matcher function.
        matcher: MatcherKind,
        /// Number of arguments received.
        count: usize,
    },

    /// A header matcher got an invalid header name.
    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),

    /// A `Query` argument has no key.
    #[error("invalid query argument {0:?}, expected key=value")]
    InvalidQuery(String),

    /// The `ClientIP` network list could not be parsed.
    #[error("could not initialize IP checker for ClientIP matcher: {0}")]
    InvalidCidr(String),
}

/// Request denied by a matching rule.
#[derive(Debug, Clone)]
pub struct AccessDenied {
    /// The path that was requested.
    pub path: String,
    /// The request method.
    pub method: String,
    /// Roles carried by the request.
    pub roles: Vec<String>,
    /// Expression of the rule that denied the request.
    pub rule: String,
}

impl AccessDenied {
    /// Create a new access denied value.
    pub fn new(
        path: impl Into<String>,
        method: impl Into<String>,
        roles: Vec<String>,
        rule: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            roles,
            rule: rule.into(),
        }
    }
}

impl fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Access denied for roles {:?} to {} '{}' by rule {}",
            self.roles, self.method, self.path, self.rule
        )
    }
}

impl std::error::Error for AccessDenied {}

impl IntoResponse for AccessDenied {
    fn into_response(self) -> Response {
        let reason = StatusCode::FORBIDDEN
            .canonical_reason()
            .unwrap_or("Forbidden");
        (StatusCode::FORBIDDEN, reason).into_response()
    }
}

/// Custom response handler for denied requests.
///
/// # Example
/// ```
/// use axum_pathauth::{AccessDeniedHandler, AccessDenied};
/// use axum::response::{Response, IntoResponse};
/// use http::StatusCode;
///
/// struct TeapotHandler;
///
/// impl AccessDeniedHandler for TeapotHandler {
///     fn handle(&self, _denied: &AccessDenied) -> Response {
///         StatusCode::IM_A_TEAPOT.into_response()
///     }
/// }
/// ```
pub trait AccessDeniedHandler: Send + Sync {
    /// Build the response for a denied request.
    fn handle(&self, denied: &AccessDenied) -> Response;
}

/// Default handler: status 403 with the body `Forbidden`.
#[derive(Debug, Clone, Default)]
pub struct DefaultDeniedHandler;

impl AccessDeniedHandler for DefaultDeniedHandler {
    fn handle(&self, denied: &AccessDenied) -> Response {
        denied.clone().into_response()
    }
}
