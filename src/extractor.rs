//! Role extraction from HTTP requests.
//!
//! Roles are opaque strings compared verbatim with a rule's allow-set. The
//! default source is a request header; every occurrence of the header is
//! read and, when a delimiter is configured, split into several roles.
//!
//! ```text
//! X-Roles: admin,ops
//! X-Roles: viewer
//!
//! delimiter ","  -> ["admin", "ops", "viewer"]
//! no delimiter   -> ["admin,ops", "viewer"]
//! ```

use http::{HeaderMap, Request};
use std::sync::Arc;

/// Result of role extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleExtractionResult {
    /// Roles were found, in request order.
    Roles(Vec<String>),
    /// The request carries no roles.
    Anonymous,
}

impl RoleExtractionResult {
    /// Get the roles, empty for anonymous requests.
    pub fn into_roles(self) -> Vec<String> {
        match self {
            Self::Roles(roles) => roles,
            Self::Anonymous => Vec::new(),
        }
    }
}

/// Trait for extracting roles from HTTP requests.
///
/// The trait is synchronous: roles come from data already attached to the
/// request, such as headers or extensions set by an authentication layer.
///
/// # Example
/// ```
/// use axum_pathauth::{RoleExtractor, RoleExtractionResult};
/// use http::Request;
///
/// /// Every caller on the internal network is an operator.
/// struct InternalOps;
///
/// impl<B> RoleExtractor<B> for InternalOps {
///     fn extract_roles(&self, _request: &Request<B>) -> RoleExtractionResult {
///         RoleExtractionResult::Roles(vec!["ops".to_string()])
///     }
/// }
/// ```
pub trait RoleExtractor<B>: Send + Sync {
    /// Extract the roles of an HTTP request.
    fn extract_roles(&self, request: &Request<B>) -> RoleExtractionResult;
}

impl<B, T: RoleExtractor<B>> RoleExtractor<B> for Arc<T> {
    fn extract_roles(&self, request: &Request<B>) -> RoleExtractionResult {
        (**self).extract_roles(request)
    }
}

impl<B, T: RoleExtractor<B> + ?Sized> RoleExtractor<B> for Box<T> {
    fn extract_roles(&self, request: &Request<B>) -> RoleExtractionResult {
        (**self).extract_roles(request)
    }
}

/// Collect roles from every occurrence of a header.
///
/// Each occurrence is split on `delimiter` when one is given. Order and case
/// are preserved. Values are decoded as UTF-8, with invalid byte sequences
/// replaced by U+FFFD, so a stray byte never hides the other roles in the value.
///
/// # Example
/// ```
/// use axum_pathauth::extract_roles;
/// use http::HeaderMap;
///
/// let mut headers = HeaderMap::new();
/// headers.append("x-roles", "admin,ops".parse().unwrap());
/// headers.append("x-roles", "viewer".parse().unwrap());
///
/// assert_eq!(extract_roles(&headers, "X-Roles", Some(",")), ["admin", "ops", "viewer"]);
/// assert_eq!(extract_roles(&headers, "X-Roles", None), ["admin,ops", "viewer"]);
/// ```
pub fn extract_roles(headers: &HeaderMap, header_name: &str, delimiter: Option<&str>) -> Vec<String> {
    let mut roles = Vec::new();

    for value in headers.get_all(header_name) {
        let value = String::from_utf8_lossy(value.as_bytes());

        match delimiter {
            Some(delimiter) => roles.extend(value.split(delimiter).map(str::to_string)),
            None => roles.push(value.into_owned()),
        }
    }

    roles
}

/// Extract roles from a request header.
///
/// # Example
/// ```
/// use axum_pathauth::HeaderRoleExtractor;
///
/// // One role per header occurrence
/// let extractor = HeaderRoleExtractor::new("X-Roles");
///
/// // Comma separated roles
/// let extractor = HeaderRoleExtractor::new("X-Roles").with_delimiter(",");
/// ```
#[derive(Debug, Clone)]
pub struct HeaderRoleExtractor {
    header_name: String,
    delimiter: Option<String>,
}

impl HeaderRoleExtractor {
    /// Create a new header role extractor.
    pub fn new(header_name: impl Into<String>) -> Self {
        Self {
            header_name: header_name.into(),
            delimiter: None,
        }
    }

    /// Split every header occurrence on `delimiter`. An empty delimiter disables splitting.
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        let delimiter = delimiter.into();
        self.delimiter = (!delimiter.is_empty()).then_some(delimiter);
        self
    }

    /// The header read by this extractor.
    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    /// The delimiter, if any.
    pub fn delimiter(&self) -> Option<&str> {
        self.delimiter.as_deref()
    }
}

impl<B> RoleExtractor<B> for HeaderRoleExtractor {
    fn extract_roles(&self, request: &Request<B>) -> RoleExtractionResult {
        let roles = extract_roles(request.headers(), &self.header_name, self.delimiter());
        if roles.is_empty() {
            RoleExtractionResult::Anonymous
        } else {
            RoleExtractionResult::Roles(roles)
        }
    }
}
