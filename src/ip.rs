//! Client IP resolution and network membership checks.
//!
//! - [`IpChecker`]: a list of networks (CIDR or single addresses) used by the
//!   `ClientIP` matcher.
//! - [`ClientIpStrategy`]: how the caller's address is obtained from a request.

use crate::error::RuleError;
use axum::extract::ConnectInfo;
use http::{Extensions, HeaderMap};
use ipnetwork::IpNetwork;
use std::net::{IpAddr, SocketAddr};

/// A set of IP networks.
///
/// # Example
/// ```
/// use axum_pathauth::IpChecker;
///
/// let checker = IpChecker::new(["10.0.0.0/8", "192.168.1.7"]).unwrap();
/// assert!(checker.contains(&"10.1.2.3".parse().unwrap()));
/// assert!(checker.contains(&"192.168.1.7".parse().unwrap()));
/// assert!(!checker.contains(&"192.168.1.8".parse().unwrap()));
/// ```
#[derive(Debug, Clone)]
pub struct IpChecker {
    networks: Vec<IpNetwork>,
}

impl IpChecker {
    /// Parse a list of CIDR networks or single addresses.
    ///
    /// Fails on an empty list or on the first malformed entry.
    pub fn new<I, S>(entries: I) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut networks = Vec::new();
        for entry in entries {
            networks.push(parse_network(entry.as_ref())?);
        }

        if networks.is_empty() {
            return Err(RuleError::InvalidCidr("no IP ranges provided".to_string()));
        }

        Ok(Self { networks })
    }

    /// Check if an address falls inside any configured network.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.networks.iter().any(|network| network.contains(*ip))
    }

    /// The parsed networks, in configuration order.
    pub fn networks(&self) -> &[IpNetwork] {
        &self.networks
    }
}

fn parse_network(s: &str) -> Result<IpNetwork, RuleError> {
    let s = s.trim();

    if s.contains('/') {
        return s
            .parse::<IpNetwork>()
            .map_err(|e| RuleError::InvalidCidr(format!("{s:?}: {e}")));
    }

    s.parse::<IpAddr>()
        .map(IpNetwork::from)
        .map_err(|e| RuleError::InvalidCidr(format!("{s:?}: {e}")))
}

/// Strategy for determining the caller's IP address.
///
/// Implementations must only read data already attached to the request.
pub trait ClientIpStrategy: Send + Sync {
    /// Resolve the client address, or `None` when it cannot be determined.
    fn client_ip(&self, headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr>;
}

/// Use the peer address recorded by axum's `ConnectInfo<SocketAddr>`.
///
/// Requires serving the router with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteAddrStrategy;

impl ClientIpStrategy for RemoteAddrStrategy {
    fn client_ip(&self, _headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr> {
        remote_addr(extensions)
    }
}

/// Read the left-most address of a forwarding header (e.g. `X-Forwarded-For`),
/// falling back to the peer address.
#[derive(Debug, Clone)]
pub struct ForwardedHeaderStrategy {
    header_name: String,
}

impl ForwardedHeaderStrategy {
    /// Create a strategy reading the given header.
    pub fn new(header_name: impl Into<String>) -> Self {
        Self {
            header_name: header_name.into(),
        }
    }
}

impl ClientIpStrategy for ForwardedHeaderStrategy {
    fn client_ip(&self, headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr> {
        // Format: client, proxy1, proxy2, ...
        let forwarded = headers
            .get(self.header_name.as_str())
            .and_then(|value| value.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());

        forwarded.or_else(|| remote_addr(extensions))
    }
}

fn remote_addr(extensions: &Extensions) -> Option<IpAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
}
