//! Matcher functions and the compiled form of rule expressions.
//!
//! A rule expression is lowered into a [`CompiledMatcher`]: a tree of
//! AND-groups whose members are either single predicates or an OR over
//! alternative AND-groups.
//!
//! ```text
//! Host(`a`) && (Path(`/x`) || Path(`/y`) && !Method(`GET`))
//!
//! [Host(a), Any[ [Path(/x)], [Path(/y), !Method(GET)] ]]
//! ```

use crate::error::RuleError;
use crate::expr::{Expr, Terminal};
use crate::ip::IpChecker;
use crate::rule::RequestContext;
use http::header::HeaderName;
use regex::Regex;
use std::fmt;

/// The matcher functions available in rule expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatcherKind {
    /// `Host(host, ...)`: case-insensitive host comparison.
    Host,
    /// `HostRegexp(template, ...)`: host template with `{name:regexp}` variables.
    HostRegexp,
    /// `HostnameRegexp(regexp, ...)`: host matches an unanchored regular expression.
    HostnameRegexp,
    /// `ClientIP(cidr, ...)`: client address inside a network.
    ClientIp,
    /// `Path(template, ...)`: whole path matches a template.
    Path,
    /// `PathPrefix(template, ...)`: path starts with a template, on a segment boundary.
    PathPrefix,
    /// `PathRegexp(regexp, ...)`: path matches an unanchored regular expression.
    PathRegexp,
    /// `Method(method, ...)`: request method.
    Method,
    /// `Headers(name, value, ...)`: every header pair is present.
    Headers,
    /// `HeadersRegexp(name, regexp, ...)`: every header matches its regexp.
    HeadersRegexp,
    /// `Query(key=value, ...)`: every query parameter is present.
    Query,
}

impl MatcherKind {
    /// Every matcher function.
    pub const ALL: [MatcherKind; 11] = [
        MatcherKind::Host,
        MatcherKind::HostRegexp,
        MatcherKind::HostnameRegexp,
        MatcherKind::ClientIp,
        MatcherKind::Path,
        MatcherKind::PathPrefix,
        MatcherKind::PathRegexp,
        MatcherKind::Method,
        MatcherKind::Headers,
        MatcherKind::HeadersRegexp,
        MatcherKind::Query,
    ];

    /// The canonical function name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Host => "Host",
            Self::HostRegexp => "HostRegexp",
            Self::HostnameRegexp => "HostnameRegexp",
            Self::ClientIp => "ClientIP",
            Self::Path => "Path",
            Self::PathPrefix => "PathPrefix",
            Self::PathRegexp => "PathRegexp",
            Self::Method => "Method",
            Self::Headers => "Headers",
            Self::HeadersRegexp => "HeadersRegexp",
            Self::Query => "Query",
        }
    }

    /// Resolve a function name, ignoring ASCII case.
    ///
    /// `HostHeader` is accepted as an alias of `Host`.
    ///
    /// # Example
    /// ```
    /// use axum_pathauth::MatcherKind;
    ///
    /// assert_eq!(MatcherKind::lookup("pathprefix"), Some(MatcherKind::PathPrefix));
    /// assert_eq!(MatcherKind::lookup("CLIENTIP"), Some(MatcherKind::ClientIp));
    /// assert_eq!(MatcherKind::lookup("Cookie"), None);
    /// ```
    pub fn lookup(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("HostHeader") {
            return Some(Self::Host);
        }
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }

    /// Build the predicate for a call of this function.
    pub fn build(self, args: &[String]) -> Result<Predicate, RuleError> {
        check_args(self, args)?;

        let test: TestFn = match self {
            Self::Host => host(args)?,
            Self::HostRegexp => host_regexp(args)?,
            Self::HostnameRegexp => {
                let regexes = regexps(self, args)?;
                Box::new(move |ctx| regexes.iter().any(|re| re.is_match(ctx.host())))
            }
            Self::ClientIp => client_ip(args)?,
            Self::Path => path(self, args, TemplateMode::Exact)?,
            Self::PathPrefix => path(self, args, TemplateMode::Prefix)?,
            Self::PathRegexp => {
                let regexes = regexps(self, args)?;
                Box::new(move |ctx| regexes.iter().any(|re| re.is_match(ctx.path())))
            }
            Self::Method => method(args),
            Self::Headers => headers(args)?,
            Self::HeadersRegexp => headers_regexp(args)?,
            Self::Query => query(args)?,
        };

        Ok(Predicate {
            kind: self,
            test,
            negated: false,
        })
    }
}

impl fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

type TestFn = Box<dyn Fn(&RequestContext<'_>) -> bool + Send + Sync>;

/// One matcher function call, possibly negated.
pub struct Predicate {
    kind: MatcherKind,
    test: TestFn,
    negated: bool,
}

impl Predicate {
    /// Build the predicate for an expression terminal.
    pub fn from_terminal(terminal: &Terminal) -> Result<Self, RuleError> {
        let predicate = terminal.function.build(&terminal.args)?;
        Ok(if terminal.negated {
            predicate.negate()
        } else {
            predicate
        })
    }

    /// The matcher function behind this predicate.
    pub fn kind(&self) -> MatcherKind {
        self.kind
    }

    /// Whether the result is inverted.
    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Invert the predicate.
    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    /// Evaluate against a request.
    #[inline]
    pub fn matches(&self, ctx: &RequestContext<'_>) -> bool {
        (self.test)(ctx) != self.negated
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("kind", &self.kind)
            .field("negated", &self.negated)
            .finish()
    }
}

/// Executable form of a rule expression.
///
/// Immutable once compiled and safe to evaluate from many requests at once.
#[derive(Debug, Default)]
pub struct CompiledMatcher {
    root: Branch,
}

/// An AND-group: every node must match.
#[derive(Debug, Default)]
struct Branch {
    nodes: Vec<Node>,
}

#[derive(Debug)]
enum Node {
    Test(Predicate),
    /// OR over alternative AND-groups.
    Any(Vec<Branch>),
}

impl CompiledMatcher {
    /// Lower an expression tree.
    ///
    /// # Example
    /// ```
    /// use axum_pathauth::{CompiledMatcher, Expr, RequestContext};
    /// use http::Request;
    ///
    /// let expr = Expr::parse("PathPrefix(`/admin`) && !Method(`GET`)").unwrap();
    /// let matcher = CompiledMatcher::compile(&expr).unwrap();
    ///
    /// let req = Request::put("/admin/users").body(()).unwrap();
    /// assert!(matcher.matches(&RequestContext::from_request(&req, None)));
    ///
    /// let req = Request::get("/admin/users").body(()).unwrap();
    /// assert!(!matcher.matches(&RequestContext::from_request(&req, None)));
    /// ```
    pub fn compile(expr: &Expr) -> Result<Self, RuleError> {
        let mut root = Branch::default();
        root.add(expr)?;
        Ok(Self { root })
    }

    /// Check whether the request satisfies the expression.
    pub fn matches(&self, ctx: &RequestContext<'_>) -> bool {
        self.root.matches(ctx)
    }

    /// Number of predicates in the tree.
    pub fn predicate_count(&self) -> usize {
        self.root.predicate_count()
    }
}

impl Branch {
    fn add(&mut self, expr: &Expr) -> Result<(), RuleError> {
        match expr {
            Expr::Terminal(terminal) => {
                self.nodes.push(Node::Test(Predicate::from_terminal(terminal)?));
            }
            Expr::And(left, right) => {
                self.add(left)?;
                self.add(right)?;
            }
            Expr::Or(..) => {
                let mut alternatives = Vec::new();
                collect_alternatives(expr, &mut alternatives)?;
                self.nodes.push(Node::Any(alternatives));
            }
        }
        Ok(())
    }

    fn matches(&self, ctx: &RequestContext<'_>) -> bool {
        self.nodes.iter().all(|node| match node {
            Node::Test(predicate) => predicate.matches(ctx),
            Node::Any(branches) => branches.iter().any(|branch| branch.matches(ctx)),
        })
    }

    fn predicate_count(&self) -> usize {
        self.nodes
            .iter()
            .map(|node| match node {
                Node::Test(_) => 1,
                Node::Any(branches) => branches.iter().map(Branch::predicate_count).sum(),
            })
            .sum()
    }
}

// Nested ORs flatten into one list of alternatives.
fn collect_alternatives(expr: &Expr, alternatives: &mut Vec<Branch>) -> Result<(), RuleError> {
    match expr {
        Expr::Or(left, right) => {
            collect_alternatives(left, alternatives)?;
            collect_alternatives(right, alternatives)
        }
        _ => {
            let mut branch = Branch::default();
            branch.add(expr)?;
            alternatives.push(branch);
            Ok(())
        }
    }
}

fn check_args(kind: MatcherKind, args: &[String]) -> Result<(), RuleError> {
    if args.is_empty() {
        return Err(RuleError::NoArgs(kind));
    }

    if args.iter().any(String::is_empty) {
        return Err(RuleError::EmptyArg {
            matcher: kind,
            args: args.to_vec(),
        });
    }

    Ok(())
}

fn check_ascii(kind: MatcherKind, value: &str) -> Result<(), RuleError> {
    if value.is_ascii() {
        Ok(())
    } else {
        Err(RuleError::NonAscii {
            matcher: kind,
            value: value.to_string(),
        })
    }
}

fn host(hosts: &[String]) -> Result<TestFn, RuleError> {
    let mut normalized = Vec::with_capacity(hosts.len());
    for host in hosts {
        check_ascii(MatcherKind::Host, host)?;
        normalized.push(host.to_ascii_lowercase());
    }

    Ok(Box::new(move |ctx| {
        let req_host = ctx.host();
        normalized.iter().any(|host| host_eq(host, req_host))
    }))
}

/// Compare hosts, tolerating one trailing period on either side.
fn host_eq(host: &str, req_host: &str) -> bool {
    host == req_host
        || host.strip_suffix('.') == Some(req_host)
        || req_host.strip_suffix('.') == Some(host)
}

fn host_regexp(templates: &[String]) -> Result<TestFn, RuleError> {
    let mut regexes = Vec::with_capacity(templates.len());
    for template in templates {
        check_ascii(MatcherKind::HostRegexp, template)?;
        regexes.push(template_regex(
            MatcherKind::HostRegexp,
            template,
            TemplateMode::Host,
        )?);
    }

    Ok(Box::new(move |ctx| {
        let req_host = ctx.host();
        regexes.iter().any(|re| re.is_match(req_host))
    }))
}

fn client_ip(ranges: &[String]) -> Result<TestFn, RuleError> {
    let checker = IpChecker::new(ranges)?;

    Ok(Box::new(move |ctx| match ctx.client_ip {
        Some(ip) => checker.contains(&ip),
        None => {
            tracing::trace!(path = ctx.path(), "ClientIP matcher has no client address");
            false
        }
    }))
}

fn path(kind: MatcherKind, templates: &[String], mode: TemplateMode) -> Result<TestFn, RuleError> {
    let regexes = templates
        .iter()
        .map(|template| template_regex(kind, template, mode))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Box::new(move |ctx| {
        let req_path = ctx.path();
        regexes.iter().any(|re| re.is_match(req_path))
    }))
}

fn regexps(kind: MatcherKind, patterns: &[String]) -> Result<Vec<Regex>, RuleError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| RuleError::InvalidPattern {
                matcher: kind,
                pattern: pattern.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

fn method(methods: &[String]) -> TestFn {
    let methods: Vec<String> = methods.iter().map(|m| m.to_ascii_uppercase()).collect();
    Box::new(move |ctx| methods.iter().any(|m| m == ctx.method.as_str()))
}

fn header_pairs(kind: MatcherKind, args: &[String]) -> Result<Vec<(HeaderName, String)>, RuleError> {
    if args.len() % 2 != 0 {
        return Err(RuleError::UnpairedArgs {
            matcher: kind,
            count: args.len(),
        });
    }

    args.chunks(2)
        .map(|pair| -> Result<_, RuleError> {
            let name = HeaderName::from_bytes(pair[0].as_bytes())
                .map_err(|_| RuleError::InvalidHeaderName(pair[0].clone()))?;
            Ok((name, pair[1].clone()))
        })
        .collect()
}

fn headers(args: &[String]) -> Result<TestFn, RuleError> {
    let pairs = header_pairs(MatcherKind::Headers, args)?;

    Ok(Box::new(move |ctx| {
        pairs.iter().all(|(name, expected)| {
            ctx.headers
                .get_all(name)
                .iter()
                .any(|value| value.as_bytes() == expected.as_bytes())
        })
    }))
}

fn headers_regexp(args: &[String]) -> Result<TestFn, RuleError> {
    let pairs = header_pairs(MatcherKind::HeadersRegexp, args)?
        .into_iter()
        .map(|(name, pattern)| {
            Regex::new(&pattern)
                .map(|re| (name, re))
                .map_err(|e| RuleError::InvalidPattern {
                    matcher: MatcherKind::HeadersRegexp,
                    pattern,
                    reason: e.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Box::new(move |ctx| {
        pairs.iter().all(|(name, re)| {
            ctx.headers
                .get_all(name)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .any(|value| re.is_match(value))
        })
    }))
}

fn query(args: &[String]) -> Result<TestFn, RuleError> {
    let mut expected = Vec::with_capacity(args.len());
    for arg in args {
        let (key, value) = arg.split_once('=').unwrap_or((arg.as_str(), ""));
        if key.is_empty() {
            return Err(RuleError::InvalidQuery(arg.clone()));
        }
        expected.push((key.to_string(), value.to_string()));
    }

    Ok(Box::new(move |ctx| {
        let query = ctx.query().as_bytes();
        expected.iter().all(|(key, value)| {
            url::form_urlencoded::parse(query)
                .any(|(k, v)| k == key.as_str() && (value.is_empty() || v == value.as_str()))
        })
    }))
}

#[derive(Debug, Clone, Copy)]
enum TemplateMode {
    /// Whole path.
    Exact,
    /// Path prefix ending on a segment boundary.
    Prefix,
    /// Whole host, case-insensitive.
    Host,
}

/// Turn a `/users/{id:[0-9]+}` style template into a regular expression.
///
/// `{name}` binds one path segment (or one host label), `{name:re}` binds `re`.
fn template_regex(kind: MatcherKind, template: &str, mode: TemplateMode) -> Result<Regex, RuleError> {
    let invalid = |reason: &str| RuleError::InvalidPattern {
        matcher: kind,
        pattern: template.to_string(),
        reason: reason.to_string(),
    };

    let default_var = match mode {
        TemplateMode::Host => "[^.]+",
        TemplateMode::Exact | TemplateMode::Prefix => "[^/]+",
    };

    let mut pattern = String::from(match mode {
        TemplateMode::Host => "(?i)^",
        TemplateMode::Exact | TemplateMode::Prefix => "^",
    });

    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let literal = &rest[..start];
        if literal.contains('}') {
            return Err(invalid("unbalanced braces"));
        }
        pattern.push_str(&regex::escape(literal));

        let end = start + closing_brace(&rest[start..]).ok_or_else(|| invalid("unbalanced braces"))?;
        let var = &rest[start + 1..end];
        let var_pattern = match var.split_once(':') {
            Some((_, re)) if !re.is_empty() => re,
            _ => default_var,
        };
        pattern.push_str("(?:");
        pattern.push_str(var_pattern);
        pattern.push(')');

        rest = &rest[end + 1..];
    }
    if rest.contains('}') {
        return Err(invalid("unbalanced braces"));
    }
    pattern.push_str(&regex::escape(rest));

    match mode {
        TemplateMode::Exact | TemplateMode::Host => pattern.push('$'),
        TemplateMode::Prefix if !template.ends_with('/') => pattern.push_str("(?:/|$)"),
        TemplateMode::Prefix => {}
    }

    Regex::new(&pattern).map_err(|e| invalid(&e.to_string()))
}

/// Byte offset of the brace closing the one at the start of `s`.
fn closing_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;
    use std::net::IpAddr;

    fn compile(rule: &str) -> CompiledMatcher {
        CompiledMatcher::compile(&Expr::parse(rule).unwrap()).unwrap()
    }

    fn compile_err(rule: &str) -> RuleError {
        CompiledMatcher::compile(&Expr::parse(rule).unwrap()).unwrap_err()
    }

    fn matches(matcher: &CompiledMatcher, req: &Request<()>) -> bool {
        matcher.matches(&RequestContext::from_request(req, None))
    }

    fn get(uri: &str) -> Request<()> {
        Request::get(uri).body(()).unwrap()
    }

    fn with_host(host: &str) -> Request<()> {
        Request::get("/").header("host", host).body(()).unwrap()
    }

    #[test]
    fn test_lookup_any_case() {
        for kind in MatcherKind::ALL {
            let name = kind.name();
            assert_eq!(MatcherKind::lookup(name), Some(kind));
            assert_eq!(MatcherKind::lookup(&name.to_lowercase()), Some(kind));
            assert_eq!(MatcherKind::lookup(&name.to_uppercase()), Some(kind));
        }
        assert_eq!(MatcherKind::lookup("Clientip"), Some(MatcherKind::ClientIp));
        assert_eq!(MatcherKind::lookup("hostheader"), Some(MatcherKind::Host));
        assert_eq!(MatcherKind::lookup("pathregexp"), Some(MatcherKind::PathRegexp));
        assert_eq!(MatcherKind::lookup("Cookie"), None);
    }

    #[test]
    fn test_host() {
        let matcher = compile("Host(`example.com`, `Other.org`)");
        assert!(matches(&matcher, &with_host("example.com")));
        assert!(matches(&matcher, &with_host("EXAMPLE.com:8080")));
        assert!(matches(&matcher, &with_host("other.org")));
        assert!(!matches(&matcher, &with_host("sub.example.com")));
        assert!(!matches(&matcher, &get("/")));
    }

    #[test]
    fn test_host_trailing_period() {
        let matcher = compile("Host(`example.com`)");
        assert!(matches(&matcher, &with_host("example.com.")));

        let matcher = compile("Host(`example.com.`)");
        assert!(matches(&matcher, &with_host("example.com")));
        assert!(matches(&matcher, &with_host("example.com.")));
        assert!(!matches(&matcher, &with_host("example.co")));
    }

    #[test]
    fn test_host_from_absolute_uri() {
        let matcher = compile("Host(`api.example.com`)");
        let req = get("http://api.example.com:8443/v1");
        assert!(matches(&matcher, &req));
    }

    #[test]
    fn test_host_rejects_non_ascii() {
        assert!(matches!(
            compile_err("Host(`bücher.example`)"),
            RuleError::NonAscii { matcher: MatcherKind::Host, .. }
        ));
        assert!(matches!(
            compile_err("HostRegexp(`{sub}.bücher.example`)"),
            RuleError::NonAscii { matcher: MatcherKind::HostRegexp, .. }
        ));
    }

    #[test]
    fn test_host_regexp() {
        let matcher = compile("HostRegexp(`{subdomain:[a-z]+}.example.com`)");
        assert!(matches(&matcher, &with_host("api.example.com")));
        assert!(matches(&matcher, &with_host("API.Example.com")));
        assert!(!matches(&matcher, &with_host("v1.api.example.com")));
        assert!(!matches(&matcher, &with_host("api1.example.com")));

        let matcher = compile("HostRegexp(`{sub}.example.com`)");
        assert!(matches(&matcher, &with_host("a1.example.com")));
        assert!(!matches(&matcher, &with_host("example.com")));
    }

    #[test]
    fn test_hostname_regexp_is_unanchored() {
        let matcher = compile(r"HostnameRegexp(`[a-z]+\.example\.com`)");
        assert!(matches(&matcher, &with_host("api.example.com")));
        assert!(matches(&matcher, &with_host("v1.api.example.com:8080")));
        assert!(!matches(&matcher, &with_host("example.com")));

        assert!(matches!(
            compile_err("HostnameRegexp(`(unclosed`)"),
            RuleError::InvalidPattern { matcher: MatcherKind::HostnameRegexp, .. }
        ));
    }

    #[test]
    fn test_path_regexp_is_unanchored() {
        let matcher = compile("PathRegexp(`^/api/v[0-9]+/admin`)");
        assert!(matches(&matcher, &get("/api/v1/admin/users")));
        assert!(matches(&matcher, &get("/api/v22/administrator")));
        assert!(!matches(&matcher, &get("/api/vx/admin")));
        assert!(!matches(&matcher, &get("/v1/api/v1/admin")));

        let matcher = compile("PathRegexp(`/secret`, `\\.bak$`)");
        assert!(matches(&matcher, &get("/files/secret/1")));
        assert!(matches(&matcher, &get("/db.bak")));
        assert!(!matches(&matcher, &get("/db.bak.txt")));

        assert!(matches!(
            compile_err("PathRegexp(`[0-9`)"),
            RuleError::InvalidPattern { matcher: MatcherKind::PathRegexp, .. }
        ));
    }

    #[test]
    fn test_path_exact() {
        let matcher = compile("Path(`/api/users`, `/health`)");
        assert!(matches(&matcher, &get("/api/users")));
        assert!(matches(&matcher, &get("/health?verbose=1")));
        assert!(!matches(&matcher, &get("/api/users/")));
        assert!(!matches(&matcher, &get("/api/users/1")));
    }

    #[test]
    fn test_path_template() {
        let matcher = compile("Path(`/users/{id:[0-9]+}`)");
        assert!(matches(&matcher, &get("/users/42")));
        assert!(!matches(&matcher, &get("/users/abc")));

        let matcher = compile("Path(`/{.*}/admin/health`)");
        assert!(matches(&matcher, &get("/app/admin/health")));
        assert!(!matches(&matcher, &get("/app/x/admin/health")));
    }

    #[test]
    fn test_path_prefix_on_segments() {
        let matcher = compile("PathPrefix(`/admin`)");
        assert!(matches(&matcher, &get("/admin")));
        assert!(matches(&matcher, &get("/admin/users")));
        assert!(!matches(&matcher, &get("/administrator")));
        assert!(!matches(&matcher, &get("/public/admin")));

        let matcher = compile("PathPrefix(`/api/`)");
        assert!(matches(&matcher, &get("/api/v1")));
        assert!(!matches(&matcher, &get("/api")));

        let matcher = compile("PathPrefix(`/{.*}/admin`)");
        assert!(matches(&matcher, &get("/app/admin/health")));
    }

    #[test]
    fn test_path_template_errors() {
        assert!(matches!(
            compile_err("Path(`/users/{id`)"),
            RuleError::InvalidPattern { matcher: MatcherKind::Path, .. }
        ));
        assert!(matches!(
            compile_err("PathPrefix(`/users/id}`)"),
            RuleError::InvalidPattern { matcher: MatcherKind::PathPrefix, .. }
        ));
        assert!(matches!(
            compile_err("Path(`/users/{id:[0-9+}`)"),
            RuleError::InvalidPattern { .. }
        ));
    }

    #[test]
    fn test_method() {
        let matcher = compile("Method(`get`, `POST`)");
        assert!(matches(&matcher, &get("/")));
        assert!(matches(&matcher, &Request::post("/").body(()).unwrap()));
        assert!(!matches(&matcher, &Request::delete("/").body(()).unwrap()));
    }

    #[test]
    fn test_headers() {
        let matcher = compile("Headers(`X-Env`, `prod`, `X-Team`, `core`)");
        let req = Request::get("/")
            .header("x-env", "prod")
            .header("x-team", "core")
            .body(())
            .unwrap();
        assert!(matches(&matcher, &req));

        let req = Request::get("/").header("x-env", "prod").body(()).unwrap();
        assert!(!matches(&matcher, &req));

        // Any occurrence of a repeated header may satisfy the pair
        let matcher = compile("Headers(`X-Env`, `prod`)");
        let req = Request::get("/")
            .header("x-env", "dev")
            .header("x-env", "prod")
            .body(())
            .unwrap();
        assert!(matches(&matcher, &req));
    }

    #[test]
    fn test_headers_errors() {
        assert!(matches!(
            compile_err("Headers(`X-Env`)"),
            RuleError::UnpairedArgs { matcher: MatcherKind::Headers, count: 1 }
        ));
        assert!(matches!(
            compile_err("Headers(`bad header`, `x`)"),
            RuleError::InvalidHeaderName(_)
        ));
        assert!(matches!(
            compile_err("HeadersRegexp(`User-Agent`, `(`)"),
            RuleError::InvalidPattern { matcher: MatcherKind::HeadersRegexp, .. }
        ));
    }

    #[test]
    fn test_headers_regexp() {
        let matcher = compile("HeadersRegexp(`User-Agent`, `^Mozilla`)");
        let req = Request::get("/")
            .header("user-agent", "Mozilla/5.0")
            .body(())
            .unwrap();
        assert!(matches(&matcher, &req));

        let req = Request::get("/").header("user-agent", "curl/8").body(()).unwrap();
        assert!(!matches(&matcher, &req));
        assert!(!matches(&matcher, &get("/")));
    }

    #[test]
    fn test_query() {
        let matcher = compile("Query(`tab=settings`, `debug=`)");
        assert!(matches(&matcher, &get("/?tab=settings&debug=1")));
        assert!(matches(&matcher, &get("/?debug&tab=settings")));
        assert!(!matches(&matcher, &get("/?tab=settings")));
        assert!(!matches(&matcher, &get("/?tab=profile&debug=1")));
        assert!(!matches(&matcher, &get("/")));

        let matcher = compile("Query(`name=a b`)");
        assert!(matches(&matcher, &get("/?name=a%20b")));
        assert!(matches(&matcher, &get("/?name=a+b")));

        assert!(matches!(compile_err("Query(`=x`)"), RuleError::InvalidQuery(_)));
    }

    #[test]
    fn test_client_ip() {
        let matcher = compile("ClientIP(`10.0.0.0/8`, `192.168.1.7`)");
        let req = get("/");

        let ip: IpAddr = "10.20.30.40".parse().unwrap();
        assert!(matcher.matches(&RequestContext::from_request(&req, Some(ip))));

        let ip: IpAddr = "192.168.1.8".parse().unwrap();
        assert!(!matcher.matches(&RequestContext::from_request(&req, Some(ip))));

        // Unknown client address never matches
        assert!(!matcher.matches(&RequestContext::from_request(&req, None)));

        // ... so a negated ClientIP matches it
        let matcher = compile("!ClientIP(`10.0.0.0/8`)");
        assert!(matcher.matches(&RequestContext::from_request(&req, None)));

        assert!(matches!(
            compile_err("ClientIP(`10.0.0.0/40`)"),
            RuleError::InvalidCidr(_)
        ));
    }

    #[test]
    fn test_argument_checks() {
        assert!(matches!(compile_err("Path()"), RuleError::NoArgs(MatcherKind::Path)));
        assert!(matches!(
            compile_err("Path(`/a`, ``)"),
            RuleError::EmptyArg { matcher: MatcherKind::Path, .. }
        ));
    }

    #[test]
    fn test_error_in_any_branch_aborts() {
        assert!(matches!(
            compile_err("Path(`/a`) || (Method(`GET`) && ClientIP(`nope`))"),
            RuleError::InvalidCidr(_)
        ));
    }

    #[test]
    fn test_or_branches() {
        let matcher = compile("Host(`a.com`) && (Path(`/x`) || Path(`/y`) && !Method(`GET`))");
        assert_eq!(matcher.predicate_count(), 4);

        let req = Request::get("/x").header("host", "a.com").body(()).unwrap();
        assert!(matches(&matcher, &req));

        let req = Request::get("/y").header("host", "a.com").body(()).unwrap();
        assert!(!matches(&matcher, &req));

        let req = Request::put("/y").header("host", "a.com").body(()).unwrap();
        assert!(matches(&matcher, &req));

        let req = Request::get("/x").header("host", "b.com").body(()).unwrap();
        assert!(!matches(&matcher, &req));
    }

    // Requests covering every combination of Method(GET), PathPrefix(/admin)
    // and Host(a.com).
    fn truth_table_requests() -> Vec<Request<()>> {
        let mut requests = Vec::new();
        for method in ["GET", "PUT"] {
            for path in ["/admin/x", "/public"] {
                for host in ["a.com", "b.com"] {
                    requests.push(
                        Request::builder()
                            .method(method)
                            .uri(path)
                            .header("host", host)
                            .body(())
                            .unwrap(),
                    );
                }
            }
        }
        requests
    }

    #[test]
    fn test_not_distributes_over_and_or() {
        let a = compile("Method(`GET`)");
        let b = compile("PathPrefix(`/admin`)");
        let c = compile("Host(`a.com`)");

        let not_and = compile("!(Method(`GET`) && PathPrefix(`/admin`))");
        let or_of_nots = compile("!Method(`GET`) || !PathPrefix(`/admin`)");
        let not_or = compile("NOT (Method(`GET`) OR PathPrefix(`/admin`))");
        let and_of_nots = compile("!Method(`GET`) && !PathPrefix(`/admin`)");
        let nested = compile("!(Method(`GET`) && (PathPrefix(`/admin`) || !Host(`a.com`)))");
        let double = compile("!!(Method(`GET`) || Host(`a.com`))");

        for req in truth_table_requests() {
            let (a, b, c) = (matches(&a, &req), matches(&b, &req), matches(&c, &req));

            assert_eq!(matches(&not_and, &req), !(a && b));
            assert_eq!(matches(&not_and, &req), matches(&or_of_nots, &req));
            assert_eq!(matches(&not_or, &req), !(a || b));
            assert_eq!(matches(&not_or, &req), matches(&and_of_nots, &req));
            assert_eq!(matches(&nested, &req), !(a && (b || !c)));
            assert_eq!(matches(&double, &req), a || c);
        }
    }
}
