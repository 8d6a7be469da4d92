//! Rule table for storing and matching compiled rules.
//!
//! The [`RuleTable`] keeps its entries sorted by descending priority. Rules
//! sharing a priority keep their registration order, so the earliest
//! registered one is tried first. Matching is first-match: the scan stops at
//! the first entry whose expression accepts the request.

use crate::error::RuleError;
use crate::expr::Expr;
use crate::matcher::CompiledMatcher;
use crate::rule::{RequestContext, Rule};
use std::sync::Arc;

/// A rule together with its compiled expression.
#[derive(Debug)]
pub struct RuleEntry {
    rule: Rule,
    matcher: CompiledMatcher,
}

impl RuleEntry {
    /// Validate, parse and compile a rule.
    pub fn compile(rule: Rule) -> Result<Self, RuleError> {
        if rule.expression().trim().is_empty() {
            return Err(RuleError::EmptyExpression);
        }
        if rule.allowed_roles().is_empty() {
            return Err(RuleError::NoAllowedRoles(rule.expression().to_string()));
        }

        let expr = Expr::parse(rule.expression()).map_err(|source| RuleError::Parse {
            rule: rule.expression().to_string(),
            source,
        })?;
        let matcher = CompiledMatcher::compile(&expr)?;

        Ok(Self { rule, matcher })
    }

    /// The rule.
    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// The compiled expression.
    pub fn matcher(&self) -> &CompiledMatcher {
        &self.matcher
    }

    /// Check the method filter, then the expression.
    #[inline]
    pub fn matches(&self, ctx: &RequestContext<'_>) -> bool {
        self.rule.applies_to_method(ctx.method) && self.matcher.matches(ctx)
    }
}

/// Priority-ordered collection of authorization rules.
///
/// # Example
/// ```
/// use axum_pathauth::{RequestContext, Rule, RuleTable};
/// use http::Request;
///
/// let table = RuleTable::builder()
///     .rule(Rule::new("PathPrefix(`/admin`)").allow("admin"))
///     .rule(Rule::new("Path(`/admin/health`)").allow("monitoring"))
///     .build()
///     .unwrap();
///
/// // The longer expression has the higher default priority
/// let req = Request::get("/admin/health").body(()).unwrap();
/// let rule = table.match_request(&RequestContext::from_request(&req, None)).unwrap();
/// assert_eq!(rule.expression(), "Path(`/admin/health`)");
/// ```
#[derive(Debug, Default)]
pub struct RuleTable {
    entries: Vec<RuleEntry>,
}

impl RuleTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for constructing a table.
    pub fn builder() -> RuleTableBuilder {
        RuleTableBuilder::new()
    }

    /// Register a rule from its parts.
    ///
    /// A `priority` of `0` becomes the length of `expression`.
    pub fn add_route<R, M>(
        &mut self,
        expression: &str,
        priority: i32,
        allowed_roles: R,
        allowed_methods: M,
    ) -> Result<(), RuleError>
    where
        R: IntoIterator,
        R::Item: Into<String>,
        M: IntoIterator,
        M::Item: AsRef<str>,
    {
        let rule = Rule::new(expression)
            .priority(priority)
            .allow_all(allowed_roles)
            .methods(allowed_methods);
        self.add_rule(rule)
    }

    /// Register a rule. On error the table is left unchanged.
    pub fn add_rule(&mut self, rule: Rule) -> Result<(), RuleError> {
        let entry = RuleEntry::compile(rule)?;
        self.insert(entry);
        Ok(())
    }

    fn insert(&mut self, entry: RuleEntry) {
        let priority = entry.rule.effective_priority();
        // After every entry of equal or higher priority keeps ties stable
        let index = self
            .entries
            .partition_point(|existing| existing.rule.effective_priority() >= priority);

        tracing::debug!(
            expression = entry.rule.expression(),
            priority,
            position = index,
            "Registered authorization rule"
        );
        self.entries.insert(index, entry);
    }

    /// Find the highest-priority rule matching the request.
    pub fn match_request(&self, ctx: &RequestContext<'_>) -> Option<&Rule> {
        match self.entries.iter().find(|entry| entry.matches(ctx)) {
            Some(entry) => {
                tracing::debug!(
                    expression = entry.rule.expression(),
                    priority = entry.rule.effective_priority(),
                    method = %ctx.method,
                    path = ctx.path(),
                    "Authorization rule matched"
                );
                Some(&entry.rule)
            }
            None => {
                tracing::debug!(
                    method = %ctx.method,
                    path = ctx.path(),
                    "No authorization rule matched"
                );
                None
            }
        }
    }

    /// Entries in evaluation order.
    pub fn entries(&self) -> &[RuleEntry] {
        &self.entries
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table has no rules.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builder for constructing a [`RuleTable`].
///
/// Rules are compiled in [`build`](Self::build); the first failing rule fails
/// the whole build.
#[derive(Debug, Default)]
pub struct RuleTableBuilder {
    rules: Vec<Rule>,
}

impl RuleTableBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Add several rules.
    pub fn rules(mut self, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Compile every rule and build the table.
    pub fn build(self) -> Result<RuleTable, RuleError> {
        let mut table = RuleTable::new();
        for rule in self.rules {
            table.add_rule(rule)?;
        }
        Ok(table)
    }

    /// Build the table wrapped in an Arc for sharing.
    pub fn build_shared(self) -> Result<Arc<RuleTable>, RuleError> {
        self.build().map(Arc::new)
    }
}
