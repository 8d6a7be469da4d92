//! TOML and JSON configuration support.
//!
//! A configuration names the header roles are read from and lists the
//! authorization rules. It can be compiled in at build time or read from a
//! file at runtime.
//!
//! # Example TOML Format
//!
//! ```toml
//! [source]
//! name = "X-Roles"
//! delimiter = ","
//!
//! [[authorization]]
//! expression = "PathPrefix(`/admin`) && !Method(`GET`)"
//! allowed = ["ops"]
//!
//! [[authorization]]
//! path = ["^/reports/"]
//! host = ["^(www\\.)?example\\.com$"]
//! priority = 100
//! allowed = ["analyst"]
//! method = ["get"]
//! ```
//!
//! `path` and `host` hold unanchored regular expressions and are a shorthand
//! for `PathRegexp(...) && HostnameRegexp(...)`; an explicit `expression` (or
//! `match`) takes precedence over them.
//!
//! # Usage
//!
//! ## Compile-time embedded config
//!
//! ```ignore
//! use axum_pathauth::PathAuthConfig;
//!
//! const CONFIG: &str = include_str!("../pathauth.toml");
//!
//! let layer = PathAuthConfig::from_toml(CONFIG).unwrap().build_layer().unwrap();
//! ```
//!
//! ## Runtime file loading
//!
//! ```ignore
//! use axum_pathauth::PathAuthConfig;
//!
//! let config = PathAuthConfig::from_json_file("config/pathauth.json").unwrap();
//! ```

use crate::error::RuleError;
use crate::extractor::HeaderRoleExtractor;
use crate::middleware::PathAuthLayer;
use crate::rule::Rule;
use crate::table::RuleTable;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathAuthConfig {
    /// Where roles are read from.
    #[serde(default, alias = "headers")]
    pub source: SourceConfig,
    /// Authorization rules.
    #[serde(default)]
    pub authorization: Vec<AuthorizationConfig>,
}

/// Role source configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source type. Only `header` is supported; omitted means `header`.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    /// Header name.
    #[serde(default)]
    pub name: String,
    /// Optional delimiter splitting each header occurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
}

/// A single authorization rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    /// Rule expression.
    #[serde(default, alias = "match", skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,

    /// Path regular expressions, used when no expression is given.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,

    /// Host regular expressions, ANDed with `path` when no expression is given.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host: Vec<String>,

    /// Priority (higher first). 0 means the expression length.
    #[serde(default)]
    pub priority: i32,

    /// Roles allowed through. Must not be empty.
    #[serde(default)]
    pub allowed: Vec<String>,

    /// HTTP methods the rule applies to. Empty means all methods.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub method: Vec<String>,
}

/// Error type for configuration parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing error.
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parsing error.
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O error.
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// The role source has no header name.
    #[error("a header name must be specified for the role source")]
    MissingSourceName,

    /// The role source type is not supported.
    #[error("unsupported role source type {0:?}, only \"header\" is supported")]
    UnknownSourceType(String),

    /// An authorization entry has neither an expression nor a path or host.
    #[error("authorization {0} is missing an expression")]
    MissingExpression(usize),

    /// An authorization entry could not be compiled.
    #[error("authorization {index}: {source}")]
    Rule {
        /// Position of the entry in the configuration.
        index: usize,
        /// The rule error.
        #[source]
        source: RuleError,
    },
}

impl AuthorizationConfig {
    /// The rule expression: `expression` if set, else built from `path` and `host`.
    ///
    /// # Example
    /// ```
    /// use axum_pathauth::AuthorizationConfig;
    ///
    /// let entry = AuthorizationConfig {
    ///     path: vec!["/reports".into(), "/exports".into()],
    ///     host: vec!["example.com".into()],
    ///     ..Default::default()
    /// };
    /// assert_eq!(
    ///     entry.expression_text().as_deref(),
    ///     Some("PathRegexp(`/reports`, `/exports`) && HostnameRegexp(`example.com`)")
    /// );
    /// ```
    pub fn expression_text(&self) -> Option<String> {
        if let Some(expression) = self.expression.as_deref() {
            if !expression.trim().is_empty() {
                return Some(expression.to_string());
            }
        }

        let parts: Vec<String> = [("PathRegexp", &self.path), ("HostnameRegexp", &self.host)]
            .into_iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(function, values)| call(function, values))
            .collect();

        (!parts.is_empty()).then(|| parts.join(" && "))
    }

    /// Convert the entry into a [`Rule`].
    ///
    /// `index` is the position of the entry, used in errors.
    pub fn to_rule(&self, index: usize) -> Result<Rule, ConfigError> {
        let expression = self
            .expression_text()
            .ok_or(ConfigError::MissingExpression(index))?;

        Ok(Rule::new(expression)
            .priority(self.priority)
            .allow_all(self.allowed.iter().cloned())
            .methods(&self.method))
    }
}

fn call(function: &str, values: &[String]) -> String {
    let args: Vec<String> = values.iter().map(|value| quote(value)).collect();
    format!("{function}({})", args.join(", "))
}

fn quote(value: &str) -> String {
    if value.contains('`') {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        format!("`{value}`")
    }
}

impl PathAuthConfig {
    /// Parse configuration from a TOML string.
    ///
    /// # Example
    /// ```
    /// use axum_pathauth::PathAuthConfig;
    ///
    /// let toml = r#"
    /// [source]
    /// name = "X-Roles"
    ///
    /// [[authorization]]
    /// expression = "PathPrefix(`/admin`)"
    /// allowed = ["admin"]
    /// "#;
    ///
    /// let config = PathAuthConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.authorization.len(), 1);
    /// ```
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: PathAuthConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Example
    /// ```
    /// use axum_pathauth::PathAuthConfig;
    ///
    /// let json = r#"{
    ///     "headers": { "name": "X-Roles", "delimiter": "," },
    ///     "authorization": [
    ///         { "path": ["/admin"], "allowed": ["admin"] }
    ///     ]
    /// }"#;
    ///
    /// let config = PathAuthConfig::from_json(json).unwrap();
    /// assert_eq!(config.source.delimiter.as_deref(), Some(","));
    /// ```
    pub fn from_json(json_str: &str) -> Result<Self, ConfigError> {
        let config: PathAuthConfig = serde_json::from_str(json_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Validate the configuration, compiling every rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.role_extractor()?;
        self.build_table()?;
        Ok(())
    }

    /// Build the role extractor described by `source`.
    pub fn role_extractor(&self) -> Result<HeaderRoleExtractor, ConfigError> {
        if let Some(source_type) = self.source.source_type.as_deref() {
            if !source_type.eq_ignore_ascii_case("header") {
                return Err(ConfigError::UnknownSourceType(source_type.to_string()));
            }
        }

        let name = self.source.name.trim();
        if name.is_empty() {
            return Err(ConfigError::MissingSourceName);
        }

        let extractor = HeaderRoleExtractor::new(name);
        Ok(match self.source.delimiter.as_deref() {
            Some(delimiter) => extractor.with_delimiter(delimiter),
            None => extractor,
        })
    }

    /// Compile the authorization entries into a [`RuleTable`].
    pub fn build_table(&self) -> Result<RuleTable, ConfigError> {
        let mut table = RuleTable::new();
        for (index, entry) in self.authorization.iter().enumerate() {
            let rule = entry.to_rule(index)?;
            table
                .add_rule(rule)
                .map_err(|source| ConfigError::Rule { index, source })?;
        }
        Ok(table)
    }

    /// Build the middleware layer.
    ///
    /// # Example
    /// ```
    /// use axum_pathauth::PathAuthConfig;
    ///
    /// let config = PathAuthConfig::from_toml(r#"
    /// [source]
    /// name = "X-Roles"
    ///
    /// [[authorization]]
    /// match = "Host(`internal.example.com`)"
    /// allowed = ["staff"]
    /// "#).unwrap();
    ///
    /// let layer = config.build_layer().unwrap();
    /// assert_eq!(layer.table().len(), 1);
    /// ```
    pub fn build_layer(&self) -> Result<PathAuthLayer<HeaderRoleExtractor>, ConfigError> {
        let extractor = self.role_extractor()?;
        let table = self.build_table()?;
        Ok(PathAuthLayer::new(table, extractor))
    }
}
