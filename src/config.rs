//! Configuration loading
//!
//! A configuration file declares the provider, execution settings,
//! variables, per-kind change policies and the resources themselves.
//! String properties may contain `${...}` expressions:
//!
//! - `${var.NAME}` is substituted while loading
//! - `${kind.name.attribute}` refers to an output of another resource and
//!   becomes known only once that resource has been applied

use anyhow::{Context, Result};
use declarative::{
    DEFAULT_JOBS, Fragment, KindPolicy, OutputRef, PolicyTable, ReplaceStrategy, Resource,
    ResourceId, Value,
};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Prefix of environment variables overriding configuration variables
pub const ENV_VAR_PREFIX: &str = "RIGGING_VAR_";

/// Default configuration file name
pub const DEFAULT_CONFIG: &str = "rigging.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),

    #[error("invalid expression `${{{0}}}` (expected var.NAME or kind.name.attribute)")]
    InvalidExpression(String),

    #[error("invalid {field} `{value}` (letters, digits, `_` and `-` only)")]
    InvalidName { field: &'static str, value: String },

    #[error("{0}")]
    InvalidAddress(String),
}

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Pick the format from the file extension (TOML unless `.json`)
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::Json,
            _ => Self::Toml,
        }
    }

    fn parse(self, content: &str) -> Result<ConfigFile> {
        match self {
            Self::Toml => toml::from_str(content).context("Invalid TOML format"),
            Self::Json => serde_json::from_str(content).context("Invalid JSON format"),
        }
    }
}

/// `[provider]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub name: String,
    pub region: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

/// `[settings]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Worker pool size
    pub jobs: Option<usize>,
    /// Replacement ordering for kinds without their own
    pub replace_strategy: ReplaceStrategy,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceEntry {
    kind: String,
    name: String,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    properties: BTreeMap<String, Json>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    provider: ProviderSettings,
    settings: Settings,
    variables: BTreeMap<String, Json>,
    kinds: BTreeMap<String, KindPolicy>,
    resources: Vec<ResourceEntry>,
}

/// A loaded configuration with expressions parsed
#[derive(Debug)]
pub struct Config {
    pub path: PathBuf,
    pub provider: ProviderSettings,
    pub settings: Settings,
    pub policies: PolicyTable,
    pub resources: Vec<Resource>,
}

impl Config {
    /// Load a configuration file
    ///
    /// `overrides` are `--var NAME=VALUE` pairs; they win over
    /// `RIGGING_VAR_NAME` environment variables, which win over the
    /// file's `[variables]`.
    pub fn load(path: &Path, overrides: &[(String, String)]) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        let mut config = Self::parse(&content, ConfigFormat::from_path(path), overrides)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        config.path = path.to_path_buf();
        log::debug!(
            "Loaded {} resources from {}",
            config.resources.len(),
            path.display()
        );
        Ok(config)
    }

    /// Parse configuration content
    pub fn parse(content: &str, format: ConfigFormat, overrides: &[(String, String)]) -> Result<Self> {
        let file = format.parse(content)?;
        let variables = merge_variables(file.variables, std::env::vars(), overrides);
        let interpolator = Interpolator::new(&variables)?;

        let mut resources = Vec::with_capacity(file.resources.len());
        for entry in &file.resources {
            let resource = interpolator
                .resource(entry)
                .with_context(|| format!("Invalid resource {}.{}", entry.kind, entry.name))?;
            resources.push(resource);
        }

        let policies = PolicyTable {
            default_strategy: file.settings.replace_strategy,
            kinds: file.kinds,
        };

        Ok(Self {
            path: PathBuf::from(DEFAULT_CONFIG),
            provider: file.provider,
            settings: file.settings,
            policies,
            resources,
        })
    }

    /// Worker pool size from settings
    pub fn jobs(&self) -> usize {
        self.settings.jobs.unwrap_or(DEFAULT_JOBS)
    }
}

/// Combine file variables with environment and command-line overrides
fn merge_variables<I>(
    mut variables: BTreeMap<String, Json>,
    env: I,
    overrides: &[(String, String)],
) -> BTreeMap<String, Json>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in env {
        if let Some(name) = key.strip_prefix(ENV_VAR_PREFIX) {
            log::debug!("Variable {name} set from environment");
            variables.insert(name.to_string(), parse_scalar(&value));
        }
    }
    for (name, value) in overrides {
        variables.insert(name.clone(), parse_scalar(value));
    }
    variables
}

/// Numbers and booleans keep their type; anything else is a string
fn parse_scalar(raw: &str) -> Json {
    match serde_json::from_str::<Json>(raw) {
        Ok(value @ (Json::Number(_) | Json::Bool(_))) => value,
        _ => Json::String(raw.to_string()),
    }
}

/// Piece of a string property after expression parsing
enum Piece {
    Literal(String),
    Variable(Json),
    Reference(OutputRef),
}

struct Interpolator<'a> {
    expression: Regex,
    identifier: Regex,
    variables: &'a BTreeMap<String, Json>,
}

impl<'a> Interpolator<'a> {
    fn new(variables: &'a BTreeMap<String, Json>) -> Result<Self> {
        Ok(Self {
            expression: Regex::new(r"\$\{([^}]*)\}")?,
            identifier: Regex::new(r"^[A-Za-z0-9_-]+$")?,
            variables,
        })
    }

    fn resource(&self, entry: &ResourceEntry) -> Result<Resource, ConfigError> {
        self.check_name("kind", &entry.kind)?;
        self.check_name("name", &entry.name)?;

        let mut resource = Resource::new(&entry.kind, &entry.name);
        for (key, raw) in &entry.properties {
            resource = resource.with_property(key.clone(), self.value(raw)?);
        }
        for dependency in &entry.depends_on {
            let id: ResourceId = dependency.parse().map_err(ConfigError::InvalidAddress)?;
            resource = resource.with_dependency(id);
        }
        Ok(resource)
    }

    fn check_name(&self, field: &'static str, value: &str) -> Result<(), ConfigError> {
        if self.identifier.is_match(value) {
            Ok(())
        } else {
            Err(ConfigError::InvalidName {
                field,
                value: value.to_string(),
            })
        }
    }

    fn value(&self, raw: &Json) -> Result<Value, ConfigError> {
        match raw {
            Json::String(s) => self.string(s),
            Json::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| self.value(item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(collapse_list(values))
            }
            Json::Object(map) => {
                let values = map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.value(v)?)))
                    .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;
                Ok(collapse_map(values))
            }
            other => Ok(Value::Known(other.clone())),
        }
    }

    fn string(&self, s: &str) -> Result<Value, ConfigError> {
        let mut pieces = Vec::new();
        let mut last = 0;
        for caps in self.expression.captures_iter(s) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                pieces.push(Piece::Literal(s[last..whole.start()].to_string()));
            }
            pieces.push(self.expression(inner.as_str().trim())?);
            last = whole.end();
        }
        if pieces.is_empty() {
            return Ok(Value::Known(Json::String(s.to_string())));
        }
        if last < s.len() {
            pieces.push(Piece::Literal(s[last..].to_string()));
        }

        // A lone expression keeps its type
        if pieces.len() == 1 {
            match pieces.pop() {
                Some(Piece::Variable(v)) => return Ok(Value::Known(v)),
                Some(Piece::Reference(r)) => return Ok(Value::Pending(r)),
                Some(piece) => pieces.push(piece),
                None => {}
            }
        }

        let mut fragments: Vec<Fragment> = Vec::new();
        for piece in pieces {
            let text = match piece {
                Piece::Reference(r) => {
                    fragments.push(Fragment::Ref(r));
                    continue;
                }
                Piece::Literal(text) => text,
                Piece::Variable(Json::String(text)) => text,
                Piece::Variable(other) => other.to_string(),
            };
            if let Some(Fragment::Literal(previous)) = fragments.last_mut() {
                previous.push_str(&text);
            } else {
                fragments.push(Fragment::Literal(text));
            }
        }

        match fragments.as_slice() {
            [Fragment::Literal(text)] => Ok(Value::Known(Json::String(text.clone()))),
            _ => Ok(Value::Template(fragments)),
        }
    }

    fn expression(&self, expr: &str) -> Result<Piece, ConfigError> {
        if let Some(name) = expr.strip_prefix("var.") {
            return self
                .variables
                .get(name)
                .cloned()
                .map(Piece::Variable)
                .ok_or_else(|| ConfigError::UndefinedVariable(name.to_string()));
        }

        let mut parts = expr.splitn(3, '.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some(name), Some(path))
                if self.identifier.is_match(kind)
                    && self.identifier.is_match(name)
                    && !path.is_empty()
                    && path.split('.').all(|p| !p.is_empty()) =>
            {
                Ok(Piece::Reference(OutputRef::new(
                    ResourceId::new(kind, name),
                    path,
                )))
            }
            _ => Err(ConfigError::InvalidExpression(expr.to_string())),
        }
    }
}

fn collapse_list(values: Vec<Value>) -> Value {
    if values.iter().all(|v| matches!(v, Value::Known(_))) {
        let known = values
            .into_iter()
            .filter_map(|v| match v {
                Value::Known(j) => Some(j),
                _ => None,
            })
            .collect();
        Value::Known(Json::Array(known))
    } else {
        Value::List(values)
    }
}

fn collapse_map(values: BTreeMap<String, Value>) -> Value {
    if values.values().all(|v| matches!(v, Value::Known(_))) {
        let known = values
            .into_iter()
            .filter_map(|(k, v)| match v {
                Value::Known(j) => Some((k, j)),
                _ => None,
            })
            .collect();
        Value::Known(Json::Object(known))
    } else {
        Value::Map(values)
    }
}

// ============================================================================
// Tests
// ============================================================================
