//! Module route declarations.
//!
//! Each module ships `config.json`: a JSON array whose entries are either a
//! path string (bound to every verb) or `{"path": "...", "methods": [...]}`.
//! Paths are kept as raw strings here; parsing happens per path during
//! reconciliation so one bad path does not sink the rest.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

use crate::binding::HttpVerb;

pub const DECLARATION_FILE_NAME: &str = "config.json";
pub const HEALTH_ROUTE_PREFIX: &str = "/_health/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDeclaration {
    pub path: String,
    pub verbs: Vec<HttpVerb>,
}

impl RouteDeclaration {
    pub fn all_verbs(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            verbs: HttpVerb::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDeclaration {
    pub module: String,
    pub function_name: String,
    pub routes: Vec<RouteDeclaration>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid module name `{0}`: use letters, digits, `-` or `_`")]
    InvalidModuleName(String),
    #[error("failed to read declaration {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("declaration {source_label} is not valid JSON: {source}")]
    Json {
        source_label: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("declaration {source_label} must be a JSON array of path strings")]
    NotAnArray { source_label: String },
    #[error("declaration {source_label} entry {index}: {reason}")]
    InvalidEntry {
        source_label: String,
        index: usize,
        reason: String,
    },
}

pub fn declaration_path(modules_dir: &Path, module: &str) -> PathBuf {
    modules_dir.join(module).join(DECLARATION_FILE_NAME)
}

pub fn validate_module_name(module: &str) -> Result<(), ConfigError> {
    let valid = !module.is_empty()
        && module
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidModuleName(module.to_string()))
    }
}

impl ModuleDeclaration {
    pub fn new(
        module: impl Into<String>,
        function_name: impl Into<String>,
        routes: Vec<RouteDeclaration>,
    ) -> Self {
        Self {
            module: module.into(),
            function_name: function_name.into(),
            routes,
        }
    }

    /// Declaration binding every verb on each of `paths`.
    pub fn with_paths(
        module: impl Into<String>,
        function_name: impl Into<String>,
        paths: &[&str],
    ) -> Self {
        Self::new(
            module,
            function_name,
            paths
                .iter()
                .map(|path| RouteDeclaration::all_verbs(*path))
                .collect(),
        )
    }

    pub fn load(
        modules_dir: &Path,
        module: &str,
        function_name: &str,
    ) -> Result<Self, ConfigError> {
        validate_module_name(module)?;
        let path = declaration_path(modules_dir, module);
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_json(module, function_name, &path.display().to_string(), &text)
    }

    pub fn from_json(
        module: &str,
        function_name: &str,
        source_label: &str,
        text: &str,
    ) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(text).map_err(|source| ConfigError::Json {
            source_label: source_label.to_string(),
            source,
        })?;
        let Value::Array(entries) = value else {
            return Err(ConfigError::NotAnArray {
                source_label: source_label.to_string(),
            });
        };

        let mut routes: Vec<RouteDeclaration> = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let route = parse_entry(entry).map_err(|reason| ConfigError::InvalidEntry {
                source_label: source_label.to_string(),
                index,
                reason,
            })?;

            match routes.iter_mut().find(|existing| existing.path == route.path) {
                Some(existing) => {
                    for verb in route.verbs {
                        if !existing.verbs.contains(&verb) {
                            existing.verbs.push(verb);
                        }
                    }
                }
                None => routes.push(route),
            }
        }

        Ok(Self::new(module, function_name, routes))
    }

    pub fn health_route(&self) -> String {
        format!("{HEALTH_ROUTE_PREFIX}{}", self.module)
    }

    pub fn has_health_route(&self) -> bool {
        let expected = self.health_route();
        self.routes.iter().any(|route| route.path == expected)
    }
}

fn parse_entry(entry: Value) -> Result<RouteDeclaration, String> {
    match entry {
        Value::String(path) => Ok(RouteDeclaration::all_verbs(path)),
        Value::Object(mut object) => {
            let path = match object.remove("path") {
                Some(Value::String(path)) => path,
                Some(_) => return Err("`path` must be a string".to_string()),
                None => return Err("object entries require a `path` field".to_string()),
            };
            let verbs = match object.remove("methods") {
                None | Some(Value::Null) => HttpVerb::ALL.to_vec(),
                Some(methods) => parse_methods(methods)?,
            };
            if let Some(unknown) = object.keys().next() {
                return Err(format!("unknown field `{unknown}`"));
            }
            Ok(RouteDeclaration { path, verbs })
        }
        other => Err(format!(
            "expected a path string or route object, found {}",
            json_kind(&other)
        )),
    }
}

fn parse_methods(methods: Value) -> Result<Vec<HttpVerb>, String> {
    let Value::Array(items) = methods else {
        return Err("`methods` must be an array of HTTP method names".to_string());
    };
    if items.is_empty() {
        return Err("`methods` must not be empty".to_string());
    }

    let mut verbs = Vec::with_capacity(items.len());
    for item in items {
        let Value::String(name) = item else {
            return Err("`methods` entries must be strings".to_string());
        };
        let verb: HttpVerb = name.parse().map_err(|error| format!("{error}"))?;
        if !verbs.contains(&verb) {
            verbs.push(verb);
        }
    }
    Ok(verbs)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
