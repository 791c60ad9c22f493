//! Host facts (grains)
//!
//! The engine never discovers facts itself. Callers hand it a
//! [`FactProvider`], which is asked for one [`FactSnapshot`] per resolution
//! request.

use std::collections::BTreeMap;
use std::path::Path;

use mapdata_tofs::FactLookup;
use serde::{Deserialize, Serialize};

/// Node identifier.
pub const ID: &str = "id";
/// Assigned roles, multi-valued.
pub const ROLES: &str = "roles";
/// OS fingerprint, e.g. `Debian-12`.
pub const OSFINGER: &str = "osfinger";
/// OS name, e.g. `Debian`.
pub const OS: &str = "os";
/// OS family, e.g. `Debian` for Ubuntu hosts.
pub const OS_FAMILY: &str = "os_family";
/// CPU architecture.
pub const OSARCH: &str = "osarch";

/// A single fact: one scalar or an ordered list of scalars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    One(String),
    Many(Vec<String>),
}

impl FactValue {
    /// Every value, in reported order.
    pub fn values(&self) -> Vec<&str> {
        match self {
            FactValue::One(value) => vec![value.as_str()],
            FactValue::Many(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for FactValue {
    fn from(value: &str) -> Self {
        FactValue::One(value.to_string())
    }
}

impl From<String> for FactValue {
    fn from(value: String) -> Self {
        FactValue::One(value)
    }
}

impl From<Vec<&str>> for FactValue {
    fn from(values: Vec<&str>) -> Self {
        FactValue::Many(values.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for FactValue {
    fn from(values: Vec<String>) -> Self {
        FactValue::Many(values)
    }
}

/// Errors loading a fact snapshot
#[derive(Debug, thiserror::Error)]
pub enum FactsError {
    #[error("Failed to read facts file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse facts: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Immutable view of the host facts for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactSnapshot {
    facts: BTreeMap<String, FactValue>,
}

impl FactSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set `name` to `value`.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FactValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FactValue>) {
        self.facts.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FactValue> {
        self.facts.get(name)
    }

    /// Values of `name` in reported order; empty if the fact is unknown.
    pub fn values(&self, name: &str) -> Vec<&str> {
        self.get(name).map(FactValue::values).unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.facts.contains_key(name)
    }

    /// Parse a YAML (or JSON) mapping of fact name to scalar or list.
    ///
    /// Non-string scalars are kept as their textual form, so `osmajorrelease: 12`
    /// becomes `"12"`.
    pub fn from_yaml_str(content: &str) -> Result<Self, FactsError> {
        let raw: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(content)?;
        let mut snapshot = Self::new();
        for (name, value) in raw {
            match value {
                serde_yaml::Value::Sequence(items) => {
                    let values: Vec<String> = items.iter().filter_map(scalar_text).collect();
                    snapshot.insert(name, values);
                }
                other => {
                    if let Some(text) = scalar_text(&other) {
                        snapshot.insert(name, text);
                    }
                }
            }
        }
        Ok(snapshot)
    }

    pub fn from_file(path: &Path) -> Result<Self, FactsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }
}

fn scalar_text(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl FactLookup for FactSnapshot {
    fn fact_values(&self, name: &str) -> Option<Vec<String>> {
        self.get(name)
            .map(|value| value.values().into_iter().map(str::to_string).collect())
    }
}

/// Source of host facts.
pub trait FactProvider: Send + Sync {
    fn facts(&self) -> FactSnapshot;
}

/// Provider returning a fixed snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticFacts(pub FactSnapshot);

impl FactProvider for StaticFacts {
    fn facts(&self) -> FactSnapshot {
        self.0.clone()
    }
}
