//! Resolved configuration with full provenance
//!
//! The resolved config captures the merged values plus where they came
//! from: every contributing source in precedence order, every candidate
//! that was looked for and skipped, and non-fatal diagnostics.

use std::fs;
use std::io;
use std::path::Path;

use mapdata_merge::{ConfigValue, KeyPath, StrategyConflict};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::facts::FactSnapshot;
use crate::sources::{LoadedSources, SkippedSource, SourceKind};
use crate::store::ContentStore;
use crate::tofs::{self, TofsError};

/// Schema version for resolved_config
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "mapdata/resolved_config@1";

/// Replacement text for redacted values
pub const REDACTED: &str = "[REDACTED]";

/// Keys that contain secrets and should be redacted
const SECRET_KEYS: &[&str] = &[
    "password",
    "token",
    "secret",
    "private_key",
    "api_key",
    "credential",
];

/// A contributing source with provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRecord {
    pub name: String,

    pub kind: SourceKind,

    /// Position in the merge order; later wins
    pub precedence: usize,

    /// Content path (None for in-memory sources)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for in-memory sources)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Non-fatal findings of a resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    StrategyConflict(StrategyConflict),
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrategyConflict(conflict) => write!(f, "strategy conflict at {}", conflict),
        }
    }
}

/// Resolved configuration with full provenance
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Formula the configuration belongs to
    pub formula: String,

    /// The merged configuration mapping
    pub values: ConfigValue,

    /// Facts the resolution was computed from
    pub facts: FactSnapshot,

    /// Contributing sources in precedence order
    pub sources: Vec<SourceRecord>,

    /// Candidates that did not contribute
    pub skipped: Vec<SkippedSource>,

    pub diagnostics: Vec<Diagnostic>,
}

impl ResolvedConfig {
    pub(crate) fn new(
        formula: &str,
        values: ConfigValue,
        facts: FactSnapshot,
        loaded: LoadedSources,
        conflicts: &[StrategyConflict],
    ) -> Self {
        let sources = loaded
            .sources
            .into_iter()
            .map(|source| SourceRecord {
                name: source.name,
                kind: source.kind,
                precedence: source.precedence,
                path: source.path,
                digest: source.digest,
            })
            .collect();

        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            formula: formula.to_string(),
            values,
            facts,
            sources,
            skipped: loaded.skipped,
            diagnostics: conflicts
                .iter()
                .cloned()
                .map(Diagnostic::StrategyConflict)
                .collect(),
        }
    }

    /// Get a config value by path (`.` or `:` separated)
    pub fn get(&self, path: &str) -> Option<&ConfigValue> {
        self.values.get_path(&KeyPath::parse(path))
    }

    /// Get a config value as string
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(ConfigValue::as_str)
    }

    /// Get a config value as bool
    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(ConfigValue::as_bool)
    }

    /// Get a config value as i64
    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(ConfigValue::as_i64)
    }

    /// SHA-256 of the canonical (RFC 8785) JSON of `values`.
    ///
    /// Independent of source file formatting and key order, so two
    /// resolutions with equal values always share a digest.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let canonical = serde_json_canonicalizer::to_vec(&self.values)?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Write to file
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("JSON serialization failed: {}", e),
            )
        })?;
        fs::write(path, json)
    }

    /// Copy with secret-looking scalar values replaced, plus the list of
    /// redacted key paths.
    pub fn redacted(&self) -> (Self, Vec<String>) {
        let mut copy = self.clone();
        let mut redactions = Vec::new();
        redact_recursive(&mut copy.values, String::new(), &mut redactions);
        (copy, redactions)
    }

    /// Resolve a template asset through the `tofs.*` keys of this config.
    pub fn files_switch(
        &self,
        files: &[&str],
        asset_key: &str,
        store: &dyn ContentStore,
    ) -> Result<String, TofsError> {
        tofs::files_switch(&self.values, &self.formula, files, asset_key, &self.facts, store)
    }
}

fn redact_recursive(value: &mut ConfigValue, path: String, redactions: &mut Vec<String>) {
    redact_under(value, path, false, redactions)
}

/// `secret` is set once any enclosing key looks secret; every non-null
/// scalar below it is redacted.
fn redact_under(value: &mut ConfigValue, path: String, secret: bool, redactions: &mut Vec<String>) {
    match value {
        ConfigValue::Mapping(map) => {
            for (key, val) in map.iter_mut() {
                let key_lower = key.to_lowercase();
                let current_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };

                let is_secret = secret || SECRET_KEYS.iter().any(|s| key_lower.contains(s));
                redact_under(val, current_path, is_secret, redactions);
            }
        }
        ConfigValue::Sequence(items) => {
            for (i, val) in items.iter_mut().enumerate() {
                redact_under(val, format!("{}[{}]", path, i), secret, redactions);
            }
        }
        ConfigValue::Null => {}
        _ if secret => {
            *value = ConfigValue::from(REDACTED);
            redactions.push(path);
        }
        _ => {}
    }
}
