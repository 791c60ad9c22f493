//! Parameter document parsing
//!
//! Parameter files wrap their values in an envelope:
//!
//! ```yaml
//! values:
//!   install:
//!     image: healthchecks/healthchecks
//! strategies:
//!   checks: list_extend
//! merge_lists: false
//! ```
//!
//! Every key is optional; anything else at the top level is rejected.

use std::collections::BTreeMap;

use mapdata_merge::{ConfigValue, KeyPath, MergeStrategy, StrategyTable};
use sha2::{Digest, Sha256};

use super::SourceError;

const ENVELOPE_KEYS: &[&str] = &["values", "strategies", "merge_lists"];

/// On-disk format, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
    Toml,
}

impl DocumentFormat {
    /// Format for `path`; anything unrecognized is read as YAML.
    pub fn for_path(path: &str) -> Self {
        let extension = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("json") => Self::Json,
            Some("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }
}

/// A parsed parameter file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterDocument {
    pub values: ConfigValue,
    pub strategies: BTreeMap<KeyPath, MergeStrategy>,
    pub merge_lists: Option<bool>,
}

impl ParameterDocument {
    /// Strategy declarations of this document, attributed to `origin`.
    pub fn strategy_table(&self, origin: &str) -> StrategyTable {
        let mut table = StrategyTable::new();
        for (path, strategy) in &self.strategies {
            table.declare(path.clone(), *strategy, origin);
        }
        if let Some(merge_lists) = self.merge_lists {
            table.set_merge_lists(merge_lists);
        }
        table
    }
}

/// SHA-256 hex digest of raw source bytes.
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Parse raw bytes into a value, by the format of `path`.
///
/// An empty (or whitespace-only) document is `Null`.
pub fn parse_value(path: &str, bytes: &[u8]) -> Result<ConfigValue, SourceError> {
    let parse_error = |message: String| SourceError::Parse {
        path: path.to_string(),
        message,
    };

    let text = std::str::from_utf8(bytes)
        .map_err(|e| parse_error(format!("invalid UTF-8: {}", e)))?;
    if text.trim().is_empty() {
        return Ok(ConfigValue::Null);
    }

    match DocumentFormat::for_path(path) {
        DocumentFormat::Yaml => serde_yaml::from_str(text).map_err(|e| parse_error(e.to_string())),
        DocumentFormat::Json => serde_json::from_str(text).map_err(|e| parse_error(e.to_string())),
        DocumentFormat::Toml => toml::from_str(text).map_err(|e| parse_error(e.to_string())),
    }
}

/// Parse a parameter file envelope.
pub fn parse_document(path: &str, bytes: &[u8]) -> Result<ParameterDocument, SourceError> {
    let parse_error = |message: String| SourceError::Parse {
        path: path.to_string(),
        message,
    };

    let mut envelope = match parse_value(path, bytes)? {
        ConfigValue::Null => return Ok(empty_document()),
        ConfigValue::Mapping(map) => map,
        other => {
            return Err(parse_error(format!(
                "expected a mapping at the top level, found a {}",
                other.type_name()
            )))
        }
    };

    if let Some(unknown) = envelope.keys().find(|k| !ENVELOPE_KEYS.contains(&k.as_str())) {
        return Err(parse_error(format!(
            "unknown top-level key '{}' (expected one of: {})",
            unknown,
            ENVELOPE_KEYS.join(", ")
        )));
    }

    let values = match envelope.remove("values") {
        None | Some(ConfigValue::Null) => ConfigValue::empty_mapping(),
        Some(values @ ConfigValue::Mapping(_)) => values,
        Some(other) => {
            return Err(parse_error(format!(
                "'values' must be a mapping, found a {}",
                other.type_name()
            )))
        }
    };

    let mut strategies = BTreeMap::new();
    match envelope.remove("strategies") {
        None | Some(ConfigValue::Null) => {}
        Some(ConfigValue::Mapping(declared)) => {
            for (key_path, strategy) in declared {
                let name = strategy.as_str().ok_or_else(|| {
                    parse_error(format!("strategy for '{}' must be a string", key_path))
                })?;
                let strategy: MergeStrategy = name
                    .parse()
                    .map_err(|e| parse_error(format!("'{}': {}", key_path, e)))?;
                strategies.insert(KeyPath::parse(&key_path), strategy);
            }
        }
        Some(other) => {
            return Err(parse_error(format!(
                "'strategies' must be a mapping, found a {}",
                other.type_name()
            )))
        }
    }

    let merge_lists = match envelope.remove("merge_lists") {
        None | Some(ConfigValue::Null) => None,
        Some(ConfigValue::Bool(b)) => Some(b),
        Some(other) => {
            return Err(parse_error(format!(
                "'merge_lists' must be a boolean, found a {}",
                other.type_name()
            )))
        }
    };

    Ok(ParameterDocument {
        values,
        strategies,
        merge_lists,
    })
}

fn empty_document() -> ParameterDocument {
    ParameterDocument {
        values: ConfigValue::empty_mapping(),
        ..Default::default()
    }
}
