//! Formula-level file switch
//!
//! Reads the `tofs.*` keys of a resolved configuration and turns an asset
//! lookup into a [`TofsRequest`]:
//!
//! ```yaml
//! tofs:
//!   path_prefix: healthchecks      # default: the formula name
//!   dirs:
//!     files: files                 # default
//!     default: default             # default
//!   files_switch: [id, roles]      # default: id, roles, osfinger, os, os_family
//!   source_files:
//!     healthchecks-config-file-file-managed:
//!       - local_settings.py.jinja
//! ```

use std::collections::BTreeMap;

use mapdata_merge::{ConfigValue, KeyPath};
use serde::Serialize;

use crate::config::BuiltinDefaults;
use crate::store::ContentStore;

pub use mapdata_tofs::{
    candidates, resolve, Candidate, CandidateOrigin, FactLookup, Resolution, TofsError, TofsRequest,
};

/// TOFS settings of one formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TofsSettings {
    pub path_prefix: String,
    pub files_dir: String,
    pub default_dir: String,
    pub files_switch: Vec<String>,
    /// Extra file names per asset key, tried before anything else.
    pub source_files: BTreeMap<String, Vec<String>>,
}

impl TofsSettings {
    /// Settings from the `tofs` subtree of `config`, with built-in
    /// defaults for anything unset or of the wrong type.
    pub fn from_config(config: &ConfigValue, formula: &str) -> Self {
        let defaults = BuiltinDefaults::default();
        let tofs = config.get("tofs");
        let at = |path: &str| tofs.and_then(|t| t.get_path(&KeyPath::parse(path)));
        let string_at = |path: &str| match at(path) {
            None | Some(ConfigValue::Null) => None,
            Some(ConfigValue::String(s)) => Some(s.clone()),
            Some(other) => {
                tracing::warn!(key = %format!("tofs.{}", path), found = other.type_name(), "ignoring non-string TOFS setting");
                None
            }
        };

        let files_switch = match at("files_switch") {
            None | Some(ConfigValue::Null) => defaults.tofs_files_switch,
            Some(value) => string_list(value).unwrap_or_else(|| {
                tracing::warn!(found = value.type_name(), "ignoring malformed tofs.files_switch");
                defaults.tofs_files_switch
            }),
        };

        let source_files = match at("source_files") {
            None | Some(ConfigValue::Null) => Default::default(),
            Some(ConfigValue::Mapping(assets)) => assets
                .iter()
                .filter_map(|(key, names)| match string_list(names) {
                    Some(names) => Some((key.clone(), names)),
                    None => {
                        tracing::warn!(
                            key = %format!("tofs.source_files.{}", key),
                            found = names.type_name(),
                            "ignoring malformed TOFS source_files entry"
                        );
                        None
                    }
                })
                .collect(),
            Some(other) => {
                tracing::warn!(found = other.type_name(), "ignoring malformed tofs.source_files");
                Default::default()
            }
        };

        Self {
            path_prefix: string_at("path_prefix").unwrap_or_else(|| formula.to_string()),
            files_dir: string_at("dirs.files").unwrap_or(defaults.tofs_files_dir),
            default_dir: string_at("dirs.default").unwrap_or(defaults.tofs_default_dir),
            files_switch,
            source_files,
        }
    }

    /// `<path_prefix>/<files_dir>`
    pub fn prefix(&self) -> String {
        format!("{}/{}", self.path_prefix.trim_end_matches('/'), self.files_dir)
    }

    /// Lookup request for `files` registered under `asset_key`.
    pub fn request(&self, files: &[&str], asset_key: &str) -> TofsRequest {
        let prefix = self.prefix();
        let defaults: Vec<String> = files
            .iter()
            .map(|file| format!("{}/{}/{}", prefix, self.default_dir, file))
            .collect();
        let extras: Vec<String> = self
            .source_files
            .get(asset_key)
            .into_iter()
            .flatten()
            .map(|name| {
                if name.contains('/') {
                    name.clone()
                } else {
                    format!("{}/{}", prefix, name)
                }
            })
            .collect();

        TofsRequest::new(prefix)
            .with_defaults(defaults)
            .with_extras(extras)
            .with_selectors(self.files_switch.iter().cloned())
    }
}

/// A string or a list of strings.
fn string_list(value: &ConfigValue) -> Option<Vec<String>> {
    match value {
        ConfigValue::String(s) => Some(vec![s.clone()]),
        ConfigValue::Sequence(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}

/// Every candidate for an asset, resolved against `store` without
/// requiring a match.
pub fn lookup(
    config: &ConfigValue,
    formula: &str,
    files: &[&str],
    asset_key: &str,
    facts: &dyn FactLookup,
    store: &dyn ContentStore,
) -> Result<Resolution, TofsError> {
    let request = TofsSettings::from_config(config, formula).request(files, asset_key);
    resolve(&request, facts, |path| store.exists(path))
}

/// Path of the asset to use: the first existing candidate.
///
/// Errors when not even a default candidate exists in `store`.
pub fn files_switch(
    config: &ConfigValue,
    formula: &str,
    files: &[&str],
    asset_key: &str,
    facts: &dyn FactLookup,
    store: &dyn ContentStore,
) -> Result<String, TofsError> {
    lookup(config, formula, files, asset_key, facts, store)?.require_existing()
}
