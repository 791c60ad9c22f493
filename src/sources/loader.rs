//! Source loading
//!
//! Turns descriptors into the ordered list of documents that actually
//! exist. Missing fact-selected files are skipped; files that exist but do
//! not parse abort the whole load.

use mapdata_merge::{ConfigValue, KeyPath, StrategyTable};
use serde::Serialize;

use super::document::{digest_bytes, parse_document};
use super::{SourceDescriptor, SourceError, SourceKind};
use crate::facts::FactSnapshot;
use crate::store::{ContentStore, StoreError};

/// A source that contributed to the merge.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    /// Content path for files, the descriptor's name otherwise.
    pub name: String,
    pub kind: SourceKind,
    /// Position in the final order; later wins.
    pub precedence: usize,
    pub path: Option<String>,
    /// SHA-256 of the raw file bytes.
    pub digest: Option<String>,
    pub payload: ConfigValue,
    /// Strategy declarations carried by the file envelope.
    pub strategies: StrategyTable,
}

impl LoadedSource {
    /// A source given in memory, with no file behind it.
    fn inline(name: String, kind: SourceKind, payload: ConfigValue) -> Self {
        Self {
            name,
            kind,
            precedence: 0,
            path: None,
            digest: None,
            payload,
            strategies: StrategyTable::new(),
        }
    }
}

/// Why a candidate source did not contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No file for this fact value.
    NotFound,
    /// The fact is not reported by the provider.
    FactNotReported,
    /// The override document has nothing at the query path.
    QueryNotSet,
}

/// A candidate that was looked for and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedSource {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub reason: SkipReason,
}

/// Result of [`load_sources`].
#[derive(Debug, Clone, Default)]
pub struct LoadedSources {
    pub sources: Vec<LoadedSource>,
    pub skipped: Vec<SkippedSource>,
}

impl LoadedSources {
    /// Payloads in precedence order, ready for the merge.
    pub fn payloads(&self) -> Vec<ConfigValue> {
        self.sources.iter().map(|s| s.payload.clone()).collect()
    }

    /// All envelope declarations, applied in precedence order.
    pub fn strategy_table(&self) -> StrategyTable {
        let mut table = StrategyTable::new();
        for source in &self.sources {
            table.absorb(&source.strategies);
        }
        table
    }
}

/// Load every descriptor that resolves to an existing document.
///
/// The result is ordered embedded → fact-selected → external override,
/// keeping descriptor order inside each band.
pub fn load_sources(
    descriptors: &[SourceDescriptor],
    facts: &FactSnapshot,
    store: &dyn ContentStore,
    overrides: &ConfigValue,
) -> Result<LoadedSources, SourceError> {
    let mut ordered: Vec<&SourceDescriptor> = descriptors.iter().collect();
    ordered.sort_by_key(|d| d.kind());

    let mut loaded = LoadedSources::default();
    for descriptor in ordered {
        match descriptor {
            SourceDescriptor::Embedded { name, payload } => {
                require_mapping(name, payload)?;
                push(
                    &mut loaded,
                    LoadedSource::inline(name.clone(), SourceKind::Embedded, payload.clone()),
                );
            }

            SourceDescriptor::EmbeddedFile { path } => {
                if !load_file(&mut loaded, store, path, SourceKind::Embedded)? {
                    skip(&mut loaded, path.clone(), Some(path.clone()), SkipReason::NotFound);
                }
            }

            SourceDescriptor::FactSelected {
                template,
                dimensions,
            } => {
                for dimension in dimensions {
                    let values = facts.values(dimension);
                    if values.is_empty() {
                        skip(
                            &mut loaded,
                            format!("Y:G@{}", dimension),
                            None,
                            SkipReason::FactNotReported,
                        );
                        continue;
                    }
                    for value in values {
                        let path = template
                            .replace("{dimension}", dimension)
                            .replace("{value}", value);
                        if !load_file(&mut loaded, store, &path, SourceKind::FactSelectedFile)? {
                            skip(
                                &mut loaded,
                                format!("Y:G@{}", dimension),
                                Some(path),
                                SkipReason::NotFound,
                            );
                        }
                    }
                }
            }

            SourceDescriptor::ExternalOverride { name, payload } => {
                require_mapping(name, payload)?;
                push(
                    &mut loaded,
                    LoadedSource::inline(name.clone(), SourceKind::ExternalOverride, payload.clone()),
                );
            }

            SourceDescriptor::ExternalQuery { query } => {
                let name = format!("C@{}", query);
                match overrides.get_path(&KeyPath::parse(query)) {
                    None | Some(ConfigValue::Null) => {
                        skip(&mut loaded, name, None, SkipReason::QueryNotSet);
                    }
                    Some(payload) => {
                        require_mapping(&name, payload)?;
                        push(
                            &mut loaded,
                            LoadedSource::inline(name, SourceKind::ExternalOverride, payload.clone()),
                        );
                    }
                }
            }
        }
    }

    Ok(loaded)
}

/// Read and parse one file. Returns `false` if it does not exist.
fn load_file(
    loaded: &mut LoadedSources,
    store: &dyn ContentStore,
    path: &str,
    kind: SourceKind,
) -> Result<bool, SourceError> {
    if !store.exists(path) {
        return Ok(false);
    }
    let bytes = match store.read(path) {
        Ok(bytes) => bytes,
        Err(StoreError::NotFound(_)) => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    let document = parse_document(path, &bytes)?;
    let strategies = document.strategy_table(path);
    push(
        loaded,
        LoadedSource {
            name: path.to_string(),
            kind,
            precedence: 0,
            path: Some(path.to_string()),
            digest: Some(digest_bytes(&bytes)),
            payload: document.values,
            strategies,
        },
    );
    Ok(true)
}

fn require_mapping(name: &str, payload: &ConfigValue) -> Result<(), SourceError> {
    if payload.is_mapping() {
        Ok(())
    } else {
        Err(SourceError::NotAMapping {
            name: name.to_string(),
            found: payload.type_name(),
        })
    }
}

/// Append `source`, assigning the next precedence.
fn push(loaded: &mut LoadedSources, mut source: LoadedSource) {
    tracing::debug!(source = %source.name, kind = ?source.kind, "loaded source");
    source.precedence = loaded.sources.len();
    loaded.sources.push(source);
}

fn skip(loaded: &mut LoadedSources, source: String, path: Option<String>, reason: SkipReason) {
    tracing::debug!(source = %source, path = ?path, ?reason, "skipped source");
    loaded.skipped.push(SkippedSource {
        source,
        path,
        reason,
    });
}
