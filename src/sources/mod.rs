//! Configuration sources
//!
//! A source is one named mapping that contributes to the resolved
//! configuration. Sources come in three kinds, always ordered as:
//! 1. Embedded defaults shipped with the formula
//! 2. Parameter files selected by host facts (least specific first)
//! 3. External overrides supplied by the caller (pillar/config)

mod document;
mod loader;
mod spec;

pub use document::{digest_bytes, parse_document, parse_value, DocumentFormat, ParameterDocument};
pub use loader::{load_sources, LoadedSource, LoadedSources, SkipReason, SkippedSource};
pub use spec::SourceSpec;

use mapdata_merge::ConfigValue;
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Kind of a source, which also fixes its band in the precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Embedded,
    FactSelectedFile,
    ExternalOverride,
}

/// What to load, before anything is read.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceDescriptor {
    /// Defaults held in memory.
    Embedded { name: String, payload: ConfigValue },

    /// Defaults read from the content store; a missing file contributes
    /// nothing.
    EmbeddedFile { path: String },

    /// One parameter file per fact value. `template` may use the
    /// `{dimension}` and `{value}` placeholders.
    FactSelected {
        template: String,
        dimensions: Vec<String>,
    },

    /// Caller-supplied override mapping.
    ExternalOverride { name: String, payload: ConfigValue },

    /// Subtree of the caller's override document, e.g. `healthchecks:lookup`.
    ExternalQuery { query: String },
}

impl SourceDescriptor {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Embedded { .. } | Self::EmbeddedFile { .. } => SourceKind::Embedded,
            Self::FactSelected { .. } => SourceKind::FactSelectedFile,
            Self::ExternalOverride { .. } | Self::ExternalQuery { .. } => {
                SourceKind::ExternalOverride
            }
        }
    }

    /// Convenience constructor for a single fact dimension.
    pub fn fact_file(template: impl Into<String>, dimension: impl Into<String>) -> Self {
        Self::FactSelected {
            template: template.into(),
            dimensions: vec![dimension.into()],
        }
    }
}

/// Source loading errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The source exists but is not well-formed. Always fatal.
    #[error("Failed to parse source '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("Source '{name}' is a {found}, expected a mapping")]
    NotAMapping { name: String, found: &'static str },

    #[error("Invalid source spec '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
