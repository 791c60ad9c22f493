//! Textual source specs, as written in `map_jinja.yaml`.
//!
//! ```text
//! Y:G@os_family          parameter files named after a fact's values
//! G@os_family            same, the `Y:` type is implied for facts
//! C@healthchecks:lookup  subtree of the override document
//! I@healthchecks         same, pillar-style lookup
//! defaults.yaml          a fixed file in the parameters directory
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use super::{SourceDescriptor, SourceError};

const FILE_EXTENSIONS: &[&str] = &[".yaml", ".yml", ".json", ".toml"];

/// One entry of the configured source list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// Parameter files named after the values of `fact`.
    FactFile { fact: String },
    /// A subtree of the override document.
    Config { query: String },
    /// A fixed file name under the parameters directory.
    File { name: String },
}

impl SourceSpec {
    pub fn fact(name: impl Into<String>) -> Self {
        Self::FactFile { fact: name.into() }
    }

    pub fn config(query: impl Into<String>) -> Self {
        Self::Config {
            query: query.into(),
        }
    }

    pub fn parse(spec: &str) -> Result<Self, SourceError> {
        let invalid = |reason: &str| SourceError::InvalidSpec {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty source spec"));
        }

        // Optional single-letter source type, e.g. the `Y` in `Y:G@os`
        let (source_type, rest) = match trimmed.as_bytes() {
            [t, b':', ..] if t.is_ascii_uppercase() => (Some(*t as char), &trimmed[2..]),
            _ => (None, trimmed),
        };

        let Some((lookup, key)) = rest.split_once('@') else {
            if source_type.is_some() {
                return Err(invalid("a source type needs a lookup such as 'G@key'"));
            }
            if FILE_EXTENSIONS.iter().any(|ext| trimmed.ends_with(ext)) {
                return Ok(Self::File {
                    name: trimmed.to_string(),
                });
            }
            return Err(invalid("expected 'G@key', 'C@key', 'I@key' or a parameter file name"));
        };

        if key.is_empty() {
            return Err(invalid("empty lookup key"));
        }

        match (source_type, lookup) {
            (Some('Y') | None, "G") | (Some('Y'), "C" | "I") => Ok(Self::fact(key)),
            (Some('C') | None, "C" | "I") => Ok(Self::config(key)),
            (Some('C'), "G") => Err(invalid("fact values cannot be merged directly, use 'Y:G@key'")),
            (Some(t), _) if t != 'Y' && t != 'C' => Err(invalid("unknown source type, expected 'Y' or 'C'")),
            _ => Err(invalid("unknown lookup, expected 'G', 'C' or 'I'")),
        }
    }

    /// Turn this spec into a loader descriptor.
    ///
    /// `parameters_dir` is where fixed files live; `fact_template` names
    /// fact-selected files.
    pub fn to_descriptor(&self, parameters_dir: &str, fact_template: &str) -> SourceDescriptor {
        match self {
            Self::FactFile { fact } => SourceDescriptor::fact_file(fact_template, fact.clone()),
            Self::Config { query } => SourceDescriptor::ExternalQuery {
                query: query.clone(),
            },
            Self::File { name } => SourceDescriptor::EmbeddedFile {
                path: format!("{}/{}", parameters_dir.trim_end_matches('/'), name),
            },
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FactFile { fact } => write!(f, "Y:G@{}", fact),
            Self::Config { query } => write!(f, "C@{}", query),
            Self::File { name } => f.write_str(name),
        }
    }
}

impl FromStr for SourceSpec {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for SourceSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fact_specs() {
        assert_eq!(SourceSpec::parse("Y:G@os_family").unwrap(), SourceSpec::fact("os_family"));
        assert_eq!(SourceSpec::parse("G@osarch").unwrap(), SourceSpec::fact("osarch"));
        assert_eq!(SourceSpec::parse("Y:C@roles").unwrap(), SourceSpec::fact("roles"));
    }

    #[test]
    fn test_parse_config_specs() {
        assert_eq!(
            SourceSpec::parse("C@healthchecks:lookup").unwrap(),
            SourceSpec::config("healthchecks:lookup")
        );
        assert_eq!(SourceSpec::parse("I@healthchecks").unwrap(), SourceSpec::config("healthchecks"));
        assert_eq!(SourceSpec::parse("C:I@healthchecks").unwrap(), SourceSpec::config("healthchecks"));
    }

    #[test]
    fn test_parse_file_spec() {
        assert_eq!(
            SourceSpec::parse("defaults.yaml").unwrap(),
            SourceSpec::File {
                name: "defaults.yaml".to_string()
            }
        );
    }

    #[test]
    fn test_parse_invalid_specs() {
        for spec in ["", "X:G@os", "Y:Q@os", "C:G@os", "G@", "os_family", "Y:defaults.yaml"] {
            assert!(
                matches!(SourceSpec::parse(spec), Err(SourceError::InvalidSpec { .. })),
                "expected '{}' to be rejected",
                spec
            );
        }
    }

    #[test]
    fn test_display_is_canonical() {
        assert_eq!(SourceSpec::parse("G@os").unwrap().to_string(), "Y:G@os");
        assert_eq!(SourceSpec::parse("I@hc").unwrap().to_string(), "C@hc");
    }

    #[test]
    fn test_to_descriptor() {
        let template = "hc/parameters/{dimension}/{value}.yaml";
        assert_eq!(
            SourceSpec::fact("os").to_descriptor("hc/parameters", template),
            SourceDescriptor::fact_file(template, "os")
        );
        assert_eq!(
            SourceSpec::parse("defaults.yaml").unwrap().to_descriptor("hc/parameters/", template),
            SourceDescriptor::EmbeddedFile {
                path: "hc/parameters/defaults.yaml".to_string()
            }
        );
    }
}
