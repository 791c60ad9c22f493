//! Template Override and Files Switch (TOFS).
//!
//! Given an asset, computes the ordered list of candidate relative paths
//! and picks the first one that exists:
//! 1. Extra candidates registered for the asset, verbatim
//! 2. One candidate per selector value: `<prefix>/<value>/<basename>`
//! 3. The asset's default candidates
//!
//! Resolution is a pure function of its inputs; nothing is cached.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Fact names that are always treated as facts, even when the snapshot
/// does not report them.
pub const WELL_KNOWN_FACTS: &[&str] = &["id", "roles", "osfinger", "os", "os_family", "osarch"];

/// Default selector order for template lookups.
pub const DEFAULT_SELECTORS: &[&str] = &["id", "roles", "osfinger", "os", "os_family"];

/// Read access to host facts.
pub trait FactLookup {
    /// Values reported for `name` in the provider's order, or `None` if the
    /// fact is unknown. Single-valued facts yield one element.
    fn fact_values(&self, name: &str) -> Option<Vec<String>>;
}

impl FactLookup for BTreeMap<String, Vec<String>> {
    fn fact_values(&self, name: &str) -> Option<Vec<String>> {
        self.get(name).cloned()
    }
}

/// Inputs for one asset lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TofsRequest {
    /// Guaranteed-present fallbacks, tried last.
    pub default_candidates: Vec<String>,

    /// Caller-registered overrides, tried first.
    #[serde(default)]
    pub extra_candidates: Vec<String>,

    /// Fact names or literal path segments, most specific first.
    #[serde(default)]
    pub selectors: Vec<String>,

    /// Directory the selector values live under.
    #[serde(default)]
    pub path_prefix: String,
}

impl TofsRequest {
    pub fn new(path_prefix: impl Into<String>) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            ..Default::default()
        }
    }

    pub fn with_defaults(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.default_candidates.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn with_extras(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_candidates.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn with_selectors(mut self, selectors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.selectors.extend(selectors.into_iter().map(Into::into));
        self
    }
}

/// Why a candidate is in the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateOrigin {
    Extra,
    Fact { name: String, value: String },
    Literal { segment: String },
    Default,
}

/// One candidate path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub path: String,
    pub origin: CandidateOrigin,
}

/// Outcome of [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// The chosen path: the first existing candidate, else the last default.
    pub path: String,

    /// Every candidate, in the order tried.
    pub candidates: Vec<Candidate>,

    /// Index of the existing candidate, `None` if nothing existed.
    pub matched: Option<usize>,
}

impl Resolution {
    pub fn is_match(&self) -> bool {
        self.matched.is_some()
    }

    /// The chosen path, or an error if even the fallback is missing.
    pub fn require_existing(self) -> Result<String, TofsError> {
        match self.matched {
            Some(_) => Ok(self.path),
            None => Err(TofsError::NoCandidateFound {
                fallback: self.path,
                tried: self.candidates.into_iter().map(|c| c.path).collect(),
            }),
        }
    }
}

/// TOFS errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TofsError {
    #[error("no default candidate paths for the asset")]
    NoCandidates,

    #[error("none of {} candidates exists, fallback '{fallback}' is missing", tried.len())]
    NoCandidateFound { fallback: String, tried: Vec<String> },
}

/// Build the ordered, de-duplicated candidate list for `request`.
pub fn candidates(request: &TofsRequest, facts: &dyn FactLookup) -> Vec<Candidate> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |path: String, origin: CandidateOrigin| {
        if seen.insert(path.clone()) {
            out.push(Candidate { path, origin });
        }
    };

    for extra in &request.extra_candidates {
        push(extra.clone(), CandidateOrigin::Extra);
    }

    let basenames = basenames(&request.default_candidates);
    for selector in &request.selectors {
        match facts.fact_values(selector) {
            Some(values) => {
                for value in values {
                    for basename in &basenames {
                        push(
                            join(&[request.path_prefix.as_str(), value.as_str(), basename.as_str()]),
                            CandidateOrigin::Fact {
                                name: selector.clone(),
                                value: value.clone(),
                            },
                        );
                    }
                }
            }
            None if WELL_KNOWN_FACTS.contains(&selector.as_str()) => {
                tracing::debug!(selector = %selector, "fact not reported, no candidates");
            }
            None => {
                for basename in &basenames {
                    push(
                        join(&[request.path_prefix.as_str(), selector.as_str(), basename.as_str()]),
                        CandidateOrigin::Literal {
                            segment: selector.clone(),
                        },
                    );
                }
            }
        }
    }

    for default in &request.default_candidates {
        push(default.clone(), CandidateOrigin::Default);
    }

    out
}

/// Return the first candidate for which `exists` holds.
///
/// When nothing exists the last default candidate is returned
/// with `matched: None`; use [`Resolution::require_existing`] to turn that
/// into an error.
pub fn resolve(
    request: &TofsRequest,
    facts: &dyn FactLookup,
    exists: impl Fn(&str) -> bool,
) -> Result<Resolution, TofsError> {
    let fallback = request
        .default_candidates
        .last()
        .cloned()
        .ok_or(TofsError::NoCandidates)?;
    let candidates = candidates(request, facts);

    let matched = candidates.iter().position(|candidate| {
        let found = exists(&candidate.path);
        tracing::debug!(candidate = %candidate.path, found, "tofs candidate");
        found
    });

    let path = match matched {
        Some(index) => candidates[index].path.clone(),
        None => fallback,
    };

    Ok(Resolution {
        path,
        candidates,
        matched,
    })
}

/// Distinct file names of `paths`, first occurrence first.
fn basenames(paths: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for path in paths {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        if !name.is_empty() && !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

fn join(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
