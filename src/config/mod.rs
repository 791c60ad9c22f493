//! Formula configuration resolution
//!
//! Resolves the configuration of one formula for one host:
//! 1. Snapshot the host facts
//! 2. Pick the source list (override document, caller, `map_jinja.yaml`,
//!    built-in defaults, in that order of preference)
//! 3. Load the sources: shipped defaults, fact-selected parameter files,
//!    external overrides
//! 4. Merge them with the combined strategy table

mod defaults;
mod effective;

pub use defaults::{BuiltinDefaults, DEFAULTS_FILE, MAP_JINJA_FILE};
pub use effective::{
    Diagnostic, ResolvedConfig, SourceRecord, REDACTED, SCHEMA_ID, SCHEMA_VERSION,
};

use mapdata_merge::{merge, ConfigValue, KeyPath, MergeError, StrategyTable};

use crate::facts::{FactProvider, FactSnapshot};
use crate::sources::{
    load_sources, parse_document, LoadedSources, SourceDescriptor, SourceError, SourceSpec,
};
use crate::store::{ContentStore, StoreError};
use crate::tofs::TofsError;

/// Where the effective source list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceListOrigin {
    /// `<formula>:map_jinja:sources` in the override document
    Overrides,
    /// [`MapData::sources`]
    Caller,
    /// `values.sources` in `map_jinja.yaml`
    MapJinja,
    Builtin,
}

/// Everything decided before the merge.
#[derive(Debug, Clone)]
pub struct SourcePlan {
    pub facts: FactSnapshot,
    pub specs: Vec<SourceSpec>,
    pub origin: SourceListOrigin,
    pub loaded: LoadedSources,
    /// Strategy table the merge will use, in absorption order:
    /// `map_jinja.yaml`, loaded sources, caller.
    pub strategies: StrategyTable,
}

/// Formula configuration resolver
#[derive(Debug, Clone)]
pub struct MapData {
    formula: String,
    parameters_dir: String,
    sources: Option<Vec<SourceSpec>>,
    custom_key: Option<String>,
    embedded: Vec<(String, ConfigValue)>,
    overrides: ConfigValue,
    strategies: StrategyTable,
    record_sources: bool,
    defaults: BuiltinDefaults,
}

impl MapData {
    pub fn new(formula: impl Into<String>) -> Self {
        let formula = formula.into();
        let defaults = BuiltinDefaults::default();
        Self {
            parameters_dir: format!("{}/{}", formula, defaults.parameters_dir),
            formula,
            sources: None,
            custom_key: None,
            embedded: Vec::new(),
            overrides: ConfigValue::empty_mapping(),
            strategies: StrategyTable::new(),
            record_sources: true,
            defaults,
        }
    }

    /// Parameters directory in the content store (default: `<formula>/parameters`)
    pub fn parameters_dir(mut self, dir: impl Into<String>) -> Self {
        self.parameters_dir = dir.into().trim_end_matches('/').to_string();
        self
    }

    /// Explicit source list, used when the override document sets none.
    pub fn sources(mut self, specs: Vec<SourceSpec>) -> Self {
        self.sources = Some(specs);
        self
    }

    /// Extra fact dimension loaded after `osfinger` in the default list.
    pub fn custom_key(mut self, key: impl Into<String>) -> Self {
        self.custom_key = Some(key.into());
        self
    }

    /// In-memory defaults, merged right after `defaults.yaml`.
    pub fn embedded(mut self, name: impl Into<String>, payload: ConfigValue) -> Self {
        self.embedded.push((name.into(), payload));
        self
    }

    /// The override document (pillar) queried by `C@` sources.
    pub fn overrides(mut self, document: ConfigValue) -> Self {
        self.overrides = document;
        self
    }

    /// Caller strategy declarations; they win over file declarations.
    pub fn strategies(mut self, table: StrategyTable) -> Self {
        self.strategies = table;
        self
    }

    /// Record the effective source list under `map_jinja.sources` (default: true).
    pub fn record_sources(mut self, record: bool) -> Self {
        self.record_sources = record;
        self
    }

    pub fn formula(&self) -> &str {
        &self.formula
    }

    fn parameter_path(&self, name: &str) -> String {
        format!("{}/{}", self.parameters_dir, name)
    }

    fn fact_template(&self) -> String {
        self.parameter_path(&self.defaults.fact_file_template)
    }

    /// Load `map_jinja.yaml`, if the formula ships one.
    fn read_map_jinja(
        &self,
        store: &dyn ContentStore,
    ) -> Result<Option<(Option<Vec<SourceSpec>>, StrategyTable)>, ConfigError> {
        let path = self.parameter_path(MAP_JINJA_FILE);
        if !store.exists(&path) {
            return Ok(None);
        }
        let bytes = match store.read(&path) {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(SourceError::from(e).into()),
        };

        let document = parse_document(&path, &bytes)?;
        let specs = match document.values.get("sources") {
            None | Some(ConfigValue::Null) => None,
            Some(list) => Some(parse_spec_list(&path, list)?),
        };
        Ok(Some((specs, document.strategy_table(&path))))
    }

    /// Decide the source list and load every source.
    pub fn plan(
        &self,
        facts: FactSnapshot,
        store: &dyn ContentStore,
    ) -> Result<SourcePlan, ConfigError> {
        let (meta_specs, meta_strategies) = self.read_map_jinja(store)?.unwrap_or_default();

        let override_path = KeyPath::root()
            .child(&self.formula)
            .child("map_jinja")
            .child("sources");
        let override_specs = match self.overrides.get_path(&override_path) {
            None | Some(ConfigValue::Null) => None,
            Some(list) => Some(parse_spec_list(&format!("C@{}", override_path), list)?),
        };

        let (specs, origin) = match (override_specs, &self.sources, meta_specs) {
            (Some(specs), _, _) => (specs, SourceListOrigin::Overrides),
            (None, Some(specs), _) => (specs.clone(), SourceListOrigin::Caller),
            (None, None, Some(specs)) => (specs, SourceListOrigin::MapJinja),
            (None, None, None) => (
                self.defaults
                    .source_specs(&self.formula, self.custom_key.as_deref()),
                SourceListOrigin::Builtin,
            ),
        };
        tracing::debug!(formula = %self.formula, ?origin, sources = specs.len(), "source list");

        let descriptors = self.descriptors(&specs);
        let loaded = load_sources(&descriptors, &facts, store, &self.overrides)?;

        let mut strategies = meta_strategies;
        strategies.absorb(&loaded.strategy_table());
        strategies.absorb(&self.strategies);

        Ok(SourcePlan {
            facts,
            specs,
            origin,
            loaded,
            strategies,
        })
    }

    /// `defaults.yaml`, embedded payloads, then the configured specs.
    fn descriptors(&self, specs: &[SourceSpec]) -> Vec<SourceDescriptor> {
        let mut descriptors = Vec::with_capacity(specs.len() + self.embedded.len() + 1);

        let lists_defaults = specs
            .iter()
            .any(|spec| matches!(spec, SourceSpec::File { name } if name == DEFAULTS_FILE));
        if !lists_defaults {
            descriptors.push(SourceDescriptor::EmbeddedFile {
                path: self.parameter_path(DEFAULTS_FILE),
            });
        }
        for (name, payload) in &self.embedded {
            descriptors.push(SourceDescriptor::Embedded {
                name: name.clone(),
                payload: payload.clone(),
            });
        }

        let template = self.fact_template();
        descriptors.extend(
            specs
                .iter()
                .map(|spec| spec.to_descriptor(&self.parameters_dir, &template)),
        );
        descriptors
    }

    /// Resolve the formula configuration for the host behind `provider`.
    pub fn resolve(
        &self,
        provider: &dyn FactProvider,
        store: &dyn ContentStore,
    ) -> Result<ResolvedConfig, ConfigError> {
        self.resolve_facts(provider.facts(), store)
    }

    /// Resolve against an explicit fact snapshot.
    pub fn resolve_facts(
        &self,
        facts: FactSnapshot,
        store: &dyn ContentStore,
    ) -> Result<ResolvedConfig, ConfigError> {
        let plan = self.plan(facts, store)?;

        let mut values = merge(&plan.loaded.payloads(), &plan.strategies)?;
        if self.record_sources {
            let recorded: Vec<String> = plan.specs.iter().map(ToString::to_string).collect();
            values.set_path(&KeyPath::parse("map_jinja.sources"), ConfigValue::from(recorded));
        }

        tracing::info!(
            formula = %self.formula,
            sources = plan.loaded.sources.len(),
            skipped = plan.loaded.skipped.len(),
            "resolved configuration"
        );

        Ok(ResolvedConfig::new(
            &self.formula,
            values,
            plan.facts,
            plan.loaded,
            plan.strategies.conflicts(),
        ))
    }
}

fn parse_spec_list(origin: &str, list: &ConfigValue) -> Result<Vec<SourceSpec>, ConfigError> {
    let invalid = |reason: String| ConfigError::MapJinja {
        origin: origin.to_string(),
        reason,
    };

    let items = list
        .as_sequence()
        .ok_or_else(|| invalid(format!("'sources' must be a list, found a {}", list.type_name())))?;
    items
        .iter()
        .map(|item| -> Result<SourceSpec, ConfigError> {
            let spec = item
                .as_str()
                .ok_or_else(|| invalid(format!("source entries must be strings, found a {}", item.type_name())))?;
            Ok(SourceSpec::parse(spec)?)
        })
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Tofs(#[from] TofsError),

    #[error("Invalid map_jinja settings in {origin}: {reason}")]
    MapJinja { origin: String, reason: String },
}
