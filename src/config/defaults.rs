//! Built-in formula defaults
//!
//! Layout and lookup order used when neither `map_jinja.yaml` nor the
//! caller says otherwise.

use serde::{Deserialize, Serialize};

use crate::facts;
use crate::sources::SourceSpec;

/// Shipped defaults, always the lowest-precedence source.
pub const DEFAULTS_FILE: &str = "defaults.yaml";

/// Formula meta configuration (source list, strategies).
pub const MAP_JINJA_FILE: &str = "map_jinja.yaml";

/// Built-in formula defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Parameters directory, relative to the formula root (default: "parameters")
    pub parameters_dir: String,

    /// Fact-selected file name, relative to the parameters directory
    pub fact_file_template: String,

    /// Facts whose parameter files are loaded, least specific first
    pub fact_dimensions: Vec<String>,

    /// TOFS files directory under the path prefix (default: "files")
    pub tofs_files_dir: String,

    /// TOFS fallback directory (default: "default")
    pub tofs_default_dir: String,

    /// TOFS selector order, most specific first
    pub tofs_files_switch: Vec<String>,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            parameters_dir: "parameters".to_string(),
            fact_file_template: "{dimension}/{value}.yaml".to_string(),
            fact_dimensions: [facts::OSARCH, facts::OS_FAMILY, facts::OS, facts::OSFINGER]
                .into_iter()
                .map(str::to_string)
                .collect(),
            tofs_files_dir: "files".to_string(),
            tofs_default_dir: "default".to_string(),
            tofs_files_switch: mapdata_tofs::DEFAULT_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl BuiltinDefaults {
    /// Default source list for `formula`.
    ///
    /// Fact files from least to most specific, the optional custom key,
    /// then the node id. The `lookup` subtree and the formula's own
    /// override subtree are listed as well; the loader moves them to the
    /// top of the precedence order.
    pub fn source_specs(&self, formula: &str, custom_key: Option<&str>) -> Vec<SourceSpec> {
        let mut specs: Vec<SourceSpec> =
            self.fact_dimensions.iter().map(SourceSpec::fact).collect();
        if let Some(key) = custom_key {
            specs.push(SourceSpec::fact(key));
        }
        specs.push(SourceSpec::config(format!("{}:lookup", formula)));
        specs.push(SourceSpec::config(formula));
        specs.push(SourceSpec::fact(facts::ID));
        specs
    }
}
