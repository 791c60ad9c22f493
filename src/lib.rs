//! mapdata - layered formula configuration and template file switching
//!
//! This crate resolves the configuration of an infrastructure formula for
//! one host by folding shipped defaults, fact-selected parameter files and
//! external overrides, and picks template assets through the TOFS file
//! switch.

pub mod config;
pub mod facts;
pub mod sources;
pub mod store;
pub mod tofs;

pub use config::{ConfigError, MapData, ResolvedConfig, SourcePlan};
pub use facts::{FactProvider, FactSnapshot, FactValue, StaticFacts};
pub use mapdata_merge::{ConfigValue, KeyPath, MergeStrategy, StrategyTable};
pub use sources::{SourceDescriptor, SourceKind, SourceSpec};
pub use store::{ContentStore, DirStore, MemoryStore};
pub use tofs::{files_switch, TofsError, TofsRequest, TofsSettings};
