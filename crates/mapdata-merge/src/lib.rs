//! Typed configuration values and the layered merge fold.
//!
//! Sources are plain [`ConfigValue`] trees; [`merge`] folds them in
//! precedence order, consulting a [`StrategyTable`] for per-key-path
//! overrides of the default merge behavior.

mod merge;
mod strategy;
mod value;

pub use merge::{merge, merge_two, MergeError};
pub use strategy::{
    Declaration, KeyPath, MergeStrategy, StrategyConflict, StrategyTable, UnknownStrategy,
};
pub use value::{ConfigValue, Mapping};
