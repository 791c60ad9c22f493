//! Layered merge fold.
//!
//! Sources are folded in ascending precedence into an accumulator that
//! starts as an empty mapping:
//! - Mappings: deep-merge by key (unless the path says `Overwrite`)
//! - Sequences: replace, or extend/prepend per the strategy table
//! - Scalars: override (last wins)
//! - Null: override, or delete the key under `Remove`

use crate::strategy::{KeyPath, MergeStrategy, StrategyTable};
use crate::value::{ConfigValue, Mapping};

/// Merge errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("source #{index} is a {found}, expected a mapping")]
    NotAMapping { index: usize, found: &'static str },
}

/// Merge `sources` in order (first is base, last has highest precedence).
pub fn merge(sources: &[ConfigValue], strategies: &StrategyTable) -> Result<ConfigValue, MergeError> {
    let mut accumulator = Mapping::new();
    for (index, source) in sources.iter().enumerate() {
        let layer = source.as_mapping().ok_or(MergeError::NotAMapping {
            index,
            found: source.type_name(),
        })?;
        tracing::trace!(index, keys = layer.len(), "folding source");
        merge_mapping(&mut accumulator, layer, &KeyPath::root(), strategies);
    }
    Ok(ConfigValue::Mapping(accumulator))
}

/// Merge a single overlay into `base` at the document root.
pub fn merge_two(base: ConfigValue, overlay: &ConfigValue, strategies: &StrategyTable) -> ConfigValue {
    let root = KeyPath::root();
    let strategy = strategies.resolve(&root);
    merge_value(base, overlay, &root, strategy, strategies)
}

fn merge_mapping(
    accumulator: &mut Mapping,
    layer: &Mapping,
    path: &KeyPath,
    strategies: &StrategyTable,
) {
    for (key, incoming) in layer {
        let child = path.child(key);
        let strategy = strategies.resolve(&child);

        if strategy == Some(MergeStrategy::Remove) && incoming.is_null() {
            accumulator.remove(key);
            continue;
        }

        let merged = match accumulator.remove(key) {
            Some(existing) => merge_value(existing, incoming, &child, strategy, strategies),
            // Fresh mappings still go through the fold so that nested
            // `Remove` declarations drop their nulls.
            None if incoming.is_mapping() => merge_value(
                ConfigValue::empty_mapping(),
                incoming,
                &child,
                strategy,
                strategies,
            ),
            None => incoming.clone(),
        };
        accumulator.insert(key.clone(), merged);
    }
}

fn merge_value(
    existing: ConfigValue,
    incoming: &ConfigValue,
    path: &KeyPath,
    strategy: Option<MergeStrategy>,
    strategies: &StrategyTable,
) -> ConfigValue {
    match (existing, incoming) {
        (ConfigValue::Mapping(mut base), ConfigValue::Mapping(overlay)) => match strategy {
            Some(MergeStrategy::Overwrite) if strategies.has_declarations_below(path) => {
                // Wholesale replacement, but innermost declarations still
                // govern the keys the overlay brings along.
                base.retain(|key, _| overlay.contains_key(key));
                merge_mapping(&mut base, overlay, path, strategies);
                ConfigValue::Mapping(base)
            }
            Some(MergeStrategy::Overwrite) => incoming.clone(),
            _ => {
                merge_mapping(&mut base, overlay, path, strategies);
                ConfigValue::Mapping(base)
            }
        },

        (ConfigValue::Sequence(mut base), ConfigValue::Sequence(overlay)) => {
            let strategy = match strategy {
                Some(s) if s.is_list_strategy() || s == MergeStrategy::Overwrite => s,
                _ => strategies.default_sequence_strategy(),
            };
            match strategy {
                MergeStrategy::ListExtend => {
                    base.extend(overlay.iter().cloned());
                    ConfigValue::Sequence(base)
                }
                MergeStrategy::ListPrepend => {
                    let mut combined = overlay.clone();
                    combined.extend(base);
                    ConfigValue::Sequence(combined)
                }
                MergeStrategy::ListOverwriteIfNonEmpty if overlay.is_empty() => {
                    ConfigValue::Sequence(base)
                }
                _ => incoming.clone(),
            }
        }

        // Scalars and mismatched types: overlay wins
        (_, overlay) => overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(value: serde_json::Value) -> ConfigValue {
        ConfigValue::from(value)
    }

    fn no_overrides() -> StrategyTable {
        StrategyTable::new()
    }

    #[test]
    fn test_precedence_last_source_wins() {
        let defaults = v(json!({"winner": "defaults", "image": "healthchecks"}));
        let lookup = v(json!({"winner": "lookup"}));
        let pillar = v(json!({"winner": "pillar"}));

        let result = merge(&[defaults, lookup, pillar], &no_overrides()).unwrap();

        assert_eq!(result, v(json!({"winner": "pillar", "image": "healthchecks"})));
    }

    #[test]
    fn test_leaf_set_once_survives() {
        let result = merge(
            &[
                v(json!({"install": {"image": "hc"}})),
                v(json!({"config": {"port": 8000}})),
                v(json!({"install": {"autoupdate": true}})),
            ],
            &no_overrides(),
        )
        .unwrap();

        assert_eq!(result.get_path(&"install.image".into()), Some(&v(json!("hc"))));
        assert_eq!(result.get_path(&"config.port".into()), Some(&v(json!(8000))));
    }

    #[test]
    fn test_deep_merge_preserves_siblings() {
        let result = merge(
            &[v(json!({"a": {"x": 1, "y": 2}})), v(json!({"a": {"y": 3}}))],
            &no_overrides(),
        )
        .unwrap();

        assert_eq!(result, v(json!({"a": {"x": 1, "y": 3}})));
    }

    #[test]
    fn test_nested_deep_merge() {
        let result = merge(
            &[
                v(json!({"level1": {"level2": {"a": 1, "b": 2}}})),
                v(json!({"level1": {"level2": {"b": 3, "c": 4}}})),
            ],
            &no_overrides(),
        )
        .unwrap();

        assert_eq!(result, v(json!({"level1": {"level2": {"a": 1, "b": 3, "c": 4}}})));
    }

    #[test]
    fn test_list_overwrite_by_default() {
        let sources = [v(json!({"r": [1, 2]})), v(json!({"r": [3]}))];
        let result = merge(&sources, &no_overrides()).unwrap();
        assert_eq!(result, v(json!({"r": [3]})));
    }

    #[test]
    fn test_list_extend() {
        let sources = [v(json!({"r": [1, 2]})), v(json!({"r": [3]}))];
        let table = StrategyTable::new().with("r", MergeStrategy::ListExtend, "test");
        let result = merge(&sources, &table).unwrap();
        assert_eq!(result, v(json!({"r": [1, 2, 3]})));
    }

    #[test]
    fn test_list_prepend_keeps_source_order() {
        let sources = [v(json!({"r": [1, 2]})), v(json!({"r": [3, 4]}))];
        let table = StrategyTable::new().with("r", MergeStrategy::ListPrepend, "test");
        let result = merge(&sources, &table).unwrap();
        assert_eq!(result, v(json!({"r": [3, 4, 1, 2]})));
    }

    #[test]
    fn test_list_overwrite_if_non_empty() {
        let table = StrategyTable::new().with(
            "checks",
            MergeStrategy::ListOverwriteIfNonEmpty,
            "test",
        );

        let kept = merge(
            &[v(json!({"checks": ["backup"]})), v(json!({"checks": []}))],
            &table,
        )
        .unwrap();
        assert_eq!(kept, v(json!({"checks": ["backup"]})));

        let replaced = merge(
            &[v(json!({"checks": ["backup"]})), v(json!({"checks": ["disk"]}))],
            &table,
        )
        .unwrap();
        assert_eq!(replaced, v(json!({"checks": ["disk"]})));
    }

    #[test]
    fn test_merge_lists_switch() {
        let mut table = StrategyTable::new();
        table.set_merge_lists(true);
        let result = merge(&[v(json!({"r": [1]})), v(json!({"r": [2]}))], &table).unwrap();
        assert_eq!(result, v(json!({"r": [1, 2]})));
    }

    #[test]
    fn test_inherited_list_strategy() {
        let table = StrategyTable::new().with("config.users", MergeStrategy::ListExtend, "test");
        let result = merge(
            &[
                v(json!({"config": {"users": {"hc": {"groups": ["docker"]}}}})),
                v(json!({"config": {"users": {"hc": {"groups": ["adm"]}}}})),
            ],
            &table,
        )
        .unwrap();

        assert_eq!(
            result,
            v(json!({"config": {"users": {"hc": {"groups": ["docker", "adm"]}}}}))
        );
    }

    #[test]
    fn test_null_overrides_by_default() {
        let result = merge(&[v(json!({"a": 1})), v(json!({"a": null}))], &no_overrides()).unwrap();
        assert_eq!(result, v(json!({"a": null})));
    }

    #[test]
    fn test_null_removes_with_remove_strategy() {
        let table = StrategyTable::new().with("a", MergeStrategy::Remove, "test");
        let result = merge(&[v(json!({"a": 1, "b": 2})), v(json!({"a": null}))], &table).unwrap();
        assert_eq!(result, v(json!({"b": 2})));
    }

    #[test]
    fn test_remove_on_fresh_nested_mapping() {
        let table = StrategyTable::new().with("config.extra", MergeStrategy::Remove, "test");
        let result = merge(
            &[v(json!({"install": {}})), v(json!({"config": {"extra": null, "port": 1}}))],
            &table,
        )
        .unwrap();
        assert_eq!(result, v(json!({"install": {}, "config": {"port": 1}})));
    }

    #[test]
    fn test_remove_with_non_null_value_merges() {
        let table = StrategyTable::new().with("a", MergeStrategy::Remove, "test");
        let result = merge(&[v(json!({"a": {"x": 1}})), v(json!({"a": {"y": 2}}))], &table).unwrap();
        assert_eq!(result, v(json!({"a": {"x": 1, "y": 2}})));
    }

    #[test]
    fn test_overwrite_mapping() {
        let table = StrategyTable::new().with("config", MergeStrategy::Overwrite, "test");
        let result = merge(
            &[v(json!({"config": {"a": 1, "b": 2}})), v(json!({"config": {"b": 3}}))],
            &table,
        )
        .unwrap();
        assert_eq!(result, v(json!({"config": {"b": 3}})));
    }

    #[test]
    fn test_overwrite_with_inner_declaration() {
        let table = StrategyTable::new()
            .with("config", MergeStrategy::Overwrite, "outer")
            .with("config.users", MergeStrategy::ListExtend, "inner");
        let result = merge(
            &[
                v(json!({"config": {"users": ["a"], "port": 1}})),
                v(json!({"config": {"users": ["b"]}})),
            ],
            &table,
        )
        .unwrap();
        assert_eq!(result, v(json!({"config": {"users": ["a", "b"]}})));
    }

    #[test]
    fn test_type_mismatch_overlay_wins() {
        let result = merge(
            &[v(json!({"a": {"x": 1}, "b": [1]})), v(json!({"a": "flat", "b": {"k": 1}}))],
            &no_overrides(),
        )
        .unwrap();
        assert_eq!(result, v(json!({"a": "flat", "b": {"k": 1}})));
    }

    #[test]
    fn test_idempotent() {
        let sources = [
            v(json!({"a": {"x": [1]}, "b": null})),
            v(json!({"a": {"x": [2], "y": true}})),
        ];
        let table = StrategyTable::new().with("a.x", MergeStrategy::ListExtend, "test");
        assert_eq!(merge(&sources, &table).unwrap(), merge(&sources, &table).unwrap());
    }

    #[test]
    fn test_non_mapping_source_rejected() {
        let err = merge(&[v(json!({})), v(json!([1, 2]))], &no_overrides()).unwrap_err();
        assert_eq!(err, MergeError::NotAMapping { index: 1, found: "sequence" });
    }

    #[test]
    fn test_empty_sources_give_empty_mapping() {
        assert_eq!(merge(&[], &no_overrides()).unwrap(), ConfigValue::empty_mapping());
    }

    #[test]
    fn test_merge_two() {
        let merged = merge_two(
            v(json!({"a": {"x": 1}})),
            &v(json!({"a": {"y": 2}})),
            &no_overrides(),
        );
        assert_eq!(merged, v(json!({"a": {"x": 1, "y": 2}})));
    }
}
