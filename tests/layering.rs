//! Layered resolution of the fixture formula
//!
//! Defaults, fact-selected parameter files and override documents folded
//! into one configuration, read through a real directory store.

mod fixtures;

use std::fs;

use fixtures::{el9_facts, minion1_facts, store, FORMULA};
use mapdata::config::{ConfigError, SourceListOrigin};
use mapdata::sources::{SkipReason, SourceError};
use mapdata::{
    ConfigValue, DirStore, FactSnapshot, MapData, MergeStrategy, SourceKind, StaticFacts,
    StrategyTable,
};
use serde_json::json;
use tempfile::TempDir;

fn names(config: &mapdata::ResolvedConfig) -> Vec<&str> {
    config.sources.iter().map(|s| s.name.as_str()).collect()
}

fn check_names(config: &mapdata::ResolvedConfig) -> Vec<&str> {
    config
        .get("checks")
        .and_then(ConfigValue::as_sequence)
        .unwrap_or_default()
        .iter()
        .filter_map(|check| check.get("name").and_then(ConfigValue::as_str))
        .collect()
}

#[test]
fn test_debian_web_node() {
    let config = MapData::new(FORMULA)
        .resolve(&StaticFacts(minion1_facts()), &store())
        .unwrap();

    assert_eq!(
        names(&config),
        [
            "healthchecks/parameters/defaults.yaml",
            "healthchecks/parameters/os_family/Debian.yaml",
            "healthchecks/parameters/roles/web.yaml",
            "healthchecks/parameters/id/minion1.yaml",
        ]
    );

    // most specific source wins, siblings survive
    assert_eq!(config.get_str("lookup.pkg"), Some("healthchecks-debian"));
    assert_eq!(config.get_str("lookup.service"), Some("healthchecks"));
    assert_eq!(config.get_str("install.user"), Some("www-data"));
    assert_eq!(config.get_i64("install.port"), Some(8080));
    assert_eq!(config.get_str("install.image"), Some("healthchecks/healthchecks"));
    assert_eq!(config.get_str("config.site_name"), Some("Minion One"));
    assert_eq!(config.get_str("config.site_root"), Some("http://localhost:8000"));

    // `checks` is declared list_extend in map_jinja.yaml
    assert_eq!(check_names(&config), ["ping", "http", "backup"]);

    // `config.db: null` with the remove strategy deletes the key
    assert!(config.get("config.db").is_none());

    assert!(config.diagnostics.is_empty());
}

#[test]
fn test_skipped_sources_recorded() {
    let config = MapData::new(FORMULA)
        .resolve_facts(minion1_facts(), &store())
        .unwrap();

    let skipped: Vec<(&str, SkipReason)> = config
        .skipped
        .iter()
        .map(|s| (s.source.as_str(), s.reason))
        .collect();
    assert_eq!(
        skipped,
        [
            ("Y:G@osarch", SkipReason::NotFound),
            ("Y:G@os", SkipReason::NotFound),
            ("Y:G@osfinger", SkipReason::FactNotReported),
            ("C@healthchecks:lookup", SkipReason::QueryNotSet),
            ("C@healthchecks", SkipReason::QueryNotSet),
        ]
    );
}

#[test]
fn test_redhat_node_without_roles() {
    let config = MapData::new(FORMULA)
        .resolve_facts(el9_facts(), &store())
        .unwrap();

    assert_eq!(config.get_str("lookup.pkg"), Some("healthchecks-el"));
    assert_eq!(config.get_str("install.user"), Some("apache"));
    assert_eq!(config.get_i64("install.port"), Some(8000));
    assert_eq!(config.get_str("config.db"), Some("sqlite"));
    assert_eq!(check_names(&config), ["ping"]);
}

#[test]
fn test_no_facts_yields_defaults() {
    let config = MapData::new(FORMULA)
        .record_sources(false)
        .resolve_facts(FactSnapshot::new(), &store())
        .unwrap();

    assert_eq!(names(&config), ["healthchecks/parameters/defaults.yaml"]);
    assert_eq!(config.get_str("install.user"), Some("healthchecks"));
    assert!(config.get("map_jinja").is_none());
}

#[test]
fn test_pillar_overrides_win() {
    let overrides = ConfigValue::from(json!({
        "healthchecks": {
            "lookup": {"install": {"tag": "v3.2"}},
            "config": {"site_name": "Pillar"},
            "checks": [{"name": "disk"}]
        }
    }));

    let config = MapData::new(FORMULA)
        .overrides(overrides)
        .resolve_facts(minion1_facts(), &store())
        .unwrap();

    assert_eq!(config.get_str("install.tag"), Some("v3.2"));
    assert_eq!(config.get_str("config.site_name"), Some("Pillar"));
    assert_eq!(check_names(&config), ["ping", "http", "backup", "disk"]);

    let last = config.sources.last().unwrap();
    assert_eq!(last.name, "C@healthchecks");
    assert_eq!(last.kind, SourceKind::ExternalOverride);
    assert!(last.digest.is_none());
}

#[test]
fn test_pillar_replaces_source_list() {
    let overrides = ConfigValue::from(json!({
        "healthchecks": {"map_jinja": {"sources": ["Y:G@id"]}}
    }));
    let engine = MapData::new(FORMULA).overrides(overrides);

    let plan = engine.plan(minion1_facts(), &store()).unwrap();
    assert_eq!(plan.origin, SourceListOrigin::Overrides);

    let config = engine.resolve_facts(minion1_facts(), &store()).unwrap();
    assert_eq!(
        names(&config),
        [
            "healthchecks/parameters/defaults.yaml",
            "healthchecks/parameters/id/minion1.yaml",
        ]
    );
    assert_eq!(
        config.get("map_jinja.sources"),
        Some(&ConfigValue::from(vec!["Y:G@id"]))
    );
}

#[test]
fn test_caller_strategy_wins() {
    let strategies = StrategyTable::new().with("checks", MergeStrategy::Overwrite, "caller");

    let config = MapData::new(FORMULA)
        .strategies(strategies)
        .resolve_facts(minion1_facts(), &store())
        .unwrap();

    assert_eq!(check_names(&config), ["backup"]);
    assert_eq!(config.diagnostics.len(), 1);
}

#[test]
fn test_resolution_is_deterministic() {
    let engine = MapData::new(FORMULA);
    let first = engine.resolve_facts(minion1_facts(), &store()).unwrap();
    let second = engine.resolve_facts(minion1_facts(), &store()).unwrap();

    assert_eq!(first.values, second.values);
    assert_eq!(first.digest().unwrap(), second.digest().unwrap());

    let sources: Vec<_> = first.sources.iter().map(|s| s.digest.clone()).collect();
    let again: Vec<_> = second.sources.iter().map(|s| s.digest.clone()).collect();
    assert_eq!(sources, again);
}

#[test]
fn test_malformed_parameter_file_aborts() {
    let dir = TempDir::new().unwrap();
    fixtures::copy_formula(dir.path());
    fs::write(
        dir.path().join("healthchecks/parameters/roles/web.yaml"),
        "values:\n  install: [unclosed\n",
    )
    .unwrap();

    let err = MapData::new(FORMULA)
        .resolve_facts(minion1_facts(), &DirStore::new(dir.path()))
        .unwrap_err();

    match err {
        ConfigError::Source(SourceError::Parse { path, .. }) => {
            assert_eq!(path, "healthchecks/parameters/roles/web.yaml");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_new_fact_file_changes_result() {
    let dir = TempDir::new().unwrap();
    fixtures::copy_formula(dir.path());
    let store = DirStore::new(dir.path());

    let before = MapData::new(FORMULA).resolve_facts(minion1_facts(), &store).unwrap();

    fs::create_dir_all(dir.path().join("healthchecks/parameters/osarch")).unwrap();
    fs::write(
        dir.path().join("healthchecks/parameters/osarch/amd64.yaml"),
        "values:\n  install:\n    image: healthchecks/healthchecks-amd64\n",
    )
    .unwrap();

    let after = MapData::new(FORMULA).resolve_facts(minion1_facts(), &store).unwrap();

    assert_eq!(before.get_str("install.image"), Some("healthchecks/healthchecks"));
    assert_eq!(after.get_str("install.image"), Some("healthchecks/healthchecks-amd64"));
    assert_ne!(before.digest().unwrap(), after.digest().unwrap());
    assert_eq!(after.sources[1].name, "healthchecks/parameters/osarch/amd64.yaml");
}
