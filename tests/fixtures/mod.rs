//! Test fixtures
//!
//! - `formulas/`: a file root holding the `healthchecks` formula
//!   (parameter files and TOFS template assets)
//! - `facts/`: fact snapshots for a Debian web node and a RedHat node

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use mapdata::{DirStore, FactSnapshot};

pub const FORMULA: &str = "healthchecks";

/// Root directory holding `healthchecks/`
pub fn formula_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/formulas")
}

pub fn facts_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/facts")
        .join(format!("{}.yaml", name))
}

/// Debian web node `minion1`
pub fn minion1_facts() -> FactSnapshot {
    FactSnapshot::from_file(&facts_path("minion1")).expect("Failed to load minion1 facts")
}

/// RedHat node `el9-node` without roles
pub fn el9_facts() -> FactSnapshot {
    FactSnapshot::from_file(&facts_path("el9")).expect("Failed to load el9 facts")
}

pub fn store() -> DirStore {
    DirStore::new(formula_root())
}

/// Copy the fixture formula into `dest`, so a test can modify it.
pub fn copy_formula(dest: &Path) {
    copy_dir(&formula_root(), dest);
}

fn copy_dir(from: &Path, to: &Path) {
    fs::create_dir_all(to).expect("Failed to create fixture copy");
    for entry in fs::read_dir(from).expect("Failed to read fixture dir") {
        let entry = entry.expect("Failed to read fixture entry");
        let target = to.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), &target).expect("Failed to copy fixture file");
        }
    }
}
