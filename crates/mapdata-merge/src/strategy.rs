//! Merge strategies and the per-key-path strategy table.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a source value is combined with the value accumulated so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Source value replaces the accumulated value wholesale.
    Overwrite,
    /// Mappings merge key by key; anything else is overwritten.
    #[serde(alias = "recurse")]
    RecurseMerge,
    /// Source sequence is appended to the accumulated sequence.
    ListExtend,
    /// Source sequence is prepended to the accumulated sequence.
    ListPrepend,
    /// Source sequence replaces the accumulated one only when non-empty.
    ListOverwriteIfNonEmpty,
    /// A `null` source value deletes the key.
    Remove,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overwrite => "overwrite",
            Self::RecurseMerge => "recurse_merge",
            Self::ListExtend => "list_extend",
            Self::ListPrepend => "list_prepend",
            Self::ListOverwriteIfNonEmpty => "list_overwrite_if_non_empty",
            Self::Remove => "remove",
        }
    }

    /// Strategies that only make sense between two sequences.
    pub fn is_list_strategy(&self) -> bool {
        matches!(
            self,
            Self::ListExtend | Self::ListPrepend | Self::ListOverwriteIfNonEmpty
        )
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown strategy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown merge strategy '{0}'")]
pub struct UnknownStrategy(pub String);

impl FromStr for MergeStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overwrite" => Ok(Self::Overwrite),
            "recurse_merge" | "recurse" => Ok(Self::RecurseMerge),
            "list_extend" => Ok(Self::ListExtend),
            "list_prepend" => Ok(Self::ListPrepend),
            "list_overwrite_if_non_empty" => Ok(Self::ListOverwriteIfNonEmpty),
            "remove" => Ok(Self::Remove),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

/// A path of mapping keys, written `a.b.c` (or `a:b:c`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    /// The empty path, addressing the document root.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse a dotted path. `:` is accepted as a separator as well; empty
    /// segments are dropped.
    pub fn parse(path: &str) -> Self {
        Self(
            path.split(['.', ':'])
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(key.to_string());
        Self(segments)
    }

    /// True if `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &KeyPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// This path followed by each of its ancestors, down to the root.
    fn self_and_ancestors(&self) -> impl Iterator<Item = KeyPath> + '_ {
        (0..=self.0.len()).rev().map(|n| KeyPath(self.0[..n].to_vec()))
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl FromStr for KeyPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl Serialize for KeyPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One strategy declaration and who made it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Declaration {
    pub strategy: MergeStrategy,
    pub origin: String,
}

/// Two declarations that both apply to `path`.
///
/// `winner` is the one the merge uses: the later one for the same path,
/// the innermost one when an ancestor and a descendant disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyConflict {
    pub path: KeyPath,
    pub shadowed_path: KeyPath,
    pub shadowed: Declaration,
    pub winner_path: KeyPath,
    pub winner: Declaration,
}

impl fmt::Display for StrategyConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}': {} from {} at '{}' overrides {} from {} at '{}'",
            self.path,
            self.winner.strategy,
            self.winner.origin,
            self.winner_path,
            self.shadowed.strategy,
            self.shadowed.origin,
            self.shadowed_path,
        )
    }
}

/// Per-key-path strategy overrides.
///
/// Lookup is longest-prefix: a declaration at `a` governs `a.b` unless a
/// longer path covering `a.b` is declared as well.
#[derive(Debug, Clone, Default)]
pub struct StrategyTable {
    declarations: BTreeMap<KeyPath, Declaration>,
    merge_lists: Option<bool>,
    conflicts: Vec<StrategyConflict>,
}

impl StrategyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`StrategyTable::declare`].
    pub fn with(
        mut self,
        path: impl Into<KeyPath>,
        strategy: MergeStrategy,
        origin: impl Into<String>,
    ) -> Self {
        self.declare(path, strategy, origin);
        self
    }

    /// Record a strategy for `path`.
    pub fn declare(
        &mut self,
        path: impl Into<KeyPath>,
        strategy: MergeStrategy,
        origin: impl Into<String>,
    ) {
        let path = path.into();
        let declaration = Declaration {
            strategy,
            origin: origin.into(),
        };

        if let Some(previous) = self.declarations.get(&path).cloned() {
            if previous.strategy != strategy {
                self.record_conflict(StrategyConflict {
                    path: path.clone(),
                    shadowed_path: path.clone(),
                    shadowed: previous,
                    winner_path: path.clone(),
                    winner: declaration.clone(),
                });
            }
        } else {
            if let Some((ancestor_path, ancestor)) = self.nearest_ancestor(&path) {
                if ancestor.strategy != strategy {
                    let conflict = StrategyConflict {
                        path: path.clone(),
                        shadowed_path: ancestor_path,
                        shadowed: ancestor.clone(),
                        winner_path: path.clone(),
                        winner: declaration.clone(),
                    };
                    self.record_conflict(conflict);
                }
            }

            let shadowed_below: Vec<StrategyConflict> = self
                .declarations
                .iter()
                .filter(|(other, other_decl)| {
                    other.len() > path.len()
                        && other.starts_with(&path)
                        && other_decl.strategy != strategy
                        && !self.declared_between(&path, other)
                })
                .map(|(other, other_decl)| StrategyConflict {
                    path: other.clone(),
                    shadowed_path: path.clone(),
                    shadowed: declaration.clone(),
                    winner_path: other.clone(),
                    winner: other_decl.clone(),
                })
                .collect();
            for conflict in shadowed_below {
                self.record_conflict(conflict);
            }
        }

        self.declarations.insert(path, declaration);
    }

    /// Change the default for sequence-vs-sequence merges from
    /// `Overwrite` to `ListExtend`.
    pub fn set_merge_lists(&mut self, merge_lists: bool) {
        self.merge_lists = Some(merge_lists);
    }

    pub fn merge_lists(&self) -> bool {
        self.merge_lists.unwrap_or(false)
    }

    /// Strategy used between two sequences when no declaration applies.
    pub fn default_sequence_strategy(&self) -> MergeStrategy {
        if self.merge_lists() {
            MergeStrategy::ListExtend
        } else {
            MergeStrategy::Overwrite
        }
    }

    /// Strategy governing `path`, if any declaration covers it.
    pub fn resolve(&self, path: &KeyPath) -> Option<MergeStrategy> {
        path.self_and_ancestors()
            .find_map(|prefix| self.declarations.get(&prefix))
            .map(|declaration| declaration.strategy)
    }

    /// True if some declaration sits strictly below `path`.
    pub fn has_declarations_below(&self, path: &KeyPath) -> bool {
        self.declarations
            .keys()
            .any(|other| other.len() > path.len() && other.starts_with(path))
    }

    /// Apply every declaration of `other` after the ones already present,
    /// so that `other` wins on the same path.
    pub fn absorb(&mut self, other: &StrategyTable) {
        for (path, declaration) in &other.declarations {
            self.declare(path.clone(), declaration.strategy, declaration.origin.clone());
        }
        self.conflicts.extend(other.conflicts.iter().cloned());
        if let Some(merge_lists) = other.merge_lists {
            self.merge_lists = Some(merge_lists);
        }
    }

    pub fn declarations(&self) -> impl Iterator<Item = (&KeyPath, &Declaration)> {
        self.declarations.iter()
    }

    pub fn conflicts(&self) -> &[StrategyConflict] {
        &self.conflicts
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty() && self.merge_lists.is_none()
    }

    fn nearest_ancestor(&self, path: &KeyPath) -> Option<(KeyPath, &Declaration)> {
        path.self_and_ancestors()
            .skip(1)
            .find_map(|prefix| self.declarations.get(&prefix).map(|d| (prefix, d)))
    }

    /// True if a declaration exists strictly between `upper` and `lower`.
    fn declared_between(&self, upper: &KeyPath, lower: &KeyPath) -> bool {
        self.declarations.keys().any(|p| {
            p.len() > upper.len() && p.len() < lower.len() && lower.starts_with(p)
        })
    }

    fn record_conflict(&mut self, conflict: StrategyConflict) {
        tracing::warn!(conflict = %conflict, "conflicting merge strategies");
        self.conflicts.push(conflict);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_path_parse() {
        assert_eq!(KeyPath::parse("config.users").segments(), ["config", "users"]);
        assert_eq!(KeyPath::parse("config:users").segments(), ["config", "users"]);
        assert!(KeyPath::parse("").is_root());
        assert_eq!(KeyPath::parse("a..b").to_string(), "a.b");
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("list_extend".parse::<MergeStrategy>(), Ok(MergeStrategy::ListExtend));
        assert_eq!("recurse".parse::<MergeStrategy>(), Ok(MergeStrategy::RecurseMerge));
        assert!("aggregate".parse::<MergeStrategy>().is_err());
    }

    #[test]
    fn test_strategy_serde_names() {
        let parsed: MergeStrategy = serde_json::from_str("\"list_overwrite_if_non_empty\"").unwrap();
        assert_eq!(parsed, MergeStrategy::ListOverwriteIfNonEmpty);
        assert_eq!(
            serde_json::to_string(&MergeStrategy::RecurseMerge).unwrap(),
            "\"recurse_merge\""
        );
    }

    #[test]
    fn test_resolve_longest_prefix() {
        let table = StrategyTable::new()
            .with("config", MergeStrategy::Overwrite, "caller")
            .with("config.users", MergeStrategy::ListExtend, "caller");

        assert_eq!(table.resolve(&KeyPath::parse("config")), Some(MergeStrategy::Overwrite));
        assert_eq!(
            table.resolve(&KeyPath::parse("config.port")),
            Some(MergeStrategy::Overwrite)
        );
        assert_eq!(
            table.resolve(&KeyPath::parse("config.users.groups")),
            Some(MergeStrategy::ListExtend)
        );
        assert_eq!(table.resolve(&KeyPath::parse("install")), None);
    }

    #[test]
    fn test_same_path_conflict_later_wins() {
        let table = StrategyTable::new()
            .with("checks", MergeStrategy::ListExtend, "defaults.yaml")
            .with("checks", MergeStrategy::Overwrite, "pillar");

        assert_eq!(table.resolve(&KeyPath::parse("checks")), Some(MergeStrategy::Overwrite));
        assert_eq!(table.conflicts().len(), 1);
        let conflict = &table.conflicts()[0];
        assert_eq!(conflict.winner.origin, "pillar");
        assert_eq!(conflict.shadowed.origin, "defaults.yaml");
    }

    #[test]
    fn test_identical_redeclaration_is_not_a_conflict() {
        let table = StrategyTable::new()
            .with("checks", MergeStrategy::ListExtend, "a")
            .with("checks", MergeStrategy::ListExtend, "b");
        assert!(table.conflicts().is_empty());
    }

    #[test]
    fn test_nested_conflict_innermost_wins_either_order() {
        let outer_first = StrategyTable::new()
            .with("config", MergeStrategy::Overwrite, "a")
            .with("config.users", MergeStrategy::ListExtend, "b");
        let inner_first = StrategyTable::new()
            .with("config.users", MergeStrategy::ListExtend, "b")
            .with("config", MergeStrategy::Overwrite, "a");

        for table in [outer_first, inner_first] {
            assert_eq!(table.conflicts().len(), 1);
            let conflict = &table.conflicts()[0];
            assert_eq!(conflict.path, KeyPath::parse("config.users"));
            assert_eq!(conflict.winner.strategy, MergeStrategy::ListExtend);
            assert_eq!(conflict.shadowed.strategy, MergeStrategy::Overwrite);
        }
    }

    #[test]
    fn test_conflict_only_against_nearest_ancestor() {
        let table = StrategyTable::new()
            .with("a", MergeStrategy::Overwrite, "x")
            .with("a.b", MergeStrategy::ListExtend, "x")
            .with("a.b.c", MergeStrategy::ListExtend, "x");

        // a.b.c agrees with a.b, which already shadows a
        assert_eq!(table.conflicts().len(), 1);
        assert_eq!(table.conflicts()[0].path, KeyPath::parse("a.b"));
    }

    #[test]
    fn test_merge_lists_default() {
        let mut table = StrategyTable::new();
        assert_eq!(table.default_sequence_strategy(), MergeStrategy::Overwrite);
        table.set_merge_lists(true);
        assert_eq!(table.default_sequence_strategy(), MergeStrategy::ListExtend);
    }

    #[test]
    fn test_absorb_prefers_other() {
        let mut base = StrategyTable::new().with("checks", MergeStrategy::ListExtend, "file");
        let caller = StrategyTable::new().with("checks", MergeStrategy::ListPrepend, "caller");
        base.absorb(&caller);

        assert_eq!(base.resolve(&KeyPath::parse("checks")), Some(MergeStrategy::ListPrepend));
        assert_eq!(base.conflicts().len(), 1);
    }

    #[test]
    fn test_has_declarations_below() {
        let table = StrategyTable::new().with("config.users", MergeStrategy::ListExtend, "x");
        assert!(table.has_declarations_below(&KeyPath::parse("config")));
        assert!(table.has_declarations_below(&KeyPath::root()));
        assert!(!table.has_declarations_below(&KeyPath::parse("config.users")));
    }
}
