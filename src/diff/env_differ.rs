//! Classifies saved env vars against the current process environment, and
//! walks the saved manifest's files to find which ones are env-affected.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::Config;
use crate::model::{FileId, Manifest, SchemaSection};

/// Real-vs-fake accessor split, so tests can diff against an in-memory
/// snapshot instead of the real process environment.
pub trait EnvAccessor {
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads the real process environment.
pub struct ProcessEnvAccessor;

impl EnvAccessor for ProcessEnvAccessor {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// An in-memory accessor for tests.
#[derive(Debug, Clone, Default)]
pub struct MapEnvAccessor(pub BTreeMap<String, String>);

impl EnvAccessor for MapEnvAccessor {
    fn get(&self, name: &str) -> Option<String> {
        self.0.get(name).cloned()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvChanges {
    pub changed: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl EnvChanges {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }

    pub fn touches(&self, vars: &BTreeSet<String>) -> bool {
        vars.iter().any(|v| self.changed.contains(v) || self.deleted.contains(v))
    }
}

#[derive(Debug, Default)]
pub struct EnvVarDiffer;

impl EnvVarDiffer {
    pub fn new() -> EnvVarDiffer {
        EnvVarDiffer
    }

    /// Compares `manifest.env_vars` (the last-observed snapshot) against the
    /// live accessor: unset + sentinel ⇒ unchanged, unset + no sentinel ⇒
    /// deleted, differing value ⇒ changed.
    pub fn diff(
        &self,
        config: &Config,
        saved: &BTreeMap<String, String>,
        accessor: &dyn EnvAccessor,
    ) -> EnvChanges {
        let mut changes = EnvChanges::default();
        for (name, prev_value) in saved {
            match accessor.get(name) {
                None => {
                    if prev_value != &config.env_placeholder {
                        changes.deleted.insert(name.clone());
                    }
                }
                Some(current) => {
                    if &current != prev_value {
                        changes.changed.insert(name.clone());
                    }
                }
            }
        }
        changes
    }

    /// Removes deleted env vars from the manifest's env-var table.
    pub fn apply_deletions(&self, manifest: &mut Manifest, changes: &EnvChanges) {
        for name in &changes.deleted {
            manifest.env_vars.remove(name);
        }
    }

    /// Non-schema (SQL/doc) files whose `env_vars` intersects the changed or
    /// deleted set. Fixtures are skipped.
    pub fn env_affected_source_files(
        &self,
        manifest: &Manifest,
        changes: &EnvChanges,
    ) -> BTreeSet<FileId> {
        let touched: BTreeSet<String> =
            changes.changed.iter().chain(changes.deleted.iter()).cloned().collect();
        manifest
            .files
            .values()
            .filter(|f| !matches!(f.parse_kind, crate::model::ParseKind::Fixture))
            .filter(|f| !f.is_schema())
            .filter(|f| f.env_vars.iter().any(|v| touched.contains(v)))
            .map(|f| f.file_id.clone())
            .collect()
    }

    /// Schema files: for each `(section, element_name, var_list)` where any
    /// var is in the changed set, record `element_name` against
    /// `(file_id, section)`.
    pub fn env_affected_schema_elements(
        &self,
        manifest: &Manifest,
        changes: &EnvChanges,
    ) -> BTreeMap<FileId, BTreeMap<SchemaSection, BTreeSet<String>>> {
        let touched: BTreeSet<String> =
            changes.changed.iter().chain(changes.deleted.iter()).cloned().collect();
        let mut result: BTreeMap<FileId, BTreeMap<SchemaSection, BTreeSet<String>>> =
            BTreeMap::new();
        for file in manifest.files.values() {
            let Some(schema) = file.payload.as_schema() else { continue };
            for (section, by_name) in &schema.env_vars {
                for (name, vars) in by_name {
                    if vars.iter().any(|v| touched.contains(v)) {
                        result
                            .entry(file.file_id.clone())
                            .or_default()
                            .entry(*section)
                            .or_default()
                            .insert(name.clone());
                    }
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn saved() -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert("DBT_ENV".to_owned(), "prod".to_owned());
        m.insert("DBT_DEFAULTED".to_owned(), Config::default().env_placeholder);
        m
    }

    #[test]
    fn changed_value_is_classified_changed() {
        let config = Config::default();
        let differ = EnvVarDiffer::new();
        let mut accessor = MapEnvAccessor::default();
        accessor.0.insert("DBT_ENV".to_owned(), "staging".to_owned());
        accessor.0.insert("DBT_DEFAULTED".to_owned(), Config::default().env_placeholder);

        let changes = differ.diff(&config, &saved(), &accessor);
        assert!(changes.changed.contains("DBT_ENV"));
        assert!(changes.deleted.is_empty());
    }

    #[test]
    fn unset_with_sentinel_is_unchanged() {
        let config = Config::default();
        let differ = EnvVarDiffer::new();
        let mut accessor = MapEnvAccessor::default();
        accessor.0.insert("DBT_ENV".to_owned(), "prod".to_owned());
        // DBT_DEFAULTED is absent from the accessor entirely.

        let changes = differ.diff(&config, &saved(), &accessor);
        assert!(changes.changed.is_empty());
        assert!(changes.deleted.is_empty());
    }

    #[test]
    fn unset_without_sentinel_is_deleted() {
        let config = Config::default();
        let differ = EnvVarDiffer::new();
        let accessor = MapEnvAccessor::default();

        let changes = differ.diff(&config, &saved(), &accessor);
        assert!(changes.deleted.contains("DBT_ENV"));
    }
}
