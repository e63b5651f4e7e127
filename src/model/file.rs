//! Source files as read off disk by the (external) filesystem discovery and
//! parser layer. The planner only ever compares and clones these; it never
//! constructs one from raw bytes itself.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde_yaml_ng::Value;

use crate::model::section::SchemaSection;
use crate::model::unique_id::{ParseKind, UniqueId};

/// Opaque content hash. Per design note (c): the planner only ever compares
/// checksums for equality, never inspects their format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum(String);

impl Checksum {
    pub fn new(value: impl Into<String>) -> Checksum {
        Checksum(value.into())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identity of a `SourceFile`, typically `package://relative/path`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(String);

impl FileId {
    pub fn new(value: impl Into<String>) -> FileId {
        FileId(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> FileId {
        FileId::new(s)
    }
}

/// One element of a schema YAML section list: an ordered mapping that always
/// carries a `name` key. Kept as a `serde_yaml_ng::Value` so arbitrarily
/// shaped config blocks round-trip without the planner needing to know their
/// schema.
#[derive(Debug, Clone, PartialEq)]
pub struct YamlElement {
    pub name: String,
    pub body: Value,
}

impl YamlElement {
    pub fn new(name: impl Into<String>, body: Value) -> YamlElement {
        YamlElement { name: name.into(), body }
    }

    /// Structural equality used by `SchemaYamlDiffer`: order-sensitive for
    /// sequences, order-insensitive for mappings (the default `PartialEq` on
    /// `serde_yaml_ng::Mapping` is already order-insensitive, which is what we
    /// want here).
    pub fn structurally_eq(&self, other: &YamlElement) -> bool {
        self.name == other.name && self.body == other.body
    }

    /// Whether this element's body contains a given top-level key, e.g.
    /// `overrides` on a `sources` entry or `versions`/`group` on a model.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }
}

/// An ordered list of `YamlElement`s for one schema section, as read from
/// `dict_from_yaml` or accumulated into `pp_dict`.
pub type YamlSection = IndexMap<String, YamlElement>;

/// SQL-file payload: Model, Seed, Snapshot, Analysis, SingularTest, Macro,
/// GenericTest.
#[derive(Debug, Clone, Default)]
pub struct SqlFile {
    /// Unique ids of nodes (or, for macro files, macros) this file produces.
    pub nodes: IndexSet<UniqueId>,
    /// Non-empty only for Macro files: the macro unique_ids defined here.
    pub macros: IndexSet<UniqueId>,
    /// Env var names referenced anywhere in this file's templating blocks.
    pub env_vars: BTreeSet<String>,
}

/// Schema-file payload: the YAML sections plus the pending-parse delta and
/// the unique_ids this file currently owns, per section.
#[derive(Debug, Clone, Default)]
pub struct SchemaFile {
    /// Raw YAML bytes, combined with `checksum` per design note (a): the
    /// source always updates them together, so we don't track them as two
    /// independently-stale fields.
    pub raw_yaml: String,
    /// Per-section ordered element lists, as decoded by the external YAML
    /// layer.
    pub dict_from_yaml: BTreeMap<SchemaSection, YamlSection>,
    /// Pending-parse delta of the same shape: elements that should be
    /// re-associated with this file on the next parse.
    pub pp_dict: BTreeMap<SchemaSection, YamlSection>,
    /// unique_ids of mssat nodes patched by this file (across all mssa
    /// sections).
    pub node_patches: IndexSet<UniqueId>,
    /// unique_ids of sources/exposures/metrics/groups/semantic_models/
    /// saved_queries/unit_tests/snapshots created from this file, and of
    /// macro patches.
    pub sources: IndexSet<UniqueId>,
    pub exposures: IndexSet<UniqueId>,
    pub metrics: IndexSet<UniqueId>,
    pub groups: IndexSet<UniqueId>,
    pub semantic_models: IndexSet<UniqueId>,
    pub saved_queries: IndexSet<UniqueId>,
    pub unit_tests: IndexSet<UniqueId>,
    pub snapshots: IndexSet<UniqueId>,
    pub macro_patches: IndexSet<UniqueId>,
    /// Per-section, per-element-name env var names referenced.
    pub env_vars: BTreeMap<SchemaSection, BTreeMap<String, BTreeSet<String>>>,
    /// Per-section, per-element-name unrendered config blob, cleared by
    /// `merge_patch`.
    pub unrendered_configs: BTreeMap<SchemaSection, BTreeMap<String, Value>>,
    /// semantic_model_name -> metric unique_ids generated from its measures.
    pub metrics_from_measures: BTreeMap<String, IndexSet<UniqueId>>,
    /// Metrics generated by this schema file's semantic models, used by
    /// `fix_metrics_from_measures`.
    pub generated_metrics: IndexSet<UniqueId>,
}

impl SchemaFile {
    pub fn section(&self, section: SchemaSection) -> Option<&YamlSection> {
        self.dict_from_yaml.get(&section)
    }

    pub fn section_mut(&mut self, section: SchemaSection) -> &mut YamlSection {
        self.dict_from_yaml.entry(section).or_default()
    }

    pub fn pp_section_mut(&mut self, section: SchemaSection) -> &mut YamlSection {
        self.pp_dict.entry(section).or_default()
    }

    /// unique_ids owned by this file for a given section, used by the
    /// `delete_schema_*` family to locate an element's manifest entry.
    pub fn owned_ids(&self, section: SchemaSection) -> &IndexSet<UniqueId> {
        match section {
            SchemaSection::Sources => &self.sources,
            SchemaSection::Exposures => &self.exposures,
            SchemaSection::Metrics => &self.metrics,
            SchemaSection::Groups => &self.groups,
            SchemaSection::SemanticModels => &self.semantic_models,
            SchemaSection::SavedQueries => &self.saved_queries,
            SchemaSection::UnitTests => &self.unit_tests,
            SchemaSection::Snapshots => &self.snapshots,
            SchemaSection::Macros => &self.macro_patches,
            _ => unreachable!("owned_ids is not defined for mssa sections"),
        }
    }

    pub fn owned_ids_mut(&mut self, section: SchemaSection) -> &mut IndexSet<UniqueId> {
        match section {
            SchemaSection::Sources => &mut self.sources,
            SchemaSection::Exposures => &mut self.exposures,
            SchemaSection::Metrics => &mut self.metrics,
            SchemaSection::Groups => &mut self.groups,
            SchemaSection::SemanticModels => &mut self.semantic_models,
            SchemaSection::SavedQueries => &mut self.saved_queries,
            SchemaSection::UnitTests => &mut self.unit_tests,
            SchemaSection::Snapshots => &mut self.snapshots,
            SchemaSection::Macros => &mut self.macro_patches,
            _ => unreachable!("owned_ids_mut is not defined for mssa sections"),
        }
    }
}

/// Documentation-file payload.
#[derive(Debug, Clone, Default)]
pub struct DocFile {
    pub docs: IndexSet<UniqueId>,
}

/// Fixture-file payload: a single fixture plus the unit-tests consuming it.
#[derive(Debug, Clone, Default)]
pub struct FixtureFile {
    pub fixture: Option<UniqueId>,
    pub consuming_unit_tests: IndexSet<UniqueId>,
}

/// Parse-kind-specific payload of a `SourceFile`.
#[derive(Debug, Clone)]
pub enum SourceFilePayload {
    Sql(SqlFile),
    Schema(SchemaFile),
    Doc(DocFile),
    Fixture(FixtureFile),
}

impl SourceFilePayload {
    pub fn as_sql(&self) -> Option<&SqlFile> {
        match self {
            SourceFilePayload::Sql(sql) => Some(sql),
            _ => None,
        }
    }

    pub fn as_sql_mut(&mut self) -> Option<&mut SqlFile> {
        match self {
            SourceFilePayload::Sql(sql) => Some(sql),
            _ => None,
        }
    }

    pub fn as_schema(&self) -> Option<&SchemaFile> {
        match self {
            SourceFilePayload::Schema(schema) => Some(schema),
            _ => None,
        }
    }

    pub fn as_schema_mut(&mut self) -> Option<&mut SchemaFile> {
        match self {
            SourceFilePayload::Schema(schema) => Some(schema),
            _ => None,
        }
    }

    pub fn as_doc(&self) -> Option<&DocFile> {
        match self {
            SourceFilePayload::Doc(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_fixture(&self) -> Option<&FixtureFile> {
        match self {
            SourceFilePayload::Fixture(fixture) => Some(fixture),
            _ => None,
        }
    }
}

/// A single file as read by filesystem discovery: its identity, checksum,
/// parse kind, owning project, env-var fingerprint and parse-kind-specific
/// payload.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub file_id: FileId,
    pub checksum: Checksum,
    pub parse_kind: ParseKind,
    pub project_name: String,
    /// Env var names this file's contents reference; for schema files this is
    /// redundant with the per-section map in `SchemaFile::env_vars` but kept
    /// here too so `EnvVarDiffer` has a uniform, parse-kind-agnostic surface
    /// for the file-level (not per-element) classification.
    pub env_vars: BTreeSet<String>,
    pub payload: SourceFilePayload,
}

impl SourceFile {
    pub fn is_schema(&self) -> bool {
        self.parse_kind.is_schema()
    }
}
