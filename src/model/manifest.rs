//! The in-memory manifest graph: primary object tables keyed by `unique_id`,
//! plus the reverse indices used to cascade invalidation.

pub use crate::model::file::Checksum;
use crate::model::file::{FileId, SourceFile};
use crate::model::unique_id::{NodeKind, UniqueId};

use std::collections::{BTreeMap, BTreeSet};

/// One manifest object: a node, source, exposure, metric, group, semantic
/// model, saved query, unit test, macro, doc, or fixture. A single shape
/// suffices because the planner only ever needs identity, owning file,
/// optional schema patch location, and the two edge kinds it cascades over.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub unique_id: UniqueId,
    pub kind: NodeKind,
    /// The file that produced this entry (its own SQL file for mssat/macro
    /// nodes, or the schema file for sources/exposures/metrics/... that have
    /// no SQL file of their own).
    pub file_id: FileId,
    /// Schema file patching this entry, if any. When set it must name a file
    /// whose `node_patches` (or section-owned-id set) contains `unique_id`.
    pub patch_path: Option<FileId>,
    pub group: Option<String>,
    pub is_versioned: bool,
    /// `versions` key present on the patching schema element, tracked
    /// separately from `is_versioned` per the two-condition check in
    /// `delete_schema_mssa_links` (design note (b)).
    pub has_versions_key: bool,
    /// The schema section `patch_path` patches this entry through, for kinds
    /// that don't determine it from `kind` alone -- only `GenericTest` is
    /// ambiguous (a column test patched through its parent's mssa section, or
    /// a source test patched through `Sources`); every other non-mssat kind
    /// has exactly one possible section and this is set identically to it.
    pub schema_section: Option<crate::model::SchemaSection>,
    /// For a `GenericTest`, the `name` of the *parent* element (model/seed/
    /// snapshot/analysis/source) whose re-association evicts this test --
    /// column tests have no YAML element of their own, they live nested
    /// inside their parent's. `None` for every other kind, where `local_name`
    /// already names the element directly.
    pub patched_element_name: Option<String>,
    /// Forward ref/source edges: unique_ids this entry depends on. Transposed
    /// into `child_map`.
    pub depends_on: BTreeSet<UniqueId>,
    /// Forward macro-call edges: macro unique_ids this entry calls.
    /// Transposed into `macro_child_map`.
    pub calls_macros: BTreeSet<UniqueId>,
}

impl ManifestEntry {
    pub fn new(unique_id: UniqueId, kind: NodeKind, file_id: FileId) -> ManifestEntry {
        ManifestEntry {
            unique_id,
            kind,
            file_id,
            patch_path: None,
            group: None,
            is_versioned: false,
            has_versions_key: false,
            schema_section: None,
            patched_element_name: None,
            depends_on: BTreeSet::new(),
            calls_macros: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Default)]
struct ReverseIndices {
    child_map: BTreeMap<UniqueId, BTreeSet<UniqueId>>,
    macro_child_map: Option<BTreeMap<UniqueId, BTreeSet<UniqueId>>>,
    group_map: BTreeMap<String, BTreeSet<UniqueId>>,
    disabled_by_file_id: BTreeMap<FileId, BTreeSet<UniqueId>>,
}

/// The saved manifest: every primary table, the `disabled` shadow table, and
/// the (lazily rebuilt) reverse indices.
#[derive(Debug, Default)]
pub struct Manifest {
    pub files: BTreeMap<FileId, SourceFile>,

    pub nodes: BTreeMap<UniqueId, ManifestEntry>,
    pub sources: BTreeMap<UniqueId, ManifestEntry>,
    pub exposures: BTreeMap<UniqueId, ManifestEntry>,
    pub metrics: BTreeMap<UniqueId, ManifestEntry>,
    pub groups: BTreeMap<UniqueId, ManifestEntry>,
    pub semantic_models: BTreeMap<UniqueId, ManifestEntry>,
    pub saved_queries: BTreeMap<UniqueId, ManifestEntry>,
    pub unit_tests: BTreeMap<UniqueId, ManifestEntry>,
    pub macros: BTreeMap<UniqueId, ManifestEntry>,
    pub docs: BTreeMap<UniqueId, ManifestEntry>,
    pub fixtures: BTreeMap<UniqueId, ManifestEntry>,

    /// unique_id -> ordered list of shadow (disabled) entries. An object can
    /// be disabled in multiple places, hence a `Vec` rather than a single
    /// entry.
    pub disabled: BTreeMap<UniqueId, Vec<ManifestEntry>>,

    /// env_var_name -> last observed value.
    pub env_vars: BTreeMap<String, String>,

    indices: ReverseIndices,
}

/// The primary table a `NodeKind` lives in. mssat kinds and generic tests all
/// share the `nodes` table: generic tests are nodes with a `test.` unique_id
/// prefix backed by a schema patch rather than their own file.
fn table_for(kind: NodeKind) -> Table {
    match kind {
        NodeKind::Model
        | NodeKind::Seed
        | NodeKind::Snapshot
        | NodeKind::Analysis
        | NodeKind::SingularTest
        | NodeKind::GenericTest => Table::Nodes,
        NodeKind::Macro => Table::Macros,
        NodeKind::Source => Table::Sources,
        NodeKind::Exposure => Table::Exposures,
        NodeKind::Metric => Table::Metrics,
        NodeKind::Group => Table::Groups,
        NodeKind::SemanticModel => Table::SemanticModels,
        NodeKind::SavedQuery => Table::SavedQueries,
        NodeKind::UnitTest => Table::UnitTests,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Table {
    Nodes,
    Macros,
    Sources,
    Exposures,
    Metrics,
    Groups,
    SemanticModels,
    SavedQueries,
    UnitTests,
}

impl Manifest {
    pub fn new() -> Manifest {
        Manifest::default()
    }

    fn table(&self, table: Table) -> &BTreeMap<UniqueId, ManifestEntry> {
        match table {
            Table::Nodes => &self.nodes,
            Table::Macros => &self.macros,
            Table::Sources => &self.sources,
            Table::Exposures => &self.exposures,
            Table::Metrics => &self.metrics,
            Table::Groups => &self.groups,
            Table::SemanticModels => &self.semantic_models,
            Table::SavedQueries => &self.saved_queries,
            Table::UnitTests => &self.unit_tests,
        }
    }

    fn table_mut(&mut self, table: Table) -> &mut BTreeMap<UniqueId, ManifestEntry> {
        match table {
            Table::Nodes => &mut self.nodes,
            Table::Macros => &mut self.macros,
            Table::Sources => &mut self.sources,
            Table::Exposures => &mut self.exposures,
            Table::Metrics => &mut self.metrics,
            Table::Groups => &mut self.groups,
            Table::SemanticModels => &mut self.semantic_models,
            Table::SavedQueries => &mut self.saved_queries,
            Table::UnitTests => &mut self.unit_tests,
        }
    }

    /// Look up an entry by kind regardless of whether it is active or
    /// disabled (the active copy, if both somehow existed, wins -- though
    /// that case shouldn't arise).
    pub fn get(&self, kind: NodeKind, id: &UniqueId) -> Option<&ManifestEntry> {
        self.table(table_for(kind)).get(id).or_else(|| self.disabled.get(id)?.last())
    }

    pub fn insert(&mut self, entry: ManifestEntry) {
        let table = table_for(entry.kind);
        self.table_mut(table).insert(entry.unique_id.clone(), entry);
    }

    /// Pop `id` out of its active table. Returns `None` without error if the
    /// id is already gone -- another cascade may have removed it first.
    pub fn pop_active(&mut self, kind: NodeKind, id: &UniqueId) -> Option<ManifestEntry> {
        self.table_mut(table_for(kind)).remove(id)
    }

    /// Pop the most recently pushed shadow of `id` from `disabled`, dropping
    /// the key entirely once the list empties.
    pub fn pop_disabled(&mut self, id: &UniqueId) -> Option<ManifestEntry> {
        let list = self.disabled.get_mut(id)?;
        let popped = list.pop();
        if list.is_empty() {
            self.disabled.remove(id);
        }
        popped
    }

    pub fn push_disabled(&mut self, entry: ManifestEntry) {
        self.disabled.entry(entry.unique_id.clone()).or_default().push(entry);
    }

    pub fn disabled_shadows(&self, id: &UniqueId) -> &[ManifestEntry] {
        self.disabled.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn disabled_shadows_mut(&mut self, id: &UniqueId) -> impl Iterator<Item = &mut ManifestEntry> {
        self.disabled.get_mut(id).into_iter().flat_map(|v| v.iter_mut())
    }

    /// Remove `id` from whichever table (active or disabled) currently holds
    /// it, for the given kind. No-op if already absent from both.
    pub fn remove_node_anywhere(&mut self, kind: NodeKind, id: &UniqueId) -> bool {
        if self.pop_active(kind, id).is_some() {
            return true;
        }
        self.pop_disabled(id).is_some()
    }

    // ---- reverse indices -------------------------------------------------

    /// Build (or rebuild) `child_map` from the current forward `depends_on`
    /// edges across every table. Rebuilt after the planner runs, not
    /// maintained incrementally during planning, so callers should only call
    /// this once they're done mutating the manifest for the run.
    pub fn rebuild_child_map(&mut self) {
        let mut child_map: BTreeMap<UniqueId, BTreeSet<UniqueId>> = BTreeMap::new();
        for table in self.all_entries() {
            for entry in table {
                for dep in &entry.depends_on {
                    child_map.entry(dep.clone()).or_default().insert(entry.unique_id.clone());
                }
            }
        }
        self.indices.child_map = child_map;
    }

    fn all_entries(&self) -> Vec<std::collections::btree_map::Values<'_, UniqueId, ManifestEntry>> {
        vec![
            self.nodes.values(),
            self.sources.values(),
            self.exposures.values(),
            self.metrics.values(),
            self.groups.values(),
            self.semantic_models.values(),
            self.saved_queries.values(),
            self.unit_tests.values(),
            self.macros.values(),
        ]
    }

    pub fn child_map(&self) -> &BTreeMap<UniqueId, BTreeSet<UniqueId>> {
        &self.indices.child_map
    }

    pub fn children_of(&self, id: &UniqueId) -> BTreeSet<UniqueId> {
        self.indices.child_map.get(id).cloned().unwrap_or_default()
    }

    /// Lazily builds `macro_child_map` on first access: it is only needed
    /// once a macro file was changed or deleted, so we don't pay for it
    /// otherwise.
    pub fn ensure_macro_child_map(&mut self) {
        if self.indices.macro_child_map.is_some() {
            return;
        }
        let mut macro_child_map: BTreeMap<UniqueId, BTreeSet<UniqueId>> = BTreeMap::new();
        for table in self.all_entries() {
            for entry in table {
                for called in &entry.calls_macros {
                    macro_child_map
                        .entry(called.clone())
                        .or_default()
                        .insert(entry.unique_id.clone());
                }
            }
        }
        self.indices.macro_child_map = Some(macro_child_map);
    }

    pub fn macro_children_of(&self, id: &UniqueId) -> BTreeSet<UniqueId> {
        self.indices
            .macro_child_map
            .as_ref()
            .and_then(|m| m.get(id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_macro_child_map(&self) -> bool {
        self.indices.macro_child_map.is_some()
    }

    pub fn rebuild_group_map(&mut self) {
        let mut group_map: BTreeMap<String, BTreeSet<UniqueId>> = BTreeMap::new();
        for entry in self.nodes.values().chain(self.macros.values()) {
            if let Some(group) = &entry.group {
                group_map.entry(group.clone()).or_default().insert(entry.unique_id.clone());
            }
        }
        self.indices.group_map = group_map;
    }

    pub fn group_members(&self, group: &str) -> BTreeSet<UniqueId> {
        self.indices.group_map.get(group).cloned().unwrap_or_default()
    }

    pub fn rebuild_disabled_by_file_id(&mut self) {
        let mut by_file: BTreeMap<FileId, BTreeSet<UniqueId>> = BTreeMap::new();
        for (id, shadows) in &self.disabled {
            for shadow in shadows {
                by_file.entry(shadow.file_id.clone()).or_default().insert(id.clone());
            }
        }
        self.indices.disabled_by_file_id = by_file;
    }

    pub fn is_disabled_by_file(&self, file_id: &FileId) -> bool {
        self.indices.disabled_by_file_id.get(file_id).map_or(false, |s| !s.is_empty())
    }

    pub fn disabled_ids_for_file(&self, file_id: &FileId) -> BTreeSet<UniqueId> {
        self.indices.disabled_by_file_id.get(file_id).cloned().unwrap_or_default()
    }

    /// Reverse indices are scoped to a single planner run: drop them once the
    /// run completes so the next run rebuilds from the post-mutation state.
    pub fn drop_reverse_indices(&mut self) {
        self.indices = ReverseIndices::default();
    }

    /// Recomputes every reverse index from current primary-table state. Used
    /// by tests and by callers that want a consistent snapshot without caring
    /// about the lazy-build distinction.
    pub fn rebuild_all_indices(&mut self) {
        self.rebuild_child_map();
        self.rebuild_group_map();
        self.rebuild_disabled_by_file_id();
        self.indices.macro_child_map = None;
        self.ensure_macro_child_map();
    }
}
