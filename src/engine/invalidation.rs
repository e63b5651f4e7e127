//! Applies a `FileDiff` to a saved `Manifest`, cascading eviction through
//! `depends_on`/`calls_macros` reverse edges, and accumulates a `ParsePlan`.
//! Starts from a changed file's unique_ids and fans out along
//! `child_map`/`macro_child_map` until the stack empties, one `schedule_*`
//! call at a time.

use std::collections::{BTreeMap, BTreeSet};
use std::iter;

use serde_yaml_ng::Value;

use crate::config::Config;
use crate::diff::FileDiff;
use crate::engine::event::{EventSink, FileOperation, PartialParsingEnabled, PartialParsingFile};
use crate::engine::parse_plan::{ParsePlan, ParserTable, ProjectParserFiles};
use crate::error::{Inconsistency, Result};
use crate::model::{FileId, Manifest, NodeKind, ParseKind, SchemaSection, SourceFile, UniqueId};

/// Per-file, per-section env-var-affected element names, as produced by
/// `EnvVarDiffer::env_affected_schema_elements`.
pub type EnvAffectedSchema = BTreeMap<FileId, BTreeMap<SchemaSection, BTreeSet<String>>>;

/// Drives one partial-parse run: takes ownership of the new files it must
/// compare against, mutates the saved manifest in place, and emits a
/// `ProjectParserFiles` plan plus the `deleted_special_override_macro` flag
/// the driver uses to decide whether to discard the whole plan for a full
/// parse.
pub struct InvalidationEngine<'a> {
    config: &'a Config,
    event_sink: &'a dyn EventSink,
    manifest: &'a mut Manifest,
    new_files: BTreeMap<FileId, SourceFile>,
    env_affected_schema: EnvAffectedSchema,
    parse_plan: ParsePlan<'a>,
    pub deleted_special_override_macro: bool,
}

impl<'a> InvalidationEngine<'a> {
    pub fn new(
        config: &'a Config,
        event_sink: &'a dyn EventSink,
        manifest: &'a mut Manifest,
        new_files: BTreeMap<FileId, SourceFile>,
        env_affected_schema: EnvAffectedSchema,
        parser_table: &'a dyn ParserTable,
        diff: &FileDiff,
    ) -> InvalidationEngine<'a> {
        let excluded: BTreeSet<FileId> =
            diff.deleted.iter().chain(diff.deleted_schema_files.iter()).cloned().collect();
        InvalidationEngine {
            config,
            event_sink,
            manifest,
            new_files,
            env_affected_schema,
            parse_plan: ParsePlan::new(parser_table, excluded),
            deleted_special_override_macro: false,
        }
    }

    /// The fixed six-stage pipeline: skip check, added, changed schema files,
    /// deleted schema files, deleted, changed. This order is load-bearing --
    /// see the module doc on `engine::mod` for why it isn't a latent
    /// implementation detail. Returns the plan alongside
    /// `deleted_special_override_macro`, since this consumes `self` and the
    /// caller has no other way to read the flag back out afterwards.
    pub fn get_parsing_files(mut self, diff: &FileDiff) -> Result<(ProjectParserFiles, bool)> {
        if diff.skip_parsing() {
            return Ok((BTreeMap::new(), false));
        }

        self.event_sink.partial_parsing_enabled(PartialParsingEnabled {
            deleted: diff.deleted.len() + diff.deleted_schema_files.len(),
            added: diff.added.len(),
            changed: diff.changed.len() + diff.changed_schema_files.len(),
        });

        if diff.changed_or_deleted_macro_file {
            self.manifest.ensure_macro_child_map();
        }

        for file_id in diff.added.iter().cloned().collect::<Vec<_>>() {
            self.add_to_saved(&file_id)?;
        }
        for file_id in diff.changed_schema_files.iter().cloned().collect::<Vec<_>>() {
            self.change_schema_file(&file_id)?;
        }
        for file_id in diff.deleted_schema_files.iter().cloned().collect::<Vec<_>>() {
            self.delete_schema_file(&file_id)?;
        }
        for file_id in diff.deleted.iter().cloned().collect::<Vec<_>>() {
            self.delete_from_saved(&file_id)?;
        }
        for file_id in diff.changed.iter().cloned().collect::<Vec<_>>() {
            self.update_in_saved(&file_id)?;
        }

        Ok((self.parse_plan.into_project_parser_files(), self.deleted_special_override_macro))
    }

    fn enqueue(&mut self, file_id: &FileId) {
        if let Some(file) = self.manifest.files.get(file_id) {
            self.parse_plan.add_to_pp_files(file);
        }
    }

    // ---- added -------------------------------------------------------

    fn add_to_saved(&mut self, file_id: &FileId) -> Result<()> {
        let Some(new_file) = self.new_files.get(file_id).cloned() else { return Ok(()) };

        let mut override_targets: Vec<(String, String)> = Vec::new();
        if let Some(schema) = new_file.payload.as_schema() {
            if let Some(sources) = schema.section(SchemaSection::Sources) {
                for elem in sources.values() {
                    if let Some(Value::String(pkg)) = elem.get("overrides") {
                        override_targets.push((pkg.clone(), elem.name.clone()));
                    }
                }
            }
        }

        self.manifest.files.insert(file_id.clone(), new_file);
        self.enqueue(file_id);
        self.event_sink.partial_parsing_file(PartialParsingFile {
            operation: FileOperation::Added,
            file_id: file_id.clone(),
        });

        for (pkg, name) in override_targets {
            self.remove_source_override_target(&pkg, &name)?;
        }
        Ok(())
    }

    // ---- deleted (non-schema) -----------------------------------------

    fn delete_from_saved(&mut self, file_id: &FileId) -> Result<()> {
        let Some(file) = self.manifest.files.get(file_id).cloned() else { return Ok(()) };

        match file.parse_kind {
            k if k.is_mssat() => self.remove_mssat_file(file_id)?,
            k if k.is_mg() => self.delete_macro_file(file_id, true)?,
            ParseKind::Documentation => self.delete_doc_node(file_id)?,
            ParseKind::Fixture => self.delete_fixture_node(file_id)?,
            ParseKind::Schema => {
                return Err(Inconsistency::UnexpectedParseKind {
                    file_id: file_id.clone(),
                    context: "delete_from_saved",
                })
            }
        }

        self.manifest.files.remove(file_id);
        self.event_sink.partial_parsing_file(PartialParsingFile {
            operation: FileOperation::Deleted,
            file_id: file_id.clone(),
        });
        Ok(())
    }

    /// Evicts every node a mssat file owns, preserving and re-attaching any
    /// schema patch on each through `remove_node_in_saved`, and reschedules
    /// every referrer resolved through `child_map` before any of them are
    /// popped -- a node's own file being deleted or edited makes whatever
    /// depends on it stale too, regardless of whether that dependent's own
    /// content changed this run. Used both when the file itself is
    /// deleted/updated and when it's evicted purely as a cascade referrer
    /// (`schedule_mssat_or_macro_referrer`), so this is also where
    /// transitive fan-out recurses.
    fn remove_mssat_file(&mut self, file_id: &FileId) -> Result<()> {
        let node_ids: Vec<(NodeKind, UniqueId)> = self
            .manifest
            .files
            .get(file_id)
            .and_then(|f| f.payload.as_sql())
            .map(|sql| sql.nodes.iter().filter_map(|id| id.node_kind().map(|k| (k, id.clone()))).collect())
            .unwrap_or_default();

        let mut referrers = BTreeSet::new();
        for (_, uid) in &node_ids {
            referrers.extend(self.manifest.children_of(uid));
        }

        for (kind, uid) in node_ids {
            self.remove_node_in_saved(file_id, kind, &uid)?;
        }

        self.schedule_referencing_nodes_for_parsing(referrers)
    }

    /// Removes one mssat node from the manifest, preserving its schema patch
    /// (if any) rather than discarding it: if `patch_path` still names a
    /// schema file that still owns an element for this node, the pop and
    /// group/version comparison is delegated to `delete_schema_mssa_links`,
    /// and the element is re-merged into `pp_dict` so it reattaches on the
    /// next parse. Only when there's no patch to delegate to does this pop
    /// the node directly.
    fn remove_node_in_saved(&mut self, file_id: &FileId, kind: NodeKind, uid: &UniqueId) -> Result<()> {
        let patch_path = self.manifest.get(kind, uid).and_then(|e| e.patch_path.clone());

        let mut delegated = false;
        if let Some(patch_path) = &patch_path {
            if let Some(section) = kind.mssat_schema_section() {
                let elem = self
                    .manifest
                    .files
                    .get(patch_path)
                    .and_then(|f| f.payload.as_schema())
                    .and_then(|s| s.section(section))
                    .and_then(|sec| sec.get(uid.local_name()))
                    .cloned();
                if let Some(elem) = elem {
                    self.delete_schema_mssa_links(patch_path, section, &elem, None)?;
                    self.merge_patch(patch_path, section, &elem, false)?;
                    delegated = true;
                }
            }
        }

        if !delegated {
            self.manifest.pop_active(kind, uid);
            if self.manifest.is_disabled_by_file(file_id) {
                self.manifest.pop_disabled(uid);
            }
        }

        for shadow in self.manifest.disabled_shadows_mut(uid) {
            shadow.patch_path = None;
        }
        Ok(())
    }

    // ---- schema files ---------------------------------------------------

    fn change_schema_file(&mut self, file_id: &FileId) -> Result<()> {
        let Some(new_file) = self.new_files.get(file_id).cloned() else { return Ok(()) };
        let new_dict = new_file.payload.as_schema().map(|s| s.dict_from_yaml.clone()).unwrap_or_default();
        let env_for_file = self.env_affected_schema.get(file_id).cloned().unwrap_or_default();

        self.handle_schema_file_changes(file_id, &new_dict, &env_for_file)?;

        if let Some(saved) = self.manifest.files.get_mut(file_id) {
            saved.checksum = new_file.checksum.clone();
            if let (Some(saved_schema), Some(new_schema)) =
                (saved.payload.as_schema_mut(), new_file.payload.as_schema())
            {
                saved_schema.raw_yaml = new_schema.raw_yaml.clone();
                saved_schema.dict_from_yaml = new_schema.dict_from_yaml.clone();
            }
        }
        self.enqueue(file_id);
        self.event_sink.partial_parsing_file(PartialParsingFile {
            operation: FileOperation::Updated,
            file_id: file_id.clone(),
        });
        Ok(())
    }

    fn delete_schema_file(&mut self, file_id: &FileId) -> Result<()> {
        if !self.manifest.files.contains_key(file_id) {
            return Ok(());
        }
        let empty = BTreeMap::new();
        let env_for_file = self.env_affected_schema.get(file_id).cloned().unwrap_or_default();

        self.handle_schema_file_changes(file_id, &empty, &env_for_file)?;
        self.manifest.files.remove(file_id);
        self.event_sink.partial_parsing_file(PartialParsingFile {
            operation: FileOperation::Deleted,
            file_id: file_id.clone(),
        });
        Ok(())
    }

    /// Shared subroutine of `change_schema_file`/`delete_schema_file`: walks
    /// every section comparing the saved dict against `new_dict` (empty for
    /// deletion), evicting changed/deleted elements and re-merging
    /// changed/added ones into `pp_dict`, then separately evicts and
    /// re-merges any element named by `env_affected` that the name-diff
    /// didn't already touch.
    fn handle_schema_file_changes(
        &mut self,
        file_id: &FileId,
        new_dict: &BTreeMap<SchemaSection, crate::model::YamlSection>,
        env_affected: &BTreeMap<SchemaSection, BTreeSet<String>>,
    ) -> Result<()> {
        let saved_dict = self
            .manifest
            .files
            .get(file_id)
            .and_then(|f| f.payload.as_schema())
            .map(|s| s.dict_from_yaml.clone())
            .unwrap_or_default();

        let differ = crate::diff::SchemaYamlDiffer::new();

        for section in SchemaSection::MSSA.iter().copied() {
            let saved_section = saved_dict.get(&section).cloned().unwrap_or_default();
            let new_section = new_dict.get(&section).cloned().unwrap_or_default();
            let section_diff = differ.diff(saved_section.iter(), new_section.iter());

            for elem in &section_diff.deleted {
                self.delete_schema_mssa_links(file_id, section, elem, None)?;
            }
            for (old, new) in &section_diff.changed {
                self.delete_schema_mssa_links(file_id, section, old, Some(new))?;
            }
            for elem in section_diff.changed.iter().map(|(_, new)| new).chain(section_diff.added.iter()) {
                self.merge_patch(file_id, section, elem, true)?;
            }
            if let Some(names) = env_affected.get(&section) {
                for name in names {
                    if section_diff.changed_or_deleted_names.contains(name) {
                        continue;
                    }
                    if let Some(elem) = saved_section.get(name).cloned() {
                        self.delete_schema_mssa_links(file_id, section, &elem, None)?;
                        self.merge_patch(file_id, section, &elem, true)?;
                    }
                }
            }
        }

        {
            let section = SchemaSection::Sources;
            let saved_section = saved_dict.get(&section).cloned().unwrap_or_default();
            let new_section = new_dict.get(&section).cloned().unwrap_or_default();
            let section_diff = differ.diff(saved_section.iter(), new_section.iter());

            for elem in section_diff.changed.iter().map(|(_, new)| new).chain(section_diff.added.iter()) {
                if let Some(Value::String(pkg)) = elem.get("overrides") {
                    self.remove_source_override_target(pkg, &elem.name)?;
                }
            }
            for elem in section_diff.deleted.iter().chain(section_diff.changed.iter().map(|(old, _)| old)) {
                self.delete_schema_source(file_id, &elem.name)?;
            }
            for elem in section_diff.changed.iter().map(|(_, new)| new).chain(section_diff.added.iter()) {
                self.merge_patch(file_id, section, elem, true)?;
            }
            if let Some(names) = env_affected.get(&section) {
                for name in names {
                    if section_diff.changed_or_deleted_names.contains(name) {
                        continue;
                    }
                    if let Some(elem) = saved_section.get(name).cloned() {
                        self.delete_schema_source(file_id, name)?;
                        self.merge_patch(file_id, section, &elem, true)?;
                    }
                }
            }
        }

        for section in [
            SchemaSection::Macros,
            SchemaSection::Exposures,
            SchemaSection::Metrics,
            SchemaSection::Groups,
            SchemaSection::SemanticModels,
            SchemaSection::UnitTests,
            SchemaSection::SavedQueries,
            SchemaSection::DataTests,
        ] {
            let saved_section = saved_dict.get(&section).cloned().unwrap_or_default();
            let new_section = new_dict.get(&section).cloned().unwrap_or_default();
            let section_diff = differ.diff(saved_section.iter(), new_section.iter());

            for elem in section_diff.deleted.iter().chain(section_diff.changed.iter().map(|(old, _)| old)) {
                self.delete_schema_section_entry(file_id, section, &elem.name)?;
            }
            for elem in section_diff.changed.iter().map(|(_, new)| new).chain(section_diff.added.iter()) {
                self.merge_patch(file_id, section, elem, true)?;
            }
            if let Some(names) = env_affected.get(&section) {
                for name in names {
                    if section_diff.changed_or_deleted_names.contains(name) {
                        continue;
                    }
                    if let Some(elem) = saved_section.get(name).cloned() {
                        self.delete_schema_section_entry(file_id, section, name)?;
                        self.merge_patch(file_id, section, &elem, true)?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Evicts a mssa node patched by `elem` (matched by `node_patches`
    /// entries whose prefix names `section` and whose local name matches
    /// `elem.name`), re-parents the node's owning file for a fresh parse,
    /// and schedules referrers when the element's `group` changed between
    /// `elem` and `new_elem`, or the node is (or was) versioned at all --
    /// `new_elem` is `None` when there's no replacement value to compare
    /// against (a straight deletion, or a re-association call that isn't
    /// driven by a YAML-level change), in which case `elem` is compared
    /// against itself and only the versioning check can still fire the
    /// cascade. Only ever called with an mssa `section`
    /// (`models`/`seeds`/`snapshots`/`analyses`) -- `data_tests` shares the
    /// same `node_patches` mechanism but is evicted by the much simpler
    /// `delete_schema_data_test_patch` instead, since it isn't itself mssa.
    fn delete_schema_mssa_links(
        &mut self,
        schema_file_id: &FileId,
        section: SchemaSection,
        elem: &crate::model::YamlElement,
        new_elem: Option<&crate::model::YamlElement>,
    ) -> Result<()> {
        let prefix = section.id_prefix().expect("delete_schema_mssa_links is only called with an mssa section");

        let matches: Vec<UniqueId> = self
            .manifest
            .files
            .get(schema_file_id)
            .and_then(|f| f.payload.as_schema())
            .map(|s| {
                s.node_patches
                    .iter()
                    .filter(|uid| {
                        uid.as_str().splitn(2, '.').next() == Some(prefix) && uid.local_name() == elem.name
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        for uid in matches {
            let kind = match uid.node_kind() {
                Some(k) => k,
                None => continue,
            };
            let popped = self.manifest.pop_active(kind, &uid).or_else(|| self.manifest.pop_disabled(&uid));

            if let Some(entry) = &popped {
                if let Some(new_file) = self.new_files.get(&entry.file_id).cloned() {
                    self.manifest.files.insert(entry.file_id.clone(), new_file);
                    self.enqueue(&entry.file_id);
                }

                let compare_elem = new_elem.unwrap_or(elem);
                let new_group = compare_elem.get("group").and_then(|v| v.as_str()).map(str::to_owned);
                let group_changed = entry.group != new_group;
                let has_versions_key = compare_elem.get("versions").is_some();
                // Any patch change to an already-versioned model forces its
                // referrers to reparse, not just a transition into/out of
                // versioning -- a versioned model's children resolve to a
                // specific version at parse time, so a stale version pin is
                // possible whenever the model's own patch moves at all.
                let versioning_changed = entry.is_versioned || entry.has_versions_key || has_versions_key;

                if group_changed || versioning_changed {
                    self.schedule_referencing_nodes_for_parsing(iter::once(uid.clone()))?;
                }
            }

            if let Some(schema) = self.manifest.files.get_mut(schema_file_id).and_then(|f| f.payload.as_schema_mut()) {
                schema.node_patches.shift_remove(&uid);
            }
        }

        if section.is_mssa() {
            self.remove_tests(schema_file_id, section, &elem.name)?;
            if section == SchemaSection::Snapshots && elem.get("relation").is_some() {
                self.delete_yaml_snapshot(schema_file_id, &elem.name)?;
            }
        }
        Ok(())
    }

    /// Drops any generic test whose `node_patches` unique_id embeds `name` as
    /// its tested parent, rescheduling referrers of each removed test.
    /// Heuristic by necessity: the planner doesn't model the column-level
    /// test configuration a generated test id is derived from, only that
    /// it's a `test.` id living in the same schema file as the parent.
    fn remove_tests(&mut self, file_id: &FileId, _section: SchemaSection, name: &str) -> Result<()> {
        let test_ids: Vec<UniqueId> = self
            .manifest
            .files
            .get(file_id)
            .and_then(|f| f.payload.as_schema())
            .map(|s| {
                s.node_patches
                    .iter()
                    .filter(|id| {
                        id.as_str().starts_with("test.") && id.as_str().contains(&format!(".{}.", name))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        for uid in test_ids {
            let popped =
                self.manifest.pop_active(NodeKind::GenericTest, &uid).or_else(|| self.manifest.pop_disabled(&uid));
            if popped.is_some() {
                self.schedule_referencing_nodes_for_parsing(iter::once(uid.clone()))?;
            }
            if let Some(schema) = self.manifest.files.get_mut(file_id).and_then(|f| f.payload.as_schema_mut()) {
                schema.node_patches.shift_remove(&uid);
            }
        }
        Ok(())
    }

    /// Legacy all-YAML snapshot definitions (a `relation` key on the schema
    /// element rather than a companion `.sql` file) are tracked in
    /// `SchemaFile::snapshots` rather than `node_patches`; evict the entry
    /// named `name` from that set.
    fn delete_yaml_snapshot(&mut self, file_id: &FileId, name: &str) -> Result<()> {
        if let Some(schema) = self.manifest.files.get_mut(file_id).and_then(|f| f.payload.as_schema_mut()) {
            let uid = schema.snapshots.iter().find(|id| id.local_name() == name).cloned();
            if let Some(uid) = uid {
                schema.snapshots.shift_remove(&uid);
            }
        }
        Ok(())
    }

    fn delete_schema_source(&mut self, file_id: &FileId, name: &str) -> Result<Option<UniqueId>> {
        self.delete_schema_entry(file_id, SchemaSection::Sources, name)
    }

    /// A macro's schema patch only attaches documentation/config to a macro
    /// defined in its own `.sql` file -- unlike the other schema-owned
    /// families, removing the patch must not remove the macro itself, only
    /// clear its `patch_path` so it reverts to unpatched.
    fn delete_schema_macro_patch(&mut self, file_id: &FileId, name: &str) -> Result<Option<UniqueId>> {
        let uid = self
            .manifest
            .files
            .get(file_id)
            .and_then(|f| f.payload.as_schema())
            .and_then(|s| s.macro_patches.iter().find(|id| id.local_name() == name).cloned());
        let Some(uid) = uid else { return Ok(None) };

        if let Some(entry) = self.manifest.macros.get_mut(&uid) {
            entry.patch_path = None;
        }
        if let Some(schema) = self.manifest.files.get_mut(file_id).and_then(|f| f.payload.as_schema_mut()) {
            schema.macro_patches.shift_remove(&uid);
        }
        Ok(Some(uid))
    }

    /// A `data_tests` element shares `node_patches` with the mssa sections
    /// (its generic test's uid carries the `test.` prefix) but, unlike them,
    /// only ever pops the active `nodes` entry: it never falls back to the
    /// `disabled` shadow, never compares `group`/`versions` to reschedule
    /// referrers, and never drops the uid from `node_patches` -- a plain,
    /// single-table pop with no cascade.
    fn delete_schema_data_test_patch(&mut self, file_id: &FileId, name: &str) -> Result<Option<UniqueId>> {
        let uid = self
            .manifest
            .files
            .get(file_id)
            .and_then(|f| f.payload.as_schema())
            .and_then(|s| {
                s.node_patches
                    .iter()
                    .find(|id| id.as_str().splitn(2, '.').next() == Some("test") && id.local_name() == name)
                    .cloned()
            });
        let Some(uid) = uid else { return Ok(None) };

        self.manifest.pop_active(NodeKind::GenericTest, &uid);

        Ok(Some(uid))
    }

    /// Dispatches to `delete_schema_entry` for the sections whose elements
    /// live in their own manifest table (sources, macro patches, exposures,
    /// metrics, groups, semantic models, saved queries, unit tests), to
    /// `delete_schema_data_test_patch` for `data_tests`.
    fn delete_schema_section_entry(&mut self, file_id: &FileId, section: SchemaSection, name: &str) -> Result<Option<UniqueId>> {
        match section {
            SchemaSection::Macros => self.delete_schema_macro_patch(file_id, name),
            SchemaSection::DataTests => self.delete_schema_data_test_patch(file_id, name),
            _ => self.delete_schema_entry(file_id, section, name),
        }
    }

    fn schema_entry_kind(section: SchemaSection) -> NodeKind {
        match section {
            SchemaSection::Sources => NodeKind::Source,
            SchemaSection::Exposures => NodeKind::Exposure,
            SchemaSection::Metrics => NodeKind::Metric,
            SchemaSection::Groups => NodeKind::Group,
            SchemaSection::SemanticModels => NodeKind::SemanticModel,
            SchemaSection::SavedQueries => NodeKind::SavedQuery,
            SchemaSection::UnitTests => NodeKind::UnitTest,
            _ => unreachable!("delete_schema_entry is not defined for mssa/data_tests/macros sections"),
        }
    }

    /// `true` for the sections whose referrers must be rescheduled *before*
    /// the entry is popped, since the element's removal itself is what makes
    /// its dependents stale (exposures/metrics/semantic_models/saved_queries/
    /// groups reference their members, rather than the other way around).
    fn schedules_children_before_pop(section: SchemaSection) -> bool {
        matches!(
            section,
            SchemaSection::Exposures
                | SchemaSection::Metrics
                | SchemaSection::SemanticModels
                | SchemaSection::SavedQueries
                | SchemaSection::Groups
        )
    }

    /// Shared skeleton for the "simple" schema-owned families: find the
    /// entry named `name` in `file_id`'s owned-id set for `section`, pop it
    /// from its table (or disabled shadow), and drop it from the owned-id
    /// set. Semantic models additionally evict any metrics generated from
    /// their measures.
    fn delete_schema_entry(&mut self, file_id: &FileId, section: SchemaSection, name: &str) -> Result<Option<UniqueId>> {
        let kind = Self::schema_entry_kind(section);

        let owned: Vec<UniqueId> = self
            .manifest
            .files
            .get(file_id)
            .and_then(|f| f.payload.as_schema())
            .map(|s| s.owned_ids(section).iter().cloned().collect())
            .unwrap_or_default();
        let Some(uid) = owned.into_iter().find(|id| id.local_name() == name) else { return Ok(None) };

        if Self::schedules_children_before_pop(section) {
            let children = if section == SchemaSection::Groups {
                self.manifest.group_members(name)
            } else {
                self.manifest.children_of(&uid)
            };
            self.schedule_nodes_for_parsing(children)?;
        }

        self.manifest.pop_active(kind, &uid).or_else(|| self.manifest.pop_disabled(&uid));

        if section == SchemaSection::SemanticModels {
            self.fix_metrics_from_measures(file_id, name)?;
        }

        if let Some(schema) = self.manifest.files.get_mut(file_id).and_then(|f| f.payload.as_schema_mut()) {
            schema.owned_ids_mut(section).shift_remove(&uid);
        }

        Ok(Some(uid))
    }

    /// Evicts every metric this semantic model generated from its measures.
    /// Known simplification: without the measure-expansion logic itself
    /// (an external-parser concern), this only drops the `metrics_from_measures`
    /// bookkeeping entry for `semantic_model_name` and its tracked metric ids,
    /// rather than re-deriving a diff against a regenerated set.
    fn fix_metrics_from_measures(&mut self, file_id: &FileId, semantic_model_name: &str) -> Result<()> {
        let generated: Vec<UniqueId> = self
            .manifest
            .files
            .get(file_id)
            .and_then(|f| f.payload.as_schema())
            .and_then(|s| s.metrics_from_measures.get(semantic_model_name))
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        for metric_id in &generated {
            self.manifest.pop_active(NodeKind::Metric, metric_id).or_else(|| self.manifest.pop_disabled(metric_id));
        }

        if let Some(schema) = self.manifest.files.get_mut(file_id).and_then(|f| f.payload.as_schema_mut()) {
            schema.metrics_from_measures.remove(semantic_model_name);
            for metric_id in &generated {
                schema.generated_metrics.shift_remove(metric_id);
            }
        }
        Ok(())
    }

    /// Records (or refreshes) a pending-parse element: a brand-new entry is
    /// always recorded; an existing one is overwritten only when `new_patch`
    /// is true (the caller's own file wins), so a file that scheduled itself
    /// first via `merge_patch(..., false)` during eviction isn't clobbered
    /// by a second, redundant call during the same run.
    fn merge_patch(&mut self, file_id: &FileId, section: SchemaSection, elem: &crate::model::YamlElement, new_patch: bool) -> Result<()> {
        if let Some(schema) = self.manifest.files.get_mut(file_id).and_then(|f| f.payload.as_schema_mut()) {
            let already_pending = schema.pp_section_mut(section).contains_key(&elem.name);
            if !already_pending || new_patch {
                schema.pp_section_mut(section).insert(elem.name.clone(), elem.clone());
            }
            if let Some(by_name) = schema.env_vars.get_mut(&section) {
                by_name.remove(&elem.name);
            }
            if let Some(by_name) = schema.unrendered_configs.get_mut(&section) {
                by_name.remove(&elem.name);
            }
        }
        self.enqueue(file_id);
        Ok(())
    }

    /// A `sources` element with an `overrides: <package>` key patches a
    /// source originally defined in `<package>`. When such an element is
    /// added or changed, the original source must be evicted and
    /// re-scheduled too, so the override actually takes effect on reparse.
    fn remove_source_override_target(&mut self, orig_package: &str, name: &str) -> Result<()> {
        let orig_id = UniqueId::new(format!("source.{}.{}", orig_package, name));
        let orig_file = self
            .manifest
            .sources
            .get(&orig_id)
            .map(|e| e.file_id.clone())
            .or_else(|| self.manifest.disabled_shadows(&orig_id).last().map(|e| e.file_id.clone()));
        let Some(orig_file) = orig_file else { return Ok(()) };

        let elem = self
            .manifest
            .files
            .get(&orig_file)
            .and_then(|f| f.payload.as_schema())
            .and_then(|s| s.section(SchemaSection::Sources))
            .and_then(|sec| sec.get(name))
            .cloned();

        self.delete_schema_source(&orig_file, name)?;
        if let Some(elem) = elem {
            self.merge_patch(&orig_file, SchemaSection::Sources, &elem, true)?;
        }
        Ok(())
    }

    // ---- macros -----------------------------------------------------------

    /// Flags `deleted_special_override_macro` when a macro file being
    /// deleted/updated defines one of the six framework-reserved override
    /// macros (`ref`, `source`, `config`, ...) under a non-builtin package --
    /// the driver uses this to fall back to a full parse, since the planner
    /// has no way to know what else in the project depended on the old
    /// override semantics.
    fn check_for_special_deleted_macros(&mut self, file: &SourceFile) -> Result<()> {
        let Some(sql) = file.payload.as_sql() else { return Ok(()) };
        for macro_id in &sql.macros {
            let package = macro_id.package();
            let local_name = macro_id.local_name();
            if !self.config.is_builtin_package(package) && self.config.is_special_override_macro(local_name) {
                self.deleted_special_override_macro = true;
            }
        }
        Ok(())
    }

    /// Pops every macro a file defines, re-scheduling its macro-call
    /// referrers transitively (when `follow_references`) and re-attaching
    /// any schema patch on the macro the same way `remove_node_in_saved`
    /// does for mssat nodes.
    fn handle_macro_file_links(&mut self, file_id: &FileId, follow_references: bool) -> Result<()> {
        let macro_ids: Vec<UniqueId> = self
            .manifest
            .files
            .get(file_id)
            .and_then(|f| f.payload.as_sql())
            .map(|s| s.macros.iter().cloned().collect())
            .unwrap_or_default();

        for macro_id in macro_ids {
            let popped = self.manifest.pop_active(NodeKind::Macro, &macro_id);
            let Some(entry) = popped else { continue };

            if follow_references && self.manifest.has_macro_child_map() {
                let mut visited = BTreeSet::new();
                let mut stack = vec![macro_id.clone()];
                let mut flat = Vec::new();
                while let Some(cur) = stack.pop() {
                    if !visited.insert(cur.clone()) {
                        continue;
                    }
                    for child in self.manifest.macro_children_of(&cur) {
                        flat.push(child.clone());
                        stack.push(child);
                    }
                }
                self.schedule_macro_nodes_for_parsing(flat)?;
            }

            if let Some(patch_path) = entry.patch_path.clone() {
                let elem = self
                    .manifest
                    .files
                    .get(&patch_path)
                    .and_then(|f| f.payload.as_schema())
                    .and_then(|s| s.section(SchemaSection::Macros))
                    .and_then(|sec| sec.get(macro_id.local_name()))
                    .cloned();
                if let Some(elem) = elem {
                    self.delete_schema_macro_patch(&patch_path, &elem.name)?;
                    self.merge_patch(&patch_path, SchemaSection::Macros, &elem, false)?;
                }
            }
        }
        Ok(())
    }

    fn delete_macro_file(&mut self, file_id: &FileId, follow_references: bool) -> Result<()> {
        if let Some(file) = self.manifest.files.get(file_id).cloned() {
            self.check_for_special_deleted_macros(&file)?;
        }
        self.handle_macro_file_links(file_id, follow_references)
    }

    fn handle_macro_file_links_by_id(&mut self, macro_id: &UniqueId, follow_references: bool) -> Result<()> {
        let Some(file_id) = self.manifest.macros.get(macro_id).map(|e| e.file_id.clone()) else {
            return Ok(());
        };
        self.handle_macro_file_links(&file_id, follow_references)
    }

    // ---- doc / fixture nodes -----------------------------------------

    fn delete_doc_node(&mut self, file_id: &FileId) -> Result<()> {
        let doc_ids: Vec<UniqueId> = self
            .manifest
            .files
            .get(file_id)
            .and_then(|f| f.payload.as_doc())
            .map(|d| d.docs.iter().cloned().collect())
            .unwrap_or_default();
        for uid in doc_ids {
            self.manifest.docs.remove(&uid);
        }
        Ok(())
    }

    fn delete_fixture_node(&mut self, file_id: &FileId) -> Result<()> {
        let fixture_id =
            self.manifest.files.get(file_id).and_then(|f| f.payload.as_fixture()).and_then(|f| f.fixture.clone());
        if let Some(uid) = fixture_id {
            self.manifest.fixtures.remove(&uid);
        }
        let consumers: Vec<UniqueId> = self
            .manifest
            .files
            .get(file_id)
            .and_then(|f| f.payload.as_fixture())
            .map(|f| f.consuming_unit_tests.iter().cloned().collect())
            .unwrap_or_default();
        self.schedule_nodes_for_parsing(consumers)
    }

    // ---- updated (non-schema) -------------------------------------------

    fn update_in_saved(&mut self, file_id: &FileId) -> Result<()> {
        if self.parse_plan.already_scheduled_for_parsing(file_id) {
            return Ok(());
        }
        let Some(kind) = self.manifest.files.get(file_id).map(|f| f.parse_kind) else { return Ok(()) };

        match kind {
            k if k.is_mssat() => self.update_mssat_in_saved(file_id)?,
            k if k.is_mg() => self.update_macro_in_saved(file_id)?,
            ParseKind::Documentation => self.update_doc_in_saved(file_id)?,
            ParseKind::Fixture => self.update_fixture_in_saved(file_id)?,
            ParseKind::Schema => {
                return Err(Inconsistency::UnexpectedParseKind {
                    file_id: file_id.clone(),
                    context: "update_in_saved",
                })
            }
        }

        self.event_sink.partial_parsing_file(PartialParsingFile {
            operation: FileOperation::Updated,
            file_id: file_id.clone(),
        });
        Ok(())
    }

    fn update_mssat_in_saved(&mut self, file_id: &FileId) -> Result<()> {
        self.remove_mssat_file(file_id)?;
        if let Some(new_file) = self.new_files.get(file_id).cloned() {
            self.manifest.files.insert(file_id.clone(), new_file);
        }
        self.enqueue(file_id);
        Ok(())
    }

    fn update_macro_in_saved(&mut self, file_id: &FileId) -> Result<()> {
        self.handle_macro_file_links(file_id, true)?;
        if let Some(new_file) = self.new_files.get(file_id).cloned() {
            self.manifest.files.insert(file_id.clone(), new_file);
        }
        self.enqueue(file_id);
        Ok(())
    }

    fn update_doc_in_saved(&mut self, file_id: &FileId) -> Result<()> {
        self.delete_doc_node(file_id)?;
        if let Some(new_file) = self.new_files.get(file_id).cloned() {
            self.manifest.files.insert(file_id.clone(), new_file);
        }
        self.enqueue(file_id);
        Ok(())
    }

    fn update_fixture_in_saved(&mut self, file_id: &FileId) -> Result<()> {
        let fixture_id =
            self.manifest.files.get(file_id).and_then(|f| f.payload.as_fixture()).and_then(|f| f.fixture.clone());
        if let Some(uid) = fixture_id {
            self.manifest.fixtures.remove(&uid);
        }
        let consumers: Vec<UniqueId> = self
            .manifest
            .files
            .get(file_id)
            .and_then(|f| f.payload.as_fixture())
            .map(|f| f.consuming_unit_tests.iter().cloned().collect())
            .unwrap_or_default();
        self.schedule_nodes_for_parsing(consumers)?;

        if let Some(new_file) = self.new_files.get(file_id).cloned() {
            self.manifest.files.insert(file_id.clone(), new_file);
        }
        self.enqueue(file_id);
        Ok(())
    }

    // ---- referrer scheduling ---------------------------------------------

    /// Resolves each victim to its referrers via `child_map`, then schedules
    /// those referrers the same way `schedule_nodes_for_parsing` does.
    fn schedule_referencing_nodes_for_parsing(&mut self, victims: impl IntoIterator<Item = UniqueId>) -> Result<()> {
        let mut referrers = BTreeSet::new();
        for victim in victims {
            referrers.extend(self.manifest.children_of(&victim));
        }
        self.schedule_nodes_for_parsing(referrers)
    }

    /// Schedules an already-resolved set of referrer unique_ids directly
    /// (the caller has already walked `child_map`/`group_map` itself, e.g.
    /// `delete_schema_entry`'s pre-pop eviction of exposure/metric members).
    /// Generic tests are skipped here -- they only reschedule through the
    /// macro-cascade path below, via their parent element's schema patch.
    fn schedule_nodes_for_parsing(&mut self, referrers: impl IntoIterator<Item = UniqueId>) -> Result<()> {
        for uid in referrers {
            self.schedule_one_referrer(uid)?;
        }
        Ok(())
    }

    /// Named distinctly at the macro-cascade call sites
    /// (`handle_macro_file_links`'s transitive macro-caller walk), and with a
    /// narrower dispatch than `schedule_nodes_for_parsing`: a generic test
    /// reached by a macro edit reassociates through its schema patch here,
    /// but a source/exposure/metric/semantic_model/saved_query/unit_test
    /// referrer has no handling on this path and is left untouched -- that
    /// reassociation only happens when the same uid is reached as a plain
    /// `depends_on` referrer.
    fn schedule_macro_nodes_for_parsing(&mut self, ids: impl IntoIterator<Item = UniqueId>) -> Result<()> {
        for uid in ids {
            self.schedule_one_macro_referrer(uid)?;
        }
        Ok(())
    }

    /// mssat and macro dispatch shared by both scheduling paths: mssat
    /// referrers get their owning file swapped in and re-enqueued, macro
    /// referrers recurse into macro-file handling.
    fn schedule_mssat_or_macro_referrer(&mut self, kind: NodeKind, uid: &UniqueId) -> Result<bool> {
        match kind {
            NodeKind::Model | NodeKind::Seed | NodeKind::Snapshot | NodeKind::Analysis | NodeKind::SingularTest => {
                if let Some(entry) = self.manifest.get(kind, uid).cloned() {
                    self.remove_mssat_file(&entry.file_id)?;
                    if let Some(new_file) = self.new_files.get(&entry.file_id).cloned() {
                        self.manifest.files.insert(entry.file_id.clone(), new_file);
                        self.enqueue(&entry.file_id);
                    }
                }
                Ok(true)
            }
            NodeKind::Macro => {
                self.handle_macro_file_links_by_id(uid, true)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Dispatch for the plain `depends_on`-driven referrer path: mssat and
    /// macro kinds as shared above; source/exposure/metric/semantic_model/
    /// saved_query/unit_test/group re-associate through their own schema
    /// patch; generic tests are skipped -- they never reschedule through a
    /// plain `depends_on` edge, only through a `calls_macros` edge on the
    /// macro-cascade path.
    fn schedule_one_referrer(&mut self, uid: UniqueId) -> Result<()> {
        let Some(kind) = uid.node_kind() else { return Ok(()) };
        if self.schedule_mssat_or_macro_referrer(kind, &uid)? {
            return Ok(());
        }

        match kind {
            NodeKind::Source
            | NodeKind::Exposure
            | NodeKind::Metric
            | NodeKind::SemanticModel
            | NodeKind::SavedQuery
            | NodeKind::UnitTest
            | NodeKind::Group => {
                if let Some(entry) = self.manifest.get(kind, &uid).cloned() {
                    if let Some(section) = entry.schema_section {
                        self.reassociate_schema_entry(&entry.file_id, section, uid.local_name())?;
                    }
                }
            }
            // GenericTest never reschedules through a plain `depends_on`
            // edge; Model/Seed/Snapshot/Analysis/SingularTest/Macro already
            // returned above.
            NodeKind::GenericTest | NodeKind::Model | NodeKind::Seed | NodeKind::Snapshot | NodeKind::Analysis
            | NodeKind::SingularTest | NodeKind::Macro => {}
        }
        Ok(())
    }

    /// Dispatch for the macro-cascade referrer path: mssat and macro kinds
    /// as shared above; a generic test reassociates through its schema
    /// patch; source/exposure/metric/semantic_model/saved_query/unit_test/
    /// group referrers have no handling here at all (the original's
    /// `schedule_macro_nodes_for_parsing` carries no such branch) and are
    /// left untouched.
    fn schedule_one_macro_referrer(&mut self, uid: UniqueId) -> Result<()> {
        let Some(kind) = uid.node_kind() else { return Ok(()) };
        if self.schedule_mssat_or_macro_referrer(kind, &uid)? {
            return Ok(());
        }

        match kind {
            NodeKind::GenericTest => self.schedule_generic_test_for_parsing(&uid)?,
            NodeKind::Source
            | NodeKind::Exposure
            | NodeKind::Metric
            | NodeKind::SemanticModel
            | NodeKind::SavedQuery
            | NodeKind::UnitTest
            | NodeKind::Group
            | NodeKind::Model
            | NodeKind::Seed
            | NodeKind::Snapshot
            | NodeKind::Analysis
            | NodeKind::SingularTest
            | NodeKind::Macro => {}
        }
        Ok(())
    }

    /// `schema_file_id` is the schema file that directly owns this element --
    /// sources/exposures/metrics/groups/semantic_models/saved_queries/unit_tests
    /// have no SQL file of their own, so unlike mssat/macro nodes their
    /// `file_id` already names the schema file, not a `patch_path`.
    fn reassociate_schema_entry(&mut self, schema_file_id: &FileId, section: SchemaSection, name: &str) -> Result<()> {
        let patch_path = schema_file_id;
        if section == SchemaSection::Sources {
            if let Some(Value::String(pkg)) = self
                .manifest
                .files
                .get(patch_path)
                .and_then(|f| f.payload.as_schema())
                .and_then(|s| s.section(section))
                .and_then(|sec| sec.get(name))
                .and_then(|e| e.get("overrides"))
            {
                self.remove_source_override_target(pkg, name)?;
            }
        }

        let elem = self
            .manifest
            .files
            .get(patch_path)
            .and_then(|f| f.payload.as_schema())
            .and_then(|s| s.section(section))
            .and_then(|sec| sec.get(name))
            .cloned();
        let Some(elem) = elem else { return Ok(()) };

        self.delete_schema_section_entry(patch_path, section, &elem.name)?;
        self.merge_patch(patch_path, section, &elem, true)
    }

    /// A generic test's own YAML element lives nested inside its parent
    /// (model/seed/snapshot/analysis/source), so re-associating it means
    /// re-associating the *parent* element rather than anything named after
    /// the test itself.
    fn schedule_generic_test_for_parsing(&mut self, uid: &UniqueId) -> Result<()> {
        let Some(entry) = self.manifest.get(NodeKind::GenericTest, uid).cloned() else { return Ok(()) };
        let (Some(patch_path), Some(section)) = (entry.patch_path.clone(), entry.schema_section) else {
            return Ok(());
        };
        let parent_name = entry.patched_element_name.clone().unwrap_or_else(|| uid.local_name().to_owned());

        if section.is_mssa() {
            let elem = self
                .manifest
                .files
                .get(&patch_path)
                .and_then(|f| f.payload.as_schema())
                .and_then(|s| s.section(section))
                .and_then(|sec| sec.get(&parent_name))
                .cloned();
            if let Some(elem) = elem {
                self.delete_schema_mssa_links(&patch_path, section, &elem, None)?;
                self.merge_patch(&patch_path, section, &elem, true)?;
            }
        } else if section == SchemaSection::Sources {
            let elem = self
                .manifest
                .files
                .get(&patch_path)
                .and_then(|f| f.payload.as_schema())
                .and_then(|s| s.section(section))
                .and_then(|sec| sec.get(&parent_name))
                .cloned();
            if let Some(elem) = &elem {
                if let Some(Value::String(pkg)) = elem.get("overrides") {
                    self.remove_source_override_target(pkg, &parent_name)?;
                }
            }
            self.delete_schema_source(&patch_path, &parent_name)?;
            if let Some(elem) = elem {
                self.merge_patch(&patch_path, section, &elem, true)?;
            }
        }

        if let Some(schema) = self.manifest.files.get_mut(&patch_path).and_then(|f| f.payload.as_schema_mut()) {
            schema.node_patches.shift_remove(uid);
        }
        Ok(())
    }
}
