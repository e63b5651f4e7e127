//! Three-way set diff over file ids, further split by parse kind.

use std::collections::BTreeSet;

use log::trace;

use crate::model::{FileId, Manifest, SourceFile};

#[derive(Debug, Default, Clone)]
pub struct FileDiff {
    pub added: BTreeSet<FileId>,
    pub deleted: BTreeSet<FileId>,
    pub deleted_schema_files: BTreeSet<FileId>,
    pub changed: BTreeSet<FileId>,
    pub changed_schema_files: BTreeSet<FileId>,
    pub unchanged: BTreeSet<FileId>,
    /// Set if any file of kind Macro or GenericTest appears in `changed` ∪
    /// `deleted`. When true the engine demands a built `macro_child_map`
    /// before proceeding.
    pub changed_or_deleted_macro_file: bool,
}

impl FileDiff {
    /// True iff every one of {added, changed, deleted, changed_schema_files,
    /// deleted_schema_files} is empty.
    pub fn skip_parsing(&self) -> bool {
        self.added.is_empty()
            && self.changed.is_empty()
            && self.deleted.is_empty()
            && self.changed_schema_files.is_empty()
            && self.deleted_schema_files.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct FileDiffer;

impl FileDiffer {
    pub fn new() -> FileDiffer {
        FileDiffer
    }

    /// Computes the three-way diff between `saved.files` and `new_files`,
    /// then augments it with env-var-affected files from `env_changes`
    /// without duplicating ids already present in the delete/change sets.
    pub fn diff(
        &self,
        saved: &Manifest,
        new_files: &std::collections::BTreeMap<FileId, SourceFile>,
        env_affected_source_files: &BTreeSet<FileId>,
        env_affected_schema_files: &BTreeSet<FileId>,
    ) -> FileDiff {
        let mut diff = FileDiff::default();

        for (file_id, new_file) in new_files {
            match saved.files.get(file_id) {
                None => {
                    diff.added.insert(file_id.clone());
                }
                Some(old_file) => {
                    let bucket = match (old_file.checksum != new_file.checksum, new_file.is_schema()) {
                        (true, true) => &mut diff.changed_schema_files,
                        (true, false) => &mut diff.changed,
                        (false, _) => &mut diff.unchanged,
                    };
                    bucket.insert(file_id.clone());
                }
            }
        }

        for file_id in saved.files.keys() {
            if !new_files.contains_key(file_id) {
                let old_file = &saved.files[file_id];
                if old_file.is_schema() {
                    diff.deleted_schema_files.insert(file_id.clone());
                } else {
                    diff.deleted.insert(file_id.clone());
                }
            }
        }

        for file_id in env_affected_source_files {
            if !diff.changed.contains(file_id) && !diff.deleted.contains(file_id) {
                diff.changed.insert(file_id.clone());
            }
        }
        for file_id in env_affected_schema_files {
            if !diff.changed_schema_files.contains(file_id) && !diff.deleted_schema_files.contains(file_id)
            {
                diff.changed_schema_files.insert(file_id.clone());
            }
        }

        diff.changed_or_deleted_macro_file = diff
            .changed
            .iter()
            .chain(diff.deleted.iter())
            .filter_map(|id| saved.files.get(id).or_else(|| new_files.get(id)))
            .any(|f| f.parse_kind.is_mg());

        trace!(
            "file diff: added={} changed={} deleted={} changed_schema={} deleted_schema={}",
            diff.added.len(),
            diff.changed.len(),
            diff.deleted.len(),
            diff.changed_schema_files.len(),
            diff.deleted_schema_files.len(),
        );

        diff
    }

    /// Convenience used by the driver before even constructing an
    /// `EnvVarDiffer`: a cheap pre-check over raw file-id sets.
    pub fn file_id_sets_differ(
        saved: &Manifest,
        new_files: &std::collections::BTreeMap<FileId, SourceFile>,
    ) -> bool {
        let saved_ids: BTreeSet<&FileId> = saved.files.keys().collect();
        let new_ids: BTreeSet<&FileId> = new_files.keys().collect();
        if saved_ids != new_ids {
            return true;
        }
        saved.files.iter().any(|(id, old)| old.checksum != new_files[id].checksum)
    }
}

