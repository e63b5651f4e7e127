//! Emits a `{project → parser → [file_id]}` dictionary and a `skip_parsing`
//! verdict.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{FileId, ParseKind, SourceFile};

/// Total mapping from parse kind to the name of the parser that consumes it,
/// over every non-Schema kind.
pub trait ParserTable {
    fn parser_name(&self, kind: ParseKind) -> &'static str;
}

/// The parser names used across the rest of the ecosystem this planner is
/// part of.
#[derive(Debug, Default)]
pub struct DefaultParserTable;

impl ParserTable for DefaultParserTable {
    fn parser_name(&self, kind: ParseKind) -> &'static str {
        match kind {
            ParseKind::Model => "model_parser",
            ParseKind::Seed => "seed_parser",
            ParseKind::Snapshot => "snapshot_parser",
            ParseKind::Analysis => "analysis_parser",
            ParseKind::SingularTest => "singular_test_parser",
            ParseKind::Macro => "macro_parser",
            ParseKind::GenericTest => "generic_test_parser",
            ParseKind::Schema => "schema_parser",
            ParseKind::Documentation => "docs_parser",
            ParseKind::Fixture => "fixture_parser",
        }
    }
}

/// `project_name -> parser_name -> ordered, unique file_ids`.
pub type ProjectParserFiles = BTreeMap<String, BTreeMap<&'static str, Vec<FileId>>>;

#[derive(Debug)]
pub struct ParsePlan<'a> {
    parser_table: &'a dyn ParserTable,
    plan: ProjectParserFiles,
    scheduled: BTreeSet<FileId>,
    /// Files already marked for deletion this run; enqueuing one is always a
    /// no-op, since the parser will never be invoked on it.
    excluded: BTreeSet<FileId>,
}

impl<'a> ParsePlan<'a> {
    pub fn new(parser_table: &'a dyn ParserTable, excluded: BTreeSet<FileId>) -> ParsePlan<'a> {
        ParsePlan { parser_table, plan: BTreeMap::new(), scheduled: BTreeSet::new(), excluded }
    }

    /// Looks up the parser for the file's parse kind, creates
    /// `plan[project_name][parser_name]` if missing, and appends `file_id`
    /// unless already present or already in `deleted`/`deleted_schema_files`.
    pub fn add_to_pp_files(&mut self, source_file: &SourceFile) {
        if self.excluded.contains(&source_file.file_id) {
            return;
        }
        if !self.scheduled.insert(source_file.file_id.clone()) {
            return;
        }
        let parser = self.parser_table.parser_name(source_file.parse_kind);
        self.plan
            .entry(source_file.project_name.clone())
            .or_default()
            .entry(parser)
            .or_default()
            .push(source_file.file_id.clone());
    }

    pub fn already_scheduled_for_parsing(&self, file_id: &FileId) -> bool {
        self.scheduled.contains(file_id)
    }

    pub fn skip_parsing(&self) -> bool {
        self.plan.is_empty()
    }

    pub fn into_project_parser_files(self) -> ProjectParserFiles {
        self.plan
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{Checksum, FileId, SourceFilePayload, SqlFile};

    fn model_file(id: &str, project: &str) -> SourceFile {
        SourceFile {
            file_id: FileId::new(id),
            checksum: Checksum::new("c1"),
            parse_kind: ParseKind::Model,
            project_name: project.to_owned(),
            env_vars: Default::default(),
            payload: SourceFilePayload::Sql(SqlFile::default()),
        }
    }

    #[test]
    fn duplicate_enqueue_is_a_no_op() {
        let table = DefaultParserTable::default();
        let mut plan = ParsePlan::new(&table, BTreeSet::new());
        let file = model_file("proj://a.sql", "proj");
        plan.add_to_pp_files(&file);
        plan.add_to_pp_files(&file);
        let files = plan.into_project_parser_files();
        assert_eq!(files["proj"]["model_parser"].len(), 1);
    }

    #[test]
    fn excluded_file_is_never_enqueued() {
        let table = DefaultParserTable::default();
        let file = model_file("proj://a.sql", "proj");
        let mut excluded = BTreeSet::new();
        excluded.insert(file.file_id.clone());
        let mut plan = ParsePlan::new(&table, excluded);
        plan.add_to_pp_files(&file);
        assert!(plan.skip_parsing());
    }
}
