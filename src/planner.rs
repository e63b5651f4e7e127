//! The `Planner` facade: wires `EnvVarDiffer` → `FileDiffer` →
//! `InvalidationEngine` into the single entry point a driver calls once per
//! reparse decision, the outer boundary where `anyhow::Error` aggregates
//! whatever the inner components raise.

use std::collections::BTreeMap;

use anyhow::Context;

use crate::config::Config;
use crate::diff::{EnvAccessor, EnvVarDiffer, FileDiff, FileDiffer, ProcessEnvAccessor};
use crate::engine::{DefaultParserTable, EventSink, InvalidationEngine, NullSink, ParserTable, ProjectParserFiles};
use crate::model::{FileId, Manifest, SourceFile};

/// One reparse-planning run over a saved manifest and a freshly-discovered
/// file tree.
pub struct Planner<'a> {
    config: Config,
    manifest: &'a mut Manifest,
    new_files: BTreeMap<FileId, SourceFile>,
    event_sink: Box<dyn EventSink + 'a>,
    parser_table: Box<dyn ParserTable + 'a>,
    env_accessor: Box<dyn EnvAccessor + 'a>,
}

/// Outcome of a completed run: the plan itself, plus the two signals a
/// driver needs to decide whether to discard it for a full parse.
#[derive(Debug, Default)]
pub struct PlanResult {
    pub project_parser_files: ProjectParserFiles,
    pub deleted_special_override_macro: bool,
}

impl<'a> Planner<'a> {
    pub fn new(manifest: &'a mut Manifest, new_files: BTreeMap<FileId, SourceFile>) -> Planner<'a> {
        Planner {
            config: Config::default(),
            manifest,
            new_files,
            event_sink: Box::new(NullSink),
            parser_table: Box::new(DefaultParserTable::default()),
            env_accessor: Box::new(ProcessEnvAccessor),
        }
    }

    pub fn with_config(mut self, config: Config) -> Planner<'a> {
        self.config = config;
        self
    }

    pub fn with_event_sink(mut self, sink: impl EventSink + 'a) -> Planner<'a> {
        self.event_sink = Box::new(sink);
        self
    }

    pub fn with_parser_table(mut self, table: impl ParserTable + 'a) -> Planner<'a> {
        self.parser_table = Box::new(table);
        self
    }

    pub fn with_env_accessor(mut self, accessor: impl EnvAccessor + 'a) -> Planner<'a> {
        self.env_accessor = Box::new(accessor);
        self
    }

    /// Cheap pre-check over raw file-id sets (no checksum comparisons beyond
    /// what `FileDiffer::file_id_sets_differ` already does), letting a driver
    /// skip constructing the full diff machinery when the file trees are
    /// identical.
    pub fn diffs_exist(&self) -> bool {
        FileDiffer::file_id_sets_differ(&*self.manifest, &self.new_files)
    }

    pub fn run(mut self) -> anyhow::Result<PlanResult> {
        let env_differ = EnvVarDiffer::new();
        let env_changes = env_differ.diff(&self.config, &self.manifest.env_vars, self.env_accessor.as_ref());
        env_differ.apply_deletions(&mut *self.manifest, &env_changes);

        let env_affected_source_files = env_differ.env_affected_source_files(&*self.manifest, &env_changes);
        let env_affected_schema = env_differ.env_affected_schema_elements(&*self.manifest, &env_changes);
        let env_affected_schema_files: std::collections::BTreeSet<FileId> =
            env_affected_schema.keys().cloned().collect();

        let file_differ = FileDiffer::new();
        let diff: FileDiff = file_differ.diff(
            &*self.manifest,
            &self.new_files,
            &env_affected_source_files,
            &env_affected_schema_files,
        );

        let parser_table = self.parser_table.as_ref();
        let event_sink = self.event_sink.as_ref();
        let engine = InvalidationEngine::new(
            &self.config,
            event_sink,
            &mut *self.manifest,
            std::mem::take(&mut self.new_files),
            env_affected_schema,
            parser_table,
            &diff,
        );

        let (project_parser_files, deleted_special_override_macro) =
            engine.get_parsing_files(&diff).context("applying file diff to saved manifest")?;

        self.manifest.rebuild_all_indices();

        Ok(PlanResult { project_parser_files, deleted_special_override_macro })
    }
}
