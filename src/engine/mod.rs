//! The invalidation engine itself: `InvalidationEngine::get_parsing_files`
//! applies a `FileDiff` to a saved `Manifest` through a fixed six-stage
//! pipeline -- skip check, added, changed schema files, deleted schema
//! files, deleted, changed -- in that exact order. The order matters:
//! additions must land before schema changes reference them (a brand-new
//! model and a same-run schema patch on it), deletions must land before
//! plain changes so a changed file never gets scheduled twice under two
//! different unique_ids, and schema file deletions must precede non-schema
//! deletions so a deleted model's patch is already gone by the time the
//! model file itself is evicted.

pub mod event;
pub mod invalidation;
pub mod parse_plan;

pub use event::{EventSink, FileOperation, LoggingSink, NullSink, PartialParsingEnabled, PartialParsingFile};
pub use invalidation::{EnvAffectedSchema, InvalidationEngine};
pub use parse_plan::{DefaultParserTable, ParsePlan, ParserTable, ProjectParserFiles};
