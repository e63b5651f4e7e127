//! Planner error types. Hand-rolled enums with manual `Display`/`Error` impls;
//! `anyhow::Error` is reserved for aggregation at the outer driver boundary.

use std::fmt;

use crate::model::{FileId, UniqueId};

/// A fatal inconsistency detected while applying a diff to the saved
/// manifest. These abort planning; the driver falls back to a full
/// parse.
#[derive(Debug)]
pub enum Inconsistency {
    /// A saved file's `parse_kind` says `Schema` but its payload isn't a
    /// `SchemaFile`, or vice versa.
    SchemaPayloadMismatch { file_id: FileId },
    /// A dispatch on `parse_kind` encountered a value outside the set it
    /// expected (e.g. `update_in_saved` called with a `Fixture` file routed
    /// to the mssat handler).
    UnexpectedParseKind { file_id: FileId, context: &'static str },
    /// A `file_id` was about to be enqueued into `project_parser_files` while
    /// also present in a delete set.
    ScheduledFileAlsoDeleted { file_id: FileId },
    /// A `unique_id` referenced a schema file that no longer exists in the
    /// saved manifest.
    MissingSchemaFile { unique_id: UniqueId, file_id: FileId },
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inconsistency::SchemaPayloadMismatch { file_id } => {
                write!(f, "file `{}` claims to be a schema file but its payload disagrees", file_id)
            }
            Inconsistency::UnexpectedParseKind { file_id, context } => {
                write!(f, "unexpected parse kind for `{}` while {}", file_id, context)
            }
            Inconsistency::ScheduledFileAlsoDeleted { file_id } => write!(
                f,
                "`{}` is scheduled for parsing but also marked for deletion",
                file_id
            ),
            Inconsistency::MissingSchemaFile { unique_id, file_id } => write!(
                f,
                "`{}` names patch file `{}`, which is no longer in the saved manifest",
                unique_id, file_id
            ),
        }
    }
}

impl std::error::Error for Inconsistency {}

pub type Result<T> = std::result::Result<T, Inconsistency>;
