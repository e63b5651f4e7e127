//! The data model the planner operates on: source files, the manifest graph
//! they produce, and the small closed enumerations (parse kind, schema
//! section, node kind) the rest of the crate dispatches on.

mod file;
mod manifest;
mod section;
mod unique_id;

pub use file::{
    DocFile, FileId, FixtureFile, SchemaFile, SourceFile, SourceFilePayload, SqlFile, YamlElement,
    YamlSection,
};
pub use manifest::{Checksum, Manifest, ManifestEntry};
pub use section::SchemaSection;
pub use unique_id::{NodeKind, ParseKind, UniqueId};
