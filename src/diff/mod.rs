//! The three diff components: `FileDiffer` (file-id level), `EnvVarDiffer`
//! (the env-var dimension orthogonal to file contents), and
//! `SchemaYamlDiffer` (per-section YAML element diff).

pub mod env_differ;
pub mod file_differ;
pub mod schema_differ;

pub use env_differ::{EnvAccessor, EnvChanges, EnvVarDiffer, MapEnvAccessor, ProcessEnvAccessor};
pub use file_differ::{FileDiff, FileDiffer};
pub use schema_differ::{SchemaYamlDiffer, SectionDiff};
