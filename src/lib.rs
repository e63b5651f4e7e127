//! Incremental reparse planner: computes the smallest set of files a
//! data-transformation build tool must re-parse after a source tree changes,
//! while mutating the previously-saved manifest in place to evict and
//! reconnect only the affected objects.
//!
//! `model` holds the data the planner operates on (source files, the
//! manifest graph, the closed enumerations it dispatches on); `diff` computes
//! the three independent diffs (`FileDiffer`, `EnvVarDiffer`,
//! `SchemaYamlDiffer`) that feed the engine; `engine` is the
//! `InvalidationEngine` itself plus the event sink and parser-table traits a
//! driver implements; `planner` is the single entry point tying all three
//! together.

#![warn(rust_2018_idioms)]

pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod model;
pub mod planner;

pub use config::Config;
pub use error::{Inconsistency, Result};
pub use planner::{PlanResult, Planner};

pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_owned()
}
