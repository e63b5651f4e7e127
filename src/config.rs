//! Configuration for the planner: sentinel constants and the few knobs the
//! driver may override (builtin package name, override-macro set).

use std::collections::BTreeSet;

/// Opaque marker stored as an env var's saved value meaning "no explicit
/// value was set, the default was used". When a previously-saved env var is
/// now unset in the process environment *and* its saved value was this
/// sentinel, `EnvVarDiffer` treats it as unchanged rather than deleted.
pub const DEFAULT_ENV_PLACEHOLDER: &str = "__PLANNER_ENV_VAR_DEFAULT__";

/// Prefix identifying framework-generated macros. Purely an external-parser
/// concern; the planner never branches on it, but it's a documented sentinel
/// kept here alongside the others.
pub const MACRO_PREFIX: &str = "default__";

/// The package name whose override-macro edits are tolerated without forcing
/// a full parse.
pub const DEFAULT_BUILTIN_PACKAGE: &str = "dbt";

/// Framework-reserved macro names whose *deletion* from a non-builtin package
/// forces a full parse (see `check_for_special_deleted_macros`).
pub fn special_override_macros() -> BTreeSet<&'static str> {
    [
        "ref",
        "source",
        "config",
        "generate_schema_name",
        "generate_database_name",
        "generate_alias_name",
    ]
    .into_iter()
    .collect()
}

/// Driver-supplied configuration for a single planner run.
#[derive(Debug, Clone)]
pub struct Config {
    pub builtin_package: String,
    pub special_override_macros: BTreeSet<String>,
    pub env_placeholder: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            builtin_package: DEFAULT_BUILTIN_PACKAGE.to_owned(),
            special_override_macros: special_override_macros()
                .into_iter()
                .map(str::to_owned)
                .collect(),
            env_placeholder: DEFAULT_ENV_PLACEHOLDER.to_owned(),
        }
    }
}

impl Config {
    pub fn is_special_override_macro(&self, local_name: &str) -> bool {
        self.special_override_macros.contains(local_name)
    }

    pub fn is_builtin_package(&self, package: &str) -> bool {
        package == self.builtin_package
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builtin_package_edits_are_tolerated() {
        let config = Config::default();
        assert!(config.is_builtin_package("dbt"));
        assert!(!config.is_builtin_package("user_pkg"));
    }

    #[test]
    fn special_override_macros_are_recognized() {
        let config = Config::default();
        assert!(config.is_special_override_macro("ref"));
        assert!(config.is_special_override_macro("generate_alias_name"));
        assert!(!config.is_special_override_macro("my_helper"));
    }
}
