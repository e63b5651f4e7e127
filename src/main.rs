//! Minimal CLI entry point. CLI flag parsing and wire-format I/O are out of
//! scope for this crate (see `lib.rs` module docs) -- the planner is a
//! library consumed by an embedding build-tool driver, which is responsible
//! for discovering files, running the external parser, and deciding what to
//! do with `PlanResult`. This binary only reports version information.

use std::env;

pub fn main() {
    env_logger::init();

    match env::args().nth(1).as_deref() {
        Some("--version") | Some("-V") => {
            println!("{}", reparse_planner::version());
        }
        Some("--help") | Some("-h") => {
            println!("{}", help());
        }
        Some(unknown) => {
            println!("Unknown argument '{}'. Supported arguments:\n{}", unknown, help());
            std::process::exit(101);
        }
        None => {
            println!("{}", help());
        }
    }
}

fn help() -> &'static str {
    r#"
    --version or -V to print the version
    --help or -h for this message

    This binary has no standalone planning mode; embed the `reparse_planner`
    library directly and drive `Planner` from your own file discovery and
    parsing code.
    "#
}
