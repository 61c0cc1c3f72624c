//! brume-cli/src/main.rs
//!
//! Point d'entrée du binaire `brume`. On prépare l'environnement (logs)
//! puis on délègue toute la logique à `brume_cli::run()` — `lib.rs` reste
//! testable en unité, `main.rs` reste minimal.

use std::process::ExitCode;

fn main() -> ExitCode {
    // Logs activés via RUST_LOG (trace VM, désassemblage en debug).
    env_logger::init();
    brume_cli::run()
}
