//! brume-cli — Interface en ligne de commande de brume.
//!
//! `brume` sans argument ouvre la boucle interactive (`> `, une ligne, une
//! interprétation — la même VM d'une ligne à l'autre, donc les globales
//! persistent). `brume <script.brm>` exécute un fichier. Codes de sortie
//! façon sysexits : 0 succès, 64 usage, 65 erreur de compilation, 70 erreur
//! runtime, 74 erreur d'E/S.

use std::fs;
use std::io::{self, BufRead as _, Write as _};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser;

use brume_vm::{InterpretError, Vm, VmOptions};

/// Codes de sortie (sysexits.h).
const EX_USAGE: u8 = 64;
const EX_DATAERR: u8 = 65;
const EX_SOFTWARE: u8 = 70;
const EX_IOERR: u8 = 74;

#[derive(Debug, Parser)]
#[command(name = "brume", version, about = "Interpréteur du langage brume")]
struct Cli {
    /// Script à exécuter ; sans argument, ouvre le REPL.
    path: Option<PathBuf>,

    /// Trace chaque instruction exécutée (visible avec RUST_LOG=trace).
    #[arg(long)]
    trace: bool,
}

/// Point d'entrée de la logique CLI ; `main` ne fait que convertir en
/// `ExitCode`.
pub fn run() -> ExitCode {
    ExitCode::from(run_inner())
}

fn run_inner() -> u8 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help / --version sortent en succès ; le reste est un
            // mauvais usage (trop d'arguments, flag inconnu…).
            let is_usage = err.use_stderr();
            let _ = err.print();
            return if is_usage { EX_USAGE } else { 0 };
        }
    };

    let mut vm = Vm::with_options(VmOptions::default().with_trace(cli.trace));
    match cli.path {
        Some(path) => run_file(&mut vm, &path),
        None => repl(&mut vm),
    }
}

/// Exécute un fichier source entier.
fn run_file(vm: &mut Vm, path: &Path) -> u8 {
    let source = match read_source(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("{err:#}");
            return EX_IOERR;
        }
    };
    match vm.interpret(&source) {
        Ok(()) => 0,
        Err(err) => report(&err),
    }
}

fn read_source(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path)
        .with_context(|| format!("Could not read file \"{}\"", path.display()))
}

/// Boucle interactive : `> `, une ligne, interprétation, jusqu'à EOF.
fn repl(vm: &mut Vm) -> u8 {
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {
                // Les erreurs sont affichées puis la boucle continue.
                if let Err(err) = vm.interpret(&line) {
                    report(&err);
                }
            }
            Err(err) => {
                eprintln!("stdin: {err}");
                return EX_IOERR;
            }
        }
    }
    0
}

/// Affiche l'erreur sur stderr et retourne le code de sortie associé.
fn report(err: &InterpretError) -> u8 {
    eprintln!("{err}");
    match err {
        InterpretError::Compile(_) => EX_DATAERR,
        InterpretError::Runtime(_) => EX_SOFTWARE,
    }
}

/* ------------------------------- Tests ------------------------------- */
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_exits_74() {
        let mut vm = Vm::new();
        assert_eq!(run_file(&mut vm, Path::new("/nonexistent/x.brm")), EX_IOERR);
    }

    #[test]
    fn compile_error_exits_65() {
        let mut vm = Vm::new();
        let err = vm.interpret("print ;").expect_err("erreur attendue");
        assert_eq!(report(&err), EX_DATAERR);
    }

    #[test]
    fn runtime_error_exits_70() {
        let mut vm = Vm::new();
        let err = vm.interpret("print a;").expect_err("erreur attendue");
        assert_eq!(report(&err), EX_SOFTWARE);
    }

    #[test]
    fn extra_arguments_are_a_usage_error() {
        let err = Cli::try_parse_from(["brume", "a.brm", "b.brm"]).expect_err("usage");
        assert!(err.use_stderr());
    }

    #[test]
    fn script_file_runs_to_completion() {
        let dir = std::env::temp_dir();
        let path = dir.join("brume_cli_smoke.brm");
        fs::write(&path, "var x = 21; x = x * 2;\n").expect("écriture fichier test");
        let mut vm = Vm::new();
        assert_eq!(run_file(&mut vm, &path), 0);
        let _ = fs::remove_file(&path);
    }
}
