//! brume-compiler — Compilateur one-pass du langage brume
//!
//! Source → tokens ([`scanner`]) → bytecode ([`compiler`]), sans AST
//! intermédiaire : le parseur Pratt émet les instructions au fil du parsing
//! dans le chunk de la fonction en cours. Le résultat est la fonction
//! top-level (`<script>`) possédant son chunk, prête à être chargée en
//! frame 0 de la VM.
//!
//! Les chaînes (littéraux, noms de globales, noms de fonctions) sont
//! internées dans la table passée par l'appelant — la même que celle de la
//! VM, pour que l'identité `Rc` vaille l'égalité de contenu jusqu'au
//! runtime.

pub mod compiler;
pub mod diagnostics;
pub mod scanner;

pub use diagnostics::{CompileErrors, Diagnostic, ErrorLocation};

use brume_core::{ObjFunction, Strings};

/// Compile `source` en fonction top-level. Les erreurs sont accumulées
/// (panic mode + resynchronisation) : une passe rapporte autant d'erreurs
/// distinctes que possible, et la compilation échoue si au moins une a été
/// émise.
pub fn compile(source: &str, strings: &mut Strings) -> Result<ObjFunction, CompileErrors> {
    compiler::Parser::new(source, strings).compile()
}
