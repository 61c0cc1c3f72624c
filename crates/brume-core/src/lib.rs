//! brume-core — Cœur du langage brume
//!
//! Contient tout ce qu'il faut pour représenter et inspecter le bytecode
//! brume, sans dépendre du compilateur ni de la VM.
//!
//! ## Modules
//! - `value`  : valeurs taguées + objets tas (chaînes, fonctions, natives,
//!   fermetures)
//! - `chunk`  : flux d'octets, pool de constantes, table de lignes RLE
//! - `op`     : jeu d'instructions (un opcode = un octet)
//! - `table`  : tables à adressage ouvert (globales, interning)
//! - `disasm` : désassembleur lisible (humain)

pub mod chunk;
pub mod disasm;
pub mod op;
pub mod table;
pub mod value;

// ---------- Reexports de confort ----------
pub use chunk::{Chunk, LineStart, TooManyConstants};
pub use op::{Op, UnknownOpcode};
pub use table::{Strings, Table};
pub use value::{
    values_equal, NativeFn, Obj, ObjClosure, ObjFunction, ObjNative, ObjStr, Value,
};

/// Version du crate (lisible, via Cargo).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
