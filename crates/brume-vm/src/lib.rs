//! brume-vm — Machine virtuelle d'exécution pour le langage brume
//!
//! Une VM à pile sans registres : une pile de valeurs extensible, un
//! tableau de frames d'appel borné à 64, une table de globales et la table
//! d'interning des chaînes. La boucle de dispatch lit un octet, décode,
//! exécute ; `Call`/`Return` poussent et dépilent des frames dont le slot
//! de base pointe dans la pile de valeurs (slot 0 = la valeur appelée,
//! slots 1..argc = les arguments).
//!
//! Invariant central : entre deux instructions, la profondeur de pile est
//! exactement celle prédite par le compilateur — chaque instruction
//! complète est neutre, chaque expression laisse une valeur.
//!
//! Les erreurs runtime portent le message canonique plus une trace de pile
//! (frame le plus récent d'abord) ; la pile est remise à zéro et
//! [`Vm::interpret`] remonte `Runtime`. Aucune exception rattrapable côté
//! langage.

use std::rc::Rc;

use brume_core::{
    disasm, values_equal, Obj, ObjClosure, ObjNative, Op, Strings, Table, Value,
};
use brume_compiler::{compile, CompileErrors};

/// Profondeur maximale de frames d'appel.
pub const FRAMES_MAX: usize = 64;

/// Résultat de [`Vm::interpret`] : compilation ou exécution en échec.
#[derive(Debug, thiserror::Error)]
pub enum InterpretError {
    #[error("{0}")]
    Compile(#[from] CompileErrors),
    #[error("{0}")]
    Runtime(#[from] RuntimeError),
}

/// Erreur d'exécution rendue : message canonique + trace de pile
/// (frame le plus récent d'abord).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}\n{trace}")]
pub struct RuntimeError {
    pub message: String,
    pub trace: String,
}

/// Fautes internes de la boucle de dispatch. Les variantes `Corrupt` ne
/// devraient jamais se produire sur du bytecode émis par le compilateur ;
/// elles remplacent ce qui serait un comportement indéfini en C.
#[derive(Debug, thiserror::Error)]
enum Fault {
    #[error("Operands must be numbers.")]
    OperandsMustBeNumbers,
    #[error("Operand must be a number.")]
    OperandMustBeNumber,
    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),
    #[error("Expected {arity} arguments but got {argc}.")]
    ArityMismatch { arity: u8, argc: u8 },
    #[error("Stack overflow.")]
    StackOverflow,
    #[error("Can only call functions and classes.")]
    NotCallable,
    #[error("corrupted bytecode: {0}")]
    Corrupt(&'static str),
}

/// Options d'exécution, à la construction de la VM.
#[derive(Debug, Clone, Copy, Default)]
pub struct VmOptions {
    /// Trace chaque instruction exécutée via `log::trace!`.
    pub trace: bool,
    /// Capture `print` dans un buffer interne au lieu de stdout (tests).
    pub capture_output: bool,
}

impl VmOptions {
    pub fn with_trace(mut self, on: bool) -> Self {
        self.trace = on;
        self
    }

    pub fn with_capture_output(mut self, on: bool) -> Self {
        self.capture_output = on;
        self
    }
}

/// Frame d'appel : fermeture exécutée, ip dans son chunk, slot de base.
struct CallFrame {
    closure: Rc<ObjClosure>,
    ip: usize,
    base: usize,
}

/// La machine virtuelle. Conserve globales et chaînes internées d'un
/// `interpret` à l'autre (le REPL en dépend).
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    strings: Strings,
    options: VmOptions,
    output: String,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    pub fn with_options(options: VmOptions) -> Self {
        let mut vm = Self {
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            strings: Strings::new(),
            options,
            output: String::new(),
        };
        vm.define_native("clock", clock_native);
        vm
    }

    /// Compile puis exécute `source`. Les globales survivent à l'appel.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = Rc::new(compile(source, &mut self.strings)?);
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(target: "brume_vm", "\n{}", disasm::disassemble(&function.chunk, "<script>"));
        }

        // La fonction script passe par la pile le temps de construire sa
        // fermeture (racine pour un futur GC), puis la fermeture la remplace.
        self.push(Value::from(Rc::clone(&function)));
        let closure = Rc::new(ObjClosure::new(function));
        let _ = self.stack.pop();
        self.push(Value::from(Rc::clone(&closure)));

        let outcome = self
            .call_closure(closure, 0)
            .and_then(|()| self.run());
        outcome.map_err(|fault| InterpretError::Runtime(self.runtime_error(&fault)))
    }

    /// Installe une fonction native sous `name` dans les globales.
    pub fn define_native(&mut self, name: &str, function: brume_core::NativeFn) {
        let name = self.strings.copy_string(name);
        let native = Rc::new(ObjNative { name: Rc::clone(&name), function });
        // Garde transitoire sur la pile pendant l'insertion : racines d'un
        // futur GC le temps que la table prenne ses références.
        self.push(Value::from(Rc::clone(&name)));
        self.push(Value::Obj(Obj::Native(Rc::clone(&native))));
        self.globals.set(name, Value::Obj(Obj::Native(native)));
        let _ = self.stack.pop();
        let _ = self.stack.pop();
    }

    /// Buffer de sortie capturée (vidé à la lecture).
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    /// Profondeur de pile courante (tests de neutralité).
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /* ───────────────────────── Boucle de dispatch ───────────────────────── */

    fn run(&mut self) -> Result<(), Fault> {
        loop {
            if self.options.trace {
                self.trace_instruction();
            }
            let byte = self.read_byte()?;
            let op = Op::try_from(byte).map_err(|_| Fault::Corrupt("unknown opcode"))?;

            match op {
                Op::Constant => {
                    let index = usize::from(self.read_byte()?);
                    let value = self.constant_at(index)?;
                    self.push(value);
                }
                Op::ConstantLong => {
                    let index = self.read_u24()?;
                    let value = self.constant_at(index)?;
                    self.push(value);
                }
                Op::Nil => self.push(Value::Nil),
                Op::True => self.push(Value::Bool(true)),
                Op::False => self.push(Value::Bool(false)),
                Op::Pop => {
                    self.pop()?;
                }

                Op::GetLocal => {
                    let slot = usize::from(self.read_byte()?);
                    let base = self.frame()?.base;
                    let value = self
                        .stack
                        .get(base + slot)
                        .cloned()
                        .ok_or(Fault::Corrupt("local slot out of range"))?;
                    self.push(value);
                }
                Op::SetLocal => {
                    let slot = usize::from(self.read_byte()?);
                    let base = self.frame()?.base;
                    let value = self.peek(0)?.clone();
                    let cell = self
                        .stack
                        .get_mut(base + slot)
                        .ok_or(Fault::Corrupt("local slot out of range"))?;
                    *cell = value;
                }

                Op::GetGlobal => {
                    let name = self.read_string()?;
                    let value = match self.globals.get(&name) {
                        Some(value) => value.clone(),
                        None => return Err(Fault::UndefinedVariable(name.chars.to_string())),
                    };
                    self.push(value);
                }
                Op::DefineGlobal => {
                    let name = self.read_string()?;
                    let value = self.peek(0)?.clone();
                    self.globals.set(name, value);
                    self.pop()?;
                }
                Op::SetGlobal => {
                    let name = self.read_string()?;
                    let value = self.peek(0)?.clone();
                    if self.globals.set(Rc::clone(&name), value) {
                        // L'affectation n'a pas le droit de créer la globale.
                        self.globals.delete(&name);
                        return Err(Fault::UndefinedVariable(name.chars.to_string()));
                    }
                }

                Op::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Bool(values_equal(&a, &b)));
                }
                Op::Greater => self.binary_op(|a, b| Value::Bool(a > b))?,
                Op::Less => self.binary_op(|a, b| Value::Bool(a < b))?,

                Op::Add => {
                    let both_strings = matches!(
                        (self.peek(0)?, self.peek(1)?),
                        (Value::Obj(Obj::Str(_)), Value::Obj(Obj::Str(_)))
                    );
                    if both_strings {
                        self.concatenate()?;
                    } else {
                        self.binary_op(|a, b| Value::Number(a + b))?;
                    }
                }
                Op::Subtract => self.binary_op(|a, b| Value::Number(a - b))?,
                Op::Multiply => self.binary_op(|a, b| Value::Number(a * b))?,
                Op::Divide => self.binary_op(|a, b| Value::Number(a / b))?,

                Op::Not => {
                    let value = self.pop()?;
                    self.push(Value::Bool(value.is_falsey()));
                }
                Op::Negate => match self.pop()?.as_number() {
                    Some(n) => self.push(Value::Number(-n)),
                    None => return Err(Fault::OperandMustBeNumber),
                },

                Op::Print => {
                    let value = self.pop()?;
                    self.print_value(&value);
                }

                Op::Jump => {
                    let offset = usize::from(self.read_u16()?);
                    self.frame_mut()?.ip += offset;
                }
                Op::JumpIfFalse => {
                    let offset = usize::from(self.read_u16()?);
                    if self.peek(0)?.is_falsey() {
                        self.frame_mut()?.ip += offset;
                    }
                }
                Op::Loop => {
                    let offset = usize::from(self.read_u16()?);
                    let frame = self.frame_mut()?;
                    frame.ip = frame
                        .ip
                        .checked_sub(offset)
                        .ok_or(Fault::Corrupt("loop target before chunk start"))?;
                }

                Op::Call => {
                    let argc = self.read_byte()?;
                    let callee = self.peek(usize::from(argc))?.clone();
                    self.call_value(callee, argc)?;
                }
                Op::Closure => {
                    let index = usize::from(self.read_byte()?);
                    match self.constant_at(index)? {
                        Value::Obj(Obj::Function(function)) => {
                            let closure = Rc::new(ObjClosure::new(function));
                            self.push(Value::from(closure));
                        }
                        _ => return Err(Fault::Corrupt("closure operand is not a function")),
                    }
                }
                Op::Return => {
                    let result = self.pop()?;
                    let frame = self
                        .frames
                        .pop()
                        .ok_or(Fault::Corrupt("return without frame"))?;
                    if self.frames.is_empty() {
                        // Dépile la fermeture script ; fin d'exécution.
                        self.pop()?;
                        return Ok(());
                    }
                    self.stack.truncate(frame.base);
                    self.push(result);
                }
            }
        }
    }

    /* ───────────────────────── Protocole d'appel ───────────────────────── */

    fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), Fault> {
        match callee {
            Value::Obj(Obj::Closure(closure)) => self.call_closure(closure, argc),
            // Une fonction nue s'enveloppe à la volée.
            Value::Obj(Obj::Function(function)) => {
                self.call_closure(Rc::new(ObjClosure::new(function)), argc)
            }
            Value::Obj(Obj::Native(native)) => {
                let argc = usize::from(argc);
                let args_start = self
                    .stack
                    .len()
                    .checked_sub(argc)
                    .ok_or(Fault::Corrupt("native call underflows the stack"))?;
                let result = (native.function)(&self.stack[args_start..]);
                // Retire arguments + valeur appelée, pousse le résultat.
                let callee_slot = args_start
                    .checked_sub(1)
                    .ok_or(Fault::Corrupt("native call underflows the stack"))?;
                self.stack.truncate(callee_slot);
                self.push(result);
                Ok(())
            }
            _ => Err(Fault::NotCallable),
        }
    }

    fn call_closure(&mut self, closure: Rc<ObjClosure>, argc: u8) -> Result<(), Fault> {
        if argc != closure.function.arity {
            return Err(Fault::ArityMismatch { arity: closure.function.arity, argc });
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(Fault::StackOverflow);
        }
        // base pointe sur la valeur appelée : slot 0 du callee.
        let base = self
            .stack
            .len()
            .checked_sub(usize::from(argc) + 1)
            .ok_or(Fault::Corrupt("call underflows the stack"))?;
        self.frames.push(CallFrame { closure, ip: 0, base });
        Ok(())
    }

    /* ───────────────────────── Accès pile & code ───────────────────────── */

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, Fault> {
        self.stack.pop().ok_or(Fault::Corrupt("stack underflow"))
    }

    fn peek(&self, distance: usize) -> Result<&Value, Fault> {
        let index = self
            .stack
            .len()
            .checked_sub(1 + distance)
            .ok_or(Fault::Corrupt("stack underflow"))?;
        self.stack.get(index).ok_or(Fault::Corrupt("stack underflow"))
    }

    fn frame(&self) -> Result<&CallFrame, Fault> {
        self.frames.last().ok_or(Fault::Corrupt("no active frame"))
    }

    fn frame_mut(&mut self) -> Result<&mut CallFrame, Fault> {
        self.frames.last_mut().ok_or(Fault::Corrupt("no active frame"))
    }

    fn read_byte(&mut self) -> Result<u8, Fault> {
        let frame = self.frames.last_mut().ok_or(Fault::Corrupt("no active frame"))?;
        let byte = frame
            .closure
            .function
            .chunk
            .code
            .get(frame.ip)
            .copied()
            .ok_or(Fault::Corrupt("truncated instruction stream"))?;
        frame.ip += 1;
        Ok(byte)
    }

    /// Opérande de saut : 16 bits big-endian.
    fn read_u16(&mut self) -> Result<u16, Fault> {
        let hi = self.read_byte()?;
        let lo = self.read_byte()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    /// Opérande de `const.l` : 24 bits little-endian.
    fn read_u24(&mut self) -> Result<usize, Fault> {
        let b0 = usize::from(self.read_byte()?);
        let b1 = usize::from(self.read_byte()?);
        let b2 = usize::from(self.read_byte()?);
        Ok(b0 | (b1 << 8) | (b2 << 16))
    }

    fn constant_at(&self, index: usize) -> Result<Value, Fault> {
        self.frame()?
            .closure
            .function
            .chunk
            .constants
            .get(index)
            .cloned()
            .ok_or(Fault::Corrupt("constant index out of range"))
    }

    /// Lit un opérande constant qui doit être un nom (chaîne internée).
    fn read_string(&mut self) -> Result<Rc<brume_core::ObjStr>, Fault> {
        let index = usize::from(self.read_byte()?);
        match self.constant_at(index)? {
            Value::Obj(Obj::Str(s)) => Ok(s),
            _ => Err(Fault::Corrupt("name constant is not a string")),
        }
    }

    /* ───────────────────────── Opérations ───────────────────────── */

    /// Opération binaire numérique : dépile b puis a, pousse `apply(a, b)`.
    fn binary_op(&mut self, apply: fn(f64, f64) -> Value) -> Result<(), Fault> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Number(a), Value::Number(b)) => {
                self.push(apply(a, b));
                Ok(())
            }
            _ => Err(Fault::OperandsMustBeNumbers),
        }
    }

    /// `+` sur deux chaînes : jointure puis ré-interning (`take_string`
    /// rend la chaîne résidente si le contenu existe déjà).
    fn concatenate(&mut self) -> Result<(), Fault> {
        let b = self.pop()?;
        let a = self.pop()?;
        let (Some(a), Some(b)) = (a.as_str(), b.as_str()) else {
            return Err(Fault::Corrupt("concatenate expects two strings"));
        };
        let mut joined = String::with_capacity(a.chars.len() + b.chars.len());
        joined.push_str(&a.chars);
        joined.push_str(&b.chars);
        let result = self.strings.take_string(joined);
        self.push(Value::from(result));
        Ok(())
    }

    fn print_value(&mut self, value: &Value) {
        if self.options.capture_output {
            use std::fmt::Write as _;
            let _ = writeln!(self.output, "{value}");
        } else {
            println!("{value}");
        }
    }

    fn trace_instruction(&self) {
        if let Some(frame) = self.frames.last() {
            let chunk = &frame.closure.function.chunk;
            if frame.ip < chunk.count() {
                let (text, _) = disasm::instruction(chunk, frame.ip);
                log::trace!(target: "brume_vm", "{text}");
            }
        }
    }

    /* ───────────────────────── Erreurs runtime ───────────────────────── */

    /// Rend la faute : message + trace (frame le plus récent d'abord), puis
    /// remet pile et frames à zéro.
    fn runtime_error(&mut self, fault: &Fault) -> RuntimeError {
        let mut trace = String::new();
        for frame in self.frames.iter().rev() {
            let function = &frame.closure.function;
            // L'ip est déjà passé sur l'instruction suivante.
            let line = function.chunk.line_of(frame.ip.saturating_sub(1));
            use std::fmt::Write as _;
            match &function.name {
                Some(name) => {
                    let _ = writeln!(trace, "[line {line}] in {}()", name.chars);
                }
                None => {
                    let _ = writeln!(trace, "[line {line}] in script");
                }
            }
        }
        if trace.ends_with('\n') {
            trace.pop();
        }

        self.stack.clear();
        self.frames.clear();

        RuntimeError { message: fault.to_string(), trace }
    }
}

/// Native `clock()` : secondes murales (epoch Unix) en nombre.
fn clock_native(_args: &[Value]) -> Value {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Value::Number(secs)
}

/* ------------------------------- Tests ------------------------------- */
#[cfg(test)]
mod tests {
    use super::*;

    fn capture_vm() -> Vm {
        Vm::with_options(VmOptions::default().with_capture_output(true))
    }

    #[test]
    fn clock_is_installed_as_native() {
        let mut vm = capture_vm();
        vm.interpret("print clock() >= 0;").expect("ok");
        assert_eq!(vm.take_output(), "true\n");
    }

    #[test]
    fn stack_is_neutral_after_each_statement() {
        let mut vm = capture_vm();
        for src in ["var a = 1;", "a = a + 1;", "print a;", "{ var b = 2; print b; }"] {
            vm.interpret(src).expect("ok");
            assert_eq!(vm.stack_depth(), 0, "pile non vide après {src:?}");
        }
        assert_eq!(vm.take_output(), "2\n2\n");
    }

    #[test]
    fn globals_survive_between_interprets() {
        let mut vm = capture_vm();
        vm.interpret("var x = 41;").expect("ok");
        vm.interpret("print x + 1;").expect("ok");
        assert_eq!(vm.take_output(), "42\n");
    }

    #[test]
    fn runtime_error_resets_the_stack() {
        let mut vm = capture_vm();
        let err = vm.interpret("print 1 + nil;").expect_err("erreur attendue");
        assert!(matches!(err, InterpretError::Runtime(_)));
        assert_eq!(vm.stack_depth(), 0);
        // La VM reste utilisable.
        vm.interpret("print 2;").expect("ok");
        assert_eq!(vm.take_output(), "2\n");
    }

    #[test]
    fn compile_errors_surface_as_compile_variant() {
        let mut vm = capture_vm();
        let err = vm.interpret("print ;").expect_err("erreur attendue");
        match err {
            InterpretError::Compile(errors) => {
                assert!(errors.to_string().contains("Expect expression."));
            }
            other => panic!("variante inattendue : {other}"),
        }
    }
}
