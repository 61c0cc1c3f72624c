//! Scénarios bout-en-bout : source → sortie capturée (ou erreur runtime
//! canonique). Chaque exécution vérifie aussi la neutralité de pile.

use brume_vm::{InterpretError, RuntimeError, Vm, VmOptions};

fn run_ok(source: &str) -> String {
    let mut vm = Vm::with_options(VmOptions::default().with_capture_output(true));
    if let Err(err) = vm.interpret(source) {
        panic!("exécution attendue réussie, reçu :\n{err}");
    }
    assert_eq!(vm.stack_depth(), 0, "pile non neutre après exécution");
    vm.take_output()
}

fn run_runtime_err(source: &str) -> RuntimeError {
    let mut vm = Vm::with_options(VmOptions::default().with_capture_output(true));
    match vm.interpret(source) {
        Err(InterpretError::Runtime(err)) => {
            assert_eq!(vm.stack_depth(), 0, "pile non remise à zéro après erreur");
            err
        }
        Err(other) => panic!("erreur runtime attendue, reçu :\n{other}"),
        Ok(()) => panic!("erreur runtime attendue, exécution réussie"),
    }
}

/* ───────────────────────── Scénarios nominaux ───────────────────────── */

#[test]
fn arithmetic_precedence() {
    assert_eq!(run_ok("print 1 + 2 * 3;"), "7\n");
}

#[test]
fn string_concatenation() {
    assert_eq!(run_ok("var a = \"hi \"; var b = \"there\"; print a + b;"), "hi there\n");
}

#[test]
fn while_loop_counts() {
    assert_eq!(run_ok("var x = 0; while (x < 3) { print x; x = x + 1; }"), "0\n1\n2\n");
}

#[test]
fn recursive_fibonacci() {
    let src = "fun fib(n) { if (n < 2) return n; return fib(n-1) + fib(n-2); } print fib(10);";
    assert_eq!(run_ok(src), "55\n");
}

#[test]
fn block_scoping_shadows_then_restores() {
    assert_eq!(run_ok("var a = 1; { var a = 2; print a; } print a;"), "2\n1\n");
}

#[test]
fn clock_native_returns_a_number() {
    assert_eq!(run_ok("print clock() >= 0;"), "true\n");
}

#[test]
fn for_loop_desugars_and_runs() {
    assert_eq!(run_ok("for (var i = 0; i < 3; i = i + 1) print i;"), "0\n1\n2\n");
}

#[test]
fn logical_operators_short_circuit() {
    assert_eq!(run_ok("print true and 1;"), "1\n");
    assert_eq!(run_ok("print nil and 1;"), "nil\n");
    assert_eq!(run_ok("print false or \"y\";"), "y\n");
    assert_eq!(run_ok("print \"x\" or 1;"), "x\n");
}

#[test]
fn comparisons_and_equality() {
    assert_eq!(run_ok("print 1 < 2; print 2 <= 2; print 3 > 4; print 4 >= 4;"), "true\ntrue\nfalse\ntrue\n");
    assert_eq!(run_ok("print 1 == 1; print 1 != 2; print nil == false;"), "true\ntrue\nfalse\n");
}

#[test]
fn truthiness_of_zero_and_empty_string() {
    assert_eq!(run_ok("print !0; print !\"\"; print !nil; print !false;"), "false\nfalse\ntrue\ntrue\n");
}

#[test]
fn functions_return_values_and_default_to_nil() {
    assert_eq!(run_ok("fun add(a, b) { return a + b; } print add(1, 2);"), "3\n");
    assert_eq!(run_ok("fun noop() {} print noop();"), "nil\n");
    assert_eq!(run_ok("fun f() { return; } print f();"), "nil\n");
}

#[test]
fn functions_print_their_names() {
    assert_eq!(run_ok("fun f() {} print f;"), "<fn f>\n");
    assert_eq!(run_ok("print clock;"), "<native fn>\n");
}

#[test]
fn interned_concatenation_equals_literal() {
    // L'interning rend l'égalité d'identité équivalente à l'égalité de
    // contenu, y compris pour une chaîne fabriquée au runtime.
    assert_eq!(run_ok("print \"a\" + \"b\" == \"ab\";"), "true\n");
}

#[test]
fn global_redefinition_overwrites() {
    assert_eq!(run_ok("var a = 1; var a = 2; print a;"), "2\n");
}

#[test]
fn nested_calls_restore_frames() {
    let src = "
        fun double(n) { return n * 2; }
        fun quad(n) { return double(double(n)); }
        print quad(4);
    ";
    assert_eq!(run_ok(src), "16\n");
}

#[test]
fn if_without_else() {
    assert_eq!(run_ok("if (1 < 2) print \"oui\";"), "oui\n");
    assert_eq!(run_ok("if (2 < 1) print \"non\";"), "");
}

#[test]
fn multiline_string_literal() {
    assert_eq!(run_ok("print \"a\nb\";"), "a\nb\n");
}

/* ───────────────────────── Fautes runtime canoniques ───────────────────────── */

#[test]
fn undefined_global_read() {
    let err = run_runtime_err("print a;");
    assert!(err.message.contains("Undefined variable 'a'"), "message : {}", err.message);
    assert!(err.trace.contains("in script"), "trace : {}", err.trace);
}

#[test]
fn undefined_global_assignment() {
    let err = run_runtime_err("b = 1;");
    assert!(err.message.contains("Undefined variable 'b'"));
}

#[test]
fn adding_number_and_string_fails() {
    let err = run_runtime_err("1 + \"x\";");
    assert!(err.message.contains("Operands must be numbers"));
}

#[test]
fn negating_a_string_fails() {
    let err = run_runtime_err("print -\"s\";");
    assert!(err.message.contains("Operand must be a number."));
}

#[test]
fn arity_mismatch() {
    let err = run_runtime_err("fun f(a) {} f(1, 2);");
    assert_eq!(err.message, "Expected 1 arguments but got 2.");
    // Le frame fautif est le script (l'appel n'a pas abouti).
    assert!(err.trace.contains("in script"));
}

#[test]
fn calling_a_non_callable() {
    let err = run_runtime_err("var x = 1; x();");
    assert_eq!(err.message, "Can only call functions and classes.");
}

#[test]
fn unbounded_recursion_overflows_frames() {
    let err = run_runtime_err("fun f() { f(); } f();");
    assert_eq!(err.message, "Stack overflow.");
    // Trace la plus récente d'abord, avec le nom de la fonction fautive.
    assert!(err.trace.starts_with("[line 1] in f()"), "trace : {}", err.trace);
    assert!(err.trace.ends_with("in script"), "trace : {}", err.trace);
}

#[test]
fn runtime_error_deep_in_call_chain_names_each_frame() {
    let src = "
fun c() { return 1 + nil; }
fun b() { return c(); }
fun a() { return b(); }
a();
";
    let err = run_runtime_err(src);
    assert!(err.message.contains("Operands must be numbers"));
    let lines: Vec<&str> = err.trace.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].contains("in c()"));
    assert!(lines[1].contains("in b()"));
    assert!(lines[2].contains("in a()"));
    assert!(lines[3].contains("in script"));
}
