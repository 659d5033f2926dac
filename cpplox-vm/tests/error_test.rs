// cpplox-vm - Compile and runtime error tests
// Copyright (c) 2026 cpplox contributors. MIT licensed.

mod common;

use common::{assert_compile_error, assert_runtime_error, run};

// =============================================================================
// Runtime errors
// =============================================================================

#[test]
fn test_add_type_mismatch() {
    assert_runtime_error(
        "var x; print x + 1;",
        "Operands must be two numbers or two strings.",
    );
    assert_runtime_error(
        "print \"s\" + 1;",
        "Operands must be two numbers or two strings.",
    );
}

#[test]
fn test_arithmetic_requires_numbers() {
    assert_runtime_error("print 1 - \"a\";", "Operands must be numbers.");
    assert_runtime_error("print \"a\" * 2;", "Operands must be numbers.");
    assert_runtime_error("print 1 < \"a\";", "Operands must be numbers.");
    assert_runtime_error("print -\"a\";", "Operand must be a number.");
}

#[test]
fn test_undefined_variable() {
    assert_runtime_error("print missing;", "Undefined variable 'missing'");
    assert_runtime_error("missing = 1;", "Undefined variable 'missing'");
}

#[test]
fn test_calling_non_callable() {
    assert_runtime_error("var x = 1; x();", "Can only call functions and classes.");
    assert_runtime_error("\"text\"();", "Can only call functions and classes.");
}

#[test]
fn test_arity_mismatch() {
    assert_runtime_error("fun f(a) {} f();", "Expected 1 arguments but got 0.");
    assert_runtime_error("fun f() {} f(1, 2);", "Expected 0 arguments but got 2.");
    assert_runtime_error("clock(1);", "Expected 0 arguments but got 1.");
    assert_runtime_error(
        "class C {} C(1);",
        "Expected 0 arguments but got 1.",
    );
}

#[test]
fn test_stack_overflow_after_64_frames() {
    assert_runtime_error("fun f() { f(); } f();", "Stack overflow.");
}

#[test]
fn test_property_access_on_non_instance() {
    assert_runtime_error("var n = 3; print n.field;", "Only instances have properties.");
    assert_runtime_error("var n = 3; n.field = 1;", "Only instances have properties.");
    assert_runtime_error("\"s\".method();", "Only instances have methods.");
}

#[test]
fn test_undefined_property() {
    assert_runtime_error(
        "class C {} var c = C(); print c.missing;",
        "Undefined property 'missing'.",
    );
    assert_runtime_error(
        "class C {} C().missing();",
        "Undefined property 'missing'.",
    );
}

#[test]
fn test_superclass_must_be_a_class() {
    assert_runtime_error(
        "var NotClass = 1; class Sub < NotClass {}",
        "Superclass must be a class.",
    );
}

#[test]
fn test_stack_trace_names_frames_deepest_first() {
    let out = run(
        "fun inner() { return 1 + \"x\"; }
         fun outer() { return inner(); }
         outer();",
    );
    assert!(out.result.is_err());

    let trace: Vec<&str> = out.stderr.lines().collect();
    assert_eq!(trace[0], "Operands must be two numbers or two strings.");
    assert!(trace[1].contains("in inner()"), "trace: {:?}", trace);
    assert!(trace[2].contains("in outer()"), "trace: {:?}", trace);
    assert!(trace[3].contains("in script"), "trace: {:?}", trace);
}

// =============================================================================
// Compile errors
// =============================================================================

#[test]
fn test_return_at_top_level() {
    assert_compile_error("return 1;", "Can't return from top-level code.");
}

#[test]
fn test_invalid_assignment_target() {
    assert_compile_error("1 + 2 = 3;", "Invalid assignment target.");
    assert_compile_error("var a; var b; a + b = 1;", "Invalid assignment target.");
}

#[test]
fn test_expect_expression() {
    assert_compile_error("print + ;", "Expect expression.");
}

#[test]
fn test_missing_semicolon() {
    assert_compile_error("print 1", "Expect ';' after value.");
}

#[test]
fn test_scanner_errors_are_reported() {
    assert_compile_error("var s = \"unterminated;", "Unterminated string.");
    assert_compile_error("var x = 1 @ 2;", "Unexpected character.");
}

#[test]
fn test_this_and_super_placement() {
    assert_compile_error("print this;", "Can't use 'this' outside of a class.");
    assert_compile_error(
        "fun f() { return this; }",
        "Can't use 'this' outside of a class.",
    );
    assert_compile_error("print super.m;", "Can't use 'super' outside of a class.");
    assert_compile_error(
        "class C { m() { return super.m(); } }",
        "Can't use 'super' in a class with no superclass.",
    );
}

#[test]
fn test_duplicate_local_declaration() {
    assert_compile_error(
        "{ var a = 1; var a = 2; }",
        "Already a variable with this name in this scope.",
    );
}

#[test]
fn test_local_read_in_own_initializer() {
    assert_compile_error(
        "{ var a = a; }",
        "Can't read local variable in its own initializer.",
    );
}

#[test]
fn test_class_cannot_inherit_from_itself() {
    assert_compile_error("class A < A {}", "A class can't inherit from itself.");
}

#[test]
fn test_initializer_cannot_return_a_value() {
    assert_compile_error(
        "class C { init() { return 1; } }",
        "Can't return a value from initializer.",
    );
}

#[test]
fn test_too_many_locals() {
    let mut source = String::from("{");
    for i in 0..256 {
        source.push_str(&format!("var v{} = 0;", i));
    }
    source.push('}');
    assert_compile_error(&source, "Too many local variables in function.");
}

#[test]
fn test_too_many_constants() {
    let mut source = String::new();
    for i in 0..300 {
        source.push_str(&format!("print {};", i));
    }
    assert_compile_error(&source, "Too many constants in one chunk.");
}

#[test]
fn test_diagnostic_format_includes_location_and_lexeme() {
    let out = run("var 1 = 2;");
    assert!(out.result.is_err());
    assert!(
        out.stderr.contains("[1:5] Error at '1': Expect variable name."),
        "stderr:\n{}",
        out.stderr
    );
}

#[test]
fn test_error_at_end_of_input() {
    let out = run("print 1");
    assert!(
        out.stderr.contains("Error at end"),
        "stderr:\n{}",
        out.stderr
    );
}

#[test]
fn test_panic_mode_recovers_at_statement_boundary() {
    // Both statements are broken; synchronisation lets the compiler
    // report each one.
    let out = run("var = 1; print + ;");
    assert!(out.result.is_err());
    assert!(out.stderr.contains("Expect variable name."), "stderr:\n{}", out.stderr);
    assert!(out.stderr.contains("Expect expression."), "stderr:\n{}", out.stderr);
}

#[test]
fn test_nothing_runs_when_compilation_fails() {
    let out = run("print \"before\"; var = broken;");
    assert!(out.result.is_err());
    assert_eq!(out.stdout, "", "no code should have executed");
}
