// cpplox-vm - Common test utilities
// Copyright (c) 2026 cpplox contributors. MIT licensed.

//! Shared helpers for cpplox-vm integration tests.
//!
//! # Usage
//!
//! In your test file, add:
//! ```ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use cpplox_vm::{InterpretError, Vm, VmOptions};

/// Everything a program run produced.
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    pub result: Result<(), InterpretError>,
}

/// Interpret `source` on a fresh VM, capturing both output streams.
pub fn run(source: &str) -> RunResult {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    let result = {
        let mut vm = Vm::new(VmOptions {
            stdout: Box::new(&mut stdout),
            stderr: Box::new(&mut stderr),
        });
        vm.interpret(source)
    };

    RunResult {
        stdout: String::from_utf8(stdout).expect("stdout is UTF-8"),
        stderr: String::from_utf8(stderr).expect("stderr is UTF-8"),
        result,
    }
}

/// Assert that `source` runs cleanly and prints exactly `expected`,
/// one element per output line.
pub fn assert_prints(source: &str, expected: &[&str]) {
    let out = run(source);
    assert!(
        out.result.is_ok(),
        "program failed: {:?}\nstderr:\n{}",
        out.result,
        out.stderr
    );
    let lines: Vec<&str> = out.stdout.lines().collect();
    assert_eq!(lines, expected, "stderr:\n{}", out.stderr);
}

/// Assert that `source` fails at runtime and the diagnostic contains
/// `message`.
pub fn assert_runtime_error(source: &str, message: &str) {
    let out = run(source);
    assert!(
        matches!(out.result, Err(InterpretError::Runtime(_))),
        "expected runtime error, got {:?}\nstdout:\n{}\nstderr:\n{}",
        out.result,
        out.stdout,
        out.stderr
    );
    assert!(
        out.stderr.contains(message),
        "stderr does not mention {:?}:\n{}",
        message,
        out.stderr
    );
}

/// Assert that `source` fails to compile and the diagnostic contains
/// `message`.
pub fn assert_compile_error(source: &str, message: &str) {
    let out = run(source);
    assert!(
        matches!(out.result, Err(InterpretError::Compile(_))),
        "expected compile error, got {:?}\nstdout:\n{}\nstderr:\n{}",
        out.result,
        out.stdout,
        out.stderr
    );
    assert!(
        out.stderr.contains(message),
        "stderr does not mention {:?}:\n{}",
        message,
        out.stderr
    );
}
