// cpplox-vm - Bytecode compiler and virtual machine for the Lox programming language
// Copyright (c) 2026 cpplox contributors. MIT licensed.

//! Bytecode compiler and stack-based virtual machine for Lox.
//!
//! Source text is lowered in a single pass straight to bytecode (no AST)
//! and executed on a value-stack VM with call frames, closures, classes,
//! and a precise mark-and-sweep garbage collector.
//!
//! ```no_run
//! use cpplox_vm::{Vm, VmOptions};
//!
//! let mut vm = Vm::new(VmOptions::default());
//! vm.interpret("print 1 + 2;").unwrap();
//! ```

pub mod chunk;
mod compiler;
pub mod debug;
pub mod heap;
pub mod object;
pub mod opcode;
pub mod value;
pub mod vm;

pub use object::ObjRef;
pub use value::Value;
pub use vm::{RuntimeError, Vm, VmOptions};

/// Compilation failure. Diagnostics were already written to the VM's
/// stderr sink as the errors were found.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("compile error")]
pub struct CompileError;

/// Failure from [`Vm::interpret`]: either phase can fail, and each maps
/// to its own process exit code in the CLI.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
