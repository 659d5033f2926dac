// cpplox - A Lox bytecode interpreter written in Rust
// Copyright (c) 2026 cpplox contributors. MIT licensed.

use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::process;

use cpplox_vm::{InterpretError, Vm, VmOptions};

// Exit codes from sysexits(3).
const EX_USAGE: i32 = 64;
const EX_DATAERR: i32 = 65;
const EX_SOFTWARE: i32 = 70;
const EX_IOERR: i32 = 74;

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    let code = match args.len() {
        0 => run_repl(),
        1 => run_file(&args[0]),
        _ => {
            eprintln!("Usage: cpplox [path]");
            EX_USAGE
        }
    };
    process::exit(code);
}

/// Interpret a file once and map the outcome to an exit code.
fn run_file(path: &str) -> i32 {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("Error reading '{}': {}", path, error);
            return EX_IOERR;
        }
    };

    let mut vm = Vm::new(VmOptions::default());
    match vm.interpret(&source) {
        Ok(()) => 0,
        Err(InterpretError::Compile(_)) => EX_DATAERR,
        Err(InterpretError::Runtime(_)) => EX_SOFTWARE,
    }
}

/// Read-eval-print loop. One VM is reused for every line so globals
/// persist; errors are reported but do not end the session.
fn run_repl() -> i32 {
    let mut vm = Vm::new(VmOptions::default());
    let stdin = io::stdin();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!("exit");
                return 0;
            }
            Ok(_) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                // Compile and runtime errors already printed their
                // diagnostics; the REPL just keeps going.
                let _ = vm.interpret(line);
            }
            Err(error) => {
                eprintln!("Error reading input: {}", error);
                return EX_IOERR;
            }
        }
    }
}
