// cpplox-scanner - Lexical scanner for the Lox programming language
// Copyright (c) 2026 cpplox contributors. MIT licensed.

//! Lexical analysis for Lox source code.
//!
//! Converts a borrowed source string into a stream of [`Token`]s with
//! source locations. The bytecode compiler in `cpplox-vm` drives the
//! scanner one token at a time.

pub mod scanner;
pub mod token;

pub use scanner::Scanner;
pub use token::{SourceLocation, Token, TokenType};
