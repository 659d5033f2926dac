// cpplox-vm - Bytecode compiler and virtual machine for the Lox programming language
// Copyright (c) 2026 cpplox contributors. MIT licensed.

//! Single-pass bytecode compiler.
//!
//! A Pratt parser that parses, resolves lexical scope (locals and
//! upvalues), and emits bytecode in one pass; there is no AST. The parser
//! drives the scanner one token at a time and writes straight into the
//! chunk of the function being compiled. Forward jumps are emitted with a
//! placeholder offset and back-patched once the target is known.
//!
//! The compiler allocates on the heap (name constants, string literals,
//! finished functions), so it can trigger a collection; while it runs,
//! the chain of in-progress functions and the VM globals are the roots.

use std::collections::HashMap;
use std::io::Write;
use std::mem;
use std::rc::Rc;

use arrayvec::ArrayVec;
use cpplox_scanner::{Scanner, SourceLocation, Token, TokenType};

use crate::chunk::Chunk;
use crate::heap::Heap;
use crate::object::{Obj, ObjFunction, ObjRef};
use crate::opcode::OpCode;
use crate::value::Value;

/// Local slots are addressed by one byte.
const MAX_LOCALS: usize = 256;

/// Upvalue indices are addressed by one byte.
const MAX_UPVALUES: usize = 256;

const MAX_ARITY: usize = 255;

/// Compile Lox source to its top-level function.
///
/// Returns `None` if any error was reported; diagnostics go to `stderr`
/// as they occur. `globals` is only read, as extra GC roots for
/// collections triggered mid-compile (the REPL keeps state there).
pub(crate) fn compile(
    source: &str,
    heap: &mut Heap,
    globals: &HashMap<String, Value>,
    stderr: &mut dyn Write,
) -> Option<ObjRef> {
    let mut parser = Parser::new(source, heap, globals, stderr);
    parser.advance();
    while !parser.matches(TokenType::EndOfFile) {
        parser.declaration();
    }
    let (function, _) = parser.end_compiler();

    if parser.had_error {
        None
    } else {
        Some(function)
    }
}

/// Precedence levels from lowest to highest.
///
/// Binary operators parse their right operand at one level above their
/// own, which makes them left-associative; assignment is handled
/// separately and is right-associative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src, 'ctx> = fn(&mut Parser<'src, 'ctx>, bool);

struct ParseRule<'src, 'ctx> {
    prefix: Option<ParseFn<'src, 'ctx>>,
    infix: Option<ParseFn<'src, 'ctx>>,
    precedence: Precedence,
}

/// The prefix/infix rule table, indexed by token type.
fn rule<'src, 'ctx>(kind: TokenType) -> ParseRule<'src, 'ctx> {
    use TokenType::*;

    let (prefix, infix, precedence): (
        Option<ParseFn<'src, 'ctx>>,
        Option<ParseFn<'src, 'ctx>>,
        Precedence,
    ) = match kind {
        LeftParen => (Some(Parser::grouping), Some(Parser::call), Precedence::Call),
        Dot => (None, Some(Parser::dot), Precedence::Call),
        Minus => (Some(Parser::unary), Some(Parser::binary), Precedence::Term),
        Plus => (None, Some(Parser::binary), Precedence::Term),
        Slash | Star => (None, Some(Parser::binary), Precedence::Factor),
        Bang => (Some(Parser::unary), None, Precedence::None),
        BangEqual | EqualEqual => (None, Some(Parser::binary), Precedence::Equality),
        Greater | GreaterEqual | Less | LessEqual => {
            (None, Some(Parser::binary), Precedence::Comparison)
        }
        Identifier => (Some(Parser::variable), None, Precedence::None),
        String => (Some(Parser::string), None, Precedence::None),
        Number => (Some(Parser::number), None, Precedence::None),
        And => (None, Some(Parser::and), Precedence::And),
        Or => (None, Some(Parser::or), Precedence::Or),
        False | Nil | True => (Some(Parser::literal), None, Precedence::None),
        Super => (Some(Parser::super_), None, Precedence::None),
        This => (Some(Parser::this), None, Precedence::None),
        _ => (None, None, Precedence::None),
    };

    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

/// A local variable during compilation.
///
/// `depth == -1` marks a variable that is declared but not yet defined;
/// reading it at that point is the own-initializer error.
struct Local<'src> {
    name: &'src str,
    depth: i32,
    is_captured: bool,
}

/// A captured variable recorded while compiling a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Upvalue {
    /// Slot in the enclosing function's locals (`is_local`) or index into
    /// the enclosing function's upvalues.
    index: u8,
    is_local: bool,
}

/// Per-function compilation state. The `enclosing` chain is the stack of
/// functions currently being compiled; the innermost one is current.
struct FunctionCompiler<'src> {
    enclosing: Option<Box<FunctionCompiler<'src>>>,
    kind: FunctionKind,
    name: String,
    arity: usize,
    chunk: Chunk,
    locals: ArrayVec<Local<'src>, MAX_LOCALS>,
    upvalues: ArrayVec<Upvalue, MAX_UPVALUES>,
    scope_depth: i32,
}

impl<'src> FunctionCompiler<'src> {
    fn new(name: String, kind: FunctionKind) -> Self {
        let mut locals = ArrayVec::new();
        // Slot 0 belongs to the callee itself, or to `this` in methods.
        locals.push(Local {
            name: match kind {
                FunctionKind::Method | FunctionKind::Initializer => "this",
                _ => "",
            },
            depth: 0,
            is_captured: false,
        });

        Self {
            enclosing: None,
            kind,
            name,
            arity: 0,
            chunk: Chunk::new(),
            locals,
            upvalues: ArrayVec::new(),
            scope_depth: 0,
        }
    }

    fn finish(self) -> (ObjFunction, ArrayVec<Upvalue, MAX_UPVALUES>) {
        let function = ObjFunction {
            name: self.name,
            arity: self.arity.min(MAX_ARITY) as u8,
            upvalue_count: self.upvalues.len(),
            chunk: Rc::new(self.chunk),
        };
        (function, self.upvalues)
    }

    /// Find `name` among this function's locals, innermost first.
    fn resolve_local(&self, name: &str) -> Result<Option<u8>, &'static str> {
        for (slot, local) in self.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    return Err("Can't read local variable in its own initializer.");
                }
                return Ok(Some(slot as u8));
            }
        }
        Ok(None)
    }

    /// Find `name` in an enclosing function, recording the capture here
    /// and in every compiler between.
    fn resolve_upvalue(&mut self, name: &str) -> Result<Option<u8>, &'static str> {
        let Some(enclosing) = self.enclosing.as_mut() else {
            return Ok(None);
        };

        if let Some(local) = enclosing.resolve_local(name)? {
            enclosing.locals[local as usize].is_captured = true;
            return self.add_upvalue(local, true).map(Some);
        }

        if let Some(upvalue) = enclosing.resolve_upvalue(name)? {
            return self.add_upvalue(upvalue, false).map(Some);
        }

        Ok(None)
    }

    fn add_upvalue(&mut self, index: u8, is_local: bool) -> Result<u8, &'static str> {
        let upvalue = Upvalue { index, is_local };
        if let Some(existing) = self.upvalues.iter().position(|u| *u == upvalue) {
            return Ok(existing as u8);
        }
        if self.upvalues.try_push(upvalue).is_err() {
            return Err("Too many closure variables in function.");
        }
        Ok((self.upvalues.len() - 1) as u8)
    }
}

/// Validation state for `this` and `super`, one per enclosing `class`
/// declaration being compiled.
struct ClassCompiler {
    enclosing: Option<Box<ClassCompiler>>,
    has_superclass: bool,
}

struct Parser<'src, 'ctx> {
    scanner: Scanner<'src>,
    heap: &'ctx mut Heap,
    globals: &'ctx HashMap<String, Value>,
    stderr: &'ctx mut dyn Write,

    compiler: Box<FunctionCompiler<'src>>,
    class_compiler: Option<Box<ClassCompiler>>,

    current: Token<'src>,
    previous: Token<'src>,

    /// Location stamped onto emitted bytes: the start of the current
    /// statement, narrowed to the operator or member token inside
    /// expressions, property accesses, and super expressions.
    op_location: SourceLocation,

    had_error: bool,
    panic_mode: bool,
}

impl<'src, 'ctx> Parser<'src, 'ctx> {
    fn new(
        source: &'src str,
        heap: &'ctx mut Heap,
        globals: &'ctx HashMap<String, Value>,
        stderr: &'ctx mut dyn Write,
    ) -> Self {
        let placeholder = Token {
            kind: TokenType::EndOfFile,
            lexeme: "",
            location: SourceLocation::new(1, 1),
        };

        Self {
            scanner: Scanner::new(source),
            heap,
            globals,
            stderr,
            compiler: Box::new(FunctionCompiler::new(String::new(), FunctionKind::Script)),
            class_compiler: None,
            current: placeholder,
            previous: placeholder,
            op_location: SourceLocation::new(1, 1),
            had_error: false,
            panic_mode: false,
        }
    }

    // =========================================================================
    // Token plumbing & error reporting
    // =========================================================================

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenType::Error {
                break;
            }
            let token = self.current;
            self.error_at(token, token.lexeme);
        }
    }

    fn consume(&mut self, kind: TokenType, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn check(&self, kind: TokenType) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenType) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;

        let _ = write!(self.stderr, "[{}] Error", token.location);
        match token.kind {
            TokenType::EndOfFile => {
                let _ = write!(self.stderr, " at end");
            }
            TokenType::Error => {}
            _ => {
                let _ = write!(self.stderr, " at '{}'", token.lexeme);
            }
        }
        let _ = writeln!(self.stderr, ": {}", message);
    }

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    /// Skip tokens until a statement boundary, then leave panic mode.
    fn synchronize(&mut self) {
        self.panic_mode = false;

        while self.current.kind != TokenType::EndOfFile {
            if self.previous.kind == TokenType::Semicolon {
                return;
            }
            match self.current.kind {
                TokenType::Class
                | TokenType::Fun
                | TokenType::Var
                | TokenType::For
                | TokenType::If
                | TokenType::While
                | TokenType::Print
                | TokenType::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // =========================================================================
    // Bytecode emission
    // =========================================================================

    fn emit_byte(&mut self, byte: u8) {
        let location = self.op_location;
        self.compiler.chunk.write(byte, location);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op.into());
    }

    fn emit_ops(&mut self, first: OpCode, second: OpCode) {
        self.emit_op(first);
        self.emit_op(second);
    }

    fn emit_return(&mut self) {
        if self.compiler.kind == FunctionKind::Initializer {
            // Initializers implicitly return `this`.
            self.emit_op(OpCode::GetLocal);
            self.emit_byte(0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.compiler.chunk.add_constant(value) {
            Some(index) => index,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_op(OpCode::Constant);
        self.emit_byte(index);
    }

    /// Emit a forward jump with a placeholder offset, returning the
    /// offset of the operand for later patching.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xFF);
        self.emit_byte(0xFF);
        self.compiler.chunk.code.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        // -2 adjusts for the operand bytes themselves.
        let jump = self.compiler.chunk.code.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }

        let jump = jump as u16;
        self.compiler.chunk.code[offset] = (jump >> 8) as u8;
        self.compiler.chunk.code[offset + 1] = (jump & 0xFF) as u8;
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);

        // +2 jumps back over this instruction's own operand.
        let offset = self.compiler.chunk.code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }

        let offset = offset as u16;
        self.emit_byte((offset >> 8) as u8);
        self.emit_byte((offset & 0xFF) as u8);
    }

    // =========================================================================
    // Heap access
    // =========================================================================

    /// Allocate, collecting first if the heap asks for it. Everything
    /// the compiler has allocated so far is reachable through the chunk
    /// constants of the compiler chain.
    fn alloc(&mut self, obj: Obj) -> ObjRef {
        if self.heap.needs_collect() {
            self.collect_garbage();
        }
        self.heap.alloc(obj)
    }

    fn collect_garbage(&mut self) {
        if cfg!(feature = "gc-log") {
            eprintln!("-- gc: begin (compiler)");
        }

        let mut compiler = Some(&*self.compiler);
        while let Some(c) = compiler {
            for &value in &c.chunk.constants {
                self.heap.mark_value(value);
            }
            compiler = c.enclosing.as_deref();
        }
        for &value in self.globals.values() {
            self.heap.mark_value(value);
        }

        self.heap.trace();
        self.heap.sweep();

        if cfg!(feature = "gc-log") {
            eprintln!("-- gc: end   (compiler)");
        }
    }

    /// Intern `text` as a string constant of the current chunk, reusing
    /// an existing constant with the same contents.
    fn string_constant(&mut self, text: &str) -> u8 {
        for (index, &value) in self.compiler.chunk.constants.iter().enumerate() {
            if let Value::Obj(r) = value {
                if let Obj::String(existing) = self.heap.get(r) {
                    if existing.as_str() == text {
                        return index as u8;
                    }
                }
            }
        }

        let r = self.alloc(Obj::String(text.to_string()));
        self.make_constant(Value::Obj(r))
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        self.string_constant(name)
    }

    // =========================================================================
    // Function compiler chain
    // =========================================================================

    fn begin_compiler(&mut self, kind: FunctionKind) {
        let name = match kind {
            FunctionKind::Script => String::new(),
            _ => self.previous.lexeme.to_string(),
        };
        let enclosing = mem::replace(
            &mut self.compiler,
            Box::new(FunctionCompiler::new(name, kind)),
        );
        self.compiler.enclosing = Some(enclosing);
    }

    fn end_compiler(&mut self) -> (ObjRef, ArrayVec<Upvalue, MAX_UPVALUES>) {
        self.emit_return();

        // Collect now if needed: the finished function's constants are
        // still rooted through the compiler chain at this point.
        if self.heap.needs_collect() {
            self.collect_garbage();
        }

        let enclosing = self.compiler.enclosing.take().unwrap_or_else(|| {
            Box::new(FunctionCompiler::new(String::new(), FunctionKind::Script))
        });
        let finished = mem::replace(&mut self.compiler, enclosing);
        let (function, upvalues) = finished.finish();
        let r = self.heap.alloc(Obj::Function(function));

        if cfg!(feature = "print-code") && !self.had_error {
            let function = self.heap.function(r);
            let name = if function.name.is_empty() {
                "<script>".to_string()
            } else {
                function.name.clone()
            };
            let chunk = Rc::clone(&function.chunk);
            let _ = crate::debug::disassemble_chunk(self.heap, &chunk, &name, &mut self.stderr);
        }

        (r, upvalues)
    }

    // =========================================================================
    // Scopes & variables
    // =========================================================================

    fn begin_scope(&mut self) {
        self.compiler.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.compiler.scope_depth -= 1;

        loop {
            let captured = match self.compiler.locals.last() {
                Some(local) if local.depth > self.compiler.scope_depth => local.is_captured,
                _ => break,
            };
            self.emit_op(if captured {
                OpCode::CloseUpvalue
            } else {
                OpCode::Pop
            });
            self.compiler.locals.pop();
        }
    }

    fn add_local(&mut self, name: &'src str) {
        if self.compiler.locals.is_full() {
            self.error("Too many local variables in function.");
            return;
        }
        self.compiler.locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self) {
        if self.compiler.scope_depth == 0 {
            return;
        }

        let name = self.previous.lexeme;
        let mut duplicate = false;
        for local in self.compiler.locals.iter().rev() {
            if local.depth != -1 && local.depth < self.compiler.scope_depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }

        self.add_local(name);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenType::Identifier, message);
        self.declare_variable();

        if self.compiler.scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous.lexeme)
    }

    fn mark_initialized(&mut self) {
        if self.compiler.scope_depth == 0 {
            return;
        }
        let depth = self.compiler.scope_depth;
        if let Some(local) = self.compiler.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.compiler.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op(OpCode::DefineGlobal);
        self.emit_byte(global);
    }

    fn resolve_local_here(&mut self, name: &str) -> Option<u8> {
        match self.compiler.resolve_local(name) {
            Ok(slot) => slot,
            Err(message) => {
                self.error(message);
                None
            }
        }
    }

    fn resolve_upvalue_here(&mut self, name: &str) -> Option<u8> {
        match self.compiler.resolve_upvalue(name) {
            Ok(index) => index,
            Err(message) => {
                self.error(message);
                None
            }
        }
    }

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let (get_op, set_op, arg) = match self.resolve_local_here(name.lexeme) {
            Some(slot) => (OpCode::GetLocal, OpCode::SetLocal, slot),
            None => match self.resolve_upvalue_here(name.lexeme) {
                Some(index) => (OpCode::GetUpvalue, OpCode::SetUpvalue, index),
                None => {
                    let index = self.identifier_constant(name.lexeme);
                    (OpCode::GetGlobal, OpCode::SetGlobal, index)
                }
            },
        };

        if can_assign && self.matches(TokenType::Equal) {
            self.expression();
            self.emit_op(set_op);
        } else {
            self.emit_op(get_op);
        }
        self.emit_byte(arg);
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        let saved = self.op_location;
        self.op_location = self.current.location;

        self.advance();
        let Some(prefix) = rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            self.op_location = saved;
            return;
        };

        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        self.op_location = saved;

        if can_assign && self.matches(TokenType::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self, _can_assign: bool) {
        let Ok(value) = self.previous.lexeme.parse::<f64>() else {
            self.error("Invalid number literal.");
            return;
        };
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        // The lexeme includes the quotes; the contents are the raw bytes
        // between them.
        let lexeme = self.previous.lexeme;
        let text = &lexeme[1..lexeme.len() - 1];
        let index = self.string_constant(text);
        self.emit_op(OpCode::Constant);
        self.emit_byte(index);
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenType::False => self.emit_op(OpCode::False),
            TokenType::True => self.emit_op(OpCode::True),
            TokenType::Nil => self.emit_op(OpCode::Nil),
            _ => {}
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let token = self.previous;
        self.named_variable(token, can_assign);
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;

        self.parse_precedence(Precedence::Unary);

        match operator {
            TokenType::Bang => self.emit_op(OpCode::Not),
            TokenType::Minus => self.emit_op(OpCode::Negate),
            _ => {}
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(rule(operator).precedence.next());

        match operator {
            TokenType::BangEqual => self.emit_ops(OpCode::Equal, OpCode::Not),
            TokenType::EqualEqual => self.emit_op(OpCode::Equal),
            TokenType::Greater => self.emit_op(OpCode::Greater),
            TokenType::GreaterEqual => self.emit_ops(OpCode::Less, OpCode::Not),
            TokenType::Less => self.emit_op(OpCode::Less),
            TokenType::LessEqual => self.emit_ops(OpCode::Greater, OpCode::Not),
            TokenType::Plus => self.emit_op(OpCode::Add),
            TokenType::Minus => self.emit_op(OpCode::Subtract),
            TokenType::Star => self.emit_op(OpCode::Multiply),
            TokenType::Slash => self.emit_op(OpCode::Divide),
            _ => {}
        }
    }

    /// `and` short-circuits by leaving the decisive operand on the stack.
    fn and(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);

        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);

        self.patch_jump(end_jump);
    }

    fn or(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);

        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_op(OpCode::Call);
        self.emit_byte(argc);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenType::RightParen) {
            loop {
                self.expression();
                if count == MAX_ARITY {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.matches(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after arguments.");
        count.min(MAX_ARITY) as u8
    }

    fn dot(&mut self, can_assign: bool) {
        let saved = self.op_location;
        self.op_location = self.current.location;

        self.consume(TokenType::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous.lexeme);

        if can_assign && self.matches(TokenType::Equal) {
            self.expression();
            self.emit_op(OpCode::SetProperty);
            self.emit_byte(name);
        } else if self.matches(TokenType::LeftParen) {
            let argc = self.argument_list();
            self.emit_op(OpCode::Invoke);
            self.emit_byte(name);
            self.emit_byte(argc);
        } else {
            self.emit_op(OpCode::GetProperty);
            self.emit_byte(name);
        }

        self.op_location = saved;
    }

    fn this(&mut self, _can_assign: bool) {
        if self.class_compiler.is_none() {
            self.error("Can't use 'this' outside of a class.");
        }

        let token = self.previous;
        self.named_variable(token, false);
    }

    fn super_(&mut self, _can_assign: bool) {
        let (in_class, has_superclass) = match &self.class_compiler {
            None => (false, false),
            Some(class) => (true, class.has_superclass),
        };
        if !in_class {
            self.error("Can't use 'super' outside of a class.");
        } else if !has_superclass {
            self.error("Can't use 'super' in a class with no superclass.");
        }

        self.consume(TokenType::Dot, "Expect '.' after 'super'.");

        let saved = self.op_location;
        self.op_location = self.current.location;

        self.consume(TokenType::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(self.previous.lexeme);
        let location = self.previous.location;

        self.named_variable(Token::synthetic("this", location), false);
        if self.matches(TokenType::LeftParen) {
            let argc = self.argument_list();
            self.named_variable(Token::synthetic("super", location), false);
            self.emit_op(OpCode::SuperInvoke);
            self.emit_byte(name);
            self.emit_byte(argc);
        } else {
            self.named_variable(Token::synthetic("super", location), false);
            self.emit_op(OpCode::GetSuper);
            self.emit_byte(name);
        }

        self.op_location = saved;
    }

    // =========================================================================
    // Declarations & statements
    // =========================================================================

    fn declaration(&mut self) {
        let saved = self.op_location;
        self.op_location = self.current.location;

        if self.matches(TokenType::Class) {
            self.class_declaration();
        } else if self.matches(TokenType::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenType::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        self.op_location = saved;

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        let saved = self.op_location;
        self.op_location = self.current.location;

        if self.matches(TokenType::Print) {
            self.print_statement();
        } else if self.matches(TokenType::If) {
            self.if_statement();
        } else if self.matches(TokenType::Return) {
            self.return_statement();
        } else if self.matches(TokenType::While) {
            self.while_statement();
        } else if self.matches(TokenType::For) {
            self.for_statement();
        } else if self.matches(TokenType::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }

        self.op_location = saved;
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        if self.matches(TokenType::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(
            TokenType::Semicolon,
            "Expect ';' after variable declaration.",
        );

        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // A function may recurse into itself by name.
        self.mark_initialized();

        self.function(FunctionKind::Function);

        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionKind) {
        self.begin_compiler(kind);
        self.begin_scope();

        self.consume(TokenType::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenType::RightParen) {
            loop {
                self.compiler.arity += 1;
                if self.compiler.arity > MAX_ARITY {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.matches(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after parameters.");
        self.consume(TokenType::LeftBrace, "Expect '{' before function body.");
        self.block();

        // No end_scope: returning from the function discards the frame.
        let (function, upvalues) = self.end_compiler();
        let constant = self.make_constant(Value::Obj(function));
        self.emit_op(OpCode::Closure);
        self.emit_byte(constant);

        for upvalue in &upvalues {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_byte(upvalue.index);
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenType::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_constant = self.identifier_constant(class_name.lexeme);
        self.declare_variable();

        self.emit_op(OpCode::Class);
        self.emit_byte(name_constant);
        self.define_variable(name_constant);

        let enclosing = self.class_compiler.take();
        self.class_compiler = Some(Box::new(ClassCompiler {
            enclosing,
            has_superclass: false,
        }));

        if self.matches(TokenType::Less) {
            self.consume(TokenType::Identifier, "Expect superclass name.");
            self.variable(false);

            if class_name.lexeme == self.previous.lexeme {
                self.error("A class can't inherit from itself.");
            }

            // `super` lives in its own scope so sibling classes each see
            // their own superclass.
            self.begin_scope();
            self.add_local("super");
            self.define_variable(0);

            self.named_variable(class_name, false);
            self.emit_op(OpCode::Inherit);

            if let Some(class) = self.class_compiler.as_mut() {
                class.has_superclass = true;
            }
        }

        self.named_variable(class_name, false);
        self.consume(TokenType::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::EndOfFile) {
            self.method();
        }
        self.consume(TokenType::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        let has_superclass = self
            .class_compiler
            .as_ref()
            .is_some_and(|class| class.has_superclass);
        if has_superclass {
            self.end_scope();
        }

        self.class_compiler = self.class_compiler.take().and_then(|class| class.enclosing);
    }

    fn method(&mut self) {
        self.consume(TokenType::Identifier, "Expect method name.");
        let constant = self.identifier_constant(self.previous.lexeme);

        let kind = if self.previous.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);

        self.emit_op(OpCode::Method);
        self.emit_byte(constant);
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn return_statement(&mut self) {
        if self.compiler.kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }

        if self.matches(TokenType::Semicolon) {
            self.emit_return();
        } else {
            if self.compiler.kind == FunctionKind::Initializer {
                self.error("Can't return a value from initializer.");
            }

            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn block(&mut self) {
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::EndOfFile) {
            self.declaration();
        }
        self.consume(TokenType::RightBrace, "Expect '}' after block.");
    }

    fn if_statement(&mut self) {
        self.consume(TokenType::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);

        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.matches(TokenType::Else) {
            self.statement();
        }

        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.compiler.chunk.code.len();

        self.consume(TokenType::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    /// `for` desugars in place to initializer, condition, increment, and
    /// body, with a jump dance so the body runs before the increment.
    fn for_statement(&mut self) {
        self.begin_scope();

        self.consume(TokenType::LeftParen, "Expect '(' after 'for'.");
        if self.matches(TokenType::Semicolon) {
            // No initializer.
        } else if self.matches(TokenType::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.compiler.chunk.code.len();

        let mut exit_jump = None;
        if !self.matches(TokenType::Semicolon) {
            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after loop condition.");

            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.matches(TokenType::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.compiler.chunk.code.len();

            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenType::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }
}
