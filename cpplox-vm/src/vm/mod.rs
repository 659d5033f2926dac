// cpplox-vm - Bytecode compiler and virtual machine for the Lox programming language
// Copyright (c) 2026 cpplox contributors. MIT licensed.

//! Stack-based virtual machine for executing Lox bytecode.
//!
//! The VM owns the heap, the value stack, the call frames, the open
//! upvalue list, and the global environment. It runs an uninterrupted
//! fetch-decode-execute loop; garbage collection happens only at
//! allocation points, where every live value is rooted.

pub mod frame;
pub mod stack;

use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use arrayvec::ArrayVec;

use crate::compiler;
use crate::debug;
use crate::heap::Heap;
use crate::object::{
    NativeFn, Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjInstance, ObjNative, ObjRef, ObjUpvalue,
};
use crate::opcode::OpCode;
use crate::value::Value;
use crate::{CompileError, InterpretError};

pub use frame::CallFrame;
pub use stack::ValueStack;

/// Bounded call depth; the 65th call is a stack overflow.
pub const FRAMES_MAX: usize = 64;

/// Value stack bound: 256 slots per frame.
pub const STACK_MAX: usize = FRAMES_MAX * (u8::MAX as usize + 1);

/// Runtime failure. The message and stack trace have already been
/// written to the VM's stderr sink; the VM has unwound every frame and
/// cleared its stack.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("runtime error")]
pub struct RuntimeError;

/// Output sinks for the VM.
///
/// `print` writes to `stdout`; diagnostics (compile errors, runtime
/// stack traces) go to `stderr`. Tests pass in-memory buffers.
pub struct VmOptions<'out> {
    pub stdout: Box<dyn Write + 'out>,
    pub stderr: Box<dyn Write + 'out>,
}

impl Default for VmOptions<'_> {
    fn default() -> Self {
        Self {
            stdout: Box::new(io::stdout()),
            stderr: Box::new(io::stderr()),
        }
    }
}

/// The Lox virtual machine.
pub struct Vm<'out> {
    /// Value stack.
    stack: ValueStack,

    /// Call frame stack.
    frames: ArrayVec<CallFrame, FRAMES_MAX>,

    /// Every heap object the VM owns.
    heap: Heap,

    /// Open upvalues, ordered by strictly descending stack slot.
    open_upvalues: Vec<ObjRef>,

    /// Global environment, keyed by name contents.
    globals: HashMap<String, Value>,

    opts: VmOptions<'out>,
}

impl Default for Vm<'_> {
    fn default() -> Self {
        Self::new(VmOptions::default())
    }
}

impl<'out> Vm<'out> {
    /// Create a VM with the `clock` native installed.
    pub fn new(opts: VmOptions<'out>) -> Self {
        let mut vm = Self {
            stack: ValueStack::new(),
            frames: ArrayVec::new(),
            heap: Heap::new(),
            open_upvalues: Vec::new(),
            globals: HashMap::new(),
            opts,
        };
        vm.define_native("clock", 0, native_clock);
        vm
    }

    /// Borrow the heap, for tooling and tests.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Compile source to its top-level function without running it.
    pub fn compile(&mut self, source: &str) -> Result<ObjRef, CompileError> {
        compiler::compile(
            source,
            &mut self.heap,
            &self.globals,
            &mut self.opts.stderr,
        )
        .ok_or(CompileError)
    }

    /// Compile and execute a program. Globals persist across calls, so a
    /// REPL interprets each line on the same VM.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = self.compile(source)?;

        // Root the function while the wrapping closure is allocated.
        self.stack.push(Value::Obj(function));
        self.maybe_collect();
        let closure = self.heap.alloc(Obj::Closure(ObjClosure {
            function,
            upvalues: Vec::new(),
        }));
        self.stack.pop()?;
        self.stack.push(Value::Obj(closure));
        self.call_closure(closure, 0)?;

        self.run()?;
        Ok(())
    }

    fn define_native(&mut self, name: &'static str, arity: u8, function: NativeFn) {
        let native = self.heap.alloc(Obj::Native(ObjNative {
            name,
            arity,
            function,
        }));
        self.globals.insert(name.to_string(), Value::Obj(native));
    }

    // =========================================================================
    // Frame & bytecode plumbing
    // =========================================================================

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("no active frame")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("no active frame")
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frame_mut();
        let byte = frame.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    /// Jump operands are two bytes, big-endian.
    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte() as u16;
        let lo = self.read_byte() as u16;
        (hi << 8) | lo
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        self.frame().chunk.constants[index]
    }

    fn read_string_constant(&mut self) -> ObjRef {
        match self.read_constant() {
            Value::Obj(r) => r,
            _ => unreachable!("name constants are strings"),
        }
    }

    /// Report a runtime error with a stack trace, then unwind.
    fn runtime_error(&mut self, message: &str) -> RuntimeError {
        let _ = writeln!(self.opts.stderr, "{}", message);

        for frame in self.frames.iter().rev() {
            let function_ref = self.heap.closure(frame.closure).function;
            let function = self.heap.function(function_ref);
            // The ip has already advanced past the failing instruction.
            let location = frame.chunk.location_at(frame.ip.saturating_sub(1));
            let line = if function.name.is_empty() {
                format!("[{}] in script", location)
            } else {
                format!("[{}] in {}()", location, function.name)
            };
            let _ = writeln!(self.opts.stderr, "{}", line);
        }

        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();

        RuntimeError
    }

    // =========================================================================
    // Garbage collection
    // =========================================================================

    fn maybe_collect(&mut self) {
        if self.heap.needs_collect() {
            self.collect_garbage();
        }
    }

    fn collect_garbage(&mut self) {
        if cfg!(feature = "gc-log") {
            eprintln!("-- gc: begin");
        }

        for value in self.stack.iter() {
            self.heap.mark_value(*value);
        }
        for frame in &self.frames {
            self.heap.mark_object(frame.closure);
        }
        for &upvalue in &self.open_upvalues {
            self.heap.mark_object(upvalue);
        }
        for &value in self.globals.values() {
            self.heap.mark_value(value);
        }

        self.heap.trace();
        self.heap.sweep();

        if cfg!(feature = "gc-log") {
            eprintln!("-- gc: end   ({}B live)", self.heap.bytes_allocated());
        }
    }

    // =========================================================================
    // Object helpers
    // =========================================================================

    fn is_string(&self, r: ObjRef) -> bool {
        matches!(self.heap.get(r), Obj::String(_))
    }

    fn as_instance(&self, value: Value) -> Option<ObjRef> {
        match value {
            Value::Obj(r) => match self.heap.get(r) {
                Obj::Instance(_) => Some(r),
                _ => None,
            },
            _ => None,
        }
    }

    fn as_class(&self, value: Value) -> Option<ObjRef> {
        match value {
            Value::Obj(r) => match self.heap.get(r) {
                Obj::Class(_) => Some(r),
                _ => None,
            },
            _ => None,
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn call_value(&mut self, callee: Value, argc: usize) -> Result<(), RuntimeError> {
        let Value::Obj(callee_ref) = callee else {
            return Err(self.runtime_error("Can only call functions and classes."));
        };

        // Copy the dispatch data out so the heap borrow ends before the
        // stack is touched.
        enum Callee {
            Bound(Value, ObjRef),
            Class,
            Closure,
            Native(u8, NativeFn),
            Other,
        }
        let kind = match self.heap.get(callee_ref) {
            Obj::BoundMethod(bound) => Callee::Bound(bound.receiver, bound.method),
            Obj::Class(_) => Callee::Class,
            Obj::Closure(_) => Callee::Closure,
            Obj::Native(native) => Callee::Native(native.arity, native.function),
            _ => Callee::Other,
        };

        match kind {
            Callee::Bound(receiver, method) => {
                // The receiver goes into the callee slot so local slot 0
                // resolves to `this`.
                let callee_slot = self.stack.len() - argc - 1;
                self.stack.set(callee_slot, receiver)?;
                self.call_closure(method, argc)
            }
            Callee::Class => {
                self.maybe_collect();
                let instance = self.heap.alloc(Obj::Instance(ObjInstance {
                    class: callee_ref,
                    fields: HashMap::new(),
                }));
                let callee_slot = self.stack.len() - argc - 1;
                self.stack.set(callee_slot, Value::Obj(instance))?;

                let init = self.heap.class(callee_ref).methods.get("init").copied();
                match init {
                    Some(Value::Obj(init)) => self.call_closure(init, argc),
                    _ if argc != 0 => Err(self.runtime_error(&format!(
                        "Expected 0 arguments but got {}.",
                        argc
                    ))),
                    _ => Ok(()),
                }
            }
            Callee::Closure => self.call_closure(callee_ref, argc),
            Callee::Native(arity, function) => {
                if argc != arity as usize {
                    return Err(self.runtime_error(&format!(
                        "Expected {} arguments but got {}.",
                        arity, argc
                    )));
                }
                let result = function(self.stack.top_slice(argc));
                let new_len = self.stack.len() - argc - 1;
                self.stack.truncate(new_len);
                self.stack.push(result);
                Ok(())
            }
            Callee::Other => Err(self.runtime_error("Can only call functions and classes.")),
        }
    }

    fn call_closure(&mut self, closure: ObjRef, argc: usize) -> Result<(), RuntimeError> {
        let function_ref = self.heap.closure(closure).function;
        let (arity, chunk) = {
            let function = self.heap.function(function_ref);
            (function.arity as usize, Rc::clone(&function.chunk))
        };

        if argc != arity {
            return Err(self.runtime_error(&format!(
                "Expected {} arguments but got {}.",
                arity, argc
            )));
        }
        if self.frames.is_full() {
            return Err(self.runtime_error("Stack overflow."));
        }

        let base = self.stack.len() - argc - 1;
        self.frames.push(CallFrame::new(closure, chunk, base));
        Ok(())
    }

    fn invoke(&mut self, name_ref: ObjRef, argc: usize) -> Result<(), RuntimeError> {
        let receiver = self.stack.peek(argc)?;
        let Some(instance_ref) = self.as_instance(receiver) else {
            return Err(self.runtime_error("Only instances have methods."));
        };

        let field = {
            let name = self.heap.string(name_ref);
            self.heap.instance(instance_ref).fields.get(name).copied()
        };
        if let Some(value) = field {
            // `obj.field(...)`: the field shadows any method.
            let callee_slot = self.stack.len() - argc - 1;
            self.stack.set(callee_slot, value)?;
            return self.call_value(value, argc);
        }

        let class = self.heap.instance(instance_ref).class;
        self.invoke_from_class(class, name_ref, argc)
    }

    fn invoke_from_class(
        &mut self,
        class: ObjRef,
        name_ref: ObjRef,
        argc: usize,
    ) -> Result<(), RuntimeError> {
        let method = {
            let name = self.heap.string(name_ref);
            self.heap.class(class).methods.get(name).copied()
        };
        let Some(Value::Obj(method)) = method else {
            let message = format!("Undefined property '{}'.", self.heap.string(name_ref));
            return Err(self.runtime_error(&message));
        };
        self.call_closure(method, argc)
    }

    fn bind_method(&mut self, class: ObjRef, name_ref: ObjRef) -> Result<(), RuntimeError> {
        let method = {
            let name = self.heap.string(name_ref);
            self.heap.class(class).methods.get(name).copied()
        };
        let Some(Value::Obj(method)) = method else {
            let message = format!("Undefined property '{}'.", self.heap.string(name_ref));
            return Err(self.runtime_error(&message));
        };

        self.maybe_collect();
        let receiver = self.stack.peek(0)?;
        let bound = self
            .heap
            .alloc(Obj::BoundMethod(ObjBoundMethod { receiver, method }));
        self.stack.pop()?;
        self.stack.push(Value::Obj(bound));
        Ok(())
    }

    // =========================================================================
    // Upvalues
    // =========================================================================

    /// Find or create an open upvalue for a stack slot. The open list is
    /// kept ordered by strictly descending slot, with one entry per slot.
    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let mut insert_at = self.open_upvalues.len();
        for (i, &upvalue) in self.open_upvalues.iter().enumerate() {
            match *self.heap.upvalue(upvalue) {
                ObjUpvalue::Open(existing) if existing == slot => return upvalue,
                ObjUpvalue::Open(existing) if existing < slot => {
                    insert_at = i;
                    break;
                }
                _ => {}
            }
        }

        self.maybe_collect();
        let created = self.heap.alloc(Obj::Upvalue(ObjUpvalue::Open(slot)));
        self.open_upvalues.insert(insert_at, created);
        created
    }

    /// Close every open upvalue whose slot is at or above `from_slot`,
    /// copying the stack value into the upvalue itself.
    fn close_upvalues(&mut self, from_slot: usize) -> Result<(), RuntimeError> {
        while let Some(&upvalue) = self.open_upvalues.first() {
            let slot = match *self.heap.upvalue(upvalue) {
                ObjUpvalue::Open(slot) => slot,
                ObjUpvalue::Closed(_) => break,
            };
            if slot < from_slot {
                break;
            }

            let value = self.stack.get(slot)?;
            *self.heap.upvalue_mut(upvalue) = ObjUpvalue::Closed(value);
            self.open_upvalues.remove(0);
        }
        Ok(())
    }

    // =========================================================================
    // Binary operator helpers
    // =========================================================================

    fn binary_number_op(&mut self, op: fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let (b, a) = (self.stack.peek(0)?, self.stack.peek(1)?);
        let (Value::Number(a), Value::Number(b)) = (a, b) else {
            return Err(self.runtime_error("Operands must be numbers."));
        };
        self.stack.pop()?;
        self.stack.pop()?;
        self.stack.push(Value::Number(op(a, b)));
        Ok(())
    }

    fn comparison_op(&mut self, op: fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
        let (b, a) = (self.stack.peek(0)?, self.stack.peek(1)?);
        let (Value::Number(a), Value::Number(b)) = (a, b) else {
            return Err(self.runtime_error("Operands must be numbers."));
        };
        self.stack.pop()?;
        self.stack.pop()?;
        self.stack.push(Value::Bool(op(a, b)));
        Ok(())
    }

    // =========================================================================
    // Execution
    // =========================================================================

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            if cfg!(feature = "trace-execution") {
                let mut rendered = String::new();
                for value in self.stack.iter() {
                    rendered.push_str(&format!("[ {} ]", self.heap.format_value(*value)));
                }
                let _ = writeln!(self.opts.stderr, "{}", rendered);

                let (chunk, ip) = {
                    let frame = self.frame();
                    (Rc::clone(&frame.chunk), frame.ip)
                };
                let _ = debug::disassemble_instruction(&self.heap, &chunk, ip, &mut self.opts.stderr);
            }

            let byte = self.read_byte();
            let op = match OpCode::try_from(byte) {
                Ok(op) => op,
                Err(unknown) => {
                    return Err(
                        self.runtime_error(&format!("Unknown opcode {:#04x}.", unknown.0))
                    );
                }
            };

            match op {
                // Values
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.stack.push(value);
                }
                OpCode::Nil => self.stack.push(Value::Nil),
                OpCode::True => self.stack.push(Value::Bool(true)),
                OpCode::False => self.stack.push(Value::Bool(false)),

                // Stack & variables
                OpCode::Pop => {
                    self.stack.pop()?;
                }
                OpCode::DefineGlobal => {
                    let name_ref = self.read_string_constant();
                    let name = self.heap.string(name_ref).to_string();
                    let value = self.stack.peek(0)?;
                    self.globals.insert(name, value);
                    self.stack.pop()?;
                }
                OpCode::GetGlobal => {
                    let name_ref = self.read_string_constant();
                    let value = {
                        let name = self.heap.string(name_ref);
                        self.globals.get(name).copied()
                    };
                    match value {
                        Some(value) => self.stack.push(value),
                        None => {
                            let message =
                                format!("Undefined variable '{}'", self.heap.string(name_ref));
                            return Err(self.runtime_error(&message));
                        }
                    }
                }
                OpCode::SetGlobal => {
                    let name_ref = self.read_string_constant();
                    let value = self.stack.peek(0)?;
                    let found = {
                        let name = self.heap.string(name_ref);
                        match self.globals.get_mut(name) {
                            Some(slot) => {
                                *slot = value;
                                true
                            }
                            None => false,
                        }
                    };
                    if !found {
                        let message =
                            format!("Undefined variable '{}'", self.heap.string(name_ref));
                        return Err(self.runtime_error(&message));
                    }
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frame().base;
                    let value = self.stack.get(base + slot)?;
                    self.stack.push(value);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frame().base;
                    let value = self.stack.peek(0)?;
                    self.stack.set(base + slot, value)?;
                }
                OpCode::GetUpvalue => {
                    let index = self.read_byte() as usize;
                    let upvalue = self.heap.closure(self.frame().closure).upvalues[index];
                    let value = match *self.heap.upvalue(upvalue) {
                        ObjUpvalue::Open(slot) => self.stack.get(slot)?,
                        ObjUpvalue::Closed(value) => value,
                    };
                    self.stack.push(value);
                }
                OpCode::SetUpvalue => {
                    let index = self.read_byte() as usize;
                    let value = self.stack.peek(0)?;
                    let upvalue = self.heap.closure(self.frame().closure).upvalues[index];
                    match *self.heap.upvalue(upvalue) {
                        ObjUpvalue::Open(slot) => self.stack.set(slot, value)?,
                        ObjUpvalue::Closed(_) => {
                            *self.heap.upvalue_mut(upvalue) = ObjUpvalue::Closed(value);
                        }
                    }
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top)?;
                    self.stack.pop()?;
                }
                OpCode::GetProperty => {
                    let name_ref = self.read_string_constant();
                    let receiver = self.stack.peek(0)?;
                    let Some(instance_ref) = self.as_instance(receiver) else {
                        return Err(self.runtime_error("Only instances have properties."));
                    };

                    let field = {
                        let name = self.heap.string(name_ref);
                        self.heap.instance(instance_ref).fields.get(name).copied()
                    };
                    match field {
                        Some(value) => {
                            self.stack.pop()?;
                            self.stack.push(value);
                        }
                        None => {
                            let class = self.heap.instance(instance_ref).class;
                            self.bind_method(class, name_ref)?;
                        }
                    }
                }
                OpCode::SetProperty => {
                    let name_ref = self.read_string_constant();
                    let target = self.stack.peek(1)?;
                    let Some(instance_ref) = self.as_instance(target) else {
                        return Err(self.runtime_error("Only instances have properties."));
                    };

                    let name = self.heap.string(name_ref).to_string();
                    let value = self.stack.peek(0)?;
                    self.heap
                        .instance_mut(instance_ref)
                        .fields
                        .insert(name, value);

                    let value = self.stack.pop()?;
                    self.stack.pop()?; // instance
                    self.stack.push(value);
                }
                OpCode::GetSuper => {
                    let name_ref = self.read_string_constant();
                    let superclass = self.stack.pop()?;
                    let class = self
                        .as_class(superclass)
                        .expect("super slot holds a class");
                    self.bind_method(class, name_ref)?;
                }

                // Comparison
                OpCode::Equal => {
                    let b = self.stack.pop()?;
                    let a = self.stack.pop()?;
                    let equal = self.heap.values_equal(a, b);
                    self.stack.push(Value::Bool(equal));
                }
                OpCode::Greater => self.comparison_op(|a, b| a > b)?,
                OpCode::Less => self.comparison_op(|a, b| a < b)?,

                // Arithmetic
                OpCode::Add => {
                    let (b, a) = (self.stack.peek(0)?, self.stack.peek(1)?);
                    match (a, b) {
                        (Value::Number(a), Value::Number(b)) => {
                            self.stack.pop()?;
                            self.stack.pop()?;
                            self.stack.push(Value::Number(a + b));
                        }
                        (Value::Obj(a), Value::Obj(b))
                            if self.is_string(a) && self.is_string(b) =>
                        {
                            // The operands stay on the stack across the
                            // allocation so a collection can't free them.
                            self.maybe_collect();
                            let text =
                                format!("{}{}", self.heap.string(a), self.heap.string(b));
                            let result = self.heap.alloc(Obj::String(text));
                            self.stack.pop()?;
                            self.stack.pop()?;
                            self.stack.push(Value::Obj(result));
                        }
                        _ => {
                            return Err(self.runtime_error(
                                "Operands must be two numbers or two strings.",
                            ));
                        }
                    }
                }
                OpCode::Subtract => self.binary_number_op(|a, b| a - b)?,
                OpCode::Multiply => self.binary_number_op(|a, b| a * b)?,
                OpCode::Divide => self.binary_number_op(|a, b| a / b)?,

                // Unary
                OpCode::Not => {
                    let value = self.stack.pop()?;
                    self.stack.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Negate => {
                    let value = self.stack.peek(0)?;
                    let Value::Number(n) = value else {
                        return Err(self.runtime_error("Operand must be a number."));
                    };
                    self.stack.pop()?;
                    self.stack.push(Value::Number(-n));
                }

                // Control flow
                OpCode::Jump => {
                    let offset = self.read_u16() as usize;
                    self.frame_mut().ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16() as usize;
                    if self.stack.peek(0)?.is_falsey() {
                        self.frame_mut().ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16() as usize;
                    self.frame_mut().ip -= offset;
                }

                // Calls & closures
                OpCode::Call => {
                    let argc = self.read_byte() as usize;
                    let callee = self.stack.peek(argc)?;
                    self.call_value(callee, argc)?;
                }
                OpCode::Invoke => {
                    let name_ref = self.read_string_constant();
                    let argc = self.read_byte() as usize;
                    self.invoke(name_ref, argc)?;
                }
                OpCode::SuperInvoke => {
                    let name_ref = self.read_string_constant();
                    let argc = self.read_byte() as usize;
                    let superclass = self.stack.pop()?;
                    let class = self
                        .as_class(superclass)
                        .expect("super slot holds a class");
                    self.invoke_from_class(class, name_ref, argc)?;
                }
                OpCode::Closure => {
                    let function_ref = match self.read_constant() {
                        Value::Obj(r) => r,
                        _ => unreachable!("closure constant is a function"),
                    };
                    let upvalue_count = self.heap.function(function_ref).upvalue_count;

                    // The closure sits on the stack while its upvalues
                    // are captured, keeping it and them alive.
                    self.maybe_collect();
                    let closure_ref = self.heap.alloc(Obj::Closure(ObjClosure {
                        function: function_ref,
                        upvalues: Vec::with_capacity(upvalue_count),
                    }));
                    self.stack.push(Value::Obj(closure_ref));

                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte() as usize;
                        let upvalue = if is_local {
                            let slot = self.frame().base + index;
                            self.capture_upvalue(slot)
                        } else {
                            self.heap.closure(self.frame().closure).upvalues[index]
                        };
                        self.heap.closure_mut(closure_ref).upvalues.push(upvalue);
                    }
                }
                OpCode::Return => {
                    let result = self.stack.pop()?;
                    let frame = self.frames.pop().expect("no active frame");
                    self.close_upvalues(frame.base)?;

                    if self.frames.is_empty() {
                        self.stack.pop()?;
                        debug_assert!(
                            self.stack.is_empty(),
                            "value stack not empty at end of script"
                        );
                        return Ok(());
                    }

                    self.stack.truncate(frame.base);
                    self.stack.push(result);
                }

                // Classes
                OpCode::Class => {
                    let name_ref = self.read_string_constant();
                    self.maybe_collect();
                    let class = self.heap.alloc(Obj::Class(ObjClass {
                        name: name_ref,
                        methods: HashMap::new(),
                    }));
                    self.stack.push(Value::Obj(class));
                }
                OpCode::Inherit => {
                    let superclass = self.stack.peek(1)?;
                    let Some(superclass_ref) = self.as_class(superclass) else {
                        return Err(self.runtime_error("Superclass must be a class."));
                    };

                    let subclass = self.stack.peek(0)?;
                    let subclass_ref = self.as_class(subclass).expect("subclass on stack");

                    // Copy-down inheritance: the subclass starts from the
                    // superclass's table; its own methods override next.
                    let methods = self.heap.class(superclass_ref).methods.clone();
                    self.heap.class_mut(subclass_ref).methods.extend(methods);
                    self.stack.pop()?; // subclass
                }
                OpCode::Method => {
                    let name_ref = self.read_string_constant();
                    let method = self.stack.peek(0)?;
                    let class = self.stack.peek(1)?;
                    let class_ref = self.as_class(class).expect("class on stack");

                    let name = self.heap.string(name_ref).to_string();
                    self.heap.class_mut(class_ref).methods.insert(name, method);
                    self.stack.pop()?; // method; the class stays for the next one
                }

                // IO
                OpCode::Print => {
                    let value = self.stack.pop()?;
                    let rendered = self.heap.format_value(value);
                    let _ = writeln!(self.opts.stdout, "{}", rendered);
                }
            }
        }
    }
}

/// Wall-clock seconds since the Unix epoch, as whole seconds.
fn native_clock(_args: &[Value]) -> Value {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    Value::Number(seconds as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_slots(vm: &Vm) -> Vec<usize> {
        vm.open_upvalues
            .iter()
            .map(|&upvalue| match *vm.heap.upvalue(upvalue) {
                ObjUpvalue::Open(slot) => slot,
                ObjUpvalue::Closed(_) => panic!("closed upvalue in the open list"),
            })
            .collect()
    }

    #[test]
    fn test_open_upvalue_list_is_descending_and_deduplicated() {
        let mut vm = Vm::default();
        for i in 0..4 {
            vm.stack.push(Value::Number(i as f64));
        }

        let one = vm.capture_upvalue(1);
        let three = vm.capture_upvalue(3);
        vm.capture_upvalue(0);
        vm.capture_upvalue(2);
        assert_eq!(open_slots(&vm), vec![3, 2, 1, 0]);

        // Capturing an already-open slot reuses the upvalue.
        assert_eq!(vm.capture_upvalue(3), three);
        assert_eq!(vm.capture_upvalue(1), one);
        assert_eq!(open_slots(&vm), vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_close_upvalues_closes_from_slot_upward() {
        let mut vm = Vm::default();
        for i in 0..3 {
            vm.stack.push(Value::Number(i as f64));
        }

        vm.capture_upvalue(0);
        let high = vm.capture_upvalue(2);
        vm.close_upvalues(1).unwrap();

        assert_eq!(open_slots(&vm), vec![0]);
        match *vm.heap.upvalue(high) {
            ObjUpvalue::Closed(Value::Number(n)) => assert_eq!(n, 2.0),
            _ => panic!("slot 2 should have been closed"),
        }
    }
}
