// cpplox-vm - Bytecode compiler and virtual machine for the Lox programming language
// Copyright (c) 2026 cpplox contributors. MIT licensed.

//! Heap object shapes.
//!
//! Every heap-allocated Lox value is one variant of the closed [`Obj`]
//! enum; dispatch on object kind is a match on the variant. Objects refer
//! to each other through [`ObjRef`] handles so the collector can trace
//! them without walking native pointers.

use std::collections::HashMap;
use std::rc::Rc;

use crate::chunk::Chunk;
use crate::value::Value;

/// Handle to an object in the [`Heap`](crate::heap::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjRef(pub(crate) u32);

impl ObjRef {
    /// The arena slot this handle points at.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A host function callable from Lox code.
pub type NativeFn = fn(&[Value]) -> Value;

/// A heap-allocated Lox object.
#[derive(Debug)]
pub enum Obj {
    /// Immutable byte string. Lox strings are byte-transparent.
    String(String),

    /// A compiled function prototype.
    Function(ObjFunction),

    /// A function paired with its captured upvalues.
    Closure(ObjClosure),

    /// An indirect reference to a variable that may outlive its stack slot.
    Upvalue(ObjUpvalue),

    /// A host-implemented callable.
    Native(ObjNative),

    /// A class: name plus method table.
    Class(ObjClass),

    /// An instance: class reference plus mutable fields.
    Instance(ObjInstance),

    /// A method lookup result that remembers its receiver.
    BoundMethod(ObjBoundMethod),
}

/// The compiled representation of a function.
#[derive(Debug)]
pub struct ObjFunction {
    /// Function name; empty for the top-level script.
    pub name: String,

    /// Number of declared parameters.
    pub arity: u8,

    /// Number of upvalues the function captures. Every closure wrapping
    /// this function carries exactly this many upvalue references.
    pub upvalue_count: usize,

    /// The compiled bytecode. Shared through `Rc` because chunks are
    /// never mutated after compilation; call frames keep a clone so the
    /// dispatch loop reads bytes without touching the heap.
    pub chunk: Rc<Chunk>,
}

/// A runtime closure: function plus captured upvalues.
#[derive(Debug)]
pub struct ObjClosure {
    /// The wrapped `Obj::Function`.
    pub function: ObjRef,

    /// One `Obj::Upvalue` reference per declared upvalue.
    pub upvalues: Vec<ObjRef>,
}

/// An upvalue is *open* while its variable still lives on the stack, and
/// *closed* once it owns the value independently.
#[derive(Debug, Clone, Copy)]
pub enum ObjUpvalue {
    /// Absolute index of the captured slot in the VM value stack.
    Open(usize),

    /// The captured value, moved off the stack.
    Closed(Value),
}

/// A host-implemented callable with an arity contract.
#[derive(Debug)]
pub struct ObjNative {
    pub name: &'static str,
    pub arity: u8,
    pub function: NativeFn,
}

/// A Lox class.
#[derive(Debug)]
pub struct ObjClass {
    /// The class name, an `Obj::String`.
    pub name: ObjRef,

    /// Method name to closure value. Populated by `Method` instructions;
    /// classes are closed once their declaration finishes executing.
    pub methods: HashMap<String, Value>,
}

/// An instance of a class.
#[derive(Debug)]
pub struct ObjInstance {
    /// The `Obj::Class` this is an instance of.
    pub class: ObjRef,

    /// Field name to value. Fields appear on first assignment.
    pub fields: HashMap<String, Value>,
}

/// A `(receiver, method)` pair produced by property access on a method.
#[derive(Debug)]
pub struct ObjBoundMethod {
    pub receiver: Value,

    /// The bound `Obj::Closure`.
    pub method: ObjRef,
}
