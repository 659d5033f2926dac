// cpplox-vm - Bytecode compiler and virtual machine for the Lox programming language
// Copyright (c) 2026 cpplox contributors. MIT licensed.

//! Human-readable rendering of bytecode chunks.
//!
//! Used by tooling and, behind the `print-code` / `trace-execution`
//! features, by the compiler and the VM themselves.

use std::io::{self, Write};

use crate::chunk::Chunk;
use crate::heap::Heap;
use crate::opcode::OpCode;
use crate::value::Value;

/// Disassemble a whole chunk under a header line.
pub fn disassemble_chunk(
    heap: &Heap,
    chunk: &Chunk,
    name: &str,
    out: &mut impl Write,
) -> io::Result<()> {
    writeln!(out, "== {} ==", name)?;

    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(heap, chunk, offset, out)?;
    }
    Ok(())
}

/// Disassemble the instruction at `offset`, returning the offset of the
/// next instruction.
pub fn disassemble_instruction(
    heap: &Heap,
    chunk: &Chunk,
    offset: usize,
    out: &mut impl Write,
) -> io::Result<usize> {
    write!(out, "{:04} ", offset)?;

    let location = chunk.location_at(offset);
    if offset > 0 && location.line == chunk.location_at(offset - 1).line {
        write!(out, "{:>4}:{:<4} ", "|", location.column)?;
    } else {
        write!(out, "{:>4}:{:<4} ", location.line, location.column)?;
    }

    let byte = chunk.code[offset];
    let Ok(op) = OpCode::try_from(byte) else {
        writeln!(out, "Unknown opcode {:#04x}", byte)?;
        return Ok(offset + 1);
    };

    match op {
        OpCode::Constant
        | OpCode::DefineGlobal
        | OpCode::GetGlobal
        | OpCode::SetGlobal
        | OpCode::GetProperty
        | OpCode::SetProperty
        | OpCode::GetSuper
        | OpCode::Class
        | OpCode::Method => constant_instruction(heap, chunk, op, offset, out),

        OpCode::GetLocal
        | OpCode::SetLocal
        | OpCode::GetUpvalue
        | OpCode::SetUpvalue
        | OpCode::Call => byte_instruction(chunk, op, offset, out),

        OpCode::Jump | OpCode::JumpIfFalse => jump_instruction(chunk, op, 1, offset, out),
        OpCode::Loop => jump_instruction(chunk, op, -1, offset, out),

        OpCode::Invoke | OpCode::SuperInvoke => invoke_instruction(heap, chunk, op, offset, out),

        OpCode::Closure => closure_instruction(heap, chunk, offset, out),

        OpCode::Nil
        | OpCode::True
        | OpCode::False
        | OpCode::Pop
        | OpCode::CloseUpvalue
        | OpCode::Equal
        | OpCode::Greater
        | OpCode::Less
        | OpCode::Add
        | OpCode::Subtract
        | OpCode::Multiply
        | OpCode::Divide
        | OpCode::Not
        | OpCode::Negate
        | OpCode::Return
        | OpCode::Inherit
        | OpCode::Print => {
            writeln!(out, "{}", op.mnemonic())?;
            Ok(offset + 1)
        }
    }
}

fn constant_instruction(
    heap: &Heap,
    chunk: &Chunk,
    op: OpCode,
    offset: usize,
    out: &mut impl Write,
) -> io::Result<usize> {
    let index = chunk.code[offset + 1];
    let rendered = heap.format_value(chunk.constants[index as usize]);
    writeln!(out, "{:<16} {:4} '{}'", op.mnemonic(), index, rendered)?;
    Ok(offset + 2)
}

fn byte_instruction(
    chunk: &Chunk,
    op: OpCode,
    offset: usize,
    out: &mut impl Write,
) -> io::Result<usize> {
    let operand = chunk.code[offset + 1];
    writeln!(out, "{:<16} {:4}", op.mnemonic(), operand)?;
    Ok(offset + 2)
}

fn jump_instruction(
    chunk: &Chunk,
    op: OpCode,
    sign: i64,
    offset: usize,
    out: &mut impl Write,
) -> io::Result<usize> {
    let jump = u16::from_be_bytes([chunk.code[offset + 1], chunk.code[offset + 2]]);
    let target = offset as i64 + 3 + sign * jump as i64;
    writeln!(out, "{:<16} {:4} -> {}", op.mnemonic(), offset, target)?;
    Ok(offset + 3)
}

fn invoke_instruction(
    heap: &Heap,
    chunk: &Chunk,
    op: OpCode,
    offset: usize,
    out: &mut impl Write,
) -> io::Result<usize> {
    let index = chunk.code[offset + 1];
    let argc = chunk.code[offset + 2];
    let rendered = heap.format_value(chunk.constants[index as usize]);
    writeln!(
        out,
        "{:<16} ({} args) {:4} '{}'",
        op.mnemonic(),
        argc,
        index,
        rendered
    )?;
    Ok(offset + 3)
}

fn closure_instruction(
    heap: &Heap,
    chunk: &Chunk,
    offset: usize,
    out: &mut impl Write,
) -> io::Result<usize> {
    let index = chunk.code[offset + 1];
    let function_value = chunk.constants[index as usize];
    writeln!(
        out,
        "{:<16} {:4} {}",
        OpCode::Closure.mnemonic(),
        index,
        heap.format_value(function_value)
    )?;

    // One (is_local, index) byte pair follows per captured upvalue.
    let upvalue_count = match function_value {
        Value::Obj(r) => heap.function(r).upvalue_count,
        _ => 0,
    };
    let mut next = offset + 2;
    for _ in 0..upvalue_count {
        let is_local = chunk.code[next];
        let capture_index = chunk.code[next + 1];
        writeln!(
            out,
            "{:04}      |                     {} {}",
            next,
            if is_local != 0 { "local" } else { "upvalue" },
            capture_index
        )?;
        next += 2;
    }
    Ok(next)
}
