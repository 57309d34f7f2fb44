//! Symbolic instruction list.
//!
//! Function bodies are built as `Vec<Instr>` rather than raw bytes. Call
//! targets stay symbolic ([`CallTarget`]) until assembly, when they are
//! resolved against the compacted import table; constant folding works by
//! truncating the list instead of splicing encoded bytes.

use crate::compiler::imports::HostFn;
use crate::codegen::FuncId;
use wasm_encoder::{BlockType, Instruction, MemArg, ValType};

/// Destination of a `call`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// A host import, by catalog entry.
    Host(HostFn),
    /// A locally defined function.
    Function(FuncId),
}

/// A literal pushed by `i32.const` or `f32.const`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Const {
    I32(i32),
    F32(f32),
}

impl Const {
    /// WASM type of the value.
    pub fn val_type(self) -> ValType {
        match self {
            Const::I32(_) => ValType::I32,
            Const::F32(_) => ValType::F32,
        }
    }

    /// The value widened to float.
    pub fn as_f32(self) -> f32 {
        match self {
            Const::I32(v) => v as f32,
            Const::F32(v) => v,
        }
    }

    /// The push instruction for this value.
    pub fn instr(self) -> Instr {
        match self {
            Const::I32(v) => Instr::I32Const(v),
            Const::F32(v) => Instr::F32Const(v),
        }
    }
}

/// The subset of WASM the compiler emits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instr {
    // Control
    Block,
    Loop,
    /// `if` with an optional result type
    If(Option<ValType>),
    Else,
    End,
    Br(u32),
    BrIf(u32),
    Return,
    Call(CallTarget),
    Drop,
    Select,

    // Variables
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    // Memory; the operand is the static offset
    I32Load(u64),
    F32Load(u64),
    I32Store(u64),
    F32Store(u64),

    // Constants
    I32Const(i32),
    F32Const(f32),

    // Comparison
    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32GtS,
    I32LeS,
    I32GeS,
    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,

    // Arithmetic
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32RemS,
    I32And,
    I32Or,
    I32Xor,
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Sqrt,
    F32Abs,
    F32Neg,
    F32Ceil,
    F32Floor,

    // Conversion
    I32TruncF32S,
    F32ConvertI32S,
}

impl Instr {
    /// The literal pushed, if this is a constant load.
    pub fn as_const(&self) -> Option<Const> {
        match *self {
            Instr::I32Const(v) => Some(Const::I32(v)),
            Instr::F32Const(v) => Some(Const::F32(v)),
            _ => None,
        }
    }

    /// Change in structured nesting depth caused by this instruction.
    pub fn depth_delta(&self) -> i32 {
        match self {
            Instr::Block | Instr::Loop | Instr::If(_) => 1,
            Instr::End => -1,
            _ => 0,
        }
    }

    /// Encodes this instruction, resolving call targets through `resolve`.
    pub fn lower<F>(&self, resolve: F) -> Instruction<'static>
    where
        F: Fn(CallTarget) -> u32,
    {
        match *self {
            Instr::Block => Instruction::Block(BlockType::Empty),
            Instr::Loop => Instruction::Loop(BlockType::Empty),
            Instr::If(None) => Instruction::If(BlockType::Empty),
            Instr::If(Some(ty)) => Instruction::If(BlockType::Result(ty)),
            Instr::Else => Instruction::Else,
            Instr::End => Instruction::End,
            Instr::Br(depth) => Instruction::Br(depth),
            Instr::BrIf(depth) => Instruction::BrIf(depth),
            Instr::Return => Instruction::Return,
            Instr::Call(target) => Instruction::Call(resolve(target)),
            Instr::Drop => Instruction::Drop,
            Instr::Select => Instruction::Select,

            Instr::LocalGet(i) => Instruction::LocalGet(i),
            Instr::LocalSet(i) => Instruction::LocalSet(i),
            Instr::LocalTee(i) => Instruction::LocalTee(i),
            Instr::GlobalGet(i) => Instruction::GlobalGet(i),
            Instr::GlobalSet(i) => Instruction::GlobalSet(i),

            Instr::I32Load(offset) => Instruction::I32Load(mem_arg(offset)),
            Instr::F32Load(offset) => Instruction::F32Load(mem_arg(offset)),
            Instr::I32Store(offset) => Instruction::I32Store(mem_arg(offset)),
            Instr::F32Store(offset) => Instruction::F32Store(mem_arg(offset)),

            Instr::I32Const(v) => Instruction::I32Const(v),
            Instr::F32Const(v) => Instruction::F32Const(v.into()),

            Instr::I32Eqz => Instruction::I32Eqz,
            Instr::I32Eq => Instruction::I32Eq,
            Instr::I32Ne => Instruction::I32Ne,
            Instr::I32LtS => Instruction::I32LtS,
            Instr::I32GtS => Instruction::I32GtS,
            Instr::I32LeS => Instruction::I32LeS,
            Instr::I32GeS => Instruction::I32GeS,
            Instr::F32Eq => Instruction::F32Eq,
            Instr::F32Ne => Instruction::F32Ne,
            Instr::F32Lt => Instruction::F32Lt,
            Instr::F32Gt => Instruction::F32Gt,
            Instr::F32Le => Instruction::F32Le,
            Instr::F32Ge => Instruction::F32Ge,

            Instr::I32Add => Instruction::I32Add,
            Instr::I32Sub => Instruction::I32Sub,
            Instr::I32Mul => Instruction::I32Mul,
            Instr::I32DivS => Instruction::I32DivS,
            Instr::I32RemS => Instruction::I32RemS,
            Instr::I32And => Instruction::I32And,
            Instr::I32Or => Instruction::I32Or,
            Instr::I32Xor => Instruction::I32Xor,
            Instr::F32Add => Instruction::F32Add,
            Instr::F32Sub => Instruction::F32Sub,
            Instr::F32Mul => Instruction::F32Mul,
            Instr::F32Div => Instruction::F32Div,
            Instr::F32Sqrt => Instruction::F32Sqrt,
            Instr::F32Abs => Instruction::F32Abs,
            Instr::F32Neg => Instruction::F32Neg,
            Instr::F32Ceil => Instruction::F32Ceil,
            Instr::F32Floor => Instruction::F32Floor,

            Instr::I32TruncF32S => Instruction::I32TruncF32S,
            Instr::F32ConvertI32S => Instruction::F32ConvertI32S,
        }
    }
}

fn mem_arg(offset: u64) -> MemArg {
    MemArg {
        offset,
        align: 2,
        memory_index: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_const_accessors() {
        assert_eq!(Instr::I32Const(7).as_const(), Some(Const::I32(7)));
        assert_eq!(Instr::F32Const(1.5).as_const(), Some(Const::F32(1.5)));
        assert_eq!(Instr::I32Add.as_const(), None);
        assert_eq!(Const::I32(3).as_f32(), 3.0);
        assert_eq!(Const::F32(2.0).instr(), Instr::F32Const(2.0));
    }

    #[test]
    fn test_depth_delta() {
        let body = [
            Instr::Block,
            Instr::Loop,
            Instr::If(None),
            Instr::End,
            Instr::End,
            Instr::End,
        ];
        assert_eq!(body.iter().map(Instr::depth_delta).sum::<i32>(), 0);
    }

    #[test]
    fn test_lower_resolves_calls() {
        let call = Instr::Call(CallTarget::Host(HostFn::PrintI32));
        let lowered = call.lower(|target| match target {
            CallTarget::Host(_) => 4,
            CallTarget::Function(_) => 99,
        });
        assert!(matches!(lowered, Instruction::Call(4)));
    }
}
