//! Code generation for bas2wasm.
//!
//! This module owns everything below the statement compiler: the symbolic
//! instruction list, per-function buffers with the constant fold window,
//! the static memory layout and the module assembler.
//!
//! # Architecture
//!
//! ```text
//! Compiler ──emit──▶ FunctionContext (Vec<Instr>) ─┐
//!          ──intern─▶ StringPool, DataItem list    ├─▶ assemble() ─▶ .wasm bytes
//!          ──mark───▶ ImportRegistry               ┘
//! ```
//!
//! # Memory map
//!
//! | Address | Contents |
//! |---|---|
//! | `0` | string pool, NUL-terminated literals |
//! | pool end, 4-aligned | data table: count, then `{tag, value}` pairs |
//! | table end | bump-allocated heap (arrays) |
//! | [`SCRATCH_BASE`] | 256-byte argument buffer for `host_printf` |
//! | [`FILE_TABLE_BASE`] | host file handles for channels 1-4 |

mod assemble;
mod error;
mod function;
mod instr;
mod layout;

pub use assemble::{Assembled, ModuleSummary, Program, assemble};
pub use error::AssembleError;
pub use function::{FoldWindow, FuncId, FunctionContext};
pub use instr::{CallTarget, Const, Instr};
pub use layout::{DataItem, MemoryLayout, StringPool};

/// Global 0: line number of the statement being executed.
pub const GLOBAL_LINE: u32 = 0;
/// Global 1: next free heap address.
pub const GLOBAL_HEAP: u32 = 1;
/// Global 2: address of the data table.
pub const GLOBAL_DATA_BASE: u32 = 2;
/// Global 3: index of the next DATA item to READ.
pub const GLOBAL_DATA_INDEX: u32 = 3;
/// Globals before the first variable slot.
pub const RESERVED_GLOBALS: u32 = 4;

/// Start of the formatted-print argument buffer.
pub const SCRATCH_BASE: u32 = 0xF000;
/// Size of the argument buffer in bytes.
pub const SCRATCH_SIZE: u32 = 256;
/// Start of the file-handle table.
pub const FILE_TABLE_BASE: u32 = 0xF100;
/// Number of file channels.
pub const FILE_CHANNELS: i32 = 4;

/// Bytes per array element.
pub const ELEMENT_SIZE: u32 = 4;
/// Bytes per data-table entry.
pub const DATA_ITEM_SIZE: u32 = 8;
