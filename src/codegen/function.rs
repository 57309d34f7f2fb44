//! Per-function code buffers and the constant fold window.

use crate::codegen::instr::{CallTarget, Const, Instr};
use log::trace;
use wasm_encoder::{Function, Instruction, ValType};

/// Index of a locally defined function, in definition order.
///
/// `FuncId(0)` is always the `setup` entry point. The final WASM function
/// index is this value plus the number of imports actually used, which is
/// only known once compilation finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub u32);

impl FuncId {
    /// The top-level body.
    pub const SETUP: FuncId = FuncId(0);

    /// Position in the function table.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Slot {
    index: usize,
    value: Const,
}

/// The two most recent constant pushes of a function body.
///
/// A slot is only meaningful while it sits at the tail of the body; any
/// other instruction clears the window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FoldWindow {
    older: Option<Slot>,
    newer: Option<Slot>,
}

impl FoldWindow {
    fn record(&mut self, index: usize, value: Const) {
        self.older = self.newer.take();
        self.newer = Some(Slot { index, value });
    }

    fn clear(&mut self) {
        *self = FoldWindow::default();
    }

    /// Rebuilds the window from whatever constants end `body`.
    fn reseed(&mut self, body: &[Instr]) {
        self.clear();
        let n = body.len();
        if n >= 2 {
            if let Some(value) = body[n - 2].as_const() {
                if body[n - 1].as_const().is_some() {
                    self.newer = Some(Slot {
                        index: n - 2,
                        value,
                    });
                }
            }
        }
        if let Some(value) = body.last().and_then(Instr::as_const) {
            self.record(n - 1, value);
        }
    }
}

/// One function under construction.
#[derive(Debug, Clone)]
pub struct FunctionContext {
    /// Source name (`setup` for the top level).
    pub name: String,
    /// Parameter types.
    pub params: Vec<ValType>,
    /// Result type, if any.
    pub result: Option<ValType>,
    locals: Vec<ValType>,
    body: Vec<Instr>,
    depth: u32,
    window: FoldWindow,
}

impl FunctionContext {
    /// Opens an empty function.
    pub fn new(name: impl Into<String>, params: Vec<ValType>, result: Option<ValType>) -> Self {
        Self {
            name: name.into(),
            params,
            result,
            locals: Vec::new(),
            body: Vec::new(),
            depth: 0,
            window: FoldWindow::default(),
        }
    }

    /// Declares a new local and returns its index.
    pub fn alloc_local(&mut self, ty: ValType) -> u32 {
        self.locals.push(ty);
        (self.params.len() + self.locals.len() - 1) as u32
    }

    /// Appends an instruction, tracking nesting depth and the fold window.
    pub fn emit(&mut self, instr: Instr) {
        match instr.as_const() {
            Some(value) => self.window.record(self.body.len(), value),
            None => self.window.clear(),
        }
        self.depth = self.depth.saturating_add_signed(instr.depth_delta());
        self.body.push(instr);
    }

    /// Appends several instructions.
    pub fn emit_all(&mut self, instrs: &[Instr]) {
        for instr in instrs {
            self.emit(*instr);
        }
    }

    /// Pushes a literal.
    pub fn push_const(&mut self, value: Const) {
        self.emit(value.instr());
    }

    /// Values of the last two instructions if both are adjacent constant
    /// pushes, in push order.
    pub fn const_pair(&self) -> Option<(Const, Const)> {
        let older = self.window.older?;
        let newer = self.window.newer?;
        if older.index + 1 != newer.index || newer.index + 1 != self.body.len() {
            return None;
        }
        Some((older.value, newer.value))
    }

    /// Like [`FunctionContext::const_pair`], but also removes the two pushes.
    pub fn take_const_pair(&mut self) -> Option<(Const, Const)> {
        let (older, newer) = self.const_pair()?;
        self.body.truncate(self.body.len() - 2);
        self.window.reseed(&self.body);
        trace!("{}: folding {:?} and {:?}", self.name, older, newer);
        Some((older, newer))
    }

    /// Removes the last instruction if it is a constant push.
    pub fn take_top_const(&mut self) -> Option<Const> {
        let newer = self.window.newer?;
        if newer.index + 1 != self.body.len() {
            return None;
        }
        self.body.truncate(newer.index);
        self.window.reseed(&self.body);
        Some(newer.value)
    }

    /// Current structured nesting depth.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// The instructions emitted so far.
    pub fn body(&self) -> &[Instr] {
        &self.body
    }

    /// Declared locals, excluding parameters.
    pub fn locals(&self) -> &[ValType] {
        &self.locals
    }

    /// Parameter and result lists for the type section.
    pub fn signature(&self) -> (Vec<ValType>, Vec<ValType>) {
        (self.params.clone(), self.result.into_iter().collect())
    }

    /// Encodes the body, resolving call targets through `resolve`.
    pub fn encode<F>(&self, resolve: F) -> Function
    where
        F: Fn(CallTarget) -> u32,
    {
        let mut function = Function::new_with_locals_types(self.locals.iter().copied());
        for instr in &self.body {
            function.instruction(&instr.lower(&resolve));
        }
        function.instruction(&Instruction::End);
        function
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> FunctionContext {
        FunctionContext::new("setup", vec![], None)
    }

    #[test]
    fn test_adjacent_constants_fold() {
        let mut f = ctx();
        f.push_const(Const::I32(2));
        f.push_const(Const::I32(3));
        assert_eq!(f.take_const_pair(), Some((Const::I32(2), Const::I32(3))));
        assert!(f.body().is_empty());
    }

    #[test]
    fn test_intervening_instruction_blocks_fold() {
        let mut f = ctx();
        f.push_const(Const::I32(2));
        f.emit(Instr::GlobalGet(4));
        f.push_const(Const::I32(3));
        assert_eq!(f.take_const_pair(), None);
        assert_eq!(f.body().len(), 3);
    }

    #[test]
    fn test_window_reseeds_after_fold() {
        // 2 + (3 * 4): after folding 3*4 the 2 and 12 are adjacent again
        let mut f = ctx();
        f.push_const(Const::I32(2));
        f.push_const(Const::I32(3));
        f.push_const(Const::I32(4));
        let (a, b) = f.take_const_pair().unwrap();
        assert_eq!((a, b), (Const::I32(3), Const::I32(4)));
        f.push_const(Const::I32(12));
        assert_eq!(f.take_const_pair(), Some((Const::I32(2), Const::I32(12))));
    }

    #[test]
    fn test_take_top_const() {
        let mut f = ctx();
        f.emit(Instr::GlobalGet(4));
        f.push_const(Const::F32(1.5));
        assert_eq!(f.take_top_const(), Some(Const::F32(1.5)));
        assert_eq!(f.take_top_const(), None);
        assert_eq!(f.body(), &[Instr::GlobalGet(4)]);
    }

    #[test]
    fn test_depth_tracking() {
        let mut f = ctx();
        f.emit(Instr::Block);
        f.emit(Instr::Loop);
        assert_eq!(f.depth(), 2);
        f.emit(Instr::End);
        assert_eq!(f.depth(), 1);
    }

    #[test]
    fn test_local_indices_follow_params() {
        let mut f = FunctionContext::new("S", vec![ValType::I32, ValType::F32], None);
        assert_eq!(f.alloc_local(ValType::I32), 2);
        assert_eq!(f.alloc_local(ValType::F32), 3);
        assert_eq!(f.locals(), &[ValType::I32, ValType::F32]);
    }
}
