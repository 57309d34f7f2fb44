//! Arrays: DIM, REDIM, ERASE, OPTION BASE, element access and UBOUND.
//!
//! An array with `k` dimensions is one heap block of 4-byte cells:
//!
//! ```text
//! [extent 0] .. [extent k-1] [element 0] [element 1] ...
//! ```
//!
//! Elements are stored row-major. A one-dimensional `DIM A(n)` is the
//! count `n` followed by `n` elements, `(n + 1) * 4` bytes, and element `i`
//! lives at `base + (1 + i) * 4`.
//!
//! The heap is a bump allocator that never hands memory out twice, so a
//! fresh block is already zero. REDIM takes a new block; ERASE clears the
//! existing one in place.

use crate::codegen::{ELEMENT_SIZE, GLOBAL_HEAP, Instr};
use crate::compiler::error::ErrorKind;
use crate::compiler::expr::ArithOp;
use crate::compiler::imports::HostFn;
use crate::compiler::symbols::{ArrayShape, Kind, Storage, VarId};
use crate::compiler::{CompileResult, Compiler};
use crate::lexer::{Token, TokenKind};
use wasm_encoder::ValType;

/// Most dimensions an array may have.
pub const MAX_DIMENSIONS: usize = 8;

/// Memory offset of header cell `i`.
fn cell(i: usize) -> u64 {
    (i as u64) * ELEMENT_SIZE as u64
}

impl Compiler<'_> {
    /// `DIM name(e, ...) [, name(e, ...)...]`
    pub(crate) fn dim_statement(&mut self) -> CompileResult<()> {
        loop {
            let name = self.expect_name("array name")?;
            if self.symbols.lookup(&name.text).is_some() {
                return Err(self.error_at(ErrorKind::Redefinition { name: name.name() }, &name));
            }
            let id = self.resolve(&name)?;
            self.expect(TokenKind::LeftParen, "'('")?;
            let extents = self.extents()?;
            self.declare_array(id, extents.len());
            self.allocate(id, &extents);
            if !self.match_token(TokenKind::Comma)? {
                return Ok(());
            }
        }
    }

    /// `REDIM [PRESERVE] name(e, ...) [, ...]`
    ///
    /// Declares the array if it is new. An existing array keeps its number
    /// of dimensions; PRESERVE copies the leading elements of the old block
    /// in storage order.
    pub(crate) fn redim_statement(&mut self) -> CompileResult<()> {
        let preserve = self
            .peek()?
            .is_some_and(|t| t.kind == TokenKind::Identifier && t.name() == "PRESERVE");
        if preserve {
            self.next()?;
        }
        loop {
            let name = self.expect_name("array name")?;
            let existing = match self.symbols.lookup(&name.text) {
                Some(_) => Some(self.array_id(&name)?),
                None if preserve => {
                    return Err(self.error_at(
                        ErrorKind::WrongStorage {
                            name: name.name(),
                            expected: "an array",
                        },
                        &name,
                    ));
                }
                None => None,
            };
            let id = match existing {
                Some(id) => id,
                None => self.resolve(&name)?,
            };
            self.expect(TokenKind::LeftParen, "'('")?;
            let extents = self.extents()?;
            let dims = extents.len();
            match self.symbols.get(id).array() {
                Some(shape) if shape.dims != dims => {
                    return Err(self.error_at(
                        ErrorKind::DimensionMismatch {
                            name: name.name(),
                            expected: shape.dims,
                            found: dims,
                        },
                        &name,
                    ));
                }
                Some(_) => {}
                None => self.declare_array(id, dims),
            }
            let kind = self.symbols.get(id).kind;

            let old = self.alloc_local(ValType::I32);
            self.emit_all(&[Instr::GlobalGet(id.global()), Instr::LocalSet(old)]);
            let count = self.allocate(id, &extents);
            if existing.is_some() && (preserve || kind == Kind::Str) {
                self.release_old_block(id, old, count, dims, kind, preserve);
            }
            if !self.match_token(TokenKind::Comma)? {
                return Ok(());
            }
        }
    }

    /// Moves or frees the elements of the block an array pointed at
    /// before REDIM. Does nothing if the old DIM never ran.
    fn release_old_block(
        &mut self,
        id: VarId,
        old: u32,
        count: u32,
        dims: usize,
        kind: Kind,
        preserve: bool,
    ) {
        use Instr::*;
        let old_count = self.alloc_local(ValType::I32);
        self.emit_all(&[LocalGet(old), If(None)]);
        self.emit_count(old, dims);
        self.emit(LocalSet(old_count));
        if preserve {
            let kept = self.alloc_local(ValType::I32);
            let block = self.alloc_local(ValType::I32);
            self.emit_all(&[
                LocalGet(old_count),
                LocalGet(count),
                LocalGet(old_count),
                LocalGet(count),
                I32LtS,
                Select,
                LocalSet(kept),
                GlobalGet(id.global()),
                LocalSet(block),
            ]);
            self.each_element(I32Const(0), LocalGet(kept), |c, i| {
                c.element_cell(block, dims, i);
                c.element_cell(old, dims, i);
                c.emit_all(&[I32Load(0), I32Store(0)]);
            });
            if kind == Kind::Str {
                self.free_strings(old, dims, LocalGet(kept), LocalGet(old_count));
            }
        } else {
            self.free_strings(old, dims, I32Const(0), LocalGet(old_count));
        }
        self.emit(End);
    }

    /// `ERASE name [, name...]`: frees string elements and zeroes every
    /// element. The array keeps its extents.
    pub(crate) fn erase_statement(&mut self) -> CompileResult<()> {
        use Instr::*;
        loop {
            let name = self.expect_name("array name")?;
            let id = self.array_id(&name)?;
            let var = self.symbols.get(id);
            let (kind, dims) = (var.kind, var.array().map_or(1, |shape| shape.dims));

            let block = self.alloc_local(ValType::I32);
            let count = self.alloc_local(ValType::I32);
            self.emit_all(&[GlobalGet(id.global()), LocalTee(block), If(None)]);
            self.emit_count(block, dims);
            self.emit(LocalSet(count));
            self.each_element(I32Const(0), LocalGet(count), |c, i| {
                if kind == Kind::Str {
                    c.element_cell(block, dims, i);
                    c.emit(I32Load(0));
                    c.call_host(HostFn::StrFree);
                }
                c.element_cell(block, dims, i);
                c.emit_all(&[I32Const(0), I32Store(0)]);
            });
            self.emit(End);
            if !self.match_token(TokenKind::Comma)? {
                return Ok(());
            }
        }
    }

    /// `OPTION BASE 0|1`: lowest index of arrays declared afterwards.
    pub(crate) fn option_statement(&mut self) -> CompileResult<()> {
        let word = self.expect_name("BASE")?;
        if word.name() != "BASE" {
            return Err(self.unexpected("BASE", Some(word)));
        }
        let value = self.expect(TokenKind::IntegerLiteral, "0 or 1")?;
        match value.int_value() {
            Some(base @ (0 | 1)) => {
                self.option_base = Some(base);
                Ok(())
            }
            _ => Err(self.unexpected("0 or 1", Some(value))),
        }
    }

    /// Slot of a name declared with DIM or REDIM.
    pub(crate) fn array_id(&mut self, token: &Token) -> CompileResult<VarId> {
        match self.symbols.lookup(&token.text) {
            Some(id) if self.symbols.get(id).is_array() => Ok(id),
            _ => Err(self.error_at(
                ErrorKind::WrongStorage {
                    name: token.name(),
                    expected: "an array",
                },
                token,
            )),
        }
    }

    /// Pushes the address of `name(i, ...)`. The opening parenthesis is
    /// already consumed; the closing one is consumed here.
    ///
    /// For one dimension this is `base + (1 + i - offset) * 4`; each further
    /// index multiplies the running index by that dimension's extent.
    pub(crate) fn element_address(&mut self, id: VarId, token: &Token) -> CompileResult<()> {
        let shape = self
            .symbols
            .get(id)
            .array()
            .unwrap_or(ArrayShape { dims: 1, base: None });
        let offset = shape.offset();
        let global = id.global();
        self.emit(Instr::GlobalGet(global));
        self.int_expression()?;
        let mut found = 1;
        while self.match_token(TokenKind::Comma)? {
            if offset != 0 {
                self.push_i32(offset);
                self.arith(ArithOp::Sub, Kind::Int, Kind::Int)?;
            }
            self.emit_all(&[
                Instr::GlobalGet(global),
                Instr::I32Load(cell(found)),
                Instr::I32Mul,
            ]);
            self.int_expression()?;
            self.emit(Instr::I32Add);
            found += 1;
        }
        self.expect(TokenKind::RightParen, "')'")?;
        if found != shape.dims {
            return Err(self.error_at(
                ErrorKind::DimensionMismatch {
                    name: token.name(),
                    expected: shape.dims,
                    found,
                },
                token,
            ));
        }
        self.push_i32(shape.dims as i32 - offset);
        self.arith(ArithOp::Add, Kind::Int, Kind::Int)?;
        self.push_i32(ELEMENT_SIZE as i32);
        self.arith(ArithOp::Mul, Kind::Int, Kind::Int)?;
        self.emit(Instr::I32Add);
        Ok(())
    }

    /// `name(i, ...) = expr`; the opening parenthesis is consumed.
    pub(crate) fn store_element(&mut self, id: VarId, token: &Token) -> CompileResult<()> {
        let element = self.symbols.get(id).kind;
        self.element_address(id, token)?;
        self.expect(TokenKind::Equals, "'='")?;
        match element {
            Kind::Str => {
                let address = self.alloc_local(ValType::I32);
                self.emit(Instr::LocalSet(address));
                let kind = self.expression()?;
                if kind != Kind::Str {
                    return Err(self.error_at(
                        ErrorKind::mismatch(format!("cannot store {kind} in string array")),
                        token,
                    ));
                }
                let fresh = self.alloc_local(ValType::I32);
                self.call_host(HostFn::StrCopy);
                self.emit_all(&[
                    Instr::LocalSet(fresh),
                    Instr::LocalGet(address),
                    Instr::I32Load(0),
                ]);
                self.call_host(HostFn::StrFree);
                self.emit_all(&[
                    Instr::LocalGet(address),
                    Instr::LocalGet(fresh),
                    Instr::I32Store(0),
                ]);
            }
            Kind::Float => {
                self.expression_as(Kind::Float)?;
                self.emit(Instr::F32Store(0));
            }
            Kind::Int => {
                self.int_expression()?;
                self.emit(Instr::I32Store(0));
            }
        }
        Ok(())
    }

    /// `UBOUND(name [, dimension])`: the declared extent, read from the
    /// array header. The keyword is consumed.
    pub(crate) fn ubound(&mut self) -> CompileResult<Kind> {
        self.expect(TokenKind::LeftParen, "'('")?;
        let array = self.expect_name("array name")?;
        let id = self.array_id(&array)?;
        self.emit(Instr::GlobalGet(id.global()));
        if self.match_token(TokenKind::Comma)? {
            self.int_expression()?;
            self.push_i32(1);
            self.arith(ArithOp::Sub, Kind::Int, Kind::Int)?;
            self.push_i32(ELEMENT_SIZE as i32);
            self.arith(ArithOp::Mul, Kind::Int, Kind::Int)?;
            self.emit(Instr::I32Add);
        }
        self.expect(TokenKind::RightParen, "')'")?;
        self.emit(Instr::I32Load(0));
        Ok(Kind::Int)
    }

    /// Parses `e, ...)` into locals, one per dimension.
    fn extents(&mut self) -> CompileResult<Vec<u32>> {
        let mut locals = Vec::new();
        loop {
            if locals.len() == MAX_DIMENSIONS {
                return Err(self.error(ErrorKind::LimitExceeded {
                    what: "array dimensions",
                    limit: MAX_DIMENSIONS,
                }));
            }
            self.int_expression()?;
            let local = self.alloc_local(ValType::I32);
            self.emit(Instr::LocalSet(local));
            locals.push(local);
            if !self.match_token(TokenKind::Comma)? {
                break;
            }
        }
        self.expect(TokenKind::RightParen, "')'")?;
        Ok(locals)
    }

    fn declare_array(&mut self, id: VarId, dims: usize) {
        let base = self.option_base;
        self.symbols.get_mut(id).storage = Storage::Array(ArrayShape { dims, base });
        self.symbols.settle(id);
    }

    /// Takes a block for `extents` from the heap, points the array at it
    /// and writes the header. Returns the local holding the element count.
    fn allocate(&mut self, id: VarId, extents: &[u32]) -> u32 {
        let count = match extents {
            [single] => *single,
            _ => {
                let count = self.alloc_local(ValType::I32);
                self.emit(Instr::I32Const(1));
                for extent in extents {
                    self.emit_all(&[Instr::LocalGet(*extent), Instr::I32Mul]);
                }
                self.emit(Instr::LocalSet(count));
                count
            }
        };
        let global = id.global();
        self.emit_all(&[Instr::GlobalGet(GLOBAL_HEAP), Instr::GlobalSet(global)]);
        for (i, extent) in extents.iter().enumerate() {
            self.emit_all(&[
                Instr::GlobalGet(global),
                Instr::LocalGet(*extent),
                Instr::I32Store(cell(i)),
            ]);
        }
        self.emit_all(&[
            Instr::GlobalGet(GLOBAL_HEAP),
            Instr::LocalGet(count),
            Instr::I32Const(extents.len() as i32),
            Instr::I32Add,
            Instr::I32Const(ELEMENT_SIZE as i32),
            Instr::I32Mul,
            Instr::I32Add,
            Instr::GlobalSet(GLOBAL_HEAP),
        ]);
        count
    }

    /// Pushes the product of the extents stored in the header at `block`.
    fn emit_count(&mut self, block: u32, dims: usize) {
        self.emit(Instr::I32Const(1));
        for i in 0..dims {
            self.emit_all(&[Instr::LocalGet(block), Instr::I32Load(cell(i)), Instr::I32Mul]);
        }
    }

    /// Pushes the address of flat element `index` of the block at `block`.
    fn element_cell(&mut self, block: u32, dims: usize, index: u32) {
        self.emit_all(&[
            Instr::LocalGet(block),
            Instr::LocalGet(index),
            Instr::I32Const(dims as i32),
            Instr::I32Add,
            Instr::I32Const(ELEMENT_SIZE as i32),
            Instr::I32Mul,
            Instr::I32Add,
        ]);
    }

    /// Frees string elements `from..to` of the block at `block`.
    fn free_strings(&mut self, block: u32, dims: usize, from: Instr, to: Instr) {
        self.each_element(from, to, |c, i| {
            c.element_cell(block, dims, i);
            c.emit(Instr::I32Load(0));
            c.call_host(HostFn::StrFree);
        });
    }

    /// Emits `for i = from; i < to; i++ { body }` over a fresh local.
    fn each_element(&mut self, from: Instr, to: Instr, body: impl FnOnce(&mut Self, u32)) {
        use Instr::*;
        let i = self.alloc_local(ValType::I32);
        self.emit_all(&[from, LocalSet(i), Block, Loop, LocalGet(i), to, I32GeS, BrIf(1)]);
        body(self, i);
        self.emit_all(&[LocalGet(i), I32Const(1), I32Add, LocalSet(i), Br(0), End, End]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{CallTarget, GLOBAL_LINE};
    use crate::compiler::compile_program;
    use crate::compiler::tests::{build, fail, setup_body};

    fn shape(source: &str, name: &str) -> ArrayShape {
        let program = crate::compiler::analyze(source);
        assert!(program.error.is_none(), "{:?}", program.error);
        let id = program.symbols.lookup(name).unwrap();
        program.symbols.get(id).array().unwrap()
    }

    #[test]
    fn test_dim_bumps_heap() {
        let body = setup_body("DIM A(3)");
        assert_eq!(
            &body[..5],
            &[
                Instr::I32Const(1),
                Instr::GlobalSet(GLOBAL_LINE),
                Instr::I32Const(3),
                Instr::LocalSet(0),
                Instr::GlobalGet(GLOBAL_HEAP),
            ]
        );
        assert_eq!(body.last(), Some(&Instr::GlobalSet(GLOBAL_HEAP)));
    }

    #[test]
    fn test_dim_twice_is_redefinition() {
        let err = fail("DIM A(3)\nDIM A(4)");
        assert_eq!(err.kind, ErrorKind::Redefinition { name: "A".into() });
    }

    #[test]
    fn test_array_element_access() {
        build("DIM A(3), B#(2), C$(1)\nA(1) = 5\nB#(0) = A(1) / 2\nC$(0) = \"x\"\nPRINT A(1) + B#(0)\nPRINTS C$(0)");
        let err = fail("DIM A(3)\nA = 1");
        assert!(matches!(err.kind, ErrorKind::WrongStorage { .. }));
    }

    #[test]
    fn test_constant_index_folds_to_one_offset() {
        let body = setup_body("DIM A(4)\nX = A(2)");
        let tail = &body[body.len() - 5..];
        assert_eq!(
            tail,
            &[
                Instr::GlobalGet(4),
                Instr::I32Const(12),
                Instr::I32Add,
                Instr::I32Load(0),
                Instr::GlobalSet(5),
            ]
        );
    }

    #[test]
    fn test_multi_dimensional_header() {
        assert_eq!(shape("DIM M(2, 3)", "M"), ArrayShape { dims: 2, base: None });
        let body = setup_body("DIM M(2, 3)");
        assert!(body.contains(&Instr::I32Store(4)));
        build("DIM M(2, 3)\nM(1, 2) = 7\nPRINT M(1, 2)\nPRINT UBOUND(M, 2)");
    }

    #[test]
    fn test_index_count_must_match() {
        let err = fail("DIM M(2, 3)\nM(1) = 1");
        assert_eq!(
            err.kind,
            ErrorKind::DimensionMismatch {
                name: "M".into(),
                expected: 2,
                found: 1
            }
        );
        let err = fail("DIM A(4)\nX = A(1, 1)");
        assert!(matches!(err.kind, ErrorKind::DimensionMismatch { found: 2, .. }));
    }

    #[test]
    fn test_dimension_limit() {
        let err = fail("DIM A(1, 1, 1, 1, 1, 1, 1, 1, 1)");
        assert!(matches!(err.kind, ErrorKind::LimitExceeded { limit: MAX_DIMENSIONS, .. }));
    }

    #[test]
    fn test_option_base() {
        assert_eq!(shape("OPTION BASE 1\nDIM A(3)", "A").base, Some(1));
        assert_eq!(shape("DIM A(3)\nOPTION BASE 1", "A").base, None);
        assert!(matches!(fail("OPTION BASE 2").kind, ErrorKind::UnexpectedToken { .. }));
        assert!(matches!(fail("OPTION EXPLICIT").kind, ErrorKind::UnexpectedToken { .. }));
    }

    #[test]
    fn test_redim_declares_and_keeps_dimensions() {
        assert_eq!(shape("REDIM A(5)", "A").dims, 1);
        build("DIM A(2)\nREDIM A(8)\nREDIM PRESERVE A(3)");
        let err = fail("DIM M(2, 2)\nREDIM M(4)");
        assert!(matches!(err.kind, ErrorKind::DimensionMismatch { expected: 2, found: 1, .. }));
        let err = fail("REDIM PRESERVE A(3)");
        assert!(matches!(err.kind, ErrorKind::WrongStorage { .. }));
        let err = fail("X = 1\nREDIM X(3)");
        assert!(matches!(err.kind, ErrorKind::WrongStorage { .. }));
    }

    #[test]
    fn test_redim_frees_old_strings() {
        let free = Instr::Call(CallTarget::Host(HostFn::StrFree));
        assert!(setup_body("DIM S$(2)\nREDIM S$(4)").contains(&free));
        assert!(!setup_body("DIM A(2)\nREDIM A(4)").contains(&free));
        assert!(!setup_body("REDIM S$(4)").contains(&free));
    }

    #[test]
    fn test_erase() {
        build("DIM A(3), S$(2)\nERASE A, S$");
        let free = Instr::Call(CallTarget::Host(HostFn::StrFree));
        assert!(!setup_body("DIM A(3)\nERASE A").contains(&free));
        assert!(setup_body("DIM S$(3)\nERASE S$").contains(&free));
        let err = fail("X = 1\nERASE X");
        assert!(matches!(err.kind, ErrorKind::WrongStorage { .. }));
    }

    #[test]
    fn test_ubound_reads_header() {
        let body = setup_body("DIM A(10)\nN = UBOUND(A)");
        assert_eq!(
            &body[body.len() - 3..],
            &[Instr::GlobalGet(4), Instr::I32Load(0), Instr::GlobalSet(5)]
        );
        let err = compile_program("B = 1\nN = UBOUND(B)").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::WrongStorage { .. }));
    }
}
