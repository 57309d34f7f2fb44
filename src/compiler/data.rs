//! DATA, READ and RESTORE.
//!
//! DATA literals are collected at compile time and written into the data
//! table by the assembler. READ walks the table with a runtime cursor
//! (global 3), checking each item's tag to load it with the right type.

use crate::codegen::{
    DATA_ITEM_SIZE, DataItem, GLOBAL_DATA_BASE, GLOBAL_DATA_INDEX, Instr,
};
use crate::compiler::error::ErrorKind;
use crate::compiler::imports::HostFn;
use crate::compiler::symbols::Kind;
use crate::compiler::{CompileResult, Compiler};
use crate::lexer::TokenKind;
use wasm_encoder::ValType;

/// Largest number of DATA items in one program.
pub const MAX_DATA_ITEMS: usize = 1024;

impl Compiler<'_> {
    /// `DATA 1, -2.5, "text"`; emits no code.
    pub(crate) fn data_statement(&mut self) -> CompileResult<()> {
        loop {
            let negative = self.match_token(TokenKind::Minus)?;
            let Some(token) = self.next()? else {
                return Err(self.unexpected("literal", None));
            };
            let item = match token.kind {
                TokenKind::IntegerLiteral | TokenKind::HexLiteral => {
                    let v = token.int_value().unwrap_or_default();
                    DataItem::Int(if negative { v.wrapping_neg() } else { v })
                }
                TokenKind::FloatLiteral => {
                    let v = token.float_value().unwrap_or_default();
                    DataItem::Float(if negative { -v } else { v })
                }
                TokenKind::StringLiteral if !negative => {
                    let text = token.string_value().unwrap_or_default();
                    DataItem::Str(self.pool.intern(&text))
                }
                _ => return Err(self.unexpected("literal", Some(token))),
            };
            if self.data.len() >= MAX_DATA_ITEMS {
                return Err(self.error(ErrorKind::LimitExceeded {
                    what: "DATA items",
                    limit: MAX_DATA_ITEMS,
                }));
            }
            self.data.push(item);
            if !self.match_token(TokenKind::Comma)? {
                return Ok(());
            }
        }
    }

    /// `READ a, b#, c$`.
    pub(crate) fn read_statement(&mut self) -> CompileResult<()> {
        loop {
            let token = self.expect_name("variable name")?;
            let id = self.resolve(&token)?;
            self.check_assignable(id, &token)?;
            let kind = self.symbols.settle(id);
            let global = id.global();

            // address of the current item
            let item = self.alloc_local(ValType::I32);
            self.emit_all(&[
                Instr::GlobalGet(GLOBAL_DATA_BASE),
                Instr::I32Const(4),
                Instr::I32Add,
                Instr::GlobalGet(GLOBAL_DATA_INDEX),
                Instr::I32Const(DATA_ITEM_SIZE as i32),
                Instr::I32Mul,
                Instr::I32Add,
                Instr::LocalSet(item),
            ]);

            match kind {
                Kind::Str => {
                    let fresh = self.alloc_local(ValType::I32);
                    self.emit_all(&[Instr::LocalGet(item), Instr::I32Load(4)]);
                    self.call_host(HostFn::StrCopy);
                    self.emit_all(&[Instr::LocalSet(fresh), Instr::GlobalGet(global)]);
                    self.call_host(HostFn::StrFree);
                    self.emit_all(&[Instr::LocalGet(fresh), Instr::GlobalSet(global)]);
                }
                Kind::Float => self.emit_all(&[
                    Instr::LocalGet(item),
                    Instr::I32Load(0),
                    Instr::I32Const(DataItem::TAG_FLOAT),
                    Instr::I32Eq,
                    Instr::If(Some(ValType::F32)),
                    Instr::LocalGet(item),
                    Instr::F32Load(4),
                    Instr::Else,
                    Instr::LocalGet(item),
                    Instr::I32Load(4),
                    Instr::F32ConvertI32S,
                    Instr::End,
                    Instr::GlobalSet(global),
                ]),
                Kind::Int => self.emit_all(&[
                    Instr::LocalGet(item),
                    Instr::I32Load(0),
                    Instr::I32Const(DataItem::TAG_FLOAT),
                    Instr::I32Eq,
                    Instr::If(Some(ValType::I32)),
                    Instr::LocalGet(item),
                    Instr::F32Load(4),
                    Instr::I32TruncF32S,
                    Instr::Else,
                    Instr::LocalGet(item),
                    Instr::I32Load(4),
                    Instr::End,
                    Instr::GlobalSet(global),
                ]),
            }

            self.emit_all(&[
                Instr::GlobalGet(GLOBAL_DATA_INDEX),
                Instr::I32Const(1),
                Instr::I32Add,
                Instr::GlobalSet(GLOBAL_DATA_INDEX),
            ]);
            if !self.match_token(TokenKind::Comma)? {
                return Ok(());
            }
        }
    }

    /// `RESTORE`: rewinds the cursor.
    pub(crate) fn restore_statement(&mut self) {
        self.emit_all(&[Instr::I32Const(0), Instr::GlobalSet(GLOBAL_DATA_INDEX)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_program;
    use crate::compiler::tests::{build, fail, setup_body};

    #[test]
    fn test_data_collects_literals() {
        let program = compile_program("DATA 1, -2, 2.5, \"ab\"\nDATA &H10, -0.5").unwrap();
        assert_eq!(
            program.data,
            vec![
                DataItem::Int(1),
                DataItem::Int(-2),
                DataItem::Float(2.5),
                DataItem::Str(1),
                DataItem::Int(16),
                DataItem::Float(-0.5),
            ]
        );
    }

    #[test]
    fn test_data_emits_no_code() {
        let body = setup_body("DATA 1, 2, 3");
        assert_eq!(body.len(), 2);
    }

    #[test]
    fn test_data_rejects_expressions() {
        let err = fail("DATA X");
        assert!(matches!(err.kind, ErrorKind::UnexpectedToken { .. }));
        let err = fail("DATA -\"a\"");
        assert!(matches!(err.kind, ErrorKind::UnexpectedToken { .. }));
    }

    #[test]
    fn test_read_each_kind() {
        build("DATA 1, 2.5, \"x\"\nREAD A, B#, C$\nRESTORE\nREAD D");
    }

    #[test]
    fn test_read_advances_cursor() {
        let body = setup_body("READ A");
        assert_eq!(
            &body[body.len() - 4..],
            &[
                Instr::GlobalGet(GLOBAL_DATA_INDEX),
                Instr::I32Const(1),
                Instr::I32Add,
                Instr::GlobalSet(GLOBAL_DATA_INDEX),
            ]
        );
    }

    #[test]
    fn test_read_into_constant_rejected() {
        let err = fail("CONST K = 1\nREAD K");
        assert_eq!(err.kind, ErrorKind::ConstantAssignment { name: "K".into() });
    }
}
