//! Statement dispatcher, assignment, CONST and SWAP.

use crate::codegen::Instr;
use crate::compiler::builtins::lookup_builtin;
use crate::compiler::error::ErrorKind;
use crate::compiler::imports::HostFn;
use crate::compiler::procedures::CallArgs;
use crate::compiler::symbols::{Kind, Storage, VarId};
use crate::compiler::{CompileResult, Compiler};
use crate::lexer::{Token, TokenKind};
use wasm_encoder::ValType;

impl Compiler<'_> {
    /// Compiles one statement. Trailing tokens are left for the caller.
    pub(crate) fn statement(&mut self) -> CompileResult<()> {
        let Some(token) = self.next()? else {
            return Err(self.unexpected("statement", None));
        };
        match token.kind {
            TokenKind::Print | TokenKind::GreaterThan => self.print_statement(),
            TokenKind::Prints => self.prints_statement(),
            TokenKind::Format => self.format_statement(),

            TokenKind::If => self.if_statement(&token),
            TokenKind::Else => self.else_statement(false),
            TokenKind::ElseIf => self.else_statement(true),
            TokenKind::End => self.end_statement(),
            TokenKind::For => self.for_statement(&token),
            TokenKind::Next => self.next_statement(),
            TokenKind::While => self.while_statement(&token),
            TokenKind::Wend => self.wend_statement(),
            TokenKind::Do => self.do_statement(&token),
            TokenKind::Loop => self.loop_statement(),
            TokenKind::Select => self.select_statement(&token),
            TokenKind::Case => self.case_statement(),
            TokenKind::Exit => self.exit_statement(),

            TokenKind::Sub => self.sub_statement(&token, false),
            TokenKind::Function => self.sub_statement(&token, true),
            TokenKind::Local => self.local_statement(),
            TokenKind::Return => self.return_statement(),
            TokenKind::Bye | TokenKind::Break => self.leave_function(),
            TokenKind::Resume => Err(self.error_at(ErrorKind::Unsupported("RESUME"), &token)),

            TokenKind::Dim => self.dim_statement(),
            TokenKind::Redim => self.redim_statement(),
            TokenKind::Erase => self.erase_statement(),
            TokenKind::Option => self.option_statement(),
            TokenKind::Const => self.const_statement(),
            TokenKind::Swap => self.swap_statement(),

            TokenKind::Data => self.data_statement(),
            TokenKind::Read => self.read_statement(),
            TokenKind::Restore => {
                self.restore_statement();
                Ok(())
            }

            TokenKind::Open => self.open_statement(),
            TokenKind::Close => self.close_statement(),
            TokenKind::Kill => self.path_statement(HostFn::FileDelete),
            TokenKind::Mkdir => self.path_statement(HostFn::FileMkdir),
            TokenKind::Rmdir => self.path_statement(HostFn::FileRmdir),

            TokenKind::Identifier => self.identifier_statement(token),
            _ => Err(self.unexpected("statement", Some(token))),
        }
    }

    /// `END IF`, `END SELECT`, `END SUB`, `END FUNCTION` or a bare `END`.
    fn end_statement(&mut self) -> CompileResult<()> {
        match self.peek_kind()? {
            Some(TokenKind::If) => {
                self.next()?;
                self.end_if()
            }
            Some(TokenKind::Select) => {
                self.next()?;
                self.end_select()
            }
            Some(TokenKind::Sub) => {
                self.next()?;
                self.end_sub(false)
            }
            Some(TokenKind::Function) => {
                self.next()?;
                self.end_sub(true)
            }
            _ if self.at_end()? => self.leave_function(),
            _ => {
                let token = self.next()?;
                Err(self.unexpected("IF, SELECT, SUB or FUNCTION", token))
            }
        }
    }

    /// Statements that start with a name.
    fn identifier_statement(&mut self, token: Token) -> CompileResult<()> {
        let name = token.name();
        match name.as_str() {
            "MID$" if self.check(TokenKind::LeftParen)? => return self.mid_assign(),
            "INPUT" if self.check(TokenKind::Hash)? => return self.input_statement(),
            "NAME" if self.is_rename()? => return self.name_statement(),
            _ => {}
        }

        if self.match_token(TokenKind::Equals)? {
            return self.assignment(&token);
        }

        let existing = self.symbols.lookup(&name);
        if self.match_token(TokenKind::LeftParen)? {
            if let Some(id) = existing.filter(|id| self.symbols.get(*id).is_array()) {
                return self.store_element(id, &token);
            }
            if let Some(builtin) = lookup_builtin(&name) {
                self.builtin(builtin, &token)?;
                self.emit(Instr::Drop);
                return Ok(());
            }
            if let Some(id) = existing.filter(|id| self.symbols.get(*id).subroutine().is_some()) {
                self.call_subroutine(id, &token, CallArgs::Parenthesized)?;
                self.emit(Instr::Drop);
                return Ok(());
            }
        } else if let Some(id) = existing.filter(|id| self.symbols.get(*id).subroutine().is_some())
        {
            self.call_subroutine(id, &token, CallArgs::Bare)?;
            self.emit(Instr::Drop);
            return Ok(());
        }
        Err(self.error_at(ErrorKind::UnknownCallable { name }, &token))
    }

    /// `NAME` starts a rename unless it is a variable or subroutine use.
    fn is_rename(&mut self) -> CompileResult<bool> {
        if self
            .symbols
            .lookup("NAME")
            .is_some_and(|id| self.symbols.get(id).subroutine().is_some())
        {
            return Ok(false);
        }
        Ok(!matches!(
            self.peek_kind()?,
            None | Some(TokenKind::Equals | TokenKind::LeftParen)
        ))
    }

    /// Fails unless `id` may be the target of an assignment.
    pub(crate) fn check_assignable(&self, id: VarId, token: &Token) -> CompileResult<()> {
        let var = self.symbols.get(id);
        if var.constant {
            return Err(self.error_at(
                ErrorKind::ConstantAssignment {
                    name: var.name.clone(),
                },
                token,
            ));
        }
        match var.storage {
            Storage::Scalar => Ok(()),
            _ => Err(self.error_at(
                ErrorKind::WrongStorage {
                    name: var.name.clone(),
                    expected: "a scalar variable",
                },
                token,
            )),
        }
    }

    fn assignment(&mut self, target: &Token) -> CompileResult<()> {
        let id = self.resolve(target)?;
        self.check_assignable(id, target)?;
        let kind = self.expression()?;
        self.store(id, kind)
    }

    /// Stores the value on the stack into a scalar, fixing its kind on the
    /// first assignment. Strings are copied and the old value freed.
    pub(crate) fn store(&mut self, id: VarId, kind: Kind) -> CompileResult<()> {
        let target = self.symbols.assign_kind(id, kind);
        let global = id.global();
        if target == Kind::Str && kind == Kind::Str {
            let fresh = self.alloc_local(ValType::I32);
            self.call_host(HostFn::StrCopy);
            self.emit_all(&[Instr::LocalSet(fresh), Instr::GlobalGet(global)]);
            self.call_host(HostFn::StrFree);
            self.emit_all(&[Instr::LocalGet(fresh), Instr::GlobalSet(global)]);
        } else {
            self.coerce(kind, target)?;
            self.emit(Instr::GlobalSet(global));
        }
        Ok(())
    }

    fn const_statement(&mut self) -> CompileResult<()> {
        let name = self.expect_name("constant name")?;
        let id = self.resolve(&name)?;
        self.check_assignable(id, &name)?;
        self.expect(TokenKind::Equals, "'='")?;
        let kind = self.expression()?;
        self.store(id, kind)?;
        self.symbols.get_mut(id).constant = true;
        Ok(())
    }

    fn swap_statement(&mut self) -> CompileResult<()> {
        let first = self.expect_name("variable")?;
        self.expect(TokenKind::Comma, "','")?;
        let second = self.expect_name("variable")?;
        let a = self.resolve(&first)?;
        let b = self.resolve(&second)?;
        self.check_assignable(a, &first)?;
        self.check_assignable(b, &second)?;
        let (ka, kb) = (self.symbols.settle(a), self.symbols.settle(b));
        if ka != kb {
            return Err(self.error_at(
                ErrorKind::mismatch(format!("cannot SWAP {ka} with {kb}")),
                &second,
            ));
        }
        self.emit_all(&[
            Instr::GlobalGet(a.global()),
            Instr::GlobalGet(b.global()),
            Instr::GlobalSet(a.global()),
            Instr::GlobalSet(b.global()),
        ]);
        Ok(())
    }
}
