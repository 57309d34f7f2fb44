//! SUB and FUNCTION definitions, LOCAL, RETURN and calls.
//!
//! There is no call stack. A parameter is an ordinary global: on entry
//! the function saves the caller's value of each parameter global in a
//! private local, then overwrites the global with the argument. Every exit
//! path (END SUB, RETURN, EXIT SUB, END) restores the saved values in
//! reverse order before returning. LOCAL adds more globals to the same
//! save list.
//!
//! Because a body is compiled before the code that follows it, a call must
//! come after the definition, and a body cannot call itself.

use crate::codegen::{CallTarget, FuncId, FunctionContext, Instr};
use crate::compiler::builtins::Arg;
use crate::compiler::control::{ControlEntry, Construct};
use crate::compiler::error::ErrorKind;
use crate::compiler::imports::HostFn;
use crate::compiler::symbols::{Kind, Storage, Subroutine, VarId};
use crate::compiler::{CompileResult, Compiler};
use crate::lexer::{Token, TokenKind};
use log::debug;

/// How the arguments of a call are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallArgs {
    /// A bare name inside an expression: no arguments.
    Absent,
    /// `name(a, b)`; the opening parenthesis is consumed.
    Parenthesized,
    /// `name a, b` as a statement.
    Bare,
}

impl Compiler<'_> {
    /// `SUB name [params]` or `FUNCTION name [params]`.
    pub(crate) fn sub_statement(&mut self, opener: &Token, is_function: bool) -> CompileResult<()> {
        let keyword = if is_function { "FUNCTION" } else { "SUB" };
        if self.current != FuncId::SETUP || !self.control.is_empty() {
            return Err(self.error_at(
                ErrorKind::Misplaced(format!("{keyword} must be defined at the top level")),
                opener,
            ));
        }
        let name = self.expect_name("subroutine name")?;
        if self.symbols.lookup(&name.text).is_some() {
            return Err(self.error_at(ErrorKind::Redefinition { name: name.name() }, &name));
        }
        let id = self.resolve(&name)?;
        let result = self.symbols.settle(id);

        let params = self.parameters()?;
        let kinds: Vec<Kind> = params.iter().map(|p| self.symbols.settle(*p)).collect();

        let function = FuncId(self.functions.len() as u32);
        self.functions.push(FunctionContext::new(
            name.name(),
            kinds.iter().map(|k| k.val_type()).collect(),
            Some(result.val_type()),
        ));
        self.symbols.get_mut(id).storage = Storage::Subroutine(Subroutine {
            function,
            params: params.clone(),
            locals: Vec::new(),
            is_function,
            complete: false,
        });
        self.current = function;
        debug!(
            "{keyword} {} ({} params) is function {}",
            name.name(),
            params.len(),
            function.0
        );

        let mut saved = Vec::with_capacity(params.len());
        for (index, (&param, &kind)) in params.iter().zip(&kinds).enumerate() {
            let local = self.alloc_local(kind.val_type());
            self.emit_all(&[
                Instr::GlobalGet(param.global()),
                Instr::LocalSet(local),
                Instr::LocalGet(index as u32),
            ]);
            if kind == Kind::Str {
                self.call_host(HostFn::StrCopy);
            }
            self.emit(Instr::GlobalSet(param.global()));
            saved.push((param, local));
        }
        self.open(
            Construct::Sub {
                id,
                saved,
                is_function,
            },
            opener,
        );
        Ok(())
    }

    /// Parameter names, parenthesized or bare.
    fn parameters(&mut self) -> CompileResult<Vec<VarId>> {
        let parenthesized = self.match_token(TokenKind::LeftParen)?;
        let empty = if parenthesized {
            self.check(TokenKind::RightParen)?
        } else {
            self.at_end()?
        };
        let mut params = Vec::new();
        if !empty {
            loop {
                let token = self.expect_name("parameter name")?;
                let param = self.resolve(&token)?;
                self.check_assignable(param, &token)?;
                if params.contains(&param) {
                    return Err(self.error_at(ErrorKind::Redefinition { name: token.name() }, &token));
                }
                params.push(param);
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        if parenthesized {
            self.expect(TokenKind::RightParen, "')'")?;
        }
        Ok(params)
    }

    /// The open subroutine and its save list, if compiling a body.
    fn frame(&self) -> Option<(VarId, Vec<(VarId, u32)>)> {
        if self.current == FuncId::SETUP {
            return None;
        }
        match self.control.first() {
            Some(ControlEntry {
                construct: Construct::Sub { id, saved, .. },
                ..
            }) => Some((*id, saved.clone())),
            _ => None,
        }
    }

    /// `LOCAL a, b$`: saves the globals; strings start out empty.
    pub(crate) fn local_statement(&mut self) -> CompileResult<()> {
        let Some((sub, saved)) = self.frame() else {
            return Err(self.error(ErrorKind::Misplaced(
                "LOCAL outside SUB or FUNCTION".into(),
            )));
        };
        let mut added = Vec::new();
        loop {
            let token = self.expect_name("variable name")?;
            let id = self.resolve(&token)?;
            self.check_assignable(id, &token)?;
            let kind = self.symbols.settle(id);
            let already = saved.iter().chain(&added).any(|(var, _)| *var == id);
            if !already {
                let local = self.alloc_local(kind.val_type());
                self.emit_all(&[Instr::GlobalGet(id.global()), Instr::LocalSet(local)]);
                if kind == Kind::Str {
                    self.emit_all(&[Instr::I32Const(0), Instr::GlobalSet(id.global())]);
                }
                added.push((id, local));
            }
            if !self.match_token(TokenKind::Comma)? {
                break;
            }
        }

        if let Storage::Subroutine(subroutine) = &mut self.symbols.get_mut(sub).storage {
            subroutine.locals.extend(added.iter().map(|(var, _)| *var));
        }
        if let Some(ControlEntry {
            construct: Construct::Sub { saved, .. },
            ..
        }) = self.control.first_mut()
        {
            saved.extend(added);
        }
        Ok(())
    }

    /// Puts every saved global back, last saved first.
    fn restore(&mut self, saved: &[(VarId, u32)]) {
        for &(var, local) in saved.iter().rev() {
            if self.symbols.get(var).kind == Kind::Str {
                self.emit(Instr::GlobalGet(var.global()));
                self.call_host(HostFn::StrFree);
            }
            self.emit_all(&[Instr::LocalGet(local), Instr::GlobalSet(var.global())]);
        }
    }

    fn push_default(&mut self, kind: Kind) {
        match kind {
            Kind::Float => self.push_f32(0.0),
            Kind::Int | Kind::Str => self.push_i32(0),
        }
    }

    /// Returns from the current function: restores saved globals in a
    /// subroutine and yields the default result.
    pub(crate) fn leave_function(&mut self) -> CompileResult<()> {
        if let Some((sub, saved)) = self.frame() {
            self.restore(&saved);
            let kind = self.symbols.get(sub).kind;
            self.push_default(kind);
        }
        self.emit(Instr::Return);
        Ok(())
    }

    /// `RETURN [expr]`.
    pub(crate) fn return_statement(&mut self) -> CompileResult<()> {
        if self.at_end()? {
            return self.leave_function();
        }
        let Some((sub, saved)) = self.frame() else {
            return Err(self.error(ErrorKind::Misplaced(
                "RETURN with a value outside SUB or FUNCTION".into(),
            )));
        };
        let kind = self.symbols.get(sub).kind;
        self.expression_as(kind)?;
        if kind == Kind::Str {
            // The value may be a global about to be restored.
            self.call_host(HostFn::StrCopy);
        }
        let result = self.alloc_local(kind.val_type());
        self.emit(Instr::LocalSet(result));
        self.restore(&saved);
        self.emit_all(&[Instr::LocalGet(result), Instr::Return]);
        Ok(())
    }

    /// `END SUB` or `END FUNCTION`.
    pub(crate) fn end_sub(&mut self, is_function: bool) -> CompileResult<()> {
        let (opener, terminator) = if is_function {
            ("FUNCTION", "END FUNCTION")
        } else {
            ("SUB", "END SUB")
        };
        let (sub, saved) = match self.control.last() {
            Some(ControlEntry {
                construct:
                    Construct::Sub {
                        id,
                        saved,
                        is_function: open_function,
                    },
                ..
            }) if *open_function == is_function => (*id, saved.clone()),
            _ => return Err(self.unmatched(terminator, opener)),
        };
        self.control.pop();
        self.restore(&saved);
        let kind = self.symbols.get(sub).kind;
        self.push_default(kind);
        if let Storage::Subroutine(subroutine) = &mut self.symbols.get_mut(sub).storage {
            subroutine.complete = true;
        }
        self.current = FuncId::SETUP;
        Ok(())
    }

    /// Calls a user subroutine, leaving its result on the stack.
    pub(crate) fn call_subroutine(
        &mut self,
        id: VarId,
        token: &Token,
        args: CallArgs,
    ) -> CompileResult<Kind> {
        let name = token.name();
        let Some(sub) = self.symbols.get(id).subroutine().cloned() else {
            return Err(self.error_at(ErrorKind::UnknownCallable { name }, token));
        };
        if sub.function == self.current {
            return Err(self.error_at(ErrorKind::Recursion { name }, token));
        }
        let arg_kinds: Vec<Arg> = sub
            .params
            .iter()
            .map(|p| Arg::of(self.symbols.get(*p).kind))
            .collect();
        match args {
            CallArgs::Absent if !arg_kinds.is_empty() => {
                return Err(self.error_at(
                    ErrorKind::ArgumentCount {
                        name,
                        expected: arg_kinds.len().to_string(),
                        found: 0,
                    },
                    token,
                ));
            }
            CallArgs::Absent => {}
            CallArgs::Parenthesized => {
                self.arguments(&name, &arg_kinds, arg_kinds.len(), true)?;
            }
            CallArgs::Bare => {
                self.arguments(&name, &arg_kinds, arg_kinds.len(), false)?;
            }
        }
        self.emit(Instr::Call(CallTarget::Function(sub.function)));
        Ok(self.symbols.get(id).kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_program;
    use crate::compiler::tests::{build, fail};
    use wasm_encoder::ValType;

    #[test]
    fn test_sub_becomes_function() {
        let program = compile_program("SUB SHOW(N)\nPRINT N\nEND SUB\nSHOW 3\nSHOW(4)").unwrap();
        assert_eq!(program.functions.len(), 2);
        assert_eq!(
            program.functions[1].signature(),
            (vec![ValType::I32], vec![ValType::I32])
        );
        build("SUB SHOW N, M#\nPRINT N\nPRINT M#\nEND SUB\nSHOW 3, 1.5");
    }

    #[test]
    fn test_function_result_kind_from_name() {
        let program =
            compile_program("FUNCTION HALF#(X#)\nRETURN X# / 2\nEND FUNCTION\nY# = HALF#(3)")
                .unwrap();
        assert_eq!(
            program.functions[1].signature(),
            (vec![ValType::F32], vec![ValType::F32])
        );
        build("FUNCTION GREET$(N$)\nRETURN \"hi \" + N$\nEND FUNCTION\nPRINTS GREET$(\"bob\")");
    }

    #[test]
    fn test_parameter_saved_and_restored() {
        let program = compile_program("SUB S(N)\nN = 5\nEND SUB").unwrap();
        let body = program.functions[1].body();
        // prologue: save the caller's N, bind the argument
        assert_eq!(
            &body[..4],
            &[
                Instr::GlobalGet(5),
                Instr::LocalSet(1),
                Instr::LocalGet(0),
                Instr::GlobalSet(5),
            ]
        );
        // epilogue: restore, then the default result
        assert_eq!(
            &body[body.len() - 3..],
            &[Instr::LocalGet(1), Instr::GlobalSet(5), Instr::I32Const(0)]
        );
    }

    #[test]
    fn test_local_restores_in_reverse() {
        let program = compile_program("SUB S\nLOCAL A, B$\nA = 1\nEND SUB").unwrap();
        let sub = program.functions[1].body();
        // the default result follows the restores
        let tail: Vec<Instr> = sub[sub.len() - 7..sub.len() - 1].to_vec();
        assert_eq!(
            tail,
            vec![
                Instr::GlobalGet(6),
                Instr::Call(CallTarget::Host(HostFn::StrFree)),
                Instr::LocalGet(1),
                Instr::GlobalSet(6),
                Instr::LocalGet(0),
                Instr::GlobalSet(5),
            ]
        );
    }

    #[test]
    fn test_local_outside_sub() {
        assert!(matches!(fail("LOCAL A").kind, ErrorKind::Misplaced(_)));
    }

    #[test]
    fn test_recursion_rejected() {
        let err = fail("FUNCTION F(N)\nRETURN F(N - 1)\nEND FUNCTION");
        assert_eq!(err.kind, ErrorKind::Recursion { name: "F".into() });
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_forward_call_rejected() {
        let err = fail("LATER 1\nSUB LATER(N)\nEND SUB");
        assert_eq!(err.kind, ErrorKind::UnknownCallable { name: "LATER".into() });
    }

    #[test]
    fn test_nested_definition_rejected() {
        let err = fail("SUB A\nSUB B\nEND SUB\nEND SUB");
        assert!(matches!(err.kind, ErrorKind::Misplaced(_)));
        let err = fail("FOR I = 1 TO 2\nSUB A\nEND SUB\nNEXT");
        assert!(matches!(err.kind, ErrorKind::Misplaced(_)));
    }

    #[test]
    fn test_argument_count_checked() {
        let err = fail("SUB S(A, B)\nEND SUB\nS 1");
        assert!(matches!(err.kind, ErrorKind::ArgumentCount { found: 1, .. }));
        let err = fail("FUNCTION F(A)\nEND FUNCTION\nX = F");
        assert!(matches!(err.kind, ErrorKind::ArgumentCount { found: 0, .. }));
    }

    #[test]
    fn test_mismatched_end() {
        let err = fail("SUB S\nEND FUNCTION");
        assert_eq!(
            err.kind,
            ErrorKind::UnmatchedTerminator {
                terminator: "END FUNCTION",
                opener: "FUNCTION"
            }
        );
        let err = fail("SUB S\nPRINT 1");
        assert_eq!(
            err.kind,
            ErrorKind::UnterminatedBlock {
                opener: "SUB",
                closer: "END SUB"
            }
        );
    }

    #[test]
    fn test_exit_and_end_inside_sub() {
        build("SUB S(N)\nIF N > 1 THEN EXIT SUB\nPRINT N\nEND\nEND SUB\nS 1");
        build("FUNCTION F(N)\nWHILE 1\nEXIT FUNCTION\nWEND\nEND FUNCTION\nX = F(1)");
        let err = fail("SUB S\nEXIT FUNCTION\nEND SUB");
        assert_eq!(err.kind, ErrorKind::ExitOutside { construct: "FUNCTION" });
    }

    #[test]
    fn test_return_value_outside_function() {
        assert!(matches!(fail("RETURN 1").kind, ErrorKind::Misplaced(_)));
        build("PRINT 1\nRETURN\nPRINT 2");
    }

    #[test]
    fn test_subroutine_name_taken() {
        let err = fail("X = 1\nSUB X\nEND SUB");
        assert_eq!(err.kind, ErrorKind::Redefinition { name: "X".into() });
    }
}
