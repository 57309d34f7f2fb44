//! Structured control flow: IF, FOR, WHILE, DO, SELECT CASE and EXIT.
//!
//! Every construct maps onto WASM `block`/`loop`/`if` nesting. An open
//! construct is kept on the control stack together with the nesting depths
//! its `break` and `continue` branches target; a branch label is the
//! current depth minus the recorded one.

use crate::codegen::Instr;
use crate::compiler::error::ErrorKind;
use crate::compiler::expr::Relation;
use crate::compiler::symbols::{Kind, VarId};
use crate::compiler::{CompileError, CompileResult, Compiler};
use crate::lexer::{Span, Token, TokenKind};
use log::debug;

/// One open construct.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ControlEntry {
    pub construct: Construct,
    /// Line of the opener, for unterminated-block errors.
    pub line: usize,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Construct {
    If {
        /// `ELSEIF` branches, each nesting one more `if`.
        extra: u32,
        has_else: bool,
    },
    For {
        var: VarId,
        kind: Kind,
        limit: u32,
        step: Option<u32>,
        exit: u32,
        next: u32,
    },
    While {
        exit: u32,
        next: u32,
    },
    Do {
        exit: u32,
        next: u32,
        /// Opened as `DO WHILE` or `DO UNTIL`.
        tested: bool,
    },
    Select {
        selector: u32,
        kind: Kind,
        exit: u32,
        clause_open: bool,
        has_else: bool,
    },
    Sub {
        id: VarId,
        /// Globals saved on entry with the local holding the old value.
        saved: Vec<(VarId, u32)>,
        is_function: bool,
    },
}

impl Construct {
    /// Opening and closing keywords.
    pub(crate) fn names(&self) -> (&'static str, &'static str) {
        match self {
            Construct::If { .. } => ("IF", "END IF"),
            Construct::For { .. } => ("FOR", "NEXT"),
            Construct::While { .. } => ("WHILE", "WEND"),
            Construct::Do { .. } => ("DO", "LOOP"),
            Construct::Select { .. } => ("SELECT CASE", "END SELECT"),
            Construct::Sub {
                is_function: false,
                ..
            } => ("SUB", "END SUB"),
            Construct::Sub {
                is_function: true, ..
            } => ("FUNCTION", "END FUNCTION"),
        }
    }
}

impl Compiler<'_> {
    pub(crate) fn open(&mut self, construct: Construct, opener: &Token) {
        debug!("line {}: open {}", self.line, construct.names().0);
        self.control.push(ControlEntry {
            construct,
            line: self.line,
            span: opener.span,
        });
    }

    pub(crate) fn unmatched(&self, terminator: &'static str, opener: &'static str) -> CompileError {
        self.error(ErrorKind::UnmatchedTerminator { terminator, opener })
    }

    /// Branch label reaching the construct recorded at `target`.
    fn label(&mut self, target: u32) -> u32 {
        self.depth() - target
    }

    /// Compiles a condition, leaving an i32 truth value.
    fn condition(&mut self) -> CompileResult<()> {
        let kind = self.expression()?;
        if kind == Kind::Str {
            return Err(self.error(ErrorKind::mismatch("condition must be numeric")));
        }
        self.coerce(kind, Kind::Int)
    }

    // ==================== IF ====================

    pub(crate) fn if_statement(&mut self, opener: &Token) -> CompileResult<()> {
        self.condition()?;
        self.emit(Instr::If(None));
        let then = self.match_token(TokenKind::Then)?;
        if !then || self.at_end()? {
            self.open(
                Construct::If {
                    extra: 0,
                    has_else: false,
                },
                opener,
            );
            return Ok(());
        }
        if self.check(TokenKind::Else)? {
            let token = self.next()?;
            return Err(self.unexpected("statement", token));
        }

        let depth = self.control.len();
        let function = self.current;
        let outer = self.inline_if;
        self.inline_if = true;
        self.statement()?;
        if self.match_token(TokenKind::Else)? {
            self.emit(Instr::Else);
            self.statement()?;
        }
        self.inline_if = outer;
        if self.control.len() != depth || self.current != function {
            return Err(self.error(ErrorKind::Misplaced(
                "block statement inside single-line IF".into(),
            )));
        }
        self.emit(Instr::End);
        Ok(())
    }

    /// `ELSE`, `ELSE IF c` or `ELSEIF c` inside a block IF.
    pub(crate) fn else_statement(&mut self, chained: bool) -> CompileResult<()> {
        let terminator = if chained { "ELSEIF" } else { "ELSE" };
        let chained = chained || self.match_token(TokenKind::If)?;
        let seen_else = match self.control.last() {
            Some(ControlEntry {
                construct: Construct::If { has_else, .. },
                ..
            }) => *has_else,
            _ => return Err(self.unmatched(terminator, "IF")),
        };
        if seen_else {
            return Err(self.error(ErrorKind::Misplaced(format!(
                "{terminator} after ELSE"
            ))));
        }
        if let Some(ControlEntry {
            construct: Construct::If { extra, has_else },
            ..
        }) = self.control.last_mut()
        {
            if chained {
                *extra += 1;
            } else {
                *has_else = true;
            }
        }
        self.emit(Instr::Else);
        if chained {
            self.condition()?;
            self.emit(Instr::If(None));
            self.match_token(TokenKind::Then)?;
        }
        Ok(())
    }

    pub(crate) fn end_if(&mut self) -> CompileResult<()> {
        let extra = match self.control.last() {
            Some(ControlEntry {
                construct: Construct::If { extra, .. },
                ..
            }) => *extra,
            _ => return Err(self.unmatched("END IF", "IF")),
        };
        self.control.pop();
        for _ in 0..=extra {
            self.emit(Instr::End);
        }
        Ok(())
    }

    // ==================== FOR ====================

    pub(crate) fn for_statement(&mut self, opener: &Token) -> CompileResult<()> {
        let name = self.expect_name("loop variable")?;
        let var = self.resolve(&name)?;
        self.check_assignable(var, &name)?;
        let kind = self.symbols.settle(var);
        if kind == Kind::Str {
            return Err(self.error_at(
                ErrorKind::mismatch("FOR needs a numeric loop variable"),
                &name,
            ));
        }
        self.expect(TokenKind::Equals, "'='")?;
        self.expression_as(kind)?;
        self.emit(Instr::GlobalSet(var.global()));

        self.expect(TokenKind::To, "TO")?;
        self.expression_as(kind)?;
        let limit = self.alloc_local(kind.val_type());
        self.emit(Instr::LocalSet(limit));
        let step = if self.match_token(TokenKind::Step)? {
            self.expression_as(kind)?;
            let step = self.alloc_local(kind.val_type());
            self.emit(Instr::LocalSet(step));
            Some(step)
        } else {
            None
        };

        self.emit(Instr::Block);
        let exit = self.depth();
        self.emit(Instr::Loop);
        let next = self.depth();

        let (gt, lt, zero) = match kind {
            Kind::Float => (Instr::F32Gt, Instr::F32Lt, Instr::F32Const(0.0)),
            _ => (Instr::I32GtS, Instr::I32LtS, Instr::I32Const(0)),
        };
        let global = var.global();
        self.emit_all(&[Instr::GlobalGet(global), Instr::LocalGet(limit), gt]);
        if let Some(step) = step {
            // Counting down stops below the limit instead.
            self.emit_all(&[
                Instr::GlobalGet(global),
                Instr::LocalGet(limit),
                lt,
                Instr::LocalGet(step),
                zero,
                gt,
                Instr::Select,
            ]);
        }
        self.emit(Instr::BrIf(1));
        self.open(
            Construct::For {
                var,
                kind,
                limit,
                step,
                exit,
                next,
            },
            opener,
        );
        Ok(())
    }

    pub(crate) fn next_statement(&mut self) -> CompileResult<()> {
        let named = if self.at_end()? {
            None
        } else {
            Some(self.expect_name("loop variable")?)
        };
        let (var, kind, step, next) = match self.control.last() {
            Some(ControlEntry {
                construct:
                    Construct::For {
                        var,
                        kind,
                        step,
                        next,
                        ..
                    },
                ..
            }) => (*var, *kind, *step, *next),
            _ => return Err(self.unmatched("NEXT", "FOR")),
        };
        if let Some(token) = named {
            let expected = &self.symbols.get(var).name;
            if token.name() != *expected {
                let message = format!("NEXT {} does not match FOR {expected}", token.name());
                return Err(self.error_at(ErrorKind::Misplaced(message), &token));
            }
        }
        self.control.pop();

        let global = var.global();
        self.emit(Instr::GlobalGet(global));
        match (step, kind) {
            (Some(step), _) => self.emit(Instr::LocalGet(step)),
            (None, Kind::Float) => self.push_f32(1.0),
            (None, _) => self.push_i32(1),
        }
        self.emit_all(&[
            if kind == Kind::Float {
                Instr::F32Add
            } else {
                Instr::I32Add
            },
            Instr::GlobalSet(global),
        ]);
        let label = self.label(next);
        self.emit_all(&[Instr::Br(label), Instr::End, Instr::End]);
        Ok(())
    }

    // ==================== WHILE / DO ====================

    pub(crate) fn while_statement(&mut self, opener: &Token) -> CompileResult<()> {
        self.emit(Instr::Block);
        let exit = self.depth();
        self.emit(Instr::Loop);
        let next = self.depth();
        self.condition()?;
        self.emit_all(&[Instr::I32Eqz, Instr::BrIf(1)]);
        self.open(Construct::While { exit, next }, opener);
        Ok(())
    }

    pub(crate) fn wend_statement(&mut self) -> CompileResult<()> {
        let next = match self.control.last() {
            Some(ControlEntry {
                construct: Construct::While { next, .. },
                ..
            }) => *next,
            _ => return Err(self.unmatched("WEND", "WHILE")),
        };
        self.control.pop();
        let label = self.label(next);
        self.emit_all(&[Instr::Br(label), Instr::End, Instr::End]);
        Ok(())
    }

    pub(crate) fn do_statement(&mut self, opener: &Token) -> CompileResult<()> {
        self.emit(Instr::Block);
        let exit = self.depth();
        self.emit(Instr::Loop);
        let next = self.depth();
        let tested = match self.peek_kind()? {
            Some(TokenKind::While) => {
                self.next()?;
                self.condition()?;
                self.emit(Instr::I32Eqz);
                true
            }
            Some(TokenKind::Until) => {
                self.next()?;
                self.condition()?;
                true
            }
            _ => false,
        };
        if tested {
            self.emit(Instr::BrIf(1));
        }
        self.open(Construct::Do { exit, next, tested }, opener);
        Ok(())
    }

    pub(crate) fn loop_statement(&mut self) -> CompileResult<()> {
        let (next, tested) = match self.control.last() {
            Some(ControlEntry {
                construct: Construct::Do { next, tested, .. },
                ..
            }) => (*next, *tested),
            _ => return Err(self.unmatched("LOOP", "DO")),
        };
        let until = match self.peek_kind()? {
            Some(TokenKind::While) => Some(false),
            Some(TokenKind::Until) => Some(true),
            _ => None,
        };
        if let Some(until) = until {
            if tested {
                return Err(self.error(ErrorKind::Misplaced(
                    "DO loop cannot test at both ends".into(),
                )));
            }
            self.next()?;
            self.control.pop();
            self.condition()?;
            if until {
                self.emit(Instr::I32Eqz);
            }
            let label = self.label(next);
            self.emit(Instr::BrIf(label));
        } else {
            self.control.pop();
            let label = self.label(next);
            self.emit(Instr::Br(label));
        }
        self.emit_all(&[Instr::End, Instr::End]);
        Ok(())
    }

    // ==================== SELECT CASE ====================

    pub(crate) fn select_statement(&mut self, opener: &Token) -> CompileResult<()> {
        self.expect(TokenKind::Case, "CASE")?;
        let kind = self.expression()?;
        let selector = self.alloc_local(kind.val_type());
        self.emit_all(&[Instr::LocalSet(selector), Instr::Block]);
        let exit = self.depth();
        self.open(
            Construct::Select {
                selector,
                kind,
                exit,
                clause_open: false,
                has_else: false,
            },
            opener,
        );
        Ok(())
    }

    pub(crate) fn case_statement(&mut self) -> CompileResult<()> {
        let (selector, kind, exit, clause_open, has_else) = match self.control.last() {
            Some(ControlEntry {
                construct:
                    Construct::Select {
                        selector,
                        kind,
                        exit,
                        clause_open,
                        has_else,
                    },
                ..
            }) => (*selector, *kind, *exit, *clause_open, *has_else),
            _ => return Err(self.unmatched("CASE", "SELECT CASE")),
        };
        if has_else {
            return Err(self.error(ErrorKind::Misplaced("CASE after CASE ELSE".into())));
        }
        if clause_open {
            let label = self.label(exit);
            self.emit_all(&[Instr::Br(label), Instr::End]);
        }

        let is_else = self.match_token(TokenKind::Else)?;
        if !is_else {
            let mut first = true;
            loop {
                let rel = if self.match_token(TokenKind::Is)? {
                    match self.next()? {
                        Some(token) => match Relation::from_token(token.kind) {
                            Some(rel) => rel,
                            None => {
                                return Err(self.unexpected("comparison operator", Some(token)));
                            }
                        },
                        None => return Err(self.unexpected("comparison operator", None)),
                    }
                } else {
                    Relation::Eq
                };
                self.emit(Instr::LocalGet(selector));
                let value = self.expression()?;
                self.compare(rel, kind, value)?;
                if !first {
                    self.emit(Instr::I32Or);
                }
                first = false;
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
            self.emit(Instr::If(None));
        }

        if let Some(ControlEntry {
            construct:
                Construct::Select {
                    clause_open,
                    has_else,
                    ..
                },
            ..
        }) = self.control.last_mut()
        {
            *clause_open = !is_else;
            *has_else = is_else;
        }
        Ok(())
    }

    pub(crate) fn end_select(&mut self) -> CompileResult<()> {
        let clause_open = match self.control.last() {
            Some(ControlEntry {
                construct: Construct::Select { clause_open, .. },
                ..
            }) => *clause_open,
            _ => return Err(self.unmatched("END SELECT", "SELECT CASE")),
        };
        self.control.pop();
        if clause_open {
            self.emit(Instr::End);
        }
        self.emit(Instr::End);
        Ok(())
    }

    // ==================== EXIT ====================

    pub(crate) fn exit_statement(&mut self) -> CompileResult<()> {
        let token = self.next()?;
        let Some(target) = token.as_ref().map(|t| t.kind).filter(|kind| {
            matches!(
                kind,
                TokenKind::For
                    | TokenKind::While
                    | TokenKind::Do
                    | TokenKind::Select
                    | TokenKind::Sub
                    | TokenKind::Function
            )
        }) else {
            return Err(self.unexpected("FOR, WHILE, DO, SELECT, SUB or FUNCTION", token));
        };

        // Some(Some(depth)) breaks out of a block, Some(None) returns.
        let found = self.control.iter().rev().find_map(|entry| {
            match (&entry.construct, target) {
                (Construct::For { exit, .. }, TokenKind::For)
                | (Construct::While { exit, .. }, TokenKind::While)
                | (Construct::Do { exit, .. }, TokenKind::Do)
                | (Construct::Select { exit, .. }, TokenKind::Select) => Some(Some(*exit)),
                (Construct::Sub { is_function, .. }, TokenKind::Sub) if !is_function => {
                    Some(None)
                }
                (Construct::Sub { is_function, .. }, TokenKind::Function) if *is_function => {
                    Some(None)
                }
                _ => None,
            }
        });
        match found {
            Some(Some(exit)) => {
                let label = self.label(exit);
                self.emit(Instr::Br(label));
                Ok(())
            }
            Some(None) => self.leave_function(),
            None => {
                let construct = match target {
                    TokenKind::For => "FOR",
                    TokenKind::While => "WHILE",
                    TokenKind::Do => "DO",
                    TokenKind::Select => "SELECT",
                    TokenKind::Sub => "SUB",
                    _ => "FUNCTION",
                };
                Err(self.error(ErrorKind::ExitOutside { construct }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::tests::{build, fail, setup_body};

    fn count(body: &[Instr], instr: Instr) -> usize {
        body.iter().filter(|i| **i == instr).count()
    }

    #[test]
    fn test_for_emits_one_loop() {
        let body = setup_body("FOR I = 1 TO 3\nPRINT I\nNEXT");
        assert_eq!(count(&body, Instr::Loop), 1);
        assert_eq!(count(&body, Instr::Block), 1);
        assert!(!body.contains(&Instr::Select));
        assert_eq!(body.iter().map(Instr::depth_delta).sum::<i32>(), 0);
    }

    #[test]
    fn test_for_with_step_is_direction_aware() {
        let body = setup_body("FOR I = 10 TO 1 STEP -1\nNEXT I");
        assert_eq!(count(&body, Instr::Select), 1);
        build("FOR X# = 0 TO 1 STEP 0.25\nPRINT X#\nNEXT X#");
    }

    #[test]
    fn test_next_must_name_the_loop_variable() {
        let err = fail("FOR I = 1 TO 3\nNEXT J");
        assert!(matches!(err.kind, ErrorKind::Misplaced(_)));
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_string_loop_variable_rejected() {
        let err = fail("FOR A$ = 1 TO 3\nNEXT");
        assert!(matches!(err.kind, ErrorKind::TypeMismatch(_)));
    }

    #[test]
    fn test_block_if_with_and_without_then() {
        build("X = 1\nIF X > 0 THEN\nPRINT 1\nELSEIF X < 0 THEN\nPRINT 2\nELSE IF X = 0\nPRINT 3\nELSE\nPRINT 4\nEND IF");
        build("X = 1\nIF X > 0\nPRINT 1\nEND IF");
    }

    #[test]
    fn test_elseif_chain_closes_every_branch() {
        let body = setup_body("X = 1\nIF X = 1 THEN\nELSEIF X = 2 THEN\nELSEIF X = 3 THEN\nEND IF");
        assert_eq!(count(&body, Instr::If(None)), 3);
        assert_eq!(count(&body, Instr::End), 3);
    }

    #[test]
    fn test_single_line_if() {
        build("X = 1\nIF X THEN PRINT 1 ELSE PRINT 2");
        build("X = 1\nIF X > 0 THEN X = 2");
        let err = fail("X = 1\nIF X THEN FOR I = 1 TO 2");
        assert!(matches!(err.kind, ErrorKind::Misplaced(_)));
        let err = fail("IF 1 THEN PRINT 1 ELSE PRINT 2 ELSE PRINT 3");
        assert_eq!(err.kind, ErrorKind::ExtraTokens);
    }

    #[test]
    fn test_else_after_else_rejected() {
        let err = fail("IF 1 THEN\nELSE\nELSE\nEND IF");
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_unmatched_terminators() {
        assert_eq!(
            fail("NEXT").kind,
            ErrorKind::UnmatchedTerminator {
                terminator: "NEXT",
                opener: "FOR"
            }
        );
        assert_eq!(
            fail("WHILE 1\nEND IF").kind,
            ErrorKind::UnmatchedTerminator {
                terminator: "END IF",
                opener: "IF"
            }
        );
        assert!(matches!(
            fail("LOOP").kind,
            ErrorKind::UnmatchedTerminator { .. }
        ));
        assert!(matches!(
            fail("CASE 1").kind,
            ErrorKind::UnmatchedTerminator { .. }
        ));
    }

    #[test]
    fn test_do_loop_forms() {
        build("I = 0\nDO WHILE I < 3\nI = I + 1\nLOOP");
        build("I = 0\nDO UNTIL I = 3\nI = I + 1\nLOOP");
        build("I = 0\nDO\nI = I + 1\nLOOP WHILE I < 3");
        build("I = 0\nDO\nI = I + 1\nLOOP UNTIL I = 3");
        build("I = 0\nDO\nI = I + 1\nIF I > 3 THEN EXIT DO\nLOOP");
        let err = fail("DO WHILE 1\nLOOP UNTIL 0");
        assert!(matches!(err.kind, ErrorKind::Misplaced(_)));
    }

    #[test]
    fn test_select_case() {
        build(
            "X = 2\nSELECT CASE X\nCASE 1\nPRINT 1\nCASE 2, 3\nPRINT 2\nCASE IS > 5\nPRINT 5\nCASE ELSE\nPRINT 0\nEND SELECT",
        );
        build("A$ = \"b\"\nSELECT CASE A$\nCASE \"a\"\nPRINT 1\nCASE \"b\"\nPRINT 2\nEND SELECT");
        let err = fail("SELECT CASE 1\nCASE ELSE\nCASE 2\nEND SELECT");
        assert!(matches!(err.kind, ErrorKind::Misplaced(_)));
    }

    #[test]
    fn test_exit_targets_nearest_construct() {
        build("FOR I = 1 TO 5\nWHILE 1\nEXIT FOR\nWEND\nNEXT");
        build("SELECT CASE 1\nCASE 1\nEXIT SELECT\nEND SELECT");
        let err = fail("WHILE 1\nEXIT FOR\nWEND");
        assert_eq!(err.kind, ErrorKind::ExitOutside { construct: "FOR" });
    }

    #[test]
    fn test_exit_label_counts_enclosing_blocks() {
        let body = setup_body("FOR I = 1 TO 5\nIF I = 2 THEN\nEXIT FOR\nEND IF\nNEXT");
        // block, loop, if: the FOR exit is two labels out
        assert!(body.contains(&Instr::Br(2)));
    }
}
