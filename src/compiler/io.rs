//! PRINT, PRINTS, FORMAT and the file statements.
//!
//! Formatted output goes through `host_printf(format, args)`, where `args`
//! points at the argument buffer at [`SCRATCH_BASE`]; each argument takes
//! one 4-byte cell. File channels are literal numbers 1-4 whose host
//! handles live in the file table.

use crate::codegen::{Instr, SCRATCH_BASE, SCRATCH_SIZE};
use crate::compiler::error::ErrorKind;
use crate::compiler::imports::HostFn;
use crate::compiler::symbols::Kind;
use crate::compiler::{CompileResult, Compiler};
use crate::lexer::TokenKind;
use wasm_encoder::ValType;

/// FORMAT arguments that fit in the argument buffer.
pub const MAX_FORMAT_ARGS: usize = (SCRATCH_SIZE / 4) as usize;

/// Translates a FORMAT template into a printf format string.
fn printf_template(template: &str) -> String {
    let mut out = String::with_capacity(template.len() + 8);
    for c in template.chars() {
        match c {
            '%' => out.push_str("%d"),
            '$' => out.push_str("%s"),
            '&' => out.push_str("%f"),
            c => out.push(c),
        }
    }
    out.push('\n');
    out
}

impl Compiler<'_> {
    /// `PRINT expr`, `PRINT`, `PRINT #n, expr` (and `> expr`).
    pub(crate) fn print_statement(&mut self) -> CompileResult<()> {
        if self.check(TokenKind::Hash)? {
            return self.file_print();
        }
        if self.at_end()? {
            let newline = self.intern("\n");
            self.push_i32(newline);
            self.push_i32(SCRATCH_BASE as i32);
            self.call_host(HostFn::HostPrintf);
            self.emit(Instr::Drop);
            return Ok(());
        }
        match self.expression()? {
            Kind::Int => self.call_host(HostFn::PrintI32),
            Kind::Float => self.call_host(HostFn::PrintF32),
            Kind::Str => self.print_string(),
        }
        Ok(())
    }

    /// `PRINTS expr`: string print.
    pub(crate) fn prints_statement(&mut self) -> CompileResult<()> {
        self.string_expression()?;
        self.print_string();
        Ok(())
    }

    /// Prints the string handle on the stack followed by a newline.
    fn print_string(&mut self) {
        let handle = self.alloc_local(ValType::I32);
        let format = self.intern("%s\n");
        self.emit_all(&[
            Instr::LocalSet(handle),
            Instr::I32Const(SCRATCH_BASE as i32),
            Instr::LocalGet(handle),
            Instr::I32Store(0),
            Instr::I32Const(format),
            Instr::I32Const(SCRATCH_BASE as i32),
        ]);
        self.call_host(HostFn::HostPrintf);
        self.emit(Instr::Drop);
    }

    /// `FORMAT "template", args...`: `%` integer, `$` string, `&` float.
    pub(crate) fn format_statement(&mut self) -> CompileResult<()> {
        let template = self.expect(TokenKind::StringLiteral, "format string")?;
        let text = template.string_value().unwrap_or_default();
        let format = self.intern(&printf_template(&text));

        let mut count = 0;
        while self.match_token(TokenKind::Comma)? {
            if count == MAX_FORMAT_ARGS {
                return Err(self.error(ErrorKind::LimitExceeded {
                    what: "FORMAT arguments",
                    limit: MAX_FORMAT_ARGS,
                }));
            }
            self.push_i32(SCRATCH_BASE as i32);
            let offset = 4 * count as u64;
            match self.expression()? {
                Kind::Float => self.emit(Instr::F32Store(offset)),
                Kind::Int | Kind::Str => self.emit(Instr::I32Store(offset)),
            }
            count += 1;
        }
        self.push_i32(format);
        self.push_i32(SCRATCH_BASE as i32);
        self.call_host(HostFn::HostPrintf);
        self.emit(Instr::Drop);
        Ok(())
    }

    // ==================== Files ====================

    /// `OPEN path$ FOR INPUT|OUTPUT|APPEND AS #n`.
    pub(crate) fn open_statement(&mut self) -> CompileResult<()> {
        self.string_expression()?;
        self.expect(TokenKind::For, "FOR")?;
        let mode = match self.next()? {
            Some(token) if token.kind == TokenKind::Identifier => match token.name().as_str() {
                "INPUT" => 0,
                "OUTPUT" => 1,
                "APPEND" => 2,
                _ => return Err(self.unexpected("INPUT, OUTPUT or APPEND", Some(token))),
            },
            other => return Err(self.unexpected("INPUT, OUTPUT or APPEND", other)),
        };
        self.expect(TokenKind::As, "AS")?;
        let channel = self.channel_literal()?;

        self.push_i32(mode);
        self.call_host(HostFn::FileOpen);
        let handle = self.alloc_local(ValType::I32);
        self.emit_all(&[
            Instr::LocalSet(handle),
            Instr::I32Const(Self::file_slot(channel)),
            Instr::LocalGet(handle),
            Instr::I32Store(0),
        ]);
        Ok(())
    }

    /// `CLOSE #n [, #m...]`.
    pub(crate) fn close_statement(&mut self) -> CompileResult<()> {
        loop {
            let channel = self.channel_literal()?;
            self.load_file_handle(channel);
            self.call_host(HostFn::FileClose);
            self.emit_all(&[
                Instr::I32Const(Self::file_slot(channel)),
                Instr::I32Const(-1),
                Instr::I32Store(0),
            ]);
            if !self.match_token(TokenKind::Comma)? {
                return Ok(());
            }
        }
    }

    /// `PRINT #n, expr`: writes one line; numbers are formatted first.
    fn file_print(&mut self) -> CompileResult<()> {
        let channel = self.channel_literal()?;
        self.expect(TokenKind::Comma, "','")?;
        match self.expression()? {
            Kind::Int => self.call_host(HostFn::StrFromInt),
            Kind::Float => self.call_host(HostFn::StrFromFloat),
            Kind::Str => {}
        }
        let text = self.alloc_local(ValType::I32);
        self.emit(Instr::LocalSet(text));
        self.load_file_handle(channel);
        self.emit(Instr::LocalGet(text));
        self.call_host(HostFn::FilePrint);
        self.emit(Instr::Drop);
        Ok(())
    }

    /// `INPUT #n, var`: reads one line into a variable.
    pub(crate) fn input_statement(&mut self) -> CompileResult<()> {
        let channel = self.channel_literal()?;
        self.expect(TokenKind::Comma, "','")?;
        let token = self.expect_name("variable name")?;
        let id = self.resolve(&token)?;
        self.check_assignable(id, &token)?;
        let kind = self.symbols.settle(id);
        let global = id.global();

        self.load_file_handle(channel);
        self.call_host(HostFn::FileReadln);
        match kind {
            Kind::Str => {
                let line = self.alloc_local(ValType::I32);
                self.emit_all(&[Instr::LocalSet(line), Instr::GlobalGet(global)]);
                self.call_host(HostFn::StrFree);
                self.emit_all(&[Instr::LocalGet(line), Instr::GlobalSet(global)]);
            }
            Kind::Int => {
                self.call_host(HostFn::StrToInt);
                self.emit(Instr::GlobalSet(global));
            }
            Kind::Float => {
                self.call_host(HostFn::StrToFloat);
                self.emit(Instr::GlobalSet(global));
            }
        }
        Ok(())
    }

    /// Pushes `(pointer, length)` for a string expression.
    fn string_with_length(&mut self) -> CompileResult<()> {
        self.string_expression()?;
        let text = self.alloc_local(ValType::I32);
        self.emit_all(&[Instr::LocalTee(text), Instr::LocalGet(text)]);
        self.call_host(HostFn::StrLen);
        Ok(())
    }

    /// `KILL p$`, `MKDIR p$`, `RMDIR p$`.
    pub(crate) fn path_statement(&mut self, host: HostFn) -> CompileResult<()> {
        self.string_with_length()?;
        self.call_host(host);
        self.emit(Instr::Drop);
        Ok(())
    }

    /// `NAME old$ AS new$`.
    pub(crate) fn name_statement(&mut self) -> CompileResult<()> {
        self.string_with_length()?;
        self.expect(TokenKind::As, "AS")?;
        self.string_with_length()?;
        self.call_host(HostFn::FileRename);
        self.emit(Instr::Drop);
        Ok(())
    }

    /// `MID$(s$, start, length) = replacement$`.
    pub(crate) fn mid_assign(&mut self) -> CompileResult<()> {
        self.expect(TokenKind::LeftParen, "'('")?;
        let token = self.expect_name("string variable")?;
        let id = self.resolve(&token)?;
        self.check_assignable(id, &token)?;
        if self.symbols.settle(id) != Kind::Str {
            return Err(self.error_at(
                ErrorKind::mismatch("MID$ assignment needs a string variable"),
                &token,
            ));
        }
        let global = id.global();
        self.emit(Instr::GlobalGet(global));
        self.expect(TokenKind::Comma, "','")?;
        self.int_expression()?;
        self.expect(TokenKind::Comma, "','")?;
        self.int_expression()?;
        self.expect(TokenKind::RightParen, "')'")?;
        self.expect(TokenKind::Equals, "'='")?;
        self.string_expression()?;
        self.call_host(HostFn::StrMidAssign);

        let result = self.alloc_local(ValType::I32);
        self.emit_all(&[Instr::LocalSet(result), Instr::GlobalGet(global)]);
        self.call_host(HostFn::StrFree);
        self.emit_all(&[Instr::LocalGet(result), Instr::GlobalSet(global)]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::CallTarget;
    use crate::compiler::compile_program;
    use crate::compiler::tests::{build, fail, setup_body};

    fn calls(body: &[Instr], host: HostFn) -> bool {
        body.contains(&Instr::Call(CallTarget::Host(host)))
    }

    #[test]
    fn test_print_dispatches_on_kind() {
        assert!(calls(&setup_body("PRINT 1"), HostFn::PrintI32));
        assert!(calls(&setup_body("PRINT 1.5"), HostFn::PrintF32));
        assert!(calls(&setup_body("> 7"), HostFn::PrintI32));
        let body = setup_body("PRINT \"hi\"");
        assert!(calls(&body, HostFn::HostPrintf));
        assert!(!calls(&body, HostFn::PrintI32));
    }

    #[test]
    fn test_bare_print_is_newline() {
        let program = compile_program("PRINT").unwrap();
        assert!(program.imports.is_used(HostFn::HostPrintf));
        assert_eq!(program.pool.bytes(), b"\0\n\0");
    }

    #[test]
    fn test_format_template() {
        assert_eq!(printf_template("x=% s=$ f=&"), "x=%d s=%s f=%f\n");
        build("A = 1\nB# = 2.5\nC$ = \"c\"\nFORMAT \"% & $\", A, B#, C$");
        let body = setup_body("FORMAT \"% %\", 1, 2");
        assert!(body.contains(&Instr::I32Store(4)));
    }

    #[test]
    fn test_prints_requires_string() {
        build("PRINTS \"a\" + \"b\"");
        assert!(matches!(fail("PRINTS 1").kind, ErrorKind::TypeMismatch(_)));
    }

    #[test]
    fn test_file_statements() {
        build(
            "OPEN \"log.txt\" FOR OUTPUT AS #1\nPRINT #1, 42\nPRINT #1, 1.5\nPRINT #1, \"x\"\nCLOSE #1",
        );
        build("OPEN \"in.txt\" FOR INPUT AS #2\nINPUT #2, L$\nINPUT #2, N\nINPUT #2, F#\nX = EOF(2)\nCLOSE #2");
        build("KILL \"a\"\nMKDIR \"d\"\nRMDIR \"d\"\nNAME \"a\" AS \"b\"");
    }

    #[test]
    fn test_open_stores_handle_in_channel_slot() {
        let body = setup_body("OPEN \"f\" FOR APPEND AS #3");
        assert!(body.contains(&Instr::I32Const(Compiler::file_slot(3))));
        assert!(body.contains(&Instr::I32Const(2)));
    }

    #[test]
    fn test_bad_channel() {
        let err = fail("OPEN \"f\" FOR OUTPUT AS #5");
        assert_eq!(err.kind, ErrorKind::BadChannel { max: 4 });
        let err = fail("OPEN \"f\" FOR WRITING AS #1");
        assert!(matches!(err.kind, ErrorKind::UnexpectedToken { .. }));
    }

    #[test]
    fn test_mid_assign() {
        let body = setup_body("S$ = \"hello\"\nMID$(S$, 1, 2) = \"J\"");
        assert!(calls(&body, HostFn::StrMidAssign));
        let err = fail("N = 1\nMID$(N, 1, 1) = \"x\"");
        assert!(matches!(err.kind, ErrorKind::TypeMismatch(_)));
    }
}
