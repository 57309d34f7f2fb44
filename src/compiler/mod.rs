//! Single-pass compiler from BASIC source to a [`Program`].
//!
//! The compiler reads the source one line at a time. Each line is lexed on
//! demand and compiled straight into the current function's instruction
//! list; there is no syntax tree. All mutable state (symbol table, import
//! registry, control stack, function buffers, string pool, DATA items)
//! lives in one [`Compiler`] value, so independent compilations never share
//! anything.
//!
//! # Structure
//!
//! | File | Statements / role |
//! |---|---|
//! | `expr.rs` | expressions, coercion, folding |
//! | `builtins.rs` | built-in function catalog |
//! | `stmt.rs` | dispatcher, assignment, CONST, SWAP |
//! | `arrays.rs` | DIM, REDIM, ERASE, OPTION BASE, element access |
//! | `control.rs` | IF, FOR, WHILE, DO, SELECT CASE, EXIT |
//! | `procedures.rs` | SUB, FUNCTION, LOCAL, RETURN, calls |
//! | `data.rs` | DATA, READ, RESTORE |
//! | `io.rs` | PRINT, FORMAT and file channels |
//!
//! # Example
//!
//! ```
//! use bas2wasm::compiler::compile_program;
//!
//! let program = compile_program("X = 1\nPRINT X\n").unwrap();
//! assert_eq!(program.functions.len(), 1);
//! ```

mod arrays;
mod builtins;
mod control;
mod data;
pub mod error;
mod expr;
pub mod imports;
mod io;
mod procedures;
mod stmt;
pub mod symbols;

pub use builtins::{Arg, BUILTIN_NAMES, Builtin, Custom, Ret, lookup_builtin};
pub use error::{CompileError, ErrorKind};
pub use imports::{HostFn, ImportDescriptor, ImportRegistry};
pub use symbols::{ArrayShape, Kind, Storage, Subroutine, SymbolTable, VarId, Variable};

use crate::codegen::{
    CallTarget, Const, DataItem, FILE_CHANNELS, FILE_TABLE_BASE, FuncId, FunctionContext,
    GLOBAL_LINE, Instr, Program, StringPool,
};
use crate::lexer::{LexError, Lexer, Span, Token, TokenKind};
use control::ControlEntry;
use log::{debug, info};
use wasm_encoder::ValType;

/// Result type for compilation steps.
pub type CompileResult<T> = Result<T, CompileError>;

/// Compiles a whole source text.
pub fn compile_program(source: &str) -> CompileResult<Program> {
    let mut compiler = Compiler::new();
    for (index, line) in source.lines().enumerate() {
        compiler.compile_line(index + 1, line)?;
    }
    compiler.finish()
}

/// Outcome of checking a source text, keeping the symbol table even when
/// compilation fails. Used by the language server.
#[derive(Debug)]
pub struct Analysis {
    /// Names seen up to the point compilation stopped.
    pub symbols: SymbolTable,
    /// The first error, if any.
    pub error: Option<CompileError>,
}

/// Compiles `source` for diagnostics only.
pub fn analyze(source: &str) -> Analysis {
    let mut compiler = Compiler::new();
    for (index, line) in source.lines().enumerate() {
        if let Err(error) = compiler.compile_line(index + 1, line) {
            return Analysis {
                symbols: compiler.symbols,
                error: Some(error),
            };
        }
    }
    let symbols = compiler.symbols.clone();
    Analysis {
        symbols,
        error: compiler.finish().err(),
    }
}

/// Compiler state for one source unit.
pub struct Compiler<'src> {
    pub(crate) symbols: SymbolTable,
    pub(crate) imports: ImportRegistry,
    pub(crate) functions: Vec<FunctionContext>,
    /// Function receiving instructions.
    pub(crate) current: FuncId,
    /// Open structured constructs, innermost last.
    pub(crate) control: Vec<ControlEntry>,
    pub(crate) pool: StringPool,
    pub(crate) data: Vec<DataItem>,
    /// 1-based number of the line being compiled.
    pub(crate) line: usize,
    lexer: Lexer<'src>,
    last_span: Span,
    /// Set while compiling the statement after a single-line `THEN`, where
    /// `ELSE` ends the statement.
    pub(crate) inline_if: bool,
    /// Lowest array index set by `OPTION BASE`.
    pub(crate) option_base: Option<i32>,
}

impl Default for Compiler<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'src> Compiler<'src> {
    /// Creates a compiler with an empty `setup` function.
    ///
    /// `setup` starts by marking every file channel closed.
    pub fn new() -> Self {
        let mut setup = FunctionContext::new("setup", Vec::new(), None);
        for channel in 0..FILE_CHANNELS {
            setup.emit_all(&[
                Instr::I32Const(FILE_TABLE_BASE as i32 + channel * 4),
                Instr::I32Const(-1),
                Instr::I32Store(0),
            ]);
        }
        Self {
            symbols: SymbolTable::new(),
            imports: ImportRegistry::new(),
            functions: vec![setup],
            current: FuncId::SETUP,
            control: Vec::new(),
            pool: StringPool::new(),
            data: Vec::new(),
            line: 0,
            lexer: Lexer::new(""),
            last_span: Span::default(),
            inline_if: false,
            option_base: None,
        }
    }

    /// The symbol table built so far.
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Compiles one source line.
    pub fn compile_line(&mut self, line: usize, text: &'src str) -> CompileResult<()> {
        self.line = line;
        self.lexer = Lexer::new(text);
        self.last_span = Span::default();
        self.inline_if = false;
        if self.peek()?.is_none() {
            return Ok(());
        }
        debug!("line {line}: {}", text.trim());
        self.emit_all(&[
            Instr::I32Const(line as i32),
            Instr::GlobalSet(GLOBAL_LINE),
        ]);
        self.statement()?;
        self.expect_end()
    }

    /// Checks that every construct is closed and hands over the program.
    pub fn finish(self) -> CompileResult<Program> {
        if let Some(open) = self.control.last() {
            let (opener, closer) = open.construct.names();
            return Err(CompileError::new(
                ErrorKind::UnterminatedBlock { opener, closer },
                open.line,
                open.span,
            ));
        }
        let globals: Vec<ValType> = self.symbols.iter().map(|(_, v)| v.global_type()).collect();
        info!(
            "compiled {} lines: {} functions, {} variables, {} host imports",
            self.line,
            self.functions.len(),
            globals.len(),
            self.imports.len()
        );
        Ok(Program {
            functions: self.functions,
            imports: self.imports,
            globals,
            pool: self.pool,
            data: self.data,
        })
    }

    // ==================== Tokens ====================

    /// Consumes the next token.
    pub(crate) fn next(&mut self) -> CompileResult<Option<Token>> {
        let line = self.line;
        let token = self.lexer.next_token().map_err(|e| lex_error(e, line))?;
        if let Some(token) = &token {
            self.last_span = token.span;
        }
        Ok(token)
    }

    /// Looks at the next token.
    pub(crate) fn peek(&mut self) -> CompileResult<Option<&Token>> {
        let line = self.line;
        self.lexer.peek().map_err(|e| lex_error(e, line))
    }

    /// Kind of the next token.
    pub(crate) fn peek_kind(&mut self) -> CompileResult<Option<TokenKind>> {
        Ok(self.peek()?.map(|t| t.kind))
    }

    /// Hands a consumed token back.
    pub(crate) fn unget(&mut self, token: Token) {
        self.lexer.unget(token);
    }

    /// True if the next token has the given kind.
    pub(crate) fn check(&mut self, kind: TokenKind) -> CompileResult<bool> {
        Ok(self.peek_kind()? == Some(kind))
    }

    /// Consumes the next token if it has the given kind.
    pub(crate) fn match_token(&mut self, kind: TokenKind) -> CompileResult<bool> {
        if self.check(kind)? {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Consumes a token of the given kind or fails with `expected`.
    pub(crate) fn expect(&mut self, kind: TokenKind, expected: &str) -> CompileResult<Token> {
        match self.next()? {
            Some(token) if token.kind == kind => Ok(token),
            other => Err(self.unexpected(expected, other)),
        }
    }

    /// Consumes an identifier.
    pub(crate) fn expect_name(&mut self, expected: &str) -> CompileResult<Token> {
        self.expect(TokenKind::Identifier, expected)
    }

    /// True at the end of the statement.
    pub(crate) fn at_end(&mut self) -> CompileResult<bool> {
        Ok(match self.peek_kind()? {
            None => true,
            Some(TokenKind::Else) => self.inline_if,
            Some(_) => false,
        })
    }

    /// Fails unless the statement is complete.
    pub(crate) fn expect_end(&mut self) -> CompileResult<()> {
        if self.at_end()? {
            return Ok(());
        }
        if let Some(token) = self.next()? {
            self.last_span = token.span;
        }
        Err(self.error(ErrorKind::ExtraTokens))
    }

    // ==================== Errors ====================

    /// Error at the most recently consumed token.
    pub(crate) fn error(&self, kind: ErrorKind) -> CompileError {
        CompileError::new(kind, self.line, self.last_span)
    }

    /// Error at a specific token.
    pub(crate) fn error_at(&self, kind: ErrorKind, token: &Token) -> CompileError {
        CompileError::new(kind, self.line, token.span)
    }

    /// Unexpected-token error; `None` means the line ended early.
    pub(crate) fn unexpected(&self, expected: &str, found: Option<Token>) -> CompileError {
        let kind = ErrorKind::unexpected(expected, found.as_ref());
        match found {
            Some(token) => self.error_at(kind, &token),
            None => {
                let end = self.lexer.source().len();
                CompileError::new(kind, self.line, Span::new(end, end))
            }
        }
    }

    // ==================== Emission ====================

    /// The function receiving instructions.
    pub(crate) fn func(&mut self) -> &mut FunctionContext {
        &mut self.functions[self.current.index()]
    }

    pub(crate) fn emit(&mut self, instr: Instr) {
        self.func().emit(instr);
    }

    pub(crate) fn emit_all(&mut self, instrs: &[Instr]) {
        self.func().emit_all(instrs);
    }

    pub(crate) fn push_i32(&mut self, value: i32) {
        self.func().push_const(Const::I32(value));
    }

    pub(crate) fn push_f32(&mut self, value: f32) {
        self.func().push_const(Const::F32(value));
    }

    /// Emits a call to a host function and records the import.
    pub(crate) fn call_host(&mut self, host: HostFn) {
        self.imports.mark(host);
        self.emit(Instr::Call(CallTarget::Host(host)));
    }

    pub(crate) fn alloc_local(&mut self, ty: ValType) -> u32 {
        self.func().alloc_local(ty)
    }

    /// Current structured nesting depth of the current function.
    pub(crate) fn depth(&mut self) -> u32 {
        self.func().depth()
    }

    /// Resolves a name token to its slot.
    pub(crate) fn resolve(&mut self, token: &Token) -> CompileResult<VarId> {
        let line = self.line;
        self.symbols
            .resolve(&token.text, line)
            .map_err(|kind| self.error_at(kind, token))
    }

    /// Interns a string literal and returns its handle.
    pub(crate) fn intern(&mut self, text: &str) -> i32 {
        self.pool.intern(text) as i32
    }
}

fn lex_error(e: LexError, line: usize) -> CompileError {
    let span = e.span();
    CompileError::new(ErrorKind::Lex(e), line, span)
}
