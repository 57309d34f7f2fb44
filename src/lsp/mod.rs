//! Language Server Protocol implementation for bas2wasm.
//!
//! This module provides an LSP server that enables IDE features like:
//! - Real-time error diagnostics
//! - Hover information (variables, subroutines, built-ins, keywords)
//!
//! # Architecture
//!
//! The LSP server uses `tower-lsp` and communicates via JSON-RPC over stdio.
//! It keeps the text of open documents and recompiles on every change.
//!
//! ```text
//! Editor (VSCode, etc.)
//!     ↓ JSON-RPC over stdio
//! BasLanguageServer
//!     ↓ Uses
//! bas2wasm compiler (lexer, compiler, assembler)
//! ```
//!
//! Compilation stops at the first error, so a document has at most one
//! diagnostic.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};

use crate::compiler::{Storage, SymbolTable, Variable, analyze, lookup_builtin};
use crate::lexer::{Lexer, Span, Token, TokenKind};

/// State for a single open document.
#[derive(Debug)]
pub struct DocumentState {
    /// The document's content.
    pub content: String,
    /// The document's version (for incremental updates).
    pub version: i32,
}

/// Shared state for the language server.
#[derive(Debug, Default)]
pub struct ServerState {
    /// Open documents indexed by URI.
    pub documents: HashMap<Url, DocumentState>,
}

/// The bas2wasm Language Server.
pub struct BasLanguageServer {
    /// Client handle for sending notifications.
    client: Client,
    /// Shared server state.
    state: Arc<RwLock<ServerState>>,
}

impl BasLanguageServer {
    /// Creates a new language server instance.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            state: Arc::new(RwLock::new(ServerState::default())),
        }
    }

    /// Analyzes a document and publishes diagnostics.
    async fn analyze_document(&self, uri: &Url, content: &str) {
        let diagnostics = diagnostics(content);
        log::debug!("{uri}: {} diagnostic(s)", diagnostics.len());
        self.client
            .publish_diagnostics(uri.clone(), diagnostics, None)
            .await;
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for BasLanguageServer {
    async fn initialize(&self, _: InitializeParams) -> Result<InitializeResult> {
        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                // Document sync - we want full content on each change
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::FULL,
                )),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: "bas2wasm-lsp".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        self.client
            .log_message(MessageType::INFO, "bas2wasm LSP server initialized")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let content = params.text_document.text;
        let version = params.text_document.version;

        {
            let mut state = self.state.write().await;
            state.documents.insert(
                uri.clone(),
                DocumentState {
                    content: content.clone(),
                    version,
                },
            );
        }

        self.analyze_document(&uri, &content).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;

        // FULL sync: the first change carries the whole text
        if let Some(change) = params.content_changes.into_iter().next() {
            let content = change.text;

            {
                let mut state = self.state.write().await;
                if let Some(doc) = state.documents.get_mut(&uri) {
                    doc.content = content.clone();
                    doc.version = params.text_document.version;
                }
            }

            self.analyze_document(&uri, &content).await;
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;

        {
            let mut state = self.state.write().await;
            state.documents.remove(&uri);
        }

        self.client.publish_diagnostics(uri, vec![], None).await;
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = &params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;

        let content = {
            let state = self.state.read().await;
            state.documents.get(uri).map(|d| d.content.clone())
        };

        if let Some(content) = content
            && let Some(info) = hover_info(&content, position)
        {
            return Ok(Some(Hover {
                contents: HoverContents::Markup(MarkupContent {
                    kind: MarkupKind::Markdown,
                    value: info,
                }),
                range: None,
            }));
        }

        Ok(None)
    }
}

/// Compiles `source` and converts the first failure into a diagnostic.
pub fn diagnostics(source: &str) -> Vec<Diagnostic> {
    let (range, message) = match analyze(source).error {
        Some(error) => (line_range(source, error.line, error.span), error.to_string()),
        // Layout limits are only found by the assembler
        None => match crate::compile(source) {
            Ok(_) => return Vec::new(),
            Err(error) => (Range::default(), error.to_string()),
        },
    };
    vec![Diagnostic {
        range,
        severity: Some(DiagnosticSeverity::ERROR),
        source: Some("bas2wasm".to_string()),
        message,
        ..Default::default()
    }]
}

/// Markdown describing the identifier or keyword under `position`.
pub fn hover_info(source: &str, position: Position) -> Option<String> {
    let offset = position_to_offset(source, position)?;
    let line_start = source[..offset].rfind('\n').map_or(0, |i| i + 1);
    let line_end = source[offset..]
        .find('\n')
        .map_or(source.len(), |i| offset + i);
    let column = offset - line_start;

    let token = token_at(&source[line_start..line_end], column)?;
    if token.kind == TokenKind::Identifier {
        let name = token.name();
        let symbols = analyze(source).symbols;
        if let Some(id) = symbols.lookup(&name) {
            return Some(describe_variable(&symbols, symbols.get(id)));
        }
        let builtin = lookup_builtin(&name)?;
        return Some(format!("**{name}**\n\n{}", builtin.describe()));
    }
    keyword_help(token.kind).map(|help| format!("**{}**\n\n{help}", token.name()))
}

/// Finds the token covering byte `column` of a single line.
fn token_at(line: &str, column: usize) -> Option<Token> {
    Lexer::new(line)
        .map_while(|token| token.ok())
        .find(|token| token.span.start <= column && column < token.span.end)
}

fn describe_variable(symbols: &SymbolTable, var: &Variable) -> String {
    let detail = match &var.storage {
        Storage::Scalar if var.constant => format!("constant, {}", var.kind),
        Storage::Scalar => format!("variable, {}", var.kind),
        Storage::Array(shape) if shape.dims > 1 => {
            format!("{}-dimensional array of {}", shape.dims, var.kind)
        }
        Storage::Array(_) => format!("array of {}", var.kind),
        Storage::Subroutine(sub) => {
            let params: Vec<String> = sub
                .params
                .iter()
                .map(|&p| symbols.get(p).name.clone())
                .collect();
            if sub.is_function {
                format!("FUNCTION({}) returns {}", params.join(", "), var.kind)
            } else {
                format!("SUB({})", params.join(", "))
            }
        }
    };
    format!("**{}**\n\n{detail}, first seen on line {}", var.name, var.line)
}

fn keyword_help(kind: TokenKind) -> Option<&'static str> {
    use TokenKind::*;
    let help = match kind {
        If | Then | Else | ElseIf => "conditional: `IF cond THEN ... [ELSEIF ...] [ELSE ...] END IF`",
        For | To | Step | Next => "counted loop: `FOR v = a TO b [STEP s] ... NEXT [v]`",
        While | Wend => "pre-tested loop: `WHILE cond ... WEND`",
        Do | Loop | Until => "loop: `DO [WHILE|UNTIL cond] ... LOOP [WHILE|UNTIL cond]`",
        Select | Case | Is => "multi-way branch: `SELECT CASE x ... CASE a, IS < b ... CASE ELSE ... END SELECT`",
        Exit => "leaves the innermost FOR, WHILE, DO, SUB or FUNCTION",
        Return => "leaves the current SUB or FUNCTION, optionally with a result",
        End => "ends the program, or closes IF, SELECT, SUB and FUNCTION blocks",
        Bye | Break => "returns from the current SUB or FUNCTION, or ends the script",
        Resume => "not supported in compiled scripts",
        Dim => "declares an array: `DIM a(n)` holds n elements, `DIM m(r, c)` is two-dimensional",
        Redim => "re-dimensions an array: `REDIM [PRESERVE] a(n)` takes a new block, PRESERVE keeps the leading elements",
        Erase => "clears every element of an array: `ERASE a`",
        Option => "`OPTION BASE 0|1` sets the lowest index of arrays declared afterwards",
        Const => "declares a constant: `CONST K = expr`",
        Local => "saves variables on entry, restoring them when the subroutine returns",
        Sub | Function => "declares a subroutine: `SUB name(p, ...)` or `FUNCTION name(p, ...)`",
        Ubound => "declared size of an array: `UBOUND(a [, dimension])`",
        Swap => "exchanges two scalar variables of the same kind",
        Data | Read | Restore => "static data: `DATA` literals, `READ` into variables, `RESTORE` rewinds",
        Print => "prints a number or string followed by a newline",
        Prints => "prints a string followed by a newline",
        Format => "formatted print: `%` formats a number and `$` a string",
        Open | Close | As => "file channels: `OPEN path FOR mode AS #n`, `CLOSE #n`",
        Kill | Mkdir | Rmdir => "filesystem: delete a file, create or remove a directory",
        And | Or | Not | Xor => "bitwise logic on integers",
        Mod => "integer remainder, sign follows the dividend",
        _ => return None,
    };
    Some(help)
}

/// Converts a 1-based line number and an in-line span to an LSP Range.
fn line_range(source: &str, line: usize, span: Span) -> Range {
    let line_start: usize = source
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    span_to_range(source, line_start + span.start, line_start + span.end)
}

/// Converts a byte range to an LSP Range.
fn span_to_range(source: &str, start: usize, end: usize) -> Range {
    let start_pos = offset_to_position(source, start);
    let end_pos = offset_to_position(source, end);
    Range {
        start: start_pos,
        end: end_pos,
    }
}

/// Converts a byte offset to an LSP Position (line, character).
fn offset_to_position(source: &str, offset: usize) -> Position {
    let mut line = 0u32;
    let mut character = 0u32;

    for (i, c) in source.char_indices() {
        if i >= offset {
            break;
        }
        if c == '\n' {
            line += 1;
            character = 0;
        } else {
            character += 1;
        }
    }

    Position { line, character }
}

/// Converts an LSP Position to a byte offset.
fn position_to_offset(source: &str, position: Position) -> Option<usize> {
    let mut current_line = 0u32;
    let mut current_char = 0u32;

    for (i, c) in source.char_indices() {
        if current_line == position.line && current_char == position.character {
            return Some(i);
        }
        if c == '\n' {
            if current_line == position.line {
                // Position is past end of line
                return Some(i);
            }
            current_line += 1;
            current_char = 0;
        } else {
            current_char += 1;
        }
    }

    // Position might be at the very end
    if current_line == position.line {
        Some(source.len())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: u32, character: u32) -> Position {
        Position { line, character }
    }

    #[test]
    fn test_offset_to_position() {
        let source = "PRINT \"Hello\"\nDIM A(3)\n";
        assert_eq!(offset_to_position(source, 0), pos(0, 0));
        assert_eq!(offset_to_position(source, 6), pos(0, 6));
        assert_eq!(offset_to_position(source, 14), pos(1, 0));
    }

    #[test]
    fn test_position_to_offset() {
        let source = "PRINT \"Hello\"\nDIM A(3)\n";
        assert_eq!(position_to_offset(source, pos(0, 0)), Some(0));
        assert_eq!(position_to_offset(source, pos(0, 6)), Some(6));
        assert_eq!(position_to_offset(source, pos(1, 0)), Some(14));
        assert_eq!(position_to_offset(source, pos(9, 0)), None);
    }

    #[test]
    fn test_span_to_range() {
        let range = span_to_range("PRINT \"Hello\"\nDIM A(3)\n", 0, 5);
        assert_eq!(range.start, pos(0, 0));
        assert_eq!(range.end, pos(0, 5));
    }

    #[test]
    fn test_line_range() {
        let range = line_range("X = 1\nPRINT FOO(X)\n", 2, Span::new(6, 9));
        assert_eq!(range.start, pos(1, 6));
        assert_eq!(range.end, pos(1, 9));
    }

    #[test]
    fn test_clean_source_has_no_diagnostics() {
        assert!(diagnostics("FOR I = 1 TO 3\nPRINT I\nNEXT").is_empty());
    }

    #[test]
    fn test_diagnostic_points_at_line() {
        let found = diagnostics("X = 1\nPRINT FOO(X)");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].range.start.line, 1);
        assert_eq!(found[0].severity, Some(DiagnosticSeverity::ERROR));
        assert!(found[0].message.starts_with("line 2: "));
    }

    #[test]
    fn test_unterminated_block_diagnostic() {
        let found = diagnostics("IF X > 0\nPRINT X");
        assert_eq!(found[0].range.start.line, 0);
        assert!(found[0].message.contains("unterminated block"));
    }

    #[test]
    fn test_hover_variable() {
        let info = hover_info("A$ = \"x\"\nPRINT A$", pos(1, 7)).unwrap();
        assert!(info.contains("**A$**"));
        assert!(info.contains("variable, string"));
    }

    #[test]
    fn test_hover_array_dimensions() {
        let source = "DIM GRID#(4, 8)\nGRID#(1, 2) = 0.5";
        let info = hover_info(source, pos(1, 2)).unwrap();
        assert!(info.contains("2-dimensional array of float"), "{info}");
        let info = hover_info("OPTION BASE 1", pos(0, 1)).unwrap();
        assert!(info.contains("OPTION BASE"), "{info}");
    }

    #[test]
    fn test_hover_subroutine_lists_parameters() {
        let source = "FUNCTION F(X, Y#)\nRETURN X\nEND FUNCTION\nPRINT F(1, 2.0)";
        let info = hover_info(source, pos(3, 6)).unwrap();
        assert!(info.contains("FUNCTION(X, Y#)"), "{info}");
    }

    #[test]
    fn test_hover_builtin_names_import() {
        let info = hover_info("X# = SIN(1.0)\nPRINT GETPARAM(1)", pos(1, 8)).unwrap();
        assert!(info.contains("env.get_param"), "{info}");
    }

    #[test]
    fn test_hover_keyword() {
        let info = hover_info("WHILE 0\nWEND", pos(0, 2)).unwrap();
        assert!(info.starts_with("**WHILE**"));
    }

    #[test]
    fn test_hover_outside_tokens() {
        assert_eq!(hover_info("PRINT 1", pos(0, 5)), None);
        assert_eq!(hover_info("PRINT 1", pos(3, 0)), None);
    }
}
