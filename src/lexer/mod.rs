//! Lexical analysis for bas2wasm.
//!
//! This module converts BASIC source lines into a stream of [`Token`]s.
//! It handles:
//!
//! - Case-insensitive keyword recognition
//! - Decimal, `&H` and `0x` integer literals, and float literals
//! - String literals with doubled-quote and backslash escapes
//! - Comments (both `'` and `REM` styles)
//! - Identifiers with an optional `#` (float) or `$` (string) sigil
//!
//! ## Example
//!
//! ```
//! use bas2wasm::lexer::{Lexer, TokenKind};
//!
//! let mut lexer = Lexer::new("PRINT X + 1");
//!
//! let first = lexer.next_token().unwrap().unwrap();
//! assert_eq!(first.kind, TokenKind::Print);
//! ```
//!
//! ## Design Notes
//!
//! The compiler works one line at a time: each statement is a line, and a
//! [`Lexer`] is created per line. One token of pushback ([`Lexer::unget`]) is
//! all the statement compiler needs to decide between forms such as
//! `NAME = expr` and `NAME args`.

mod token;

pub use token::{ScanError, Span, Token, TokenKind};

use logos::Logos;
use thiserror::Error;

/// A lexical error with its position in the line.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexError {
    /// Character that starts no token
    #[error("bad token '{text}'")]
    BadToken { text: String, span: Span },

    /// String literal without a closing quote
    #[error("unterminated string")]
    UnterminatedString { span: Span },

    /// Integer literal wider than 32 bits
    #[error("number '{text}' out of range")]
    NumberOutOfRange { text: String, span: Span },

    /// Float literal that does not parse
    #[error("malformed number '{text}'")]
    MalformedNumber { text: String, span: Span },
}

impl LexError {
    /// Get the span where the error occurred.
    pub fn span(&self) -> Span {
        match self {
            LexError::BadToken { span, .. }
            | LexError::UnterminatedString { span }
            | LexError::NumberOutOfRange { span, .. }
            | LexError::MalformedNumber { span, .. } => *span,
        }
    }
}

/// The lexer for one source line.
///
/// Wraps a `logos` lexer, drops comments, validates numeric literals and
/// supports pushing back a single token.
pub struct Lexer<'source> {
    /// The underlying logos lexer
    inner: logos::Lexer<'source, TokenKind>,
    /// The original source (for error reporting)
    source: &'source str,
    /// A token handed back with [`Lexer::unget`]
    pending: Option<Token>,
}

impl<'source> Lexer<'source> {
    /// Create a new lexer for the given source text.
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: TokenKind::lexer(source),
            source,
            pending: None,
        }
    }

    /// Get the original source text.
    pub fn source(&self) -> &'source str {
        self.source
    }

    /// Get the next token, or `None` at the end of the text.
    ///
    /// Comments are skipped. Numeric literals are range-checked here so
    /// that every later consumer can rely on [`Token::int_value`] and
    /// [`Token::float_value`] succeeding.
    ///
    /// # Example
    ///
    /// ```
    /// use bas2wasm::lexer::{Lexer, TokenKind};
    ///
    /// let mut lexer = Lexer::new("WEND ' done");
    /// assert_eq!(lexer.next_token().unwrap().unwrap().kind, TokenKind::Wend);
    /// assert!(lexer.next_token().unwrap().is_none());
    /// ```
    pub fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        if let Some(token) = self.pending.take() {
            return Ok(Some(token));
        }
        loop {
            let Some(result) = self.inner.next() else {
                return Ok(None);
            };
            let span = Span::from(self.inner.span());
            let text = self.inner.slice();
            match result {
                Ok(kind) if kind.is_trivia() => continue,
                Ok(kind) => {
                    let token = Token::new(kind, span, text);
                    check_literal(&token)?;
                    return Ok(Some(token));
                }
                Err(ScanError::UnterminatedString) => {
                    return Err(LexError::UnterminatedString { span });
                }
                Err(ScanError::BadCharacter) => {
                    return Err(LexError::BadToken {
                        text: text.to_string(),
                        span,
                    });
                }
            }
        }
    }

    /// Look at the next token without consuming it.
    pub fn peek(&mut self) -> Result<Option<&Token>, LexError> {
        if self.pending.is_none() {
            self.pending = self.next_token()?;
        }
        Ok(self.pending.as_ref())
    }

    /// Push a token back; the next call to [`Lexer::next_token`] returns it.
    ///
    /// Only one token may be pending at a time.
    pub fn unget(&mut self, token: Token) {
        debug_assert!(self.pending.is_none(), "only one token of pushback");
        self.pending = Some(token);
    }

    /// Byte offset just past the last consumed token.
    pub fn position(&self) -> usize {
        match &self.pending {
            Some(token) => token.span.start,
            None => self.inner.span().end,
        }
    }

    /// Collect all remaining tokens into a vector, stopping at the first error.
    pub fn collect_tokens(self) -> Result<Vec<Token>, LexError> {
        self.collect()
    }
}

fn check_literal(token: &Token) -> Result<(), LexError> {
    match token.kind {
        TokenKind::IntegerLiteral | TokenKind::HexLiteral if token.int_value().is_none() => {
            Err(LexError::NumberOutOfRange {
                text: token.text.clone(),
                span: token.span,
            })
        }
        TokenKind::FloatLiteral if token.float_value().is_none() => {
            Err(LexError::MalformedNumber {
                text: token.text.clone(),
                span: token.span,
            })
        }
        _ => Ok(()),
    }
}

/// Implement Iterator so the lexer can be used with for loops and iterator adapters.
impl<'source> Iterator for Lexer<'source> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token().transpose()
    }
}

/// Convenience function to lex source text directly.
///
/// Newlines are kept as [`TokenKind::Newline`] tokens, which makes this
/// suitable for dumping a whole file.
///
/// # Example
///
/// ```
/// use bas2wasm::lexer::{lex, TokenKind};
///
/// let tokens = lex("PRINT 42").unwrap();
/// assert_eq!(tokens[0].kind, TokenKind::Print);
/// assert_eq!(tokens[1].int_value(), Some(42));
/// ```
pub fn lex(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).collect_tokens()
}
