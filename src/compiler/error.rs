//! Compile error types.
//!
//! Compilation stops at the first error. Every error carries the 1-based
//! source line and the byte span inside that line, so the command line can
//! print `line N: message` and the language server can underline the token.

use crate::lexer::{LexError, Span, Token};
use thiserror::Error;

/// A compile error with location and description.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}: {kind}")]
pub struct CompileError {
    /// 1-based source line.
    pub line: usize,
    /// Byte range within the line.
    pub span: Span,
    /// What went wrong.
    pub kind: ErrorKind,
}

impl CompileError {
    /// Creates a new error at the given line and span.
    pub fn new(kind: ErrorKind, line: usize, span: Span) -> Self {
        Self { line, span, kind }
    }

    /// Short message without the line prefix.
    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

/// The specific kind of compile error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    // ==================== Lexical ====================
    /// Unrecognized character, unterminated string, or bad number.
    #[error(transparent)]
    Lex(#[from] LexError),

    // ==================== Syntactic ====================
    /// Expected a specific token but found something else.
    #[error("expected {expected}, found {found}")]
    UnexpectedToken {
        /// What we expected to find.
        expected: String,
        /// What we actually found.
        found: String,
    },

    /// A complete statement followed by more tokens.
    #[error("extra tokens after statement")]
    ExtraTokens,

    /// A construct still open at the end of input.
    #[error("unterminated block ({opener} without {closer})")]
    UnterminatedBlock {
        /// Keyword that opened the construct.
        opener: &'static str,
        /// Terminator that was never seen.
        closer: &'static str,
    },

    /// A terminator or continuation clause with no open construct to match.
    #[error("{terminator} without matching {opener}")]
    UnmatchedTerminator {
        /// The terminator found.
        terminator: &'static str,
        /// The opener it expects.
        opener: &'static str,
    },

    /// EXIT naming a construct that is not open.
    #[error("EXIT {construct} outside of {construct}")]
    ExitOutside {
        /// Construct named by the EXIT.
        construct: &'static str,
    },

    /// Statement that is not valid where it appears.
    #[error("{0}")]
    Misplaced(String),

    // ==================== Semantic ====================
    /// Call to a name that is neither a built-in nor a defined subroutine.
    #[error("unknown function or subroutine '{name}'")]
    UnknownCallable {
        /// The name called.
        name: String,
    },

    /// Wrong number of arguments.
    #[error("'{name}' expects {expected} argument(s), found {found}")]
    ArgumentCount {
        /// Callable name.
        name: String,
        /// Accepted count, e.g. `2` or `2 or 3`.
        expected: String,
        /// Count supplied.
        found: usize,
    },

    /// Numeric/string mismatch.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Assignment to a CONST.
    #[error("cannot assign to constant '{name}'")]
    ConstantAssignment {
        /// The constant's name.
        name: String,
    },

    /// Name used with the wrong storage mode.
    #[error("'{name}' is not {expected}")]
    WrongStorage {
        /// Variable name.
        name: String,
        /// Description of the required storage, e.g. `an array`.
        expected: &'static str,
    },

    /// Array used or re-dimensioned with the wrong number of indices.
    #[error("'{name}' has {expected} dimension(s), found {found}")]
    DimensionMismatch {
        /// Array name.
        name: String,
        /// Dimensions it was declared with.
        expected: usize,
        /// Indices supplied.
        found: usize,
    },

    /// Second definition of a subroutine or array.
    #[error("'{name}' is already defined")]
    Redefinition {
        /// The name.
        name: String,
    },

    /// Subroutine calling itself.
    #[error("recursive call to '{name}' is not supported")]
    Recursion {
        /// The subroutine name.
        name: String,
    },

    /// File channel outside the fixed table.
    #[error("file channel must be a literal 1-{max}")]
    BadChannel {
        /// Highest channel number.
        max: i32,
    },

    /// Recognized construct the compiler does not support.
    #[error("{0} is not supported")]
    Unsupported(&'static str),

    // ==================== Resource limits ====================
    /// A fixed table is full.
    #[error("too many {what} (limit {limit})")]
    LimitExceeded {
        /// What ran out.
        what: &'static str,
        /// The limit.
        limit: usize,
    },
}

impl ErrorKind {
    /// Error for an unexpected token, or end of line when `found` is `None`.
    pub fn unexpected(expected: impl Into<String>, found: Option<&Token>) -> Self {
        ErrorKind::UnexpectedToken {
            expected: expected.into(),
            found: match found {
                Some(token) => format!("'{}'", token.text),
                None => "end of line".to_string(),
            },
        }
    }

    /// Type mismatch with a message.
    pub fn mismatch(message: impl Into<String>) -> Self {
        ErrorKind::TypeMismatch(message.into())
    }
}
