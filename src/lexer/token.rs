//! Token definitions for the bas2wasm lexer.
//!
//! This module defines every token recognized by the BASIC lexer:
//! - Keywords (IF, THEN, PRINT, etc.)
//! - Operators (+, -, AND, OR, etc.)
//! - Literals (numbers, strings)
//! - Punctuation and delimiters
//!
//! ## Design Notes
//!
//! We use the `logos` crate for lexical analysis. Keywords are matched with
//! `ignore(ascii_case)` since the dialect is case-insensitive. String literals
//! are scanned by a callback so that doubled quotes and backslash escapes can
//! be handled without regex backtracking, and so an unterminated string is
//! reported as such instead of as a stray quote.

use logos::Logos;
use std::fmt;
use std::ops::Range;

/// A byte range within a single source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Start byte offset (inclusive)
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
}

impl Span {
    /// Create a new span.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Create a span covering both input spans.
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<Range<usize>> for Span {
    fn from(range: Range<usize>) -> Self {
        Self::new(range.start, range.end)
    }
}

/// A token with its location in the source line.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// Byte range of the token within its line
    pub span: Span,
    /// The original text of the token
    pub text: String,
}

impl Token {
    /// Create a new token with the given kind, span, and text.
    pub fn new(kind: TokenKind, span: impl Into<Span>, text: impl Into<String>) -> Self {
        Self {
            kind,
            span: span.into(),
            text: text.into(),
        }
    }

    /// Identifier text folded to upper case, sigil included.
    pub fn name(&self) -> String {
        self.text.to_ascii_uppercase()
    }

    /// Integer value of a decimal or hexadecimal literal.
    ///
    /// Values up to `0xFFFFFFFF` are accepted and wrap into `i32`, so
    /// `&HFFFFFFFF` is `-1`. Anything wider is out of range.
    pub fn int_value(&self) -> Option<i32> {
        let value = match self.kind {
            TokenKind::IntegerLiteral => self.text.parse::<u64>().ok()?,
            TokenKind::HexLiteral => {
                let digits = self
                    .text
                    .strip_prefix("&H")
                    .or_else(|| self.text.strip_prefix("&h"))
                    .or_else(|| self.text.strip_prefix("0x"))
                    .or_else(|| self.text.strip_prefix("0X"))?;
                u64::from_str_radix(digits, 16).ok()?
            }
            _ => return None,
        };
        u32::try_from(value).ok().map(|v| v as i32)
    }

    /// Value of a float literal.
    pub fn float_value(&self) -> Option<f32> {
        match self.kind {
            TokenKind::FloatLiteral => self.text.parse::<f32>().ok(),
            _ => None,
        }
    }

    /// Decoded contents of a string literal.
    ///
    /// `""` becomes one quote; `\n`, `\t`, `\\` and `\"` are escapes and any
    /// other backslash is kept as written.
    pub fn string_value(&self) -> Option<String> {
        if self.kind != TokenKind::StringLiteral {
            return None;
        }
        let body = self.text.strip_prefix('"')?.strip_suffix('"')?;
        let mut out = String::with_capacity(body.len());
        let mut chars = body.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '"' => {
                    // Only reachable as the first half of a doubled quote
                    chars.next();
                    out.push('"');
                }
                '\\' => match chars.peek() {
                    Some('n') => {
                        chars.next();
                        out.push('\n');
                    }
                    Some('t') => {
                        chars.next();
                        out.push('\t');
                    }
                    Some('\\') => {
                        chars.next();
                        out.push('\\');
                    }
                    Some('"') => {
                        chars.next();
                        out.push('"');
                    }
                    _ => out.push('\\'),
                },
                c => out.push(c),
            }
        }
        Some(out)
    }
}

/// Error produced by the generated scanner.
///
/// Converted into a [`LexError`](super::LexError) with position and text by
/// the [`Lexer`](super::Lexer) wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanError {
    /// A character that starts no token
    #[default]
    BadCharacter,
    /// A string literal with no closing quote on its line
    UnterminatedString,
}

/// Scan the body of a string literal after its opening quote.
fn scan_string(lex: &mut logos::Lexer<TokenKind>) -> Result<(), ScanError> {
    let rest = lex.remainder().as_bytes();
    let mut i = 0;
    while i < rest.len() {
        match rest[i] {
            b'"' if rest.get(i + 1) == Some(&b'"') => i += 2,
            b'"' => {
                lex.bump(i + 1);
                return Ok(());
            }
            b'\\' if matches!(rest.get(i + 1), Some(&c) if c.is_ascii() && c != b'\n') => i += 2,
            b'\n' => break,
            _ => i += 1,
        }
    }
    lex.bump(i);
    Err(ScanError::UnterminatedString)
}

/// All token types of the scripting dialect.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[logos(error = ScanError)]
#[logos(skip r"[ \t\r]+")]
pub enum TokenKind {
    // ==================== Control Flow Keywords ====================

    /// IF keyword - begins conditional statement
    #[token("IF", ignore(ascii_case))]
    If,

    /// THEN keyword - follows IF condition
    #[token("THEN", ignore(ascii_case))]
    Then,

    /// ELSE keyword - alternative branch
    #[token("ELSE", ignore(ascii_case))]
    Else,

    /// ELSEIF keyword - chained conditional
    #[token("ELSEIF", ignore(ascii_case))]
    ElseIf,

    /// END keyword - closes IF, SUB, FUNCTION, SELECT; bare END returns
    #[token("END", ignore(ascii_case))]
    End,

    /// FOR keyword - begins FOR loop
    #[token("FOR", ignore(ascii_case))]
    For,

    /// TO keyword - FOR loop range
    #[token("TO", ignore(ascii_case))]
    To,

    /// STEP keyword - FOR loop increment
    #[token("STEP", ignore(ascii_case))]
    Step,

    /// NEXT keyword - ends FOR loop
    #[token("NEXT", ignore(ascii_case))]
    Next,

    /// WHILE keyword - begins WHILE loop or DO WHILE
    #[token("WHILE", ignore(ascii_case))]
    While,

    /// WEND keyword - ends WHILE loop
    #[token("WEND", ignore(ascii_case))]
    Wend,

    /// DO keyword - begins DO loop
    #[token("DO", ignore(ascii_case))]
    Do,

    /// LOOP keyword - ends DO loop
    #[token("LOOP", ignore(ascii_case))]
    Loop,

    /// UNTIL keyword - negated loop condition
    #[token("UNTIL", ignore(ascii_case))]
    Until,

    /// SELECT keyword - begins SELECT CASE
    #[token("SELECT", ignore(ascii_case))]
    Select,

    /// CASE keyword - SELECT CASE branch
    #[token("CASE", ignore(ascii_case))]
    Case,

    /// IS keyword - relational CASE guard
    #[token("IS", ignore(ascii_case))]
    Is,

    /// RETURN keyword - return from SUB or FUNCTION
    #[token("RETURN", ignore(ascii_case))]
    Return,

    /// EXIT keyword - early exit from loop/select/sub
    #[token("EXIT", ignore(ascii_case))]
    Exit,

    /// BYE keyword - stop the script
    #[token("BYE", ignore(ascii_case))]
    Bye,

    /// BREAK keyword - stop the script
    #[token("BREAK", ignore(ascii_case))]
    Break,

    /// RESUME keyword - recognized but not supported
    #[token("RESUME", ignore(ascii_case))]
    Resume,

    // ==================== Declaration Keywords ====================

    /// DIM keyword - array declaration
    #[token("DIM", ignore(ascii_case))]
    Dim,

    /// REDIM keyword - array re-dimension, optionally PRESERVE
    #[token("REDIM", ignore(ascii_case))]
    Redim,

    /// ERASE keyword - clear array elements
    #[token("ERASE", ignore(ascii_case))]
    Erase,

    /// OPTION keyword - `OPTION BASE 0|1`
    #[token("OPTION", ignore(ascii_case))]
    Option,

    /// CONST keyword - constant declaration
    #[token("CONST", ignore(ascii_case))]
    Const,

    /// LOCAL keyword - subroutine-local save/restore
    #[token("LOCAL", ignore(ascii_case))]
    Local,

    /// SUB keyword - subroutine definition
    #[token("SUB", ignore(ascii_case))]
    Sub,

    /// FUNCTION keyword - function definition
    #[token("FUNCTION", ignore(ascii_case))]
    Function,

    /// UBOUND keyword - array element count
    #[token("UBOUND", ignore(ascii_case))]
    Ubound,

    /// SWAP keyword - exchange two variables
    #[token("SWAP", ignore(ascii_case))]
    Swap,

    // ==================== Data Keywords ====================

    /// DATA statement
    #[token("DATA", ignore(ascii_case))]
    Data,

    /// READ statement
    #[token("READ", ignore(ascii_case))]
    Read,

    /// RESTORE statement
    #[token("RESTORE", ignore(ascii_case))]
    Restore,

    // ==================== I/O Keywords ====================

    /// PRINT statement
    #[token("PRINT", ignore(ascii_case))]
    Print,

    /// PRINTS statement - string print
    #[token("PRINTS", ignore(ascii_case))]
    Prints,

    /// FORMAT statement - formatted print
    #[token("FORMAT", ignore(ascii_case))]
    Format,

    /// OPEN statement
    #[token("OPEN", ignore(ascii_case))]
    Open,

    /// CLOSE statement
    #[token("CLOSE", ignore(ascii_case))]
    Close,

    /// AS keyword - OPEN channel, NAME target
    #[token("AS", ignore(ascii_case))]
    As,

    /// KILL statement - delete file
    #[token("KILL", ignore(ascii_case))]
    Kill,

    /// MKDIR statement
    #[token("MKDIR", ignore(ascii_case))]
    Mkdir,

    /// RMDIR statement
    #[token("RMDIR", ignore(ascii_case))]
    Rmdir,

    // ==================== Logical Operators (Keywords) ====================

    /// AND operator
    #[token("AND", ignore(ascii_case))]
    And,

    /// OR operator
    #[token("OR", ignore(ascii_case))]
    Or,

    /// NOT operator
    #[token("NOT", ignore(ascii_case))]
    Not,

    /// XOR operator
    #[token("XOR", ignore(ascii_case))]
    Xor,

    /// MOD operator
    #[token("MOD", ignore(ascii_case))]
    Mod,

    // ==================== Arithmetic Operators ====================

    /// + addition or string concatenation
    #[token("+")]
    Plus,

    /// - subtraction or negation
    #[token("-")]
    Minus,

    /// * multiplication
    #[token("*")]
    Star,

    /// / division
    #[token("/")]
    Slash,

    /// \ integer division
    #[token("\\")]
    Backslash,

    /// ^ exponentiation
    #[token("^")]
    Caret,

    // ==================== Comparison Operators ====================

    /// = equals (assignment or comparison)
    #[token("=")]
    Equals,

    /// <> not equals
    #[token("<>")]
    NotEquals,

    /// < less than
    #[token("<")]
    LessThan,

    /// > greater than, or the print shorthand at statement start
    #[token(">")]
    GreaterThan,

    /// <= less than or equal
    #[token("<=")]
    LessEquals,

    /// >= greater than or equal
    #[token(">=")]
    GreaterEquals,

    // ==================== Punctuation ====================

    /// ( left parenthesis
    #[token("(")]
    LeftParen,

    /// ) right parenthesis
    #[token(")")]
    RightParen,

    /// , comma - argument separator
    #[token(",")]
    Comma,

    /// # hash - file channel prefix
    #[token("#")]
    Hash,

    // ==================== Literals ====================

    /// Integer literal (decimal)
    /// Examples: 123, 0, 999999
    #[regex(r"[0-9]+", priority = 2)]
    IntegerLiteral,

    /// Hexadecimal literal
    /// Examples: &H1F, &HFF00, 0x1F
    #[regex(r"&[Hh][0-9A-Fa-f]+|0[xX][0-9A-Fa-f]+")]
    HexLiteral,

    /// Floating point literal
    /// Examples: 1.5, .5, 1., 1.5E3
    #[regex(r"[0-9]+\.[0-9]*([Ee][+-]?[0-9]+)?|\.[0-9]+([Ee][+-]?[0-9]+)?")]
    FloatLiteral,

    /// String literal, quotes included in the token text
    #[token("\"", scan_string)]
    StringLiteral,

    // ==================== Identifiers ====================

    /// Identifier (variable, array, subroutine or built-in name)
    /// May end with a kind sigil: `#` float, `$` string
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*[$#]?")]
    Identifier,

    // ==================== Special Tokens ====================

    /// Comment - starts with '
    #[regex(r"'[^\n]*")]
    Comment,

    /// REM comment
    /// Must be followed by space or end of line to distinguish from identifiers like REMAP
    #[regex(r"(?i:REM)([ \t][^\n]*)?")]
    RemComment,

    /// Newline - ends a statement
    #[regex(r"\n")]
    Newline,
}

impl TokenKind {
    /// True for tokens the compiler never sees.
    pub fn is_trivia(self) -> bool {
        matches!(self, TokenKind::Comment | TokenKind::RemComment)
    }

    /// True for reserved words.
    pub fn is_keyword(self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            If | Then
                | Else
                | ElseIf
                | End
                | For
                | To
                | Step
                | Next
                | While
                | Wend
                | Do
                | Loop
                | Until
                | Select
                | Case
                | Is
                | Return
                | Exit
                | Bye
                | Break
                | Resume
                | Dim
                | Redim
                | Erase
                | Option
                | Const
                | Local
                | Sub
                | Function
                | Ubound
                | Swap
                | Data
                | Read
                | Restore
                | Print
                | Prints
                | Format
                | Open
                | Close
                | As
                | Kill
                | Mkdir
                | Rmdir
                | And
                | Or
                | Not
                | Xor
                | Mod
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Operators display as symbols
            TokenKind::Plus => write!(f, "'+'"),
            TokenKind::Minus => write!(f, "'-'"),
            TokenKind::Star => write!(f, "'*'"),
            TokenKind::Slash => write!(f, "'/'"),
            TokenKind::Backslash => write!(f, "'\\'"),
            TokenKind::Caret => write!(f, "'^'"),
            TokenKind::Equals => write!(f, "'='"),
            TokenKind::NotEquals => write!(f, "'<>'"),
            TokenKind::LessThan => write!(f, "'<'"),
            TokenKind::GreaterThan => write!(f, "'>'"),
            TokenKind::LessEquals => write!(f, "'<='"),
            TokenKind::GreaterEquals => write!(f, "'>='"),
            TokenKind::LeftParen => write!(f, "'('"),
            TokenKind::RightParen => write!(f, "')'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Hash => write!(f, "'#'"),

            TokenKind::IntegerLiteral | TokenKind::HexLiteral => write!(f, "integer"),
            TokenKind::FloatLiteral => write!(f, "float"),
            TokenKind::StringLiteral => write!(f, "string"),
            TokenKind::Identifier => write!(f, "name"),
            TokenKind::Comment | TokenKind::RemComment => write!(f, "comment"),
            TokenKind::Newline => write!(f, "end of line"),
            TokenKind::ElseIf => write!(f, "ELSEIF"),

            // Keywords display as uppercase
            other => f.write_str(&format!("{other:?}").to_ascii_uppercase()),
        }
    }
}
