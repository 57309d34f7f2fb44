//! Expression compiler.
//!
//! Precedence climbing, lowest first:
//!
//! | Level | Operators |
//! |---|---|
//! | logical | `AND` `OR` `XOR` |
//! | relational | `=` `<>` `<` `>` `<=` `>=` |
//! | additive | `+` `-` |
//! | multiplicative | `*` `/` `\` `MOD` |
//! | power | `^` (right-associative) |
//! | unary | `-` `NOT` |
//! | primary | literal, variable, `( )`, element, call |
//!
//! Every method leaves exactly one value on the stack and returns its
//! [`Kind`]. Comparisons produce `-1` for true and `0` for false so they
//! combine with the bitwise logical operators.

use crate::codegen::{Const, Instr};
use crate::compiler::builtins::lookup_builtin;
use crate::compiler::error::ErrorKind;
use crate::compiler::imports::HostFn;
use crate::compiler::procedures::CallArgs;
use crate::compiler::symbols::{Kind, Storage, VarId};
use crate::compiler::{CompileResult, Compiler};
use crate::lexer::{Token, TokenKind};
use log::trace;
use wasm_encoder::ValType;

/// Arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Add,
    Sub,
    Mul,
    /// `/`: integer division for two integers, float otherwise
    Div,
    /// `\`
    IntDiv,
    Mod,
}

impl ArithOp {
    fn from_token(kind: TokenKind) -> Option<ArithOp> {
        Some(match kind {
            TokenKind::Plus => ArithOp::Add,
            TokenKind::Minus => ArithOp::Sub,
            TokenKind::Star => ArithOp::Mul,
            TokenKind::Slash => ArithOp::Div,
            TokenKind::Backslash => ArithOp::IntDiv,
            TokenKind::Mod => ArithOp::Mod,
            _ => return None,
        })
    }

    fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::IntDiv => "\\",
            ArithOp::Mod => "MOD",
        }
    }

    fn instr(self, kind: Kind) -> Instr {
        match (self, kind) {
            (ArithOp::Add, Kind::Float) => Instr::F32Add,
            (ArithOp::Sub, Kind::Float) => Instr::F32Sub,
            (ArithOp::Mul, Kind::Float) => Instr::F32Mul,
            (ArithOp::Div, Kind::Float) => Instr::F32Div,
            (ArithOp::Add, _) => Instr::I32Add,
            (ArithOp::Sub, _) => Instr::I32Sub,
            (ArithOp::Mul, _) => Instr::I32Mul,
            (ArithOp::Div | ArithOp::IntDiv, _) => Instr::I32DivS,
            (ArithOp::Mod, _) => Instr::I32RemS,
        }
    }

    /// Folds two literals. `None` leaves the instructions in place, which
    /// happens for division by zero and overflow so the trap still occurs
    /// at run time.
    fn fold(self, a: Const, b: Const) -> Option<Const> {
        match (a, b) {
            (Const::I32(x), Const::I32(y)) => Some(Const::I32(match self {
                ArithOp::Add => x.wrapping_add(y),
                ArithOp::Sub => x.wrapping_sub(y),
                ArithOp::Mul => x.wrapping_mul(y),
                ArithOp::Div | ArithOp::IntDiv => x.checked_div(y)?,
                ArithOp::Mod => x.checked_rem(y)?,
            })),
            _ => {
                let (x, y) = (a.as_f32(), b.as_f32());
                Some(Const::F32(match self {
                    ArithOp::Add => x + y,
                    ArithOp::Sub => x - y,
                    ArithOp::Mul => x * y,
                    ArithOp::Div => x / y,
                    ArithOp::IntDiv | ArithOp::Mod => return None,
                }))
            }
        }
    }
}

/// Relational operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Relation {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Relation {
    pub(crate) fn from_token(kind: TokenKind) -> Option<Relation> {
        Some(match kind {
            TokenKind::Equals => Relation::Eq,
            TokenKind::NotEquals => Relation::Ne,
            TokenKind::LessThan => Relation::Lt,
            TokenKind::GreaterThan => Relation::Gt,
            TokenKind::LessEquals => Relation::Le,
            TokenKind::GreaterEquals => Relation::Ge,
            _ => return None,
        })
    }

    fn int_instr(self) -> Instr {
        match self {
            Relation::Eq => Instr::I32Eq,
            Relation::Ne => Instr::I32Ne,
            Relation::Lt => Instr::I32LtS,
            Relation::Gt => Instr::I32GtS,
            Relation::Le => Instr::I32LeS,
            Relation::Ge => Instr::I32GeS,
        }
    }

    fn float_instr(self) -> Instr {
        match self {
            Relation::Eq => Instr::F32Eq,
            Relation::Ne => Instr::F32Ne,
            Relation::Lt => Instr::F32Lt,
            Relation::Gt => Instr::F32Gt,
            Relation::Le => Instr::F32Le,
            Relation::Ge => Instr::F32Ge,
        }
    }
}

impl Compiler<'_> {
    /// Compiles a full expression.
    pub(crate) fn expression(&mut self) -> CompileResult<Kind> {
        let mut left = self.relation()?;
        loop {
            let op = match self.peek_kind()? {
                Some(TokenKind::And) => Instr::I32And,
                Some(TokenKind::Or) => Instr::I32Or,
                Some(TokenKind::Xor) => Instr::I32Xor,
                _ => return Ok(left),
            };
            self.next()?;
            self.coerce(left, Kind::Int)?;
            let right = self.relation()?;
            self.coerce(right, Kind::Int)?;
            self.emit(op);
            left = Kind::Int;
        }
    }

    /// Compiles an expression and converts it to `kind`.
    pub(crate) fn expression_as(&mut self, kind: Kind) -> CompileResult<()> {
        let found = self.expression()?;
        self.coerce(found, kind)
    }

    /// Compiles an integer-valued expression.
    pub(crate) fn int_expression(&mut self) -> CompileResult<()> {
        self.expression_as(Kind::Int)
    }

    /// Compiles a string expression.
    pub(crate) fn string_expression(&mut self) -> CompileResult<()> {
        self.expression_as(Kind::Str)
    }

    fn relation(&mut self) -> CompileResult<Kind> {
        let mut left = self.additive()?;
        while let Some(rel) = self.peek_kind()?.and_then(Relation::from_token) {
            self.next()?;
            let right = self.additive()?;
            left = self.compare(rel, left, right)?;
        }
        Ok(left)
    }

    fn additive(&mut self) -> CompileResult<Kind> {
        let mut left = self.multiplicative()?;
        while let Some(op @ (ArithOp::Add | ArithOp::Sub)) =
            self.peek_kind()?.and_then(ArithOp::from_token)
        {
            self.next()?;
            let right = self.multiplicative()?;
            left = self.arith(op, left, right)?;
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> CompileResult<Kind> {
        let mut left = self.power()?;
        while let Some(op @ (ArithOp::Mul | ArithOp::Div | ArithOp::IntDiv | ArithOp::Mod)) =
            self.peek_kind()?.and_then(ArithOp::from_token)
        {
            self.next()?;
            let right = self.power()?;
            left = self.arith(op, left, right)?;
        }
        Ok(left)
    }

    fn power(&mut self) -> CompileResult<Kind> {
        let base = self.unary()?;
        if !self.match_token(TokenKind::Caret)? {
            return Ok(base);
        }
        self.coerce(base, Kind::Float)?;
        let exponent = self.power()?;
        self.coerce(exponent, Kind::Float)?;
        match self.func().take_const_pair() {
            Some((a, b)) => self.push_f32(a.as_f32().powf(b.as_f32())),
            None => self.call_host(HostFn::Powf),
        }
        Ok(Kind::Float)
    }

    fn unary(&mut self) -> CompileResult<Kind> {
        match self.peek_kind()? {
            Some(TokenKind::Minus) => {
                self.next()?;
                let kind = self.unary()?;
                self.negate(kind)?;
                Ok(kind)
            }
            Some(TokenKind::Not) => {
                self.next()?;
                let kind = self.unary()?;
                self.coerce(kind, Kind::Int)?;
                match self.func().take_top_const() {
                    Some(Const::I32(v)) => self.push_i32(!v),
                    other => {
                        if let Some(c) = other {
                            self.func().push_const(c);
                        }
                        self.emit_all(&[Instr::I32Const(-1), Instr::I32Xor]);
                    }
                }
                Ok(Kind::Int)
            }
            _ => self.primary(),
        }
    }

    fn negate(&mut self, kind: Kind) -> CompileResult<()> {
        if kind == Kind::Str {
            return Err(self.error(ErrorKind::mismatch("cannot negate a string")));
        }
        match (kind, self.func().take_top_const()) {
            (_, Some(Const::I32(v))) => self.push_i32(v.wrapping_neg()),
            (_, Some(Const::F32(v))) => self.push_f32(-v),
            (Kind::Float, None) => self.emit(Instr::F32Neg),
            (_, None) => self.emit_all(&[Instr::I32Const(-1), Instr::I32Mul]),
        }
        Ok(())
    }

    fn primary(&mut self) -> CompileResult<Kind> {
        let Some(token) = self.next()? else {
            return Err(self.unexpected("expression", None));
        };
        match token.kind {
            TokenKind::IntegerLiteral | TokenKind::HexLiteral => {
                self.push_i32(token.int_value().unwrap_or_default());
                Ok(Kind::Int)
            }
            TokenKind::FloatLiteral => {
                self.push_f32(token.float_value().unwrap_or_default());
                Ok(Kind::Float)
            }
            TokenKind::StringLiteral => {
                let text = token.string_value().unwrap_or_default();
                let handle = self.intern(&text);
                self.push_i32(handle);
                Ok(Kind::Str)
            }
            TokenKind::LeftParen => {
                let kind = self.expression()?;
                self.expect(TokenKind::RightParen, "')'")?;
                Ok(kind)
            }
            TokenKind::Ubound => self.ubound(),
            TokenKind::Identifier => {
                if self.match_token(TokenKind::LeftParen)? {
                    return self.call_or_element(&token);
                }
                let id = self.resolve(&token)?;
                self.read_variable(id, &token)
            }
            _ => Err(self.unexpected("expression", Some(token))),
        }
    }

    /// A bare name: variable value, array base address, or a call to a
    /// subroutine without arguments.
    fn read_variable(&mut self, id: VarId, token: &Token) -> CompileResult<Kind> {
        match self.symbols.get(id).storage {
            Storage::Subroutine(_) => self.call_subroutine(id, token, CallArgs::Absent),
            Storage::Array(_) => {
                self.emit(Instr::GlobalGet(id.global()));
                Ok(Kind::Int)
            }
            Storage::Scalar => {
                let kind = self.symbols.settle(id);
                self.emit(Instr::GlobalGet(id.global()));
                Ok(kind)
            }
        }
    }

    /// `name(` seen: array element, built-in or subroutine, in that order.
    fn call_or_element(&mut self, token: &Token) -> CompileResult<Kind> {
        let name = token.name();
        let existing = self.symbols.lookup(&name);
        if let Some(id) = existing {
            if self.symbols.get(id).is_array() {
                return self.read_element(id, token);
            }
        }
        if let Some(builtin) = lookup_builtin(&name) {
            return self.builtin(builtin, token);
        }
        if let Some(id) = existing {
            if self.symbols.get(id).subroutine().is_some() {
                return self.call_subroutine(id, token, CallArgs::Parenthesized);
            }
        }
        Err(self.error_at(ErrorKind::UnknownCallable { name }, token))
    }

    fn read_element(&mut self, id: VarId, token: &Token) -> CompileResult<Kind> {
        let kind = self.symbols.get(id).kind;
        self.element_address(id, token)?;
        self.emit(match kind {
            Kind::Float => Instr::F32Load(0),
            _ => Instr::I32Load(0),
        });
        Ok(kind)
    }

    /// Applies an arithmetic operator to the two values on the stack.
    pub(crate) fn arith(&mut self, op: ArithOp, left: Kind, right: Kind) -> CompileResult<Kind> {
        if left == Kind::Str || right == Kind::Str {
            if op == ArithOp::Add && left == right {
                self.call_host(HostFn::StrConcat);
                return Ok(Kind::Str);
            }
            return Err(self.error(ErrorKind::mismatch(format!(
                "'{}' cannot be applied to {left} and {right}",
                op.symbol()
            ))));
        }
        if let Some(kind) = self.fold(op) {
            return Ok(kind);
        }
        match op {
            ArithOp::IntDiv | ArithOp::Mod => {
                self.unify_int(left, right);
                self.emit(op.instr(Kind::Int));
                Ok(Kind::Int)
            }
            _ => {
                let kind = self.unify(left, right)?;
                self.emit(op.instr(kind));
                Ok(kind)
            }
        }
    }

    fn fold(&mut self, op: ArithOp) -> Option<Kind> {
        let (a, b) = self.func().const_pair()?;
        let folded = op.fold(a, b)?;
        trace!("fold {a:?} {} {b:?} = {folded:?}", op.symbol());
        self.func().take_const_pair();
        self.func().push_const(folded);
        Some(match folded {
            Const::I32(_) => Kind::Int,
            Const::F32(_) => Kind::Float,
        })
    }

    /// Brings two numeric operands to a common kind; returns it.
    fn unify(&mut self, left: Kind, right: Kind) -> CompileResult<Kind> {
        match (left, right) {
            (Kind::Int, Kind::Float) => {
                // The integer is underneath: park the float.
                let scratch = self.alloc_local(ValType::F32);
                self.emit_all(&[
                    Instr::LocalSet(scratch),
                    Instr::F32ConvertI32S,
                    Instr::LocalGet(scratch),
                ]);
                Ok(Kind::Float)
            }
            (Kind::Float, Kind::Int) => {
                self.coerce(Kind::Int, Kind::Float)?;
                Ok(Kind::Float)
            }
            _ => Ok(left),
        }
    }

    /// Truncates float operands of an integer-only operator.
    fn unify_int(&mut self, left: Kind, right: Kind) {
        if right == Kind::Float {
            self.emit(Instr::I32TruncF32S);
        }
        if left == Kind::Float {
            let scratch = self.alloc_local(ValType::I32);
            self.emit_all(&[
                Instr::LocalSet(scratch),
                Instr::I32TruncF32S,
                Instr::LocalGet(scratch),
            ]);
        }
    }

    /// Compares the two values on the stack, leaving `-1` or `0`.
    pub(crate) fn compare(&mut self, rel: Relation, left: Kind, right: Kind) -> CompileResult<Kind> {
        match (left, right) {
            (Kind::Str, Kind::Str) => {
                self.call_host(HostFn::StrCmp);
                if rel == Relation::Eq {
                    self.emit(Instr::I32Eqz);
                } else {
                    self.emit_all(&[Instr::I32Const(0), rel.int_instr()]);
                }
            }
            (Kind::Str, _) | (_, Kind::Str) => {
                return Err(self.error(ErrorKind::mismatch(format!(
                    "cannot compare {left} with {right}"
                ))));
            }
            _ => match self.unify(left, right)? {
                Kind::Float => self.emit(rel.float_instr()),
                _ => self.emit(rel.int_instr()),
            },
        }
        self.emit_all(&[Instr::I32Const(-1), Instr::I32Mul]);
        Ok(Kind::Int)
    }

    /// Converts the value on top of the stack from `from` to `to`.
    ///
    /// A literal on top is converted at compile time.
    pub(crate) fn coerce(&mut self, from: Kind, to: Kind) -> CompileResult<()> {
        match (from, to) {
            _ if from == to => {}
            (Kind::Int, Kind::Float) => match self.func().take_top_const() {
                Some(c) => self.push_f32(c.as_f32()),
                None => self.emit(Instr::F32ConvertI32S),
            },
            (Kind::Float, Kind::Int) => match self.func().take_top_const() {
                Some(c) if fits_i32(c.as_f32()) => self.push_i32(c.as_f32() as i32),
                Some(c) => {
                    self.func().push_const(c);
                    self.emit(Instr::I32TruncF32S);
                }
                None => self.emit(Instr::I32TruncF32S),
            },
            _ => {
                return Err(self.error(ErrorKind::mismatch(format!(
                    "expected {to}, found {from}"
                ))));
            }
        }
        Ok(())
    }
}

/// True if truncating `v` cannot trap.
fn fits_i32(v: f32) -> bool {
    v.is_finite() && v > -2_147_483_904.0 && v < 2_147_483_648.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::GLOBAL_LINE;
    use crate::compiler::tests::{build, fail, setup_body};

    /// Instructions of the single statement on line 1, after the line store.
    fn statement(source: &str) -> Vec<Instr> {
        let body = setup_body(source);
        assert_eq!(&body[..2], &[Instr::I32Const(1), Instr::GlobalSet(GLOBAL_LINE)]);
        body[2..].to_vec()
    }

    #[test]
    fn test_constant_expression_folds_completely() {
        let code = statement("X = 2 + 3 * 4");
        assert_eq!(code, vec![Instr::I32Const(14), Instr::GlobalSet(4)]);
    }

    #[test]
    fn test_no_fold_across_variable() {
        let code = statement("Y = X + 3 * 4");
        assert_eq!(
            code,
            vec![
                Instr::GlobalGet(5),
                Instr::I32Const(12),
                Instr::I32Add,
                Instr::GlobalSet(4)
            ]
        );
    }

    #[test]
    fn test_mixed_fold_promotes_to_float() {
        let code = statement("X# = 1 + 0.5");
        assert_eq!(code, vec![Instr::F32Const(1.5), Instr::GlobalSet(4)]);
    }

    #[test]
    fn test_division_by_zero_is_not_folded() {
        let code = statement("X = 1 / 0");
        assert_eq!(
            code,
            vec![
                Instr::I32Const(1),
                Instr::I32Const(0),
                Instr::I32DivS,
                Instr::GlobalSet(4)
            ]
        );
    }

    #[test]
    fn test_float_literal_to_integer_truncates() {
        let body = setup_body("N = 0\nN = 2.9");
        assert_eq!(&body[body.len() - 2..], &[Instr::I32Const(2), Instr::GlobalSet(4)]);
        let body = setup_body("N = 0\nN = -2.9");
        assert_eq!(&body[body.len() - 2..], &[Instr::I32Const(-2), Instr::GlobalSet(4)]);
    }

    #[test]
    fn test_runtime_float_to_int_uses_trunc() {
        let body = setup_body("N = 0\nF# = 1.5\nN = F#");
        assert_eq!(
            &body[body.len() - 3..],
            &[Instr::GlobalGet(5), Instr::I32TruncF32S, Instr::GlobalSet(4)]
        );
    }

    #[test]
    fn test_int_under_float_uses_scratch() {
        let code = statement("F# = N + G#");
        assert_eq!(
            code,
            vec![
                Instr::GlobalGet(5),
                Instr::GlobalGet(6),
                Instr::LocalSet(0),
                Instr::F32ConvertI32S,
                Instr::LocalGet(0),
                Instr::F32Add,
                Instr::GlobalSet(4)
            ]
        );
    }

    #[test]
    fn test_comparison_yields_all_ones() {
        let code = statement("B = X > 1");
        assert_eq!(
            code,
            vec![
                Instr::GlobalGet(5),
                Instr::I32Const(1),
                Instr::I32GtS,
                Instr::I32Const(-1),
                Instr::I32Mul,
                Instr::GlobalSet(4)
            ]
        );
    }

    #[test]
    fn test_string_comparison_calls_host() {
        let code = statement("B = A$ = \"x\"");
        assert!(code.contains(&Instr::Call(crate::codegen::CallTarget::Host(HostFn::StrCmp))));
        assert!(!code.contains(&Instr::I32Eq));
        assert!(!code.contains(&Instr::F32Eq));
    }

    #[test]
    fn test_string_concat() {
        build("A$ = \"a\" + \"b\"\nPRINT A$ + \"c\"");
    }

    #[test]
    fn test_string_arithmetic_is_rejected() {
        let err = fail("A$ = \"a\" * 2");
        assert!(matches!(err.kind, ErrorKind::TypeMismatch(_)));
        let err = fail("X = \"a\" < 2");
        assert!(matches!(err.kind, ErrorKind::TypeMismatch(_)));
    }

    #[test]
    fn test_power_is_right_associative_and_folds() {
        let code = statement("X# = 2 ^ 3 ^ 2");
        assert_eq!(code, vec![Instr::F32Const(512.0), Instr::GlobalSet(4)]);
    }

    #[test]
    fn test_unary_minus_binds_tighter_than_power() {
        let code = statement("X# = -2 ^ 2");
        assert_eq!(code, vec![Instr::F32Const(4.0), Instr::GlobalSet(4)]);
    }

    #[test]
    fn test_not_and_logic() {
        let code = statement("X = NOT 0");
        assert_eq!(code, vec![Instr::I32Const(-1), Instr::GlobalSet(4)]);
        build("A = 1\nB = 2\nC# = 1.5\nX = A > 0 AND B > 0 OR NOT C#");
    }

    #[test]
    fn test_integer_division_and_mod() {
        assert_eq!(
            statement("X = 7 \\ 2 + 7 MOD 3"),
            vec![Instr::I32Const(4), Instr::GlobalSet(4)]
        );
        build("F# = 7.5\nX = F# \\ 2\nY = 9 MOD F#");
    }

    #[test]
    fn test_unknown_callable() {
        let err = fail("X = FROB(1)");
        assert_eq!(err.kind, ErrorKind::UnknownCallable { name: "FROB".into() });
    }

    #[test]
    fn test_missing_operand() {
        let err = fail("X = 1 +");
        assert!(matches!(err.kind, ErrorKind::UnexpectedToken { .. }));
    }
}
