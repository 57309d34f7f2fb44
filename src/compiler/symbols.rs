//! Symbol table for bas2wasm.
//!
//! The dialect has a single flat namespace: every identifier, whether a
//! scalar, an array or a subroutine, owns exactly one storage slot for the
//! whole compilation. The slot number doubles as the index of the WASM
//! global that holds the variable's value (offset by the reserved globals).
//!
//! # Kind rules
//!
//! - A `$` sigil fixes the kind to string, a `#` sigil to float.
//! - Otherwise the kind is fixed by the first assignment, or to integer by
//!   the first read, declaration or parameter binding.
//! - Once fixed, a kind never changes: later mismatched numeric uses are
//!   coerced by the expression compiler instead.

use crate::codegen::{FuncId, RESERVED_GLOBALS};
use crate::compiler::error::ErrorKind;
use std::collections::HashMap;
use std::fmt;
use wasm_encoder::ValType;

/// Largest number of distinct names in one program.
pub const MAX_VARIABLES: usize = 256;

/// Value category of a variable or expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// 32-bit signed integer
    Int,
    /// 32-bit float
    Float,
    /// String handle (pool offset, carried as i32)
    Str,
}

impl Kind {
    /// Kind implied by a trailing sigil, if any.
    pub fn from_sigil(name: &str) -> Option<Kind> {
        match name.as_bytes().last() {
            Some(b'$') => Some(Kind::Str),
            Some(b'#') => Some(Kind::Float),
            _ => None,
        }
    }

    /// WASM representation of a value of this kind.
    pub fn val_type(self) -> ValType {
        match self {
            Kind::Float => ValType::F32,
            Kind::Int | Kind::Str => ValType::I32,
        }
    }

    /// True for integer and float.
    pub fn is_numeric(self) -> bool {
        !matches!(self, Kind::Str)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Int => write!(f, "integer"),
            Kind::Float => write!(f, "float"),
            Kind::Str => write!(f, "string"),
        }
    }
}

/// Stable handle to a variable; also its storage slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(usize);

impl VarId {
    /// The storage slot number.
    pub fn slot(self) -> usize {
        self.0
    }

    /// Index of the WASM global backing this slot.
    pub fn global(self) -> u32 {
        RESERVED_GLOBALS + self.0 as u32
    }
}

/// How a variable's slot is used.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    /// Plain value held in the global.
    Scalar,
    /// The global holds the base address of a heap block.
    Array(ArrayShape),
    /// A SUB or FUNCTION; the global is unused at runtime.
    Subroutine(Subroutine),
}

/// Compile-time shape of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayShape {
    /// Number of dimensions, fixed by the first DIM or REDIM.
    pub dims: usize,
    /// Lowest index set by `OPTION BASE` before the declaration.
    pub base: Option<i32>,
}

impl ArrayShape {
    /// Amount subtracted from each index.
    pub fn offset(self) -> i32 {
        self.base.unwrap_or(0)
    }

    /// Value reported by LBOUND.
    pub fn lbound(self) -> i32 {
        self.base.unwrap_or(1)
    }
}

/// Signature information recorded for a SUB or FUNCTION.
#[derive(Debug, Clone, PartialEq)]
pub struct Subroutine {
    /// Function-table index of the body.
    pub function: FuncId,
    /// Parameter variables, in declaration order.
    pub params: Vec<VarId>,
    /// Variables saved by LOCAL inside the body.
    pub locals: Vec<VarId>,
    /// Declared with FUNCTION rather than SUB.
    pub is_function: bool,
    /// Set once the terminator has been compiled.
    pub complete: bool,
}

/// One named entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Upper-cased name, sigil included.
    pub name: String,
    /// Value kind (meaningful once `kind_fixed` is set).
    pub kind: Kind,
    /// Whether the kind can no longer change.
    pub kind_fixed: bool,
    /// Scalar, array or subroutine.
    pub storage: Storage,
    /// Declared with CONST.
    pub constant: bool,
    /// Line of the first reference.
    pub line: usize,
}

impl Variable {
    /// Subroutine details, if this is a SUB or FUNCTION.
    pub fn subroutine(&self) -> Option<&Subroutine> {
        match &self.storage {
            Storage::Subroutine(sub) => Some(sub),
            _ => None,
        }
    }

    /// True if declared with DIM or REDIM.
    pub fn is_array(&self) -> bool {
        self.array().is_some()
    }

    /// Array shape, if this is an array.
    pub fn array(&self) -> Option<ArrayShape> {
        match self.storage {
            Storage::Array(shape) => Some(shape),
            _ => None,
        }
    }

    /// Type of the backing global: arrays hold an address.
    pub fn global_type(&self) -> ValType {
        match self.storage {
            Storage::Array(_) => ValType::I32,
            _ => self.kind.val_type(),
        }
    }
}

/// The complete symbol table.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    /// All variables, indexed by slot.
    vars: Vec<Variable>,
    /// Upper-case name to slot.
    index: HashMap<String, VarId>,
}

impl SymbolTable {
    /// Creates an empty symbol table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot for `name`, allocating it on first use.
    ///
    /// Idempotent: later calls with the same name (in any case) return the
    /// same slot. A sigil fixes the kind on allocation.
    pub fn resolve(&mut self, name: &str, line: usize) -> Result<VarId, ErrorKind> {
        let upper = name.to_ascii_uppercase();
        if let Some(&id) = self.index.get(&upper) {
            return Ok(id);
        }
        if self.vars.len() >= MAX_VARIABLES {
            return Err(ErrorKind::LimitExceeded {
                what: "variables",
                limit: MAX_VARIABLES,
            });
        }
        let id = VarId(self.vars.len());
        let sigil = Kind::from_sigil(&upper);
        self.vars.push(Variable {
            name: upper.clone(),
            kind: sigil.unwrap_or(Kind::Int),
            kind_fixed: sigil.is_some(),
            storage: Storage::Scalar,
            constant: false,
            line,
        });
        self.index.insert(upper, id);
        Ok(id)
    }

    /// Looks up a name without allocating.
    pub fn lookup(&self, name: &str) -> Option<VarId> {
        self.index.get(&name.to_ascii_uppercase()).copied()
    }

    /// Gets a variable by handle.
    pub fn get(&self, id: VarId) -> &Variable {
        &self.vars[id.0]
    }

    /// Gets a variable mutably by handle.
    pub fn get_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.vars[id.0]
    }

    /// Current kind of a variable, fixing it to integer if still open.
    ///
    /// Used for reads: a variable read before it is ever assigned holds
    /// integer zero, and its global is typed accordingly.
    pub fn settle(&mut self, id: VarId) -> Kind {
        let var = &mut self.vars[id.0];
        var.kind_fixed = true;
        var.kind
    }

    /// Fixes the kind on first assignment; returns the variable's kind.
    ///
    /// If the kind is already fixed it is returned unchanged and the caller
    /// coerces to it.
    pub fn assign_kind(&mut self, id: VarId, kind: Kind) -> Kind {
        let var = &mut self.vars[id.0];
        if !var.kind_fixed {
            var.kind = kind;
            var.kind_fixed = true;
        }
        var.kind
    }

    /// Number of slots allocated.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// True if no names have been seen.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// All variables in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (VarId, &Variable)> {
        self.vars.iter().enumerate().map(|(i, v)| (VarId(i), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_is_idempotent() {
        let mut table = SymbolTable::new();
        let a = table.resolve("count", 1).unwrap();
        let b = table.resolve("COUNT", 7).unwrap();
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(a).line, 1);
    }

    #[test]
    fn test_slots_are_unique_and_sequential() {
        let mut table = SymbolTable::new();
        let ids: Vec<_> = ["A", "B", "C"]
            .iter()
            .map(|n| table.resolve(n, 1).unwrap())
            .collect();
        assert_eq!(
            ids.iter().map(|id| id.slot()).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(ids[2].global(), RESERVED_GLOBALS + 2);
    }

    #[test]
    fn test_sigil_fixes_kind() {
        let mut table = SymbolTable::new();
        let s = table.resolve("NAME$", 1).unwrap();
        let f = table.resolve("lat#", 1).unwrap();
        assert_eq!(table.get(s).kind, Kind::Str);
        assert!(table.get(s).kind_fixed);
        assert_eq!(table.get(f).kind, Kind::Float);
        // Assignment never retypes a sigiled variable
        assert_eq!(table.assign_kind(f, Kind::Int), Kind::Float);
    }

    #[test]
    fn test_first_assignment_fixes_kind() {
        let mut table = SymbolTable::new();
        let x = table.resolve("X", 1).unwrap();
        assert!(!table.get(x).kind_fixed);
        assert_eq!(table.assign_kind(x, Kind::Float), Kind::Float);
        assert_eq!(table.assign_kind(x, Kind::Int), Kind::Float);
    }

    #[test]
    fn test_read_settles_to_integer() {
        let mut table = SymbolTable::new();
        let y = table.resolve("Y", 1).unwrap();
        assert_eq!(table.settle(y), Kind::Int);
        assert_eq!(table.assign_kind(y, Kind::Float), Kind::Int);
    }

    #[test]
    fn test_lookup_does_not_allocate() {
        let mut table = SymbolTable::new();
        assert!(table.lookup("Z").is_none());
        assert!(table.is_empty());
        table.resolve("z", 2).unwrap();
        assert!(table.lookup("Z").is_some());
    }

    #[test]
    fn test_variable_limit() {
        let mut table = SymbolTable::new();
        for i in 0..MAX_VARIABLES {
            table.resolve(&format!("V{i}"), 1).unwrap();
        }
        let err = table.resolve("ONE_TOO_MANY", 1).unwrap_err();
        assert!(matches!(err, ErrorKind::LimitExceeded { .. }));
    }

    #[test]
    fn test_array_global_holds_address() {
        let mut table = SymbolTable::new();
        let a = table.resolve("LEVELS#", 1).unwrap();
        assert_eq!(table.get(a).global_type(), ValType::F32);
        table.get_mut(a).storage = Storage::Array(ArrayShape { dims: 1, base: None });
        assert_eq!(table.get(a).global_type(), ValType::I32);
    }

    #[test]
    fn test_array_shape_bounds() {
        let plain = ArrayShape { dims: 1, base: None };
        assert_eq!((plain.offset(), plain.lbound()), (0, 1));
        let based = ArrayShape { dims: 2, base: Some(1) };
        assert_eq!((based.offset(), based.lbound()), (1, 1));
        let zero = ArrayShape { dims: 1, base: Some(0) };
        assert_eq!((zero.offset(), zero.lbound()), (0, 0));
    }

    #[test]
    fn test_kind_val_types() {
        assert_eq!(Kind::Int.val_type(), ValType::I32);
        assert_eq!(Kind::Str.val_type(), ValType::I32);
        assert_eq!(Kind::Float.val_type(), ValType::F32);
    }
}
