//! The CEL abstract syntax tree (§3.2). Every node the parser can produce.

use std::rc::Rc;

/// Operator tokens used as the `fn` field of a `Call` node (§3.2). Mirrors
/// the CEL reference grammar's canonical operator spellings.
pub mod operators {
    pub const ADD: &str = "_+_";
    pub const SUB: &str = "_-_";
    pub const MUL: &str = "_*_";
    pub const DIV: &str = "_/_";
    pub const MOD: &str = "_%_";
    pub const NEG: &str = "-_";
    pub const NOT: &str = "!_";
    pub const EQ: &str = "_==_";
    pub const NE: &str = "_!=_";
    pub const LT: &str = "_<_";
    pub const LE: &str = "_<=_";
    pub const GT: &str = "_>_";
    pub const GE: &str = "_>=_";
    pub const AND: &str = "_&&_";
    pub const OR: &str = "_||_";
    pub const IN: &str = "@in";
    pub const INDEX: &str = "_[_]";
    pub const TERNARY: &str = "_?_:_";
    pub const NOT_STRICTLY_FALSE: &str = "@not_strictly_false";
    /// `a?.b` (§4.10 optional extension): none-propagating field select.
    pub const OPT_SELECT: &str = "_?._";
    /// `a?[b]` (§4.10 optional extension): none-propagating index.
    pub const OPT_INDEX: &str = "_[?_]";
}

/// The synthetic accumulator identifier macros expand into; reserved, never
/// a valid user identifier (§4.1).
pub const SYNTHETIC_RESULT: &str = "__result__";

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    IntLit(i64),
    UintLit(u64),
    DoubleLit(f64),
    StringLit(Rc<str>),
    BytesLit(Rc<[u8]>),
    BoolLit(bool),
    NullLit,

    Ident(Rc<str>),

    /// `testOnly=true` is the result of expanding `has(a.b)`.
    Select { operand: Box<Expr>, field: Rc<str>, test_only: bool },

    /// `target` present iff this is a member call (`a.f(b)` vs `f(a, b)`).
    /// `func` is either an operator token from [`operators`] or a plain
    /// identifier naming a user/extension function.
    Call { func: Rc<str>, target: Option<Box<Expr>>, args: Vec<Expr> },

    CreateList { elements: Vec<Expr>, optional_indices: Vec<usize> },

    CreateMap { entries: Vec<MapEntry> },

    CreateStruct { message_name: Rc<str>, entries: Vec<StructEntry> },

    Comprehension(Box<Comprehension>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct MapEntry {
    pub key: Expr,
    pub value: Expr,
    pub optional: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructEntry {
    pub field: Rc<str>,
    pub value: Expr,
    pub optional: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Comprehension {
    pub iter_var: Rc<str>,
    pub iter_var2: Option<Rc<str>>,
    pub iter_range: Expr,
    pub accu_var: Rc<str>,
    pub accu_init: Expr,
    pub loop_condition: Expr,
    pub loop_step: Expr,
    pub result: Expr,
}

/// An AST node with its source offset, for diagnostics. Constructed by the
/// parser; the compile driver only needs the bare `Expr` past this point.
#[derive(Clone, Debug, PartialEq)]
pub struct IdedExpr {
    pub id: u32,
    pub expr: Expr,
    pub offset: usize,
}
