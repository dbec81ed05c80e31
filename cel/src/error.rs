//! Error types for every stage of the pipeline.
//!
//! `CompileError` covers parse- and codegen-time failures (raised by
//! [`crate::compile`], never by [`crate::Program::evaluate`]).
//! `ExecutionError` is the internal error sentinel of the value runtime
//! (§3.1, §7): every typed operation that cannot produce a value returns one
//! instead of panicking. It never escapes `evaluate` — the boundary converts
//! it to [`CelError`].

use thiserror::Error;

/// A location-annotated parse/codegen failure. Raised by `compile`, not by
/// `evaluate`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("macro `{name}` applied with the wrong argument shape: {message}")]
    MacroShape { name: String, message: String },

    #[error("reserved word `{0}` used as identifier")]
    ReservedWord(String),

    #[error("identifier `{0}` is reserved for internal use")]
    ReservedIdentifier(String),

    #[error("cranelift error: {0}")]
    Codegen(String),

    #[error("module error: {0}")]
    Module(String),

    #[error("internal compiler error: {0}")]
    Internal(String),
}

impl CompileError {
    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        CompileError::Parse { offset, message: message.into() }
    }
}

/// The internal error sentinel (§3.1, §7). Every typed runtime helper
/// returns `Result<Value, ExecutionError>` rather than panicking; this is
/// the `Err` side of that contract. `&&`, `||`, and `has` are the only
/// operators that ever inspect and absorb one instead of propagating it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("no such identifier: {0}")]
    NoSuchIdentifier(String),

    #[error("no such field `{field}` on {target}")]
    NoSuchField { target: String, field: String },

    #[error("unsupported operation '{op}' on {operand}")]
    UnsupportedOperation { op: &'static str, operand: String },

    #[error("unsupported binary operation '{op}' between {lhs} and {rhs}")]
    UnsupportedBinary { op: &'static str, lhs: String, rhs: String },

    #[error("integer overflow in {op}")]
    Overflow { op: &'static str },

    #[error("division by zero")]
    DivisionByZero,

    #[error("index out of range: {index}")]
    IndexOutOfRange { index: String },

    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    #[error("value out of domain: {0}")]
    ValueOutOfDomain(String),

    #[error("duplicate map key: {0}")]
    DuplicateKey(String),

    #[error("function not found: {0}")]
    NoSuchFunction(String),

    #[error("wrong number of arguments to {function}: expected {expected}, got {got}")]
    Arity { function: &'static str, expected: &'static str, got: usize },

    #[error("{0}")]
    Custom(String),
}

impl ExecutionError {
    pub(crate) fn custom(msg: impl Into<String>) -> Self {
        ExecutionError::Custom(msg.into())
    }
}

/// The single error kind surfaced across the `evaluate` boundary (§6.3).
/// The internal sentinel never escapes; this is what callers actually see.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{0}")]
pub struct CelError(pub String);

impl From<ExecutionError> for CelError {
    fn from(e: ExecutionError) -> Self {
        CelError(e.to_string())
    }
}
