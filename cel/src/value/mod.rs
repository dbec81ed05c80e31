//! The CEL value model (§3.1) and every typed operation the runtime exposes:
//! equality/comparison (§4.2), arithmetic (§4.3), collection ops (§4.4), and
//! conversions (§4.9).
//!
//! Every operation here returns `Result<Value, ExecutionError>` rather than
//! panicking or throwing — per the Design Notes (spec.md §9) the error
//! sentinel is modeled as the `Err` side of a sum type, not an in-band value.
//! `std::ops` impls mirror the teacher's `cel-jit::runtime::ops` pattern:
//! `Output = Result<Value, ExecutionError>`, inline fast paths for same-type
//! integer math with `checked_*`, structured fallbacks everywhere else.

pub mod map;
pub mod net;
pub mod struct_;
mod time;

pub use map::ValueMap;
pub use net::{CidrValue, IpValue};
pub use struct_::{FieldKind, StructType, StructValue, TypeRegistry};
pub use time::{Duration, Timestamp};

use crate::error::ExecutionError;
use std::cmp::Ordering;
use std::rc::Rc;

/// A CEL runtime value (§3.1). `Dyn` is not one of the specification's
/// value variants; it is a transient wrapper the `dyn()` conversion
/// produces to relax the equality strictness described in the Glossary and
/// exercised by §8 scenario 9 (`dyn(1) == 1.0` is true; `1 == 1.0` errors).
/// See DESIGN.md for why this is needed to reconcile §4.2's literal text
/// with the Glossary/testable-properties definition of "strict equality".
/// Structural equality used by tests and internal bookkeeping (e.g.
/// comprehension accumulator double-free checks). This is NOT the CEL `==`
/// operator — that is [`cel_equal`], which has its own cross-numeric and
/// NaN rules. Structural equality requires matching tags.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    String(Rc<str>),
    Bytes(Rc<[u8]>),
    List(Vec<Value>),
    Map(ValueMap),
    Type(Rc<str>),
    Timestamp(Timestamp),
    Duration(Duration),
    Optional(Option<Box<Value>>),
    Ip(IpValue),
    Cidr(CidrValue),
    Struct(StructValue),
    Dyn(Box<Value>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    Null,
    Bool,
    Int,
    UInt,
    Double,
    String,
    Bytes,
    List,
    Map,
    Type,
    Timestamp,
    Duration,
    Optional,
    Ip,
    Cidr,
    Struct,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValueType::Null => "null",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::UInt => "uint",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::Bytes => "bytes",
            ValueType::List => "list",
            ValueType::Map => "map",
            ValueType::Type => "type",
            ValueType::Timestamp => "timestamp",
            ValueType::Duration => "duration",
            ValueType::Optional => "optional",
            ValueType::Ip => "ip",
            ValueType::Cidr => "cidr",
            ValueType::Struct => "struct",
        };
        f.write_str(s)
    }
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Value {
        Value::String(s.into())
    }

    pub fn bytes(b: impl Into<Vec<u8>>) -> Value {
        Value::Bytes(Rc::from(b.into().into_boxed_slice()))
    }

    /// Strips a `Dyn` wrapper, if present. Every operation except equality
    /// should operate on the peeled value — `Dyn` is otherwise transparent.
    pub fn peel(&self) -> &Value {
        match self {
            Value::Dyn(inner) => inner.peel(),
            other => other,
        }
    }

    pub fn into_peeled(self) -> Value {
        match self {
            Value::Dyn(inner) => inner.into_peeled(),
            other => other,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self.peel() {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::UInt(_) => ValueType::UInt,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::Bytes(_) => ValueType::Bytes,
            Value::List(_) => ValueType::List,
            Value::Map(_) => ValueType::Map,
            Value::Type(_) => ValueType::Type,
            Value::Timestamp(_) => ValueType::Timestamp,
            Value::Duration(_) => ValueType::Duration,
            Value::Optional(_) => ValueType::Optional,
            Value::Ip(_) => ValueType::Ip,
            Value::Cidr(_) => ValueType::Cidr,
            Value::Struct(_) => ValueType::Struct,
            Value::Dyn(_) => unreachable!("peel() strips Dyn"),
        }
    }

    pub fn type_name(&self) -> String {
        match self.peel() {
            Value::Struct(s) => s.type_name.to_string(),
            other => other.value_type().to_string(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.peel(), Value::Int(_) | Value::UInt(_) | Value::Double(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.peel() {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------
// Equality & comparison (§4.2)
// ---------------------------------------------------------------------

/// `None` means "not comparable" (different, non-numeric tags) which is
/// `false` for `==`, not the error sentinel (§4.2: "different tags that are
/// not both numeric: unequal (not an error)"). Takes `registry` so that
/// struct-vs-struct comparison can fill in registry-convention field
/// defaults per §4.2 instead of only comparing explicitly-set fields (see
/// [`StructValue::equals`]).
pub fn cel_equal(a: &Value, b: &Value, registry: &TypeRegistry) -> Option<bool> {
    let a_was_dyn = matches!(a, Value::Dyn(_));
    let b_was_dyn = matches!(b, Value::Dyn(_));
    let strict = !(a_was_dyn || b_was_dyn);
    let a = a.peel();
    let b = b.peel();

    if a.is_numeric() && b.is_numeric() {
        if strict && std::mem::discriminant(a) != std::mem::discriminant(b) {
            // Cross-type numeric equality is only relaxed through `dyn()`
            // (Glossary "Strict equality"; §8 scenario 9).
            return None;
        }
        return Some(numeric_cmp(a, b) == Some(Ordering::Equal));
    }

    match (a, b) {
        (Value::Null, Value::Null) => Some(true),
        (Value::Bool(x), Value::Bool(y)) => Some(x == y),
        (Value::String(x), Value::String(y)) => Some(x == y),
        (Value::Bytes(x), Value::Bytes(y)) => Some(x == y),
        (Value::List(x), Value::List(y)) => {
            if x.len() != y.len() {
                return Some(false);
            }
            for (xi, yi) in x.iter().zip(y.iter()) {
                if cel_equal(xi, yi, registry) != Some(true) {
                    return Some(false);
                }
            }
            Some(true)
        }
        (Value::Map(x), Value::Map(y)) => Some(x.equals(y, registry)),
        (Value::Type(x), Value::Type(y)) => Some(x == y),
        (Value::Timestamp(x), Value::Timestamp(y)) => Some(x == y),
        (Value::Duration(x), Value::Duration(y)) => Some(x == y),
        (Value::Ip(x), Value::Ip(y)) => Some(x.cel_eq(y)),
        (Value::Cidr(x), Value::Cidr(y)) => Some(x == y),
        (Value::Struct(x), Value::Struct(y)) => Some(x.equals(y, registry)),
        (Value::Optional(x), Value::Optional(y)) => match (x, y) {
            (None, None) => Some(true),
            (Some(x), Some(y)) => Some(cel_equal(x, y, registry) == Some(true)),
            _ => Some(false),
        },
        _ => Some(false),
    }
}

fn numeric_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    // Exact-integer pairs use arbitrary-precision (i128 covers every
    // i64/u64 value exactly) comparison; any double operand falls back to
    // double comparison (§4.2's contract for cross-numeric comparison).
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::UInt(x), Value::UInt(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::UInt(y)) => Some((*x as i128).cmp(&(*y as i128))),
        (Value::UInt(x), Value::Int(y)) => Some((*x as i128).cmp(&(*y as i128))),
        (Value::Double(x), Value::Double(y)) => x.partial_cmp(y),
        (Value::Int(x), Value::Double(y)) => (*x as f64).partial_cmp(y),
        (Value::Double(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::UInt(x), Value::Double(y)) => (*x as f64).partial_cmp(y),
        (Value::Double(x), Value::UInt(y)) => x.partial_cmp(&(*y as f64)),
        _ => None,
    }
}

/// `<`, `<=`, `>`, `>=` (§4.2). NaN comparisons yield `Some(false)` (never
/// an error, never true); incomparable types yield the error sentinel via
/// `None`.
pub fn cel_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    let a = a.peel();
    let b = b.peel();
    if a.is_numeric() && b.is_numeric() {
        return numeric_cmp(a, b);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.as_ref().cmp(y.as_ref())),
        (Value::Bytes(x), Value::Bytes(y)) => Some(x.as_ref().cmp(y.as_ref())),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.partial_cmp(y),
        (Value::Duration(x), Value::Duration(y)) => x.partial_cmp(y),
        _ => None,
    }
}

pub fn relational(op: &'static str, a: &Value, b: &Value) -> Result<Value, ExecutionError> {
    let a_is_nan = matches!(a.peel(), Value::Double(d) if d.is_nan());
    let b_is_nan = matches!(b.peel(), Value::Double(d) if d.is_nan());
    if a_is_nan || b_is_nan {
        return Ok(Value::Bool(false));
    }
    let ord = cel_cmp(a, b).ok_or_else(|| ExecutionError::UnsupportedBinary {
        op,
        lhs: a.type_name(),
        rhs: b.type_name(),
    })?;
    let result = match op {
        "_<_" => ord == Ordering::Less,
        "_<=_" => ord != Ordering::Greater,
        "_>_" => ord == Ordering::Greater,
        "_>=_" => ord != Ordering::Less,
        _ => unreachable!("relational() called with non-relational op"),
    };
    Ok(Value::Bool(result))
}

// ---------------------------------------------------------------------
// Arithmetic (§4.3)
// ---------------------------------------------------------------------

macro_rules! binop_err {
    ($op:expr, $a:expr, $b:expr) => {
        ExecutionError::UnsupportedBinary { op: $op, lhs: $a.type_name(), rhs: $b.type_name() }
    };
}

impl std::ops::Add for &Value {
    type Output = Result<Value, ExecutionError>;

    fn add(self, rhs: &Value) -> Self::Output {
        match (self.peel(), rhs.peel()) {
            (Value::Int(x), Value::Int(y)) => {
                x.checked_add(*y).map(Value::Int).ok_or(ExecutionError::Overflow { op: "add" })
            }
            (Value::UInt(x), Value::UInt(y)) => {
                x.checked_add(*y).map(Value::UInt).ok_or(ExecutionError::Overflow { op: "add" })
            }
            (Value::Double(x), Value::Double(y)) => Ok(Value::Double(x + y)),
            (Value::String(x), Value::String(y)) => {
                Ok(Value::string(format!("{x}{y}")))
            }
            (Value::Bytes(x), Value::Bytes(y)) => {
                let mut out = Vec::with_capacity(x.len() + y.len());
                out.extend_from_slice(x);
                out.extend_from_slice(y);
                Ok(Value::bytes(out))
            }
            (Value::List(x), Value::List(y)) => {
                let mut out = Vec::with_capacity(x.len() + y.len());
                out.extend_from_slice(x);
                out.extend_from_slice(y);
                Ok(Value::List(out))
            }
            (Value::Timestamp(t), Value::Duration(d)) => {
                t.checked_add_duration(d).map(Value::Timestamp)
            }
            (Value::Duration(d), Value::Timestamp(t)) => {
                t.checked_add_duration(d).map(Value::Timestamp)
            }
            (Value::Duration(x), Value::Duration(y)) => x.checked_add(y).map(Value::Duration),
            _ => Err(binop_err!("_+_", self, rhs)),
        }
    }
}

impl std::ops::Sub for &Value {
    type Output = Result<Value, ExecutionError>;

    fn sub(self, rhs: &Value) -> Self::Output {
        match (self.peel(), rhs.peel()) {
            (Value::Int(x), Value::Int(y)) => {
                x.checked_sub(*y).map(Value::Int).ok_or(ExecutionError::Overflow { op: "sub" })
            }
            (Value::UInt(x), Value::UInt(y)) => {
                x.checked_sub(*y).map(Value::UInt).ok_or(ExecutionError::Overflow { op: "sub" })
            }
            (Value::Double(x), Value::Double(y)) => Ok(Value::Double(x - y)),
            (Value::Timestamp(x), Value::Duration(y)) => {
                x.checked_sub_duration(y).map(Value::Timestamp)
            }
            (Value::Timestamp(x), Value::Timestamp(y)) => x.checked_diff(y).map(Value::Duration),
            (Value::Duration(x), Value::Duration(y)) => x.checked_sub(y).map(Value::Duration),
            _ => Err(binop_err!("_-_", self, rhs)),
        }
    }
}

impl std::ops::Mul for &Value {
    type Output = Result<Value, ExecutionError>;

    fn mul(self, rhs: &Value) -> Self::Output {
        match (self.peel(), rhs.peel()) {
            (Value::Int(x), Value::Int(y)) => {
                x.checked_mul(*y).map(Value::Int).ok_or(ExecutionError::Overflow { op: "mul" })
            }
            (Value::UInt(x), Value::UInt(y)) => {
                x.checked_mul(*y).map(Value::UInt).ok_or(ExecutionError::Overflow { op: "mul" })
            }
            (Value::Double(x), Value::Double(y)) => Ok(Value::Double(x * y)),
            _ => Err(binop_err!("_*_", self, rhs)),
        }
    }
}

impl std::ops::Div for &Value {
    type Output = Result<Value, ExecutionError>;

    fn div(self, rhs: &Value) -> Self::Output {
        match (self.peel(), rhs.peel()) {
            (Value::Int(x), Value::Int(y)) => {
                if *y == 0 {
                    return Err(ExecutionError::DivisionByZero);
                }
                if *x == i64::MIN && *y == -1 {
                    // int-min / -1 would overflow, not wrap (§4.3).
                    return Err(ExecutionError::Overflow { op: "div" });
                }
                Ok(Value::Int(x / y))
            }
            (Value::UInt(x), Value::UInt(y)) => {
                if *y == 0 {
                    return Err(ExecutionError::DivisionByZero);
                }
                Ok(Value::UInt(x / y))
            }
            (Value::Double(x), Value::Double(y)) => Ok(Value::Double(x / y)),
            _ => Err(binop_err!("_/_", self, rhs)),
        }
    }
}

impl std::ops::Rem for &Value {
    type Output = Result<Value, ExecutionError>;

    fn rem(self, rhs: &Value) -> Self::Output {
        match (self.peel(), rhs.peel()) {
            (Value::Int(x), Value::Int(y)) => {
                if *y == 0 {
                    return Err(ExecutionError::DivisionByZero);
                }
                if *x == i64::MIN && *y == -1 {
                    return Ok(Value::Int(0));
                }
                Ok(Value::Int(x % y))
            }
            (Value::UInt(x), Value::UInt(y)) => {
                if *y == 0 {
                    return Err(ExecutionError::DivisionByZero);
                }
                Ok(Value::UInt(x % y))
            }
            _ => Err(binop_err!("_%_", self, rhs)),
        }
    }
}

impl std::ops::Neg for &Value {
    type Output = Result<Value, ExecutionError>;

    fn neg(self) -> Self::Output {
        match self.peel() {
            Value::Int(x) => {
                x.checked_neg().map(Value::Int).ok_or(ExecutionError::Overflow { op: "neg" })
            }
            Value::Double(x) => Ok(Value::Double(-x)),
            other => Err(ExecutionError::UnsupportedOperation { op: "-_", operand: other.type_name() }),
        }
    }
}

impl std::ops::Not for &Value {
    type Output = Result<Value, ExecutionError>;

    fn not(self) -> Self::Output {
        match self.peel() {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(ExecutionError::UnsupportedOperation { op: "!_", operand: other.type_name() }),
        }
    }
}

// ---------------------------------------------------------------------
// Collections (§4.4)
// ---------------------------------------------------------------------

pub fn size(v: &Value) -> Result<Value, ExecutionError> {
    let n: usize = match v.peel() {
        Value::String(s) => s.chars().count(),
        Value::Bytes(b) => b.len(),
        Value::List(l) => l.len(),
        Value::Map(m) => m.len(),
        other => {
            return Err(ExecutionError::UnsupportedOperation { op: "size", operand: other.type_name() })
        }
    };
    Ok(Value::Int(n as i64))
}

fn list_index(len: usize, key: &Value) -> Result<usize, ExecutionError> {
    let idx = match key.peel() {
        Value::Int(i) if *i >= 0 => *i as i128,
        Value::UInt(u) => *u as i128,
        Value::Double(d) if d.fract() == 0.0 && *d >= 0.0 => *d as i128,
        other => {
            return Err(ExecutionError::IndexOutOfRange { index: format!("{other:?}") })
        }
    };
    if idx < 0 || idx as usize >= len {
        return Err(ExecutionError::IndexOutOfRange { index: idx.to_string() });
    }
    Ok(idx as usize)
}

pub fn index(container: &Value, key: &Value) -> Result<Value, ExecutionError> {
    match container.peel() {
        Value::List(l) => {
            let i = list_index(l.len(), key)?;
            Ok(l[i].clone())
        }
        Value::Map(m) => m
            .get(key.peel())
            .cloned()
            .ok_or_else(|| ExecutionError::KeyNotFound { key: format!("{key:?}") }),
        other => Err(ExecutionError::UnsupportedOperation { op: "_[_]", operand: other.type_name() }),
    }
}

pub fn contains(container: &Value, key: &Value, registry: &TypeRegistry) -> Result<Value, ExecutionError> {
    match container.peel() {
        Value::List(l) => Ok(Value::Bool(l.iter().any(|e| cel_equal(e, key, registry) == Some(true)))),
        Value::Map(m) => Ok(Value::Bool(m.contains_key(key.peel()))),
        other => Err(ExecutionError::UnsupportedOperation { op: "@in", operand: other.type_name() }),
    }
}

/// Field select on maps: `m.f` is `m["f"]` (§4.4).
pub fn select_field(target: &Value, field: &str, registry: &TypeRegistry) -> Result<Value, ExecutionError> {
    match target.peel() {
        Value::Map(m) => m
            .get(&Value::string(field))
            .cloned()
            .ok_or_else(|| ExecutionError::NoSuchField { target: "map".into(), field: field.into() }),
        Value::Struct(s) => s.get(field, registry),
        other => Err(ExecutionError::NoSuchField { target: other.type_name(), field: field.into() }),
    }
}

/// `has(...)` test (§3.2, §4.8). Never errors on a missing prefix (§8
/// scenario 3) — only a present-but-wrong-shaped target is an error.
pub fn has_field(target: &Value, field: &str, registry: &TypeRegistry) -> Result<bool, ExecutionError> {
    match target.peel() {
        Value::Map(m) => Ok(m.contains_key(&Value::string(field))),
        Value::Struct(s) => s.has(field, registry),
        other => Err(ExecutionError::NoSuchField { target: other.type_name(), field: field.into() }),
    }
}

/// `a?.b` (§4.10): a missing field/key or an empty operand optional is
/// `Optional(None)`, never an error; a target type that can't be selected
/// into at all (e.g. an int) is still [`ExecutionError::NoSuchField`].
pub fn select_field_optional(target: &Value, field: &str, registry: &TypeRegistry) -> Result<Value, ExecutionError> {
    let target = match target.peel() {
        Value::Optional(None) => return Ok(Value::Optional(None)),
        Value::Optional(Some(inner)) => inner.as_ref(),
        other => other,
    };
    match target {
        Value::Map(m) => Ok(Value::Optional(m.get(&Value::string(field)).cloned().map(Box::new))),
        Value::Struct(s) => {
            if s.has(field, registry)? {
                s.get(field, registry).map(|v| Value::Optional(Some(Box::new(v))))
            } else {
                Ok(Value::Optional(None))
            }
        }
        other => Err(ExecutionError::NoSuchField { target: other.type_name(), field: field.into() }),
    }
}

/// `a?[b]` (§4.10): an out-of-range index or missing map key is
/// `Optional(None)`, never an error.
pub fn index_optional(container: &Value, key: &Value) -> Result<Value, ExecutionError> {
    let container = match container.peel() {
        Value::Optional(None) => return Ok(Value::Optional(None)),
        Value::Optional(Some(inner)) => inner.as_ref(),
        other => other,
    };
    match container {
        Value::List(l) => match list_index(l.len(), key) {
            Ok(i) => Ok(Value::Optional(Some(Box::new(l[i].clone())))),
            Err(_) => Ok(Value::Optional(None)),
        },
        Value::Map(m) => Ok(Value::Optional(m.get(key.peel()).cloned().map(Box::new))),
        other => Err(ExecutionError::UnsupportedOperation { op: "_[?_]", operand: other.type_name() }),
    }
}

// ---------------------------------------------------------------------
// Conversions (§4.9)
// ---------------------------------------------------------------------

pub fn to_int(v: &Value) -> Result<Value, ExecutionError> {
    match v.peel() {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::UInt(u) => i64::try_from(*u).map(Value::Int).map_err(|_| ExecutionError::Overflow { op: "int" }),
        Value::Double(d) => {
            if !d.is_finite() || *d >= 9223372036854775808.0 || *d < -9223372036854775808.0 {
                return Err(ExecutionError::Overflow { op: "int" });
            }
            Ok(Value::Int(d.trunc() as i64))
        }
        Value::String(s) => s
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| ExecutionError::custom(format!("cannot parse '{s}' as int"))),
        other => Err(ExecutionError::UnsupportedOperation { op: "int", operand: other.type_name() }),
    }
}

pub fn to_uint(v: &Value) -> Result<Value, ExecutionError> {
    match v.peel() {
        Value::UInt(u) => Ok(Value::UInt(*u)),
        Value::Int(i) => u64::try_from(*i).map(Value::UInt).map_err(|_| ExecutionError::Overflow { op: "uint" }),
        Value::Double(d) => {
            if !d.is_finite() || *d < 0.0 || *d >= 18446744073709551616.0 {
                return Err(ExecutionError::Overflow { op: "uint" });
            }
            Ok(Value::UInt(d.trunc() as u64))
        }
        Value::String(s) => s
            .parse::<u64>()
            .map(Value::UInt)
            .map_err(|_| ExecutionError::custom(format!("cannot parse '{s}' as uint"))),
        other => Err(ExecutionError::UnsupportedOperation { op: "uint", operand: other.type_name() }),
    }
}

pub fn to_double(v: &Value) -> Result<Value, ExecutionError> {
    match v.peel() {
        Value::Double(d) => Ok(Value::Double(*d)),
        Value::Int(i) => Ok(Value::Double(*i as f64)),
        Value::UInt(u) => Ok(Value::Double(*u as f64)),
        Value::String(s) => s
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| ExecutionError::custom(format!("cannot parse '{s}' as double"))),
        other => Err(ExecutionError::UnsupportedOperation { op: "double", operand: other.type_name() }),
    }
}

pub fn to_bool(v: &Value) -> Result<Value, ExecutionError> {
    match v.peel() {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::String(s) => match s.as_ref() {
            "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(Value::Bool(true)),
            "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(Value::Bool(false)),
            _ => Err(ExecutionError::custom(format!("cannot parse '{s}' as bool"))),
        },
        other => Err(ExecutionError::UnsupportedOperation { op: "bool", operand: other.type_name() }),
    }
}

pub fn to_string(v: &Value) -> Result<Value, ExecutionError> {
    let s = match v.peel() {
        Value::String(s) => s.to_string(),
        Value::Int(i) => i.to_string(),
        Value::UInt(u) => u.to_string(),
        Value::Double(d) => format_double(*d),
        Value::Bool(b) => b.to_string(),
        Value::Bytes(b) => String::from_utf8(b.to_vec())
            .map_err(|_| ExecutionError::custom("bytes are not valid UTF-8"))?,
        Value::Null => "null".to_string(),
        Value::Type(t) => t.to_string(),
        Value::Timestamp(t) => t.to_rfc3339(),
        Value::Duration(d) => d.to_go_string(),
        other => {
            return Err(ExecutionError::UnsupportedOperation { op: "string", operand: other.type_name() })
        }
    };
    Ok(Value::string(s))
}

fn format_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        if d > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if d.fract() == 0.0 && d.abs() < 1e15 {
        format!("{d:.0}")
    } else {
        format!("{d}")
    }
}

pub fn to_bytes(v: &Value) -> Result<Value, ExecutionError> {
    match v.peel() {
        Value::Bytes(b) => Ok(Value::Bytes(b.clone())),
        Value::String(s) => Ok(Value::bytes(s.as_bytes().to_vec())),
        other => Err(ExecutionError::UnsupportedOperation { op: "bytes", operand: other.type_name() }),
    }
}

pub fn to_dyn(v: Value) -> Value {
    Value::Dyn(Box::new(v.into_peeled()))
}

pub fn to_type(v: &Value) -> Value {
    Value::Type(Rc::from(v.type_name().as_str()))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Duration(a), Value::Duration(b)) => a == b,
            (Value::Optional(a), Value::Optional(b)) => a == b,
            (Value::Ip(a), Value::Ip(b)) => a == b,
            (Value::Cidr(a), Value::Cidr(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => a == b,
            (Value::Dyn(a), Value::Dyn(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_equality_errors_across_numeric_tags() {
        let registry = TypeRegistry::default();
        assert_eq!(cel_equal(&Value::Int(1), &Value::Double(1.0), &registry), None);
    }

    #[test]
    fn dyn_relaxes_numeric_equality() {
        let registry = TypeRegistry::default();
        let dyn1 = to_dyn(Value::Int(1));
        assert_eq!(cel_equal(&dyn1, &Value::Double(1.0), &registry), Some(true));
    }

    #[test]
    fn nan_never_equal() {
        let registry = TypeRegistry::default();
        let nan = Value::Double(f64::NAN);
        assert_eq!(cel_equal(&nan, &nan, &registry), Some(false));
    }

    #[test]
    fn overflow_is_sentinel_not_wraparound() {
        let max = Value::Int(i64::MAX);
        let one = Value::Int(1);
        assert!(matches!(&max + &one, Err(ExecutionError::Overflow { .. })));
    }

    #[test]
    fn int_min_div_neg_one_errors() {
        let min = Value::Int(i64::MIN);
        let neg1 = Value::Int(-1);
        assert!(matches!(&min / &neg1, Err(ExecutionError::Overflow { .. })));
    }

    #[test]
    fn unsigned_subtraction_underflow_errors() {
        let zero = Value::UInt(0);
        let one = Value::UInt(1);
        assert!(matches!(&zero - &one, Err(ExecutionError::Overflow { .. })));
    }

    #[test]
    fn list_concatenation_preserves_order() {
        let a = Value::List(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::List(vec![Value::Int(3)]);
        let result = (&a + &b).unwrap();
        assert!(matches!(result, Value::List(ref l) if l.len() == 3));
    }

    #[test]
    fn nan_comparison_is_false_not_error() {
        let nan = Value::Double(f64::NAN);
        let one = Value::Double(1.0);
        assert_eq!(relational("_<_", &nan, &one).unwrap().as_bool(), Some(false));
    }
}
