//! Extension function dispatch (§4.10): `math`, `strings`, `base64`,
//! `network`, `optional`, and the timestamp/duration field accessors.
//!
//! Namespace-prefixed calls (`math.greatest(...)`) arrive here with
//! `target: None` and a dotted `name` (the rewrite happens in
//! [`crate::ir::lower`] — `math`/`strings`/`base64`/`network`/`optional`
//! are never real bindings, only a syntactic dispatch prefix). Everything
//! else is an ordinary receiver call (`s.charAt(0)`, `ip.isLoopback()`,
//! `ts.getFullYear()`) with `target: Some(value)` and a bare `name`.
//!
//! Grounded on the extension-function table in spec.md §4.10; `base64` via
//! the `base64` crate (teacher's stack), `network` via [`crate::value::net`],
//! `matches()` via the `regex` crate (also the teacher's stack, in
//! `cel-jit`'s optional `regex` feature).

use crate::error::ExecutionError;
use crate::value::{self, CidrValue, IpValue, TypeRegistry, Value};
use base64::Engine;
use std::cmp::Ordering;

/// RE2-ish regex matching (§4.10 `matches()`): `rust-regex` is not RE2, but
/// it is the closest available engine and the same one the teacher's
/// `cel-jit` crate uses for this builtin. An invalid pattern is a producible
/// `ValueOutOfDomain` error (§7 kind 8), not a panic.
fn matches(s: &str, pattern: &Value) -> Result<Value, ExecutionError> {
    let pattern = match pattern {
        Value::String(p) => p.as_ref(),
        other => return Err(type_err("matches", other)),
    };
    let re = regex::Regex::new(pattern)
        .map_err(|e| ExecutionError::ValueOutOfDomain(format!("invalid RE2 pattern '{pattern}': {e}")))?;
    Ok(Value::Bool(re.is_match(s)))
}

pub fn dispatch(
    name: &str,
    target: Option<&Value>,
    args: &[Value],
    _registry: &TypeRegistry,
) -> Result<Value, ExecutionError> {
    if let Some(rest) = name.strip_prefix("math.") {
        return math(rest, args);
    }
    if let Some(rest) = name.strip_prefix("strings.") {
        return strings_ns(rest, args);
    }
    if let Some(rest) = name.strip_prefix("base64.") {
        return base64_ns(rest, args);
    }
    if let Some(rest) = name.strip_prefix("network.") {
        return network_ns(rest, args);
    }
    if let Some(rest) = name.strip_prefix("optional.") {
        return optional_ns(rest, args);
    }

    match (name, target) {
        // §4.9 type conversions — CEL calls these as plain functions
        // (`int(x)`) but a receiver form (`x.int()`) round-trips to the same
        // conversion, so both are accepted here.
        ("int", None) => value::to_int(&args[0]),
        ("int", Some(t)) => value::to_int(t),
        ("uint", None) => value::to_uint(&args[0]),
        ("uint", Some(t)) => value::to_uint(t),
        ("double", None) => value::to_double(&args[0]),
        ("double", Some(t)) => value::to_double(t),
        ("bool", None) => value::to_bool(&args[0]),
        ("bool", Some(t)) => value::to_bool(t),
        ("string", None) => value::to_string(&args[0]),
        ("string", Some(t)) => value::to_string(t),
        ("bytes", None) => value::to_bytes(&args[0]),
        ("bytes", Some(t)) => value::to_bytes(t),
        ("dyn", None) => Ok(value::to_dyn(args[0].clone())),
        ("dyn", Some(t)) => Ok(value::to_dyn(t.clone())),
        ("type", None) => Ok(value::to_type(&args[0])),
        ("type", Some(t)) => Ok(value::to_type(t)),
        ("timestamp", None) => match &args[0] {
            Value::String(s) => crate::value::Timestamp::parse(s).map(Value::Timestamp),
            other => Err(type_err("timestamp", other)),
        },
        ("timestamp", Some(t)) => match t {
            Value::String(s) => crate::value::Timestamp::parse(s).map(Value::Timestamp),
            other => Err(type_err("timestamp", other)),
        },
        ("duration", None) => match &args[0] {
            Value::String(s) => crate::value::Duration::parse(s).map(Value::Duration),
            other => Err(type_err("duration", other)),
        },
        ("duration", Some(t)) => match t {
            Value::String(s) => crate::value::Duration::parse(s).map(Value::Duration),
            other => Err(type_err("duration", other)),
        },

        ("size", None) => value::size(&args[0]),
        ("size", Some(t)) => value::size(t),
        ("matches", Some(Value::String(s))) => matches(s, &args[0]),
        ("matches", None) => match &args[0] {
            Value::String(s) => matches(s, &args[1]),
            other => Err(type_err("matches", other)),
        },
        ("charAt", Some(Value::String(s))) => char_at(s, expect_index(&args[0])?),
        ("indexOf", Some(Value::String(s))) => index_of(s, &args, false),
        ("lastIndexOf", Some(Value::String(s))) => index_of(s, &args, true),
        ("substring", Some(Value::String(s))) => substring(s, &args),
        ("trim", Some(Value::String(s))) => Ok(Value::string(s.trim())),
        ("replace", Some(Value::String(s))) => replace(s, &args),
        ("split", Some(Value::String(s))) => split(s, &args),
        ("join", Some(Value::List(items))) => join(items, &args),
        ("quote", Some(Value::String(s))) => Ok(Value::string(quote(s))),

        ("isCanonical", Some(Value::Ip(ip))) => {
            let input = string_arg(&args, 0)?;
            Ok(Value::Bool(ip.is_canonical(input)))
        }
        ("family", Some(Value::Ip(ip))) => Ok(Value::Int(ip.family() as i64)),
        ("isUnspecified", Some(Value::Ip(ip))) => Ok(Value::Bool(ip.is_unspecified())),
        ("isLoopback", Some(Value::Ip(ip))) => Ok(Value::Bool(ip.is_loopback())),
        ("isGlobalUnicast", Some(Value::Ip(ip))) => Ok(Value::Bool(ip.is_global_unicast())),
        ("isLinkLocalUnicast", Some(Value::Ip(ip))) => Ok(Value::Bool(ip.is_link_local_unicast())),
        ("isLinkLocalMulticast", Some(Value::Ip(ip))) => Ok(Value::Bool(ip.is_link_local_multicast())),

        ("containsIP", Some(Value::Cidr(cidr))) => match &args[0] {
            Value::Ip(ip) => Ok(Value::Bool(cidr.contains_ip(ip))),
            other => Err(type_err("containsIP", other)),
        },
        ("containsCIDR", Some(Value::Cidr(cidr))) => match &args[0] {
            Value::Cidr(other) => Ok(Value::Bool(cidr.contains_cidr(other))),
            other => Err(type_err("containsCIDR", other)),
        },
        ("masked", Some(Value::Cidr(cidr))) => Ok(Value::Cidr(cidr.masked())),
        ("prefixLength", Some(Value::Cidr(cidr))) => Ok(Value::Int(cidr.prefix_len() as i64)),

        ("hasValue", Some(Value::Optional(o))) => Ok(Value::Bool(o.is_some())),
        ("value", Some(Value::Optional(Some(v)))) => Ok((**v).clone()),
        ("value", Some(Value::Optional(None))) => {
            Err(ExecutionError::custom("value() called on an empty optional"))
        }
        ("or", Some(Value::Optional(Some(v)))) => Ok(Value::Optional(Some(v.clone()))),
        ("or", Some(Value::Optional(None))) => match &args[0] {
            Value::Optional(o) => Ok(Value::Optional(o.clone())),
            other => Err(type_err("or", other)),
        },
        ("orValue", Some(Value::Optional(Some(v)))) => Ok((**v).clone()),
        ("orValue", Some(Value::Optional(None))) => Ok(args[0].clone()),

        (field, Some(Value::Timestamp(ts))) if field.starts_with("get") => {
            let tz = args.first().map(string_arg_unchecked).transpose()?;
            ts.field_in_zone(field, tz).map(Value::Int)
        }
        (field, Some(Value::Duration(d))) if field.starts_with("get") => d.field(field).map(Value::Int),

        (other, Some(t)) => Err(ExecutionError::NoSuchFunction(format!("{}.{other}", t.type_name()))),
        (other, None) => Err(ExecutionError::NoSuchFunction(other.to_string())),
    }
}

fn type_err(op: &'static str, got: &Value) -> ExecutionError {
    ExecutionError::UnsupportedOperation { op, operand: got.type_name() }
}

fn string_arg<'a>(args: &'a [Value], i: usize) -> Result<&'a str, ExecutionError> {
    match args.get(i) {
        Some(Value::String(s)) => Ok(s.as_ref()),
        Some(other) => Err(type_err("string argument", other)),
        None => Err(ExecutionError::Arity { function: "extension", expected: "more", got: args.len() }),
    }
}

fn string_arg_unchecked(v: &Value) -> Result<&str, ExecutionError> {
    match v {
        Value::String(s) => Ok(s.as_ref()),
        other => Err(type_err("string argument", other)),
    }
}

fn expect_index(v: &Value) -> Result<usize, ExecutionError> {
    match v {
        Value::Int(i) if *i >= 0 => Ok(*i as usize),
        other => Err(ExecutionError::IndexOutOfRange { index: format!("{other:?}") }),
    }
}

// ---------------------------------------------------------------------
// strings (§4.10) — all indices are code-point indices, not byte offsets.
// ---------------------------------------------------------------------

fn char_at(s: &str, idx: usize) -> Result<Value, ExecutionError> {
    let chars: Vec<char> = s.chars().collect();
    if idx == chars.len() {
        return Ok(Value::string(""));
    }
    chars
        .get(idx)
        .map(|c| Value::string(c.to_string()))
        .ok_or_else(|| ExecutionError::IndexOutOfRange { index: idx.to_string() })
}

fn index_of(s: &str, args: &[Value], last: bool) -> Result<Value, ExecutionError> {
    let needle = string_arg(args, 0)?;
    let chars: Vec<char> = s.chars().collect();
    let needle_chars: Vec<char> = needle.chars().collect();
    let start = if args.len() > 1 { expect_index(&args[1])? } else { 0 };
    if needle_chars.is_empty() {
        return Ok(Value::Int(start as i64));
    }
    let positions = (start..=chars.len().saturating_sub(needle_chars.len()))
        .filter(|&i| chars[i..].starts_with(needle_chars.as_slice()));
    let found = if last { positions.last() } else { positions.into_iter().next() };
    Ok(Value::Int(found.map(|i| i as i64).unwrap_or(-1)))
}

fn substring(s: &str, args: &[Value]) -> Result<Value, ExecutionError> {
    let chars: Vec<char> = s.chars().collect();
    let start = expect_index(&args[0])?;
    let end = if args.len() > 1 { expect_index(&args[1])? } else { chars.len() };
    if start > end || end > chars.len() {
        return Err(ExecutionError::IndexOutOfRange { index: format!("{start}..{end}") });
    }
    Ok(Value::string(chars[start..end].iter().collect::<String>()))
}

fn replace(s: &str, args: &[Value]) -> Result<Value, ExecutionError> {
    let old = string_arg(args, 0)?;
    let new = string_arg(args, 1)?;
    if old.is_empty() {
        return Ok(Value::string(s.to_string()));
    }
    let count = if args.len() > 2 {
        match &args[2] {
            Value::Int(n) => Some(*n),
            other => return Err(type_err("replace", other)),
        }
    } else {
        None
    };
    let out = match count {
        Some(n) if n >= 0 => s.replacen(old, new, n as usize),
        _ => s.replace(old, new),
    };
    Ok(Value::string(out))
}

fn split(s: &str, args: &[Value]) -> Result<Value, ExecutionError> {
    let sep = string_arg(args, 0)?;
    let limit = if args.len() > 1 {
        match &args[1] {
            Value::Int(n) => Some(*n),
            other => return Err(type_err("split", other)),
        }
    } else {
        None
    };
    let parts: Vec<Value> = match limit {
        Some(n) if n > 0 => s.splitn(n as usize, sep).map(Value::string).collect(),
        Some(n) if n == 0 => vec![],
        _ => {
            if sep.is_empty() {
                s.chars().map(|c| Value::string(c.to_string())).collect()
            } else {
                s.split(sep).map(Value::string).collect()
            }
        }
    };
    Ok(Value::List(parts))
}

fn join(items: &[Value], args: &[Value]) -> Result<Value, ExecutionError> {
    let sep = if args.is_empty() { "" } else { string_arg(args, 0)? };
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }
        match item {
            Value::String(s) => out.push_str(s),
            other => return Err(type_err("join", other)),
        }
    }
    Ok(Value::string(out))
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn strings_ns(name: &str, args: &[Value]) -> Result<Value, ExecutionError> {
    // All of these are ordinarily called receiver-style; reaching the
    // namespace-prefixed form means the caller wrote `strings.foo(s, ...)`
    // explicitly, which we accept identically with the target as arg 0.
    if args.is_empty() {
        return Err(ExecutionError::Arity { function: "strings", expected: "1+", got: 0 });
    }
    let target = string_arg(args, 0)?.to_string();
    let rest = &args[1..];
    match name {
        "charAt" => char_at(&target, expect_index(&rest[0])?),
        "indexOf" => index_of(&target, rest, false),
        "lastIndexOf" => index_of(&target, rest, true),
        "substring" => substring(&target, rest),
        "trim" => Ok(Value::string(target.trim())),
        "replace" => replace(&target, rest),
        "split" => split(&target, rest),
        "join" => Err(ExecutionError::custom("strings.join expects a list target")),
        "quote" => Ok(Value::string(quote(&target))),
        "format" => format_string(&target, rest),
        other => Err(ExecutionError::NoSuchFunction(format!("strings.{other}"))),
    }
}

/// Go-compatible `%s %d %f %e %b %o %x %X` with banker's (round-half-to-even)
/// rounding for `%f` (§4.10).
fn format_string(fmt: &str, args: &[Value]) -> Result<Value, ExecutionError> {
    let list = match args.first() {
        Some(Value::List(l)) => l.as_slice(),
        _ => args,
    };
    let mut out = String::new();
    let mut chars = fmt.chars().peekable();
    let mut arg_idx = 0;
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let spec = chars.next().ok_or_else(|| ExecutionError::custom("dangling % in format string"))?;
        if spec == '%' {
            out.push('%');
            continue;
        }
        let arg = list
            .get(arg_idx)
            .ok_or_else(|| ExecutionError::custom("not enough arguments to format"))?;
        arg_idx += 1;
        out.push_str(&format_one(spec, arg)?);
    }
    Ok(Value::string(out))
}

fn format_one(spec: char, v: &Value) -> Result<String, ExecutionError> {
    Ok(match spec {
        's' => match value::to_string(v)? {
            Value::String(s) => s.to_string(),
            _ => unreachable!(),
        },
        'd' => match v {
            Value::Int(i) => i.to_string(),
            Value::UInt(u) => u.to_string(),
            other => return Err(type_err("%d", other)),
        },
        'f' => match v {
            Value::Double(d) => round_half_even(*d, 6),
            other => return Err(type_err("%f", other)),
        },
        'e' => match v {
            Value::Double(d) => format!("{d:e}"),
            other => return Err(type_err("%e", other)),
        },
        'b' => match v {
            Value::Int(i) => format!("{i:b}"),
            Value::UInt(u) => format!("{u:b}"),
            other => return Err(type_err("%b", other)),
        },
        'o' => match v {
            Value::Int(i) => format!("{i:o}"),
            Value::UInt(u) => format!("{u:o}"),
            other => return Err(type_err("%o", other)),
        },
        'x' => match v {
            Value::Int(i) => format!("{i:x}"),
            Value::UInt(u) => format!("{u:x}"),
            Value::Bytes(b) => b.iter().map(|byte| format!("{byte:02x}")).collect(),
            other => return Err(type_err("%x", other)),
        },
        'X' => match v {
            Value::Int(i) => format!("{i:X}"),
            Value::UInt(u) => format!("{u:X}"),
            Value::Bytes(b) => b.iter().map(|byte| format!("{byte:02X}")).collect(),
            other => return Err(type_err("%X", other)),
        },
        other => return Err(ExecutionError::custom(format!("unsupported format verb %{other}"))),
    })
}

fn round_half_even(d: f64, precision: usize) -> String {
    let scale = 10f64.powi(precision as i32);
    let scaled = d * scale;
    let floor = scaled.floor();
    let diff = scaled - floor;
    let rounded = if (diff - 0.5).abs() < f64::EPSILON {
        if (floor as i64) % 2 == 0 { floor } else { floor + 1.0 }
    } else {
        scaled.round()
    };
    format!("{:.*}", precision, rounded / scale)
}

// ---------------------------------------------------------------------
// math (§4.10)
// ---------------------------------------------------------------------

fn math(name: &str, args: &[Value]) -> Result<Value, ExecutionError> {
    match name {
        "greatest" | "max" => extremum(args, Ordering::Greater),
        "least" | "min" => extremum(args, Ordering::Less),
        "ceil" => double_fn(args, f64::ceil),
        "floor" => double_fn(args, f64::floor),
        "round" => double_fn(args, f64::round),
        "trunc" => double_fn(args, f64::trunc),
        "abs" => abs(&args[0]),
        "sign" => sign(&args[0]),
        "isNaN" => Ok(Value::Bool(matches!(&args[0], Value::Double(d) if d.is_nan()))),
        "isInf" => Ok(Value::Bool(matches!(&args[0], Value::Double(d) if d.is_infinite()))),
        "isFinite" => Ok(Value::Bool(matches!(&args[0], Value::Double(d) if d.is_finite()))),
        "bitAnd" => bitwise(&args[0], &args[1], |a, b| a & b, |a, b| a & b),
        "bitOr" => bitwise(&args[0], &args[1], |a, b| a | b, |a, b| a | b),
        "bitXor" => bitwise(&args[0], &args[1], |a, b| a ^ b, |a, b| a ^ b),
        "bitNot" => match &args[0] {
            Value::Int(i) => Ok(Value::Int(!i)),
            Value::UInt(u) => Ok(Value::UInt(!u)),
            other => Err(type_err("bitNot", other)),
        },
        "bitShiftLeft" => shift(&args[0], &args[1], true),
        "bitShiftRight" => shift(&args[0], &args[1], false),
        other => Err(ExecutionError::NoSuchFunction(format!("math.{other}"))),
    }
}

fn extremum(args: &[Value], want: Ordering) -> Result<Value, ExecutionError> {
    let values: Vec<&Value> = match args {
        [Value::List(l)] => l.iter().collect(),
        _ => args.iter().collect(),
    };
    if values.is_empty() {
        return Err(ExecutionError::Arity { function: "math.greatest/least", expected: "1+", got: 0 });
    }
    let mut best = values[0];
    for candidate in &values[1..] {
        let ord = value::cel_cmp(candidate, best).ok_or_else(|| ExecutionError::UnsupportedBinary {
            op: "math.greatest/least",
            lhs: candidate.type_name(),
            rhs: best.type_name(),
        })?;
        if ord == want {
            best = candidate;
        }
    }
    Ok(best.clone())
}

fn double_fn(args: &[Value], f: fn(f64) -> f64) -> Result<Value, ExecutionError> {
    match &args[0] {
        Value::Double(d) => Ok(Value::Double(f(*d))),
        other => Err(type_err("math", other)),
    }
}

fn abs(v: &Value) -> Result<Value, ExecutionError> {
    match v {
        Value::Int(i) => i.checked_abs().map(Value::Int).ok_or(ExecutionError::Overflow { op: "abs" }),
        Value::UInt(u) => Ok(Value::UInt(*u)),
        Value::Double(d) => Ok(Value::Double(d.abs())),
        other => Err(type_err("abs", other)),
    }
}

fn sign(v: &Value) -> Result<Value, ExecutionError> {
    match v {
        Value::Int(i) => Ok(Value::Int(i.signum())),
        Value::UInt(u) => Ok(Value::Int(if *u == 0 { 0 } else { 1 })),
        Value::Double(d) => Ok(Value::Double(if *d == 0.0 { 0.0 } else { d.signum() })),
        other => Err(type_err("sign", other)),
    }
}

fn bitwise(a: &Value, b: &Value, fi: fn(i64, i64) -> i64, fu: fn(u64, u64) -> u64) -> Result<Value, ExecutionError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(fi(*x, *y))),
        (Value::UInt(x), Value::UInt(y)) => Ok(Value::UInt(fu(*x, *y))),
        _ => Err(ExecutionError::UnsupportedBinary { op: "bit op", lhs: a.type_name(), rhs: b.type_name() }),
    }
}

fn shift(v: &Value, amount: &Value, left: bool) -> Result<Value, ExecutionError> {
    let n = match amount {
        Value::Int(i) => *i,
        other => return Err(type_err("shift amount", other)),
    };
    if n < 0 {
        return Err(ExecutionError::custom("negative shift amount"));
    }
    if n >= 64 {
        return Ok(match v {
            Value::Int(_) => Value::Int(0),
            Value::UInt(_) => Value::UInt(0),
            other => return Err(type_err("shift", other)),
        });
    }
    match v {
        Value::Int(i) => Ok(Value::Int(if left { i.wrapping_shl(n as u32) } else { i.wrapping_shr(n as u32) })),
        Value::UInt(u) => Ok(Value::UInt(if left { u.wrapping_shl(n as u32) } else { u.wrapping_shr(n as u32) })),
        other => Err(type_err("shift", other)),
    }
}

// ---------------------------------------------------------------------
// base64 (§4.10)
// ---------------------------------------------------------------------

fn base64_ns(name: &str, args: &[Value]) -> Result<Value, ExecutionError> {
    match name {
        "encode" => match &args[0] {
            Value::Bytes(b) => Ok(Value::string(base64::engine::general_purpose::STANDARD.encode(b.as_ref()))),
            other => Err(type_err("base64.encode", other)),
        },
        "decode" => {
            let s = string_arg(args, 0)?;
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(s)
                .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(s))
                .map_err(|e| ExecutionError::custom(format!("invalid base64: {e}")))?;
            Ok(Value::bytes(decoded))
        }
        other => Err(ExecutionError::NoSuchFunction(format!("base64.{other}"))),
    }
}

// ---------------------------------------------------------------------
// network (§4.10)
// ---------------------------------------------------------------------

fn network_ns(name: &str, args: &[Value]) -> Result<Value, ExecutionError> {
    match name {
        "ip" => {
            let s = string_arg(args, 0)?;
            IpValue::parse(s).map(Value::Ip).ok_or_else(|| ExecutionError::custom(format!("invalid IP address '{s}'")))
        }
        "cidr" => {
            let s = string_arg(args, 0)?;
            CidrValue::parse(s).map(Value::Cidr).ok_or_else(|| ExecutionError::custom(format!("invalid CIDR '{s}'")))
        }
        "isIP" => {
            let s = string_arg(args, 0)?;
            Ok(Value::Bool(IpValue::parse(s).is_some()))
        }
        other => Err(ExecutionError::NoSuchFunction(format!("network.{other}"))),
    }
}

// ---------------------------------------------------------------------
// optional (§4.10)
// ---------------------------------------------------------------------

fn optional_ns(name: &str, args: &[Value]) -> Result<Value, ExecutionError> {
    match name {
        "none" => Ok(Value::Optional(None)),
        "of" => Ok(Value::Optional(Some(Box::new(args[0].clone())))),
        "ofNonZeroValue" => {
            let v = &args[0];
            let is_zero = match v {
                Value::Null => true,
                Value::Bool(b) => !b,
                Value::Int(i) => *i == 0,
                Value::UInt(u) => *u == 0,
                Value::Double(d) => *d == 0.0,
                Value::String(s) => s.is_empty(),
                Value::Bytes(b) => b.is_empty(),
                _ => false,
            };
            Ok(Value::Optional(if is_zero { None } else { Some(Box::new(v.clone())) }))
        }
        other => Err(ExecutionError::NoSuchFunction(format!("optional.{other}"))),
    }
}
