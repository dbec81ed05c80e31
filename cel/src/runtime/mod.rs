//! The Cranelift↔Rust boundary (§3.5, §5 "Fast Paths / Runtime Calls").
//!
//! Every compiled expression calls back into these `extern "C" fn rt_*`
//! helpers for anything beyond constant folding and control flow — string
//! and collection handling, field/qualified-path resolution, arithmetic, and
//! function dispatch all happen here, in ordinary Rust, against the same
//! [`crate::value`] operations the rest of the crate uses. Only `&&`, `||`,
//! the ternary condition check, and comprehension loop control are genuine
//! Cranelift blocks/branches (§3.5); everything else funnels through one of
//! these functions so the emitter never has to reimplement CEL semantics in
//! SSA form.
//!
//! Grounded on the teacher's `cel-jit::runtime` module: a `RuntimeContext`
//! passed as an opaque pointer through every call, a small fixed error slot
//! instead of threading `Result` through generated code, and boxed `u64`
//! values at the boundary (`runtime::boxed`).

pub mod boxed;
mod context;
mod ext;
mod ops;

pub use boxed::BoxedValue;
pub use context::{BindingMap, Context};
pub use ops::{BinOp, UnOp};

use crate::error::ExecutionError;
use crate::value::{StructValue, TypeRegistry, Value, ValueMap};
use std::cell::RefCell;
use std::rc::Rc;

/// Everything the emitter baked into the program at compile time that
/// can't travel as a Cranelift immediate: identifier/field/function names,
/// flattened qualified-path segment lists, and struct literal field-name
/// lists. Owned by [`crate::Program`] for the program's whole lifetime —
/// compiled code holds only small integer ids into these tables, never raw
/// pointers, so nothing here needs to be pinned or leaked.
#[derive(Default)]
pub struct LoweringData {
    pub strings: Vec<Rc<str>>,
    pub segment_lists: Vec<Vec<Rc<str>>>,
    pub name_lists: Vec<Vec<Rc<str>>>,
    /// Non-inlinable literals (large ints, doubles, strings, bytes) baked in
    /// at compile time. Cloned fresh by [`rt_load_const`] on every
    /// evaluation, the same way [`rt_get_variable`] clones a binding —
    /// there is no per-type `rt_box_*` family here, just one generic path.
    pub consts: Vec<Value>,
}

impl LoweringData {
    pub fn new() -> Self {
        LoweringData::default()
    }

    pub fn intern(&mut self, s: impl Into<Rc<str>>) -> u32 {
        let s = s.into();
        if let Some(pos) = self.strings.iter().position(|existing| *existing == s) {
            return pos as u32;
        }
        self.strings.push(s);
        (self.strings.len() - 1) as u32
    }

    pub fn push_segments(&mut self, segments: Vec<Rc<str>>) -> u32 {
        self.segment_lists.push(segments);
        (self.segment_lists.len() - 1) as u32
    }

    pub fn push_names(&mut self, names: Vec<Rc<str>>) -> u32 {
        self.name_lists.push(names);
        (self.name_lists.len() - 1) as u32
    }

    pub fn push_const(&mut self, v: Value) -> u32 {
        self.consts.push(v);
        (self.consts.len() - 1) as u32
    }
}

/// `#[repr(C)]` so Cranelift-generated code can read it as two back-to-back
/// 64-bit return slots. `error` is a bare flag — the actual
/// [`ExecutionError`] lives in [`RuntimeContext`], set by whichever `rt_*`
/// call first produced it.
/// `error` is a full `u64`, not a narrower flag, so this struct is exactly
/// two eightbytes on the System V x86-64 ABI (mirrors the teacher's own
/// `RuntimeResult` for the same reason) — a narrower field would leave the
/// classification of the second return register ambiguous across targets.
#[repr(C)]
pub struct RuntimeResult {
    pub value: u64,
    pub error: u64,
}

impl RuntimeResult {
    fn ok(v: Value) -> RuntimeResult {
        RuntimeResult { value: BoxedValue::from_value(v).as_raw(), error: 0 }
    }

    fn err() -> RuntimeResult {
        RuntimeResult { value: 0, error: 1 }
    }
}

/// Per-evaluation state threaded through every `rt_*` call: the binding
/// context, the compile-time string/name tables, the current error (if
/// any), and the fast slots used by `&&`/`||`/comprehensions instead of a
/// name-indexed environment (§4.7, §9).
pub struct RuntimeContext<'a> {
    pub cel: Context<'a>,
    lowering: &'a LoweringData,
    error: RefCell<Option<ExecutionError>>,
    slots: RefCell<Vec<u64>>,
}

impl<'a> RuntimeContext<'a> {
    pub fn new(cel: Context<'a>, lowering: &'a LoweringData, slot_count: u32) -> Self {
        RuntimeContext {
            cel,
            lowering,
            error: RefCell::new(None),
            slots: RefCell::new(vec![0u64; slot_count as usize]),
        }
    }

    pub fn take_error(&self) -> Option<ExecutionError> {
        self.error.borrow_mut().take()
    }

    fn set_error(&self, e: ExecutionError) {
        *self.error.borrow_mut() = Some(e);
    }

    fn clear_error(&self) {
        *self.error.borrow_mut() = None;
    }

    fn string(&self, id: u32) -> &Rc<str> {
        &self.lowering.strings[id as usize]
    }

    fn segments(&self, id: u32) -> &[Rc<str>] {
        &self.lowering.segment_lists[id as usize]
    }

    fn names(&self, id: u32) -> &[Rc<str>] {
        &self.lowering.name_lists[id as usize]
    }

    fn registry(&self) -> &TypeRegistry {
        self.cel.registry
    }

    /// Records `result`'s error (if any) and returns the matching
    /// [`RuntimeResult`]. Every `rt_*` function funnels its work through
    /// this so the error-recording convention lives in exactly one place.
    fn finish(&self, result: Result<Value, ExecutionError>) -> RuntimeResult {
        match result {
            Ok(v) => {
                self.clear_error();
                RuntimeResult::ok(v)
            }
            Err(e) => {
                self.set_error(e);
                RuntimeResult::err()
            }
        }
    }

    fn get_slot(&self, slot: u32) -> u64 {
        self.slots.borrow()[slot as usize]
    }

    fn set_slot(&self, slot: u32, raw: u64) {
        self.slots.borrow_mut()[slot as usize] = raw;
    }
}

unsafe fn ctx<'a>(ptr: *const RuntimeContext<'a>) -> &'a RuntimeContext<'a> {
    &*ptr
}

// ---------------------------------------------------------------------
// Identifiers, fields, qualified paths (§4.5)
// ---------------------------------------------------------------------

pub extern "C" fn rt_get_variable(c: *const RuntimeContext, name_id: u32) -> RuntimeResult {
    let c = unsafe { ctx(c) };
    let name = c.string(name_id).clone();
    c.finish(c.cel.resolve_ident(&name))
}

pub extern "C" fn rt_resolve_qualified(c: *const RuntimeContext, list_id: u32) -> RuntimeResult {
    let c = unsafe { ctx(c) };
    let segments = c.segments(list_id).to_vec();
    c.finish(c.cel.resolve_qualified(&segments))
}

/// Loads and re-boxes literal `id` from the program's constant table. Covers
/// every literal the emitter can't inline-tag directly (large ints, uints,
/// doubles, strings, bytes) — there's no per-type `rt_box_*` family here, a
/// literal is just a clone of a value baked in at compile time.
pub extern "C" fn rt_load_const(c: *const RuntimeContext, const_id: u32) -> RuntimeResult {
    let c = unsafe { ctx(c) };
    let v = c.lowering.consts[const_id as usize].clone();
    c.finish(Ok(v))
}

pub extern "C" fn rt_select(
    c: *const RuntimeContext,
    target: u64,
    target_err: u64,
    field_id: u32,
    test_only: u32,
) -> RuntimeResult {
    let c = unsafe { ctx(c) };
    if target_err != 0 {
        return RuntimeResult::err();
    }
    let target = BoxedValue::from_raw(target).to_value();
    let field = c.string(field_id).clone();
    if test_only != 0 {
        c.finish(crate::value::has_field(&target, &field, c.registry()).map(Value::Bool))
    } else {
        c.finish(crate::value::select_field(&target, &field, c.registry()))
    }
}

// ---------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------

pub extern "C" fn rt_unary(c: *const RuntimeContext, op: u32, operand: u64, operand_err: u64) -> RuntimeResult {
    let c = unsafe { ctx(c) };
    let unop = UnOp::from_u32(op);
    // `@not_strictly_false` (§4.1) inverts the usual error-propagation
    // convention: it absorbs an errored or non-bool operand as "true"
    // instead of propagating the error, so it must inspect `operand_err`
    // itself rather than have this function's normal short-circuit pre-empt
    // it.
    if unop == UnOp::NotStrictlyFalse {
        if operand_err != 0 {
            c.clear_error();
            return RuntimeResult::ok(Value::Bool(true));
        }
        let operand = BoxedValue::from_raw(operand).to_value();
        return c.finish(ops::apply_unary(unop, &operand));
    }
    if operand_err != 0 {
        return RuntimeResult::err();
    }
    let operand = BoxedValue::from_raw(operand).to_value();
    c.finish(ops::apply_unary(unop, &operand))
}

pub extern "C" fn rt_binary(
    c: *const RuntimeContext,
    op: u32,
    lhs: u64,
    lhs_err: u64,
    rhs: u64,
    rhs_err: u64,
) -> RuntimeResult {
    let c = unsafe { ctx(c) };
    let binop = BinOp::from_u32(op);
    if lhs_err != 0 || rhs_err != 0 {
        return RuntimeResult::err();
    }
    let lhs = BoxedValue::from_raw(lhs).to_value();
    let rhs = BoxedValue::from_raw(rhs).to_value();
    // `?.`/`?[` (§4.10) need a `&TypeRegistry` to resolve struct fields,
    // which `ops::apply_binary` doesn't have — dispatched here instead.
    match binop {
        BinOp::OptSelect => {
            let field = match &rhs {
                Value::String(s) => s.clone(),
                other => unreachable!("opt-select field must be a string, got {}", other.type_name()),
            };
            c.finish(crate::value::select_field_optional(&lhs, &field, c.registry()))
        }
        BinOp::OptIndex => c.finish(crate::value::index_optional(&lhs, &rhs)),
        _ => c.finish(ops::apply_binary(binop, &lhs, &rhs, c.registry())),
    }
}

/// §4.6 commutative cascade. Both operands are always evaluated by the
/// generated code before this is called (the REDESIGN FLAG in
/// SPEC_FULL.md §4) — this only combines the two already-computed results.
pub extern "C" fn rt_and(c: *const RuntimeContext, lhs: u64, lhs_err: u64, rhs: u64, rhs_err: u64) -> RuntimeResult {
    let c = unsafe { ctx(c) };
    combine(c, lhs, lhs_err, rhs, rhs_err, ops::cascade_and)
}

pub extern "C" fn rt_or(c: *const RuntimeContext, lhs: u64, lhs_err: u64, rhs: u64, rhs_err: u64) -> RuntimeResult {
    let c = unsafe { ctx(c) };
    combine(c, lhs, lhs_err, rhs, rhs_err, ops::cascade_or)
}

fn combine(
    c: &RuntimeContext,
    lhs: u64,
    lhs_err: u64,
    rhs: u64,
    rhs_err: u64,
    cascade: fn(Option<bool>, Option<bool>) -> Option<bool>,
) -> RuntimeResult {
    let lhs_bool = if lhs_err != 0 { None } else { BoxedValue::from_raw(lhs).to_value().as_bool() };
    let rhs_bool = if rhs_err != 0 { None } else { BoxedValue::from_raw(rhs).to_value().as_bool() };
    match cascade(lhs_bool, rhs_bool) {
        Some(b) => {
            c.clear_error();
            RuntimeResult::ok(Value::Bool(b))
        }
        None => RuntimeResult::err(),
    }
}

/// Ternary condition check (§4.6): a non-bool or errored `cond` is the
/// error sentinel and neither branch runs. `value` is 0/1, read directly as
/// the compiled branch condition.
pub extern "C" fn rt_require_bool(c: *const RuntimeContext, cond: u64, cond_err: u64) -> RuntimeResult {
    let c = unsafe { ctx(c) };
    if cond_err != 0 {
        return RuntimeResult::err();
    }
    let v = BoxedValue::from_raw(cond).to_value();
    match v.as_bool() {
        Some(b) => {
            c.clear_error();
            RuntimeResult { value: b as u64, error: 0 }
        }
        None => {
            c.set_error(ExecutionError::UnsupportedOperation { op: "_?_:_", operand: v.type_name() });
            RuntimeResult::err()
        }
    }
}

// ---------------------------------------------------------------------
// Aggregate construction (§3.1, §3.4, §4.8)
// ---------------------------------------------------------------------

/// Bit `i` of `opt_mask` marks element `i` as an optional entry (`?expr`):
/// a `Value::Optional(Some(v))` unwraps to `v`, `None` is omitted, and any
/// other value is a construction error.
fn unwrap_optional_entry(v: Value, optional: bool) -> Result<Option<Value>, ExecutionError> {
    if !optional {
        return Ok(Some(v));
    }
    match v {
        Value::Optional(Some(inner)) => Ok(Some(*inner)),
        Value::Optional(None) => Ok(None),
        other => Err(ExecutionError::custom(format!(
            "optional entry expected an optional value, got {}",
            other.type_name()
        ))),
    }
}

/// # Safety
/// `elems`/`errs` must point to `n` valid, initialized entries.
pub extern "C" fn rt_make_list(
    c: *const RuntimeContext,
    elems: *const u64,
    errs: *const u64,
    opt_mask: u64,
    n: u32,
) -> RuntimeResult {
    let c = unsafe { ctx(c) };
    let n = n as usize;
    let elems = unsafe { std::slice::from_raw_parts(elems, n) };
    let errs = unsafe { std::slice::from_raw_parts(errs, n) };
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        if errs[i] != 0 {
            return RuntimeResult::err();
        }
        let v = BoxedValue::from_raw(elems[i]).to_value();
        let optional = (opt_mask >> i) & 1 == 1;
        match unwrap_optional_entry(v, optional) {
            Ok(Some(v)) => out.push(v),
            Ok(None) => {}
            Err(e) => return c.finish(Err(e)),
        }
    }
    c.finish(Ok(Value::List(out)))
}

/// # Safety
/// All four pointer arguments must point to `n` valid, initialized entries.
pub extern "C" fn rt_make_map(
    c: *const RuntimeContext,
    keys: *const u64,
    key_errs: *const u64,
    vals: *const u64,
    val_errs: *const u64,
    opt_mask: u64,
    n: u32,
) -> RuntimeResult {
    let c = unsafe { ctx(c) };
    let n = n as usize;
    let keys = unsafe { std::slice::from_raw_parts(keys, n) };
    let key_errs = unsafe { std::slice::from_raw_parts(key_errs, n) };
    let vals = unsafe { std::slice::from_raw_parts(vals, n) };
    let val_errs = unsafe { std::slice::from_raw_parts(val_errs, n) };
    let mut pairs = Vec::with_capacity(n);
    for i in 0..n {
        if key_errs[i] != 0 || val_errs[i] != 0 {
            return RuntimeResult::err();
        }
        let key = BoxedValue::from_raw(keys[i]).to_value();
        let val = BoxedValue::from_raw(vals[i]).to_value();
        let optional = (opt_mask >> i) & 1 == 1;
        match unwrap_optional_entry(val, optional) {
            Ok(Some(val)) => pairs.push((key, val)),
            Ok(None) => {}
            Err(e) => return c.finish(Err(e)),
        }
    }
    c.finish(ValueMap::try_from_pairs(pairs).map(Value::Map))
}

/// # Safety
/// `vals`/`val_errs` must point to `n` valid, initialized entries;
/// `names_list_id` must index a name list of length `n` in the program's
/// [`LoweringData`].
pub extern "C" fn rt_make_struct(
    c: *const RuntimeContext,
    type_name_id: u32,
    names_list_id: u32,
    vals: *const u64,
    val_errs: *const u64,
    opt_mask: u64,
    n: u32,
) -> RuntimeResult {
    let c = unsafe { ctx(c) };
    let n = n as usize;
    let vals = unsafe { std::slice::from_raw_parts(vals, n) };
    let val_errs = unsafe { std::slice::from_raw_parts(val_errs, n) };
    let names = c.names(names_list_id).to_vec();
    let mut fields = Vec::with_capacity(n);
    for i in 0..n {
        if val_errs[i] != 0 {
            return RuntimeResult::err();
        }
        let v = BoxedValue::from_raw(vals[i]).to_value();
        let optional = (opt_mask >> i) & 1 == 1;
        match unwrap_optional_entry(v, optional) {
            Ok(Some(v)) => fields.push((names[i].clone(), v)),
            Ok(None) => {}
            Err(e) => return c.finish(Err(e)),
        }
    }
    let type_name = c.string(type_name_id).clone();
    c.finish(Ok(Value::Struct(StructValue::new(type_name, fields))))
}

// ---------------------------------------------------------------------
// Function calls (§4.10)
// ---------------------------------------------------------------------

/// # Safety
/// `args`/`arg_errs` must point to `n` valid, initialized entries.
pub extern "C" fn rt_call_function(
    c: *const RuntimeContext,
    name_id: u32,
    has_target: u32,
    target: u64,
    target_err: u64,
    args: *const u64,
    arg_errs: *const u64,
    n: u32,
) -> RuntimeResult {
    let c = unsafe { ctx(c) };
    if target_err != 0 {
        return RuntimeResult::err();
    }
    let n = n as usize;
    let args = unsafe { std::slice::from_raw_parts(args, n) };
    let arg_errs = unsafe { std::slice::from_raw_parts(arg_errs, n) };
    if arg_errs.iter().any(|e| *e != 0) {
        return RuntimeResult::err();
    }
    let target_value = if has_target != 0 { Some(BoxedValue::from_raw(target).to_value()) } else { None };
    let arg_values: Vec<Value> = args.iter().map(|raw| BoxedValue::from_raw(*raw).to_value()).collect();
    let name = c.string(name_id).clone();
    c.finish(ext::dispatch(&name, target_value.as_ref(), &arg_values, c.registry()))
}

// ---------------------------------------------------------------------
// Comprehensions (§4.7)
// ---------------------------------------------------------------------

pub extern "C" fn rt_iter_len(c: *const RuntimeContext, range: u64, range_err: u64) -> RuntimeResult {
    let c = unsafe { ctx(c) };
    if range_err != 0 {
        return RuntimeResult::err();
    }
    let range = BoxedValue::from_raw(range).to_value();
    // `optMap`/`optFlatMap` range over an optional as if it were a 0- or
    // 1-element collection (§4.10); every other comprehension ranges over
    // an actual list/map, which `value::size` already covers.
    if let Value::Optional(opt) = range.peel() {
        return c.finish(Ok(Value::Int(if opt.is_some() { 1 } else { 0 })));
    }
    c.finish(crate::value::size(&range))
}

/// Binds the fast slots for iteration step `index` over `range` (§4.7).
/// Single-variable form ranges over list elements or map keys; two-variable
/// form ranges over (index, value) for lists and (key, value) for maps.
/// Returns `value: 1` as a no-op success marker; the real effect is the
/// slot writes.
pub extern "C" fn rt_iter_bind(
    c: *const RuntimeContext,
    range: u64,
    index: u64,
    iter_slot: u32,
    has_slot2: u32,
    iter_slot2: u32,
) -> RuntimeResult {
    let c = unsafe { ctx(c) };
    let range = BoxedValue::from_raw(range).to_value();
    let i = index as usize;
    match range.peel() {
        Value::List(items) => {
            let item = items[i].clone();
            if has_slot2 != 0 {
                c.set_slot(iter_slot, BoxedValue::from_value(Value::Int(i as i64)).as_raw());
                c.set_slot(iter_slot2, BoxedValue::from_value(item).as_raw());
            } else {
                c.set_slot(iter_slot, BoxedValue::from_value(item).as_raw());
            }
        }
        Value::Map(m) => {
            let (k, v) = m.iter().nth(i).expect("iter index in range");
            if has_slot2 != 0 {
                c.set_slot(iter_slot, BoxedValue::from_value(k.clone()).as_raw());
                c.set_slot(iter_slot2, BoxedValue::from_value(v.clone()).as_raw());
            } else {
                c.set_slot(iter_slot, BoxedValue::from_value(k.clone()).as_raw());
            }
        }
        Value::Optional(Some(inner)) => {
            c.set_slot(iter_slot, BoxedValue::from_value((**inner).clone()).as_raw());
        }
        other => {
            return c.finish(Err(ExecutionError::UnsupportedOperation {
                op: "@comprehension",
                operand: other.type_name(),
            }))
        }
    }
    c.finish(Ok(Value::Bool(true)))
}

/// Reads fast slot `slot`, re-boxing a fresh clone of its value rather than
/// handing back the slot's own raw pointer (§4.7, §9 "comprehension
/// lambdas"): an identifier read inside a loop body is frequently stashed
/// into an accumulator that outlives the slot write on the next iteration
/// (`map`/`filter`'s running list), so the slot and the read value must be
/// independently freeable.
pub extern "C" fn rt_get_slot(c: *const RuntimeContext, slot: u32) -> u64 {
    let c = unsafe { ctx(c) };
    let v = BoxedValue::from_raw(c.get_slot(slot)).to_value();
    BoxedValue::from_value(v).as_raw()
}

pub extern "C" fn rt_set_slot(c: *const RuntimeContext, slot: u32, raw: u64) {
    unsafe { ctx(c) }.set_slot(slot, raw)
}

/// Frees a heap-boxed intermediate the compiled code determined is no
/// longer needed (e.g. a `Select` operand after the field has been read).
///
/// # Safety
/// Must only be called once per heap-tagged raw value still alive.
pub extern "C" fn rt_free_value(raw: u64) {
    unsafe { BoxedValue::from_raw(raw).free() }
}
