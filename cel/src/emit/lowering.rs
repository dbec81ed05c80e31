//! Walks an [`Ir`] tree, emitting Cranelift instructions. Grounded on the
//! teacher's `cel-jit::compiler::lowering::ExprLowerer`: the same
//! `(value, error)` Cranelift-SSA-pair convention at every node, the same
//! `fast_slots` map for comprehension-variable reads, the same
//! stack-slot-array calling convention for variadic runtime calls.
//!
//! Two real differences from the teacher, both already decided in
//! DESIGN.md:
//! - `&&`/`||` never short-circuit here (both operands are always lowered
//!   in straight-line order, then combined by [`crate::runtime::rt_and`]/
//!   [`crate::runtime::rt_or`]'s commutative cascade) — the REDESIGN FLAG
//!   fixing the teacher's short-circuit bug (SPEC_FULL.md §4).
//! - identifiers/fields/qualified paths/struct field names cross the FFI
//!   boundary as small integer ids into [`crate::runtime::LoweringData`],
//!   not as raw `(ptr, len)` pairs — there is no `string_constant()` helper
//!   here, just `data.intern(...)` returning an id baked in as an `iconst`.

use crate::error::CompileError;
use crate::ir::{Ir, IrComprehension};
use crate::runtime::{BinOp, BoxedValue, LoweringData, UnOp};
use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{types, InstBuilder, StackSlotData, StackSlotKind, Type, Value};
use cranelift_frontend::FunctionBuilder;
use cranelift_module::{FuncId, Module};
use std::collections::HashMap;
use std::rc::Rc;

pub struct ExprLowerer<'a, 'b, M: Module> {
    builder: &'a mut FunctionBuilder<'b>,
    module: &'a mut M,
    runtime_funcs: &'a HashMap<&'static str, FuncId>,
    ctx_param: Value,
    ptr_type: Type,
    data: &'a mut LoweringData,
    /// Comprehension loop variables currently in scope, mapped to the fast
    /// slot id the IR stage allocated for them (§4.7).
    fast_slots: HashMap<Rc<str>, u32>,
}

impl<'a, 'b, M: Module> ExprLowerer<'a, 'b, M> {
    pub fn new(
        builder: &'a mut FunctionBuilder<'b>,
        module: &'a mut M,
        runtime_funcs: &'a HashMap<&'static str, FuncId>,
        ctx_param: Value,
        ptr_type: Type,
        data: &'a mut LoweringData,
    ) -> Self {
        ExprLowerer { builder, module, runtime_funcs, ctx_param, ptr_type, data, fast_slots: HashMap::new() }
    }

    pub fn lower(&mut self, ir: &Ir) -> Result<(Value, Value), CompileError> {
        match ir {
            Ir::IntLit(i) => Ok(self.lower_int_lit(*i)),
            Ir::UintLit(u) => Ok(self.lower_const(crate::value::Value::UInt(*u))),
            Ir::DoubleLit(d) => Ok(self.lower_const(crate::value::Value::Double(*d))),
            Ir::StringLit(s) => Ok(self.lower_const(crate::value::Value::String(s.clone()))),
            Ir::BytesLit(b) => Ok(self.lower_const(crate::value::Value::Bytes(b.clone()))),
            Ir::BoolLit(b) => Ok(self.no_err(self.tagged(BoxedValue::bool(*b)))),
            Ir::NullLit => Ok(self.no_err(self.tagged(BoxedValue::null()))),

            Ir::Ident(name) => self.lower_ident(name),
            Ir::QualifiedPath(segments) => {
                let id = self.data.push_segments(segments.clone());
                let id_val = self.const_u32(id);
                self.call_runtime("rt_resolve_qualified", &[self.ctx_param, id_val])
            }

            Ir::Select { operand, field, test_only } => self.lower_select(operand, field, *test_only),
            Ir::Unary { op, operand } => self.lower_unary(op, operand),
            Ir::Binary { op, lhs, rhs } => self.lower_binary(op, lhs, rhs),
            Ir::Logical { op, slot: _, lhs, rhs } => self.lower_logical(op, lhs, rhs),
            Ir::Ternary { cond, t, f } => self.lower_ternary(cond, t, f),

            Ir::Call { func, target, args } => self.lower_call(func, target.as_deref(), args),

            Ir::CreateList { elements, optional_indices } => self.lower_create_list(elements, optional_indices),
            Ir::CreateMap { entries } => self.lower_create_map(entries),
            Ir::CreateStruct { message_name, entries } => self.lower_create_struct(message_name, entries),

            Ir::Comprehension(c) => self.lower_comprehension(c),
        }
    }

    // -----------------------------------------------------------------
    // Literals
    // -----------------------------------------------------------------

    fn tagged(&self, b: BoxedValue) -> Value {
        self.builder.ins().iconst(types::I64, b.as_raw() as i64)
    }

    fn no_err(&self, v: Value) -> (Value, Value) {
        let z = self.builder.ins().iconst(types::I64, 0);
        (v, z)
    }

    fn lower_int_lit(&mut self, i: i64) -> (Value, Value) {
        match BoxedValue::small_int(i) {
            Some(b) => self.no_err(self.tagged(b)),
            None => self.lower_const(crate::value::Value::Int(i)),
        }
    }

    /// Literals that can't be tagged inline are baked into the program's
    /// constant table and reloaded (cloned) at evaluation time by
    /// [`crate::runtime::rt_load_const`].
    fn lower_const(&mut self, v: crate::value::Value) -> (Value, Value) {
        let id = self.data.push_const(v);
        let id_val = self.const_u32(id);
        self.call_runtime("rt_load_const", &[self.ctx_param, id_val]).expect("rt_load_const is always declared")
    }

    fn const_u32(&mut self, v: u32) -> Value {
        self.builder.ins().iconst(types::I32, v as i64)
    }

    // -----------------------------------------------------------------
    // Identifiers / fields
    // -----------------------------------------------------------------

    fn lower_ident(&mut self, name: &Rc<str>) -> Result<(Value, Value), CompileError> {
        if let Some(&slot) = self.fast_slots.get(name) {
            let slot_val = self.const_u32(slot);
            let value = self.call_runtime_single("rt_get_slot", &[self.ctx_param, slot_val]);
            return Ok(self.no_err(value));
        }
        let id = self.data.intern(name.clone());
        let id_val = self.const_u32(id);
        self.call_runtime("rt_get_variable", &[self.ctx_param, id_val])
    }

    fn lower_select(&mut self, operand: &Ir, field: &Rc<str>, test_only: bool) -> Result<(Value, Value), CompileError> {
        let (target, target_err) = self.lower(operand)?;
        let field_id = self.data.intern(field.clone());
        let field_val = self.const_u32(field_id);
        let test_only_val = self.const_u32(test_only as u32);
        self.call_runtime("rt_select", &[self.ctx_param, target, target_err, field_val, test_only_val])
    }

    // -----------------------------------------------------------------
    // Operators
    // -----------------------------------------------------------------

    fn lower_unary(&mut self, op: &str, operand: &Ir) -> Result<(Value, Value), CompileError> {
        let (v, err) = self.lower(operand)?;
        let op_val = self.builder.ins().iconst(types::I32, UnOp::from_token(op) as i64);
        self.call_runtime("rt_unary", &[self.ctx_param, op_val, v, err])
    }

    fn lower_binary(&mut self, op: &str, lhs: &Ir, rhs: &Ir) -> Result<(Value, Value), CompileError> {
        let (l, le) = self.lower(lhs)?;
        let (r, re) = self.lower(rhs)?;
        let op_val = self.builder.ins().iconst(types::I32, BinOp::from_token(op) as i64);
        self.call_runtime("rt_binary", &[self.ctx_param, op_val, l, le, r, re])
    }

    /// §4.6: both operands are always evaluated, in source order, before
    /// the commutative cascade combines them — no Cranelift branch needed
    /// at all, unlike the teacher's short-circuiting version.
    fn lower_logical(&mut self, op: &str, lhs: &Ir, rhs: &Ir) -> Result<(Value, Value), CompileError> {
        let (l, le) = self.lower(lhs)?;
        let (r, re) = self.lower(rhs)?;
        let name = if op == crate::ast::operators::AND { "rt_and" } else { "rt_or" };
        self.call_runtime(name, &[self.ctx_param, l, le, r, re])
    }

    /// The one place evaluation is lazy (§4.6): a non-bool/errored `cond`
    /// is the error sentinel and neither branch runs.
    fn lower_ternary(&mut self, cond: &Ir, t: &Ir, f: &Ir) -> Result<(Value, Value), CompileError> {
        let (cond_val, cond_err) = self.lower(cond)?;
        let (bool_flag, req_err) = self.call_runtime("rt_require_bool", &[self.ctx_param, cond_val, cond_err])?;

        let error_block = self.builder.create_block();
        let check_block = self.builder.create_block();
        let then_block = self.builder.create_block();
        let else_block = self.builder.create_block();
        let merge_block = self.builder.create_block();
        self.builder.append_block_param(merge_block, types::I64);
        self.builder.append_block_param(merge_block, types::I64);

        self.builder.ins().brif(req_err, error_block, &[], check_block, &[]);

        self.builder.switch_to_block(error_block);
        self.builder.seal_block(error_block);
        let zero = self.builder.ins().iconst(types::I64, 0);
        let one = self.builder.ins().iconst(types::I64, 1);
        self.builder.ins().jump(merge_block, &[zero, one]);

        self.builder.switch_to_block(check_block);
        self.builder.seal_block(check_block);
        self.builder.ins().brif(bool_flag, then_block, &[], else_block, &[]);

        self.builder.switch_to_block(then_block);
        self.builder.seal_block(then_block);
        let (tv, te) = self.lower(t)?;
        self.builder.ins().jump(merge_block, &[tv, te]);

        self.builder.switch_to_block(else_block);
        self.builder.seal_block(else_block);
        let (fv, fe) = self.lower(f)?;
        self.builder.ins().jump(merge_block, &[fv, fe]);

        self.builder.switch_to_block(merge_block);
        self.builder.seal_block(merge_block);
        Ok((self.builder.block_params(merge_block)[0], self.builder.block_params(merge_block)[1]))
    }

    // -----------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------

    fn lower_call(&mut self, func: &Rc<str>, target: Option<&Ir>, args: &[Ir]) -> Result<(Value, Value), CompileError> {
        let (target_val, target_err, has_target) = match target {
            Some(t) => {
                let (v, e) = self.lower(t)?;
                (v, e, 1)
            }
            None => {
                let z = self.builder.ins().iconst(types::I64, 0);
                (z, z, 0)
            }
        };
        let mut vals = Vec::with_capacity(args.len());
        let mut errs = Vec::with_capacity(args.len());
        for a in args {
            let (v, e) = self.lower(a)?;
            vals.push(v);
            errs.push(e);
        }
        let (args_ptr, errs_ptr) = self.stack_arrays(&vals, &errs);
        let name_id = self.data.intern(func.clone());
        let name_val = self.const_u32(name_id);
        let has_target_val = self.const_u32(has_target);
        let n_val = self.const_u32(args.len() as u32);
        self.call_runtime(
            "rt_call_function",
            &[self.ctx_param, name_val, has_target_val, target_val, target_err, args_ptr, errs_ptr, n_val],
        )
    }

    // -----------------------------------------------------------------
    // Aggregates (§3.1, §3.4, §4.8)
    // -----------------------------------------------------------------

    fn opt_mask(&mut self, flags: impl Iterator<Item = bool>) -> Value {
        let mut mask: u64 = 0;
        for (i, optional) in flags.enumerate() {
            if optional {
                mask |= 1 << i;
            }
        }
        self.builder.ins().iconst(types::I64, mask as i64)
    }

    fn lower_create_list(&mut self, elements: &[Ir], optional_indices: &[usize]) -> Result<(Value, Value), CompileError> {
        let mut vals = Vec::with_capacity(elements.len());
        let mut errs = Vec::with_capacity(elements.len());
        for e in elements {
            let (v, er) = self.lower(e)?;
            vals.push(v);
            errs.push(er);
        }
        let (elems_ptr, errs_ptr) = self.stack_arrays(&vals, &errs);
        let mask = self.opt_mask((0..elements.len()).map(|i| optional_indices.contains(&i)));
        let n_val = self.const_u32(elements.len() as u32);
        self.call_runtime("rt_make_list", &[self.ctx_param, elems_ptr, errs_ptr, mask, n_val])
    }

    fn lower_create_map(&mut self, entries: &[(Ir, Ir, bool)]) -> Result<(Value, Value), CompileError> {
        let mut keys = Vec::with_capacity(entries.len());
        let mut key_errs = Vec::with_capacity(entries.len());
        let mut vals = Vec::with_capacity(entries.len());
        let mut val_errs = Vec::with_capacity(entries.len());
        for (k, v, _) in entries {
            let (kv, ke) = self.lower(k)?;
            let (vv, ve) = self.lower(v)?;
            keys.push(kv);
            key_errs.push(ke);
            vals.push(vv);
            val_errs.push(ve);
        }
        let (keys_ptr, key_errs_ptr) = self.stack_arrays(&keys, &key_errs);
        let (vals_ptr, val_errs_ptr) = self.stack_arrays(&vals, &val_errs);
        let mask = self.opt_mask(entries.iter().map(|(_, _, o)| *o));
        let n_val = self.const_u32(entries.len() as u32);
        self.call_runtime(
            "rt_make_map",
            &[self.ctx_param, keys_ptr, key_errs_ptr, vals_ptr, val_errs_ptr, mask, n_val],
        )
    }

    fn lower_create_struct(
        &mut self,
        message_name: &Rc<str>,
        entries: &[(Rc<str>, Ir, bool)],
    ) -> Result<(Value, Value), CompileError> {
        let mut vals = Vec::with_capacity(entries.len());
        let mut val_errs = Vec::with_capacity(entries.len());
        let names: Vec<Rc<str>> = entries.iter().map(|(n, _, _)| n.clone()).collect();
        for (_, v, _) in entries {
            let (vv, ve) = self.lower(v)?;
            vals.push(vv);
            val_errs.push(ve);
        }
        let (vals_ptr, val_errs_ptr) = self.stack_arrays(&vals, &val_errs);
        let mask = self.opt_mask(entries.iter().map(|(_, _, o)| *o));
        let type_name_id = self.data.intern(message_name.clone());
        let type_name_val = self.const_u32(type_name_id);
        let names_list_id = self.data.push_names(names);
        let names_list_val = self.const_u32(names_list_id);
        let n_val = self.const_u32(entries.len() as u32);
        self.call_runtime(
            "rt_make_struct",
            &[self.ctx_param, type_name_val, names_list_val, vals_ptr, val_errs_ptr, mask, n_val],
        )
    }

    /// Spills `vals`/`errs` into two stack-allocated `u64` arrays, returning
    /// their base pointers, for the runtime calls that take a count rather
    /// than a fixed arity.
    fn stack_arrays(&mut self, vals: &[Value], errs: &[Value]) -> (Value, Value) {
        let n = vals.len() as u32;
        let vals_slot = self.builder.create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, n.max(1) * 8, 3));
        let errs_slot = self.builder.create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, n.max(1) * 8, 3));
        for (i, v) in vals.iter().enumerate() {
            self.builder.ins().stack_store(*v, vals_slot, (i * 8) as i32);
        }
        for (i, e) in errs.iter().enumerate() {
            self.builder.ins().stack_store(*e, errs_slot, (i * 8) as i32);
        }
        let vals_ptr = self.builder.ins().stack_addr(self.ptr_type, vals_slot, 0);
        let errs_ptr = self.builder.ins().stack_addr(self.ptr_type, errs_slot, 0);
        (vals_ptr, errs_ptr)
    }

    // -----------------------------------------------------------------
    // Comprehensions (§4.7)
    // -----------------------------------------------------------------

    fn lower_comprehension(&mut self, c: &IrComprehension) -> Result<(Value, Value), CompileError> {
        let merge_block = self.builder.create_block();
        self.builder.append_block_param(merge_block, types::I64);
        self.builder.append_block_param(merge_block, types::I64);

        let (accu_init, accu_init_err) = self.lower(&c.accu_init)?;
        self.bail_on_error(accu_init_err, merge_block)?;

        let (iter_range, iter_range_err) = self.lower(&c.iter_range)?;
        self.bail_on_error(iter_range_err, merge_block)?;

        let zero_err = self.builder.ins().iconst(types::I64, 0);
        let (len_boxed, len_err) = self.call_runtime("rt_iter_len", &[self.ctx_param, iter_range, zero_err])?;
        self.bail_on_error(len_err, merge_block)?;
        // `rt_iter_len` always yields a `Value::Int` small enough to be
        // inline-tagged (collection sizes never approach 2^60), so the
        // small-int payload can be pulled out with a plain shift instead of
        // a runtime round-trip.
        let len = self.builder.ins().sshr_imm(len_boxed, 3);

        self.fast_slots.insert(c.iter_var.clone(), c.iter_slot);
        if let Some(v2) = &c.iter_var2 {
            self.fast_slots.insert(v2.clone(), c.iter_slot2.expect("two-variable form allocates iter_slot2"));
        }
        self.fast_slots.insert(c.accu_var.clone(), c.accu_slot);

        let loop_header = self.builder.create_block();
        let loop_body = self.builder.create_block();
        let loop_exit = self.builder.create_block();
        self.builder.append_block_param(loop_header, types::I64); // index
        self.builder.append_block_param(loop_header, types::I64); // accu (SSA)
        self.builder.append_block_param(loop_exit, types::I64); // final accu

        let zero_idx = self.builder.ins().iconst(types::I64, 0);
        self.builder.ins().jump(loop_header, &[zero_idx, accu_init]);

        self.builder.switch_to_block(loop_header);
        let index = self.builder.block_params(loop_header)[0];
        let current_accu = self.builder.block_params(loop_header)[1];
        let at_end = self.builder.ins().icmp(IntCC::SignedGreaterThanOrEqual, index, len);
        self.builder.ins().brif(at_end, loop_exit, &[current_accu], loop_body, &[]);

        self.builder.switch_to_block(loop_body);
        let accu_slot_val = self.const_u32(c.accu_slot);
        self.call_runtime_void("rt_set_slot", &[self.ctx_param, accu_slot_val, current_accu]);

        let iter_slot_val = self.const_u32(c.iter_slot);
        let has_slot2 = self.const_u32(c.iter_slot2.is_some() as u32);
        let iter_slot2_val = self.const_u32(c.iter_slot2.unwrap_or(0));
        let (_bind_ok, bind_err) = self.call_runtime(
            "rt_iter_bind",
            &[self.ctx_param, iter_range, index, iter_slot_val, has_slot2, iter_slot2_val],
        )?;

        let bind_error_block = self.builder.create_block();
        let bind_ok_block = self.builder.create_block();
        self.builder.ins().brif(bind_err, bind_error_block, &[], bind_ok_block, &[]);

        self.builder.switch_to_block(bind_error_block);
        self.builder.seal_block(bind_error_block);
        self.call_runtime_void("rt_free_value", &[iter_range]);
        let zero = self.builder.ins().iconst(types::I64, 0);
        let one = self.builder.ins().iconst(types::I64, 1);
        self.builder.ins().jump(merge_block, &[zero, one]);

        self.builder.switch_to_block(bind_ok_block);
        self.builder.seal_block(bind_ok_block);

        let (cond_val, cond_err) = self.lower(&c.loop_condition)?;
        let cond_error_block = self.builder.create_block();
        let cond_ok_block = self.builder.create_block();
        self.builder.ins().brif(cond_err, cond_error_block, &[], cond_ok_block, &[]);

        self.builder.switch_to_block(cond_error_block);
        self.builder.seal_block(cond_error_block);
        self.call_runtime_void("rt_free_value", &[iter_range]);
        let zero2 = self.builder.ins().iconst(types::I64, 0);
        let one2 = self.builder.ins().iconst(types::I64, 1);
        self.builder.ins().jump(merge_block, &[zero2, one2]);

        self.builder.switch_to_block(cond_ok_block);
        self.builder.seal_block(cond_ok_block);
        let cond_bool = self.inline_to_bool(cond_val);

        let step_block = self.builder.create_block();
        let early_exit_block = self.builder.create_block();
        self.builder.ins().brif(cond_bool, step_block, &[], early_exit_block, &[]);

        self.builder.switch_to_block(early_exit_block);
        self.builder.seal_block(early_exit_block);
        self.builder.ins().jump(loop_exit, &[current_accu]);

        self.builder.switch_to_block(step_block);
        self.builder.seal_block(step_block);
        let (step_result, step_err) = self.lower(&c.loop_step)?;

        let step_error_block = self.builder.create_block();
        let step_ok_block = self.builder.create_block();
        self.builder.ins().brif(step_err, step_error_block, &[], step_ok_block, &[]);

        self.builder.switch_to_block(step_error_block);
        self.builder.seal_block(step_error_block);
        self.call_runtime_void("rt_free_value", &[iter_range]);
        let zero3 = self.builder.ins().iconst(types::I64, 0);
        let one3 = self.builder.ins().iconst(types::I64, 1);
        self.builder.ins().jump(merge_block, &[zero3, one3]);

        self.builder.switch_to_block(step_ok_block);
        self.builder.seal_block(step_ok_block);

        // Free the previous accumulator if the step produced a distinct
        // value (the common `map`/`filter` case of growing a new list);
        // a predicate step that returns the accumulator unchanged (`all`,
        // `exists`) must not be freed out from under itself.
        let accu_same = self.builder.ins().icmp(IntCC::Equal, current_accu, step_result);
        let free_old_accu_block = self.builder.create_block();
        let continue_loop_block = self.builder.create_block();
        self.builder.ins().brif(accu_same, continue_loop_block, &[], free_old_accu_block, &[]);

        self.builder.switch_to_block(free_old_accu_block);
        self.builder.seal_block(free_old_accu_block);
        self.call_runtime_void("rt_free_value", &[current_accu]);
        self.builder.ins().jump(continue_loop_block, &[]);

        self.builder.switch_to_block(continue_loop_block);
        self.builder.seal_block(continue_loop_block);
        let one_const = self.builder.ins().iconst(types::I64, 1);
        let next_index = self.builder.ins().iadd(index, one_const);
        self.builder.ins().jump(loop_header, &[next_index, step_result]);

        self.builder.seal_block(loop_header);
        self.builder.seal_block(loop_body);

        self.builder.switch_to_block(loop_exit);
        self.builder.seal_block(loop_exit);
        let final_accu = self.builder.block_params(loop_exit)[0];
        self.call_runtime_void("rt_free_value", &[iter_range]);
        self.call_runtime_void("rt_set_slot", &[self.ctx_param, accu_slot_val, final_accu]);

        let (result, result_err) = self.lower(&c.result)?;

        let result_same = self.builder.ins().icmp(IntCC::Equal, result, final_accu);
        let free_accu_block = self.builder.create_block();
        let skip_free_block = self.builder.create_block();
        self.builder.ins().brif(result_same, skip_free_block, &[], free_accu_block, &[]);

        self.builder.switch_to_block(free_accu_block);
        self.builder.seal_block(free_accu_block);
        self.call_runtime_void("rt_free_value", &[final_accu]);
        self.builder.ins().jump(skip_free_block, &[]);

        self.builder.switch_to_block(skip_free_block);
        self.builder.seal_block(skip_free_block);

        self.fast_slots.remove(&c.iter_var);
        if let Some(v2) = &c.iter_var2 {
            self.fast_slots.remove(v2);
        }
        self.fast_slots.remove(&c.accu_var);

        self.builder.ins().jump(merge_block, &[result, result_err]);
        self.builder.switch_to_block(merge_block);
        self.builder.seal_block(merge_block);
        Ok((self.builder.block_params(merge_block)[0], self.builder.block_params(merge_block)[1]))
    }

    /// Branches straight to `merge_block` with the error sentinel if `err`
    /// is non-zero; otherwise falls through to a fresh, sealed continuation
    /// block that becomes the new insertion point.
    fn bail_on_error(&mut self, err: Value, merge_block: cranelift_codegen::ir::Block) -> Result<(), CompileError> {
        let error_block = self.builder.create_block();
        let continue_block = self.builder.create_block();
        self.builder.ins().brif(err, error_block, &[], continue_block, &[]);

        self.builder.switch_to_block(error_block);
        self.builder.seal_block(error_block);
        let zero = self.builder.ins().iconst(types::I64, 0);
        let one = self.builder.ins().iconst(types::I64, 1);
        self.builder.ins().jump(merge_block, &[zero, one]);

        self.builder.switch_to_block(continue_block);
        self.builder.seal_block(continue_block);
        Ok(())
    }

    /// Inline tag check for a boolean fast path, avoiding a runtime call to
    /// read a condition already known to be a tagged `Value::Bool`.
    fn inline_to_bool(&mut self, val: Value) -> Value {
        const TAG_MASK: i64 = 0b111;
        const TAG_BOOL: i64 = 0b010;
        let tag = self.builder.ins().band_imm(val, TAG_MASK);
        let tag_const = self.builder.ins().iconst(types::I64, TAG_BOOL);
        let is_bool = self.builder.ins().icmp(IntCC::Equal, tag, tag_const);
        let shifted = self.builder.ins().ushr_imm(val, 3);
        let bool_bit = self.builder.ins().band_imm(shifted, 1);
        // Any non-bool tag is never `false` here (`loop_condition` only
        // ever yields `Value::Bool`, by construction of the macros that
        // produce comprehensions) — the tag check exists only to avoid
        // misreading a pointer's low bits as the boolean payload.
        self.builder.ins().select(is_bool, bool_bit, is_bool)
    }

    // -----------------------------------------------------------------
    // Runtime call plumbing
    // -----------------------------------------------------------------

    fn call_runtime(&mut self, name: &'static str, args: &[Value]) -> Result<(Value, Value), CompileError> {
        let func_id = *self
            .runtime_funcs
            .get(name)
            .unwrap_or_else(|| panic!("runtime function `{name}` was never declared"));
        let func_ref = self.module.declare_func_in_func(func_id, self.builder.func);
        let call = self.builder.ins().call(func_ref, args);
        let results = self.builder.inst_results(call);
        Ok((results[0], results[1]))
    }

    fn call_runtime_single(&mut self, name: &'static str, args: &[Value]) -> Value {
        let func_id = *self
            .runtime_funcs
            .get(name)
            .unwrap_or_else(|| panic!("runtime function `{name}` was never declared"));
        let func_ref = self.module.declare_func_in_func(func_id, self.builder.func);
        let call = self.builder.ins().call(func_ref, args);
        self.builder.inst_results(call)[0]
    }

    fn call_runtime_void(&mut self, name: &'static str, args: &[Value]) {
        let func_id = *self
            .runtime_funcs
            .get(name)
            .unwrap_or_else(|| panic!("runtime function `{name}` was never declared"));
        let func_ref = self.module.declare_func_in_func(func_id, self.builder.func);
        self.builder.ins().call(func_ref, args);
    }
}
