//! The Cranelift JIT compiler (§3.4, §3.5): turns an [`crate::ir::Ir`] tree
//! into a native `cel_expr(*mut RuntimeContext) -> RuntimeResult` function.
//!
//! Grounded on the teacher's `cel-jit::compiler::Compiler`: a `JITModule`
//! wrapped in `Option` so [`Drop`] can take it and call `free_memory()`, a
//! reusable `FunctionBuilderContext`/codegen `Context`, and a name→`FuncId`
//! table of declared runtime imports built once at construction.

pub mod abi;
pub mod lowering;

use crate::error::CompileError;
use crate::ir::Ir;
use crate::runtime::RuntimeResult;
use cranelift_codegen::ir::{types, AbiParam};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context as CodegenContext;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use std::collections::HashMap;

/// A compiled expression's entry point. `ctx` is per-evaluate scratch
/// ([`crate::runtime::RuntimeContext`]); nothing about the compiled code
/// itself is per-call state.
pub type CompiledFn = unsafe extern "C" fn(*const std::ffi::c_void) -> RuntimeResult;

pub struct Compiler {
    module: Option<JITModule>,
    builder_ctx: FunctionBuilderContext,
    ctx: CodegenContext,
    runtime_funcs: HashMap<&'static str, FuncId>,
}

impl Compiler {
    fn module(&self) -> &JITModule {
        self.module.as_ref().expect("JITModule already taken")
    }

    fn module_mut(&mut self) -> &mut JITModule {
        self.module.as_mut().expect("JITModule already taken")
    }

    pub fn new() -> Result<Self, CompileError> {
        let mut flag_builder = settings::builder();
        flag_builder.set("use_colocated_libcalls", "false").map_err(cranelift_err)?;
        flag_builder.set("is_pic", "false").map_err(cranelift_err)?;
        flag_builder.set("opt_level", "speed").map_err(cranelift_err)?;

        let isa_builder = cranelift_native::builder().map_err(|e| CompileError::Codegen(e.to_string()))?;
        let isa = isa_builder.finish(settings::Flags::new(flag_builder)).map_err(cranelift_err)?;

        let mut jit_builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        abi::register_runtime_symbols(&mut jit_builder);
        let module = JITModule::new(jit_builder);

        let mut compiler = Compiler {
            module: Some(module),
            builder_ctx: FunctionBuilderContext::new(),
            ctx: CodegenContext::new(),
            runtime_funcs: HashMap::new(),
        };
        compiler.declare_runtime_functions()?;
        Ok(compiler)
    }

    fn declare_runtime_functions(&mut self) -> Result<(), CompileError> {
        let ptr_type = self.module().target_config().pointer_type();

        // (ctx, id: i32) -> (value, error)
        let id_sig = {
            let mut sig = self.module_mut().make_signature();
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(types::I32));
            sig.returns.push(AbiParam::new(types::I64));
            sig.returns.push(AbiParam::new(types::I64));
            sig
        };
        for name in ["rt_get_variable", "rt_resolve_qualified", "rt_load_const"] {
            self.declare(name, &id_sig)?;
        }

        // (ctx, target, target_err, field_id: i32, test_only: i32) -> (value, error)
        let select_sig = {
            let mut sig = self.module_mut().make_signature();
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(types::I64));
            sig.params.push(AbiParam::new(types::I64));
            sig.params.push(AbiParam::new(types::I32));
            sig.params.push(AbiParam::new(types::I32));
            sig.returns.push(AbiParam::new(types::I64));
            sig.returns.push(AbiParam::new(types::I64));
            sig
        };
        self.declare("rt_select", &select_sig)?;

        // (ctx, op: i32, operand, operand_err) -> (value, error)
        let unary_sig = {
            let mut sig = self.module_mut().make_signature();
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(types::I32));
            sig.params.push(AbiParam::new(types::I64));
            sig.params.push(AbiParam::new(types::I64));
            sig.returns.push(AbiParam::new(types::I64));
            sig.returns.push(AbiParam::new(types::I64));
            sig
        };
        self.declare("rt_unary", &unary_sig)?;

        // (ctx, op: i32, lhs, lhs_err, rhs, rhs_err) -> (value, error)
        let binary_sig = {
            let mut sig = self.module_mut().make_signature();
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(types::I32));
            sig.params.push(AbiParam::new(types::I64));
            sig.params.push(AbiParam::new(types::I64));
            sig.params.push(AbiParam::new(types::I64));
            sig.params.push(AbiParam::new(types::I64));
            sig.returns.push(AbiParam::new(types::I64));
            sig.returns.push(AbiParam::new(types::I64));
            sig
        };
        self.declare("rt_binary", &binary_sig)?;

        // (ctx, lhs, lhs_err, rhs, rhs_err) -> (value, error) — rt_and/rt_or/rt_iter_bind share the shape sans the i32 op
        let cascade_sig = {
            let mut sig = self.module_mut().make_signature();
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(types::I64));
            sig.params.push(AbiParam::new(types::I64));
            sig.params.push(AbiParam::new(types::I64));
            sig.params.push(AbiParam::new(types::I64));
            sig.returns.push(AbiParam::new(types::I64));
            sig.returns.push(AbiParam::new(types::I64));
            sig
        };
        for name in ["rt_and", "rt_or"] {
            self.declare(name, &cascade_sig)?;
        }

        // (ctx, cond, cond_err) -> (value, error) — also rt_iter_len
        let bool_sig = {
            let mut sig = self.module_mut().make_signature();
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(types::I64));
            sig.params.push(AbiParam::new(types::I64));
            sig.returns.push(AbiParam::new(types::I64));
            sig.returns.push(AbiParam::new(types::I64));
            sig
        };
        for name in ["rt_require_bool", "rt_iter_len"] {
            self.declare(name, &bool_sig)?;
        }

        // (ctx, elems_ptr, errs_ptr, opt_mask: i64, n: i32) -> (value, error)
        let make_list_sig = {
            let mut sig = self.module_mut().make_signature();
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(types::I64));
            sig.params.push(AbiParam::new(types::I32));
            sig.returns.push(AbiParam::new(types::I64));
            sig.returns.push(AbiParam::new(types::I64));
            sig
        };
        self.declare("rt_make_list", &make_list_sig)?;

        // (ctx, keys_ptr, key_errs_ptr, vals_ptr, val_errs_ptr, opt_mask: i64, n: i32) -> (value, error)
        let make_map_sig = {
            let mut sig = self.module_mut().make_signature();
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(types::I64));
            sig.params.push(AbiParam::new(types::I32));
            sig.returns.push(AbiParam::new(types::I64));
            sig.returns.push(AbiParam::new(types::I64));
            sig
        };
        self.declare("rt_make_map", &make_map_sig)?;

        // (ctx, type_name_id: i32, names_list_id: i32, vals_ptr, val_errs_ptr, opt_mask: i64, n: i32) -> (value, error)
        let make_struct_sig = {
            let mut sig = self.module_mut().make_signature();
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(types::I32));
            sig.params.push(AbiParam::new(types::I32));
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(types::I64));
            sig.params.push(AbiParam::new(types::I32));
            sig.returns.push(AbiParam::new(types::I64));
            sig.returns.push(AbiParam::new(types::I64));
            sig
        };
        self.declare("rt_make_struct", &make_struct_sig)?;

        // (ctx, name_id: i32, has_target: i32, target, target_err, args_ptr, arg_errs_ptr, n: i32) -> (value, error)
        let call_sig = {
            let mut sig = self.module_mut().make_signature();
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(types::I32));
            sig.params.push(AbiParam::new(types::I32));
            sig.params.push(AbiParam::new(types::I64));
            sig.params.push(AbiParam::new(types::I64));
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(types::I32));
            sig.returns.push(AbiParam::new(types::I64));
            sig.returns.push(AbiParam::new(types::I64));
            sig
        };
        self.declare("rt_call_function", &call_sig)?;

        // (ctx, range, index, iter_slot: i32, has_slot2: i32, iter_slot2: i32) -> (value, error)
        let iter_bind_sig = {
            let mut sig = self.module_mut().make_signature();
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(types::I64));
            sig.params.push(AbiParam::new(types::I64));
            sig.params.push(AbiParam::new(types::I32));
            sig.params.push(AbiParam::new(types::I32));
            sig.params.push(AbiParam::new(types::I32));
            sig.returns.push(AbiParam::new(types::I64));
            sig.returns.push(AbiParam::new(types::I64));
            sig
        };
        self.declare("rt_iter_bind", &iter_bind_sig)?;

        // (ctx, slot: i32) -> value
        let get_slot_sig = {
            let mut sig = self.module_mut().make_signature();
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(types::I32));
            sig.returns.push(AbiParam::new(types::I64));
            sig
        };
        self.declare("rt_get_slot", &get_slot_sig)?;

        // (ctx, slot: i32, value) -> void
        let set_slot_sig = {
            let mut sig = self.module_mut().make_signature();
            sig.params.push(AbiParam::new(ptr_type));
            sig.params.push(AbiParam::new(types::I32));
            sig.params.push(AbiParam::new(types::I64));
            sig
        };
        self.declare("rt_set_slot", &set_slot_sig)?;

        // (value) -> void
        let free_value_sig = {
            let mut sig = self.module_mut().make_signature();
            sig.params.push(AbiParam::new(types::I64));
            sig
        };
        self.declare("rt_free_value", &free_value_sig)?;

        Ok(())
    }

    fn declare(&mut self, name: &'static str, sig: &cranelift_codegen::ir::Signature) -> Result<(), CompileError> {
        let id = self.module_mut().declare_function(name, Linkage::Import, sig).map_err(module_err)?;
        self.runtime_funcs.insert(name, id);
        Ok(())
    }

    /// Compiles `ir` into a `cel_expr(*mut RuntimeContext) -> RuntimeResult`
    /// native function, returning it alongside the
    /// [`crate::runtime::LoweringData`] table the emitted code indexes into
    /// (that table must outlive every call to the returned function) and the
    /// emitted CLIF text, the diagnostic `source` of §6.1's `CompileResult`.
    pub fn compile_expression(
        &mut self,
        ir: &Ir,
    ) -> Result<(CompiledFn, crate::runtime::LoweringData, String), CompileError> {
        let ptr_type = self.module().target_config().pointer_type();

        let mut sig = self.module_mut().make_signature();
        sig.params.push(AbiParam::new(ptr_type));
        sig.returns.push(AbiParam::new(types::I64));
        sig.returns.push(AbiParam::new(types::I64));

        let func_id = self.module_mut().declare_function("cel_expr", Linkage::Local, &sig).map_err(module_err)?;

        self.ctx.clear();
        self.ctx.func.signature = sig;

        let mut data = crate::runtime::LoweringData::new();

        {
            let mut builder = FunctionBuilder::new(&mut self.ctx.func, &mut self.builder_ctx);
            let entry = builder.create_block();
            builder.append_block_params_for_function_params(entry);
            builder.switch_to_block(entry);
            builder.seal_block(entry);
            let ctx_param = builder.block_params(entry)[0];

            let module = self.module.as_mut().expect("JITModule already taken");
            let mut lowerer =
                lowering::ExprLowerer::new(&mut builder, module, &self.runtime_funcs, ctx_param, ptr_type, &mut data);
            let (value, error) = lowerer.lower(ir)?;

            builder.ins().return_(&[value, error]);
            builder.finalize();
        }

        let clif_text = self.ctx.func.display().to_string();

        {
            let module = self.module.as_mut().expect("JITModule already taken");
            module.define_function(func_id, &mut self.ctx).map_err(|e| CompileError::Codegen(e.to_string()))?;
            module.clear_context(&mut self.ctx);
            module.finalize_definitions().map_err(module_err)?;
        }

        let code_ptr = self.module().get_finalized_function(func_id);
        Ok((unsafe { std::mem::transmute::<*const u8, CompiledFn>(code_ptr) }, data, clif_text))
    }
}

impl Drop for Compiler {
    fn drop(&mut self) {
        // `JITModule` doesn't free its memory on drop; the compiled function
        // pointer is only used by `Program`, which outlives this `Compiler`
        // by holding it in the same struct, so nothing calls into freed
        // memory once this runs.
        if let Some(module) = self.module.take() {
            unsafe { module.free_memory() };
        }
    }
}

fn cranelift_err(e: cranelift_codegen::settings::SetError) -> CompileError {
    CompileError::Codegen(e.to_string())
}

fn module_err(e: cranelift_module::ModuleError) -> CompileError {
    CompileError::Module(e.to_string())
}
