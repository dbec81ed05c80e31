//! Compiles CEL source into a native closure via a Cranelift JIT backend,
//! then evaluates it against caller-supplied bindings (§6.1).
//!
//! ```
//! use cel::{compile, CompileOptions};
//! use cel::runtime::BindingMap;
//!
//! let program = compile("a + b", &CompileOptions::default()).unwrap();
//! let mut bindings = BindingMap::new();
//! bindings.insert("a", cel::Value::Int(1));
//! bindings.insert("b", cel::Value::Int(2));
//! assert_eq!(program.evaluate(&bindings).unwrap(), cel::Value::Int(3));
//! ```

mod ast;
mod emit;
pub mod error;
mod ir;
mod parser;
pub mod runtime;
pub mod value;

pub use error::{CelError, CompileError};
pub use parser::CompileOptions;
pub use value::{TypeRegistry, Value};

use runtime::{BindingMap, Context, LoweringData, RuntimeContext};

/// A compiled expression, ready to evaluate against any number of binding
/// sets (§6.1 `CompileResult`). Holds the JIT module alive for as long as
/// the compiled function pointer is callable.
pub struct Program {
    compiler: emit::Compiler,
    func: emit::CompiledFn,
    lowering: LoweringData,
    registry: TypeRegistry,
    container: String,
    slot_count: u32,
    source: String,
}

impl Program {
    /// Evaluates the compiled expression against `bindings`. Returns
    /// `Err(CelError)` if evaluation produced the internal error sentinel
    /// anywhere it wasn't absorbed (§6.3, §7).
    pub fn evaluate(&self, bindings: &BindingMap) -> Result<Value, CelError> {
        let cel = Context::new(bindings, &self.container, &self.registry);
        let ctx = RuntimeContext::new(cel, &self.lowering, self.slot_count);
        let result = unsafe { (self.func)(&ctx as *const RuntimeContext as *const std::ffi::c_void) };
        if result.error != 0 {
            let err = ctx.take_error().unwrap_or_else(|| error::ExecutionError::Custom("unknown error".into()));
            return Err(err.into());
        }
        Ok(unsafe { runtime::BoxedValue::from_raw(result.value).into_value() })
    }

    /// The diagnostic CLIF text emitted for this expression (§6.1
    /// `CompileResult.source`) — not meant to be parsed, just inspected.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Registers a struct type so field access on values of that type
    /// defaults unset fields per proto convention (§4.8). Must be called
    /// before `evaluate` to take effect, since the registry is captured by
    /// value at evaluate time through `RuntimeContext`.
    pub fn register_struct_type(&mut self, ty: value::StructType) {
        self.registry.register(ty);
    }
}

/// Compiles `source` under `options` into a [`Program`] (§6.1). Macro
/// expansion (`has`, `all`, `exists`, `exists_one`, `map`, `filter`) and the
/// container-prefix identifier resolution of §4.5 both happen here, not at
/// evaluate time.
pub fn compile(source: &str, options: &CompileOptions) -> Result<Program, CompileError> {
    let expr = parser::parse(source, options)?;
    let (ir, slot_count) = ir::lower(&expr);

    let mut compiler = emit::Compiler::new()?;
    let (func, lowering, clif_source) = compiler.compile_expression(&ir)?;

    Ok(Program {
        compiler,
        func,
        lowering,
        registry: TypeRegistry::new(),
        container: options.container.clone(),
        slot_count,
        source: clif_source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime::BindingMap;

    fn eval(src: &str, bindings: BindingMap) -> Result<Value, CelError> {
        let program = compile(src, &CompileOptions::default()).unwrap();
        program.evaluate(&bindings)
    }

    #[test]
    fn arithmetic_and_identifiers() {
        let mut b = BindingMap::new();
        b.insert("a", Value::Int(1));
        b.insert("b", Value::Int(2));
        assert_eq!(eval("a + b * 2", b).unwrap(), Value::Int(5));
    }

    #[test]
    fn large_int_literal_round_trips() {
        assert_eq!(eval("9999999999999999", BindingMap::new()).unwrap(), Value::Int(9999999999999999));
    }

    #[test]
    fn string_literal() {
        assert_eq!(eval(r#""hello " + "world""#, BindingMap::new()).unwrap(), Value::string("hello world"));
    }

    #[test]
    fn and_absorbs_error_when_other_operand_is_false() {
        // §4.6: `error && false` must be `false`, not propagate the error —
        // this is the REDESIGN FLAG case the teacher's short-circuit lowering
        // gets wrong.
        let b = BindingMap::new();
        assert_eq!(eval("undefined_var && false", b).unwrap(), Value::Bool(false));
    }

    #[test]
    fn or_absorbs_error_when_other_operand_is_true() {
        let b = BindingMap::new();
        assert_eq!(eval("undefined_var || true", b).unwrap(), Value::Bool(true));
    }

    #[test]
    fn and_propagates_error_when_undecided() {
        let b = BindingMap::new();
        assert!(eval("undefined_var && true", b).is_err());
    }

    #[test]
    fn ternary_isolates_unselected_branch_error() {
        let b = BindingMap::new();
        assert_eq!(eval("true ? 1 : undefined_var", b).unwrap(), Value::Int(1));
    }

    #[test]
    fn ternary_propagates_condition_error() {
        let b = BindingMap::new();
        assert!(eval("undefined_var ? 1 : 2", b).is_err());
    }

    #[test]
    fn list_construction_and_index() {
        assert_eq!(eval("[1, 2, 3][1]", BindingMap::new()).unwrap(), Value::Int(2));
    }

    #[test]
    fn map_construction_and_field_select() {
        assert_eq!(eval(r#"{"x": 1, "y": 2}.x"#, BindingMap::new()).unwrap(), Value::Int(1));
    }

    #[test]
    fn qualified_identifier_longest_prefix_wins() {
        let mut b = BindingMap::new();
        b.insert("a.b.c", Value::Int(1));
        b.insert("a.b", Value::Int(2));
        assert_eq!(eval("a.b.c", b).unwrap(), Value::Int(1));
    }

    #[test]
    fn all_macro_comprehension() {
        assert_eq!(eval("[1, 2, 3].all(x, x > 0)", BindingMap::new()).unwrap(), Value::Bool(true));
        assert_eq!(eval("[1, -2, 3].all(x, x > 0)", BindingMap::new()).unwrap(), Value::Bool(false));
    }

    #[test]
    fn exists_macro_comprehension() {
        assert_eq!(eval("[1, 2, 3].exists(x, x == 2)", BindingMap::new()).unwrap(), Value::Bool(true));
    }

    #[test]
    fn map_macro_builds_transformed_list() {
        assert_eq!(
            eval("[1, 2, 3].map(x, x * 2)", BindingMap::new()).unwrap(),
            Value::List(vec![Value::Int(2), Value::Int(4), Value::Int(6)])
        );
    }

    #[test]
    fn filter_macro_builds_filtered_list() {
        assert_eq!(
            eval("[1, 2, 3, 4].filter(x, x % 2 == 0)", BindingMap::new()).unwrap(),
            Value::List(vec![Value::Int(2), Value::Int(4)])
        );
    }

    #[test]
    fn has_on_known_but_unset_field_is_false() {
        let ty = value::StructType {
            name: "Msg".into(),
            fields: vec![("missing".into(), value::FieldKind::String, None)],
            proto3: false,
        };
        let mut program = compile("has(m.missing)", &CompileOptions::default()).unwrap();
        program.register_struct_type(ty);
        let mut b = BindingMap::new();
        b.insert("m", Value::Struct(value::StructValue::default_of("Msg")));
        assert_eq!(program.evaluate(&b).unwrap(), Value::Bool(false));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(eval("1 / 0", BindingMap::new()).is_err());
    }

    #[test]
    fn container_prefixed_identifier_resolution() {
        let opts = CompileOptions { disable_macros: false, container: "pkg".into() };
        let program = compile("name", &opts).unwrap();
        let mut b = BindingMap::new();
        b.insert("pkg.name", Value::string("hello"));
        assert_eq!(program.evaluate(&b).unwrap(), Value::string("hello"));
    }

    #[test]
    fn source_exposes_clif_text() {
        let program = compile("1 + 1", &CompileOptions::default()).unwrap();
        assert!(program.source().contains("function"));
    }
}
