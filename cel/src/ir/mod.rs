//! IR transformer (§3.3): lowers the CEL-AST to a reduced, emission-ready
//! form. Three things happen here that don't happen in the AST:
//!
//! - Qualified-identifier chains (`Select(Select(Ident(a), b), c)`) are
//!   recognized and flattened into a single [`Ir::QualifiedPath`] node the
//!   emitter lowers into a longest-prefix binding lookup (§4.5).
//! - `&&`/`||` are given freshly-allocated temporary slot ids that the
//!   emitter declares and assigns during evaluation.
//! - Comprehensions are given explicit accumulator/iteration slot ids
//!   instead of resolving lambda parameters by name at emission time.
//!
//! The IR is never serialized (§3.3) — it is consumed once, immediately, by
//! [`crate::emit`].

use crate::ast::{operators, Expr};
use std::rc::Rc;

#[derive(Clone, Debug)]
pub enum Ir {
    IntLit(i64),
    UintLit(u64),
    DoubleLit(f64),
    StringLit(Rc<str>),
    BytesLit(Rc<[u8]>),
    BoolLit(bool),
    NullLit,

    Ident(Rc<str>),
    QualifiedPath(Vec<Rc<str>>),

    Select { operand: Box<Ir>, field: Rc<str>, test_only: bool },

    Unary { op: &'static str, operand: Box<Ir> },
    Binary { op: &'static str, lhs: Box<Ir>, rhs: Box<Ir> },

    /// `&&`/`||`; `slot` is the freshly-allocated temporary pair the
    /// emitter uses to hold both evaluated operands before applying the
    /// commutative cascade of §4.6.
    Logical { op: &'static str, slot: u32, lhs: Box<Ir>, rhs: Box<Ir> },

    /// Explicit error-propagation form: a non-bool `cond` is the error
    /// sentinel and neither branch is evaluated (§4.6).
    Ternary { cond: Box<Ir>, t: Box<Ir>, f: Box<Ir> },

    Call { func: Rc<str>, target: Option<Box<Ir>>, args: Vec<Ir> },

    CreateList { elements: Vec<Ir>, optional_indices: Vec<usize> },
    CreateMap { entries: Vec<(Ir, Ir, bool)> },
    CreateStruct { message_name: Rc<str>, entries: Vec<(Rc<str>, Ir, bool)> },

    Comprehension(Box<IrComprehension>),
}

#[derive(Clone, Debug)]
pub struct IrComprehension {
    pub iter_var: Rc<str>,
    pub iter_var2: Option<Rc<str>>,
    pub accu_var: Rc<str>,
    /// Fast-slot ids for the iteration/accumulator variables (§4.7, §9
    /// "comprehension lambdas"): these are what lets the emitter generate a
    /// native loop instead of a name-indexed environment per iteration.
    pub iter_slot: u32,
    pub iter_slot2: Option<u32>,
    pub accu_slot: u32,

    pub iter_range: Box<Ir>,
    pub accu_init: Box<Ir>,
    pub loop_condition: Box<Ir>,
    pub loop_step: Box<Ir>,
    pub result: Box<Ir>,
}

#[derive(Default)]
struct SlotAllocator {
    next: u32,
}

impl SlotAllocator {
    fn alloc(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// Lowers `expr` to IR, returning the total number of fast slots the
/// emitter must reserve in [`crate::runtime::RuntimeContext`] (§4.7, §9).
pub fn lower(expr: &Expr) -> (Ir, u32) {
    let mut slots = SlotAllocator::default();
    let ir = lower_inner(expr, &mut slots);
    (ir, slots.next)
}

fn lower_inner(expr: &Expr, slots: &mut SlotAllocator) -> Ir {
    match expr {
        Expr::IntLit(i) => Ir::IntLit(*i),
        Expr::UintLit(u) => Ir::UintLit(*u),
        Expr::DoubleLit(d) => Ir::DoubleLit(*d),
        Expr::StringLit(s) => Ir::StringLit(s.clone()),
        Expr::BytesLit(b) => Ir::BytesLit(b.clone()),
        Expr::BoolLit(b) => Ir::BoolLit(*b),
        Expr::NullLit => Ir::NullLit,
        Expr::Ident(name) => Ir::Ident(name.clone()),

        Expr::Select { operand, field, test_only: false }
            if matches!(operand.as_ref(), Expr::Ident(ns) if ns.as_ref() == "optional")
                && field.as_ref() == "none" =>
        {
            Ir::Call { func: Rc::from("optional.none"), target: None, args: vec![] }
        }

        Expr::Select { .. } => {
            if let Some(segments) = qualified_path(expr) {
                Ir::QualifiedPath(segments)
            } else if let Expr::Select { operand, field, test_only } = expr {
                Ir::Select {
                    operand: Box::new(lower_inner(operand, slots)),
                    field: field.clone(),
                    test_only: *test_only,
                }
            } else {
                unreachable!()
            }
        }

        Expr::Call { func, target, args } => lower_call(func, target.as_deref(), args, slots),

        Expr::CreateList { elements, optional_indices } => Ir::CreateList {
            elements: elements.iter().map(|e| lower_inner(e, slots)).collect(),
            optional_indices: optional_indices.clone(),
        },
        Expr::CreateMap { entries } => Ir::CreateMap {
            entries: entries
                .iter()
                .map(|e| (lower_inner(&e.key, slots), lower_inner(&e.value, slots), e.optional))
                .collect(),
        },
        Expr::CreateStruct { message_name, entries } => Ir::CreateStruct {
            message_name: message_name.clone(),
            entries: entries
                .iter()
                .map(|e| (e.field.clone(), lower_inner(&e.value, slots), e.optional))
                .collect(),
        },

        Expr::Comprehension(c) => {
            let accu_slot = slots.alloc();
            let iter_slot = slots.alloc();
            let iter_slot2 = c.iter_var2.as_ref().map(|_| slots.alloc());
            Ir::Comprehension(Box::new(IrComprehension {
                iter_var: c.iter_var.clone(),
                iter_var2: c.iter_var2.clone(),
                accu_var: c.accu_var.clone(),
                iter_slot,
                iter_slot2,
                accu_slot,
                iter_range: Box::new(lower_inner(&c.iter_range, slots)),
                accu_init: Box::new(lower_inner(&c.accu_init, slots)),
                loop_condition: Box::new(lower_inner(&c.loop_condition, slots)),
                loop_step: Box::new(lower_inner(&c.loop_step, slots)),
                result: Box::new(lower_inner(&c.result, slots)),
            }))
        }
    }
}

/// Extension namespaces (§4.10) surfaced as `ns.func(...)`. `ns` is never a
/// bound identifier — it's dispatched purely syntactically, the same way
/// the teacher's emitter recognizes `math`/`strings`/etc. as reserved
/// prefixes rather than real values (see DESIGN.md).
const EXTENSION_NAMESPACES: &[&str] = &["math", "strings", "base64", "network", "optional"];

fn lower_call(func: &Rc<str>, target: Option<&Expr>, args: &[Expr], slots: &mut SlotAllocator) -> Ir {
    let lowered_args = || args.iter().map(|a| lower_inner(a, slots)).collect::<Vec<_>>();

    if let Some(Expr::Ident(ns)) = target {
        if EXTENSION_NAMESPACES.contains(&ns.as_ref()) {
            return Ir::Call {
                func: Rc::from(format!("{ns}.{func}").as_str()),
                target: None,
                args: lowered_args(),
            };
        }
    }

    match func.as_ref() {
        operators::AND | operators::OR if target.is_none() && args.len() == 2 => {
            let slot = slots.alloc();
            Ir::Logical {
                op: if func.as_ref() == operators::AND { operators::AND } else { operators::OR },
                slot,
                lhs: Box::new(lower_inner(&args[0], slots)),
                rhs: Box::new(lower_inner(&args[1], slots)),
            }
        }
        operators::TERNARY if target.is_none() && args.len() == 3 => Ir::Ternary {
            cond: Box::new(lower_inner(&args[0], slots)),
            t: Box::new(lower_inner(&args[1], slots)),
            f: Box::new(lower_inner(&args[2], slots)),
        },
        operators::NEG | operators::NOT | operators::NOT_STRICTLY_FALSE if target.is_none() && args.len() == 1 => {
            let op: &'static str = match func.as_ref() {
                operators::NEG => operators::NEG,
                operators::NOT => operators::NOT,
                _ => operators::NOT_STRICTLY_FALSE,
            };
            Ir::Unary { op, operand: Box::new(lower_inner(&args[0], slots)) }
        }
        operators::ADD | operators::SUB | operators::MUL | operators::DIV | operators::MOD
        | operators::EQ | operators::NE | operators::LT | operators::LE | operators::GT
        | operators::GE | operators::IN | operators::INDEX
        | operators::OPT_SELECT | operators::OPT_INDEX
            if target.is_none() && args.len() == 2 =>
        {
            let op = static_op(func.as_ref());
            Ir::Binary { op, lhs: Box::new(lower_inner(&args[0], slots)), rhs: Box::new(lower_inner(&args[1], slots)) }
        }
        _ => Ir::Call {
            func: func.clone(),
            target: target.map(|t| Box::new(lower_inner(t, slots))),
            args: lowered_args(),
        },
    }
}

fn static_op(op: &str) -> &'static str {
    match op {
        "_+_" => operators::ADD,
        "_-_" => operators::SUB,
        "_*_" => operators::MUL,
        "_/_" => operators::DIV,
        "_%_" => operators::MOD,
        "_==_" => operators::EQ,
        "_!=_" => operators::NE,
        "_<_" => operators::LT,
        "_<=_" => operators::LE,
        "_>_" => operators::GT,
        "_>=_" => operators::GE,
        "@in" => operators::IN,
        "_[_]" => operators::INDEX,
        "_?._" => operators::OPT_SELECT,
        "_[?_]" => operators::OPT_INDEX,
        _ => unreachable!("static_op called with non-binary operator"),
    }
}

/// Recognizes a `Select(Select(Ident(a), b), c)` chain and flattens it to
/// `["a", "b", "c"]`. Only a chain rooted in a plain `Ident` qualifies —
/// `f().b.c` is not a qualified path, just an ordinary select chain.
fn qualified_path(expr: &Expr) -> Option<Vec<Rc<str>>> {
    fn walk(expr: &Expr, out: &mut Vec<Rc<str>>) -> bool {
        match expr {
            Expr::Ident(name) => {
                out.push(name.clone());
                true
            }
            Expr::Select { operand, field, test_only: false } => {
                if walk(operand, out) {
                    out.push(field.clone());
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }
    // A bare identifier is a degenerate one-segment "qualified path"; we
    // leave those as `Ir::Ident` so the emitter's fast identifier path
    // still applies. Only multi-segment selects get flattened.
    if matches!(expr, Expr::Ident(_)) {
        return None;
    }
    let mut out = Vec::new();
    if walk(expr, &mut out) && out.len() > 1 {
        Some(out)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, CompileOptions};

    #[test]
    fn qualified_chain_flattens() {
        let expr = parse("a.b.c", &CompileOptions::default()).unwrap();
        let (ir, _slots) = lower(&expr);
        assert!(matches!(ir, Ir::QualifiedPath(ref v) if v.len() == 3));
    }

    #[test]
    fn logical_ops_get_slots() {
        let expr = parse("true && false", &CompileOptions::default()).unwrap();
        let (ir, slots) = lower(&expr);
        assert!(matches!(ir, Ir::Logical { .. }));
        assert_eq!(slots, 1);
    }
}
