//! Macro expansion (§4.1): `has`, `all`, `exists`, `exists_one`, `map`, and
//! `filter` all lower to a single [`Comprehension`] node. This runs as a
//! post-order rewrite over the AST the grammar already built — member calls
//! named `all`/`exists`/`exists_one`/`map`/`filter`, and plain calls named
//! `has`, are recognized by shape and rewritten; every other call is left
//! untouched as a user/extension function call.
//!
//! `optMap`/`optFlatMap` (§4.10 optional extension) are expanded the same
//! way, onto a comprehension that ranges zero or one time over the target
//! optional (see `runtime::rt_iter_len`/`rt_iter_bind`'s `Value::Optional`
//! arms) — this gets the short-circuit-on-none behavior for free from the
//! same lazy loop machinery `map`/`filter` already use, instead of adding a
//! second evaluation path.

use crate::ast::{operators, Comprehension, Expr, SYNTHETIC_RESULT};
use crate::error::CompileError;
use std::rc::Rc;

pub fn expand(expr: Expr, disable_macros: bool) -> Result<Expr, CompileError> {
    let expr = recurse_children(expr, disable_macros)?;
    if disable_macros {
        return Ok(expr);
    }
    match expr {
        Expr::Call { func, target: None, args } if func.as_ref() == "has" => expand_has(args),
        Expr::Call { func, target: Some(t), args } => expand_member_macro(&func, *t, args),
        other => Ok(other),
    }
}

fn recurse_children(expr: Expr, disable_macros: bool) -> Result<Expr, CompileError> {
    let go = |e: Expr| expand(e, disable_macros);
    Ok(match expr {
        Expr::Select { operand, field, test_only } => {
            Expr::Select { operand: Box::new(go(*operand)?), field, test_only }
        }
        Expr::Call { func, target, args } => {
            let target = target.map(|t| go(*t)).transpose()?.map(Box::new);
            let args = args.into_iter().map(go).collect::<Result<_, _>>()?;
            Expr::Call { func, target, args }
        }
        Expr::CreateList { elements, optional_indices } => Expr::CreateList {
            elements: elements.into_iter().map(go).collect::<Result<_, _>>()?,
            optional_indices,
        },
        Expr::CreateMap { entries } => Expr::CreateMap {
            entries: entries
                .into_iter()
                .map(|e| {
                    Ok::<_, CompileError>(crate::ast::MapEntry {
                        key: go(e.key)?,
                        value: go(e.value)?,
                        optional: e.optional,
                    })
                })
                .collect::<Result<_, _>>()?,
        },
        Expr::CreateStruct { message_name, entries } => Expr::CreateStruct {
            message_name,
            entries: entries
                .into_iter()
                .map(|e| {
                    Ok::<_, CompileError>(crate::ast::StructEntry {
                        field: e.field,
                        value: go(e.value)?,
                        optional: e.optional,
                    })
                })
                .collect::<Result<_, _>>()?,
        },
        Expr::Comprehension(_) => expr,
        literal_or_ident => literal_or_ident,
    })
}

fn expand_has(mut args: Vec<Expr>) -> Result<Expr, CompileError> {
    if args.len() != 1 {
        return Err(CompileError::MacroShape {
            name: "has".into(),
            message: "has() takes exactly one argument".into(),
        });
    }
    match args.remove(0) {
        Expr::Select { operand, field, test_only: false } => {
            Ok(Expr::Select { operand, field, test_only: true })
        }
        _ => Err(CompileError::MacroShape {
            name: "has".into(),
            message: "has() argument must be a field selection (a.b)".into(),
        }),
    }
}

fn ident_name(e: &Expr, macro_name: &str) -> Result<Rc<str>, CompileError> {
    match e {
        Expr::Ident(name) => Ok(name.clone()),
        _ => Err(CompileError::MacroShape {
            name: macro_name.into(),
            message: "iteration variable must be a simple identifier".into(),
        }),
    }
}

fn expand_member_macro(func: &str, target: Expr, mut args: Vec<Expr>) -> Result<Expr, CompileError> {
    let accu: Rc<str> = Rc::from(SYNTHETIC_RESULT);
    let accu_expr = || Expr::Ident(accu.clone());

    // Two-variable forms: both of the first two args are bare identifiers
    // and there are exactly three args total (§4.1).
    let two_var = args.len() == 3 && matches!(args[0], Expr::Ident(_)) && matches!(args[1], Expr::Ident(_));

    match func {
        "all" | "exists" | "exists_one" if args.len() == 2 || two_var => {
            let (iter_var, iter_var2, predicate) = if two_var {
                let v2 = ident_name(&args[1], func)?;
                let v1 = ident_name(&args[0], func)?;
                (v1, Some(v2), args.remove(2))
            } else {
                if args.len() != 2 {
                    return Err(CompileError::MacroShape {
                        name: func.into(),
                        message: format!("{func}() takes (var, predicate) or (k, v, predicate)"),
                    });
                }
                let v = ident_name(&args[0], func)?;
                (v, None, args.remove(1))
            };
            let comprehension = match func {
                "all" => Comprehension {
                    iter_var,
                    iter_var2,
                    iter_range: target,
                    accu_var: accu.clone(),
                    accu_init: Expr::BoolLit(true),
                    loop_condition: Expr::Call {
                        func: Rc::from(operators::NOT_STRICTLY_FALSE),
                        target: None,
                        args: vec![accu_expr()],
                    },
                    loop_step: Expr::Call {
                        func: Rc::from(operators::AND),
                        target: None,
                        args: vec![accu_expr(), predicate],
                    },
                    result: accu_expr(),
                },
                "exists" => Comprehension {
                    iter_var,
                    iter_var2,
                    iter_range: target,
                    accu_var: accu.clone(),
                    accu_init: Expr::BoolLit(false),
                    loop_condition: Expr::Call {
                        func: Rc::from(operators::NOT),
                        target: None,
                        args: vec![accu_expr()],
                    },
                    loop_step: Expr::Call {
                        func: Rc::from(operators::OR),
                        target: None,
                        args: vec![accu_expr(), predicate],
                    },
                    result: accu_expr(),
                },
                "exists_one" => Comprehension {
                    iter_var,
                    iter_var2,
                    iter_range: target,
                    accu_var: accu.clone(),
                    accu_init: Expr::IntLit(0),
                    loop_condition: Expr::BoolLit(true),
                    loop_step: Expr::Call {
                        func: Rc::from(operators::TERNARY),
                        target: None,
                        args: vec![
                            predicate,
                            Expr::Call {
                                func: Rc::from(operators::ADD),
                                target: None,
                                args: vec![accu_expr(), Expr::IntLit(1)],
                            },
                            accu_expr(),
                        ],
                    },
                    result: Expr::Call {
                        func: Rc::from(operators::EQ),
                        target: None,
                        args: vec![accu_expr(), Expr::IntLit(1)],
                    },
                },
                _ => unreachable!(),
            };
            Ok(Expr::Comprehension(Box::new(comprehension)))
        }
        "map" => {
            let (iter_var, iter_var2, predicate, transform) = match (args.len(), two_var) {
                (2, _) => {
                    let v = ident_name(&args[0], "map")?;
                    (v, None, None, args.remove(1))
                }
                (3, true) => {
                    let v2 = ident_name(&args[1], "map")?;
                    let v1 = ident_name(&args[0], "map")?;
                    (v1, Some(v2), None, args.remove(2))
                }
                (3, false) => {
                    let v = ident_name(&args[0], "map")?;
                    let pred = args.remove(1);
                    let t = args.remove(1);
                    (v, None, Some(pred), t)
                }
                _ => {
                    return Err(CompileError::MacroShape {
                        name: "map".into(),
                        message: "map() takes (v, T), (v, F, T), or (k, v, T)".into(),
                    })
                }
            };
            let append = append_to_accu(accu_expr(), transform);
            let loop_step = match predicate {
                Some(pred) => ternary(pred, append, accu_expr()),
                None => append,
            };
            Ok(Expr::Comprehension(Box::new(Comprehension {
                iter_var,
                iter_var2,
                iter_range: target,
                accu_var: accu.clone(),
                accu_init: Expr::CreateList { elements: vec![], optional_indices: vec![] },
                loop_condition: Expr::BoolLit(true),
                loop_step,
                result: accu_expr(),
            })))
        }
        "filter" => {
            if args.len() != 2 {
                return Err(CompileError::MacroShape {
                    name: "filter".into(),
                    message: "filter() takes (v, predicate)".into(),
                });
            }
            let iter_var = ident_name(&args[0], "filter")?;
            let predicate = args.remove(1);
            let append = append_to_accu(accu_expr(), Expr::Ident(iter_var.clone()));
            let loop_step = ternary(predicate, append, accu_expr());
            Ok(Expr::Comprehension(Box::new(Comprehension {
                iter_var,
                iter_var2: None,
                iter_range: target,
                accu_var: accu.clone(),
                accu_init: Expr::CreateList { elements: vec![], optional_indices: vec![] },
                loop_condition: Expr::BoolLit(true),
                loop_step,
                result: accu_expr(),
            })))
        }
        "optMap" | "optFlatMap" if args.len() == 2 => {
            let iter_var = ident_name(&args[0], func)?;
            let body = args.remove(1);
            let loop_step = if func == "optMap" {
                Expr::Call { func: Rc::from("optional.of"), target: None, args: vec![body] }
            } else {
                body
            };
            Ok(Expr::Comprehension(Box::new(Comprehension {
                iter_var,
                iter_var2: None,
                iter_range: target,
                accu_var: accu.clone(),
                accu_init: Expr::Call { func: Rc::from("optional.none"), target: None, args: vec![] },
                loop_condition: Expr::BoolLit(true),
                loop_step,
                result: accu_expr(),
            })))
        }
        _ => Ok(Expr::Call { func: Rc::from(func), target: Some(Box::new(target)), args }),
    }
}

fn append_to_accu(accu: Expr, value: Expr) -> Expr {
    Expr::Call {
        func: Rc::from(operators::ADD),
        target: None,
        args: vec![accu, Expr::CreateList { elements: vec![value], optional_indices: vec![] }],
    }
}

fn ternary(cond: Expr, t: Expr, f: Expr) -> Expr {
    Expr::Call { func: Rc::from(operators::TERNARY), target: None, args: vec![cond, t, f] }
}
