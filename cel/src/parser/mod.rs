//! Parser (§4.1): lex, parse into the grammar's CEL-AST, then expand
//! macros. The module layout mirrors the teacher's own `parser` module
//! (`lexer`/`grammar` replacing the teacher's ANTLR-generated `gen`, since
//! this crate hand-rolls the grammar instead of depending on
//! `antlr4rust` — see DESIGN.md for why that dependency was dropped).

mod grammar;
pub mod lexer;
mod macros;

use crate::ast::Expr;
use crate::error::CompileError;

#[derive(Clone, Debug)]
pub struct CompileOptions {
    pub disable_macros: bool,
    pub container: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions { disable_macros: false, container: String::new() }
    }
}

pub fn parse(source: &str, options: &CompileOptions) -> Result<Expr, CompileError> {
    let tokens = lexer::tokenize(source)?;
    let mut parser = grammar::Parser::new(&tokens);
    let expr = parser.parse_program()?;
    macros::expand(expr, options.disable_macros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_expands_to_test_only_select() {
        let expr = parse("has(a.b.c)", &CompileOptions::default()).unwrap();
        match expr {
            Expr::Select { test_only, field, .. } => {
                assert!(test_only);
                assert_eq!(field.as_ref(), "c");
            }
            other => panic!("expected Select, got {other:?}"),
        }
    }

    #[test]
    fn has_rejects_non_select_argument() {
        let err = parse("has(1)", &CompileOptions::default());
        assert!(matches!(err, Err(CompileError::MacroShape { .. })));
    }

    #[test]
    fn all_expands_to_comprehension() {
        let expr = parse("[1,2,3].all(x, x > 0)", &CompileOptions::default()).unwrap();
        assert!(matches!(expr, Expr::Comprehension(_)));
    }

    #[test]
    fn disable_macros_leaves_call_untouched() {
        let opts = CompileOptions { disable_macros: true, container: String::new() };
        let expr = parse("[1,2,3].all(x, x > 0)", &opts).unwrap();
        assert!(matches!(expr, Expr::Call { .. }));
    }
}
