//! Recursive-descent expression grammar (§4.1): precedence climbing over
//! the token stream produced by [`super::lexer`]. Precedence, low to high:
//! `?:` (right-associative) < `||` < `&&` < equality < relational
//! (non-associative) < additive < multiplicative < unary < postfix.

use super::lexer::{Spanned, Token};
use crate::ast::{operators, Expr, MapEntry, StructEntry};
use crate::error::CompileError;
use std::rc::Rc;

pub struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Spanned]) -> Self {
        Parser { tokens, pos: 0 }
    }

    pub fn parse_program(&mut self) -> Result<Expr, CompileError> {
        let expr = self.ternary()?;
        self.expect_eof()?;
        Ok(expr)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].offset
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].token.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Token, what: &str) -> Result<(), CompileError> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(CompileError::parse(self.offset(), format!("expected {what}")))
        }
    }

    fn expect_eof(&mut self) -> Result<(), CompileError> {
        if matches!(self.peek(), Token::Eof) {
            Ok(())
        } else {
            Err(CompileError::parse(self.offset(), "unexpected trailing input"))
        }
    }

    // `?:` — right-associative, lazy (one branch only at runtime, both
    // parsed here).
    fn ternary(&mut self) -> Result<Expr, CompileError> {
        let cond = self.or_expr()?;
        if self.eat(&Token::Question) {
            let t = self.ternary()?;
            self.expect(&Token::Colon, "':' in ternary expression")?;
            let f = self.ternary()?;
            Ok(Expr::Call {
                func: Rc::from(operators::TERNARY),
                target: None,
                args: vec![cond, t, f],
            })
        } else {
            Ok(cond)
        }
    }

    fn or_expr(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.and_expr()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.and_expr()?;
            lhs = binary(operators::OR, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.equality()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.equality()?;
            lhs = binary(operators::AND, lhs, rhs);
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, CompileError> {
        let lhs = self.relational()?;
        if self.eat(&Token::EqEq) {
            return Ok(binary(operators::EQ, lhs, self.relational()?));
        }
        if self.eat(&Token::NotEq) {
            return Ok(binary(operators::NE, lhs, self.relational()?));
        }
        Ok(lhs)
    }

    // Relational operators are non-associative (§4.1): at most one per level.
    fn relational(&mut self) -> Result<Expr, CompileError> {
        let lhs = self.additive()?;
        let op = match self.peek() {
            Token::Lt => operators::LT,
            Token::Le => operators::LE,
            Token::Gt => operators::GT,
            Token::Ge => operators::GE,
            Token::In => operators::IN,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.additive()?;
        Ok(binary(op, lhs, rhs))
    }

    fn additive(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => operators::ADD,
                Token::Minus => operators::SUB,
                _ => break,
            };
            self.advance();
            let rhs = self.multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => operators::MUL,
                Token::Slash => operators::DIV,
                Token::Percent => operators::MOD,
                _ => break,
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, CompileError> {
        if self.eat(&Token::Minus) {
            let operand = self.unary()?;
            return Ok(Expr::Call { func: Rc::from(operators::NEG), target: None, args: vec![operand] });
        }
        if self.eat(&Token::Bang) {
            let operand = self.unary()?;
            return Ok(Expr::Call { func: Rc::from(operators::NOT), target: None, args: vec![operand] });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let field = self.ident_name()?;
                    if self.eat(&Token::LParen) {
                        let args = self.call_args()?;
                        expr = Expr::Call { func: field, target: Some(Box::new(expr)), args };
                    } else {
                        expr = Expr::Select { operand: Box::new(expr), field, test_only: false };
                    }
                }
                Token::LBracket => {
                    self.advance();
                    // `a[?b]` (§4.10): the `?` lives inside the brackets,
                    // same as the optional-entry marker in list/map/struct
                    // literals, so `[` unambiguously starts an index either
                    // way — no lookahead past it is needed to tell this
                    // apart from the ternary `?`.
                    let optional = self.eat(&Token::Question);
                    let index = self.ternary()?;
                    self.expect(&Token::RBracket, "']'")?;
                    let op = if optional { operators::OPT_INDEX } else { operators::INDEX };
                    expr = binary(op, expr, index);
                }
                Token::QuestionDot => {
                    self.advance();
                    let field = self.ident_name()?;
                    expr = binary(operators::OPT_SELECT, expr, Expr::StringLit(field));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn ident_name(&mut self) -> Result<Rc<str>, CompileError> {
        match self.advance() {
            Token::Ident(name) => Ok(name),
            _ => Err(CompileError::parse(self.offset(), "expected identifier")),
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, CompileError> {
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.ternary()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(&Token::RParen, "')'")?;
                break;
            }
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, CompileError> {
        match self.advance() {
            Token::Int(i) => Ok(Expr::IntLit(i)),
            Token::Uint(u) => Ok(Expr::UintLit(u)),
            Token::Double(d) => Ok(Expr::DoubleLit(d)),
            Token::Str(s) => Ok(Expr::StringLit(s)),
            Token::Bytes(b) => Ok(Expr::BytesLit(b)),
            Token::Bool(b) => Ok(Expr::BoolLit(b)),
            Token::Null => Ok(Expr::NullLit),
            Token::LParen => {
                let inner = self.ternary()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => self.list_literal(),
            Token::LBrace => self.map_literal(),
            Token::Ident(name) => self.ident_or_call_or_struct(name),
            _ => Err(CompileError::parse(self.offset(), "expected expression")),
        }
    }

    fn ident_or_call_or_struct(&mut self, name: Rc<str>) -> Result<Expr, CompileError> {
        if self.eat(&Token::LParen) {
            let args = self.call_args()?;
            return Ok(Expr::Call { func: name, target: None, args });
        }
        // A dotted qualified function name (`math.greatest(...)`) parses as
        // nested `Select`s by `postfix`, then gets refolded into a plain
        // identifier `Call` here only for the immediate `ident(` case above;
        // `pkg.fn(args)` instead arrives through `postfix`'s member-call arm
        // with `field` as the function name and `target` as the package
        // selection, which the IR stage flattens (§3.3 qualified paths).
        if self.eat(&Token::LBrace) {
            return self.struct_literal(name);
        }
        Ok(Expr::Ident(name))
    }

    fn list_literal(&mut self) -> Result<Expr, CompileError> {
        let mut elements = Vec::new();
        let mut optional_indices = Vec::new();
        if !self.eat(&Token::RBracket) {
            loop {
                let optional = self.eat(&Token::Question);
                let elem = self.ternary()?;
                if optional {
                    optional_indices.push(elements.len());
                }
                elements.push(elem);
                if self.eat(&Token::Comma) {
                    if self.eat(&Token::RBracket) {
                        break;
                    }
                    continue;
                }
                self.expect(&Token::RBracket, "']'")?;
                break;
            }
        }
        Ok(Expr::CreateList { elements, optional_indices })
    }

    fn map_literal(&mut self) -> Result<Expr, CompileError> {
        let mut entries = Vec::new();
        if !self.eat(&Token::RBrace) {
            loop {
                let optional = self.eat(&Token::Question);
                let key = self.ternary()?;
                self.expect(&Token::Colon, "':' in map entry")?;
                let value = self.ternary()?;
                entries.push(MapEntry { key, value, optional });
                if self.eat(&Token::Comma) {
                    if self.eat(&Token::RBrace) {
                        break;
                    }
                    continue;
                }
                self.expect(&Token::RBrace, "'}'")?;
                break;
            }
        }
        Ok(Expr::CreateMap { entries })
    }

    fn struct_literal(&mut self, message_name: Rc<str>) -> Result<Expr, CompileError> {
        let mut entries = Vec::new();
        if !self.eat(&Token::RBrace) {
            loop {
                let optional = self.eat(&Token::Question);
                let field = self.ident_name()?;
                self.expect(&Token::Colon, "':' in struct field")?;
                let value = self.ternary()?;
                entries.push(StructEntry { field, value, optional });
                if self.eat(&Token::Comma) {
                    if self.eat(&Token::RBrace) {
                        break;
                    }
                    continue;
                }
                self.expect(&Token::RBrace, "'}'")?;
                break;
            }
        }
        Ok(Expr::CreateStruct { message_name, entries })
    }
}

fn binary(op: &'static str, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Call { func: Rc::from(op), target: None, args: vec![lhs, rhs] }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::lexer::tokenize;

    fn parse(src: &str) -> Expr {
        let tokens = tokenize(src).unwrap();
        Parser::new(&tokens).parse_program().unwrap()
    }

    #[test]
    fn precedence_mul_before_add() {
        let expr = parse("1 + 2 * 3");
        assert_eq!(
            expr,
            binary(operators::ADD, Expr::IntLit(1), binary(operators::MUL, Expr::IntLit(2), Expr::IntLit(3)))
        );
    }

    #[test]
    fn ternary_is_right_associative() {
        let expr = parse("a ? 1 : b ? 2 : 3");
        match expr {
            Expr::Call { func, args, .. } if func.as_ref() == operators::TERNARY => {
                assert!(matches!(args[2], Expr::Call { .. }));
            }
            _ => panic!("expected ternary"),
        }
    }

    #[test]
    fn member_call_parses_target() {
        let expr = parse("x.size()");
        assert!(matches!(expr, Expr::Call { target: Some(_), .. }));
    }
}
