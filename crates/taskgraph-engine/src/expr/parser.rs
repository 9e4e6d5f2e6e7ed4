use std::fmt;

use serde_json::Value;

use super::lexer::{Lexer, Spanned, Token};
use super::ExpressionError;

/// Expression AST. Everything an expression can do is listed here.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Top-level name, resolved only against the evaluation context.
    Ident(String),
    Member { object: Box<Expr>, property: String },
    Index { object: Box<Expr>, index: Box<Expr> },
    Method { object: Box<Expr>, method: Method, args: Vec<Expr> },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Ternary { condition: Box<Expr>, then_expr: Box<Expr>, else_expr: Box<Expr> },
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::StrictEq => "===",
            BinaryOp::StrictNe => "!==",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        write!(f, "{}", s)
    }
}

/// The only methods an expression may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Includes,
    StartsWith,
    EndsWith,
    ToLowerCase,
    ToUpperCase,
    Trim,
}

impl Method {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "includes" => Some(Method::Includes),
            "startsWith" => Some(Method::StartsWith),
            "endsWith" => Some(Method::EndsWith),
            "toLowerCase" => Some(Method::ToLowerCase),
            "toUpperCase" => Some(Method::ToUpperCase),
            "trim" => Some(Method::Trim),
            _ => None,
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Method::Includes | Method::StartsWith | Method::EndsWith => 1,
            Method::ToLowerCase | Method::ToUpperCase | Method::Trim => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Method::Includes => "includes",
            Method::StartsWith => "startsWith",
            Method::EndsWith => "endsWith",
            Method::ToLowerCase => "toLowerCase",
            Method::ToUpperCase => "toUpperCase",
            Method::Trim => "trim",
        }
    }
}

/// Recursive-descent parser, lowest precedence first:
/// ternary, `||`, `&&`, equality, comparison, additive, multiplicative, unary, postfix.
pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

const MAX_DEPTH: usize = 64;

impl Parser {
    pub fn parse(src: &str) -> Result<Expr, ExpressionError> {
        let tokens = Lexer::new(src).tokenize()?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expression(0)?;
        match parser.peek() {
            Token::Eof => Ok(expr),
            other => Err(parser.error(format!("unexpected '{}' after expression", other))),
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        let pos = self.tokens[self.pos.min(self.tokens.len() - 1)].pos;
        ExpressionError::parse(pos, message)
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found '{}'", expected, self.peek())))
        }
    }

    fn expression(&mut self, depth: usize) -> Result<Expr, ExpressionError> {
        if depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        self.ternary(depth + 1)
    }

    fn ternary(&mut self, depth: usize) -> Result<Expr, ExpressionError> {
        let condition = self.or(depth)?;
        if *self.peek() != Token::Question {
            return Ok(condition);
        }
        self.advance();
        let then_expr = self.expression(depth)?;
        self.expect(Token::Colon)?;
        let else_expr = self.expression(depth)?;
        Ok(Expr::Ternary {
            condition: Box::new(condition),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        })
    }

    fn or(&mut self, depth: usize) -> Result<Expr, ExpressionError> {
        let mut left = self.and(depth)?;
        while *self.peek() == Token::OrOr {
            self.advance();
            let right = self.and(depth)?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and(&mut self, depth: usize) -> Result<Expr, ExpressionError> {
        let mut left = self.equality(depth)?;
        while *self.peek() == Token::AndAnd {
            self.advance();
            let right = self.equality(depth)?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn equality(&mut self, depth: usize) -> Result<Expr, ExpressionError> {
        let mut left = self.comparison(depth)?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::Ne,
                Token::EqEqEq => BinaryOp::StrictEq,
                Token::NotEqEq => BinaryOp::StrictNe,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.comparison(depth)?;
            left = binary(op, left, right);
        }
    }

    fn comparison(&mut self, depth: usize) -> Result<Expr, ExpressionError> {
        let mut left = self.additive(depth)?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.additive(depth)?;
            left = binary(op, left, right);
        }
    }

    fn additive(&mut self, depth: usize) -> Result<Expr, ExpressionError> {
        let mut left = self.multiplicative(depth)?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative(depth)?;
            left = binary(op, left, right);
        }
    }

    fn multiplicative(&mut self, depth: usize) -> Result<Expr, ExpressionError> {
        let mut left = self.unary(depth)?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary(depth)?;
            left = binary(op, left, right);
        }
    }

    fn unary(&mut self, depth: usize) -> Result<Expr, ExpressionError> {
        let op = match self.peek() {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            _ => return self.postfix(depth),
        };
        if depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        self.advance();
        let expr = self.unary(depth + 1)?;
        Ok(Expr::Unary { op, expr: Box::new(expr) })
    }

    fn postfix(&mut self, depth: usize) -> Result<Expr, ExpressionError> {
        let mut expr = self.primary(depth)?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let property = match self.advance() {
                        Token::Ident(name) => name,
                        // Keywords are valid property names: `metadata.true`
                        Token::Null => "null".to_string(),
                        Token::True => "true".to_string(),
                        Token::False => "false".to_string(),
                        other => {
                            return Err(self.error(format!("expected property name, found '{}'", other)))
                        }
                    };
                    if *self.peek() == Token::LParen {
                        let method = Method::from_name(&property).ok_or_else(|| {
                            self.error(format!("method '{}' is not allowed", property))
                        })?;
                        self.advance();
                        let args = self.arguments(depth)?;
                        if args.len() != method.arity() {
                            return Err(self.error(format!(
                                "{}() takes {} argument(s), got {}",
                                method.name(),
                                method.arity(),
                                args.len()
                            )));
                        }
                        expr = Expr::Method { object: Box::new(expr), method, args };
                    } else {
                        expr = Expr::Member { object: Box::new(expr), property };
                    }
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.expression(depth)?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index { object: Box::new(expr), index: Box::new(index) };
                }
                Token::LParen => {
                    return Err(self.error("function calls are not supported"));
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Comma-separated arguments after an opening paren, consuming the closing one.
    fn arguments(&mut self, depth: usize) -> Result<Vec<Expr>, ExpressionError> {
        let mut args = Vec::new();
        while *self.peek() != Token::RParen {
            args.push(self.expression(depth)?);
            if *self.peek() == Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(Token::RParen)?;
        Ok(args)
    }

    fn primary(&mut self, depth: usize) -> Result<Expr, ExpressionError> {
        match self.advance() {
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Number(n) => {
                let value = super::eval::number(n).map_err(|e| self.error(e.to_string()))?;
                Ok(Expr::Literal(value))
            }
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Ident(name) => Ok(Expr::Ident(name)),
            Token::LParen => {
                let expr = self.expression(depth)?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                while *self.peek() != Token::RBracket {
                    items.push(self.expression(depth)?);
                    if *self.peek() == Token::Comma {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expect(Token::RBracket)?;
                Ok(Expr::Array(items))
            }
            Token::LBrace => {
                let mut fields = Vec::new();
                while *self.peek() != Token::RBrace {
                    let key = match self.advance() {
                        Token::Ident(name) | Token::Str(name) => name,
                        Token::Null => "null".to_string(),
                        Token::True => "true".to_string(),
                        Token::False => "false".to_string(),
                        other => {
                            return Err(self.error(format!("expected object key, found '{}'", other)))
                        }
                    };
                    self.expect(Token::Colon)?;
                    let value = self.expression(depth)?;
                    fields.push((key, value));
                    if *self.peek() == Token::Comma {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expect(Token::RBrace)?;
                Ok(Expr::Object(fields))
            }
            Token::Eof => Err(self.error("unexpected end of expression")),
            other => Err(self.error(format!("unexpected '{}'", other))),
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary { op, left: Box::new(left), right: Box::new(right) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(name.into()))
    }

    #[test]
    fn test_member_chain() {
        let expr = Parser::parse("metadata.ok").unwrap();
        assert_eq!(
            expr,
            Expr::Member { object: ident("metadata"), property: "ok".into() }
        );
    }

    #[test]
    fn test_precedence_and_over_or() {
        let expr = Parser::parse("a || b && c").unwrap();
        match expr {
            Expr::Binary { op: BinaryOp::Or, right, .. } => {
                assert!(matches!(*right, Expr::Binary { op: BinaryOp::And, .. }));
            }
            other => panic!("unexpected ast: {:?}", other),
        }
    }

    #[test]
    fn test_comparison_binds_tighter_than_equality() {
        let expr = Parser::parse("a < b === true").unwrap();
        match expr {
            Expr::Binary { op: BinaryOp::StrictEq, left, .. } => {
                assert!(matches!(*left, Expr::Binary { op: BinaryOp::Lt, .. }));
            }
            other => panic!("unexpected ast: {:?}", other),
        }
    }

    #[test]
    fn test_object_literal_with_trailing_comma() {
        let expr = Parser::parse("({ ok: true, 'count': 2, })").unwrap();
        assert_eq!(
            expr,
            Expr::Object(vec![
                ("ok".into(), Expr::Literal(json!(true))),
                ("count".into(), Expr::Literal(json!(2))),
            ])
        );
    }

    #[test]
    fn test_index_and_method() {
        let expr = Parser::parse(r#"nodeOutputs["a"].includes("done")"#).unwrap();
        match expr {
            Expr::Method { method: Method::Includes, object, args } => {
                assert!(matches!(*object, Expr::Index { .. }));
                assert_eq!(args.len(), 1);
            }
            other => panic!("unexpected ast: {:?}", other),
        }
    }

    #[test]
    fn test_ternary() {
        let expr = Parser::parse("error ? 'bad' : 'good'").unwrap();
        assert!(matches!(expr, Expr::Ternary { .. }));
    }

    #[test]
    fn test_disallowed_method_rejected() {
        let err = Parser::parse("metadata.constructor()").unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }

    #[test]
    fn test_free_function_call_rejected() {
        assert!(Parser::parse("eval('1')").is_err());
    }

    #[test]
    fn test_wrong_arity_rejected() {
        assert!(Parser::parse("output.includes()").is_err());
        assert!(Parser::parse("output.trim(1)").is_err());
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        assert!(Parser::parse("a b").is_err());
        assert!(Parser::parse("(a").is_err());
        assert!(Parser::parse("").is_err());
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let src = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert!(Parser::parse(&src).is_err());
    }
}
