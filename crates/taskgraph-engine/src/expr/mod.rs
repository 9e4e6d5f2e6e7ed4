//! Restricted expression language for edge conditions and node hooks.
//!
//! Expressions are parsed into a closed AST ([`parser::Expr`]) and interpreted
//! against a JSON context object. There is no assignment, no free function
//! call, and no name resolution outside the context, so an expression can only
//! read what it is handed and build new values from it.
//!
//! Two entry points apply the engine's failure policy: [`evaluate_condition`]
//! degrades any error to `false`, [`evaluate_hook`] degrades any error (or a
//! non-object result) to an empty map. Both log the failure and never abort
//! the run.

pub mod eval;
pub mod lexer;
pub mod parser;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use taskgraph_core::Metadata;

pub use eval::{truthy, Evaluator};
pub use parser::{Expr, Parser};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("lex error at {pos}: {message}")]
    Lex { pos: usize, message: String },

    #[error("parse error at {pos}: {message}")]
    Parse { pos: usize, message: String },

    #[error("evaluation error: {0}")]
    Eval(String),
}

impl ExpressionError {
    pub(crate) fn lex(pos: usize, message: impl Into<String>) -> Self {
        Self::Lex { pos, message: message.into() }
    }

    pub(crate) fn parse(pos: usize, message: impl Into<String>) -> Self {
        Self::Parse { pos, message: message.into() }
    }

    pub(crate) fn eval(message: impl Into<String>) -> Self {
        Self::Eval(message.into())
    }
}

impl From<ExpressionError> for taskgraph_core::TaskGraphError {
    fn from(e: ExpressionError) -> Self {
        taskgraph_core::TaskGraphError::Expression(e.to_string())
    }
}

/// A parsed expression together with its source text.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let ast = Parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, context: &Map<String, Value>) -> Result<Value, ExpressionError> {
        Evaluator::new(context).eval(&self.ast)
    }
}

/// Evaluate a condition to its truthiness. Errors count as `false`.
pub fn evaluate_condition(expr: &Expression, context: &Map<String, Value>) -> bool {
    match expr.evaluate(context) {
        Ok(value) => truthy(&value),
        Err(e) => {
            warn!(expr = %expr.source(), error = %e, "Condition evaluation failed, treating as false");
            false
        }
    }
}

/// Parse and evaluate a hook. Anything but an object result yields an empty map.
pub fn evaluate_hook(source: &str, context: &Map<String, Value>) -> Metadata {
    let result = Expression::parse(source).and_then(|expr| expr.evaluate(context));
    match result {
        Ok(Value::Object(map)) => map,
        Ok(Value::Null) => Metadata::new(),
        Ok(other) => {
            warn!(hook = %source, result = %other, "Hook did not return an object, ignoring");
            Metadata::new()
        }
        Err(e) => {
            warn!(hook = %source, error = %e, "Hook evaluation failed, ignoring");
            Metadata::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_condition_coerces_truthiness() {
        let c = ctx(json!({"metadata": {"score": 3}}));
        let expr = Expression::parse("metadata.score").unwrap();
        assert!(evaluate_condition(&expr, &c));
        let expr = Expression::parse("metadata.missing").unwrap();
        assert!(!evaluate_condition(&expr, &c));
    }

    #[test]
    fn test_condition_error_is_false() {
        let expr = Expression::parse("metadata.a.b === 1").unwrap();
        assert!(!evaluate_condition(&expr, &ctx(json!({"metadata": {}}))));
    }

    #[test]
    fn test_hook_returns_object() {
        let merged = evaluate_hook("({ok: true, took: elapsedMs})", &ctx(json!({"elapsedMs": 12})));
        assert_eq!(merged.get("ok"), Some(&json!(true)));
        assert_eq!(merged.get("took"), Some(&json!(12)));
    }

    #[test]
    fn test_hook_non_object_is_empty() {
        assert!(evaluate_hook("1 + 1", &Map::new()).is_empty());
        assert!(evaluate_hook("null", &Map::new()).is_empty());
    }

    #[test]
    fn test_hook_parse_error_is_empty() {
        assert!(evaluate_hook("({ok: })", &Map::new()).is_empty());
        assert!(evaluate_hook("require('fs')", &Map::new()).is_empty());
    }

    #[test]
    fn test_expression_error_converts() {
        let err: taskgraph_core::TaskGraphError = ExpressionError::eval("boom").into();
        assert!(err.to_string().contains("boom"));
    }
}
