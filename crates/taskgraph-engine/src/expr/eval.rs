use serde_json::{Map, Value};

use super::parser::{BinaryOp, Expr, Method, UnaryOp};
use super::ExpressionError;

/// Tree-walking interpreter over a fixed, read-only context.
///
/// Identifiers resolve only against `context`; there is nothing else reachable.
pub struct Evaluator<'a> {
    context: &'a Map<String, Value>,
}

impl<'a> Evaluator<'a> {
    pub fn new(context: &'a Map<String, Value>) -> Self {
        Self { context }
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, ExpressionError> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Ident(name) => self
                .context
                .get(name)
                .cloned()
                .ok_or_else(|| ExpressionError::eval(format!("{} is not defined", name))),
            Expr::Member { object, property } => {
                let object = self.eval(object)?;
                member(&object, property)
            }
            Expr::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                index_value(&object, &index)
            }
            Expr::Method { object, method, args } => {
                let object = self.eval(object)?;
                let args = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                call_method(&object, *method, &args)
            }
            Expr::Unary { op, expr } => {
                let value = self.eval(expr)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                    UnaryOp::Neg => number(-as_number(&value, "-")?),
                }
            }
            Expr::Binary { op: BinaryOp::And, left, right } => {
                let left = self.eval(left)?;
                if truthy(&left) { self.eval(right) } else { Ok(left) }
            }
            Expr::Binary { op: BinaryOp::Or, left, right } => {
                let left = self.eval(left)?;
                if truthy(&left) { Ok(left) } else { self.eval(right) }
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, &left, &right)
            }
            Expr::Ternary { condition, then_expr, else_expr } => {
                if truthy(&self.eval(condition)?) {
                    self.eval(then_expr)
                } else {
                    self.eval(else_expr)
                }
            }
            Expr::Array(items) => Ok(Value::Array(
                items.iter().map(|i| self.eval(i)).collect::<Result<_, _>>()?,
            )),
            Expr::Object(fields) => {
                let mut map = Map::new();
                for (key, value) in fields {
                    map.insert(key.clone(), self.eval(value)?);
                }
                Ok(Value::Object(map))
            }
        }
    }
}

/// JavaScript-style truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Build a JSON number, keeping integral values integral.
pub(crate) fn number(n: f64) -> Result<Value, ExpressionError> {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return Ok(Value::from(n as i64));
    }
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| ExpressionError::eval(format!("{} is not a finite number", n)))
}

fn as_number(value: &Value, op: &str) -> Result<f64, ExpressionError> {
    value
        .as_f64()
        .ok_or_else(|| ExpressionError::eval(format!("'{}' needs numbers, got {}", op, type_name(value))))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn member(object: &Value, property: &str) -> Result<Value, ExpressionError> {
    match object {
        Value::Object(map) => Ok(map.get(property).cloned().unwrap_or(Value::Null)),
        Value::Array(items) if property == "length" => Ok(Value::from(items.len())),
        Value::String(s) if property == "length" => Ok(Value::from(s.chars().count())),
        Value::Null => Err(ExpressionError::eval(format!(
            "cannot read property '{}' of null",
            property
        ))),
        _ => Ok(Value::Null),
    }
}

fn index_value(object: &Value, index: &Value) -> Result<Value, ExpressionError> {
    match (object, index) {
        (Value::Null, _) => Err(ExpressionError::eval(format!(
            "cannot index null with {}",
            index
        ))),
        (_, Value::String(key)) => member(object, key),
        (Value::Array(items), Value::Number(n)) => Ok(n
            .as_u64()
            .and_then(|i| items.get(i as usize))
            .cloned()
            .unwrap_or(Value::Null)),
        (Value::String(s), Value::Number(n)) => Ok(n
            .as_u64()
            .and_then(|i| s.chars().nth(i as usize))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null)),
        _ => Ok(Value::Null),
    }
}

fn call_method(object: &Value, method: Method, args: &[Value]) -> Result<Value, ExpressionError> {
    let arg = args.first();
    match (method, object) {
        (Method::Includes, Value::String(s)) => Ok(Value::Bool(s.contains(&string_arg(arg, method)?))),
        (Method::Includes, Value::Array(items)) => {
            let needle = arg.cloned().unwrap_or(Value::Null);
            Ok(Value::Bool(items.iter().any(|i| values_equal(i, &needle))))
        }
        (Method::StartsWith, Value::String(s)) => Ok(Value::Bool(s.starts_with(&string_arg(arg, method)?))),
        (Method::EndsWith, Value::String(s)) => Ok(Value::Bool(s.ends_with(&string_arg(arg, method)?))),
        (Method::ToLowerCase, Value::String(s)) => Ok(Value::String(s.to_lowercase())),
        (Method::ToUpperCase, Value::String(s)) => Ok(Value::String(s.to_uppercase())),
        (Method::Trim, Value::String(s)) => Ok(Value::String(s.trim().to_string())),
        (method, other) => Err(ExpressionError::eval(format!(
            "{}() is not available on {}",
            method.name(),
            type_name(other)
        ))),
    }
}

fn string_arg(arg: Option<&Value>, method: Method) -> Result<String, ExpressionError> {
    match arg {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(display(other)),
        None => Err(ExpressionError::eval(format!("{}() needs an argument", method.name()))),
    }
}

/// String form used for concatenation.
fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Structural equality; numbers compare by value regardless of int/float form.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Number(_), Value::Number(_)) => {
                number(as_number(left, "+")? + as_number(right, "+")?)
            }
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(format!("{}{}", display(left), display(right))))
            }
            _ => Err(ExpressionError::eval(format!(
                "cannot add {} and {}",
                type_name(left),
                type_name(right)
            ))),
        },
        BinaryOp::Sub => number(as_number(left, "-")? - as_number(right, "-")?),
        BinaryOp::Mul => number(as_number(left, "*")? * as_number(right, "*")?),
        BinaryOp::Div => number(as_number(left, "/")? / as_number(right, "/")?),
        BinaryOp::Mod => number(as_number(left, "%")? % as_number(right, "%")?),
        // Loose and strict equality coincide: there is no implicit coercion
        BinaryOp::Eq | BinaryOp::StrictEq => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::Ne | BinaryOp::StrictNe => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => a
                    .as_f64()
                    .zip(b.as_f64())
                    .and_then(|(a, b)| a.partial_cmp(&b)),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            // Incomparable operands are never ordered, as with NaN
            let result = ordering.is_some_and(|o| match op {
                BinaryOp::Lt => o.is_lt(),
                BinaryOp::Le => o.is_le(),
                BinaryOp::Gt => o.is_gt(),
                _ => o.is_ge(),
            });
            Ok(Value::Bool(result))
        }
        BinaryOp::And => Ok(if truthy(left) { right.clone() } else { left.clone() }),
        BinaryOp::Or => Ok(if truthy(left) { left.clone() } else { right.clone() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::Parser;
    use serde_json::json;

    fn eval_with(src: &str, ctx: Value) -> Result<Value, ExpressionError> {
        let map = ctx.as_object().cloned().unwrap_or_default();
        let expr = Parser::parse(src)?;
        Evaluator::new(&map).eval(&expr)
    }

    fn eval(src: &str) -> Value {
        eval_with(src, json!({})).unwrap()
    }

    #[test]
    fn test_arithmetic_keeps_integers() {
        assert_eq!(eval("1 + 2 * 3"), json!(7));
        assert_eq!(eval("7 / 2"), json!(3.5));
        assert_eq!(eval("7 % 4"), json!(3));
        assert_eq!(eval("-(2 - 5)"), json!(3));
    }

    #[test]
    fn test_string_concat() {
        assert_eq!(eval("'a' + 1"), json!("a1"));
        assert_eq!(eval("'x' + 'y'"), json!("xy"));
    }

    #[test]
    fn test_division_by_zero_is_error() {
        assert!(eval_with("1 / 0", json!({})).is_err());
    }

    #[test]
    fn test_equality_across_number_forms() {
        assert_eq!(eval("1 === 1.0"), json!(true));
        assert_eq!(eval("'1' === 1"), json!(false));
        assert_eq!(eval("null == null"), json!(true));
        assert_eq!(eval("[1, 2] !== [1, 2]"), json!(false));
    }

    #[test]
    fn test_short_circuit_returns_operands() {
        assert_eq!(eval("null || 'fallback'"), json!("fallback"));
        assert_eq!(eval("'' && missing.deep"), json!(""));
        assert_eq!(eval("0 || false"), json!(false));
    }

    #[test]
    fn test_short_circuit_skips_failing_branch() {
        // `missing` is not defined, but never evaluated
        assert_eq!(eval("true || missing"), json!(true));
    }

    #[test]
    fn test_context_lookup() {
        let ctx = json!({
            "metadata": {"ok": true, "tags": ["x", "y"], "count": 3},
            "nodeOutputs": {"a": "all done"},
            "error": null,
        });
        assert_eq!(eval_with("metadata.ok === true", ctx.clone()).unwrap(), json!(true));
        assert_eq!(eval_with("metadata['count'] > 2", ctx.clone()).unwrap(), json!(true));
        assert_eq!(eval_with("metadata.tags[1]", ctx.clone()).unwrap(), json!("y"));
        assert_eq!(eval_with("metadata.tags.length", ctx.clone()).unwrap(), json!(2));
        assert_eq!(eval_with("metadata.missing", ctx.clone()).unwrap(), json!(null));
        assert_eq!(
            eval_with("nodeOutputs.a.includes('done')", ctx.clone()).unwrap(),
            json!(true)
        );
        assert_eq!(eval_with("!error", ctx).unwrap(), json!(true));
    }

    #[test]
    fn test_unknown_identifier_is_error() {
        let err = eval_with("process.exit", json!({})).unwrap_err();
        assert!(err.to_string().contains("process is not defined"));
    }

    #[test]
    fn test_property_of_null_is_error() {
        assert!(eval_with("metadata.a.b", json!({"metadata": {}})).is_err());
    }

    #[test]
    fn test_methods() {
        assert_eq!(eval("'  Hi '.trim().toLowerCase()"), json!("hi"));
        assert_eq!(eval("'abc'.startsWith('ab')"), json!(true));
        assert_eq!(eval("'abc'.endsWith('bc')"), json!(true));
        assert_eq!(eval("[1, 2].includes(2.0)"), json!(true));
        assert!(eval_with("(1).trim()", json!({})).is_err());
    }

    #[test]
    fn test_object_construction() {
        let ctx = json!({"metadata": {"count": 1}, "elapsedMs": 20});
        assert_eq!(
            eval_with("({count: metadata.count + 1, slow: elapsedMs > 10})", ctx).unwrap(),
            json!({"count": 2, "slow": true})
        );
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval("'a' < 'b'"), json!(true));
        assert_eq!(eval("2 >= 2"), json!(true));
        assert_eq!(eval("null < 1"), json!(false));
    }

    #[test]
    fn test_truthiness() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!("0")));
        assert!(truthy(&json!([])));
        assert!(truthy(&json!({})));
    }
}
