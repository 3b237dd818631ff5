//! Expression engine for field conditions
//!
//! Expressions are declared in schemas (show/hide/required/disabled
//! conditions, custom validation, business rules, workflow transitions)
//! and evaluated against the current form values.
//!
//! Named rules live in the schema and are referenced with [`Expr::Rule`].
//! Rule references are resolved lazily, so a cycle is only reported when
//! an evaluation actually walks into it.

use crate::{Error, Result, Value, ValueMap};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Maximum nesting depth for a single evaluation
pub const MAX_EVAL_DEPTH: usize = 64;

/// A predicate or computation over form values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Value),

    // === References ===
    /// Current value of a form field
    Field(String),
    /// A named rule declared in the schema
    Rule(String),

    // === Arithmetic ===
    // Integer when both sides are integers, float otherwise
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    /// Always produces a float
    Div(Box<Expr>, Box<Expr>),
    /// Remainder
    Mod(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),

    // === Comparison ===
    /// Equality; ints and floats compare numerically
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    /// Ordering of numbers, strings or dates
    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),

    // === Logical ===
    // Operands are reduced with `Value::is_truthy`; And/Or short-circuit
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    /// Condition, then-branch, else-branch
    If(Box<Expr>, Box<Expr>, Box<Expr>),

    // === Form helpers ===
    /// True when the value is not filled in
    IsEmpty(Box<Expr>),
    /// Length of a string, list or map
    Len(Box<Expr>),
    /// True when the value equals one of the listed values
    OneOf(Box<Expr>, Vec<Value>),
    /// Substring test for strings, membership test for lists
    Contains(Box<Expr>, Box<Expr>),
    /// Join the display text of each operand
    Concat(Vec<Expr>),
}

/// Values and named rules an expression is evaluated against
pub struct EvalContext<'a> {
    pub data: &'a ValueMap,
    pub rules: &'a IndexMap<String, Expr>,
    /// Rules currently being evaluated, outermost first
    stack: Vec<String>,
    depth: usize,
}

impl<'a> EvalContext<'a> {
    pub fn new(data: &'a ValueMap, rules: &'a IndexMap<String, Expr>) -> Self {
        Self {
            data,
            rules,
            stack: Vec::new(),
            depth: 0,
        }
    }

    fn enter_rule(&mut self, name: &str) -> Result<&'a Expr> {
        if self.stack.iter().any(|active| active == name) {
            let chain = self
                .stack
                .iter()
                .map(String::as_str)
                .chain([name])
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(Error::CyclicRule(chain));
        }
        let rules = self.rules;
        let rule = rules
            .get(name)
            .ok_or_else(|| Error::UnknownRule(name.to_string()))?;
        self.stack.push(name.to_string());
        Ok(rule)
    }
}

impl Expr {
    /// Evaluate against `ctx`
    ///
    /// Fails on references to undeclared fields or rules, type mismatches,
    /// division by zero, rule cycles and nesting deeper than
    /// [`MAX_EVAL_DEPTH`].
    pub fn eval(&self, ctx: &mut EvalContext) -> Result<Value> {
        if ctx.depth >= MAX_EVAL_DEPTH {
            return Err(Error::DepthExceeded(MAX_EVAL_DEPTH));
        }
        ctx.depth += 1;
        let result = self.eval_inner(ctx);
        ctx.depth -= 1;
        result
    }

    /// Evaluate and reduce to a boolean using truthiness
    pub fn eval_bool(&self, ctx: &mut EvalContext) -> Result<bool> {
        Ok(self.eval(ctx)?.is_truthy())
    }

    fn eval_inner(&self, ctx: &mut EvalContext) -> Result<Value> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Field(name) => ctx
                .data
                .get(name)
                .cloned()
                .ok_or_else(|| Error::UnknownField(name.clone())),
            Expr::Rule(name) => {
                let rule = ctx.enter_rule(name)?;
                let result = rule.eval(ctx);
                ctx.stack.pop();
                result
            }

            Expr::Add(lhs, rhs)
            | Expr::Sub(lhs, rhs)
            | Expr::Mul(lhs, rhs)
            | Expr::Div(lhs, rhs)
            | Expr::Mod(lhs, rhs) => {
                let left = lhs.eval(ctx)?;
                let right = rhs.eval(ctx)?;
                self.arithmetic(&left, &right)
            }
            Expr::Neg(operand) => match operand.eval(ctx)? {
                Value::Int(n) => n
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| Error::InvalidOperation(format!("integer overflow: -{}", n))),
                Value::Float(x) => Ok(Value::Float(-x)),
                other => Err(Error::type_error("number", &other)),
            },

            Expr::Eq(lhs, rhs) | Expr::Ne(lhs, rhs) => {
                let left = lhs.eval(ctx)?;
                let equal = values_equal(&left, &rhs.eval(ctx)?);
                Ok(Value::Bool(equal == matches!(self, Expr::Eq(..))))
            }
            Expr::Lt(lhs, rhs) | Expr::Le(lhs, rhs) | Expr::Gt(lhs, rhs) | Expr::Ge(lhs, rhs) => {
                let left = lhs.eval(ctx)?;
                let ordering = compare_values(&left, &rhs.eval(ctx)?)?;
                Ok(Value::Bool(self.accepts(ordering)))
            }

            Expr::And(terms) => {
                for term in terms {
                    if !term.eval_bool(ctx)? {
                        return Ok(false.into());
                    }
                }
                Ok(true.into())
            }
            Expr::Or(terms) => {
                for term in terms {
                    if term.eval_bool(ctx)? {
                        return Ok(true.into());
                    }
                }
                Ok(false.into())
            }
            Expr::Not(operand) => Ok(Value::Bool(!operand.eval_bool(ctx)?)),
            Expr::If(condition, then_branch, else_branch) => {
                let branch = if condition.eval_bool(ctx)? {
                    then_branch
                } else {
                    else_branch
                };
                branch.eval(ctx)
            }

            Expr::IsEmpty(operand) => Ok(Value::Bool(operand.eval(ctx)?.is_empty())),
            Expr::Len(operand) => match operand.eval(ctx)? {
                Value::Null => Ok(Value::Int(0)),
                value => value
                    .len()
                    .map(|n| Value::Int(n as i64))
                    .ok_or_else(|| Error::type_error("string, list or map", &value)),
            },
            Expr::OneOf(operand, choices) => {
                let value = operand.eval(ctx)?;
                Ok(Value::Bool(choices.iter().any(|c| values_equal(&value, c))))
            }
            Expr::Contains(haystack, needle) => {
                let within = haystack.eval(ctx)?;
                let sought = needle.eval(ctx)?;
                match (&within, &sought) {
                    (Value::String(text), Value::String(part)) => {
                        Ok(Value::Bool(text.contains(part.as_str())))
                    }
                    (Value::List(items), _) => {
                        Ok(Value::Bool(items.iter().any(|item| values_equal(item, &sought))))
                    }
                    (Value::Null, _) => Ok(Value::Bool(false)),
                    _ => Err(Error::type_error("string or list", &within)),
                }
            }
            // Null contributes nothing since it displays as blank
            Expr::Concat(parts) => parts
                .iter()
                .map(|part| part.eval(ctx).map(|value| value.to_string()))
                .collect::<Result<String>>()
                .map(Value::String),
        }
    }

    fn arithmetic(&self, left: &Value, right: &Value) -> Result<Value> {
        match self {
            Expr::Add(..) => numeric_op(left, right, i64::checked_add, |x, y| x + y),
            Expr::Sub(..) => numeric_op(left, right, i64::checked_sub, |x, y| x - y),
            Expr::Mul(..) => numeric_op(left, right, i64::checked_mul, |x, y| x * y),
            Expr::Div(..) => {
                let dividend = number(left)?;
                match number(right)? {
                    divisor if divisor == 0.0 => Err(Error::DivisionByZero),
                    divisor => Ok(Value::Float(dividend / divisor)),
                }
            }
            Expr::Mod(..) if right.as_float() == Some(0.0) => Err(Error::DivisionByZero),
            Expr::Mod(..) => numeric_op(left, right, i64::checked_rem, |x, y| x % y),
            other => Err(Error::InvalidOperation(format!(
                "not an arithmetic expression: {:?}",
                other
            ))),
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Expr::Lt(..) => ordering.is_lt(),
            Expr::Le(..) => ordering.is_le(),
            Expr::Gt(..) => ordering.is_gt(),
            Expr::Ge(..) => ordering.is_ge(),
            _ => false,
        }
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn field(name: impl Into<String>) -> Self {
        Expr::Field(name.into())
    }

    pub fn rule(name: impl Into<String>) -> Self {
        Expr::Rule(name.into())
    }

    /// `field == value`
    pub fn field_eq(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Expr::Eq(Box::new(Expr::field(name)), Box::new(Expr::lit(value)))
    }

    /// Apply `f` to every field name this expression references
    ///
    /// Rule references are not followed.
    pub fn visit_fields_mut(&mut self, f: &mut dyn FnMut(&mut String)) {
        match self {
            Expr::Literal(_) | Expr::Rule(_) => {}
            Expr::Field(name) => f(name),
            Expr::Neg(a) | Expr::Not(a) | Expr::IsEmpty(a) | Expr::Len(a) | Expr::OneOf(a, _) => {
                a.visit_fields_mut(f)
            }
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::Mod(a, b)
            | Expr::Eq(a, b)
            | Expr::Ne(a, b)
            | Expr::Lt(a, b)
            | Expr::Le(a, b)
            | Expr::Gt(a, b)
            | Expr::Ge(a, b)
            | Expr::Contains(a, b) => {
                a.visit_fields_mut(f);
                b.visit_fields_mut(f);
            }
            Expr::If(c, t, e) => {
                c.visit_fields_mut(f);
                t.visit_fields_mut(f);
                e.visit_fields_mut(f);
            }
            Expr::And(exprs) | Expr::Or(exprs) | Expr::Concat(exprs) => {
                for expr in exprs {
                    expr.visit_fields_mut(f);
                }
            }
        }
    }
}

fn number(value: &Value) -> Result<f64> {
    value
        .as_float()
        .ok_or_else(|| Error::type_error("number", value))
}

/// Integer arithmetic when both sides are integers, float otherwise
fn numeric_op(
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    if let (Value::Int(x), Value::Int(y)) = (left, right) {
        return int_op(*x, *y)
            .map(Value::Int)
            .ok_or_else(|| Error::InvalidOperation(format!("integer overflow: {} and {}", x, y)));
    }
    Ok(Value::Float(float_op(number(left)?, number(right)?)))
}

/// Order two values of compatible types (numbers, strings, dates)
pub fn compare_values(a: &Value, b: &Value) -> Result<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Ok(x.cmp(y)),
        _ => number(a)?
            .partial_cmp(&number(b)?)
            .ok_or_else(|| Error::InvalidOperation("cannot compare NaN".to_string())),
    }
}

/// Equality with ints and floats treated as one numeric domain
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Float(x), Value::Float(y)) => (x - y).abs() < f64::EPSILON,
        (Value::Int(n), Value::Float(x)) | (Value::Float(x), Value::Int(n)) => {
            (*n as f64 - x).abs() < f64::EPSILON
        }
        (Value::List(xs), Value::List(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Map(xs), Value::Map(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}
