//! Expression evaluator for CHECK constraints, row filters and assignments.
//!
//! Supports a small expression language:
//! - Column comparisons: `age >= 0`, `price <> 0`
//! - Null checks: `email IS NOT NULL`, `middle_name IS NULL`
//! - IN lists: `status IN ('active', 'pending')`, `i NOT IN (1, 2)`
//! - Boolean operators: `AND`, `OR`, `NOT`
//! - Arithmetic: `i + 1`, `price * 2`
//! - Parentheses for grouping
//!
//! Predicates use SQL three-valued logic; comparisons involving NULL are unknown.

use std::cmp::Ordering;
use std::collections::HashMap;

use thiserror::Error;

use crate::catalog::TableDef;
use crate::value::Value;

/// Errors that can occur during expression evaluation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvaluationError {
    /// Unknown column referenced in expression.
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// Type mismatch in comparison or arithmetic.
    #[error("type mismatch: cannot combine {left_type} with {right_type}")]
    TypeMismatch {
        /// Left operand type.
        left_type: String,
        /// Right operand type.
        right_type: String,
    },

    /// Invalid expression syntax.
    #[error("invalid expression syntax: {0}")]
    InvalidSyntax(String),

    /// Division by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Integer overflow.
    #[error("integer overflow")]
    Overflow,
}

/// Result of a predicate under three-valued logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    fn from_bool(b: bool) -> Self {
        if b {
            Truth::True
        } else {
            Truth::False
        }
    }

    fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }

    fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }

    /// Row qualifies for a WHERE clause.
    pub fn is_true(self) -> bool {
        self == Truth::True
    }

    /// Row fails a CHECK constraint.
    pub fn is_false(self) -> bool {
        self == Truth::False
    }
}

/// Source of column values for an expression.
pub trait ColumnScope {
    /// Value of the named column, or `None` if no such column exists.
    fn column(&self, name: &str) -> Option<Value>;
}

/// A table row viewed through its table definition.
pub struct RowScope<'a> {
    table: &'a TableDef,
    row: &'a [Value],
}

impl<'a> RowScope<'a> {
    pub fn new(table: &'a TableDef, row: &'a [Value]) -> Self {
        Self { table, row }
    }
}

impl ColumnScope for RowScope<'_> {
    fn column(&self, name: &str) -> Option<Value> {
        let idx = self.table.column_index(name)?;
        Some(self.row.get(idx).cloned().unwrap_or(Value::Null))
    }
}

impl ColumnScope for HashMap<String, Value> {
    fn column(&self, name: &str) -> Option<Value> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }
}

/// Expression evaluator.
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    /// Evaluate a boolean expression. An empty expression is true.
    pub fn predicate(expression: &str, scope: &dyn ColumnScope) -> Result<Truth, EvaluationError> {
        let expr = expression.trim();
        if expr.is_empty() {
            return Ok(Truth::True);
        }
        Self::eval_predicate(expr, scope)
    }

    /// Evaluate a scalar expression.
    pub fn scalar(expression: &str, scope: &dyn ColumnScope) -> Result<Value, EvaluationError> {
        let expr = expression.trim();
        if expr.is_empty() {
            return Err(EvaluationError::InvalidSyntax("empty expression".into()));
        }
        Self::eval_scalar(expr, scope)
    }

    /// Check syntax and column references of a predicate against a table.
    pub fn validate_predicate(expression: &str, table: &TableDef) -> Result<(), EvaluationError> {
        let nulls = vec![Value::Null; table.columns.len()];
        Self::predicate(expression, &RowScope::new(table, &nulls)).map(|_| ())
    }

    /// Check syntax and column references of a scalar expression against a table.
    pub fn validate_scalar(expression: &str, table: &TableDef) -> Result<(), EvaluationError> {
        let nulls = vec![Value::Null; table.columns.len()];
        Self::scalar(expression, &RowScope::new(table, &nulls)).map(|_| ())
    }

    fn eval_predicate(expr: &str, scope: &dyn ColumnScope) -> Result<Truth, EvaluationError> {
        let expr = expr.trim();

        if let Some(inner) = Self::strip_outer_parens(expr) {
            return Self::eval_predicate(inner, scope);
        }

        // OR binds loosest
        if let Some((left, right)) = Self::split_at_operator(expr, " OR ") {
            let l = Self::eval_predicate(left, scope)?;
            let r = Self::eval_predicate(right, scope)?;
            return Ok(l.or(r));
        }

        if let Some((left, right)) = Self::split_at_operator(expr, " AND ") {
            let l = Self::eval_predicate(left, scope)?;
            let r = Self::eval_predicate(right, scope)?;
            return Ok(l.and(r));
        }

        if Self::starts_with_keyword(expr, "NOT ") {
            return Ok(Self::eval_predicate(&expr[4..], scope)?.not());
        }

        if let Some(operand) = Self::strip_suffix_keyword(expr, " IS NOT NULL") {
            return Ok(Truth::from_bool(!Self::eval_scalar(operand, scope)?.is_null()));
        }

        if let Some(operand) = Self::strip_suffix_keyword(expr, " IS NULL") {
            return Ok(Truth::from_bool(Self::eval_scalar(operand, scope)?.is_null()));
        }

        if let Some((left, right)) = Self::split_at_operator(expr, " NOT IN ") {
            return Ok(Self::eval_in(left, right, scope)?.not());
        }

        if let Some((left, right)) = Self::split_at_operator(expr, " IN ") {
            return Self::eval_in(left, right, scope);
        }

        if let Some(truth) = Self::eval_comparison(expr, scope)? {
            return Ok(truth);
        }

        // Bare boolean operand: TRUE, FALSE or a boolean column
        match Self::eval_scalar(expr, scope)? {
            Value::Bool(b) => Ok(Truth::from_bool(b)),
            Value::Null => Ok(Truth::Unknown),
            other => Err(EvaluationError::InvalidSyntax(format!(
                "expected a boolean expression, found {} in: {}",
                other.type_name(),
                expr
            ))),
        }
    }

    fn eval_in(left: &str, list: &str, scope: &dyn ColumnScope) -> Result<Truth, EvaluationError> {
        let list = list.trim();
        let inner = list
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| EvaluationError::InvalidSyntax(format!("malformed IN list: {}", list)))?;

        let value = Self::eval_scalar(left, scope)?;
        let mut saw_null = value.is_null();
        let mut found = false;
        for item in Self::split_list(inner) {
            let candidate = Self::eval_scalar(item, scope)?;
            match value.compare(&candidate) {
                Some(Ordering::Equal) => found = true,
                Some(_) => {}
                None if candidate.is_null() || value.is_null() => saw_null = true,
                None => return Err(Self::mismatch(&value, &candidate)),
            }
        }

        Ok(if found {
            Truth::True
        } else if saw_null {
            Truth::Unknown
        } else {
            Truth::False
        })
    }

    fn eval_comparison(
        expr: &str,
        scope: &dyn ColumnScope,
    ) -> Result<Option<Truth>, EvaluationError> {
        // Longer operators first so `<=` is not taken for `<`
        let operators: &[(&str, fn(Ordering) -> bool)] = &[
            (">=", |ord| ord != Ordering::Less),
            ("<=", |ord| ord != Ordering::Greater),
            ("!=", |ord| ord != Ordering::Equal),
            ("<>", |ord| ord != Ordering::Equal),
            ("=", |ord| ord == Ordering::Equal),
            (">", |ord| ord == Ordering::Greater),
            ("<", |ord| ord == Ordering::Less),
        ];

        for (op, predicate) in operators {
            if let Some((left, right)) = Self::split_at_operator(expr, op) {
                let l = Self::eval_scalar(left, scope)?;
                let r = Self::eval_scalar(right, scope)?;
                if l.is_null() || r.is_null() {
                    return Ok(Some(Truth::Unknown));
                }
                return match l.compare(&r) {
                    Some(ord) => Ok(Some(Truth::from_bool(predicate(ord)))),
                    None => Err(Self::mismatch(&l, &r)),
                };
            }
        }
        Ok(None)
    }

    fn eval_scalar(expr: &str, scope: &dyn ColumnScope) -> Result<Value, EvaluationError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(EvaluationError::InvalidSyntax("missing operand".into()));
        }

        if let Some(inner) = Self::strip_outer_parens(expr) {
            return Self::eval_scalar(inner, scope);
        }

        for ops in [&['+', '-'][..], &['*', '/'][..]] {
            if let Some((left, op, right)) = Self::split_arithmetic(expr, ops) {
                let l = Self::eval_scalar(left, scope)?;
                let r = Self::eval_scalar(right, scope)?;
                return Self::arithmetic(l, op, r);
            }
        }

        Self::resolve_value(expr, scope)
    }

    fn arithmetic(l: Value, op: char, r: Value) -> Result<Value, EvaluationError> {
        if l.is_null() || r.is_null() {
            return Ok(Value::Null);
        }
        match (&l, &r) {
            (Value::Int(a), Value::Int(b)) => {
                let result = match op {
                    '+' => a.checked_add(*b),
                    '-' => a.checked_sub(*b),
                    '*' => a.checked_mul(*b),
                    _ => {
                        if *b == 0 {
                            return Err(EvaluationError::DivisionByZero);
                        }
                        a.checked_div(*b)
                    }
                };
                result.map(Value::Int).ok_or(EvaluationError::Overflow)
            }
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                let a = Self::as_f64(&l);
                let b = Self::as_f64(&r);
                let result = match op {
                    '+' => a + b,
                    '-' => a - b,
                    '*' => a * b,
                    _ => {
                        if b == 0.0 {
                            return Err(EvaluationError::DivisionByZero);
                        }
                        a / b
                    }
                };
                Ok(Value::Float(result))
            }
            _ => Err(Self::mismatch(&l, &r)),
        }
    }

    fn as_f64(value: &Value) -> f64 {
        match value {
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            _ => 0.0,
        }
    }

    fn mismatch(l: &Value, r: &Value) -> EvaluationError {
        EvaluationError::TypeMismatch {
            left_type: l.type_name().to_string(),
            right_type: r.type_name().to_string(),
        }
    }

    /// Resolve a literal or a column reference.
    fn resolve_value(s: &str, scope: &dyn ColumnScope) -> Result<Value, EvaluationError> {
        let s = s.trim();

        if s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'') {
            return Ok(Value::String(s[1..s.len() - 1].replace("''", "'")));
        }

        if s.eq_ignore_ascii_case("NULL") {
            return Ok(Value::Null);
        }
        if s.eq_ignore_ascii_case("TRUE") {
            return Ok(Value::Bool(true));
        }
        if s.eq_ignore_ascii_case("FALSE") {
            return Ok(Value::Bool(false));
        }

        if s.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.') {
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Value::Int(i));
            }
            if let Ok(f) = s.parse::<f64>() {
                return Ok(Value::Float(f));
            }
            return Err(EvaluationError::InvalidSyntax(format!("bad number: {}", s)));
        }

        if let Some(rest) = s.strip_prefix('-') {
            return Self::arithmetic(Value::Int(0), '-', Self::resolve_value(rest, scope)?);
        }

        if !s.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(EvaluationError::InvalidSyntax(format!(
                "cannot parse expression: {}",
                s
            )));
        }

        scope
            .column(s)
            .ok_or_else(|| EvaluationError::UnknownColumn(s.to_ascii_uppercase()))
    }

    /// Inner text if the whole expression is wrapped in one pair of parentheses.
    fn strip_outer_parens(expr: &str) -> Option<&str> {
        let inner = expr.strip_prefix('(')?.strip_suffix(')')?;
        if Self::parens_balanced(inner) {
            Some(inner)
        } else {
            None
        }
    }

    /// Check if parentheses are balanced, ignoring quoted text.
    fn parens_balanced(s: &str) -> bool {
        let mut depth = 0i32;
        let mut in_string = false;
        for c in s.chars() {
            match c {
                '\'' => in_string = !in_string,
                '(' if !in_string => depth += 1,
                ')' if !in_string => {
                    depth -= 1;
                    if depth < 0 {
                        return false;
                    }
                }
                _ => {}
            }
        }
        depth == 0 && !in_string
    }

    /// Split expression at the first top-level occurrence of `op`.
    fn split_at_operator<'a>(expr: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
        let mut depth = 0i32;
        let mut in_string = false;

        for (i, c) in expr.char_indices() {
            match c {
                '\'' => in_string = !in_string,
                '(' if !in_string => depth += 1,
                ')' if !in_string => depth -= 1,
                _ => {}
            }

            if depth == 0 && !in_string {
                let matches = expr
                    .get(i..i + op.len())
                    .is_some_and(|s| s.eq_ignore_ascii_case(op));
                if matches {
                    let left = expr[..i].trim();
                    let right = expr[i + op.len()..].trim();
                    return Some((left, right));
                }
            }
        }
        None
    }

    /// Split at the last top-level binary arithmetic operator from `ops`.
    fn split_arithmetic<'a>(expr: &'a str, ops: &[char]) -> Option<(&'a str, char, &'a str)> {
        let mut depth = 0i32;
        let mut in_string = false;
        let mut prev: Option<char> = None;
        let mut found = None;

        for (i, c) in expr.char_indices() {
            match c {
                '\'' => in_string = !in_string,
                '(' if !in_string => depth += 1,
                ')' if !in_string => depth -= 1,
                _ if depth == 0 && !in_string && ops.contains(&c) => {
                    // a sign directly after an operator or at the start is unary
                    let binary = matches!(prev, Some(p) if !"+-*/(".contains(p));
                    if binary {
                        found = Some((i, c));
                    }
                }
                _ => {}
            }
            if !c.is_whitespace() {
                prev = Some(c);
            }
        }

        found.map(|(i, op)| (expr[..i].trim(), op, expr[i + 1..].trim()))
    }

    /// Split a comma separated list at top level.
    fn split_list(s: &str) -> Vec<&str> {
        let mut items = Vec::new();
        let mut depth = 0i32;
        let mut in_string = false;
        let mut start = 0;
        for (i, c) in s.char_indices() {
            match c {
                '\'' => in_string = !in_string,
                '(' if !in_string => depth += 1,
                ')' if !in_string => depth -= 1,
                ',' if !in_string && depth == 0 => {
                    items.push(s[start..i].trim());
                    start = i + 1;
                }
                _ => {}
            }
        }
        let last = s[start..].trim();
        if !last.is_empty() {
            items.push(last);
        }
        items
    }

    fn starts_with_keyword(expr: &str, keyword: &str) -> bool {
        expr.get(..keyword.len())
            .is_some_and(|s| s.eq_ignore_ascii_case(keyword))
    }

    fn strip_suffix_keyword<'a>(expr: &'a str, keyword: &str) -> Option<&'a str> {
        let split = expr.len().checked_sub(keyword.len())?;
        let tail = expr.get(split..)?;
        if tail.eq_ignore_ascii_case(keyword) {
            Some(&expr[..split])
        } else {
            None
        }
    }
}
