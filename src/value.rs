//! The value universe evaluated by the interpreter (spec.md §3 "Value").
//!
//! Deliberately small and non-cyclic: no functions, no user classes, no
//! shared mutable references. Every [`Value`] is an owned tree.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{CamelError, CamelResult};

/// An insertion-ordered string-keyed map, matching Python `dict` semantics
/// (iteration order is insertion order, not sorted).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dict(Vec<(String, Value)>);

impl Dict {
    pub fn new() -> Self {
        Dict(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or overwrite `key`, preserving the original position on overwrite
    /// (Python `dict` semantics: re-assigning a key does not move it).
    pub fn insert(&mut self, key: String, value: Value) {
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.0.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter().map(|(k, v)| (k, v))
    }

    pub fn from_pairs(pairs: Vec<(String, Value)>) -> Self {
        let mut d = Dict::new();
        for (k, v) in pairs {
            d.insert(k, v);
        }
        d
    }
}

/// Tagged union of runtime values (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Dict(Dict),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Tuple(_) => "tuple",
        }
    }

    /// Python-like truthiness: empty collections/strings/zero are falsy.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(v) => !v.is_empty(),
            Value::Tuple(v) => !v.is_empty(),
            Value::Dict(d) => !d.is_empty(),
        }
    }

    /// `str(value)`: the display-text coercion used by string casts and by
    /// final-template interpolation.
    pub fn display_text(&self) -> String {
        match self {
            Value::Null => "None".to_string(),
            Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => s.clone(),
            Value::List(items) => format!(
                "[{}]",
                items.iter().map(Value::repr_text).collect::<Vec<_>>().join(", ")
            ),
            Value::Tuple(items) => {
                if items.len() == 1 {
                    format!("({},)", items[0].repr_text())
                } else {
                    format!(
                        "({})",
                        items.iter().map(Value::repr_text).collect::<Vec<_>>().join(", ")
                    )
                }
            }
            Value::Dict(d) => format!(
                "{{{}}}",
                d.iter()
                    .map(|(k, v)| format!("'{}': {}", k, v.repr_text()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    /// `repr(value)`: like `display_text` but strings are quoted.
    pub fn repr_text(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s.replace('\'', "\\'")),
            other => other.display_text(),
        }
    }

    /// Numeric coercion for arithmetic between int/float/bool.
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Bool(_))
    }

    /// Python-like equality: numeric types compare across representations
    /// (`1 == 1.0`, `True == 1`); everything else is structural.
    pub fn py_eq(&self, other: &Value) -> bool {
        if self.is_numeric() && other.is_numeric() {
            match (self, other) {
                (Value::Int(a), Value::Int(b)) => a == b,
                (Value::Bool(a), Value::Bool(b)) => a == b,
                _ => self.as_f64() == other.as_f64(),
            }
        } else {
            self == other
        }
    }

    pub fn compare(&self, other: &Value) -> CamelResult<Ordering> {
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => a
                .as_f64()
                .unwrap()
                .partial_cmp(&b.as_f64().unwrap())
                .ok_or_else(|| CamelError::runtime_trusted("cannot compare NaN")),
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.compare(y)?;
                    if ord != Ordering::Equal {
                        return Ok(ord);
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            (a, b) => Err(CamelError::runtime_trusted(format!(
                "'<' not supported between instances of '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    pub fn add(&self, other: &Value) -> CamelResult<Value> {
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => Ok(numeric_result(a, b, |x, y| x + y)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            (Value::List(a), Value::List(b)) => {
                let mut out = a.clone();
                out.extend(b.clone());
                Ok(Value::List(out))
            }
            (Value::Tuple(a), Value::Tuple(b)) => {
                let mut out = a.clone();
                out.extend(b.clone());
                Ok(Value::Tuple(out))
            }
            (a, b) => Err(CamelError::runtime_trusted(format!(
                "unsupported operand type(s) for +: '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    pub fn sub(&self, other: &Value) -> CamelResult<Value> {
        numeric_binop(self, other, "-", |x, y| x - y)
    }

    pub fn mul(&self, other: &Value) -> CamelResult<Value> {
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => Ok(numeric_result(a, b, |x, y| x * y)),
            (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
                Ok(Value::Str(s.repeat((*n).max(0) as usize)))
            }
            (Value::List(items), Value::Int(n)) | (Value::Int(n), Value::List(items)) => {
                let n = (*n).max(0) as usize;
                let mut out = Vec::with_capacity(items.len() * n);
                for _ in 0..n {
                    out.extend(items.clone());
                }
                Ok(Value::List(out))
            }
            (a, b) => Err(CamelError::runtime_trusted(format!(
                "unsupported operand type(s) for *: '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    /// Python's `/` is always true division, never floor division — `6 / 3`
    /// is `2.0`, not `2`. This language exposes no `//` operator, so `div`
    /// never collapses back to `Value::Int`.
    pub fn div(&self, other: &Value) -> CamelResult<Value> {
        let divisor = other
            .as_f64()
            .ok_or_else(|| CamelError::runtime_trusted("division requires numeric operands"))?;
        if divisor == 0.0 {
            return Err(CamelError::runtime_trusted("division by zero"));
        }
        let dividend = self
            .as_f64()
            .ok_or_else(|| CamelError::runtime_trusted("division requires numeric operands"))?;
        Ok(Value::Float(dividend / divisor))
    }

    pub fn rem(&self, other: &Value) -> CamelResult<Value> {
        let divisor = other
            .as_f64()
            .ok_or_else(|| CamelError::runtime_trusted("modulo requires numeric operands"))?;
        if divisor == 0.0 {
            return Err(CamelError::runtime_trusted("modulo by zero"));
        }
        // Python's `%` follows the divisor's sign (floor-mod), unlike
        // `rem_euclid` which is always non-negative.
        numeric_binop(self, other, "%", |x, y| x - y * (x / y).floor())
    }

    pub fn neg(&self) -> CamelResult<Value> {
        match self {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Bool(b) => Ok(Value::Int(-(*b as i64))),
            other => Err(CamelError::runtime_trusted(format!(
                "bad operand type for unary -: '{}'",
                other.type_name()
            ))),
        }
    }

    /// Converts a plain JSON value (no `exprType`/`type` tag) into a literal
    /// `Value`, used by the structured front-end to embed concrete data.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Dict(Dict::from_pairs(
                map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect(),
            )),
        }
    }

    /// `len()` builtin.
    pub fn length(&self) -> CamelResult<usize> {
        match self {
            Value::Str(s) => Ok(s.chars().count()),
            Value::List(v) | Value::Tuple(v) => Ok(v.len()),
            Value::Dict(d) => Ok(d.len()),
            other => Err(CamelError::runtime_trusted(format!(
                "object of type '{}' has no len()",
                other.type_name()
            ))),
        }
    }
}

fn numeric_result(a: &Value, b: &Value, f: impl Fn(f64, f64) -> f64) -> Value {
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        let result = f(*x as f64, *y as f64);
        if result.fract() == 0.0 && result.abs() < i64::MAX as f64 {
            return Value::Int(result as i64);
        }
        return Value::Float(result);
    }
    Value::Float(f(a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0)))
}

fn numeric_binop(
    a: &Value,
    b: &Value,
    op: &str,
    f: impl Fn(f64, f64) -> f64,
) -> CamelResult<Value> {
    if a.is_numeric() && b.is_numeric() {
        Ok(numeric_result(a, b, f))
    } else {
        Err(CamelError::runtime_trusted(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op,
            a.type_name(),
            b.type_name()
        )))
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.display_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_python() {
        assert!(!Value::Null.truthy());
        assert!(!Value::List(vec![]).truthy());
        assert!(!Value::Str(String::new()).truthy());
        assert!(Value::Int(1).truthy());
        assert!(!Value::Int(0).truthy());
    }

    #[test]
    fn py_eq_crosses_numeric_types() {
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert!(!Value::Int(2).py_eq(&Value::Float(1.0)));
    }

    #[test]
    fn string_multiplication_repeats() {
        let result = Value::Str("ab".to_string()).mul(&Value::Int(3)).unwrap();
        assert_eq!(result, Value::Str("ababab".to_string()));
    }

    #[test]
    fn division_by_zero_errors() {
        assert!(Value::Int(1).div(&Value::Int(0)).is_err());
    }

    #[test]
    fn dict_preserves_insertion_order_on_overwrite() {
        let mut d = Dict::new();
        d.insert("a".to_string(), Value::Int(1));
        d.insert("b".to_string(), Value::Int(2));
        d.insert("a".to_string(), Value::Int(3));
        let keys: Vec<&String> = d.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(d.get("a"), Some(&Value::Int(3)));
    }

    #[test]
    fn display_text_renders_python_like_literals() {
        assert_eq!(Value::Null.display_text(), "None");
        assert_eq!(Value::Bool(true).display_text(), "True");
        assert_eq!(Value::Float(2.0).display_text(), "2.0");
    }
}
