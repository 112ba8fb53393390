//! Filter compilation: JSON `where` objects into predicate lists.

use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::query::Record;

/// Comparison operator of a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
    NotIn,
    IsNull,
    NotNull,
}

impl Operator {
    fn from_key(key: &str) -> Option<Self> {
        match key.trim_start_matches('$') {
            "eq" => Some(Operator::Eq),
            "ne" => Some(Operator::Ne),
            "gt" => Some(Operator::Gt),
            "gte" => Some(Operator::Gte),
            "lt" => Some(Operator::Lt),
            "lte" => Some(Operator::Lte),
            "like" => Some(Operator::Like),
            "in" => Some(Operator::In),
            "notIn" => Some(Operator::NotIn),
            _ => None,
        }
    }
}

/// A single column predicate; a where clause is their conjunction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Predicate {
    pub column: String,
    pub operator: Operator,
    pub value: Value,
}

impl Predicate {
    pub fn new(column: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            column: column.into(),
            operator,
            value,
        }
    }

    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::new(column, Operator::Eq, value)
    }

    /// Evaluate against a plain record; a missing column reads as null.
    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.get(&self.column).unwrap_or(&Value::Null);
        match self.operator {
            Operator::IsNull => actual.is_null(),
            Operator::NotNull => !actual.is_null(),
            Operator::Eq => values_equal(actual, &self.value),
            Operator::Ne => !actual.is_null() && !values_equal(actual, &self.value),
            Operator::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            Operator::Gte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            Operator::Lte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Like => match (actual, &self.value) {
                (Value::String(text), Value::String(pattern)) => like(text, pattern),
                _ => false,
            },
            Operator::In => list(&self.value).iter().any(|v| values_equal(actual, v)),
            Operator::NotIn => {
                !actual.is_null() && !list(&self.value).iter().any(|v| values_equal(actual, v))
            }
        }
    }
}

/// Where clause carried by driver options
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "clause", rename_all = "camelCase")]
pub enum WhereClause {
    /// Conjunction of compiled predicates
    Predicates(Vec<Predicate>),
    /// Legacy filter, passed through untouched
    Raw(Value),
}

impl WhereClause {
    /// Identifier equality filter
    pub fn id(id: Value) -> Self {
        WhereClause::Predicates(vec![Predicate::eq("id", id)])
    }

    /// Predicates of this clause; a raw object is compiled like a modern filter.
    ///
    /// Raw strings are driver-specific fragments and have no predicate form.
    pub fn predicates(&self) -> Result<Vec<Predicate>> {
        match self {
            WhereClause::Predicates(predicates) => Ok(predicates.clone()),
            WhereClause::Raw(Value::Object(map)) => compile_filters(map),
            WhereClause::Raw(Value::Null) => Ok(Vec::new()),
            WhereClause::Raw(other) => Err(Error::InvalidQuery(format!(
                "legacy filter {other} cannot be evaluated as predicates"
            ))),
        }
    }
}

/// Compile a `where` object.
///
/// Scalars become equality, `null` IS NULL, arrays IN, and objects a set of
/// operator predicates (`{"gt": 3, "lte": 9}`).
pub fn compile_filters(filter: &Map<String, Value>) -> Result<Vec<Predicate>> {
    let mut predicates = Vec::with_capacity(filter.len());
    for (column, value) in filter {
        match value {
            Value::Null => predicates.push(Predicate::new(column, Operator::IsNull, Value::Null)),
            Value::Array(_) => predicates.push(Predicate::new(column, Operator::In, value.clone())),
            Value::Object(ops) => {
                if ops.is_empty() {
                    return Err(Error::InvalidQuery(format!(
                        "empty operator object for column {column}"
                    )));
                }
                for (key, operand) in ops {
                    let operator = Operator::from_key(key).ok_or_else(|| {
                        Error::InvalidQuery(format!("unknown operator {key} for column {column}"))
                    })?;
                    predicates.push(compile_operator(column, operator, operand)?);
                }
            }
            scalar => predicates.push(Predicate::eq(column, scalar.clone())),
        }
    }
    Ok(predicates)
}

fn compile_operator(column: &str, operator: Operator, operand: &Value) -> Result<Predicate> {
    match (operator, operand) {
        (Operator::Eq, Value::Null) => Ok(Predicate::new(column, Operator::IsNull, Value::Null)),
        (Operator::Ne, Value::Null) => Ok(Predicate::new(column, Operator::NotNull, Value::Null)),
        (Operator::In | Operator::NotIn, Value::Array(_)) => {
            Ok(Predicate::new(column, operator, operand.clone()))
        }
        (Operator::In | Operator::NotIn, _) => Err(Error::InvalidQuery(format!(
            "operator on column {column} expects an array"
        ))),
        (Operator::Like, Value::String(_)) => Ok(Predicate::new(column, operator, operand.clone())),
        (Operator::Like, _) => Err(Error::InvalidQuery(format!(
            "like on column {column} expects a string pattern"
        ))),
        _ => Ok(Predicate::new(column, operator, operand.clone())),
    }
}

/// All predicates match the record
pub fn matches_all(predicates: &[Predicate], record: &Record) -> bool {
    predicates.iter().all(|predicate| predicate.matches(record))
}

/// Equality that treats `1` and `1.0` as the same number
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering between two JSON scalars of the same family; nulls sort first.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn list(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or(&[])
}

/// SQL LIKE matching: `%` any run of characters, `_` exactly one.
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(c) if *c == '_' || *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((bp, bt)) => {
                    p = bp + 1;
                    t = bt + 1;
                    backtrack = Some((bp, bt + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_compile_shapes() {
        let predicates = compile_filters(&filter(json!({
            "status": "open",
            "deletedAt": null,
            "kind": ["a", "b"],
            "age": {"gte": 18, "$lt": 65}
        })))
        .unwrap();

        assert_eq!(
            predicates,
            vec![
                Predicate::eq("status", json!("open")),
                Predicate::new("deletedAt", Operator::IsNull, Value::Null),
                Predicate::new("kind", Operator::In, json!(["a", "b"])),
                Predicate::new("age", Operator::Gte, json!(18)),
                Predicate::new("age", Operator::Lt, json!(65)),
            ]
        );
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let err = compile_filters(&filter(json!({"age": {"between": [1, 2]}}))).unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));

        let err = compile_filters(&filter(json!({"age": {"in": 3}}))).unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[test]
    fn test_eq_null_becomes_is_null() {
        let predicates = compile_filters(&filter(json!({"a": {"eq": null}, "b": {"ne": null}}))).unwrap();
        assert_eq!(predicates[0].operator, Operator::IsNull);
        assert_eq!(predicates[1].operator, Operator::NotNull);
    }

    #[test]
    fn test_predicate_matching() {
        let row = record(json!({"age": 30, "name": "Ada Lovelace", "tag": null}));
        assert!(Predicate::eq("age", json!(30.0)).matches(&row));
        assert!(Predicate::new("age", Operator::Gt, json!(18)).matches(&row));
        assert!(!Predicate::new("age", Operator::Lt, json!(18)).matches(&row));
        assert!(Predicate::new("name", Operator::Like, json!("Ada%")).matches(&row));
        assert!(Predicate::new("name", Operator::Like, json!("%Love_ace")).matches(&row));
        assert!(!Predicate::new("name", Operator::Like, json!("Love%")).matches(&row));
        assert!(Predicate::new("tag", Operator::IsNull, Value::Null).matches(&row));
        assert!(Predicate::new("missing", Operator::IsNull, Value::Null).matches(&row));
        assert!(Predicate::new("age", Operator::In, json!([1, 30])).matches(&row));
        assert!(!Predicate::new("tag", Operator::Ne, json!("x")).matches(&row));
        assert!(!Predicate::new("tag", Operator::NotIn, json!(["x"])).matches(&row));
    }

    #[test]
    fn test_raw_clause_predicates() {
        let raw = WhereClause::Raw(json!({"owner": 7}));
        assert_eq!(raw.predicates().unwrap(), vec![Predicate::eq("owner", json!(7))]);

        let fragment = WhereClause::Raw(json!("owner = 7"));
        assert!(fragment.predicates().is_err());
    }

    #[test]
    fn test_like_edge_cases() {
        assert!(like("", "%"));
        assert!(like("abc", "a%c"));
        assert!(like("abc", "%%"));
        assert!(like("aXbXc", "a%b%c"));
        assert!(!like("abc", "a_"));
        assert!(!like("", "_"));
    }
}
