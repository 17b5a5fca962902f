//! Compiled predicates: evaluation against customer documents and
//! translation into document-store filter syntax.

use std::cmp::Ordering;

use audience_core::types::Customer;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::rules::Operator;

/// Right-hand side of a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    Timestamp(DateTime<Utc>),
}

/// A single `field <op> operand` test against a physical storage field.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub operand: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches no customer. Produced by an empty or fully-dropped rule list.
    Nothing,
    Condition(Condition),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// AND of `parts`, collapsing a single part to itself.
    pub fn all(mut parts: Vec<Predicate>) -> Option<Predicate> {
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Predicate::And(parts)),
        }
    }

    /// OR of `parts`, collapsing a single part to itself.
    pub fn any(mut parts: Vec<Predicate>) -> Option<Predicate> {
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Predicate::Or(parts)),
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Predicate::Nothing)
    }

    pub fn matches(&self, customer: &Customer) -> bool {
        self.matches_document(&customer.to_document())
    }

    pub fn matches_document(&self, doc: &Value) -> bool {
        match self {
            Predicate::Nothing => false,
            Predicate::Condition(condition) => condition.evaluate(doc),
            Predicate::And(parts) => parts.iter().all(|p| p.matches_document(doc)),
            Predicate::Or(parts) => parts.iter().any(|p| p.matches_document(doc)),
        }
    }

    /// Mongo-style filter document equivalent to this predicate.
    pub fn to_filter(&self) -> Value {
        match self {
            Predicate::Nothing => json!({ "$nor": [{}] }),
            Predicate::Condition(condition) => condition.to_filter(),
            Predicate::And(parts) => {
                json!({ "$and": parts.iter().map(Predicate::to_filter).collect::<Vec<_>>() })
            }
            Predicate::Or(parts) => {
                json!({ "$or": parts.iter().map(Predicate::to_filter).collect::<Vec<_>>() })
            }
        }
    }
}

impl Condition {
    pub fn evaluate(&self, doc: &Value) -> bool {
        let actual = resolve_field(doc, &self.field);
        match self.operator {
            Operator::Equals => actual.is_some_and(|a| any_element(a, |v| self.equals(v))),
            Operator::NotEquals => !actual.is_some_and(|a| any_element(a, |v| self.equals(v))),
            Operator::GreaterThan => self.ordered(actual, |o| o == Ordering::Greater),
            Operator::GreaterThanEquals => self.ordered(actual, |o| o != Ordering::Less),
            Operator::LessThan => self.ordered(actual, |o| o == Ordering::Less),
            Operator::LessThanEquals => self.ordered(actual, |o| o != Ordering::Greater),
            Operator::Contains => actual.is_some_and(|a| any_element(a, |v| self.contains(v))),
            Operator::NotContains => !actual.is_some_and(|a| any_element(a, |v| self.contains(v))),
            Operator::In => actual.is_some_and(|a| any_element(a, |v| self.in_list(v))),
        }
    }

    fn equals(&self, actual: &Value) -> bool {
        match &self.operand {
            Operand::Value(expected) => values_equal(actual, expected),
            Operand::Timestamp(ts) => parse_timestamp(actual).is_some_and(|t| t == *ts),
        }
    }

    fn ordered(&self, actual: Option<&Value>, accept: impl Fn(Ordering) -> bool) -> bool {
        actual.is_some_and(|a| {
            any_element(a, |v| compare(v, &self.operand).is_some_and(&accept))
        })
    }

    fn contains(&self, actual: &Value) -> bool {
        let needle = match &self.operand {
            Operand::Value(Value::String(needle)) => needle,
            _ => return false,
        };
        actual
            .as_str()
            .is_some_and(|s| s.to_lowercase().contains(needle.as_str()))
    }

    fn in_list(&self, actual: &Value) -> bool {
        match &self.operand {
            Operand::Value(Value::Array(list)) => list.iter().any(|e| values_equal(actual, e)),
            _ => false,
        }
    }

    fn to_filter(&self) -> Value {
        let operand = match &self.operand {
            Operand::Value(v) => v.clone(),
            Operand::Timestamp(ts) => json!({ "$date": ts.to_rfc3339() }),
        };
        let test = match self.operator {
            Operator::Equals => json!({ "$eq": operand }),
            Operator::NotEquals => json!({ "$ne": operand }),
            Operator::GreaterThan => json!({ "$gt": operand }),
            Operator::LessThan => json!({ "$lt": operand }),
            Operator::GreaterThanEquals => json!({ "$gte": operand }),
            Operator::LessThanEquals => json!({ "$lte": operand }),
            Operator::Contains => regex_filter(&operand),
            Operator::NotContains => json!({ "$not": regex_filter(&operand) }),
            Operator::In => json!({ "$in": operand }),
        };
        let mut filter = serde_json::Map::new();
        filter.insert(self.field.clone(), test);
        Value::Object(filter)
    }
}

/// Coerce a numeric-looking string into a JSON number; other values pass
/// through unchanged.
pub fn coerce_numeric(value: &Value) -> Value {
    let Some(raw) = value.as_str() else {
        return value.clone();
    };
    let trimmed = raw.trim();
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::from(int);
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| value.clone())
}

/// Look up a physical field on the customer document, falling back to the
/// free-form `attributes` map. Dotted paths descend into nested objects.
/// Null values count as missing.
fn resolve_field<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    lookup_path(doc, path)
        .or_else(|| doc.get("attributes").and_then(|attrs| lookup_path(attrs, path)))
        .filter(|v| !v.is_null())
}

fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |node, key| node.get(key))
}

/// Array-valued fields match when any element matches.
fn any_element(actual: &Value, test: impl Fn(&Value) -> bool) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(&test),
        other => test(other),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn compare(actual: &Value, operand: &Operand) -> Option<Ordering> {
    match operand {
        Operand::Timestamp(ts) => parse_timestamp(actual).map(|t| t.cmp(ts)),
        Operand::Value(expected) => match (actual, expected) {
            (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Value::String(a), Value::String(b)) => {
                match (parse_timestamp(actual), parse_timestamp(expected)) {
                    (Some(x), Some(y)) => Some(x.cmp(&y)),
                    _ => Some(a.cmp(b)),
                }
            }
            _ => None,
        },
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn regex_filter(operand: &Value) -> Value {
    let needle = operand.as_str().unwrap_or_default();
    json!({ "$regex": escape_regex(needle), "$options": "i" })
}

fn escape_regex(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
