//! Boolean expression tree and its list-form compiler (spec §4.8).
//!
//! Terms compare one named field of a [`Record`] against a literal;
//! connectives combine terms. The compiler accepts the same list-form
//! grammar spec.md §4.8 specifies (`[attr, op, value]`, `['&', ...]`, ...)
//! as a `serde_json::Value`, mirroring how the teacher's config layer
//! reads plain JSON/INI rather than inventing a parser.

use serde_json::Value as Json;

use crate::atom::{AnyAtom, AtomValue};
use crate::error::{Error, Result};
use crate::vector::{Metric, Vector};

use super::plan::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Lower,
    LowerOrEqual,
    Contains,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    IsTrue,
    NotTrue,
    IsNone,
    NotNone,
}

/// One leaf of the expression tree (spec §4.8 "Expression tree").
#[derive(Debug, Clone)]
pub enum Expr {
    True,
    False,
    Term { attr: String, op: Op, value: AtomValue },
    Unary { attr: String, op: UnaryOp },
    Between { attr: String, lo: AtomValue, hi: AtomValue, lo_inclusive: bool, hi_inclusive: bool },
    Near { attr: String, query: Vector, metric: Metric, threshold: Option<f64>, k: Option<usize> },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

fn cmp_values(a: &AtomValue, b: &AtomValue) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (AtomValue::Int(x), AtomValue::Int(y)) => x.partial_cmp(y),
        (AtomValue::Float(x), AtomValue::Float(y)) => x.partial_cmp(y),
        (AtomValue::Int(x), AtomValue::Float(y)) => (*x as f64).partial_cmp(y),
        (AtomValue::Float(x), AtomValue::Int(y)) => x.partial_cmp(&(*y as f64)),
        (AtomValue::Str(x), AtomValue::Str(y)) => Some(x.as_ref().cmp(y.as_ref())),
        (AtomValue::DateTime(x), AtomValue::DateTime(y)) => x.partial_cmp(y),
        _ => None,
    }
}

fn is_truthy(v: &AtomValue) -> bool {
    match v {
        AtomValue::Bool(b) => *b,
        AtomValue::Null => false,
        AtomValue::Int(i) => *i != 0,
        _ => true,
    }
}

impl Expr {
    /// Evaluates this expression against `record`; a missing attribute
    /// evaluates to `AtomValue::Null` (spec §3.1: "absent == None").
    pub fn eval(&self, record: &Record) -> bool {
        match self {
            Expr::True => true,
            Expr::False => false,
            Expr::Term { attr, op, value } => {
                let field = record.get_path(attr).unwrap_or(AtomValue::Null);
                match op {
                    Op::Equal => field == *value,
                    Op::NotEqual => field != *value,
                    Op::Greater => cmp_values(&field, value) == Some(std::cmp::Ordering::Greater),
                    Op::GreaterOrEqual => matches!(
                        cmp_values(&field, value),
                        Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
                    ),
                    Op::Lower => cmp_values(&field, value) == Some(std::cmp::Ordering::Less),
                    Op::LowerOrEqual => {
                        matches!(cmp_values(&field, value), Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal))
                    }
                    Op::Contains => match (&field, value) {
                        (AtomValue::Str(s), AtomValue::Str(needle)) => s.contains(needle.as_ref()),
                        _ => false,
                    },
                    Op::In => match value {
                        AtomValue::Atom(a) => match a.as_ref() {
                            crate::atom::AnyAtom::List(list) => list.iter().any(|v| v == field),
                            crate::atom::AnyAtom::Set(set) => set.has(&field),
                            _ => false,
                        },
                        _ => false,
                    },
                }
            }
            Expr::Unary { attr, op } => {
                let field = record.get_path(attr).unwrap_or(AtomValue::Null);
                match op {
                    UnaryOp::IsTrue => is_truthy(&field),
                    UnaryOp::NotTrue => !is_truthy(&field),
                    UnaryOp::IsNone => field.is_none(),
                    UnaryOp::NotNone => !field.is_none(),
                }
            }
            Expr::Between { attr, lo, hi, lo_inclusive, hi_inclusive } => {
                let field = record.get_path(attr).unwrap_or(AtomValue::Null);
                let above_lo = match cmp_values(&field, lo) {
                    Some(std::cmp::Ordering::Greater) => true,
                    Some(std::cmp::Ordering::Equal) => *lo_inclusive,
                    _ => false,
                };
                let below_hi = match cmp_values(&field, hi) {
                    Some(std::cmp::Ordering::Less) => true,
                    Some(std::cmp::Ordering::Equal) => *hi_inclusive,
                    _ => false,
                };
                above_lo && below_hi
            }
            Expr::Near { attr, query, metric, threshold, k: _ } => {
                let field = record.get_path(attr).unwrap_or(AtomValue::Null);
                let score = vector_from_value(&field).and_then(|v| v.similarity(query, *metric).ok());
                match (score, threshold) {
                    (Some(score), Some(threshold)) => score >= *threshold,
                    (Some(_), None) => true,
                    (None, _) => false,
                }
            }
            Expr::And(terms) => terms.iter().all(|t| t.eval(record)),
            Expr::Or(terms) => terms.iter().any(|t| t.eval(record)),
            Expr::Not(inner) => !inner.eval(record),
        }
    }

    /// A cheap static ordering for AND-term reordering (spec §4.8
    /// optimizer step 2: "reorder terms by a cost heuristic (cheaper
    /// first: equality < range < contains/near < arbitrary function)").
    pub fn cost_rank(&self) -> u8 {
        match self {
            Expr::Term { op: Op::Equal, .. } => 0,
            Expr::Unary { .. } => 0,
            Expr::Term { op: Op::NotEqual, .. } | Expr::Between { .. } => 1,
            Expr::Term { op: Op::Greater | Op::GreaterOrEqual | Op::Lower | Op::LowerOrEqual, .. } => 1,
            Expr::Term { op: Op::Contains | Op::In, .. } => 2,
            Expr::Near { .. } => 2,
            Expr::And(_) | Expr::Or(_) | Expr::Not(_) => 3,
            Expr::True | Expr::False => 0,
        }
    }

    /// Indexed-attribute `Term`s this expression is built from, used by
    /// the optimizer to decide whether an `AndExpression`/`OrExpression`
    /// over indexed terms can push down to `IndexedSearchPlan`/`OrMerge`.
    pub fn as_indexable_term(&self) -> Option<(&str, &AtomValue)> {
        match self {
            Expr::Term { attr, op: Op::Equal, value } => Some((attr, value)),
            _ => None,
        }
    }

    pub fn compile(value: &Json) -> Result<Expr> {
        let arr = value.as_array().ok_or_else(|| Error::validation("expression must be a JSON array"))?;
        if arr.is_empty() {
            return Err(Error::validation("empty expression array"));
        }
        if let Some(op) = arr[0].as_str() {
            match op {
                "&" => return Ok(Expr::And(arr[1..].iter().map(Expr::compile).collect::<Result<_>>()?)),
                "|" => return Ok(Expr::Or(arr[1..].iter().map(Expr::compile).collect::<Result<_>>()?)),
                "!" => {
                    let inner = arr.get(1).ok_or_else(|| Error::validation("'!' needs one operand"))?;
                    return Ok(Expr::Not(Box::new(Expr::compile(inner)?)));
                }
                _ => {}
            }
        }
        let attr = arr[0].as_str().ok_or_else(|| Error::validation("term attribute must be a string"))?.to_string();
        let op_str = arr.get(1).and_then(Json::as_str).ok_or_else(|| Error::validation("term missing operator"))?;
        match op_str {
            "?T" => Ok(Expr::Unary { attr, op: UnaryOp::IsTrue }),
            "?!T" => Ok(Expr::Unary { attr, op: UnaryOp::NotTrue }),
            "?N" => Ok(Expr::Unary { attr, op: UnaryOp::IsNone }),
            "?!N" => Ok(Expr::Unary { attr, op: UnaryOp::NotNone }),
            "between[]" | "between()" | "between[)" | "between(]" => {
                let lo = json_to_value(arr.get(2).ok_or_else(|| Error::validation("between needs lo"))?)?;
                let hi = json_to_value(arr.get(3).ok_or_else(|| Error::validation("between needs hi"))?)?;
                let lo_inclusive = op_str.starts_with("between[");
                let hi_inclusive = op_str.ends_with(']');
                Ok(Expr::Between { attr, lo, hi, lo_inclusive, hi_inclusive })
            }
            "near[]" => {
                let query = json_to_vector(arr.get(2).ok_or_else(|| Error::validation("near needs a query vector"))?)?;
                let threshold = arr.get(3).and_then(Json::as_f64);
                let k = arr.get(4).and_then(Json::as_u64).map(|k| k as usize);
                Ok(Expr::Near { attr, query, metric: Metric::Cosine, threshold, k })
            }
            _ => {
                let op = match op_str {
                    "=" | "==" => Op::Equal,
                    "!=" => Op::NotEqual,
                    ">" => Op::Greater,
                    ">=" => Op::GreaterOrEqual,
                    "<" => Op::Lower,
                    "<=" => Op::LowerOrEqual,
                    "contains" => Op::Contains,
                    "in" => Op::In,
                    other => return Err(Error::validation(format!("unsupported operator: {other}"))),
                };
                let value = json_to_value(arr.get(2).ok_or_else(|| Error::validation("term missing value"))?)?;
                Ok(Expr::Term { attr, op, value })
            }
        }
    }
}

fn json_to_value(v: &Json) -> Result<AtomValue> {
    Ok(match v {
        Json::Null => AtomValue::Null,
        Json::Bool(b) => AtomValue::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                AtomValue::Int(i)
            } else {
                AtomValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => AtomValue::str(s.clone()),
        other => return Err(Error::validation(format!("unsupported literal in expression: {other}"))),
    })
}

fn json_to_vector(v: &Json) -> Result<Vector> {
    let values: Vec<f64> = v
        .as_array()
        .ok_or_else(|| Error::validation("near query must be a JSON array"))?
        .iter()
        .map(|x| x.as_f64().ok_or_else(|| Error::validation("near query elements must be numbers")))
        .collect::<Result<_>>()?;
    Vector::from_values(values, true)
}

fn vector_from_value(v: &AtomValue) -> Option<Vector> {
    match v {
        AtomValue::Bytes(bytes) => Vector::from_bytes(bytes).ok(),
        // Loaded from storage, a `Bytes` field is a saved `AnyAtom::Bytes`
        // reference rather than a raw value (see serialize.rs), so NEAR
        // must unwrap it the same way.
        AtomValue::Atom(atom) => match atom.as_ref() {
            AnyAtom::Bytes(bytes) => Vector::from_bytes(&bytes.content).ok(),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::plan::Record;

    #[test]
    fn compiles_equality_term() {
        let expr = Expr::compile(&serde_json::json!(["name", "=", "Bob"])).unwrap();
        let mut record = Record::default();
        record.set("name", AtomValue::str("Bob"));
        assert!(expr.eval(&record));
    }

    #[test]
    fn between_exclusive_excludes_endpoints() {
        let expr = Expr::compile(&serde_json::json!(["age", "between()", 10, 20])).unwrap();
        let mut r9 = Record::default();
        r9.set("age", AtomValue::Int(10));
        assert!(!expr.eval(&r9));
        let mut r15 = Record::default();
        r15.set("age", AtomValue::Int(15));
        assert!(expr.eval(&r15));
    }

    #[test]
    fn and_expression_requires_every_term() {
        let expr = Expr::compile(&serde_json::json!(["&", ["a", "=", 1], ["b", "=", 2]])).unwrap();
        let mut record = Record::default();
        record.set("a", AtomValue::Int(1));
        record.set("b", AtomValue::Int(3));
        assert!(!expr.eval(&record));
    }

    #[test]
    fn near_matches_a_vector_field_loaded_from_storage() {
        let query = Vector::from_values(vec![1.0, 0.0], true).unwrap();
        let expr = Expr::Near {
            attr: "embedding".to_string(),
            query: query.clone(),
            metric: Metric::Cosine,
            threshold: Some(0.99),
            k: None,
        };

        // A freshly-built record still holds a raw `AtomValue::Bytes`.
        let mut fresh = Record::default();
        fresh.set("embedding", AtomValue::Bytes(std::rc::Rc::new(query.to_bytes())));
        assert!(expr.eval(&fresh));

        // A record reloaded from storage holds the same bytes wrapped as
        // an `AtomValue::Atom(AnyAtom::Bytes(..))` reference.
        let bytes_atom = crate::object_model::BytesAtom::new(query.to_bytes());
        let mut loaded = Record::default();
        loaded.set("embedding", AtomValue::Atom(std::rc::Rc::new(AnyAtom::Bytes(bytes_atom))));
        assert!(expr.eval(&loaded));
    }
}
