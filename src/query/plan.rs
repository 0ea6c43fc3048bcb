//! Query plan tree (spec §4.8): a composable tree of plan nodes,
//! evaluated bottom-up into a `Vec<Record>`. Execution is implemented as
//! a recursive interpreter (`execute`) rather than a lazy iterator
//! pipeline — the engine still exposes the pull-based contract spec §5
//! describes at the outermost boundary (`Transaction`/caller consumes an
//! iterator over the materialized rows and can stop early by dropping
//! it), but every intermediate stage is a plain `Vec` for clarity, the
//! same simplification `rdms::llrb::mvcc` makes for its snapshot reads
//! versus a hand-rolled lazy merge iterator.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::atom::{AnyAtom, AtomValue};
use crate::collections::index_registry::IndexRegistry;
use crate::collections::list::List;
use crate::error::Result;
use crate::vector::{Metric, Vector, VectorIndex};

use super::expr::Expr;

/// One field of a [`Record`]: either a scalar or a nested sub-record
/// (produced by an aliased `FromPlan`/`JoinPlan` side), so dotted paths
/// (`UnnestPlan`'s `path`, a joined side's `alias.field`) resolve
/// uniformly.
#[derive(Debug, Clone)]
pub enum Field {
    Value(AtomValue),
    Nested(Record),
}

impl Field {
    pub fn from_element(value: &AtomValue) -> Field {
        match value {
            AtomValue::Atom(a) => match a.as_ref() {
                AnyAtom::Object(obj) => {
                    let mut record = Record::default();
                    for (k, v) in obj.attributes.iter() {
                        record.set(k, v.clone());
                    }
                    Field::Nested(record)
                }
                _ => Field::Value(value.clone()),
            },
            _ => Field::Value(value.clone()),
        }
    }
}

/// A query result row: a flat or nested map of field name to value
/// (spec §4.8's implicit "record" concept — plan nodes consume and
/// produce these).
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: BTreeMap<String, Field>,
}

impl Record {
    pub fn set(&mut self, name: impl Into<String>, value: AtomValue) {
        self.fields.insert(name.into(), Field::Value(value));
    }

    pub fn set_field(&mut self, name: impl Into<String>, field: Field) {
        self.fields.insert(name.into(), field);
    }

    pub fn get(&self, name: &str) -> Option<AtomValue> {
        match self.fields.get(name) {
            Some(Field::Value(v)) => Some(v.clone()),
            _ => None,
        }
    }

    /// Resolves a dotted path (`"alias.field"`) through nested records
    /// (spec §4.8 Unnest: "traverse the dotted path").
    pub fn get_path(&self, path: &str) -> Option<AtomValue> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.fields.get(first)?;
        for part in parts {
            match current {
                Field::Nested(r) => current = r.fields.get(part)?,
                Field::Value(_) => return None,
            }
        }
        match current {
            Field::Value(v) => Some(v.clone()),
            Field::Nested(_) => None,
        }
    }

    /// Merges `other`'s fields in, `other` winning on collision (used by
    /// join execution to combine both sides' flat fields when no alias
    /// is given).
    pub fn merged_with(&self, other: &Record) -> Record {
        let mut out = self.clone();
        for (k, v) in other.fields.iter() {
            out.fields.insert(k.clone(), v.clone());
        }
        out
    }

    pub fn from_flat_element(value: &AtomValue) -> Record {
        match Field::from_element(value) {
            Field::Nested(record) => record,
            Field::Value(v) => {
                let mut record = Record::default();
                record.set("_value", v);
                record
            }
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Outer,
    External,
    ExternalLeft,
    ExternalRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregator {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub output: String,
    pub source_field: String,
    pub aggregator: Aggregator,
}

#[derive(Debug, Clone)]
pub struct OrderKey {
    pub field: String,
    pub ascending: bool,
}

/// A query plan node (spec §4.8). `based_on` links form the plan tree;
/// the optimizer (`super::optimizer`) rewrites a subset of shapes before
/// `execute` runs.
#[derive(Clone)]
pub enum PlanNode {
    ListScan { list: List },
    From { alias: Option<String>, based_on: Box<PlanNode> },
    Where { filter: Expr, based_on: Box<PlanNode> },
    IndexedQuery { indexes: IndexRegistry, based_on: Box<PlanNode> },
    IndexedSearch { indexes: IndexRegistry, index_name: String, key: AtomValue },
    OrMerge { queries: Vec<PlanNode> },
    Join { base_field: String, join_field: String, join_type: JoinType, join_query: Box<PlanNode>, based_on: Box<PlanNode> },
    GroupBy { group_fields: Vec<String>, aggregates: Vec<AggregateSpec>, based_on: Box<PlanNode> },
    Select { fields: Vec<String>, based_on: Box<PlanNode> },
    OrderBy { keys: Vec<OrderKey>, based_on: Box<PlanNode> },
    Having { filter: Expr, based_on: Box<PlanNode> },
    Limit { n: usize, based_on: Box<PlanNode> },
    Offset { n: usize, based_on: Box<PlanNode> },
    Unnest { path: String, alias: Option<String>, based_on: Box<PlanNode> },
    CollectionField { name: String, builder: Rc<dyn Fn(&Record) -> PlanNode>, based_on: Box<PlanNode> },
    Count { based_on: Box<PlanNode> },
    CountResult { n: usize },
    VectorSearch { index: Rc<dyn VectorIndex>, query: Vector, k: Option<usize>, threshold: Option<f64>, metric: Metric },
}

impl std::fmt::Debug for PlanNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PlanNode({})", self.kind_name())
    }
}

impl PlanNode {
    pub fn kind_name(&self) -> &'static str {
        match self {
            PlanNode::ListScan { .. } => "ListScan",
            PlanNode::From { .. } => "From",
            PlanNode::Where { .. } => "Where",
            PlanNode::IndexedQuery { .. } => "IndexedQuery",
            PlanNode::IndexedSearch { .. } => "IndexedSearch",
            PlanNode::OrMerge { .. } => "OrMerge",
            PlanNode::Join { .. } => "Join",
            PlanNode::GroupBy { .. } => "GroupBy",
            PlanNode::Select { .. } => "Select",
            PlanNode::OrderBy { .. } => "OrderBy",
            PlanNode::Having { .. } => "Having",
            PlanNode::Limit { .. } => "Limit",
            PlanNode::Offset { .. } => "Offset",
            PlanNode::Unnest { .. } => "Unnest",
            PlanNode::CollectionField { .. } => "CollectionField",
            PlanNode::Count { .. } => "Count",
            PlanNode::CountResult { .. } => "CountResult",
            PlanNode::VectorSearch { .. } => "VectorSearch",
        }
    }

    /// Whether this plan exposes a cheap `count()` without iterating
    /// every row (spec §4.8 Count: "if the underlying optimized plan
    /// exposes a fast `count()`").
    pub fn fast_count(&self) -> Option<usize> {
        match self {
            PlanNode::ListScan { list } => Some(list.len()),
            PlanNode::IndexedSearch { indexes, index_name, key } => {
                indexes.lookup(index_name, key).map(|s| s.len())
            }
            PlanNode::From { based_on, .. } => based_on.fast_count(),
            PlanNode::CountResult { n } => Some(*n),
            _ => None,
        }
    }

    /// Predicate push-down hook (spec §4.8 optimizer step 1): plans over
    /// an index registry accept a `Term`/`OrExpression` of indexed terms
    /// and rewrite themselves; everything else returns `None` so the
    /// caller falls back to a generic `Where`.
    pub fn accept_filter(&self, filter: &Expr) -> Option<PlanNode> {
        match self {
            PlanNode::IndexedQuery { indexes, based_on } => {
                if let Some((attr, value)) = filter.as_indexable_term() {
                    if indexes.index_names().contains(&attr) {
                        return Some(PlanNode::IndexedSearch {
                            indexes: indexes.clone(),
                            index_name: attr.to_string(),
                            key: value.clone(),
                        });
                    }
                }
                if let Expr::Or(terms) = filter {
                    let mut searches = Vec::with_capacity(terms.len());
                    for term in terms {
                        let (attr, value) = term.as_indexable_term()?;
                        if !indexes.index_names().contains(&attr) {
                            return None;
                        }
                        searches.push(PlanNode::IndexedSearch {
                            indexes: indexes.clone(),
                            index_name: attr.to_string(),
                            key: value.clone(),
                        });
                    }
                    return Some(PlanNode::OrMerge { queries: searches });
                }
                let _ = based_on;
                None
            }
            _ => None,
        }
    }

    pub fn execute(&self) -> Result<Vec<Record>> {
        Ok(match self {
            PlanNode::ListScan { list } => list.iter().map(|v| Record::from_flat_element(&v)).collect(),
            PlanNode::From { alias, based_on } => {
                let rows = based_on.execute()?;
                match alias {
                    None => rows,
                    Some(alias) => rows
                        .into_iter()
                        .map(|r| {
                            let mut out = Record::default();
                            out.set_field(alias.clone(), Field::Nested(r));
                            out
                        })
                        .collect(),
                }
            }
            PlanNode::Where { filter, based_on } => {
                based_on.execute()?.into_iter().filter(|r| filter.eval(r)).collect()
            }
            PlanNode::IndexedQuery { based_on, .. } => based_on.execute()?,
            PlanNode::IndexedSearch { indexes, index_name, key } => indexes
                .lookup(index_name, key)
                .map(|set| set.iter().map(|v| Record::from_flat_element(&v)).collect())
                .unwrap_or_default(),
            PlanNode::OrMerge { queries } => {
                let mut seen: Vec<AtomValue> = Vec::new();
                let mut out = Vec::new();
                for q in queries {
                    for row in q.execute()? {
                        if let Some(v) = row.get("_value").or_else(|| row.get_path("id")) {
                            if seen.iter().any(|s| *s == v) {
                                continue;
                            }
                            seen.push(v);
                        }
                        out.push(row);
                    }
                }
                out
            }
            PlanNode::Join { base_field, join_field, join_type, join_query, based_on } => {
                execute_join(based_on, join_query, base_field, join_field, *join_type)?
            }
            PlanNode::GroupBy { group_fields, aggregates, based_on } => {
                execute_group_by(&based_on.execute()?, group_fields, aggregates)
            }
            PlanNode::Select { fields, based_on } => based_on
                .execute()?
                .into_iter()
                .map(|r| {
                    let mut out = Record::default();
                    for f in fields {
                        if let Some(v) = r.get_path(f) {
                            out.set(f.clone(), v);
                        }
                    }
                    out
                })
                .collect(),
            PlanNode::OrderBy { keys, based_on } => {
                let mut rows = based_on.execute()?;
                rows.sort_by(|a, b| {
                    for key in keys {
                        let av = a.get_path(&key.field).unwrap_or(AtomValue::Null);
                        let bv = b.get_path(&key.field).unwrap_or(AtomValue::Null);
                        let ord = compare_for_order(&av, &bv);
                        let ord = if key.ascending { ord } else { ord.reverse() };
                        if ord != std::cmp::Ordering::Equal {
                            return ord;
                        }
                    }
                    std::cmp::Ordering::Equal
                });
                rows
            }
            PlanNode::Having { filter, based_on } => {
                based_on.execute()?.into_iter().filter(|r| filter.eval(r)).collect()
            }
            PlanNode::Limit { n, based_on } => {
                based_on.execute()?.into_iter().take(*n).collect()
            }
            PlanNode::Offset { n, based_on } => {
                based_on.execute()?.into_iter().skip(*n).collect()
            }
            PlanNode::Unnest { path, alias, based_on } => {
                let mut out = Vec::new();
                for row in based_on.execute()? {
                    match row.get_path(path) {
                        Some(AtomValue::Atom(a)) => match a.as_ref() {
                            AnyAtom::List(list) => unnest_into(&mut out, &row, alias, list.iter()),
                            AnyAtom::Set(set) => unnest_into(&mut out, &row, alias, set.iter()),
                            _ => out.push(row),
                        },
                        _ => {}
                    }
                }
                out
            }
            PlanNode::CollectionField { name, builder, based_on } => {
                let mut out = Vec::new();
                for row in based_on.execute()? {
                    let sub_plan = builder(&row);
                    let values: Vec<AtomValue> =
                        sub_plan.execute()?.into_iter().filter_map(|r| r.get("_value")).collect();
                    let mut row = row.clone();
                    row.set_field(name.clone(), Field::Value(AtomValue::Atom(Rc::new(AnyAtom::List(List::from_vec(values))))));
                    out.push(row);
                }
                out
            }
            PlanNode::Count { based_on } => {
                let n = based_on.fast_count().unwrap_or_else(|| based_on.execute().map(|r| r.len()).unwrap_or(0));
                vec![count_record(n)]
            }
            PlanNode::CountResult { n } => vec![count_record(*n)],
            PlanNode::VectorSearch { index, query, k, threshold, metric: _ } => {
                let hits = match k {
                    Some(k) => index.search(query, *k)?,
                    None => index.range_search(query, threshold.unwrap_or(0.0))?,
                };
                hits.into_iter()
                    .map(|hit| {
                        let mut r = Record::default();
                        r.set("id", AtomValue::Int(hit.id));
                        r.set("score", AtomValue::Float(hit.score));
                        r
                    })
                    .collect()
            }
        })
    }
}

fn count_record(n: usize) -> Record {
    let mut r = Record::default();
    r.set("count", AtomValue::Int(n as i64));
    r
}

fn unnest_into(out: &mut Vec<Record>, row: &Record, alias: &Option<String>, values: impl Iterator<Item = AtomValue>) {
    for v in values {
        match alias {
            Some(alias) => {
                let mut r = row.clone();
                r.set_field(alias.clone(), Field::from_element(&v));
                out.push(r);
            }
            None => out.push(Record::from_flat_element(&v)),
        }
    }
}

fn compare_for_order(a: &AtomValue, b: &AtomValue) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (AtomValue::Int(x), AtomValue::Int(y)) => x.cmp(y),
        (AtomValue::Float(x), AtomValue::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (AtomValue::Str(x), AtomValue::Str(y)) => x.as_ref().cmp(y.as_ref()),
        (AtomValue::Null, AtomValue::Null) => Ordering::Equal,
        (AtomValue::Null, _) => Ordering::Less,
        (_, AtomValue::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn as_f64(v: &AtomValue) -> Option<f64> {
    match v {
        AtomValue::Int(i) => Some(*i as f64),
        AtomValue::Float(f) => Some(*f),
        _ => None,
    }
}

/// Groups rows by `group_fields` and reduces each group with its
/// aggregators (spec §4.8 GroupBy: "Missing source fields are treated as
/// zero for Sum/Avg and skipped for Min/Max").
fn execute_group_by(rows: &[Record], group_fields: &[String], aggregates: &[AggregateSpec]) -> Vec<Record> {
    let mut groups: Vec<(Vec<AtomValue>, Vec<&Record>)> = Vec::new();
    for row in rows {
        let key: Vec<AtomValue> = group_fields.iter().map(|f| row.get_path(f).unwrap_or(AtomValue::Null)).collect();
        match groups.iter_mut().find(|(k, _)| k == &key) {
            Some((_, members)) => members.push(row),
            None => groups.push((key, vec![row])),
        }
    }
    groups
        .into_iter()
        .map(|(key, members)| {
            let mut out = Record::default();
            for (field, value) in group_fields.iter().zip(key) {
                out.set(field.clone(), value);
            }
            for spec in aggregates {
                let values: Vec<f64> = members.iter().filter_map(|m| m.get_path(&spec.source_field).and_then(|v| as_f64(&v))).collect();
                let result = match spec.aggregator {
                    Aggregator::Count => AtomValue::Int(members.len() as i64),
                    Aggregator::Sum => AtomValue::Float(values.iter().sum()),
                    Aggregator::Avg => {
                        let present = members.len().max(1) as f64;
                        AtomValue::Float(values.iter().sum::<f64>() / present)
                    }
                    Aggregator::Min => match values.iter().cloned().fold(None, |acc: Option<f64>, v| match acc {
                        None => Some(v),
                        Some(a) => Some(a.min(v)),
                    }) {
                        Some(v) => AtomValue::Float(v),
                        None => AtomValue::Null,
                    },
                    Aggregator::Max => match values.iter().cloned().fold(None, |acc: Option<f64>, v| match acc {
                        None => Some(v),
                        Some(a) => Some(a.max(v)),
                    }) {
                        Some(v) => AtomValue::Float(v),
                        None => AtomValue::Null,
                    },
                };
                out.set(spec.output.clone(), result);
            }
            out
        })
        .collect()
}

/// Implements every spec §4.8 join variant over an equality predicate
/// between `base_field` (left/"based_on" side) and `join_field`
/// (right/"join_query" side).
fn execute_join(
    based_on: &PlanNode,
    join_query: &PlanNode,
    base_field: &str,
    join_field: &str,
    join_type: JoinType,
) -> Result<Vec<Record>> {
    let left = based_on.execute()?;
    let right = join_query.execute()?;
    let mut out = Vec::new();
    let mut right_matched = vec![false; right.len()];

    for l in &left {
        let lv = l.get_path(base_field);
        let mut matched = false;
        for (ri, r) in right.iter().enumerate() {
            let rv = r.get_path(join_field);
            if lv.is_some() && lv == rv {
                matched = true;
                right_matched[ri] = true;
                if !matches!(join_type, JoinType::Outer) {
                    out.push(l.merged_with(r));
                }
            }
        }
        if !matched && matches!(join_type, JoinType::Left | JoinType::Outer | JoinType::External | JoinType::ExternalLeft) {
            out.push(l.clone());
        }
    }

    if matches!(join_type, JoinType::Right | JoinType::Outer | JoinType::External | JoinType::ExternalRight) {
        for (ri, r) in right.iter().enumerate() {
            if !right_matched[ri] {
                out.push(r.clone());
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomValue;
    use crate::object_model::DBObject;

    fn obj_row(name: &str, age: i64) -> AtomValue {
        let obj = DBObject::new().with_attr("name", AtomValue::str(name)).with_attr("age", AtomValue::Int(age));
        AtomValue::Atom(Rc::new(AnyAtom::Object(obj)))
    }

    #[test]
    fn list_scan_then_where_filters_rows() {
        let list = List::from_vec(vec![obj_row("Bob", 30), obj_row("Alice", 25)]);
        let plan = PlanNode::Where {
            filter: Expr::compile(&serde_json::json!(["name", "=", "Bob"])).unwrap(),
            based_on: Box::new(PlanNode::ListScan { list }),
        };
        let rows = plan.execute().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name").unwrap().as_str(), Some("Bob"));
    }

    #[test]
    fn between_scenario_matches_spec_example() {
        let list = List::from_vec(vec![
            obj_row("a", 9),
            obj_row("b", 10),
            obj_row("c", 15),
            obj_row("d", 20),
            obj_row("e", 21),
        ]);
        let plan_excl = PlanNode::Where {
            filter: Expr::compile(&serde_json::json!(["age", "between()", 10, 20])).unwrap(),
            based_on: Box::new(PlanNode::ListScan { list: list.clone() }),
        };
        let names: Vec<_> = plan_excl.execute().unwrap().into_iter().filter_map(|r| r.get("name").and_then(|v| v.as_str().map(str::to_string))).collect();
        assert_eq!(names, vec!["c"]);

        let plan_incl = PlanNode::Where {
            filter: Expr::compile(&serde_json::json!(["age", "between[]", 10, 20])).unwrap(),
            based_on: Box::new(PlanNode::ListScan { list }),
        };
        let names: Vec<_> = plan_incl.execute().unwrap().into_iter().filter_map(|r| r.get("name").and_then(|v| v.as_str().map(str::to_string))).collect();
        assert_eq!(names, vec!["b", "c", "d"]);
    }

    #[test]
    fn group_by_sums_and_counts() {
        let list = List::from_vec(vec![obj_row("a", 1), obj_row("a", 2), obj_row("b", 5)]);
        let plan = PlanNode::GroupBy {
            group_fields: vec!["name".into()],
            aggregates: vec![
                AggregateSpec { output: "total".into(), source_field: "age".into(), aggregator: Aggregator::Sum },
                AggregateSpec { output: "n".into(), source_field: "age".into(), aggregator: Aggregator::Count },
            ],
            based_on: Box::new(PlanNode::ListScan { list }),
        };
        let rows = plan.execute().unwrap();
        assert_eq!(rows.len(), 2);
        let a = rows.iter().find(|r| r.get("name").unwrap().as_str() == Some("a")).unwrap();
        assert!((as_f64(&a.get("total").unwrap()).unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(a.get("n").unwrap().as_i64(), Some(2));
    }
}
