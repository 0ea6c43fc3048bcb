//! Cost-light plan optimizer (spec §4.8): predicate push-down of `Where`
//! filters into indexed plans, AND-term reordering by a static cost
//! heuristic, and the `Count` → `CountResult` rewrite when the
//! underlying plan exposes a fast count.

use super::expr::Expr;
use super::plan::PlanNode;

/// Rewrites `plan` bottom-up. Mirrors the teacher's `mvcc` compaction
/// pass in spirit: a tree walk that never changes observable results,
/// only how cheaply they're produced.
pub fn optimize(plan: PlanNode) -> PlanNode {
    match plan {
        PlanNode::Where { filter, based_on } => {
            let based_on = optimize(*based_on);
            optimize_where(filter, based_on)
        }
        PlanNode::Count { based_on } => {
            let based_on = optimize(*based_on);
            match based_on.fast_count() {
                Some(n) => PlanNode::CountResult { n },
                None => PlanNode::Count { based_on: Box::new(based_on) },
            }
        }
        PlanNode::From { alias, based_on } => PlanNode::From { alias, based_on: Box::new(optimize(*based_on)) },
        PlanNode::IndexedQuery { indexes, based_on } => {
            PlanNode::IndexedQuery { indexes, based_on: Box::new(optimize(*based_on)) }
        }
        PlanNode::Join { base_field, join_field, join_type, join_query, based_on } => PlanNode::Join {
            base_field,
            join_field,
            join_type,
            join_query: Box::new(optimize(*join_query)),
            based_on: Box::new(optimize(*based_on)),
        },
        PlanNode::GroupBy { group_fields, aggregates, based_on } => {
            PlanNode::GroupBy { group_fields, aggregates, based_on: Box::new(optimize(*based_on)) }
        }
        PlanNode::Select { fields, based_on } => PlanNode::Select { fields, based_on: Box::new(optimize(*based_on)) },
        PlanNode::OrderBy { keys, based_on } => PlanNode::OrderBy { keys, based_on: Box::new(optimize(*based_on)) },
        PlanNode::Having { filter, based_on } => PlanNode::Having { filter, based_on: Box::new(optimize(*based_on)) },
        PlanNode::Limit { n, based_on } => PlanNode::Limit { n, based_on: Box::new(optimize(*based_on)) },
        PlanNode::Offset { n, based_on } => PlanNode::Offset { n, based_on: Box::new(optimize(*based_on)) },
        PlanNode::Unnest { path, alias, based_on } => {
            PlanNode::Unnest { path, alias, based_on: Box::new(optimize(*based_on)) }
        }
        PlanNode::CollectionField { name, builder, based_on } => {
            PlanNode::CollectionField { name, builder, based_on: Box::new(optimize(*based_on)) }
        }
        other => other,
    }
}

/// Step 1: try push-down whole. Step 2: if an AND, reorder terms
/// cheapest-first and push down each that can be, keeping the rest as a
/// residual `Where` over the already-narrowed plan (spec §4.8 steps 1-2).
fn optimize_where(filter: Expr, based_on: PlanNode) -> PlanNode {
    if let Some(pushed) = based_on.accept_filter(&filter) {
        return pushed;
    }
    if let Expr::And(mut terms) = filter {
        terms.sort_by_key(|t| t.cost_rank());
        let mut current = based_on;
        let mut residual = Vec::new();
        for term in terms {
            match current.accept_filter(&term) {
                Some(pushed) => current = pushed,
                None => residual.push(term),
            }
        }
        return match residual.len() {
            0 => current,
            1 => PlanNode::Where { filter: residual.into_iter().next().unwrap(), based_on: Box::new(current) },
            _ => PlanNode::Where { filter: Expr::And(residual), based_on: Box::new(current) },
        };
    }
    PlanNode::Where { filter, based_on: Box::new(based_on) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomValue;
    use crate::collections::index_registry::IndexDefinition;
    use crate::collections::list::List;
    use crate::object_model::DBObject;
    use std::rc::Rc;

    fn obj(name: &str, age: i64) -> AtomValue {
        let o = DBObject::new().with_attr("name", AtomValue::str(name)).with_attr("age", AtomValue::Int(age));
        AtomValue::Atom(Rc::new(crate::atom::AnyAtom::Object(o)))
    }

    #[test]
    fn equality_over_indexed_field_becomes_indexed_search() {
        let list = List::from_vec(vec![obj("Bob", 30), obj("Alice", 25)])
            .add_index(IndexDefinition::field("name"))
            .unwrap();
        let indexes = list.indexes().cloned().unwrap();
        let plan = PlanNode::Where {
            filter: Expr::compile(&serde_json::json!(["name", "=", "Bob"])).unwrap(),
            based_on: Box::new(PlanNode::IndexedQuery { indexes, based_on: Box::new(PlanNode::ListScan { list }) }),
        };
        let optimized = optimize(plan);
        assert!(matches!(optimized, PlanNode::IndexedSearch { .. }));
        let rows = optimized.execute().unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn count_over_list_scan_becomes_count_result_without_iterating() {
        let list = List::from_vec(vec![obj("a", 1), obj("b", 2), obj("c", 3)]);
        let plan = PlanNode::Count { based_on: Box::new(PlanNode::ListScan { list }) };
        let optimized = optimize(plan);
        assert!(matches!(optimized, PlanNode::CountResult { n: 3 }));
    }
}
