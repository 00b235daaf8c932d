//! Evaluation of query plans against the in-memory graph.

use std::collections::{BTreeMap, HashSet};

use super::memory::GraphState;
use super::{Binding, Row};
use crate::error::{GraphError, Result};
use crate::query::plan::{
    CmpOp, Expansion, ExpansionYield, PageScope, Predicate, Projection, QueryPlan, Target,
};
use crate::query::GraphQuery;
use crate::value::Value;

type Properties = BTreeMap<String, Value>;

struct Candidate<'a> {
    binding: Binding,
    id: u64,
    properties: &'a Properties,
}

pub(super) fn evaluate(state: &GraphState, query: &GraphQuery) -> Result<Vec<Row>> {
    let plan = &query.plan;
    let mut candidates = select(state, plan);

    for predicate in &plan.predicates {
        let mut kept = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if test(predicate, &candidate, query)? {
                kept.push(candidate);
            }
        }
        candidates = kept;
    }

    if !plan.order.is_empty() {
        candidates.sort_by(|a, b| {
            for clause in &plan.order {
                let left = a.properties.get(&clause.field).unwrap_or(&Value::Null);
                let right = b.properties.get(&clause.field).unwrap_or(&Value::Null);
                let ord = left.sort_cmp(right);
                let ord = if clause.descending { ord.reverse() } else { ord };
                if ord.is_ne() {
                    return ord;
                }
            }
            a.id.cmp(&b.id)
        });
    }

    if plan.page_scope == PageScope::Primary {
        candidates = page(candidates, plan.skip, plan.limit);
    }

    match &plan.projection {
        Projection::Rows => Ok(expand_rows(state, plan, &candidates)),
        Projection::Distinct { var } => {
            let expansion = expansion_for(plan, var)?;
            let mut items = distinct_matches(state, expansion, &candidates);
            if plan.page_scope == PageScope::Returned {
                items = page(items, plan.skip, plan.limit);
            }
            Ok(items
                .into_iter()
                .map(|binding| Row::from([(var.clone(), binding)]))
                .collect())
        }
        Projection::Count { var } => {
            let count = match var {
                Some(var) => distinct_matches(state, expansion_for(plan, var)?, &candidates).len(),
                None => candidates.len(),
            };
            Ok(vec![Row::from([(
                "count".to_owned(),
                Binding::Value(Value::Int(i64::try_from(count).unwrap_or(i64::MAX))),
            )])])
        }
        Projection::Sum { field } => {
            let sum = sum(candidates.iter().filter_map(|c| c.properties.get(field)));
            Ok(vec![Row::from([("sum".to_owned(), Binding::Value(sum))])])
        }
    }
}

fn select<'a>(state: &'a GraphState, plan: &QueryPlan) -> Vec<Candidate<'a>> {
    match &plan.target {
        Target::Nodes { label } => state
            .nodes
            .values()
            .filter(|node| node.has_label(label))
            .map(|node| Candidate {
                binding: Binding::Node(node.id),
                id: node.id,
                properties: &node.properties,
            })
            .collect(),
        Target::Relationships { rel_type } => state
            .rels
            .values()
            .filter(|rel| &rel.rel_type == rel_type)
            .map(|rel| Candidate {
                binding: Binding::Relationship(rel.id),
                id: rel.id,
                properties: &rel.properties,
            })
            .collect(),
    }
}

fn param<'q>(query: &'q GraphQuery, name: &str) -> Result<&'q Value> {
    query
        .params
        .get(name)
        .ok_or_else(|| GraphError::InvalidArgument(format!("unbound query parameter ${name}")))
}

fn test(predicate: &Predicate, candidate: &Candidate<'_>, query: &GraphQuery) -> Result<bool> {
    let matched = match predicate {
        Predicate::IdIn { param: name } => list(param(query, name)?)
            .iter()
            .any(|v| v.as_int() == Some(candidate.id as i64)),
        Predicate::UuidIn { param: name } => {
            let uuid = candidate.properties.get("uuid");
            list(param(query, name)?)
                .iter()
                .any(|v| uuid.is_some_and(|u| u == v))
        }
        Predicate::Text { fields, param: name } => {
            let needle = param(query, name)?.as_str().unwrap_or_default().to_lowercase();
            fields
                .iter()
                .filter_map(|f| candidate.properties.get(f))
                .filter_map(Value::as_str)
                .any(|text| text.to_lowercase().contains(&needle))
        }
        Predicate::Compare {
            field,
            op,
            param: name,
        } => {
            let actual = candidate
                .properties
                .get(field)
                .filter(|value| !value.is_null());
            match op {
                CmpOp::IsNull => actual.is_none(),
                CmpOp::IsNotNull => actual.is_some(),
                _ => {
                    let expected = match name {
                        Some(name) => param(query, name)?,
                        None => &Value::Null,
                    };
                    actual.is_some_and(|actual| compare(actual, *op, expected))
                }
            }
        }
    };
    Ok(matched)
}

fn compare(actual: &Value, op: CmpOp, expected: &Value) -> bool {
    let Some(ord) = actual.partial_cmp_value(expected) else {
        return op == CmpOp::Ne;
    };
    match op {
        CmpOp::Eq => ord.is_eq(),
        CmpOp::Ne => ord.is_ne(),
        CmpOp::Lt => ord.is_lt(),
        CmpOp::Le => ord.is_le(),
        CmpOp::Gt => ord.is_gt(),
        CmpOp::Ge => ord.is_ge(),
        CmpOp::IsNull | CmpOp::IsNotNull => false,
    }
}

fn list(value: &Value) -> &[Value] {
    match value {
        Value::List(items) => items,
        other => std::slice::from_ref(other),
    }
}

fn page<T>(items: Vec<T>, skip: Option<usize>, limit: Option<usize>) -> Vec<T> {
    items
        .into_iter()
        .skip(skip.unwrap_or(0))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

fn expansion_for<'p>(plan: &'p QueryPlan, var: &str) -> Result<&'p Expansion> {
    plan.expansion(var)
        .ok_or_else(|| GraphError::InvalidArgument(format!("no expansion bound to '{var}'")))
}

/// Items reachable from `start` along the expansion, in discovery order.
fn matches(state: &GraphState, expansion: &Expansion, start: &Binding) -> Vec<Binding> {
    let Binding::Node(start) = *start else {
        return Vec::new();
    };
    let rel_type = Some(expansion.rel_type.as_str());
    let target_ok = |node: u64| {
        expansion.target_label.as_deref().map_or(true, |label| {
            state.nodes.get(&node).is_some_and(|n| n.has_label(label))
        })
    };

    match expansion.yields {
        ExpansionYield::Relationship => state
            .relationships_of(start, expansion.direction, rel_type)
            .map(|rel| Binding::Relationship(rel.id))
            .collect(),
        ExpansionYield::Node => {
            let mut found = Vec::new();
            let mut visited = HashSet::from([start]);
            let mut frontier = vec![start];
            for _ in 0..expansion.depth.max(1) {
                let mut next = Vec::new();
                for node in frontier {
                    for rel in state.relationships_of(node, expansion.direction, rel_type) {
                        let other = rel.other(node);
                        if visited.insert(other) {
                            next.push(other);
                            if target_ok(other) {
                                found.push(Binding::Node(other));
                            }
                        }
                    }
                }
                if next.is_empty() {
                    break;
                }
                frontier = next;
            }
            found
        }
    }
}

fn distinct_matches(
    state: &GraphState,
    expansion: &Expansion,
    candidates: &[Candidate<'_>],
) -> Vec<Binding> {
    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for candidate in candidates {
        for binding in matches(state, expansion, &candidate.binding) {
            if binding
                .element()
                .is_some_and(|element| seen.insert(element))
            {
                items.push(binding);
            }
        }
    }
    items
}

/// One row per combination of expansion matches; unmatched expansions bind
/// null, as an optional match does.
fn expand_rows(state: &GraphState, plan: &QueryPlan, candidates: &[Candidate<'_>]) -> Vec<Row> {
    let mut rows = Vec::new();
    for candidate in candidates {
        let mut partial = vec![Row::from([(plan.var.clone(), candidate.binding.clone())])];
        for expansion in &plan.expansions {
            let mut found = matches(state, expansion, &candidate.binding);
            if found.is_empty() {
                found.push(Binding::Null);
            }
            partial = partial
                .into_iter()
                .flat_map(|row| {
                    found.iter().map(move |binding| {
                        let mut row = row.clone();
                        row.insert(expansion.var.clone(), binding.clone());
                        row
                    })
                })
                .collect();
        }
        rows.extend(partial);
    }
    rows
}

fn sum<'a>(values: impl Iterator<Item = &'a Value>) -> Value {
    let mut int_total: i64 = 0;
    let mut float_total: f64 = 0.0;
    let mut saw_float = false;
    for value in values {
        match value {
            Value::Int(i) => int_total = int_total.saturating_add(*i),
            Value::Float(f) => {
                float_total += f;
                saw_float = true;
            }
            _ => {}
        }
    }
    if saw_float {
        Value::Float(float_total + int_total as f64)
    } else {
        Value::Int(int_total)
    }
}
