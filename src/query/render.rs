use std::fmt::Write;

use super::plan::{
    Expansion, ExpansionYield, PageScope, Predicate, Projection, QueryPlan, Target,
};

/// Renders a plan as Cypher-like text.
///
/// ```text
/// MATCH (person:Person)
/// WHERE person.age >= $p0
/// WITH person ORDER BY person.name ASC SKIP 20 LIMIT 10
/// OPTIONAL MATCH (person)<-[:ChildOf*1..1]-(children:Person)
/// RETURN person, children
/// ```
pub fn render(plan: &QueryPlan) -> String {
    let var = &plan.var;
    let mut out = String::new();

    match &plan.target {
        Target::Nodes { label } => {
            let _ = write!(out, "MATCH ({var}:{label})");
        }
        Target::Relationships { rel_type } => {
            let _ = write!(out, "MATCH ()-[{var}:{rel_type}]->()");
        }
    }

    let conditions: Vec<String> = plan
        .predicates
        .iter()
        .map(|p| predicate(var, p))
        .collect();
    if !conditions.is_empty() {
        let _ = write!(out, "\nWHERE {}", conditions.join(" AND "));
    }

    let primary_paging = plan.page_scope == PageScope::Primary
        && (plan.skip.is_some() || plan.limit.is_some());
    if !plan.order.is_empty() || primary_paging {
        let _ = write!(out, "\nWITH {var}");
        if !plan.order.is_empty() {
            let clauses: Vec<String> = plan
                .order
                .iter()
                .map(|o| {
                    let dir = if o.descending { "DESC" } else { "ASC" };
                    format!("{var}.{} {dir}", o.field)
                })
                .collect();
            let _ = write!(out, " ORDER BY {}", clauses.join(", "));
        }
        if primary_paging {
            paging(&mut out, plan);
        }
    }

    for expansion in &plan.expansions {
        let _ = write!(out, "\nOPTIONAL MATCH {}", pattern(var, expansion));
    }

    match &plan.projection {
        Projection::Rows => {
            let mut columns = vec![var.clone()];
            columns.extend(plan.expansions.iter().map(|e| e.var.clone()));
            let _ = write!(out, "\nRETURN {}", columns.join(", "));
        }
        Projection::Distinct { var: returned } => {
            let _ = write!(out, "\nRETURN DISTINCT {returned}");
            if plan.page_scope == PageScope::Returned {
                paging(&mut out, plan);
            }
        }
        Projection::Count { var: counted } => {
            let counted = match counted {
                Some(counted) => format!("DISTINCT {counted}"),
                None => var.clone(),
            };
            let _ = write!(out, "\nRETURN count({counted}) AS count");
        }
        Projection::Sum { field } => {
            let _ = write!(out, "\nRETURN sum({var}.{field}) AS sum");
        }
    }
    out
}

fn paging(out: &mut String, plan: &QueryPlan) {
    if let Some(skip) = plan.skip {
        let _ = write!(out, " SKIP {skip}");
    }
    if let Some(limit) = plan.limit {
        let _ = write!(out, " LIMIT {limit}");
    }
}

fn predicate(var: &str, predicate: &Predicate) -> String {
    match predicate {
        Predicate::IdIn { param } => format!("id({var}) IN ${param}"),
        Predicate::UuidIn { param } => format!("{var}.uuid IN ${param}"),
        Predicate::Compare { field, op, param } => match param {
            Some(param) if !op.is_unary() => format!("{var}.{field} {} ${param}", op.symbol()),
            _ => format!("{var}.{field} {}", op.symbol()),
        },
        Predicate::Text { fields, param } => {
            if fields.is_empty() {
                return "false".to_owned();
            }
            let fields: Vec<String> = fields
                .iter()
                .map(|f| format!("toLower({var}.{f}) CONTAINS toLower(${param})"))
                .collect();
            format!("({})", fields.join(" OR "))
        }
    }
}

fn pattern(var: &str, expansion: &Expansion) -> String {
    let (left, right) = expansion.direction.arrows();
    let rel_type = &expansion.rel_type;
    match expansion.yields {
        ExpansionYield::Relationship => {
            format!("({var}){left}[{}:{rel_type}]{right}()", expansion.var)
        }
        ExpansionYield::Node => {
            let target = match &expansion.target_label {
                Some(label) => format!("({}:{label})", expansion.var),
                None => format!("({})", expansion.var),
            };
            format!(
                "({var}){left}[:{rel_type}*1..{}]{right}{target}",
                expansion.depth
            )
        }
    }
}
