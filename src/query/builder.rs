use std::collections::BTreeMap;

use crate::error::{GraphError, Result};
use crate::params::{Filter, SearchParameters, SortOrder};
use crate::query::plan::{
    CmpOp, Expansion, ExpansionYield, OrderClause, PageScope, Predicate, Projection, QueryPlan,
    Target,
};
use crate::query::GraphQuery;
use crate::schema::{EntityType, FieldDescriptor, FieldType, SchemaRegistry};
use crate::value::Value;

const IDS_PARAM: &str = "ids";
const UUIDS_PARAM: &str = "uuids";
const QUERY_PARAM: &str = "query";

/// Builds queries over one entity type.
#[derive(Clone, Copy)]
pub struct QueryBuilder<'a> {
    registry: &'a SchemaRegistry,
    ty: &'a EntityType,
}

impl<'a> QueryBuilder<'a> {
    /// Builder for queries over `ty`.
    pub fn new(registry: &'a SchemaRegistry, ty: &'a EntityType) -> Self {
        Self { registry, ty }
    }

    /// Full query: selection, ordering, pagination and one optional match
    /// per requested related field.
    pub fn build(&self, params: &SearchParameters) -> Result<GraphQuery> {
        let mut bound = Bindings::default();
        let mut plan = self.base_plan(params, &mut bound)?;

        for clause in &params.order_by {
            self.check_property(&clause.field, "order")?;
            plan.order.push(OrderClause {
                field: clause.field.clone(),
                descending: clause.dir == SortOrder::Desc,
            });
        }

        let start = params.resolved_start()?;
        plan.skip = (start > 0).then_some(start);
        plan.limit = params.limit;

        match self.returned_field(params)? {
            Some(field) => {
                plan.expansions.push(self.expansion(field, params.depth_or_default())?);
                plan.projection = Projection::Distinct {
                    var: field.name.clone(),
                };
                plan.page_scope = PageScope::Returned;
            }
            None => {
                for field in self.expanded_fields(params) {
                    plan.expansions
                        .push(self.expansion(field, params.depth_or_default())?);
                }
            }
        }

        Ok(GraphQuery::new(plan, bound.values))
    }

    /// Selection only: no ordering, no pagination and no expansion except
    /// the returned field. Used for aggregates, where expansion would
    /// multiply rows.
    pub fn build_simple(
        &self,
        params: &SearchParameters,
        projection: Projection,
    ) -> Result<GraphQuery> {
        let mut bound = Bindings::default();
        let mut plan = self.base_plan(params, &mut bound)?;
        if let Some(field) = self.returned_field(params)? {
            plan.expansions
                .push(self.expansion(field, params.depth_or_default())?);
        }
        if let Projection::Sum { field } = &projection {
            self.check_property(field, "sum")?;
        }
        plan.projection = projection;
        Ok(GraphQuery::new(plan, bound.values))
    }

    fn base_plan(&self, params: &SearchParameters, bound: &mut Bindings) -> Result<QueryPlan> {
        let target = if self.ty.is_relationship() {
            Target::Relationships {
                rel_type: self.ty.name().to_owned(),
            }
        } else {
            Target::Nodes {
                label: self.ty.name().to_owned(),
            }
        };
        let mut plan = QueryPlan::new(self.ty.query_identifier(), target);

        if !params.ids.is_empty() {
            let ids = params
                .ids
                .iter()
                .map(|&id| Value::try_from(id))
                .collect::<Result<Vec<_>>>()?;
            bound.named(IDS_PARAM, Value::List(ids));
            plan.predicates.push(Predicate::IdIn {
                param: IDS_PARAM.to_owned(),
            });
        }
        if !params.uuids.is_empty() {
            let uuids = params.uuids.iter().map(|u| Value::from(u.as_str())).collect();
            bound.named(UUIDS_PARAM, Value::List(uuids));
            plan.predicates.push(Predicate::UuidIn {
                param: UUIDS_PARAM.to_owned(),
            });
        }
        if let Some(query) = params.query.as_deref().filter(|q| !q.trim().is_empty()) {
            bound.named(QUERY_PARAM, Value::from(query.trim()));
            plan.predicates.push(Predicate::Text {
                fields: self.text_fields(),
                param: QUERY_PARAM.to_owned(),
            });
        }
        for filter in &params.filters {
            self.check_property(&filter.field, "filter")?;
            self.lower_filter(&filter.field, &filter.filter, bound, &mut plan.predicates);
        }
        Ok(plan)
    }

    fn lower_filter(
        &self,
        field: &str,
        filter: &Filter,
        bound: &mut Bindings,
        out: &mut Vec<Predicate>,
    ) {
        let mut compare = |op: CmpOp, value: Option<&Value>| {
            let param = value.map(|v| bound.next(v.clone()));
            out.push(Predicate::Compare {
                field: field.to_owned(),
                op,
                param,
            });
        };
        match filter {
            Filter::Equals { value } if value.is_null() => compare(CmpOp::IsNull, None),
            Filter::NotEquals { value } if value.is_null() => compare(CmpOp::IsNotNull, None),
            Filter::Equals { value } => compare(CmpOp::Eq, Some(value)),
            Filter::NotEquals { value } => compare(CmpOp::Ne, Some(value)),
            Filter::LessThan { value, including } => {
                compare(if *including { CmpOp::Le } else { CmpOp::Lt }, Some(value))
            }
            Filter::GreaterThan { value, including } => {
                compare(if *including { CmpOp::Ge } else { CmpOp::Gt }, Some(value))
            }
            Filter::Range { from, to, including } => {
                let (lower, upper) = if *including {
                    (CmpOp::Ge, CmpOp::Le)
                } else {
                    (CmpOp::Gt, CmpOp::Lt)
                };
                compare(lower, Some(from));
                compare(upper, Some(to));
            }
        }
    }

    /// Unique or indexed string fields; every declared string field when the
    /// type marks none. Bookkeeping properties are never searched.
    fn text_fields(&self) -> Vec<String> {
        let strings: Vec<&FieldDescriptor> = self
            .ty
            .scalar_fields()
            .map(|f| &**f)
            .filter(|f| f.field_type == FieldType::String)
            .collect();
        let marked: Vec<String> = strings
            .iter()
            .filter(|f| f.is_unique() || f.annotations.indexed)
            .map(|f| f.name.clone())
            .collect();
        if !marked.is_empty() {
            return marked;
        }
        strings.iter().map(|f| f.name.clone()).collect()
    }

    fn check_property(&self, name: &str, context: &str) -> Result<()> {
        if name == "uuid" {
            return Ok(());
        }
        match self.ty.field(name) {
            Some(field) if !field.is_related() => Ok(()),
            Some(_) => Err(GraphError::InvalidArgument(format!(
                "cannot {context} by related field '{name}' of {}",
                self.ty.name()
            ))),
            None => Err(GraphError::InvalidArgument(format!(
                "unknown {context} field '{name}' on {}",
                self.ty.name()
            ))),
        }
    }

    fn returned_field(&self, params: &SearchParameters) -> Result<Option<&'a FieldDescriptor>> {
        match params.returns.as_slice() {
            [] => Ok(None),
            [name] => match self.ty.field(name) {
                Some(field) if field.is_related() => Ok(Some(&**field)),
                _ => Err(GraphError::InvalidArgument(format!(
                    "'{name}' is not a related field of {}",
                    self.ty.name()
                ))),
            },
            _ => Err(GraphError::Unsupported(format!(
                "returning more than one variable ({})",
                params.returns.join(", ")
            ))),
        }
    }

    /// Related fields named in the field list; `all` adds every non-lazy
    /// related field.
    fn expanded_fields(&self, params: &SearchParameters) -> Vec<&'a FieldDescriptor> {
        let fields = params.field_list();
        self.ty
            .related_fields()
            .filter(|f| fields.contains(&f.name) || (fields.is_all() && !f.is_lazy()))
            .map(|f| &**f)
            .collect()
    }

    fn expansion(&self, field: &FieldDescriptor, depth: usize) -> Result<Expansion> {
        let related = field.related_to().ok_or_else(|| {
            GraphError::InvalidArgument(format!("'{}' has no relationship target", field.name))
        })?;
        let target = self.registry.model_for(&related.target)?;
        let (yields, target_label, depth) = if target.is_relationship() {
            (ExpansionYield::Relationship, None, 1)
        } else {
            (ExpansionYield::Node, Some(target.name().to_owned()), depth)
        };
        Ok(Expansion {
            var: field.name.clone(),
            rel_type: related.rel_type.clone(),
            direction: related.direction,
            depth,
            yields,
            target_label,
        })
    }
}

#[derive(Default)]
struct Bindings {
    values: BTreeMap<String, Value>,
    counter: usize,
}

impl Bindings {
    fn named(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_owned(), value);
    }

    fn next(&mut self, value: Value) -> String {
        let name = format!("p{}", self.counter);
        self.counter += 1;
        self.values.insert(name.clone(), value);
        name
    }
}
