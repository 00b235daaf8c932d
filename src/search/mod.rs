//! Fluent searches over one repository.
//!
//! A [`Search`] accumulates [`SearchParameters`] and runs them through the
//! query builder. Plain id or uuid lookups skip the query entirely; results
//! with expanded relations are folded back into entities by
//! [`ResultIterator`].

pub mod iterator;

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::backend::{Binding, RowStream};
use crate::entity::Entity;
use crate::error::{GraphError, Result};
use crate::params::{FieldList, Filter, OrderBy, PropertyFilter, SearchParameters};
use crate::persistence::{element_of, Persistence};
use crate::query::plan::Projection;
use crate::query::GraphQuery;
use crate::repository::{skip_missing, Repository};
use crate::schema::EntityType;
use crate::value::Value;

pub use iterator::ResultIterator;
use iterator::ExpandedField;

/// Lazily produced search results.
pub type EntityStream<'r> = Box<dyn Iterator<Item = Result<Entity>> + 'r>;

/// Search builder bound to a repository.
#[derive(Debug, Clone)]
pub struct Search<'r> {
    repo: &'r Repository,
    params: SearchParameters,
}

impl<'r> Search<'r> {
    pub(crate) fn new(repo: &'r Repository) -> Self {
        Self {
            repo,
            params: SearchParameters::default(),
        }
    }

    /// Looks up by backend identity.
    pub fn ids(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.params.ids.extend(ids);
        self
    }

    /// Looks up by uuid.
    pub fn uuids<S: Into<String>>(mut self, uuids: impl IntoIterator<Item = S>) -> Self {
        self.params.uuids.extend(uuids.into_iter().map(Into::into));
        self
    }

    /// Adds a property filter.
    pub fn filter(mut self, field: impl Into<String>, filter: Filter) -> Self {
        self.params.filters.push(PropertyFilter::new(field, filter));
        self
    }

    /// Adds a filter in wire syntax, e.g. `age:>=18`.
    pub fn filter_str(mut self, raw: &str) -> Result<Self> {
        self.params.filters.push(PropertyFilter::parse(raw)?);
        Ok(self)
    }

    /// Orders ascending by `field`.
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.params.order_by.push(OrderBy::asc(field));
        self
    }

    /// Orders descending by `field`.
    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.params.order_by.push(OrderBy::desc(field));
        self
    }

    /// Offset of the first result; wins over the page.
    pub fn start(mut self, start: usize) -> Self {
        self.params.start = Some(start);
        self
    }

    /// Maximum number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.params.limit = Some(limit);
        self
    }

    /// 1-based page; ignored when an explicit start is given.
    pub fn page(mut self, page: usize) -> Self {
        self.params.page = Some(page);
        self
    }

    /// Merges `fields` into the requested field list.
    pub fn fields(mut self, fields: FieldList) -> Self {
        for field in fields.iter() {
            self.params.fields.push(field.clone());
        }
        self
    }

    /// Like [`fields`](Self::fields) with the textual field syntax.
    pub fn fields_str(self, raw: &str) -> Result<Self> {
        Ok(self.fields(FieldList::parse(raw)?))
    }

    /// Hops followed when expanding related fields.
    pub fn depth(mut self, depth: usize) -> Self {
        self.params.depth = Some(depth);
        self
    }

    /// Free-text term.
    pub fn query(mut self, text: impl Into<String>) -> Self {
        self.params.query = Some(text.into());
        self
    }

    /// Locale hint carried with the search.
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.params.locale = Some(locale.into());
        self
    }

    /// Returns the items of a related field instead of the primaries.
    pub fn returns(mut self, field: impl Into<String>) -> Self {
        self.params.returns.push(field.into());
        self
    }

    /// Replaces every accumulated parameter.
    pub fn params(mut self, params: SearchParameters) -> Self {
        self.params = params;
        self
    }

    /// Accumulated parameters.
    pub fn parameters(&self) -> &SearchParameters {
        &self.params
    }

    fn resolved(&self) -> Result<SearchParameters> {
        let mut params = self.params.clone();
        params.resolve()?;
        Ok(params)
    }

    /// All results, in query order.
    pub fn list(&self) -> Result<Vec<Entity>> {
        self.stream()?.collect()
    }

    /// Results distinct by identity, first occurrence kept.
    pub fn set(&self) -> Result<Vec<Entity>> {
        let mut distinct: Vec<Entity> = Vec::new();
        for entity in self.stream()? {
            let entity = entity?;
            if !distinct.iter().any(|e| e.same_identity(&entity)) {
                distinct.push(entity);
            }
        }
        Ok(distinct)
    }

    /// First result only.
    pub fn single(&self) -> Result<Option<Entity>> {
        let mut params = self.resolved()?;
        params.limit = Some(1);
        self.stream_with(params)?.next().transpose()
    }

    /// Results as a lazy stream.
    pub fn stream(&self) -> Result<EntityStream<'r>> {
        self.stream_with(self.resolved()?)
    }

    fn stream_with(&self, params: SearchParameters) -> Result<EntityStream<'r>> {
        let persistence = self.repo.persistence()?;
        let ty = Arc::clone(self.repo.entity_type());
        let fields = params.field_list();

        if params.is_point_lookup() {
            debug!(entity = ty.name(), ids = params.ids.len(), uuids = params.uuids.len(), "point lookup");
            return Ok(point_lookups(persistence, ty, params, fields));
        }

        let query = self.repo.query_builder().build(&params)?;
        let rows = self.execute(&query)?;

        if let Some(name) = params.returns.first() {
            return self.returned_items(persistence, name, rows, fields);
        }

        let primary_fields = (!fields.is_all()).then(|| {
            FieldList::of(
                fields
                    .iter()
                    .filter(|f| ty.field(&f.name).is_some_and(|d| !d.is_related()))
                    .map(|f| f.name.clone()),
            )
        });
        let registry = self.repo.context().registry();
        let expanded = query
            .plan
            .expansions
            .iter()
            .map(|expansion| {
                let field = ty.field(&expansion.var).cloned().ok_or_else(|| {
                    GraphError::InvalidArgument(format!(
                        "'{}' is not a field of {}",
                        expansion.var,
                        ty.name()
                    ))
                })?;
                let target = match field.related_to() {
                    Some(related) => registry.model_for(&related.target)?,
                    None => {
                        return Err(GraphError::InvalidArgument(format!(
                            "'{}' is not a related field",
                            field.name
                        )))
                    }
                };
                Ok(ExpandedField {
                    var: expansion.var.clone(),
                    spec: fields.get(&field.name).cloned(),
                    field,
                    target,
                    depth: expansion.depth,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Box::new(ResultIterator::new(
            persistence,
            ty,
            primary_fields,
            expanded,
            rows,
        )))
    }

    /// Items of the single returned field, one per row. Relationship-entity
    /// targets come back as relationship elements and load as such.
    fn returned_items(
        &self,
        persistence: Persistence<'r>,
        name: &str,
        rows: RowStream,
        fields: FieldList,
    ) -> Result<EntityStream<'r>> {
        let ty = self.repo.entity_type();
        let target = match ty.field(name).and_then(|f| f.related_to()) {
            Some(related) => self.repo.context().registry().model_for(&related.target)?,
            None => {
                return Err(GraphError::InvalidArgument(format!(
                    "'{name}' is not a related field of {}",
                    ty.name()
                )))
            }
        };
        let var = name.to_owned();
        Ok(Box::new(rows.filter_map(move |row| {
            let row = match row {
                Ok(row) => row,
                Err(err) => return Some(Err(err)),
            };
            let element = row.get(&var).and_then(Binding::element)?;
            skip_missing(persistence.materialize(&target, element, &fields)).transpose()
        })))
    }

    /// Number of matches, ignoring pagination. With `returns`, the number
    /// of distinct returned items.
    pub fn count(&self) -> Result<u64> {
        let params = self.resolved()?;
        let projection = Projection::Count {
            var: params.returns.first().cloned(),
        };
        let query = self.repo.query_builder().build_simple(&params, projection)?;
        let value = self.aggregate(&query, "count")?;
        value
            .as_int()
            .and_then(|count| u64::try_from(count).ok())
            .ok_or_else(|| GraphError::Backend(format!("count returned {value}")))
    }

    /// Sum of a numeric property over every match.
    pub fn sum(&self, field: &str) -> Result<Value> {
        let params = self.resolved()?;
        let query = self.repo.query_builder().build_simple(
            &params,
            Projection::Sum {
                field: field.to_owned(),
            },
        )?;
        self.aggregate(&query, "sum")
    }

    fn aggregate(&self, query: &GraphQuery, column: &str) -> Result<Value> {
        self.repo.persistence()?;
        let mut rows = self.execute(query)?;
        match rows.next().transpose()? {
            Some(row) => match row.get(column) {
                Some(Binding::Value(value)) => Ok(value.clone()),
                _ => Ok(Value::Null),
            },
            None => Ok(Value::Null),
        }
    }

    fn execute(&self, query: &GraphQuery) -> Result<RowStream> {
        let started = Instant::now();
        let rows = self.repo.context().backend().execute(query)?;
        debug!(
            query = %query.text,
            params = ?query.params,
            elapsed_us = started.elapsed().as_micros() as u64,
            "query executed"
        );
        Ok(rows)
    }
}

fn point_lookups<'r>(
    persistence: Persistence<'r>,
    ty: Arc<EntityType>,
    params: SearchParameters,
    fields: FieldList,
) -> EntityStream<'r> {
    if !params.ids.is_empty() {
        return Box::new(params.ids.into_iter().filter_map(move |id| {
            skip_missing(persistence.materialize(&ty, element_of(&ty, id), &fields)).transpose()
        }));
    }
    Box::new(params.uuids.into_iter().filter_map(move |uuid| {
        let found = match persistence.find_by_uuid(&ty, &uuid) {
            Ok(found) => found?,
            Err(err) => return Some(Err(err)),
        };
        let id = found.id()?;
        skip_missing(persistence.materialize(&ty, element_of(&ty, id), &fields)).transpose()
    }))
}
