//! Folding multi-row query results back into entities.
//!
//! A query with expansions returns one row per (primary, related item)
//! pair. Rows of one primary arrive consecutively; [`ResultIterator`]
//! collects such a run into a single entity whose expanded fields hold the
//! related items.

use std::sync::Arc;

use crate::backend::{Binding, Element, Row, RowStream};
use crate::entity::Entity;
use crate::error::{GraphError, Result};
use crate::params::{FieldList, QueryField};
use crate::persistence::{collect_related, Persistence};
use crate::schema::{EntityType, FieldDescriptor};

/// Where the iterator stands between runs.
enum RunState {
    /// No row pulled for the next run yet.
    AtRunStart,
    /// First row of the next run, pulled while finishing the previous one.
    BufferedNextPrimary(Row),
    Exhausted,
}

/// A related field filled from an expansion column.
pub(crate) struct ExpandedField {
    pub(crate) var: String,
    pub(crate) field: Arc<FieldDescriptor>,
    pub(crate) target: Arc<EntityType>,
    pub(crate) spec: Option<QueryField>,
    /// Hops the expansion follows.
    pub(crate) depth: usize,
}

impl ExpandedField {
    fn limit(&self) -> Option<usize> {
        self.spec.as_ref().and_then(|spec| spec.limit)
    }
}

/// Items gathered for one expanded field during a run.
#[derive(Default)]
struct Collected {
    items: Vec<Entity>,
    /// A distinct item arrived after the field's limit was reached.
    truncated: bool,
}

/// Streams entities out of query rows, one run of rows per entity.
pub struct ResultIterator<'a> {
    persistence: Persistence<'a>,
    ty: Arc<EntityType>,
    var: String,
    /// Scalar fields of the primary; `None` loads all of them.
    primary_fields: Option<FieldList>,
    expanded: Vec<ExpandedField>,
    rows: RowStream,
    state: RunState,
}

impl<'a> ResultIterator<'a> {
    pub(crate) fn new(
        persistence: Persistence<'a>,
        ty: Arc<EntityType>,
        primary_fields: Option<FieldList>,
        expanded: Vec<ExpandedField>,
        rows: RowStream,
    ) -> Self {
        let var = ty.query_identifier().to_owned();
        Self {
            persistence,
            ty,
            var,
            primary_fields,
            expanded,
            rows,
            state: RunState::AtRunStart,
        }
    }

    fn primary(&self, row: &Row) -> Option<Element> {
        row.get(&self.var).and_then(Binding::element)
    }

    /// Next row with a bound primary, or `None` at the end of the stream.
    fn pull(&mut self) -> Result<Option<Row>> {
        let var = &self.var;
        for row in self.rows.by_ref() {
            let row = row?;
            if row.get(var).and_then(Binding::element).is_some() {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn run(&mut self, first: Row) -> Result<Entity> {
        let primary = self
            .primary(&first)
            .ok_or_else(|| GraphError::Backend(format!("row without '{}'", self.var)))?;
        let mut entity = match &self.primary_fields {
            Some(fields) => self.persistence.materialize(&self.ty, primary, fields)?,
            None => self.persistence.materialize_scalars(&self.ty, primary)?,
        };

        let mut collected: Vec<Collected> =
            self.expanded.iter().map(|_| Collected::default()).collect();
        self.accumulate(&first, &mut collected)?;
        loop {
            match self.pull()? {
                Some(row) if self.primary(&row) == Some(primary) => {
                    self.accumulate(&row, &mut collected)?;
                }
                Some(row) => {
                    self.state = RunState::BufferedNextPrimary(row);
                    break;
                }
                None => break,
            }
        }

        for (expanded, collected) in self.expanded.iter().zip(collected) {
            let name = expanded.field.name.clone();
            entity.set(name.clone(), collect_related(&expanded.field, collected.items));
            if collected.truncated || expanded.depth > 1 {
                entity.mark_partial(name);
            }
        }
        Ok(entity)
    }

    fn accumulate(&self, row: &Row, collected: &mut [Collected]) -> Result<()> {
        for (expanded, collected) in self.expanded.iter().zip(collected.iter_mut()) {
            let Some(element) = row.get(&expanded.var).and_then(Binding::element) else {
                continue;
            };
            let id = match element {
                Element::Node(id) | Element::Relationship(id) => id,
            };
            let items = &mut collected.items;
            if items.iter().any(|item| item.id() == Some(id)) {
                continue;
            }
            if expanded.limit().is_some_and(|limit| items.len() >= limit) {
                collected.truncated = true;
                continue;
            }
            let item = match &expanded.spec {
                Some(spec) if !spec.sub_fields.is_empty() => {
                    self.persistence
                        .materialize(&expanded.target, element, &spec.sub_fields)
                }
                _ => self.persistence.materialize_scalars(&expanded.target, element),
            };
            match item {
                Ok(item) => items.push(item),
                Err(GraphError::TypeMismatch { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

impl Iterator for ResultIterator<'_> {
    type Item = Result<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = match std::mem::replace(&mut self.state, RunState::Exhausted) {
            RunState::Exhausted => return None,
            RunState::BufferedNextPrimary(row) => row,
            RunState::AtRunStart => match self.pull() {
                Ok(Some(row)) => row,
                Ok(None) => return None,
                Err(err) => return Some(Err(err)),
            },
        };
        Some(self.run(first))
    }
}
