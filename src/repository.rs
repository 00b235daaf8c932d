//! Per-type entry point for saving, loading, removing and searching.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use tracing::debug;

use crate::backend::Element;
use crate::entity::Entity;
use crate::error::{GraphError, Result};
use crate::params::FieldList;
use crate::persistence::{element_of, GraphContext, Persistence};
use crate::query::QueryBuilder;
use crate::search::Search;
use crate::schema::EntityType;

/// Handle on one entity type.
///
/// Repositories are cheap; the service caches one per type and disposes
/// them on shutdown, after which every operation fails with
/// [`GraphError::NotRunning`].
#[derive(Debug)]
pub struct Repository {
    ctx: GraphContext,
    ty: Arc<EntityType>,
    disposed: AtomicBool,
}

impl Repository {
    pub(crate) fn new(ctx: GraphContext, ty: Arc<EntityType>) -> Self {
        Self {
            ctx,
            ty,
            disposed: AtomicBool::new(false),
        }
    }

    /// Type this repository serves.
    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.ty
    }

    /// Name of the served type.
    pub fn name(&self) -> &str {
        self.ty.name()
    }

    /// Labels every element of the type carries.
    pub fn labels(&self) -> &[String] {
        self.ty.labels()
    }

    /// Variable the type is bound to in generated queries.
    pub fn query_identifier(&self) -> &str {
        self.ty.query_identifier()
    }

    pub(crate) fn context(&self) -> &GraphContext {
        &self.ctx
    }

    pub(crate) fn persistence(&self) -> Result<Persistence<'_>> {
        if self.disposed.load(AtomicOrdering::Acquire) {
            return Err(GraphError::NotRunning);
        }
        Ok(self.ctx.persistence())
    }

    /// A new, unsaved entity of this type with a fresh uuid.
    pub fn create(&self) -> Entity {
        Entity::new(self.ty.name())
    }

    /// Inserts or updates. The entity must be of this type or a subtype.
    pub fn save(&self, entity: &mut Entity) -> Result<()> {
        let persistence = self.persistence()?;
        self.check_type(entity)?;
        persistence.save(entity)
    }

    fn check_type(&self, entity: &Entity) -> Result<()> {
        let ty = self.ctx.registry().model_for(entity.type_name())?;
        if ty.name() == self.ty.name() || ty.labels().iter().any(|l| l == self.ty.name()) {
            Ok(())
        } else {
            Err(GraphError::TypeMismatch {
                expected: self.ty.name().to_owned(),
                found: ty.labels().to_vec(),
            })
        }
    }

    /// Loads the element with identity `id`, or `None` when it is missing
    /// or not of this type.
    pub fn find(&self, id: u64, fields: &FieldList) -> Result<Option<Entity>> {
        let persistence = self.persistence()?;
        skip_missing(persistence.materialize(&self.ty, element_of(&self.ty, id), fields))
    }

    /// Loads the element with the given uuid; `None` when there is none.
    pub fn find_by_uuid(&self, uuid: &str, fields: &FieldList) -> Result<Option<Entity>> {
        let persistence = self.persistence()?;
        match persistence.find_by_uuid(&self.ty, uuid)? {
            Some(found) => match found.id() {
                Some(id) => self.find(id, fields),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Loads requested fields into a saved entity.
    pub fn fetch(&self, entity: &mut Entity, fields: &FieldList, refetch: bool) -> Result<()> {
        self.persistence()?.fetch(entity, fields, refetch)
    }

    /// Builds an entity of this type from a stored element.
    pub fn materialize(&self, element: Element, fields: &FieldList) -> Result<Entity> {
        self.persistence()?.materialize(&self.ty, element, fields)
    }

    /// True when an element of this type has identity `id`.
    pub fn contains(&self, id: u64) -> Result<bool> {
        Ok(self.find(id, &FieldList::new())?.is_some())
    }

    /// Deletes the stored entity.
    pub fn remove(&self, entity: &Entity) -> Result<()> {
        let persistence = self.persistence()?;
        self.check_type(entity)?;
        persistence.remove(entity)
    }

    /// Removes by identity; a missing element is an error here, unlike
    /// [`find`](Self::find).
    pub fn remove_by_id(&self, id: u64) -> Result<()> {
        let entity = self
            .find(id, &FieldList::new())?
            .ok_or_else(|| GraphError::not_found(format!("{} {id}", self.ty.name())))?;
        self.remove(&entity)
    }

    /// Starts a search over this type.
    pub fn search(&self) -> Search<'_> {
        Search::new(self)
    }

    /// Query builder for this type.
    pub fn query_builder(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(self.ctx.registry(), &self.ty)
    }

    /// Detaches the repository from the service.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, AtomicOrdering::AcqRel) {
            debug!(entity = self.ty.name(), "repository disposed");
        }
    }

    /// True after [`dispose`](Self::dispose).
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(AtomicOrdering::Acquire)
    }
}

/// Maps lookup misses to `None`.
pub(crate) fn skip_missing(result: Result<Entity>) -> Result<Option<Entity>> {
    match result {
        Ok(entity) => Ok(Some(entity)),
        Err(GraphError::NotFound(_) | GraphError::TypeMismatch { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}
