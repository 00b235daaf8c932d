//! Mapping between entities and backend elements.

mod mapper;
mod save;
mod validate;

use std::fmt;
use std::sync::Arc;

use crate::backend::{Element, GraphBackend};
use crate::schema::{EntityType, SchemaRegistry};

pub(crate) use mapper::collect_related;
pub use mapper::Persistence;
pub use save::SaveContext;

/// Backend plus the built registry; everything a persistence operation
/// needs. Cheap to clone.
#[derive(Clone)]
pub struct GraphContext {
    backend: Arc<dyn GraphBackend>,
    registry: Arc<SchemaRegistry>,
}

impl GraphContext {
    /// Context over an open backend and a built registry.
    pub fn new(backend: Arc<dyn GraphBackend>, registry: Arc<SchemaRegistry>) -> Self {
        Self { backend, registry }
    }

    /// Open backend.
    pub fn backend(&self) -> &dyn GraphBackend {
        self.backend.as_ref()
    }

    /// Built schema registry.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Entity mapper over this context.
    pub fn persistence(&self) -> Persistence<'_> {
        Persistence::new(self)
    }
}

impl fmt::Debug for GraphContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphContext")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Backend element of an entity of type `ty` with identity `id`.
pub(crate) fn element_of(ty: &EntityType, id: u64) -> Element {
    if ty.is_relationship() {
        Element::Relationship(id)
    } else {
        Element::Node(id)
    }
}
