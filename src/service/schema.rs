//! Keeping backend constraints and indices in line with the registry.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::info;

use crate::backend::{GraphBackend, SchemaObject};
use crate::error::Result;
use crate::schema::SchemaRegistry;

/// Schema objects a reconciliation created and dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    /// Objects created on the backend.
    pub created: Vec<SchemaObject>,
    /// Objects dropped from the backend.
    pub dropped: Vec<SchemaObject>,
}

impl SchemaReport {
    /// True when nothing changed.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.dropped.is_empty()
    }
}

/// Objects the registry asks for: a uniqueness constraint on `uuid` for
/// every concrete node type, plus one constraint or index per annotated
/// field, declared on the label of the type owning the field.
pub fn desired(registry: &SchemaRegistry) -> BTreeSet<SchemaObject> {
    let mut objects = BTreeSet::new();
    for ty in registry.types().filter(|ty| !ty.is_relationship()) {
        if !ty.is_abstract() {
            objects.insert(SchemaObject::Unique {
                label: ty.name().to_owned(),
                property: "uuid".to_owned(),
            });
        }
        for field in ty.scalar_fields() {
            let label = field.owner.clone();
            let property = field.name.clone();
            if field.is_unique() {
                objects.insert(SchemaObject::Unique { label, property });
            } else if field.wants_index() {
                objects.insert(SchemaObject::Index { label, property });
            }
        }
    }
    objects
}

/// Creates missing objects and drops those no longer declared. Running it
/// twice leaves the second report empty. Needs a transaction.
pub fn reconcile(backend: &dyn GraphBackend, registry: &SchemaRegistry) -> Result<SchemaReport> {
    let wanted = desired(registry);
    let existing: BTreeSet<SchemaObject> = backend.schema_objects()?.into_iter().collect();
    let mut report = SchemaReport::default();

    for object in existing.difference(&wanted) {
        backend.drop_schema(object)?;
        info!(%object, "schema object dropped");
        report.dropped.push(object.clone());
    }
    for object in wanted.difference(&existing) {
        backend.create_schema(object)?;
        info!(%object, "schema object created");
        report.created.push(object.clone());
    }
    Ok(report)
}
