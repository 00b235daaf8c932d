//! Entity type definitions and the schema registry.

pub mod field;
pub mod registry;

pub use field::{
    Annotations, Cardinality, Direction, FieldDef, FieldDescriptor, FieldType, RelatedTo, Rule,
};
pub use registry::{
    EntityKind, EntityType, Model, Namespace, SchemaRegistry, TypeDescriptor, RESERVED_FIELDS,
};
