//! Penumbra maps typed entities onto the nodes and relationships of an
//! embedded graph.
//!
//! Entity types are described once in a [`SchemaRegistry`]. A [`Service`]
//! opens the backend, reconciles constraints and indices with the registry
//! and runs version-gated [`Patch`]es. [`Repository`] handles then save
//! entities with change tracking and run [`Search`]es compiled into graph
//! queries.
//!
//! ```rust
//! use penumbra::{Entity, FieldDef, Namespace, Service, ServiceConfig, TypeDescriptor};
//!
//! let service = Service::new(ServiceConfig::default()).with_namespace(
//!     Namespace::new("people")
//!         .with_type(TypeDescriptor::node("Person").field(FieldDef::string("name").required())),
//! );
//! service.connect()?;
//! let people = service.repository("Person")?;
//! service.transaction(|_| people.save(&mut Entity::new("Person").with("name", "Ada")))?;
//! assert_eq!(people.search().count()?, 1);
//! service.shutdown()?;
//! # Ok::<(), penumbra::GraphError>(())
//! ```

pub mod backend;
pub mod config;
pub mod entity;
pub mod error;
pub mod logging;
pub mod params;
pub mod patch;
pub mod persistence;
pub mod query;
pub mod repository;
pub mod schema;
pub mod search;
pub mod service;
pub mod value;

pub use backend::{GraphBackend, MemoryBackend};
pub use config::ServiceConfig;
pub use entity::{Entity, FieldValue};
pub use error::{GraphError, Result};
pub use params::{FieldList, Filter, SearchParameters};
pub use patch::{FnPatch, Patch};
pub use repository::Repository;
pub use schema::{
    Cardinality, Direction, FieldDef, Model, Namespace, RelatedTo, SchemaRegistry,
    TypeDescriptor,
};
pub use search::Search;
pub use service::{Service, ServiceState, Transaction};
pub use value::Value;
