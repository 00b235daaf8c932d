//! Storage backend contract and the bundled in-memory graph.

mod eval;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ServiceConfig;
use crate::error::Result;
use crate::query::GraphQuery;
use crate::schema::Direction;
use crate::value::Value;

pub use memory::MemoryBackend;

/// Stored node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Backend identity.
    pub id: u64,
    /// Type labels.
    pub labels: Vec<String>,
    /// Properties by name.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl NodeRecord {
    /// True when the node carries `label`.
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Stored relationship.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelRecord {
    /// Backend identity.
    pub id: u64,
    /// Relationship type.
    pub rel_type: String,
    /// Start node id.
    pub start: u64,
    /// End node id.
    pub end: u64,
    /// Properties by name.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl RelRecord {
    /// The endpoint opposite to `node`.
    pub fn other(&self, node: u64) -> u64 {
        if self.start == node {
            self.end
        } else {
            self.start
        }
    }
}

/// Addressable property container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Element {
    /// A node id.
    Node(u64),
    /// A relationship id.
    Relationship(u64),
}

/// One column of a result row.
#[derive(Clone, Debug, PartialEq)]
pub enum Binding {
    /// Node id.
    Node(u64),
    /// Relationship id.
    Relationship(u64),
    /// Computed value.
    Value(Value),
    /// Unmatched optional column.
    Null,
}

impl Binding {
    /// True for unmatched columns.
    pub fn is_null(&self) -> bool {
        matches!(self, Binding::Null)
    }

    /// Element addressed by the binding, if any.
    pub fn element(&self) -> Option<Element> {
        match self {
            Binding::Node(id) => Some(Element::Node(*id)),
            Binding::Relationship(id) => Some(Element::Relationship(*id)),
            _ => None,
        }
    }
}

/// Named columns of a result row.
pub type Row = BTreeMap<String, Binding>;

/// Forward-only stream of result rows.
pub type RowStream = Box<dyn Iterator<Item = Result<Row>> + Send>;

/// Uniqueness constraint or index on `(label, property)`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SchemaObject {
    /// Uniqueness constraint.
    Unique {
        /// Constrained label.
        label: String,
        /// Constrained property.
        property: String,
    },
    /// Plain index.
    Index {
        /// Indexed label.
        label: String,
        /// Indexed property.
        property: String,
    },
}

impl SchemaObject {
    /// Label the object applies to.
    pub fn label(&self) -> &str {
        match self {
            SchemaObject::Unique { label, .. } | SchemaObject::Index { label, .. } => label,
        }
    }

    /// Property the object applies to.
    pub fn property(&self) -> &str {
        match self {
            SchemaObject::Unique { property, .. } | SchemaObject::Index { property, .. } => {
                property
            }
        }
    }
}

impl fmt::Display for SchemaObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaObject::Unique { label, property } => {
                write!(f, "CONSTRAINT ON (n:{label}) ASSERT n.{property} IS UNIQUE")
            }
            SchemaObject::Index { label, property } => write!(f, "INDEX ON :{label}({property})"),
        }
    }
}

/// Operations the persistence layer needs from a graph store.
///
/// Writes happen inside a transaction opened with [`begin`](Self::begin).
/// Nested `begin` calls join the open transaction.
pub trait GraphBackend: Send + Sync {
    /// Opens, or joins, a transaction.
    fn begin(&self) -> Result<()>;
    /// Commits the innermost level; the outermost level makes changes durable.
    fn commit(&self) -> Result<()>;
    /// Rolls back; a nested rollback dooms the whole transaction.
    fn rollback(&self) -> Result<()>;
    /// True while the calling thread has a transaction open.
    fn in_transaction(&self) -> bool;

    /// Creates a node with the given labels.
    fn create_node(&self, labels: &[String]) -> Result<u64>;
    /// Looks up a node.
    fn node(&self, id: u64) -> Result<Option<NodeRecord>>;
    /// Ids of nodes carrying `label`, ascending.
    fn nodes_by_label(&self, label: &str) -> Result<Vec<u64>>;
    /// Ids of nodes carrying `label` whose `key` property equals `value`.
    fn nodes_by_property(&self, label: &str, key: &str, value: &Value) -> Result<Vec<u64>>;
    /// Deletes a node without relationships.
    fn delete_node(&self, id: u64) -> Result<()>;

    /// Sets a property, enforcing uniqueness constraints.
    fn set_property(&self, element: Element, key: &str, value: Value) -> Result<()>;
    /// Removes a property if present.
    fn remove_property(&self, element: Element, key: &str) -> Result<()>;

    /// Creates a relationship from `start` to `end`.
    fn create_relationship(&self, start: u64, end: u64, rel_type: &str) -> Result<u64>;
    /// Looks up a relationship.
    fn relationship(&self, id: u64) -> Result<Option<RelRecord>>;
    /// Deletes a relationship.
    fn delete_relationship(&self, id: u64) -> Result<()>;
    /// Relationships of `node` in `direction`, optionally of one type.
    fn relationships(
        &self,
        node: u64,
        direction: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<RelRecord>>;

    /// Executes a built query.
    fn execute(&self, query: &GraphQuery) -> Result<RowStream>;

    /// Lists constraints and indexes.
    fn schema_objects(&self) -> Result<Vec<SchemaObject>>;
    /// Creates a constraint or index.
    fn create_schema(&self, object: &SchemaObject) -> Result<()>;
    /// Drops a constraint or index.
    fn drop_schema(&self, object: &SchemaObject) -> Result<()>;

    /// Releases the store. Later calls fail.
    fn close(&self) -> Result<()>;
}

/// Opens the backend for a configuration.
pub type BackendOpener = Arc<dyn Fn(&ServiceConfig) -> Result<Arc<dyn GraphBackend>> + Send + Sync>;

/// Opener used when none is configured: an in-memory graph, snapshotted to
/// `location` when one is set.
pub fn default_opener() -> BackendOpener {
    Arc::new(|config: &ServiceConfig| {
        let backend = match &config.location {
            Some(path) => MemoryBackend::open(path)?,
            None => MemoryBackend::new(),
        };
        Ok(Arc::new(backend) as Arc<dyn GraphBackend>)
    })
}
