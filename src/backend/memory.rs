//! In-memory graph with snapshot-based transactions.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::{eval, Element, GraphBackend, NodeRecord, RelRecord, RowStream, SchemaObject};
use crate::error::{GraphError, Result, Violation};
use crate::query::GraphQuery;
use crate::schema::Direction;
use crate::value::Value;

/// Complete graph contents; also the snapshot file format.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct GraphState {
    pub(crate) next_node: u64,
    pub(crate) next_rel: u64,
    pub(crate) nodes: BTreeMap<u64, NodeRecord>,
    pub(crate) rels: BTreeMap<u64, RelRecord>,
    pub(crate) schema: BTreeSet<SchemaObject>,
}

impl GraphState {
    pub(crate) fn relationships_of(
        &self,
        node: u64,
        direction: Direction,
        rel_type: Option<&str>,
    ) -> impl Iterator<Item = &RelRecord> + '_ {
        let rel_type = rel_type.map(str::to_owned);
        self.rels.values().filter(move |rel| {
            let touches = match direction {
                Direction::Outgoing => rel.start == node,
                Direction::Incoming => rel.end == node,
                Direction::Both => rel.start == node || rel.end == node,
            };
            touches && rel_type.as_deref().map_or(true, |t| rel.rel_type == t)
        })
    }

    fn properties_mut(&mut self, element: Element) -> Result<&mut BTreeMap<String, Value>> {
        match element {
            Element::Node(id) => self
                .nodes
                .get_mut(&id)
                .map(|n| &mut n.properties)
                .ok_or_else(|| GraphError::not_found(format!("node {id}"))),
            Element::Relationship(id) => self
                .rels
                .get_mut(&id)
                .map(|r| &mut r.properties)
                .ok_or_else(|| GraphError::not_found(format!("relationship {id}"))),
        }
    }

    /// Fails when another node under a uniqueness constraint already holds
    /// `value`.
    fn check_unique(&self, element: Element, key: &str, value: &Value) -> Result<()> {
        let Element::Node(id) = element else {
            return Ok(());
        };
        if value.is_null() {
            return Ok(());
        }
        let Some(node) = self.nodes.get(&id) else {
            return Ok(());
        };
        for object in &self.schema {
            let SchemaObject::Unique { label, property } = object else {
                continue;
            };
            if property != key || !node.has_label(label) {
                continue;
            }
            let clash = self.nodes.values().any(|other| {
                other.id != id
                    && other.has_label(label)
                    && other
                        .properties
                        .get(key)
                        .is_some_and(|existing| existing.loosely_equals(value))
            });
            if clash {
                return Err(GraphError::ConstraintViolation {
                    entity: label.clone(),
                    violations: vec![Violation::new(
                        key,
                        format!("already exists with value {value}"),
                    )],
                });
            }
        }
        Ok(())
    }

    fn check_constraint(&self, object: &SchemaObject) -> Result<()> {
        let SchemaObject::Unique { label, property } = object else {
            return Ok(());
        };
        let mut seen: Vec<&Value> = Vec::new();
        for node in self.nodes.values().filter(|n| n.has_label(label)) {
            let Some(value) = node.properties.get(property).filter(|v| !v.is_null()) else {
                continue;
            };
            if seen.iter().any(|v| v.loosely_equals(value)) {
                return Err(GraphError::ConstraintViolation {
                    entity: label.clone(),
                    violations: vec![Violation::new(
                        property.as_str(),
                        format!("duplicate value {value} prevents the constraint"),
                    )],
                });
            }
            seen.push(value);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct TxFrame {
    snapshot: GraphState,
    /// Thread that began the outermost transaction; only it may nest,
    /// write, commit or roll back.
    owner: ThreadId,
    depth: usize,
    rollback_only: bool,
}

#[derive(Debug)]
struct Inner {
    state: GraphState,
    tx: Option<TxFrame>,
    path: Option<PathBuf>,
    closed: bool,
}

impl Inner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(GraphError::Backend("backend is closed".into()));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        self.own_frame().map(|_| ())
    }

    fn owns_transaction(&self) -> bool {
        self.tx
            .as_ref()
            .is_some_and(|frame| frame.owner == thread::current().id())
    }

    /// The calling thread's transaction frame.
    fn own_frame(&self) -> Result<&TxFrame> {
        self.tx
            .as_ref()
            .filter(|frame| frame.owner == thread::current().id())
            .ok_or(GraphError::NoTransaction)
    }

    fn write_snapshot(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&self.state)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        trace!(path = %path.display(), "snapshot written");
        Ok(())
    }
}

/// Embedded graph store kept in memory.
///
/// One transaction at a time. Nested `begin` calls join the transaction only
/// on the thread that opened it; other threads block until it ends. A
/// rollback restores the snapshot taken when the outermost transaction
/// began. When opened with a path, the graph is loaded from a JSON snapshot
/// and rewritten after every outermost commit.
#[derive(Debug)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
    released: Condvar,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Empty, purely in-memory graph.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: GraphState::default(),
                tx: None,
                path: None,
                closed: false,
            }),
            released: Condvar::new(),
        }
    }

    /// Graph persisted to `path`; loads the existing snapshot if there is one.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let bytes = fs::read(&path)?;
            let state: GraphState = serde_json::from_slice(&bytes)?;
            info!(
                path = %path.display(),
                nodes = state.nodes.len(),
                relationships = state.rels.len(),
                "graph snapshot loaded"
            );
            state
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            GraphState::default()
        };
        Ok(Self {
            inner: Mutex::new(Inner {
                state,
                tx: None,
                path: Some(path),
                closed: false,
            }),
            released: Condvar::new(),
        })
    }

    /// Number of stored nodes.
    pub fn node_count(&self) -> usize {
        self.inner.lock().state.nodes.len()
    }

    /// Number of stored relationships.
    pub fn relationship_count(&self) -> usize {
        self.inner.lock().state.rels.len()
    }

    /// Ends the outermost transaction and wakes threads waiting to begin.
    fn release(&self, inner: &mut MutexGuard<'_, Inner>) -> Option<TxFrame> {
        let frame = inner.tx.take();
        self.released.notify_all();
        frame
    }
}

impl GraphBackend for MemoryBackend {
    fn begin(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let current = thread::current().id();
        loop {
            inner.ensure_open()?;
            match inner.tx.as_mut() {
                Some(frame) if frame.owner == current => {
                    frame.depth += 1;
                    trace!(depth = frame.depth, "joined transaction");
                    return Ok(());
                }
                Some(_) => {
                    trace!("waiting for another thread's transaction");
                    self.released.wait(&mut inner);
                }
                None => {
                    let snapshot = inner.state.clone();
                    inner.tx = Some(TxFrame {
                        snapshot,
                        owner: current,
                        depth: 1,
                        rollback_only: false,
                    });
                    trace!("transaction started");
                    return Ok(());
                }
            }
        }
    }

    fn commit(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.own_frame()?.depth > 1 {
            if let Some(frame) = inner.tx.as_mut() {
                frame.depth -= 1;
            }
            return Ok(());
        }
        let Some(frame) = self.release(&mut inner) else {
            return Err(GraphError::NoTransaction);
        };
        if frame.rollback_only {
            inner.state = frame.snapshot;
            debug!("commit of a transaction marked rollback-only");
            return Err(GraphError::RolledBack);
        }
        if let Err(err) = inner.write_snapshot() {
            inner.state = frame.snapshot;
            warn!(error = %err, "snapshot write failed, transaction discarded");
            return Err(err);
        }
        trace!("transaction committed");
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.own_frame()?.depth > 1 {
            if let Some(frame) = inner.tx.as_mut() {
                frame.depth -= 1;
                frame.rollback_only = true;
            }
            return Ok(());
        }
        if let Some(frame) = self.release(&mut inner) {
            inner.state = frame.snapshot;
        }
        trace!("transaction rolled back");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.inner.lock().owns_transaction()
    }

    fn create_node(&self, labels: &[String]) -> Result<u64> {
        let mut inner = self.inner.lock();
        inner.ensure_writable()?;
        let state = &mut inner.state;
        state.next_node += 1;
        let id = state.next_node;
        state.nodes.insert(
            id,
            NodeRecord {
                id,
                labels: labels.to_vec(),
                properties: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    fn node(&self, id: u64) -> Result<Option<NodeRecord>> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner.state.nodes.get(&id).cloned())
    }

    fn nodes_by_label(&self, label: &str) -> Result<Vec<u64>> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner
            .state
            .nodes
            .values()
            .filter(|n| n.has_label(label))
            .map(|n| n.id)
            .collect())
    }

    fn nodes_by_property(&self, label: &str, key: &str, value: &Value) -> Result<Vec<u64>> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner
            .state
            .nodes
            .values()
            .filter(|n| n.has_label(label))
            .filter(|n| n.properties.get(key).is_some_and(|v| v.loosely_equals(value)))
            .map(|n| n.id)
            .collect())
    }

    fn delete_node(&self, id: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_writable()?;
        if !inner.state.nodes.contains_key(&id) {
            return Err(GraphError::not_found(format!("node {id}")));
        }
        let attached = inner
            .state
            .relationships_of(id, Direction::Both, None)
            .count();
        if attached > 0 {
            return Err(GraphError::Backend(format!(
                "node {id} still has {attached} relationship(s)"
            )));
        }
        inner.state.nodes.remove(&id);
        Ok(())
    }

    fn set_property(&self, element: Element, key: &str, value: Value) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_writable()?;
        inner.state.check_unique(element, key, &value)?;
        inner
            .state
            .properties_mut(element)?
            .insert(key.to_owned(), value);
        Ok(())
    }

    fn remove_property(&self, element: Element, key: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_writable()?;
        inner.state.properties_mut(element)?.remove(key);
        Ok(())
    }

    fn create_relationship(&self, start: u64, end: u64, rel_type: &str) -> Result<u64> {
        let mut inner = self.inner.lock();
        inner.ensure_writable()?;
        let state = &mut inner.state;
        for endpoint in [start, end] {
            if !state.nodes.contains_key(&endpoint) {
                return Err(GraphError::not_found(format!("node {endpoint}")));
            }
        }
        state.next_rel += 1;
        let id = state.next_rel;
        state.rels.insert(
            id,
            RelRecord {
                id,
                rel_type: rel_type.to_owned(),
                start,
                end,
                properties: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    fn relationship(&self, id: u64) -> Result<Option<RelRecord>> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner.state.rels.get(&id).cloned())
    }

    fn delete_relationship(&self, id: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_writable()?;
        inner
            .state
            .rels
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| GraphError::not_found(format!("relationship {id}")))
    }

    fn relationships(
        &self,
        node: u64,
        direction: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<RelRecord>> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner
            .state
            .relationships_of(node, direction, rel_type)
            .cloned()
            .collect())
    }

    fn execute(&self, query: &GraphQuery) -> Result<RowStream> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        let rows = eval::evaluate(&inner.state, query)?;
        Ok(Box::new(rows.into_iter().map(Ok)))
    }

    fn schema_objects(&self) -> Result<Vec<SchemaObject>> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner.state.schema.iter().cloned().collect())
    }

    fn create_schema(&self, object: &SchemaObject) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_writable()?;
        inner.state.check_constraint(object)?;
        inner.state.schema.insert(object.clone());
        Ok(())
    }

    fn drop_schema(&self, object: &SchemaObject) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_writable()?;
        if !inner.state.schema.remove(object) {
            return Err(GraphError::not_found(object));
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        if let Some(frame) = self.release(&mut inner) {
            inner.state = frame.snapshot;
            debug!("open transaction discarded on close");
        }
        Ok(())
    }
}
