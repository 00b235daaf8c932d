//! The graph marker: a single `Graph` node holding the stored version.

use tracing::info;

use crate::backend::{Element, GraphBackend};
use crate::error::Result;
use crate::patch::NO_VERSION;
use crate::value::Value;

/// Label of the marker node.
pub const GRAPH_LABEL: &str = "Graph";
/// Marker property holding the stored version.
pub const VERSION_PROPERTY: &str = "version";

fn marker(backend: &dyn GraphBackend) -> Result<Option<u64>> {
    Ok(backend.nodes_by_label(GRAPH_LABEL)?.first().copied())
}

/// Stored version, `0.0.0` when the marker or its version is missing.
pub fn read_version(backend: &dyn GraphBackend) -> Result<String> {
    let Some(id) = marker(backend)? else {
        return Ok(NO_VERSION.to_owned());
    };
    let version = backend
        .node(id)?
        .and_then(|node| node.properties.get(VERSION_PROPERTY).cloned());
    Ok(match version {
        Some(Value::String(version)) => version,
        _ => NO_VERSION.to_owned(),
    })
}

/// Creates the marker on a fresh graph. Needs a transaction.
pub fn ensure(backend: &dyn GraphBackend) -> Result<u64> {
    if let Some(id) = marker(backend)? {
        return Ok(id);
    }
    let id = backend.create_node(&[GRAPH_LABEL.to_owned()])?;
    info!(id, "graph marker created");
    Ok(id)
}

/// Stores `version` on the marker. Needs a transaction.
pub fn write_version(backend: &dyn GraphBackend, version: &str) -> Result<()> {
    let id = ensure(backend)?;
    backend.set_property(Element::Node(id), VERSION_PROPERTY, Value::from(version))?;
    info!(%version, "graph version stored");
    Ok(())
}
