//! Compiling search parameters into backend queries.
//!
//! A [`GraphQuery`] carries the rendered query text, the bound parameter
//! values and the structured [`plan::QueryPlan`] the text was rendered from.

use std::collections::BTreeMap;
use std::fmt;

use crate::value::Value;

/// Query builder turning search parameters into a [`GraphQuery`].
///
/// Resolves field names against the repository's entity type and binds every
/// literal as a parameter.
pub mod builder;

/// Structured query representation evaluated by backends.
pub mod plan;

/// Cypher-like rendering of plans for logging and text-based backends.
pub mod render;

pub use builder::QueryBuilder;
pub use plan::QueryPlan;

/// Executable query: text, bound parameters and plan.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphQuery {
    /// Rendered query text.
    pub text: String,
    /// Parameter values referenced as `$name` in the text.
    pub params: BTreeMap<String, Value>,
    /// Structured plan.
    pub plan: QueryPlan,
}

impl GraphQuery {
    /// Renders the plan into a query.
    pub fn new(plan: QueryPlan, params: BTreeMap<String, Value>) -> Self {
        let text = render::render(&plan);
        Self { text, params, plan }
    }
}

impl fmt::Display for GraphQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
