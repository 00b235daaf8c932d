//! Structured search parameters and their wire encodings.

pub mod fields;
pub mod filter;
pub mod wire;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

pub use fields::{FieldList, QueryField, ALL_FIELDS};
pub use filter::{Filter, PropertyFilter};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Smallest first; nulls first.
    #[default]
    Asc,
    /// Largest first.
    Desc,
}

/// One ordering clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Ordered property.
    pub field: String,
    /// Direction.
    #[serde(default)]
    pub dir: SortOrder,
}

impl OrderBy {
    /// Ascending order on `field`.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            dir: SortOrder::Asc,
        }
    }

    /// Descending order on `field`.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            dir: SortOrder::Desc,
        }
    }
}

/// Everything a search can be asked for.
///
/// `start`, `limit` and `page` stay optional until [`resolve`](Self::resolve)
/// turns a page number into an offset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchParameters {
    /// Free-text term.
    #[serde(alias = "q", skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Point lookup by backend identity.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<u64>,
    /// Point lookup by uuid.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub uuids: Vec<String>,
    /// Only the number of matches is wanted.
    pub count: bool,
    /// Offset of the first result; wins over `page`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,
    /// Maximum number of results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// 1-based page number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    /// Locale hint passed along with the search.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Relationship hops followed when expanding related fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<usize>,
    /// Ordering clauses, applied in turn.
    #[serde(alias = "order", skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,
    /// Property filters, all of which must match.
    #[serde(alias = "filter", skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<PropertyFilter>,
    /// Fields to load; empty means `all`.
    pub fields: FieldList,
    /// Related fields whose items are returned instead of the primaries.
    #[serde(alias = "return", skip_serializing_if = "Vec::is_empty")]
    pub returns: Vec<String>,
}

impl SearchParameters {
    /// Empty parameters: everything, in storage order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Turns `page` into `start` when no explicit start was given. After
    /// this, `start` is authoritative.
    ///
    /// # Errors
    /// `InvalidArgument` when the page offset does not fit in a `usize`.
    pub fn resolve(&mut self) -> Result<()> {
        if self.start.is_none() {
            if let (Some(page), Some(limit)) = (self.page, self.limit) {
                if page > 1 {
                    let start = (page - 1).checked_mul(limit).ok_or_else(|| {
                        GraphError::InvalidArgument(format!(
                            "page {page} of {limit} items is out of range"
                        ))
                    })?;
                    self.start = Some(start);
                }
            }
        }
        Ok(())
    }

    /// Offset after resolution.
    pub fn resolved_start(&self) -> Result<usize> {
        let mut copy = self.clone();
        copy.resolve()?;
        Ok(copy.start.unwrap_or(0))
    }

    /// Requested fields, `all` when none were named.
    pub fn field_list(&self) -> FieldList {
        if self.fields.is_empty() {
            FieldList::all()
        } else {
            self.fields.clone()
        }
    }

    /// Expansion depth, at least 1.
    pub fn depth_or_default(&self) -> usize {
        self.depth.unwrap_or(1).max(1)
    }

    /// Pure point lookup by ids or by uuids, answerable without a query.
    pub fn is_point_lookup(&self) -> bool {
        let keys = match (self.ids.is_empty(), self.uuids.is_empty()) {
            (false, true) => self.ids.len(),
            (true, false) => self.uuids.len(),
            _ => return false,
        };
        self.filters.is_empty()
            && self.order_by.is_empty()
            && self.query.is_none()
            && self.returns.is_empty()
            && self.start.is_none()
            && self.page.is_none()
            && self.limit.map_or(true, |limit| limit >= keys)
    }
}
