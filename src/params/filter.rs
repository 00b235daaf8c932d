//! Property filters of a search.

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::value::Value;

/// Comparison applied to one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Filter {
    /// Property equals the value; `null` matches absent properties.
    Equals {
        /// Compared value.
        value: Value,
    },
    /// Property differs from the value.
    NotEquals {
        /// Compared value.
        value: Value,
    },
    /// Property is below the value.
    LessThan {
        /// Upper bound.
        value: Value,
        /// Whether the bound itself matches.
        #[serde(default)]
        including: bool,
    },
    /// Property is above the value.
    GreaterThan {
        /// Lower bound.
        value: Value,
        /// Whether the bound itself matches.
        #[serde(default)]
        including: bool,
    },
    /// Property lies between two bounds.
    Range {
        /// Lower bound.
        from: Value,
        /// Upper bound.
        to: Value,
        /// Whether the bounds themselves match.
        #[serde(default = "inclusive")]
        including: bool,
    },
}

fn inclusive() -> bool {
    true
}

impl Filter {
    /// Parses the wire form: `!v`, `<v`, `<=v`, `>v`, `>=v`, `(lo-hi)`, `=v`
    /// or a bare value. Values are typed with [`Value::guess`].
    pub fn parse(raw: &str) -> Result<Filter> {
        let raw = raw.trim();
        let filter = if let Some(rest) = raw.strip_prefix('!') {
            Filter::NotEquals {
                value: Value::guess(rest.trim()),
            }
        } else if let Some(rest) = raw.strip_prefix("<=") {
            Filter::LessThan {
                value: Value::guess(rest.trim()),
                including: true,
            }
        } else if let Some(rest) = raw.strip_prefix('<') {
            Filter::LessThan {
                value: Value::guess(rest.trim()),
                including: false,
            }
        } else if let Some(rest) = raw.strip_prefix(">=") {
            Filter::GreaterThan {
                value: Value::guess(rest.trim()),
                including: true,
            }
        } else if let Some(rest) = raw.strip_prefix('>') {
            Filter::GreaterThan {
                value: Value::guess(rest.trim()),
                including: false,
            }
        } else if let Some(inner) = raw.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
            let (from, to) = split_range(inner).ok_or_else(|| {
                GraphError::InvalidArgument(format!("range filter '{raw}' needs the form (lo-hi)"))
            })?;
            Filter::Range {
                from: Value::guess(from),
                to: Value::guess(to),
                including: true,
            }
        } else if let Some(rest) = raw.strip_prefix('=') {
            Filter::Equals {
                value: Value::guess(rest.trim()),
            }
        } else {
            Filter::Equals {
                value: Value::guess(raw),
            }
        };
        Ok(filter)
    }
}

/// Splits `lo-hi` at the separating dash, allowing a negative lower bound.
fn split_range(inner: &str) -> Option<(&str, &str)> {
    let inner = inner.trim();
    let search_from = usize::from(inner.starts_with('-'));
    let idx = inner[search_from..].find('-')? + search_from;
    let (from, to) = (inner[..idx].trim(), inner[idx + 1..].trim());
    if from.is_empty() || to.is_empty() {
        return None;
    }
    Some((from, to))
}

/// A filter bound to a property name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    /// Filtered property.
    pub field: String,
    /// Comparison applied to it.
    #[serde(flatten)]
    pub filter: Filter,
}

impl PropertyFilter {
    /// Filter on `field`.
    pub fn new(field: impl Into<String>, filter: Filter) -> Self {
        Self {
            field: field.into(),
            filter,
        }
    }

    /// Parses `field:expression`.
    pub fn parse(raw: &str) -> Result<Self> {
        let (field, expr) = raw.split_once(':').ok_or_else(|| {
            GraphError::InvalidArgument(format!("filter '{raw}' needs the form field:value"))
        })?;
        let field = field.trim();
        if field.is_empty() {
            return Err(GraphError::InvalidArgument(format!(
                "filter '{raw}' has no field name"
            )));
        }
        Ok(Self::new(field, Filter::parse(expr)?))
    }
}
