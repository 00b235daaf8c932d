//! Structured form of a built query.
//!
//! The plan is what backends evaluate; the rendered text carried next to it
//! in [`GraphQuery`](super::GraphQuery) is the same query in Cypher-like
//! syntax for logging and for backends that execute text.

use crate::schema::Direction;

/// Elements a query starts from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// Every node carrying the label.
    Nodes {
        /// Label the nodes must carry.
        label: String,
    },
    /// Every relationship of the type.
    Relationships {
        /// Relationship type name.
        rel_type: String,
    },
}

/// Comparison operator of a property predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `IS NULL`
    IsNull,
    /// `IS NOT NULL`
    IsNotNull,
}

impl CmpOp {
    /// Operator text as rendered in the query.
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::IsNull => "IS NULL",
            CmpOp::IsNotNull => "IS NOT NULL",
        }
    }

    /// Whether the operator takes a bound parameter.
    pub fn is_unary(self) -> bool {
        matches!(self, CmpOp::IsNull | CmpOp::IsNotNull)
    }
}

/// Filter applied to the primary elements.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Predicate {
    /// Backend identity is one of the listed ids.
    IdIn {
        /// Parameter holding the id list.
        param: String,
    },
    /// `uuid` property is one of the listed values.
    UuidIn {
        /// Parameter holding the uuid list.
        param: String,
    },
    /// Property comparison.
    Compare {
        /// Property name.
        field: String,
        /// Operator.
        op: CmpOp,
        /// Bound parameter; `None` for unary operators.
        param: Option<String>,
    },
    /// Case-insensitive containment over any of the fields.
    Text {
        /// Searched string properties.
        fields: Vec<String>,
        /// Parameter holding the search term.
        param: String,
    },
}

/// One ordering clause.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderClause {
    /// Property name on the primary element.
    pub field: String,
    /// Descending when true.
    pub descending: bool,
}

/// What an expansion binds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpansionYield {
    /// The node at the far end.
    Node,
    /// The traversed relationship itself.
    Relationship,
}

/// Optional traversal from the primary element along a related field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expansion {
    /// Variable the matches are bound to (the field name).
    pub var: String,
    /// Relationship type followed.
    pub rel_type: String,
    /// Direction relative to the primary element.
    pub direction: Direction,
    /// Maximum number of hops.
    pub depth: usize,
    /// Whether nodes or relationships are bound.
    pub yields: ExpansionYield,
    /// Label reached nodes must carry.
    pub target_label: Option<String>,
}

/// Shape of the returned rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Projection {
    /// Primary element plus one column per expansion.
    Rows,
    /// Distinct items of one expansion variable.
    Distinct {
        /// Returned variable.
        var: String,
    },
    /// Single `count` column; counts the variable's distinct items when set.
    Count {
        /// Counted expansion variable, primaries when `None`.
        var: Option<String>,
    },
    /// Single `sum` column over a primary property.
    Sum {
        /// Summed property.
        field: String,
    },
}

/// Which elements `skip`/`limit` apply to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PageScope {
    /// Primary elements, before expansion.
    #[default]
    Primary,
    /// Items returned by a [`Projection::Distinct`].
    Returned,
}

/// Complete structured query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryPlan {
    /// Variable bound to primary elements.
    pub var: String,
    /// Primary element selection.
    pub target: Target,
    /// Conjunction of predicates.
    pub predicates: Vec<Predicate>,
    /// Ordering of primary elements.
    pub order: Vec<OrderClause>,
    /// Elements skipped.
    pub skip: Option<usize>,
    /// Maximum number of elements.
    pub limit: Option<usize>,
    /// Where pagination applies.
    pub page_scope: PageScope,
    /// Optional traversals.
    pub expansions: Vec<Expansion>,
    /// Returned columns.
    pub projection: Projection,
}

impl QueryPlan {
    /// Plan selecting every element of `target`, bound to `var`.
    pub fn new(var: impl Into<String>, target: Target) -> Self {
        Self {
            var: var.into(),
            target,
            predicates: Vec::new(),
            order: Vec::new(),
            skip: None,
            limit: None,
            page_scope: PageScope::Primary,
            expansions: Vec::new(),
            projection: Projection::Rows,
        }
    }

    /// Expansion bound to `var`.
    pub fn expansion(&self, var: &str) -> Option<&Expansion> {
        self.expansions.iter().find(|e| e.var == var)
    }
}
