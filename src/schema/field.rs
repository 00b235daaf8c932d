//! Field definitions and the shared per-field descriptors computed from them.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Direction of a relationship relative to the owning entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Relationship starts at the owning entity.
    #[default]
    Outgoing,
    /// Relationship ends at the owning entity.
    Incoming,
    /// Either direction.
    Both,
}

impl Direction {
    /// Arrow rendering used in query text, e.g. `-[:T]->`.
    pub fn arrows(self) -> (&'static str, &'static str) {
        match self {
            Direction::Outgoing => ("-", "->"),
            Direction::Incoming => ("<-", "-"),
            Direction::Both => ("-", "-"),
        }
    }
}

/// Relationship target of a related field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedTo {
    /// Relationship type name in the graph.
    pub rel_type: String,
    /// Direction followed from the owning entity.
    #[serde(default)]
    pub direction: Direction,
    /// Entity type at the other end, or the relationship entity type itself.
    pub target: String,
}

impl RelatedTo {
    /// Relationships from the owner to the target.
    pub fn outgoing(rel_type: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(rel_type, Direction::Outgoing, target)
    }

    /// Relationships from the target to the owner.
    pub fn incoming(rel_type: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(rel_type, Direction::Incoming, target)
    }

    /// Relationships in either direction.
    pub fn both(rel_type: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(rel_type, Direction::Both, target)
    }

    fn new(rel_type: impl Into<String>, direction: Direction, target: impl Into<String>) -> Self {
        Self {
            rel_type: rel_type.into(),
            direction,
            target: target.into(),
        }
    }
}

/// How many related entities a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// At most one related entity.
    Single,
    /// Ordered collection, duplicates allowed.
    List,
    /// Collection distinct by identity.
    Set,
}

/// Declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Boolean property.
    Bool,
    /// Integer property.
    Int,
    /// Floating point property.
    Float,
    /// String property.
    String,
    /// List-valued property.
    List,
    /// Untyped property.
    Any,
    /// Relationship to other entities.
    Related(Cardinality),
}

impl FieldType {
    /// True for relationship-backed fields.
    pub fn is_related(self) -> bool {
        matches!(self, FieldType::Related(_))
    }

    /// Checks that `value` can be stored in a field of this type. Integers
    /// are accepted by float fields.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldType::Any, _) => true,
            (FieldType::Bool, Value::Bool(_)) => true,
            (FieldType::Int, Value::Int(_)) => true,
            (FieldType::Float, Value::Int(_) | Value::Float(_)) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::List, Value::List(_)) => true,
            _ => false,
        }
    }
}

/// Declarative validation rule checked before a save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rule {
    /// String must contain a non-whitespace character.
    NotBlank,
    /// Minimum string or list length.
    MinLength {
        /// Inclusive bound.
        value: usize,
    },
    /// Maximum string or list length.
    MaxLength {
        /// Inclusive bound.
        value: usize,
    },
    /// Minimum numeric value.
    Min {
        /// Inclusive bound.
        value: f64,
    },
    /// Maximum numeric value.
    Max {
        /// Inclusive bound.
        value: f64,
    },
}

impl Rule {
    /// Returns a message when `value` breaks the rule. Nulls pass every rule
    /// except `not_blank`; absence is the job of `required`.
    pub fn check(&self, value: &Value) -> Option<String> {
        let len = match value {
            Value::String(s) => Some(s.chars().count()),
            Value::List(items) => Some(items.len()),
            _ => None,
        };
        match self {
            Rule::NotBlank => match value {
                Value::String(s) if !s.trim().is_empty() => None,
                Value::String(_) | Value::Null => Some("must not be blank".to_owned()),
                _ => None,
            },
            Rule::MinLength { value: min } => len
                .filter(|len| len < min)
                .map(|_| format!("length must be at least {min}")),
            Rule::MaxLength { value: max } => len
                .filter(|len| len > max)
                .map(|_| format!("length must be at most {max}")),
            Rule::Min { value: min } => value
                .as_float()
                .filter(|v| v < min)
                .map(|_| format!("must be greater than or equal to {min}")),
            Rule::Max { value: max } => value
                .as_float()
                .filter(|v| v > max)
                .map(|_| format!("must be less than or equal to {max}")),
        }
    }
}

/// Persistence policy flags of a field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Annotations {
    /// Saves fail when the field has no value.
    pub required: bool,
    /// At most one node per label holds a given value.
    pub unique: bool,
    /// Backed by a schema index.
    pub indexed: bool,
    /// Related collection only loaded on request and synchronized additively.
    pub lazy: bool,
    /// Explicit nulls remove the stored property.
    pub null_remove: bool,
    /// Relationship followed by a related field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_to: Option<RelatedTo>,
    /// Validation rules checked on save.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
}

/// A field as authored on a type descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Persistence annotations.
    #[serde(flatten)]
    pub annotations: Annotations,
    /// Static fields belong to the type, not to instances, and are never
    /// persisted.
    #[serde(default, rename = "static")]
    pub is_static: bool,
}

impl FieldDef {
    /// Field of the given type without annotations.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            annotations: Annotations::default(),
            is_static: false,
        }
    }

    /// String property.
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    /// Integer property.
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Int)
    }

    /// Float property.
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float)
    }

    /// Boolean property.
    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Bool)
    }

    /// Field backed by relationships.
    pub fn related(name: impl Into<String>, cardinality: Cardinality, target: RelatedTo) -> Self {
        let mut field = Self::new(name, FieldType::Related(cardinality));
        field.annotations.related_to = Some(target);
        field
    }

    /// Marks the field required.
    pub fn required(mut self) -> Self {
        self.annotations.required = true;
        self
    }

    /// Marks the field unique.
    pub fn unique(mut self) -> Self {
        self.annotations.unique = true;
        self
    }

    /// Marks the field indexed.
    pub fn indexed(mut self) -> Self {
        self.annotations.indexed = true;
        self
    }

    /// Loads the field only when named.
    pub fn lazy(mut self) -> Self {
        self.annotations.lazy = true;
        self
    }

    /// An explicit null removes the stored property.
    pub fn null_remove(mut self) -> Self {
        self.annotations.null_remove = true;
        self
    }

    /// Adds a validation rule.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.annotations.rules.push(rule);
        self
    }

    /// Excludes the field from persistence.
    pub fn static_field(mut self) -> Self {
        self.is_static = true;
        self
    }
}

/// Immutable metadata of one field of one entity type, shared by the
/// registry, mapper, query builder and aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Type that declares the field (may be an ancestor of the lookup type).
    pub owner: String,
    /// Field name.
    pub name: String,
    /// Declared type.
    pub field_type: FieldType,
    /// Persistence annotations.
    pub annotations: Annotations,
}

impl FieldDescriptor {
    pub(crate) fn from_def(owner: &str, def: &FieldDef) -> Self {
        Self {
            owner: owner.to_owned(),
            name: def.name.clone(),
            field_type: def.field_type,
            annotations: def.annotations.clone(),
        }
    }

    /// True for relationship-backed fields.
    pub fn is_related(&self) -> bool {
        self.field_type.is_related()
    }

    /// Relationship followed, for related fields.
    pub fn related_to(&self) -> Option<&RelatedTo> {
        self.annotations.related_to.as_ref()
    }

    /// Cardinality, for related fields.
    pub fn cardinality(&self) -> Option<Cardinality> {
        match self.field_type {
            FieldType::Related(cardinality) => Some(cardinality),
            _ => None,
        }
    }

    /// True when the field loads only on request.
    pub fn is_lazy(&self) -> bool {
        self.annotations.lazy
    }

    /// True when saves need a value.
    pub fn is_required(&self) -> bool {
        self.annotations.required
    }

    /// True when the field is unique.
    pub fn is_unique(&self) -> bool {
        self.annotations.unique
    }

    /// Plain index: indexed and not already covered by a uniqueness
    /// constraint.
    pub fn wants_index(&self) -> bool {
        self.annotations.indexed && !self.annotations.unique
    }

    /// True when an explicit null removes the stored property.
    pub fn removes_on_null(&self) -> bool {
        self.annotations.null_remove
    }
}
