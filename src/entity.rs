//! Dynamic entity records.
//!
//! An [`Entity`] keeps only the fields that were loaded or assigned. A field
//! missing from the map is unloaded and is left alone by saves; a field
//! holding [`Value::Null`] was explicitly cleared.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Serialize, Serializer};
use serde_json::{json, Map};
use uuid::Uuid;

use crate::error::{GraphError, Result};
use crate::value::Value;

/// Value held by one field of an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Scalar property.
    Value(Value),
    /// Single related entity.
    Entity(Box<Entity>),
    /// Ordered related entities.
    List(Vec<Entity>),
    /// Related entities distinct by identity.
    Set(Vec<Entity>),
}

impl FieldValue {
    /// Builds a set, dropping entities whose identity is already present.
    pub fn set(entities: Vec<Entity>) -> Self {
        let mut distinct: Vec<Entity> = Vec::with_capacity(entities.len());
        for entity in entities {
            if !distinct.iter().any(|e| e.same_identity(&entity)) {
                distinct.push(entity);
            }
        }
        FieldValue::Set(distinct)
    }

    /// Scalar value, if the field holds one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Value(value) => Some(value),
            _ => None,
        }
    }

    /// True for an explicit null.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Value(Value::Null))
    }

    /// Null scalars and empty collections. A related entity is never a
    /// default.
    pub fn is_default(&self) -> bool {
        match self {
            FieldValue::Value(value) => value.is_null(),
            FieldValue::Entity(_) => false,
            FieldValue::List(items) | FieldValue::Set(items) => items.is_empty(),
        }
    }

    /// Related entities in field order. Scalars yield nothing.
    pub fn entities(&self) -> Vec<&Entity> {
        match self {
            FieldValue::Value(_) => Vec::new(),
            FieldValue::Entity(entity) => vec![entity.as_ref()],
            FieldValue::List(items) | FieldValue::Set(items) => items.iter().collect(),
        }
    }

    pub(crate) fn entities_mut(&mut self) -> Vec<&mut Entity> {
        match self {
            FieldValue::Value(_) => Vec::new(),
            FieldValue::Entity(entity) => vec![entity.as_mut()],
            FieldValue::List(items) | FieldValue::Set(items) => items.iter_mut().collect(),
        }
    }

    /// Change-detection equality: scalars by value, entities by identity,
    /// sets ignoring order.
    pub fn same_as(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::Value(a), FieldValue::Value(b)) => a == b || a.loosely_equals(b),
            (FieldValue::Entity(a), FieldValue::Entity(b)) => a.same_identity(b),
            (FieldValue::List(a), FieldValue::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_identity(y))
            }
            (FieldValue::Set(a), FieldValue::Set(b)) => {
                a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| x.same_identity(y)))
            }
            (a, b) => a.is_default() && b.is_default(),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Value(value) => serde_json::to_value(value).unwrap_or_default(),
            FieldValue::Entity(entity) => entity.to_json(),
            FieldValue::List(items) | FieldValue::Set(items) => {
                serde_json::Value::Array(items.iter().map(Entity::to_json).collect())
            }
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Value(value)
    }
}

impl From<Entity> for FieldValue {
    fn from(entity: Entity) -> Self {
        FieldValue::Entity(Box::new(entity))
    }
}

impl From<Vec<Entity>> for FieldValue {
    fn from(entities: Vec<Entity>) -> Self {
        FieldValue::List(entities)
    }
}

macro_rules! scalar_field_value {
    ($($ty:ty),*) => {
        $(impl From<$ty> for FieldValue {
            fn from(value: $ty) -> Self {
                FieldValue::Value(Value::from(value))
            }
        })*
    };
}

scalar_field_value!(&str, String, bool, i64, i32, f64);

/// A node or relationship of some registered type.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    type_name: String,
    id: Option<u64>,
    uuid: Option<String>,
    persisted: bool,
    fields: BTreeMap<String, FieldValue>,
    /// Related fields holding only part of what is stored.
    partial: BTreeSet<String>,
    from: Option<Box<Entity>>,
    to: Option<Box<Entity>>,
}

impl Entity {
    /// New, unsaved entity with a fresh v4 UUID.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: None,
            uuid: Some(Uuid::new_v4().to_string()),
            persisted: false,
            fields: BTreeMap::new(),
            partial: BTreeSet::new(),
            from: None,
            to: None,
        }
    }

    /// New, unsaved relationship entity between two endpoints.
    pub fn relationship(type_name: impl Into<String>, from: Entity, to: Entity) -> Self {
        let mut entity = Self::new(type_name);
        entity.from = Some(Box::new(from));
        entity.to = Some(Box::new(to));
        entity
    }

    /// Handle to an already stored element, known only by identity.
    pub fn reference(type_name: impl Into<String>, id: u64) -> Self {
        Self {
            type_name: type_name.into(),
            id: Some(id),
            uuid: None,
            persisted: true,
            fields: BTreeMap::new(),
            partial: BTreeSet::new(),
            from: None,
            to: None,
        }
    }

    /// Entity with the given UUID, as if created elsewhere.
    pub fn with_uuid(type_name: impl Into<String>, uuid: impl Into<String>) -> Self {
        let mut entity = Self::new(type_name);
        entity.uuid = Some(uuid.into());
        entity
    }

    /// Registered type the entity belongs to.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Backend identity, assigned on first save.
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// Stable external identifier.
    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    /// True once the entity was saved or loaded from the graph.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Records the backend identity. Identity never changes once assigned.
    pub(crate) fn assign_id(&mut self, id: u64) -> Result<()> {
        match self.id {
            Some(existing) if existing != id => Err(GraphError::Persist(format!(
                "{} already has identity {existing}, refusing {id}",
                self.type_name
            ))),
            _ => {
                self.id = Some(id);
                Ok(())
            }
        }
    }

    pub(crate) fn set_uuid(&mut self, uuid: Option<String>) {
        self.uuid = uuid;
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.persisted = true;
    }

    /// Loaded value of a field.
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub(crate) fn get_mut(&mut self, field: &str) -> Option<&mut FieldValue> {
        self.fields.get_mut(field)
    }

    /// Scalar value of a field; `None` when unloaded or not a scalar.
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.get(field).and_then(FieldValue::as_value)
    }

    /// String value of a field.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.value(field).and_then(Value::as_str)
    }

    /// Integer value of a field.
    pub fn get_int(&self, field: &str) -> Option<i64> {
        self.value(field).and_then(Value::as_int)
    }

    /// Float value of a field.
    pub fn get_float(&self, field: &str) -> Option<f64> {
        self.value(field).and_then(Value::as_float)
    }

    /// Boolean value of a field.
    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.value(field).and_then(Value::as_bool)
    }

    /// Related entities of a field; empty when unloaded.
    pub fn related(&self, field: &str) -> Vec<&Entity> {
        self.get(field).map(FieldValue::entities).unwrap_or_default()
    }

    /// Related entity of a single-valued field.
    pub fn related_one(&self, field: &str) -> Option<&Entity> {
        match self.get(field) {
            Some(FieldValue::Entity(entity)) => Some(entity),
            _ => None,
        }
    }

    /// Assigns a field. A related field assigned this way is saved as
    /// given, even when it was loaded partially.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> &mut Self {
        let field = field.into();
        self.partial.remove(&field);
        self.fields.insert(field, value.into());
        self
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    /// Explicitly clears a field.
    pub fn clear(&mut self, field: impl Into<String>) -> &mut Self {
        self.set(field, FieldValue::Value(Value::Null))
    }

    /// Forgets a field so saves leave the stored value untouched.
    pub fn unset(&mut self, field: &str) -> Option<FieldValue> {
        self.partial.remove(field);
        self.fields.remove(field)
    }

    /// True when a related field was loaded with a limit that cut items off,
    /// or through more than one hop. Saves leave such a field untouched
    /// until it is assigned again with [`set`](Self::set).
    pub fn is_partial(&self, field: &str) -> bool {
        self.partial.contains(field)
    }

    pub(crate) fn mark_partial(&mut self, field: impl Into<String>) {
        self.partial.insert(field.into());
    }

    /// True when the field was loaded or assigned.
    pub fn is_loaded(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Every loaded field.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Start node of a relationship entity.
    pub fn from(&self) -> Option<&Entity> {
        self.from.as_deref()
    }

    /// End node of a relationship entity.
    pub fn to(&self) -> Option<&Entity> {
        self.to.as_deref()
    }

    pub(crate) fn endpoints_mut(&mut self) -> (Option<&mut Entity>, Option<&mut Entity>) {
        (self.from.as_deref_mut(), self.to.as_deref_mut())
    }

    pub(crate) fn set_endpoints(&mut self, from: Entity, to: Entity) {
        self.from = Some(Box::new(from));
        self.to = Some(Box::new(to));
    }

    /// Same stored element: equal identities, or equal UUIDs when either
    /// side has no identity yet.
    pub fn same_identity(&self, other: &Entity) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            _ => match (&self.uuid, &other.uuid) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// JSON rendering with bookkeeping fields first.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = Map::new();
        map.insert("type".into(), json!(self.type_name));
        if let Some(id) = self.id {
            map.insert("id".into(), json!(id));
        }
        if let Some(uuid) = &self.uuid {
            map.insert("uuid".into(), json!(uuid));
        }
        if let Some(from) = &self.from {
            map.insert("from".into(), from.to_json());
        }
        if let Some(to) = &self.to {
            map.insert("to".into(), to.to_json());
        }
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(map)
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
