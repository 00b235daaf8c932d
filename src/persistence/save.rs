use std::sync::Arc;

use super::mapper::Persistence;
use super::element_of;
use crate::entity::{Entity, FieldValue};
use crate::error::{GraphError, Result};
use crate::params::FieldList;
use crate::schema::EntityType;
use crate::value::Value;

/// One save in progress: the incoming entity, the stored original it
/// updates (if any) and the fields found to differ between the two.
pub struct SaveContext<'a, 'e> {
    persistence: Persistence<'a>,
    ty: Arc<EntityType>,
    entity: &'e mut Entity,
    original: Option<Entity>,
    changed: Option<Vec<String>>,
}

impl<'a, 'e> SaveContext<'a, 'e> {
    /// Resolves the stored original by id, or by uuid when the entity has
    /// no id yet. A uuid match copies the stored identity onto the entity.
    pub fn new(persistence: Persistence<'a>, ty: Arc<EntityType>, entity: &'e mut Entity) -> Result<Self> {
        let original = match (entity.id(), entity.uuid()) {
            (Some(id), _) => {
                let original = persistence
                    .materialize(&ty, element_of(&ty, id), &FieldList::new())
                    .map_err(|err| match err {
                        GraphError::NotFound(_) => GraphError::not_found(format!(
                            "{} {id} no longer exists",
                            ty.name()
                        )),
                        other => other,
                    })?;
                Some(original)
            }
            (None, Some(uuid)) => persistence.find_by_uuid(&ty, uuid)?,
            (None, None) => None,
        };
        if let Some(id) = original.as_ref().and_then(Entity::id) {
            entity.assign_id(id)?;
        }
        Ok(Self {
            persistence,
            ty,
            entity,
            original,
            changed: None,
        })
    }

    /// Type the entity is saved as.
    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.ty
    }

    /// Entity being saved.
    pub fn entity(&self) -> &Entity {
        self.entity
    }

    pub(crate) fn entity_mut(&mut self) -> &mut Entity {
        self.entity
    }

    /// Stored original, with scalars loaded once changes were computed.
    pub fn original(&self) -> Option<&Entity> {
        self.original.as_ref()
    }

    /// True when no stored element matched the entity.
    pub fn is_new(&self) -> bool {
        self.original.is_none()
    }

    /// Names of the fields a save has to write. Computed on first use.
    pub fn changed_fields(&mut self) -> Result<&[String]> {
        if self.changed.is_none() {
            let changed = self.compute_changes()?;
            self.changed = Some(changed);
        }
        Ok(self.changed.as_deref().unwrap_or_default())
    }

    /// True when `name` is among the changed fields.
    pub fn field_changed(&mut self, name: &str) -> Result<bool> {
        Ok(self.changed_fields()?.iter().any(|f| f == name))
    }

    fn compute_changes(&mut self) -> Result<Vec<String>> {
        let persistence = self.persistence;
        if let Some(original) = self.original.as_mut() {
            let scalars = FieldList::of(self.ty.scalar_fields().map(|f| f.name.clone()));
            persistence.fetch(original, &scalars, true)?;
        }

        let mut changed = Vec::new();
        for field in self.ty.fields() {
            let Some(value) = self.entity.get(&field.name) else {
                continue;
            };
            if field.is_related() && self.entity.is_partial(&field.name) {
                continue;
            }
            let is_changed = match self.original.as_mut() {
                None => !value.is_default() || (value.is_null() && field.removes_on_null()),
                Some(_) if field.is_related() && field.is_lazy() => true,
                Some(original) if field.is_related() => {
                    persistence.fetch(original, &FieldList::of([field.name.clone()]), true)?;
                    !value.same_as(&stored(original, &field.name))
                }
                Some(original) if value.is_null() => {
                    field.removes_on_null()
                        && original.value(&field.name).is_some_and(|v| !v.is_null())
                }
                Some(original) => !value.same_as(&stored(original, &field.name)),
            };
            if is_changed {
                changed.push(field.name.clone());
            }
        }
        Ok(changed)
    }
}

fn stored(original: &Entity, field: &str) -> FieldValue {
    original
        .get(field)
        .cloned()
        .unwrap_or(FieldValue::Value(Value::Null))
}
