use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::save::SaveContext;
use super::{element_of, validate, GraphContext};
use crate::backend::{Binding, Element, GraphBackend};
use crate::entity::{Entity, FieldValue};
use crate::error::{GraphError, Result};
use crate::params::{FieldList, QueryField, SearchParameters};
use crate::query::plan::Projection;
use crate::query::QueryBuilder;
use crate::schema::{Cardinality, Direction, EntityType, FieldDescriptor};
use crate::value::Value;

/// Which fields a load populates.
#[derive(Clone, Copy)]
enum Requested<'f> {
    /// Named fields; `all` means every scalar and every non-lazy relation.
    Fields(&'f FieldList),
    /// Scalar fields only, the default for related items.
    Scalars,
}

impl<'f> Requested<'f> {
    fn get(self, name: &str) -> Option<&'f QueryField> {
        match self {
            Requested::Fields(list) => list.get(name),
            Requested::Scalars => None,
        }
    }

    fn nested(spec: Option<&'f QueryField>) -> Requested<'f> {
        match spec {
            Some(spec) if !spec.sub_fields.is_empty() => Requested::Fields(&spec.sub_fields),
            _ => Requested::Scalars,
        }
    }
}

/// Entity mapper: reads elements into entities and writes save contexts
/// back to the backend.
#[derive(Clone, Copy)]
pub struct Persistence<'a> {
    ctx: &'a GraphContext,
}

impl<'a> Persistence<'a> {
    /// Mapper over a graph context.
    pub fn new(ctx: &'a GraphContext) -> Self {
        Self { ctx }
    }

    fn backend(&self) -> &'a dyn GraphBackend {
        self.ctx.backend()
    }

    /// Builds an entity from a stored element.
    ///
    /// The element must carry `ty`'s label; the entity gets the most
    /// specific concrete type among the element's labels. Only the requested
    /// fields are loaded: an empty list loads nothing but the identity.
    pub fn materialize(&self, ty: &EntityType, element: Element, fields: &FieldList) -> Result<Entity> {
        self.load(ty, element, Requested::Fields(fields))
    }

    /// Like [`materialize`](Self::materialize) with scalar fields only.
    pub fn materialize_scalars(&self, ty: &EntityType, element: Element) -> Result<Entity> {
        self.load(ty, element, Requested::Scalars)
    }

    fn load(&self, ty: &EntityType, element: Element, requested: Requested<'_>) -> Result<Entity> {
        match element {
            Element::Node(id) => {
                let node = self
                    .backend()
                    .node(id)?
                    .ok_or_else(|| GraphError::not_found(format!("node {id}")))?;
                if !ty.matches_labels(&node.labels) {
                    return Err(GraphError::TypeMismatch {
                        expected: ty.name().to_owned(),
                        found: node.labels,
                    });
                }
                let concrete = self.concrete_type(ty, &node.labels);
                let concrete: &EntityType = concrete.as_deref().unwrap_or(ty);
                let mut entity = Entity::reference(concrete.name(), id);
                entity.set_uuid(uuid_of(&node.properties));
                self.populate(concrete, &mut entity, &node.properties, requested)?;
                Ok(entity)
            }
            Element::Relationship(id) => {
                let rel = self
                    .backend()
                    .relationship(id)?
                    .ok_or_else(|| GraphError::not_found(format!("relationship {id}")))?;
                if rel.rel_type != ty.name() {
                    return Err(GraphError::TypeMismatch {
                        expected: ty.name().to_owned(),
                        found: vec![rel.rel_type],
                    });
                }
                let mut entity = Entity::reference(ty.name(), id);
                entity.set_uuid(uuid_of(&rel.properties));
                self.populate(ty, &mut entity, &rel.properties, requested)?;
                let from = self.endpoint(rel.start, requested.get("from"))?;
                let to = self.endpoint(rel.end, requested.get("to"))?;
                entity.set_endpoints(from, to);
                Ok(entity)
            }
        }
    }

    /// Most specific registered subtype of `ty` among `labels`.
    fn concrete_type(&self, ty: &EntityType, labels: &[String]) -> Option<Arc<EntityType>> {
        self.ctx
            .registry()
            .resolve_labels(labels)
            .filter(|c| c.name() == ty.name() || c.labels().iter().any(|l| l == ty.name()))
    }

    fn populate(
        &self,
        ty: &EntityType,
        entity: &mut Entity,
        properties: &BTreeMap<String, Value>,
        requested: Requested<'_>,
    ) -> Result<()> {
        let (all_scalars, all_related) = match requested {
            Requested::Fields(list) => (list.is_all(), list.is_all()),
            Requested::Scalars => (true, false),
        };
        let owner = entity.id();
        for field in ty.fields() {
            let spec = requested.get(&field.name);
            if field.is_related() {
                if spec.is_none() && !(all_related && !field.is_lazy()) {
                    continue;
                }
                let Some(owner) = owner else { continue };
                let (value, truncated) = self.load_related(owner, field, spec)?;
                entity.set(field.name.clone(), value);
                if truncated {
                    entity.mark_partial(field.name.clone());
                }
            } else {
                if spec.is_none() && !all_scalars {
                    continue;
                }
                let value = properties.get(&field.name).cloned().unwrap_or(Value::Null);
                entity.set(field.name.clone(), value);
            }
        }
        Ok(())
    }

    /// Follows a related field one hop from `owner`. The flag is set when
    /// the field's limit left stored items behind.
    fn load_related(
        &self,
        owner: u64,
        field: &FieldDescriptor,
        spec: Option<&QueryField>,
    ) -> Result<(FieldValue, bool)> {
        let related = field.related_to().ok_or_else(|| {
            GraphError::InvalidArgument(format!("'{}' has no relationship target", field.name))
        })?;
        let target = self.ctx.registry().model_for(&related.target)?;
        let limit = spec.and_then(|s| s.limit);
        let nested = Requested::nested(spec);

        let mut items: Vec<Entity> = Vec::new();
        let mut truncated = false;
        for rel in self
            .backend()
            .relationships(owner, related.direction, Some(&related.rel_type))?
        {
            if limit.is_some_and(|limit| items.len() >= limit) {
                truncated = true;
                break;
            }
            let item = if target.is_relationship() {
                self.load(&target, Element::Relationship(rel.id), nested)?
            } else {
                match self.load(&target, Element::Node(rel.other(owner)), nested) {
                    Ok(item) => item,
                    Err(GraphError::TypeMismatch { .. }) => continue,
                    Err(err) => return Err(err),
                }
            };
            if !items.iter().any(|existing| existing.same_identity(&item)) {
                items.push(item);
            }
        }
        Ok((collect_related(field, items), truncated))
    }

    fn endpoint(&self, id: u64, spec: Option<&QueryField>) -> Result<Entity> {
        let node = self
            .backend()
            .node(id)?
            .ok_or_else(|| GraphError::not_found(format!("node {id}")))?;
        let Some(ty) = self.ctx.registry().resolve_labels(&node.labels) else {
            let label = node.labels.first().cloned().unwrap_or_default();
            return Ok(Entity::reference(label, id));
        };
        match spec {
            Some(_) => self.load(&ty, Element::Node(id), Requested::nested(spec)),
            None => {
                let mut entity = Entity::reference(ty.name(), id);
                entity.set_uuid(uuid_of(&node.properties));
                Ok(entity)
            }
        }
    }

    /// Loads requested fields into an entity that was saved before. Fields
    /// already loaded are kept unless `refetch` is set.
    pub fn fetch(&self, entity: &mut Entity, fields: &FieldList, refetch: bool) -> Result<()> {
        let id = entity.id().ok_or_else(|| {
            GraphError::Persist(format!(
                "cannot fetch {} that was never saved",
                entity.type_name()
            ))
        })?;
        let ty = self.ctx.registry().model_for(entity.type_name())?;
        let fresh = self.materialize(&ty, element_of(&ty, id), fields)?;
        for (name, value) in fresh.fields() {
            if refetch || !entity.is_loaded(name) {
                entity.set(name, value.clone());
                if fresh.is_partial(name) {
                    entity.mark_partial(name);
                }
            }
        }
        if entity.uuid().is_none() {
            entity.set_uuid(fresh.uuid().map(str::to_owned));
        }
        if let (None, Some(from), Some(to)) = (entity.from(), fresh.from(), fresh.to()) {
            entity.set_endpoints(from.clone(), to.clone());
        }
        Ok(())
    }

    /// Stored element of type `ty` with the given uuid, identity only.
    pub fn find_by_uuid(&self, ty: &EntityType, uuid: &str) -> Result<Option<Entity>> {
        let id = if ty.is_relationship() {
            let params = SearchParameters {
                uuids: vec![uuid.to_owned()],
                ..SearchParameters::default()
            };
            let query =
                QueryBuilder::new(self.ctx.registry(), ty).build_simple(&params, Projection::Rows)?;
            let mut rows = self.backend().execute(&query)?;
            match rows.next().transpose()? {
                Some(row) => match row.get(ty.query_identifier()) {
                    Some(Binding::Relationship(id)) => Some(*id),
                    _ => None,
                },
                None => None,
            }
        } else {
            self.backend()
                .nodes_by_property(ty.name(), "uuid", &Value::from(uuid))?
                .first()
                .copied()
        };
        id.map(|id| self.materialize(ty, element_of(ty, id), &FieldList::new()))
            .transpose()
    }

    /// Saves an entity of any registered concrete type.
    pub fn save(&self, entity: &mut Entity) -> Result<()> {
        let ty = self.ctx.registry().model_for(entity.type_name())?;
        if ty.is_abstract() {
            return Err(GraphError::Persist(format!(
                "cannot save through abstract type {}",
                ty.name()
            )));
        }
        let mut context = SaveContext::new(*self, ty, entity)?;
        self.persist(&mut context)
    }

    /// Writes the changed fields of a save context.
    pub fn persist(&self, context: &mut SaveContext<'_, '_>) -> Result<()> {
        let ty = Arc::clone(context.entity_type());
        let is_new = context.is_new();
        validate::validate(&ty, context.entity(), is_new)?;
        let changed = context.changed_fields()?.to_vec();

        let entity = context.entity_mut();
        let id = match entity.id() {
            Some(id) => id,
            None => self.create_element(&ty, entity)?,
        };
        let element = element_of(&ty, id);

        for name in &changed {
            let Some(field) = ty.field(name) else {
                continue;
            };
            if field.is_related() {
                self.sync_related(id, field, entity)?;
                continue;
            }
            match entity.value(name) {
                Some(value) if !value.is_null() => {
                    self.backend().set_property(element, name, value.clone())?
                }
                _ => self.backend().remove_property(element, name)?,
            }
        }
        entity.mark_persisted();

        if is_new {
            info!(entity = ty.name(), id, fields = changed.len(), "entity created");
        } else {
            debug!(entity = ty.name(), id, changed = ?changed, "entity updated");
        }
        Ok(())
    }

    fn create_element(&self, ty: &EntityType, entity: &mut Entity) -> Result<u64> {
        let id = if ty.is_relationship() {
            let (Some(from), Some(to)) = entity.endpoints_mut() else {
                return Err(GraphError::Persist(format!(
                    "relationship {} needs both endpoints",
                    ty.name()
                )));
            };
            let start = self.ensure_saved(from)?;
            let end = self.ensure_saved(to)?;
            self.backend().create_relationship(start, end, ty.name())?
        } else {
            self.backend().create_node(ty.labels())?
        };
        if let Some(uuid) = entity.uuid() {
            self.backend()
                .set_property(element_of(ty, id), "uuid", Value::from(uuid))?;
        }
        entity.assign_id(id)?;
        Ok(id)
    }

    /// Identity of a related entity, saving it first when it has none.
    fn ensure_saved(&self, entity: &mut Entity) -> Result<u64> {
        if let Some(id) = entity.id() {
            return Ok(id);
        }
        self.save(entity)?;
        entity.id().ok_or_else(|| {
            GraphError::Persist(format!("{} has no identity after saving", entity.type_name()))
        })
    }

    /// Makes the stored relationships of `field` match the entity's value.
    /// Lazy fields only ever gain relationships.
    fn sync_related(&self, owner: u64, field: &FieldDescriptor, entity: &mut Entity) -> Result<()> {
        let related = field.related_to().ok_or_else(|| {
            GraphError::InvalidArgument(format!("'{}' has no relationship target", field.name))
        })?;
        let target = self.ctx.registry().model_for(&related.target)?;
        let backend = self.backend();

        let mut desired = Vec::new();
        if let Some(value) = entity.get_mut(&field.name) {
            for item in value.entities_mut() {
                desired.push(self.ensure_saved(item)?);
            }
        }
        let existing =
            backend.relationships(owner, related.direction, Some(&related.rel_type))?;

        if target.is_relationship() {
            if !field.is_lazy() {
                for rel in existing.iter().filter(|rel| !desired.contains(&rel.id)) {
                    backend.delete_relationship(rel.id)?;
                }
            }
            return Ok(());
        }

        let mut linked = Vec::new();
        for rel in &existing {
            let other = rel.other(owner);
            let is_target = backend
                .node(other)?
                .is_some_and(|node| node.has_label(target.name()));
            if is_target {
                linked.push((rel.id, other));
            }
        }

        for &other in &desired {
            if linked.iter().any(|&(_, linked)| linked == other) {
                continue;
            }
            let rel = match related.direction {
                Direction::Incoming => backend.create_relationship(other, owner, &related.rel_type)?,
                Direction::Outgoing | Direction::Both => {
                    backend.create_relationship(owner, other, &related.rel_type)?
                }
            };
            linked.push((rel, other));
        }

        if !field.is_lazy() {
            for &(rel, other) in &linked {
                if !desired.contains(&other) {
                    backend.delete_relationship(rel)?;
                }
            }
        }
        Ok(())
    }

    /// Deletes the stored element. Nodes that still have relationships are
    /// refused by the backend.
    pub fn remove(&self, entity: &Entity) -> Result<()> {
        let id = entity.id().ok_or_else(|| {
            GraphError::Persist(format!("cannot remove {} that was never saved", entity.type_name()))
        })?;
        let ty = self.ctx.registry().model_for(entity.type_name())?;
        match element_of(&ty, id) {
            Element::Node(id) => self.backend().delete_node(id)?,
            Element::Relationship(id) => self.backend().delete_relationship(id)?,
        }
        info!(entity = ty.name(), id, "entity removed");
        Ok(())
    }
}

fn uuid_of(properties: &BTreeMap<String, Value>) -> Option<String> {
    properties
        .get("uuid")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Shapes loaded items by the field's cardinality.
pub(crate) fn collect_related(field: &FieldDescriptor, items: Vec<Entity>) -> FieldValue {
    match field.cardinality() {
        Some(Cardinality::Single) => items
            .into_iter()
            .next()
            .map(FieldValue::from)
            .unwrap_or(FieldValue::Value(Value::Null)),
        Some(Cardinality::Set) => FieldValue::set(items),
        _ => FieldValue::List(items),
    }
}
