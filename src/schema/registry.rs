//! Type descriptors, namespaces and the registry that resolves them into
//! entity types once at startup.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::field::{FieldDef, FieldDescriptor, FieldType};
use crate::error::{GraphError, Result};
use crate::patch::Patch;

/// Bookkeeping names that are never treated as declared fields.
pub const RESERVED_FIELDS: &[&str] = &[
    "id",
    "uuid",
    "persisted",
    "type",
    "checkedFields",
    "fetchedFields",
];

/// Whether a type maps to nodes or to relationships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Stored as a labelled node.
    #[default]
    Node,
    /// Stored as a typed relationship between two nodes.
    Relationship,
}

/// Declarative definition of an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Type name, also its primary label.
    pub name: String,
    /// Node or relationship.
    #[serde(default)]
    pub kind: EntityKind,
    /// Extended type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Implemented interface types.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<String>,
    /// Abstract types are searched but never saved.
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    /// Declared fields.
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl TypeDescriptor {
    /// Node type named `name`.
    pub fn node(name: impl Into<String>) -> Self {
        Self::new(name, EntityKind::Node)
    }

    /// Relationship type named `name`.
    pub fn relationship(name: impl Into<String>) -> Self {
        Self::new(name, EntityKind::Relationship)
    }

    fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            kind,
            parent: None,
            interfaces: Vec::new(),
            is_abstract: false,
            fields: Vec::new(),
        }
    }

    /// Inherits from `parent`.
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Implements `interface`.
    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    /// Marks the type abstract.
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Declares a field.
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }
}

/// Statically known entity type.
pub trait Model {
    /// Registered type name.
    const TYPE: &'static str;

    /// Full definition registered for the type.
    fn descriptor() -> TypeDescriptor;
}

/// Named bundle of type descriptors and the patches that migrate them.
#[derive(Clone)]
pub struct Namespace {
    /// Namespace name.
    pub name: String,
    /// Declared types.
    pub types: Vec<TypeDescriptor>,
    /// Patches shipped with the namespace.
    pub patches: Vec<Arc<dyn Patch>>,
}

impl Namespace {
    /// Empty namespace.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: Vec::new(),
            patches: Vec::new(),
        }
    }

    /// Adds a type descriptor.
    pub fn with_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.types.push(descriptor);
        self
    }

    /// Adds the descriptor of a model type.
    pub fn with_model<M: Model>(self) -> Self {
        self.with_type(M::descriptor())
    }

    /// Adds a patch.
    pub fn with_patch(mut self, patch: impl Patch + 'static) -> Self {
        self.patches.push(Arc::new(patch));
        self
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field(
                "types",
                &self.types.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            )
            .field("patches", &self.patches.len())
            .finish()
    }
}

/// A resolved entity type: labels, ancestors and the full field list
/// including inherited fields.
#[derive(Debug)]
pub struct EntityType {
    name: String,
    kind: EntityKind,
    is_abstract: bool,
    labels: Vec<String>,
    ancestors: Vec<String>,
    fields: Vec<Arc<FieldDescriptor>>,
    by_name: HashMap<String, usize>,
    query_identifier: String,
}

impl EntityType {
    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node or relationship.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// True for relationship types.
    pub fn is_relationship(&self) -> bool {
        self.kind == EntityKind::Relationship
    }

    /// True for abstract types.
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// Own name first, then ancestors, then interfaces.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Parent chain, nearest first.
    pub fn ancestors(&self) -> &[String] {
        &self.ancestors
    }

    /// Own and inherited fields.
    pub fn fields(&self) -> &[Arc<FieldDescriptor>] {
        &self.fields
    }

    /// Field named `name`.
    pub fn field(&self, name: &str) -> Option<&Arc<FieldDescriptor>> {
        self.by_name.get(name).map(|&idx| &self.fields[idx])
    }

    /// Property fields.
    pub fn scalar_fields(&self) -> impl Iterator<Item = &Arc<FieldDescriptor>> {
        self.fields.iter().filter(|f| !f.is_related())
    }

    /// Relationship-backed fields.
    pub fn related_fields(&self) -> impl Iterator<Item = &Arc<FieldDescriptor>> {
        self.fields.iter().filter(|f| f.is_related())
    }

    /// Variable the query builder binds primary elements to.
    pub fn query_identifier(&self) -> &str {
        &self.query_identifier
    }

    /// True when elements carrying `labels` belong to this type.
    pub fn matches_labels(&self, labels: &[String]) -> bool {
        labels.iter().any(|label| label == &self.name)
    }

    /// Number of ancestors; deeper types are more specific.
    fn depth(&self) -> usize {
        self.ancestors.len()
    }
}

/// Registry of every entity type known to a service.
#[derive(Default)]
pub struct SchemaRegistry {
    namespaces: Vec<Namespace>,
    built: bool,
    types: HashMap<String, Arc<EntityType>>,
    order: Vec<String>,
    patches: Vec<Arc<dyn Patch>>,
}

impl SchemaRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a namespace to scan. Rejected once the registry is built.
    pub fn register(&mut self, namespace: Namespace) -> Result<()> {
        if self.built {
            return Err(GraphError::InvalidArgument(format!(
                "namespace '{}' registered after the schema registry was built",
                namespace.name
            )));
        }
        self.namespaces.push(namespace);
        Ok(())
    }

    /// True once [`build`](Self::build) succeeded.
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Resolves every registered type. Calling it again is a no-op.
    pub fn build(&mut self) -> Result<()> {
        if self.built {
            return Ok(());
        }

        let mut descriptors: HashMap<&str, &TypeDescriptor> = HashMap::new();
        let mut order = Vec::new();
        for namespace in &self.namespaces {
            for descriptor in &namespace.types {
                if descriptors
                    .insert(descriptor.name.as_str(), descriptor)
                    .is_some()
                {
                    return Err(instantiation(
                        &descriptor.name,
                        format!("declared twice (last in namespace '{}')", namespace.name),
                    ));
                }
                order.push(descriptor.name.clone());
            }
        }

        let mut types = HashMap::with_capacity(order.len());
        for name in &order {
            let descriptor = descriptors[name.as_str()];
            let resolved = resolve_type(descriptor, &descriptors)?;
            types.insert(name.clone(), Arc::new(resolved));
        }

        for ty in types.values() {
            validate_related(ty, &types)?;
        }

        self.patches = self
            .namespaces
            .iter()
            .flat_map(|ns| ns.patches.iter().cloned())
            .collect();
        debug!(
            types = order.len(),
            patches = self.patches.len(),
            "schema registry built"
        );
        self.types = types;
        self.order = order;
        self.built = true;
        Ok(())
    }

    /// Looks up a type by its declared name.
    pub fn entity_type(&self, name: &str) -> Option<Arc<EntityType>> {
        self.types.get(name).cloned()
    }

    /// Like [`entity_type`](Self::entity_type) but reports unknown names.
    pub fn model_for(&self, name: &str) -> Result<Arc<EntityType>> {
        self.entity_type(name)
            .ok_or_else(|| instantiation(name, "no such type is registered"))
    }

    /// Descriptor of `field` on `type_name`.
    pub fn field_descriptor(&self, type_name: &str, field: &str) -> Option<Arc<FieldDescriptor>> {
        self.types
            .get(type_name)
            .and_then(|ty| ty.field(field))
            .cloned()
    }

    /// Most specific concrete type among an element's labels.
    pub fn resolve_labels(&self, labels: &[String]) -> Option<Arc<EntityType>> {
        labels
            .iter()
            .filter_map(|label| self.types.get(label))
            .filter(|ty| !ty.is_abstract())
            .max_by_key(|ty| ty.depth())
            .cloned()
    }

    /// Types in registration order.
    pub fn types(&self) -> impl Iterator<Item = &Arc<EntityType>> {
        self.order.iter().filter_map(|name| self.types.get(name))
    }

    /// Patches of every registered namespace.
    pub fn patches(&self) -> &[Arc<dyn Patch>] {
        &self.patches
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("built", &self.built)
            .field("types", &self.order)
            .field("patches", &self.patches.len())
            .finish()
    }
}

fn instantiation(name: &str, reason: impl Into<String>) -> GraphError {
    GraphError::RepositoryInstantiation {
        name: name.to_owned(),
        reason: reason.into(),
    }
}

fn resolve_type(
    descriptor: &TypeDescriptor,
    all: &HashMap<&str, &TypeDescriptor>,
) -> Result<EntityType> {
    let mut chain = vec![descriptor];
    let mut seen = HashSet::from([descriptor.name.as_str()]);
    let mut current = descriptor;
    while let Some(parent) = current.parent.as_deref() {
        let Some(&next) = all.get(parent) else {
            return Err(instantiation(
                &descriptor.name,
                format!("unknown parent type '{parent}'"),
            ));
        };
        if !seen.insert(next.name.as_str()) {
            return Err(instantiation(
                &descriptor.name,
                format!("inheritance cycle through '{parent}'"),
            ));
        }
        if next.kind != descriptor.kind {
            return Err(instantiation(
                &descriptor.name,
                format!("parent '{parent}' is a different kind of entity"),
            ));
        }
        chain.push(next);
        current = next;
    }

    let mut labels: Vec<String> = Vec::new();
    for ty in &chain {
        push_unique(&mut labels, &ty.name);
    }
    for ty in &chain {
        for interface in &ty.interfaces {
            push_unique(&mut labels, interface);
        }
    }

    let mut fields = Vec::new();
    let mut by_name = HashMap::new();
    for ty in &chain {
        for def in &ty.fields {
            if def.is_static || RESERVED_FIELDS.contains(&def.name.as_str()) {
                continue;
            }
            if by_name.contains_key(&def.name) {
                continue;
            }
            if descriptor.kind == EntityKind::Relationship && def.field_type.is_related() {
                return Err(instantiation(
                    &descriptor.name,
                    format!("relationship types cannot declare related field '{}'", def.name),
                ));
            }
            by_name.insert(def.name.clone(), fields.len());
            fields.push(Arc::new(FieldDescriptor::from_def(&ty.name, def)));
        }
    }

    Ok(EntityType {
        name: descriptor.name.clone(),
        kind: descriptor.kind,
        is_abstract: descriptor.is_abstract,
        labels,
        ancestors: chain[1..].iter().map(|ty| ty.name.clone()).collect(),
        fields,
        by_name,
        query_identifier: descriptor.name.to_lowercase(),
    })
}

fn validate_related(ty: &EntityType, types: &HashMap<String, Arc<EntityType>>) -> Result<()> {
    for field in ty.fields() {
        match (field.field_type, field.related_to()) {
            (FieldType::Related(_), Some(related)) => {
                let Some(target) = types.get(&related.target) else {
                    return Err(instantiation(
                        ty.name(),
                        format!(
                            "field '{}' targets unknown type '{}'",
                            field.name, related.target
                        ),
                    ));
                };
                if target.is_relationship() && target.name() != related.rel_type {
                    return Err(instantiation(
                        ty.name(),
                        format!(
                            "field '{}' targets relationship type '{}' through '{}'",
                            field.name,
                            target.name(),
                            related.rel_type
                        ),
                    ));
                }
            }
            (FieldType::Related(_), None) => {
                return Err(instantiation(
                    ty.name(),
                    format!("related field '{}' has no relationship target", field.name),
                ));
            }
            (_, Some(_)) => {
                return Err(instantiation(
                    ty.name(),
                    format!("scalar field '{}' declares a relationship target", field.name),
                ));
            }
            (_, None) => {}
        }
    }
    Ok(())
}

fn push_unique(labels: &mut Vec<String>, label: &str) {
    if !labels.iter().any(|existing| existing == label) {
        labels.push(label.to_owned());
    }
}
