#![allow(dead_code)]

use penumbra::schema::Rule;
use penumbra::{
    Cardinality, Entity, FieldDef, Namespace, RelatedTo, Result, Service, ServiceConfig,
    TypeDescriptor,
};

/// Family graph used across the integration tests.
///
/// `Named` is abstract and owns the unique `name`; `Person` and `Pet` extend
/// it. `MarriedWith` is a relationship entity reached through
/// `Person.marriage`.
pub fn family() -> Namespace {
    Namespace::new("family")
        .with_type(
            TypeDescriptor::node("Named").abstract_type().field(
                FieldDef::string("name")
                    .required()
                    .unique()
                    .indexed()
                    .rule(Rule::MaxLength { value: 40 }),
            ),
        )
        .with_type(
            TypeDescriptor::node("Person")
                .extends("Named")
                .field(FieldDef::int("age").rule(Rule::Min { value: 0.0 }))
                .field(FieldDef::string("nickname").null_remove())
                .field(FieldDef::string("motto"))
                .field(FieldDef::related(
                    "friends",
                    Cardinality::List,
                    RelatedTo::outgoing("Knows", "Person"),
                ))
                .field(FieldDef::related(
                    "pets",
                    Cardinality::Set,
                    RelatedTo::outgoing("Owns", "Pet"),
                ))
                .field(
                    FieldDef::related(
                        "children",
                        Cardinality::List,
                        RelatedTo::incoming("ChildOf", "Person"),
                    )
                    .lazy(),
                )
                .field(
                    FieldDef::related(
                        "parents",
                        Cardinality::List,
                        RelatedTo::outgoing("ChildOf", "Person"),
                    )
                    .lazy(),
                )
                .field(FieldDef::related(
                    "marriage",
                    Cardinality::Single,
                    RelatedTo::both("MarriedWith", "MarriedWith"),
                )),
        )
        .with_type(
            TypeDescriptor::node("Pet")
                .extends("Named")
                .field(FieldDef::string("species")),
        )
        .with_type(TypeDescriptor::relationship("MarriedWith").field(FieldDef::int("years")))
}

/// Connected in-memory service with migrations disabled.
pub fn service() -> Result<Service> {
    let service = Service::new(ServiceConfig::default()).with_namespace(family());
    service.connect()?;
    Ok(service)
}

pub fn person(name: &str, age: i64) -> Entity {
    Entity::new("Person").with("name", name).with("age", age)
}

pub fn pet(name: &str, species: &str) -> Entity {
    Entity::new("Pet").with("name", name).with("species", species)
}

/// Saves `entity` in its own transaction and returns its identity.
pub fn save(service: &Service, entity: &mut Entity) -> Result<u64> {
    let repository = service.repository(entity.type_name())?;
    service.transaction(|_| repository.save(entity))?;
    Ok(entity.id().expect("saved entity has an id"))
}

pub fn names(entities: &[Entity]) -> Vec<&str> {
    entities.iter().filter_map(|e| e.get_str("name")).collect()
}
