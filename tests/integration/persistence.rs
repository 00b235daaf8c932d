#![allow(missing_docs)]

#[path = "../common/mod.rs"]
mod common;

use common::{person, pet, save, service};
use penumbra::persistence::SaveContext;
use penumbra::{Entity, FieldList, FieldValue, GraphError, Result, Value};

#[test]
fn first_save_assigns_identity_and_second_save_updates() -> Result<()> {
    let service = service()?;
    let people = service.repository("Person")?;

    let mut ada = person("Ada", 36);
    assert!(!ada.is_persisted());
    let id = save(&service, &mut ada)?;
    assert!(ada.is_persisted());

    ada.set("age", 37);
    save(&service, &mut ada)?;
    assert_eq!(ada.id(), Some(id));

    let stored = people.find(id, &FieldList::all())?.expect("stored");
    assert_eq!(stored.get_int("age"), Some(37));
    assert_eq!(stored.uuid(), ada.uuid());
    assert_eq!(people.search().count()?, 1);
    Ok(())
}

#[test]
fn unchanged_round_trip_has_no_changed_fields() -> Result<()> {
    let service = service()?;
    let people = service.repository("Person")?;
    let mut ada = person("Ada", 36).with("friends", vec![person("Bob", 40)]);
    let id = save(&service, &mut ada)?;

    let ctx = service.context()?;
    let ty = people.entity_type().clone();

    let mut loaded = people.find(id, &FieldList::all())?.expect("stored");
    let mut context = SaveContext::new(ctx.persistence(), ty.clone(), &mut loaded)?;
    assert!(!context.is_new());
    assert!(context.changed_fields()?.is_empty());

    let mut edited = people.find(id, &FieldList::all())?.expect("stored");
    edited.set("age", 40).set("motto", "onwards");
    let mut context = SaveContext::new(ctx.persistence(), ty.clone(), &mut edited)?;
    assert_eq!(context.changed_fields()?, ["age", "motto"]);
    assert!(context.field_changed("motto")?);
    assert!(!context.field_changed("name")?);

    // lazy relations always count as changed once loaded
    let fields = FieldList::parse("all,children")?;
    let mut with_lazy = people.find(id, &fields)?.expect("stored");
    let mut context = SaveContext::new(ctx.persistence(), ty, &mut with_lazy)?;
    assert_eq!(context.changed_fields()?, ["children"]);
    Ok(())
}

#[test]
fn explicit_nulls_only_remove_null_remove_fields() -> Result<()> {
    let service = service()?;
    let people = service.repository("Person")?;
    let mut ada = person("Ada", 36)
        .with("nickname", "Countess")
        .with("motto", "poetical science");
    let id = save(&service, &mut ada)?;

    ada.clear("nickname").clear("motto");
    save(&service, &mut ada)?;

    let stored = people.find(id, &FieldList::all())?.expect("stored");
    assert_eq!(stored.value("nickname"), Some(&Value::Null));
    assert_eq!(stored.get_str("motto"), Some("poetical science"));
    Ok(())
}

#[test]
fn unloaded_fields_are_left_alone() -> Result<()> {
    let service = service()?;
    let people = service.repository("Person")?;
    let id = save(&service, &mut person("Ada", 36).with("motto", "calculate"))?;

    let mut partial = people.find(id, &FieldList::of(["age"]))?.expect("stored");
    assert!(!partial.is_loaded("motto"));
    partial.set("age", 37);
    save(&service, &mut partial)?;

    let stored = people.find(id, &FieldList::all())?.expect("stored");
    assert_eq!(stored.get_str("motto"), Some("calculate"));
    assert_eq!(stored.get_int("age"), Some(37));
    Ok(())
}

#[test]
fn related_lists_are_synchronized() -> Result<()> {
    let service = service()?;
    let people = service.repository("Person")?;
    let mut ada = person("Ada", 36).with("friends", vec![person("Bob", 40), person("Cy", 41)]);
    let id = save(&service, &mut ada)?;
    assert!(ada.related("friends").iter().all(|f| f.is_persisted()));
    assert_eq!(people.search().count()?, 3);

    let loaded = people.find(id, &FieldList::all())?.expect("stored");
    let friends: Vec<&str> = loaded
        .related("friends")
        .iter()
        .filter_map(|f| f.get_str("name"))
        .collect();
    assert_eq!(friends, ["Bob", "Cy"]);

    let bob = loaded.related("friends")[0].clone();
    let mut edited = loaded.clone();
    edited.set("friends", vec![bob]);
    save(&service, &mut edited)?;

    let reloaded = people.find(id, &FieldList::parse("friends.{name}")?)?.expect("stored");
    let friends: Vec<&str> = reloaded
        .related("friends")
        .iter()
        .filter_map(|f| f.get_str("name"))
        .collect();
    assert_eq!(friends, ["Bob"]);
    // the dropped friend still exists
    assert_eq!(people.search().count()?, 3);
    Ok(())
}

fn friend_names(people: &penumbra::Repository, id: u64) -> Result<Vec<String>> {
    let loaded = people.find(id, &FieldList::parse("friends.{name}")?)?.expect("stored");
    Ok(loaded
        .related("friends")
        .iter()
        .filter_map(|f| f.get_str("name").map(str::to_owned))
        .collect())
}

#[test]
fn partially_loaded_relations_survive_a_save() -> Result<()> {
    let service = service()?;
    let people = service.repository("Person")?;
    let mut ada = person("Ada", 36).with(
        "friends",
        vec![
            person("Bob", 40).with("friends", vec![person("Eve", 29)]),
            person("Cy", 41),
            person("Dee", 42),
        ],
    );
    let id = save(&service, &mut ada)?;

    let mut limited = people.find(id, &FieldList::parse("name,friends(1)")?)?.expect("stored");
    assert_eq!(limited.related("friends").len(), 1);
    assert!(limited.is_partial("friends"));
    save(&service, &mut limited)?;
    assert_eq!(friend_names(&people, id)?, ["Bob", "Cy", "Dee"]);

    // two hops bring in Eve, who is not a direct friend
    let mut deep = people
        .search()
        .filter_str("name:Ada")?
        .fields_str("name,friends")?
        .depth(2)
        .single()?
        .expect("Ada");
    assert_eq!(deep.related("friends").len(), 4);
    save(&service, &mut deep)?;
    assert_eq!(friend_names(&people, id)?, ["Bob", "Cy", "Dee"]);

    // assigning the field again saves it as given
    let bob = limited.related("friends")[0].clone();
    limited.set("friends", vec![bob]);
    assert!(!limited.is_partial("friends"));
    save(&service, &mut limited)?;
    assert_eq!(friend_names(&people, id)?, ["Bob"]);
    Ok(())
}

#[test]
fn lazy_collections_only_grow() -> Result<()> {
    let service = service()?;
    let people = service.repository("Person")?;
    let mut ada = person("Ada", 36).with("children", vec![person("Byron", 10)]);
    let id = save(&service, &mut ada)?;

    ada.set("children", vec![person("Anne", 8)]);
    save(&service, &mut ada)?;

    let loaded = people.find(id, &FieldList::of(["children"]))?.expect("stored");
    assert_eq!(loaded.related("children").len(), 2);

    // children point at their parent
    let byron = people.search().filter_str("name:Byron")?.fields_str("parents")?.single()?;
    let byron = byron.expect("Byron");
    assert_eq!(byron.related("parents").len(), 1);
    assert_eq!(byron.related("parents")[0].id(), Some(id));

    // not part of the default field list
    let plain = people.find(id, &FieldList::all())?.expect("stored");
    assert!(!plain.is_loaded("children"));
    Ok(())
}

#[test]
fn sets_hold_each_related_entity_once() -> Result<()> {
    let service = service()?;
    let people = service.repository("Person")?;
    let mut rex = pet("Rex", "dog");
    save(&service, &mut rex)?;
    let mut ada = person("Ada", 36).with("pets", FieldValue::set(vec![rex.clone(), rex]));
    let id = save(&service, &mut ada)?;

    let loaded = people.find(id, &FieldList::of(["pets"]))?.expect("stored");
    match loaded.get("pets") {
        Some(FieldValue::Set(pets)) => {
            assert_eq!(pets.len(), 1);
            assert_eq!(pets[0].type_name(), "Pet");
        }
        other => panic!("expected a set, got {other:?}"),
    }
    Ok(())
}

#[test]
fn relationship_entities_carry_properties() -> Result<()> {
    let service = service()?;
    let people = service.repository("Person")?;
    let marriages = service.repository("MarriedWith")?;
    let ada = save(&service, &mut person("Ada", 36))?;
    let william = save(&service, &mut person("William", 40))?;

    let mut marriage = Entity::relationship(
        "MarriedWith",
        Entity::reference("Person", ada),
        Entity::reference("Person", william),
    )
    .with("years", 17);
    let marriage_id = save(&service, &mut marriage)?;

    let stored = marriages.find(marriage_id, &FieldList::all())?.expect("stored");
    assert_eq!(stored.get_int("years"), Some(17));
    assert_eq!(stored.from().and_then(Entity::id), Some(ada));
    assert_eq!(stored.to().and_then(Entity::id), Some(william));

    // reachable from either side
    for id in [ada, william] {
        let spouse = people.find(id, &FieldList::all())?.expect("stored");
        let marriage = spouse.related_one("marriage").expect("married");
        assert_eq!(marriage.id(), Some(marriage_id));
        assert_eq!(marriage.get_int("years"), Some(17));
    }

    let detailed = marriages
        .find(marriage_id, &FieldList::parse("years,from.{name}")?)?
        .expect("stored");
    assert_eq!(detailed.from().and_then(|p| p.get_str("name")), Some("Ada"));
    assert_eq!(detailed.to().and_then(|p| p.get_str("name")), None);
    Ok(())
}

#[test]
fn relationship_entities_need_both_endpoints() -> Result<()> {
    let service = service()?;
    let mut dangling = Entity::new("MarriedWith").with("years", 1);
    let err = save(&service, &mut dangling).expect_err("no endpoints");
    assert!(matches!(err, GraphError::Persist(_)));
    Ok(())
}

#[test]
fn uuid_match_updates_the_stored_entity() -> Result<()> {
    let service = service()?;
    let people = service.repository("Person")?;
    let mut ada = person("Ada", 36);
    let id = save(&service, &mut ada)?;

    let uuid = ada.uuid().expect("uuid").to_owned();
    let mut detached = Entity::with_uuid("Person", uuid.clone()).with("age", 50);
    save(&service, &mut detached)?;
    assert_eq!(detached.id(), Some(id));
    assert_eq!(people.search().count()?, 1);

    let stored = people.find_by_uuid(&uuid, &FieldList::all())?.expect("stored");
    assert_eq!(stored.get_int("age"), Some(50));
    assert_eq!(stored.get_str("name"), Some("Ada"));
    Ok(())
}

#[test]
fn validation_failures_are_reported() -> Result<()> {
    let service = service()?;

    let mut nameless = Entity::new("Person").with("age", 3);
    assert!(matches!(
        save(&service, &mut nameless),
        Err(GraphError::MissingRequired { field, .. }) if field == "name"
    ));

    let mut negative = person("Ada", -1);
    match save(&service, &mut negative) {
        Err(GraphError::ConstraintViolation { violations, .. }) => {
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].field, "age");
        }
        other => panic!("expected a violation, got {other:?}"),
    }

    save(&service, &mut person("Ada", 36))?;
    let mut twin = pet("Ada", "cat");
    assert!(matches!(
        save(&service, &mut twin),
        Err(GraphError::ConstraintViolation { .. })
    ));
    // the failed save was rolled back
    assert_eq!(service.repository("Named")?.search().count()?, 1);
    Ok(())
}

#[test]
fn abstract_types_cannot_be_saved_directly() -> Result<()> {
    let service = service()?;
    let named = service.repository("Named")?;
    let mut entity = Entity::new("Named").with("name", "nobody");
    let err = service
        .transaction(|_| named.save(&mut entity))
        .expect_err("abstract");
    assert!(matches!(err, GraphError::Persist(_)));

    // concrete subtypes go through the abstract repository
    let mut rex = pet("Rex", "dog");
    service.transaction(|_| named.save(&mut rex))?;
    let found = named.find(rex.id().expect("id"), &FieldList::all())?.expect("stored");
    assert_eq!(found.type_name(), "Pet");
    assert_eq!(found.get_str("species"), Some("dog"));
    Ok(())
}

#[test]
fn lookups_of_the_wrong_type_miss() -> Result<()> {
    let service = service()?;
    let pets = service.repository("Pet")?;
    let ada = save(&service, &mut person("Ada", 36))?;
    assert_eq!(pets.find(ada, &FieldList::all())?, None);
    assert!(!pets.contains(ada)?);
    assert!(service.repository("Person")?.contains(ada)?);
    Ok(())
}

#[test]
fn removal_surfaces_referential_errors() -> Result<()> {
    let service = service()?;
    let people = service.repository("Person")?;
    let mut ada = person("Ada", 36).with("friends", vec![person("Bob", 40)]);
    let id = save(&service, &mut ada)?;

    let err = service
        .transaction(|_| people.remove(&ada))
        .expect_err("still related");
    assert!(matches!(err, GraphError::Backend(_)));

    ada.set("friends", Vec::<Entity>::new());
    save(&service, &mut ada)?;
    service.transaction(|_| people.remove_by_id(id))?;
    assert_eq!(people.find(id, &FieldList::all())?, None);

    let err = service
        .transaction(|_| people.remove_by_id(id))
        .expect_err("already gone");
    assert!(matches!(err, GraphError::NotFound(_)));
    Ok(())
}

#[test]
fn saves_need_a_transaction() -> Result<()> {
    let service = service()?;
    let people = service.repository("Person")?;
    let err = people.save(&mut person("Ada", 36)).expect_err("no transaction");
    assert!(matches!(err, GraphError::NoTransaction));
    Ok(())
}
