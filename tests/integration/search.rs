#![allow(missing_docs)]

#[path = "../common/mod.rs"]
mod common;

use common::{names, person, pet, save, service};
use penumbra::params::wire;
use penumbra::{
    Entity, FieldDef, GraphError, Namespace, Result, Service, ServiceConfig, TypeDescriptor, Value,
};

/// Twenty-five people `P01`..`P25`, aged 1..=25.
fn crowd() -> Result<Service> {
    let service = service()?;
    let people = service.repository("Person")?;
    service.transaction(|_| {
        for age in 1..=25 {
            people.save(&mut person(&format!("P{age:02}"), age))?;
        }
        Ok(())
    })?;
    Ok(service)
}

/// Ada with three friends, one marriage and a pet.
fn ada() -> Result<(Service, u64)> {
    let service = service()?;
    let mut ada = person("Ada", 36)
        .with(
            "friends",
            vec![person("Bob", 40), person("Cy", 41), person("Dee", 42)],
        )
        .with("pets", vec![pet("Rex", "dog")]);
    let id = save(&service, &mut ada)?;
    let william = save(&service, &mut person("William", 40))?;
    save(
        &service,
        &mut Entity::relationship(
            "MarriedWith",
            Entity::reference("Person", id),
            Entity::reference("Person", william),
        )
        .with("years", 17),
    )?;
    Ok((service, id))
}

fn ages(entities: &[Entity]) -> Vec<i64> {
    entities.iter().filter_map(|e| e.get_int("age")).collect()
}

#[test]
fn pages_follow_the_order() -> Result<()> {
    let service = crowd()?;
    let people = service.repository("Person")?;

    let third = people.search().order_by("age").limit(10).page(3).list()?;
    assert_eq!(ages(&third), vec![21, 22, 23, 24, 25]);

    // an explicit start wins over the page
    let shifted = people
        .search()
        .order_by("age")
        .limit(3)
        .page(3)
        .start(2)
        .list()?;
    assert_eq!(ages(&shifted), vec![3, 4, 5]);

    let top = people.search().order_by_desc("age").limit(3).list()?;
    assert_eq!(ages(&top), vec![25, 24, 23]);

    let oldest = people.search().order_by_desc("age").single()?.expect("someone");
    assert_eq!(oldest.get_str("name"), Some("P25"));
    Ok(())
}

#[test]
fn filters_narrow_the_selection() -> Result<()> {
    let service = crowd()?;
    let people = service.repository("Person")?;

    assert_eq!(people.search().filter_str("age:>=18")?.count()?, 8);
    assert_eq!(people.search().filter_str("age:>18")?.count()?, 7);
    assert_eq!(people.search().filter_str("age:(18-20)")?.count()?, 3);
    assert_eq!(people.search().filter_str("name:!P01")?.count()?, 24);
    assert_eq!(
        people
            .search()
            .filter_str("age:<10")?
            .filter_str("age:>=5")?
            .count()?,
        5
    );
    assert_eq!(people.search().filter_str("nickname:null")?.count()?, 25);

    let found = people.search().filter_str("name:P07")?.list()?;
    assert_eq!(ages(&found), vec![7]);
    Ok(())
}

#[test]
fn free_text_matches_indexed_strings() -> Result<()> {
    let service = crowd()?;
    let people = service.repository("Person")?;
    let hits = people.search().query("p1").order_by("age").list()?;
    assert_eq!(ages(&hits), (10..=19).collect::<Vec<i64>>());
    assert!(people.search().query("nobody").list()?.is_empty());
    Ok(())
}

#[test]
fn count_and_sum_ignore_pagination() -> Result<()> {
    let service = crowd()?;
    let people = service.repository("Person")?;
    assert_eq!(people.search().limit(5).page(2).count()?, 25);
    assert_eq!(people.search().sum("age")?, Value::Int(325));
    assert_eq!(people.search().filter_str("age:<=3")?.sum("age")?, Value::Int(6));
    Ok(())
}

#[test]
fn related_fields_are_folded_into_each_result() -> Result<()> {
    let (service, id) = ada()?;
    let people = service.repository("Person")?;

    let found = people.search().filter_str("name:Ada")?.list()?;
    assert_eq!(found.len(), 1);
    let ada = &found[0];
    assert_eq!(ada.id(), Some(id));
    assert_eq!(ada.get_int("age"), Some(36));
    let friends: Vec<&str> = ada
        .related("friends")
        .iter()
        .filter_map(|f| f.get_str("name"))
        .collect();
    assert_eq!(friends, ["Bob", "Cy", "Dee"]);
    assert_eq!(ada.related("pets").len(), 1);
    assert_eq!(
        ada.related_one("marriage").and_then(|m| m.get_int("years")),
        Some(17)
    );

    // per-field limit and sub-fields
    let limited = people
        .search()
        .filter_str("name:Ada")?
        .fields_str("name,friends(2).{age}")?
        .single()?
        .expect("Ada");
    assert_eq!(limited.get_str("name"), Some("Ada"));
    assert!(!limited.is_loaded("age"));
    assert!(!limited.is_loaded("pets"));
    let friends = limited.related("friends");
    assert_eq!(friends.len(), 2);
    assert!(friends.iter().all(|f| f.get_int("age").is_some() && !f.is_loaded("name")));
    Ok(())
}

#[test]
fn unmatched_relations_load_as_empty() -> Result<()> {
    let (service, _) = ada()?;
    let people = service.repository("Person")?;
    let bob = people.search().filter_str("name:Bob")?.single()?.expect("Bob");
    assert!(bob.related("friends").is_empty());
    assert!(bob.related("pets").is_empty());
    assert!(bob.related_one("marriage").is_none());
    Ok(())
}

#[test]
fn returns_swap_in_the_related_items() -> Result<()> {
    let (service, _) = ada()?;
    let people = service.repository("Person")?;

    let friends = people
        .search()
        .filter_str("name:Ada")?
        .returns("friends")
        .order_by("name")
        .list()?;
    assert_eq!(names(&friends), ["Bob", "Cy", "Dee"]);
    assert!(friends.iter().all(|f| f.type_name() == "Person"));
    assert_eq!(
        people.search().filter_str("name:Ada")?.returns("friends").count()?,
        3
    );

    let marriages = people.search().filter_str("name:William")?.returns("marriage").list()?;
    assert_eq!(marriages.len(), 1);
    assert_eq!(marriages[0].type_name(), "MarriedWith");
    assert_eq!(marriages[0].get_int("years"), Some(17));

    let err = people
        .search()
        .returns("friends")
        .returns("pets")
        .list()
        .expect_err("two returns");
    assert!(matches!(err, GraphError::Unsupported(_)));
    Ok(())
}

#[test]
fn unknown_fields_are_rejected() -> Result<()> {
    let (service, _) = ada()?;
    let people = service.repository("Person")?;
    let err = people
        .search()
        .filter_str("colour:red")?
        .list()
        .expect_err("unknown field");
    assert!(matches!(err, GraphError::InvalidArgument(_)));

    let err = people.search().order_by("friends").list().expect_err("related field");
    assert!(matches!(err, GraphError::InvalidArgument(_)));

    // uuid is always filterable
    assert!(people.search().filter_str("uuid:missing")?.list()?.is_empty());
    Ok(())
}

#[test]
fn point_lookups_skip_misses_and_other_types() -> Result<()> {
    let (service, id) = ada()?;
    let people = service.repository("Person")?;
    let rex = service
        .repository("Pet")?
        .search()
        .single()?
        .and_then(|pet| pet.id())
        .expect("Rex");

    let found = people.search().ids([id, 9_999, rex]).list()?;
    assert_eq!(names(&found), ["Ada"]);

    let twice = people.search().ids([id, id]);
    assert_eq!(twice.list()?.len(), 2);
    assert_eq!(twice.set()?.len(), 1);

    // ids that cannot be graph integers fail instead of wrapping
    let err = people
        .search()
        .ids([u64::MAX])
        .order_by("name")
        .list()
        .expect_err("out of range");
    assert!(matches!(err, GraphError::InvalidArgument(_)));

    let uuid = found[0].uuid().expect("uuid").to_owned();
    let by_uuid = people.search().uuids([uuid.as_str(), "unknown"]).list()?;
    assert_eq!(names(&by_uuid), ["Ada"]);
    Ok(())
}

#[test]
fn abstract_repositories_return_concrete_types() -> Result<()> {
    let (service, _) = ada()?;
    let named = service.repository("Named")?;
    let all = named.search().order_by("name").list()?;
    let kinds: Vec<(&str, &str)> = all
        .iter()
        .filter_map(|e| Some((e.get_str("name")?, e.type_name())))
        .collect();
    assert_eq!(
        kinds,
        [
            ("Ada", "Person"),
            ("Bob", "Person"),
            ("Cy", "Person"),
            ("Dee", "Person"),
            ("Rex", "Pet"),
            ("William", "Person"),
        ]
    );
    assert_eq!(
        all.iter().find(|e| e.type_name() == "Pet").and_then(|p| p.get_str("species")),
        Some("dog")
    );
    Ok(())
}

#[test]
fn wire_parameters_drive_a_search() -> Result<()> {
    let service = crowd()?;
    let people = service.repository("Person")?;

    let params = wire::parse("filter:age:>=20;order:-age;limit:2;page:2")?;
    let found = people.search().params(params).list()?;
    assert_eq!(ages(&found), vec![23, 22]);

    let params = wire::parse(r#"{"q": "p2", "order": [{"field": "age"}], "limit": 3}"#)?;
    let found = people.search().params(params).list()?;
    assert_eq!(ages(&found), vec![2, 20, 21]);

    assert!(matches!(
        wire::parse("page:18446744073709551615;limit:2"),
        Err(GraphError::InvalidArgument(_))
    ));
    let err = people.search().limit(2).page(usize::MAX).list().expect_err("overflow");
    assert!(matches!(err, GraphError::InvalidArgument(_)));
    Ok(())
}

#[test]
fn free_text_without_indexed_fields_searches_declared_strings() -> Result<()> {
    let service = Service::new(ServiceConfig::default()).with_namespace(
        Namespace::new("notes").with_type(
            TypeDescriptor::node("Note")
                .field(FieldDef::string("body"))
                .field(FieldDef::int("rank")),
        ),
    );
    service.connect()?;
    let notes = service.repository("Note")?;
    service.transaction(|_| {
        for rank in 0..20 {
            notes.save(
                &mut Entity::new("Note")
                    .with("body", format!("zzz{rank}"))
                    .with("rank", rank),
            )?;
        }
        Ok(())
    })?;

    // uuids are hex strings but never part of the searched text
    assert!(notes.search().query("a").list()?.is_empty());
    assert_eq!(notes.search().query("zzz1").count()?, 11);
    Ok(())
}
