#![allow(missing_docs)]

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use common::{family, names, person, save, service};
use penumbra::backend::SchemaObject;
use penumbra::service::TxState;
use penumbra::{
    Entity, FieldDef, GraphBackend, GraphError, MemoryBackend, Model, Namespace, Result, Service,
    ServiceConfig, ServiceState, TypeDescriptor,
};

fn unique(label: &str, property: &str) -> SchemaObject {
    SchemaObject::Unique {
        label: label.into(),
        property: property.into(),
    }
}

struct Tag;

impl Model for Tag {
    const TYPE: &'static str = "Tag";

    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::node("Tag").field(FieldDef::string("label").required().unique())
    }
}

#[test]
fn connect_and_shutdown_move_through_the_states() -> Result<()> {
    let service = Service::new(ServiceConfig::default()).with_namespace(family());
    assert_eq!(service.state(), ServiceState::Started);
    assert!(matches!(service.repository("Person"), Err(GraphError::NotRunning)));
    assert!(matches!(service.begin(), Err(GraphError::NotRunning)));

    service.connect()?;
    assert!(service.is_running());
    assert!(matches!(service.connect(), Err(GraphError::AlreadyRunning)));

    let people = service.repository("Person")?;
    assert!(Arc::ptr_eq(&people, &service.repository("Person")?));
    save(&service, &mut person("Ada", 36))?;

    service.shutdown()?;
    assert_eq!(service.state(), ServiceState::Started);
    assert!(matches!(service.shutdown(), Err(GraphError::NotRunning)));
    assert!(people.is_disposed());
    assert!(matches!(people.search().count(), Err(GraphError::NotRunning)));

    // an in-memory graph starts over
    service.connect()?;
    assert_eq!(service.repository("Person")?.search().count()?, 0);
    Ok(())
}

#[test]
fn snapshots_survive_a_reconnect() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let service = Service::new(ServiceConfig::default().with_location(dir.path().join("graph.json")))
        .with_namespace(family());
    service.connect()?;
    assert!(!service.schema_report().is_empty());
    let id = save(&service, &mut person("Ada", 36))?;
    service.shutdown()?;

    service.connect()?;
    assert!(service.schema_report().is_empty());
    let people = service.repository("Person")?;
    assert_eq!(people.search().count()?, 1);
    assert!(people.contains(id)?);
    Ok(())
}

#[test]
fn failed_connects_return_to_started() -> Result<()> {
    let offline = Service::new(ServiceConfig::default())
        .with_namespace(family())
        .with_opener(Arc::new(|_: &ServiceConfig| -> Result<Arc<dyn GraphBackend>> {
            Err(GraphError::Backend("offline".into()))
        }));
    assert!(matches!(offline.connect(), Err(GraphError::Backend(_))));
    assert_eq!(offline.state(), ServiceState::Started);
    // a retry is allowed
    assert!(matches!(offline.connect(), Err(GraphError::Backend(_))));

    let orphan = Service::new(ServiceConfig::default()).with_namespace(
        Namespace::new("broken").with_type(TypeDescriptor::node("Orphan").extends("Missing")),
    );
    assert!(matches!(
        orphan.connect(),
        Err(GraphError::RepositoryInstantiation { .. })
    ));
    assert_eq!(orphan.state(), ServiceState::Started);
    Ok(())
}

#[test]
fn transaction_closures_roll_back_on_error() -> Result<()> {
    let service = service()?;
    let people = service.repository("Person")?;

    let err = service
        .transaction(|_| {
            people.save(&mut person("Ada", 36))?;
            Err::<(), _>(GraphError::InvalidArgument("changed my mind".into()))
        })
        .expect_err("closure failed");
    assert!(matches!(err, GraphError::InvalidArgument(_)));
    assert_eq!(people.search().count()?, 0);

    let id = service.transaction(|tx| {
        assert_eq!(tx.state(), TxState::Active);
        let mut ada = person("Ada", 36);
        people.save(&mut ada)?;
        Ok(ada.id())
    })?;
    assert!(id.is_some());
    assert_eq!(people.search().count()?, 1);
    Ok(())
}

#[test]
fn dropped_guards_roll_back() -> Result<()> {
    let service = service()?;
    let people = service.repository("Person")?;
    {
        let _tx = service.begin()?;
        people.save(&mut person("Ada", 36))?;
    }
    assert_eq!(people.search().count()?, 0);

    let tx = service.begin()?;
    people.save(&mut person("Ada", 36))?;
    tx.commit()?;
    assert_eq!(people.search().count()?, 1);
    Ok(())
}

#[test]
fn nested_rollback_dooms_the_outer_transaction() -> Result<()> {
    let service = service()?;
    let people = service.repository("Person")?;

    let outer = service.begin()?;
    people.save(&mut person("Ada", 36))?;
    let inner = service.begin()?;
    people.save(&mut person("Bob", 40))?;
    inner.rollback()?;
    assert!(matches!(outer.commit(), Err(GraphError::RolledBack)));
    assert_eq!(people.search().count()?, 0);
    Ok(())
}

#[test]
fn transactions_on_other_threads_wait_their_turn() -> Result<()> {
    let service = service()?;
    let people = service.repository("Person")?;

    let outer = service.begin()?;
    people.save(&mut person("Ada", 36))?;
    std::thread::scope(|scope| -> Result<()> {
        let other = scope.spawn(|| -> Result<()> {
            let tx = service.begin()?;
            people.save(&mut person("Bob", 40))?;
            tx.rollback()
        });
        outer.commit()?;
        other.join().expect("thread")
    })?;

    let everyone = people.search().list()?;
    assert_eq!(names(&everyone), ["Ada"]);
    Ok(())
}

#[test]
fn schema_is_reconciled_against_the_backend() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    backend.begin()?;
    backend.create_schema(&SchemaObject::Index {
        label: "Person".into(),
        property: "motto".into(),
    })?;
    backend.commit()?;

    let shared = Arc::clone(&backend);
    let service = Service::new(ServiceConfig::default())
        .with_namespace(family())
        .with_opener(Arc::new(move |_: &ServiceConfig| -> Result<Arc<dyn GraphBackend>> {
            Ok(Arc::clone(&shared) as Arc<dyn GraphBackend>)
        }));
    service.connect()?;

    let report = service.schema_report();
    assert_eq!(
        report.created,
        [unique("Named", "name"), unique("Person", "uuid"), unique("Pet", "uuid")]
    );
    assert_eq!(
        report.dropped,
        [SchemaObject::Index {
            label: "Person".into(),
            property: "motto".into(),
        }]
    );
    assert!(service.reconcile_schema()?.is_empty());

    // the marker node is not an entity of any type
    assert_eq!(backend.nodes_by_label("Graph")?.len(), 1);
    assert_eq!(service.graph_version()?, "0.0.0");

    drop(service);
    assert!(matches!(backend.begin(), Err(GraphError::Backend(_))));
    Ok(())
}

#[test]
fn types_can_come_from_models_and_configuration() -> Result<()> {
    let config = ServiceConfig {
        types: vec![TypeDescriptor::node("Note").field(FieldDef::string("text").indexed())],
        ..ServiceConfig::default()
    };
    let service = Service::new(config).with_namespace(Namespace::new("tags").with_model::<Tag>());
    service.connect()?;

    let tags = service.repository_for::<Tag>()?;
    assert_eq!(tags.name(), "Tag");
    service.transaction(|_| tags.save(&mut Entity::new("Tag").with("label", "urgent")))?;
    let notes = service.repository("Note")?;
    service.transaction(|_| notes.save(&mut Entity::new("Note").with("text", "call Bob")))?;
    assert_eq!(notes.search().query("bob").count()?, 1);

    let objects = service.context()?.backend().schema_objects()?;
    assert!(objects.contains(&unique("Tag", "label")));
    assert!(objects.contains(&SchemaObject::Index {
        label: "Note".into(),
        property: "text".into(),
    }));
    Ok(())
}
