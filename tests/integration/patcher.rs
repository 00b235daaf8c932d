#![allow(missing_docs)]

#[path = "../common/mod.rs"]
mod common;

use std::path::Path;
use std::sync::Arc;

use common::{family, names, person};
use parking_lot::Mutex;
use penumbra::patch::PatchOutcome;
use penumbra::{FnPatch, GraphError, Namespace, Result, Service, ServiceConfig, ServiceState};

type Journal = Arc<Mutex<Vec<String>>>;

trait Step: Fn(&Service) -> Result<()> + Send + Sync + 'static {}

impl<F: Fn(&Service) -> Result<()> + Send + Sync + 'static> Step for F {}

fn recording(version: &str, name: &str, journal: &Journal) -> FnPatch<impl Step> {
    let journal = Arc::clone(journal);
    let entry = name.to_owned();
    FnPatch::new(version, name, move |_: &Service| {
        journal.lock().push(entry.clone());
        Ok(())
    })
}

/// Patch creating a person, so its effect is visible in the graph.
fn creating(version: &str, name: &str, person_name: &str) -> FnPatch<impl Step> {
    let person_name = person_name.to_owned();
    FnPatch::new(version, name, move |service: &Service| {
        service.repository("Person")?.save(&mut person(&person_name, 1))
    })
}

fn stored_people(location: &Path) -> Result<Vec<String>> {
    let service = Service::new(ServiceConfig::default().with_location(location)).with_namespace(family());
    service.connect()?;
    let people = service.repository("Person")?.search().order_by("name").list()?;
    Ok(names(&people).into_iter().map(str::to_owned).collect())
}

#[test]
fn patches_run_by_version_then_priority_then_name() -> Result<()> {
    let journal = Journal::default();
    let patches = Namespace::new("patches")
        .with_patch(recording("1.2.0", "b", &journal))
        .with_patch(recording("1.1.0", "z", &journal))
        .with_patch(recording("1.2.0", "a", &journal))
        .with_patch(recording("1.2.0", "c", &journal).with_priority(-1))
        .with_patch(recording("1.3.0", "future", &journal));
    let service = Service::new(ServiceConfig::in_memory("1.2.0"))
        .with_namespace(family())
        .with_namespace(patches);
    service.connect()?;

    assert_eq!(*journal.lock(), ["z", "c", "a", "b"]);
    assert_eq!(
        service.patch_outcome(),
        Some(PatchOutcome::Applied {
            from: "0.0.0".into(),
            to: "1.2.0".into(),
            patches: 4,
        })
    );
    assert_eq!(service.graph_version()?, "1.2.0");
    Ok(())
}

#[test]
fn patches_only_run_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let location = dir.path().join("graph.json");
    let journal = Journal::default();
    let connect = |version: &str| -> Result<Service> {
        let service = Service::new(ServiceConfig::in_memory(version).with_location(&location))
            .with_namespace(family())
            .with_namespace(
                Namespace::new("patches")
                    .with_patch(recording("1.0.0", "first", &journal))
                    .with_patch(recording("1.1.0", "second", &journal))
                    .with_patch(creating("1.1.0", "seed", "Seeded")),
            );
        service.connect()?;
        Ok(service)
    };

    connect("1.0.0")?.shutdown()?;
    let service = connect("1.1.0")?;
    assert_eq!(*journal.lock(), ["first", "second"]);
    assert_eq!(service.repository("Person")?.search().count()?, 1);
    service.shutdown()?;

    let service = connect("1.1.0")?;
    assert_eq!(service.patch_outcome(), Some(PatchOutcome::UpToDate));
    assert_eq!(journal.lock().len(), 2);
    Ok(())
}

#[test]
fn failed_patch_aborts_connect_and_keeps_completed_groups() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let location = dir.path().join("graph.json");
    let patches = Namespace::new("patches")
        .with_patch(creating("1.2.0", "migrate", "Migrated"))
        .with_patch(creating("1.3.0", "half", "Half"))
        .with_patch(FnPatch::new("1.3.0", "later", |service: &Service| {
            service.repository("Person")?.save(&mut person("Later", 2))?;
            Err(GraphError::Persist("boom".into()))
        }));
    let service = Service::new(ServiceConfig::in_memory("1.3.0").with_location(&location))
        .with_namespace(family())
        .with_namespace(patches);

    let err = service.connect().expect_err("patch fails");
    assert!(err.is_fatal());
    match &err {
        GraphError::Migration { version, patch, .. } => {
            assert_eq!(version, "1.3.0");
            assert_eq!(patch, "later");
        }
        other => panic!("expected a migration error, got {other:?}"),
    }
    assert_eq!(service.state(), ServiceState::Started);
    assert!(matches!(service.context(), Err(GraphError::NotRunning)));

    // each patch commits on its own; the version stops at the last full group
    assert_eq!(stored_people(&location)?, ["Half", "Migrated"]);
    let service = Service::new(ServiceConfig::default().with_location(&location));
    service.connect()?;
    assert_eq!(service.graph_version()?, "1.2.0");
    Ok(())
}

#[test]
fn undefined_version_disables_patching() -> Result<()> {
    let journal = Journal::default();
    let service = Service::new(ServiceConfig::default())
        .with_namespace(Namespace::new("patches").with_patch(recording("0.1.0", "never", &journal)));
    service.connect()?;
    assert_eq!(service.patch_outcome(), Some(PatchOutcome::Disabled));
    assert!(journal.lock().is_empty());
    assert_eq!(service.graph_version()?, "0.0.0");
    Ok(())
}

#[test]
fn newer_graphs_are_left_alone() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let location = dir.path().join("graph.json");

    // no patches still advance the stored version
    let service = Service::new(ServiceConfig::in_memory("2.0.0").with_location(&location));
    service.connect()?;
    assert_eq!(
        service.patch_outcome(),
        Some(PatchOutcome::Applied {
            from: "0.0.0".into(),
            to: "2.0.0".into(),
            patches: 0,
        })
    );
    service.shutdown()?;

    let journal = Journal::default();
    let service = Service::new(ServiceConfig::in_memory("1.0.0").with_location(&location)).with_namespace(
        Namespace::new("patches")
            .with_patch(recording("1.0.0", "old", &journal))
            .with_patch(recording("1.5.0", "middle", &journal))
            .with_patch(recording("2.0.0", "current", &journal))
            .with_patch(recording("2.1.0", "newer", &journal)),
    );
    service.connect()?;
    assert_eq!(
        service.patch_outcome(),
        Some(PatchOutcome::Ahead {
            stored: "2.0.0".into(),
            skipped: 2,
        })
    );
    assert!(journal.lock().is_empty());
    assert_eq!(service.graph_version()?, "2.0.0");
    Ok(())
}

#[test]
fn pre_release_and_build_suffixes_are_ignored() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let location = dir.path().join("graph.json");
    let journal = Journal::default();
    let connect = |version: &str| -> Result<Service> {
        let service = Service::new(ServiceConfig::in_memory(version).with_location(&location))
            .with_namespace(Namespace::new("patches").with_patch(recording("1.2.0", "release", &journal)));
        service.connect()?;
        Ok(service)
    };

    let service = connect("1.2.0-beta.1")?;
    assert_eq!(*journal.lock(), ["release"]);
    assert_eq!(service.graph_version()?, "1.2.0");
    service.shutdown()?;

    let service = connect("1.2.0+build.5")?;
    assert_eq!(service.patch_outcome(), Some(PatchOutcome::UpToDate));
    service.shutdown()?;

    let err = Service::new(ServiceConfig::in_memory("one.two"))
        .connect()
        .expect_err("not a version");
    assert!(matches!(err, GraphError::Version { .. }));
    Ok(())
}
