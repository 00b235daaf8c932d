#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use penumbra::{Entity, Service, ServiceConfig};
use tempfile::TempDir;

const CONFIG: &str = r#"
location = "graph.json"
version = "1.0.0"
log_filter = "penumbra=warn"

[[types]]
name = "Person"

[[types.fields]]
name = "name"
type = "string"
required = true
unique = true

[[types.fields]]
name = "age"
type = "int"
indexed = true
"#;

fn setup(name: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join(format!("{name}.toml"));
    fs::write(&path, CONFIG).expect("write config");
    seed(&path).expect("seed graph");
    (dir, path)
}

fn seed(config: &Path) -> penumbra::Result<()> {
    let service = Service::new(ServiceConfig::load(config)?);
    service.connect()?;
    let people = service.repository("Person")?;
    service.transaction(|_| {
        for (name, age) in [("Bob", 40), ("Ada", 36)] {
            people.save(&mut Entity::new("Person").with("name", name).with("age", age))?;
        }
        Ok(())
    })?;
    service.shutdown()
}

fn stdout_of(config: &Path, args: &[&str]) -> String {
    let output = cargo_bin_cmd!("penumbra")
        .env_remove("PENUMBRA_VERSION")
        .arg("--config")
        .arg(config)
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    String::from_utf8_lossy(&output).into_owned()
}

#[test]
fn search_prints_entities_as_json() {
    let (_dir, config) = setup("search");
    let stdout = stdout_of(&config, &["search", "Person", "--params", "order:age"]);
    let entities: serde_json::Value = serde_json::from_str(&stdout).expect("json output");
    let entities = entities.as_array().expect("array");
    assert_eq!(entities.len(), 2);
    assert_eq!(entities[0]["name"], "Ada");
    assert_eq!(entities[0]["type"], "Person");
    assert!(entities[0]["uuid"].is_string());
    assert_eq!(entities[1]["age"], 40);
}

#[test]
fn count_honours_filters() {
    let (_dir, config) = setup("count");
    let stdout = stdout_of(&config, &["count", "Person", "--params", "filter:age:>=40"]);
    assert_eq!(stdout.trim(), "1");
    let stdout = stdout_of(&config, &["--format", "json", "count", "Person"]);
    assert_eq!(stdout.trim(), "2");
}

#[test]
fn search_with_the_count_flag_prints_a_number() {
    let (_dir, config) = setup("search-count");
    let stdout = stdout_of(&config, &["search", "Person", "--params", "count;filter:age:<40"]);
    assert_eq!(stdout.trim(), "1");
}

#[test]
fn status_reports_versions_and_schema() {
    let (_dir, config) = setup("status");
    let stdout = stdout_of(&config, &["status", "--format", "json"]);
    let report: serde_json::Value = serde_json::from_str(&stdout).expect("json output");
    assert_eq!(report["application_version"], "1.0.0");
    assert_eq!(report["graph_version"], "1.0.0");
    assert_eq!(report["patches"], "up to date");
    assert_eq!(report["types"], serde_json::json!(["Person"]));
    let objects = report["schema_objects"].as_array().expect("objects");
    assert!(objects.contains(&serde_json::json!({
        "kind": "unique",
        "label": "Person",
        "property": "name"
    })));

    let text = stdout_of(&config, &["status"]);
    assert!(text.contains("Versions: application=1.0.0 graph=1.0.0"));
    assert!(text.contains("INDEX ON :Person(age)"));
}

#[test]
fn schema_lists_fields_and_flags() {
    let (_dir, config) = setup("schema");
    let text = stdout_of(&config, &["schema"]);
    assert!(text.starts_with("Person\n"));
    let name_line = text
        .lines()
        .find(|line| line.trim_start().starts_with("name"))
        .expect("name field");
    assert!(name_line.contains("string"));
    assert!(name_line.contains("required unique"));
}

#[test]
fn unknown_types_fail_with_an_error() {
    let (_dir, config) = setup("unknown");
    let output = cargo_bin_cmd!("penumbra")
        .env_remove("PENUMBRA_VERSION")
        .arg("--config")
        .arg(&config)
        .args(["search", "Starship"])
        .assert()
        .failure()
        .code(1)
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8_lossy(&output);
    assert!(stderr.contains("error: cannot provide a repository for 'Starship'"));
}
