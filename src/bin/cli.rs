//! Binary entry point for the Penumbra command-line front end.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use penumbra::{
    backend::SchemaObject,
    logging,
    params::wire,
    patch::PatchOutcome,
    schema::{EntityType, FieldType},
    Service, ServiceConfig,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "penumbra",
    version,
    about = "Inspect and query a Penumbra graph",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(
        long,
        global = true,
        env = "PENUMBRA_CONFIG",
        help = "Service configuration file (defaults to the platform config directory)"
    )]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Graph snapshot file, overrides the configured location")]
    location: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Connect and report versions, types and schema objects")]
    Status,

    #[command(about = "List the fields of every registered type")]
    Schema,

    #[command(about = "Print entities of a type matching the search parameters")]
    Search(SearchCmd),

    #[command(about = "Count entities of a type matching the search parameters")]
    Count(SearchCmd),
}

#[derive(Args, Debug)]
struct SearchCmd {
    #[arg(value_name = "TYPE", help = "Entity type name")]
    type_name: String,

    #[arg(
        long,
        default_value = "",
        help = "Search parameters as `key:value;...` pairs or a JSON object"
    )]
    params: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    application_version: String,
    graph_version: String,
    location: Option<PathBuf>,
    types: Vec<String>,
    schema_objects: Vec<SchemaObject>,
    patches: String,
}

#[derive(Debug, Serialize)]
struct FieldRow {
    entity: String,
    field: String,
    kind: String,
    flags: Vec<&'static str>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut config = ServiceConfig::load_or_default(cli.open.config.clone())?;
    if let Some(location) = cli.open.location.clone() {
        config.location = Some(location);
    }
    logging::init(&config.log_filter);

    let service = Service::new(config);
    service.connect()?;
    let result = execute(&service, &cli);
    service.shutdown()?;
    result
}

fn execute(service: &Service, cli: &Cli) -> Result<(), Box<dyn Error>> {
    match &cli.command {
        Command::Status => {
            let ctx = service.context()?;
            let report = StatusReport {
                application_version: service.config().version.clone(),
                graph_version: service.graph_version()?,
                location: service.config().location.clone(),
                types: ctx.registry().types().map(|ty| ty.name().to_owned()).collect(),
                schema_objects: ctx.backend().schema_objects()?,
                patches: describe_outcome(service.patch_outcome()),
            };
            emit(&cli.format, &report, || print_status_text(&report))?;
        }
        Command::Schema => {
            let ctx = service.context()?;
            let rows: Vec<FieldRow> = ctx.registry().types().flat_map(|ty| field_rows(ty)).collect();
            emit(&cli.format, &rows, || print_schema_text(&rows))?;
        }
        Command::Search(cmd) => {
            let params = wire::parse(&cmd.params)?;
            let repository = service.repository(&cmd.type_name)?;
            if params.count {
                let count = repository.search().params(params).count()?;
                emit(&cli.format, &count, || println!("{count}"))?;
                return Ok(());
            }
            let entities: Vec<serde_json::Value> = repository
                .search()
                .params(params)
                .list()?
                .iter()
                .map(|entity| entity.to_json())
                .collect();
            // entities are always printed as JSON
            println!("{}", serde_json::to_string_pretty(&entities)?);
        }
        Command::Count(cmd) => {
            let params = wire::parse(&cmd.params)?;
            let repository = service.repository(&cmd.type_name)?;
            let count = repository.search().params(params).count()?;
            emit(&cli.format, &count, || println!("{count}"))?;
        }
    }
    Ok(())
}

fn field_rows(ty: &EntityType) -> Vec<FieldRow> {
    ty.fields()
        .iter()
        .map(|field| {
            let annotations = &field.annotations;
            let flags = [
                (annotations.required, "required"),
                (annotations.unique, "unique"),
                (annotations.indexed, "indexed"),
                (annotations.lazy, "lazy"),
                (annotations.null_remove, "null_remove"),
            ]
            .into_iter()
            .filter_map(|(set, name)| set.then_some(name))
            .collect();
            FieldRow {
                entity: ty.name().to_owned(),
                field: field.name.clone(),
                kind: describe_type(field.field_type, field.related_to().map(|r| r.target.as_str())),
                flags,
            }
        })
        .collect()
}

fn describe_type(field_type: FieldType, target: Option<&str>) -> String {
    match field_type {
        FieldType::Bool => "bool".into(),
        FieldType::Int => "int".into(),
        FieldType::Float => "float".into(),
        FieldType::String => "string".into(),
        FieldType::List => "list".into(),
        FieldType::Any => "any".into(),
        FieldType::Related(cardinality) => {
            format!("{cardinality:?}<{}>", target.unwrap_or("?")).to_lowercase()
        }
    }
}

fn describe_outcome(outcome: Option<PatchOutcome>) -> String {
    match outcome {
        None => "not run".into(),
        Some(PatchOutcome::Disabled) => "disabled".into(),
        Some(PatchOutcome::UpToDate) => "up to date".into(),
        Some(PatchOutcome::Ahead { stored, skipped }) => {
            format!("graph at {stored} is ahead ({skipped} patches in between)")
        }
        Some(PatchOutcome::Applied { from, to, patches }) => {
            format!("{patches} patches applied, {from} -> {to}")
        }
    }
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_status_text(report: &StatusReport) {
    println!(
        "Versions: application={} graph={}",
        report.application_version, report.graph_version
    );
    match &report.location {
        Some(location) => println!("Location: {}", location.display()),
        None => println!("Location: in-memory"),
    }
    println!("Patches: {}", report.patches);
    println!("Types: {}", report.types.join(", "));
    println!("Schema objects:");
    for object in &report.schema_objects {
        println!("  {object}");
    }
}

fn print_schema_text(rows: &[FieldRow]) {
    let mut current = "";
    for row in rows {
        if row.entity != current {
            println!("{}", row.entity);
            current = &row.entity;
        }
        println!("  {:<16} {:<20} {}", row.field, row.kind, row.flags.join(" "));
    }
}
