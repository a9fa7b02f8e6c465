pub mod cli;
pub mod config;
pub mod convert;
pub mod decorator;
pub mod dtd;
pub mod error;
pub mod expected;
pub mod format;
pub mod inspect;
pub mod intern;
pub mod io_utils;
pub mod loader;
pub mod model;
pub mod operation;
pub mod plan;
pub mod producer;
pub mod registry;
pub mod resource;
pub mod schema_source;
pub mod table;
pub mod writer;

use std::{env, fs, io::Write, path::Path, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands, SchemaFormat, SourceArgs},
    config::Configuration,
    format::DataSetFormat,
    loader::Fixture,
    model::{CaseSensitivity, DataSet, FixtureData},
    plan::Phase,
    resource::FileSystemResolver,
    schema_source::SchemaSource,
};

pub use crate::{
    error::{DatabaseError, FixtureError},
    loader::{ConnectionHandle, ConnectionProvider, Executor, TeardownReport},
    model::Dataset,
    operation::DbOperation,
    producer::StreamingProducer,
    registry::{FixtureRegistry, UnitKey},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("fixture_seed", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Inspect(args) => inspect::execute(&args),
        Commands::Plan(args) => handle_plan(&args),
        Commands::Convert(args) => convert::execute(&args),
        Commands::Schema(args) => handle_schema(&args),
    }
}

/// Builds the effective configuration for `args` and loads its datasets.
pub(crate) fn load_sources(args: &SourceArgs) -> Result<(Configuration, FixtureData)> {
    let mut config = match &args.config {
        Some(path) => Configuration::load(path)?,
        None => Configuration::default(),
    };
    if let Some(format) = args.format {
        config.format = format;
    } else if args.config.is_none()
        && let Some(format) = args.inputs.first().and_then(|path| DataSetFormat::from_path(path))
    {
        config.format = format;
    }

    let options = &mut config.format_options;
    options.column_sensing |= args.column_sensing;
    options.case_sensitive_table_names |= args.case_sensitive;
    options.dtd_metadata |= args.dtd_metadata;
    if args.no_interning {
        options.interning = false;
    }
    if let Some(dtd) = &args.dtd {
        options.dtd_location = Some(dtd.display().to_string());
    }
    if let Some(encoding) = &args.encoding {
        options.encoding = Some(encoding.clone());
    }
    if let Some(first) = args.inputs.first()
        && let Some(delimiter) = io_utils::resolve_input_delimiter(first, args.delimiter)
    {
        options.csv_delimiter = delimiter as char;
    }
    if let Some(token) = &args.null_token {
        options.null_token = token.clone();
    }
    config.locations = args
        .inputs
        .iter()
        .map(|path| path.display().to_string())
        .collect();
    debug!("Effective configuration: {config:?}");

    let resolver = FileSystemResolver::new(".");
    let data = loader::load_data(&config, &config.locations, &resolver)
        .with_context(|| format!("Loading {} dataset file(s)", config.locations.len()))?;
    Ok((config, data))
}

fn handle_plan(args: &cli::PlanArgs) -> Result<()> {
    let (mut config, data) = load_sources(&args.source)?;
    if !args.set_up.is_empty() {
        config.set_up_operation = args.set_up.clone();
    }
    if !args.tear_down.is_empty() {
        config.tear_down_operation = args.tear_down.clone();
    }
    config.validate().context("Validating operation overrides")?;

    let phase = Phase::from(args.phase);
    let fixture = Fixture::from_data(config, data);
    let plan = fixture.plan(phase);
    if plan.is_empty() {
        println!("{phase}: nothing to apply");
    } else {
        println!("{phase}:");
        for step in plan.steps() {
            println!("  {step}");
        }
    }
    info!(
        "Planned {} step(s) for {phase} over {} table(s)",
        plan.steps().len(),
        fixture.data().table_names().len()
    );
    Ok(())
}

fn handle_schema(args: &cli::SchemaArgs) -> Result<()> {
    let case = CaseSensitivity::from_flag(args.case_sensitive);
    let source = read_schema_source(&args.input, case)?;
    let rendered = match args.to {
        SchemaFormat::Yaml => source.to_yaml_string()?,
        SchemaFormat::Dtd => source.to_dtd_string(),
    };
    let mut out = io_utils::open_output(args.output.as_deref())?;
    out.write_all(rendered.as_bytes())
        .context("Writing schema output")?;
    out.flush().context("Flushing schema output")?;
    info!(
        "Converted schema with {} table(s) from {:?}",
        source.tables().len(),
        args.input
    );
    Ok(())
}

fn read_schema_source(path: &Path, case: CaseSensitivity) -> Result<SchemaSource> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("dtd") => {
            let text =
                fs::read_to_string(path).with_context(|| format!("Reading DTD {path:?}"))?;
            SchemaSource::from_dtd(&text, case).with_context(|| format!("Parsing DTD {path:?}"))
        }
        Some("yaml" | "yml") => SchemaSource::load_yaml(path, case),
        _ => bail!("Cannot tell the schema format of {path:?}; expected a .dtd or .yaml file"),
    }
}
