use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{format::DataSetFormat, operation::DbOperation, plan::Phase};

#[derive(Debug, Parser)]
#[command(author, version, about = "Parse fixture datasets and plan database seeding", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Parse dataset files and print their tables
    Inspect(InspectArgs),
    /// Show the operations a phase would apply, in order
    Plan(PlanArgs),
    /// Rewrite a dataset in another format
    Convert(ConvertArgs),
    /// Convert a table schema between DTD and YAML
    Schema(SchemaArgs),
}

/// Options shared by every command that reads datasets.
#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Dataset files, loaded in the order given
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
    /// YAML configuration supplying defaults for the options below
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Dataset format (flat, xml, streaming, dtd, csv)
    #[arg(short, long, value_parser = parse_format)]
    pub format: Option<DataSetFormat>,
    /// Add attributes first seen on later rows as new columns
    #[arg(long = "column-sensing")]
    pub column_sensing: bool,
    /// Treat table names as case sensitive
    #[arg(long = "case-sensitive")]
    pub case_sensitive: bool,
    /// DTD describing the tables and their column order
    #[arg(long)]
    pub dtd: Option<PathBuf>,
    /// Honour the DOCTYPE embedded in each flat XML document
    #[arg(long = "dtd-metadata")]
    pub dtd_metadata: bool,
    /// Disable interning of names and values while parsing
    #[arg(long = "no-interning")]
    pub no_interning: bool,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long)]
    pub encoding: Option<String>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// CSV cell text that stands for a null value
    #[arg(long = "null-token")]
    pub null_token: Option<String>,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Print the tables as JSON instead of text tables
    #[arg(long)]
    pub json: bool,
    /// Maximum rows printed per table
    #[arg(long, default_value_t = 20)]
    pub rows: usize,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Phase to plan
    #[arg(short, long, value_enum, default_value_t = PhaseArg::Setup)]
    pub phase: PhaseArg,
    /// Setup operations, overriding the configuration (e.g. `clean_insert`)
    #[arg(long = "set-up", value_delimiter = ',', value_parser = parse_operation)]
    pub set_up: Vec<DbOperation>,
    /// Teardown operations, overriding the configuration
    #[arg(long = "tear-down", value_delimiter = ',', value_parser = parse_operation)]
    pub tear_down: Vec<DbOperation>,
}

#[derive(Debug, Args)]
pub struct ConvertArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Output format
    #[arg(short, long, value_enum)]
    pub to: OutputFormat,
    /// Output file, or a directory when writing CSV (stdout if omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Embed a DOCTYPE describing every table in flat XML output
    #[arg(long)]
    pub doctype: bool,
}

#[derive(Debug, Args)]
pub struct SchemaArgs {
    /// Schema file (.dtd or .yaml)
    #[arg(short, long)]
    pub input: PathBuf,
    /// Output format
    #[arg(short, long, value_enum)]
    pub to: SchemaFormat,
    /// Output file (stdout if omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Treat table names as case sensitive
    #[arg(long = "case-sensitive")]
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum PhaseArg {
    Setup,
    Teardown,
    Rollback,
}

impl From<PhaseArg> for Phase {
    fn from(value: PhaseArg) -> Self {
        match value {
            PhaseArg::Setup => Phase::Setup,
            PhaseArg::Teardown => Phase::Teardown,
            PhaseArg::Rollback => Phase::Rollback,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    Flat,
    Xml,
    Csv,
    Dtd,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum SchemaFormat {
    Yaml,
    Dtd,
}

pub fn parse_format(value: &str) -> Result<DataSetFormat, String> {
    value.parse().map_err(|err| format!("{err}"))
}

pub fn parse_operation(value: &str) -> Result<DbOperation, String> {
    value.parse().map_err(|err| format!("{err}"))
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
