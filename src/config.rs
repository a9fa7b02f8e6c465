//! Fixture configuration: which resources to load, how to parse them, which
//! operations run for each phase, and the settings handed to the connection
//! provider.
//!
//! A [`Configuration`] is built in code through [`ConfigurationBuilder`] or
//! loaded from a YAML document:
//!
//! ```yaml
//! locations: [users.xml, orders.xml]
//! set_up_operation: CLEAN_INSERT
//! tear_down_operation: [DELETE_ALL]
//! format: flat
//! format_options:
//!   column_sensing: true
//! connection:
//!   db_type: postgresql
//!   schema: public
//! replacements:
//!   - from: "[NULL]"
//!     to: null
//! ```

use std::{fmt, fs, path::Path, str::FromStr};

use anyhow::{Context, Result as AnyResult};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    decorator::ValueReplacement,
    error::{FixtureError, Result},
    format::DataSetFormat,
    model::CaseSensitivity,
    operation::DbOperation,
};

pub const DEFAULT_NULL_TOKEN: &str = "null";
/// Quotes identifiers; `?` stands for the table or column name.
pub const DEFAULT_ESCAPE_PATTERN: &str = "\"?\"";
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_FETCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatOptions {
    /// Extend table columns with attributes first seen on later rows.
    pub column_sensing: bool,
    pub case_sensitive_table_names: bool,
    /// DTD supplying column metadata for flat documents.
    pub dtd_location: Option<String>,
    /// Honour a document's own DOCTYPE declaration.
    pub dtd_metadata: bool,
    pub interning: bool,
    pub csv_delimiter: char,
    pub null_token: String,
    /// Input encoding label, UTF-8 when unset.
    pub encoding: Option<String>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            column_sensing: false,
            case_sensitive_table_names: false,
            dtd_location: None,
            dtd_metadata: false,
            interning: true,
            csv_delimiter: ',',
            null_token: DEFAULT_NULL_TOKEN.to_string(),
            encoding: None,
        }
    }
}

impl FormatOptions {
    pub fn case_sensitivity(&self) -> CaseSensitivity {
        CaseSensitivity::from_flag(self.case_sensitive_table_names)
    }

    pub fn delimiter_byte(&self) -> Result<u8> {
        if !self.csv_delimiter.is_ascii() {
            return Err(FixtureError::configuration(format!(
                "CSV delimiter '{}' must be ASCII",
                self.csv_delimiter
            )));
        }
        Ok(self.csv_delimiter as u8)
    }
}

/// Database product tag, forwarded to the connection provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    Db2,
    #[default]
    Hsqldb,
    H2,
    #[serde(alias = "mckoy")]
    Mckoi,
    Mssql,
    Mysql,
    Netezza,
    Oracle,
    Oracle10,
    Postgresql,
}

impl DbType {
    pub const ALL: [DbType; 10] = [
        DbType::Db2,
        DbType::Hsqldb,
        DbType::H2,
        DbType::Mckoi,
        DbType::Mssql,
        DbType::Mysql,
        DbType::Netezza,
        DbType::Oracle,
        DbType::Oracle10,
        DbType::Postgresql,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::Db2 => "db2",
            DbType::Hsqldb => "hsqldb",
            DbType::H2 => "h2",
            DbType::Mckoi => "mckoi",
            DbType::Mssql => "mssql",
            DbType::Mysql => "mysql",
            DbType::Netezza => "netezza",
            DbType::Oracle => "oracle",
            DbType::Oracle10 => "oracle10",
            DbType::Postgresql => "postgresql",
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbType {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        if normalized == "mckoy" {
            return Ok(DbType::Mckoi);
        }
        DbType::ALL
            .iter()
            .find(|db| db.as_str() == normalized)
            .copied()
            .ok_or_else(|| {
                FixtureError::configuration(format!("Unknown database type '{value}'"))
            })
    }
}

/// Settings passed through to the connection provider untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub data_source: Option<String>,
    pub db_type: DbType,
    pub schema: Option<String>,
    pub escape_pattern: String,
    pub batch_size: usize,
    pub fetch_size: usize,
    pub batched_statements: bool,
    pub qualified_table_names: bool,
    pub table_types: Vec<String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            data_source: None,
            db_type: DbType::default(),
            schema: None,
            escape_pattern: DEFAULT_ESCAPE_PATTERN.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            fetch_size: DEFAULT_FETCH_SIZE,
            batched_statements: false,
            qualified_table_names: false,
            table_types: vec!["TABLE".to_string()],
        }
    }
}

impl ConnectionSettings {
    fn validate(&self) -> Result<()> {
        if !self.escape_pattern.contains('?') {
            return Err(FixtureError::configuration(format!(
                "Escape pattern '{}' must contain the '?' placeholder",
                self.escape_pattern
            )));
        }
        if self.batch_size == 0 {
            return Err(FixtureError::configuration("Batch size must be greater than zero"));
        }
        if self.fetch_size == 0 {
            return Err(FixtureError::configuration("Fetch size must be greater than zero"));
        }
        if self.table_types.is_empty() {
            return Err(FixtureError::configuration("At least one table type is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub locations: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub set_up_operation: Vec<DbOperation>,
    #[serde(deserialize_with = "one_or_many")]
    pub tear_down_operation: Vec<DbOperation>,
    pub format: DataSetFormat,
    pub format_options: FormatOptions,
    pub connection: ConnectionSettings,
    pub replacements: Vec<ValueReplacement>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            locations: Vec::new(),
            set_up_operation: vec![DbOperation::CleanInsert],
            tear_down_operation: vec![DbOperation::None],
            format: DataSetFormat::default(),
            format_options: FormatOptions::default(),
            connection: ConnectionSettings::default(),
            replacements: Vec::new(),
        }
    }
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.set_up_operation.is_empty() {
            return Err(FixtureError::configuration("Setup operation list is empty"));
        }
        if self.tear_down_operation.is_empty() {
            return Err(FixtureError::configuration("Teardown operation list is empty"));
        }
        if self.locations.iter().any(|location| location.trim().is_empty()) {
            return Err(FixtureError::configuration("Dataset locations must not be blank"));
        }
        self.format_options.delimiter_byte()?;
        self.connection.validate()
    }

    /// Parses and validates a YAML document. An unknown `format` tag is
    /// reported as [`FixtureError::UnsupportedFormat`].
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let mut document: serde_yaml::Value = serde_yaml::from_str(text).map_err(invalid_yaml)?;
        if let Some(tag) = document.get_mut("format") {
            let format = match tag.as_str() {
                Some(value) => value.parse::<DataSetFormat>()?,
                None => return Err(FixtureError::UnsupportedFormat(format!("{tag:?}"))),
            };
            *tag = serde_yaml::Value::String(format.as_str().to_string());
        }
        let config: Configuration = serde_yaml::from_value(document).map_err(invalid_yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> AnyResult<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Opening configuration file {path:?}"))?;
        Self::from_yaml_str(&text).with_context(|| format!("Loading configuration {path:?}"))
    }

    pub fn to_yaml_string(&self) -> AnyResult<String> {
        serde_yaml::to_string(self).context("Serializing configuration to YAML")
    }
}

fn invalid_yaml(err: serde_yaml::Error) -> FixtureError {
    FixtureError::configuration(format!("Invalid configuration YAML: {err}"))
}

#[derive(Debug, Clone, Default)]
pub struct ConfigurationBuilder {
    config: Configuration,
}

impl ConfigurationBuilder {
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.config.locations.push(location.into());
        self
    }

    pub fn locations<I, S>(mut self, locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config
            .locations
            .extend(locations.into_iter().map(Into::into));
        self
    }

    pub fn set_up(mut self, operations: impl IntoIterator<Item = DbOperation>) -> Self {
        self.config.set_up_operation = operations.into_iter().collect();
        self
    }

    pub fn tear_down(mut self, operations: impl IntoIterator<Item = DbOperation>) -> Self {
        self.config.tear_down_operation = operations.into_iter().collect();
        self
    }

    pub fn format(mut self, format: DataSetFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn column_sensing(mut self, enabled: bool) -> Self {
        self.config.format_options.column_sensing = enabled;
        self
    }

    pub fn case_sensitive_table_names(mut self, enabled: bool) -> Self {
        self.config.format_options.case_sensitive_table_names = enabled;
        self
    }

    pub fn dtd_location(mut self, location: impl Into<String>) -> Self {
        self.config.format_options.dtd_location = Some(location.into());
        self
    }

    pub fn dtd_metadata(mut self, enabled: bool) -> Self {
        self.config.format_options.dtd_metadata = enabled;
        self
    }

    pub fn interning(mut self, enabled: bool) -> Self {
        self.config.format_options.interning = enabled;
        self
    }

    pub fn csv_delimiter(mut self, delimiter: char) -> Self {
        self.config.format_options.csv_delimiter = delimiter;
        self
    }

    pub fn null_token(mut self, token: impl Into<String>) -> Self {
        self.config.format_options.null_token = token.into();
        self
    }

    pub fn encoding(mut self, label: impl Into<String>) -> Self {
        self.config.format_options.encoding = Some(label.into());
        self
    }

    pub fn format_options(mut self, options: FormatOptions) -> Self {
        self.config.format_options = options;
        self
    }

    pub fn connection(mut self, settings: ConnectionSettings) -> Self {
        self.config.connection = settings;
        self
    }

    pub fn data_source(mut self, name: impl Into<String>) -> Self {
        self.config.connection.data_source = Some(name.into());
        self
    }

    pub fn db_type(mut self, db_type: DbType) -> Self {
        self.config.connection.db_type = db_type;
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.config.connection.schema = Some(schema.into());
        self
    }

    pub fn replacement(mut self, replacement: ValueReplacement) -> Self {
        self.config.replacements.push(replacement);
        self
    }

    pub fn build(self) -> Result<Configuration> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(DbOperation),
    Many(Vec<DbOperation>),
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<DbOperation>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(operation) => vec![operation],
        OneOrMany::Many(operations) => operations,
    })
}
