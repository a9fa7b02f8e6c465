//! Dataset formats.
//!
//! [`DataSetFormat`] is the closed set of document formats a configuration can
//! name. Each tag maps to a [`FormatStrategy`] that parses one resource into a
//! [`Dataset`].

mod delimited;
mod flat;
mod xml;

use std::{fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    config::FormatOptions,
    dtd,
    error::{FixtureError, Result},
    intern::InterningCache,
    model::{Dataset, Table},
    resource::Resource,
    schema_source::SchemaSource,
};

pub use self::{
    delimited::CsvFormat,
    flat::{FlatXmlFormat, StreamingFormat},
    xml::XmlFormat,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSetFormat {
    /// Attribute-per-column XML.
    #[default]
    Flat,
    /// Verbose XML with explicit column and value elements.
    Xml,
    /// Flat XML read one table at a time.
    Streaming,
    /// Schema-only DTD document.
    Dtd,
    /// Delimited text, one table per resource.
    Csv,
}

impl DataSetFormat {
    pub const ALL: [DataSetFormat; 5] = [
        DataSetFormat::Flat,
        DataSetFormat::Xml,
        DataSetFormat::Streaming,
        DataSetFormat::Dtd,
        DataSetFormat::Csv,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataSetFormat::Flat => "flat",
            DataSetFormat::Xml => "xml",
            DataSetFormat::Streaming => "streaming",
            DataSetFormat::Dtd => "dtd",
            DataSetFormat::Csv => "csv",
        }
    }

    pub fn strategy(&self) -> Box<dyn FormatStrategy> {
        match self {
            DataSetFormat::Flat => Box::new(FlatXmlFormat),
            DataSetFormat::Xml => Box::new(XmlFormat),
            DataSetFormat::Streaming => Box::new(StreamingFormat),
            DataSetFormat::Dtd => Box::new(DtdFormat),
            DataSetFormat::Csv => Box::new(CsvFormat),
        }
    }

    /// Guesses the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "xml" => Some(DataSetFormat::Flat),
            "dtd" => Some(DataSetFormat::Dtd),
            "csv" | "tsv" => Some(DataSetFormat::Csv),
            _ => None,
        }
    }
}

impl fmt::Display for DataSetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSetFormat {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "flat" | "flatxml" => Ok(DataSetFormat::Flat),
            "xml" => Ok(DataSetFormat::Xml),
            "streaming" | "stream" => Ok(DataSetFormat::Streaming),
            "dtd" => Ok(DataSetFormat::Dtd),
            "csv" => Ok(DataSetFormat::Csv),
            _ => Err(FixtureError::UnsupportedFormat(value.to_string())),
        }
    }
}

/// Everything a strategy needs besides the resource itself.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub options: &'a FormatOptions,
    pub schema_source: Option<&'a SchemaSource>,
}

impl<'a> ParseContext<'a> {
    pub fn new(options: &'a FormatOptions) -> Self {
        Self {
            options,
            schema_source: None,
        }
    }

    pub fn with_schema_source(mut self, source: Option<&'a SchemaSource>) -> Self {
        self.schema_source = source;
        self
    }

    /// A fresh cache for one parse.
    pub(crate) fn new_cache(&self) -> InterningCache {
        InterningCache::with_enabled(self.options.interning)
    }
}

pub trait FormatStrategy {
    fn format(&self) -> DataSetFormat;

    fn parse(&self, resource: &Resource, ctx: &ParseContext<'_>) -> Result<Dataset>;
}

/// Schema-only format: yields one empty table per declared element.
#[derive(Debug, Clone, Copy, Default)]
pub struct DtdFormat;

impl DtdFormat {
    pub fn schema_source(resource: &Resource, ctx: &ParseContext<'_>) -> Result<SchemaSource> {
        let text = resource.read_to_string(ctx.options.encoding.as_deref())?;
        let case = ctx.options.case_sensitivity();
        SchemaSource::new(dtd::parse_dtd(&text, dtd::DEFAULT_ROOT_ELEMENT, case)?, case)
    }
}

impl FormatStrategy for DtdFormat {
    fn format(&self) -> DataSetFormat {
        DataSetFormat::Dtd
    }

    fn parse(&self, resource: &Resource, ctx: &ParseContext<'_>) -> Result<Dataset> {
        let source = Self::schema_source(resource, ctx)?;
        Ok(Dataset::from_tables(
            source.case_sensitivity(),
            source.tables().iter().cloned().map(Table::new).collect(),
        ))
    }
}

/// Parses each resource with `strategy`, one dataset per resource, in order.
pub fn load_multiple(
    strategy: &dyn FormatStrategy,
    resources: &[Resource],
    ctx: &ParseContext<'_>,
) -> Result<Vec<Dataset>> {
    resources
        .iter()
        .map(|resource| {
            log::debug!("Parsing {} as {}", resource.location(), strategy.format());
            strategy.parse(resource, ctx)
        })
        .collect()
}
