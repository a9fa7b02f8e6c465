//! Authoritative table metadata supplied ahead of the data.
//!
//! A [`SchemaSource`] comes either from a flat DTD or from a YAML schema
//! document:
//!
//! ```yaml
//! schema_version: "1"
//! tables:
//!   - name: USERS
//!     columns:
//!       - name: ID
//!         datatype: integer
//!         nullable: false
//!       - name: NAME
//! ```

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use anyhow::{Context, Result as AnyResult};
use serde::{Deserialize, Serialize};

use crate::{
    dtd,
    error::{FixtureError, Result},
    model::{CaseSensitivity, Column, ColumnType, TableSchema},
};

pub const CURRENT_SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDoc {
    pub name: String,
    #[serde(default)]
    pub datatype: ColumnType,
    #[serde(default = "ColumnDoc::default_nullable")]
    pub nullable: bool,
}

impl ColumnDoc {
    fn default_nullable() -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableDoc {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnDoc>,
}

/// Serialized form of a schema source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    #[serde(default)]
    pub tables: Vec<TableDoc>,
}

#[derive(Debug, Clone)]
pub struct SchemaSource {
    tables: Vec<TableSchema>,
    case: CaseSensitivity,
}

impl SchemaSource {
    pub fn new(tables: Vec<TableSchema>, case: CaseSensitivity) -> Result<Self> {
        let mut source = Self {
            tables: Vec::with_capacity(tables.len()),
            case,
        };
        for table in tables {
            if source.table(table.name()).is_some() {
                return Err(FixtureError::malformed(format!(
                    "Table {} is declared twice in the schema source",
                    table.name()
                )));
            }
            source.tables.push(table);
        }
        Ok(source)
    }

    pub fn from_dtd(text: &str, case: CaseSensitivity) -> Result<Self> {
        Self::new(dtd::parse_dtd(text, dtd::DEFAULT_ROOT_ELEMENT, case)?, case)
    }

    pub fn from_dtd_reader(mut reader: impl Read, case: CaseSensitivity) -> Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Self::from_dtd(&text, case)
    }

    pub fn from_yaml(text: &str, case: CaseSensitivity) -> Result<Self> {
        let document: SchemaDocument = serde_yaml::from_str(text)
            .map_err(|err| FixtureError::configuration(format!("Invalid schema YAML: {err}")))?;
        Self::from_document(document, case)
    }

    pub fn from_document(document: SchemaDocument, case: CaseSensitivity) -> Result<Self> {
        let tables = document
            .tables
            .into_iter()
            .map(|table| {
                let columns = table
                    .columns
                    .into_iter()
                    .map(|column| {
                        Column::new(column.name.as_str(), column.datatype)
                            .with_nullable(column.nullable)
                    })
                    .collect();
                TableSchema::new(table.name.as_str(), columns, case)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(tables, case)
    }

    pub fn load_yaml(path: &Path, case: CaseSensitivity) -> AnyResult<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let document: SchemaDocument = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing schema YAML {path:?}"))?;
        Ok(Self::from_document(document, case)?)
    }

    pub fn to_document(&self) -> SchemaDocument {
        SchemaDocument {
            schema_version: Some(CURRENT_SCHEMA_VERSION.to_string()),
            tables: self
                .tables
                .iter()
                .map(|table| TableDoc {
                    name: table.name().to_string(),
                    columns: table
                        .columns()
                        .iter()
                        .map(|column| ColumnDoc {
                            name: column.name().to_string(),
                            datatype: column.data_type(),
                            nullable: column.is_nullable(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    pub fn to_yaml_string(&self) -> AnyResult<String> {
        serde_yaml::to_string(&self.to_document()).context("Serializing schema to YAML string")
    }

    pub fn to_dtd_string(&self) -> String {
        dtd::write_dtd(&self.tables, dtd::DEFAULT_ROOT_ELEMENT)
    }

    /// Declared tables in schema order.
    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables
            .iter()
            .find(|table| self.case.matches(table.name(), name))
    }

    pub fn case_sensitivity(&self) -> CaseSensitivity {
        self.case
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
