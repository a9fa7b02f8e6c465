//! Verbose XML datasets:
//!
//! ```xml
//! <dataset>
//!     <table name="USERS">
//!         <column>ID</column>
//!         <column>NAME</column>
//!         <row>
//!             <value>1</value>
//!             <null/>
//!         </row>
//!     </table>
//! </dataset>
//! ```
//!
//! `<null/>` and `<none/>` both stand for a missing value. Value text is kept
//! as written, surrounding whitespace included.
//!
//! With a schema source, every `<table>` must be declared there and each
//! `<column>` takes its type and nullability from the declaration. Columns
//! keep the order the document lists them in, since values are positional.

use std::sync::Arc;

use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};

use crate::{
    error::{FixtureError, Result},
    intern::InterningCache,
    model::{CaseSensitivity, Column, Dataset, Row, TableSchema},
    producer::{Consumer, DatasetBuilder},
    resource::Resource,
    schema_source::SchemaSource,
};

use super::{DataSetFormat, FormatStrategy, ParseContext};

#[derive(Debug, Clone, Copy, Default)]
pub struct XmlFormat;

impl FormatStrategy for XmlFormat {
    fn format(&self) -> DataSetFormat {
        DataSetFormat::Xml
    }

    fn parse(&self, resource: &Resource, ctx: &ParseContext<'_>) -> Result<Dataset> {
        let mut reader = Reader::from_reader(resource.reader(ctx.options.encoding.as_deref())?);
        let mut parser = VerboseParser {
            location: resource.location(),
            source: ctx.schema_source,
            case: ctx.options.case_sensitivity(),
            cache: ctx.new_cache(),
            builder: DatasetBuilder::new(ctx.options.case_sensitivity()),
            table: None,
            row: None,
            text: None,
            depth: Vec::new(),
            finished: false,
        };
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let position = reader.buffer_position();
            let event = reader.read_event_into(&mut buf).map_err(|err| {
                FixtureError::malformed(format!("{}: {err} (near byte {position})", resource.location()))
            })?;
            match event {
                Event::Start(element) => parser.open(&element, false)?,
                Event::Empty(element) => parser.open(&element, true)?,
                Event::End(_) => parser.close()?,
                Event::Text(text) => {
                    let value = text
                        .unescape()
                        .map_err(|err| parser.error(&format!("invalid text: {err}")))?;
                    parser.text(&value)?;
                }
                Event::CData(data) => {
                    let value = String::from_utf8_lossy(&data).into_owned();
                    parser.text(&value)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }
        if !parser.depth.is_empty() {
            return Err(parser.error("unexpected end of document"));
        }
        if !parser.finished {
            return Err(parser.error("document has no <dataset> root"));
        }
        parser.cache.log_summary(resource.location());
        Ok(parser.builder.finish())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element {
    Dataset,
    Table,
    Column,
    Row,
    Value,
    Null,
}

struct OpenTable {
    schema: TableSchema,
    started: bool,
}

struct VerboseParser<'a> {
    location: &'a str,
    source: Option<&'a SchemaSource>,
    case: CaseSensitivity,
    cache: InterningCache,
    builder: DatasetBuilder,
    table: Option<OpenTable>,
    row: Option<Vec<Option<Arc<str>>>>,
    text: Option<String>,
    depth: Vec<Element>,
    finished: bool,
}

impl VerboseParser<'_> {
    fn error(&self, message: &str) -> FixtureError {
        FixtureError::malformed(format!("{}: {message}", self.location))
    }

    fn open(&mut self, element: &BytesStart<'_>, empty: bool) -> Result<()> {
        let name = element.name();
        let name = std::str::from_utf8(name.as_ref())
            .map_err(|_| self.error("element name is not valid UTF-8"))?;
        let parent = self.depth.last().copied();
        if self.finished {
            return Err(self.error("content after the dataset root element"));
        }
        let kind = match (parent, name) {
            (None, "dataset") => {
                self.builder.start_dataset()?;
                Element::Dataset
            }
            (Some(Element::Dataset), "table") => {
                let table_name = element
                    .try_get_attribute("name")
                    .map_err(|err| self.error(&format!("invalid table attribute: {err}")))?
                    .ok_or_else(|| self.error("<table> without a name attribute"))?;
                let table_name = table_name
                    .unescape_value()
                    .map_err(|err| self.error(&format!("invalid table name: {err}")))?;
                if let Some(source) = self.source
                    && source.table(&table_name).is_none()
                {
                    return Err(FixtureError::NoSuchTable(table_name.into_owned()));
                }
                let table_name = self.cache.intern_name(&table_name);
                self.table = Some(OpenTable {
                    schema: TableSchema::new(table_name, Vec::new(), self.case)?,
                    started: false,
                });
                Element::Table
            }
            (Some(Element::Table), "column") => {
                if self.table.as_ref().is_some_and(|table| table.started) {
                    return Err(self.error("<column> after the first <row>"));
                }
                self.text = Some(String::new());
                Element::Column
            }
            (Some(Element::Table), "row") => {
                self.start_table()?;
                self.row = Some(Vec::new());
                Element::Row
            }
            (Some(Element::Row), "value") => {
                self.text = Some(String::new());
                Element::Value
            }
            (Some(Element::Row), "null" | "none") => Element::Null,
            (None, other) => {
                return Err(self.error(&format!("expected root element <dataset>, found <{other}>")));
            }
            (Some(parent), other) => {
                return Err(self.error(&format!("unexpected <{other}> inside {parent:?}")));
            }
        };
        self.depth.push(kind);
        if empty {
            self.close()?;
        }
        Ok(())
    }

    fn text(&mut self, value: &str) -> Result<()> {
        match self.text.as_mut() {
            Some(buffer) => {
                buffer.push_str(value);
                Ok(())
            }
            None if value.trim().is_empty() => Ok(()),
            None => Err(self.error(&format!("unexpected text '{value}'"))),
        }
    }

    fn start_table(&mut self) -> Result<()> {
        let Some(table) = self.table.as_mut() else {
            return Err(FixtureError::malformed("row outside of a table"));
        };
        if !table.started {
            table.started = true;
            self.builder.start_table(&table.schema)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(kind) = self.depth.pop() else {
            return Err(self.error("unbalanced closing tag"));
        };
        match kind {
            Element::Dataset => {
                self.builder.end_dataset()?;
                self.finished = true;
            }
            Element::Table => {
                self.start_table()?;
                self.table = None;
                self.builder.end_table()?;
            }
            Element::Column => {
                let name = self.text.take().unwrap_or_default();
                let name = self.cache.intern_name(name.trim());
                let Some(table) = self.table.as_mut() else {
                    return Err(FixtureError::malformed("column outside of a table"));
                };
                let column_name = name.to_string();
                let table_name = table.schema.name().to_string();
                let column = match self.source.and_then(|source| source.table(&table_name)) {
                    Some(declared) => declared.column(&column_name)?.clone(),
                    None => Column::unknown(name),
                };
                if table.schema.append_columns([column]) == 0 {
                    return Err(self.error(&format!(
                        "duplicate column '{column_name}' in table {table_name}"
                    )));
                }
            }
            Element::Value => {
                let value = self.text.take().unwrap_or_default();
                let value = self.cache.intern_value(&value);
                self.push_value(Some(value))?;
            }
            Element::Null => self.push_value(None)?,
            Element::Row => {
                let values = self.row.take().unwrap_or_default();
                let width = self
                    .table
                    .as_ref()
                    .map(|table| table.schema.column_count())
                    .unwrap_or_default();
                if values.len() > width {
                    return Err(self.error(&format!(
                        "row has {} value(s) but the table declares {width} column(s)",
                        values.len()
                    )));
                }
                self.builder.row(Row::new(values))?;
            }
        }
        Ok(())
    }

    fn push_value(&mut self, value: Option<Arc<str>>) -> Result<()> {
        match self.row.as_mut() {
            Some(values) => {
                values.push(value);
                Ok(())
            }
            None => Err(self.error("value outside of a row")),
        }
    }
}
