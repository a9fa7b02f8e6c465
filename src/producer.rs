//! Streaming flat-XML producer.
//!
//! The producer reads a flat document one XML event at a time and reports
//! dataset, table and row events to a [`Consumer`]. Every element below the
//! `<dataset>` root is a row of the table it is named after; its attributes
//! are the row's columns:
//!
//! ```xml
//! <dataset>
//!     <USERS ID="1" NAME="Ann"/>
//!     <USERS ID="2"/>
//! </dataset>
//! ```
//!
//! Column metadata comes from the first of:
//! 1. an explicit [`SchemaSource`];
//! 2. the document's internal DTD subset, when DTD metadata is enabled;
//! 3. the attributes of the first element seen for each table.
//!
//! With inference and column sensing enabled, attributes that appear on later
//! rows extend the table's columns. Rows are then held back by a
//! [`BufferedConsumer`] until each table closes, so downstream consumers see
//! the final column list before any row.

use std::{collections::VecDeque, io::BufRead, mem, sync::Arc};

use log::{debug, warn};
use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};

use crate::{
    dtd,
    error::{FixtureError, Result},
    intern::InterningCache,
    model::{CaseSensitivity, Column, Dataset, OrderedTableMap, Row, Table, TableSchema},
    schema_source::SchemaSource,
};

pub const ROOT_ELEMENT: &str = dtd::DEFAULT_ROOT_ELEMENT;

/// Receiver of producer events.
pub trait Consumer {
    fn start_dataset(&mut self) -> Result<()>;

    fn start_table(&mut self, schema: &TableSchema) -> Result<()>;

    /// Columns were appended to the open table.
    fn schema_changed(&mut self, _schema: &TableSchema) -> Result<()> {
        Ok(())
    }

    fn row(&mut self, row: Row) -> Result<()>;

    fn end_table(&mut self) -> Result<()>;

    fn end_dataset(&mut self) -> Result<()>;
}

impl<C: Consumer + ?Sized> Consumer for &mut C {
    fn start_dataset(&mut self) -> Result<()> {
        (**self).start_dataset()
    }

    fn start_table(&mut self, schema: &TableSchema) -> Result<()> {
        (**self).start_table(schema)
    }

    fn schema_changed(&mut self, schema: &TableSchema) -> Result<()> {
        (**self).schema_changed(schema)
    }

    fn row(&mut self, row: Row) -> Result<()> {
        (**self).row(row)
    }

    fn end_table(&mut self) -> Result<()> {
        (**self).end_table()
    }

    fn end_dataset(&mut self) -> Result<()> {
        (**self).end_dataset()
    }
}

/// Assembles consumer events into a [`Dataset`].
#[derive(Debug)]
pub struct DatasetBuilder {
    dataset: Dataset,
    open: Option<(usize, TableSchema)>,
    pending: Vec<Row>,
}

impl DatasetBuilder {
    pub fn new(case: CaseSensitivity) -> Self {
        Self {
            dataset: Dataset::empty(case),
            open: None,
            pending: Vec::new(),
        }
    }

    pub fn finish(mut self) -> Dataset {
        self.flush();
        self.dataset
    }

    fn flush(&mut self) {
        if let Some((idx, schema)) = self.open.take() {
            let rows = mem::take(&mut self.pending);
            self.dataset.append_rows(idx, &schema, rows);
        }
    }
}

impl Consumer for DatasetBuilder {
    fn start_dataset(&mut self) -> Result<()> {
        Ok(())
    }

    fn start_table(&mut self, schema: &TableSchema) -> Result<()> {
        self.flush();
        let idx = self.dataset.register_table(schema.clone());
        self.open = Some((idx, schema.clone()));
        Ok(())
    }

    fn schema_changed(&mut self, schema: &TableSchema) -> Result<()> {
        let Some((idx, open)) = self.open.as_mut() else {
            return Err(FixtureError::malformed("Schema change outside of a table"));
        };
        *open = schema.clone();
        let merged = self.dataset.register_table(schema.clone());
        debug_assert_eq!(merged, *idx);
        Ok(())
    }

    fn row(&mut self, row: Row) -> Result<()> {
        if self.open.is_none() {
            return Err(FixtureError::malformed("Row outside of a table"));
        }
        self.pending.push(row);
        Ok(())
    }

    fn end_table(&mut self) -> Result<()> {
        self.flush();
        Ok(())
    }

    fn end_dataset(&mut self) -> Result<()> {
        self.flush();
        Ok(())
    }
}

/// Holds each table's rows back until the table closes, then forwards the
/// table with its final schema.
#[derive(Debug)]
pub struct BufferedConsumer<C> {
    inner: C,
    open: Option<TableSchema>,
    rows: Vec<Row>,
}

impl<C: Consumer> BufferedConsumer<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            open: None,
            rows: Vec::new(),
        }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: Consumer> Consumer for BufferedConsumer<C> {
    fn start_dataset(&mut self) -> Result<()> {
        self.inner.start_dataset()
    }

    fn start_table(&mut self, schema: &TableSchema) -> Result<()> {
        self.open = Some(schema.clone());
        Ok(())
    }

    fn schema_changed(&mut self, schema: &TableSchema) -> Result<()> {
        self.open = Some(schema.clone());
        Ok(())
    }

    fn row(&mut self, row: Row) -> Result<()> {
        self.rows.push(row);
        Ok(())
    }

    fn end_table(&mut self) -> Result<()> {
        let Some(schema) = self.open.take() else {
            return Err(FixtureError::malformed("Table closed before it was opened"));
        };
        self.inner.start_table(&schema)?;
        for row in self.rows.drain(..) {
            self.inner.row(row)?;
        }
        self.inner.end_table()
    }

    fn end_dataset(&mut self) -> Result<()> {
        self.inner.end_dataset()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Prolog,
    InDataset,
    InRow,
    Done,
}

#[derive(Debug)]
struct OpenTable {
    schema: TableSchema,
    rows_in_block: usize,
}

/// Pull-driven flat XML parser. Call [`StreamingProducer::produce`] to run a
/// whole document, or [`StreamingProducer::step`] to advance one XML event.
pub struct StreamingProducer<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    source_name: String,
    column_sensing: bool,
    dtd_metadata: bool,
    case: CaseSensitivity,
    schema_source: Option<SchemaSource>,
    cache: InterningCache,
    state: ParseState,
    open: Option<OpenTable>,
    seen: OrderedTableMap<TableSchema>,
    global_rows: usize,
}

impl<R: BufRead> StreamingProducer<R> {
    pub fn new(input: R, source_name: impl Into<String>) -> Self {
        let mut reader = Reader::from_reader(input);
        reader.config_mut().trim_text(true);
        Self {
            reader,
            buf: Vec::new(),
            source_name: source_name.into(),
            column_sensing: false,
            dtd_metadata: false,
            case: CaseSensitivity::default(),
            schema_source: None,
            cache: InterningCache::new(),
            state: ParseState::Prolog,
            open: None,
            seen: OrderedTableMap::new(CaseSensitivity::default()),
            global_rows: 0,
        }
    }

    pub fn with_column_sensing(mut self, enabled: bool) -> Self {
        self.column_sensing = enabled;
        self
    }

    pub fn with_dtd_metadata(mut self, enabled: bool) -> Self {
        self.dtd_metadata = enabled;
        self
    }

    pub fn with_case_sensitivity(mut self, case: CaseSensitivity) -> Self {
        self.case = case;
        self.seen = OrderedTableMap::new(case);
        self
    }

    pub fn with_schema_source(mut self, source: Option<SchemaSource>) -> Self {
        self.schema_source = source;
        self
    }

    pub fn with_cache(mut self, cache: InterningCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &InterningCache {
        &self.cache
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn is_finished(&self) -> bool {
        self.state == ParseState::Done
    }

    /// Whether rows are buffered per table before reaching the consumer.
    pub fn buffers_rows(&self) -> bool {
        self.column_sensing && !self.uses_metadata()
    }

    fn uses_metadata(&self) -> bool {
        self.schema_source.is_some()
    }

    /// Parses the whole document into `consumer`.
    pub fn produce<C: Consumer>(&mut self, consumer: C) -> Result<C> {
        if self.buffers_rows() {
            let mut buffered = BufferedConsumer::new(consumer);
            while self.step(&mut buffered)? {}
            return Ok(buffered.into_inner());
        }
        let mut consumer = consumer;
        while self.step(&mut consumer)? {}
        Ok(consumer)
    }

    /// Parses the whole document into a [`Dataset`].
    pub fn produce_dataset(&mut self) -> Result<Dataset> {
        let builder = self.produce(DatasetBuilder::new(self.case))?;
        Ok(builder.finish())
    }

    /// Advances by one XML event. Returns `false` once the document has been
    /// fully consumed.
    pub fn step<C: Consumer + ?Sized>(&mut self, consumer: &mut C) -> Result<bool> {
        if self.state == ParseState::Done {
            return self.expect_trailing_end();
        }
        match self.next_event()? {
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) => {}
            Event::DocType(doctype) => {
                let text = String::from_utf8_lossy(&doctype).into_owned();
                self.handle_doctype(&text)?;
            }
            Event::Start(element) => self.handle_start(&element, false, consumer)?,
            Event::Empty(element) => self.handle_start(&element, true, consumer)?,
            Event::End(_) => self.handle_end(consumer)?,
            Event::Text(_) | Event::CData(_) => {}
            Event::Eof => {
                return Err(match self.state {
                    ParseState::Prolog => {
                        FixtureError::malformed(format!("{}: document has no <{ROOT_ELEMENT}> root", self.source_name))
                    }
                    _ => self.malformed("Unexpected end of document; the dataset is not closed"),
                });
            }
        }
        Ok(true)
    }

    fn next_event(&mut self) -> Result<Event<'static>> {
        self.buf.clear();
        let position = self.reader.buffer_position();
        let event = self.reader.read_event_into(&mut self.buf).map_err(|err| {
            FixtureError::malformed(format!(
                "{}: {err} (near byte {position})",
                self.source_name
            ))
        })?;
        Ok(event.into_owned())
    }

    /// After the root closes only comments and whitespace may follow.
    fn expect_trailing_end(&mut self) -> Result<bool> {
        loop {
            match self.next_event()? {
                Event::Eof => return Ok(false),
                Event::Comment(_) | Event::PI(_) | Event::Text(_) => {}
                _ => return Err(self.malformed("Content after the dataset root element")),
            }
        }
    }

    fn malformed(&self, message: &str) -> FixtureError {
        FixtureError::malformed(format!(
            "{}: {message} (at byte {})",
            self.source_name,
            self.reader.buffer_position()
        ))
    }

    fn handle_doctype(&mut self, text: &str) -> Result<()> {
        if self.state != ParseState::Prolog {
            return Err(self.malformed("DOCTYPE after the root element"));
        }
        if !self.dtd_metadata {
            debug!("{}: DOCTYPE present but DTD metadata is disabled", self.source_name);
            return Ok(());
        }
        if self.schema_source.is_some() {
            debug!("{}: explicit schema source takes precedence over DOCTYPE", self.source_name);
            return Ok(());
        }
        let doctype = dtd::parse_doctype(text)?;
        match doctype.internal_subset {
            Some(subset) => {
                let source = SchemaSource::new(
                    dtd::parse_dtd(&subset, &doctype.root, self.case)?,
                    self.case,
                )?;
                debug!(
                    "{}: using {} table(s) declared in the internal DTD subset",
                    self.source_name,
                    source.tables().len()
                );
                self.schema_source = Some(source);
            }
            None => {
                if let Some(system_id) = doctype.system_id {
                    debug!(
                        "{}: ignoring external DTD reference '{system_id}'; configure a DTD location to use it",
                        self.source_name
                    );
                }
            }
        }
        Ok(())
    }

    fn handle_start<C: Consumer + ?Sized>(
        &mut self,
        element: &BytesStart<'_>,
        empty: bool,
        consumer: &mut C,
    ) -> Result<()> {
        let name = std::str::from_utf8(element.name().as_ref())
            .map_err(|_| self.malformed("Element name is not valid UTF-8"))?
            .to_string();
        match self.state {
            ParseState::Prolog => {
                if name != ROOT_ELEMENT {
                    return Err(self.malformed(&format!(
                        "Expected root element <{ROOT_ELEMENT}>, found <{name}>"
                    )));
                }
                consumer.start_dataset()?;
                self.preregister_tables(consumer)?;
                if empty {
                    consumer.end_dataset()?;
                    self.finish_parse();
                } else {
                    self.state = ParseState::InDataset;
                }
                Ok(())
            }
            ParseState::InDataset => {
                self.handle_row(&name, element, consumer)?;
                if !empty {
                    self.state = ParseState::InRow;
                }
                Ok(())
            }
            ParseState::InRow => Err(self.malformed(&format!(
                "Element <{name}> is nested inside a row element"
            ))),
            ParseState::Done => Err(self.malformed("Content after the dataset root element")),
        }
    }

    fn handle_end<C: Consumer + ?Sized>(&mut self, consumer: &mut C) -> Result<()> {
        match self.state {
            ParseState::InRow => {
                self.state = ParseState::InDataset;
                Ok(())
            }
            ParseState::InDataset => {
                self.close_table(consumer)?;
                consumer.end_dataset()?;
                self.finish_parse();
                Ok(())
            }
            _ => Err(self.malformed("Unexpected closing tag")),
        }
    }

    fn finish_parse(&mut self) {
        self.state = ParseState::Done;
        self.cache.log_summary(&self.source_name);
        debug!(
            "{}: parsed {} row(s) in {} table(s)",
            self.source_name,
            self.global_rows,
            self.seen.len()
        );
    }

    fn preregister_tables<C: Consumer + ?Sized>(&mut self, consumer: &mut C) -> Result<()> {
        let Some(source) = self.schema_source.as_ref() else {
            return Ok(());
        };
        for schema in source.tables() {
            consumer.start_table(schema)?;
            consumer.end_table()?;
            self.seen.insert(schema.name(), schema.clone());
        }
        Ok(())
    }

    fn close_table<C: Consumer + ?Sized>(&mut self, consumer: &mut C) -> Result<()> {
        if let Some(open) = self.open.take() {
            consumer.end_table()?;
            if let Some(stored) = self.seen.get_mut(open.schema.name()) {
                *stored = open.schema;
            }
        }
        Ok(())
    }

    fn open_table<C: Consumer + ?Sized>(
        &mut self,
        name: &str,
        attributes: &[(Arc<str>, Arc<str>)],
        consumer: &mut C,
    ) -> Result<()> {
        let schema = if let Some(source) = self.schema_source.as_ref() {
            source
                .table(name)
                .cloned()
                .ok_or_else(|| FixtureError::NoSuchTable(name.to_string()))?
        } else if let Some(known) = self.seen.get(name) {
            debug!("{}: table {name} continues an earlier block", self.source_name);
            known.clone()
        } else {
            let table_name = self.cache.intern_name(name);
            let columns = attributes
                .iter()
                .map(|(column, _)| Column::unknown(Arc::clone(column)))
                .collect();
            let schema = TableSchema::new(table_name, columns, self.case)?;
            self.seen.insert(name, schema.clone());
            schema
        };
        consumer.start_table(&schema)?;
        self.open = Some(OpenTable {
            schema,
            rows_in_block: 0,
        });
        Ok(())
    }

    fn handle_row<C: Consumer + ?Sized>(
        &mut self,
        name: &str,
        element: &BytesStart<'_>,
        consumer: &mut C,
    ) -> Result<()> {
        let attributes = self.read_attributes(element)?;

        let continues_open = self
            .open
            .as_ref()
            .is_some_and(|open| self.case.matches(open.schema.name(), name));
        if !continues_open {
            self.close_table(consumer)?;
            self.open_table(name, &attributes, consumer)?;
        }

        if attributes.is_empty() {
            return Ok(());
        }

        self.global_rows += 1;
        let sensing = self.column_sensing && !self.uses_metadata();
        let source_name = self.source_name.clone();
        let global_rows = self.global_rows;
        let Some(open) = self.open.as_mut() else {
            return Err(FixtureError::malformed("Row outside of a table"));
        };
        open.rows_in_block += 1;

        let extra = attributes
            .iter()
            .filter(|(column, _)| open.schema.column_index(column).is_none())
            .map(|(column, _)| Arc::clone(column))
            .collect::<Vec<_>>();
        if !extra.is_empty() {
            if sensing {
                debug!(
                    "{source_name}: table {} gains column(s) {}",
                    open.schema.name(),
                    extra.join(", ")
                );
                open.schema
                    .append_columns(extra.into_iter().map(Column::unknown));
                consumer.schema_changed(&open.schema)?;
            } else {
                warn!(
                    "Extra columns ({}) on line {} for table {} (global line number is {}). Those columns will be ignored.",
                    extra.join(", "),
                    open.rows_in_block,
                    open.schema.name(),
                    global_rows
                );
            }
        }

        let mut values: Vec<Option<Arc<str>>> = vec![None; open.schema.column_count()];
        for (column, value) in attributes {
            if let Some(idx) = open.schema.column_index(&column) {
                values[idx] = Some(value);
            }
        }
        consumer.row(Row::new(values))
    }

    fn read_attributes(&mut self, element: &BytesStart<'_>) -> Result<Vec<(Arc<str>, Arc<str>)>> {
        let mut out = Vec::new();
        for attribute in element.attributes() {
            let attribute = attribute.map_err(|err| self.malformed(&format!("Invalid attribute: {err}")))?;
            let key = std::str::from_utf8(attribute.key.as_ref())
                .map_err(|_| self.malformed("Attribute name is not valid UTF-8"))?;
            let name = self.cache.intern_name(key);
            let raw = attribute
                .unescape_value()
                .map_err(|err| self.malformed(&format!("Invalid value for attribute {key}: {err}")))?;
            let value = self.cache.intern_value(&raw);
            out.push((name, value));
        }
        Ok(out)
    }
}

/// Lazily yields complete tables from a flat document, keeping only the
/// table currently being read in memory.
///
/// A table that appears again later in the document is yielded again as a
/// continuation chunk carrying only the new rows.
pub struct TableStream<R: BufRead> {
    producer: StreamingProducer<R>,
    collector: TableCollector,
    failed: bool,
}

impl<R: BufRead> TableStream<R> {
    pub fn new(producer: StreamingProducer<R>) -> Self {
        Self {
            producer,
            collector: TableCollector::default(),
            failed: false,
        }
    }

    pub fn case_sensitivity(&self) -> CaseSensitivity {
        self.producer.case
    }

    /// Drains the remaining tables into a dataset, merging continuation
    /// chunks into the first table of the same name.
    pub fn into_dataset(self) -> Result<Dataset> {
        let case = self.case_sensitivity();
        let tables = self.collect::<Result<Vec<_>>>()?;
        Ok(Dataset::from_tables(case, tables))
    }
}

impl<R: BufRead> Iterator for TableStream<R> {
    type Item = Result<Table>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(table) = self.collector.ready.pop_front() {
                return Some(Ok(table));
            }
            if self.failed {
                return None;
            }
            match self.producer.step(&mut self.collector) {
                Ok(true) => {}
                Ok(false) => return None,
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct TableCollector {
    open: Option<Table>,
    ready: VecDeque<Table>,
}

impl Consumer for TableCollector {
    fn start_dataset(&mut self) -> Result<()> {
        Ok(())
    }

    fn start_table(&mut self, schema: &TableSchema) -> Result<()> {
        self.open = Some(Table::new(schema.clone()));
        Ok(())
    }

    fn schema_changed(&mut self, schema: &TableSchema) -> Result<()> {
        match self.open.as_mut() {
            Some(table) => {
                *table.schema_mut() = schema.clone();
                Ok(())
            }
            None => Err(FixtureError::malformed("Schema change outside of a table")),
        }
    }

    fn row(&mut self, row: Row) -> Result<()> {
        match self.open.as_mut() {
            Some(table) => {
                table.push_row(row);
                Ok(())
            }
            None => Err(FixtureError::malformed("Row outside of a table")),
        }
    }

    fn end_table(&mut self) -> Result<()> {
        if let Some(table) = self.open.take() {
            self.ready.push_back(table);
        }
        Ok(())
    }

    fn end_dataset(&mut self) -> Result<()> {
        self.end_table()
    }
}
