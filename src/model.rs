//! In-memory fixture model: columns, table schemas, rows, tables and datasets.
//!
//! Everything here is a value type. Datasets are assembled append-only by the
//! parsers (see [`crate::producer::DatasetBuilder`]) and are read-only once
//! handed out. Table order is always declaration order; the operation
//! sequencer relies on it.
//!
//! Rows are positional: a row stores one slot per column that existed when it
//! was created. Columns appended later by column sensing read back as absent
//! (null) for older rows without rewriting them.

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::error::{FixtureError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseSensitivity {
    #[default]
    Insensitive,
    Sensitive,
}

impl CaseSensitivity {
    pub fn from_flag(case_sensitive: bool) -> Self {
        if case_sensitive {
            CaseSensitivity::Sensitive
        } else {
            CaseSensitivity::Insensitive
        }
    }

    pub fn is_sensitive(self) -> bool {
        self == CaseSensitivity::Sensitive
    }

    /// Registry key for `name` under this policy.
    pub fn key(self, name: &str) -> String {
        match self {
            CaseSensitivity::Sensitive => name.to_string(),
            CaseSensitivity::Insensitive => name.to_ascii_uppercase(),
        }
    }

    pub fn matches(self, left: &str, right: &str) -> bool {
        match self {
            CaseSensitivity::Sensitive => left == right,
            CaseSensitivity::Insensitive => left.eq_ignore_ascii_case(right),
        }
    }
}

/// Nominal column type. Fixture documents are text, so most columns stay
/// `Unknown` until a schema source declares otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    Unknown,
    String,
    Integer,
    Float,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Time,
    Binary,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Unknown => "unknown",
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Decimal => "decimal",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
            ColumnType::Time => "time",
            ColumnType::Binary => "binary",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &[
            "unknown", "string", "integer", "float", "decimal", "boolean", "date", "datetime",
            "time", "binary",
        ]
    }

    pub fn is_known(&self) -> bool {
        *self != ColumnType::Unknown
    }

    /// Two declared types conflict only when both are known and differ.
    pub fn conflicts_with(&self, other: &ColumnType) -> bool {
        self.is_known() && other.is_known() && self != other
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "unknown" | "" => Ok(ColumnType::Unknown),
            "string" | "varchar" | "char" | "text" | "cdata" => Ok(ColumnType::String),
            "integer" | "int" | "bigint" | "smallint" => Ok(ColumnType::Integer),
            "float" | "double" | "real" => Ok(ColumnType::Float),
            "decimal" | "numeric" => Ok(ColumnType::Decimal),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "date" => Ok(ColumnType::Date),
            "datetime" | "timestamp" => Ok(ColumnType::DateTime),
            "time" => Ok(ColumnType::Time),
            "binary" | "blob" => Ok(ColumnType::Binary),
            _ => Err(FixtureError::configuration(format!(
                "Unknown column type '{value}'. Supported types: {}",
                ColumnType::variants().join(", ")
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: Arc<str>,
    data_type: ColumnType,
    nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<Arc<str>>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn unknown(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, ColumnType::Unknown)
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn data_type(&self) -> ColumnType {
        self.data_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    name: Arc<str>,
    columns: Vec<Column>,
    case: CaseSensitivity,
}

impl TableSchema {
    pub fn new(
        name: impl Into<Arc<str>>,
        columns: Vec<Column>,
        case: CaseSensitivity,
    ) -> Result<Self> {
        let mut schema = Self {
            name: name.into(),
            columns: Vec::with_capacity(columns.len()),
            case,
        };
        for column in columns {
            if schema.column_index(column.name()).is_some() {
                return Err(FixtureError::malformed(format!(
                    "Duplicate column '{}' in table {}",
                    column.name(),
                    schema.name
                )));
            }
            schema.columns.push(column);
        }
        Ok(schema)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(Column::name)
    }

    pub fn case_sensitivity(&self) -> CaseSensitivity {
        self.case
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| self.case.matches(column.name(), name))
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.column_index(name)
            .map(|idx| &self.columns[idx])
            .ok_or_else(|| FixtureError::no_such_column(self.name(), name))
    }

    /// Appends columns not yet present, keeping existing order. Returns the
    /// number of columns actually added.
    pub(crate) fn append_columns(&mut self, extra: impl IntoIterator<Item = Column>) -> usize {
        let mut added = 0;
        for column in extra {
            if self.column_index(column.name()).is_none() {
                self.columns.push(column);
                added += 1;
            }
        }
        added
    }

    /// Same table name and same column names/types in the same order.
    pub fn same_shape(&self, other: &TableSchema) -> bool {
        self.case.matches(&self.name, &other.name)
            && self.columns.len() == other.columns.len()
            && self.columns.iter().zip(&other.columns).all(|(left, right)| {
                self.case.matches(left.name(), right.name())
                    && left.data_type() == right.data_type()
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    values: Vec<Option<Arc<str>>>,
}

impl Row {
    pub fn new(values: Vec<Option<Arc<str>>>) -> Self {
        Self { values }
    }

    /// Value at `index`; slots past the row's length are absent.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(|value| value.as_deref())
    }

    pub(crate) fn shared(&self, index: usize) -> Option<&Arc<str>> {
        self.values.get(index).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(schema: TableSchema, rows: Vec<Row>) -> Self {
        Self { schema, rows }
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn value(&self, row: usize, column: &str) -> Result<Option<&str>> {
        let column_idx = self
            .schema
            .column_index(column)
            .ok_or_else(|| FixtureError::no_such_column(self.name(), column))?;
        let row = self.rows.get(row).ok_or_else(|| FixtureError::RowOutOfRange {
            table: self.name().to_string(),
            row,
        })?;
        Ok(row.get(column_idx))
    }

    /// Row values aligned to the current schema, absent slots as `None`.
    pub fn row_values(&self, row: usize) -> Option<Vec<Option<&str>>> {
        let row = self.rows.get(row)?;
        Some((0..self.schema.column_count()).map(|idx| row.get(idx)).collect())
    }

    pub(crate) fn schema_mut(&mut self) -> &mut TableSchema {
        &mut self.schema
    }

    pub(crate) fn push_row(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub(crate) fn extend_rows(&mut self, rows: impl IntoIterator<Item = Row>) {
        self.rows.extend(rows);
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.schema.same_shape(&other.schema)
            && self.rows.len() == other.rows.len()
            && (0..self.rows.len()).all(|idx| self.row_values(idx) == other.row_values(idx))
    }
}

/// Insertion-ordered registry keyed by table name under a case policy.
#[derive(Debug, Clone)]
pub(crate) struct OrderedTableMap<T> {
    entries: Vec<T>,
    index: HashMap<String, usize>,
    case: CaseSensitivity,
}

impl<T> OrderedTableMap<T> {
    pub(crate) fn new(case: CaseSensitivity) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            case,
        }
    }

    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        self.index.get(&self.case.key(name)).copied()
    }

    pub(crate) fn get(&self, name: &str) -> Option<&T> {
        self.position(name).map(|idx| &self.entries[idx])
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.position(name).map(|idx| &mut self.entries[idx])
    }

    pub(crate) fn get_index_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.entries.get_mut(idx)
    }

    /// Registers `value` under `name`; an existing name keeps its slot.
    pub(crate) fn insert(&mut self, name: &str, value: T) -> usize {
        if let Some(idx) = self.position(name) {
            return idx;
        }
        let idx = self.entries.len();
        self.entries.push(value);
        self.index.insert(self.case.key(name), idx);
        idx
    }

    pub(crate) fn values(&self) -> &[T] {
        &self.entries
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Read access shared by single and composite datasets.
pub trait DataSet {
    /// Table names in declaration order.
    fn table_names(&self) -> Vec<&str>;

    fn table(&self, name: &str) -> Result<&Table>;

    fn table_schema(&self, name: &str) -> Result<&TableSchema> {
        Ok(self.table(name)?.schema())
    }

    fn case_sensitivity(&self) -> CaseSensitivity;

    /// Tables in declaration order (first registrant for duplicated names).
    fn tables(&self) -> Vec<&Table> {
        self.table_names()
            .into_iter()
            .filter_map(|name| self.table(name).ok())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    tables: OrderedTableMap<Table>,
}

impl Dataset {
    pub(crate) fn empty(case: CaseSensitivity) -> Self {
        Self {
            tables: OrderedTableMap::new(case),
        }
    }

    /// Assembles a dataset from complete tables. A repeated name continues
    /// the first table with that name.
    pub fn from_tables(case: CaseSensitivity, tables: Vec<Table>) -> Self {
        let mut dataset = Self::empty(case);
        for table in tables {
            let Table { schema, rows } = table;
            let idx = dataset.register_table(schema.clone());
            dataset.append_rows(idx, &schema, rows);
        }
        dataset
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.len() == 0
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.tables.position(name).is_some()
    }

    pub fn total_rows(&self) -> usize {
        self.tables.values().iter().map(Table::row_count).sum()
    }

    /// Tables as stored, in declaration order.
    pub fn table_slice(&self) -> &[Table] {
        self.tables.values()
    }

    /// Registers `schema`, or merges its columns into an existing table of
    /// the same name. Returns the table's position.
    pub(crate) fn register_table(&mut self, schema: TableSchema) -> usize {
        if let Some(idx) = self.tables.position(schema.name()) {
            if let Some(existing) = self.tables.get_index_mut(idx) {
                let extra = schema
                    .columns()
                    .iter()
                    .filter(|column| existing.schema().column_index(column.name()).is_none())
                    .cloned()
                    .collect::<Vec<_>>();
                // Older rows are positional; new columns only ever go last.
                existing.schema_mut().append_columns(extra);
            }
            return idx;
        }
        let name = schema.shared_name().clone();
        self.tables.insert(&name, Table::new(schema))
    }

    /// Appends rows laid out against `source` to the table at `idx`,
    /// re-aligning them when the stored column order differs.
    pub(crate) fn append_rows(&mut self, idx: usize, source: &TableSchema, rows: Vec<Row>) {
        let Some(table) = self.tables.get_index_mut(idx) else {
            return;
        };
        let stored = table.schema();
        let aligned = source
            .columns()
            .iter()
            .zip(stored.columns())
            .all(|(left, right)| stored.case.matches(left.name(), right.name()));
        if aligned {
            table.extend_rows(rows);
            return;
        }
        let mapping = stored
            .columns()
            .iter()
            .map(|column| source.column_index(column.name()))
            .collect::<Vec<_>>();
        table.extend_rows(rows.into_iter().map(|row| {
            Row::new(
                mapping
                    .iter()
                    .map(|slot| slot.and_then(|pos| row.shared(pos).cloned()))
                    .collect(),
            )
        }));
    }
}

impl DataSet for Dataset {
    fn table_names(&self) -> Vec<&str> {
        self.tables.values().iter().map(Table::name).collect()
    }

    fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| FixtureError::NoSuchTable(name.to_string()))
    }

    fn case_sensitivity(&self) -> CaseSensitivity {
        self.tables.case
    }
}

impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        self.tables.values() == other.tables.values()
    }
}

/// Read-only concatenation of several datasets, one per source document.
#[derive(Debug, Clone)]
pub struct CompositeDataset {
    members: Vec<Dataset>,
    owners: OrderedTableMap<(Arc<str>, usize)>,
}

impl CompositeDataset {
    pub fn new(members: Vec<Dataset>) -> Result<Self> {
        let case = members
            .first()
            .map(DataSet::case_sensitivity)
            .unwrap_or_default();
        let mut owners = OrderedTableMap::<(Arc<str>, usize)>::new(case);
        for (member_idx, member) in members.iter().enumerate() {
            for table in member.table_slice() {
                if let Some((_, first_owner)) = owners.get(table.name()) {
                    let first = members[*first_owner].table(table.name())?;
                    ensure_compatible(first.schema(), table.schema())?;
                    continue;
                }
                owners.insert(
                    table.name(),
                    (table.schema().shared_name().clone(), member_idx),
                );
            }
        }
        Ok(Self { members, owners })
    }

    pub fn members(&self) -> &[Dataset] {
        &self.members
    }

    /// Index of the member that first declared `name`.
    pub fn owning_member(&self, name: &str) -> Option<usize> {
        self.owners.get(name).map(|(_, idx)| *idx)
    }
}

fn ensure_compatible(first: &TableSchema, second: &TableSchema) -> Result<()> {
    for column in second.columns() {
        let Some(idx) = first.column_index(column.name()) else {
            continue;
        };
        let declared = &first.columns()[idx];
        if declared.data_type().conflicts_with(&column.data_type()) {
            return Err(FixtureError::SchemaMismatch {
                table: first.name().to_string(),
                column: declared.name().to_string(),
                left: declared.data_type().to_string(),
                right: column.data_type().to_string(),
            });
        }
    }
    Ok(())
}

impl DataSet for CompositeDataset {
    fn table_names(&self) -> Vec<&str> {
        self.owners
            .values()
            .iter()
            .map(|(name, _)| name.as_ref())
            .collect()
    }

    fn table(&self, name: &str) -> Result<&Table> {
        let member = self
            .owning_member(name)
            .ok_or_else(|| FixtureError::NoSuchTable(name.to_string()))?;
        self.members[member].table(name)
    }

    fn case_sensitivity(&self) -> CaseSensitivity {
        self.owners.case
    }
}

/// The loaded content of one fixture: a single dataset when the fixture has
/// one resource, a composite otherwise.
#[derive(Debug, Clone)]
pub enum FixtureData {
    Single(Dataset),
    Composite(CompositeDataset),
}

impl FixtureData {
    pub fn from_datasets(mut datasets: Vec<Dataset>) -> Result<Self> {
        match datasets.len() {
            0 => Err(FixtureError::configuration(
                "At least one dataset resource is required",
            )),
            1 => Ok(FixtureData::Single(datasets.remove(0))),
            _ => Ok(FixtureData::Composite(CompositeDataset::new(datasets)?)),
        }
    }

    /// Member datasets in resource declaration order.
    pub fn members(&self) -> &[Dataset] {
        match self {
            FixtureData::Single(dataset) => std::slice::from_ref(dataset),
            FixtureData::Composite(composite) => composite.members(),
        }
    }
}

impl DataSet for FixtureData {
    fn table_names(&self) -> Vec<&str> {
        match self {
            FixtureData::Single(dataset) => dataset.table_names(),
            FixtureData::Composite(composite) => composite.table_names(),
        }
    }

    fn table(&self, name: &str) -> Result<&Table> {
        match self {
            FixtureData::Single(dataset) => dataset.table(name),
            FixtureData::Composite(composite) => composite.table(name),
        }
    }

    fn case_sensitivity(&self) -> CaseSensitivity {
        match self {
            FixtureData::Single(dataset) => dataset.case_sensitivity(),
            FixtureData::Composite(composite) => composite.case_sensitivity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(name: &str, columns: &[(&str, ColumnType)]) -> TableSchema {
        TableSchema::new(
            name,
            columns
                .iter()
                .map(|(column, ty)| Column::new(*column, *ty))
                .collect(),
            CaseSensitivity::Insensitive,
        )
        .expect("schema")
    }

    fn row(values: &[Option<&str>]) -> Row {
        Row::new(values.iter().map(|v| v.map(Arc::from)).collect())
    }

    #[test]
    fn schema_rejects_duplicate_columns_ignoring_case() {
        let err = TableSchema::new(
            "T",
            vec![Column::unknown("id"), Column::unknown("ID")],
            CaseSensitivity::Insensitive,
        )
        .unwrap_err();
        assert!(matches!(err, FixtureError::MalformedDataSet(_)));

        let ok = TableSchema::new(
            "T",
            vec![Column::unknown("id"), Column::unknown("ID")],
            CaseSensitivity::Sensitive,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn rows_report_absent_for_columns_added_later() {
        let mut table = Table::new(schema("T", &[("ID", ColumnType::Unknown)]));
        table.push_row(row(&[Some("1")]));
        table
            .schema_mut()
            .append_columns([Column::unknown("NAME")]);
        table.push_row(row(&[Some("2"), Some("Bob")]));

        assert_eq!(table.value(0, "NAME").unwrap(), None);
        assert_eq!(table.value(1, "name").unwrap(), Some("Bob"));
        assert!(matches!(
            table.value(0, "MISSING"),
            Err(FixtureError::NoSuchColumn { .. })
        ));
        assert!(matches!(
            table.value(5, "ID"),
            Err(FixtureError::RowOutOfRange { row: 5, .. })
        ));
    }

    #[test]
    fn dataset_lookup_fails_with_no_such_table() {
        let dataset = Dataset::from_tables(
            CaseSensitivity::Insensitive,
            vec![Table::new(schema("A", &[]))],
        );
        assert!(dataset.table("a").is_ok());
        assert!(matches!(
            dataset.table("B"),
            Err(FixtureError::NoSuchTable(name)) if name == "B"
        ));
    }

    #[test]
    fn from_tables_continues_repeated_names_in_first_position() {
        let first = Table::with_rows(schema("A", &[("ID", ColumnType::Unknown)]), vec![row(&[Some("1")])]);
        let other = Table::new(schema("B", &[]));
        let again = Table::with_rows(schema("a", &[("ID", ColumnType::Unknown)]), vec![row(&[Some("2")])]);
        let dataset =
            Dataset::from_tables(CaseSensitivity::Insensitive, vec![first, other, again]);

        assert_eq!(dataset.table_names(), vec!["A", "B"]);
        assert_eq!(dataset.table("A").unwrap().row_count(), 2);
    }

    #[test]
    fn composite_iterates_first_registrant_and_routes_to_owner() {
        let left = Dataset::from_tables(
            CaseSensitivity::Insensitive,
            vec![
                Table::with_rows(schema("A", &[("ID", ColumnType::Integer)]), vec![row(&[Some("1")])]),
                Table::new(schema("B", &[])),
            ],
        );
        let right = Dataset::from_tables(
            CaseSensitivity::Insensitive,
            vec![
                Table::with_rows(schema("C", &[]), vec![]),
                Table::with_rows(
                    schema("A", &[("ID", ColumnType::Unknown)]),
                    vec![row(&[Some("9")]), row(&[Some("10")])],
                ),
            ],
        );

        let composite = CompositeDataset::new(vec![left, right]).unwrap();
        assert_eq!(composite.table_names(), vec!["A", "B", "C"]);
        assert_eq!(composite.owning_member("C"), Some(1));
        assert_eq!(composite.table("A").unwrap().row_count(), 1);
        assert_eq!(composite.members()[1].table("A").unwrap().row_count(), 2);
    }

    #[test]
    fn composite_rejects_conflicting_known_types() {
        let left = Dataset::from_tables(
            CaseSensitivity::Insensitive,
            vec![Table::new(schema("A", &[("ID", ColumnType::Integer)]))],
        );
        let right = Dataset::from_tables(
            CaseSensitivity::Insensitive,
            vec![Table::new(schema("A", &[("id", ColumnType::Date)]))],
        );

        let err = CompositeDataset::new(vec![left, right]).unwrap_err();
        assert!(matches!(
            err,
            FixtureError::SchemaMismatch { ref table, ref column, .. } if table == "A" && column == "ID"
        ));
    }

    #[test]
    fn fixture_data_requires_at_least_one_member() {
        assert!(matches!(
            FixtureData::from_datasets(Vec::new()),
            Err(FixtureError::Configuration(_))
        ));
        let single = FixtureData::from_datasets(vec![Dataset::empty(CaseSensitivity::Sensitive)]).unwrap();
        assert!(matches!(single, FixtureData::Single(_)));
        assert_eq!(single.members().len(), 1);
    }

    #[test]
    fn column_type_parses_aliases() {
        assert_eq!("INT".parse::<ColumnType>().unwrap(), ColumnType::Integer);
        assert_eq!("timestamp".parse::<ColumnType>().unwrap(), ColumnType::DateTime);
        assert!("widget".parse::<ColumnType>().is_err());
        assert!(!ColumnType::Unknown.conflicts_with(&ColumnType::Integer));
        assert!(ColumnType::Date.conflicts_with(&ColumnType::Integer));
    }
}
