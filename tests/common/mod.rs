#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use fixture_seed::{
    ConnectionHandle, ConnectionProvider, DatabaseError, DbOperation, Executor,
    config::ConnectionSettings,
    expected::TableReader,
    model::{Row, Table, TableSchema},
};
use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// Rows keyed by table name, standing in for a database.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    pub tables: BTreeMap<String, Vec<Vec<(String, Option<String>)>>>,
    pub log: Vec<String>,
}

impl MemoryDatabase {
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, Vec::len)
    }
}

/// Applies operations to a [`MemoryDatabase`], keyed on the first column.
#[derive(Debug, Default)]
pub struct MemoryExecutor {
    /// Table whose inserts fail with a batch error.
    pub fail_inserts_into: Option<String>,
}

impl Executor<MemoryDatabase> for MemoryExecutor {
    fn execute(
        &mut self,
        db: &mut MemoryDatabase,
        operation: DbOperation,
        table: &Table,
    ) -> Result<(), DatabaseError> {
        db.log.push(format!("{operation} {}", table.name()));
        let rows = (0..table.row_count())
            .filter_map(|idx| table.row_values(idx))
            .map(|values| {
                table
                    .schema()
                    .column_names()
                    .zip(values)
                    .map(|(name, value)| (name.to_string(), value.map(str::to_string)))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        let key = |row: &Vec<(String, Option<String>)>| row.first().and_then(|(_, v)| v.clone());
        let stored = db.tables.entry(table.name().to_string()).or_default();
        match operation {
            DbOperation::Insert => {
                if self.fail_inserts_into.as_deref() == Some(table.name()) {
                    return Err(DatabaseError::batch(
                        "batch entry 0 was aborted",
                        Some(DatabaseError::statement("foreign key violation")),
                    ));
                }
                if rows.iter().any(|row| stored.iter().any(|existing| key(existing) == key(row))) {
                    return Err(DatabaseError::statement("duplicate key"));
                }
                stored.extend(rows);
            }
            DbOperation::Refresh | DbOperation::Update => {
                for row in rows {
                    match stored.iter_mut().find(|existing| key(existing) == key(&row)) {
                        Some(existing) => *existing = row,
                        None if operation == DbOperation::Refresh => stored.push(row),
                        None => return Err(DatabaseError::statement("row to update is missing")),
                    }
                }
            }
            DbOperation::Delete => {
                stored.retain(|existing| rows.iter().all(|row| key(row) != key(existing)));
            }
            DbOperation::DeleteAll | DbOperation::TruncateTable => stored.clear(),
            DbOperation::None | DbOperation::CleanInsert => {
                return Err(DatabaseError::statement(format!("{operation} is not atomic")));
            }
        }
        Ok(())
    }
}

impl TableReader<MemoryDatabase> for MemoryExecutor {
    fn read_table(
        &mut self,
        db: &mut MemoryDatabase,
        schema: &TableSchema,
    ) -> Result<Table, DatabaseError> {
        let stored = db
            .tables
            .get(schema.name())
            .ok_or_else(|| DatabaseError::statement(format!("no table {}", schema.name())))?;
        let rows = stored
            .iter()
            .map(|row| {
                Row::new(
                    schema
                        .column_names()
                        .map(|column| {
                            row.iter()
                                .find(|(name, _)| name == column)
                                .and_then(|(_, value)| value.as_deref())
                                .map(Into::into)
                        })
                        .collect(),
                )
            })
            .collect();
        Ok(Table::with_rows(schema.clone(), rows))
    }
}

/// Hands out one shared database, as an owned or caller-owned handle.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    pub database: Option<MemoryDatabase>,
    pub caller_owned: bool,
    pub released: usize,
    pub unavailable: bool,
}

impl ConnectionProvider for MemoryProvider {
    type Connection = MemoryDatabase;

    fn acquire(
        &mut self,
        _settings: &ConnectionSettings,
    ) -> Result<ConnectionHandle<MemoryDatabase>, DatabaseError> {
        if self.unavailable {
            return Err(DatabaseError::statement("connection refused"));
        }
        let database = self.database.take().unwrap_or_default();
        Ok(if self.caller_owned {
            ConnectionHandle::caller_owned(database)
        } else {
            ConnectionHandle::owned(database)
        })
    }

    fn release(&mut self, handle: ConnectionHandle<MemoryDatabase>) {
        self.released += 1;
        self.database = Some(handle.into_inner());
    }
}
