//! Expected-dataset verification: compares fixture tables against the rows a
//! [`TableReader`] reads back from the database after a test ran.

use std::collections::HashSet;

use itertools::Itertools;
use log::{debug, info};
use similar::TextDiff;

use crate::{
    error::{DatabaseError, FixtureError, Result},
    model::{DataSet, FixtureData, Table, TableSchema},
};

pub trait TableReader<C> {
    /// Reads the current content of the table described by `schema`.
    fn read_table(
        &mut self,
        connection: &mut C,
        schema: &TableSchema,
    ) -> std::result::Result<Table, DatabaseError>;
}

#[derive(Debug, Clone)]
pub struct ExpectedDataSet {
    data: FixtureData,
    ignored: HashSet<String>,
    sorted: bool,
}

impl ExpectedDataSet {
    pub fn new(data: FixtureData) -> Self {
        Self {
            data,
            ignored: HashSet::new(),
            sorted: false,
        }
    }

    /// Columns left out of every comparison, matched without regard to case.
    pub fn ignoring_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ignored
            .extend(columns.into_iter().map(|column| column.as_ref().to_ascii_uppercase()));
        self
    }

    /// Compare rows as sorted multisets instead of in order.
    pub fn sorted(mut self, sorted: bool) -> Self {
        self.sorted = sorted;
        self
    }

    pub fn data(&self) -> &FixtureData {
        &self.data
    }

    pub fn verify<C, R>(&self, connection: &mut C, reader: &mut R) -> Result<()>
    where
        R: TableReader<C>,
    {
        for expected in self.data.tables() {
            let actual = reader
                .read_table(connection, expected.schema())
                .map_err(|err| FixtureError::Verification {
                    table: expected.name().to_string(),
                    message: format!("could not read table: {err}"),
                })?;
            self.compare(expected, &actual)?;
            debug!("Table {} matches ({} row(s))", expected.name(), expected.row_count());
        }
        info!("Verified {} expected table(s)", self.data.table_names().len());
        Ok(())
    }

    /// Compares one expected table with what was read back.
    pub fn compare(&self, expected: &Table, actual: &Table) -> Result<()> {
        let columns = expected
            .schema()
            .column_names()
            .filter(|column| !self.ignored.contains(&column.to_ascii_uppercase()))
            .collect::<Vec<_>>();
        if let Some(missing) = columns
            .iter()
            .find(|column| actual.schema().column_index(column).is_none())
        {
            return Err(FixtureError::Verification {
                table: expected.name().to_string(),
                message: format!("column {missing} is missing from the database table"),
            });
        }
        let expected_lines = self.render(expected, &columns)?;
        let actual_lines = self.render(actual, &columns)?;
        if expected_lines == actual_lines {
            return Ok(());
        }
        let expected_text = expected_lines.join("\n") + "\n";
        let actual_text = actual_lines.join("\n") + "\n";
        let diff = TextDiff::from_lines(&expected_text, &actual_text)
            .unified_diff()
            .context_radius(2)
            .header("expected", "actual")
            .to_string();
        Err(FixtureError::Verification {
            table: expected.name().to_string(),
            message: format!(
                "expected {} row(s), found {}\n{diff}",
                expected.row_count(),
                actual.row_count()
            ),
        })
    }

    fn render(&self, table: &Table, columns: &[&str]) -> Result<Vec<String>> {
        let mut lines = (0..table.row_count())
            .map(|row| {
                columns
                    .iter()
                    .map(|column| {
                        table
                            .value(row, column)
                            .map(|value| format!("{column}={}", value.unwrap_or("[null]")))
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(|cells| cells.iter().join(", "))
            })
            .collect::<Result<Vec<_>>>()?;
        if self.sorted {
            lines.sort();
        }
        Ok(lines)
    }
}
