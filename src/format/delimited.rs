//! Delimited text: one table per resource, named after the file stem. The
//! first record holds the column names; cells equal to the configured null
//! token are null.

use std::sync::Arc;

use log::debug;

use crate::{
    error::{FixtureError, Result},
    model::{Column, Dataset, Row, Table, TableSchema},
    resource::Resource,
};

use super::{DataSetFormat, FormatStrategy, ParseContext};

#[derive(Debug, Clone, Copy, Default)]
pub struct CsvFormat;

impl FormatStrategy for CsvFormat {
    fn format(&self) -> DataSetFormat {
        DataSetFormat::Csv
    }

    fn parse(&self, resource: &Resource, ctx: &ParseContext<'_>) -> Result<Dataset> {
        let options = ctx.options;
        let case = options.case_sensitivity();
        let mut cache = ctx.new_cache();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(options.delimiter_byte()?)
            .double_quote(true)
            .flexible(false)
            .from_reader(resource.reader(options.encoding.as_deref())?);

        let table_name = resource.stem();
        let declared = match ctx.schema_source.and_then(|source| source.table(&table_name)) {
            Some(schema) => Some(schema.clone()),
            None if ctx.schema_source.is_some() => {
                return Err(FixtureError::NoSuchTable(table_name));
            }
            None => None,
        };

        let headers = reader
            .headers()
            .map_err(|err| csv_error(resource, err))?
            .iter()
            .map(|header| cache.intern_name(header.trim()))
            .collect::<Vec<_>>();
        let schema = match declared {
            Some(schema) => schema,
            None => TableSchema::new(
                cache.intern_name(&table_name),
                headers.iter().cloned().map(Column::unknown).collect(),
                case,
            )?,
        };
        let positions = headers
            .iter()
            .map(|header| schema.column_index(header))
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| csv_error(resource, err))?;
            let mut values: Vec<Option<Arc<str>>> = vec![None; schema.column_count()];
            for (cell, position) in record.iter().zip(&positions) {
                let Some(idx) = position else {
                    continue;
                };
                if cell != options.null_token {
                    values[*idx] = Some(cache.intern_value(cell));
                }
            }
            rows.push(Row::new(values));
        }
        cache.log_summary(resource.location());
        debug!("{}: read {} row(s) for table {}", resource.location(), rows.len(), schema.name());
        Ok(Dataset::from_tables(case, vec![Table::with_rows(schema, rows)]))
    }
}

fn csv_error(resource: &Resource, err: csv::Error) -> FixtureError {
    let line = err
        .position()
        .map(|position| format!(" on line {}", position.line()))
        .unwrap_or_default();
    FixtureError::malformed(format!("{}{line}: {err}", resource.location()))
}
