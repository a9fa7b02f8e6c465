use anyhow::{Context, Result};
use log::info;
use serde::Serialize;

use crate::{
    cli::InspectArgs,
    model::{DataSet, FixtureData, Table},
    table,
};

const NULL_CELL: &str = "[null]";

#[derive(Debug, Serialize)]
struct MemberReport<'a> {
    member: usize,
    tables: Vec<TableReport<'a>>,
}

#[derive(Debug, Serialize)]
struct TableReport<'a> {
    name: &'a str,
    columns: Vec<&'a str>,
    row_count: usize,
    rows: Vec<Vec<Option<&'a str>>>,
}

impl<'a> TableReport<'a> {
    fn new(table: &'a Table, limit: usize) -> Self {
        Self {
            name: table.name(),
            columns: table.schema().column_names().collect(),
            row_count: table.row_count(),
            rows: (0..table.row_count().min(limit))
                .filter_map(|idx| table.row_values(idx))
                .collect(),
        }
    }
}

pub fn execute(args: &InspectArgs) -> Result<()> {
    let (_, data) = crate::load_sources(&args.source)?;
    if args.json {
        let json = serde_json::to_string_pretty(&reports(&data, args.rows))
            .context("Serializing dataset report")?;
        println!("{json}");
    } else {
        print!("{}", render(&data, args.rows));
    }
    info!(
        "Inspected {} table(s) across {} dataset(s)",
        data.table_names().len(),
        data.members().len()
    );
    Ok(())
}

fn reports(data: &FixtureData, limit: usize) -> Vec<MemberReport<'_>> {
    data.members()
        .iter()
        .enumerate()
        .map(|(member, dataset)| MemberReport {
            member: member + 1,
            tables: dataset
                .tables()
                .into_iter()
                .map(|table| TableReport::new(table, limit))
                .collect(),
        })
        .collect()
}

fn render(data: &FixtureData, limit: usize) -> String {
    let mut output = String::new();
    for (member, dataset) in data.members().iter().enumerate() {
        for table in dataset.tables() {
            let headers = table
                .schema()
                .column_names()
                .map(str::to_string)
                .collect::<Vec<_>>();
            let rows = (0..table.row_count().min(limit))
                .filter_map(|idx| table.row_values(idx))
                .map(|values| {
                    values
                        .into_iter()
                        .map(|value| value.unwrap_or(NULL_CELL).to_string())
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>();
            output.push_str(&format!(
                "{} [dataset {}] ({} row(s))\n",
                table.name(),
                member + 1,
                table.row_count()
            ));
            if !headers.is_empty() {
                output.push_str(&table::render_table(&headers, &rows));
            }
            if table.row_count() > limit {
                output.push_str(&format!("... {} more row(s)\n", table.row_count() - limit));
            }
            output.push('\n');
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::StreamingProducer;

    fn data() -> FixtureData {
        let dataset = StreamingProducer::new(
            r#"<dataset><USERS ID="1" NAME="Ann"/><USERS ID="2"/><USERS ID="3"/><EMPTY/></dataset>"#
                .as_bytes(),
            "users.xml",
        )
        .with_column_sensing(true)
        .produce_dataset()
        .unwrap();
        FixtureData::from_datasets(vec![dataset]).unwrap()
    }

    #[test]
    fn text_report_limits_rows_and_marks_nulls() {
        let text = render(&data(), 2);
        assert!(text.contains("USERS [dataset 1] (3 row(s))"));
        assert!(text.contains("2    [null]"));
        assert!(text.contains("... 1 more row(s)"));
        assert!(text.contains("EMPTY [dataset 1] (0 row(s))"));
    }

    #[test]
    fn json_report_keeps_nulls() {
        let data = data();
        let value = serde_json::to_value(reports(&data, 10)).unwrap();
        let users = &value[0]["tables"][0];
        assert_eq!(users["name"], "USERS");
        assert_eq!(users["columns"], serde_json::json!(["ID", "NAME"]));
        assert_eq!(users["rows"][1], serde_json::json!(["2", null]));
    }
}
