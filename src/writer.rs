//! Dataset serialisation: flat XML, verbose XML, delimited text and DTD.
//!
//! Flat output parses back to an equal dataset when read with column sensing
//! (or with the embedded DOCTYPE and DTD metadata enabled), provided every
//! column carries at least one value.

use std::io::Write;

use anyhow::{Context, Result};
use csv::QuoteStyle;
use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};

use crate::{
    dtd,
    model::{DataSet, Table},
};

const ROOT: &str = dtd::DEFAULT_ROOT_ELEMENT;

pub fn write_flat_xml<W: Write>(dataset: &dyn DataSet, out: W, include_doctype: bool) -> Result<()> {
    let mut writer = Writer::new_with_indent(out, b' ', 4);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Writing XML declaration")?;
    if include_doctype {
        let grammar = dtd::write_dtd(dataset.tables().iter().map(|table| table.schema()), ROOT);
        writer
            .write_event(Event::DocType(BytesText::from_escaped(format!(
                "{ROOT} [\n{grammar}]"
            ))))
            .context("Writing DOCTYPE")?;
    }
    writer
        .write_event(Event::Start(BytesStart::new(ROOT)))
        .context("Opening dataset element")?;
    for table in dataset.tables() {
        if table.row_count() == 0 {
            writer
                .write_event(Event::Empty(BytesStart::new(table.name())))
                .with_context(|| format!("Writing empty table {}", table.name()))?;
            continue;
        }
        for (idx, row) in table.rows().iter().enumerate() {
            let mut element = BytesStart::new(table.name());
            for (column_idx, column) in table.schema().columns().iter().enumerate() {
                if let Some(value) = row.get(column_idx) {
                    element.push_attribute((column.name(), value));
                }
            }
            writer
                .write_event(Event::Empty(element))
                .with_context(|| format!("Writing row {idx} of table {}", table.name()))?;
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(ROOT)))
        .context("Closing dataset element")?;
    writer.get_mut().flush().context("Flushing flat XML output")?;
    Ok(())
}

pub fn to_flat_xml_string(dataset: &dyn DataSet, include_doctype: bool) -> Result<String> {
    let mut buffer = Vec::new();
    write_flat_xml(dataset, &mut buffer, include_doctype)?;
    String::from_utf8(buffer).context("Flat XML output is not UTF-8")
}

pub fn write_xml<W: Write>(dataset: &dyn DataSet, out: W) -> Result<()> {
    let mut writer = Writer::new_with_indent(out, b' ', 4);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Writing XML declaration")?;
    writer
        .write_event(Event::Start(BytesStart::new(ROOT)))
        .context("Opening dataset element")?;
    for table in dataset.tables() {
        let mut element = BytesStart::new("table");
        element.push_attribute(("name", table.name()));
        writer.write_event(Event::Start(element))?;
        for column in table.schema().columns() {
            writer.write_event(Event::Start(BytesStart::new("column")))?;
            writer.write_event(Event::Text(BytesText::new(column.name())))?;
            writer.write_event(Event::End(BytesEnd::new("column")))?;
        }
        for idx in 0..table.row_count() {
            writer.write_event(Event::Start(BytesStart::new("row")))?;
            for value in table.row_values(idx).unwrap_or_default() {
                match value {
                    Some(text) => {
                        writer.write_event(Event::Start(BytesStart::new("value")))?;
                        writer.write_event(Event::Text(BytesText::new(text)))?;
                        writer.write_event(Event::End(BytesEnd::new("value")))?;
                    }
                    None => writer.write_event(Event::Empty(BytesStart::new("null")))?,
                }
            }
            writer.write_event(Event::End(BytesEnd::new("row")))?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("table")))
            .with_context(|| format!("Writing table {}", table.name()))?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(ROOT)))
        .context("Closing dataset element")?;
    writer.get_mut().flush().context("Flushing XML output")?;
    Ok(())
}

pub fn write_csv_table<W: Write>(table: &Table, out: W, delimiter: u8, null_token: &str) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true)
        .from_writer(out);
    writer
        .write_record(table.schema().column_names())
        .with_context(|| format!("Writing header for table {}", table.name()))?;
    for idx in 0..table.row_count() {
        let values = table.row_values(idx).unwrap_or_default();
        writer
            .write_record(values.iter().map(|value| value.unwrap_or(null_token)))
            .with_context(|| format!("Writing row {idx} of table {}", table.name()))?;
    }
    writer.flush().context("Flushing CSV output")?;
    Ok(())
}

pub fn write_dtd<W: Write>(dataset: &dyn DataSet, mut out: W) -> Result<()> {
    let grammar = dtd::write_dtd(dataset.tables().iter().map(|table| table.schema()), ROOT);
    out.write_all(grammar.as_bytes()).context("Writing DTD")?;
    out.flush().context("Flushing DTD output")
}
