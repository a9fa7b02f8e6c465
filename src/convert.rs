use std::{fs, io::Write};

use anyhow::{Context, Result};
use log::info;

use crate::{
    cli::{ConvertArgs, OutputFormat},
    io_utils,
    model::DataSet,
    writer,
};

pub fn execute(args: &ConvertArgs) -> Result<()> {
    let (config, data) = crate::load_sources(&args.source)?;
    match args.to {
        OutputFormat::Flat => {
            let out = io_utils::open_output(args.output.as_deref())?;
            writer::write_flat_xml(&data, out, args.doctype)?;
        }
        OutputFormat::Xml => {
            let out = io_utils::open_output(args.output.as_deref())?;
            writer::write_xml(&data, out)?;
        }
        OutputFormat::Dtd => {
            let out = io_utils::open_output(args.output.as_deref())?;
            writer::write_dtd(&data, out)?;
        }
        OutputFormat::Csv => {
            let options = &config.format_options;
            let delimiter = options.delimiter_byte()?;
            match args.output.as_deref().filter(|path| !io_utils::is_dash(path)) {
                Some(dir) => {
                    fs::create_dir_all(dir)
                        .with_context(|| format!("Creating output directory {dir:?}"))?;
                    for table in data.tables() {
                        let path = io_utils::table_output_path(dir, table.name(), "csv");
                        let out = io_utils::open_output(Some(&path))?;
                        writer::write_csv_table(table, out, delimiter, &options.null_token)?;
                    }
                }
                None => {
                    let mut out = io_utils::open_output(None)?;
                    for table in data.tables() {
                        writer::write_csv_table(table, &mut out, delimiter, &options.null_token)?;
                    }
                    out.flush().context("Flushing CSV output")?;
                }
            }
        }
    }
    info!(
        "Converted {} table(s) from {} file(s) to {:?}",
        data.table_names().len(),
        args.source.inputs.len(),
        args.to
    );
    Ok(())
}
