//! Command-line I/O helpers.
//!
//! The `-` path convention routes output through stdout. Delimited inputs
//! ending in `.tsv` default to a tab delimiter.

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> Option<u8> {
    provided.or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => Some(DEFAULT_TSV_DELIMITER),
        _ => None,
    })
}

/// Opens `path` for writing, or stdout when it is absent or `-`.
pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(p) if !is_dash(p) => {
            if let Some(parent) = p.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Creating output directory {parent:?}"))?;
            }
            let file = File::create(p).with_context(|| format!("Creating output file {p:?}"))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        _ => Ok(Box::new(io::stdout())),
    }
}

/// Path of the file holding `table` inside an output directory.
pub fn table_output_path(dir: &Path, table: &str, extension: &str) -> PathBuf {
    dir.join(format!("{table}.{extension}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tsv_inputs_default_to_tab() {
        assert_eq!(resolve_input_delimiter(Path::new("a.tsv"), None), Some(b'\t'));
        assert_eq!(resolve_input_delimiter(Path::new("a.csv"), None), None);
        assert_eq!(resolve_input_delimiter(Path::new("a.tsv"), Some(b';')), Some(b';'));
    }

    #[test]
    fn table_paths_use_the_table_name() {
        assert_eq!(
            table_output_path(Path::new("out"), "USERS", "csv"),
            Path::new("out").join("USERS.csv")
        );
        assert!(is_dash(Path::new("-")));
    }
}
