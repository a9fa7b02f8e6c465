//! Plain-text table rendering for `inspect`.

use std::borrow::Cow;
use std::fmt::Write as _;

/// Cells wider than this are cut and end with `...`.
pub const MAX_CELL_WIDTH: usize = 40;

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let cells = rows
        .iter()
        .map(|row| row.iter().map(|cell| clip_cell(cell)).collect::<Vec<_>>())
        .collect::<Vec<_>>();
    let mut widths = headers
        .iter()
        .map(|h| display_width(h).max(3))
        .collect::<Vec<_>>();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(display_width(cell));
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers.iter().map(String::as_str), &widths));
    let separator = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(separator.iter().map(String::as_str), &widths));
    for row in &cells {
        let _ = writeln!(output, "{}", format_row(row.iter().map(|c| c.as_ref()), &widths));
    }
    output
}

fn format_row<'a>(values: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let line = values
        .zip(widths)
        .map(|(value, width)| {
            let padding = width.saturating_sub(display_width(value));
            format!("{value}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

fn clip_cell(value: &str) -> Cow<'_, str> {
    let sanitized = sanitize_cell(value);
    if sanitized.chars().count() <= MAX_CELL_WIDTH {
        return sanitized;
    }
    let mut clipped = sanitized.chars().take(MAX_CELL_WIDTH - 3).collect::<String>();
    clipped.push_str("...");
    Cow::Owned(clipped)
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligns_columns_and_trims_trailing_space() {
        let headers = vec!["ID".to_string(), "NAME".to_string()];
        let rows = vec![
            vec!["1".to_string(), "Ann".to_string()],
            vec!["10".to_string(), "multi\nline".to_string()],
        ];
        let rendered = render_table(&headers, &rows);
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "ID   NAME");
        assert_eq!(lines[1], "---  ----------");
        assert_eq!(lines[2], "1    Ann");
        assert_eq!(lines[3], "10   multi line");
    }

    #[test]
    fn long_cells_are_clipped() {
        let long = "x".repeat(MAX_CELL_WIDTH + 10);
        let clipped = clip_cell(&long);
        assert_eq!(clipped.chars().count(), MAX_CELL_WIDTH);
        assert!(clipped.ends_with("..."));
    }
}
