//! Dataset decorators applied after parsing and before any phase runs.
//!
//! The built-in decorator substitutes cell values, which lets fixtures spell
//! out values that are awkward in text form (`[NULL]`, `[NOW]`, a shared id).

use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::{FixtureError, Result},
    model::{DataSet, Dataset, Row, Table},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacementMode {
    /// Replace cells whose whole value equals `from`.
    #[default]
    Exact,
    /// Replace every occurrence of `from` inside a cell.
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueReplacement {
    pub from: String,
    /// Replacement text; `None` turns the cell into null.
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub mode: ReplacementMode,
}

impl ValueReplacement {
    pub fn exact(from: impl Into<String>, to: Option<&str>) -> Self {
        Self {
            from: from.into(),
            to: to.map(str::to_string),
            mode: ReplacementMode::Exact,
        }
    }

    pub fn substring(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: Some(to.into()),
            mode: ReplacementMode::Substring,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.from.is_empty() {
            return Err(FixtureError::configuration("Replacement source value is empty"));
        }
        if self.mode == ReplacementMode::Substring && self.to.is_none() {
            return Err(FixtureError::configuration(format!(
                "Substring replacement for '{}' needs a replacement text",
                self.from
            )));
        }
        Ok(())
    }
}

/// Transforms a parsed dataset into the dataset that is actually loaded.
pub trait DatasetDecorator {
    fn decorate(&self, dataset: Dataset) -> Result<Dataset>;
}

#[derive(Debug, Clone, Default)]
pub struct ReplacementDecorator {
    replacements: Vec<ValueReplacement>,
}

impl ReplacementDecorator {
    pub fn new(replacements: Vec<ValueReplacement>) -> Result<Self> {
        for replacement in &replacements {
            replacement.validate()?;
        }
        Ok(Self { replacements })
    }

    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }

    fn replace(&self, value: Option<&Arc<str>>) -> Option<Arc<str>> {
        let mut current = value.cloned();
        for replacement in &self.replacements {
            let Some(text) = current.as_deref() else {
                break;
            };
            match replacement.mode {
                ReplacementMode::Exact if text == replacement.from => {
                    current = replacement.to.as_deref().map(Arc::from);
                }
                ReplacementMode::Substring if text.contains(replacement.from.as_str()) => {
                    let to = replacement.to.as_deref().unwrap_or_default();
                    current = Some(Arc::from(text.replace(replacement.from.as_str(), to)));
                }
                _ => {}
            }
        }
        current
    }
}

impl DatasetDecorator for ReplacementDecorator {
    fn decorate(&self, dataset: Dataset) -> Result<Dataset> {
        if self.is_empty() {
            return Ok(dataset);
        }
        let mut replaced = 0usize;
        let tables = dataset
            .table_slice()
            .iter()
            .map(|table| {
                let width = table.schema().column_count();
                let rows = table
                    .rows()
                    .iter()
                    .map(|row| {
                        Row::new(
                            (0..width.max(row.len()))
                                .map(|idx| {
                                    let original = row.shared(idx);
                                    let value = self.replace(original);
                                    if value.as_ref() != original {
                                        replaced += 1;
                                    }
                                    value
                                })
                                .collect(),
                        )
                    })
                    .collect();
                Table::with_rows(table.schema().clone(), rows)
            })
            .collect::<Vec<_>>();
        debug!("Replaced {replaced} cell value(s)");
        Ok(Dataset::from_tables(dataset.case_sensitivity(), tables))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::StreamingProducer;

    fn dataset() -> Dataset {
        StreamingProducer::new(
            r#"<dataset><T A="[NULL]" B="id-[ID]"/><T A="x" B="[ID]"/></dataset>"#.as_bytes(),
            "t.xml",
        )
        .produce_dataset()
        .unwrap()
    }

    #[test]
    fn exact_replacement_can_produce_null() {
        let decorator = ReplacementDecorator::new(vec![ValueReplacement::exact("[NULL]", None)]).unwrap();
        let decorated = decorator.decorate(dataset()).unwrap();
        let table = decorated.table("T").unwrap();
        assert_eq!(table.value(0, "A").unwrap(), None);
        assert_eq!(table.value(1, "A").unwrap(), Some("x"));
    }

    #[test]
    fn substring_replacement_rewrites_inside_values() {
        let decorator =
            ReplacementDecorator::new(vec![ValueReplacement::substring("[ID]", "42")]).unwrap();
        let decorated = decorator.decorate(dataset()).unwrap();
        let table = decorated.table("T").unwrap();
        assert_eq!(table.value(0, "B").unwrap(), Some("id-42"));
        assert_eq!(table.value(1, "B").unwrap(), Some("42"));
    }

    #[test]
    fn substring_without_target_is_rejected() {
        let replacement = ValueReplacement {
            from: "x".into(),
            to: None,
            mode: ReplacementMode::Substring,
        };
        assert!(ReplacementDecorator::new(vec![replacement]).is_err());
    }
}
