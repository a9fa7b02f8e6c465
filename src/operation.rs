use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{FixtureError, Result};

/// Database operation applied to every table of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DbOperation {
    None,
    Update,
    Insert,
    Refresh,
    Delete,
    DeleteAll,
    TruncateTable,
    CleanInsert,
}

impl DbOperation {
    pub const ALL: [DbOperation; 8] = [
        DbOperation::None,
        DbOperation::Update,
        DbOperation::Insert,
        DbOperation::Refresh,
        DbOperation::Delete,
        DbOperation::DeleteAll,
        DbOperation::TruncateTable,
        DbOperation::CleanInsert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DbOperation::None => "NONE",
            DbOperation::Update => "UPDATE",
            DbOperation::Insert => "INSERT",
            DbOperation::Refresh => "REFRESH",
            DbOperation::Delete => "DELETE",
            DbOperation::DeleteAll => "DELETE_ALL",
            DbOperation::TruncateTable => "TRUNCATE_TABLE",
            DbOperation::CleanInsert => "CLEAN_INSERT",
        }
    }

    /// Operations that remove rows. These visit tables children-first.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            DbOperation::Delete | DbOperation::DeleteAll | DbOperation::TruncateTable
        )
    }

    /// Atomic operations this kind stands for, in execution order.
    pub fn expand(&self) -> Vec<DbOperation> {
        match self {
            DbOperation::None => Vec::new(),
            DbOperation::CleanInsert => vec![DbOperation::DeleteAll, DbOperation::Insert],
            other => vec![*other],
        }
    }
}

impl fmt::Display for DbOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbOperation {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        DbOperation::ALL
            .iter()
            .find(|operation| operation.as_str() == normalized)
            .copied()
            .ok_or_else(|| {
                FixtureError::configuration(format!(
                    "Unknown database operation '{value}'. Expected one of: {}",
                    DbOperation::ALL.iter().map(DbOperation::as_str).collect::<Vec<_>>().join(", ")
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_insert_expands_to_delete_all_then_insert() {
        assert_eq!(
            DbOperation::CleanInsert.expand(),
            vec![DbOperation::DeleteAll, DbOperation::Insert]
        );
        assert!(DbOperation::None.expand().is_empty());
        assert_eq!(DbOperation::Refresh.expand(), vec![DbOperation::Refresh]);
    }

    #[test]
    fn parses_loose_spellings() {
        assert_eq!("clean-insert".parse::<DbOperation>().unwrap(), DbOperation::CleanInsert);
        assert_eq!("delete_all".parse::<DbOperation>().unwrap(), DbOperation::DeleteAll);
        assert_eq!("TRUNCATE TABLE".parse::<DbOperation>().unwrap(), DbOperation::TruncateTable);
        assert!(matches!(
            "upsert".parse::<DbOperation>(),
            Err(FixtureError::Configuration(_))
        ));
    }

    #[test]
    fn only_row_removing_operations_are_destructive() {
        let destructive = DbOperation::ALL
            .iter()
            .filter(|operation| operation.is_destructive())
            .copied()
            .collect::<Vec<_>>();
        assert_eq!(
            destructive,
            vec![DbOperation::Delete, DbOperation::DeleteAll, DbOperation::TruncateTable]
        );
    }
}
