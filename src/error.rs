//! Error types for fixture parsing and phase execution.

use thiserror::Error;

use crate::{operation::DbOperation, plan::Phase};

/// Main error type for fixture operations.
#[derive(Error, Debug)]
pub enum FixtureError {
    /// Structural XML/text error or bad dataset/table nesting
    #[error("Malformed dataset: {0}")]
    MalformedDataSet(String),

    /// Two members of a composite dataset disagree on a column type
    #[error(
        "Schema mismatch for table {table}, column {column}: declared as {left} and {right}"
    )]
    SchemaMismatch {
        table: String,
        column: String,
        left: String,
        right: String,
    },

    #[error("No such table: {0}")]
    NoSuchTable(String),

    #[error("No such column {column} in table {table}")]
    NoSuchColumn { table: String, column: String },

    #[error("Row {row} out of range for table {table}")]
    RowOutOfRange { table: String, row: usize },

    /// Unknown format selector
    #[error("Unsupported dataset format '{0}'")]
    UnsupportedFormat(String),

    /// An executor failure while a phase was running
    #[error("{phase} failed while applying {operation} to table {table}: {source}")]
    FixtureLoad {
        phase: Phase,
        operation: DbOperation,
        table: String,
        #[source]
        source: DatabaseError,
    },

    /// The connection provider could not hand out a connection
    #[error("{phase} could not acquire a connection: {source}")]
    Connection {
        phase: Phase,
        #[source]
        source: DatabaseError,
    },

    /// Missing or invalid configuration fields
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Expected dataset does not match the database content
    #[error("Verification failed for table {table}: {message}")]
    Verification { table: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FixtureError {
    pub fn malformed(message: impl Into<String>) -> Self {
        FixtureError::MalformedDataSet(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        FixtureError::Configuration(message.into())
    }

    pub fn no_such_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        FixtureError::NoSuchColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {self}\n");
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {depth}: {err}"));
            source = err.source();
            depth += 1;
        }
        output
    }
}

/// Failure reported by an [`Executor`](crate::loader::Executor).
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("{0}")]
    Statement(String),

    /// Batched execution failure. The top-level message is usually generic,
    /// the interesting part lives in `next`.
    #[error("Batch update failed: {message}")]
    Batch {
        message: String,
        #[source]
        next: Option<Box<DatabaseError>>,
    },
}

impl DatabaseError {
    pub fn statement(message: impl Into<String>) -> Self {
        DatabaseError::Statement(message.into())
    }

    pub fn batch(message: impl Into<String>, next: Option<DatabaseError>) -> Self {
        DatabaseError::Batch {
            message: message.into(),
            next: next.map(Box::new),
        }
    }

    /// Chained cause of a batch failure, if any.
    pub fn next_error(&self) -> Option<&DatabaseError> {
        match self {
            DatabaseError::Batch { next, .. } => next.as_deref(),
            DatabaseError::Statement(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FixtureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_detailed_walks_batch_chain() {
        let err = FixtureError::FixtureLoad {
            phase: Phase::Setup,
            operation: DbOperation::Insert,
            table: "ORDERS".to_string(),
            source: DatabaseError::batch(
                "statement 3 of 10",
                Some(DatabaseError::statement("duplicate key ORDERS_PK")),
            ),
        };
        let detailed = err.format_detailed();
        assert!(detailed.contains("SETUP failed while applying INSERT to table ORDERS"));
        assert!(detailed.contains("1: Batch update failed: statement 3 of 10"));
        assert!(detailed.contains("2: duplicate key ORDERS_PK"));
    }

    #[test]
    fn next_error_is_only_present_for_batches() {
        let plain = DatabaseError::statement("boom");
        assert!(plain.next_error().is_none());
        let batch = DatabaseError::batch("batch", Some(DatabaseError::statement("cause")));
        assert_eq!(batch.next_error().map(|e| e.to_string()), Some("cause".into()));
    }
}
