//! Errors raised by the pipeline store.

use std::path::PathBuf;

use rusqlite::types::Type;
use thiserror::Error;

/// Errors from the SQLite-backed pipeline store.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    /// A stored value no longer decodes into its domain type.
    #[error("Corrupt value '{value}' in {table}.{column}: {reason}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        value: String,
        reason: String,
    },

    /// The directory holding the store could not be created.
    #[error("Cannot create pipeline store at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema migration v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A thread panicked while holding the store connection.
    #[error("Pipeline store connection poisoned")]
    LockPoisoned,
}

/// Decode failure for one column, carried through rusqlite's row mappers
/// and surfaced as [`DatabaseError::CorruptRow`].
#[derive(Error, Debug)]
#[error("{reason}")]
pub struct CorruptValue {
    pub table: &'static str,
    pub column: &'static str,
    pub value: String,
    pub reason: String,
}

impl CorruptValue {
    pub(crate) fn new(
        table: &'static str,
        column: &'static str,
        value: &str,
        reason: impl ToString,
    ) -> Self {
        Self {
            table,
            column,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Wraps the failure so it can leave a `query_row`/`query_map` mapper.
    pub(crate) fn into_sql_error(self, column_idx: usize) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(column_idx, Type::Text, Box::new(self))
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::FromSqlConversionFailure(idx, ty, source) => {
                match source.downcast::<CorruptValue>() {
                    Ok(corrupt) => {
                        let CorruptValue {
                            table,
                            column,
                            value,
                            reason,
                        } = *corrupt;
                        DatabaseError::CorruptRow {
                            table,
                            column,
                            value,
                            reason,
                        }
                    }
                    Err(source) => DatabaseError::Sqlite(
                        rusqlite::Error::FromSqlConversionFailure(idx, ty, source),
                    ),
                }
            }
            other => DatabaseError::Sqlite(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_value_survives_rusqlite_round_trip() {
        let err = CorruptValue::new("jobs", "status", "paused", "unknown status")
            .into_sql_error(4);
        match DatabaseError::from(err) {
            DatabaseError::CorruptRow {
                table,
                column,
                value,
                reason,
            } => {
                assert_eq!(table, "jobs");
                assert_eq!(column, "status");
                assert_eq!(value, "paused");
                assert_eq!(reason, "unknown status");
            }
            other => panic!("expected CorruptRow, got {:?}", other),
        }
    }

    #[test]
    fn test_other_sqlite_errors_pass_through() {
        let err = DatabaseError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(
            err,
            DatabaseError::Sqlite(rusqlite::Error::QueryReturnedNoRows)
        ));
    }
}
