//! Error type for `rowsmith-sqlite`.

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Incompatible or ambiguous schema request.
  #[error("schema error on table {table:?}: {message}")]
  Schema { table: String, message: String },

  /// An illegal name, an unguessable foreign key, or a bad value.
  #[error(transparent)]
  Core(#[from] rowsmith_core::Error),

  /// Primary-key collision under strict insert, or a NOT NULL violation.
  #[error("constraint failed on table {table:?}: {message}")]
  Constraint { table: String, message: String },

  #[error("table {table:?} has no primary key; upsert needs one")]
  PrimaryKeyRequired { table: String },

  #[error("no row in {table:?} with primary key {pk}")]
  NotFound { table: String, pk: String },

  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("async connection error: {0}")]
  Async(#[from] tokio_rusqlite::Error),
}

impl Error {
  pub(crate) fn schema(table: &str, message: impl Into<String>) -> Self {
    Self::Schema { table: table.to_owned(), message: message.into() }
  }

  /// Attach the table name to engine constraint failures raised while
  /// writing; other errors pass through.
  pub(crate) fn on_write(table: &str, err: rusqlite::Error) -> Self {
    match err {
      rusqlite::Error::SqliteFailure(e, message)
        if e.code == ErrorCode::ConstraintViolation =>
      {
        Self::Constraint {
          table:   table.to_owned(),
          message: message.unwrap_or_else(|| e.to_string()),
        }
      }
      other => Self::Database(other),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
