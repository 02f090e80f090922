//! Error types for `rowsmith-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A table or column name that cannot be safely delimited.
  #[error("invalid name {name:?}: {reason}")]
  Name { name: String, reason: &'static str },

  #[error("column {column:?}: foreign key could match any of {candidates:?}")]
  AmbiguousForeignKey {
    column:     String,
    candidates: Vec<String>,
  },

  #[error("column {column:?}: no table matches by naming convention")]
  NoForeignKeyTarget { column: String },

  #[error("table {table:?} needs a single-column primary key to be referenced")]
  UnreferenceableTable { table: String },

  #[error("column {column:?}: non-finite real {value} cannot be stored")]
  NonFiniteReal { column: String, value: f64 },

  #[error("unknown column type: {0:?}")]
  UnknownColumnType(String),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
