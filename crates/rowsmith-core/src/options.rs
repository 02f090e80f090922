//! Options and results of the write and schema entry points.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
  schema::{ColumnType, PrimaryKey, PrimaryKeyValue},
  value::Value,
};

/// Default number of records per write chunk.
pub const DEFAULT_BATCH_SIZE: usize = 100;

// ─── Write modes ─────────────────────────────────────────────────────────────

/// Conflict policy applied when an incoming record collides on primary key.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WriteMode {
  /// Collisions fail with a constraint error.
  #[default]
  Insert,
  /// Colliding records are skipped; the existing row is untouched.
  Ignore,
  /// The existing row is replaced wholesale.
  Replace,
  /// Only the incoming fields are merged into the existing row.
  Upsert,
}

// ─── Foreign keys ────────────────────────────────────────────────────────────

/// A requested foreign key. Missing targets are guessed from the column name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeySpec {
  pub column:       String,
  pub other_table:  Option<String>,
  pub other_column: Option<String>,
}

impl ForeignKeySpec {
  pub fn guess(column: impl Into<String>) -> Self {
    Self { column: column.into(), other_table: None, other_column: None }
  }

  pub fn to(
    column: impl Into<String>,
    other_table: impl Into<String>,
    other_column: impl Into<String>,
  ) -> Self {
    Self {
      column:       column.into(),
      other_table:  Some(other_table.into()),
      other_column: Some(other_column.into()),
    }
  }
}

// ─── WriteOptions ────────────────────────────────────────────────────────────

/// Per-call options for the write pipeline.
#[derive(Debug, Clone)]
pub struct WriteOptions {
  /// Primary key used when the table is created. Defaults to the existing
  /// table's key.
  pub pk:              Option<PrimaryKey>,
  pub mode:            WriteMode,
  /// Add columns for previously unseen fields instead of failing.
  pub alter:           bool,
  pub batch_size:      usize,
  /// Records sampled to type a freshly created table; defaults to the first
  /// chunk.
  pub sample_size:     Option<usize>,
  /// Explicit column types overriding inference.
  pub columns:         HashMap<String, ColumnType>,
  /// SQL fragments wrapping a column's bound parameter, e.g. `upper(?)`.
  pub conversions:     HashMap<String, String>,
  /// Delete existing rows before the first chunk is written.
  pub truncate:        bool,
  /// Columns whose values are replaced by the id of a lookup-table row.
  pub extracts:        HashMap<String, String>,
  /// Name of a primary key column filled with a hash of the record.
  pub hash_id:         Option<String>,
  /// Restrict the hash to these fields.
  pub hash_id_columns: Option<Vec<String>>,
  pub not_null:        HashSet<String>,
  pub defaults:        IndexMap<String, Value>,
  pub foreign_keys:    Vec<ForeignKeySpec>,
}

impl Default for WriteOptions {
  fn default() -> Self {
    Self {
      pk:              None,
      mode:            WriteMode::default(),
      alter:           false,
      batch_size:      DEFAULT_BATCH_SIZE,
      sample_size:     None,
      columns:         HashMap::new(),
      conversions:     HashMap::new(),
      truncate:        false,
      extracts:        HashMap::new(),
      hash_id:         None,
      hash_id_columns: None,
      not_null:        HashSet::new(),
      defaults:        IndexMap::new(),
      foreign_keys:    Vec::new(),
    }
  }
}

impl WriteOptions {
  pub fn with_pk(pk: impl Into<PrimaryKey>) -> Self {
    Self { pk: Some(pk.into()), ..Self::default() }
  }

  pub fn mode(mut self, mode: WriteMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn alter(mut self) -> Self {
    self.alter = true;
    self
  }

  pub fn batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size;
    self
  }
}

// ─── CreateOptions ───────────────────────────────────────────────────────────

/// Options for explicit table creation.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
  pub pk:            Option<PrimaryKey>,
  pub not_null:      HashSet<String>,
  pub defaults:      IndexMap<String, Value>,
  pub foreign_keys:  Vec<ForeignKeySpec>,
  /// Succeed without changes when the table already exists.
  pub if_not_exists: bool,
  /// Drop and recreate an existing table.
  pub replace:       bool,
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// A record that failed validation and was skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedRecord {
  /// Position of the record in the input sequence.
  pub index:  usize,
  pub reason: String,
}

/// Outcome of a write-pipeline call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WriteSummary {
  pub written: usize,
  pub failed:  Vec<FailedRecord>,
  /// Identity of the written row, only when exactly one record was written.
  pub last_pk: Option<PrimaryKeyValue>,
}
