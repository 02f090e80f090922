//! Table, column and key descriptions shared by inference, the schema cache
//! and catalog introspection.

use serde::{Deserialize, Serialize};

use crate::value::Value;

// ─── Column types ────────────────────────────────────────────────────────────

/// Storage type of a column.
///
/// Variants are declared weakest to strongest, so `max` over observed types
/// gives the promoted type.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum ColumnType {
  Integer,
  Real,
  Text,
  Blob,
}

impl ColumnType {
  /// Map a declared SQL type to a storage type using SQLite's affinity rules.
  pub fn from_declared(declared: &str) -> Self {
    let upper = declared.to_ascii_uppercase();
    if upper.contains("INT") {
      Self::Integer
    } else if ["CHAR", "CLOB", "TEXT"].iter().any(|s| upper.contains(s)) {
      Self::Text
    } else if upper.is_empty() || upper.contains("BLOB") {
      Self::Blob
    } else {
      Self::Real
    }
  }
}

// ─── Columns and tables ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
  pub name:          String,
  pub column_type:   ColumnType,
  /// The type exactly as declared in the table's DDL.
  pub declared_type: String,
  pub not_null:      bool,
  /// Raw SQL text of the default expression.
  pub default:       Option<String>,
  pub primary_key:   bool,
}

/// A foreign-key edge: `table.column` references `other_table.other_column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
  pub table:        String,
  pub column:       String,
  pub other_table:  String,
  pub other_column: String,
}

/// A known table: the unit stored in the schema cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
  pub name:        String,
  pub columns:     Vec<Column>,
  /// Explicit primary key columns in key order; empty for rowid tables.
  pub primary_key: Vec<String>,
}

impl TableSchema {
  /// Column lookup; SQLite column names are case-insensitive.
  pub fn column(&self, name: &str) -> Option<&Column> {
    self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
  }

  pub fn has_column(&self, name: &str) -> bool { self.column(name).is_some() }

  pub fn column_names(&self) -> Vec<&str> {
    self.columns.iter().map(|c| c.name.as_str()).collect()
  }

  pub fn has_explicit_pk(&self) -> bool { !self.primary_key.is_empty() }

  /// Primary key columns, or `["rowid"]` for tables without one.
  pub fn pks(&self) -> Vec<&str> {
    if self.primary_key.is_empty() {
      vec!["rowid"]
    } else {
      self.primary_key.iter().map(String::as_str).collect()
    }
  }
}

// ─── Primary keys ────────────────────────────────────────────────────────────

/// A primary key declaration: one column or a composite tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrimaryKey(Vec<String>);

impl PrimaryKey {
  pub fn new<I, S>(columns: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self(columns.into_iter().map(Into::into).collect())
  }

  pub fn columns(&self) -> &[String] { &self.0 }

  pub fn is_composite(&self) -> bool { self.0.len() > 1 }

  /// Whether this declaration names the same columns as `existing`.
  pub fn matches(&self, existing: &[String]) -> bool {
    self.0.len() == existing.len()
      && self
        .0
        .iter()
        .zip(existing)
        .all(|(a, b)| a.eq_ignore_ascii_case(b))
  }
}

impl From<&str> for PrimaryKey {
  fn from(column: &str) -> Self { Self(vec![column.to_owned()]) }
}

impl From<String> for PrimaryKey {
  fn from(column: String) -> Self { Self(vec![column]) }
}

impl From<Vec<String>> for PrimaryKey {
  fn from(columns: Vec<String>) -> Self { Self(columns) }
}

impl<const N: usize> From<[&str; N]> for PrimaryKey {
  fn from(columns: [&str; N]) -> Self { Self::new(columns) }
}

/// The identity of one written row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PrimaryKeyValue {
  /// The engine's implicit row identity, for tables without a primary key.
  RowId(i64),
  Single(Value),
  Composite(Vec<Value>),
}

impl PrimaryKeyValue {
  /// Build from key values in key order.
  pub fn from_values(mut values: Vec<Value>) -> Self {
    if values.len() == 1 {
      Self::Single(values.remove(0))
    } else {
      Self::Composite(values)
    }
  }

  /// The values in key order; a row id yields one integer.
  pub fn values(&self) -> Vec<Value> {
    match self {
      Self::RowId(id) => vec![Value::Integer(*id)],
      Self::Single(v) => vec![v.clone()],
      Self::Composite(vs) => vs.clone(),
    }
  }

  /// The single value of a non-composite key.
  pub fn into_value(self) -> Option<Value> {
    match self {
      Self::RowId(id) => Some(Value::Integer(id)),
      Self::Single(v) => Some(v),
      Self::Composite(_) => None,
    }
  }
}

impl From<Value> for PrimaryKeyValue {
  fn from(value: Value) -> Self { Self::Single(value) }
}

impl From<i64> for PrimaryKeyValue {
  fn from(id: i64) -> Self { Self::Single(Value::Integer(id)) }
}

impl From<i32> for PrimaryKeyValue {
  fn from(id: i32) -> Self { Self::Single(Value::Integer(id.into())) }
}

impl From<&str> for PrimaryKeyValue {
  fn from(key: &str) -> Self { Self::Single(Value::from(key)) }
}

impl std::fmt::Display for PrimaryKeyValue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let rendered: Vec<String> = self
      .values()
      .iter()
      .map(|v| match v.to_json() {
        Ok(json) => json.to_string(),
        Err(_) => format!("{v:?}"),
      })
      .collect();
    write!(f, "({})", rendered.join(", "))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn declared_types_map_by_affinity() {
    assert_eq!(ColumnType::from_declared("INTEGER"), ColumnType::Integer);
    assert_eq!(ColumnType::from_declared("bigint"), ColumnType::Integer);
    assert_eq!(ColumnType::from_declared("VARCHAR(20)"), ColumnType::Text);
    assert_eq!(ColumnType::from_declared(""), ColumnType::Blob);
    assert_eq!(ColumnType::from_declared("FLOAT"), ColumnType::Real);
  }

  #[test]
  fn column_type_display_and_parse() {
    assert_eq!(ColumnType::Text.to_string(), "TEXT");
    assert_eq!("real".parse::<ColumnType>().unwrap(), ColumnType::Real);
  }

  #[test]
  fn primary_key_matches_case_insensitively() {
    let pk = PrimaryKey::from(["Id", "kind"]);
    assert!(pk.is_composite());
    assert!(pk.matches(&["id".into(), "KIND".into()]));
    assert!(!pk.matches(&["id".into()]));
  }

  #[test]
  fn rowid_tables_report_rowid_pk() {
    let table = TableSchema {
      name:        "dogs".into(),
      columns:     vec![],
      primary_key: vec![],
    };
    assert_eq!(table.pks(), ["rowid"]);
    assert!(!table.has_explicit_pk());
  }
}
