//! Conversions between [`Value`] and SQLite storage values.
//!
//! Text-typed values (uuids, decimals, dates, nested values) are stored as
//! their rendered text; booleans as 0/1. Reading back yields the plain
//! storage variants, so nested values come back as JSON text.

use rowsmith_core::{Value, naming::quote_literal};
use rusqlite::types::{Value as SqlValue, ValueRef};

use crate::Result;

pub fn to_sql(value: &Value) -> Result<SqlValue> {
  Ok(match value {
    Value::Null => SqlValue::Null,
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    Value::Integer(i) => SqlValue::Integer(*i),
    Value::Real(f) => SqlValue::Real(*f),
    Value::Blob(bytes) => SqlValue::Blob(bytes.clone()),
    other => SqlValue::Text(other.render_text()?.unwrap_or_default()),
  })
}

pub fn from_sql(value: ValueRef<'_>) -> Value {
  match value {
    ValueRef::Null => Value::Null,
    ValueRef::Integer(i) => Value::Integer(i),
    ValueRef::Real(f) => Value::Real(f),
    ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
    ValueRef::Blob(b) => Value::Blob(b.to_vec()),
  }
}

/// Render a value as an inline SQL literal, for `DEFAULT` clauses.
pub fn to_literal(value: &Value) -> Result<String> {
  Ok(match to_sql(value)? {
    SqlValue::Null => "NULL".to_owned(),
    SqlValue::Integer(i) => i.to_string(),
    SqlValue::Real(f) => format!("{f:?}"),
    SqlValue::Text(t) => quote_literal(&t),
    SqlValue::Blob(b) => format!("X'{}'", hex::encode_upper(b)),
  })
}

#[cfg(test)]
mod tests {
  use rowsmith_core::record;

  use super::*;

  #[test]
  fn booleans_store_as_integers() {
    assert_eq!(to_sql(&Value::Bool(true)).unwrap(), SqlValue::Integer(1));
  }

  #[test]
  fn nested_values_store_as_json() {
    let value = Value::Object(record! { "a" => 1 });
    assert_eq!(to_sql(&value).unwrap(), SqlValue::Text(r#"{"a":1}"#.into()));
  }

  #[test]
  fn literals() {
    assert_eq!(to_literal(&Value::from("O'Hara")).unwrap(), "'O''Hara'");
    assert_eq!(to_literal(&Value::Real(1.0)).unwrap(), "1.0");
    assert_eq!(to_literal(&Value::Blob(vec![0xab, 0x01])).unwrap(), "X'AB01'");
    assert_eq!(to_literal(&Value::Null).unwrap(), "NULL");
  }
}
