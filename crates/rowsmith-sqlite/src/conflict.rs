//! Statement construction per write mode, and identity of the written row.

use std::collections::HashMap;

use rowsmith_core::{
  PrimaryKeyValue, Record, TableSchema, Value, WriteMode,
  naming::{quote, quote_list},
};
use rusqlite::{Connection, OptionalExtension, params_from_iter, types::Value as SqlValue};

use crate::{Result, catalog, encode};

/// A statement and its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
  pub sql:    String,
  pub params: Vec<SqlValue>,
}

/// The placeholder for `column`: `?`, or its conversion fragment with `?`
/// standing in for the value.
fn placeholder(column: &str, conversions: &HashMap<String, String>) -> String {
  conversions
    .iter()
    .find(|(c, _)| c.eq_ignore_ascii_case(column))
    .map(|(_, fragment)| fragment.clone())
    .unwrap_or_else(|| "?".to_owned())
}

pub(crate) fn field<'r>(record: &'r Record, column: &str) -> Option<&'r Value> {
  record.iter().find(|(k, _)| k.eq_ignore_ascii_case(column)).map(|(_, v)| v)
}

/// Statements writing `rows` into `table` under `mode`.
///
/// Insert, ignore and replace write the batch in one multi-row statement
/// over `columns`, binding `NULL` where a record lacks a field. Upsert
/// writes one statement per record touching only that record's fields, so
/// existing values of absent fields survive.
pub(crate) fn build(
  table: &str,
  pk: &[String],
  columns: &[String],
  rows: &[&Record],
  mode: WriteMode,
  conversions: &HashMap<String, String>,
) -> Result<Vec<Statement>> {
  match mode {
    WriteMode::Insert => insert(table, "INSERT", columns, rows, conversions),
    WriteMode::Ignore => insert(table, "INSERT OR IGNORE", columns, rows, conversions),
    WriteMode::Replace => insert(table, "INSERT OR REPLACE", columns, rows, conversions),
    WriteMode::Upsert => rows.iter().map(|r| upsert(table, pk, r, conversions)).collect(),
  }
}

fn insert(
  table: &str,
  verb: &str,
  columns: &[String],
  rows: &[&Record],
  conversions: &HashMap<String, String>,
) -> Result<Vec<Statement>> {
  if columns.is_empty() {
    let sql = format!("{verb} INTO {} DEFAULT VALUES", quote(table));
    return Ok(rows.iter().map(|_| Statement { sql: sql.clone(), params: Vec::new() }).collect());
  }

  let tuple = format!(
    "({})",
    columns.iter().map(|c| placeholder(c, conversions)).collect::<Vec<_>>().join(", ")
  );
  let sql = format!(
    "{verb} INTO {} ({}) VALUES {}",
    quote(table),
    quote_list(columns),
    vec![tuple; rows.len()].join(", "),
  );

  let mut params = Vec::with_capacity(columns.len() * rows.len());
  for row in rows {
    for column in columns {
      params.push(match field(row, column) {
        Some(value) => encode::to_sql(value)?,
        None => SqlValue::Null,
      });
    }
  }
  Ok(vec![Statement { sql, params }])
}

fn upsert(
  table: &str,
  pk: &[String],
  record: &Record,
  conversions: &HashMap<String, String>,
) -> Result<Statement> {
  let columns: Vec<&str> = record.keys().map(String::as_str).collect();
  let placeholders: Vec<String> = columns.iter().map(|c| placeholder(c, conversions)).collect();
  let updates: Vec<String> = columns
    .iter()
    .filter(|c| !pk.iter().any(|p| p.eq_ignore_ascii_case(c)))
    .map(|c| format!("{0} = excluded.{0}", quote(c)))
    .collect();

  let action = if updates.is_empty() {
    "DO NOTHING".to_owned()
  } else {
    format!("DO UPDATE SET {}", updates.join(", "))
  };
  let sql = format!(
    "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {action}",
    quote(table),
    quote_list(&columns),
    placeholders.join(", "),
    quote_list(pk),
  );
  let params = record.values().map(encode::to_sql).collect::<Result<Vec<_>>>()?;
  Ok(Statement { sql, params })
}

/// The identity of `record` just written to `schema`.
///
/// Key values come from the record itself. A single key the record left out
/// was assigned by the engine, as is the identity of a table with no
/// declared key. When the write changed nothing (an ignored conflict), the
/// identity is that of the existing row the record collided with.
pub(crate) fn identity(
  conn: &Connection,
  schema: &TableSchema,
  record: &Record,
  inserted: bool,
) -> Result<Option<PrimaryKeyValue>> {
  if !inserted {
    return existing_identity(conn, schema, record);
  }

  let rowid = conn.last_insert_rowid();
  if !schema.has_explicit_pk() {
    return Ok(Some(PrimaryKeyValue::RowId(rowid)));
  }

  let values: Vec<Option<&Value>> = schema
    .primary_key
    .iter()
    .map(|pk| field(record, pk).filter(|v| !v.is_null()))
    .collect();
  Ok(Some(match values.as_slice() {
    [None] => PrimaryKeyValue::Single(Value::Integer(rowid)),
    _ => PrimaryKeyValue::from_values(
      values.into_iter().map(|v| v.cloned().unwrap_or(Value::Null)).collect(),
    ),
  }))
}

/// Find the stored row sharing a unique key with `record`: the primary key
/// first, then each unique index the record fully covers.
fn existing_identity(
  conn: &Connection,
  schema: &TableSchema,
  record: &Record,
) -> Result<Option<PrimaryKeyValue>> {
  let mut keys: Vec<Vec<String>> = Vec::new();
  if schema.has_explicit_pk() {
    keys.push(schema.primary_key.clone());
  }
  keys.extend(
    catalog::indexes(conn, &schema.name)?
      .into_iter()
      .filter(|i| i.unique)
      .map(|i| i.columns),
  );

  let selected = if schema.has_explicit_pk() {
    quote_list(&schema.primary_key)
  } else {
    "rowid".to_owned()
  };

  for key in keys {
    let Some(values) = key
      .iter()
      .map(|c| field(record, c).filter(|v| !v.is_null()))
      .collect::<Option<Vec<&Value>>>()
    else {
      continue;
    };
    let condition: Vec<String> = key.iter().map(|c| format!("{} = ?", quote(c))).collect();
    let sql = format!(
      "SELECT {selected} FROM {} WHERE {} LIMIT 1",
      quote(&schema.name),
      condition.join(" AND "),
    );
    let params = values.into_iter().map(encode::to_sql).collect::<Result<Vec<_>>>()?;
    let found = conn
      .query_row(&sql, params_from_iter(params.iter()), |row| {
        (0..row.as_ref().column_count())
          .map(|i| row.get_ref(i).map(encode::from_sql))
          .collect::<rusqlite::Result<Vec<Value>>>()
      })
      .optional()?;
    if let Some(values) = found {
      return Ok(Some(match (schema.has_explicit_pk(), values.as_slice()) {
        (false, [Value::Integer(rowid)]) => PrimaryKeyValue::RowId(*rowid),
        _ => PrimaryKeyValue::from_values(values),
      }));
    }
  }
  Ok(None)
}
