//! Reading and deleting rows.

use rowsmith_core::{
  PrimaryKeyValue, Record, TableSchema, Value,
  naming::{quote, validate_name},
};
use rusqlite::{Connection, OptionalExtension as _, Row, params_from_iter};

use crate::{Error, Result, encode, schema, session::Session};

/// Collect a result row into a record keyed by column name.
pub(crate) fn to_record(row: &Row<'_>, columns: &[String]) -> rusqlite::Result<Record> {
  columns
    .iter()
    .enumerate()
    .map(|(i, name)| Ok((name.clone(), encode::from_sql(row.get_ref(i)?))))
    .collect()
}

/// Run a query and collect every row.
pub(crate) fn query(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Record>> {
  let params = params.iter().map(encode::to_sql).collect::<Result<Vec<_>>>()?;
  let mut stmt = conn.prepare(sql)?;
  let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_owned).collect();
  let rows = stmt
    .query_map(params_from_iter(params.iter()), |row| to_record(row, &columns))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

/// Every row of a table or view, in rowid order for tables.
pub(crate) fn all(s: &mut Session<'_>, table: &str) -> Result<Vec<Record>> {
  validate_name(table)?;
  let order = if s.table(table)?.is_some() { " ORDER BY rowid" } else { "" };
  query(s.conn, &format!("SELECT * FROM {}{order}", quote(table)), &[])
}

fn key_clause(schema: &TableSchema, pk: &PrimaryKeyValue) -> Result<(String, Vec<Value>)> {
  let columns = schema.pks();
  let values = pk.values();
  if columns.len() != values.len() {
    return Err(Error::schema(
      &schema.name,
      format!("primary key has {} column(s), got {} value(s)", columns.len(), values.len()),
    ));
  }
  let clause = columns
    .iter()
    .map(|c| format!("{} = ?", quote(c)))
    .collect::<Vec<_>>()
    .join(" AND ");
  Ok((clause, values))
}

/// The row with primary key `pk`.
pub(crate) fn get(s: &mut Session<'_>, table: &str, pk: &PrimaryKeyValue) -> Result<Record> {
  let schema = schema::require_table(s, table)?;
  let (clause, values) = key_clause(&schema, pk)?;
  let sql = format!("SELECT * FROM {} WHERE {clause}", quote(&schema.name));
  let params = values.iter().map(encode::to_sql).collect::<Result<Vec<_>>>()?;

  let mut stmt = s.conn.prepare_cached(&sql)?;
  let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_owned).collect();
  stmt
    .query_row(params_from_iter(params.iter()), |row| to_record(row, &columns))
    .optional()?
    .ok_or_else(|| Error::NotFound { table: schema.name.clone(), pk: pk.to_string() })
}

/// Delete the row with primary key `pk`.
pub(crate) fn delete(s: &mut Session<'_>, table: &str, pk: &PrimaryKeyValue) -> Result<()> {
  let schema = schema::require_table(s, table)?;
  let (clause, values) = key_clause(&schema, pk)?;
  let params = values.iter().map(encode::to_sql).collect::<Result<Vec<_>>>()?;
  let deleted = s
    .conn
    .execute(
      &format!("DELETE FROM {} WHERE {clause}", quote(&schema.name)),
      params_from_iter(params.iter()),
    )
    .map_err(|e| Error::on_write(&schema.name, e))?;
  if deleted == 0 {
    return Err(Error::NotFound { table: schema.name, pk: pk.to_string() });
  }
  Ok(())
}

/// Delete rows matching a `WHERE` fragment, or every row when `None`.
/// Returns the number deleted.
pub(crate) fn delete_where(
  s: &mut Session<'_>,
  table: &str,
  condition: Option<&str>,
  params: &[Value],
) -> Result<usize> {
  let schema = schema::require_table(s, table)?;
  let mut sql = format!("DELETE FROM {}", quote(&schema.name));
  if let Some(condition) = condition {
    sql.push_str(" WHERE ");
    sql.push_str(condition);
  }
  let params = params.iter().map(encode::to_sql).collect::<Result<Vec<_>>>()?;
  let deleted = s
    .conn
    .execute(&sql, params_from_iter(params.iter()))
    .map_err(|e| Error::on_write(&schema.name, e))?;
  tracing::debug!(table = %schema.name, deleted, "deleted rows");
  Ok(deleted)
}
