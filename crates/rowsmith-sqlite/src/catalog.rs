//! Catalog introspection and the per-connection schema cache.
//!
//! Every query goes through SQLite's table-valued pragma functions so table
//! names are bound as parameters rather than spliced into SQL.

use std::collections::HashMap;

use rowsmith_core::{Column, ColumnType, ForeignKey, TableSchema, naming::quote};
use rusqlite::{Connection, OptionalExtension as _};
use serde::Serialize;

use crate::Result;

// ─── Listings ────────────────────────────────────────────────────────────────

fn master_names(conn: &Connection, kind: &str) -> Result<Vec<String>> {
  let mut stmt = conn.prepare(
    "SELECT name FROM sqlite_master
     WHERE type = ?1 AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
     ORDER BY rowid",
  )?;
  let names = stmt
    .query_map([kind], |row| row.get(0))?
    .collect::<rusqlite::Result<Vec<String>>>()?;
  Ok(names)
}

/// All tables in creation order, including full-text shadow tables.
pub fn table_names(conn: &Connection) -> Result<Vec<String>> {
  master_names(conn, "table")
}

pub fn view_names(conn: &Connection) -> Result<Vec<String>> {
  master_names(conn, "view")
}

/// The stored name of a table, matched case-insensitively.
pub fn canonical_table_name(conn: &Connection, name: &str) -> Result<Option<String>> {
  Ok(
    conn
      .query_row(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
        [name],
        |row| row.get(0),
      )
      .optional()?,
  )
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
  Ok(canonical_table_name(conn, name)?.is_some())
}

pub fn view_exists(conn: &Connection, name: &str) -> Result<bool> {
  let found: Option<i64> = conn
    .query_row(
      "SELECT 1 FROM sqlite_master WHERE type = 'view' AND name = ?1 COLLATE NOCASE",
      [name],
      |row| row.get(0),
    )
    .optional()?;
  Ok(found.is_some())
}

/// The `CREATE VIRTUAL TABLE` statement of `name`, if it is a virtual table.
pub fn virtual_table_sql(conn: &Connection, name: &str) -> Result<Option<String>> {
  Ok(
    conn
      .query_row(
        "SELECT sql FROM sqlite_master
         WHERE type = 'table' AND rootpage = 0 AND name = ?1 COLLATE NOCASE",
        [name],
        |row| row.get(0),
      )
      .optional()?,
  )
}

pub fn count(conn: &Connection, table: &str) -> Result<i64> {
  Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", quote(table)), [], |row| {
    row.get(0)
  })?)
}

// ─── Tables and columns ──────────────────────────────────────────────────────

/// Read a table's columns and primary key, or `None` if there is no such
/// table.
pub fn load_table(conn: &Connection, name: &str) -> Result<Option<TableSchema>> {
  let Some(name) = canonical_table_name(conn, name)? else {
    return Ok(None);
  };

  let mut stmt = conn.prepare(
    "SELECT name, type, \"notnull\", dflt_value, pk
     FROM pragma_table_info(?1) ORDER BY cid",
  )?;
  let rows = stmt
    .query_map([&name], |row| {
      let declared: String = row.get(1)?;
      let pk: i64 = row.get(4)?;
      Ok((
        Column {
          name:          row.get(0)?,
          column_type:   ColumnType::from_declared(&declared),
          declared_type: declared,
          not_null:      row.get(2)?,
          default:       row.get(3)?,
          primary_key:   pk > 0,
        },
        pk,
      ))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut keyed: Vec<(i64, String)> = rows
    .iter()
    .filter(|(_, pk)| *pk > 0)
    .map(|(c, pk)| (*pk, c.name.clone()))
    .collect();
  keyed.sort();

  Ok(Some(TableSchema {
    name,
    columns: rows.into_iter().map(|(c, _)| c).collect(),
    primary_key: keyed.into_iter().map(|(_, n)| n).collect(),
  }))
}

pub fn foreign_keys(conn: &Connection, table: &str) -> Result<Vec<ForeignKey>> {
  let Some(table) = canonical_table_name(conn, table)? else {
    return Ok(Vec::new());
  };
  let mut stmt = conn.prepare(
    "SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
  )?;
  let raw = stmt
    .query_map([&table], |row| {
      Ok((
        row.get::<_, String>(0)?,
        row.get::<_, String>(1)?,
        row.get::<_, Option<String>>(2)?,
      ))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut out = Vec::with_capacity(raw.len());
  for (column, other_table, to) in raw {
    // A bare REFERENCES clause points at the parent's primary key.
    let other_column = match to {
      Some(to) => to,
      None => load_table(conn, &other_table)?
        .and_then(|t| t.primary_key.first().cloned())
        .unwrap_or_else(|| "rowid".to_owned()),
    };
    out.push(ForeignKey { table: table.clone(), column, other_table, other_column });
  }
  Ok(out)
}

// ─── Indexes and triggers ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Index {
  pub name:    String,
  pub columns: Vec<String>,
  pub unique:  bool,
}

pub fn indexes(conn: &Connection, table: &str) -> Result<Vec<Index>> {
  let mut list = conn.prepare("SELECT name, \"unique\" FROM pragma_index_list(?1)")?;
  let heads = list
    .query_map([table], |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut info =
    conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
  let mut out = Vec::with_capacity(heads.len());
  for (name, unique) in heads {
    let columns = info
      .query_map([&name], |row| row.get::<_, Option<String>>(0))?
      .collect::<rusqlite::Result<Vec<_>>>()?
      .into_iter()
      .flatten()
      .collect();
    out.push(Index { name, columns, unique });
  }
  Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trigger {
  pub name:  String,
  pub table: String,
  pub sql:   String,
}

/// Triggers on `table`, or on every table when `None`.
pub fn triggers(conn: &Connection, table: Option<&str>) -> Result<Vec<Trigger>> {
  let mut stmt = conn.prepare(
    "SELECT name, tbl_name, sql FROM sqlite_master
     WHERE type = 'trigger' AND (?1 IS NULL OR tbl_name = ?1 COLLATE NOCASE)
     ORDER BY rowid",
  )?;
  let rows = stmt
    .query_map([table], |row| {
      Ok(Trigger { name: row.get(0)?, table: row.get(1)?, sql: row.get(2)? })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

/// `CREATE INDEX` and `CREATE TRIGGER` statements attached to `table`.
/// Automatic indexes have no SQL and are skipped.
pub(crate) fn dependent_sql(conn: &Connection, table: &str) -> Result<Vec<String>> {
  let mut stmt = conn.prepare(
    "SELECT sql FROM sqlite_master
     WHERE type IN ('index', 'trigger') AND tbl_name = ?1 COLLATE NOCASE
       AND sql IS NOT NULL
     ORDER BY rowid",
  )?;
  let rows = stmt
    .query_map([table], |row| row.get(0))?
    .collect::<rusqlite::Result<Vec<String>>>()?;
  Ok(rows)
}

// ─── Schema cache ────────────────────────────────────────────────────────────

/// Known table schemas for one connection, keyed case-insensitively.
///
/// Filled from the catalog on a miss and invalidated by every schema change
/// made through this crate. Changes made by other connections are not seen
/// until the entry is invalidated.
#[derive(Debug, Default)]
pub struct SchemaCache {
  tables: HashMap<String, TableSchema>,
}

impl SchemaCache {
  pub fn new() -> Self { Self::default() }

  pub fn table(&mut self, conn: &Connection, name: &str) -> Result<Option<TableSchema>> {
    let key = name.to_ascii_lowercase();
    if let Some(hit) = self.tables.get(&key) {
      return Ok(Some(hit.clone()));
    }
    let loaded = load_table(conn, name)?;
    if let Some(schema) = &loaded {
      tracing::trace!(table = %schema.name, "schema cache miss");
      self.tables.insert(key, schema.clone());
    }
    Ok(loaded)
  }

  /// Every table in the database, for foreign-key guessing.
  pub fn all_tables(&mut self, conn: &Connection) -> Result<Vec<TableSchema>> {
    let mut out = Vec::new();
    for name in table_names(conn)? {
      if let Some(schema) = self.table(conn, &name)? {
        out.push(schema);
      }
    }
    Ok(out)
  }

  pub fn invalidate(&mut self, name: &str) {
    self.tables.remove(&name.to_ascii_lowercase());
  }

  pub fn clear(&mut self) { self.tables.clear(); }
}
