//! Full-text search over a source table.
//!
//! An index for table `t` is an external-content virtual table `t_fts`
//! holding no copy of the text, plus triggers `t_ai`, `t_ad` and `t_au`
//! that keep it in step with inserts, deletes and updates.
//!
//! The index keeps per-document bookkeeping in `t_fts_docsize`. If rows
//! are replaced while recursive triggers are off, the delete half of the
//! replace never reaches the index and bookkeeping rows for vanished rowids
//! pile up. [`optimize`] detects those orphans and rebuilds before merging.

use rowsmith_core::{
  Record, Value,
  naming::{quote, quote_list, quote_literal, validate_name, validate_names},
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, catalog, rows, schema, session::Session};

// ─── Types ───────────────────────────────────────────────────────────────────

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
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum FtsVersion {
  Fts4,
  #[default]
  Fts5,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FtsOptions {
  pub version:         FtsVersion,
  /// e.g. `porter`; the engine default when unset.
  pub tokenize:        Option<String>,
  /// Without triggers the index only changes on [`populate`] or
  /// [`rebuild`].
  pub create_triggers: bool,
  /// Drop an existing index first instead of failing.
  pub replace:         bool,
}

impl Default for FtsOptions {
  fn default() -> Self {
    Self {
      version:         FtsVersion::default(),
      tokenize:        None,
      create_triggers: true,
      replace:         false,
    }
  }
}

/// A full-text index and the table it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FtsIndex {
  pub source:  String,
  pub name:    String,
  pub version: FtsVersion,
}

impl FtsIndex {
  fn docsize(&self) -> String { format!("{}_docsize", self.name) }
}

/// What [`optimize`] found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FtsReport {
  pub source_rows:       i64,
  /// Documents in the index afterwards.
  pub documents:         i64,
  /// Bookkeeping rows whose source row no longer exists.
  pub orphans_reclaimed: i64,
  /// Source rows that were not yet indexed.
  pub missing_indexed:   i64,
}

fn fts_name(table: &str) -> String { format!("{table}_fts") }

fn trigger_names(table: &str) -> [String; 3] {
  [format!("{table}_ai"), format!("{table}_ad"), format!("{table}_au")]
}

// ─── Detection ───────────────────────────────────────────────────────────────

/// The full-text index of `table`, if it has one.
pub fn detect(conn: &Connection, table: &str) -> Result<Option<FtsIndex>> {
  let Some(source) = catalog::canonical_table_name(conn, table)? else {
    return Ok(None);
  };
  let name = fts_name(&source);
  Ok(catalog::virtual_table_sql(conn, &name)?.map(|sql| FtsIndex {
    version: version_of(&sql),
    source,
    name,
  }))
}

fn version_of(sql: &str) -> FtsVersion {
  if sql.to_ascii_uppercase().contains("FTS5") { FtsVersion::Fts5 } else { FtsVersion::Fts4 }
}

/// Find the index given either the source table or the index itself.
fn resolve(conn: &Connection, table: &str) -> Result<FtsIndex> {
  if let Some(index) = detect(conn, table)? {
    return Ok(index);
  }
  let lower = table.to_ascii_lowercase();
  if let Some(stem) = lower.strip_suffix("_fts")
    && let Some(sql) = catalog::virtual_table_sql(conn, table)?
    && let Some(source) = catalog::canonical_table_name(conn, &table[..stem.len()])?
  {
    return Ok(FtsIndex { name: fts_name(&source), source, version: version_of(&sql) });
  }
  Err(Error::schema(table, "no full-text index"))
}

/// Columns of the index, read from the virtual table.
fn indexed_columns(conn: &Connection, index: &FtsIndex) -> Result<Vec<String>> {
  let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
  let names = stmt
    .query_map([&index.name], |row| row.get(0))?
    .collect::<rusqlite::Result<Vec<String>>>()?;
  Ok(names)
}

// ─── Enable / disable ────────────────────────────────────────────────────────

pub(crate) fn enable(
  s: &mut Session<'_>,
  table: &str,
  columns: &[String],
  opts: &FtsOptions,
) -> Result<FtsIndex> {
  let source = schema::require_table(s, table)?;
  validate_names(columns.iter().map(String::as_str))?;
  if columns.is_empty() {
    return Err(Error::schema(&source.name, "full-text search needs at least one column"));
  }
  if let Some(missing) = columns.iter().find(|c| !source.has_column(c)) {
    return Err(Error::schema(&source.name, format!("no such column: {missing}")));
  }

  let existing = detect(s.conn, &source.name)?;
  if existing.is_some() && !opts.replace {
    return Err(Error::schema(&source.name, "full-text search is already enabled"));
  }

  let index = FtsIndex {
    source:  source.name.clone(),
    name:    fts_name(&source.name),
    version: opts.version,
  };
  let tokenize = opts
    .tokenize
    .as_deref()
    .map(|t| format!("\n    tokenize={},", quote_literal(t)))
    .unwrap_or_default();
  let create = format!(
    "CREATE VIRTUAL TABLE {} USING {} (\n    {},{tokenize}\n    content={}\n)",
    quote(&index.name),
    index.version,
    quote_list(columns),
    quote(&index.source),
  );

  s.savepoint(|s| {
    if existing.is_some() {
      disable(s, &index.source)?;
    }
    s.conn.execute_batch(&create)?;
    populate_all(s.conn, &index, columns)?;
    if opts.create_triggers {
      s.conn.execute_batch(&triggers_sql(&index, columns))?;
    }
    s.cache.invalidate(&index.name);
    Ok(())
  })?;

  tracing::info!(
    table = %index.source,
    version = %index.version,
    columns = ?columns,
    triggers = opts.create_triggers,
    "full-text search enabled"
  );
  Ok(index)
}

fn triggers_sql(index: &FtsIndex, columns: &[String]) -> String {
  let [ai, ad, au] = trigger_names(&index.source).map(|n| quote(&n));
  let (src, fts) = (quote(&index.source), quote(&index.name));
  let cols = quote_list(columns);
  let prefixed = |prefix: &str| {
    columns.iter().map(|c| format!("{prefix}.{}", quote(c))).collect::<Vec<_>>().join(", ")
  };
  let (old, new) = (prefixed("old"), prefixed("new"));

  match index.version {
    FtsVersion::Fts5 => format!(
      "CREATE TRIGGER {ai} AFTER INSERT ON {src} BEGIN
  INSERT INTO {fts} (rowid, {cols}) VALUES (new.rowid, {new});
END;
CREATE TRIGGER {ad} AFTER DELETE ON {src} BEGIN
  INSERT INTO {fts} ({fts}, rowid, {cols}) VALUES('delete', old.rowid, {old});
END;
CREATE TRIGGER {au} AFTER UPDATE ON {src} BEGIN
  INSERT INTO {fts} ({fts}, rowid, {cols}) VALUES('delete', old.rowid, {old});
  INSERT INTO {fts} (rowid, {cols}) VALUES (new.rowid, {new});
END;"
    ),
    // FTS4 has no 'delete' command: deletes must run while the content row
    // still exists, hence BEFORE.
    FtsVersion::Fts4 => format!(
      "CREATE TRIGGER {ai} AFTER INSERT ON {src} BEGIN
  INSERT INTO {fts} (rowid, {cols}) VALUES (new.rowid, {new});
END;
CREATE TRIGGER {ad} BEFORE DELETE ON {src} BEGIN
  DELETE FROM {fts} WHERE rowid = old.rowid;
END;
CREATE TRIGGER {au} BEFORE UPDATE ON {src} BEGIN
  DELETE FROM {fts} WHERE rowid = old.rowid;
  INSERT INTO {fts} (rowid, {cols}) VALUES (new.rowid, {new});
END;"
    ),
  }
}

/// Drop the index and its triggers. A table without one is left alone.
pub(crate) fn disable(s: &mut Session<'_>, table: &str) -> Result<()> {
  validate_name(table)?;
  let source = catalog::canonical_table_name(s.conn, table)?.unwrap_or_else(|| table.to_owned());
  let name = fts_name(&source);
  let mut sql = format!("DROP TABLE IF EXISTS {};", quote(&name));
  for trigger in trigger_names(&source) {
    sql.push_str(&format!("\nDROP TRIGGER IF EXISTS {};", quote(&trigger)));
  }
  s.conn.execute_batch(&sql)?;
  s.cache.invalidate(&name);
  tracing::debug!(table = %source, "full-text search disabled");
  Ok(())
}

// ─── Maintenance ─────────────────────────────────────────────────────────────

/// Index source rows that are not in the index yet.
fn populate_all(conn: &Connection, index: &FtsIndex, columns: &[String]) -> Result<usize> {
  let cols = quote_list(columns);
  let sql = format!(
    "INSERT INTO {fts} (rowid, {cols}) SELECT rowid, {cols} FROM {src}
     WHERE rowid NOT IN (SELECT rowid FROM {docsize})",
    fts = quote(&index.name),
    src = quote(&index.source),
    docsize = quote(&index.docsize()),
  );
  Ok(conn.execute(&sql, [])?)
}

/// Index rows written while triggers were absent. Returns the number added.
pub(crate) fn populate(s: &mut Session<'_>, table: &str, columns: &[String]) -> Result<usize> {
  let index = resolve(s.conn, table)?;
  validate_names(columns.iter().map(String::as_str))?;
  let indexed = indexed_columns(s.conn, &index)?;
  if let Some(unknown) =
    columns.iter().find(|c| !indexed.iter().any(|i| i.eq_ignore_ascii_case(c)))
  {
    return Err(Error::schema(&index.name, format!("column {unknown:?} is not indexed")));
  }
  let columns = if columns.is_empty() { indexed.as_slice() } else { columns };
  let added = s.savepoint(|s| populate_all(s.conn, &index, columns))?;
  tracing::debug!(table = %index.source, added, "populated full-text index");
  Ok(added)
}

/// Rebuild the index from the source table.
pub(crate) fn rebuild(s: &mut Session<'_>, table: &str) -> Result<()> {
  let index = resolve(s.conn, table)?;
  s.conn.execute_batch(&rebuild_sql(&index))?;
  tracing::info!(table = %index.source, "rebuilt full-text index");
  Ok(())
}

fn rebuild_sql(index: &FtsIndex) -> String {
  let fts = quote(&index.name);
  format!("INSERT INTO {fts} ({fts}) VALUES ('rebuild');")
}

/// Bookkeeping rows with no matching source row.
pub fn orphaned_documents(conn: &Connection, index: &FtsIndex) -> Result<i64> {
  Ok(conn.query_row(
    &format!(
      "SELECT COUNT(*) FROM {} WHERE rowid NOT IN (SELECT rowid FROM {})",
      quote(&index.docsize()),
      quote(&index.source),
    ),
    [],
    |row| row.get(0),
  )?)
}

fn unindexed_rows(conn: &Connection, index: &FtsIndex) -> Result<i64> {
  Ok(conn.query_row(
    &format!(
      "SELECT COUNT(*) FROM {} WHERE rowid NOT IN (SELECT rowid FROM {})",
      quote(&index.source),
      quote(&index.docsize()),
    ),
    [],
    |row| row.get(0),
  )?)
}

/// Documents the index holds bookkeeping for.
pub fn document_count(conn: &Connection, index: &FtsIndex) -> Result<i64> {
  catalog::count(conn, &index.docsize())
}

/// Reclaim drift, then merge the index's internal segments.
///
/// Accepts the source table or the index table. Afterwards the index holds
/// exactly one document per source row.
pub(crate) fn optimize(s: &mut Session<'_>, table: &str) -> Result<FtsReport> {
  let index = resolve(s.conn, table)?;

  let report = s.savepoint(|s| {
    let orphans = orphaned_documents(s.conn, &index)?;
    let missing = unindexed_rows(s.conn, &index)?;
    if orphans > 0 || missing > 0 {
      tracing::warn!(
        table = %index.source,
        orphans,
        missing,
        "full-text index drifted from its table; rebuilding"
      );
      s.conn.execute_batch(&rebuild_sql(&index))?;
    }
    let fts = quote(&index.name);
    s.conn.execute_batch(&format!("INSERT INTO {fts} ({fts}) VALUES ('optimize');"))?;

    Ok(FtsReport {
      source_rows:       catalog::count(s.conn, &index.source)?,
      documents:         document_count(s.conn, &index)?,
      orphans_reclaimed: orphans,
      missing_indexed:   missing,
    })
  })?;

  tracing::info!(table = %index.source, documents = report.documents, "optimized full-text index");
  Ok(report)
}

// ─── Search ──────────────────────────────────────────────────────────────────

/// Source rows matching `query`, best match first (rowid order for FTS4,
/// which has no rank).
pub(crate) fn search(
  conn: &Connection,
  table: &str,
  query: &str,
  limit: Option<usize>,
) -> Result<Vec<Record>> {
  let index = resolve(conn, table)?;
  let (src, fts) = (quote(&index.source), quote(&index.name));
  let order = match index.version {
    FtsVersion::Fts5 => format!("{fts}.rank"),
    FtsVersion::Fts4 => format!("{src}.rowid"),
  };
  let sql = format!(
    "SELECT {src}.* FROM {src} JOIN {fts} ON {src}.rowid = {fts}.rowid
     WHERE {fts} MATCH ? ORDER BY {order} LIMIT ?"
  );
  let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
  rows::query(conn, &sql, &[Value::from(query), Value::Integer(limit)])
}
