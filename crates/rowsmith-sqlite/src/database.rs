//! [`Database`]: one SQLite connection, its schema cache and configuration.

use std::path::Path;

use indexmap::IndexMap;
use rowsmith_core::{
  Column, ColumnType, CreateOptions, ForeignKey, ForeignKeySpec,
  PrimaryKeyValue, Record, TableSchema, Value, WriteMode, WriteOptions,
  WriteSummary, naming::validate_name,
};
use rusqlite::Connection;

use crate::{
  DatabaseConfig, Error, Result,
  catalog::{self, Index, SchemaCache, Trigger},
  fts::{self, FtsIndex, FtsOptions, FtsReport},
  pipeline,
  relations::{self, ManyToMany},
  rows,
  schema::{self, IndexOptions},
  session::Session,
};

/// A database opened for ingestion.
///
/// Every operation runs on the owned connection. Schema reads are served
/// from an explicit cache, invalidated by each schema change made here;
/// after changing the schema through [`Database::connection`], call
/// [`Database::invalidate_schema`].
pub struct Database {
  conn:   Connection,
  cache:  SchemaCache,
  config: DatabaseConfig,
}

fn owned(names: &[&str]) -> Vec<String> { names.iter().map(|n| (*n).to_owned()).collect() }

impl Database {
  /// Open (or create) the database file at `path`.
  pub fn open(path: impl AsRef<Path>, config: DatabaseConfig) -> Result<Self> {
    let path = path.as_ref();
    let conn = Connection::open(path)?;
    tracing::debug!(path = %path.display(), "opened database");
    Self::from_connection(conn, config)
  }

  pub fn open_in_memory(config: DatabaseConfig) -> Result<Self> {
    Self::from_connection(Connection::open_in_memory()?, config)
  }

  /// Take over an already-open connection, applying `config` to it.
  pub fn from_connection(conn: Connection, config: DatabaseConfig) -> Result<Self> {
    config.apply(&conn)?;
    Ok(Self { conn, cache: SchemaCache::new(), config })
  }

  pub fn config(&self) -> &DatabaseConfig { &self.config }

  /// The raw connection, for queries this API does not cover.
  pub fn connection(&self) -> &Connection { &self.conn }

  pub fn invalidate_schema(&mut self) { self.cache.clear(); }

  fn session(&mut self) -> Session<'_> {
    Session::new(&self.conn, &mut self.cache, &self.config)
  }

  /// Run `f` so that everything it writes commits or rolls back together.
  ///
  /// Chunk savepoints nest inside, so a multi-chunk write that fails late
  /// leaves nothing behind.
  pub fn atomic<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
    self.conn.execute_batch("SAVEPOINT rowsmith_atomic")?;
    let outcome = f(self).and_then(|value| {
      self.conn.execute_batch("RELEASE rowsmith_atomic")?;
      Ok(value)
    });
    if outcome.is_err() {
      if let Err(e) =
        self.conn.execute_batch("ROLLBACK TO rowsmith_atomic; RELEASE rowsmith_atomic")
      {
        tracing::warn!(error = %e, "atomic rollback failed");
      }
      self.cache.clear();
    }
    outcome
  }

  // ─── Writes ────────────────────────────────────────────────────────────────

  pub fn insert(
    &mut self,
    table: &str,
    record: Record,
    opts: &WriteOptions,
  ) -> Result<WriteSummary> {
    self.insert_all(table, [record], opts)
  }

  /// Write `records` under `opts.mode`, creating and evolving the table as
  /// needed.
  pub fn insert_all<I>(&mut self, table: &str, records: I, opts: &WriteOptions) -> Result<WriteSummary>
  where
    I: IntoIterator<Item = Record>,
  {
    pipeline::write(&mut self.session(), table, records, opts)
  }

  pub fn upsert(
    &mut self,
    table: &str,
    record: Record,
    opts: &WriteOptions,
  ) -> Result<WriteSummary> {
    self.upsert_all(table, [record], opts)
  }

  /// [`insert_all`](Self::insert_all) with the mode forced to upsert.
  pub fn upsert_all<I>(&mut self, table: &str, records: I, opts: &WriteOptions) -> Result<WriteSummary>
  where
    I: IntoIterator<Item = Record>,
  {
    let opts = WriteOptions { mode: WriteMode::Upsert, ..opts.clone() };
    self.insert_all(table, records, &opts)
  }

  // ─── Schema ────────────────────────────────────────────────────────────────

  pub fn create_table(
    &mut self,
    name: &str,
    columns: &IndexMap<String, ColumnType>,
    opts: &CreateOptions,
  ) -> Result<TableSchema> {
    schema::create_table(&mut self.session(), name, columns, opts)
  }

  /// Add a column; `references` names a table whose primary key it points at.
  pub fn add_column(
    &mut self,
    table: &str,
    column: &str,
    ty: ColumnType,
    references: Option<&str>,
  ) -> Result<TableSchema> {
    schema::add_column(&mut self.session(), table, column, ty, references)
  }

  /// Add a foreign key to an existing column, guessing the target table
  /// when `other_table` is `None`.
  pub fn add_foreign_key(
    &mut self,
    table: &str,
    column: &str,
    other_table: Option<&str>,
    other_column: Option<&str>,
  ) -> Result<ForeignKey> {
    let spec = ForeignKeySpec {
      column:       column.to_owned(),
      other_table:  other_table.map(str::to_owned),
      other_column: other_column.map(str::to_owned),
    };
    self
      .add_foreign_keys(table, &[spec])?
      .into_iter()
      .next()
      .ok_or_else(|| Error::schema(table, "foreign key was not added"))
  }

  pub fn add_foreign_keys(
    &mut self,
    table: &str,
    specs: &[ForeignKeySpec],
  ) -> Result<Vec<ForeignKey>> {
    schema::add_foreign_keys(&mut self.session(), table, specs)
  }

  /// Create an index and return its name.
  pub fn create_index(
    &mut self,
    table: &str,
    columns: &[&str],
    opts: &IndexOptions,
  ) -> Result<String> {
    schema::create_index(&mut self.session(), table, &owned(columns), opts)
  }

  pub fn drop_index(&mut self, name: &str) -> Result<()> {
    schema::drop_index(&mut self.session(), name)
  }

  pub fn create_view(&mut self, name: &str, select: &str, replace: bool) -> Result<()> {
    schema::create_view(&mut self.session(), name, select, replace)
  }

  pub fn drop_view(&mut self, name: &str) -> Result<()> {
    schema::drop_view(&mut self.session(), name)
  }

  /// Drop a table along with its full-text index and owned junction tables.
  pub fn drop_table(&mut self, name: &str) -> Result<()> {
    schema::drop_table(&mut self.session(), name)
  }

  // ─── Full-text search ──────────────────────────────────────────────────────

  pub fn enable_fts(
    &mut self,
    table: &str,
    columns: &[&str],
    opts: &FtsOptions,
  ) -> Result<FtsIndex> {
    fts::enable(&mut self.session(), table, &owned(columns), opts)
  }

  pub fn disable_fts(&mut self, table: &str) -> Result<()> {
    fts::disable(&mut self.session(), table)
  }

  /// Index rows that are not yet indexed; an empty `columns` means all
  /// indexed columns.
  pub fn populate_fts(&mut self, table: &str, columns: &[&str]) -> Result<usize> {
    fts::populate(&mut self.session(), table, &owned(columns))
  }

  pub fn rebuild_fts(&mut self, table: &str) -> Result<()> {
    fts::rebuild(&mut self.session(), table)
  }

  pub fn optimize(&mut self, table: &str) -> Result<FtsReport> {
    fts::optimize(&mut self.session(), table)
  }

  pub fn search(&self, table: &str, query: &str, limit: Option<usize>) -> Result<Vec<Record>> {
    fts::search(&self.conn, table, query, limit)
  }

  pub fn detect_fts(&self, table: &str) -> Result<Option<FtsIndex>> {
    fts::detect(&self.conn, table)
  }

  // ─── Relationships ─────────────────────────────────────────────────────────

  pub fn many_to_many(
    &mut self,
    left: &str,
    right: &str,
    name: Option<&str>,
  ) -> Result<ManyToMany> {
    relations::many_to_many(&mut self.session(), left, right, name)
  }

  pub fn connect(
    &mut self,
    link: &ManyToMany,
    left: impl Into<Value>,
    right: impl Into<Value>,
    extra: &Record,
  ) -> Result<()> {
    relations::connect(&mut self.session(), link, left.into(), right.into(), extra)
  }

  /// Find-or-create the row of `table` matching `key`.
  pub fn lookup(&mut self, table: &str, key: &Record, extra: &Record) -> Result<PrimaryKeyValue> {
    relations::lookup(&mut self.session(), table, key, extra)
  }

  pub fn guess_foreign_key(&mut self, table: &str, column: &str) -> Result<ForeignKey> {
    relations::guess(&mut self.session(), table, column)
  }

  // ─── Rows ──────────────────────────────────────────────────────────────────

  pub fn get(&mut self, table: &str, pk: impl Into<PrimaryKeyValue>) -> Result<Record> {
    rows::get(&mut self.session(), table, &pk.into())
  }

  pub fn delete(&mut self, table: &str, pk: impl Into<PrimaryKeyValue>) -> Result<()> {
    rows::delete(&mut self.session(), table, &pk.into())
  }

  pub fn delete_where(
    &mut self,
    table: &str,
    condition: Option<&str>,
    params: &[Value],
  ) -> Result<usize> {
    rows::delete_where(&mut self.session(), table, condition, params)
  }

  /// Every row of a table or view.
  pub fn rows(&mut self, table: &str) -> Result<Vec<Record>> {
    rows::all(&mut self.session(), table)
  }

  pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>> {
    rows::query(&self.conn, sql, params)
  }

  pub fn count(&self, table: &str) -> Result<i64> {
    validate_name(table)?;
    catalog::count(&self.conn, table)
  }

  // ─── Introspection ─────────────────────────────────────────────────────────

  pub fn table(&mut self, name: &str) -> Result<Option<TableSchema>> {
    self.cache.table(&self.conn, name)
  }

  pub fn table_exists(&self, name: &str) -> Result<bool> {
    catalog::table_exists(&self.conn, name)
  }

  pub fn table_names(&self) -> Result<Vec<String>> { catalog::table_names(&self.conn) }

  pub fn view_names(&self) -> Result<Vec<String>> { catalog::view_names(&self.conn) }

  pub fn columns(&mut self, table: &str) -> Result<Vec<Column>> {
    Ok(self.table(table)?.map(|t| t.columns).unwrap_or_default())
  }

  /// Declared primary key columns; empty for a rowid table.
  pub fn primary_keys(&mut self, table: &str) -> Result<Vec<String>> {
    Ok(self.table(table)?.map(|t| t.primary_key).unwrap_or_default())
  }

  pub fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
    catalog::foreign_keys(&self.conn, table)
  }

  pub fn indexes(&self, table: &str) -> Result<Vec<Index>> { catalog::indexes(&self.conn, table) }

  pub fn triggers(&self, table: Option<&str>) -> Result<Vec<Trigger>> {
    catalog::triggers(&self.conn, table)
  }
}
