//! [`AsyncDatabase`]: the same operations driven from async code.
//!
//! Wraps [`tokio_rusqlite`] so all database work runs on the connection's
//! dedicated thread without blocking the runtime. Calls are serialised on
//! that thread, so the shared schema cache is never contended.

use std::{
  path::Path,
  sync::{Arc, Mutex, PoisonError},
};

use indexmap::IndexMap;
use rowsmith_core::{
  ColumnType, CreateOptions, ForeignKey, ForeignKeySpec, PrimaryKeyValue,
  Record, TableSchema, Value, WriteMode, WriteOptions, WriteSummary,
};

use crate::{
  DatabaseConfig, Result,
  catalog::{self, SchemaCache},
  fts::{self, FtsIndex, FtsOptions, FtsReport},
  pipeline,
  relations::{self, ManyToMany},
  rows,
  schema::{self, IndexOptions},
  session::Session,
};

/// An async handle on one database connection.
///
/// Cloning is cheap; clones share the connection and schema cache.
#[derive(Clone)]
pub struct AsyncDatabase {
  conn:   tokio_rusqlite::Connection,
  cache:  Arc<Mutex<SchemaCache>>,
  config: Arc<DatabaseConfig>,
}

impl AsyncDatabase {
  pub async fn open(path: impl AsRef<Path>, config: DatabaseConfig) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::configure(conn, config).await
  }

  pub async fn open_in_memory(config: DatabaseConfig) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::configure(conn, config).await
  }

  async fn configure(conn: tokio_rusqlite::Connection, config: DatabaseConfig) -> Result<Self> {
    let db = Self {
      conn,
      cache: Arc::new(Mutex::new(SchemaCache::new())),
      config: Arc::new(config),
    };
    let config = Arc::clone(&db.config);
    db.conn.call(move |conn| Ok(config.apply(conn))).await??;
    Ok(db)
  }

  /// Run `f` against the connection on its own thread.
  async fn call<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&mut Session<'_>) -> Result<T> + Send + 'static,
    T: Send + 'static,
  {
    let cache = Arc::clone(&self.cache);
    let config = Arc::clone(&self.config);
    self
      .conn
      .call(move |conn| {
        let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
        let mut session = Session::new(conn, &mut cache, &config);
        Ok(f(&mut session))
      })
      .await?
  }

  // ─── Writes ────────────────────────────────────────────────────────────────

  pub async fn insert(&self, table: &str, record: Record, opts: WriteOptions) -> Result<WriteSummary> {
    self.insert_all(table, vec![record], opts).await
  }

  pub async fn insert_all(
    &self,
    table: &str,
    records: Vec<Record>,
    opts: WriteOptions,
  ) -> Result<WriteSummary> {
    let table = table.to_owned();
    self.call(move |s| pipeline::write(s, &table, records, &opts)).await
  }

  pub async fn upsert(&self, table: &str, record: Record, opts: WriteOptions) -> Result<WriteSummary> {
    self.upsert_all(table, vec![record], opts).await
  }

  pub async fn upsert_all(
    &self,
    table: &str,
    records: Vec<Record>,
    opts: WriteOptions,
  ) -> Result<WriteSummary> {
    self.insert_all(table, records, WriteOptions { mode: WriteMode::Upsert, ..opts }).await
  }

  // ─── Schema ────────────────────────────────────────────────────────────────

  pub async fn create_table(
    &self,
    name: &str,
    columns: IndexMap<String, ColumnType>,
    opts: CreateOptions,
  ) -> Result<TableSchema> {
    let name = name.to_owned();
    self.call(move |s| schema::create_table(s, &name, &columns, &opts)).await
  }

  pub async fn add_column(
    &self,
    table: &str,
    column: &str,
    ty: ColumnType,
    references: Option<&str>,
  ) -> Result<TableSchema> {
    let (table, column) = (table.to_owned(), column.to_owned());
    let references = references.map(str::to_owned);
    self
      .call(move |s| schema::add_column(s, &table, &column, ty, references.as_deref()))
      .await
  }

  pub async fn add_foreign_keys(
    &self,
    table: &str,
    specs: Vec<ForeignKeySpec>,
  ) -> Result<Vec<ForeignKey>> {
    let table = table.to_owned();
    self.call(move |s| schema::add_foreign_keys(s, &table, &specs)).await
  }

  pub async fn create_index(
    &self,
    table: &str,
    columns: Vec<String>,
    opts: IndexOptions,
  ) -> Result<String> {
    let table = table.to_owned();
    self.call(move |s| schema::create_index(s, &table, &columns, &opts)).await
  }

  pub async fn drop_index(&self, name: &str) -> Result<()> {
    let name = name.to_owned();
    self.call(move |s| schema::drop_index(s, &name)).await
  }

  pub async fn create_view(&self, name: &str, select: &str, replace: bool) -> Result<()> {
    let (name, select) = (name.to_owned(), select.to_owned());
    self.call(move |s| schema::create_view(s, &name, &select, replace)).await
  }

  pub async fn drop_view(&self, name: &str) -> Result<()> {
    let name = name.to_owned();
    self.call(move |s| schema::drop_view(s, &name)).await
  }

  pub async fn drop_table(&self, name: &str) -> Result<()> {
    let name = name.to_owned();
    self.call(move |s| schema::drop_table(s, &name)).await
  }

  // ─── Full-text search ──────────────────────────────────────────────────────

  pub async fn enable_fts(
    &self,
    table: &str,
    columns: Vec<String>,
    opts: FtsOptions,
  ) -> Result<FtsIndex> {
    let table = table.to_owned();
    self.call(move |s| fts::enable(s, &table, &columns, &opts)).await
  }

  pub async fn disable_fts(&self, table: &str) -> Result<()> {
    let table = table.to_owned();
    self.call(move |s| fts::disable(s, &table)).await
  }

  pub async fn populate_fts(&self, table: &str, columns: Vec<String>) -> Result<usize> {
    let table = table.to_owned();
    self.call(move |s| fts::populate(s, &table, &columns)).await
  }

  pub async fn rebuild_fts(&self, table: &str) -> Result<()> {
    let table = table.to_owned();
    self.call(move |s| fts::rebuild(s, &table)).await
  }

  pub async fn optimize(&self, table: &str) -> Result<FtsReport> {
    let table = table.to_owned();
    self.call(move |s| fts::optimize(s, &table)).await
  }

  pub async fn search(&self, table: &str, query: &str, limit: Option<usize>) -> Result<Vec<Record>> {
    let (table, query) = (table.to_owned(), query.to_owned());
    self.call(move |s| fts::search(s.conn, &table, &query, limit)).await
  }

  // ─── Relationships ─────────────────────────────────────────────────────────

  pub async fn many_to_many(
    &self,
    left: &str,
    right: &str,
    name: Option<&str>,
  ) -> Result<ManyToMany> {
    let (left, right) = (left.to_owned(), right.to_owned());
    let name = name.map(str::to_owned);
    self
      .call(move |s| relations::many_to_many(s, &left, &right, name.as_deref()))
      .await
  }

  pub async fn connect(
    &self,
    link: ManyToMany,
    left: Value,
    right: Value,
    extra: Record,
  ) -> Result<()> {
    self.call(move |s| relations::connect(s, &link, left, right, &extra)).await
  }

  pub async fn lookup(&self, table: &str, key: Record, extra: Record) -> Result<PrimaryKeyValue> {
    let table = table.to_owned();
    self.call(move |s| relations::lookup(s, &table, &key, &extra)).await
  }

  pub async fn guess_foreign_key(&self, table: &str, column: &str) -> Result<ForeignKey> {
    let (table, column) = (table.to_owned(), column.to_owned());
    self.call(move |s| relations::guess(s, &table, &column)).await
  }

  // ─── Rows and introspection ────────────────────────────────────────────────

  pub async fn get(&self, table: &str, pk: PrimaryKeyValue) -> Result<Record> {
    let table = table.to_owned();
    self.call(move |s| rows::get(s, &table, &pk)).await
  }

  pub async fn delete(&self, table: &str, pk: PrimaryKeyValue) -> Result<()> {
    let table = table.to_owned();
    self.call(move |s| rows::delete(s, &table, &pk)).await
  }

  pub async fn delete_where(
    &self,
    table: &str,
    condition: Option<&str>,
    params: Vec<Value>,
  ) -> Result<usize> {
    let table = table.to_owned();
    let condition = condition.map(str::to_owned);
    self
      .call(move |s| rows::delete_where(s, &table, condition.as_deref(), &params))
      .await
  }

  pub async fn rows(&self, table: &str) -> Result<Vec<Record>> {
    let table = table.to_owned();
    self.call(move |s| rows::all(s, &table)).await
  }

  pub async fn count(&self, table: &str) -> Result<i64> {
    let table = table.to_owned();
    self
      .call(move |s| {
        rowsmith_core::naming::validate_name(&table)?;
        catalog::count(s.conn, &table)
      })
      .await
  }

  pub async fn table(&self, name: &str) -> Result<Option<TableSchema>> {
    let name = name.to_owned();
    self.call(move |s| s.table(&name)).await
  }

  pub async fn table_names(&self) -> Result<Vec<String>> {
    self.call(|s| catalog::table_names(s.conn)).await
  }
}
