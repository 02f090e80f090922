//! The state threaded through every operation: one connection, its schema
//! cache and its configuration.

use rowsmith_core::TableSchema;
use rusqlite::Connection;

use crate::{DatabaseConfig, Result, catalog::SchemaCache};

pub(crate) struct Session<'a> {
  pub conn:   &'a Connection,
  pub cache:  &'a mut SchemaCache,
  pub config: &'a DatabaseConfig,
}

impl<'a> Session<'a> {
  pub fn new(
    conn: &'a Connection,
    cache: &'a mut SchemaCache,
    config: &'a DatabaseConfig,
  ) -> Self {
    Self { conn, cache, config }
  }

  pub fn table(&mut self, name: &str) -> Result<Option<TableSchema>> {
    self.cache.table(self.conn, name)
  }

  /// Run `f` inside a savepoint: released on success, rolled back on error.
  ///
  /// Savepoints nest, so this composes with an enclosing transaction. The
  /// schema cache is dropped on rollback since DDL may have been undone.
  pub fn savepoint<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
    self.conn.execute_batch("SAVEPOINT rowsmith")?;
    let outcome = f(self).and_then(|value| {
      self.conn.execute_batch("RELEASE rowsmith")?;
      Ok(value)
    });
    if outcome.is_err() {
      if let Err(e) = self.conn.execute_batch("ROLLBACK TO rowsmith; RELEASE rowsmith") {
        tracing::warn!(error = %e, "savepoint rollback failed");
      }
      self.cache.clear();
    }
    outcome
  }
}
