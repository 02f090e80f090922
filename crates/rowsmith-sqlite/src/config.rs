//! Connection-level configuration.

use std::time::Duration;

use rusqlite::Connection;
use serde::Deserialize;

use crate::Result;

/// Bound on bound parameters per statement used to size write batches.
pub const DEFAULT_MAX_VARIABLES: usize = 999;

/// Settings applied once when a connection is opened.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
  /// Let the delete half of a replace re-fire delete triggers. Full-text
  /// shadow tables drift without it.
  pub recursive_triggers: bool,
  pub max_variables:      usize,
  pub foreign_keys:       bool,
  /// e.g. `"wal"`; left untouched when unset.
  pub journal_mode:       Option<String>,
  pub busy_timeout_ms:    Option<u64>,
}

impl Default for DatabaseConfig {
  fn default() -> Self {
    Self {
      recursive_triggers: true,
      max_variables:      DEFAULT_MAX_VARIABLES,
      foreign_keys:       false,
      journal_mode:       None,
      busy_timeout_ms:    None,
    }
  }
}

impl DatabaseConfig {
  pub(crate) fn apply(&self, conn: &Connection) -> Result<()> {
    let on_off = |b: bool| if b { "ON" } else { "OFF" };
    conn.execute_batch(&format!(
      "PRAGMA recursive_triggers = {};\nPRAGMA foreign_keys = {};",
      on_off(self.recursive_triggers),
      on_off(self.foreign_keys),
    ))?;
    if let Some(mode) = &self.journal_mode {
      conn.execute_batch(&format!("PRAGMA journal_mode = {mode};"))?;
    }
    if let Some(ms) = self.busy_timeout_ms {
      conn.busy_timeout(Duration::from_millis(ms))?;
    }
    tracing::debug!(
      recursive_triggers = self.recursive_triggers,
      foreign_keys = self.foreign_keys,
      "connection configured"
    );
    Ok(())
  }
}
