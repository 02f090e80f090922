//! Foreign-key target guessing by naming convention.
//!
//! A pure function of the column name and the known tables: no catalog
//! access, no best-effort fallback. Several plausible targets is an error.

use crate::{
  Error, Result,
  naming::table_candidates,
  schema::{ForeignKey, TableSchema},
};

/// Guess the table and column that `table.column` references.
pub fn guess_foreign_key(
  table: &str,
  column: &str,
  existing: &[TableSchema],
) -> Result<ForeignKey> {
  let candidates = table_candidates(column);
  let mut matches: Vec<&TableSchema> = existing
    .iter()
    .filter(|t| candidates.iter().any(|c| c.eq_ignore_ascii_case(&t.name)))
    .collect();
  matches.dedup_by(|a, b| a.name == b.name);

  let target = match matches.as_slice() {
    [] => {
      return Err(Error::NoForeignKeyTarget { column: column.to_owned() });
    }
    [only] => *only,
    many => {
      return Err(Error::AmbiguousForeignKey {
        column:     column.to_owned(),
        candidates: many.iter().map(|t| t.name.clone()).collect(),
      });
    }
  };

  let [other_column] = target.primary_key.as_slice() else {
    return Err(Error::UnreferenceableTable { table: target.name.clone() });
  };

  Ok(ForeignKey {
    table:        table.to_owned(),
    column:       column.to_owned(),
    other_table:  target.name.clone(),
    other_column: other_column.clone(),
  })
}
