//! Relationships between tables: foreign-key resolution, many-to-many
//! junctions and lookup tables.

use indexmap::IndexMap;
use rowsmith_core::{
  ColumnType, CreateOptions, ForeignKey, ForeignKeySpec, PrimaryKey,
  PrimaryKeyValue, Record, TableSchema, Value, WriteMode, WriteOptions,
  guess::guess_foreign_key,
  naming::{quote, quote_list, validate_name, validate_names},
};
use rusqlite::{OptionalExtension as _, params_from_iter};
use serde::Serialize;

use crate::{
  Error, Result, catalog, conflict, encode, pipeline, rows,
  schema::{self, IndexOptions},
  session::Session,
};

// ─── Foreign keys ────────────────────────────────────────────────────────────

/// Turn a requested foreign key into a concrete one.
///
/// A missing target table is guessed from the column name; a missing
/// target column is the target table's single primary key.
pub(crate) fn resolve_foreign_key(
  s: &mut Session<'_>,
  table: &str,
  spec: &ForeignKeySpec,
) -> Result<ForeignKey> {
  validate_name(&spec.column)?;
  let unresolvable = |e: rowsmith_core::Error| Error::schema(table, e.to_string());

  let Some(other_table) = &spec.other_table else {
    let existing = s.cache.all_tables(s.conn)?;
    let mut fk = guess_foreign_key(table, &spec.column, &existing).map_err(unresolvable)?;
    if let Some(column) = &spec.other_column {
      fk.other_column = column.clone();
    }
    return Ok(fk);
  };

  validate_name(other_table)?;
  let target = s.table(other_table)?.ok_or_else(|| {
    Error::schema(table, format!("referenced table {other_table:?} does not exist"))
  })?;
  let other_column = match &spec.other_column {
    Some(column) => {
      validate_name(column)?;
      if !target.has_column(column) && !column.eq_ignore_ascii_case("rowid") {
        return Err(Error::schema(
          table,
          format!("referenced column {}.{column} does not exist", target.name),
        ));
      }
      column.clone()
    }
    None => match target.primary_key.as_slice() {
      [pk] => pk.clone(),
      _ => {
        return Err(unresolvable(rowsmith_core::Error::UnreferenceableTable {
          table: target.name.clone(),
        }));
      }
    },
  };

  Ok(ForeignKey {
    table: table.to_owned(),
    column: spec.column.clone(),
    other_table: target.name,
    other_column,
  })
}

/// Guess what `table.column` references without changing anything.
pub(crate) fn guess(s: &mut Session<'_>, table: &str, column: &str) -> Result<ForeignKey> {
  validate_names([table, column])?;
  resolve_foreign_key(s, table, &ForeignKeySpec::guess(column))
}

// ─── Many-to-many ────────────────────────────────────────────────────────────

/// A junction table linking two tables by their primary keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManyToMany {
  pub junction: String,
  /// The junction column pointing at the left table.
  pub left:     ForeignKey,
  pub right:    ForeignKey,
}

fn single_pk(schema: &TableSchema) -> Result<&str> {
  match schema.primary_key.as_slice() {
    [pk] => Ok(pk),
    _ => Err(Error::schema(
      &schema.name,
      "a many-to-many link needs a single-column primary key",
    )),
  }
}

/// Ensure a junction table between `left` and `right` exists.
///
/// The junction is named after both tables in sorted order unless `name` is
/// given. Its columns are `{left}_id` and `{right}_id`; linking a table to
/// itself suffixes the second with `_2`.
pub(crate) fn many_to_many(
  s: &mut Session<'_>,
  left: &str,
  right: &str,
  name: Option<&str>,
) -> Result<ManyToMany> {
  let left = schema::require_table(s, left)?;
  let right = schema::require_table(s, right)?;
  let left_pk = single_pk(&left)?.to_owned();
  let right_pk = single_pk(&right)?.to_owned();

  let junction = match name {
    Some(name) => name.to_owned(),
    None => {
      let mut pair = [left.name.as_str(), right.name.as_str()];
      pair.sort();
      pair.join("_")
    }
  };
  validate_name(&junction)?;

  let left_column = format!("{}_id", left.name);
  let right_column = if left.name.eq_ignore_ascii_case(&right.name) {
    format!("{}_id_2", right.name)
  } else {
    format!("{}_id", right.name)
  };

  let link = ManyToMany {
    left:     ForeignKey {
      table:        junction.clone(),
      column:       left_column.clone(),
      other_table:  left.name.clone(),
      other_column: left_pk.clone(),
    },
    right:    ForeignKey {
      table:        junction.clone(),
      column:       right_column.clone(),
      other_table:  right.name.clone(),
      other_column: right_pk.clone(),
    },
    junction: junction.clone(),
  };

  if let Some(existing) = s.table(&junction)? {
    if !existing.has_column(&left_column) || !existing.has_column(&right_column) {
      return Err(Error::schema(
        &existing.name,
        format!("exists but does not link {} and {}", left.name, right.name),
      ));
    }
    return Ok(link);
  }

  let type_of = |t: &TableSchema, pk: &str| {
    t.column(pk).map(|c| c.column_type).unwrap_or(ColumnType::Integer)
  };
  let columns = IndexMap::from([
    (left_column.clone(), type_of(&left, &left_pk)),
    (right_column.clone(), type_of(&right, &right_pk)),
  ]);
  let create = CreateOptions {
    pk: Some(PrimaryKey::new([left_column.clone(), right_column.clone()])),
    foreign_keys: vec![
      ForeignKeySpec::to(left_column, left.name.clone(), left_pk),
      ForeignKeySpec::to(right_column, right.name.clone(), right_pk),
    ],
    ..CreateOptions::default()
  };
  schema::create_table(s, &junction, &columns, &create)?;
  tracing::info!(junction = %junction, left = %left.name, right = %right.name, "created junction table");
  Ok(link)
}

/// Link two existing rows through `link`, with optional extra fields on the
/// junction row. Linking twice leaves a single row.
pub(crate) fn connect(
  s: &mut Session<'_>,
  link: &ManyToMany,
  left: Value,
  right: Value,
  extra: &Record,
) -> Result<()> {
  rows::get(s, &link.left.other_table, &PrimaryKeyValue::Single(left.clone()))?;
  rows::get(s, &link.right.other_table, &PrimaryKeyValue::Single(right.clone()))?;

  let mut record = Record::with_capacity(extra.len() + 2);
  record.insert(link.left.column.clone(), left);
  record.insert(link.right.column.clone(), right);
  record.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));

  let opts = WriteOptions {
    pk: Some(PrimaryKey::new([link.left.column.clone(), link.right.column.clone()])),
    mode: WriteMode::Upsert,
    alter: true,
    ..WriteOptions::default()
  };
  let summary = pipeline::write(s, &link.junction, [record], &opts)?;
  match summary.failed.first() {
    Some(failed) => Err(Error::schema(&link.junction, failed.reason.clone())),
    None => Ok(()),
  }
}

// ─── Lookup tables ───────────────────────────────────────────────────────────

/// Find the row of `table` whose fields equal `key`, inserting it (with
/// `extra`) if absent, and return its primary key.
///
/// The table is created with an integer `id` key on first use. Missing
/// columns are added and a unique index over the key columns is ensured, so
/// repeated lookups of the same key always land on the same row.
pub(crate) fn lookup(
  s: &mut Session<'_>,
  table: &str,
  key: &Record,
  extra: &Record,
) -> Result<PrimaryKeyValue> {
  validate_name(table)?;
  if key.is_empty() {
    return Err(Error::schema(table, "lookup needs at least one key field"));
  }
  validate_names(key.keys().chain(extra.keys()).map(String::as_str))?;
  if let Err(e) = key.iter().chain(extra).try_for_each(|(k, v)| v.check_finite(k)) {
    return Err(e.into());
  }

  let mut merged = key.clone();
  for (k, v) in extra {
    if conflict::field(&merged, k).is_none() {
      merged.insert(k.clone(), v.clone());
    }
  }
  let key_columns: Vec<String> = key.keys().cloned().collect();

  s.savepoint(|s| {
    let existing = match s.table(table)? {
      Some(existing) => existing,
      None => {
        let mut columns = IndexMap::from([("id".to_owned(), ColumnType::Integer)]);
        for (k, ty) in rowsmith_core::infer::infer_column_types([&merged]) {
          if !k.eq_ignore_ascii_case("id") {
            columns.insert(k, ty);
          }
        }
        let create = CreateOptions {
          pk: Some(PrimaryKey::from("id")),
          ..CreateOptions::default()
        };
        schema::create_table(s, table, &columns, &create)?
      }
    };
    let existing =
      schema::reconcile_columns(s, existing, &[&merged], true, &Default::default())?;
    ensure_unique_index(s, &existing.name, &key_columns)?;

    if let Some(found) = find_by(s, &existing, key)? {
      return Ok(found);
    }

    let columns: Vec<String> = merged.keys().cloned().collect();
    for statement in conflict::build(
      &existing.name,
      &existing.primary_key,
      &columns,
      &[&merged],
      WriteMode::Insert,
      &Default::default(),
    )? {
      s.conn
        .execute(&statement.sql, params_from_iter(statement.params.iter()))
        .map_err(|e| Error::on_write(&existing.name, e))?;
    }
    conflict::identity(s.conn, &existing, &merged, true)?
      .ok_or_else(|| Error::schema(&existing.name, "inserted row has no identity"))
  })
}

fn ensure_unique_index(s: &mut Session<'_>, table: &str, columns: &[String]) -> Result<()> {
  let covered = catalog::indexes(s.conn, table)?.into_iter().any(|index| {
    index.unique
      && index.columns.len() == columns.len()
      && columns.iter().all(|c| index.columns.iter().any(|i| i.eq_ignore_ascii_case(c)))
  });
  if covered {
    return Ok(());
  }
  let opts = IndexOptions { unique: true, if_not_exists: true, ..IndexOptions::default() };
  schema::create_index(s, table, columns, &opts)?;
  Ok(())
}

fn find_by(
  s: &mut Session<'_>,
  table: &TableSchema,
  key: &Record,
) -> Result<Option<PrimaryKeyValue>> {
  let pks = table.pks();
  let conditions: Vec<String> = key.keys().map(|k| format!("{} IS ?", quote(k))).collect();
  let sql = format!(
    "SELECT {} FROM {} WHERE {} LIMIT 1",
    quote_list(&pks),
    quote(&table.name),
    conditions.join(" AND "),
  );
  let params = key.values().map(encode::to_sql).collect::<Result<Vec<_>>>()?;

  let values = s
    .conn
    .query_row(&sql, params_from_iter(params.iter()), |row| {
      (0..pks.len()).map(|i| row.get_ref(i).map(encode::from_sql)).collect::<rusqlite::Result<Vec<_>>>()
    })
    .optional()?;

  Ok(values.map(|values| {
    if table.has_explicit_pk() {
      PrimaryKeyValue::from_values(values)
    } else {
      match values.as_slice() {
        [Value::Integer(id)] => PrimaryKeyValue::RowId(*id),
        _ => PrimaryKeyValue::from_values(values),
      }
    }
  }))
}
