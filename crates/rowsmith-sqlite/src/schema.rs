//! DDL: table creation and reconciliation, foreign-key transforms, indexes,
//! views and drops.

use std::collections::HashMap;

use indexmap::IndexMap;
use rowsmith_core::{
  ColumnType, CreateOptions, ForeignKey, ForeignKeySpec, PrimaryKey, Record,
  TableSchema,
  infer::infer_column_types,
  naming::{quote, quote_list, validate_name, validate_names},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, catalog, encode, fts, relations, session::Session};

// ─── Statements ──────────────────────────────────────────────────────────────

/// One column of a `CREATE TABLE` statement.
#[derive(Debug, Clone)]
pub(crate) struct ColumnDef {
  pub name:       String,
  pub declared:   String,
  pub not_null:   bool,
  /// Rendered SQL, placed verbatim after `DEFAULT`.
  pub default:    Option<String>,
  pub references: Option<(String, String)>,
}

/// A single key is declared inline so an integer key aliases the rowid; a
/// composite key gets a trailing table constraint.
pub(crate) fn create_table_sql(table: &str, columns: &[ColumnDef], pk: &[String]) -> String {
  let inline_pk = match pk {
    [only] => Some(only.as_str()),
    _ => None,
  };

  let mut lines: Vec<String> = columns
    .iter()
    .map(|c| {
      let mut line = format!("   {}", quote(&c.name));
      if !c.declared.is_empty() {
        line.push(' ');
        line.push_str(&c.declared);
      }
      if inline_pk.is_some_and(|p| p.eq_ignore_ascii_case(&c.name)) {
        line.push_str(" PRIMARY KEY");
      }
      if c.not_null {
        line.push_str(" NOT NULL");
      }
      if let Some(default) = &c.default {
        line.push_str(" DEFAULT ");
        line.push_str(default);
      }
      if let Some((table, column)) = &c.references {
        line.push_str(&format!(" REFERENCES {}({})", quote(table), quote(column)));
      }
      line
    })
    .collect();

  if pk.len() > 1 {
    lines.push(format!("   PRIMARY KEY ({})", quote_list(pk)));
  }
  format!("CREATE TABLE {} (\n{}\n)", quote(table), lines.join(",\n"))
}

/// Re-emit a catalog default. Anything other than a plain literal goes back
/// in parentheses, which SQLite requires for expressions.
fn default_clause(raw: &str) -> String {
  const KEYWORDS: [&str; 6] =
    ["NULL", "TRUE", "FALSE", "CURRENT_TIME", "CURRENT_DATE", "CURRENT_TIMESTAMP"];
  let plain = raw.starts_with(['\'', '('])
    || raw.starts_with("X'")
    || raw.starts_with("x'")
    || raw.parse::<f64>().is_ok()
    || KEYWORDS.iter().any(|k| raw.eq_ignore_ascii_case(k));
  if plain { raw.to_owned() } else { format!("({raw})") }
}

fn find_ci<'a, V>(map: &'a IndexMap<String, V>, key: &str) -> Option<&'a V> {
  map.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v)
}

// ─── Tables ──────────────────────────────────────────────────────────────────

pub(crate) fn require_table(s: &mut Session<'_>, name: &str) -> Result<TableSchema> {
  validate_name(name)?;
  s.table(name)?.ok_or_else(|| Error::schema(name, "no such table"))
}

/// Create `name` with the given column types.
///
/// Primary key columns missing from `columns` are added first as integers.
pub(crate) fn create_table(
  s: &mut Session<'_>,
  name: &str,
  columns: &IndexMap<String, ColumnType>,
  opts: &CreateOptions,
) -> Result<TableSchema> {
  validate_name(name)?;
  validate_names(columns.keys().map(String::as_str))?;
  let pk: Vec<String> = opts.pk.as_ref().map(|p| p.columns().to_vec()).unwrap_or_default();
  validate_names(pk.iter().map(String::as_str))?;

  if let Some(existing) = s.table(name)? {
    if opts.if_not_exists {
      return Ok(existing);
    }
    if !opts.replace {
      return Err(Error::schema(name, "table already exists"));
    }
  }

  let mut typed: IndexMap<String, ColumnType> = pk
    .iter()
    .filter(|p| find_ci(columns, p).is_none())
    .map(|p| (p.clone(), ColumnType::Integer))
    .collect();
  typed.extend(columns.iter().map(|(k, v)| (k.clone(), *v)));
  if typed.is_empty() {
    return Err(Error::schema(name, "a table needs at least one column"));
  }

  for column in opts.not_null.iter().chain(opts.defaults.keys()) {
    if find_ci(&typed, column).is_none() {
      return Err(Error::schema(name, format!("column {column:?} is not being created")));
    }
  }

  let mut references: HashMap<String, (String, String)> = HashMap::new();
  for spec in &opts.foreign_keys {
    if find_ci(&typed, &spec.column).is_none() {
      return Err(Error::schema(
        name,
        format!("foreign key column {:?} is not being created", spec.column),
      ));
    }
    let fk = relations::resolve_foreign_key(s, name, spec)?;
    references.insert(spec.column.to_ascii_lowercase(), (fk.other_table, fk.other_column));
  }

  let defs = typed
    .iter()
    .map(|(column, ty)| {
      Ok(ColumnDef {
        name:       column.clone(),
        declared:   ty.to_string(),
        not_null:   opts.not_null.iter().any(|n| n.eq_ignore_ascii_case(column)),
        default:    find_ci(&opts.defaults, column).map(encode::to_literal).transpose()?,
        references: references.get(&column.to_ascii_lowercase()).cloned(),
      })
    })
    .collect::<Result<Vec<_>>>()?;

  let sql = create_table_sql(name, &defs, &pk);
  s.savepoint(|s| {
    if opts.replace && s.table(name)?.is_some() {
      drop_table(s, name)?;
    }
    s.conn.execute_batch(&sql)?;
    s.cache.invalidate(name);
    Ok(())
  })?;
  tracing::info!(table = name, columns = defs.len(), "created table");

  s.table(name)?.ok_or_else(|| Error::schema(name, "table missing after creation"))
}

/// Fail if a requested primary key differs from the one `existing` has.
pub(crate) fn check_pk(existing: &TableSchema, requested: Option<&PrimaryKey>) -> Result<()> {
  match requested {
    Some(pk) if !pk.matches(&existing.primary_key) => Err(Error::schema(
      &existing.name,
      format!(
        "requested primary key {:?} does not match existing key {:?}",
        pk.columns(),
        existing.primary_key
      ),
    )),
    _ => Ok(()),
  }
}

/// Reuse `name` if it exists, otherwise create it from `columns`.
pub(crate) fn ensure_table(
  s: &mut Session<'_>,
  name: &str,
  columns: &IndexMap<String, ColumnType>,
  opts: &CreateOptions,
) -> Result<TableSchema> {
  if let Some(existing) = s.table(name)? {
    check_pk(&existing, opts.pk.as_ref())?;
    return Ok(existing);
  }
  create_table(s, name, columns, opts)
}

/// Make sure `schema` has a column for every field in `records`.
///
/// Without `alter` any missing column is an error naming all of them. With
/// it, each is added with the type inferred over `records`, unless
/// `overrides` names one.
pub(crate) fn reconcile_columns(
  s: &mut Session<'_>,
  schema: TableSchema,
  records: &[&Record],
  alter: bool,
  overrides: &HashMap<String, ColumnType>,
) -> Result<TableSchema> {
  let inferred = infer_column_types(records.iter().copied());

  let mut missing: Vec<(String, ColumnType)> = Vec::new();
  for (name, ty) in inferred {
    if schema.has_column(&name) || missing.iter().any(|(m, _)| m.eq_ignore_ascii_case(&name)) {
      continue;
    }
    let ty = overrides
      .iter()
      .find(|(column, _)| column.eq_ignore_ascii_case(&name))
      .map_or(ty, |(_, ty)| *ty);
    missing.push((name, ty));
  }
  if missing.is_empty() {
    return Ok(schema);
  }

  let names: Vec<&str> = missing.iter().map(|(n, _)| n.as_str()).collect();
  if !alter {
    return Err(Error::schema(
      &schema.name,
      format!("no such column(s): {}", names.join(", ")),
    ));
  }
  validate_names(names.iter().copied())?;

  for (column, ty) in &missing {
    s.conn.execute_batch(&format!(
      "ALTER TABLE {} ADD COLUMN {} {ty}",
      quote(&schema.name),
      quote(column),
    ))?;
  }
  s.cache.invalidate(&schema.name);
  tracing::info!(table = %schema.name, added = ?names, "added columns");

  s.table(&schema.name)?
    .ok_or_else(|| Error::schema(&schema.name, "table missing after alter"))
}

/// Add one column, optionally referencing another table's primary key.
pub(crate) fn add_column(
  s: &mut Session<'_>,
  table: &str,
  column: &str,
  ty: ColumnType,
  references: Option<&str>,
) -> Result<TableSchema> {
  let schema = require_table(s, table)?;
  validate_name(column)?;
  if schema.has_column(column) {
    return Err(Error::schema(&schema.name, format!("column {column:?} already exists")));
  }

  let mut sql = format!("ALTER TABLE {} ADD COLUMN {} {ty}", quote(&schema.name), quote(column));
  if let Some(other) = references {
    let spec = ForeignKeySpec { column: column.to_owned(), other_table: Some(other.to_owned()), other_column: None };
    let fk = relations::resolve_foreign_key(s, &schema.name, &spec)?;
    sql.push_str(&format!(" REFERENCES {}({})", quote(&fk.other_table), quote(&fk.other_column)));
  }

  s.conn.execute_batch(&sql)?;
  s.cache.invalidate(&schema.name);
  tracing::debug!(table = %schema.name, column, "added column");
  s.table(&schema.name)?
    .ok_or_else(|| Error::schema(&schema.name, "table missing after alter"))
}

// ─── Foreign keys ────────────────────────────────────────────────────────────

/// Add foreign keys to existing columns of `table`.
///
/// SQLite cannot alter constraints in place, so the table is rebuilt: a copy
/// is created with the full constraint set, rows are copied across with
/// their rowids, and the copy takes the original's name. Indexes and
/// triggers are recreated from their stored SQL.
pub(crate) fn add_foreign_keys(
  s: &mut Session<'_>,
  table: &str,
  specs: &[ForeignKeySpec],
) -> Result<Vec<ForeignKey>> {
  let schema = require_table(s, table)?;
  let mut all = catalog::foreign_keys(s.conn, &schema.name)?;
  let mut added = Vec::with_capacity(specs.len());

  for spec in specs {
    validate_name(&spec.column)?;
    if !schema.has_column(&spec.column) {
      return Err(Error::schema(&schema.name, format!("no such column: {}", spec.column)));
    }
    if all.iter().any(|fk| fk.column.eq_ignore_ascii_case(&spec.column)) {
      return Err(Error::schema(
        &schema.name,
        format!("column {:?} already has a foreign key", spec.column),
      ));
    }
    let fk = relations::resolve_foreign_key(s, &schema.name, spec)?;
    all.push(fk.clone());
    added.push(fk);
  }

  if added.is_empty() {
    return Ok(added);
  }
  rebuild_with_foreign_keys(s, &schema, &all)?;
  tracing::info!(table = %schema.name, added = added.len(), "added foreign keys");
  Ok(added)
}

fn rebuild_with_foreign_keys(
  s: &mut Session<'_>,
  schema: &TableSchema,
  fks: &[ForeignKey],
) -> Result<()> {
  let dependents = catalog::dependent_sql(s.conn, &schema.name)?;
  let temp = format!("{}_new_{}", schema.name, Uuid::new_v4().simple());

  let defs: Vec<ColumnDef> = schema
    .columns
    .iter()
    .map(|c| ColumnDef {
      name:       c.name.clone(),
      declared:   c.declared_type.clone(),
      not_null:   c.not_null,
      default:    c.default.as_deref().map(default_clause),
      references: fks
        .iter()
        .find(|fk| fk.column.eq_ignore_ascii_case(&c.name))
        .map(|fk| (fk.other_table.clone(), fk.other_column.clone())),
    })
    .collect();

  // An INTEGER PRIMARY KEY column already is the rowid.
  let aliases_rowid = matches!(
    schema.primary_key.as_slice(),
    [pk] if schema.column(pk).is_some_and(|c| c.declared_type.eq_ignore_ascii_case("INTEGER"))
  );
  let names = schema.column_names();
  let copied = if aliases_rowid {
    quote_list(&names)
  } else {
    format!("rowid, {}", quote_list(&names))
  };

  let sql = format!(
    "{create};\nINSERT INTO {temp} ({copied}) SELECT {copied} FROM {old};\nDROP TABLE {old};\nALTER TABLE {temp} RENAME TO {old};",
    create = create_table_sql(&temp, &defs, &schema.primary_key),
    temp = quote(&temp),
    old = quote(&schema.name),
  );

  s.conn.execute_batch("PRAGMA legacy_alter_table = ON")?;
  let outcome = s.savepoint(|s| {
    s.conn.execute_batch(&sql)?;
    for statement in &dependents {
      s.conn.execute_batch(statement)?;
    }
    Ok(())
  });
  s.conn.execute_batch("PRAGMA legacy_alter_table = OFF")?;
  s.cache.invalidate(&schema.name);
  outcome
}

// ─── Indexes ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexOptions {
  /// Defaults to `idx_{table}_{columns}`.
  pub name:          Option<String>,
  pub unique:        bool,
  pub if_not_exists: bool,
}

impl IndexOptions {
  pub fn unique() -> Self { Self { unique: true, ..Self::default() } }
}

/// Create an index and return its name.
pub(crate) fn create_index(
  s: &mut Session<'_>,
  table: &str,
  columns: &[String],
  opts: &IndexOptions,
) -> Result<String> {
  let schema = require_table(s, table)?;
  if columns.is_empty() {
    return Err(Error::schema(&schema.name, "an index needs at least one column"));
  }
  for column in columns {
    validate_name(column)?;
    if !schema.has_column(column) {
      return Err(Error::schema(&schema.name, format!("no such column: {column}")));
    }
  }

  let name = opts
    .name
    .clone()
    .unwrap_or_else(|| format!("idx_{}_{}", schema.name, columns.join("_")));
  validate_name(&name)?;

  let sql = format!(
    "CREATE {}INDEX {}{} ON {} ({})",
    if opts.unique { "UNIQUE " } else { "" },
    if opts.if_not_exists { "IF NOT EXISTS " } else { "" },
    quote(&name),
    quote(&schema.name),
    quote_list(columns),
  );
  s.conn.execute_batch(&sql).map_err(|e| Error::on_write(&schema.name, e))?;
  tracing::debug!(table = %schema.name, index = %name, "created index");
  Ok(name)
}

pub(crate) fn drop_index(s: &mut Session<'_>, name: &str) -> Result<()> {
  validate_name(name)?;
  s.conn.execute_batch(&format!("DROP INDEX {}", quote(name)))?;
  Ok(())
}

// ─── Views ───────────────────────────────────────────────────────────────────

pub(crate) fn create_view(
  s: &mut Session<'_>,
  name: &str,
  select: &str,
  replace: bool,
) -> Result<()> {
  validate_name(name)?;
  if catalog::table_exists(s.conn, name)? {
    return Err(Error::schema(name, "a table with this name exists"));
  }
  s.savepoint(|s| {
    if catalog::view_exists(s.conn, name)? {
      if !replace {
        return Err(Error::schema(name, "view already exists"));
      }
      s.conn.execute_batch(&format!("DROP VIEW {}", quote(name)))?;
    }
    s.conn.execute_batch(&format!("CREATE VIEW {} AS {select}", quote(name)))?;
    Ok(())
  })
}

pub(crate) fn drop_view(s: &mut Session<'_>, name: &str) -> Result<()> {
  validate_name(name)?;
  if !catalog::view_exists(s.conn, name)? {
    return Err(Error::schema(name, "no such view"));
  }
  s.conn.execute_batch(&format!("DROP VIEW {}", quote(name)))?;
  Ok(())
}

// ─── Drops ───────────────────────────────────────────────────────────────────

/// Drop `name` together with its full-text index and any junction table
/// that exists only to link it to another table.
pub(crate) fn drop_table(s: &mut Session<'_>, name: &str) -> Result<()> {
  let schema = require_table(s, name)?;
  let junctions = owned_junctions(s, &schema.name)?;

  s.savepoint(|s| {
    fts::disable(s, &schema.name)?;
    for junction in &junctions {
      s.conn.execute_batch(&format!("DROP TABLE {}", quote(junction)))?;
      s.cache.invalidate(junction);
    }
    s.conn.execute_batch(&format!("DROP TABLE {}", quote(&schema.name)))?;
    s.cache.invalidate(&schema.name);
    Ok(())
  })?;

  tracing::info!(table = %schema.name, junctions = ?junctions, "dropped table");
  Ok(())
}

/// Junction tables `many_to_many` created between `table` and another table.
///
/// A table qualifies only with the generated shape: the sorted-pair name and a
/// key of `{left}_id` plus `{right}_id` (or `{right}_id_2`), each referencing
/// its namesake. Other tables keyed on two foreign keys are left alone.
fn owned_junctions(s: &mut Session<'_>, table: &str) -> Result<Vec<String>> {
  let mut out = Vec::new();
  for name in catalog::table_names(s.conn)? {
    if name.eq_ignore_ascii_case(table) {
      continue;
    }
    let Some(candidate) = s.table(&name)? else { continue };
    let [a, b] = candidate.primary_key.as_slice() else { continue };

    let fks = catalog::foreign_keys(s.conn, &name)?;
    let target = |column: &str| {
      fks.iter().find(|fk| fk.column.eq_ignore_ascii_case(column)).map(|fk| fk.other_table.as_str())
    };
    let (Some(left), Some(right)) = (target(a), target(b)) else { continue };
    if !left.eq_ignore_ascii_case(table) && !right.eq_ignore_ascii_case(table) {
      continue;
    }
    if is_junction_shape(&name, (a.as_str(), left), (b.as_str(), right)) {
      out.push(name);
    }
  }
  Ok(out)
}

fn is_junction_shape(name: &str, (a, left): (&str, &str), (b, right): (&str, &str)) -> bool {
  let mut pair = [left, right];
  pair.sort();
  let right_column = if left.eq_ignore_ascii_case(right) {
    format!("{right}_id_2")
  } else {
    format!("{right}_id")
  };
  name.eq_ignore_ascii_case(&pair.join("_"))
    && a.eq_ignore_ascii_case(&format!("{left}_id"))
    && b.eq_ignore_ascii_case(&right_column)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn def(name: &str, declared: &str) -> ColumnDef {
    ColumnDef {
      name:       name.into(),
      declared:   declared.into(),
      not_null:   false,
      default:    None,
      references: None,
    }
  }

  #[test]
  fn single_key_is_inline() {
    let sql = create_table_sql("dogs", &[def("id", "INTEGER"), def("name", "TEXT")], &["id".into()]);
    assert_eq!(sql, "CREATE TABLE [dogs] (\n   [id] INTEGER PRIMARY KEY,\n   [name] TEXT\n)");
  }

  #[test]
  fn composite_key_is_a_table_constraint() {
    let sql = create_table_sql(
      "dogs_people",
      &[def("dogs_id", "INTEGER"), def("people_id", "INTEGER")],
      &["dogs_id".into(), "people_id".into()],
    );
    assert!(sql.ends_with("   PRIMARY KEY ([dogs_id], [people_id])\n)"));
    assert!(!sql.contains("INTEGER PRIMARY KEY"));
  }

  #[test]
  fn constraints_render_in_order() {
    let mut owner = def("owner_id", "INTEGER");
    owner.not_null = true;
    owner.default = Some("0".into());
    owner.references = Some(("owners".into(), "id".into()));
    let sql = create_table_sql("dogs", &[owner], &[]);
    assert!(sql.contains("[owner_id] INTEGER NOT NULL DEFAULT 0 REFERENCES [owners]([id])"));
  }

  #[test]
  fn expression_defaults_are_parenthesised() {
    assert_eq!(default_clause("'x'"), "'x'");
    assert_eq!(default_clause("-1.5"), "-1.5");
    assert_eq!(default_clause("CURRENT_TIMESTAMP"), "CURRENT_TIMESTAMP");
    assert_eq!(default_clause("datetime('now')"), "(datetime('now'))");
  }
}
