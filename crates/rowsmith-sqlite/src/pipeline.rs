//! The write pipeline: chunking, validation, schema evolution and the
//! per-chunk savepoint.
//!
//! Records are pulled from the caller's iterator one chunk at a time, so a
//! stream of any length is written in bounded memory. Each chunk is applied
//! all-or-nothing; earlier chunks stay committed when a later one fails.

use indexmap::IndexMap;
use rowsmith_core::{
  ColumnType, CreateOptions, FailedRecord, ForeignKeySpec, PrimaryKey,
  PrimaryKeyValue, Record, TableSchema, Value, WriteMode, WriteOptions,
  WriteSummary,
  hash::hash_record,
  infer::infer_column_types,
  naming::{quote, validate_name, validate_names},
};
use rusqlite::params_from_iter;

use crate::{Error, Result, conflict, relations, schema, session::Session};

struct ChunkOutcome {
  written: usize,
  last_pk: Option<PrimaryKeyValue>,
}

pub(crate) fn write<I>(
  s: &mut Session<'_>,
  table: &str,
  records: I,
  opts: &WriteOptions,
) -> Result<WriteSummary>
where
  I: IntoIterator<Item = Record>,
{
  validate_options(table, opts)?;
  let existing = s.table(table)?;
  let pk = resolve_pk(existing.as_ref(), opts)?;
  if opts.mode == WriteMode::Upsert && pk.is_empty() {
    return Err(Error::PrimaryKeyRequired { table: table.to_owned() });
  }

  let batch_size = opts.batch_size.max(1);
  let mut records = records.into_iter();
  let mut summary = WriteSummary::default();
  let mut last_pk = None;
  let mut offset = 0;
  let mut first = true;

  loop {
    let chunk: Vec<Record> = records.by_ref().take(batch_size).collect();
    let truncate = first && opts.truncate;
    if chunk.is_empty() && !truncate {
      break;
    }
    first = false;

    let len = chunk.len();
    let mut prepared = Vec::with_capacity(len);
    for (i, record) in chunk.into_iter().enumerate() {
      if let Some(record) = prepare(record, offset + i, &pk, opts, &mut summary.failed)? {
        prepared.push(record);
      }
    }
    offset += len;

    if prepared.is_empty() && !truncate {
      continue;
    }
    let outcome = s.savepoint(|s| write_chunk(s, table, &pk, prepared, opts, truncate))?;
    tracing::debug!(table, written = outcome.written, "chunk committed");
    summary.written += outcome.written;
    if outcome.last_pk.is_some() {
      last_pk = outcome.last_pk;
    }
  }

  if summary.written == 1 {
    summary.last_pk = last_pk;
  }
  if !summary.failed.is_empty() {
    tracing::warn!(table, failed = summary.failed.len(), "records skipped by validation");
  }
  Ok(summary)
}

fn validate_options(table: &str, opts: &WriteOptions) -> Result<()> {
  validate_name(table)?;
  validate_names(
    opts
      .columns
      .keys()
      .chain(opts.conversions.keys())
      .chain(opts.extracts.keys())
      .chain(opts.extracts.values())
      .chain(opts.not_null.iter())
      .chain(opts.defaults.keys())
      .chain(opts.hash_id.iter())
      .chain(opts.foreign_keys.iter().map(|fk| &fk.column))
      .map(String::as_str),
  )?;
  if let Some(pk) = &opts.pk {
    validate_names(pk.columns().iter().map(String::as_str))?;
  }
  for (column, fragment) in &opts.conversions {
    if fragment.matches('?').count() != 1 {
      return Err(Error::schema(
        table,
        format!("conversion for {column:?} must contain exactly one `?`"),
      ));
    }
  }
  Ok(())
}

/// The key the write uses: a hash column, else the requested key, else the
/// existing table's.
fn resolve_pk(existing: Option<&TableSchema>, opts: &WriteOptions) -> Result<Vec<String>> {
  let requested = match &opts.hash_id {
    Some(column) => Some(PrimaryKey::from(column.clone())),
    None => opts.pk.clone(),
  };
  match existing {
    Some(existing) => {
      schema::check_pk(existing, requested.as_ref())?;
      Ok(existing.primary_key.clone())
    }
    None => Ok(requested.map(|pk| pk.columns().to_vec()).unwrap_or_default()),
  }
}

/// Validate one record. Failures are recorded and the record skipped; only
/// an illegal field name aborts the write.
fn prepare(
  record: Record,
  index: usize,
  pk: &[String],
  opts: &WriteOptions,
  failed: &mut Vec<FailedRecord>,
) -> Result<Option<Record>> {
  validate_names(record.keys().map(String::as_str))?;

  if let Err(e) = record.iter().try_for_each(|(k, v)| v.check_finite(k)) {
    failed.push(FailedRecord { index, reason: e.to_string() });
    return Ok(None);
  }

  let record = match &opts.hash_id {
    Some(column) => {
      let hash = hash_record(&record, opts.hash_id_columns.as_deref())?;
      let mut hashed = Record::with_capacity(record.len() + 1);
      hashed.insert(column.clone(), Value::Text(hash));
      hashed.extend(record.into_iter().filter(|(k, _)| !k.eq_ignore_ascii_case(column)));
      hashed
    }
    None => record,
  };

  if opts.mode == WriteMode::Upsert {
    if record.is_empty() {
      failed.push(FailedRecord { index, reason: "empty record".to_owned() });
      return Ok(None);
    }
    if let Some(missing) =
      pk.iter().find(|p| conflict::field(&record, p).is_none_or(Value::is_null))
    {
      failed.push(FailedRecord {
        index,
        reason: format!("missing primary key value for {missing:?}"),
      });
      return Ok(None);
    }
  }
  Ok(Some(record))
}

fn write_chunk(
  s: &mut Session<'_>,
  table: &str,
  pk: &[String],
  mut records: Vec<Record>,
  opts: &WriteOptions,
  truncate: bool,
) -> Result<ChunkOutcome> {
  if truncate && let Some(existing) = s.table(table)? {
    let deleted = s.conn.execute(&format!("DELETE FROM {}", quote(&existing.name)), [])?;
    tracing::debug!(table, deleted, "truncated");
  }
  if records.is_empty() {
    return Ok(ChunkOutcome { written: 0, last_pk: None });
  }

  extract(s, &mut records, opts)?;
  let refs: Vec<&Record> = records.iter().collect();

  let table_schema = match s.table(table)? {
    Some(existing) => existing,
    None => create_from_sample(s, table, pk, &refs, opts)?,
  };
  let table_schema =
    schema::reconcile_columns(s, table_schema, &refs, opts.alter, &opts.columns)?;

  let columns = union_columns(&refs);
  let per_statement = (s.config.max_variables / columns.len().max(1)).max(1);
  let mut changed = 0;
  for batch in refs.chunks(per_statement) {
    let statements =
      conflict::build(&table_schema.name, pk, &columns, batch, opts.mode, &opts.conversions)?;
    for statement in statements {
      let mut prepared = s.conn.prepare_cached(&statement.sql)?;
      changed += prepared
        .execute(params_from_iter(statement.params.iter()))
        .map_err(|e| Error::on_write(&table_schema.name, e))?;
    }
  }

  let last_pk = match refs.as_slice() {
    [only] => conflict::identity(s.conn, &table_schema, only, changed > 0)?,
    _ => None,
  };
  Ok(ChunkOutcome { written: refs.len(), last_pk })
}

/// Field names across `records` in first-seen order, deduplicated without
/// regard to case.
fn union_columns(records: &[&Record]) -> Vec<String> {
  let mut columns: Vec<String> = Vec::new();
  for record in records {
    for key in record.keys() {
      if !columns.iter().any(|c| c.eq_ignore_ascii_case(key)) {
        columns.push(key.clone());
      }
    }
  }
  columns
}

fn create_from_sample(
  s: &mut Session<'_>,
  table: &str,
  pk: &[String],
  records: &[&Record],
  opts: &WriteOptions,
) -> Result<TableSchema> {
  let sample = opts.sample_size.unwrap_or(records.len()).max(1);
  let mut columns = infer_column_types(records.iter().take(sample).copied());

  for (column, ty) in &opts.columns {
    match columns.iter_mut().find(|(c, _)| c.eq_ignore_ascii_case(column)) {
      Some((_, slot)) => *slot = *ty,
      None => {
        columns.insert(column.clone(), *ty);
      }
    }
  }

  let mut foreign_keys = opts.foreign_keys.clone();
  for (column, lookup_table) in &opts.extracts {
    if let Some((_, slot)) = columns.iter_mut().find(|(c, _)| c.eq_ignore_ascii_case(column)) {
      *slot = ColumnType::Integer;
      foreign_keys.push(ForeignKeySpec::to(column.clone(), lookup_table.clone(), "id"));
    }
  }

  let create = CreateOptions {
    pk: (!pk.is_empty()).then(|| PrimaryKey::from(pk.to_vec())),
    not_null: opts.not_null.clone(),
    defaults: opts.defaults.clone(),
    foreign_keys,
    ..CreateOptions::default()
  };
  schema::create_table(s, table, &columns, &create)
}

/// Replace extracted values with the id of their row in the lookup table.
fn extract(s: &mut Session<'_>, records: &mut [Record], opts: &WriteOptions) -> Result<()> {
  if opts.extracts.is_empty() {
    return Ok(());
  }

  let lookup_columns = IndexMap::from([
    ("id".to_owned(), ColumnType::Integer),
    ("value".to_owned(), ColumnType::Text),
  ]);
  let create = CreateOptions { pk: Some(PrimaryKey::from("id")), ..CreateOptions::default() };
  for lookup_table in opts.extracts.values() {
    schema::ensure_table(s, lookup_table, &lookup_columns, &create)?;
  }

  for record in records.iter_mut() {
    for (column, lookup_table) in &opts.extracts {
      let Some((_, value)) = record.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(column))
      else {
        continue;
      };
      if value.is_null() {
        continue;
      }
      let key = Record::from([("value".to_owned(), value.clone())]);
      let id = relations::lookup(s, lookup_table, &key, &Record::new())?;
      *value = id.into_value().unwrap_or(Value::Null);
    }
  }
  Ok(())
}
