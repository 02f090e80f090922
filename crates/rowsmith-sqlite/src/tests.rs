//! Integration tests for `Database` and `AsyncDatabase`.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use rowsmith_core::{
  ColumnType, CreateOptions, ForeignKey, ForeignKeySpec, PrimaryKey,
  PrimaryKeyValue, Record, Value, WriteMode, WriteOptions, record,
};

use crate::{
  AsyncDatabase, Database, DatabaseConfig, Error, FtsOptions, FtsVersion,
  IndexOptions, fts,
};

fn db() -> Database {
  Database::open_in_memory(DatabaseConfig::default()).expect("in-memory database")
}

fn column_types(db: &mut Database, table: &str) -> Vec<(String, ColumnType)> {
  db.columns(table)
    .unwrap()
    .into_iter()
    .map(|c| (c.name, c.column_type))
    .collect()
}

fn typed(columns: &[(&str, ColumnType)]) -> IndexMap<String, ColumnType> {
  columns.iter().map(|(n, t)| ((*n).to_owned(), *t)).collect()
}

fn search_records() -> Vec<Record> {
  vec![
    record! {
      "text" => "tanuki are running tricksters",
      "country" => "Japan",
      "not_searchable" => "foo",
    },
    record! {
      "text" => "racoons are biting trash pandas",
      "country" => "USA",
      "not_searchable" => "bar",
    },
  ]
}

fn fts_options(version: FtsVersion) -> FtsOptions { FtsOptions { version, ..FtsOptions::default() } }

fn cols(names: &[&str]) -> Vec<String> { names.iter().map(|n| (*n).to_owned()).collect() }

// ─── Table creation ──────────────────────────────────────────────────────────

#[test]
fn schema_inferred_from_first_records() {
  let mut db = db();
  db.insert_all("dogs", [record! { "name" => "Lassie", "age" => 5 }], &WriteOptions::default())
    .unwrap();

  assert_eq!(
    column_types(&mut db, "dogs"),
    vec![("name".into(), ColumnType::Text), ("age".into(), ColumnType::Integer)]
  );
  assert!(db.primary_keys("dogs").unwrap().is_empty());
}

#[test]
fn mixed_numbers_promote_to_real_and_strings_to_text() {
  let mut db = db();
  db.insert_all(
    "readings",
    [
      record! { "value" => 1, "label" => 1 },
      record! { "value" => 2.5, "label" => "two" },
    ],
    &WriteOptions::default(),
  )
  .unwrap();

  assert_eq!(
    column_types(&mut db, "readings"),
    vec![("value".into(), ColumnType::Real), ("label".into(), ColumnType::Text)]
  );
}

#[test]
fn null_only_and_nested_fields_become_text() {
  let mut db = db();
  let tags = Value::Array(vec![Value::from("good"), Value::from("boy")]);
  db.insert("dogs", record! { "nickname" => Value::Null, "tags" => tags }, &WriteOptions::default())
    .unwrap();

  assert_eq!(
    column_types(&mut db, "dogs"),
    vec![("nickname".into(), ColumnType::Text), ("tags".into(), ColumnType::Text)]
  );
  let rows = db.rows("dogs").unwrap();
  assert_eq!(rows[0]["tags"], Value::from(r#"["good","boy"]"#));
}

#[test]
fn blobs_round_trip() {
  let mut db = db();
  db.insert("files", record! { "data" => vec![0u8, 159, 146, 150] }, &WriteOptions::default())
    .unwrap();

  assert_eq!(column_types(&mut db, "files"), vec![("data".into(), ColumnType::Blob)]);
  assert_eq!(db.rows("files").unwrap()[0]["data"], Value::Blob(vec![0, 159, 146, 150]));
}

#[test]
fn explicit_create_table_with_constraints() {
  let mut db = db();
  let opts = CreateOptions {
    pk: Some("id".into()),
    not_null: HashSet::from(["name".to_owned()]),
    defaults: IndexMap::from([("score".to_owned(), Value::from(0))]),
    ..CreateOptions::default()
  };
  let schema = db
    .create_table(
      "players",
      &typed(&[("name", ColumnType::Text), ("score", ColumnType::Integer)]),
      &opts,
    )
    .unwrap();

  // The missing key column leads as an integer.
  assert_eq!(schema.column_names(), vec!["id", "name", "score"]);
  assert_eq!(schema.primary_key, vec!["id"]);
  assert!(schema.column("name").unwrap().not_null);
  assert_eq!(schema.column("score").unwrap().default.as_deref(), Some("0"));

  let again = db.create_table("players", &typed(&[("x", ColumnType::Text)]), &opts);
  assert!(matches!(again, Err(Error::Schema { .. })));

  let if_not_exists = CreateOptions { if_not_exists: true, ..opts.clone() };
  db.create_table("players", &typed(&[("x", ColumnType::Text)]), &if_not_exists).unwrap();

  let replace = CreateOptions { replace: true, ..CreateOptions::default() };
  let replaced = db.create_table("players", &typed(&[("x", ColumnType::Text)]), &replace).unwrap();
  assert_eq!(replaced.column_names(), vec!["x"]);
}

#[test]
fn not_null_and_defaults_from_write_options() {
  let mut db = db();
  let opts = WriteOptions {
    not_null: HashSet::from(["name".to_owned()]),
    defaults: IndexMap::from([("score".to_owned(), Value::from(7))]),
    ..WriteOptions::default()
  };
  db.insert("players", record! { "name" => "a", "score" => 1 }, &opts).unwrap();
  db.insert("players", record! { "name" => "b" }, &opts).unwrap();

  let rows = db.query("SELECT score FROM players WHERE name = 'b'", &[]).unwrap();
  assert_eq!(rows[0]["score"], Value::Integer(7));

  let err = db.insert("players", record! { "name" => Value::Null }, &opts).unwrap_err();
  assert!(matches!(err, Error::Constraint { ref table, .. } if table == "players"));
}

#[test]
fn column_type_overrides_win_over_inference() {
  let mut db = db();
  let opts = WriteOptions {
    columns: HashMap::from([("score".to_owned(), ColumnType::Real)]),
    ..WriteOptions::default()
  };
  db.insert("players", record! { "score" => 1 }, &opts).unwrap();
  assert_eq!(column_types(&mut db, "players"), vec![("score".into(), ColumnType::Real)]);
}

// ─── Write modes ─────────────────────────────────────────────────────────────

#[test]
fn upsert_merges_fields_into_existing_row() {
  let mut db = db();
  let opts = WriteOptions::with_pk("id").alter();
  db.upsert_all("dogs", [record! { "id" => 1, "name" => "Rex" }], &opts).unwrap();
  db.upsert_all("dogs", [record! { "id" => 1, "age" => 3 }], &opts).unwrap();

  assert_eq!(
    db.rows("dogs").unwrap(),
    vec![record! { "id" => 1, "name" => "Rex", "age" => 3 }]
  );
}

#[test]
fn upsert_with_new_field_needs_alter() {
  let mut db = db();
  let opts = WriteOptions::with_pk("id");
  db.upsert("dogs", record! { "id" => 1, "name" => "Rex" }, &opts).unwrap();

  let err = db.upsert("dogs", record! { "id" => 1, "age" => 3 }, &opts).unwrap_err();
  assert!(matches!(err, Error::Schema { ref table, .. } if table == "dogs"));
  assert_eq!(db.rows("dogs").unwrap(), vec![record! { "id" => 1, "name" => "Rex" }]);
}

#[test]
fn upsert_twice_leaves_one_row_with_latest_values() {
  let mut db = db();
  let opts = WriteOptions::with_pk("id");
  db.upsert("dogs", record! { "id" => 1, "name" => "Rex", "age" => 1 }, &opts).unwrap();
  db.upsert("dogs", record! { "id" => 1, "name" => "Max" }, &opts).unwrap();
  db.upsert("dogs", record! { "id" => 1, "name" => "Max" }, &opts).unwrap();

  assert_eq!(db.count("dogs").unwrap(), 1);
  assert_eq!(
    db.get("dogs", 1).unwrap(),
    record! { "id" => 1, "name" => "Max", "age" => 1 }
  );
}

#[test]
fn replace_overwrites_the_whole_row() {
  let mut db = db();
  db.insert_all(
    "dogs",
    [record! { "id" => 1, "name" => "A", "age" => 5 }],
    &WriteOptions::with_pk("id"),
  )
  .unwrap();
  db.insert_all(
    "dogs",
    [record! { "id" => 1, "name" => "B" }],
    &WriteOptions::with_pk("id").mode(WriteMode::Replace),
  )
  .unwrap();

  assert_eq!(
    db.rows("dogs").unwrap(),
    vec![record! { "id" => 1, "name" => "B", "age" => Value::Null }]
  );
}

#[test]
fn strict_insert_collision_is_a_constraint_error() {
  let mut db = db();
  let opts = WriteOptions::with_pk("id");
  db.insert("dogs", record! { "id" => 1, "name" => "Rex" }, &opts).unwrap();

  let err = db.insert("dogs", record! { "id" => 1, "name" => "Max" }, &opts).unwrap_err();
  assert!(matches!(err, Error::Constraint { ref table, .. } if table == "dogs"));
  assert_eq!(db.get("dogs", 1).unwrap()["name"], Value::from("Rex"));
}

#[test]
fn ignore_leaves_existing_row_untouched() {
  let mut db = db();
  db.insert("dogs", record! { "id" => 1, "name" => "Rex" }, &WriteOptions::with_pk("id"))
    .unwrap();
  let summary = db
    .insert(
      "dogs",
      record! { "id" => 1, "name" => "Max" },
      &WriteOptions::with_pk("id").mode(WriteMode::Ignore),
    )
    .unwrap();

  assert_eq!(summary.written, 1);
  assert_eq!(db.get("dogs", 1).unwrap()["name"], Value::from("Rex"));
}

#[test]
fn upsert_without_primary_key_fails_before_writing() {
  let mut db = db();
  let err = db.upsert("dogs", record! { "name" => "Rex" }, &WriteOptions::default()).unwrap_err();
  assert!(matches!(err, Error::PrimaryKeyRequired { ref table } if table == "dogs"));
  assert!(!db.table_exists("dogs").unwrap());

  db.insert("cats", record! { "name" => "Tom" }, &WriteOptions::default()).unwrap();
  let err = db.upsert("cats", record! { "name" => "Tom" }, &WriteOptions::default()).unwrap_err();
  assert!(matches!(err, Error::PrimaryKeyRequired { .. }));
}

#[test]
fn upsert_records_missing_their_key_are_reported() {
  let mut db = db();
  let summary = db
    .upsert_all(
      "dogs",
      [record! { "id" => 1, "name" => "Rex" }, record! { "name" => "Stray" }],
      &WriteOptions::with_pk("id"),
    )
    .unwrap();

  assert_eq!(summary.written, 1);
  assert_eq!(summary.failed.len(), 1);
  assert_eq!(summary.failed[0].index, 1);
  assert_eq!(db.count("dogs").unwrap(), 1);
}

#[test]
fn non_finite_reals_are_reported_not_written() {
  let mut db = db();
  let summary = db
    .insert_all(
      "readings",
      [record! { "value" => 1.5 }, record! { "value" => f64::INFINITY }],
      &WriteOptions::default(),
    )
    .unwrap();
  assert_eq!(summary.written, 1);
  assert_eq!(summary.failed[0].index, 1);
}

#[test]
fn conflicting_primary_key_is_a_schema_error() {
  let mut db = db();
  db.insert("dogs", record! { "id" => 1, "name" => "Rex" }, &WriteOptions::with_pk("id"))
    .unwrap();
  let err = db
    .insert("dogs", record! { "id" => 2, "name" => "Max" }, &WriteOptions::with_pk("name"))
    .unwrap_err();
  assert!(matches!(err, Error::Schema { .. }));
}

// ─── Identity ────────────────────────────────────────────────────────────────

#[test]
fn last_pk_after_single_record_writes() {
  let mut db = db();
  let summary = db.insert("things", record! { "a" => 1 }, &WriteOptions::default()).unwrap();
  assert_eq!(summary.last_pk, Some(PrimaryKeyValue::RowId(1)));

  let summary = db
    .insert("dogs", record! { "id" => 5, "name" => "Rex" }, &WriteOptions::with_pk("id"))
    .unwrap();
  assert_eq!(summary.last_pk, Some(PrimaryKeyValue::Single(Value::Integer(5))));

  let summary = db
    .insert("pairs", record! { "a" => 1, "b" => "x", "c" => 3 }, &WriteOptions::with_pk(["a", "b"]))
    .unwrap();
  assert_eq!(
    summary.last_pk,
    Some(PrimaryKeyValue::Composite(vec![Value::Integer(1), Value::from("x")]))
  );
}

#[test]
fn last_pk_is_engine_assigned_when_key_is_omitted() {
  let mut db = db();
  let summary =
    db.insert("dogs", record! { "name" => "Rex" }, &WriteOptions::with_pk("id")).unwrap();
  assert_eq!(summary.last_pk, Some(PrimaryKeyValue::Single(Value::Integer(1))));
}

#[test]
fn last_pk_names_the_existing_row_when_an_insert_is_ignored() {
  let mut db = db();
  db.insert("tags", record! { "name" => "a" }, &WriteOptions::default()).unwrap();
  db.create_index("tags", &["name"], &IndexOptions::unique()).unwrap();
  db.insert("tags", record! { "name" => "b" }, &WriteOptions::default()).unwrap();

  let ignore = WriteOptions::default().mode(WriteMode::Ignore);
  let summary = db.insert("tags", record! { "name" => "a" }, &ignore).unwrap();
  assert_eq!(summary.last_pk, Some(PrimaryKeyValue::RowId(1)));
  assert_eq!(db.count("tags").unwrap(), 2);

  let keyed = WriteOptions::with_pk("id");
  db.insert("dogs", record! { "id" => 4, "name" => "Rex" }, &keyed).unwrap();
  db.insert("dogs", record! { "id" => 5, "name" => "Max" }, &keyed).unwrap();
  let summary = db
    .insert("dogs", record! { "id" => 4, "name" => "Fido" }, &keyed.clone().mode(WriteMode::Ignore))
    .unwrap();
  assert_eq!(summary.last_pk, Some(PrimaryKeyValue::Single(Value::Integer(4))));
  assert_eq!(db.get("dogs", 4).unwrap()["name"], Value::from("Rex"));
}

#[test]
fn last_pk_is_absent_after_multi_record_writes() {
  let mut db = db();
  let summary = db
    .insert_all("things", [record! { "a" => 1 }, record! { "a" => 2 }], &WriteOptions::default())
    .unwrap();
  assert_eq!(summary.written, 2);
  assert_eq!(summary.last_pk, None);
}

// ─── Schema evolution ────────────────────────────────────────────────────────

#[test]
fn unknown_column_without_alter_fails() {
  let mut db = db();
  let opts = WriteOptions::with_pk("id");
  db.insert("dogs", record! { "id" => 1, "name" => "Rex" }, &opts).unwrap();

  let err = db.insert("dogs", record! { "id" => 2, "name" => "Max", "age" => 3 }, &opts).unwrap_err();
  match err {
    Error::Schema { table, message } => {
      assert_eq!(table, "dogs");
      assert!(message.contains("age"));
    }
    other => panic!("expected schema error, got {other:?}"),
  }
  assert_eq!(db.count("dogs").unwrap(), 1);
}

#[test]
fn alter_adds_exactly_one_nullable_column() {
  let mut db = db();
  let opts = WriteOptions::with_pk("id").alter();
  db.insert_all(
    "dogs",
    [record! { "id" => 1, "name" => "Rex" }, record! { "id" => 2, "name" => "Max" }],
    &opts,
  )
  .unwrap();
  let before = db.rows("dogs").unwrap();

  db.insert("dogs", record! { "id" => 3, "name" => "Fido", "age" => 4 }, &opts).unwrap();

  let columns = db.columns("dogs").unwrap();
  assert_eq!(columns.len(), 3);
  let age = &columns[2];
  assert_eq!((age.name.as_str(), age.column_type), ("age", ColumnType::Integer));
  assert!(!age.not_null);
  assert_eq!(age.default, None);

  let after = db.rows("dogs").unwrap();
  for (old, new) in before.iter().zip(&after) {
    assert_eq!(old["id"], new["id"]);
    assert_eq!(old["name"], new["name"]);
    assert_eq!(new["age"], Value::Null);
  }
}

#[test]
fn column_overrides_apply_to_altered_columns_regardless_of_case() {
  let mut db = db();
  db.insert("dogs", record! { "id" => 1, "name" => "Rex" }, &WriteOptions::with_pk("id"))
    .unwrap();

  let opts = WriteOptions {
    columns: HashMap::from([("Age".to_owned(), ColumnType::Text)]),
    ..WriteOptions::with_pk("id").alter()
  };
  db.insert("dogs", record! { "id" => 2, "age" => 3 }, &opts).unwrap();

  assert_eq!(
    column_types(&mut db, "dogs"),
    vec![
      ("id".to_owned(), ColumnType::Integer),
      ("name".to_owned(), ColumnType::Text),
      ("age".to_owned(), ColumnType::Text),
    ]
  );
}

#[test]
fn truncate_clears_rows_before_writing() {
  let mut db = db();
  db.insert_all(
    "dogs",
    (1..=3).map(|i| record! { "id" => i }),
    &WriteOptions::with_pk("id"),
  )
  .unwrap();

  let opts = WriteOptions { truncate: true, ..WriteOptions::with_pk("id") };
  db.insert_all("dogs", [record! { "id" => 9 }], &opts).unwrap();

  assert_eq!(db.rows("dogs").unwrap(), vec![record! { "id" => 9 }]);
}

#[test]
fn add_column_with_reference() {
  let mut db = db();
  db.insert("authors", record! { "id" => 1, "name" => "Ada" }, &WriteOptions::with_pk("id"))
    .unwrap();
  db.insert("books", record! { "title" => "Notes" }, &WriteOptions::default()).unwrap();

  let schema = db.add_column("books", "editor_id", ColumnType::Integer, Some("authors")).unwrap();
  assert!(schema.has_column("editor_id"));
  assert_eq!(
    db.foreign_keys("books").unwrap(),
    vec![ForeignKey {
      table:        "books".into(),
      column:       "editor_id".into(),
      other_table:  "authors".into(),
      other_column: "id".into(),
    }]
  );

  let err = db.add_column("books", "title", ColumnType::Text, None).unwrap_err();
  assert!(matches!(err, Error::Schema { .. }));
}

// ─── Batching and transactions ───────────────────────────────────────────────

#[test]
fn wide_records_stay_under_the_variable_limit() {
  let mut db = db();
  let records = (0..1000).map(|i| {
    (0..50)
      .map(|c| (format!("c{c}"), Value::Integer(i * 50 + c)))
      .collect::<Record>()
  });
  let summary = db.insert_all("wide", records, &WriteOptions::default().batch_size(100)).unwrap();

  assert_eq!(summary.written, 1000);
  assert_eq!(db.count("wide").unwrap(), 1000);
  assert_eq!(db.columns("wide").unwrap().len(), 50);
}

#[test]
fn lazy_sequences_are_written_in_chunks() {
  let mut db = db();
  let records = (0..250).map(|i| record! { "n" => i });
  let summary = db.insert_all("numbers", records, &WriteOptions::default().batch_size(100)).unwrap();
  assert_eq!(summary.written, 250);
  assert_eq!(db.count("numbers").unwrap(), 250);
}

#[test]
fn earlier_chunks_stay_committed_when_a_later_one_fails() {
  let mut db = db();
  let records = [1, 2, 3, 3].map(|id| record! { "id" => id, "name" => "dog" });
  let err = db
    .insert_all("dogs", records, &WriteOptions::with_pk("id").batch_size(2))
    .unwrap_err();

  assert!(matches!(err, Error::Constraint { .. }));
  assert_eq!(db.count("dogs").unwrap(), 2);
}

#[test]
fn atomic_rolls_back_every_chunk() {
  let mut db = db();
  let records = [1, 2, 3, 3].map(|id| record! { "id" => id, "name" => "dog" });
  let result = db.atomic(|db| {
    db.insert_all("dogs", records, &WriteOptions::with_pk("id").batch_size(2))
  });

  assert!(result.is_err());
  assert!(!db.table_exists("dogs").unwrap());

  // The connection is usable afterwards and the cache was not left stale.
  db.insert("dogs", record! { "id" => 1 }, &WriteOptions::with_pk("id")).unwrap();
  assert_eq!(db.count("dogs").unwrap(), 1);
}

// ─── Names ───────────────────────────────────────────────────────────────────

#[test]
fn square_brackets_are_rejected() {
  let mut db = db();
  let err = db.insert("bad[table", record! { "a" => 1 }, &WriteOptions::default()).unwrap_err();
  assert!(matches!(err, Error::Core(rowsmith_core::Error::Name { .. })));

  let err = db.insert("good", record! { "bad]column" => 1 }, &WriteOptions::default()).unwrap_err();
  assert!(matches!(err, Error::Core(rowsmith_core::Error::Name { .. })));
  assert!(db.table_names().unwrap().is_empty());
}

#[test]
fn awkward_names_are_quoted() {
  let mut db = db();
  db.insert(
    "http://example.com",
    record! { "column with spaces" => "x", "select" => 1 },
    &WriteOptions::default(),
  )
  .unwrap();
  assert_eq!(db.table_names().unwrap(), vec!["http://example.com"]);
  assert_eq!(
    db.rows("http://example.com").unwrap(),
    vec![record! { "column with spaces" => "x", "select" => 1 }]
  );
}

// ─── Full-text search ────────────────────────────────────────────────────────

#[test]
fn enable_fts4_creates_shadow_tables_and_searches() {
  let mut db = db();
  db.insert_all("searchable", search_records(), &WriteOptions::default()).unwrap();
  assert_eq!(db.table_names().unwrap(), vec!["searchable"]);

  db.enable_fts("searchable", &["text", "country"], &fts_options(FtsVersion::Fts4)).unwrap();
  assert_eq!(
    db.table_names().unwrap(),
    vec![
      "searchable",
      "searchable_fts",
      "searchable_fts_segments",
      "searchable_fts_segdir",
      "searchable_fts_docsize",
      "searchable_fts_stat",
    ]
  );
  assert_eq!(db.search("searchable", "tanuki", None).unwrap(), vec![search_records()[0].clone()]);
  assert_eq!(db.search("searchable", "usa", None).unwrap(), vec![search_records()[1].clone()]);
  assert!(db.search("searchable", "bar", None).unwrap().is_empty());
}

#[test]
fn enable_fts_escapes_table_names() {
  let mut db = db();
  db.insert_all("http://example.com", search_records(), &WriteOptions::default()).unwrap();
  db.enable_fts("http://example.com", &["text", "country"], &fts_options(FtsVersion::Fts4)).unwrap();

  assert_eq!(
    db.search("http://example.com", "tanuki", None).unwrap(),
    vec![search_records()[0].clone()]
  );
}

#[test]
fn enable_fts5_on_column_with_spaces() {
  let mut db = db();
  db.insert("test", record! { "column with spaces" => "in its name" }, &WriteOptions::default())
    .unwrap();
  db.enable_fts("test", &["column with spaces"], &FtsOptions::default()).unwrap();

  assert_eq!(
    db.table_names().unwrap(),
    vec!["test", "test_fts", "test_fts_data", "test_fts_idx", "test_fts_docsize", "test_fts_config"]
  );
  assert_eq!(db.search("test", "name", Some(1)).unwrap().len(), 1);
}

#[test]
fn enabling_twice_needs_replace() {
  let mut db = db();
  db.insert_all("searchable", search_records(), &WriteOptions::default()).unwrap();
  db.enable_fts("searchable", &["text"], &FtsOptions::default()).unwrap();

  let err = db.enable_fts("searchable", &["text"], &FtsOptions::default()).unwrap_err();
  assert!(matches!(err, Error::Schema { .. }));

  let replace = FtsOptions { replace: true, ..FtsOptions::default() };
  db.enable_fts("searchable", &["text", "country"], &replace).unwrap();
  assert_eq!(db.search("searchable", "usa", None).unwrap().len(), 1);
}

#[test]
fn populate_indexes_rows_written_without_triggers() {
  let mut db = db();
  let records = search_records();
  db.insert("populatable", records[0].clone(), &WriteOptions::default()).unwrap();
  let opts = FtsOptions { create_triggers: false, ..fts_options(FtsVersion::Fts4) };
  db.enable_fts("populatable", &["text", "country"], &opts).unwrap();
  assert!(db.search("populatable", "trash pandas", None).unwrap().is_empty());

  db.insert("populatable", records[1].clone(), &WriteOptions::default()).unwrap();
  assert!(db.search("populatable", "trash pandas", None).unwrap().is_empty());

  assert_eq!(db.populate_fts("populatable", &["text", "country"]).unwrap(), 1);
  assert_eq!(db.search("populatable", "usa", None).unwrap(), vec![records[1].clone()]);
  // Already indexed rows are not indexed twice.
  assert_eq!(db.populate_fts("populatable", &[]).unwrap(), 0);
}

#[test]
fn porter_tokenizer_stems() {
  let mut db = db();
  for version in [FtsVersion::Fts4, FtsVersion::Fts5] {
    let table = format!("searchable_{version}");
    db.insert_all(&table, search_records(), &WriteOptions::default()).unwrap();

    db.enable_fts(&table, &["text", "country"], &fts_options(version)).unwrap();
    assert!(db.search(&table, "bite", None).unwrap().is_empty());

    db.disable_fts(&table).unwrap();
    let porter = FtsOptions { tokenize: Some("porter".into()), ..fts_options(version) };
    db.enable_fts(&table, &["text", "country"], &porter).unwrap();
    assert_eq!(db.search(&table, "bite", None).unwrap(), vec![search_records()[1].clone()]);
  }
}

#[test]
fn optimize_accepts_source_or_index_table() {
  let mut db = db();
  for version in [FtsVersion::Fts4, FtsVersion::Fts5] {
    let table = format!("searchable_{version}");
    db.insert_all(&table, search_records(), &WriteOptions::default()).unwrap();
    db.enable_fts(&table, &["text", "country"], &fts_options(version)).unwrap();
  }
  for table in ["searchable_FTS4", "searchable_FTS5", "searchable_FTS4_fts", "searchable_FTS5_fts"] {
    let report = db.optimize(table).unwrap();
    assert_eq!(report.source_rows, 2);
    assert_eq!(report.documents, 2);
  }
}

#[test]
fn triggers_keep_the_index_in_step() {
  let mut db = db();
  let records = search_records();
  db.insert("searchable", records[0].clone(), &WriteOptions::default()).unwrap();
  db.enable_fts("searchable", &["text", "country"], &fts_options(FtsVersion::Fts4)).unwrap();
  assert_eq!(db.search("searchable", "tanuki", None).unwrap(), vec![records[0].clone()]);

  db.insert("searchable", records[1].clone(), &WriteOptions::default()).unwrap();
  assert_eq!(db.search("searchable", "usa", None).unwrap(), vec![records[1].clone()]);

  db.connection()
    .execute("UPDATE searchable SET country = 'Canada' WHERE country = 'USA'", [])
    .unwrap();
  assert!(db.search("searchable", "usa", None).unwrap().is_empty());
  assert_eq!(db.search("searchable", "canada", None).unwrap().len(), 1);
}

#[test]
fn disable_removes_index_and_triggers() {
  for create_triggers in [true, false] {
    let mut db = db();
    db.insert("searchable", search_records()[0].clone(), &WriteOptions::default()).unwrap();
    let opts = FtsOptions { create_triggers, ..FtsOptions::default() };
    db.enable_fts("searchable", &["text", "country"], &opts).unwrap();

    let triggers: HashSet<String> =
      db.triggers(None).unwrap().into_iter().map(|t| t.name).collect();
    let expected: HashSet<String> = if create_triggers {
      ["searchable_ai", "searchable_ad", "searchable_au"].map(String::from).into()
    } else {
      HashSet::new()
    };
    assert_eq!(triggers, expected);

    db.disable_fts("searchable").unwrap();
    assert!(db.triggers(None).unwrap().is_empty());
    assert_eq!(db.table_names().unwrap(), vec!["searchable"]);
  }
}

#[test]
fn rebuild_repairs_a_damaged_index() {
  for table_to_fix in ["searchable", "searchable_fts"] {
    let mut db = db();
    let record = search_records()[0].clone();
    db.insert("searchable", record.clone(), &WriteOptions::default()).unwrap();
    db.enable_fts("searchable", &["text", "country"], &FtsOptions::default()).unwrap();
    assert_eq!(db.search("searchable", "tanuki", None).unwrap(), vec![record.clone()]);

    db.delete_where("searchable_fts_data", None, &[]).unwrap();
    assert!(db.search("searchable", "tanuki", None).is_err());

    db.rebuild_fts(table_to_fix).unwrap();
    assert_eq!(db.search("searchable", "tanuki", None).unwrap(), vec![record]);
  }
}

#[test]
fn rebuild_without_an_index_is_a_schema_error() {
  let mut db = db();
  db.insert("not_searchable", record! { "foo" => "bar" }, &WriteOptions::default()).unwrap();
  for table in ["does_not_exist", "not_searchable"] {
    assert!(matches!(db.rebuild_fts(table), Err(Error::Schema { .. })));
  }
}

#[test]
fn deleting_a_row_removes_its_document() {
  let mut db = db();
  db.insert_all(
    "dogs",
    ["Rex", "Max", "Fido"].map(|n| record! { "name" => n }),
    &WriteOptions::default(),
  )
  .unwrap();
  let index = db.enable_fts("dogs", &["name"], &FtsOptions::default()).unwrap();
  assert_eq!(fts::document_count(db.connection(), &index).unwrap(), 3);

  db.delete("dogs", PrimaryKeyValue::RowId(2)).unwrap();

  assert_eq!(fts::document_count(db.connection(), &index).unwrap(), 2);
  assert_eq!(db.count("dogs").unwrap(), 2);
  assert_eq!(fts::orphaned_documents(db.connection(), &index).unwrap(), 0);
  assert!(db.search("dogs", "max", None).unwrap().is_empty());
}

fn licenses() -> Vec<Record> {
  vec![
    record! { "key" => "apache2", "name" => "Apache 2" },
    record! { "key" => "bsd", "name" => "BSD" },
  ]
}

#[test]
fn replaces_upserts_and_deletes_keep_index_consistent() {
  for version in [FtsVersion::Fts4, FtsVersion::Fts5] {
    let mut db = db();
    let opts = WriteOptions::with_pk("key").mode(WriteMode::Replace);
    db.insert_all("licenses", licenses(), &opts).unwrap();
    let index = db.enable_fts("licenses", &["name"], &fts_options(version)).unwrap();

    db.insert_all("licenses", licenses(), &opts).unwrap();
    db.insert_all("licenses", licenses(), &opts).unwrap();
    db.upsert("licenses", record! { "key" => "apache2", "name" => "Apache License" }, &opts)
      .unwrap();
    db.delete("licenses", "bsd").unwrap();
    db.insert("licenses", record! { "key" => "mit", "name" => "MIT" }, &opts).unwrap();
    assert_eq!(fts::orphaned_documents(db.connection(), &index).unwrap(), 0, "{version:?}");
    assert_eq!(db.search("licenses", "license", None).unwrap().len(), 1, "{version:?}");
    assert!(db.search("licenses", "bsd", None).unwrap().is_empty(), "{version:?}");

    let report = db.optimize("licenses").unwrap();
    assert_eq!(report.source_rows, 2);
    assert_eq!(report.documents, report.source_rows);
    assert_eq!(report.orphans_reclaimed, 0);
  }
}

#[test]
fn drift_without_recursive_triggers_is_reclaimed() {
  for version in [FtsVersion::Fts4, FtsVersion::Fts5] {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig { recursive_triggers: false, ..DatabaseConfig::default() };
    let mut db = Database::open(dir.path().join("test.db"), config).unwrap();

    let opts = WriteOptions::with_pk("key").mode(WriteMode::Replace);
    db.insert_all("licenses", licenses(), &opts).unwrap();
    db.enable_fts("licenses", &["name"], &fts_options(version)).unwrap();
    assert_eq!(db.count("licenses_fts_docsize").unwrap(), 2);

    // The delete half of each replace never reaches the index.
    db.insert_all("licenses", licenses(), &opts).unwrap();
    assert_eq!(db.count("licenses_fts_docsize").unwrap(), 4);

    let report = db.optimize("licenses_fts").unwrap();
    assert_eq!(report.orphans_reclaimed, 2);
    assert_eq!(report.documents, 2);
    assert_eq!(db.count("licenses_fts_docsize").unwrap(), 2);
  }
}

#[test]
fn rebuild_removes_junk_bookkeeping_rows() {
  let dir = tempfile::tempdir().unwrap();
  let config = DatabaseConfig { recursive_triggers: false, ..DatabaseConfig::default() };
  let mut db = Database::open(dir.path().join("test.db"), config).unwrap();

  let opts = WriteOptions::with_pk("key").mode(WriteMode::Replace);
  db.insert_all("licenses", licenses(), &opts).unwrap();
  db.enable_fts("licenses", &["name"], &FtsOptions::default()).unwrap();
  db.insert_all("licenses", licenses(), &opts).unwrap();
  assert_eq!(db.count("licenses_fts_docsize").unwrap(), 4);

  db.rebuild_fts("licenses_fts").unwrap();
  assert_eq!(db.count("licenses_fts_docsize").unwrap(), 2);
}

#[test]
fn detect_reports_version() {
  let mut db = db();
  db.insert_all("searchable", search_records(), &WriteOptions::default()).unwrap();
  assert_eq!(db.detect_fts("searchable").unwrap(), None);

  db.enable_fts("searchable", &["text"], &fts_options(FtsVersion::Fts4)).unwrap();
  let index = db.detect_fts("searchable").unwrap().unwrap();
  assert_eq!(index.name, "searchable_fts");
  assert_eq!(index.version, FtsVersion::Fts4);
}

// ─── Foreign keys ────────────────────────────────────────────────────────────

fn authors_and_books(db: &mut Database) {
  db.insert_all(
    "authors",
    [record! { "id" => 1, "name" => "Ada" }, record! { "id" => 2, "name" => "Grace" }],
    &WriteOptions::with_pk("id"),
  )
  .unwrap();
  db.insert_all(
    "books",
    [
      record! { "title" => "Notes", "author_id" => 1 },
      record! { "title" => "Compilers", "author_id" => 2 },
    ],
    &WriteOptions::default(),
  )
  .unwrap();
}

#[test]
fn guesses_target_from_plural_table_name() {
  let mut db = db();
  authors_and_books(&mut db);
  assert_eq!(
    db.guess_foreign_key("books", "author_id").unwrap(),
    ForeignKey {
      table:        "books".into(),
      column:       "author_id".into(),
      other_table:  "authors".into(),
      other_column: "id".into(),
    }
  );
}

#[test]
fn ambiguous_or_missing_guess_is_a_schema_error() {
  let mut db = db();
  authors_and_books(&mut db);
  db.insert("author", record! { "id" => 1 }, &WriteOptions::with_pk("id")).unwrap();

  assert!(matches!(db.guess_foreign_key("books", "author_id"), Err(Error::Schema { .. })));
  assert!(matches!(db.guess_foreign_key("books", "publisher_id"), Err(Error::Schema { .. })));
}

#[test]
fn add_foreign_key_preserves_rows_indexes_and_triggers() {
  let mut db = db();
  authors_and_books(&mut db);
  db.create_index("books", &["title"], &IndexOptions::default()).unwrap();
  db.enable_fts("books", &["title"], &FtsOptions::default()).unwrap();
  let before = db.query("SELECT rowid, * FROM books ORDER BY rowid", &[]).unwrap();

  let fk = db.add_foreign_key("books", "author_id", None, None).unwrap();
  assert_eq!(fk.other_table, "authors");
  assert_eq!(db.foreign_keys("books").unwrap(), vec![fk]);

  let after = db.query("SELECT rowid, * FROM books ORDER BY rowid", &[]).unwrap();
  assert_eq!(before, after);
  assert!(db.indexes("books").unwrap().iter().any(|i| i.name == "idx_books_title"));
  assert_eq!(db.triggers(Some("books")).unwrap().len(), 3);
  assert_eq!(db.table_names().unwrap().iter().filter(|n| n.contains("_new_")).count(), 0);

  // Triggers still fire after the rebuild.
  db.insert("books", record! { "title" => "Algorithms", "author_id" => 1 }, &WriteOptions::default())
    .unwrap();
  assert_eq!(db.search("books", "algorithms", None).unwrap().len(), 1);

  let again = db.add_foreign_key("books", "author_id", None, None);
  assert!(matches!(again, Err(Error::Schema { .. })));
}

#[test]
fn create_table_with_guessed_foreign_key() {
  let mut db = db();
  authors_and_books(&mut db);
  let opts = CreateOptions {
    pk: Some("id".into()),
    foreign_keys: vec![ForeignKeySpec::guess("author_id")],
    ..CreateOptions::default()
  };
  db.create_table(
    "essays",
    &typed(&[("id", ColumnType::Integer), ("author_id", ColumnType::Integer)]),
    &opts,
  )
  .unwrap();

  let fks = db.foreign_keys("essays").unwrap();
  assert_eq!(fks.len(), 1);
  assert_eq!((fks[0].other_table.as_str(), fks[0].other_column.as_str()), ("authors", "id"));
}

// ─── Many-to-many ────────────────────────────────────────────────────────────

fn dogs_and_humans(db: &mut Database) {
  db.insert_all(
    "dogs",
    [record! { "id" => 1, "name" => "Rex" }, record! { "id" => 2, "name" => "Max" }],
    &WriteOptions::with_pk("id"),
  )
  .unwrap();
  db.insert("humans", record! { "id" => 1, "name" => "Natalie" }, &WriteOptions::with_pk("id"))
    .unwrap();
}

#[test]
fn junction_is_created_and_connect_is_idempotent() {
  let mut db = db();
  dogs_and_humans(&mut db);
  let link = db.many_to_many("dogs", "humans", None).unwrap();

  assert_eq!(link.junction, "dogs_humans");
  assert_eq!(db.primary_keys("dogs_humans").unwrap(), vec!["dogs_id", "humans_id"]);
  assert_eq!(db.foreign_keys("dogs_humans").unwrap().len(), 2);

  db.connect(&link, 1, 1, &Record::new()).unwrap();
  db.connect(&link, 1, 1, &Record::new()).unwrap();
  db.connect(&link, 2, 1, &record! { "since" => 2020 }).unwrap();

  assert_eq!(db.count("dogs_humans").unwrap(), 2);
  let again = db.many_to_many("humans", "dogs", None).unwrap();
  assert_eq!(again.junction, "dogs_humans");
}

#[test]
fn self_referencing_junction_suffixes_second_column() {
  let mut db = db();
  db.insert("people", record! { "id" => 1 }, &WriteOptions::with_pk("id")).unwrap();
  let link = db.many_to_many("people", "people", Some("friendships")).unwrap();
  assert_eq!(link.left.column, "people_id");
  assert_eq!(link.right.column, "people_id_2");
  assert!(db.table_exists("friendships").unwrap());
}

#[test]
fn connecting_a_missing_row_is_not_found() {
  let mut db = db();
  dogs_and_humans(&mut db);
  let link = db.many_to_many("dogs", "humans", None).unwrap();
  let err = db.connect(&link, 1, 99, &Record::new()).unwrap_err();
  assert!(matches!(err, Error::NotFound { ref table, .. } if table == "humans"));
}

#[test]
fn drop_table_takes_owned_junctions_and_index() {
  let mut db = db();
  dogs_and_humans(&mut db);
  db.enable_fts("dogs", &["name"], &FtsOptions::default()).unwrap();
  db.many_to_many("dogs", "humans", None).unwrap();

  db.drop_table("dogs").unwrap();
  assert_eq!(db.table_names().unwrap(), vec!["humans"]);
  assert!(db.triggers(None).unwrap().is_empty());
}

#[test]
fn drop_table_takes_junctions_carrying_extra_fields() {
  let mut db = db();
  dogs_and_humans(&mut db);
  let link = db.many_to_many("dogs", "humans", None).unwrap();
  db.connect(&link, 1, 1, &record! { "since" => 2020 }).unwrap();

  db.drop_table("humans").unwrap();
  assert_eq!(db.table_names().unwrap(), vec!["dogs"]);
}

#[test]
fn drop_table_keeps_user_tables_keyed_on_two_foreign_keys() {
  let mut db = db();
  db.insert("customers", record! { "id" => 1, "name" => "Ada" }, &WriteOptions::with_pk("id"))
    .unwrap();
  db.insert("products", record! { "id" => 1, "name" => "Lamp" }, &WriteOptions::with_pk("id"))
    .unwrap();
  let opts = CreateOptions {
    pk: Some(PrimaryKey::new(["customer_id", "product_id"])),
    foreign_keys: vec![
      ForeignKeySpec::to("customer_id", "customers", "id"),
      ForeignKeySpec::to("product_id", "products", "id"),
    ],
    ..CreateOptions::default()
  };
  db.create_table(
    "orders",
    &typed(&[
      ("customer_id", ColumnType::Integer),
      ("product_id", ColumnType::Integer),
      ("qty", ColumnType::Integer),
      ("placed_at", ColumnType::Text),
    ]),
    &opts,
  )
  .unwrap();
  db.insert(
    "orders",
    record! { "customer_id" => 1, "product_id" => 1, "qty" => 2, "placed_at" => "2024-01-01" },
    &WriteOptions::default(),
  )
  .unwrap();

  db.drop_table("customers").unwrap();
  assert!(db.table_exists("orders").unwrap());
  assert_eq!(db.count("orders").unwrap(), 1);
}

// ─── Lookups and extracts ────────────────────────────────────────────────────

#[test]
fn lookup_finds_or_creates() {
  let mut db = db();
  let dog = record! { "name" => "dog" };
  let first = db.lookup("species", &dog, &record! { "legs" => 4 }).unwrap();
  let again = db.lookup("species", &dog, &record! { "legs" => 3 }).unwrap();
  let cat = db.lookup("species", &record! { "name" => "cat" }, &Record::new()).unwrap();

  assert_eq!(first, PrimaryKeyValue::Single(Value::Integer(1)));
  assert_eq!(again, first);
  assert_eq!(cat, PrimaryKeyValue::Single(Value::Integer(2)));
  // Extra fields only apply when the row is created.
  assert_eq!(db.get("species", 1).unwrap()["legs"], Value::Integer(4));
  assert!(
    db.indexes("species")
      .unwrap()
      .iter()
      .any(|i| i.unique && i.columns == vec!["name".to_owned()])
  );
}

#[test]
fn extracts_replace_values_with_lookup_ids() {
  let mut db = db();
  let opts = WriteOptions {
    extracts: HashMap::from([("species".to_owned(), "species".to_owned())]),
    ..WriteOptions::default()
  };
  db.insert_all(
    "pets",
    [
      record! { "name" => "Rex", "species" => "dog" },
      record! { "name" => "Tom", "species" => "cat" },
      record! { "name" => "Fido", "species" => "dog" },
    ],
    &opts,
  )
  .unwrap();

  let ids: Vec<Value> = db.rows("pets").unwrap().into_iter().map(|r| r["species"].clone()).collect();
  assert_eq!(ids, vec![Value::Integer(1), Value::Integer(2), Value::Integer(1)]);
  assert_eq!(db.count("species").unwrap(), 2);
  assert_eq!(db.get("species", 2).unwrap()["value"], Value::from("cat"));
  assert_eq!(db.foreign_keys("pets").unwrap()[0].other_table, "species");
}

#[test]
fn hash_id_deduplicates_identical_records() {
  let mut db = db();
  let opts = WriteOptions {
    hash_id: Some("id".into()),
    mode: WriteMode::Ignore,
    ..WriteOptions::default()
  };
  let record = record! { "name" => "Rex", "age" => 3 };
  db.insert("dogs", record.clone(), &opts).unwrap();
  db.insert("dogs", record, &opts).unwrap();

  assert_eq!(db.count("dogs").unwrap(), 1);
  assert_eq!(db.primary_keys("dogs").unwrap(), vec!["id"]);
  let Value::Text(id) = &db.rows("dogs").unwrap()[0]["id"] else {
    panic!("hash id should be text");
  };
  assert_eq!(id.len(), 64);
}

#[test]
fn conversions_wrap_the_bound_value() {
  let mut db = db();
  let opts = WriteOptions {
    conversions: HashMap::from([("name".to_owned(), "upper(?)".to_owned())]),
    ..WriteOptions::default()
  };
  db.insert("dogs", record! { "name" => "rex" }, &opts).unwrap();
  assert_eq!(db.rows("dogs").unwrap()[0]["name"], Value::from("REX"));
}

// ─── Rows, views and indexes ─────────────────────────────────────────────────

#[test]
fn get_and_delete_by_primary_key() {
  let mut db = db();
  dogs_and_humans(&mut db);

  assert_eq!(db.get("dogs", 2).unwrap()["name"], Value::from("Max"));
  assert!(matches!(db.get("dogs", 3), Err(Error::NotFound { .. })));

  db.delete("dogs", 2).unwrap();
  assert!(matches!(db.get("dogs", 2), Err(Error::NotFound { .. })));
  assert!(matches!(db.delete("dogs", 2), Err(Error::NotFound { .. })));

  db.insert("things", record! { "a" => 1 }, &WriteOptions::default()).unwrap();
  assert_eq!(db.get("things", PrimaryKeyValue::RowId(1)).unwrap(), record! { "a" => 1 });
}

#[test]
fn delete_where_counts_deleted_rows() {
  let mut db = db();
  db.insert_all("n", (1..=10).map(|i| record! { "i" => i }), &WriteOptions::default()).unwrap();
  assert_eq!(db.delete_where("n", Some("i > ?"), &[Value::from(7)]).unwrap(), 3);
  assert_eq!(db.delete_where("n", None, &[]).unwrap(), 7);
}

#[test]
fn views_are_created_replaced_and_dropped() {
  let mut db = db();
  dogs_and_humans(&mut db);
  db.create_view("good_dogs", "SELECT name FROM dogs WHERE id = 1", false).unwrap();
  assert_eq!(db.view_names().unwrap(), vec!["good_dogs"]);
  assert_eq!(db.rows("good_dogs").unwrap(), vec![record! { "name" => "Rex" }]);

  let err = db.create_view("good_dogs", "SELECT 1", false).unwrap_err();
  assert!(matches!(err, Error::Schema { .. }));
  db.create_view("good_dogs", "SELECT name FROM dogs", true).unwrap();
  assert_eq!(db.rows("good_dogs").unwrap().len(), 2);

  db.drop_view("good_dogs").unwrap();
  assert!(db.view_names().unwrap().is_empty());
}

#[test]
fn unique_indexes_are_enforced() {
  let mut db = db();
  db.insert("dogs", record! { "name" => "Rex" }, &WriteOptions::default()).unwrap();
  let name = db.create_index("dogs", &["name"], &IndexOptions::unique()).unwrap();
  assert_eq!(name, "idx_dogs_name");

  let err = db.insert("dogs", record! { "name" => "Rex" }, &WriteOptions::default()).unwrap_err();
  assert!(matches!(err, Error::Constraint { .. }));

  db.drop_index(&name).unwrap();
  assert!(db.indexes("dogs").unwrap().is_empty());
}

// ─── Async handle ────────────────────────────────────────────────────────────

async fn handle() -> AsyncDatabase {
  AsyncDatabase::open_in_memory(DatabaseConfig::default())
    .await
    .expect("in-memory database")
}

#[tokio::test]
async fn async_insert_and_search() {
  let db = handle().await;
  let summary =
    db.insert_all("searchable", search_records(), WriteOptions::default()).await.unwrap();
  assert_eq!(summary.written, 2);

  db.enable_fts("searchable", cols(&["text", "country"]), FtsOptions::default()).await.unwrap();
  let hits = db.search("searchable", "tanuki", None).await.unwrap();
  assert_eq!(hits, vec![search_records()[0].clone()]);

  let report = db.optimize("searchable").await.unwrap();
  assert_eq!(report.documents, 2);
}

#[tokio::test]
async fn async_upsert_shares_schema_across_clones() {
  let db = handle().await;
  let other = db.clone();
  let opts = WriteOptions { pk: Some(PrimaryKey::from("id")), alter: true, ..WriteOptions::default() };

  db.upsert("dogs", record! { "id" => 1, "name" => "Rex" }, opts.clone()).await.unwrap();
  other.upsert("dogs", record! { "id" => 1, "age" => 3 }, opts).await.unwrap();

  assert_eq!(
    db.get("dogs", 1.into()).await.unwrap(),
    record! { "id" => 1, "name" => "Rex", "age" => 3 }
  );
  assert_eq!(db.table_names().await.unwrap(), vec!["dogs"]);
}

#[tokio::test]
async fn async_lookup_and_many_to_many() {
  let db = handle().await;
  let id = db.lookup("species", record! { "name" => "dog" }, Record::new()).await.unwrap();
  assert_eq!(id, PrimaryKeyValue::Single(Value::Integer(1)));

  db.insert("dogs", record! { "id" => 1 }, WriteOptions::with_pk("id")).await.unwrap();
  let link = db.many_to_many("dogs", "species", None).await.unwrap();
  db.connect(link, Value::Integer(1), Value::Integer(1), Record::new()).await.unwrap();
  assert_eq!(db.count("dogs_species").await.unwrap(), 1);
}
