//! Column type inference over a sample of records.
//!
//! Each field's type is the strongest type observed for it, on the ladder
//! null-only < integer < real < text < blob. Booleans count as integers;
//! nested values, uuids, decimals and date/time values count as text.
//! Fields seen only as null end up as text.

use indexmap::IndexMap;

use crate::{schema::ColumnType, value::Record};

/// Accumulates observed types field by field, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct TypeInferrer {
  observed: IndexMap<String, Option<ColumnType>>,
}

impl TypeInferrer {
  pub fn new() -> Self { Self::default() }

  pub fn observe(&mut self, record: &Record) {
    for (name, value) in record {
      let slot = self.observed.entry(name.clone()).or_insert(None);
      *slot = (*slot).max(value.storage_type());
    }
  }

  pub fn observe_all<'a>(&mut self, records: impl IntoIterator<Item = &'a Record>) {
    records.into_iter().for_each(|r| self.observe(r));
  }

  /// Whether `name` has been observed, with any type.
  pub fn has_field(&self, name: &str) -> bool { self.observed.contains_key(name) }

  pub fn finish(self) -> IndexMap<String, ColumnType> {
    self
      .observed
      .into_iter()
      .map(|(name, ty)| (name, ty.unwrap_or(ColumnType::Text)))
      .collect()
  }
}

/// Infer one storage type per field across `records`.
pub fn infer_column_types<'a>(
  records: impl IntoIterator<Item = &'a Record>,
) -> IndexMap<String, ColumnType> {
  let mut inferrer = TypeInferrer::new();
  inferrer.observe_all(records);
  inferrer.finish()
}

#[cfg(test)]
mod tests {
  use uuid::Uuid;

  use super::*;
  use crate::{Value, record};

  #[test]
  fn simple_record() {
    let types = infer_column_types(&[record! { "name" => "Lassie", "age" => 5 }]);
    assert_eq!(types["name"], ColumnType::Text);
    assert_eq!(types["age"], ColumnType::Integer);
  }

  #[test]
  fn integer_and_real_promote_to_real() {
    let sample = [record! { "score" => 1 }, record! { "score" => 2.5 }];
    assert_eq!(infer_column_types(&sample)["score"], ColumnType::Real);
  }

  #[test]
  fn any_text_promotes_to_text() {
    let sample = [
      record! { "score" => 1 },
      record! { "score" => 2.5 },
      record! { "score" => "n/a" },
    ];
    assert_eq!(infer_column_types(&sample)["score"], ColumnType::Text);
  }

  #[test]
  fn blob_is_terminal() {
    let sample = [
      record! { "payload" => "text" },
      record! { "payload" => vec![1u8, 2, 3] },
      record! { "payload" => 7 },
    ];
    assert_eq!(infer_column_types(&sample)["payload"], ColumnType::Blob);
  }

  #[test]
  fn superset_sample_never_narrows() {
    let values = [
      Value::Integer(1),
      Value::Null,
      Value::Real(2.5),
      Value::from("x"),
      Value::Blob(vec![0]),
    ];
    let mut previous = None;
    for n in 1..=values.len() {
      let sample: Vec<Record> = values[..n]
        .iter()
        .map(|v| record! { "f" => v.clone() })
        .collect();
      let ty = infer_column_types(&sample)["f"];
      assert!(previous.is_none_or(|p| ty >= p), "{ty:?} narrower than {previous:?}");
      previous = Some(ty);
    }
  }

  #[test]
  fn leading_nulls_do_not_pin_text() {
    let sample = [record! { "f" => Value::Null }, record! { "f" => 1 }];
    assert_eq!(infer_column_types(&sample)["f"], ColumnType::Integer);
  }

  #[test]
  fn partial_and_null_only_fields_are_included() {
    let sample = [
      record! { "a" => 1, "b" => Value::Null },
      record! { "a" => 2, "c" => true },
    ];
    let types = infer_column_types(&sample);
    assert_eq!(types.keys().collect::<Vec<_>>(), ["a", "b", "c"]);
    assert_eq!(types["b"], ColumnType::Text);
    assert_eq!(types["c"], ColumnType::Integer);
  }

  #[test]
  fn special_values_are_text() {
    let sample = [record! {
      "id" => Uuid::nil(),
      "amount" => Value::Decimal("1.000000000000000000001".into()),
      "born" => chrono::NaiveDate::from_ymd_opt(2020, 1, 2).unwrap(),
      "tags" => vec![Value::from("x")],
    }];
    let types = infer_column_types(&sample);
    assert!(types.values().all(|t| *t == ColumnType::Text));
  }
}
