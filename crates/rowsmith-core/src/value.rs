//! The record model: a closed variant set over everything an ingested field
//! may hold.
//!
//! Nested values (sequences and mappings) are stored as compact JSON text.
//! Binary payloads nested inside them use the `{"$base64": true, "encoded":
//! ...}` envelope so they survive the trip through JSON and back.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use indexmap::IndexMap;
use serde::{Serialize, Serializer, ser::SerializeMap};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{Error, Result, schema::ColumnType};

/// An ordered mapping from field name to value.
pub type Record = IndexMap<String, Value>;

/// A single field value of an incoming record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Bool(bool),
  Integer(i64),
  Real(f64),
  Text(String),
  Blob(Vec<u8>),
  Uuid(Uuid),
  /// A decimal kept in its exact textual form.
  Decimal(String),
  Date(NaiveDate),
  Time(NaiveTime),
  DateTime(DateTime<Utc>),
  Array(Vec<Value>),
  Object(Record),
}

impl Value {
  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

  /// The column type this value asks for, or `None` for null.
  pub fn storage_type(&self) -> Option<ColumnType> {
    match self {
      Self::Null => None,
      Self::Bool(_) | Self::Integer(_) => Some(ColumnType::Integer),
      Self::Real(_) => Some(ColumnType::Real),
      Self::Blob(_) => Some(ColumnType::Blob),
      Self::Text(_)
      | Self::Uuid(_)
      | Self::Decimal(_)
      | Self::Date(_)
      | Self::Time(_)
      | Self::DateTime(_)
      | Self::Array(_)
      | Self::Object(_) => Some(ColumnType::Text),
    }
  }

  /// Reject non-finite reals anywhere inside this value.
  pub fn check_finite(&self, column: &str) -> Result<()> {
    match self {
      Self::Real(f) if !f.is_finite() => Err(Error::NonFiniteReal {
        column: column.to_owned(),
        value:  *f,
      }),
      Self::Array(items) => {
        items.iter().try_for_each(|v| v.check_finite(column))
      }
      Self::Object(map) => map.values().try_for_each(|v| v.check_finite(column)),
      _ => Ok(()),
    }
  }

  /// The text stored for text-typed values. `None` for values that are not
  /// stored as text (null, integers, reals, blobs).
  pub fn render_text(&self) -> Result<Option<String>> {
    Ok(Some(match self {
      Self::Text(s) | Self::Decimal(s) => s.clone(),
      Self::Uuid(id) => id.hyphenated().to_string(),
      Self::Date(d) => d.format("%Y-%m-%d").to_string(),
      Self::Time(t) => t.format("%H:%M:%S%.f").to_string(),
      Self::DateTime(dt) => dt.to_rfc3339(),
      Self::Array(_) | Self::Object(_) => self.to_json()?.to_string(),
      Self::Null
      | Self::Bool(_)
      | Self::Integer(_)
      | Self::Real(_)
      | Self::Blob(_) => return Ok(None),
    }))
  }

  /// Convert to strict JSON. Fails on non-finite reals rather than falling
  /// back to a lossy textual form.
  pub fn to_json(&self) -> Result<JsonValue> {
    Ok(match self {
      Self::Null => JsonValue::Null,
      Self::Bool(b) => JsonValue::Bool(*b),
      Self::Integer(i) => JsonValue::from(*i),
      Self::Real(f) => serde_json::Number::from_f64(*f)
        .map(JsonValue::Number)
        .ok_or(Error::NonFiniteReal {
          column: String::from("<nested>"),
          value:  *f,
        })?,
      Self::Blob(bytes) => base64_envelope(bytes),
      Self::Array(items) => JsonValue::Array(
        items.iter().map(Value::to_json).collect::<Result<_>>()?,
      ),
      Self::Object(map) => JsonValue::Object(
        map
          .iter()
          .map(|(k, v)| Ok((k.clone(), v.to_json()?)))
          .collect::<Result<_>>()?,
      ),
      other => JsonValue::String(other.render_text()?.unwrap_or_default()),
    })
  }

  /// Convert parsed JSON input into a value. Integers that do not fit an
  /// `i64` are kept as exact decimals.
  pub fn from_json(json: JsonValue) -> Self {
    match json {
      JsonValue::Null => Self::Null,
      JsonValue::Bool(b) => Self::Bool(b),
      JsonValue::Number(n) => {
        if let Some(i) = n.as_i64() {
          Self::Integer(i)
        } else if n.is_u64() {
          Self::Decimal(n.to_string())
        } else {
          Self::Real(n.as_f64().unwrap_or(f64::NAN))
        }
      }
      JsonValue::String(s) => Self::Text(s),
      JsonValue::Array(items) => {
        Self::Array(items.into_iter().map(Self::from_json).collect())
      }
      JsonValue::Object(map) => match decode_base64_envelope(&map) {
        Some(bytes) => Self::Blob(bytes),
        None => Self::Object(
          map.into_iter().map(|(k, v)| (k, Self::from_json(v))).collect(),
        ),
      },
    }
  }
}

/// Convert a parsed JSON object into a record. Non-object input yields `None`.
pub fn record_from_json(json: JsonValue) -> Option<Record> {
  match Value::from_json(json) {
    Value::Object(record) => Some(record),
    _ => None,
  }
}

fn base64_envelope(bytes: &[u8]) -> JsonValue {
  serde_json::json!({ "$base64": true, "encoded": BASE64.encode(bytes) })
}

fn decode_base64_envelope(
  map: &serde_json::Map<String, JsonValue>,
) -> Option<Vec<u8>> {
  if map.len() != 2 || map.get("$base64") != Some(&JsonValue::Bool(true)) {
    return None;
  }
  let encoded = map.get("encoded")?.as_str()?;
  BASE64.decode(encoded).ok()
}

impl Serialize for Value {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      Self::Null => serializer.serialize_none(),
      Self::Bool(b) => serializer.serialize_bool(*b),
      Self::Integer(i) => serializer.serialize_i64(*i),
      Self::Real(f) => serializer.serialize_f64(*f),
      Self::Text(s) | Self::Decimal(s) => serializer.serialize_str(s),
      Self::Blob(bytes) => {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("$base64", &true)?;
        map.serialize_entry("encoded", &BASE64.encode(bytes))?;
        map.end()
      }
      Self::Uuid(id) => id.serialize(serializer),
      Self::Date(d) => d.serialize(serializer),
      Self::Time(t) => t.serialize(serializer),
      Self::DateTime(dt) => dt.serialize(serializer),
      Self::Array(items) => serializer.collect_seq(items),
      Self::Object(map) => serializer.collect_map(map),
    }
  }
}

// ─── Conversions ─────────────────────────────────────────────────────────────

macro_rules! impl_from {
  ($($ty:ty => $variant:ident $(as $cast:ty)?),+ $(,)?) => {
    $(
      impl From<$ty> for Value {
        fn from(v: $ty) -> Self { Self::$variant(v $(as $cast)?) }
      }
    )+
  };
}

impl_from! {
  bool => Bool,
  i64 => Integer,
  i32 => Integer as i64,
  u32 => Integer as i64,
  u8 => Integer as i64,
  f64 => Real,
  f32 => Real as f64,
  String => Text,
  Vec<u8> => Blob,
  Uuid => Uuid,
  NaiveDate => Date,
  NaiveTime => Time,
  DateTime<Utc> => DateTime,
  Vec<Value> => Array,
  Record => Object,
}

impl From<&str> for Value {
  fn from(v: &str) -> Self { Self::Text(v.to_owned()) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self { v.map_or(Self::Null, Into::into) }
}

/// Build a [`Record`] from `key => value` pairs.
///
/// ```
/// use rowsmith_core::{record, Value};
///
/// let dog = record! { "name" => "Lassie", "age" => 5 };
/// assert_eq!(dog["age"], Value::Integer(5));
/// ```
#[macro_export]
macro_rules! record {
  () => { $crate::Record::new() };
  ($($key:expr => $value:expr),+ $(,)?) => {{
    let mut record = $crate::Record::new();
    $(
      record.insert(::std::string::String::from($key), $crate::Value::from($value));
    )+
    record
  }};
}
