//! Content-derived primary keys.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::{Result, value::Record};

/// SHA-256 hex digest of the record's canonical JSON (keys sorted).
///
/// With `columns`, only those fields take part; absent ones hash as null.
pub fn hash_record(record: &Record, columns: Option<&[String]>) -> Result<String> {
  let mut canonical = BTreeMap::new();
  match columns {
    Some(columns) => {
      for column in columns {
        let json = match record.get(column) {
          Some(v) => v.to_json()?,
          None => serde_json::Value::Null,
        };
        canonical.insert(column.as_str(), json);
      }
    }
    None => {
      for (name, value) in record {
        canonical.insert(name.as_str(), value.to_json()?);
      }
    }
  }
  let bytes = serde_json::to_vec(&canonical)?;
  Ok(hex::encode(Sha256::digest(&bytes)))
}
