//! Identifier rules.
//!
//! Identifiers are delimited with square brackets, so a name containing
//! either bracket cannot be quoted safely and is rejected up front.

use crate::{Error, Result};

/// Fail with [`Error::Name`] if `name` cannot be used as a table or column.
pub fn validate_name(name: &str) -> Result<()> {
  let reason = if name.is_empty() {
    "name is empty"
  } else if name.contains('[') || name.contains(']') {
    "square brackets cannot be delimited"
  } else if name.contains('\0') {
    "name contains a NUL byte"
  } else {
    return Ok(());
  };
  Err(Error::Name { name: name.to_owned(), reason })
}

pub fn validate_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<()> {
  names.into_iter().try_for_each(validate_name)
}

/// Delimit an identifier: `name` → `[name]`.
pub fn quote(name: &str) -> String { format!("[{name}]") }

/// Delimit and comma-join a list of identifiers.
pub fn quote_list<S: AsRef<str>>(names: &[S]) -> String {
  names
    .iter()
    .map(|n| quote(n.as_ref()))
    .collect::<Vec<_>>()
    .join(", ")
}

/// Escape a string literal for inline SQL.
pub fn quote_literal(text: &str) -> String {
  format!("'{}'", text.replace('\'', "''"))
}

/// Table names a foreign-key column may refer to, most literal first.
///
/// `author_id` → `author_id`, `author`, `authors`; `category_id` also tries
/// `categories`; `box_id` also tries `boxes`.
pub fn table_candidates(column: &str) -> Vec<String> {
  let mut out = vec![column.to_owned()];
  let lower = column.to_ascii_lowercase();
  let stem = lower
    .strip_suffix("_id")
    .map(|s| &column[..s.len()])
    .unwrap_or(column);

  if stem.len() != column.len() {
    out.push(stem.to_owned());
  }
  if !stem.is_empty() {
    out.extend(plurals(stem));
  }
  out.dedup();
  out
}

fn plurals(word: &str) -> Vec<String> {
  let lower = word.to_ascii_lowercase();
  if lower.ends_with('s') {
    return Vec::new();
  }
  let mut out = vec![format!("{word}s")];
  if let Some(stem) = word.strip_suffix('y').or_else(|| word.strip_suffix('Y'))
    && !stem.ends_with(['a', 'e', 'i', 'o', 'u'])
  {
    out.push(format!("{stem}ies"));
  }
  if ["x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
    out.push(format!("{word}es"));
  }
  out
}
