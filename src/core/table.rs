//! Purpose: Entry lookup and whole-entry upsert over a decoded Table.
//! Exports: `find`, `upsert`, `Upserted`, `entry_from_json`, `check_encodable`.
//! Role: Pure Table edits; the store decides when they reach the file.
//! Invariants: `upsert` never merges fields; a replaced entry keeps its position.
use serde_json::{Map, Value as JsonValue};

use crate::core::encode::is_encodable;
use crate::core::error::{Error, ErrorKind};
use crate::core::value::{Entry, Table, Value};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Upserted {
    Inserted,
    Replaced,
}

impl Upserted {
    pub fn as_str(self) -> &'static str {
        match self {
            Upserted::Inserted => "inserted",
            Upserted::Replaced => "replaced",
        }
    }
}

/// Exact-name lookup against the top-level keys.
pub fn find<'t>(table: &'t Table, name: &str) -> Option<&'t Entry> {
    table.entries().get(name)
}

/// Replaces the named entry wholesale (keeping its position) or appends it.
pub fn upsert(table: &mut Table, name: &str, entry: Entry) -> Upserted {
    match table.entries_mut().get_mut(name) {
        Some(existing) => {
            *existing = entry;
            Upserted::Replaced
        }
        None => {
            table.entries_mut().insert(name.to_string(), entry);
            Upserted::Inserted
        }
    }
}

/// Request fields to an Entry: numbers stay numbers, everything else is stored as text.
pub fn entry_from_json(data: &Map<String, JsonValue>) -> Entry {
    data.iter()
        .map(|(key, value)| {
            let value = match value {
                JsonValue::Number(number) => number
                    .as_f64()
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(number.to_string())),
                JsonValue::String(text) => Value::String(text.clone()),
                other => Value::String(other.to_string()),
            };
            (key.clone(), value)
        })
        .collect()
}

/// Rejects an entry whose name, keys or text would not read back unchanged from the file.
pub fn check_encodable(name: &str, entry: &Entry) -> Result<(), Error> {
    if !is_encodable(name) {
        return Err(unencodable(name.to_string()));
    }
    check_fields(name, entry)
}

fn check_fields(path: &str, entry: &Entry) -> Result<(), Error> {
    for (key, value) in entry {
        let field = format!("{path}.{key}");
        if !is_encodable(key) {
            return Err(unencodable(field));
        }
        match value {
            Value::String(text) if !is_encodable(text) => return Err(unencodable(field)),
            Value::Nested(nested) => check_fields(&field, nested)?,
            Value::Sequence(items) => {
                let bad = items
                    .iter()
                    .filter_map(Value::scalar_text)
                    .any(|text| !is_encodable(&text));
                if bad {
                    return Err(unencodable(field));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn unencodable(field: String) -> Error {
    Error::new(ErrorKind::Usage)
        .with_message(format!("'{field}' holds text the table file cannot store"))
        .with_hint("Strings must not end in a backslash or contain \\'.")
}
