//! Purpose: In-memory model of a decoded table file.
//! Exports: `Table`, `Entry`, `Value`, `SENTINEL_TEXT`, `DEFAULT_GLOBAL`.
//! Role: Shared data model between the decoder, encoder, locator and HTTP layer.
//! Invariants: Entries and fields keep insertion order (IndexMap).
//! Invariants: Entity names are unique within a Table; re-inserting keeps the first position.

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// Assignment target written when a table is created from scratch.
pub const DEFAULT_GLOBAL: &str = "_G.Pokemon";

/// How the sentinel is rendered outside of table text.
pub const SENTINEL_TEXT: &str = "N/A";

pub type Entry = IndexMap<String, Value>;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    String(String),
    Number(f64),
    Boolean(bool),
    Nested(Entry),
    Sequence(Vec<Value>),
    /// Placeholder for a field whose literal syntax was not recognized.
    Unavailable,
}

impl Value {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Value::Unavailable)
    }

    /// Scalar text form: strings verbatim, numbers and booleans as literals.
    /// Composite values and the sentinel have no scalar form.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(format_number(*number)),
            Value::Boolean(flag) => Some(flag.to_string()),
            Value::Nested(_) | Value::Sequence(_) | Value::Unavailable => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<Entry> for Value {
    fn from(value: Entry) -> Self {
        Value::Nested(value)
    }
}

/// Shortest decimal form; integral values print without a fraction.
pub fn format_number(number: f64) -> String {
    format!("{number}")
}

fn integral(number: f64) -> Option<i64> {
    if number.fract() == 0.0 && number.abs() < 9_007_199_254_740_992.0 {
        Some(number as i64)
    } else {
        None
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::String(text) => serializer.serialize_str(text),
            Value::Number(number) => match integral(*number) {
                Some(whole) => serializer.serialize_i64(whole),
                None => serializer.serialize_f64(*number),
            },
            Value::Boolean(flag) => serializer.serialize_bool(*flag),
            Value::Nested(entry) => {
                let mut map = serializer.serialize_map(Some(entry.len()))?;
                for (key, value) in entry {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Value::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Unavailable => serializer.serialize_str(SENTINEL_TEXT),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    global: String,
    entries: IndexMap<String, Entry>,
}

impl Table {
    pub fn new(global: impl Into<String>) -> Self {
        Self {
            global: global.into(),
            entries: IndexMap::new(),
        }
    }

    /// Name of the variable the table is assigned to in the file.
    pub fn global(&self) -> &str {
        &self.global
    }

    pub fn entries(&self) -> &IndexMap<String, Entry> {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut IndexMap<String, Entry> {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new(DEFAULT_GLOBAL)
    }
}
