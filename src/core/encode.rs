//! Purpose: Serialize a `Table` back into Lua-style table text.
//! Exports: `encode`, `encode_entry_inline`, `is_encodable`.
//! Role: Inverse of `decode`; output must decode back to an equal Table.
//! Invariants: Entries and fields are written in insertion order.
//! Invariants: Strings escape `"` only; no other character is escaped.
//! Invariants: Sequences are written as quoted strings only.
//! Invariants: Text that fails `is_encodable` (a trailing `\` or an embedded `\'`) does not
//! survive a write; callers must reject it before encoding.

use std::fmt::Write as _;

use crate::core::decode::is_keyword;
use crate::core::lexer::{TokenKind, tokenize};
use crate::core::value::{Entry, SENTINEL_TEXT, Table, Value, format_number};

const INDENT: &str = "    ";

pub fn encode(table: &Table) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} = {{", table.global());
    for (name, entry) in table.entries() {
        let _ = write!(out, "{INDENT}[{}] = ", quote(name));
        write_entry(&mut out, entry, 1);
        out.push_str(",\n");
    }
    out.push_str("}\n");
    out
}

/// Single-line `{ key = value, ... }` rendering of one entry.
pub fn encode_entry_inline(entry: &Entry) -> String {
    if entry.is_empty() {
        return "{}".to_string();
    }
    let fields: Vec<String> = entry
        .iter()
        .map(|(key, value)| format!("{} = {}", key_text(key), inline_value(value)))
        .collect();
    format!("{{ {} }}", fields.join(", "))
}

fn write_entry(out: &mut String, entry: &Entry, depth: usize) {
    if entry.is_empty() {
        out.push_str("{}");
        return;
    }
    out.push_str("{\n");
    let pad = INDENT.repeat(depth + 1);
    for (key, value) in entry {
        let _ = write!(out, "{pad}{} = ", key_text(key));
        match value {
            Value::Nested(nested) => write_entry(out, nested, depth + 1),
            other => out.push_str(&inline_value(other)),
        }
        out.push_str(",\n");
    }
    out.push_str(&INDENT.repeat(depth));
    out.push('}');
}

fn inline_value(value: &Value) -> String {
    match value {
        Value::String(text) => quote(text),
        Value::Number(number) => format_number(*number),
        Value::Boolean(flag) => flag.to_string(),
        Value::Nested(entry) => encode_entry_inline(entry),
        Value::Sequence(items) => sequence(items),
        Value::Unavailable => "nil".to_string(),
    }
}

fn sequence(items: &[Value]) -> String {
    if items.is_empty() {
        return "{}".to_string();
    }
    let quoted: Vec<String> = items
        .iter()
        .map(|item| quote(&item.scalar_text().unwrap_or_else(|| SENTINEL_TEXT.to_string())))
        .collect();
    format!("{{ {} }}", quoted.join(", "))
}

/// Whether `text` reads back unchanged once written as a quoted string.
pub fn is_encodable(text: &str) -> bool {
    match tokenize(&quote(text)) {
        Ok(tokens) => matches!(
            tokens.as_slice(),
            [first, last] if first.kind == TokenKind::Str(text.to_string()) && last.kind == TokenKind::Eof
        ),
        Err(_) => false,
    }
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\\\""))
}

fn key_text(key: &str) -> String {
    if is_identifier(key) {
        key.to_string()
    } else {
        format!("[{}]", quote(key))
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !is_keyword(key)
}
