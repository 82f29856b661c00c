//! Purpose: Decode Lua-style table text into a `Table`.
//! Exports: `decode`, `decode_with_issues`, `DecodeOptions`, `ArrayPolicy`, `Decoded`,
//! `DecodeIssue`, `IssueCode`.
//! Role: Recursive-descent parser over `lexer` tokens; the only way text becomes a Table.
//! Invariants: A missing `name = {` wrapper or unbalanced braces fail with `ErrorKind::Parse`.
//! Invariants: A single bad field never fails the decode; it becomes `Value::Unavailable`
//! (or is dropped when its key is unreadable) and is reported as a `DecodeIssue`.
//! Invariants: Tables nested deeper than `MAX_DEPTH` fail with `ErrorKind::Parse`.
//! Invariants: A top-level entry holding only unkeyed items is kept, keyed by position.

use crate::core::error::{Error, ErrorKind};
use crate::core::lexer::{Token, TokenKind, tokenize};
use crate::core::value::{Entry, Table, Value, format_number};

/// Deepest table nesting accepted below the top-level assignment.
pub const MAX_DEPTH: usize = 128;

/// How unkeyed items (`{ "a", "b" }`) are represented.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ArrayPolicy {
    /// A table holding only unkeyed items becomes `Value::Sequence`.
    #[default]
    Sequence,
    /// Unkeyed items are always stored under their 1-based position.
    Indexed,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DecodeOptions {
    pub arrays: ArrayPolicy,
    /// Treat the numeric literal `0` as the sentinel.
    pub zero_as_sentinel: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IssueCode {
    UnrecognizedValue,
    MalformedKey,
    NonTableEntry,
}

impl IssueCode {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueCode::UnrecognizedValue => "unrecognized-value",
            IssueCode::MalformedKey => "malformed-key",
            IssueCode::NonTableEntry => "non-table-entry",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecodeIssue {
    pub code: IssueCode,
    /// Dotted field path, e.g. `Pikachu.stats.hp`.
    pub path: String,
    pub line: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Decoded {
    pub table: Table,
    pub issues: Vec<DecodeIssue>,
}

pub fn decode(source: &str, options: &DecodeOptions) -> Result<Table, Error> {
    decode_with_issues(source, options).map(|decoded| decoded.table)
}

pub fn decode_with_issues(source: &str, options: &DecodeOptions) -> Result<Decoded, Error> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        options,
        depth: 0,
        issues: Vec::new(),
    };
    let global = parser.assignment_target()?;
    let open = parser.expect_open_brace()?;
    let fields = parser.table_body("", &open)?;

    let mut table = Table::new(global);
    for field in fields {
        let name = match field.key {
            FieldKey::Named(name) => name,
            FieldKey::Positional(index) => {
                parser.issue(IssueCode::NonTableEntry, format!("[{index}]"), field.line);
                continue;
            }
        };
        match field.value {
            Value::Nested(entry) => {
                table.entries_mut().insert(name, entry);
            }
            Value::Sequence(items) => {
                table.entries_mut().insert(name, indexed(items));
            }
            _ => parser.issue(IssueCode::NonTableEntry, name, field.line),
        }
    }

    Ok(Decoded {
        table,
        issues: parser.issues,
    })
}

fn indexed(items: Vec<Value>) -> Entry {
    items
        .into_iter()
        .enumerate()
        .map(|(index, value)| ((index + 1).to_string(), value))
        .collect()
}

enum FieldKey {
    Named(String),
    Positional(usize),
}

struct Field {
    key: FieldKey,
    value: Value,
    line: u32,
}

const KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if",
    "in", "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

pub(crate) fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

struct Parser<'a, 'src> {
    tokens: &'a [Token<'src>],
    pos: usize,
    options: &'a DecodeOptions,
    depth: usize,
    issues: Vec<DecodeIssue>,
}

impl<'a, 'src> Parser<'a, 'src> {
    fn peek(&self) -> &'a Token<'src> {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek_kind(&self) -> &'a TokenKind<'src> {
        &self.peek().kind
    }

    fn peek_kind_at(&self, ahead: usize) -> &'a TokenKind<'src> {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + ahead).min(last)].kind
    }

    fn advance(&mut self) -> &'a Token<'src> {
        let token = self.peek();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn error_at(&self, token: &Token<'_>, message: impl Into<String>) -> Error {
        Error::new(ErrorKind::Parse)
            .with_message(message)
            .with_line(token.line)
            .with_offset(token.offset as u64)
    }

    fn issue(&mut self, code: IssueCode, path: String, line: u32) {
        self.issues.push(DecodeIssue { code, path, line });
    }

    /// `[local] Name { .Name | ["key"] } =`
    fn assignment_target(&mut self) -> Result<String, Error> {
        if matches!(self.peek_kind(), TokenKind::Name("local")) {
            self.advance();
        }
        let first = self.peek();
        let mut target = match &first.kind {
            TokenKind::Name(name) if !is_keyword(name) => name.to_string(),
            _ => {
                return Err(self
                    .error_at(first, "missing table assignment")
                    .with_hint("The file must start with an assignment like `_G.Pokemon = { ... }`."));
            }
        };
        self.advance();

        loop {
            match (self.peek_kind(), self.peek_kind_at(1), self.peek_kind_at(2)) {
                (TokenKind::Dot, TokenKind::Name(name), _) => {
                    target.push('.');
                    target.push_str(name);
                    self.pos += 2;
                }
                (TokenKind::LBracket, TokenKind::Str(key), TokenKind::RBracket) => {
                    target.push_str(&format!("[\"{}\"]", key.replace('"', "\\\"")));
                    self.pos += 3;
                }
                _ => break,
            }
        }

        let token = self.peek();
        if token.kind != TokenKind::Assign {
            return Err(self.error_at(token, format!("expected '=' after `{target}`")));
        }
        self.advance();
        Ok(target)
    }

    fn expect_open_brace(&mut self) -> Result<Token<'src>, Error> {
        let token = self.peek();
        if token.kind != TokenKind::LBrace {
            return Err(self.error_at(token, "expected table constructor '{' after '='"));
        }
        self.advance();
        Ok(token.clone())
    }

    /// Parses fields up to and including the closing brace matching `open`.
    fn table_body(&mut self, path: &str, open: &Token<'src>) -> Result<Vec<Field>, Error> {
        let mut fields = Vec::new();
        let mut position = 0;
        loop {
            match self.peek_kind() {
                TokenKind::RBrace => {
                    self.advance();
                    return Ok(fields);
                }
                TokenKind::Eof => {
                    return Err(self.error_at(open, "unclosed '{' (expected '}')"));
                }
                TokenKind::Comma | TokenKind::Semicolon => {
                    self.advance();
                }
                _ => {
                    if let Some(field) = self.field(path, &mut position)? {
                        fields.push(field);
                    }
                    if matches!(self.peek_kind(), TokenKind::Comma | TokenKind::Semicolon) {
                        self.advance();
                    }
                }
            }
        }
    }

    fn field(&mut self, path: &str, position: &mut usize) -> Result<Option<Field>, Error> {
        let line = self.peek().line;
        match (self.peek_kind(), self.peek_kind_at(1)) {
            (TokenKind::Name(name), TokenKind::Assign) => {
                let key = name.to_string();
                self.pos += 2;
                let value = self.value(&join(path, &key))?;
                Ok(Some(Field {
                    key: FieldKey::Named(key),
                    value,
                    line,
                }))
            }
            (TokenKind::LBracket, _) => match self.bracket_key() {
                Some(key) => {
                    let value = self.value(&join(path, &key))?;
                    Ok(Some(Field {
                        key: FieldKey::Named(key),
                        value,
                        line,
                    }))
                }
                None => {
                    self.skip_to_field_end();
                    self.issue(IssueCode::MalformedKey, join(path, "[?]"), line);
                    Ok(None)
                }
            },
            _ => {
                *position += 1;
                let value = self.value(&join(path, &format!("[{position}]")))?;
                Ok(Some(Field {
                    key: FieldKey::Positional(*position),
                    value,
                    line,
                }))
            }
        }
    }

    /// `[ "key" ] =` or `[ 12 ] =`; leaves the cursor untouched on failure.
    fn bracket_key(&mut self) -> Option<String> {
        let (key, width) = match (self.peek_kind_at(1), self.peek_kind_at(2)) {
            (TokenKind::Str(key), _) => (key.clone(), 2),
            (TokenKind::Number(number), _) => (format_number(*number), 2),
            (TokenKind::Minus, TokenKind::Number(number)) => (format_number(-number), 3),
            _ => return None,
        };
        let closes = self.peek_kind_at(width) == &TokenKind::RBracket
            && self.peek_kind_at(width + 1) == &TokenKind::Assign;
        if !closes {
            return None;
        }
        self.pos += width + 2;
        Some(key)
    }

    fn value(&mut self, path: &str) -> Result<Value, Error> {
        let token = self.peek();
        let literal = match &token.kind {
            TokenKind::Str(text) => {
                self.advance();
                Some(Value::String(text.clone()))
            }
            TokenKind::Number(number) => {
                self.advance();
                Some(self.number(*number))
            }
            TokenKind::Minus => match self.peek_kind_at(1) {
                TokenKind::Number(number) => {
                    self.pos += 2;
                    Some(self.number(-number))
                }
                _ => None,
            },
            TokenKind::Name("true") => {
                self.advance();
                Some(Value::Boolean(true))
            }
            TokenKind::Name("false") => {
                self.advance();
                Some(Value::Boolean(false))
            }
            TokenKind::LBrace => {
                let open = self.advance().clone();
                if self.depth >= MAX_DEPTH {
                    return Err(self
                        .error_at(&open, format!("tables nested deeper than {MAX_DEPTH} levels")));
                }
                self.depth += 1;
                let fields = self.table_body(path, &open)?;
                self.depth -= 1;
                Some(self.assemble(fields))
            }
            _ => None,
        };

        match literal {
            Some(value) if self.at_field_end() => Ok(value),
            _ => {
                self.skip_to_field_end();
                self.issue(IssueCode::UnrecognizedValue, path.to_string(), token.line);
                Ok(Value::Unavailable)
            }
        }
    }

    fn number(&self, number: f64) -> Value {
        if self.options.zero_as_sentinel && number == 0.0 {
            Value::Unavailable
        } else {
            Value::Number(number)
        }
    }

    fn assemble(&self, fields: Vec<Field>) -> Value {
        let all_positional = fields
            .iter()
            .all(|field| matches!(field.key, FieldKey::Positional(_)));
        if self.options.arrays == ArrayPolicy::Sequence && all_positional && !fields.is_empty() {
            return Value::Sequence(fields.into_iter().map(|field| field.value).collect());
        }
        let mut entry = Entry::new();
        for field in fields {
            let key = match field.key {
                FieldKey::Named(name) => name,
                FieldKey::Positional(index) => index.to_string(),
            };
            entry.insert(key, field.value);
        }
        Value::Nested(entry)
    }

    fn at_field_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Comma | TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
        )
    }

    /// Skips to the next `,` / `;` / `}` at the current depth without consuming it.
    fn skip_to_field_end(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek_kind() {
                TokenKind::Eof => return,
                TokenKind::Comma | TokenKind::Semicolon if depth == 0 => return,
                TokenKind::RBrace if depth == 0 => return,
                TokenKind::LBrace | TokenKind::LBracket | TokenKind::LParen => depth += 1,
                TokenKind::RBrace | TokenKind::RBracket | TokenKind::RParen => {
                    depth = depth.saturating_sub(1);
                }
                _ => {}
            }
            self.advance();
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else if key.starts_with('[') {
        format!("{path}{key}")
    } else {
        format!("{path}.{key}")
    }
}
