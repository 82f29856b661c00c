//! Purpose: Define the public Rust API boundary for luadex.
//! Exports: Data model, table format entrypoints, stores, and the request catalog.
//! Role: Public, additive-only surface used by the CLI, the server and tests.
//! Invariants: File access happens only through `TableStore` implementations.

mod catalog;
mod store;

pub use crate::core::decode::{
    ArrayPolicy, DecodeIssue, DecodeOptions, Decoded, IssueCode, MAX_DEPTH, decode,
    decode_with_issues,
};
pub use crate::core::encode::{encode, encode_entry_inline, is_encodable};
pub use crate::core::error::{Error, ErrorKind, to_exit_code};
pub use crate::core::table::{Upserted, check_encodable, entry_from_json, find, upsert};
pub use crate::core::value::{DEFAULT_GLOBAL, Entry, SENTINEL_TEXT, Table, Value};
pub use catalog::{ApiResult, Catalog, CheckReport};
pub use store::{FileStore, MemoryStore, TableStore, WriteMode};
