//! Purpose: Shared library crate used by the `luadex` CLI, server and tests.
//! Exports: `core` (table text format, data model, errors) and `api` (stores and catalog).
//! Role: Keeps decode/encode pure; all file access lives behind `api::TableStore`.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
