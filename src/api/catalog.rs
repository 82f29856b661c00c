//! Purpose: Request-level operations over a `TableStore`.
//! Exports: `Catalog`, `CheckReport`.
//! Role: One decode → (locate | upsert) → (return | encode + write) pipeline per call,
//! shared by the HTTP server and the CLI.
//! Invariants: No state is kept between calls; every call starts from the stored text.
#![allow(clippy::result_large_err)]

use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use super::store::TableStore;
use crate::core::decode::DecodeIssue;
use crate::core::error::{Error, ErrorKind};
use crate::core::table::{Upserted, check_encodable, entry_from_json, find, upsert};
use crate::core::value::Entry;

pub type ApiResult<T> = Result<T, Error>;

#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn TableStore>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CheckReport {
    pub global: String,
    pub entries: usize,
    pub issues: Vec<DecodeIssue>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

impl Catalog {
    pub fn new(store: impl TableStore + 'static) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn get(&self, name: &str) -> ApiResult<Option<Entry>> {
        let table = self.store.load()?;
        Ok(find(&table, name).cloned())
    }

    /// Like `get`, but absence is `ErrorKind::NotFound`.
    pub fn require(&self, name: &str) -> ApiResult<Entry> {
        self.get(name)?.ok_or_else(|| {
            Error::new(ErrorKind::NotFound).with_message(format!("Pokémon '{name}' not found"))
        })
    }

    pub fn upsert(&self, name: &str, entry: Entry) -> ApiResult<Upserted> {
        validate_name(name)?;
        check_encodable(name, &entry)?;
        let mut entry = Some(entry);
        let mut outcome = Upserted::Inserted;
        self.store.update(&mut |table| {
            if let Some(entry) = entry.take() {
                outcome = upsert(table, name, entry);
            }
        })?;
        Ok(outcome)
    }

    /// Upsert from a request body's `data` object using the number-or-string tagging rule.
    pub fn upsert_json(&self, name: &str, data: &Map<String, JsonValue>) -> ApiResult<Upserted> {
        self.upsert(name, entry_from_json(data))
    }

    pub fn check(&self) -> ApiResult<CheckReport> {
        let decoded = self.store.load_with_issues()?;
        Ok(CheckReport {
            global: decoded.table.global().to_string(),
            entries: decoded.table.len(),
            issues: decoded.issues,
        })
    }
}

fn validate_name(name: &str) -> ApiResult<()> {
    if name.trim().is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("entry name must not be empty")
            .with_hint("Provide a non-empty \"name\" field."));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Catalog;
    use crate::api::store::{FileStore, MemoryStore, TableStore};
    use crate::core::decode::IssueCode;
    use crate::core::error::ErrorKind;
    use crate::core::table::Upserted;
    use crate::core::value::Value;
    use serde_json::json;

    #[test]
    fn upsert_json_then_get() {
        let catalog = Catalog::new(MemoryStore::default());
        let data = json!({"hp": 35, "type": "Electric"});
        let outcome = catalog
            .upsert_json("Pikachu", data.as_object().expect("object"))
            .expect("upsert");
        assert_eq!(outcome, Upserted::Inserted);

        let entry = catalog.get("Pikachu").expect("get").expect("present");
        assert_eq!(entry["hp"], Value::Number(35.0));
        assert_eq!(entry["type"], Value::from("Electric"));
        assert_eq!(entry.keys().collect::<Vec<_>>(), vec!["hp", "type"]);
    }

    #[test]
    fn second_upsert_reports_replacement() {
        let catalog = Catalog::new(MemoryStore::default());
        let first = json!({"hp": 35, "type": "Electric"});
        let second = json!({"hp": 40});
        catalog
            .upsert_json("Pikachu", first.as_object().expect("object"))
            .expect("first");
        let outcome = catalog
            .upsert_json("Pikachu", second.as_object().expect("object"))
            .expect("second");
        assert_eq!(outcome, Upserted::Replaced);
        let entry = catalog.require("Pikachu").expect("require");
        assert_eq!(entry.len(), 1);
        assert_eq!(entry["hp"], Value::Number(40.0));
    }

    #[test]
    fn missing_entries() {
        let catalog = Catalog::new(MemoryStore::default());
        assert_eq!(catalog.get("Missing").expect("get"), None);
        let err = catalog.require("Missing").expect_err("absent");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn empty_name_is_rejected() {
        let catalog = Catalog::new(MemoryStore::default());
        let data = json!({"hp": 1});
        let err = catalog
            .upsert_json("  ", data.as_object().expect("object"))
            .expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn check_reports_degraded_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("Pokemon.lua");
        std::fs::write(
            &path,
            "_G.Pokemon = { Ditto = { hp = 48, evolves = nil }, Mew = { hp = 100 } }",
        )
        .expect("seed");

        let report = Catalog::new(FileStore::new(&path)).check().expect("check");
        assert_eq!(report.global, "_G.Pokemon");
        assert_eq!(report.entries, 2);
        assert!(!report.is_clean());
        assert_eq!(report.issues[0].code, IssueCode::UnrecognizedValue);
        assert_eq!(report.issues[0].path, "Ditto.evolves");
    }

    #[test]
    fn unstorable_text_is_rejected_before_the_file_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("Pokemon.lua");
        let seed = "_G.Pokemon = {\n    [\"Pikachu\"] = {\n        hp = 35,\n    },\n}\n";
        std::fs::write(&path, seed).expect("seed");

        let catalog = Catalog::new(FileStore::new(&path));
        let data = json!({"path": "C:\\"});
        let err = catalog
            .upsert_json("Porygon", data.as_object().expect("object"))
            .expect_err("trailing backslash");
        assert_eq!(err.kind(), ErrorKind::Usage);

        assert_eq!(std::fs::read_to_string(&path).expect("read"), seed);
        assert!(catalog.get("Pikachu").expect("get").is_some());
    }

    #[test]
    fn unkeyed_entry_survives_unrelated_upsert() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("Pokemon.lua");
        std::fs::write(
            &path,
            "_G.Pokemon = { Ditto = { \"Transform\" }, Mew = { hp = 100 } }",
        )
        .expect("seed");

        let catalog = Catalog::new(FileStore::new(&path));
        let ditto = catalog.require("Ditto").expect("ditto");
        assert_eq!(ditto["1"], Value::from("Transform"));

        let data = json!({"hp": 35});
        catalog
            .upsert_json("Pikachu", data.as_object().expect("object"))
            .expect("upsert");

        let table = FileStore::new(&path).load().expect("load");
        assert_eq!(
            table.names().collect::<Vec<_>>(),
            vec!["Ditto", "Mew", "Pikachu"]
        );
        assert_eq!(table.entries()["Ditto"]["1"], Value::from("Transform"));
    }
}
