//! Purpose: Repository seam between the pure table format and the data file.
//! Exports: `TableStore`, `FileStore`, `MemoryStore`, `WriteMode`.
//! Role: The only module that touches the filesystem; decode/encode stay pure.
//! Invariants: Every load re-reads and re-decodes the whole file (no cache).
//! Invariants: Every save overwrites the whole file with freshly encoded text.
//! Invariants: `WriteMode::Serialized` holds an exclusive advisory lock for the full
//! load-mutate-save of `update`; readers take a shared lock.
//! Invariants: Text that does not decode is never written; the file is left as it was.
#![allow(clippy::result_large_err)]

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;

use crate::core::decode::{DecodeOptions, Decoded, decode_with_issues};
use crate::core::encode::encode;
use crate::core::error::{Error, ErrorKind};
use crate::core::value::Table;

pub trait TableStore: Send + Sync {
    /// Reads and decodes the backing table, keeping decode diagnostics.
    fn load_with_issues(&self) -> Result<Decoded, Error>;

    fn save(&self, table: &Table) -> Result<(), Error>;

    fn load(&self) -> Result<Table, Error> {
        self.load_with_issues().map(|decoded| decoded.table)
    }

    /// Load, mutate, save. The default gives no isolation between concurrent callers.
    fn update(&self, apply: &mut dyn FnMut(&mut Table)) -> Result<(), Error> {
        let mut table = self.load()?;
        apply(&mut table);
        self.save(&table)
    }
}

/// Write discipline for `FileStore::update`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum WriteMode {
    /// One writer at a time, in-process and across processes.
    #[default]
    Serialized,
    /// Plain read-modify-write; concurrent writers can lose updates.
    Unsynchronized,
}

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    options: DecodeOptions,
    write_mode: WriteMode,
    gate: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            options: DecodeOptions::default(),
            write_mode: WriteMode::default(),
            gate: Mutex::new(()),
        }
    }

    pub fn with_decode_options(mut self, options: DecodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    /// Writes an empty table assigned to `global`.
    pub fn create(&self, global: &str, force: bool) -> Result<(), Error> {
        if !force && self.path.exists() {
            return Err(Error::new(ErrorKind::AlreadyExists)
                .with_message("table file already exists")
                .with_path(&self.path)
                .with_hint("Pass --force to overwrite it."));
        }
        std::fs::write(&self.path, encode(&Table::new(global))).map_err(|err| self.write_error(err))
    }

    fn decode_text(&self, text: &str) -> Result<Decoded, Error> {
        let decoded = decode_with_issues(text, &self.options).map_err(|err| {
            tracing::warn!(path = %self.path.display(), error = %err, "table file failed to parse");
            err.with_path(&self.path)
        })?;
        for issue in &decoded.issues {
            tracing::warn!(
                path = %self.path.display(),
                field = %issue.path,
                line = issue.line,
                code = issue.code.as_str(),
                "degraded field while decoding"
            );
        }
        Ok(decoded)
    }

    /// Encodes `table` and confirms the text decodes before it may replace the file.
    fn encode_checked(&self, table: &Table) -> Result<String, Error> {
        let text = encode(table);
        if let Err(err) = decode_with_issues(&text, &self.options) {
            tracing::error!(path = %self.path.display(), error = %err, "encoded table does not decode");
            return Err(Error::new(ErrorKind::Write)
                .with_message("refusing to write a table that would not decode")
                .with_path(&self.path)
                .with_source(err));
        }
        Ok(text)
    }

    fn open(&self, write: bool) -> Result<File, Error> {
        OpenOptions::new()
            .read(true)
            .write(write)
            .open(&self.path)
            .map_err(|err| self.read_error(err))
    }

    fn read_error(&self, err: io::Error) -> Error {
        let mut error = Error::new(ErrorKind::Read)
            .with_message("error reading table file")
            .with_path(&self.path);
        if err.kind() == io::ErrorKind::NotFound {
            error = error.with_hint("Create the file with `luadex init` or pass --file.");
        }
        error.with_source(err)
    }

    fn write_error(&self, err: io::Error) -> Error {
        Error::new(ErrorKind::Write)
            .with_message("error writing table file")
            .with_path(&self.path)
            .with_source(err)
    }

    fn lock<'f>(&self, file: &'f File, exclusive: bool) -> Result<FileLock<'f>, Error> {
        let result = if exclusive {
            file.lock_exclusive()
        } else {
            file.lock_shared()
        };
        result.map_err(|err| {
            let kind = match err.kind() {
                io::ErrorKind::WouldBlock => ErrorKind::Busy,
                _ if exclusive => ErrorKind::Write,
                _ => ErrorKind::Read,
            };
            Error::new(kind)
                .with_message("failed to lock table file")
                .with_path(&self.path)
                .with_source(err)
        })?;
        Ok(FileLock { file })
    }

    fn read_all(&self, mut file: &File) -> Result<String, Error> {
        let mut text = String::new();
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_string(&mut text))
            .map_err(|err| self.read_error(err))?;
        Ok(text)
    }

    fn overwrite(&self, mut file: &File, text: &str) -> Result<(), Error> {
        file.set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| file.write_all(text.as_bytes()))
            .and_then(|_| file.flush())
            .map_err(|err| self.write_error(err))
    }
}

impl TableStore for FileStore {
    fn load_with_issues(&self) -> Result<Decoded, Error> {
        let text = match self.write_mode {
            WriteMode::Serialized => {
                let file = self.open(false)?;
                let _lock = self.lock(&file, false)?;
                self.read_all(&file)?
            }
            WriteMode::Unsynchronized => {
                std::fs::read_to_string(&self.path).map_err(|err| self.read_error(err))?
            }
        };
        self.decode_text(&text)
    }

    fn save(&self, table: &Table) -> Result<(), Error> {
        let text = self.encode_checked(table)?;
        match self.write_mode {
            WriteMode::Serialized => {
                let _gate = self.gate.lock().unwrap_or_else(|poison| poison.into_inner());
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&self.path)
                    .map_err(|err| self.write_error(err))?;
                let _lock = self.lock(&file, true)?;
                self.overwrite(&file, &text)
            }
            WriteMode::Unsynchronized => {
                std::fs::write(&self.path, text).map_err(|err| self.write_error(err))
            }
        }?;
        tracing::debug!(path = %self.path.display(), entries = table.len(), "table file written");
        Ok(())
    }

    fn update(&self, apply: &mut dyn FnMut(&mut Table)) -> Result<(), Error> {
        if self.write_mode == WriteMode::Unsynchronized {
            let mut table = self.load()?;
            apply(&mut table);
            return self.save(&table);
        }

        let _gate = self.gate.lock().unwrap_or_else(|poison| poison.into_inner());
        let file = self.open(true)?;
        let _lock = self.lock(&file, true)?;
        let text = self.read_all(&file)?;
        let mut table = self.decode_text(&text)?.table;
        apply(&mut table);
        let text = self.encode_checked(&table)?;
        self.overwrite(&file, &text)?;
        tracing::debug!(path = %self.path.display(), entries = table.len(), "table file updated");
        Ok(())
    }
}

struct FileLock<'a> {
    file: &'a File,
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file);
    }
}

/// In-memory store; `update` holds the table lock for the whole mutation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: Mutex<Table>,
}

impl MemoryStore {
    pub fn new(table: Table) -> Self {
        Self {
            table: Mutex::new(table),
        }
    }

    pub fn snapshot(&self) -> Table {
        self.table
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }
}

impl TableStore for MemoryStore {
    fn load_with_issues(&self) -> Result<Decoded, Error> {
        Ok(Decoded {
            table: self.snapshot(),
            issues: Vec::new(),
        })
    }

    fn save(&self, table: &Table) -> Result<(), Error> {
        *self.table.lock().unwrap_or_else(|poison| poison.into_inner()) = table.clone();
        Ok(())
    }

    fn update(&self, apply: &mut dyn FnMut(&mut Table)) -> Result<(), Error> {
        let mut table = self.table.lock().unwrap_or_else(|poison| poison.into_inner());
        apply(&mut *table);
        Ok(())
    }
}
