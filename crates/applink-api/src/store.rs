// Opaque persistent key-value storage for token material.
//
// The engine only ever reads and writes whole named records; everything
// about layout and durability stays behind this trait.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::Error;

/// Named-record persistence used for the token record.
pub trait TokenStore: Send + Sync {
    /// Read the record stored under `name`, or `None` when absent.
    fn get(&self, name: &str) -> Result<Option<String>, Error>;

    /// Write (create or replace) the record stored under `name`.
    fn set(&self, name: &str, value: &str) -> Result<(), Error>;
}

/// Stores shared between an owner and a test observer.
impl<S: TokenStore + ?Sized> TokenStore for std::sync::Arc<S> {
    fn get(&self, name: &str) -> Result<Option<String>, Error> {
        (**self).get(name)
    }

    fn set(&self, name: &str, value: &str) -> Result<(), Error> {
        (**self).set(name, value)
    }
}

// ── File-backed store ────────────────────────────────────────────────

/// One file per record inside a directory.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, name: &str) -> PathBuf {
        // Record names double as file names; keep them path-safe.
        let file: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(file)
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, name: &str) -> Result<Option<String>, Error> {
        match std::fs::read_to_string(self.record_path(name)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Store {
                message: format!("failed to read record '{name}': {e}"),
            }),
        }
    }

    fn set(&self, name: &str, value: &str) -> Result<(), Error> {
        std::fs::create_dir_all(&self.dir).map_err(|e| Error::Store {
            message: format!("failed to create store directory: {e}"),
        })?;
        std::fs::write(self.record_path(name), value).map_err(|e| Error::Store {
            message: format!("failed to write record '{name}': {e}"),
        })
    }
}

// ── In-memory store ──────────────────────────────────────────────────

/// Volatile store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, name: &str) -> Result<Option<String>, Error> {
        Ok(self
            .records
            .lock()
            .expect("token store lock poisoned")
            .get(name)
            .cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<(), Error> {
        self.records
            .lock()
            .expect("token store lock poisoned")
            .insert(name.to_owned(), value.to_owned());
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
