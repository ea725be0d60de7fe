//! Read-only last-resort data for when neither the caches nor the backend can help.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::RwLock;

use serde_json::Value;

/// A read-only key/value lookup consulted only after a fetch has failed.
///
/// Keys are the resource cache keys, such as `artist:42`. Nothing in this crate ever writes to a
/// store.
pub trait LocalStore: fmt::Debug + Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
}

/// A [`LocalStore`] held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store. This is how an embedding application provides its persisted data.
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.values.write().unwrap().insert(key.into(), value);
    }
}

impl FromIterator<(String, Value)> for MemoryStore {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: RwLock::new(iter.into_iter().collect()),
        }
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().unwrap().get(key).cloned()
    }
}

/// A [`LocalStore`] backed by a directory with one JSON document per key.
///
/// Keys are percent-encoded into file names, except for ASCII letters, digits, `-`, `_` and `.`.
/// The file for `artist:42` is `artist%3A42.json`, so every key has a file of its own. Missing and
/// unreadable files are treated as absent values.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut file_name = String::with_capacity(key.len() + 5);
        for byte in key.bytes() {
            match byte {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => {
                    file_name.push(byte as char)
                }
                _ => file_name.push_str(&format!("%{byte:02X}")),
            }
        }
        file_name.push_str(".json");
        self.root.join(file_name)
    }

    fn read(&self, key: &str) -> io::Result<Value> {
        let contents = fs::read(self.path_for(key))?;
        serde_json::from_slice(&contents).map_err(io::Error::from)
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> Option<Value> {
        match self.read(key) {
            Ok(value) => Some(value),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                let dynerr: &dyn std::error::Error = &err; // tracing expects a `&dyn Error`
                tracing::warn!(error = dynerr, key, "Failed to read local fallback");
                None
            }
        }
    }
}
