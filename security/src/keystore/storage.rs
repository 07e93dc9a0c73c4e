//! Key/value back ends of the key store.
use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use anyhow::{Context, Result};
use rustc_hex::ToHex;

/// Simple key/value store.
///
/// An empty value denotes an absent entry.
pub trait KeyValue: Send + Sync {
    /// Fetch the value for a specific key.
    fn get(&self, key: Vec<u8>) -> Result<Vec<u8>>;

    /// Store a specific key/value into storage. Inserting an empty value
    /// removes the entry.
    fn insert(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;

    /// Remove every entry.
    fn clear(&self) -> Result<()>;
}

/// In-memory storage.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValue for MemoryStorage {
    fn get(&self, key: Vec<u8>) -> Result<Vec<u8>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(&key).cloned().unwrap_or_default())
    }

    fn insert(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if value.is_empty() {
            entries.remove(&key);
        } else {
            entries.insert(key, value);
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

/// Directory backed storage, one file per entry.
///
/// File names are the hex encoded keys. Writes go to a temporary file which
/// is then renamed over the entry.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open (creating if needed) storage rooted at the given directory.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create key store directory {}", root.display()))?;
        Ok(Self { root })
    }

    /// Root directory of the storage.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &[u8]) -> PathBuf {
        self.root.join(key.to_hex::<String>())
    }
}

impl KeyValue for FileStorage {
    fn get(&self, key: Vec<u8>) -> Result<Vec<u8>> {
        let path = self.entry_path(&key);
        match fs::read(&path) {
            Ok(value) => Ok(value),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(vec![]),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    fn insert(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let path = self.entry_path(&key);
        if value.is_empty() {
            return match fs::remove_file(&path) {
                Err(err) if err.kind() != io::ErrorKind::NotFound => {
                    Err(err).with_context(|| format!("failed to remove {}", path.display()))
                }
                _ => Ok(()),
            };
        }

        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)
                .with_context(|| format!("failed to create {}", tmp.display()))?;
            file.write_all(&value)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path).with_context(|| format!("failed to write {}", path.display()))?;

        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)
                .with_context(|| format!("failed to remove {}", self.root.display()))?;
        }
        fs::create_dir_all(&self.root)?;
        Ok(())
    }
}
