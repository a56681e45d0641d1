//! Key-value persistence for credentials.
//!
//! Provides the origin-scoped, string-keyed persistence that survives
//! restarts of the client:
//! * [`MemoryStorage`] for tests and ephemeral sessions
//! * [`FileStorage`] for a flat TOML table on disk
//!
//! All operations are synchronous. Implementations must treat removal of
//! an absent key as success.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use crate::error::Result;

/// Synchronous string key-value storage.
pub trait Storage: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory storage that never fails.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()?
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock()?.remove(key);
        Ok(())
    }
}

/// Storage backed by a TOML file of string values.
///
/// Every write rewrites the whole file through a temporary sibling that is
/// renamed into place, so a crash never leaves a half-written table. On
/// Unix the file is created readable by its owner only: it holds tokens
/// that grant access to the member's account.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    /// Refuse to parse files larger than this.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<BTreeMap<String, String>> {
        let attributes = match fs::metadata(&self.path) {
            Ok(attributes) => attributes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        // Prevent out-of-memory condition: a credentials file should be small.
        if attributes.len() > Self::MAX_FILE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is too large", self.path.display()),
            )
            .into());
        }

        let contents = fs::read_to_string(&self.path)?;
        toml::from_str(&contents).map_err(Into::into)
    }

    fn write(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let contents = toml::to_string(entries)?;

        let mut temporary = self.path.clone().into_os_string();
        temporary.push(".tmp");
        let temporary = PathBuf::from(temporary);

        write_private(&temporary, contents.as_bytes())?;
        fs::rename(&temporary, &self.path)?;

        Ok(())
    }

    fn modify<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let _guard = self.lock.lock()?;
        let mut entries = self.read()?;
        if f(&mut entries) {
            self.write(&entries)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    use std::{io::Write, os::unix::fs::OpenOptionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    fs::write(path, contents)
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock()?;
        Ok(self.read()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.modify(|entries| {
            let previous = entries.insert(key.to_owned(), value.to_owned());
            previous.as_deref() != Some(value)
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.modify(|entries| entries.remove(key).is_some())
    }
}
