//! Storage media behind the engine.
//!
//! Two media exist: a synchronous key-value medium living in the same process
//! ([`local`]) and an asynchronous file-per-key medium reached through a
//! command boundary ([`file`]). Both are exposed to the rest of the engine
//! through [`StorageBackend`].

use std::{fmt, path::Path};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::StorageError;

pub mod file;
pub mod local;

pub use file::{CommandBoundary, FileBackend, FsCommands};
pub use local::{JsonFileMedium, KeyValueMedium, LocalBackend, MemoryMedium};

/// Key in the synchronous medium that remembers the storage root.
pub const DATA_PATH_KEY: &str = "dataPath";

pub const BACKUP_SUFFIX: &str = "-backup";

/// Location of one logical store: a local key or a full file path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StoreKey(String);

impl StoreKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The derived key that holds the last rejected raw value of this store.
    pub fn backup(&self) -> Self {
        Self(format!("{}{BACKUP_SUFFIX}", self.0))
    }

    pub fn is_backup(&self) -> bool {
        self.0.ends_with(BACKUP_SUFFIX)
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Medium {
    /// Same-process key-value medium; available before the storage root is known.
    Local,
    /// File per key under the storage root.
    File,
}

impl Medium {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::File => "file",
        }
    }
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &StoreKey) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &StoreKey, value: String) -> Result<(), StorageError>;

    async fn remove(&self, key: &StoreKey) -> Result<(), StorageError>;
}

/// Base directory under which file-backed stores live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRoot {
    path: String,
}

impl StorageRoot {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.path)
    }

    /// `root/<name>.json`
    pub fn file_key(&self, name: &str) -> StoreKey {
        StoreKey::new(
            Path::new(&self.path)
                .join(format!("{name}.json"))
                .to_string_lossy()
                .into_owned(),
        )
    }

    /// Reads the persisted root, or provisions it from the command boundary's
    /// default data directory and persists it for the following runs.
    pub async fn resolve(
        local: &dyn KeyValueMedium,
        commands: &dyn CommandBoundary,
    ) -> Result<(Self, bool), StorageError> {
        if let Some(path) = local.get(DATA_PATH_KEY).filter(|p| !p.is_empty()) {
            return Ok((Self::new(path), false));
        }

        let path = commands.get_data_dir().await?;
        local.set(DATA_PATH_KEY, &path)?;
        Ok((Self::new(path), true))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        collections::BTreeMap,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use super::*;

    /// In-memory backend that records every write and can be told to start
    /// failing after a number of successful writes.
    #[derive(Debug, Default)]
    pub struct RecordingBackend {
        pub entries: Mutex<BTreeMap<String, String>>,
        pub writes: Mutex<Vec<(String, String)>>,
        fail_after: Mutex<Option<usize>>,
        succeeded: AtomicUsize,
    }

    impl RecordingBackend {
        pub fn with(entries: &[(&str, &str)]) -> Self {
            let backend = Self::default();
            {
                let mut map = backend.entries.lock().unwrap();
                for (k, v) in entries {
                    map.insert(k.to_string(), v.to_string());
                }
            }
            backend
        }

        pub fn fail_after(&self, writes: usize) {
            *self.fail_after.lock().unwrap() = Some(writes);
        }

        pub fn heal(&self) {
            *self.fail_after.lock().unwrap() = None;
        }

        pub fn value(&self, key: &str) -> Option<String> {
            self.entries.lock().unwrap().get(key).cloned()
        }

        pub fn writes(&self) -> Vec<(String, String)> {
            self.writes.lock().unwrap().clone()
        }

        fn check(&self) -> Result<(), StorageError> {
            if let Some(limit) = *self.fail_after.lock().unwrap()
                && self.succeeded.load(Ordering::SeqCst) >= limit
            {
                return Err(StorageError::Io(std::io::Error::other("injected failure")));
            }
            self.succeeded.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl StorageBackend for RecordingBackend {
        async fn get(&self, key: &StoreKey) -> Result<Option<String>, StorageError> {
            Ok(self.value(key.as_str()))
        }

        async fn set(&self, key: &StoreKey, value: String) -> Result<(), StorageError> {
            self.check()?;
            self.writes
                .lock()
                .unwrap()
                .push((key.to_string(), value.clone()));
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), value);
            Ok(())
        }

        async fn remove(&self, key: &StoreKey) -> Result<(), StorageError> {
            self.check()?;
            self.entries.lock().unwrap().remove(key.as_str());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::storage::file::testing::FakeCommands;

    #[test]
    fn backup_key_is_suffixed() {
        let key = StoreKey::new("settings");
        assert_eq!(key.backup().as_str(), "settings-backup");
        assert!(key.backup().is_backup());
        assert!(!key.is_backup());
    }

    #[test]
    fn file_keys_live_under_the_root() {
        let root = StorageRoot::new("/home/user/.config/app");
        assert_eq!(
            root.file_key("history").as_str(),
            "/home/user/.config/app/history.json"
        );
    }

    #[tokio::test]
    async fn first_run_provisions_root_from_default_directory() {
        let local = MemoryMedium::default();
        let commands = FakeCommands::with_data_dir("/home/user/.config/app");

        assert_eq!(local.get(DATA_PATH_KEY), None);
        let (root, provisioned) = StorageRoot::resolve(&local, &commands).await.unwrap();

        assert!(provisioned);
        assert_eq!(root.as_str(), "/home/user/.config/app");
        assert_eq!(
            local.get(DATA_PATH_KEY).as_deref(),
            Some("/home/user/.config/app")
        );
        assert_eq!(
            root.file_key("collections").as_str(),
            "/home/user/.config/app/collections.json"
        );
    }

    #[tokio::test]
    async fn later_runs_reuse_the_persisted_root() {
        let local = MemoryMedium::default();
        local.set(DATA_PATH_KEY, "/srv/data").unwrap();
        let commands = FakeCommands::with_data_dir("/somewhere/else");

        let (root, provisioned) = StorageRoot::resolve(&local, &commands).await.unwrap();

        assert!(!provisioned);
        assert_eq!(root.as_str(), "/srv/data");
        assert_eq!(commands.data_dir_requests(), 0);
    }
}
