use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use tracing::warn;

use super::{BACKUP_SUFFIX, StorageBackend, StoreKey};
use crate::error::StorageError;

/// Synchronous same-process key-value medium (the localStorage analogue).
pub trait KeyValueMedium: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn keys(&self) -> Vec<String>;
}

#[derive(Debug, Default)]
pub struct MemoryMedium {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryMedium {
    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: Mutex::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueMedium for MemoryMedium {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries().remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }
}

/// Key-value medium persisted as one JSON object file.
///
/// Entries are cached in memory and the whole file is rewritten atomically on
/// every mutation. A file that cannot be read as a string map is moved aside
/// to `<file>-backup` and the medium starts empty.
#[derive(Debug)]
pub struct JsonFileMedium {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileMedium {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = if path.exists() {
            let bytes = fs::read(&path)?;
            if bytes.iter().all(u8::is_ascii_whitespace) {
                BTreeMap::new()
            } else {
                match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                    Ok(entries) => entries,
                    Err(e) => {
                        let aside = PathBuf::from(format!("{}{BACKUP_SUFFIX}", path.display()));
                        warn!(
                            path = %path.display(),
                            backup = %aside.display(),
                            error = %e,
                            "local storage file is corrupt; moving it aside"
                        );
                        fs::rename(&path, &aside)?;
                        BTreeMap::new()
                    }
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        write_atomic(&self.path, &bytes)?;
        Ok(())
    }
}

impl KeyValueMedium for JsonFileMedium {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries();
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries();
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.save(&entries)
    }

    fn keys(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), io::Error> {
    let dir = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory")
    })?;
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    if !dir.as_os_str().is_empty() {
        fs::create_dir_all(dir)?;
    }
    let tmp_path = dir.join(format!("{}.tmp", file_name.to_string_lossy()));
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        let _ = file.sync_all();
    }

    #[cfg(windows)]
    {
        if path.exists() {
            let _ = fs::remove_file(path);
        }
    }

    fs::rename(tmp_path, path)?;
    Ok(())
}

/// [`StorageBackend`] over a synchronous medium; every call completes immediately.
#[derive(Clone)]
pub struct LocalBackend {
    medium: Arc<dyn KeyValueMedium>,
}

impl LocalBackend {
    pub fn new(medium: Arc<dyn KeyValueMedium>) -> Self {
        Self { medium }
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn get(&self, key: &StoreKey) -> Result<Option<String>, StorageError> {
        Ok(self.medium.get(key.as_str()))
    }

    async fn set(&self, key: &StoreKey, value: String) -> Result<(), StorageError> {
        self.medium.set(key.as_str(), &value)
    }

    async fn remove(&self, key: &StoreKey) -> Result<(), StorageError> {
        self.medium.remove(key.as_str())
    }
}
