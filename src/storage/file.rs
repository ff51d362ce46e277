use std::{
    collections::HashMap,
    io,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::{StorageBackend, StoreKey, local::write_atomic};
use crate::error::StorageError;

/// Native commands the file medium is reached through.
#[async_trait]
pub trait CommandBoundary: Send + Sync {
    /// Returns an empty string when the file does not exist.
    async fn read_file(&self, path: &str) -> Result<String, StorageError>;

    async fn write_file(&self, path: &str, content: &str) -> Result<(), StorageError>;

    async fn remove_file(&self, path: &str) -> Result<(), StorageError>;

    /// Default directory to use as storage root on first run.
    async fn get_data_dir(&self) -> Result<String, StorageError>;
}

/// [`CommandBoundary`] over the local filesystem.
#[derive(Debug, Clone)]
pub struct FsCommands {
    default_data_dir: PathBuf,
}

impl FsCommands {
    pub fn new(default_data_dir: impl Into<PathBuf>) -> Self {
        Self {
            default_data_dir: default_data_dir.into(),
        }
    }
}

#[async_trait]
impl CommandBoundary for FsCommands {
    async fn read_file(&self, path: &str) -> Result<String, StorageError> {
        let path = PathBuf::from(path);
        tokio::task::spawn_blocking(move || match std::fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(StorageError::Io(e)),
        })
        .await
        .map_err(|e| StorageError::command("read_file", e))?
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), StorageError> {
        let path = PathBuf::from(path);
        let bytes = content.as_bytes().to_vec();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| StorageError::command("write_file", e))??;
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<(), StorageError> {
        let path = PathBuf::from(path);
        tokio::task::spawn_blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        })
        .await
        .map_err(|e| StorageError::command("remove_file", e))?
    }

    async fn get_data_dir(&self) -> Result<String, StorageError> {
        let dir = self.default_data_dir.clone();
        tokio::task::spawn_blocking(move || std::fs::create_dir_all(&dir).map(|()| dir))
            .await
            .map_err(|e| StorageError::command("get_data_dir", e))?
            .map(|dir| dir.to_string_lossy().into_owned())
            .map_err(StorageError::Io)
    }
}

#[derive(Debug)]
enum KeyOpKind {
    Read,
    Write(String),
    Remove,
}

struct KeyOp {
    kind: KeyOpKind,
    reply: oneshot::Sender<Result<Option<String>, StorageError>>,
}

/// File-per-key [`StorageBackend`].
///
/// Every key gets its own queue drained by one writer task, so operations on a
/// key complete in the order they were issued while different keys proceed
/// independently. Reads go through the same queue and observe earlier writes.
pub struct FileBackend {
    commands: Arc<dyn CommandBoundary>,
    queues: Mutex<HashMap<StoreKey, mpsc::UnboundedSender<KeyOp>>>,
}

impl FileBackend {
    pub fn new(commands: Arc<dyn CommandBoundary>) -> Self {
        Self {
            commands,
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn enqueue(
        &self,
        key: &StoreKey,
        kind: KeyOpKind,
    ) -> oneshot::Receiver<Result<Option<String>, StorageError>> {
        let (reply, rx) = oneshot::channel();
        let op = KeyOp { kind, reply };

        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let op = match queues.get(key) {
            Some(tx) => match tx.send(op) {
                Ok(()) => return rx,
                Err(mpsc::error::SendError(op)) => op,
            },
            None => op,
        };

        let tx = spawn_key_queue(self.commands.clone(), key.clone());
        // A freshly spawned queue cannot be closed yet.
        let _ = tx.send(op);
        queues.insert(key.clone(), tx);
        rx
    }

    async fn submit(
        &self,
        key: &StoreKey,
        kind: KeyOpKind,
    ) -> Result<Option<String>, StorageError> {
        self.enqueue(key, kind)
            .await
            .map_err(|_| StorageError::WriterClosed {
                key: key.to_string(),
            })?
    }
}

fn spawn_key_queue(
    commands: Arc<dyn CommandBoundary>,
    key: StoreKey,
) -> mpsc::UnboundedSender<KeyOp> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(key_queue_task(commands, key, rx));
    tx
}

async fn key_queue_task(
    commands: Arc<dyn CommandBoundary>,
    key: StoreKey,
    mut rx: mpsc::UnboundedReceiver<KeyOp>,
) {
    while let Some(op) = rx.recv().await {
        let result = match op.kind {
            KeyOpKind::Read => commands
                .read_file(key.as_str())
                .await
                .map(|content| Some(content).filter(|c| !c.is_empty())),
            KeyOpKind::Write(content) => commands
                .write_file(key.as_str(), &content)
                .await
                .map(|()| None),
            KeyOpKind::Remove => commands.remove_file(key.as_str()).await.map(|()| None),
        };
        let _ = op.reply.send(result);
    }
    debug!(key = %key, "file queue closed");
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn get(&self, key: &StoreKey) -> Result<Option<String>, StorageError> {
        self.submit(key, KeyOpKind::Read).await
    }

    async fn set(&self, key: &StoreKey, value: String) -> Result<(), StorageError> {
        self.submit(key, KeyOpKind::Write(value)).await.map(|_| ())
    }

    async fn remove(&self, key: &StoreKey) -> Result<(), StorageError> {
        self.submit(key, KeyOpKind::Remove).await.map(|_| ())
    }
}
