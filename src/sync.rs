//! Write-back of in-memory stores to their storage medium.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tracing::debug;

use crate::{
    diagnostics::DiagnosticsHandle,
    error::{PersistError, StorageError},
    storage::{StorageBackend, StoreKey},
    store::Store,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// One write per change.
    Immediate,
    /// Only the value present once no change arrived for the quiet window is written.
    Debounced(Duration),
}

impl SyncMode {
    pub fn from_debounce(debounce: Option<Duration>) -> Self {
        debounce.map_or(Self::Immediate, Self::Debounced)
    }
}

/// Live binding between a store's change stream and its storage key.
#[derive(Debug)]
pub struct Subscription {
    key: StoreKey,
    mode: SyncMode,
    flush_tx: mpsc::UnboundedSender<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn key(&self) -> &StoreKey {
        &self.key
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Writes any change still held back by the quiet window and waits for it.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.flush_tx.send(done_tx).is_ok() {
            let _ = done_rx.await;
        }
    }
}

pub fn attach<T>(
    store: &Store<T>,
    key: StoreKey,
    backend: Arc<dyn StorageBackend>,
    mode: SyncMode,
    diagnostics: DiagnosticsHandle,
) -> Subscription
where
    T: Serialize + Clone + Send + 'static,
{
    let changes = store.subscribe();
    let (flush_tx, flush_rx) = mpsc::unbounded_channel();
    let writer = Writer {
        key: key.clone(),
        backend,
        diagnostics,
    };
    let task = tokio::spawn(sync_task(writer, mode, changes, flush_rx));

    Subscription {
        key,
        mode,
        flush_tx,
        task,
    }
}

/// Serializes `value` and writes it under `key`.
pub async fn persist<T: Serialize + ?Sized>(
    backend: &dyn StorageBackend,
    key: &StoreKey,
    value: &T,
) -> Result<(), StorageError> {
    let text = serde_json::to_string(value)?;
    backend.set(key, text).await
}

struct Writer {
    key: StoreKey,
    backend: Arc<dyn StorageBackend>,
    diagnostics: DiagnosticsHandle,
}

impl Writer {
    /// Encoded before the write is awaited; the task holds only text across
    /// await points.
    fn encode<T: Serialize>(&self, value: &T) -> Option<String> {
        match serde_json::to_string(value) {
            Ok(text) => Some(text),
            Err(e) => {
                self.report(e.into());
                None
            }
        }
    }

    async fn write(&self, text: String) {
        if let Err(e) = self.backend.set(&self.key, text).await {
            self.report(e);
        }
    }

    fn report(&self, source: StorageError) {
        self.diagnostics.report(
            PersistError::Io {
                key: self.key.to_string(),
                source,
            },
            None,
        );
    }
}

async fn sync_task<T: Serialize>(
    writer: Writer,
    mode: SyncMode,
    mut changes: mpsc::UnboundedReceiver<T>,
    mut flush_rx: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
) {
    let mut pending: Option<String> = None;
    let mut debounce_until: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;

            maybe = changes.recv() => {
                let Some(value) = maybe else {
                    break;
                };
                let Some(text) = writer.encode(&value) else {
                    continue;
                };
                match mode {
                    SyncMode::Immediate => writer.write(text).await,
                    SyncMode::Debounced(window) => {
                        pending = Some(text);
                        debounce_until = Some(Instant::now() + window);
                    }
                }
            }
            Some(done) = flush_rx.recv() => {
                while let Ok(value) = changes.try_recv() {
                    let Some(text) = writer.encode(&value) else {
                        continue;
                    };
                    match mode {
                        SyncMode::Immediate => writer.write(text).await,
                        SyncMode::Debounced(_) => pending = Some(text),
                    }
                }
                debounce_until = None;
                if let Some(text) = pending.take() {
                    writer.write(text).await;
                }
                let _ = done.send(());
            }
            _ = async {
                if let Some(at) = debounce_until {
                    tokio::time::sleep_until(at).await;
                }
            }, if debounce_until.is_some() => {
                debounce_until = None;
                if let Some(text) = pending.take() {
                    debug!(key = %writer.key, "quiet window elapsed; writing");
                    writer.write(text).await;
                }
            }
        }
    }

    if let Some(text) = pending.take() {
        writer.write(text).await;
    }
    debug!(key = %writer.key, "store closed; sync stopped");
}
