use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::warn;

use crate::{error::PersistError, storage::StoreKey};

/// A non-fatal problem the engine recovered from.
#[derive(Debug)]
pub struct Diagnostic {
    pub at: DateTime<Utc>,
    pub error: PersistError,
    /// Where the rejected raw value was preserved, if anywhere.
    pub backup_key: Option<StoreKey>,
}

impl Diagnostic {
    pub fn code(&self) -> &'static str {
        self.error.code()
    }
}

pub type DiagnosticsReceiver = mpsc::UnboundedReceiver<Diagnostic>;

#[derive(Debug, Clone)]
pub struct DiagnosticsHandle {
    tx: Option<mpsc::UnboundedSender<Diagnostic>>,
}

impl DiagnosticsHandle {
    pub fn channel() -> (Self, DiagnosticsReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Logs only.
    pub fn noop() -> Self {
        Self { tx: None }
    }

    pub fn report(&self, error: PersistError, backup_key: Option<StoreKey>) {
        match &backup_key {
            Some(backup) => warn!(
                code = error.code(),
                key = error.key(),
                backup = %backup,
                error = %error,
                "recovered from invalid stored value"
            ),
            None => warn!(
                code = error.code(),
                key = error.key(),
                error = %error,
                "persistence problem"
            ),
        }

        if let Some(tx) = &self.tx {
            let _ = tx.send(Diagnostic {
                at: Utc::now(),
                error,
                backup_key,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn reports_reach_the_receiver() {
        let (handle, mut rx) = DiagnosticsHandle::channel();
        handle.report(
            PersistError::MigrationConflict {
                field: "collections".to_string(),
                key: "/data/collections.json".to_string(),
            },
            None,
        );

        let diagnostic = rx.try_recv().unwrap();
        assert_eq!(diagnostic.code(), "migration_conflict");
        assert_eq!(diagnostic.error.key(), "/data/collections.json");
        assert!(diagnostic.backup_key.is_none());
    }

    #[test]
    fn noop_handle_drops_reports() {
        DiagnosticsHandle::noop().report(
            PersistError::MigrationConflict {
                field: "settings".to_string(),
                key: "settings".to_string(),
            },
            None,
        );
    }
}
