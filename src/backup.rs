//! Containment of invalid stored values.
//!
//! A rejected value is copied verbatim under `<key>-backup` and replaced by the
//! store default. Only the latest rejection per key is kept. Backups are never
//! loaded back; they exist for manual recovery.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::{
    diagnostics::DiagnosticsHandle,
    error::PersistError,
    schema::{Rejection, ValidationOutcome},
    storage::{StorageBackend, StoreKey},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    pub original_key: StoreKey,
    pub content: String,
}

impl BackupRecord {
    pub fn key(&self) -> StoreKey {
        self.original_key.backup()
    }
}

#[derive(Clone)]
pub struct BackupGuard {
    backend: Arc<dyn StorageBackend>,
    diagnostics: DiagnosticsHandle,
}

impl BackupGuard {
    pub fn new(backend: Arc<dyn StorageBackend>, diagnostics: DiagnosticsHandle) -> Self {
        Self {
            backend,
            diagnostics,
        }
    }

    /// Passes valid values through. Anything else is backed up, reported and
    /// replaced by `default()`.
    pub async fn guard<T>(
        &self,
        key: &StoreKey,
        outcome: ValidationOutcome<T>,
        default: impl FnOnce() -> T,
    ) -> T {
        match outcome {
            ValidationOutcome::Valid(value) => value,
            ValidationOutcome::Invalid { raw, rejection } => {
                let error = match rejection {
                    Rejection::Parse(source) => PersistError::Parse {
                        key: key.to_string(),
                        source,
                    },
                    Rejection::Schema(violations) => PersistError::Schema {
                        key: key.to_string(),
                        violations,
                    },
                };
                let record = BackupRecord {
                    original_key: key.clone(),
                    content: raw,
                };
                let backup_key = self.write(record).await;
                self.diagnostics.report(error, backup_key);
                default()
            }
        }
    }

    /// Writes `record` under its backup key. Returns the key when the write
    /// succeeded.
    pub async fn write(&self, record: BackupRecord) -> Option<StoreKey> {
        let backup_key = record.key();
        match self.backend.set(&backup_key, record.content).await {
            Ok(()) => {
                info!(key = %record.original_key, backup = %backup_key, "backup written");
                Some(backup_key)
            }
            Err(e) => {
                self.diagnostics.report(
                    PersistError::Io {
                        key: backup_key.to_string(),
                        source: e,
                    },
                    None,
                );
                None
            }
        }
    }
}

/// Reads the current backup of every key in `keys` that has one.
pub async fn collect_backups(
    backend: &dyn StorageBackend,
    keys: impl IntoIterator<Item = StoreKey>,
) -> Vec<BackupRecord> {
    let mut out = Vec::new();
    for original_key in keys {
        if let Ok(Some(content)) = backend.get(&original_key.backup()).await {
            out.push(BackupRecord {
                original_key,
                content,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::{
        domain::PartialSettings,
        schema::validate_text,
        storage::testing::RecordingBackend,
    };

    fn guard_with(
        backend: Arc<RecordingBackend>,
    ) -> (BackupGuard, crate::diagnostics::DiagnosticsReceiver) {
        let (diagnostics, rx) = DiagnosticsHandle::channel();
        (BackupGuard::new(backend, diagnostics), rx)
    }

    #[tokio::test]
    async fn valid_values_pass_through_without_backup() {
        let backend = Arc::new(RecordingBackend::default());
        let (guard, mut rx) = guard_with(backend.clone());
        let key = StoreKey::new("settings");

        let outcome = validate_text::<PartialSettings>(r#"{"SIDEBAR":false}"#);
        let value = guard.guard(&key, outcome, PartialSettings::default).await;

        assert_eq!(value.0.len(), 1);
        assert!(backend.writes().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn schema_mismatch_keeps_the_literal_text_and_applies_default() {
        let backend = Arc::new(RecordingBackend::default());
        let (guard, mut rx) = guard_with(backend.clone());
        let key = StoreKey::new("settings");
        let raw = r#"{"THEME":123}"#;

        let outcome = validate_text::<PartialSettings>(raw);
        let value = guard.guard(&key, outcome, PartialSettings::default).await;

        assert_eq!(value, PartialSettings::default());
        assert_eq!(backend.value("settings-backup").as_deref(), Some(raw));
        let diagnostic = rx.try_recv().unwrap();
        assert_eq!(diagnostic.code(), "schema_violation");
        assert_eq!(diagnostic.backup_key, Some(StoreKey::new("settings-backup")));
    }

    #[tokio::test]
    async fn only_the_latest_rejection_is_kept() {
        let backend = Arc::new(RecordingBackend::default());
        let (guard, _rx) = guard_with(backend.clone());
        let key = StoreKey::new("settings");

        for raw in ["{bad", "[1,2]"] {
            let outcome = validate_text::<PartialSettings>(raw);
            guard.guard(&key, outcome, PartialSettings::default).await;
        }

        assert_eq!(backend.value("settings-backup").as_deref(), Some("[1,2]"));
    }

    #[tokio::test]
    async fn failed_backup_write_is_reported() {
        let backend = Arc::new(RecordingBackend::default());
        backend.fail_after(0);
        let (guard, mut rx) = guard_with(backend.clone());

        let outcome = validate_text::<PartialSettings>("nope");
        guard
            .guard(&StoreKey::new("settings"), outcome, PartialSettings::default)
            .await;

        let codes: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|d| d.code())
            .collect();
        assert_eq!(codes, vec!["io_error", "parse_error"]);
    }

    #[tokio::test]
    async fn backups_are_listed_per_store() {
        let backend = RecordingBackend::with(&[("settings-backup", "{bad"), ("localState", "{}")]);

        let records = collect_backups(
            &backend,
            [StoreKey::new("settings"), StoreKey::new("localState")],
        )
        .await;

        assert_eq!(
            records,
            vec![BackupRecord {
                original_key: StoreKey::new("settings"),
                content: "{bad".to_string(),
            }]
        );
    }

    proptest! {
        #[test]
        fn malformed_input_survives_byte_for_byte(raw in "\\PC*") {
            let outcome = validate_text::<PartialSettings>(&raw);
            prop_assume!(!outcome.is_valid());

            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let backend = Arc::new(RecordingBackend::default());
            let guard = BackupGuard::new(backend.clone(), DiagnosticsHandle::noop());
            rt.block_on(guard.guard(&StoreKey::new("settings"), outcome, PartialSettings::default));

            prop_assert_eq!(backend.value("settings-backup"), Some(raw));
        }
    }
}
