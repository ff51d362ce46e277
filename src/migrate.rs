//! One-shot migration of state written by versions that predate per-store keys.
//!
//! The monolith is shrunk and re-persisted after every field it gives up, so an
//! interrupted pass resumes where it stopped on the next boot. A field whose
//! target already holds data is superseded and dropped.

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::{
    backup::{BackupGuard, BackupRecord},
    diagnostics::DiagnosticsHandle,
    domain::{AccentColor, BgColor, PartialSettings, SelectedEnvIndex},
    error::{PersistError, StorageError},
    json_parse,
    schema::Violation,
    storage::{StorageBackend, StoreKey},
};

pub const MONOLITH_KEY: &str = "vuex";
const MONOLITH_SECTION: &str = "postwoman";

pub const SELECTED_ENV_INDEX_KEY: &str = "selectedEnvIndex";
pub const LEGACY_THEME_COLOR_KEY: &str = "THEME_COLOR";
pub const LEGACY_COLOR_MODE_KEY: &str = "nuxt-color-mode";

/// Where a migrated value ends up.
#[derive(Clone)]
pub struct Target {
    pub backend: Arc<dyn StorageBackend>,
    pub key: StoreKey,
}

impl Target {
    pub fn new(backend: Arc<dyn StorageBackend>, key: StoreKey) -> Self {
        Self { backend, key }
    }

    async fn has_data(&self) -> Result<bool, PersistError> {
        let current = self.backend.get(&self.key).await.map_err(io(&self.key))?;
        Ok(current.is_some_and(|text| !text.trim().is_empty()))
    }
}

#[derive(Clone)]
pub struct LegacyTargets {
    pub settings: Target,
    pub collections: Target,
    pub collections_graphql: Target,
    pub environments: Target,
}

impl LegacyTargets {
    fn in_order(&self) -> [(&'static str, &Target); 4] {
        [
            ("settings", &self.settings),
            ("collections", &self.collections),
            ("collectionsGraphql", &self.collections_graphql),
            ("environments", &self.environments),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Monolith fields written to their own store.
    pub migrated: Vec<String>,
    /// Monolith fields dropped because their store already held data.
    pub conflicts: Vec<String>,
    pub selected_env_normalized: bool,
    /// Legacy theme keys folded into the settings.
    pub theme_keys: Vec<String>,
    /// Monolith settings entries the current settings no longer accept.
    pub dropped_settings: Vec<String>,
    /// False when an I/O failure stopped the pass early.
    pub completed: bool,
}

pub struct LegacyMigrator {
    local: Arc<dyn StorageBackend>,
    targets: LegacyTargets,
    guard: BackupGuard,
    diagnostics: DiagnosticsHandle,
}

fn io(key: &StoreKey) -> impl FnOnce(StorageError) -> PersistError + '_ {
    move |source| PersistError::Io {
        key: key.to_string(),
        source,
    }
}

impl LegacyMigrator {
    pub fn new(
        local: Arc<dyn StorageBackend>,
        targets: LegacyTargets,
        diagnostics: DiagnosticsHandle,
    ) -> Self {
        Self {
            guard: BackupGuard::new(local.clone(), diagnostics.clone()),
            local,
            targets,
            diagnostics,
        }
    }

    pub async fn run(&self) -> MigrationReport {
        let mut report = MigrationReport::default();
        match self.migrate(&mut report).await {
            Ok(()) => report.completed = true,
            Err(e) => self.diagnostics.report(e, None),
        }
        info!(
            migrated = ?report.migrated,
            conflicts = ?report.conflicts,
            completed = report.completed,
            "legacy migration pass finished"
        );
        report
    }

    async fn migrate(&self, report: &mut MigrationReport) -> Result<(), PersistError> {
        report.selected_env_normalized = self.normalize_selected_env().await?;
        self.split_monolith(report).await?;
        self.fold_legacy_setting::<AccentColor>(LEGACY_THEME_COLOR_KEY, "THEME_COLOR", report)
            .await?;
        self.fold_legacy_setting::<BgColor>(LEGACY_COLOR_MODE_KEY, "BG_COLOR", report)
            .await?;
        Ok(())
    }

    async fn normalize_selected_env(&self) -> Result<bool, PersistError> {
        let key = StoreKey::new(SELECTED_ENV_INDEX_KEY);
        let Some(raw) = self.local.get(&key).await.map_err(io(&key))? else {
            return Ok(false);
        };
        let Some(selected) = SelectedEnvIndex::from_legacy(&raw) else {
            return Ok(false);
        };

        let text = serde_json::to_string(&selected).map_err(|e| io(&key)(e.into()))?;
        self.local.set(&key, text).await.map_err(io(&key))?;
        debug!(legacy = %raw, "selected environment index normalized");
        Ok(true)
    }

    async fn split_monolith(&self, report: &mut MigrationReport) -> Result<(), PersistError> {
        let key = StoreKey::new(MONOLITH_KEY);
        let Some(raw) = self.local.get(&key).await.map_err(io(&key))? else {
            return Ok(());
        };
        if raw.trim().is_empty() {
            return Ok(());
        }

        let mut monolith = match json_parse::parse(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                let error = PersistError::Schema {
                    key: key.to_string(),
                    violations: vec![Violation::new("$", "expected an object")],
                };
                return self.discard_monolith(&key, raw, error).await;
            }
            Err(source) => {
                let error = PersistError::Parse {
                    key: key.to_string(),
                    source,
                };
                return self.discard_monolith(&key, raw, error).await;
            }
        };

        let mut section = match monolith.remove(MONOLITH_SECTION) {
            Some(Value::Object(section)) => section,
            None | Some(Value::Null) => Map::new(),
            Some(_) => {
                let error = PersistError::Schema {
                    key: key.to_string(),
                    violations: vec![Violation::new(
                        format!("$.{MONOLITH_SECTION}"),
                        "expected an object",
                    )],
                };
                return self.discard_monolith(&key, raw, error).await;
            }
        };

        for (field, target) in self.targets.in_order() {
            let Some(value) = section.remove(field) else {
                continue;
            };

            if !is_blank(&value) {
                if target.has_data().await? {
                    report.conflicts.push(field.to_string());
                    self.diagnostics.report(
                        PersistError::MigrationConflict {
                            field: field.to_string(),
                            key: target.key.to_string(),
                        },
                        None,
                    );
                } else {
                    let value = if field == "settings" {
                        self.merge_legacy_settings(&key, value, report)
                    } else {
                        value
                    };
                    let text =
                        serde_json::to_string(&value).map_err(|e| io(&target.key)(e.into()))?;
                    target
                        .backend
                        .set(&target.key, text)
                        .await
                        .map_err(io(&target.key))?;
                    info!(field, key = %target.key, "legacy field migrated");
                    report.migrated.push(field.to_string());
                }
            }

            self.save_monolith(&key, &monolith, &section).await?;
        }

        if section.is_empty() && monolith.is_empty() {
            self.local.remove(&key).await.map_err(io(&key))?;
        }
        Ok(())
    }

    async fn save_monolith(
        &self,
        key: &StoreKey,
        rest: &Map<String, Value>,
        section: &Map<String, Value>,
    ) -> Result<(), PersistError> {
        if rest.is_empty() && section.is_empty() {
            return self.local.remove(key).await.map_err(io(key));
        }

        let mut monolith = rest.clone();
        if !section.is_empty() {
            monolith.insert(
                MONOLITH_SECTION.to_string(),
                Value::Object(section.clone()),
            );
        }
        let text = serde_json::to_string(&monolith).map_err(|e| io(key)(e.into()))?;
        self.local.set(key, text).await.map_err(io(key))
    }

    async fn discard_monolith(
        &self,
        key: &StoreKey,
        raw: String,
        error: PersistError,
    ) -> Result<(), PersistError> {
        let backup_key = self.back_up(key, raw).await;
        self.diagnostics.report(error, backup_key.clone());
        // Keep the monolith if its backup could not be written.
        if backup_key.is_some() {
            self.local.remove(key).await.map_err(io(key))?;
        }
        Ok(())
    }

    async fn back_up(&self, key: &StoreKey, raw: String) -> Option<StoreKey> {
        self.guard
            .write(BackupRecord {
                original_key: key.clone(),
                content: raw,
            })
            .await
    }

    /// Folds a bare legacy key holding one enumerated setting into the settings
    /// store. Values outside the enumeration, or that cannot be folded because
    /// the stored settings are not an object, are backed up instead.
    async fn fold_legacy_setting<E: DeserializeOwned>(
        &self,
        legacy: &str,
        setting: &str,
        report: &mut MigrationReport,
    ) -> Result<(), PersistError> {
        let key = StoreKey::new(legacy);
        let Some(raw) = self.local.get(&key).await.map_err(io(&key))? else {
            return Ok(());
        };
        if raw.is_empty() {
            return Ok(());
        }

        let candidate = Value::String(raw.clone());
        // A value that was neither folded nor backed up stays where it is.
        let settled = match serde_json::from_value::<E>(candidate.clone()) {
            Ok(_) if self.apply_setting(setting, candidate).await? => {
                report.theme_keys.push(legacy.to_string());
                true
            }
            Ok(_) => {
                let backup_key = self.back_up(&key, raw).await;
                self.diagnostics.report(
                    PersistError::MigrationConflict {
                        field: legacy.to_string(),
                        key: self.targets.settings.key.to_string(),
                    },
                    backup_key.clone(),
                );
                backup_key.is_some()
            }
            Err(e) => {
                let backup_key = self.back_up(&key, raw).await;
                self.diagnostics.report(
                    PersistError::Schema {
                        key: key.to_string(),
                        violations: vec![Violation::new("$", e.to_string())],
                    },
                    backup_key.clone(),
                );
                backup_key.is_some()
            }
        };

        if !settled {
            return Ok(());
        }
        self.local.remove(&key).await.map_err(io(&key))
    }

    /// Merges monolith settings over the defaults. Entries the current settings
    /// reject are dropped and reported so the result always loads.
    fn merge_legacy_settings(
        &self,
        monolith_key: &StoreKey,
        value: Value,
        report: &mut MigrationReport,
    ) -> Value {
        let prefix = format!("$.{MONOLITH_SECTION}.settings");
        let (mut partial, mut dropped) = match value {
            Value::Object(map) => (PartialSettings(map), Vec::new()),
            _ => (
                PartialSettings::default(),
                vec![Violation::new("$", "expected an object")],
            ),
        };
        dropped.extend(partial.retain_known());

        if !dropped.is_empty() {
            let dropped: Vec<_> = dropped.into_iter().map(|v| v.under(&prefix)).collect();
            report
                .dropped_settings
                .extend(dropped.iter().map(|v| v.path.clone()));
            self.diagnostics.report(
                PersistError::Schema {
                    key: monolith_key.to_string(),
                    violations: dropped,
                },
                None,
            );
        }
        Value::Object(partial.merged_object())
    }

    /// Returns false when the stored settings are not an object and were left
    /// for the loader to deal with.
    async fn apply_setting(&self, setting: &str, value: Value) -> Result<bool, PersistError> {
        let target = &self.targets.settings;
        let current = target.backend.get(&target.key).await.map_err(io(&target.key))?;
        let mut settings = match current.as_deref().map(str::trim) {
            None | Some("") => Map::new(),
            Some(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => map,
                _ => return Ok(false),
            },
        };

        settings.insert(setting.to_string(), value);
        let text = serde_json::to_string(&settings).map_err(|e| io(&target.key)(e.into()))?;
        target
            .backend
            .set(&target.key, text)
            .await
            .map_err(io(&target.key))?;
        Ok(true)
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
