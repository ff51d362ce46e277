//! Engine start-up: storage root, legacy migration, per-store load and sync.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::{
    backup::{BackupGuard, BackupRecord, collect_backups},
    catalog::{Catalog, StoreConfig, StoreName},
    diagnostics::{DiagnosticsHandle, DiagnosticsReceiver},
    domain::{
        Collection, Environment, EnvironmentVariable, GqlHistoryEntry, LocalState, MqttRequest,
        RestHistoryEntry, SecretEnvironments, SelectedEnvIndex, Settings, SocketIoRequest,
        SseRequest, TabState, WebsocketRequest, promote_globals,
    },
    error::{PersistError, StorageError},
    migrate::{LegacyMigrator, LegacyTargets, MigrationReport, Target},
    schema::Validate,
    storage::{
        CommandBoundary, FileBackend, KeyValueMedium, LocalBackend, Medium, StorageBackend,
        StorageRoot, StoreKey,
    },
    store::Store,
    sync::{self, Subscription, SyncMode},
    vcs::{GitCli, RepoHandle, VersionControl},
};

pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Debounce interval of high-churn stores.
    pub quiet_window: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            quiet_window: DEFAULT_QUIET_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootPhase {
    Uninitialized,
    StorageRootResolved,
    LegacyMigrated,
    StoresLoaded,
    SubscriptionsActive,
}

pub struct Bootstrapper {
    local: Arc<dyn KeyValueMedium>,
    commands: Arc<dyn CommandBoundary>,
    vcs: Arc<dyn VersionControl>,
    options: EngineOptions,
}

/// Everything known once the storage root is resolved and the legacy pass ran.
struct Prepared {
    root: StorageRoot,
    root_provisioned: bool,
    local_backend: Arc<dyn StorageBackend>,
    file_backend: Arc<dyn StorageBackend>,
    catalog: Catalog,
    migration: MigrationReport,
}

impl Prepared {
    fn backend(&self, medium: Medium) -> Arc<dyn StorageBackend> {
        match medium {
            Medium::Local => self.local_backend.clone(),
            Medium::File => self.file_backend.clone(),
        }
    }
}

struct Loader<'a> {
    local: (&'a dyn StorageBackend, BackupGuard),
    file: (&'a dyn StorageBackend, BackupGuard),
    diagnostics: &'a DiagnosticsHandle,
}

impl Loader<'_> {
    async fn load<S, T>(&self, config: &StoreConfig<S, T>) -> T
    where
        S: serde::de::DeserializeOwned + Validate,
    {
        let (backend, guard) = match config.medium() {
            Medium::Local => &self.local,
            Medium::File => &self.file,
        };
        config.load(*backend, guard, self.diagnostics).await
    }
}

impl Bootstrapper {
    pub fn new(local: Arc<dyn KeyValueMedium>, commands: Arc<dyn CommandBoundary>) -> Self {
        Self {
            local,
            commands,
            vcs: Arc::new(GitCli::default()),
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_vcs(mut self, vcs: Arc<dyn VersionControl>) -> Self {
        self.vcs = vcs;
        self
    }

    fn enter(phase: BootPhase) {
        info!(?phase, "bootstrap phase");
    }

    async fn prepare(&self, diagnostics: &DiagnosticsHandle) -> anyhow::Result<Prepared> {
        Self::enter(BootPhase::Uninitialized);
        let (root, root_provisioned) =
            StorageRoot::resolve(self.local.as_ref(), self.commands.as_ref())
                .await
                .context("resolve storage root")?;
        info!(root = %root.as_str(), provisioned = root_provisioned, "storage root");
        Self::enter(BootPhase::StorageRootResolved);

        let local_backend: Arc<dyn StorageBackend> =
            Arc::new(LocalBackend::new(self.local.clone()));
        let file_backend: Arc<dyn StorageBackend> =
            Arc::new(FileBackend::new(self.commands.clone()));
        let catalog = Catalog::new(&root, self.options.quiet_window);

        let targets = LegacyTargets {
            settings: Target::new(local_backend.clone(), catalog.settings.key.clone()),
            collections: Target::new(file_backend.clone(), catalog.rest_collections.key.clone()),
            collections_graphql: Target::new(
                file_backend.clone(),
                catalog.gql_collections.key.clone(),
            ),
            environments: Target::new(file_backend.clone(), catalog.environments.key.clone()),
        };
        let migration = LegacyMigrator::new(local_backend.clone(), targets, diagnostics.clone())
            .run()
            .await;
        Self::enter(BootPhase::LegacyMigrated);

        Ok(Prepared {
            root,
            root_provisioned,
            local_backend,
            file_backend,
            catalog,
            migration,
        })
    }

    /// Resolves the storage root and runs the legacy pass without loading any
    /// store.
    pub async fn migrate_only(&self) -> anyhow::Result<(StorageRoot, MigrationReport)> {
        let prepared = self.prepare(&DiagnosticsHandle::noop()).await?;
        Ok((prepared.root, prepared.migration))
    }

    /// Brings every store up. The session is returned only once all stores are
    /// loaded and their sync is attached, so no mutation can precede a load.
    ///
    /// Only a failure to resolve the storage root is an error; everything else
    /// is recovered from and reported through the session's diagnostics.
    pub async fn run(self) -> anyhow::Result<Session> {
        let (diagnostics, diagnostics_rx) = DiagnosticsHandle::channel();
        let prepared = self.prepare(&diagnostics).await?;
        let catalog = &prepared.catalog;

        let loader = Loader {
            local: (
                prepared.local_backend.as_ref(),
                BackupGuard::new(prepared.local_backend.clone(), diagnostics.clone()),
            ),
            file: (
                prepared.file_backend.as_ref(),
                BackupGuard::new(prepared.file_backend.clone(), diagnostics.clone()),
            ),
            diagnostics: &diagnostics,
        };

        let (
            local_state,
            settings,
            rest_tabs,
            gql_tabs,
            selected_env,
            websocket,
            socketio,
            sse,
            mqtt,
            rest_history,
            gql_history,
            rest_collections,
            gql_collections,
            mut environments,
            mut global_env,
            secret_environments,
        ) = tokio::join!(
            loader.load(&catalog.local_state),
            loader.load(&catalog.settings),
            loader.load(&catalog.rest_tabs),
            loader.load(&catalog.gql_tabs),
            loader.load(&catalog.selected_env),
            loader.load(&catalog.websocket),
            loader.load(&catalog.socketio),
            loader.load(&catalog.sse),
            loader.load(&catalog.mqtt),
            loader.load(&catalog.rest_history),
            loader.load(&catalog.gql_history),
            loader.load(&catalog.rest_collections),
            loader.load(&catalog.gql_collections),
            loader.load(&catalog.environments),
            loader.load(&catalog.global_env),
            loader.load(&catalog.secret_environments),
        );
        drop(loader);

        if promote_globals(&mut environments, &mut global_env) {
            info!(globals = global_env.len(), "promoted legacy globals environment");
            // Globals are written before the environments they came from.
            let file = prepared.file_backend.as_ref();
            persist_or_report(file, &catalog.global_env.key, &global_env, &diagnostics).await;
            persist_or_report(file, &catalog.environments.key, &environments, &diagnostics).await;
        }
        Self::enter(BootPhase::StoresLoaded);

        let stores = Stores {
            local_state: Store::new(StoreName::LocalState.as_str(), local_state),
            settings: Store::new(StoreName::Settings.as_str(), settings),
            rest_tabs: Store::new(StoreName::RestTabs.as_str(), rest_tabs),
            gql_tabs: Store::new(StoreName::GqlTabs.as_str(), gql_tabs),
            selected_env: Store::new(StoreName::SelectedEnv.as_str(), selected_env),
            websocket: Store::new(StoreName::Websocket.as_str(), websocket),
            socketio: Store::new(StoreName::SocketIo.as_str(), socketio),
            sse: Store::new(StoreName::Sse.as_str(), sse),
            mqtt: Store::new(StoreName::Mqtt.as_str(), mqtt),
            rest_history: Store::new(StoreName::RestHistory.as_str(), rest_history),
            gql_history: Store::new(StoreName::GqlHistory.as_str(), gql_history),
            rest_collections: Store::new(StoreName::RestCollections.as_str(), rest_collections),
            gql_collections: Store::new(StoreName::GqlCollections.as_str(), gql_collections),
            environments: Store::new(StoreName::Environments.as_str(), environments),
            global_env: Store::new(StoreName::GlobalEnv.as_str(), global_env),
            secret_environments: Store::new(
                StoreName::SecretEnvironments.as_str(),
                secret_environments,
            ),
        };

        let attach = Attacher {
            prepared: &prepared,
            diagnostics: &diagnostics,
        };
        let subscriptions = vec![
            attach.store(&stores.local_state, &catalog.local_state),
            attach.store(&stores.settings, &catalog.settings),
            attach.store(&stores.rest_tabs, &catalog.rest_tabs),
            attach.store(&stores.gql_tabs, &catalog.gql_tabs),
            attach.store(&stores.selected_env, &catalog.selected_env),
            attach.store(&stores.websocket, &catalog.websocket),
            attach.store(&stores.socketio, &catalog.socketio),
            attach.store(&stores.sse, &catalog.sse),
            attach.store(&stores.mqtt, &catalog.mqtt),
            attach.store(&stores.rest_history, &catalog.rest_history),
            attach.store(&stores.gql_history, &catalog.gql_history),
            attach.store(&stores.rest_collections, &catalog.rest_collections),
            attach.store(&stores.gql_collections, &catalog.gql_collections),
            attach.store(&stores.environments, &catalog.environments),
            attach.store(&stores.global_env, &catalog.global_env),
            attach.store(&stores.secret_environments, &catalog.secret_environments),
        ];
        Self::enter(BootPhase::SubscriptionsActive);

        Ok(Session {
            repo: RepoHandle::new(self.vcs.clone(), prepared.root.clone()),
            stores,
            subscriptions,
            diagnostics: Some(diagnostics_rx),
            local: self.local.clone(),
            prepared,
        })
    }
}

async fn persist_or_report<T: Serialize>(
    backend: &dyn StorageBackend,
    key: &StoreKey,
    value: &T,
    diagnostics: &DiagnosticsHandle,
) {
    if let Err(source) = sync::persist(backend, key, value).await {
        diagnostics.report(
            PersistError::Io {
                key: key.to_string(),
                source,
            },
            None,
        );
    }
}

struct Attacher<'a> {
    prepared: &'a Prepared,
    diagnostics: &'a DiagnosticsHandle,
}

impl Attacher<'_> {
    fn store<S, T>(&self, store: &Store<T>, config: &StoreConfig<S, T>) -> Subscription
    where
        T: Serialize + Clone + Send + 'static,
    {
        sync::attach(
            store,
            config.key.clone(),
            self.prepared.backend(config.name.medium()),
            SyncMode::from_debounce(config.debounce),
            self.diagnostics.clone(),
        )
    }
}

/// The in-memory stores of a session.
#[derive(Clone)]
pub struct Stores {
    pub local_state: Store<LocalState>,
    pub settings: Store<Settings>,
    pub rest_tabs: Store<TabState>,
    pub gql_tabs: Store<TabState>,
    pub selected_env: Store<SelectedEnvIndex>,
    pub websocket: Store<WebsocketRequest>,
    pub socketio: Store<SocketIoRequest>,
    pub sse: Store<SseRequest>,
    pub mqtt: Store<MqttRequest>,
    pub rest_history: Store<Vec<RestHistoryEntry>>,
    pub gql_history: Store<Vec<GqlHistoryEntry>>,
    pub rest_collections: Store<Vec<Collection>>,
    pub gql_collections: Store<Vec<Collection>>,
    pub environments: Store<Vec<Environment>>,
    pub global_env: Store<Vec<EnvironmentVariable>>,
    pub secret_environments: Store<SecretEnvironments>,
}

impl Stores {
    /// Current value of one store as JSON.
    pub fn snapshot(&self, name: StoreName) -> Result<Value, serde_json::Error> {
        match name {
            StoreName::LocalState => serde_json::to_value(self.local_state.get()),
            StoreName::Settings => serde_json::to_value(self.settings.get()),
            StoreName::RestTabs => serde_json::to_value(self.rest_tabs.get()),
            StoreName::GqlTabs => serde_json::to_value(self.gql_tabs.get()),
            StoreName::SelectedEnv => serde_json::to_value(self.selected_env.get()),
            StoreName::Websocket => serde_json::to_value(self.websocket.get()),
            StoreName::SocketIo => serde_json::to_value(self.socketio.get()),
            StoreName::Sse => serde_json::to_value(self.sse.get()),
            StoreName::Mqtt => serde_json::to_value(self.mqtt.get()),
            StoreName::RestHistory => serde_json::to_value(self.rest_history.get()),
            StoreName::GqlHistory => serde_json::to_value(self.gql_history.get()),
            StoreName::RestCollections => serde_json::to_value(self.rest_collections.get()),
            StoreName::GqlCollections => serde_json::to_value(self.gql_collections.get()),
            StoreName::Environments => serde_json::to_value(self.environments.get()),
            StoreName::GlobalEnv => serde_json::to_value(self.global_env.get()),
            StoreName::SecretEnvironments => {
                serde_json::to_value(self.secret_environments.get())
            }
        }
    }
}

/// A running engine: every store loaded and kept in sync with its medium.
pub struct Session {
    pub stores: Stores,
    subscriptions: Vec<Subscription>,
    diagnostics: Option<DiagnosticsReceiver>,
    local: Arc<dyn KeyValueMedium>,
    repo: RepoHandle,
    prepared: Prepared,
}

impl Session {
    pub fn root(&self) -> &StorageRoot {
        &self.prepared.root
    }

    /// True when this run provisioned the storage root.
    pub fn root_provisioned(&self) -> bool {
        self.prepared.root_provisioned
    }

    pub fn migration(&self) -> &MigrationReport {
        &self.prepared.migration
    }

    pub fn catalog(&self) -> &Catalog {
        &self.prepared.catalog
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// The receiver can be taken once.
    pub fn take_diagnostics(&mut self) -> Option<DiagnosticsReceiver> {
        self.diagnostics.take()
    }

    pub fn repo(&self) -> &RepoHandle {
        &self.repo
    }

    pub fn get_local_config(&self, key: &str) -> Option<String> {
        self.local.get(key)
    }

    pub fn set_local_config(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.local.set(key, value)
    }

    pub fn remove_local_config(&self, key: &str) -> Result<(), StorageError> {
        self.local.remove(key)
    }

    /// Writes every change still held back by a quiet window.
    pub async fn flush(&self) {
        for subscription in &self.subscriptions {
            subscription.flush().await;
        }
    }

    /// Current backups of every store, for manual recovery.
    pub async fn backups(&self) -> Vec<BackupRecord> {
        let mut out = Vec::new();
        for medium in [Medium::Local, Medium::File] {
            let keys = StoreName::ALL
                .iter()
                .filter(|name| name.medium() == medium)
                .map(|name| name.key(&self.prepared.root));
            out.extend(collect_backups(self.prepared.backend(medium).as_ref(), keys).await);
        }
        out
    }
}
