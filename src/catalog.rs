//! The logical stores and how each one is loaded.

use std::{convert::identity, time::Duration};

use clap::ValueEnum;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    backup::BackupGuard,
    diagnostics::DiagnosticsHandle,
    domain::{
        Collection, Environment, EnvironmentVariable, GqlHistoryEntry, LocalState, MqttRequest,
        PartialSettings, RestHistoryEntry, SecretEnvironments, SelectedEnvIndex, Settings,
        SocketIoRequest, SseRequest, StoredCollection, StoredGqlHistory, StoredRestHistory,
        TabState, WebsocketRequest,
    },
    error::PersistError,
    schema::{Validate, validate_text},
    storage::{Medium, StorageBackend, StorageRoot, StoreKey},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum StoreName {
    LocalState,
    Settings,
    RestTabs,
    GqlTabs,
    SelectedEnv,
    Websocket,
    SocketIo,
    Sse,
    Mqtt,
    RestHistory,
    GqlHistory,
    RestCollections,
    GqlCollections,
    Environments,
    GlobalEnv,
    SecretEnvironments,
}

impl StoreName {
    pub const ALL: [StoreName; 16] = [
        Self::LocalState,
        Self::Settings,
        Self::RestTabs,
        Self::GqlTabs,
        Self::SelectedEnv,
        Self::Websocket,
        Self::SocketIo,
        Self::Sse,
        Self::Mqtt,
        Self::RestHistory,
        Self::GqlHistory,
        Self::RestCollections,
        Self::GqlCollections,
        Self::Environments,
        Self::GlobalEnv,
        Self::SecretEnvironments,
    ];

    /// Local key, or file stem under the storage root.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalState => "localState",
            Self::Settings => "settings",
            Self::RestTabs => "restTabState",
            Self::GqlTabs => "gqlTabState",
            Self::SelectedEnv => "selectedEnvIndex",
            Self::Websocket => "WebsocketRequest",
            Self::SocketIo => "SocketIORequest",
            Self::Sse => "SSERequest",
            Self::Mqtt => "MQTTRequest",
            Self::RestHistory => "history",
            Self::GqlHistory => "graphqlHistory",
            Self::RestCollections => "collections",
            Self::GqlCollections => "collectionsGraphql",
            Self::Environments => "environments",
            Self::GlobalEnv => "globalEnv",
            Self::SecretEnvironments => "secretEnvironments",
        }
    }

    pub fn medium(self) -> Medium {
        match self {
            Self::LocalState
            | Self::Settings
            | Self::RestTabs
            | Self::GqlTabs
            | Self::SelectedEnv
            | Self::Websocket
            | Self::SocketIo
            | Self::Sse
            | Self::Mqtt => Medium::Local,
            Self::RestHistory
            | Self::GqlHistory
            | Self::RestCollections
            | Self::GqlCollections
            | Self::Environments
            | Self::GlobalEnv
            | Self::SecretEnvironments => Medium::File,
        }
    }

    pub fn key(self, root: &StorageRoot) -> StoreKey {
        match self.medium() {
            Medium::Local => StoreKey::new(self.as_str()),
            Medium::File => root.file_key(self.as_str()),
        }
    }

    /// High-churn stores are written once changes settle.
    pub fn debounced(self) -> bool {
        matches!(
            self,
            Self::RestTabs | Self::GqlTabs | Self::SecretEnvironments
        )
    }
}

/// Static descriptor of one logical store: `S` is the stored shape, `T` the
/// in-memory entity it loads into.
#[derive(Debug, Clone)]
pub struct StoreConfig<S, T> {
    pub name: StoreName,
    pub key: StoreKey,
    pub debounce: Option<Duration>,
    pub default: fn() -> S,
    pub on_load: fn(S) -> T,
}

impl<S, T> StoreConfig<S, T>
where
    S: DeserializeOwned + Validate,
{
    fn new(
        name: StoreName,
        root: &StorageRoot,
        quiet_window: Duration,
        default: fn() -> S,
        on_load: fn(S) -> T,
    ) -> Self {
        Self {
            name,
            key: name.key(root),
            debounce: name.debounced().then_some(quiet_window),
            default,
            on_load,
        }
    }

    pub fn medium(&self) -> Medium {
        self.name.medium()
    }

    /// Read, validate with backup, translate.
    ///
    /// Missing or blank text is "no data yet" and loads the default without a
    /// backup. A failed read is reported and treated the same way.
    pub async fn load(
        &self,
        backend: &dyn StorageBackend,
        guard: &BackupGuard,
        diagnostics: &DiagnosticsHandle,
    ) -> T {
        let raw = match backend.get(&self.key).await {
            Ok(raw) => raw,
            Err(source) => {
                diagnostics.report(
                    PersistError::Io {
                        key: self.key.to_string(),
                        source,
                    },
                    None,
                );
                None
            }
        };

        let stored = match raw.filter(|text| !text.trim().is_empty()) {
            None => {
                debug!(key = %self.key, "no stored value; using default");
                (self.default)()
            }
            Some(raw) => {
                guard
                    .guard(&self.key, validate_text::<S>(&raw), self.default)
                    .await
            }
        };
        (self.on_load)(stored)
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    pub local_state: StoreConfig<LocalState, LocalState>,
    pub settings: StoreConfig<PartialSettings, Settings>,
    pub rest_tabs: StoreConfig<TabState, TabState>,
    pub gql_tabs: StoreConfig<TabState, TabState>,
    pub selected_env: StoreConfig<SelectedEnvIndex, SelectedEnvIndex>,
    pub websocket: StoreConfig<Option<WebsocketRequest>, WebsocketRequest>,
    pub socketio: StoreConfig<Option<SocketIoRequest>, SocketIoRequest>,
    pub sse: StoreConfig<Option<SseRequest>, SseRequest>,
    pub mqtt: StoreConfig<Option<MqttRequest>, MqttRequest>,
    pub rest_history: StoreConfig<Vec<StoredRestHistory>, Vec<RestHistoryEntry>>,
    pub gql_history: StoreConfig<Vec<StoredGqlHistory>, Vec<GqlHistoryEntry>>,
    pub rest_collections: StoreConfig<Vec<StoredCollection>, Vec<Collection>>,
    pub gql_collections: StoreConfig<Vec<StoredCollection>, Vec<Collection>>,
    pub environments: StoreConfig<Vec<Environment>, Vec<Environment>>,
    pub global_env: StoreConfig<Vec<EnvironmentVariable>, Vec<EnvironmentVariable>>,
    pub secret_environments: StoreConfig<SecretEnvironments, SecretEnvironments>,
}

impl Catalog {
    pub fn new(root: &StorageRoot, quiet_window: Duration) -> Self {
        let q = quiet_window;
        Self {
            local_state: StoreConfig::new(
                StoreName::LocalState,
                root,
                q,
                LocalState::default,
                identity,
            ),
            settings: StoreConfig::new(
                StoreName::Settings,
                root,
                q,
                PartialSettings::default,
                PartialSettings::resolve,
            ),
            rest_tabs: StoreConfig::new(StoreName::RestTabs, root, q, TabState::default, identity),
            gql_tabs: StoreConfig::new(StoreName::GqlTabs, root, q, TabState::default, identity),
            selected_env: StoreConfig::new(
                StoreName::SelectedEnv,
                root,
                q,
                SelectedEnvIndex::default,
                identity,
            ),
            websocket: StoreConfig::new(
                StoreName::Websocket,
                root,
                q,
                || None,
                Option::unwrap_or_default,
            ),
            socketio: StoreConfig::new(
                StoreName::SocketIo,
                root,
                q,
                || None,
                Option::unwrap_or_default,
            ),
            sse: StoreConfig::new(StoreName::Sse, root, q, || None, Option::unwrap_or_default),
            mqtt: StoreConfig::new(StoreName::Mqtt, root, q, || None, Option::unwrap_or_default),
            rest_history: StoreConfig::new(
                StoreName::RestHistory,
                root,
                q,
                Vec::new,
                StoredRestHistory::upgrade_all,
            ),
            gql_history: StoreConfig::new(
                StoreName::GqlHistory,
                root,
                q,
                Vec::new,
                StoredGqlHistory::upgrade_all,
            ),
            rest_collections: StoreConfig::new(
                StoreName::RestCollections,
                root,
                q,
                Vec::new,
                StoredCollection::upgrade_all,
            ),
            gql_collections: StoreConfig::new(
                StoreName::GqlCollections,
                root,
                q,
                Vec::new,
                StoredCollection::upgrade_all,
            ),
            environments: StoreConfig::new(StoreName::Environments, root, q, Vec::new, identity),
            global_env: StoreConfig::new(StoreName::GlobalEnv, root, q, Vec::new, identity),
            secret_environments: StoreConfig::new(
                StoreName::SecretEnvironments,
                root,
                q,
                SecretEnvironments::default,
                identity,
            ),
        }
    }
}
