//! Stored shapes of every logical store and their translation into the
//! in-memory entities the application works with.

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::schema::{Validate, Violation};

pub mod collections;
pub mod environments;
pub mod history;
pub mod local_state;
pub mod realtime;
pub mod settings;
pub mod tabs;

pub use collections::{Collection, LegacyCollection, StoredCollection};
pub use environments::{
    Environment, EnvironmentVariable, SecretEnvironments, SecretVariable, SelectedEnvIndex,
    promote_globals,
};
pub use history::{GqlHistoryEntry, RestHistoryEntry, StoredGqlHistory, StoredRestHistory};
pub use local_state::LocalState;
pub use realtime::{MqttRequest, SocketIoRequest, SseRequest, WebsocketRequest};
pub use settings::{AccentColor, BgColor, PartialSettings, Settings};
pub use tabs::{PersistedTab, TabState};

/// A stored record in either its current versioned shape (it carries `v`) or
/// the unversioned legacy shape that predates it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Versioned<C, L> {
    Current(C),
    Legacy(L),
}

impl<'de, C, L> Deserialize<'de> for Versioned<C, L>
where
    C: DeserializeOwned,
    L: DeserializeOwned,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let value = Value::deserialize(deserializer)?;
        if value.as_object().is_some_and(|o| o.contains_key("v")) {
            serde_json::from_value(value)
                .map(Self::Current)
                .map_err(D::Error::custom)
        } else {
            serde_json::from_value(value)
                .map(Self::Legacy)
                .map_err(D::Error::custom)
        }
    }
}

impl<C: Validate, L: Validate> Validate for Versioned<C, L> {
    fn violations(&self) -> Vec<Violation> {
        match self {
            Self::Current(current) => current.violations(),
            Self::Legacy(legacy) => legacy.violations(),
        }
    }
}

impl<C, L: Into<C>> Versioned<C, L> {
    pub fn upgrade(self) -> C {
        match self {
            Self::Current(current) => current,
            Self::Legacy(legacy) => legacy.into(),
        }
    }

    pub fn upgrade_all(records: Vec<Self>) -> Vec<C> {
        records.into_iter().map(Self::upgrade).collect()
    }
}
