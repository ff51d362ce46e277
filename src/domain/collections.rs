use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::Versioned;
use crate::schema::{Validate, Violation, check_version};

pub const COLLECTION_VERSION: u32 = 2;

pub type StoredCollection = Versioned<Collection, LegacyCollection>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Collection {
    pub v: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub folders: Vec<Collection>,
    #[serde(default)]
    pub requests: Vec<Map<String, Value>>,
    #[serde(default = "default_auth")]
    pub auth: Map<String, Value>,
    #[serde(default)]
    pub headers: Vec<Value>,
}

/// Collection shape written before collections were versioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LegacyCollection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub folders: Vec<LegacyCollection>,
    #[serde(default)]
    pub requests: Vec<Map<String, Value>>,
}

/// Collections without their own auth inherit it from the parent.
pub fn default_auth() -> Map<String, Value> {
    match json!({ "authType": "inherit", "authActive": true }) {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl From<LegacyCollection> for Collection {
    fn from(legacy: LegacyCollection) -> Self {
        Self {
            v: COLLECTION_VERSION,
            id: legacy.id,
            name: legacy.name,
            folders: legacy.folders.into_iter().map(Collection::from).collect(),
            requests: legacy.requests,
            auth: default_auth(),
            headers: Vec::new(),
        }
    }
}

impl Validate for Collection {
    fn violations(&self) -> Vec<Violation> {
        let mut out: Vec<_> = check_version(self.v, COLLECTION_VERSION)
            .into_iter()
            .collect();
        out.extend(
            self.folders
                .violations()
                .into_iter()
                .map(|v| v.under("$.folders")),
        );
        out
    }
}

impl Validate for LegacyCollection {}
