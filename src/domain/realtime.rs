//! Last request of each realtime client. Stored as `null` until the user first
//! connects; `null` loads as the default request.

use serde::{Deserialize, Serialize};

use crate::schema::Validate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebsocketProtocol {
    pub value: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebsocketRequest {
    pub endpoint: String,
    pub protocols: Vec<WebsocketProtocol>,
}

impl Default for WebsocketRequest {
    fn default() -> Self {
        Self {
            endpoint: "wss://echo.example.com".to_string(),
            protocols: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketIoVersion {
    V2,
    V3,
    #[default]
    V4,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SocketIoRequest {
    pub endpoint: String,
    pub path: String,
    pub version: SocketIoVersion,
}

impl Default for SocketIoRequest {
    fn default() -> Self {
        Self {
            endpoint: "wss://echo-socketio.example.com".to_string(),
            path: "/socket.io".to_string(),
            version: SocketIoVersion::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SseRequest {
    pub endpoint: String,
    #[serde(rename = "eventType")]
    pub event_type: String,
}

impl Default for SseRequest {
    fn default() -> Self {
        Self {
            endpoint: "https://express-eventstream.example.com/events".to_string(),
            event_type: "data".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttRequest {
    pub endpoint: String,
    #[serde(rename = "clientID")]
    pub client_id: String,
}

impl Default for MqttRequest {
    fn default() -> Self {
        Self {
            endpoint: "wss://test.mosquitto.org:8081".to_string(),
            client_id: "statesync".to_string(),
        }
    }
}

impl Validate for WebsocketRequest {}
impl Validate for SocketIoRequest {}
impl Validate for SseRequest {}
impl Validate for MqttRequest {}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::schema::{ValidationOutcome, validate_text};

    #[test]
    fn null_loads_as_the_default_request() {
        let ValidationOutcome::Valid(stored) = validate_text::<Option<SocketIoRequest>>("null")
        else {
            panic!("null should validate");
        };
        assert_eq!(stored.unwrap_or_default(), SocketIoRequest::default());
    }

    #[test]
    fn unknown_socketio_versions_are_rejected() {
        let raw = r#"{"endpoint":"wss://x","path":"/socket.io","version":"v9"}"#;
        assert!(!validate_text::<Option<SocketIoRequest>>(raw).is_valid());
    }
}
