use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Versioned;
use crate::schema::{Validate, Violation, check_version};

pub const REST_HISTORY_VERSION: u32 = 1;
pub const GQL_HISTORY_VERSION: u32 = 1;

pub type StoredRestHistory = Versioned<RestHistoryEntry, LegacyRestEntry>;
pub type StoredGqlHistory = Versioned<GqlHistoryEntry, LegacyGqlEntry>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseMeta {
    pub duration: Option<u64>,
    #[serde(rename = "statusCode")]
    pub status_code: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestHistoryEntry {
    pub v: u32,
    pub request: Map<String, Value>,
    #[serde(rename = "responseMeta")]
    pub response_meta: ResponseMeta,
    #[serde(default)]
    pub star: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(
        rename = "updatedOn",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GqlHistoryEntry {
    pub v: u32,
    pub request: Map<String, Value>,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub star: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(
        rename = "updatedOn",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_on: Option<DateTime<Utc>>,
}

/// Flat REST history entry: the request fields sit next to the response metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LegacyRestEntry(pub Map<String, Value>);

/// Flat GraphQL history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LegacyGqlEntry(pub Map<String, Value>);

fn require_strings(map: &Map<String, Value>, fields: &[&str]) -> Vec<Violation> {
    fields
        .iter()
        .filter(|field| !map.get(**field).is_some_and(Value::is_string))
        .map(|field| Violation::new(format!("$.{field}"), "expected a string"))
        .collect()
}

fn take_updated_on(map: &mut Map<String, Value>) -> Option<DateTime<Utc>> {
    map.remove("updatedOn")
        .and_then(|v| serde_json::from_value(v).ok())
}

impl Validate for RestHistoryEntry {
    fn violations(&self) -> Vec<Violation> {
        check_version(self.v, REST_HISTORY_VERSION).into_iter().collect()
    }
}

impl Validate for GqlHistoryEntry {
    fn violations(&self) -> Vec<Violation> {
        check_version(self.v, GQL_HISTORY_VERSION).into_iter().collect()
    }
}

impl Validate for LegacyRestEntry {
    fn violations(&self) -> Vec<Violation> {
        require_strings(&self.0, &["url", "method"])
    }
}

impl Validate for LegacyGqlEntry {
    fn violations(&self) -> Vec<Violation> {
        require_strings(&self.0, &["url", "query"])
    }
}

impl From<LegacyRestEntry> for RestHistoryEntry {
    fn from(LegacyRestEntry(mut fields): LegacyRestEntry) -> Self {
        let star = fields.remove("star").and_then(|v| v.as_bool()).unwrap_or(false);
        let duration = fields.remove("duration").and_then(|v| v.as_u64());
        let status_code = fields
            .remove("status")
            .and_then(|v| v.as_u64())
            .and_then(|s| u16::try_from(s).ok());
        let id = fields
            .remove("id")
            .and_then(|v| v.as_str().map(str::to_string));
        let updated_on = take_updated_on(&mut fields);

        Self {
            v: REST_HISTORY_VERSION,
            request: fields,
            response_meta: ResponseMeta {
                duration,
                status_code,
            },
            star,
            id,
            updated_on,
        }
    }
}

impl From<LegacyGqlEntry> for GqlHistoryEntry {
    fn from(LegacyGqlEntry(mut fields): LegacyGqlEntry) -> Self {
        let star = fields.remove("star").and_then(|v| v.as_bool()).unwrap_or(false);
        let response = match fields.remove("response") {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let id = fields
            .remove("id")
            .and_then(|v| v.as_str().map(str::to_string));
        let updated_on = take_updated_on(&mut fields);

        Self {
            v: GQL_HISTORY_VERSION,
            request: fields,
            response,
            star,
            id,
            updated_on,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::schema::{ValidationOutcome, validate_text};

    #[test]
    fn flat_rest_entries_fold_into_request_and_response_meta() {
        let raw = json!([{
            "url": "https://echo.example.com",
            "method": "GET",
            "path": "/get",
            "status": 200,
            "duration": 31,
            "star": true,
            "updatedOn": "2023-04-01T10:00:00Z",
        }])
        .to_string();
        let ValidationOutcome::Valid(stored) = validate_text::<Vec<StoredRestHistory>>(&raw) else {
            panic!("legacy history should validate");
        };

        let entry = StoredRestHistory::upgrade_all(stored).remove(0);

        assert_eq!(entry.v, REST_HISTORY_VERSION);
        assert!(entry.star);
        assert_eq!(
            entry.response_meta,
            ResponseMeta {
                duration: Some(31),
                status_code: Some(200),
            }
        );
        assert_eq!(
            Value::Object(entry.request),
            json!({"url": "https://echo.example.com", "method": "GET", "path": "/get"})
        );
        assert!(entry.updated_on.is_some());
    }

    #[test]
    fn legacy_entries_without_a_url_are_rejected() {
        let raw = r#"[{"method":"GET"}]"#;
        let ValidationOutcome::Invalid { .. } = validate_text::<Vec<StoredRestHistory>>(raw) else {
            panic!("entry without url must be rejected");
        };
    }

    #[test]
    fn gql_responses_are_kept_as_text() {
        let raw = json!([{
            "url": "https://api.example.com/graphql",
            "query": "{ me { id } }",
            "response": {"data": {"me": {"id": 1}}},
        }])
        .to_string();
        let ValidationOutcome::Valid(stored) = validate_text::<Vec<StoredGqlHistory>>(&raw) else {
            panic!("legacy gql history should validate");
        };

        let entry = StoredGqlHistory::upgrade_all(stored).remove(0);

        assert_eq!(entry.response, r#"{"data":{"me":{"id":1}}}"#);
        assert!(!entry.star);
    }

    #[test]
    fn upgraded_history_reloads_as_current() {
        let entry: RestHistoryEntry = LegacyRestEntry(
            json!({"url": "u", "method": "POST"})
                .as_object()
                .cloned()
                .unwrap(),
        )
        .into();
        let raw = serde_json::to_string(&vec![entry.clone()]).unwrap();

        let ValidationOutcome::Valid(stored) = validate_text::<Vec<StoredRestHistory>>(&raw) else {
            panic!("persisted history should validate");
        };
        assert!(matches!(stored[0], Versioned::Current(_)));
        assert_eq!(StoredRestHistory::upgrade_all(stored), vec![entry]);
    }
}
