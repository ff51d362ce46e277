use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{Validate, Violation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistedTab {
    #[serde(rename = "tabID")]
    pub tab_id: String,
    pub doc: Value,
}

/// Open editor tabs, in display order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TabState {
    #[serde(rename = "lastActiveTabID")]
    pub last_active_tab_id: String,
    #[serde(rename = "orderedDocs")]
    pub ordered_docs: Vec<PersistedTab>,
}

impl TabState {
    pub fn active(&self) -> Option<&PersistedTab> {
        self.ordered_docs
            .iter()
            .find(|tab| tab.tab_id == self.last_active_tab_id)
    }
}

impl Validate for TabState {
    fn violations(&self) -> Vec<Violation> {
        if self.ordered_docs.is_empty() || self.active().is_some() {
            return Vec::new();
        }
        vec![Violation::new(
            "$.lastActiveTabID",
            format!("{} does not name an open tab", self.last_active_tab_id),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ValidationOutcome, validate_text};

    #[test]
    fn active_tab_must_be_open() {
        let ok = r#"{"lastActiveTabID":"t1","orderedDocs":[{"tabID":"t1","doc":{"request":{}}}]}"#;
        assert!(validate_text::<TabState>(ok).is_valid());

        let dangling = r#"{"lastActiveTabID":"t9","orderedDocs":[{"tabID":"t1","doc":{}}]}"#;
        let ValidationOutcome::Invalid { .. } = validate_text::<TabState>(dangling) else {
            panic!("dangling active tab must be rejected");
        };
    }
}
