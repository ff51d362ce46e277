use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{Validate, Violation};

pub const INTERCEPTOR_BROWSER: &str = "browser";
pub const INTERCEPTOR_PROXY: &str = "proxy";
pub const INTERCEPTOR_EXTENSION: &str = "extension";

/// Flags older versions used instead of `CURRENT_INTERCEPTOR_ID`.
const LEGACY_PROXY_ENABLED: &str = "PROXY_ENABLED";
const LEGACY_EXTENSIONS_ENABLED: &str = "EXTENSIONS_ENABLED";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccentColor {
    Green,
    Teal,
    Blue,
    #[default]
    Indigo,
    Purple,
    Yellow,
    Orange,
    Red,
    Pink,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BgColor {
    #[default]
    System,
    Light,
    Dark,
    Black,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UrlExcludes {
    pub auth: bool,
    #[serde(rename = "httpUser")]
    pub http_user: bool,
    #[serde(rename = "httpPassword")]
    pub http_password: bool,
    #[serde(rename = "bearerToken")]
    pub bearer_token: bool,
    #[serde(rename = "oauth2Token")]
    pub oauth2_token: bool,
}

impl Default for UrlExcludes {
    fn default() -> Self {
        Self {
            auth: true,
            http_user: true,
            http_password: true,
            bearer_token: true,
            oauth2_token: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Settings {
    #[serde(rename = "syncCollections")]
    pub sync_collections: bool,
    #[serde(rename = "syncHistory")]
    pub sync_history: bool,
    #[serde(rename = "syncEnvironments")]
    pub sync_environments: bool,
    pub proxy_url: String,
    pub current_interceptor_id: String,
    pub url_excludes: UrlExcludes,
    pub theme_color: AccentColor,
    pub bg_color: BgColor,
    pub telemetry_enabled: bool,
    pub expand_navigation: bool,
    pub sidebar: bool,
    pub sidebar_on_left: bool,
    pub column_layout: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sync_collections: true,
            sync_history: true,
            sync_environments: true,
            proxy_url: "https://proxy.example.com/".to_string(),
            current_interceptor_id: INTERCEPTOR_BROWSER.to_string(),
            url_excludes: UrlExcludes::default(),
            theme_color: AccentColor::default(),
            bg_color: BgColor::default(),
            telemetry_enabled: true,
            expand_navigation: false,
            sidebar: true,
            sidebar_on_left: false,
            column_layout: true,
        }
    }
}

impl Settings {
    /// The defaults as a JSON object, used as the base every stored partial
    /// object is merged onto.
    pub fn default_object() -> Map<String, Value> {
        match serde_json::to_value(Self::default()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Settings as stored: any subset of the settings keys, possibly still carrying
/// the legacy interceptor flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartialSettings(pub Map<String, Value>);

impl PartialSettings {
    /// Merges the stored keys over the defaults.
    pub fn resolve(self) -> Settings {
        serde_json::from_value(Value::Object(self.merged_object())).unwrap_or_default()
    }

    /// The defaults with the stored keys laid over them, legacy interceptor
    /// flags already collapsed.
    pub fn merged_object(self) -> Map<String, Value> {
        let mut merged = Settings::default_object();
        merged.extend(migrate_interceptor_flags(self.0));
        merged
    }

    /// Removes every entry the current settings do not accept and returns a
    /// violation for each one removed.
    pub fn retain_known(&mut self) -> Vec<Violation> {
        let defaults = Settings::default_object();
        let mut removed = Vec::new();
        self.0.retain(|key, value| match entry_violation(&defaults, key, value) {
            Some(violation) => {
                removed.push(violation);
                false
            }
            None => true,
        });
        removed
    }
}

fn migrate_interceptor_flags(mut stored: Map<String, Value>) -> Map<String, Value> {
    let proxy = stored.remove(LEGACY_PROXY_ENABLED);
    let extensions = stored.remove(LEGACY_EXTENSIONS_ENABLED);
    if (proxy.is_some() || extensions.is_some())
        && !stored.contains_key("CURRENT_INTERCEPTOR_ID")
    {
        let interceptor = if proxy.and_then(|v| v.as_bool()).unwrap_or(false) {
            INTERCEPTOR_PROXY
        } else if extensions.and_then(|v| v.as_bool()).unwrap_or(false) {
            INTERCEPTOR_EXTENSION
        } else {
            INTERCEPTOR_BROWSER
        };
        stored.insert(
            "CURRENT_INTERCEPTOR_ID".to_string(),
            Value::String(interceptor.to_string()),
        );
    }
    stored
}

fn entry_violation(defaults: &Map<String, Value>, key: &str, value: &Value) -> Option<Violation> {
    let path = format!("$.{key}");
    if key == LEGACY_PROXY_ENABLED || key == LEGACY_EXTENSIONS_ENABLED {
        return (!value.is_boolean()).then(|| Violation::new(path, "expected a boolean"));
    }
    if !defaults.contains_key(key) {
        return Some(Violation::new(path, "unknown setting"));
    }
    let mut candidate = defaults.clone();
    candidate.insert(key.to_string(), value.clone());
    serde_json::from_value::<Settings>(Value::Object(candidate))
        .err()
        .map(|e| Violation::new(path, e.to_string()))
}

impl Validate for PartialSettings {
    fn violations(&self) -> Vec<Violation> {
        let defaults = Settings::default_object();
        self.0
            .iter()
            .filter_map(|(key, value)| entry_violation(&defaults, key, value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::schema::{ValidationOutcome, validate_text};

    #[test]
    fn stored_keys_override_defaults() {
        let ValidationOutcome::Valid(stored) =
            validate_text::<PartialSettings>(r#"{"THEME_COLOR":"pink","SIDEBAR":false}"#)
        else {
            panic!("partial settings should validate");
        };

        let settings = stored.resolve();

        assert_eq!(settings.theme_color, AccentColor::Pink);
        assert!(!settings.sidebar);
        assert_eq!(settings.bg_color, BgColor::System);
    }

    #[test]
    fn wrong_types_and_unknown_keys_are_violations() {
        let ValidationOutcome::Invalid { .. } = validate_text::<PartialSettings>(r#"{"THEME":123}"#)
        else {
            panic!("unknown key must be rejected");
        };

        let ValidationOutcome::Invalid { .. } =
            validate_text::<PartialSettings>(r#"{"THEME_COLOR":123}"#)
        else {
            panic!("non-string theme must be rejected");
        };

        let ValidationOutcome::Invalid { .. } =
            validate_text::<PartialSettings>(r#"{"BG_COLOR":"sepia"}"#)
        else {
            panic!("unknown background must be rejected");
        };
    }

    #[test]
    fn legacy_interceptor_flags_collapse() {
        let proxy = PartialSettings(
            json!({"PROXY_ENABLED": true, "EXTENSIONS_ENABLED": true})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(proxy.resolve().current_interceptor_id, INTERCEPTOR_PROXY);

        let extension = PartialSettings(
            json!({"PROXY_ENABLED": false, "EXTENSIONS_ENABLED": true})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(extension.resolve().current_interceptor_id, INTERCEPTOR_EXTENSION);

        let neither = PartialSettings(
            json!({"PROXY_ENABLED": false})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(neither.resolve().current_interceptor_id, INTERCEPTOR_BROWSER);
    }

    #[test]
    fn resolved_settings_reload_identically() {
        let settings = Settings {
            theme_color: AccentColor::Teal,
            ..Settings::default()
        };
        let raw = serde_json::to_string(&settings).unwrap();

        let ValidationOutcome::Valid(stored) = validate_text::<PartialSettings>(&raw) else {
            panic!("persisted settings should validate");
        };
        assert_eq!(stored.resolve(), settings);
    }

    #[test]
    fn retain_known_keeps_only_accepted_entries() {
        let mut stored = PartialSettings(
            json!({"THEME_COLOR": "red", "ZEN_MODE": true, "BG_COLOR": 7, "PROXY_ENABLED": true})
                .as_object()
                .cloned()
                .unwrap(),
        );

        let removed = stored.retain_known();

        let mut paths: Vec<_> = removed.iter().map(|v| v.path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["$.BG_COLOR", "$.ZEN_MODE"]);
        assert!(stored.violations().is_empty());

        let merged = stored.merged_object();
        assert_eq!(merged["THEME_COLOR"], "red");
        assert_eq!(merged["CURRENT_INTERCEPTOR_ID"], INTERCEPTOR_PROXY);
        assert!(!merged.contains_key("PROXY_ENABLED"));
    }
}
