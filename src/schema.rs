//! Structural validation of stored values.
//!
//! A stored shape is a serde type (strict: unknown fields are rejected) plus
//! optional semantic checks through [`Validate`]. Validation is total and
//! all-or-nothing: a value is either fully accepted or reported back together
//! with its raw text so nothing is lost.

use std::fmt;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::json_parse::{self, JsonParseError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// JSONPath-like location, `$` being the stored value itself.
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Re-roots a violation reported by a nested value under `prefix`.
    pub fn under(self, prefix: &str) -> Self {
        let rest = self.path.strip_prefix('$').unwrap_or(&self.path);
        Self {
            path: format!("{prefix}{rest}"),
            message: self.message,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    Parse(JsonParseError),
    Schema(Vec<Violation>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome<T> {
    Valid(T),
    Invalid { raw: String, rejection: Rejection },
}

impl<T> ValidationOutcome<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

/// Semantic checks that serde cannot express. Types without extra rules use the
/// empty default.
pub trait Validate {
    fn violations(&self) -> Vec<Violation> {
        Vec::new()
    }
}

impl<T: Validate> Validate for Vec<T> {
    fn violations(&self) -> Vec<Violation> {
        self.iter()
            .enumerate()
            .flat_map(|(i, item)| {
                let prefix = format!("$[{i}]");
                item.violations()
                    .into_iter()
                    .map(move |v| v.under(&prefix))
            })
            .collect()
    }
}

impl<T: Validate> Validate for Option<T> {
    fn violations(&self) -> Vec<Violation> {
        self.as_ref().map(Validate::violations).unwrap_or_default()
    }
}

/// Parses and validates stored text.
pub fn validate_text<S>(raw: &str) -> ValidationOutcome<S>
where
    S: DeserializeOwned + Validate,
{
    match json_parse::parse(raw) {
        Ok(value) => validate_value(value, raw),
        Err(e) => ValidationOutcome::Invalid {
            raw: raw.to_string(),
            rejection: Rejection::Parse(e),
        },
    }
}

/// Validates an already parsed value; `raw` is kept for the backup on failure.
pub fn validate_value<S>(value: Value, raw: &str) -> ValidationOutcome<S>
where
    S: DeserializeOwned + Validate,
{
    let invalid = |violations| ValidationOutcome::Invalid {
        raw: raw.to_string(),
        rejection: Rejection::Schema(violations),
    };

    match serde_json::from_value::<S>(value) {
        Ok(parsed) => {
            let violations = parsed.violations();
            if violations.is_empty() {
                ValidationOutcome::Valid(parsed)
            } else {
                invalid(violations)
            }
        }
        Err(e) => invalid(vec![Violation::new("$", e.to_string())]),
    }
}

/// Rejects records written by a newer application version.
pub fn check_version(v: u32, supported: u32) -> Option<Violation> {
    if v == 0 {
        return Some(Violation::new("$.v", "version must be at least 1"));
    }
    (v > supported).then(|| {
        Violation::new(
            "$.v",
            format!("written by a newer version (v{v}, supported up to v{supported})"),
        )
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Item {
        v: u32,
        name: String,
    }

    impl Validate for Item {
        fn violations(&self) -> Vec<Violation> {
            let mut out: Vec<_> = check_version(self.v, 2).into_iter().collect();
            if self.name.is_empty() {
                out.push(Violation::new("$.name", "must not be empty"));
            }
            out
        }
    }

    #[test]
    fn accepts_conforming_values() {
        let outcome = validate_text::<Vec<Item>>(r#"[{"v":1,"name":"a"},{"v":2,"name":"b"}]"#);
        assert!(outcome.is_valid());
    }

    #[test]
    fn unknown_fields_are_rejected_not_dropped() {
        let raw = r#"[{"v":1,"name":"a","extra":true}]"#;
        let outcome = validate_text::<Vec<Item>>(raw);
        let ValidationOutcome::Invalid { raw: kept, rejection } = outcome else {
            panic!("expected invalid outcome");
        };
        assert_eq!(kept, raw);
        assert!(matches!(rejection, Rejection::Schema(_)));
    }

    #[test]
    fn semantic_violations_carry_nested_paths() {
        let outcome = validate_text::<Vec<Item>>(r#"[{"v":1,"name":"a"},{"v":3,"name":""}]"#);
        let ValidationOutcome::Invalid {
            rejection: Rejection::Schema(violations),
            ..
        } = outcome
        else {
            panic!("expected schema rejection");
        };
        let paths: Vec<_> = violations.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec!["$[1].v", "$[1].name"]);
    }

    #[test]
    fn unparseable_text_is_a_parse_rejection() {
        let outcome = validate_text::<Vec<Item>>("[{");
        assert!(matches!(
            outcome,
            ValidationOutcome::Invalid {
                rejection: Rejection::Parse(_),
                ..
            }
        ));
    }

    #[test]
    fn version_zero_and_newer_versions_are_violations() {
        assert!(check_version(0, 1).is_some());
        assert!(check_version(1, 1).is_none());
        assert!(check_version(2, 1).is_some());
    }
}
