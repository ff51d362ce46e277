use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::schema::{Validate, Violation, check_version};

pub const ENVIRONMENT_VERSION: u32 = 1;

/// Name of the pseudo-environment older versions used for global variables.
pub const GLOBALS_NAME: &str = "globals";

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentVariable {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub secret: bool,
}

impl EnvironmentVariable {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            secret: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Environment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub variables: Vec<EnvironmentVariable>,
}

impl Environment {
    pub fn is_globals(&self) -> bool {
        self.name.to_lowercase() == GLOBALS_NAME
    }
}

impl Validate for Environment {
    fn violations(&self) -> Vec<Violation> {
        self.v
            .and_then(|v| check_version(v, ENVIRONMENT_VERSION))
            .into_iter()
            .collect()
    }
}

impl Validate for EnvironmentVariable {}

/// Moves every "globals" pseudo-environment out of `environments` and into
/// `globals`, skipping variables the global set already holds.
///
/// Returns whether anything moved. Running it again on its own output is a
/// no-op.
pub fn promote_globals(
    environments: &mut Vec<Environment>,
    globals: &mut Vec<EnvironmentVariable>,
) -> bool {
    if !environments.iter().any(Environment::is_globals) {
        return false;
    }

    let (promoted, kept): (Vec<_>, Vec<_>) = std::mem::take(environments)
        .into_iter()
        .partition(Environment::is_globals);
    *environments = kept;

    for variable in promoted.into_iter().flat_map(|env| env.variables) {
        if !globals.contains(&variable) {
            globals.push(variable);
        }
    }
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SelectedEnvIndex {
    #[default]
    #[serde(rename = "NO_ENV_SELECTED")]
    NoEnvSelected,
    #[serde(rename = "MY_ENV")]
    MyEnv { index: usize },
    #[serde(rename = "TEAM_ENV")]
    TeamEnv {
        #[serde(rename = "teamID")]
        team_id: String,
        #[serde(rename = "teamEnvID")]
        team_env_id: String,
    },
}

impl SelectedEnvIndex {
    /// Translates the flat integer older versions stored: `-1` meant "nothing
    /// selected". Anything else is not a legacy index.
    pub fn from_legacy(raw: &str) -> Option<Self> {
        match raw.trim().parse::<i64>().ok()? {
            -1 => Some(Self::NoEnvSelected),
            n => usize::try_from(n).ok().map(|index| Self::MyEnv { index }),
        }
    }
}

impl Validate for SelectedEnvIndex {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretVariable {
    pub key: String,
    pub value: String,
    #[serde(rename = "varIndex")]
    pub var_index: usize,
}

/// Secret values per environment id, kept apart from the environments so they
/// are never synced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretEnvironments(pub BTreeMap<String, Vec<SecretVariable>>);

impl Validate for SecretEnvironments {
    fn violations(&self) -> Vec<Violation> {
        let mut out = Vec::new();
        for (env_id, variables) in &self.0 {
            let mut seen = BTreeSet::new();
            for (i, variable) in variables.iter().enumerate() {
                if !seen.insert(variable.var_index) {
                    out.push(Violation::new(
                        format!("$.{env_id}[{i}].varIndex"),
                        format!("duplicate varIndex {}", variable.var_index),
                    ));
                }
            }
        }
        out
    }
}
