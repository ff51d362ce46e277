use std::io;

use thiserror::Error;

use crate::{json_parse::JsonParseError, schema::Violation};

/// Failures of a storage medium or of the command boundary behind it.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("command {command} failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },

    #[error("writer for {key} is no longer running")]
    WriterClosed { key: String },
}

impl StorageError {
    pub(crate) fn command(command: &'static str, message: impl ToString) -> Self {
        Self::Command {
            command,
            message: message.to_string(),
        }
    }
}

/// Everything that can go wrong while keeping one store in sync with its medium.
///
/// None of these abort the engine: parse and schema failures resolve to the
/// store default (with a backup), read failures resolve to "no data yet" and
/// write failures are reported and dropped.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("{key}: stored text is not valid json: {source}")]
    Parse {
        key: String,
        #[source]
        source: JsonParseError,
    },

    #[error("{key}: stored value does not match the expected schema: {}", join_violations(.violations))]
    Schema {
        key: String,
        violations: Vec<Violation>,
    },

    #[error("{key}: {source}")]
    Io {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("legacy field {field} discarded: {key} already holds data")]
    MigrationConflict { field: String, key: String },
}

impl PersistError {
    pub fn key(&self) -> &str {
        match self {
            Self::Parse { key, .. }
            | Self::Schema { key, .. }
            | Self::Io { key, .. }
            | Self::MigrationConflict { key, .. } => key,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse_error",
            Self::Schema { .. } => "schema_violation",
            Self::Io { .. } => "io_error",
            Self::MigrationConflict { .. } => "migration_conflict",
        }
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
