use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::{bootstrap::EngineOptions, catalog::StoreName};

pub const APP_DIR: &str = "statesync";
pub const LOCAL_STORAGE_FILE: &str = "local-storage.json";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "statesync",
    about = "Persistence and migration engine for client state",
    version,
    disable_help_subcommand = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: Config,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Load every store and keep it in sync until interrupted (default).
    Run,

    /// Resolve the storage root and run the legacy migration only.
    Migrate,

    /// Print the current JSON of one store.
    Inspect {
        #[arg(value_enum)]
        store: StoreName,
    },

    /// List every store with a backup.
    Backups,
}

#[derive(Args, Debug, Clone)]
pub struct Config {
    /// JSON file backing the local key-value medium.
    #[arg(
        long,
        global = true,
        env = "STATESYNC_LOCAL_STORAGE",
        value_name = "PATH"
    )]
    pub local_storage: Option<PathBuf>,

    /// Data directory proposed on first run.
    #[arg(
        long,
        global = true,
        env = "STATESYNC_DEFAULT_DATA_DIR",
        value_name = "PATH"
    )]
    pub default_data_dir: Option<PathBuf>,

    #[arg(
        long = "debounce-ms",
        global = true,
        env = "STATESYNC_DEBOUNCE_MS",
        value_name = "MS",
        default_value_t = 500,
        value_parser = clap::value_parser!(u64).range(0..=60_000)
    )]
    pub debounce_ms: u64,
}

impl Config {
    pub fn local_storage_path(&self) -> Option<PathBuf> {
        self.local_storage.clone().or_else(|| {
            dirs::data_local_dir().map(|dir| dir.join(APP_DIR).join(LOCAL_STORAGE_FILE))
        })
    }

    pub fn default_data_dir(&self) -> Option<PathBuf> {
        self.default_data_dir
            .clone()
            .or_else(|| dirs::config_dir().map(|dir| dir.join(APP_DIR)))
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            quiet_window: Duration::from_millis(self.debounce_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_apply_when_flags_absent() {
        let cli = Cli::try_parse_from(["statesync"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config.debounce_ms, 500);
        assert_eq!(
            cli.config.engine_options().quiet_window,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn explicit_paths_win_over_platform_dirs() {
        let cli = Cli::try_parse_from([
            "statesync",
            "--local-storage",
            "/tmp/ls.json",
            "--default-data-dir",
            "/tmp/data",
        ])
        .unwrap();
        assert_eq!(
            cli.config.local_storage_path(),
            Some(PathBuf::from("/tmp/ls.json"))
        );
        assert_eq!(
            cli.config.default_data_dir(),
            Some(PathBuf::from("/tmp/data"))
        );
    }

    #[test]
    fn rejects_out_of_range_debounce_ms() {
        let err = Cli::try_parse_from(["statesync", "--debounce-ms", "60001"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("--debounce-ms"));
        assert!(msg.contains("0..=60000"));
    }

    #[test]
    fn inspect_takes_a_store_name() {
        let cli = Cli::try_parse_from(["statesync", "inspect", "rest-history"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Inspect {
                store: StoreName::RestHistory
            })
        ));

        assert!(Cli::try_parse_from(["statesync", "inspect", "nope"]).is_err());
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from(["statesync", "backups", "--debounce-ms", "0"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Backups)));
        assert_eq!(cli.config.engine_options().quiet_window, Duration::ZERO);
    }
}
