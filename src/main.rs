use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use statesync::{
    bootstrap::{Bootstrapper, Session},
    catalog::StoreName,
    config::{Cli, Command, Config},
    storage::{FsCommands, JsonFileMedium},
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let cmd = cli.command.clone().unwrap_or(Command::Run);

    match cmd {
        Command::Run => run(&cli.config).await,
        Command::Migrate => migrate(&cli.config).await,
        Command::Inspect { store } => inspect(&cli.config, store).await,
        Command::Backups => backups(&cli.config).await,
    }
}

fn bootstrapper(config: &Config) -> Result<Bootstrapper> {
    let local_path = config
        .local_storage_path()
        .context("no local data directory; pass --local-storage")?;
    let data_dir = config
        .default_data_dir()
        .context("no config directory; pass --default-data-dir")?;

    let local = JsonFileMedium::open(&local_path)
        .with_context(|| format!("open local storage {}", local_path.display()))?;
    Ok(
        Bootstrapper::new(Arc::new(local), Arc::new(FsCommands::new(data_dir)))
            .with_options(config.engine_options()),
    )
}

async fn start(config: &Config) -> Result<Session> {
    bootstrapper(config)?.run().await.context("bootstrap")
}

async fn run(config: &Config) -> Result<()> {
    let mut session = start(config).await?;
    for (name, subscription) in StoreName::ALL.iter().zip(session.subscriptions()) {
        info!(
            store = name.as_str(),
            medium = name.medium().as_str(),
            key = %subscription.key(),
            mode = ?subscription.mode(),
            "store active"
        );
    }
    if !session.migration().migrated.is_empty() {
        info!(fields = ?session.migration().migrated, "legacy state migrated");
    }

    // Reported diagnostics are already logged.
    if let Some(mut diagnostics) = session.take_diagnostics() {
        tokio::spawn(async move { while diagnostics.recv().await.is_some() {} });
    }

    info!(root = %session.root().as_str(), "statesync running; Ctrl-C to stop");
    shutdown_signal().await;
    session.flush().await;
    info!("pending writes flushed");
    Ok(())
}

async fn migrate(config: &Config) -> Result<()> {
    let (root, report) = bootstrapper(config)?.migrate_only().await?;
    if !report.completed {
        warn!("migration stopped early; it resumes on the next run");
    }
    let out = serde_json::json!({ "root": root.as_str(), "report": report });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn inspect(config: &Config, store: StoreName) -> Result<()> {
    let session = start(config).await?;
    let value = session
        .stores
        .snapshot(store)
        .with_context(|| format!("serialize {}", store.as_str()))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    session.flush().await;
    Ok(())
}

async fn backups(config: &Config) -> Result<()> {
    let session = start(config).await?;
    for record in session.backups().await {
        println!("{}\t{}", record.original_key, record.key());
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
