//! sqlgrid - keeps one table of a SQLite or MySQL database in sync with a
//! line-oriented client.
//!
//! Commands arrive as JSON lines on stdin; snapshots, notices and errors leave
//! as JSON lines on stdout. Logs go to stderr.

mod logging;
mod protocol;

use anyhow::{Context, Result};
use clap::Parser;
use sqlgrid_core::ConnectionConfig;
use sqlgrid_drivers::DriverRegistry;
use sqlgrid_sync::{SyncCommand, SyncConfig, SyncCoordinator, SyncError, SyncEvent};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::logging::LoggingConfig;

#[derive(Parser, Debug)]
#[command(name = "sqlgrid", version, about, long_about = None)]
struct Args {
    /// Database driver (sqlite, mysql)
    #[arg(long, env = "SQLGRID_DRIVER", default_value = "sqlite")]
    driver: String,

    /// Database file for sqlite, database name for mysql
    #[arg(short, long, env = "SQLGRID_DATABASE")]
    database: String,

    #[arg(long, env = "SQLGRID_HOST", default_value = "localhost")]
    host: String,

    /// Port; the driver default when omitted
    #[arg(long, env = "SQLGRID_PORT")]
    port: Option<u16>,

    #[arg(short, long, env = "SQLGRID_USER")]
    user: Option<String>,

    #[arg(long, env = "SQLGRID_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Engine configuration (TOML); defaults apply when the file is missing
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Table to select on startup
    #[arg(short, long)]
    table: Option<String>,

    /// Debug logging plus JSON log files
    #[arg(short, long)]
    verbose: bool,

    /// No log output on stderr; JSON log files still follow --verbose
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(&self.driver.to_lowercase());
        config.database = Some(self.database.clone());
        if config.driver != "sqlite" {
            config.host = self.host.clone();
            config.port = self.port.unwrap_or(0);
            config.username = self.user.clone();
            config.password = self.password.clone();
        }
        config
    }

    fn logging_config(&self) -> LoggingConfig {
        let mut config = if self.verbose {
            LoggingConfig::verbose()
        } else {
            LoggingConfig::default()
        };
        config.enable_console_logs = !self.quiet;
        config
    }

    fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("sqlgrid")
                .join("config.toml")
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = logging::init(args.logging_config()).context("initialize logging")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        driver = %args.driver,
        "starting sqlgrid"
    );

    let config_path = args.config_path();
    let config = SyncConfig::load(&config_path)
        .with_context(|| format!("load config from {}", config_path.display()))?;

    let connection_config = args.connection_config();
    tracing::debug!(?connection_config, "connecting");
    let conn = DriverRegistry::with_defaults()
        .connect(&connection_config)
        .await
        .with_context(|| format!("connect using driver '{}'", args.driver))?;

    let coordinator = SyncCoordinator::new(conn, config).context("start sync engine")?;

    let (command_tx, command_rx) = mpsc::channel::<SyncCommand>(64);
    let (event_tx, event_rx) = mpsc::channel::<SyncEvent>(256);
    let cancel = CancellationToken::new();

    if let Some(table) = &args.table {
        command_tx
            .send(SyncCommand::SelectTable(table.clone()))
            .await
            .context("queue initial selection")?;
    }

    let engine = tokio::spawn(coordinator.run(command_rx, event_tx.clone(), cancel.clone()));
    let reader = tokio::spawn(read_commands(command_tx, event_tx));
    let writer = tokio::spawn(write_events(event_rx));

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted");
            interrupt.cancel();
        }
    });

    let outcome = engine.await.context("sync engine task panicked")?;
    // stdin may still be open; stop reading so the event channel can close
    let input_open = !reader.is_finished();
    reader.abort();
    writer.await.context("output task panicked")??;

    let result = outcome.context("sync engine stopped");
    match &result {
        Ok(()) => tracing::info!("sqlgrid finished"),
        Err(e) => tracing::error!(error = %e, "sqlgrid stopped with an error"),
    }

    // A blocking stdin read cannot be cancelled and would hold up runtime
    // shutdown until the next line arrives.
    if input_open {
        if let Err(e) = &result {
            eprintln!("Error: {:?}", e);
        }
        drop(_log_guard);
        std::process::exit(if result.is_ok() { 0 } else { 1 });
    }
    result
}

/// Forward stdin lines to the engine until EOF
async fn read_commands(
    commands: mpsc::Sender<SyncCommand>,
    events: mpsc::Sender<SyncEvent>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match protocol::parse_command(line) {
            Ok(command) => {
                if commands.send(command).await.is_err() {
                    break;
                }
            }
            Err(message) => {
                tracing::warn!(%message, "rejected input line");
                let event = SyncEvent::Error(SyncError::Validation(message));
                if events.send(event).await.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("input closed");
    Ok(())
}

/// Write every event as one JSON line on stdout
async fn write_events(mut events: mpsc::Receiver<SyncEvent>) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(event) = events.recv().await {
        let mut line = protocol::encode_event(&event).to_string();
        line.push('\n');
        stdout
            .write_all(line.as_bytes())
            .await
            .context("write event")?;
        stdout.flush().await.context("flush stdout")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_ignores_server_settings() {
        let args = Args::parse_from([
            "sqlgrid",
            "--database",
            "shop.db",
            "--user",
            "root",
        ]);
        let config = args.connection_config();
        assert_eq!(config.driver, "sqlite");
        assert_eq!(config.database.as_deref(), Some("shop.db"));
        assert!(config.username.is_none());
    }

    #[test]
    fn mysql_carries_credentials() {
        let args = Args::parse_from([
            "sqlgrid",
            "--driver",
            "MySQL",
            "--database",
            "shop",
            "--host",
            "db.internal",
            "--port",
            "3307",
            "--user",
            "app",
            "--password",
            "secret",
        ]);
        let config = args.connection_config();
        assert_eq!(config.driver, "mysql");
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 3307);
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[test]
    fn quiet_silences_the_console_only() {
        let args = Args::parse_from(["sqlgrid", "--database", "shop.db"]);
        assert!(args.logging_config().enable_console_logs);

        let args = Args::parse_from(["sqlgrid", "--database", "shop.db", "--quiet", "--verbose"]);
        let config = args.logging_config();
        assert!(!config.enable_console_logs);
        assert!(config.enable_json_logs);
    }
}
