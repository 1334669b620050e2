//! Logging setup for the sqlgrid binary
//!
//! Console output goes to stderr because stdout carries the event stream.
//! Optionally mirrors everything as JSON into a daily-rotated file for bug
//! reports. `RUST_LOG` overrides the configured filter.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory where log files should be written
    pub log_dir: PathBuf,

    /// Whether to write JSON logs to files
    pub enable_json_logs: bool,

    pub enable_console_logs: bool,

    /// Whether to include file/line information in console logs
    pub include_location: bool,

    /// Default log level filter
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: log_directory(),
            enable_json_logs: false,
            enable_console_logs: true,
            include_location: cfg!(debug_assertions),
            default_filter: "warn,sqlgrid=info,sqlgrid_sync=info,sqlgrid_core=info,sqlgrid_driver_sqlite=info,sqlgrid_driver_mysql=info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Verbose console output plus JSON files
    pub fn verbose() -> Self {
        Self {
            enable_json_logs: true,
            include_location: true,
            default_filter: "debug".to_string(),
            ..Self::default()
        }
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer when dropped; keep it alive for
/// the life of the program.
pub fn init(config: LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let mut layers = Vec::new();
    let mut guard = None;

    if config.enable_console_logs {
        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_ansi(true)
            .with_filter(env_filter.clone())
            .boxed();
        layers.push(console_layer);
    }

    if config.enable_json_logs {
        std::fs::create_dir_all(&config.log_dir)?;
        let file_appender = tracing_appender::rolling::daily(&config.log_dir, "sqlgrid.log");
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);

        let json_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            // NEW fires once per span; ENTER would repeat on every re-poll
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(non_blocking)
            .with_filter(env_filter)
            .boxed();
        layers.push(json_layer);
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    tracing::info!(
        log_dir = %config.log_dir.display(),
        json_enabled = config.enable_json_logs,
        console_enabled = config.enable_console_logs,
        "logging initialized"
    );
    Ok(guard)
}

/// Where JSON log files go
pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sqlgrid")
        .join("logs")
}
