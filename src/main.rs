use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use relay_core::{DataLookup, InMemoryDirectory};
use relay_server::{load_settings_from_path, settings_path, Relay};
use relay_store::{Database, SqliteDirectory};
use relay_telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use tracing::Level;

#[derive(Debug, Parser)]
#[command(
    name = "relay",
    about = "Pairs patients with doctors over WebSockets and relays their chat"
)]
struct Cli {
    /// Settings file (JSON). Defaults to ~/.relay/settings.json.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// SQLite database with accounts, departments and cases.
    #[arg(long)]
    db_path: Option<PathBuf>,
    /// Serve without a database; names, cases and questions resolve empty.
    #[arg(long, conflicts_with = "db_path")]
    in_memory: bool,
    #[arg(long, default_value = "info")]
    log_level: Level,
    #[arg(long, value_enum, default_value_t = LogFormatArg::Json)]
    log_format: LogFormatArg,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormatArg {
    Json,
    Pretty,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Pretty => LogFormat::Pretty,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(&TelemetryConfig {
        log_level: cli.log_level,
        format: cli.log_format.into(),
        ..TelemetryConfig::default()
    });

    let config_path = cli.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&config_path)
        .with_context(|| format!("loading settings from {}", config_path.display()))?;
    settings
        .apply_overrides(cli.host, cli.port)
        .context("applying command-line overrides")?;

    let lookup: Arc<dyn DataLookup> = if cli.in_memory {
        tracing::warn!("no database configured, participant lookups will be empty");
        Arc::new(InMemoryDirectory::new())
    } else {
        let db_path = cli
            .db_path
            .unwrap_or_else(|| settings.resolved_database_path());
        let db = Database::open(&db_path)
            .with_context(|| format!("opening database {}", db_path.display()))?;
        Arc::new(SqliteDirectory::new(db))
    };

    let relay = Arc::new(Relay::new(&settings.relay_config(), lookup));
    let handle = relay_server::start(&settings.server, relay)
        .await
        .with_context(|| format!("binding {}:{}", settings.server.host, settings.server.port))?;
    tracing::info!(port = handle.port, "relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
