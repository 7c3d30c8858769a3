//! lockboxd: lockbox secrets daemon
//!
//! Usage:
//!   lockboxd [--config /etc/lockbox/lockbox.toml] [--listen 0.0.0.0:3200]
//!
//! Keys may be supplied in the config file or via LOCKBOX_MASTER_KEY and
//! LOCKBOX_JWT_KEY; the environment wins.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use lockbox_core::config::LockboxConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use lockboxd::daemon;

#[derive(Parser, Debug)]
#[command(name = "lockboxd", version, about = "lockbox secrets daemon")]
struct Cli {
    /// Path to lockbox.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "LOCKBOX_CONFIG",
        default_value = "/etc/lockbox/lockbox.toml"
    )]
    config: PathBuf,

    /// Override server.listen
    #[arg(long, env = "LOCKBOX_LISTEN")]
    listen: Option<String>,

    /// Master key (overrides keys.master_key)
    #[arg(long, env = "LOCKBOX_MASTER_KEY", hide_env_values = true)]
    master_key: Option<String>,

    /// Token signing key (overrides keys.jwt_key)
    #[arg(long, env = "LOCKBOX_JWT_KEY", hide_env_values = true)]
    jwt_key: Option<String>,

    /// Log level (trace, debug, info, warn, error); defaults to server.log_level
    #[arg(long, env = "LOCKBOX_LOG")]
    log: Option<String>,

    /// Log format; defaults to server.log_format
    #[arg(long, env = "LOCKBOX_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = load_config(&cli.config).await?;
    let found = loaded.is_some();
    let mut config = loaded.unwrap_or_default();
    apply_overrides(&mut config, &cli);

    let format = cli.log_format.unwrap_or_else(|| {
        LogFormat::from_str(&config.server.log_format, true).unwrap_or(LogFormat::Text)
    });
    init_logging(cli.log.as_deref().unwrap_or(&config.server.log_level), format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "lockboxd starting"
    );
    if !found {
        warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    daemon::run(config).await
}

async fn load_config(path: &Path) -> Result<Option<LockboxConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let path = path.to_path_buf();
    let config = tokio::task::spawn_blocking(move || {
        LockboxConfig::from_file(&path).with_context(|| format!("loading config {}", path.display()))
    })
    .await??;
    Ok(Some(config))
}

fn apply_overrides(config: &mut LockboxConfig, cli: &Cli) {
    if let Some(listen) = &cli.listen {
        config.server.listen = listen.clone();
    }
    if let Some(key) = &cli.master_key {
        config.keys.master_key = Some(key.clone());
    }
    if let Some(key) = &cli.jwt_key {
        config.keys.jwt_key = Some(key.clone());
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}
