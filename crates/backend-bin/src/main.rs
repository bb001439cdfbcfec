use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use figment::providers::Serialized;
use keygate_backend::{
    config::{LogFormat, Settings, DEFAULT_CONFIG_FILE},
    purge_expired_tokens,
    router::create_router,
    storage::FlatFileStorage,
    AppState,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Credential and bearer token service
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Override the configured bind address
    #[arg(long)]
    bind: Option<SocketAddr>,
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));

    match settings.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut figment = Settings::figment(&cli.config);
    if let Some(bind) = cli.bind {
        figment = figment.merge(Serialized::default("bind_addr", bind));
    }

    let settings: Settings = figment
        .extract()
        .with_context(|| format!("failed to load settings from {}", cli.config.display()))?;
    settings.validate()?;
    Ok(settings)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    init_tracing(&settings);

    let storage = FlatFileStorage::new(&settings.data_dir)
        .with_context(|| format!("failed to open {}", settings.data_dir.display()))?;

    let addr = settings.bind_addr;
    let purge_interval = settings.purge_interval();
    let state = Arc::new(AppState::new(storage, settings)?);

    let purge = purge_interval.map(|every| tokio::spawn(purge_expired_tokens(state.pool.clone(), every)));

    let app = create_router(state);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = purge {
        task.abort();
    }
    Ok(())
}
