//! Tollgate server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use tollgate_core::config::AppConfig;
use tollgate_server::{AppState, create_router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tollgate - quota and tag immutability enforcing registry proxy
#[derive(Parser, Debug)]
#[command(name = "tollgate")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "TOLLGATE_CONFIG",
        default_value = "config/tollgate.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Tollgate v{}", env!("CARGO_PKG_VERSION"));

    // File is optional, env vars can provide or override everything
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let has_env_config = std::env::vars()
        .any(|(key, _)| key.starts_with("TOLLGATE_") && key != "TOLLGATE_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: tollgate --config /path/to/config.toml\n  \
             2. Environment variables: TOLLGATE_REGISTRY__UPSTREAM_URL=http://registry:5000 \
             TOLLGATE_ADMIN__TOKEN_HASH=YOUR_TOKEN_SHA256 tollgate\n\n\
             See config/tollgate.example.toml for example configuration.\n\
             Set TOLLGATE_CONFIG env var to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("TOLLGATE_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    tollgate_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let metadata = tollgate_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let kv = tollgate_kv::from_config(&config.lock_store)
        .await
        .context("failed to initialize lock store")?;

    // Fail fast when the lock store is unreachable.
    kv.health_check()
        .await
        .context("lock store health check failed")?;
    tracing::info!("Lock store connectivity verified");

    if config.server.read_only {
        tracing::warn!("Read-only mode enabled, registry mutations will be refused");
    }
    if !config.quota.enabled {
        tracing::warn!("Quota enforcement disabled");
    }

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!(upstream = %config.registry.upstream_url, "Proxying to upstream registry");

    let state = AppState::new(config, metadata, kv).context("failed to build app state")?;
    let app = create_router(state);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
