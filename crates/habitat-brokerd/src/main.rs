//! habitat-brokerd — the Habitat service broker daemon.
//!
//! Assembles the broker:
//! - Object store (Kubernetes API, or in-memory for local runs)
//! - Instance registry bootstrap
//! - Lifecycle manager
//! - OSB v2 API + metrics
//!
//! # Usage
//!
//! ```text
//! habitat-brokerd serve --port 8005 --config /etc/habitat-broker/broker.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use habitat_broker_core::BrokerConfig;
use habitat_broker_lifecycle::LifecycleManager;
use habitat_broker_store::{KubeStore, MemoryStore, ObjectStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,habitat_brokerd=debug,habitat_broker=debug";

#[derive(Parser)]
#[command(name = "habitat-brokerd", version, about = "Habitat Open Service Broker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreBackend {
    /// The cluster reached through the ambient kubeconfig or service account.
    Kubernetes,
    /// Process-local state, lost on exit.
    Memory,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the broker API.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "8005")]
        port: u16,

        /// broker.toml with registry and credential settings.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Mark responses asynchronous when the caller accepts incomplete results.
        #[arg(long = "async")]
        async_mode: bool,

        /// Where cluster objects live.
        #[arg(long, value_enum, default_value = "kubernetes")]
        store: StoreBackend,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            port,
            config,
            async_mode,
            store,
            log_json,
        } => {
            init_tracing(log_json);
            let config = load_config(config.as_deref(), async_mode)?;
            serve(port, config, store).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Read the config file (if any) and apply command-line overrides.
fn load_config(path: Option<&Path>, async_mode: bool) -> anyhow::Result<BrokerConfig> {
    let mut config = match path {
        Some(path) => BrokerConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => BrokerConfig::default(),
    };
    if async_mode {
        config.broker.async_mode = true;
    }
    Ok(config)
}

async fn connect_store(backend: StoreBackend) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match backend {
        StoreBackend::Kubernetes => {
            let store = KubeStore::connect()
                .await
                .context("connecting to the Kubernetes API")?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("using the in-memory store, broker state is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn serve(port: u16, config: BrokerConfig, backend: StoreBackend) -> anyhow::Result<()> {
    info!(
        ?backend,
        async_mode = config.broker.async_mode,
        registry_namespace = %config.registry.namespace,
        registry_config_map = %config.registry.config_map,
        "habitat broker starting"
    );

    let store = connect_store(backend).await?;
    let manager = LifecycleManager::bootstrap(store, &config)
        .await
        .context("bootstrapping the instance registry")?;
    info!("instance registry ready");

    let shutdown = CancellationToken::new();
    let state = habitat_broker_api::ApiState::new(Arc::new(manager), shutdown.clone());
    let router = habitat_broker_api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C; in-flight retry loops observe the token.
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "cannot listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    info!("habitat broker stopped");
    Ok(())
}
