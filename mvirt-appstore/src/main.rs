use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mvirt_appstore::config::{DEFAULT_DATA_DIR, DEFAULT_REGISTRY_URL};
use mvirt_appstore::rest::{AppState, create_router};
use mvirt_appstore::{Catalog, Config, Ingestor, RegistryClient, RegistryConfig, RetryPolicy, Store};

#[derive(Parser)]
#[command(name = "mvirt-appstore")]
#[command(about = "mvirt App Store - installer catalog fed by registry push events")]
struct Args {
    /// Data directory for the catalog database
    #[arg(short, long, global = true, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Container registry base URL
    #[arg(long, global = true, default_value = DEFAULT_REGISTRY_URL)]
    registry: String,

    /// Timeout for a single registry request
    #[arg(long, global = true, default_value_t = 10)]
    registry_timeout_secs: u64,

    /// Metadata fetch attempts per push event
    #[arg(long, global = true, default_value_t = 5)]
    fetch_retries: u32,

    /// Delay before the first fetch retry, doubled on every further attempt
    #[arg(long, global = true, default_value_t = 1000)]
    retry_backoff_ms: u64,

    /// Log filter directive, e.g. `debug` or `mvirt_appstore=trace`
    #[arg(long, global = true, default_value = "mvirt_appstore=info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the REST API
    Serve {
        /// Listen address for the REST API
        #[arg(short, long, default_value = "[::]:8000")]
        listen: String,

        /// Backfill the catalog from the registry in the background
        #[arg(long)]
        scan_on_start: bool,
    },
    /// Create or upgrade the catalog database and exit
    Init,
    /// Scan every repository and tag of the registry once and exit
    Scan,
}

impl Args {
    fn config(&self) -> Config {
        let defaults = RetryPolicy::default();
        Config {
            data_dir: self.data_dir.clone(),
            registry: RegistryConfig {
                url: self.registry.clone(),
                timeout: Duration::from_secs(self.registry_timeout_secs),
                ..Default::default()
            },
            retry: RetryPolicy {
                max_attempts: self.fetch_retries.max(1),
                initial_backoff: Duration::from_millis(self.retry_backoff_ms),
                max_backoff: defaults.max_backoff,
            },
        }
    }
}

struct Services {
    catalog: Arc<Catalog>,
    ingestor: Arc<Ingestor>,
}

async fn build_services(config: &Config) -> anyhow::Result<Services> {
    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("failed to create {}", config.data_dir.display()))?;

    let store = Store::new(&config.data_dir)
        .await
        .context("failed to open catalog database")?;
    let registry =
        RegistryClient::new(&config.registry).context("failed to create registry client")?;

    let catalog = Arc::new(Catalog::new(Arc::new(store)));
    let ingestor = Arc::new(Ingestor::new(
        Arc::new(registry),
        catalog.clone(),
        config.retry,
    ));
    Ok(Services { catalog, ingestor })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(args.log_level.parse()?))
        .init();

    let config = args.config();

    match args.command {
        Command::Init => {
            build_services(&config).await?;
            info!(data_dir = %config.data_dir.display(), "Catalog database initialized");
        }
        Command::Scan => {
            let services = build_services(&config).await?;
            let report = services.ingestor.full_scan().await?;
            info!(
                images = report.images,
                tags = report.tags,
                added = report.added,
                failed = report.failed,
                "Scan complete"
            );
        }
        Command::Serve {
            listen,
            scan_on_start,
        } => {
            let services = build_services(&config).await?;
            info!(
                "Starting mvirt-appstore - REST: {}, registry: {}",
                listen, config.registry.url
            );

            if scan_on_start {
                let ingestor = services.ingestor.clone();
                tokio::spawn(async move {
                    if let Err(e) = ingestor.full_scan().await {
                        error!(error = %e, "Startup scan failed");
                    }
                });
            }

            let app_state = Arc::new(AppState {
                catalog: services.catalog,
                ingestor: services.ingestor,
            });
            let router = create_router(app_state);

            let listener = tokio::net::TcpListener::bind(&listen)
                .await
                .with_context(|| format!("failed to bind {}", listen))?;
            info!("REST API listening on {}", listen);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            info!("Shutdown complete");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = signal::ctrl_c();
    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            let _ = ctrl_c.await;
            return;
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
}
