use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use shadow_sync_core::SyncInformation;
use shadow_sync_engine::{CloudClient, LocalStore, SyncConfiguration, SyncHandler};
use shadow_sync_store::{InMemoryCloudClient, InMemoryLocalStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shadow-syncd", about = "Edge-side shadow synchronization daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a configuration snapshot and run the sync handler until interrupted.
    Run {
        #[arg(long, default_value = "shadow-sync.yaml")]
        config: PathBuf,
        /// Number of worker threads for the Realtime strategy; ignored under Periodic.
        #[arg(long, default_value_t = 1)]
        parallelism: usize,
        /// Base URL of an HTTP shadow service to sync against instead of the
        /// built-in in-memory cloud client.
        #[cfg(feature = "http-client")]
        #[arg(long)]
        cloud_url: Option<String>,
    },
    /// Parse a configuration file and print the resolved snapshot back out.
    Validate {
        #[arg(long, default_value = "shadow-sync.yaml")]
        config: PathBuf,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: &PathBuf) -> anyhow::Result<SyncConfiguration> {
    let yaml = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    SyncConfiguration::from_yaml(&yaml).map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Validate { config } => {
            let cfg = load_config(&config)?;
            print!("{}", cfg.to_yaml()?);
            Ok(())
        }
        Command::Run {
            config,
            parallelism,
            #[cfg(feature = "http-client")]
            cloud_url,
        } => {
            let cfg = load_config(&config)?;
            tracing::info!(path = %config.display(), synced_keys = cfg.synced_keys.len(), "loaded configuration");

            let local_store = Arc::new(InMemoryLocalStore::new());
            for key in &cfg.synced_keys {
                local_store.upsert_sync_info_if_absent(SyncInformation::new_for(key));
            }

            #[cfg(feature = "http-client")]
            let cloud_client: Arc<dyn CloudClient> = match cloud_url {
                Some(url) => {
                    tracing::info!(%url, "using HTTP cloud client");
                    Arc::new(shadow_sync_store::HttpCloudClient::new(url))
                }
                None => {
                    tracing::info!("using in-memory cloud client");
                    Arc::new(InMemoryCloudClient::new())
                }
            };
            #[cfg(not(feature = "http-client"))]
            let cloud_client: Arc<dyn CloudClient> = {
                tracing::info!("using in-memory cloud client");
                Arc::new(InMemoryCloudClient::new())
            };

            let handler = Arc::new(SyncHandler::default());
            handler.start(local_store, cloud_client, &cfg, parallelism);
            tracing::info!("shadow-syncd running, press Ctrl+C to stop");

            tokio::signal::ctrl_c().await?;

            tracing::info!("shutdown signal received, stopping sync handler");
            handler.stop();
            Ok(())
        }
    }
}
