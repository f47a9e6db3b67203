//! Scribe daemon - transparent streaming proxy with conversation capture

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use scribe::ScribeError;
use scribe::capture::{CaptureDispatcher, QueueConsumer};
use scribe::config::Config;
use scribe::error::Result;
use scribe::proxy::ProxyServer;
use scribe::queue::{QueueClient, RedisQueue};
use scribe::store::RestStore;

/// Scribe - A transparent streaming proxy that records LLM conversations
#[derive(Parser)]
#[command(name = "scribe")]
#[command(about = "A transparent streaming proxy that records LLM conversations")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the proxy server (default command)
    #[command(name = "serve")]
    Serve,

    /// Drain one batch of queued capture payloads into the durable store
    #[command(name = "consume")]
    Consume {
        /// Maximum number of items to drain in this batch
        #[arg(long, default_value_t = 50)]
        batch_size: usize,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => serve(cli.config).await,
        Some(Command::Consume { batch_size }) => consume(cli.config, batch_size).await,
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,scribe=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    if let Some(path) = config_path {
        tracing::info!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ScribeError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| ScribeError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    } else {
        let default_paths = [
            dirs::home_dir().map(|h| h.join(".scribe").join("config.toml")),
            dirs::config_dir().map(|c| c.join("scribe").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path_opt in default_paths.iter().flatten() {
            if path_opt.exists() {
                tracing::info!("Loading config from: {}", path_opt.display());
                let content = std::fs::read_to_string(path_opt).map_err(|e| {
                    ScribeError::Config(format!(
                        "Failed to read config file {}: {}",
                        path_opt.display(),
                        e
                    ))
                })?;
                let config: Config = toml::from_str(&content)
                    .map_err(|e| ScribeError::Config(format!("Failed to parse config: {e}")))?;
                return Ok(config);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }
}

/// Connect the ephemeral queue when one is configured.
///
/// A connect failure logs and disables the queue path instead of aborting:
/// capture is telemetry and must never take the proxy down.
async fn build_queue(config: &Config) -> Option<Arc<dyn QueueClient>> {
    let url = config.queue.url.as_ref()?;

    match RedisQueue::connect(url, &config.queue.key).await {
        Ok(queue) => {
            tracing::info!("Ephemeral queue connected (key: {})", config.queue.key);
            Some(Arc::new(queue) as Arc<dyn QueueClient>)
        }
        Err(e) => {
            tracing::error!("Ephemeral queue unavailable, continuing without it: {e}");
            None
        }
    }
}

/// Build the durable store client when URL and credential are configured
fn build_store(config: &Config) -> Option<Arc<RestStore>> {
    let url = config.store.url.as_ref()?;

    let Some(api_key) = config.store.resolve_api_key() else {
        tracing::warn!(
            "store.url is configured but no API key is available ({}), durable writes disabled",
            config.store.api_key_env
        );
        return None;
    };

    Some(Arc::new(RestStore::new(
        reqwest::Client::new(),
        url.clone(),
        api_key,
    )))
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    tracing::info!("Starting Scribe daemon");

    let config = load_config(config_path)?;
    tracing::debug!("Config loaded: {:?}", config);

    let (queue, store) = if config.capture.enabled {
        (build_queue(&config).await, build_store(&config))
    } else {
        (None, None)
    };

    match (&queue, &store) {
        (Some(_), _) => tracing::info!("Capture path: ephemeral queue"),
        (None, Some(_)) => tracing::info!("Capture path: direct store writes"),
        (None, None) => tracing::info!("Capture path: disabled"),
    }

    let dispatcher = Arc::new(CaptureDispatcher::new(config.capture.enabled, queue, store));

    let proxy = ProxyServer::new(config, dispatcher);
    proxy.serve().await?;

    tracing::info!("Scribe daemon stopped");
    Ok(())
}

async fn consume(config_path: Option<PathBuf>, batch_size: usize) -> Result<()> {
    let config = load_config(config_path)?;

    let queue_url = config.queue.url.as_ref().ok_or_else(|| {
        ScribeError::Config("queue.url must be configured to consume".to_string())
    })?;
    let store_url = config.store.url.as_ref().ok_or_else(|| {
        ScribeError::Config("store.url must be configured to consume".to_string())
    })?;
    let api_key = config.store.resolve_api_key().ok_or_else(|| {
        ScribeError::Config(format!(
            "No store API key available: set store.api_key or the {} environment variable",
            config.store.api_key_env
        ))
    })?;

    let queue: Arc<dyn QueueClient> =
        Arc::new(RedisQueue::connect(queue_url, &config.queue.key).await?);
    let store = Arc::new(RestStore::new(
        reqwest::Client::new(),
        store_url.clone(),
        api_key,
    ));

    let report = QueueConsumer::new(queue, store).consume(batch_size).await?;

    tracing::info!(
        processed = report.processed,
        failed = report.failed,
        remaining = report.remaining,
        "Consume batch complete"
    );

    // Machine-readable report for the external scheduler
    println!(
        "{}",
        serde_json::to_string(&report).map_err(|e| ScribeError::Serialization(e.to_string()))?
    );

    Ok(())
}
