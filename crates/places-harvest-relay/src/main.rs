//! places-harvest relay: entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use places_harvest_relay::config::load_config;
use places_harvest_relay::delivery::{Collector, DeliveryQueue, HttpCollector};
use places_harvest_relay::health::HealthMonitor;
use places_harvest_relay::pipeline::CapturePipeline;
use places_harvest_relay::queries::{load_queries, QueryRunner, SearchDelay, DEFAULT_SEARCH_URL};
use places_harvest_relay::status::{ShutdownReport, StatusBoard};
use places_harvest_relay::transport::{CaptureInterceptor, HttpRequest, ReqwestTransport, Transport};
use places_harvest_relay::RelayConfig;

const DEFAULT_ADDR: &str = "127.0.0.1:8787";

#[derive(Parser)]
#[command(
    name = "places-harvest-relay",
    about = "Capture map search results and relay the places to a collector",
    version
)]
struct Cli {
    /// Path to a JSON config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Collector base URL.
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Queue size that triggers an immediate flush.
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Debounce delay before a partial batch is flushed.
    #[arg(long, global = true)]
    debounce_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the delivery queue, health monitor and ingest server (default).
    Serve {
        /// Listen address (host:port).
        #[arg(long, default_value = DEFAULT_ADDR)]
        addr: String,
    },

    /// Feed saved search response bodies through capture, then drain the queue.
    Replay {
        /// Files holding raw response bodies.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// GET a URL through the capturing transport, then drain the queue.
    Fetch {
        url: String,
    },

    /// Run every search term against every city from a CSV file
    /// (`search,city,country`), pausing a random interval between searches.
    Run {
        /// CSV file with search terms and cities.
        #[arg(long)]
        queries: PathBuf,

        /// Minimum pause between searches, in seconds.
        #[arg(long, default_value_t = 5.0)]
        min_delay: f64,

        /// Maximum pause between searches, in seconds.
        #[arg(long, default_value_t = 15.0)]
        max_delay: f64,

        /// Search endpoint the queries are sent to.
        #[arg(long, default_value = DEFAULT_SEARCH_URL)]
        search_url: String,
    },

    /// Probe the collector once. Exits 1 when unreachable.
    Probe,

    /// Print the effective field table and capture layout as JSON.
    Fields,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   places-harvest-relay completions bash > ~/.local/share/bash-completion/completions/places-harvest-relay
    ///   places-harvest-relay completions zsh > ~/.zfunc/_places-harvest-relay
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

/// Everything a capture run needs, wired together.
struct Relay {
    queue: DeliveryQueue,
    worker: tokio::task::JoinHandle<()>,
    status: StatusBoard,
    collector: Arc<dyn Collector>,
    pipeline: Arc<CapturePipeline>,
}

impl Relay {
    fn start(config: &RelayConfig) -> Self {
        let collector: Arc<dyn Collector> = Arc::new(HttpCollector::new(
            &config.endpoint,
            config.request_timeout_ms,
        ));
        let status = StatusBoard::new();
        let (queue, worker) =
            DeliveryQueue::spawn(collector.clone(), config.queue_settings(), status.clone());
        let pipeline = Arc::new(CapturePipeline::new(
            config.capture.clone(),
            config.fields.clone(),
            Arc::new(queue.clone()),
        ));

        Self {
            queue,
            worker,
            status,
            collector,
            pipeline,
        }
    }

    async fn finish(self) -> anyhow::Result<ShutdownReport> {
        let report = self.queue.shutdown().await?;
        self.worker.await?;
        tracing::info!(
            "Relay stopped: {} sent, {} errors, {} undelivered",
            report.stats.sent,
            report.stats.errors,
            report.undelivered
        );
        Ok(report)
    }
}

/// Print the final report; fail when records were left undelivered.
fn conclude(report: &ShutdownReport) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    if !report.is_complete() {
        anyhow::bail!(
            "{} records could not be delivered to the collector",
            report.undelivered
        );
    }
    Ok(())
}

fn effective_config(cli: &Cli) -> anyhow::Result<RelayConfig> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(debounce_ms) = cli.debounce_ms {
        config.debounce_ms = debounce_ms;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let command = cli.command.take().unwrap_or(Commands::Serve {
        addr: DEFAULT_ADDR.to_string(),
    });
    match command {
        Commands::Serve { addr } => {
            let config = effective_config(&cli)?;
            tracing::info!("places-harvest relay");
            tracing::info!("Collector: {}", config.endpoint);

            let relay = Relay::start(&config);
            let health = HealthMonitor::new(
                relay.collector.clone(),
                relay.status.clone(),
                config.health_interval(),
            )
            .spawn();

            serve(&relay, &addr).await?;

            health.abort();
            let report = relay.finish().await?;
            if !report.is_complete() {
                tracing::error!(
                    "{} records could not be delivered to the collector",
                    report.undelivered
                );
            }
        }

        Commands::Replay { files } => {
            let config = effective_config(&cli)?;
            let relay = Relay::start(&config);

            for file in &files {
                let body = std::fs::read_to_string(file)?;
                match relay.pipeline.process(&body) {
                    Ok(summary) => tracing::info!(
                        "{}: {} candidates, {} enqueued",
                        file.display(),
                        summary.candidates,
                        summary.enqueued
                    ),
                    Err(e) => tracing::warn!("{}: {e}", file.display()),
                }
            }

            let report = relay.finish().await?;
            conclude(&report)?;
        }

        Commands::Fetch { url } => {
            let config = effective_config(&cli)?;
            let relay = Relay::start(&config);

            let transport = CaptureInterceptor::new(
                ReqwestTransport::new(config.request_timeout_ms),
                relay.pipeline.clone(),
            );
            let response = transport.send(HttpRequest::get(url)).await?;
            tracing::info!(
                "{} -> HTTP {} ({} bytes)",
                response.url,
                response.status,
                response.body.len()
            );

            let report = relay.finish().await?;
            conclude(&report)?;
        }

        Commands::Run {
            queries,
            min_delay,
            max_delay,
            search_url,
        } => {
            let config = effective_config(&cli)?;
            let queries = load_queries(&queries)?;
            let delay = SearchDelay::from_secs_f64(min_delay, max_delay)?;
            tracing::info!("Search terms x cities = {} queries", queries.len());

            let relay = Relay::start(&config);
            let transport = CaptureInterceptor::new(
                ReqwestTransport::new(config.request_timeout_ms),
                relay.pipeline.clone(),
            );
            let summary = QueryRunner::new(transport, search_url, delay)
                .run(&queries)
                .await?;
            tracing::info!(
                "All searches completed: {} ok, {} failed",
                summary.searched,
                summary.failed
            );

            let report = relay.finish().await?;
            conclude(&report)?;
        }

        Commands::Probe => {
            let config = effective_config(&cli)?;
            let collector = HttpCollector::new(&config.endpoint, config.request_timeout_ms);
            if collector.probe().await {
                println!("Collector reachable: {}", collector.endpoint());
            } else {
                eprintln!("Collector unreachable: {}", collector.endpoint());
                std::process::exit(1);
            }
        }

        Commands::Fields => {
            let config = effective_config(&cli)?;
            let info = serde_json::json!({
                "fields": config.fields,
                "capture": config.capture,
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(
                shell,
                &mut cmd,
                "places-harvest-relay",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

#[cfg(feature = "server")]
async fn serve(relay: &Relay, addr: &str) -> anyhow::Result<()> {
    use places_harvest_relay::server::IngestServer;

    let server = IngestServer::new(relay.pipeline.clone(), relay.status.clone());
    server.run(addr, shutdown_signal()).await?;
    Ok(())
}

#[cfg(not(feature = "server"))]
async fn serve(_relay: &Relay, addr: &str) -> anyhow::Result<()> {
    tracing::warn!("Built without the server feature; not listening on {addr}");
    shutdown_signal().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
    tracing::info!("Shutting down");
}
