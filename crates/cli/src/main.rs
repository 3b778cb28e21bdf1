use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inferwatch_api::{http, InProcApi};
use inferwatch_core::CompetitionStore;
use inferwatch_netclient::HttpNetClient;
use inferwatch_persist::SqliteStore;
use inferwatch_store::{ActiveTopicRegistry, LockedCache, SnapshotCache, SwapRegistry};
use inferwatch_sync::{CompetitionMonitor, RefreshScheduler, TopicSync};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod config;

use config::{FileConfig, Overrides, Settings};

#[derive(Parser, Debug)]
#[command(name = "inferwatchd", version, about = "Topic inference collector for the Allora network")]
struct Cli {
    /// JSON config file; explicit flags and env vars take precedence
    #[arg(long, env = "INFERWATCH_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the scheduler, competition monitor and HTTP API until Ctrl-C
    Serve,
    /// Refresh one topic now and print the materialized record
    Fetch { topic: String },
    /// List stored block heights for a topic, newest first
    Heights {
        topic: String,
        #[arg(long, default_value_t = 100)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Print a stored record (latest unless --height is given)
    Show {
        topic: String,
        #[arg(long)]
        height: Option<String>,
    },
    /// Delete stored rows older than the retention window
    Prune,
}

fn init_tracing() {
    let env = std::env::var("INFERWATCH_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("INFERWATCH_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid INFERWATCH_METRICS_ADDR; expected host:port");
        }
    }
}

/// Everything the subcommands share, wired once from [`Settings`].
struct Runtime {
    settings: Settings,
    net: Arc<HttpNetClient>,
    store: Arc<SqliteStore>,
    registry: Arc<SwapRegistry>,
    engine: Arc<TopicSync>,
}

impl Runtime {
    fn build(settings: Settings) -> Result<Self> {
        let store = Arc::new(SqliteStore::open_in_dir(&settings.data_dir)?);
        let net = Arc::new(HttpNetClient::new(settings.net.clone())?);
        let registry = Arc::new(SwapRegistry::with_topics(settings.topics.clone()));
        let cache = Arc::new(LockedCache::new());
        let engine = Arc::new(TopicSync::new(net.clone(), store.clone(), cache, registry.clone(), settings.sync.clone()));
        Ok(Self { settings, net, store, registry, engine })
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let rt = Runtime::build(Settings::resolve(cli.overrides, file))?;

    match cli.command {
        Commands::Serve => serve(rt).await?,
        Commands::Fetch { topic } => {
            let t0 = Instant::now();
            let outcome = rt.engine.refresh_topic(&topic).await?;
            info!(%topic, ?outcome, took_ms = %t0.elapsed().as_millis(), "fetch: done");
            match rt.engine.cache().get(&topic) {
                Some(state) => print_json(&state.record)?,
                None => anyhow::bail!("topic {} produced no record", topic),
            }
        }
        Commands::Heights { topic, limit, offset } => print_json(&rt.store.heights(&topic, limit, offset)?)?,
        Commands::Show { topic, height } => {
            let found = match height.as_deref() {
                Some(h) => rt.store.at_height(&topic, h)?,
                None => rt.store.latest(&topic)?,
            };
            match found {
                Some(rec) => print_json(&rec)?,
                None => anyhow::bail!("no stored record for topic {}", topic),
            }
        }
        Commands::Prune => {
            let retention = chrono::Duration::from_std(rt.settings.monitor.retention).context("retention out of range")?;
            let removed = rt.store.prune_older_than(chrono::Utc::now() - retention)?;
            info!(removed, "prune: done");
            println!("{}", removed);
        }
    }
    Ok(())
}

async fn serve(rt: Runtime) -> Result<()> {
    let Runtime { settings, net, store, registry, engine } = rt;
    let token = CancellationToken::new();

    let monitor = Arc::new(CompetitionMonitor::new(net, store.clone(), registry.clone(), settings.monitor.clone()));
    let monitor_task = monitor.spawn(token.child_token());

    let scheduler = Arc::new(RefreshScheduler::new(engine));
    scheduler.start()?;

    let api = Arc::new(InProcApi::new(scheduler.clone(), store));
    let app = http::router(api);
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("binding {}", addr))?;
    info!(%addr, topics = registry.list().len(), "serve: listening");

    let shutdown = token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "serve: ctrl_c handler failed");
            }
            info!("serve: shutdown requested");
            shutdown.cancel();
        })
        .await
        .context("http server")?;

    token.cancel();
    if let Err(e) = scheduler.stop_and_wait().await {
        warn!(error = %e, "serve: scheduler stop");
    }
    if let Err(e) = monitor_task.await {
        warn!(error = %e, "serve: monitor task join");
    }
    info!("serve: stopped");
    Ok(())
}
