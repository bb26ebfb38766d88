use clap::Parser;
use loadwatch_dashboard::config::{DashboardConfig, DEFAULT_HISTORY_CAPACITY, SUBSCRIBER_BUFFER};
use loadwatch_dashboard::Server;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "loadwatch-dashboard", about = "Streams merged host metrics to dashboard clients")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "LOADWATCH_DASHBOARD_LISTEN", default_value = "0.0.0.0:5001")]
    listen: SocketAddr,

    /// Directory holding cpu_metrics.csv, net_metrics.csv and latency_metrics.csv
    #[arg(long, env = "LOADWATCH_METRICS_DIR", default_value = ".")]
    metrics_dir: PathBuf,

    /// Seconds between published snapshots
    #[arg(long, default_value_t = 2.0)]
    interval_secs: f64,

    /// Values kept per history series
    #[arg(long, default_value_t = DEFAULT_HISTORY_CAPACITY)]
    history: usize,

    /// Snapshots buffered per subscriber before it starts missing them
    #[arg(long, default_value_t = SUBSCRIBER_BUFFER)]
    subscriber_buffer: usize,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "LOADWATCH_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOADWATCH_LOG_JSON")]
    log_json: bool,
}

fn init_tracing(args: &Args) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| args.log_level.clone().into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(&args);

    let mut config = DashboardConfig::new(args.listen, &args.metrics_dir);
    config.update_interval = Duration::try_from_secs_f64(args.interval_secs)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or("--interval-secs must be a positive number")?;
    config.history_capacity = args.history;
    config.subscriber_buffer = args.subscriber_buffer;

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

    // Print "Listening on <addr>" once the server signals it is bound.
    tokio::spawn(async move {
        if let Ok(addr) = ready_rx.await {
            println!("Listening on {}", addr);
        }
    });

    Server::new(config).run(ready_tx).await?;
    Ok(())
}
