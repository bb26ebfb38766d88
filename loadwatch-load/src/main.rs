use clap::{Args, Parser, Subcommand};
use loadwatch_client::{RequestExecutor, ServerTimeSource, TargetConfig};
use loadwatch_common::LoadPhase;
use loadwatch_load::plan::RunPlan;
use loadwatch_load::probe::run_probe;
use loadwatch_load::report::{error_rate_exceeded, render_report};
use loadwatch_load::scheduler::{PhaseScheduler, StopFlag};
use loadwatch_load::sink::ResultSink;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "loadwatch", about = "Phased load generator for a stressed compute endpoint")]
#[command(version)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "LOADWATCH_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOADWATCH_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive every phase of a plan in order
    Run(RunArgs),
    /// Send one request at a fixed interval until interrupted
    Probe(ProbeArgs),
}

#[derive(Args)]
struct TargetArgs {
    /// Base URL of the target (scheme, host, port)
    #[arg(long, env = "LOADWATCH_TARGET", default_value = "http://localhost:5000")]
    target: String,

    /// Path of the stressed endpoint
    #[arg(long, default_value = "/stress")]
    endpoint: String,

    /// Per-request timeout (seconds)
    #[arg(long, default_value_t = 300.0)]
    timeout: f64,

    /// Response header carrying server processing time
    #[arg(long, default_value = "X-Server-Time", conflicts_with = "server_time_field")]
    server_time_header: String,

    /// Read server processing time from this JSON body field instead of a header
    #[arg(long)]
    server_time_field: Option<String>,
}

impl TargetArgs {
    fn to_config(&self) -> TargetConfig {
        let mut config = TargetConfig::new(&self.target);
        config.endpoint = self.endpoint.clone();
        config.timeout_secs = self.timeout;
        config.server_time = match &self.server_time_field {
            Some(field) => ServerTimeSource::BodyField(field.clone()),
            None => ServerTimeSource::Header(self.server_time_header.clone()),
        };
        config
    }
}

#[derive(Args)]
struct RunArgs {
    /// JSON plan file (target + phases); the built-in ramp is used when omitted
    #[arg(long)]
    plan: Option<PathBuf>,

    #[command(flatten)]
    target: TargetArgs,

    /// Result log path
    #[arg(long, default_value = "load_test_gradual_results.csv")]
    output: PathBuf,

    /// Fail (exit 1) if the fraction of failed requests exceeds this
    #[arg(long)]
    max_error_rate: Option<f64>,
}

#[derive(Args)]
struct ProbeArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Seconds between requests
    #[arg(long, default_value_t = 5.0)]
    interval: f64,

    /// Stop after this many requests
    #[arg(long)]
    count: Option<u64>,

    /// Workload parameter as key=value (repeatable)
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, serde_json::Number)>,

    /// Result log path
    #[arg(long, default_value = "response_time_metrics.csv")]
    output: PathBuf,
}

fn parse_param(s: &str) -> Result<(String, serde_json::Number), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s:?}"))?;
    let number: serde_json::Number = value
        .parse()
        .map_err(|_| format!("parameter {key:?} must be numeric, got {value:?}"))?;
    Ok((key.to_string(), number))
}

fn init_tracing(cli: &Cli) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.log_json {
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

/// Set `stop` on the first Ctrl+C. In-flight requests keep running.
fn install_interrupt(stop: StopFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight requests");
            stop.stop();
        }
    });
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    let code = match &cli.command {
        Command::Run(args) => run(args).await,
        Command::Probe(args) => probe(args).await,
    };
    process::exit(code);
}

async fn run(args: &RunArgs) -> i32 {
    let plan = match &args.plan {
        Some(path) => RunPlan::from_file(path),
        None => Ok(RunPlan::default_ramp(args.target.to_config())),
    };
    let plan = match plan {
        Ok(plan) => plan,
        Err(e) => {
            error!(error = %e, "cannot load plan");
            return 3;
        }
    };

    let sink = match ResultSink::create(&args.output) {
        Ok(sink) => sink,
        Err(e) => {
            error!(error = %e, "cannot open result log, aborting");
            return 3;
        }
    };

    info!(
        target = %plan.target.url(),
        phases = plan.phases.len(),
        planned_secs = plan.planned_duration_secs(),
        output = %args.output.display(),
        "starting load run"
    );

    let stop = StopFlag::new();
    install_interrupt(stop.clone());

    let executor = Arc::new(RequestExecutor::new(plan.target.clone()));
    let mut scheduler = PhaseScheduler::new(executor, sink, stop);
    let summary = scheduler.run(&plan.phases).await;

    println!("{}", render_report(&summary, args.max_error_rate));
    info!(path = %args.output.display(), rows = scheduler.sink().written(), "results saved");

    if let Some(e) = &summary.sink_error {
        error!(error = %e, "result log incomplete");
        return 3;
    }
    let global = summary.global_statistics();
    match args.max_error_rate {
        Some(threshold) if error_rate_exceeded(&global, threshold) => 1,
        _ => 0,
    }
}

async fn probe(args: &ProbeArgs) -> i32 {
    let mut sink = match ResultSink::create(&args.output) {
        Ok(sink) => sink,
        Err(e) => {
            error!(error = %e, "cannot open result log, aborting");
            return 3;
        }
    };

    let mut phase = LoadPhase::new("probe", 1, 0.0);
    phase.params.extend(args.params.iter().cloned());

    let config = args.target.to_config();
    info!(target = %config.url(), interval_secs = args.interval, output = %args.output.display(), "starting probe");

    let stop = StopFlag::new();
    install_interrupt(stop.clone());

    let executor = RequestExecutor::new(config);
    let interval = Duration::try_from_secs_f64(args.interval).unwrap_or(Duration::from_secs(5));
    match run_probe(&executor, &phase, &mut sink, interval, args.count, &stop).await {
        Ok(summary) => {
            info!(
                requests = summary.requests,
                succeeded = summary.succeeded,
                "probe stopped"
            );
            0
        }
        Err(e) => {
            error!(error = %e, "probe aborted");
            3
        }
    }
}
