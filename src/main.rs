//! GPU Monitor binary
//!
//! Samples GPU statistics for a while and prints per-device averages.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use gpu_monitor::{
    render_report, GpuMonitor, MonitorConfig, NvidiaSmiProvider, ScriptedProvider, Snapshot,
    StatsProvider,
};
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{filter::LevelFilter, EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "gpu_monitor")]
#[command(about = "Averaged GPU statistics sampler")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = "Samples GPU statistics in the background and reports per-device averages")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Seconds between GPU queries
    #[arg(long)]
    delay: Option<f64>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample for a while and print averages (default)
    Watch(WatchArgs),

    /// Query the GPUs once and exit
    Snapshot(SnapshotArgs),
}

#[derive(Args)]
struct WatchArgs {
    /// How long to sample, in seconds
    #[arg(long, default_value_t = 10)]
    duration: u64,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Use built-in demo readings instead of nvidia-smi
    #[arg(long)]
    demo: bool,
}

#[derive(Args)]
struct SnapshotArgs {
    /// Output format: json or pretty
    #[arg(short, long, default_value = "pretty")]
    format: String,

    /// Use built-in demo readings instead of nvidia-smi
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    let config = load_config(&cli)?;

    match &cli.command {
        Some(Commands::Watch(args)) => watch_command(config, args).await,
        Some(Commands::Snapshot(args)) => snapshot_command(args),
        None => {
            let watch_args = WatchArgs {
                duration: 10,
                json: false,
                demo: false,
            };
            watch_command(config, &watch_args).await
        }
    }
}

fn log_level(cli: &Cli) -> Level {
    if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    }
}

/// `RUST_LOG` directives win; otherwise everything at `level` and above.
fn log_filter(level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy()
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(log_level(cli)))
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<MonitorConfig> {
    let mut config = match &cli.config {
        Some(path) => MonitorConfig::from_json_file(path)?,
        None => MonitorConfig::default(),
    };
    if let Some(delay) = cli.delay {
        config = config.with_delay_ms(MonitorConfig::from_secs(delay)?.delay_ms);
    }
    Ok(config)
}

fn provider(demo: bool) -> Box<dyn StatsProvider> {
    if demo {
        Box::new(ScriptedProvider::demo())
    } else {
        Box::new(NvidiaSmiProvider::new())
    }
}

async fn watch_command(config: MonitorConfig, args: &WatchArgs) -> anyhow::Result<()> {
    let display_options = config.display_options.clone();
    let mut monitor = GpuMonitor::start(config, provider(args.demo))?;
    info!("Sampling GPUs for {} seconds", args.duration);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping early"),
    }

    if let Err(e) = monitor.stop().await {
        error!("Sampling ended with an error: {}", e);
    }
    let stats = monitor.stats()?;
    info!(
        "Recorded {} snapshots ({} failed queries)",
        stats.snapshots, stats.failed_queries
    );

    match monitor.report()? {
        Some(report) if args.json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Some(report) => {
            print!("{}", render_report(&report.per_device_average, &display_options));
            if !report.agrees_within(1e-6) {
                error!("Running and batch averages disagree");
            }
        }
        None => println!("No GPU snapshots were recorded"),
    }

    Ok(())
}

fn snapshot_command(args: &SnapshotArgs) -> anyhow::Result<()> {
    let snapshot = provider(args.demo)
        .query()
        .context("Failed to query GPUs")?;

    match args.format.as_str() {
        "json" => {
            let json = serde_json::to_string_pretty(&snapshot)?;
            println!("{}", json);
        }
        "pretty" => {
            print_pretty_snapshot(&snapshot);
        }
        other => {
            anyhow::bail!("Unsupported format: {}. Use 'json' or 'pretty'", other);
        }
    }

    Ok(())
}

fn print_pretty_snapshot(snapshot: &Snapshot) {
    println!(
        "{}  {}  {}",
        snapshot.hostname,
        chrono::DateTime::from_timestamp_millis(snapshot.timestamp as i64)
            .unwrap_or_default()
            .format("%Y-%m-%d %H:%M:%S UTC"),
        snapshot.driver_version.as_deref().unwrap_or("unknown driver")
    );
    for device in &snapshot.devices {
        println!(
            "[{}] {} | {}°C, {} %, {} % | {} / {} W | {} / {} MB ({:.1}%)",
            device.index,
            device.name,
            device.temperature,
            device.fan_speed,
            device.utilization,
            device.power_draw,
            device.power_limit,
            device.memory_used,
            device.memory_total,
            device.memory_usage_percent()
        );
        for process in &device.processes {
            println!(
                "    {} {} ({} MB)",
                process.pid, process.command, process.gpu_memory_usage
            );
        }
    }
}
