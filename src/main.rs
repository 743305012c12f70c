use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use mbus_meter::logging::{log_error, log_warn};
use mbus_meter::{
    init_logger_with_level, list_available_ports, log_info, ComparisonPeriod, LiveSnapshot, PollerConfig,
    PollingController, ReadingStore, ReportPeriod,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mbus-meter")]
#[command(about = "Poll wired M-Bus water meters and report their consumption")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Number of meters on the bus (addresses 1..=N)
    #[arg(long, global = true)]
    devices: Option<u8>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports
    Ports,
    /// Poll the meters until Ctrl-C or the given number of cycles
    Poll {
        #[arg(short, long)]
        port: Option<String>,
        #[arg(short, long)]
        baudrate: Option<u32>,
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Print a consumption report as JSON
    Report {
        kind: ReportKind,
        /// Minimum value for the peak report
        #[arg(long)]
        threshold: Option<f64>,
        /// Period of the comparison report
        #[arg(long, value_enum, default_value = "month")]
        period: CompareArg,
        /// Days of the trend report
        #[arg(long, default_value = "7")]
        days: u32,
    },
    /// Print the daily history of one meter as JSON
    History {
        #[arg(short, long)]
        device: u8,
        #[arg(long, default_value = "30")]
        days: u32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportKind {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Trend,
    Compare,
    Peak,
    Instant,
    Latest,
}

#[derive(Clone, Copy, ValueEnum)]
enum CompareArg {
    Day,
    Month,
}

impl From<CompareArg> for ComparisonPeriod {
    fn from(arg: CompareArg) -> Self {
        match arg {
            CompareArg::Day => ComparisonPeriod::Day,
            CompareArg::Month => ComparisonPeriod::Month,
        }
    }
}

fn load_config(cli: &Cli) -> Result<PollerConfig> {
    let mut config = match &cli.config {
        Some(path) => PollerConfig::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => PollerConfig::default(),
    };
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    if let Some(devices) = cli.devices {
        config.device_count = devices;
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn log_live_table(snapshot: &LiveSnapshot) {
    for device in &snapshot.devices {
        log_info(&format!(
            "meter {:>3}  {:>10}  {:>8}  {:?}",
            device.address,
            device.display_value(),
            device.display_id(),
            device.status
        ));
    }
    match snapshot.last_successful_read {
        Some(ts) => log_info(&format!("last successful read: {}", ts.format("%Y-%m-%d %H:%M:%S"))),
        None => log_warn("no meter has answered yet"),
    }
}

async fn poll(mut controller: PollingController, port: Option<String>, cycles: Option<u64>) -> Result<()> {
    if let Some(port) = port {
        controller
            .connect(&port)
            .await
            .with_context(|| format!("opening {port}"))?;
    }
    controller.start_polling().await.context("starting the poller")?;

    let mut live = controller.subscribe();
    let mut seen_cycles = 0;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = live.changed() => {
                if changed.is_err() {
                    log_error("poller stopped unexpectedly");
                    break;
                }
                let snapshot = live.borrow_and_update().clone();
                if snapshot.cycles > seen_cycles {
                    seen_cycles = snapshot.cycles;
                    log_live_table(&snapshot);
                    if cycles.is_some_and(|n| seen_cycles >= n) {
                        break;
                    }
                }
            }
        }
    }

    controller.stop_polling().await.context("stopping the poller")?;
    Ok(())
}

async fn report(
    controller: &PollingController,
    kind: ReportKind,
    threshold: Option<f64>,
    period: CompareArg,
    days: u32,
) -> Result<()> {
    match kind {
        ReportKind::Daily => print_json(&controller.report(ReportPeriod::Daily).await?),
        ReportKind::Weekly => print_json(&controller.report(ReportPeriod::Weekly).await?),
        ReportKind::Monthly => print_json(&controller.report(ReportPeriod::Monthly).await?),
        ReportKind::Yearly => print_json(&controller.report(ReportPeriod::Yearly).await?),
        ReportKind::Trend => print_json(&controller.trend(days).await?),
        ReportKind::Compare => print_json(&controller.comparison(period.into()).await?),
        ReportKind::Peak => print_json(&controller.peak(threshold).await?),
        ReportKind::Instant => print_json(&controller.instantaneous().await?),
        ReportKind::Latest => print_json(&controller.latest_readings().await?),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger_with_level(match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    });

    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Ports => {
            let ports = list_available_ports().context("listing serial ports")?;
            if ports.is_empty() {
                log_warn("no serial ports found");
            }
            for port in ports {
                println!("{port}");
            }
        }
        Commands::Poll { port, baudrate, cycles } => {
            if let Some(baudrate) = baudrate {
                config.serial.baudrate = baudrate;
            }
            let store = ReadingStore::open(&config.database_path)
                .await
                .with_context(|| format!("opening {}", config.database_path.display()))?;
            let controller = PollingController::new(config, store)?;
            poll(controller, port, cycles).await?;
        }
        Commands::Report { kind, threshold, period, days } => {
            let controller = PollingController::open(config).await?;
            report(&controller, kind, threshold, period, days).await?;
        }
        Commands::History { device, days } => {
            let controller = PollingController::open(config).await?;
            print_json(&controller.device_history(device, days).await?)?;
        }
    }

    Ok(())
}
