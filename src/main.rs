// Trend Monitor - Command line entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use trend_monitor::build_data_source;
use trend_monitor::core::{setup_logging, ConfigManager, EventBus, MonitorConfig, Timeframe};
use trend_monitor::layer1::MarketDataSource;
use trend_monitor::monitor::{AlertManager, MonitorSettings, TrendScheduler};

#[derive(Parser, Debug)]
#[command(author, version, about = "Crypto trend regime monitor", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the monitor until Ctrl-C
    Run,
    /// Run a single monitoring round and print the trend summary
    Once,
    /// Probe every data source
    Check,
    /// Analyze one pair on demand
    Analyze {
        symbol: String,
        timeframe: Timeframe,
    },
    /// Print the configuration summary, or write the effective configuration
    Config {
        #[arg(long)]
        write: Option<String>,
    },
}

fn build_scheduler(config: &MonitorConfig, bus: Option<Arc<EventBus>>) -> Result<TrendScheduler> {
    let source = build_data_source(&config.api).context("building data sources")?;
    let alerts = AlertManager::from_config(&config.alerts, bus).context("building alert sinks")?;
    let scheduler = TrendScheduler::new(MonitorSettings::from_config(config), source, Arc::new(alerts))?;
    Ok(scheduler)
}

async fn run(config: MonitorConfig) -> Result<ExitCode> {
    let bus = Arc::new(EventBus::new());
    let mut alerts = bus.subscribe_channel();

    tokio::spawn(async move {
        loop {
            match alerts.recv().await {
                Ok(event) => {
                    let message = event
                        .data
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or_default()
                        .to_string();
                    println!("[{}] {}\n{}\n", event.priority, event.event_type, message);
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped = skipped, "Alert printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let scheduler = build_scheduler(&config, Some(bus))?;
    scheduler.start().await?;
    info!("Monitoring, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Shutdown requested");
    scheduler.stop().await;

    println!("{}", scheduler.stats());
    Ok(ExitCode::SUCCESS)
}

async fn once(config: MonitorConfig) -> Result<ExitCode> {
    let scheduler = build_scheduler(&config, None)?;
    let round = scheduler.run_round().await;

    let status = scheduler.status();
    for (symbol, trends) in &status.trend_summary {
        let line: Vec<String> = trends.iter().map(|(tf, trend)| format!("{}={}", tf, trend)).collect();
        println!("{:<12} {}", symbol, line.join("  "));
    }
    if let Some(mode) = status.data_source_mode {
        println!("data source: {}", mode);
    }

    match round {
        Ok(stats) => {
            println!("{}", stats);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("round failed: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn check(config: MonitorConfig) -> Result<ExitCode> {
    let source = build_data_source(&config.api)?;
    let probe = source.probe().await;

    for (name, reachable) in &probe {
        println!("{:<14} {}", name, if *reachable { "reachable" } else { "unreachable" });
    }

    if probe.values().any(|&reachable| reachable) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn analyze(config: MonitorConfig, symbol: &str, timeframe: Timeframe) -> Result<ExitCode> {
    let scheduler = build_scheduler(&config, None)?;
    let analysis = scheduler.analyze_pair(symbol, timeframe).await?;

    println!("{} {} ({} candles)", analysis.key, analysis.trend, analysis.candles);
    println!("{}", analysis.analysis);
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let manager = ConfigManager::new(Some(cli.config.as_str()))
        .with_context(|| format!("loading configuration from {}", cli.config))?;
    let config = manager.config();
    setup_logging(
        Some(&config.logging.level),
        Some(config.logging.json_format),
        Some(true),
    );
    manager.validate()?;

    match cli.command {
        Command::Run => run(config).await,
        Command::Once => once(config).await,
        Command::Check => check(config).await,
        Command::Analyze { symbol, timeframe } => analyze(config, &symbol, timeframe).await,
        Command::Config { write } => {
            match write {
                Some(path) => {
                    manager.save_to_file(&path)?;
                    println!("configuration written to {}", path);
                }
                None => println!("{}", serde_json::to_string_pretty(&manager.summary())?),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
