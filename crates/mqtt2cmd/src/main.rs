use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mqtt2cmd::config::LoggingConfig;
use mqtt2cmd::Config;
use mqtt2cmd::Engine;
use mqtt2cmd::LogLevel;
use mqtt2cmd::RumqttcClient;
use mqtt2cmd::ShellExecutor;
use tokio::time::MissedTickBehavior;
use tracing::error;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Expose shell-command driven switches and displays over MQTT
#[derive(Debug, Parser)]
#[command(name = "mqtt2cmd", version, about)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "mqtt2cmd.toml")]
    config: PathBuf,

    /// MQTT broker, overriding the configuration file
    #[arg(short, long)]
    broker: Option<String>,

    /// Log level, overriding the configuration file
    #[arg(short, long)]
    log_level: Option<LogLevel>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_file(&cli.config)
        .with_context(|| format!("Cannot load configuration from {}", cli.config.display()))?;
    if let Some(broker) = cli.broker {
        config.mqtt.broker = broker;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    if cli.check {
        let (host, port) = config
            .mqtt
            .broker_address()
            .map_err(anyhow::Error::msg)
            .context("Invalid MQTT configuration")?;
        print_summary(&config, &host, port);
        return Ok(());
    }

    init_logging(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "mqtt2cmd starting");
    info!("Loaded config from: {}", cli.config.display());

    let client = RumqttcClient::new(&config.mqtt).context("Invalid MQTT configuration")?;
    let engine = Arc::new(Engine::new(
        config.app_id.clone(),
        config.entities(),
        client,
        ShellExecutor::new(config.command_timeout()),
        config.engine_options(),
    ));

    let events = engine
        .connect()
        .await
        .context("Cannot connect to MQTT broker")?;

    let runner = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run(events).await }
    });

    let mut ticker = tokio::time::interval(config.refresh_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Press Ctrl+C to exit");
    loop {
        tokio::select! {
            _ = ticker.tick() => engine.refresh().await,
            result = &mut shutdown => {
                match result {
                    Ok(()) => info!("Received shutdown signal"),
                    Err(e) => error!("Failed to listen for shutdown signal: {}", e),
                }
                break;
            }
        }
    }

    engine.shutdown().await;
    runner.abort();

    info!("mqtt2cmd shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(config.targets());

    match &config.path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log file {}", path.display()))?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(Arc::new(file))
                        .with_ansi(false),
                )
                .init();
        }
        None => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    Ok(())
}

fn print_summary(config: &Config, host: &str, port: u16) {
    println!("Configuration OK");
    println!("  app id:   {}", config.app_id);
    println!("  broker:   {}:{}", host, port);
    println!("  refresh:  {:?}", config.refresh_period());
    for entity in config.entities() {
        println!(
            "  {}/{} (refresh {:?})",
            entity.class(),
            entity.name,
            entity.refresh_interval
        );
    }
}
