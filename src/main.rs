//! carlink - command line entry point
//!
//! `run` drives a simulated car against the broker; the other commands inspect
//! configuration or talk to the notification API.

use carlink::api::NotificationApi;
use carlink::client::{CarClient, NotificationFeed};
use carlink::config::ClientConfig;
use carlink::observability::{init_logging, LogSettings};
use carlink::protocol::{NotificationRequest, NotificationType};
use carlink::simulation::SimulationDriver;
use carlink::transport::amqp::{AmqpConnector, BrokerEndpoint};
use chrono::Utc;
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn, Level};

/// Simulated car client for the notification broker
#[derive(Parser)]
#[command(name = "carlink")]
#[command(about = "Publish simulated car telemetry and receive notifications")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace); LOG_LEVEL takes precedence
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, consume notifications and publish simulated telemetry
    Run,
    /// Validate configuration
    Config {
        /// Print the effective configuration and derived endpoints
        #[arg(long)]
        show: bool,
    },
    /// Create a broadcast notification through the API
    Notify {
        #[arg(short, long)]
        application: String,
        #[arg(short, long)]
        message: String,
        /// info, warning, error, danger or ack
        #[arg(short = 't', long = "type", default_value = "info")]
        kind: NotificationType,
    },
    /// List applications known to the API
    Applications,
    /// Check API health
    Health,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut log_settings = LogSettings::from_env();
    if std::env::var("LOG_LEVEL").is_err() {
        match cli.verbose {
            0 => {}
            1 => log_settings.level = Level::DEBUG,
            _ => log_settings.level = Level::TRACE,
        }
    }
    if let Err(e) = init_logging(&log_settings) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!("Starting carlink v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_client(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Notify {
            application,
            message,
            kind,
        } => send_notification(&config, application, message, kind).await,
        Commands::Applications => list_applications(&config).await,
        Commands::Health => check_health(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(ClientConfig::load_from_file(path)?);
    }

    for path_str in ["carlink.toml", "config/carlink.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(ClientConfig::load_from_file(&path)?);
        }
    }

    info!("No configuration file found, using defaults");
    Ok(ClientConfig::default())
}

async fn run_client(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = BrokerEndpoint::from_section(&config.broker);
    info!(
        relay = %endpoint.websocket_url(),
        reconnect_delay = ?config.broker.reconnect_delay(),
        "Broker endpoint"
    );

    let client = Arc::new(CarClient::new(
        Arc::new(AmqpConnector::new()),
        &config.broker,
    ));
    if let Err(e) = client.connect().await {
        warn!("Initial connect failed, retrying in the background: {}", e);
    }

    // Subscriptions need a ready connection; keep trying until one is up
    let feed = Arc::new(Mutex::new(NotificationFeed::new(config.feed.capacity)));
    let subscriber = {
        let client = Arc::clone(&client);
        let handler = NotificationFeed::handler(Arc::clone(&feed));
        let retry_delay = config.broker.reconnect_delay();
        tokio::spawn(async move {
            loop {
                match client.consume_notifications(Arc::clone(&handler)).await {
                    Ok(()) => break,
                    Err(e) => {
                        warn!("Notification subscription failed: {}", e);
                        tokio::time::sleep(retry_delay).await;
                    }
                }
            }
        })
    };

    let simulation = SimulationDriver::from_config(&config.simulation)
        .start(Arc::new(client.publisher().clone()));

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Car is running, press Ctrl-C to stop");
    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
    }

    simulation.stop();
    subscriber.abort();
    client.shutdown().await?;

    let feed = feed.lock();
    info!(
        notifications = feed.len(),
        unanswered = client.tracker().len(),
        reconnects = client.health_metrics().reconnect_count,
        "Shutdown complete"
    );
    Ok(())
}

fn handle_config_command(
    config: &ClientConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    info!("Configuration is valid");

    if show {
        let endpoint = BrokerEndpoint::from_section(&config.broker);
        println!("{}", toml::to_string_pretty(config)?);
        println!("# websocket relay: {}", endpoint.websocket_url());
        println!("# amqp endpoint:   {}", endpoint.amqp_uri());
    }
    Ok(())
}

async fn send_notification(
    config: &ClientConfig,
    application: String,
    message: String,
    kind: NotificationType,
) -> Result<(), Box<dyn std::error::Error>> {
    let api = NotificationApi::new(&config.api)?;
    let request = NotificationRequest {
        application,
        message,
        timestamp: Utc::now(),
        kind,
    };
    let status = api.create_notification(&request).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn list_applications(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let api = NotificationApi::new(&config.api)?;
    for application in api.applications().await? {
        println!("{application}");
    }
    Ok(())
}

async fn check_health(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let api = NotificationApi::new(&config.api)?;
    let status = api.health().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
