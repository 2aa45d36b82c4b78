mod agent;
mod command;
mod config;
mod connection;
mod driver;
mod queue;
mod transport;

use agent::AgentService;
use anyhow::{Context, Result};
use clap::Parser;
use command::CommandExecutor;
use config::{AgentConfig, DriverKind, LoggingSection};
use connection::{ConnectionEvent, ConnectionManager};
use driver::{AutomationDriver, RemoteDriver, SimulatedDriver};
use queue::CommandScheduler;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "browser-agent",
    about = "Browser automation agent: validates, queues and executes commands from a control server",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Control server address (overrides agent.server_address)
    #[arg(long)]
    server: Option<String>,

    /// Agent ID (overrides agent.id)
    #[arg(long)]
    agent_id: Option<String>,

    /// Log level (overrides logging.level)
    #[arg(long)]
    log_level: Option<String>,
}

fn init_tracing(logging: &LoggingSection) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn build_driver(config: &AgentConfig) -> Result<Arc<dyn AutomationDriver>> {
    let driver: Arc<dyn AutomationDriver> = match config.driver.kind {
        DriverKind::Simulated => Arc::new(SimulatedDriver::new(Duration::from_millis(
            config.driver.simulated_latency_ms,
        ))),
        DriverKind::Remote => {
            let address = config
                .driver
                .address
                .clone()
                .context("driver.address is required for the remote driver")?;
            Arc::new(RemoteDriver::new(
                address,
                Duration::from_millis(config.driver.io_timeout_ms),
            ))
        }
    };
    Ok(driver)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, report) = AgentConfig::resolve(cli.config.as_deref())?;
    if let Some(server) = cli.server {
        config.agent.server_address = server;
    }
    if let Some(agent_id) = cli.agent_id {
        config.agent.id = agent_id;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    init_tracing(&config.logging);
    report.log();

    info!("Browser agent starting: {}", config.agent.id);
    info!("  Control server: {}", config.agent.server_address);

    let driver = build_driver(&config)?;
    let executor = Arc::new(CommandExecutor::new(driver, config.command_timeout()));
    info!(driver = executor.driver_name(), "automation driver ready");

    let scheduler = CommandScheduler::new(executor, config.queue_config());
    info!(
        max_queue_size = config.queue.max_queue_size,
        history_capacity = config.queue.history_capacity,
        command_timeout_ms = config.queue.command_timeout_ms,
        "command queue initialized"
    );

    let mut conn = ConnectionManager::new(config.connection_config(), scheduler.reporter());
    let service = Arc::new(AgentService::new(
        scheduler.clone(),
        config.agent.auth_token.clone(),
    ));

    // Push queue completions back to the server
    let completion_sender = conn.sender();
    let completion_scheduler = scheduler.clone();
    tokio::spawn(async move {
        agent::forward_completions(completion_scheduler, completion_sender).await;
    });

    loop {
        tokio::select! {
            event = conn.recv() => match event {
                Some(ConnectionEvent::Connected { address }) => {
                    info!("Connected to control server at {}", address);
                }
                Some(ConnectionEvent::Disconnected { reason }) => {
                    warn!("Disconnected: {}", reason);
                }
                Some(ConnectionEvent::ConnectionFailed { reason, retry_in }) => {
                    error!("Connection failed: {} (retrying in {:?})", reason, retry_in);
                }
                Some(ConnectionEvent::Received(envelope)) => {
                    debug!(
                        "Received from server: seq={} type={:?}",
                        envelope.header.sequence_id, envelope.header.msg_type
                    );
                    // An immediate command may hold the driver for a while; keep reading
                    let service = service.clone();
                    let sender = conn.sender();
                    tokio::spawn(async move {
                        if let Some(reply) = service.handle(envelope.payload).await {
                            if let Err(e) = sender.send(reply).await {
                                error!("Failed to send response: {}", e);
                            }
                        }
                    });
                }
                None => {
                    error!("Connection manager closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    // Give queued work one command timeout to finish before exiting
    let status = scheduler.reporter().get_queue_status().await;
    if status.is_processing {
        info!(pending = status.pending, "waiting for the command queue to drain");
        if tokio::time::timeout(config.command_timeout(), scheduler.wait_idle())
            .await
            .is_err()
        {
            warn!(
                pending = scheduler.reporter().get_queue_status().await.pending,
                "queue still busy at shutdown; pending commands are dropped"
            );
        }
    }

    Ok(())
}
