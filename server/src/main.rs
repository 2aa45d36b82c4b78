mod command;
mod console;
mod session;

use anyhow::{Context, Result};
use clap::Parser;
use command::{RequestDispatcher, TimeoutTracker};
use console::{ConsoleCommand, Target};
use dispatch_shared::{limits, Envelope, Heartbeat, Payload};
use session::{AgentSession, SessionManager};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "control-server",
    about = "Control server for browser agents: dispatches commands and queue queries",
    version,
    long_about = None
)]
struct Cli {
    /// Bind address
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// How long to wait for an agent's response before giving up on a request
    #[arg(long, default_value_t = limits::RESPONSE_TIMEOUT_MS)]
    response_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let listener = TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("failed to bind {}", cli.bind))?;
    info!(bind = %cli.bind, "control server listening");

    let sessions = Arc::new(SessionManager::new());
    let dispatcher = Arc::new(RequestDispatcher::new(
        sessions.clone(),
        Duration::from_millis(cli.response_timeout_ms),
    ));

    let tracker = TimeoutTracker::new(dispatcher.clone(), sessions.clone());
    tokio::spawn(async move {
        tracker.run().await;
    });

    tokio::spawn(send_heartbeats(sessions.clone(), dispatcher.clone()));
    tokio::spawn(run_console(sessions.clone(), dispatcher.clone()));

    loop {
        let (socket, addr) = listener.accept().await?;
        info!(%addr, "connection accepted");

        let sessions = sessions.clone();
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            handle_session(socket, addr, sessions, dispatcher).await;
        });
    }
}

/// Read envelopes from one agent until it disconnects
async fn handle_session(
    socket: TcpStream,
    addr: SocketAddr,
    sessions: Arc<SessionManager>,
    dispatcher: Arc<RequestDispatcher>,
) {
    let mut session = AgentSession::new(socket, addr);

    while let Some(envelope) = session.recv().await {
        // Also re-registers an agent dropped as dead that is talking again
        if sessions.get(session.agent_id()).await.is_none() {
            sessions.register(session.get_handle()).await;
            info!(agent_id = %session.agent_id(), %addr, "agent registered");
        }
        handle_envelope(session.agent_id(), envelope, &sessions, &dispatcher).await;
    }

    if sessions.unregister(session.agent_id(), addr).await {
        info!(agent_id = %session.agent_id(), "agent disconnected");
    } else {
        debug!(%addr, "connection closed");
    }
}

async fn handle_envelope(
    agent_id: &str,
    envelope: Envelope,
    sessions: &SessionManager,
    dispatcher: &RequestDispatcher,
) {
    match envelope.payload {
        Payload::Heartbeat(hb) => {
            debug!(
                %agent_id,
                uptime_ms = hb.uptime_ms,
                pending = hb.pending,
                executing = hb.executing,
                "heartbeat"
            );
            sessions.update_heartbeat(agent_id, &hb).await;
        }
        Payload::Response(response) => {
            dispatcher.handle_response(agent_id, &response).await;
        }
        Payload::Completion(report) => {
            dispatcher.handle_completion(agent_id, &report);
        }
        Payload::Command(_) | Payload::Query(_) => {
            warn!(
                %agent_id,
                seq = envelope.header.sequence_id,
                "agent sent a request payload; ignoring"
            );
        }
    }
}

/// Keep agents' read timeouts from firing on an idle link
async fn send_heartbeats(sessions: Arc<SessionManager>, dispatcher: Arc<RequestDispatcher>) {
    let start = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(limits::HEARTBEAT_INTERVAL_MS));
    loop {
        ticker.tick().await;
        let heartbeat = Heartbeat::new(
            start.elapsed().as_millis() as u64,
            dispatcher.pending_count().await as u32,
            0,
            true,
        );
        let envelope = Envelope::new(
            "server",
            dispatcher.next_sequence_id(),
            Payload::Heartbeat(heartbeat),
        );
        sessions.broadcast(&envelope).await;
    }
}

async fn run_console(sessions: Arc<SessionManager>, dispatcher: Arc<RequestDispatcher>) {
    println!("{}", console::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("console input closed");
                return;
            }
            Err(e) => {
                error!("console read error: {}", e);
                return;
            }
        };

        match console::parse_line(&line) {
            Ok(Some(command)) => run_console_command(command, &sessions, &dispatcher).await,
            Ok(None) => {}
            Err(e) => println!("!!! {}", e),
        }
    }
}

async fn run_console_command(
    command: ConsoleCommand,
    sessions: &SessionManager,
    dispatcher: &RequestDispatcher,
) {
    match command {
        ConsoleCommand::Help => println!("{}", console::HELP),
        ConsoleCommand::Agents => {
            let agents = sessions.connected_agents().await;
            if agents.is_empty() {
                println!("no agents connected");
            }
            for agent_id in agents {
                if let Some(info) = sessions.get_info(&agent_id).await {
                    println!(
                        "{:<20} {:<22} pending={} executing={} healthy={} up={}s last_heartbeat={}ms ago outstanding={}",
                        info.agent_id,
                        info.addr,
                        info.pending,
                        info.executing,
                        info.healthy,
                        info.connected_at.elapsed().as_secs(),
                        info.last_heartbeat.elapsed().as_millis(),
                        dispatcher.pending_count_for(&agent_id).await
                    );
                }
            }
        }
        ConsoleCommand::Dispatch {
            target: Target::All,
            mode,
            message,
        } => {
            let ids = dispatcher.broadcast_command(mode, message).await;
            println!("broadcast to {} agent(s)", ids.len());
        }
        ConsoleCommand::Dispatch {
            target: Target::Agent(agent_id),
            mode,
            message,
        } => {
            if let Err(e) = dispatcher.send_command(&agent_id, mode, message).await {
                println!("!!! {}", e);
            }
        }
        ConsoleCommand::Query { agent_id, query } => {
            if let Err(e) = dispatcher.send_query(&agent_id, query).await {
                println!("!!! {}", e);
            }
        }
    }
}
