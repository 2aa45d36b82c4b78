//! Connection manager with a persistent control-server link and automatic reconnection

use crate::queue::StatusReporter;
use crate::transport::{TcpConnector, TransportConnector, TransportStream};
use anyhow::{anyhow, Context, Result};
use dispatch_shared::{
    codec::{self, FrameDecoder},
    limits, Envelope, Heartbeat, Payload,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Instant};
use tracing::debug;

/// Events emitted by the connection manager
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Successfully connected to the control server
    Connected { address: String },
    /// Link dropped; a reconnect follows after backoff
    Disconnected { reason: String },
    /// Received an envelope from the server
    Received(Envelope),
    /// Connect attempt failed
    ConnectionFailed { reason: String, retry_in: Duration },
}

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Agent ID stamped on every outbound envelope
    pub agent_id: String,
    /// Control server address
    pub server_address: String,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Read timeout (should be > server heartbeat interval)
    pub read_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            agent_id: "agent-001".into(),
            server_address: "127.0.0.1:8080".into(),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(15),
        }
    }
}

/// Manages the persistent connection to the control server
pub struct ConnectionManager {
    config: ConnectionConfig,
    sequence_id: Arc<AtomicU64>,
    /// Channel to send payloads to the server
    outbound_tx: mpsc::Sender<Envelope>,
    /// Channel to receive connection events
    event_rx: mpsc::Receiver<ConnectionEvent>,
}

/// Cloneable handle for sending to the server from other tasks
#[derive(Clone)]
pub struct ConnectionSender {
    agent_id: String,
    sequence_id: Arc<AtomicU64>,
    outbound_tx: mpsc::Sender<Envelope>,
}

impl ConnectionSender {
    /// Wrap a payload in an envelope and queue it for sending
    pub async fn send(&self, payload: Payload) -> Result<()> {
        let seq = self.sequence_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.outbound_tx
            .send(Envelope::new(&self.agent_id, seq, payload))
            .await
            .map_err(|_| anyhow!("Connection closed"))
    }
}

impl ConnectionManager {
    /// Create a new connection manager and start the connection loop
    ///
    /// Heartbeats report the queue counts read from `reporter`.
    pub fn new(config: ConnectionConfig, reporter: StatusReporter) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Envelope>(100);
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(100);
        let sequence_id = Arc::new(AtomicU64::new(0));

        let config_clone = config.clone();
        let seq_clone = sequence_id.clone();
        tokio::spawn(async move {
            connection_loop(config_clone, seq_clone, reporter, outbound_rx, event_tx).await;
        });

        Self {
            config,
            sequence_id,
            outbound_tx,
            event_rx,
        }
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    pub fn sender(&self) -> ConnectionSender {
        ConnectionSender {
            agent_id: self.config.agent_id.clone(),
            sequence_id: self.sequence_id.clone(),
            outbound_tx: self.outbound_tx.clone(),
        }
    }
}

/// Next reconnect delay: doubled, capped at `max`
fn next_backoff(current: Duration, max: Duration) -> Duration {
    std::cmp::min(current * 2, max)
}

/// Main connection loop with reconnection logic
async fn connection_loop(
    config: ConnectionConfig,
    sequence_id: Arc<AtomicU64>,
    reporter: StatusReporter,
    mut outbound_rx: mpsc::Receiver<Envelope>,
    event_tx: mpsc::Sender<ConnectionEvent>,
) {
    let connector = TcpConnector::new_server(config.server_address.clone());
    let mut reconnect_delay = config.reconnect_delay;

    loop {
        match timeout(config.connect_timeout, connector.connect()).await {
            Ok(Ok(mut stream)) => {
                reconnect_delay = config.reconnect_delay;

                let _ = event_tx
                    .send(ConnectionEvent::Connected {
                        address: connector.address().to_string(),
                    })
                    .await;

                let result = handle_connection(
                    &mut stream,
                    &config,
                    &sequence_id,
                    &reporter,
                    &mut outbound_rx,
                    &event_tx,
                )
                .await;

                if let Err(e) = TransportStream::shutdown(&mut stream).await {
                    debug!("transport shutdown after link end: {:#}", e);
                }

                if let Err(e) = result {
                    let _ = event_tx
                        .send(ConnectionEvent::Disconnected {
                            reason: format!("{:#}", e),
                        })
                        .await;
                } else {
                    debug!("outbound channel closed, stopping connection loop");
                    return;
                }
            }
            Ok(Err(e)) => {
                let _ = event_tx
                    .send(ConnectionEvent::ConnectionFailed {
                        reason: format!("{} ({}): {}", connector.name(), connector.address(), e),
                        retry_in: reconnect_delay,
                    })
                    .await;
            }
            Err(_) => {
                let _ = event_tx
                    .send(ConnectionEvent::ConnectionFailed {
                        reason: format!(
                            "connect to {} timed out after {:?}",
                            connector.address(),
                            config.connect_timeout
                        ),
                        retry_in: reconnect_delay,
                    })
                    .await;
            }
        }

        tokio::time::sleep(reconnect_delay).await;
        reconnect_delay = next_backoff(reconnect_delay, config.max_reconnect_delay);
    }
}

/// Handle an active connection until it fails (Err) or every sender is dropped (Ok)
async fn handle_connection<S: TransportStream>(
    stream: &mut S,
    config: &ConnectionConfig,
    sequence_id: &Arc<AtomicU64>,
    reporter: &StatusReporter,
    outbound_rx: &mut mpsc::Receiver<Envelope>,
    event_tx: &mpsc::Sender<ConnectionEvent>,
) -> Result<()> {
    let (mut reader, mut writer) = tokio::io::split(stream);

    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 4096];

    let mut heartbeat_interval = interval(Duration::from_millis(limits::HEARTBEAT_INTERVAL_MS));
    let start_time = Instant::now();
    let mut last_inbound = Instant::now();

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_inbound.elapsed() > config.read_timeout {
                    return Err(anyhow!(
                        "no data from server for {}ms",
                        last_inbound.elapsed().as_millis()
                    ));
                }

                let seq = sequence_id.fetch_add(1, Ordering::SeqCst) + 1;
                let uptime_ms = start_time.elapsed().as_millis() as u64;
                let status = reporter.get_queue_status().await;

                let envelope = Envelope::new(
                    &config.agent_id,
                    seq,
                    Payload::Heartbeat(Heartbeat::new(
                        uptime_ms,
                        status.pending as u32,
                        status.executing as u32,
                        true,
                    )),
                );

                let encoded = codec::encode(&envelope)?;
                writer.write_all(&encoded).await.context("heartbeat write failed")?;
            }

            outbound = outbound_rx.recv() => {
                let Some(envelope) = outbound else {
                    return Ok(());
                };
                let encoded = codec::encode(&envelope)?;
                writer.write_all(&encoded).await.context("write failed")?;
            }

            result = reader.read(&mut read_buf) => {
                match result {
                    Ok(0) => return Err(anyhow!("Server closed connection")),
                    Ok(n) => {
                        last_inbound = Instant::now();
                        decoder.extend(&read_buf[..n]);

                        while let Some(envelope) = decoder
                            .decode_next::<Envelope>()
                            .context("malformed frame from server")?
                        {
                            let _ = event_tx.send(ConnectionEvent::Received(envelope)).await;
                        }
                    }
                    Err(e) => return Err(anyhow!("Read error: {}", e)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandExecutor;
    use crate::driver::SimulatedDriver;
    use crate::queue::{CommandScheduler, QueueConfig};
    use dispatch_shared::{CommandResponse, MessageType};
    use tokio::net::TcpListener;

    fn reporter() -> StatusReporter {
        let executor = CommandExecutor::new(
            Arc::new(SimulatedDriver::default()),
            Duration::from_secs(1),
        );
        CommandScheduler::new(Arc::new(executor), QueueConfig::default()).reporter()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let max = Duration::from_secs(30);
        let mut delay = Duration::from_secs(1);
        let mut seen = Vec::new();
        for _ in 0..7 {
            delay = next_backoff(delay, max);
            seen.push(delay.as_secs());
        }
        assert_eq!(seen, vec![2, 4, 8, 16, 30, 30, 30]);
    }

    #[tokio::test]
    async fn test_connects_streams_and_heartbeats() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ConnectionConfig {
            agent_id: "agent-test".into(),
            server_address: listener.local_addr().unwrap().to_string(),
            ..Default::default()
        };

        let mut manager = ConnectionManager::new(config, reporter());
        let (mut socket, _) = listener.accept().await.unwrap();

        match manager.recv().await {
            Some(ConnectionEvent::Connected { .. }) => {}
            other => panic!("expected Connected, got {:?}", other),
        }

        // Server -> agent
        let outbound = Envelope::new(
            "server",
            7,
            Payload::Response(CommandResponse::error(1, "unused")),
        );
        socket
            .write_all(&codec::encode(&outbound).unwrap())
            .await
            .unwrap();
        match manager.recv().await {
            Some(ConnectionEvent::Received(envelope)) => {
                assert_eq!(envelope.header.sequence_id, 7);
            }
            other => panic!("expected Received, got {:?}", other),
        }

        // Agent -> server: first frame is the immediate heartbeat tick
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; 4096];
        let envelope = loop {
            if let Some(envelope) = decoder.decode_next::<Envelope>().unwrap() {
                break envelope;
            }
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0);
            decoder.extend(&buf[..n]);
        };
        assert_eq!(envelope.header.agent_id, "agent-test");
        assert_eq!(envelope.header.msg_type, MessageType::Heartbeat);
        match envelope.payload {
            Payload::Heartbeat(hb) => {
                assert_eq!(hb.pending, 0);
                assert!(hb.healthy);
            }
            other => panic!("expected heartbeat, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_link_is_shut_down_once_senders_are_gone() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ConnectionConfig {
            server_address: listener.local_addr().unwrap().to_string(),
            ..Default::default()
        };

        let manager = ConnectionManager::new(config, reporter());
        let (mut socket, _) = listener.accept().await.unwrap();
        drop(manager);

        let mut buf = vec![0u8; 4096];
        let closed = timeout(Duration::from_secs(5), async {
            while socket.read(&mut buf).await.unwrap() > 0 {}
        })
        .await;
        assert!(closed.is_ok(), "agent never closed its side of the link");
    }

    #[tokio::test]
    async fn test_reports_connection_failure() {
        // Bind then drop to get a port with nothing listening
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let config = ConnectionConfig {
            server_address: addr,
            reconnect_delay: Duration::from_millis(10),
            ..Default::default()
        };

        let mut manager = ConnectionManager::new(config, reporter());
        match manager.recv().await {
            Some(ConnectionEvent::ConnectionFailed { retry_in, .. }) => {
                assert_eq!(retry_in, Duration::from_millis(10));
            }
            other => panic!("expected ConnectionFailed, got {:?}", other),
        }
    }
}
