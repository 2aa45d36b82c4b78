//! Individual agent session handling

use anyhow::Result;
use dispatch_shared::{
    codec::{self, FrameDecoder},
    Envelope, Heartbeat,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::warn;

/// Handle to send messages to a specific agent
#[derive(Clone)]
pub struct SessionHandle {
    pub agent_id: String,
    pub addr: SocketAddr,
    writer: Arc<Mutex<WriteHalf<TcpStream>>>,
}

impl SessionHandle {
    /// Send an envelope to this agent
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        let encoded = codec::encode(envelope)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&encoded).await?;
        Ok(())
    }
}

/// Active agent session (read side)
pub struct AgentSession {
    handle: SessionHandle,
    reader: ReadHalf<TcpStream>,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl AgentSession {
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        let (reader, writer) = tokio::io::split(stream);

        let handle = SessionHandle {
            agent_id: String::new(), // Set from the first envelope
            addr,
            writer: Arc::new(Mutex::new(writer)),
        };

        Self {
            handle,
            reader,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
        }
    }

    /// Cloneable handle for sending messages
    pub fn get_handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Read the next envelope from this session
    /// Returns None if the connection is closed or the stream is corrupt
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.decoder.decode_next::<Envelope>() {
                Ok(Some(envelope)) => {
                    if self.handle.agent_id.is_empty() {
                        self.handle.agent_id = envelope.header.agent_id.clone();
                    }
                    return Some(envelope);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(addr = %self.handle.addr, "decode error: {}", e);
                    return None;
                }
            }

            match self.reader.read(&mut self.read_buf).await {
                Ok(0) => return None,
                Ok(n) => self.decoder.extend(&self.read_buf[..n]),
                Err(e) => {
                    warn!(addr = %self.handle.addr, "read error: {}", e);
                    return None;
                }
            }
        }
    }

    /// Agent ID (empty until the first message is received)
    pub fn agent_id(&self) -> &str {
        &self.handle.agent_id
    }
}

/// Agent state tracked by the server
#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub agent_id: String,
    pub addr: SocketAddr,
    pub last_heartbeat: Instant,
    pub connected_at: Instant,
    /// Queue counts from the most recent heartbeat
    pub pending: u32,
    pub executing: u32,
    pub healthy: bool,
}

impl AgentInfo {
    pub fn new(agent_id: String, addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            agent_id,
            addr,
            last_heartbeat: now,
            connected_at: now,
            pending: 0,
            executing: 0,
            healthy: true,
        }
    }

    pub fn apply_heartbeat(&mut self, heartbeat: &Heartbeat) {
        self.last_heartbeat = Instant::now();
        self.pending = heartbeat.pending;
        self.executing = heartbeat.executing;
        self.healthy = heartbeat.healthy;
    }
}
