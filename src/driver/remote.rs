//! Remote browser-control driver
//!
//! Each command is sent as a framed [`DriverRequest`] and answered with a
//! [`DriverReply`]. The connection is opened lazily and dropped after any
//! I/O or protocol failure so the next command reconnects.

use super::{AutomationDriver, DriverError, DriverOutcome};
use crate::command::Command;
use crate::transport::{TcpConnector, TcpTransportStream, TransportConnector};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use dispatch_shared::codec::{self, FrameDecoder};
use dispatch_shared::{DriverReply, DriverRequest};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

struct RemoteConnection {
    stream: TcpTransportStream,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

pub struct RemoteDriver {
    connector: TcpConnector,
    address: String,
    io_timeout: Duration,
    connection: Mutex<Option<RemoteConnection>>,
    request_id: AtomicU64,
}

impl RemoteDriver {
    pub fn new(address: impl Into<String>, io_timeout: Duration) -> Self {
        let address = address.into();
        Self {
            connector: TcpConnector::new_driver(address.clone()),
            address,
            io_timeout,
            connection: Mutex::new(None),
            request_id: AtomicU64::new(0),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn connect(&self) -> Result<RemoteConnection, DriverError> {
        let stream = match timeout(self.io_timeout, self.connector.connect()).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(DriverError::ConnectionFailed {
                    address: self.address.clone(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(DriverError::ConnectionFailed {
                    address: self.address.clone(),
                    reason: format!("timed out after {:?}", self.io_timeout),
                })
            }
        };

        info!(address = %self.address, transport = self.connector.name(), "connected to remote driver");
        Ok(RemoteConnection {
            stream,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 8192],
        })
    }

    async fn exchange(
        conn: &mut RemoteConnection,
        request: &DriverRequest,
    ) -> Result<DriverReply, DriverError> {
        let encoded = codec::encode(request)?;
        conn.stream.write_all(&encoded).await?;

        loop {
            // Drain buffered frames before reading more
            while let Some(reply) = conn.decoder.decode_next::<DriverReply>()? {
                if reply.request_id == request.request_id {
                    return Ok(reply);
                }
                warn!(
                    expected = request.request_id,
                    got = reply.request_id,
                    "discarding stale driver reply"
                );
            }

            let n = conn.stream.read(&mut conn.read_buf).await?;
            if n == 0 {
                return Err(DriverError::Closed);
            }
            conn.decoder.extend(&conn.read_buf[..n]);
        }
    }

    fn into_outcome(reply: DriverReply) -> Result<DriverOutcome, DriverError> {
        let screenshot = reply
            .screenshot
            .map(|encoded| B64.decode(encoded.as_bytes()))
            .transpose()
            .map_err(|e| DriverError::Protocol(format!("invalid screenshot encoding: {}", e)))?;

        Ok(DriverOutcome {
            success: reply.success,
            data: reply.data,
            error: reply.error,
            screenshot,
        })
    }
}

#[async_trait]
impl AutomationDriver for RemoteDriver {
    async fn run_command(&self, command: &Command) -> Result<DriverOutcome, DriverError> {
        let request = DriverRequest {
            request_id: self.next_request_id(),
            command: serde_json::to_value(command)
                .map_err(|e| DriverError::Protocol(e.to_string()))?,
        };

        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(DriverError::Closed);
        };

        debug!(request_id = request.request_id, kind = %command.kind(), "sending to remote driver");

        let result = match timeout(self.io_timeout, Self::exchange(conn, &request)).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Protocol(format!(
                "no reply within {:?}",
                self.io_timeout
            ))),
        };

        match result {
            Ok(reply) => Self::into_outcome(reply),
            Err(e) => {
                // The stream may hold a half-read frame; start fresh next time
                *guard = None;
                Err(e)
            }
        }
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandParser;
    use serde_json::json;
    use tokio::net::TcpListener;

    /// Answer every request on one connection using `respond`
    async fn spawn_endpoint(
        respond: fn(DriverRequest) -> Option<DriverReply>,
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut decoder = FrameDecoder::new();
            let mut buf = vec![0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                decoder.extend(&buf[..n]);
                while let Some(req) = decoder.decode_next::<DriverRequest>().unwrap() {
                    match respond(req) {
                        Some(reply) => {
                            let frame = codec::encode(&reply).unwrap();
                            socket.write_all(&frame).await.unwrap();
                        }
                        None => return,
                    }
                }
            }
        });

        addr
    }

    fn open() -> Command {
        CommandParser::parse(&json!({"kind": "OPEN", "payload": {"url": "https://example.com"}}))
            .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_with_screenshot() {
        let addr = spawn_endpoint(|req| {
            assert_eq!(req.command["kind"], "OPEN");
            Some(DriverReply {
                request_id: req.request_id,
                success: true,
                data: Some(json!({"title": "Example"})),
                error: None,
                screenshot: Some(B64.encode(b"png-bytes")),
            })
        })
        .await;

        let driver = RemoteDriver::new(addr, Duration::from_secs(2));
        let outcome = driver.run_command(&open()).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.data.unwrap()["title"], "Example");
        assert_eq!(outcome.screenshot.as_deref(), Some(&b"png-bytes"[..]));
    }

    #[tokio::test]
    async fn test_reported_failure_is_not_an_error() {
        let addr = spawn_endpoint(|req| {
            Some(DriverReply {
                request_id: req.request_id,
                success: false,
                data: None,
                error: Some("element not found: #nope".into()),
                screenshot: None,
            })
        })
        .await;

        let driver = RemoteDriver::new(addr, Duration::from_secs(2));
        let outcome = driver.run_command(&open()).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("element not found: #nope"));
    }

    #[tokio::test]
    async fn test_closed_connection_is_driver_error() {
        let addr = spawn_endpoint(|_| None).await;

        let driver = RemoteDriver::new(addr, Duration::from_secs(2));
        let err = driver.run_command(&open()).await.unwrap_err();
        assert!(matches!(err, DriverError::Closed | DriverError::Io(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let driver = RemoteDriver::new(addr, Duration::from_secs(2));
        let err = driver.run_command(&open()).await.unwrap_err();
        assert!(matches!(err, DriverError::ConnectionFailed { .. }));
    }
}
