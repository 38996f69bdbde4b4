//! Outbound pushes to the automation server
//!
//! Each push opens a fresh TCP connection to its channel, writes the payload
//! and closes. There is no framing beyond the connection itself and no
//! acknowledgement; a failed push is reported once and abandoned.

use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::ServerConfig;
use crate::dispatch::{encode_message_payload, encode_status_payload};
use crate::error::{GatewayError, Result};
use crate::event::InboundMessage;
use crate::registry::NodeRecord;

/// Upper bound for connecting and writing one push
pub const PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Channel name of node status pushes
pub const STATUS_CHANNEL: &str = "status";

/// Channel name of inbound message pushes
pub const MESSAGE_CHANNEL: &str = "message";

/// Sender for the two push channels
#[derive(Debug, Clone)]
pub struct PushClient {
    status_addr: String,
    message_addr: String,
    timeout: Duration,
}

impl PushClient {
    /// Create a client for explicit channel addresses
    pub fn new(status_addr: impl Into<String>, message_addr: impl Into<String>) -> Self {
        Self {
            status_addr: status_addr.into(),
            message_addr: message_addr.into(),
            timeout: PUSH_TIMEOUT,
        }
    }

    /// Create a client for the configured automation server
    pub fn from_config(server: &ServerConfig) -> Self {
        Self::new(
            server.addr(server.status_port),
            server.addr(server.message_port),
        )
    }

    /// Override the per-push timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Push a node status snapshot
    pub async fn push_status(&self, records: &[NodeRecord]) -> Result<()> {
        let payload = encode_status_payload(records);
        self.send(STATUS_CHANNEL, &self.status_addr, &payload).await?;
        debug!(nodes = records.len(), "Node status pushed");
        Ok(())
    }

    /// Push one inbound text message
    pub async fn push_message(&self, message: &InboundMessage) -> Result<()> {
        let payload = encode_message_payload(message);
        self.send(MESSAGE_CHANNEL, &self.message_addr, &payload)
            .await?;
        debug!(sender = %message.sender_id, "Inbound message pushed");
        Ok(())
    }

    async fn send(&self, channel: &'static str, addr: &str, payload: &str) -> Result<()> {
        let failed = |reason: String| GatewayError::PushFailed { channel, reason };

        let attempt = async {
            let mut stream = TcpStream::connect(addr).await?;
            stream.write_all(payload.as_bytes()).await?;
            stream.shutdown().await
        };

        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(failed(format!("{addr}: {e}"))),
            Err(_) => Err(failed(format!("{addr}: timed out after {:?}", self.timeout))),
        }
    }
}
