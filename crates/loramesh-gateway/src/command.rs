//! Inbound command server
//!
//! Listens for text from the automation server and transmits it to the mesh.
//! One client is served at a time; every chunk read from the client is one
//! transmission. When the client disconnects the server goes back to
//! accepting.

use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::interface::RadioClient;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// TCP server forwarding received text to the radio
pub struct CommandServer<R> {
    listener: TcpListener,
    radio: Arc<Mutex<R>>,
    buffer_size: usize,
}

impl<R: RadioClient + 'static> CommandServer<R> {
    /// Bind the listener
    pub async fn bind(addr: &str, radio: Arc<Mutex<R>>, buffer_size: usize) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Command server listening");
        Ok(Self {
            listener,
            radio,
            buffer_size: buffer_size.max(1),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve clients one after another, forever
    pub async fn serve(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    info!(%peer, "Command client connected");
                    match self.handle_client(stream).await {
                        Ok(forwarded) => {
                            info!(%peer, forwarded, "Command client disconnected")
                        }
                        Err(e) => warn!(%peer, error = %e, "Command client dropped"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Command accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    /// Forward chunks until the client closes; returns the chunk count
    async fn handle_client(&self, mut stream: TcpStream) -> Result<usize> {
        let mut buffer = BytesMut::with_capacity(self.buffer_size);
        let mut forwarded = 0;

        loop {
            buffer.clear();
            let n = (&mut stream)
                .take(self.buffer_size as u64)
                .read_buf(&mut buffer)
                .await?;
            if n == 0 {
                return Ok(forwarded);
            }

            let text = String::from_utf8_lossy(&buffer[..n]);
            debug!(bytes = n, "Forwarding command text to the mesh");

            let mut radio = self.radio.lock().await;
            match radio.send_text(&text).await {
                Ok(()) => forwarded += 1,
                Err(e) => warn!(radio = radio.name(), error = %e, "Mesh transmit failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockRadio;
    use tokio::io::AsyncWriteExt;

    async fn start(radio: MockRadio, buffer_size: usize) -> SocketAddr {
        let server = CommandServer::bind("127.0.0.1:0", Arc::new(Mutex::new(radio)), buffer_size)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.serve());
        addr
    }

    #[tokio::test]
    async fn test_forwards_ping_then_accepts_next_client() {
        let radio = MockRadio::new();
        let probe = radio.clone();
        let addr = start(radio, 4096).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        drop(client);
        assert_eq!(
            probe.wait_for_sent(1, Duration::from_secs(5)).await,
            vec!["ping"]
        );

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"second").await.unwrap();
        client.shutdown().await.unwrap();
        assert_eq!(
            probe.wait_for_sent(2, Duration::from_secs(5)).await,
            vec!["ping", "second"]
        );
    }

    #[tokio::test]
    async fn test_long_input_is_chunked() {
        let radio = MockRadio::new();
        let probe = radio.clone();
        let addr = start(radio, 4).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"abcdefgh").await.unwrap();
        client.shutdown().await.unwrap();

        let mut sent = probe.wait_for_sent(2, Duration::from_secs(5)).await;
        for _ in 0..100 {
            if sent.concat().len() >= 8 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            sent = probe.sent();
        }
        assert_eq!(sent.concat(), "abcdefgh");
        assert!(sent.iter().all(|chunk| chunk.len() <= 4));
    }

    #[tokio::test]
    async fn test_transmit_failure_keeps_client() {
        let radio = MockRadio::new().fail_sends(true);
        let addr = start(radio, 4096).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"lost").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Connection is still open after the failed transmit
        client.write_all(b"again").await.unwrap();
    }
}
