//! Radio client implementations
//!
//! The gateway talks to the mesh radio only through [`RadioClient`]:
//!
//! - [`cli::CliRadio`] drives the `meshtastic` command-line tool
//! - [`crate::test_utils::MockRadio`] scripts a radio for tests
//!
//! A client renders everything as text. The node report is the box-drawn
//! table parsed by [`crate::report`], received packets are delivered to the
//! subscription sink as their printable rendering for [`crate::event`].

mod cli;

pub use cli::{CliRadio, EventFramer, DEFAULT_CLI_PROGRAM};

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Trait for mesh radio clients
#[async_trait]
pub trait RadioClient: Send + Sync {
    /// Initialize the radio transport
    async fn connect(&mut self) -> Result<()>;

    /// Fetch the rendered node status report
    async fn node_report(&mut self) -> Result<String>;

    /// Transmit a text message to the mesh
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Register the sink receiving raw event renderings
    ///
    /// Events start flowing once the client is connected.
    fn subscribe(&mut self, sink: mpsc::Sender<String>);

    /// Check if the transport is initialized
    fn is_connected(&self) -> bool;

    /// Get the client name (for logging)
    fn name(&self) -> &str;
}
