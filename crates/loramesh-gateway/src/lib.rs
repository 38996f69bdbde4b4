//! Gateway between a Meshtastic LoRa mesh radio and an automation server
//!
//! This crate scrapes the radio's text surfaces (the rendered node table and
//! the printable packet renderings), keeps a registry of every node ever
//! heard, and forwards node status and inbound text messages to a TCP-based
//! automation server. Text received from the server is transmitted to the
//! mesh.
//!
//! # Architecture
//!
//! The gateway operates in four layers:
//!
//! 1. **Radio Client** - [`RadioClient`] over the `meshtastic` tool
//! 2. **Scraping** - node report parser and inbound event extractor
//! 3. **State** - node registry, link supervisor and change dispatcher
//! 4. **Runtime** - report cycle, status pusher, event task, command server
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use loramesh_gateway::{CliRadio, Gateway, GatewayConfigBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfigBuilder::new()
//!         .server_host("127.0.0.1")
//!         .status_port(1880)
//!         .message_port(1881)
//!         .command_port(1882)
//!         .build();
//!
//!     let radio = CliRadio::new("meshtastic").with_host("192.168.1.20");
//!     let (gateway, handle) = Gateway::new(radio, config)?;
//!
//!     tokio::spawn(gateway.run());
//!     println!("{} nodes known", handle.node_count());
//!     Ok(())
//! }
//! ```
//!
//! # Message Flow
//!
//! ## Mesh → automation server
//!
//! 1. The supervisor tick fetches the node report while the link is up
//! 2. The report parser turns table rows into node records
//! 3. The registry merges them and reports inserts and moves
//! 4. The dispatcher raises a dispatch; the status pusher sends the snapshot
//!
//! Received text messages skip the registry cycle: the extractor scrapes
//! them, the registry resolves the sender's names and the message is pushed
//! at once.
//!
//! ## Automation server → mesh
//!
//! 1. The command server accepts one client at a time
//! 2. Every chunk read is transmitted as one text message

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Scraping
pub mod event;
pub mod report;

// State
pub mod dispatch;
pub mod link;
pub mod registry;

// Transport
pub mod command;
pub mod interface;
pub mod push;

// Runtime
pub mod config;
pub mod error;
pub mod gateway;

pub mod test_utils;

pub use config::{GatewayConfig, GatewayConfigBuilder, ScheduleConfig, ServerConfig};
pub use error::{GatewayError, Result};

pub use event::{extract, InboundMessage, Resolution, TextMessage};
pub use report::{parse_report, parse_row, ParsedReport};

pub use dispatch::{encode_message_payload, encode_status_payload, ChangeDispatcher};
pub use link::{LinkAction, LinkState, LinkSupervisor, RetryPolicy};
pub use registry::{MergeOutcome, NodeRecord, NodeRegistry};

pub use command::CommandServer;
pub use interface::{CliRadio, RadioClient};
pub use push::PushClient;

pub use gateway::{Gateway, GatewayHandle, SharedState};

pub use test_utils::MockRadio;

// Protocol constants re-exports
pub use config::{
    CELL_DELIMITER, COMMAND_READ_BUFFER, DEFAULT_HTTP_PORT, DEFAULT_POLL_TICKS,
    DEFAULT_RETRY_TICKS, FIELD_SEPARATOR, TEXT_MESSAGE_MARKER,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
