//! Configuration types for the gateway
//!
//! This module holds the downstream endpoints (automation server host and
//! its ports), the scheduling cadences of the periodic tasks and the text
//! conventions shared by the scrapers and the push encoders.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{GatewayError, Result};

/// Cell delimiter of the rendered node table (BOX DRAWINGS LIGHT VERTICAL)
pub const CELL_DELIMITER: char = '\u{2502}';

/// Separator between fields of a push payload
pub const FIELD_SEPARATOR: char = '!';

/// Substring identifying a text-message event rendering
pub const TEXT_MESSAGE_MARKER: &str = "TEXT_MESSAGE_APP";

/// Marker for an absent numeric field in a node record
pub const ABSENT: &str = "N/A";

/// Ticks between connection attempts while the link is down
pub const DEFAULT_RETRY_TICKS: u32 = 10;

/// Ticks between report cycles while the link is up
pub const DEFAULT_POLL_TICKS: u32 = 5;

/// Default port of the HTTP read API
pub const DEFAULT_HTTP_PORT: u16 = 9000;

/// Size of a single read on the inbound command socket
pub const COMMAND_READ_BUFFER: usize = 4096;

/// Text sent to the mesh after every successful connect
pub const DEFAULT_GREETING: &str = "hello mesh world";

/// Main configuration for the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Downstream automation server endpoints
    #[serde(default)]
    pub server: ServerConfig,

    /// Scheduling of the periodic tasks
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Text sent to the mesh once the radio link comes up
    #[serde(default = "default_greeting")]
    pub greeting: Option<String>,
}

fn default_greeting() -> Option<String> {
    Some(DEFAULT_GREETING.to_string())
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            schedule: ScheduleConfig::default(),
            greeting: default_greeting(),
        }
    }
}

/// Automation server (TCP) endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host of the automation server; the command listener binds here too
    pub host: String,

    /// Port receiving node status snapshots
    pub status_port: u16,

    /// Port receiving inbound text messages
    pub message_port: u16,

    /// Port the gateway listens on for text to transmit
    pub command_port: u16,

    /// Bytes read per chunk from a command client
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

fn default_command_buffer() -> usize {
    COMMAND_READ_BUFFER
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            status_port: 1880,
            message_port: 1881,
            command_port: 1882,
            command_buffer: COMMAND_READ_BUFFER,
        }
    }
}

impl ServerConfig {
    /// Socket address string for one of the configured ports
    pub fn addr(&self, port: u16) -> String {
        format!("{}:{}", self.host, port)
    }
}

/// Cadences of the periodic tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Interval of the link supervisor / report cycle tick
    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    pub tick_interval: Duration,

    /// Interval at which the status pusher checks for a pending dispatch
    #[serde(with = "humantime_serde", default = "default_push_interval")]
    pub push_interval: Duration,

    /// Ticks between connection attempts while disconnected
    #[serde(default = "default_retry_ticks")]
    pub retry_ticks: u32,

    /// Ticks between report cycles while connected
    #[serde(default = "default_poll_ticks")]
    pub poll_ticks: u32,
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_push_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_retry_ticks() -> u32 {
    DEFAULT_RETRY_TICKS
}

fn default_poll_ticks() -> u32 {
    DEFAULT_POLL_TICKS
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            push_interval: Duration::from_secs(1),
            retry_ticks: DEFAULT_RETRY_TICKS,
            poll_ticks: DEFAULT_POLL_TICKS,
        }
    }
}

impl GatewayConfig {
    /// Reject configurations the runtime cannot schedule
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(GatewayError::InvalidConfig(
                "server host must not be empty".to_string(),
            ));
        }
        if self.server.command_buffer == 0 {
            return Err(GatewayError::InvalidConfig(
                "command read buffer must not be empty".to_string(),
            ));
        }
        if self.schedule.retry_ticks == 0 || self.schedule.poll_ticks == 0 {
            return Err(GatewayError::InvalidConfig(
                "tick thresholds must be at least 1".to_string(),
            ));
        }
        if self.schedule.tick_interval.is_zero() || self.schedule.push_interval.is_zero() {
            return Err(GatewayError::InvalidConfig(
                "intervals must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for GatewayConfig
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the automation server host
    pub fn server_host(mut self, host: impl Into<String>) -> Self {
        self.config.server.host = host.into();
        self
    }

    /// Set the node status push port
    pub fn status_port(mut self, port: u16) -> Self {
        self.config.server.status_port = port;
        self
    }

    /// Set the inbound message push port
    pub fn message_port(mut self, port: u16) -> Self {
        self.config.server.message_port = port;
        self
    }

    /// Set the inbound command listener port
    pub fn command_port(mut self, port: u16) -> Self {
        self.config.server.command_port = port;
        self
    }

    /// Set the size of a single command socket read
    pub fn command_buffer(mut self, bytes: usize) -> Self {
        self.config.server.command_buffer = bytes;
        self
    }

    /// Set the supervisor tick interval
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.schedule.tick_interval = interval;
        self
    }

    /// Set the status pusher interval
    pub fn push_interval(mut self, interval: Duration) -> Self {
        self.config.schedule.push_interval = interval;
        self
    }

    /// Set the number of ticks between connection attempts
    pub fn retry_ticks(mut self, ticks: u32) -> Self {
        self.config.schedule.retry_ticks = ticks;
        self
    }

    /// Set the number of ticks between report cycles
    pub fn poll_ticks(mut self, ticks: u32) -> Self {
        self.config.schedule.poll_ticks = ticks;
        self
    }

    /// Set or clear the connect greeting
    pub fn greeting(mut self, greeting: Option<String>) -> Self {
        self.config.greeting = greeting;
        self
    }

    /// Build the configuration
    pub fn build(self) -> GatewayConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.schedule.retry_ticks, DEFAULT_RETRY_TICKS);
        assert_eq!(config.schedule.poll_ticks, DEFAULT_POLL_TICKS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = GatewayConfigBuilder::new()
            .server_host("10.0.0.5")
            .status_port(7001)
            .message_port(7002)
            .command_port(7003)
            .greeting(None)
            .build();

        assert_eq!(config.server.addr(config.server.status_port), "10.0.0.5:7001");
        assert_eq!(config.server.message_port, 7002);
        assert_eq!(config.server.command_port, 7003);
        assert!(config.greeting.is_none());
        assert_eq!(config.server.command_buffer, COMMAND_READ_BUFFER);
    }

    #[test]
    fn test_validate_rejects_zero_thresholds() {
        let config = GatewayConfigBuilder::new().retry_ticks(0).build();
        assert!(matches!(
            config.validate(),
            Err(GatewayError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_host() {
        let config = GatewayConfigBuilder::new().server_host(" ").build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_schedule_humantime_roundtrip() {
        let json = r#"{"tick_interval":"250ms","push_interval":"2s"}"#;
        let schedule: ScheduleConfig = serde_json::from_str(json).unwrap();
        assert_eq!(schedule.tick_interval, Duration::from_millis(250));
        assert_eq!(schedule.push_interval, Duration::from_secs(2));
        assert_eq!(schedule.retry_ticks, DEFAULT_RETRY_TICKS);
    }

    #[test]
    fn test_delimiter_glyph() {
        assert_eq!(CELL_DELIMITER, '│');
    }
}
