//! Error types for gateway operations
//!
//! Nothing in the gateway is process-fatal once the listeners are bound:
//! every variant here degrades to "try again next cycle" at its call site.

use thiserror::Error;

/// Main error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    // ===== Radio Link Errors =====
    /// Radio transport could not be initialized
    #[error("Radio connect failed on {interface}: {reason}")]
    ConnectFailed {
        /// Radio client name
        interface: String,
        /// Failure reason
        reason: String,
    },

    /// Operation needs a connected radio
    #[error("Radio link is not connected")]
    Disconnected,

    /// Node status report could not be fetched
    #[error("Node report unavailable: {0}")]
    ReportUnavailable(String),

    /// Text transmission to the mesh failed
    #[error("Mesh transmit failed: {0}")]
    TransmitFailed(String),

    // ===== Scraping Errors =====
    /// Event looked like a text message but a section was missing
    #[error("Malformed radio event: {0}")]
    MalformedEvent(String),

    /// Event timestamp was not an epoch value
    #[error("Invalid event timestamp: {0:?}")]
    InvalidTimestamp(String),

    // ===== Downstream Errors =====
    /// A TCP push to the automation server failed
    #[error("Push to {channel} channel failed: {reason}")]
    PushFailed {
        /// Push channel name ("status" or "message")
        channel: &'static str,
        /// Failure reason
        reason: String,
    },

    // ===== Configuration Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ===== General Errors =====
    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Check if this error clears up by itself on a later cycle
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            GatewayError::ConnectFailed { .. }
                | GatewayError::Disconnected
                | GatewayError::ReportUnavailable(_)
                | GatewayError::TransmitFailed(_)
                | GatewayError::PushFailed { .. }
        )
    }

    /// Check if this error came from scraping radio output
    pub fn is_scrape_error(&self) -> bool {
        matches!(
            self,
            GatewayError::MalformedEvent(_) | GatewayError::InvalidTimestamp(_)
        )
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::ConnectFailed { .. } => "CONNECT_FAILED",
            GatewayError::Disconnected => "DISCONNECTED",
            GatewayError::ReportUnavailable(_) => "REPORT_UNAVAILABLE",
            GatewayError::TransmitFailed(_) => "TRANSMIT_FAILED",
            GatewayError::MalformedEvent(_) => "MALFORMED_EVENT",
            GatewayError::InvalidTimestamp(_) => "INVALID_TIMESTAMP",
            GatewayError::PushFailed { .. } => "PUSH_FAILED",
            GatewayError::InvalidConfig(_) => "INVALID_CONFIG",
            GatewayError::ChannelClosed => "CHANNEL_CLOSED",
            GatewayError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

// Conversion from tokio mpsc send error
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for GatewayError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        GatewayError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = GatewayError::InvalidTimestamp("abc".to_string());
        assert_eq!(err.error_code(), "INVALID_TIMESTAMP");
        assert_eq!(GatewayError::Disconnected.error_code(), "DISCONNECTED");
    }

    #[test]
    fn test_is_retriable() {
        assert!(GatewayError::Disconnected.is_retriable());
        assert!(GatewayError::PushFailed {
            channel: "status",
            reason: "connection refused".to_string(),
        }
        .is_retriable());
        assert!(!GatewayError::MalformedEvent("no payload".to_string()).is_retriable());
    }

    #[test]
    fn test_is_scrape_error() {
        assert!(GatewayError::MalformedEvent("x".to_string()).is_scrape_error());
        assert!(GatewayError::InvalidTimestamp("x".to_string()).is_scrape_error());
        assert!(!GatewayError::ChannelClosed.is_scrape_error());
    }

    #[test]
    fn test_push_failed_display() {
        let err = GatewayError::PushFailed {
            channel: "message",
            reason: "reset by peer".to_string(),
        };
        assert!(err.to_string().contains("message"));
        assert!(err.to_string().contains("reset by peer"));
    }
}
