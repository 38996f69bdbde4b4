//! Test utilities for running the gateway without a radio
//!
//! [`MockRadio`] is a scripted [`RadioClient`]: connect failures, the node
//! report it returns and the events it emits are all set by the test, and
//! every transmitted text is recorded. Clones share their state, so a test
//! keeps one clone to drive and inspect the radio while the gateway owns the
//! other.
//!
//! The fixture functions render the radio's text surfaces the way the real
//! tool does.
//!
//! # Example
//!
//! ```rust,ignore
//! use loramesh_gateway::test_utils::{sample_report, MockRadio};
//!
//! let radio = MockRadio::new().with_report(sample_report()).fail_connects(2);
//! let probe = radio.clone();
//! // hand `radio` to a Gateway, then inspect `probe.sent()`
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::interface::RadioClient;
use crate::registry::NodeRecord;

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    connect_attempts: u32,
    connect_failures: u32,
    report: Option<String>,
    report_failures: u32,
    fail_sends: bool,
    sent: Vec<String>,
    sink: Option<mpsc::Sender<String>>,
}

/// Scripted radio for unit and integration tests
#[derive(Debug, Clone, Default)]
pub struct MockRadio {
    state: Arc<Mutex<MockState>>,
}

impl MockRadio {
    /// Create a radio that connects at once and reports no nodes
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve this text as the node report
    pub fn with_report(self, report: impl Into<String>) -> Self {
        self.set_report(report);
        self
    }

    /// Fail the next `n` connection attempts
    pub fn fail_connects(self, n: u32) -> Self {
        self.state.lock().connect_failures = n;
        self
    }

    /// Fail the next `n` report fetches
    pub fn fail_reports(self, n: u32) -> Self {
        self.state.lock().report_failures = n;
        self
    }

    /// Make every transmission fail
    pub fn fail_sends(self, fail: bool) -> Self {
        self.state.lock().fail_sends = fail;
        self
    }

    /// Replace the node report
    pub fn set_report(&self, report: impl Into<String>) {
        self.state.lock().report = Some(report.into());
    }

    /// Texts transmitted so far
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    /// Connection attempts so far
    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().connect_attempts
    }

    /// Whether a sink has been registered
    pub fn has_subscriber(&self) -> bool {
        self.state.lock().sink.is_some()
    }

    /// Emit a raw event rendering to the subscriber
    pub async fn emit(&self, raw: impl Into<String>) -> Result<()> {
        let sink = self.state.lock().sink.clone();
        match sink {
            Some(sink) => Ok(sink.send(raw.into()).await?),
            None => Err(GatewayError::ChannelClosed),
        }
    }

    /// Wait until `count` texts were transmitted, up to `timeout`
    pub async fn wait_for_sent(&self, count: usize, timeout: Duration) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let sent = self.sent();
            if sent.len() >= count || tokio::time::Instant::now() >= deadline {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl RadioClient for MockRadio {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            state.connected = false;
            return Err(GatewayError::ConnectFailed {
                interface: "MockRadio".to_string(),
                reason: "simulated failure".to_string(),
            });
        }
        state.connected = true;
        Ok(())
    }

    async fn node_report(&mut self) -> Result<String> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(GatewayError::Disconnected);
        }
        if state.report_failures > 0 {
            state.report_failures -= 1;
            return Err(GatewayError::ReportUnavailable(
                "simulated failure".to_string(),
            ));
        }
        Ok(state.report.clone().unwrap_or_default())
    }

    async fn send_text(&mut self, text: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_sends {
            return Err(GatewayError::TransmitFailed("simulated failure".to_string()));
        }
        debug!(text, "MockRadio transmit");
        state.sent.push(text.to_string());
        Ok(())
    }

    fn subscribe(&mut self, sink: mpsc::Sender<String>) {
        self.state.lock().sink = Some(sink);
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn name(&self) -> &str {
        "MockRadio"
    }
}

/// A well-formed record as parsed from the first row of [`sample_report`]
pub fn sample_record(index: &str, id: &str) -> NodeRecord {
    NodeRecord {
        index: index.to_string(),
        display_name: "Base Camp".to_string(),
        short_name: "BC".to_string(),
        id: id.to_string(),
        latitude: "3.1390 [degree]".to_string(),
        longitude: "101.6869 [degree]".to_string(),
        altitude: "45m".to_string(),
        battery: "100[VDC]".to_string(),
        snr: "6.25dB".to_string(),
        last_heard: "2026-10-19 10:00:00".to_string(),
        since: "1 min ago".to_string(),
    }
}

/// Node report with a header row and three nodes, the last without position
pub fn sample_report() -> String {
    [
        "╒═════╤═════════════╤═══════╤═══════════╤════════════╤═════════════╤════════════╤═══════════╤══════════╤═════════════════════╤════════════╕",
        "│   N │ User        │ AKA   │ ID        │ Latitude   │ Longitude   │ Altitude   │ Battery   │ SNR      │ LastHeard           │ Since      │",
        "╞═════╪═════════════╪═══════╪═══════════╪════════════╪═════════════╪════════════╪═══════════╪══════════╪═════════════════════╪════════════╡",
        "│   1 │ Base Camp   │ BC    │ !a1b2c3d4 │ 3.1390°    │ 101.6869°   │ 45m        │ 100%      │ 6.25 dB  │ 2026-10-19 10:00:00 │ 1 min ago  │",
        "├─────┼─────────────┼───────┼───────────┼────────────┼─────────────┼────────────┼───────────┼──────────┼─────────────────────┼────────────┤",
        "│   2 │ Trail Hiker │ TH 1  │ !0badc0de │ 3.2001°    │ 101.7002°   │ 120m       │ 87%       │ -2.50 dB │ 2026-10-19 09:58:12 │ 3 mins ago │",
        "├─────┼─────────────┼───────┼───────────┼────────────┼─────────────┼────────────┼───────────┼──────────┼─────────────────────┼────────────┤",
        "│   3 │ Relay       │ RL    │ !deadbeef │ N/A        │ N/A         │ N/A        │ N/A       │ N/A      │ N/A                 │ N/A        │",
        "╘═════╧═════════════╧═══════╧═══════════╧════════════╧═════════════╧════════════╧═══════════╧══════════╧═════════════════════╧════════════╛",
    ]
    .join("\n")
}

/// [`sample_report`] as an ASCII-escaped string
pub fn escaped_report() -> String {
    sample_report()
        .replace('\u{2502}', "\\u2502")
        .replace('°', "\\xb0")
}

/// Printable rendering of a received text-message packet
///
/// `sender` is the node id as rendered by the radio, with its leading `!`.
pub fn text_event(text: &str, epoch: i64, sender: &str) -> String {
    format!(
        "{{'from': 2882400001, 'to': 4294967295, 'decoded': {{'portnum': 'TEXT_MESSAGE_APP', \
         'payload': b'{text}', 'text': '{text}'}}, 'id': 1234, 'rxTime': {epoch}, \
         'raw': from: 2882400001\n\
         to: 4294967295\n\
         decoded {{\n  portnum: TEXT_MESSAGE_APP\n  payload: \"{text}\"\n}}\n\
         id: 1234\n\
         rx_time: {epoch}\n\
         , 'fromId': '{sender}', 'toId': '^all'}}"
    )
}
