//! Radio client driving the `meshtastic` command-line tool
//!
//! Every request is one short-lived invocation of the tool:
//!
//! | Operation | Invocation |
//! |-----------|------------|
//! | connect | `meshtastic --info` |
//! | node report | `meshtastic --nodes` |
//! | transmit | `meshtastic --sendtext <text>` |
//!
//! Received packets come from a long-running `meshtastic --listen` child
//! started on the first successful connect. Its stdout prints one packet
//! rendering per event, spread over several lines; [`EventFramer`] stitches
//! the lines back together by brace balance.
//!
//! A serial device only admits one client. On the serial and auto
//! transports the listener is stopped for the duration of each request and
//! started again afterwards. Over `--host` it keeps running. Either way a
//! listener that has exited is restarted after the next request.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::RadioClient;
use crate::error::{GatewayError, Result};

/// Program name of the radio command-line tool
pub const DEFAULT_CLI_PROGRAM: &str = "meshtastic";

/// Largest event rendering the framer buffers before resynchronising
pub const MAX_EVENT_LEN: usize = 64 * 1024;

/// How the tool reaches the radio
#[derive(Debug, Clone, PartialEq, Eq)]
enum Transport {
    /// Let the tool pick the first serial device
    Auto,
    /// Serial device path
    Serial(String),
    /// Network host of the radio
    Host(String),
}

/// Running `--listen` child and the task reading its output
struct Listener {
    child: Child,
    task: JoinHandle<()>,
}

impl Listener {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Kill the child and wait for it, releasing the device
    async fn stop(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "Radio event listener already gone");
        }
        self.task.abort();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Radio client backed by the `meshtastic` tool
pub struct CliRadio {
    program: String,
    transport: Transport,
    name: String,
    connected: bool,
    sink: Option<mpsc::Sender<String>>,
    listener: Option<Listener>,
}

impl CliRadio {
    /// Create a client using the tool's own device discovery
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        Self {
            name: format!("{program} (auto)"),
            program,
            transport: Transport::Auto,
            connected: false,
            sink: None,
            listener: None,
        }
    }

    /// Reach the radio on a serial device
    pub fn with_serial(mut self, device: impl Into<String>) -> Self {
        let device = device.into();
        self.name = format!("{} ({device})", self.program);
        self.transport = Transport::Serial(device);
        self
    }

    /// Reach the radio over the network
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        let host = host.into();
        self.name = format!("{} ({host})", self.program);
        self.transport = Transport::Host(host);
        self
    }

    /// Whether requests and the listener contend for one device
    pub fn is_exclusive(&self) -> bool {
        !matches!(self.transport, Transport::Host(_))
    }

    /// Whether the event listener is currently running
    pub fn is_listening(&self) -> bool {
        self.listener.as_ref().is_some_and(Listener::is_running)
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        match &self.transport {
            Transport::Auto => {}
            Transport::Serial(device) => {
                command.arg("--port").arg(device);
            }
            Transport::Host(host) => {
                command.arg("--host").arg(host);
            }
        }
        command.stdin(Stdio::null()).kill_on_drop(true);
        command
    }

    /// Run one invocation and return its stdout
    async fn invoke(&self, args: &[&str]) -> std::result::Result<String, String> {
        trace!(program = %self.program, ?args, "Invoking radio tool");
        let output = self
            .command()
            .args(args)
            .output()
            .await
            .map_err(|e| e.to_string())?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("{}: {}", output.status, stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Stop the listener when it would hold the device a request needs
    async fn release_device(&mut self) {
        if !self.is_exclusive() {
            return;
        }
        if let Some(mut listener) = self.listener.take() {
            listener.stop().await;
        }
    }

    /// Run a request on a connected radio, then make sure the listener runs
    async fn request(&mut self, args: &[&str]) -> std::result::Result<String, String> {
        self.release_device().await;
        let result = self.invoke(args).await;
        self.ensure_listener();
        result
    }

    /// Start the listener unless one is running; failures are logged
    fn ensure_listener(&mut self) {
        if let Err(e) = self.spawn_listener() {
            warn!(radio = %self.name, error = %e, "Radio event listener not started");
        }
    }

    fn spawn_listener(&mut self) -> Result<()> {
        let Some(sink) = self.sink.clone() else {
            return Ok(());
        };
        if self.is_listening() {
            return Ok(());
        }
        let restart = self.listener.take().is_some();

        let mut child = self
            .command()
            .arg("--listen")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdout = child.stdout.take().ok_or_else(|| GatewayError::ConnectFailed {
            interface: self.name.clone(),
            reason: "listener stdout not captured".to_string(),
        })?;

        if restart {
            debug!(radio = %self.name, "Radio event listener restarted");
        } else {
            info!(radio = %self.name, "Radio event listener started");
        }
        let task = tokio::spawn(forward_events(stdout, sink));
        self.listener = Some(Listener { child, task });
        Ok(())
    }
}

/// Frame listener output into events and hand them to the sink
async fn forward_events(stdout: ChildStdout, sink: mpsc::Sender<String>) {
    let mut lines = BufReader::new(stdout).lines();
    let mut framer = EventFramer::new();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(event) = framer.push_line(&line) {
                    if sink.send(event).await.is_err() {
                        debug!("Event sink closed, stopping listener");
                        break;
                    }
                }
            }
            Ok(None) => {
                debug!("Radio event listener ended (EOF on stdout)");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Error reading radio event listener");
                break;
            }
        }
    }
}

#[async_trait]
impl RadioClient for CliRadio {
    async fn connect(&mut self) -> Result<()> {
        self.release_device().await;
        match self.invoke(&["--info"]).await {
            Ok(_) => {
                self.connected = true;
                self.ensure_listener();
                Ok(())
            }
            Err(reason) => {
                self.connected = false;
                Err(GatewayError::ConnectFailed {
                    interface: self.name.clone(),
                    reason,
                })
            }
        }
    }

    async fn node_report(&mut self) -> Result<String> {
        if !self.connected {
            return Err(GatewayError::Disconnected);
        }
        self.request(&["--nodes"])
            .await
            .map_err(GatewayError::ReportUnavailable)
    }

    async fn send_text(&mut self, text: &str) -> Result<()> {
        if !self.connected {
            return Err(GatewayError::Disconnected);
        }
        self.request(&["--sendtext", text])
            .await
            .map(|_| ())
            .map_err(GatewayError::TransmitFailed)
    }

    fn subscribe(&mut self, sink: mpsc::Sender<String>) {
        self.sink = Some(sink);
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Reassembles multi-line packet renderings
///
/// Text before the first `{` of an event (log prefixes such as
/// `Received: `) is skipped. Line breaks inside an event are kept, the
/// event extractor relies on them. Braces inside quoted strings do not
/// count, and a quote left open at the end of a line is closed there.
/// An event that grows past [`MAX_EVENT_LEN`] is discarded.
#[derive(Debug, Default)]
pub struct EventFramer {
    buffer: String,
    depth: usize,
    quote: Option<char>,
    escaped: bool,
}

impl EventFramer {
    /// Create an empty framer
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one output line; returns an event once its braces balance
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        let start = if self.depth == 0 {
            line.find('{')?
        } else {
            0
        };

        for (offset, ch) in line[start..].char_indices() {
            if let Some(quote) = self.quote {
                if self.escaped {
                    self.escaped = false;
                } else if ch == '\\' {
                    self.escaped = true;
                } else if ch == quote {
                    self.quote = None;
                }
                continue;
            }

            match ch {
                '\'' | '"' => self.quote = Some(ch),
                '{' => self.depth += 1,
                '}' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        let end = start + offset + ch.len_utf8();
                        self.buffer.push_str(&line[start..end]);
                        return Some(std::mem::take(&mut self.buffer));
                    }
                }
                _ => {}
            }
        }

        self.quote = None;
        self.escaped = false;
        self.buffer.push_str(&line[start..]);
        self.buffer.push('\n');

        if self.buffer.len() > MAX_EVENT_LEN {
            warn!(
                bytes = self.buffer.len(),
                "Discarding oversized radio event"
            );
            self.reset();
        }
        None
    }

    /// Whether an event is partially buffered
    pub fn is_pending(&self) -> bool {
        self.depth > 0
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.depth = 0;
        self.quote = None;
        self.escaped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::extract;
    use crate::test_utils::text_event;
    use std::time::Duration;

    fn frame_all(framer: &mut EventFramer, output: &str) -> Vec<String> {
        output
            .lines()
            .filter_map(|line| framer.push_line(line))
            .collect()
    }

    #[test]
    fn test_framer_single_line_event() {
        let mut framer = EventFramer::new();
        assert_eq!(
            framer.push_line("Received: {'from': 1, 'decoded': {'portnum': 'POSITION_APP'}}"),
            Some("{'from': 1, 'decoded': {'portnum': 'POSITION_APP'}}".to_string())
        );
        assert!(!framer.is_pending());
    }

    #[test]
    fn test_framer_reassembles_multiline_event() {
        let event = text_event("hello world", 1700000000, "!abc123");
        let mut framer = EventFramer::new();

        let mut framed = Vec::new();
        assert_eq!(framer.push_line("Connected to radio"), None);
        for (n, line) in event.lines().enumerate() {
            let line = if n == 0 {
                format!("INFO file:line Received: {line}")
            } else {
                line.to_string()
            };
            framed.extend(framer.push_line(&line));
        }

        assert_eq!(framed, vec![event]);
        assert!(!framer.is_pending());
    }

    #[test]
    fn test_framer_skips_noise_between_events() {
        let mut framer = EventFramer::new();
        assert_eq!(framer.push_line(""), None);
        assert_eq!(framer.push_line("Waiting for packets"), None);
        assert_eq!(framer.push_line("{'id': 2}"), Some("{'id': 2}".to_string()));
    }

    #[test]
    fn test_cli_radio_names() {
        assert_eq!(CliRadio::new("meshtastic").name(), "meshtastic (auto)");
        assert_eq!(
            CliRadio::new("meshtastic").with_host("192.168.1.20").name(),
            "meshtastic (192.168.1.20)"
        );
        assert_eq!(
            CliRadio::new("meshtastic").with_serial("/dev/ttyUSB0").name(),
            "meshtastic (/dev/ttyUSB0)"
        );
    }

    #[tokio::test]
    async fn test_requests_need_connection() {
        let mut radio = CliRadio::new(DEFAULT_CLI_PROGRAM);
        assert!(!radio.is_connected());
        assert!(matches!(
            radio.node_report().await,
            Err(GatewayError::Disconnected)
        ));
        assert!(matches!(
            radio.send_text("hi").await,
            Err(GatewayError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_missing_tool_fails_connect() {
        let mut radio = CliRadio::new("loramesh-no-such-radio-tool");
        let err = radio.connect().await.unwrap_err();
        assert!(matches!(err, GatewayError::ConnectFailed { .. }));
        assert!(err.is_retriable());
        assert!(!radio.is_connected());
    }

    #[test]
    fn test_framer_ignores_braces_in_message_text() {
        for text in ["see you {soon", "smile :}"] {
            let event = text_event(text, 1700000000, "!a1b2c3d4");
            let next = text_event("next one", 1700000001, "!a1b2c3d4");
            let mut framer = EventFramer::new();

            let framed = frame_all(&mut framer, &format!("{event}\n{next}"));
            assert_eq!(framed, vec![event, next], "text {text:?}");
            assert!(!framer.is_pending());

            let message = extract(&framed[0]).unwrap().unwrap();
            assert_eq!(message.text, text);
            assert_eq!(message.sender_id, "a1b2c3d4");
        }
    }

    #[test]
    fn test_framer_open_quote_ends_with_line() {
        let mut framer = EventFramer::new();
        assert_eq!(framer.push_line("{'text': 'open"), None);
        assert_eq!(framer.push_line("}"), Some("{'text': 'open\n}".to_string()));
    }

    #[test]
    fn test_framer_discards_oversized_event() {
        let mut framer = EventFramer::new();
        assert_eq!(framer.push_line("{'raw': "), None);

        let filler = "x".repeat(1024);
        for _ in 0..(MAX_EVENT_LEN / filler.len()) {
            assert_eq!(framer.push_line(&filler), None);
        }
        assert!(!framer.is_pending());

        assert_eq!(framer.push_line("{'id': 3}"), Some("{'id': 3}".to_string()));
    }

    #[test]
    fn test_transport_exclusivity() {
        assert!(CliRadio::new("meshtastic").is_exclusive());
        assert!(CliRadio::new("meshtastic")
            .with_serial("/dev/ttyUSB0")
            .is_exclusive());
        assert!(!CliRadio::new("meshtastic")
            .with_host("192.168.1.20")
            .is_exclusive());
    }

    /// `echo` stands in for the tool: it accepts any arguments, and with the
    /// event as transport argument every `--listen` run prints one event and
    /// exits.
    #[cfg(unix)]
    async fn listener_restarts_after_exit(radio: CliRadio) {
        let mut radio = radio;
        let (tx, mut rx) = mpsc::channel(8);
        radio.subscribe(tx);

        radio.connect().await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, "{'id': 1}");

        for _ in 0..500 {
            if !radio.is_listening() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!radio.is_listening());

        radio.node_report().await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second, "{'id': 1}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_network_listener_restarts_after_exit() {
        listener_restarts_after_exit(CliRadio::new("echo").with_host("{'id': 1}")).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_serial_listener_restarts_after_exit() {
        listener_restarts_after_exit(CliRadio::new("echo").with_serial("{'id': 1}")).await;
    }
}
