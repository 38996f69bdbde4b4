//! Gateway runtime
//!
//! Owns the radio client and the periodic tasks that connect the mesh to the
//! automation server and the read API.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Gateway                               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌────────────┐  tick   ┌────────────────┐        ┌───────────┐  │
//! │  │   Radio    │◄────────│ Report cycle   │───────►│ Shared    │  │
//! │  │  (client)  │         │ supervisor     │ merge  │ state     │  │
//! │  │            │◄──┐     │ parser         │        │ registry  │  │
//! │  └─────┬──────┘   │     └────────────────┘        │ dispatcher│  │
//! │        │ events   │     ┌────────────────┐        └─────┬─────┘  │
//! │        ▼          └─────│ Command server │◄── TCP       │        │
//! │  ┌────────────┐         └────────────────┘              ▼        │
//! │  │ Event task │──── message push ──► TCP   status pusher ──► TCP │
//! │  └────────────┘                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Registry and dispatcher share one lock, which is never held across an
//! await point. The radio client sits behind an async mutex so the report
//! cycle and the command server take turns on it.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::command::CommandServer;
use crate::config::GatewayConfig;
use crate::dispatch::ChangeDispatcher;
use crate::error::Result;
use crate::event::{self, Resolution, TextMessage};
use crate::interface::RadioClient;
use crate::link::{LinkAction, LinkState, LinkSupervisor};
use crate::push::PushClient;
use crate::registry::{NodeRecord, NodeRegistry};
use crate::report::{parse_report, ParsedReport};

/// Capacity of the radio event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Mutable state shared by the gateway tasks
#[derive(Debug)]
struct GatewayState {
    registry: NodeRegistry,
    dispatcher: ChangeDispatcher,
    link: LinkState,
}

/// Registry and dispatcher behind a single lock
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<Mutex<GatewayState>>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    /// Create an empty registry with a fresh dispatcher
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(GatewayState {
                registry: NodeRegistry::new(),
                dispatcher: ChangeDispatcher::new(),
                link: LinkState::Disconnected,
            })),
        }
    }

    /// Merge a parsed report and run the dispatch decision
    ///
    /// Returns true when the cycle raised a status dispatch.
    pub fn apply_report(&self, report: ParsedReport) -> bool {
        let mut state = self.inner.lock();
        let GatewayState {
            registry,
            dispatcher,
            ..
        } = &mut *state;

        let outcomes: Vec<_> = report
            .into_iter()
            .map(|record| registry.merge(record))
            .collect();
        dispatcher.complete_cycle(outcomes)
    }

    /// Claim a pending dispatch together with the snapshot to push
    pub fn take_dispatch(&self) -> Option<Vec<NodeRecord>> {
        let mut state = self.inner.lock();
        state
            .dispatcher
            .take_pending()
            .then(|| state.registry.snapshot())
    }

    /// Resolve a message sender against the registry
    pub fn resolve(&self, message: TextMessage) -> Resolution {
        message.resolve(&self.inner.lock().registry)
    }

    /// Copy of every known node
    pub fn snapshot(&self) -> Vec<NodeRecord> {
        self.inner.lock().registry.snapshot()
    }

    /// Number of known nodes
    pub fn node_count(&self) -> usize {
        self.inner.lock().registry.len()
    }

    /// Whether a status dispatch is waiting
    pub fn dispatch_pending(&self) -> bool {
        self.inner.lock().dispatcher.is_pending()
    }

    /// Last observed radio link state
    pub fn link_state(&self) -> LinkState {
        self.inner.lock().link
    }

    fn set_link_state(&self, link: LinkState) {
        self.inner.lock().link = link;
    }
}

/// Read-only view of a running gateway
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    state: SharedState,
}

impl GatewayHandle {
    /// Every known node in insertion order
    pub fn nodes(&self) -> Vec<NodeRecord> {
        self.state.snapshot()
    }

    /// Number of known nodes
    pub fn node_count(&self) -> usize {
        self.state.node_count()
    }

    /// Radio link state
    pub fn link_state(&self) -> LinkState {
        self.state.link_state()
    }
}

/// Gateway between a mesh radio and the automation server
pub struct Gateway<R: RadioClient> {
    config: GatewayConfig,
    radio: Arc<AsyncMutex<R>>,
    state: SharedState,
    supervisor: LinkSupervisor,
    push: PushClient,
}

impl<R: RadioClient + 'static> Gateway<R> {
    /// Create a gateway around a radio client
    pub fn new(radio: R, config: GatewayConfig) -> Result<(Self, GatewayHandle)> {
        config.validate()?;

        let state = SharedState::new();
        let handle = GatewayHandle {
            state: state.clone(),
        };
        let gateway = Self {
            supervisor: LinkSupervisor::from_config(&config.schedule),
            push: PushClient::from_config(&config.server),
            radio: Arc::new(AsyncMutex::new(radio)),
            state,
            config,
        };
        Ok((gateway, handle))
    }

    /// Handle on the shared registry
    pub fn handle(&self) -> GatewayHandle {
        GatewayHandle {
            state: self.state.clone(),
        }
    }

    /// Shared state, as seen by the tasks
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Replace the push client (alternate endpoints or timeout)
    pub fn with_push_client(mut self, push: PushClient) -> Self {
        self.push = push;
        self
    }

    /// Run the gateway
    ///
    /// Binds the command listener, spawns the command server, the event task
    /// and the status pusher, then drives the report cycle forever. Only a
    /// failure to bind the listener is returned.
    pub async fn run(mut self) -> Result<()> {
        let radio_name = self.radio.lock().await.name().to_string();
        info!(
            radio = %radio_name,
            server = %self.config.server.host,
            "Starting LoRa mesh gateway"
        );

        let command_addr = self.config.server.addr(self.config.server.command_port);
        let server = CommandServer::bind(
            &command_addr,
            self.radio.clone(),
            self.config.server.command_buffer,
        )
        .await?;
        tokio::spawn(server.serve());

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.radio.lock().await.subscribe(event_tx);
        tokio::spawn(run_event_loop(
            event_rx,
            self.state.clone(),
            self.push.clone(),
        ));

        tokio::spawn(run_status_pusher(
            self.state.clone(),
            self.push.clone(),
            self.config.schedule.push_interval,
        ));

        self.connect().await;

        let mut ticker = tokio::time::interval(self.config.schedule.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// Advance the supervisor one tick and perform its action
    pub async fn tick(&mut self) -> LinkAction {
        let action = self.supervisor.tick();
        match action {
            LinkAction::Idle => trace!(state = %self.supervisor.state(), "Idle tick"),
            LinkAction::Connect => {
                self.connect().await;
            }
            LinkAction::Poll => {
                if let Err(e) = self.report_cycle().await {
                    warn!(error = %e, code = e.error_code(), "Report cycle failed");
                }
            }
        }
        action
    }

    /// Attempt one connection; sends the greeting on success
    pub async fn connect(&mut self) -> bool {
        let mut radio = self.radio.lock().await;
        let connected = match radio.connect().await {
            Ok(()) => true,
            Err(e) => {
                debug!(radio = radio.name(), error = %e, "Radio connect failed");
                false
            }
        };

        self.supervisor.connect_result(connected);
        self.state.set_link_state(self.supervisor.state());

        if connected {
            if let Some(greeting) = &self.config.greeting {
                if let Err(e) = radio.send_text(greeting).await {
                    warn!(error = %e, "Greeting not transmitted");
                }
            }
        }
        connected
    }

    /// Fetch, parse and merge one node report
    ///
    /// Returns true when the cycle raised a status dispatch.
    pub async fn report_cycle(&mut self) -> Result<bool> {
        let raw = self.radio.lock().await.node_report().await?;
        let report = parse_report(&raw);
        let nodes = report.len();

        let dispatch = self.state.apply_report(report);
        self.supervisor.poll_completed();
        debug!(nodes, dispatch, "Report cycle complete");
        Ok(dispatch)
    }

    /// Current supervisor link state
    pub fn link_state(&self) -> LinkState {
        self.supervisor.state()
    }
}

/// Turn raw radio events into message pushes
pub async fn run_event_loop(
    mut events: mpsc::Receiver<String>,
    state: SharedState,
    push: PushClient,
) {
    while let Some(raw) = events.recv().await {
        match handle_event(&state, &push, &raw).await {
            Ok(true) => trace!("Radio event forwarded"),
            Ok(false) => {}
            Err(e) if e.is_scrape_error() => debug!(error = %e, "Dropping radio event"),
            Err(e) => warn!(error = %e, code = e.error_code(), "Radio event not forwarded"),
        }
    }
    debug!("Radio event channel closed");
}

/// Extract, resolve and push one raw event
///
/// Returns true when a message was pushed. Non-text events and messages
/// from senders missing in the registry are skipped.
pub async fn handle_event(state: &SharedState, push: &PushClient, raw: &str) -> Result<bool> {
    let Some(message) = event::extract(raw)? else {
        return Ok(false);
    };
    let Some(message) = state.resolve(message).forwardable() else {
        return Ok(false);
    };

    push.push_message(&message).await?;
    info!(
        sender = %message.sender_id,
        name = %message.display_name,
        "Inbound message forwarded"
    );
    Ok(true)
}

/// Push the node status whenever a dispatch is pending
///
/// The flag is claimed before sending, so a failed push is not repeated;
/// the next significant change raises a new one.
pub async fn run_status_pusher(state: SharedState, push: PushClient, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(records) = state.take_dispatch() else {
            continue;
        };
        if let Err(e) = push.push_status(&records).await {
            warn!(error = %e, nodes = records.len(), "Node status push abandoned");
        }
    }
}
