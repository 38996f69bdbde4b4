//! Radio link supervisor
//!
//! A pure state machine: the runtime calls [`LinkSupervisor::tick`] at a fixed
//! interval and performs whatever [`LinkAction`] comes back, then reports the
//! result through [`LinkSupervisor::connect_result`] or
//! [`LinkSupervisor::poll_completed`]. The tick count is the only clock, so
//! every schedule is deterministic under test.
//!
//! ```text
//!              tick × retry_ticks ──► Connect ──ok──► Connected ──tick × poll_ticks──► Poll
//! Disconnected ◄──────────────────────── err                 (first poll on the next tick)
//! ```
//!
//! An established link is never checked for liveness.

use std::fmt;
use tracing::{debug, info, warn};

use crate::config::{ScheduleConfig, DEFAULT_POLL_TICKS, DEFAULT_RETRY_TICKS};

/// Logical state of the connection to the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No usable radio transport
    Disconnected,
    /// Radio transport initialized
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}

/// What the runtime should do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    /// Nothing this tick
    Idle,
    /// Attempt one connection to the radio
    Connect,
    /// Run a report cycle
    Poll,
}

/// Fixed cadence, counted in ticks
///
/// Fires once every `every` calls to [`RetryPolicy::advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    every: u32,
    counter: u32,
}

impl RetryPolicy {
    /// Fire every `every` ticks (at least one)
    pub fn fixed(every: u32) -> Self {
        Self {
            every: every.max(1),
            counter: 0,
        }
    }

    /// Count one tick; true when the threshold is reached
    pub fn advance(&mut self) -> bool {
        self.counter += 1;
        self.counter >= self.every
    }

    /// Restart counting from zero
    pub fn reset(&mut self) {
        self.counter = 0;
    }

    /// Ticks counted since the last reset
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Configured threshold
    pub fn every(&self) -> u32 {
        self.every
    }
}

/// Supervisor of the radio link and the report cycle cadence
#[derive(Debug, Clone)]
pub struct LinkSupervisor {
    state: LinkState,
    retry: RetryPolicy,
    poll: RetryPolicy,
    first_poll_done: bool,
}

impl Default for LinkSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_TICKS, DEFAULT_POLL_TICKS)
    }
}

impl LinkSupervisor {
    /// Create a disconnected supervisor
    pub fn new(retry_ticks: u32, poll_ticks: u32) -> Self {
        Self {
            state: LinkState::Disconnected,
            retry: RetryPolicy::fixed(retry_ticks),
            poll: RetryPolicy::fixed(poll_ticks),
            first_poll_done: false,
        }
    }

    /// Create from the schedule configuration
    pub fn from_config(schedule: &ScheduleConfig) -> Self {
        Self::new(schedule.retry_ticks, schedule.poll_ticks)
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Ticks counted toward the next connection attempt
    pub fn retry_counter(&self) -> u32 {
        self.retry.counter()
    }

    /// Whether a report cycle has completed since start
    pub fn first_poll_done(&self) -> bool {
        self.first_poll_done
    }

    /// Advance one tick
    pub fn tick(&mut self) -> LinkAction {
        match self.state {
            LinkState::Disconnected => {
                if self.retry.advance() {
                    debug!(ticks = self.retry.every(), "Radio retry threshold reached");
                    LinkAction::Connect
                } else {
                    LinkAction::Idle
                }
            }
            LinkState::Connected => {
                if self.poll.advance() || !self.first_poll_done {
                    self.poll.reset();
                    LinkAction::Poll
                } else {
                    LinkAction::Idle
                }
            }
        }
    }

    /// Record the outcome of a connection attempt
    pub fn connect_result(&mut self, connected: bool) {
        self.retry.reset();
        if connected {
            if self.state != LinkState::Connected {
                info!("Radio link connected");
            }
            self.state = LinkState::Connected;
            self.poll.reset();
        } else {
            warn!("Radio link unavailable, retrying in {} ticks", self.retry.every());
            self.state = LinkState::Disconnected;
        }
    }

    /// Record a successful report cycle
    pub fn poll_completed(&mut self) {
        self.first_poll_done = true;
    }
}
