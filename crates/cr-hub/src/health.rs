//! Connection lifecycle state machine and heartbeat accounting.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, warn};

/// Heartbeat configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds between pings.
    pub interval_secs: u64,
    /// Consecutive missed pongs that flip a connection to degraded.
    pub max_missed: u32,
    /// Sliding window the misses must fall inside.
    pub window_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 15,
            max_missed: 3,
            window_secs: 90,
        }
    }
}

/// Client-visible connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Degraded,
    Closed,
}

/// Rejected connection-state transition.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid connection transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl ConnectionState {
    /// Validate a transition. Closed is final; degraded connections recover
    /// to open, never directly back to connecting.
    pub fn transition(self, to: ConnectionState) -> Result<ConnectionState, InvalidTransition> {
        use ConnectionState::*;
        let ok = matches!(
            (self, to),
            (Connecting, Open)
                | (Connecting, Closed)
                | (Open, Degraded)
                | (Open, Closed)
                | (Degraded, Open)
                | (Degraded, Closed)
        );
        if ok {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }
}

/// Per-connection heartbeat ledger.
///
/// Callers pass `now` explicitly so the accounting is testable without
/// timers. A ping still outstanding when the next ping goes out counts as
/// missed; `max_missed` consecutive misses inside the sliding window flip the
/// connection to degraded, and the next successful pong clears it.
#[derive(Debug)]
pub struct ConnectionHealth {
    config: HeartbeatConfig,
    state: ConnectionState,
    outstanding: VecDeque<(u64, DateTime<Utc>)>,
    misses: VecDeque<DateTime<Utc>>,
    consecutive_missed: u32,
}

impl ConnectionHealth {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Connecting,
            outstanding: VecDeque::new(),
            misses: VecDeque::new(),
            consecutive_missed: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_degraded(&self) -> bool {
        self.state == ConnectionState::Degraded
    }

    /// Apply a lifecycle transition, keeping the current state on an invalid
    /// request.
    pub fn set_state(&mut self, to: ConnectionState) {
        match self.state.transition(to) {
            Ok(next) => self.state = next,
            Err(e) => warn!(error = %e, "ignoring invalid connection transition"),
        }
    }

    /// Record a ping going out. Any ping still unanswered from before counts
    /// as missed — the client had a full interval to respond.
    pub fn ping_sent(&mut self, seq: u64, now: DateTime<Utc>) {
        let unanswered = self.outstanding.len();
        for _ in 0..unanswered {
            self.record_miss(now);
        }
        self.outstanding.clear();
        self.outstanding.push_back((seq, now));
    }

    /// Record a pong. Clears all pings up to and including `seq`, resets the
    /// consecutive-miss count, and recovers a degraded connection.
    pub fn pong_received(&mut self, seq: u64, _now: DateTime<Utc>) {
        self.outstanding.retain(|(s, _)| *s > seq);
        self.consecutive_missed = 0;
        if self.state == ConnectionState::Degraded {
            self.set_state(ConnectionState::Open);
            debug!("connection recovered from degraded");
        }
    }

    fn record_miss(&mut self, now: DateTime<Utc>) {
        self.consecutive_missed += 1;
        self.misses.push_back(now);

        let window = Duration::seconds(self.config.window_secs as i64);
        while let Some(oldest) = self.misses.front() {
            if now - *oldest > window {
                self.misses.pop_front();
            } else {
                break;
            }
        }

        let in_window = self.misses.len() as u32;
        if self.state == ConnectionState::Open
            && self.consecutive_missed >= self.config.max_missed
            && in_window >= self.config.max_missed
        {
            self.set_state(ConnectionState::Degraded);
            warn!(
                consecutive = self.consecutive_missed,
                "connection degraded after missed heartbeats"
            );
        }
    }
}
