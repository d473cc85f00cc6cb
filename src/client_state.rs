/// file: src/client_state.rs
/// description: connection state machine and per-client bookkeeping
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tokio::time::Instant;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionState {
    /// Whether `self -> next` is an edge of the connection state machine.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Error, Connecting)
                | (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connecting, Error)
                | (Connected, Reconnecting)
                | (Reconnecting, Connecting)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Reconnecting, Disconnected)
                | (Error, Disconnected)
        )
    }

    /// `connect()` starts a new session only from these states.
    pub fn is_idle(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct ClientState {
    pub state: ConnectionState,
    /// Bumped by every `connect()` and `disconnect()`; a driver only acts
    /// while its own session is current.
    pub session: u64,
    pub connection_id: Option<String>,
    pub connected_since: Option<Instant>,
    pub last_event_time: Option<DateTime<Utc>>,
    pub last_disconnection_time: Option<Instant>,
    pub total_events: u64,
    pub malformed_frames: u64,
    pub reconnect_count: u64,
    pub listener_panics: u64,
}

impl Default for ClientState {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            session: 0,
            connection_id: None,
            connected_since: None,
            last_event_time: None,
            last_disconnection_time: None,
            total_events: 0,
            malformed_frames: 0,
            reconnect_count: 0,
            listener_panics: 0,
        }
    }
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_current(&self, session: u64) -> bool {
        self.session == session
    }

    /// Applies `next` if it is a legal edge; returns whether the state moved.
    pub fn transition(&mut self, next: ConnectionState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }

        match next {
            ConnectionState::Connected => {
                self.connection_id = Some(uuid::Uuid::new_v4().to_string());
                self.connected_since = Some(Instant::now());
            }
            ConnectionState::Reconnecting => {
                self.reconnect_count += 1;
                self.mark_disconnected();
            }
            ConnectionState::Disconnected | ConnectionState::Error => self.mark_disconnected(),
            ConnectionState::Connecting => {}
        }

        self.state = next;
        true
    }

    fn mark_disconnected(&mut self) {
        if self.connected_since.take().is_some() {
            self.last_disconnection_time = Some(Instant::now());
        }
        self.connection_id = None;
    }

    pub fn record_event(&mut self, received_at: DateTime<Utc>) {
        self.last_event_time = Some(received_at);
        self.total_events += 1;
    }

    pub fn record_malformed(&mut self) {
        self.malformed_frames += 1;
    }
}
