/// file: src/events.rs
/// description: lifecycle notifications published by the client alongside its state
use crate::client_state::ConnectionState;
use std::time::Duration;
use tokio::sync::broadcast;

/// Something that happened to the connection itself, as opposed to an event
/// carried over it.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    ReconnectScheduled {
        attempt: u32,
        delay: Duration,
    },
    MalformedFrame {
        reason: String,
    },
    ListenerPanicked {
        event_type: String,
        count: usize,
    },
}

// Slow receivers lag and skip rather than hold the connection task back.
const EVENT_CHANNEL_CAPACITY: usize = 1_024;

pub type EventSender = broadcast::Sender<ClientEvent>;
pub type EventReceiver = broadcast::Receiver<ClientEvent>;

pub fn create_event_channel() -> EventSender {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}
