#![doc = include_str!("../docs/rustdoc.md")]

/// Access-token collaborator.
pub mod auth;
/// Reconnect delay policy.
pub mod backoff;
/// Command-line argument definitions.
pub mod cli;
/// Reconnecting WebSocket client and its connection task.
pub mod client;
/// Connection state machine and per-client counters.
pub mod client_state;
/// Frame decoding and encoding.
pub mod codec;
/// Runtime configuration model.
pub mod config;
/// Listener registry and event fan-out.
pub mod dispatch;
/// Error types used across the crate.
pub mod error;
/// Lifecycle notifications published by the client.
pub mod events;
/// Process-wide default client.
pub mod global;
/// Metrics and health status structures.
pub mod monitoring;
/// Terminal output for received events.
pub mod output;
/// Tracing/logging initialization.
pub mod tracing_setup;
/// Socket abstraction and its implementations.
pub mod transport;
/// Pantheon event and message models.
pub mod types;

/// Primary crate error type.
pub use error::PantheonError;

pub use auth::{StaticToken, TokenProvider};
pub use client::{WeakClient, WebSocketClient};
pub use client_state::ConnectionState;
pub use config::{ClientConfig, HeartbeatConfig, ReconnectConfig};
pub use dispatch::{Subscription, Topic};
pub use events::ClientEvent;
pub use types::{ClientMessage, Event, EventType, WebSocketEvent};
