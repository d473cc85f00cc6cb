// file: src/global.rs
// description: process-wide default client for callers that don't pass one around

use crate::client::WebSocketClient;
use std::sync::{Mutex, MutexGuard, PoisonError};

static DEFAULT_CLIENT: Mutex<Option<WebSocketClient>> = Mutex::new(None);

fn slot() -> MutexGuard<'static, Option<WebSocketClient>> {
    DEFAULT_CLIENT.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returns the default client, creating it with `make` on first use. Later
/// calls return the existing instance and never run `make`.
pub fn init_default<F>(make: F) -> WebSocketClient
where
    F: FnOnce() -> WebSocketClient,
{
    slot().get_or_insert_with(make).clone()
}

pub fn default_client() -> Option<WebSocketClient> {
    slot().clone()
}

/// Disconnects and forgets the default client.
pub fn reset_default() {
    // Take it out first so disconnect runs without the slot locked.
    let previous = slot().take();
    if let Some(client) = previous {
        client.disconnect();
    }
}
