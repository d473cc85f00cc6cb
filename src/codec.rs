// file: src/codec.rs
// description: text frame decoding and encoding for the event stream

use crate::{
    error::{PantheonError, Result},
    types::{Event, WebSocketEvent},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a single inbound text frame turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(WebSocketEvent),
    /// Heartbeat request from the server; answered with a pong.
    Ping,
    /// Heartbeat reply; consumed by the client, never dispatched.
    Pong,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    timestamp: Option<Value>,
}

pub fn decode(text: &str, received_at: DateTime<Utc>) -> Result<Inbound> {
    let invalid = |e: serde_json::Error| PantheonError::InvalidMessage(format!("Failed to parse: {}", e));

    // Derived struct impls also accept positional arrays; frames must be objects.
    let value: Value = serde_json::from_str(text).map_err(invalid)?;
    if !value.is_object() {
        return Err(PantheonError::InvalidMessage(
            "frame is not a JSON object".to_string(),
        ));
    }
    let envelope: Envelope = serde_json::from_value(value).map_err(invalid)?;

    match envelope.message_type.as_str() {
        "ping" => return Ok(Inbound::Ping),
        "pong" => return Ok(Inbound::Pong),
        "" => return Err(PantheonError::InvalidMessage("empty event type".to_string())),
        _ => {}
    }

    let payload = match envelope.payload {
        Value::Null => Value::Object(Default::default()),
        payload @ Value::Object(_) => payload,
        _ => {
            return Err(PantheonError::InvalidMessage(format!(
                "'{}' payload is not an object",
                envelope.message_type
            )));
        }
    };

    let event = Event::from_parts(&envelope.message_type, payload)?;
    Ok(Inbound::Event(WebSocketEvent {
        event,
        timestamp: envelope.timestamp.as_ref().and_then(parse_timestamp),
        received_at,
    }))
}

pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

// RFC 3339 strings or epoch milliseconds; anything else is ignored.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

/// First `limit` characters of a frame, for log lines.
pub fn preview(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
