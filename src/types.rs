/// file: src/types.rs
/// description: event and message types carried over the Pantheon event stream
use crate::error::{PantheonError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fmt, str::FromStr};

/// Closed set of event names the backend publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentExecutionStarted,
    AgentExecutionCompleted,
    AgentExecutionFailed,
    TaskStatusChanged,
    AgentStatusChanged,
    SystemNotification,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::AgentExecutionStarted,
        EventType::AgentExecutionCompleted,
        EventType::AgentExecutionFailed,
        EventType::TaskStatusChanged,
        EventType::AgentStatusChanged,
        EventType::SystemNotification,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::AgentExecutionStarted => "agent_execution_started",
            EventType::AgentExecutionCompleted => "agent_execution_completed",
            EventType::AgentExecutionFailed => "agent_execution_failed",
            EventType::TaskStatusChanged => "task_status_changed",
            EventType::AgentStatusChanged => "agent_status_changed",
            EventType::SystemNotification => "system_notification",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = PantheonError;

    fn from_str(s: &str) -> Result<Self> {
        EventType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| PantheonError::InvalidMessage(format!("unknown event type '{}'", s)))
    }
}

// Payload shapes. Fields the dashboard does not know about are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentExecution {
    pub agent_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusChange {
    pub task_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusChange {
    pub agent_type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    #[default]
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemNotification {
    pub message: String,
    #[serde(default)]
    pub level: NotificationLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A decoded event. Types the client does not recognise are kept as
/// [`Event::Unknown`] and only reach wildcard listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    AgentExecutionStarted(AgentExecution),
    AgentExecutionCompleted(AgentExecution),
    AgentExecutionFailed(AgentExecution),
    TaskStatusChanged(TaskStatusChange),
    AgentStatusChanged(AgentStatusChange),
    SystemNotification(SystemNotification),
    Unknown { event_type: String, payload: Value },
}

impl Event {
    /// Builds the typed variant for `type_name` from its raw payload.
    pub fn from_parts(type_name: &str, payload: Value) -> Result<Self> {
        let Ok(kind) = type_name.parse::<EventType>() else {
            return Ok(Event::Unknown {
                event_type: type_name.to_string(),
                payload,
            });
        };

        let payload = match payload {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let invalid = |e: serde_json::Error| {
            PantheonError::InvalidMessage(format!("bad '{}' payload: {}", type_name, e))
        };

        Ok(match kind {
            EventType::AgentExecutionStarted => {
                Event::AgentExecutionStarted(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventType::AgentExecutionCompleted => {
                Event::AgentExecutionCompleted(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventType::AgentExecutionFailed => {
                Event::AgentExecutionFailed(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventType::TaskStatusChanged => {
                Event::TaskStatusChanged(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventType::AgentStatusChanged => {
                Event::AgentStatusChanged(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventType::SystemNotification => {
                Event::SystemNotification(serde_json::from_value(payload).map_err(invalid)?)
            }
        })
    }

    /// `None` for [`Event::Unknown`].
    pub fn event_type(&self) -> Option<EventType> {
        match self {
            Event::AgentExecutionStarted(_) => Some(EventType::AgentExecutionStarted),
            Event::AgentExecutionCompleted(_) => Some(EventType::AgentExecutionCompleted),
            Event::AgentExecutionFailed(_) => Some(EventType::AgentExecutionFailed),
            Event::TaskStatusChanged(_) => Some(EventType::TaskStatusChanged),
            Event::AgentStatusChanged(_) => Some(EventType::AgentStatusChanged),
            Event::SystemNotification(_) => Some(EventType::SystemNotification),
            Event::Unknown { .. } => None,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Event::Unknown { event_type, .. } => event_type,
            known => known.event_type().map(EventType::as_str).unwrap_or_default(),
        }
    }

    pub fn payload(&self) -> Result<Value> {
        let value = match self {
            Event::AgentExecutionStarted(p)
            | Event::AgentExecutionCompleted(p)
            | Event::AgentExecutionFailed(p) => serde_json::to_value(p)?,
            Event::TaskStatusChanged(p) => serde_json::to_value(p)?,
            Event::AgentStatusChanged(p) => serde_json::to_value(p)?,
            Event::SystemNotification(p) => serde_json::to_value(p)?,
            Event::Unknown { payload, .. } => payload.clone(),
        };
        Ok(value)
    }
}

/// An event together with when it was sent (if the backend said) and when
/// this client received it.
#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketEvent {
    pub event: Event,
    pub timestamp: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
}

impl WebSocketEvent {
    pub fn event_type(&self) -> Option<EventType> {
        self.event.event_type()
    }

    /// Wire-shaped JSON representation, with the receipt time added.
    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::json!({
            "type": self.event.type_name(),
            "payload": self.event.payload()?,
            "timestamp": self.timestamp,
            "received_at": self.received_at,
        }))
    }
}

/// Outbound control message in the same `{type, payload}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl ClientMessage {
    pub fn new(message_type: &str, payload: Value) -> Self {
        Self {
            message_type: message_type.to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn ping() -> Self {
        Self::new("ping", Value::Null)
    }

    pub fn pong() -> Self {
        Self::new("pong", Value::Null)
    }

    pub fn subscribe_task(task_id: &str) -> Self {
        Self::new("subscribe_task", serde_json::json!({ "task_id": task_id }))
    }

    pub fn unsubscribe_task(task_id: &str) -> Self {
        Self::new("unsubscribe_task", serde_json::json!({ "task_id": task_id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_names_round_trip_through_from_str() {
        for kind in EventType::ALL {
            assert_eq!(kind.as_str().parse::<EventType>().unwrap(), kind);
        }
        assert!("agent_exploded".parse::<EventType>().is_err());
    }

    #[test]
    fn task_status_payload_keeps_unknown_fields() {
        let event = Event::from_parts(
            "task_status_changed",
            json!({"task_id": "abc123", "status": "completed", "progress": 100}),
        )
        .unwrap();

        match event {
            Event::TaskStatusChanged(change) => {
                assert_eq!(change.task_id, "abc123");
                assert_eq!(change.status, "completed");
                assert_eq!(change.extra.get("progress"), Some(&json!(100)));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn unrecognised_type_becomes_unknown() {
        let event = Event::from_parts("deployment_finished", json!({"id": 7})).unwrap();
        assert_eq!(event.event_type(), None);
        assert_eq!(event.type_name(), "deployment_finished");
    }

    #[test]
    fn known_type_with_wrong_shape_is_rejected() {
        let err = Event::from_parts("agent_status_changed", json!({"status": "idle"})).unwrap_err();
        assert!(matches!(err, PantheonError::InvalidMessage(_)));
    }

    #[test]
    fn notification_level_defaults_to_info() {
        let event =
            Event::from_parts("system_notification", json!({"message": "maintenance at 2am"}))
                .unwrap();
        let Event::SystemNotification(notification) = event else {
            panic!("expected notification");
        };
        assert_eq!(notification.level, NotificationLevel::Info);
    }

    #[test]
    fn client_message_omits_null_payload() {
        let text = serde_json::to_string(&ClientMessage::ping()).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "ping");
        assert!(value.get("payload").is_none());
    }
}
