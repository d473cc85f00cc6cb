/// file: src/output.rs
/// description: renders received events for the terminal or as JSON lines
use crate::{
    client_state::ConnectionState,
    error::{PantheonError, Result},
    types::{Event, NotificationLevel, WebSocketEvent},
};
use chrono::Local;
use std::str::FromStr;

// ANSI color codes
pub struct Colors;

impl Colors {
    pub const RESET: &'static str = "\x1b[0m";
    pub const BOLD: &'static str = "\x1b[1m";
    pub const RED: &'static str = "\x1b[31m";
    pub const GREEN: &'static str = "\x1b[32m";
    pub const YELLOW: &'static str = "\x1b[33m";
    pub const BLUE: &'static str = "\x1b[34m";
    pub const CYAN: &'static str = "\x1b[36m";
    pub const GRAY: &'static str = "\x1b[90m";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = PantheonError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(PantheonError::InvalidMessage(format!(
                "unknown output format '{}' (expected text or json)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventPrinter {
    format: OutputFormat,
    colored: bool,
}

impl EventPrinter {
    pub fn new(format: OutputFormat, colored: bool) -> Self {
        Self { format, colored }
    }

    pub fn print(&self, event: &WebSocketEvent) {
        match self.render(event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("Failed to render event: {}", e),
        }
    }

    pub fn render(&self, event: &WebSocketEvent) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string(&event.to_json()?)?),
            OutputFormat::Text => Ok(self.render_text(event)),
        }
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.colored {
            format!("{}{}{}", color, text, Colors::RESET)
        } else {
            text.to_string()
        }
    }

    fn render_text(&self, event: &WebSocketEvent) -> String {
        let time = event.received_at.with_timezone(&Local).format("%H:%M:%S");
        let (color, detail) = match &event.event {
            Event::AgentExecutionStarted(run) => (
                Colors::BLUE,
                join([
                    Some(format!("agent={}", run.agent_type)),
                    run.task_id.as_ref().map(|t| format!("task={}", t)),
                    run.repository.as_ref().map(|r| format!("repo={}", r)),
                ]),
            ),
            Event::AgentExecutionCompleted(run) => (
                Colors::GREEN,
                join([
                    Some(format!("agent={}", run.agent_type)),
                    run.task_id.as_ref().map(|t| format!("task={}", t)),
                    run.duration_ms.map(|ms| format!("took={}ms", ms)),
                ]),
            ),
            Event::AgentExecutionFailed(run) => (
                Colors::RED,
                join([
                    Some(format!("agent={}", run.agent_type)),
                    run.task_id.as_ref().map(|t| format!("task={}", t)),
                    run.error.as_ref().map(|e| format!("error={:?}", e)),
                ]),
            ),
            Event::TaskStatusChanged(change) => (
                Colors::CYAN,
                join([
                    Some(format!("task={}", change.task_id)),
                    Some(match &change.previous_status {
                        Some(previous) => format!("status={} -> {}", previous, change.status),
                        None => format!("status={}", change.status),
                    }),
                ]),
            ),
            Event::AgentStatusChanged(change) => (
                Colors::CYAN,
                join([
                    Some(format!("agent={}", change.agent_type)),
                    Some(format!("status={}", change.status)),
                    change.current_task.as_ref().map(|t| format!("task={}", t)),
                ]),
            ),
            Event::SystemNotification(note) => (
                match note.level {
                    NotificationLevel::Error => Colors::RED,
                    NotificationLevel::Warning => Colors::YELLOW,
                    NotificationLevel::Success => Colors::GREEN,
                    NotificationLevel::Info => Colors::BLUE,
                },
                join([
                    note.title.as_ref().map(|t| format!("[{}]", t)),
                    Some(note.message.clone()),
                ]),
            ),
            Event::Unknown { payload, .. } => (Colors::GRAY, payload.to_string()),
        };

        format!(
            "{} {:<26} {}",
            self.paint(Colors::GRAY, &time.to_string()),
            self.paint(color, event.event.type_name()),
            detail
        )
    }

    pub fn render_state(&self, state: ConnectionState) -> String {
        let color = match state {
            ConnectionState::Connected => Colors::GREEN,
            ConnectionState::Connecting | ConnectionState::Reconnecting => Colors::YELLOW,
            ConnectionState::Error => Colors::RED,
            ConnectionState::Disconnected => Colors::GRAY,
        };
        format!(
            "{} {}",
            self.paint(Colors::BOLD, "connection"),
            self.paint(color, state.as_str())
        )
    }
}

fn join<const N: usize>(parts: [Option<String>; N]) -> String {
    parts.into_iter().flatten().collect::<Vec<_>>().join(" ")
}
