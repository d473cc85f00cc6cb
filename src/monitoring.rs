use crate::{client_state::ConnectionState, error::PantheonError};
use anyhow::Result;
use metrics::{Counter, Gauge, counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::{net::SocketAddr, sync::LazyLock};
use tracing::{error, info};

// Global metrics
pub static EVENTS_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("pantheon_ws_events_total"));
pub static MALFORMED_FRAMES_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("pantheon_ws_malformed_frames_total"));
pub static RECONNECT_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("pantheon_ws_reconnects_total"));
pub static LISTENER_PANICS_COUNTER: LazyLock<Counter> =
    LazyLock::new(|| counter!("pantheon_ws_listener_panics_total"));
pub static CONNECTED_GAUGE: LazyLock<Gauge> = LazyLock::new(|| gauge!("pantheon_ws_connected"));

pub async fn setup_metrics(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    let builder = PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", "pantheon-ws")
        .add_global_label("version", env!("CARGO_PKG_VERSION"));

    match builder.install() {
        Ok(_) => {
            info!(
                "Prometheus metrics server started on http://{}/metrics",
                addr
            );

            // Initialize metrics with default values
            EVENTS_COUNTER.absolute(0);
            MALFORMED_FRAMES_COUNTER.absolute(0);
            RECONNECT_COUNTER.absolute(0);
            LISTENER_PANICS_COUNTER.absolute(0);
            CONNECTED_GAUGE.set(0.0);

            Ok(())
        }
        Err(e) => {
            error!("Failed to start metrics server: {}", e);
            Err(PantheonError::MetricsError(e.to_string()).into())
        }
    }
}

/// Point-in-time view of a client, as reported by `WebSocketClient::health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub connection_state: ConnectionState,
    pub connection_id: Option<String>,
    pub last_event_time: Option<chrono::DateTime<chrono::Utc>>,
    pub total_events: u64,
    pub malformed_frames: u64,
    pub reconnect_count: u64,
    pub listener_panics: u64,
    pub listeners: usize,
    #[serde(rename = "uptime_seconds", serialize_with = "as_seconds")]
    pub uptime: chrono::Duration,
}

fn as_seconds<S: serde::Serializer>(
    duration: &chrono::Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_i64(duration.num_seconds())
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            is_healthy: false,
            connection_state: ConnectionState::Disconnected,
            connection_id: None,
            last_event_time: None,
            total_events: 0,
            malformed_frames: 0,
            reconnect_count: 0,
            listener_panics: 0,
            listeners: 0,
            uptime: chrono::Duration::zero(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}));
        if let Some(map) = value.as_object_mut() {
            map.insert(
                "status".to_string(),
                (if self.is_healthy { "healthy" } else { "unhealthy" }).into(),
            );
            map.insert("timestamp".to_string(), serde_json::json!(chrono::Utc::now()));
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_json_reports_status_and_uptime() {
        let health = HealthStatus {
            is_healthy: true,
            connection_state: ConnectionState::Connected,
            uptime: chrono::Duration::seconds(90),
            ..HealthStatus::new()
        };

        let json = health.to_json();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["connection_state"], "connected");
        assert_eq!(json["uptime_seconds"], 90);
        assert!(json["last_event_time"].is_null());
    }
}
