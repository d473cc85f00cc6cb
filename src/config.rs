/// file: src/config.rs
/// description: client configuration and CLI-derived runtime settings
use crate::{cli::Args, dispatch::Topic, output::OutputFormat};
use anyhow::Result;
use std::time::Duration;
use url::Url;

pub const DEFAULT_URL: &str = "ws://localhost:8000/ws";

#[derive(Debug, Clone)]
pub struct Config {
    pub client: ClientConfig,
    pub token: Option<String>,
    pub topics: Vec<Topic>,
    pub metrics: MetricsConfig,
    pub health: HealthConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: Url,
    pub connect_timeout: Duration,
    /// Query parameter carrying the access token.
    pub token_param: String,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added at random, clamped to `multiplier - 1`.
    pub jitter: f64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Zero disables the heartbeat.
    pub interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Zero disables periodic health reports.
    pub report_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub colored: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: None,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Default timeouts, backoff and heartbeat for `url`.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            connect_timeout: Duration::from_secs(30),
            token_param: "token".to_string(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Self> {
        let url = Url::parse(&args.url)?;
        anyhow::ensure!(
            matches!(url.scheme(), "ws" | "wss"),
            "endpoint must be a ws:// or wss:// URL, got {}",
            url
        );

        let topics = if args.topic.is_empty() {
            vec![Topic::All]
        } else {
            args.topic
                .iter()
                .map(|t| t.parse::<Topic>())
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Config {
            client: ClientConfig {
                url,
                connect_timeout: Duration::from_secs(args.timeout),
                token_param: args.token_param.clone(),
                reconnect: ReconnectConfig {
                    initial_delay: Duration::from_millis(args.reconnect_delay_ms),
                    max_delay: Duration::from_secs(args.max_reconnect_delay),
                    multiplier: 2.0,
                    jitter: args.reconnect_jitter,
                    max_attempts: (args.max_reconnects > 0).then_some(args.max_reconnects),
                },
                heartbeat: HeartbeatConfig {
                    interval: Duration::from_secs(args.heartbeat_interval),
                    timeout: Duration::from_secs(args.heartbeat_timeout),
                },
            },
            token: args.token.clone(),
            topics,
            metrics: MetricsConfig {
                enabled: args.metrics,
                port: args.metrics_port,
            },
            health: HealthConfig {
                report_interval: Duration::from_secs(args.health_interval),
            },
            output: OutputConfig {
                format: args.format.parse()?,
                colored: !args.no_color,
            },
        })
    }
}
