use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "pantheon-ws",
    about = "follow Pantheon agent and task events over a self-healing websocket",
    version
)]
pub struct Args {
    /// WebSocket endpoint URL
    #[arg(short, long, default_value = crate::config::DEFAULT_URL)]
    pub url: String,

    /// Access token appended to the endpoint URL
    #[arg(long, env = "PANTHEON_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Query parameter name used for the access token
    #[arg(long, default_value = "token")]
    pub token_param: String,

    /// Event types to follow ("all" or e.g. task_status_changed); repeatable
    #[arg(short, long)]
    pub topic: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,

    /// Enable metrics server
    #[arg(long)]
    pub metrics: bool,

    /// Metrics server port
    #[arg(long, default_value = "9090")]
    pub metrics_port: u16,

    /// Connection timeout in seconds
    #[arg(long, default_value = "30")]
    pub timeout: u64,

    /// Initial reconnection delay in milliseconds
    #[arg(long, default_value = "1000")]
    pub reconnect_delay_ms: u64,

    /// Upper bound for the reconnection delay in seconds
    #[arg(long, default_value = "30")]
    pub max_reconnect_delay: u64,

    /// Random fraction added to each reconnection delay
    #[arg(long, default_value = "0.2")]
    pub reconnect_jitter: f64,

    /// Maximum number of consecutive reconnection attempts (0 for unlimited)
    #[arg(long, default_value = "0")]
    pub max_reconnects: u32,

    /// Heartbeat ping interval in seconds (0 disables the heartbeat)
    #[arg(long, default_value = "30")]
    pub heartbeat_interval: u64,

    /// Seconds to wait for any reply after a heartbeat ping
    #[arg(long, default_value = "10")]
    pub heartbeat_timeout: u64,

    /// Seconds between health reports in the log (0 disables them)
    #[arg(long, default_value = "60")]
    pub health_interval: u64,

    /// Output format: text, json
    #[arg(long, default_value = "text")]
    pub format: String,

    /// Disable colored output (useful for piping to files)
    #[arg(long)]
    pub no_color: bool,
}
