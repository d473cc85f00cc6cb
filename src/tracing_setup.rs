// file: src/tracing_setup.rs
// description: log subscriber setup for the pantheon-ws binary

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Directive used when `RUST_LOG` is unset: our own crate at `log_level`,
/// everything else (tungstenite, rustls, hyper) at warn.
pub fn default_directive(log_level: &str) -> String {
    format!("warn,pantheon_ws={}", log_level)
}

pub fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(log_level)))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. Logs go to stderr so stdout carries only
/// the event stream.
pub fn setup_tracing(log_level: &str, json_logs: bool, colored: bool) -> Result<()> {
    let fmt_layer = if json_logs {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_ansi(colored)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(build_filter(log_level))
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directive_scopes_level_to_this_crate() {
        assert_eq!(default_directive("debug"), "warn,pantheon_ws=debug");
        assert!(EnvFilter::try_new(default_directive("trace")).is_ok());
    }
}
