use anyhow::Result;
use clap::Parser;
use pantheon_ws::{
    auth::StaticToken,
    cli::Args,
    client::WebSocketClient,
    client_state::ConnectionState,
    config::Config,
    events::ClientEvent,
    monitoring::setup_metrics,
    output::EventPrinter,
    tracing_setup::setup_tracing,
};
use std::sync::Arc;
use tokio::{sync::broadcast::error::RecvError, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup tracing/logging
    setup_tracing(&args.log_level, args.json_logs, !args.no_color)?;

    info!("Starting Pantheon event stream client v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_args(&args)?;

    // Setup metrics server if enabled
    if config.metrics.enabled {
        setup_metrics(config.metrics.port).await?;
    }

    let tokens = match &config.token {
        Some(token) => StaticToken::new(token.clone()),
        None => {
            error!("No access token; pass --token or set PANTHEON_TOKEN");
            anyhow::bail!("not authenticated");
        }
    };

    let client = WebSocketClient::with_default_transport(config.client.clone(), tokens)?;

    let printer = Arc::new(EventPrinter::new(config.output.format, config.output.colored));
    let _subscriptions: Vec<_> = config
        .topics
        .iter()
        .map(|topic| {
            let printer = Arc::clone(&printer);
            client.subscribe(*topic, move |event| printer.print(event))
        })
        .collect();
    info!(
        "Following {}",
        config
            .topics
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut lifecycle = client.lifecycle_events();
    let lifecycle_task = {
        let printer = Arc::clone(&printer);
        tokio::spawn(async move {
            loop {
                match lifecycle.recv().await {
                    Ok(ClientEvent::StateChanged { to, .. }) => {
                        info!("{}", printer.render_state(to));
                    }
                    Ok(ClientEvent::ReconnectScheduled { .. }) => {}
                    Ok(ClientEvent::MalformedFrame { reason }) => {
                        debug!("Malformed frame dropped: {}", reason);
                    }
                    Ok(ClientEvent::ListenerPanicked { event_type, count }) => {
                        warn!("{} listener(s) panicked handling {}", count, event_type);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Lifecycle log lagged, skipped {} notifications", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    let health_task = (!config.health.report_interval.is_zero()).then(|| {
        let client = client.clone();
        let period = config.health.report_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let health = client.health();
                if health.is_healthy {
                    info!("Health: {}", health.to_json());
                } else {
                    warn!("Health: {}", health.to_json());
                }
            }
        })
    });

    client.connect();
    info!("Client started. Press Ctrl+C to shutdown...");

    let mut states = client.state_changes();
    let gave_up = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Shutdown requested");
            false
        }
        _ = states.wait_for(|s| *s == ConnectionState::Error) => {
            error!("Giving up: reconnect limit reached");
            true
        }
    };

    if let Some(task) = health_task {
        task.abort();
    }
    client.close().await;
    lifecycle_task.abort();

    if gave_up {
        anyhow::bail!("could not connect to {}", config.client.url);
    }
    info!("Client stopped successfully");
    Ok(())
}
