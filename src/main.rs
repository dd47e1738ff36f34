//! Headless demonstration wiring a SAS disable engine and the pending-change
//! coordinator to tracing-backed sinks.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use serde::Serialize;
use tokio::{sync::broadcast, time::sleep};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use egm_lockup::{
    config::AppConfig,
    disable::{
        ProtocolDisableEngine, SystemDisablePriority, TracingDisableSink, TracingMessageDisplay,
    },
    pending::{
        ChangeRequestQueue, ChangeType, FnChangeRequest, PendingChangeCoordinator,
        TracingExceptionReporter,
    },
    protocols::SasDisableState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();

    let sas = ProtocolDisableEngine::builder("sas")
        .registry(SasDisableState::registry())
        .disable_sink(Arc::new(TracingDisableSink))
        .message_display(Arc::new(TracingMessageDisplay))
        .event_capacity(config.event_capacity)
        .build()
        .context("building SAS disable engine")?;
    let coordinator = PendingChangeCoordinator::new(
        config.pending_change_settings(),
        Arc::new(TracingExceptionReporter),
    )
    .context("building pending change coordinator")?;
    let queue = ChangeRequestQueue::new(coordinator.clone(), config.change_request_timeout);

    tokio::spawn(relay_events("disable", sas.subscribe()));
    tokio::spawn(relay_events("pending_change", coordinator.subscribe()));

    // Host link drops: warn first, then lock up once it is clearly gone.
    sas.disable_reason(
        SystemDisablePriority::Normal,
        SasDisableState::Host0CommunicationsOffline,
        false,
    );
    sas.disable_reason(
        SystemDisablePriority::Immediate,
        SasDisableState::Host0CommunicationsOffline,
        true,
    );
    sas.enable(&[SasDisableState::Host0CommunicationsOffline]);

    // A denomination change the host acknowledges and the protocol commits.
    queue.add_request(Box::new(FnChangeRequest::new(
        ChangeType::Denominations,
        || info!("denomination change committed"),
        || info!("denomination change rolled back"),
    )));
    coordinator.acknowledge_pending_change();
    coordinator.ready_for_pending_change();

    // A meter change the host never answers.
    queue.add_request(Box::new(FnChangeRequest::new(
        ChangeType::Meters,
        || info!("meter change committed"),
        || info!("meter change rolled back"),
    )));

    tokio::select! {
        _ = shutdown_signal() => info!("shutdown requested"),
        _ = sleep(config.change_request_timeout + Duration::from_secs(1)) => {
            info!(pending = queue.len(), "demonstration finished");
        }
    }

    coordinator.shutdown();
    Ok(())
}

/// Log every event from `rx` as JSON until the channel closes.
async fn relay_events<T>(stream: &'static str, mut rx: broadcast::Receiver<T>)
where
    T: Clone + Serialize,
{
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => info!(stream, %json, "event"),
                Err(err) => warn!(stream, error = %err, "failed to serialise event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(stream, skipped, "event relay lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
