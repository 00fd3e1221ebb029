//! SDS probe
//!
//! Wires two managers over the in-process core and walks a message exchange
//! through every event the bridge surfaces: out-of-order delivery, missing
//! dependencies, acknowledgement and periodic sync.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use sds::{EventCallbacks, MemoryCore, MessageId, ReliabilityManager, SdsConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CHANNEL: &str = "probe";

fn logging_callbacks(name: &'static str) -> EventCallbacks {
    EventCallbacks::new()
        .on_message_ready(move |id, channel| tracing::info!(peer = name, %id, %channel, "message ready"))
        .on_message_sent(move |id, channel| tracing::info!(peer = name, %id, %channel, "message sent"))
        .on_missing_dependencies(move |id, deps, channel| {
            let deps: Vec<&str> = deps.iter().map(|d| d.message_id.as_str()).collect();
            tracing::info!(peer = name, %id, %channel, ?deps, "missing dependencies")
        })
        .on_periodic_sync(move || tracing::info!(peer = name, "periodic sync"))
        .retrieval_hint_provider(move |id| format!("{}:{}", name, id).into_bytes())
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sds=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = SdsConfig::from_env().context("invalid SDS configuration")?;
    tracing::info!(?config, "starting sds probe");

    let core = Arc::new(MemoryCore::with_options(config.memory_core_options()));
    let alice = ReliabilityManager::builder(core.clone())
        .config(&config)
        .build()
        .context("failed to create alice")?;
    let bob = ReliabilityManager::builder(core)
        .config(&config)
        .build()
        .context("failed to create bob")?;

    alice.register_callbacks(logging_callbacks("alice"))?;
    bob.register_callbacks(logging_callbacks("bob"))?;

    let first = MessageId::generate();
    let second = MessageId::generate();
    let m1 = alice.wrap_outgoing_message(b"first", &first, CHANNEL)?;
    let m2 = alice.wrap_outgoing_message(b"second", &second, CHANNEL)?;

    // Deliver out of order: the second message waits on the first.
    let early = bob.unwrap_received_message(&m2)?;
    tracing::info!(
        buffered = early.is_buffered(),
        missing = early.missing_deps().len(),
        "bob received second message first"
    );

    let late = bob.unwrap_received_message(&m1)?;
    tracing::info!(
        payload = %String::from_utf8_lossy(late.message.as_deref().unwrap_or_default()),
        "bob received first message"
    );

    // Bob's reply carries both ids in its causal history, acknowledging them.
    let reply = bob.wrap_outgoing_message(b"got both", &MessageId::generate(), CHANNEL)?;
    alice.unwrap_received_message(&reply)?;

    alice.start_periodic_tasks()?;
    thread::sleep(config.sync_interval.min(Duration::from_secs(1)) + Duration::from_millis(50));

    alice.cleanup()?;
    bob.cleanup()?;
    tracing::info!("sds probe finished");
    Ok(())
}
