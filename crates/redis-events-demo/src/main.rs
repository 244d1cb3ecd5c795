//! Usage demo for the Redis-backed event emitter.
//!
//! Subscribes to the `"msg"` event, emits an informational and an error
//! message through the broker, and prints what the listener receives.
//! Point it at a broker with `REDIS_EVENTS_HOST` / `REDIS_EVENTS_PORT` /
//! `REDIS_EVENTS_AUTH` (defaults to `localhost:6379`).

use std::time::Duration;

use redis_events::{EmitterConfig, EventEmitter};
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Demo entry point.
///
/// # Errors
///
/// Returns an error if the broker is unreachable or a command fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let mut config = EmitterConfig::default();
    config.apply_env_overrides();
    info!(
        host = config.host,
        port = config.port,
        "connecting to broker"
    );

    let emitter = EventEmitter::with_config(config);

    emitter
        .on("msg", |args: &[Value]| {
            let lvl = args.first().and_then(Value::as_str).unwrap_or("?");
            let msg = args.get(1).and_then(Value::as_str).unwrap_or("");
            println!("[{lvl}] {msg}");
        })
        .await?;

    emitter
        .emit("msg", &[json!("info"), json!("this is an informational message")])
        .await?;
    emitter
        .emit("msg", &[json!("error"), json!("this is an error message")])
        .await?;

    // Deliveries loop back through the broker; give them a moment to land.
    tokio::time::sleep(Duration::from_millis(200)).await;

    info!("demo finished");
    Ok(())
}
