//! Voice roster - Entry Point
//!
//! Starts the reconciler engine and prints every channel event as a JSON
//! line until Ctrl-C.

use std::env;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use voice_roster::{engine, ConnectConfig, EngineConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // e.g., RUST_LOG=debug or RUST_LOG=voice_roster=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("voice_roster=info")),
        )
        .init();

    // Usage: voice_roster [api_key] [port]
    let target = ConnectConfig::from_sources(env::args().skip(1), |key| env::var(key).ok())?;
    if target.api_key.is_empty() {
        info!("No API key given; authentication will be refused by the voice client");
    }
    info!("Watching voice client at {}:{}", target.host, target.port);

    let (handle, mut events) = engine::spawn(EngineConfig::default(), target);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(json) => println!("{}", json),
                    Err(e) => error!("Failed to encode event: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    handle.stop().await;
    Ok(())
}
