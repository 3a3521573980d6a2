//! Discover, connect and read from a peripheral through the local gateway.
//!
//! Demonstrates:
//! - Building a session with a channel sink
//! - Issuing discovery before the transport is open
//! - Connecting to the first peripheral reported
//! - Subscribing to characteristic changes
//!
//! Usage:
//!   cargo run --example discover
//!   cargo run --example discover -- --debug
//!   cargo run --example discover -- --url ws://127.0.0.1:20110/scratch/ble

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use peripheral_session::{
    ChangeHandler, ChannelSink, DEFAULT_GATEWAY_URL, DeviceOptions, HostEvent, Session,
    decode_message,
};
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

/// micro:bit service advertised by the Scratch firmware.
const SERVICE: u16 = 0xf005;

/// Characteristic carrying sensor updates.
const RX_CHARACTERISTIC: &str = "5261da01-fa7e-42ab-850b-7c80220097cc";

/// How long to wait for a peripheral to show up.
const DISCOVERY_WINDOW: Duration = Duration::from_secs(15);

// ============================================================================
// Arguments
// ============================================================================

#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    url: String,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let url = args
            .iter()
            .position(|a| a == "--url")
            .and_then(|i| args.get(i + 1))
            .cloned()
            .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());

        Self {
            debug: args.iter().any(|a| a == "--debug"),
            url,
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "peripheral_session=debug"
    } else {
        "peripheral_session=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    println!("=== Peripheral discovery ===\n");

    let (sink, mut events) = ChannelSink::new();
    let session = Session::builder()
        .extension_id("microbit")
        .device_options(DeviceOptions::services([SERVICE]))
        .sink(sink)
        .gateway_url(&args.url)
        .on_connect(|| println!("    ✓ Connected"))
        .build()?;

    println!("[1] Opening {}...", args.url);
    let discovery = session.request_device();
    session.open()?;
    session.wait_open().await.context("gateway not reachable")?;
    discovery.await.context("discovery rejected")?;
    println!("    ✓ Scanning\n");

    println!("[2] Waiting for a peripheral...");
    let peripheral_id = timeout(DISCOVERY_WINDOW, async {
        while let Some(event) = events.recv().await {
            match event {
                HostEvent::PeripheralListUpdated { peripherals, .. } => {
                    if let Some((id, payload)) = peripherals.iter().next() {
                        println!("    Found {id}: {payload}");
                        return Ok(id.clone());
                    }
                }
                HostEvent::PeripheralError { .. } => bail!("gateway reported an error"),
                HostEvent::PeripheralConnected { .. } => {}
            }
        }
        bail!("event channel closed")
    })
    .await
    .context("no peripheral found")??;

    println!("\n[3] Connecting to {peripheral_id}...");
    session.connect_device(peripheral_id).await?;

    println!("\n[4] Subscribing to changes...");
    let on_changed: ChangeHandler = Arc::new(|message: String| match decode_message(&message) {
        Ok(bytes) => println!("    Change: {bytes:02x?}"),
        Err(e) => println!("    Undecodable change: {e}"),
    });
    let value = session
        .read(SERVICE, RX_CHARACTERISTIC, true, Some(on_changed))
        .await?;
    println!("    Initial value: {value}");

    tokio::time::sleep(Duration::from_secs(5)).await;

    session.disconnect();
    println!("\n=== Done ===");
    Ok(())
}
