//! Peripheral Session - device-session client for a local hardware gateway.
//!
//! This library lets a host application talk to nearby hardware (for
//! example BLE microcontroller boards) through a locally running gateway
//! process that speaks JSON-RPC 2.0 over WebSocket.
//!
//! # Architecture
//!
//! The client follows a layered model:
//!
//! - **Connector**: validates the gateway endpoint, bounds the handshake
//! - **Connection**: correlates replies to calls by id, routes notifications
//! - **Session**: discovery, connect, characteristic I/O, host events
//!
//! Key design principles:
//!
//! - Each [`Session`] owns one connection and one event loop
//! - Calls are issued eagerly; call order is wire order
//! - The host is reached only through an injected [`RuntimeSink`]
//! - Event-driven architecture (no polling)
//!
//! # Quick Start
//!
//! ```no_run
//! use peripheral_session::{ChannelSink, DeviceOptions, HostEvent, Result, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (sink, mut events) = ChannelSink::new();
//!
//!     let session = Session::builder()
//!         .extension_id("microbit")
//!         .device_options(DeviceOptions::services([0xf005_u16]))
//!         .sink(sink)
//!         .build()?;
//!
//!     // Issued now, sent once the gateway accepts the connection
//!     let discovery = session.request_device();
//!     session.open()?;
//!     discovery.await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let HostEvent::PeripheralListUpdated { peripherals, .. } = event {
//!             if let Some((id, _)) = peripherals.iter().next() {
//!                 session.connect_device(id.clone()).await?;
//!                 break;
//!             }
//!         }
//!     }
//!
//!     let value = session.read(0xf005_u16, 0x2a00_u16, false, None).await?;
//!     println!("Read: {value}");
//!
//!     session.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`host`] | Host runtime interface: [`RuntimeSink`], [`HostEvent`] |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | JSON-RPC message types |
//! | [`session`] | [`Session`] and its configuration |
//! | [`transport`] | WebSocket transport layer |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Host runtime interface.
pub mod host;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// JSON-RPC protocol message types.
pub mod protocol;

/// Device session.
pub mod session;

/// WebSocket transport layer.
///
/// Connector and correlation layer underneath [`Session`].
pub mod transport;

#[cfg(test)]
mod test_support;

// ============================================================================
// Re-exports
// ============================================================================

// Session types
pub use session::{
    ChangeHandler, ConnectCallback, PeripheralTable, Session, SessionBuilder, SessionState,
    decode_message,
};

// Host types
pub use host::{ChannelSink, HostEvent, PeripheralExtension, RuntimeSink};

// Protocol types
pub use protocol::{DeviceOptions, Encoding, Notification, Peripheral};

// Transport types
pub use transport::{
    CloseReason, CompletionHook, Connection, Connector, DEFAULT_GATEWAY_URL, DEFAULT_OPEN_TIMEOUT,
    LinkState, PendingReply,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{CharacteristicId, ExtensionId, GattId, PeripheralId, RequestId, ServiceId};
