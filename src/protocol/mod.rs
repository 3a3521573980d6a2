//! Gateway protocol message types.
//!
//! JSON-RPC 2.0 over WebSocket text frames.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Local → Gateway | Call with correlation id |
//! | `Response` | Gateway → Local | Result or error for a call |
//! | `InboundCall` | Gateway → Local | Notification or liveness check |
//! | `Reply` | Local → Gateway | Answer to an inbound call |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Outgoing methods and their params |
//! | `event` | Inbound methods and [`Notification`] |
//! | `request` | Envelopes and frame classification |

// ============================================================================
// Submodules
// ============================================================================

/// Outgoing methods.
pub mod command;

/// Inbound methods.
pub mod event;

/// JSON-RPC envelopes.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{Command, ConnectParams, DeviceOptions, Encoding, ReadParams, WriteParams};
pub use event::{Notification, PING_REPLY, Peripheral};
pub use request::{InboundCall, Incoming, Reply, Request, Response, RpcError};
