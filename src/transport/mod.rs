//! WebSocket transport layer.
//!
//! This module handles communication between the session (Rust) and the
//! local hardware gateway via WebSocket.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Session (Rust) │                              │  Gateway        │
//! │                 │         WebSocket            │  process        │
//! │  Connector      │─────────────────────────────►│                 │
//! │  → Connection   │◄────────────────────────────►│  BLE radio      │
//! │                 │   127.0.0.1:20110            │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Connection::new` - Idle; calls are accepted and held
//! 2. `Connection::open` - Spawn event loop, handshake via `Connector`
//! 3. Open - Held calls flushed, replies correlated by id
//! 4. Closed - Terminal; pending calls failed, close handler fired once
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Correlation layer and event loop |
//! | `connector` | Endpoint validation and bounded handshake |

// ============================================================================
// Submodules
// ============================================================================

/// Correlation layer and event loop.
pub mod connection;

/// Gateway endpoint and handshake.
pub mod connector;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{
    CloseHandler, CloseReason, CompletionHook, Connection, LinkState, NotificationHandler,
    PendingReply,
};
pub use connector::{Connector, DEFAULT_GATEWAY_URL, DEFAULT_OPEN_TIMEOUT};
