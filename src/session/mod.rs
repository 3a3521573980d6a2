//! Device session.
//!
//! A [`Session`] drives one peripheral through the gateway: it discovers
//! peripherals, connects to one, reads and writes characteristics and
//! forwards change notifications. Lifecycle changes are reported to the
//! host through its [`RuntimeSink`](crate::RuntimeSink).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Validated configuration |
//! | `core` | Handle, shared state, lifecycle |
//! | `discovery` | `request_device` and `connect_device` |
//! | `characteristic` | `read`, `write` and change callbacks |
//! | `dispatch` | Gateway-initiated calls and close handling |
//! | `peripheral` | Discovered peripheral table |
//! | `state` | [`SessionState`] |

// ============================================================================
// Submodules
// ============================================================================

mod builder;
mod characteristic;
mod core;
mod discovery;
mod dispatch;
mod peripheral;
mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::SessionBuilder;
pub use characteristic::{ChangeHandler, decode_message};
pub use core::{ConnectCallback, Session};
pub use peripheral::PeripheralTable;
pub use state::SessionState;
