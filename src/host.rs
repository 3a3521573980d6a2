//! Host runtime interface.
//!
//! A session never reaches a global runtime object. The host passes a
//! [`RuntimeSink`] in at construction; the session registers itself there
//! and reports lifecycle events through it.
//!
//! | Event | Payload |
//! |-------|---------|
//! | [`HostEvent::PeripheralListUpdated`] | current peripheral table |
//! | [`HostEvent::PeripheralConnected`] | none |
//! | [`HostEvent::PeripheralError`] | none |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::Result;
use crate::identifiers::{ExtensionId, PeripheralId};
use crate::session::PeripheralTable;

// ============================================================================
// HostEvent
// ============================================================================

/// Event delivered from a session to the host runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// Discovery reported a peripheral; carries the whole table.
    PeripheralListUpdated {
        /// Reporting extension.
        extension_id: ExtensionId,
        /// Snapshot of every peripheral seen so far.
        peripherals: PeripheralTable,
    },

    /// A connect call succeeded.
    PeripheralConnected {
        /// Reporting extension.
        extension_id: ExtensionId,
    },

    /// A call was rejected or the transport failed.
    PeripheralError {
        /// Reporting extension.
        extension_id: ExtensionId,
    },
}

impl HostEvent {
    /// Returns the extension that raised the event.
    #[inline]
    #[must_use]
    pub fn extension_id(&self) -> &ExtensionId {
        match self {
            Self::PeripheralListUpdated { extension_id, .. }
            | Self::PeripheralConnected { extension_id }
            | Self::PeripheralError { extension_id } => extension_id,
        }
    }
}

// ============================================================================
// PeripheralExtension
// ============================================================================

/// Actions the host routes back into a registered session (device chooser,
/// connect button).
#[async_trait]
pub trait PeripheralExtension: Send + Sync {
    /// Starts discovery.
    async fn scan(&self) -> Result<()>;

    /// Connects to a discovered peripheral.
    async fn connect(&self, peripheral_id: PeripheralId) -> Result<()>;

    /// Closes the session's transport.
    fn disconnect(&self);

    /// Returns `true` while a peripheral is connected.
    fn is_connected(&self) -> bool;
}

// ============================================================================
// RuntimeSink
// ============================================================================

/// Capability a session uses to talk to its host.
///
/// Called from the connection's event loop; implementations must not block.
pub trait RuntimeSink: Send + Sync {
    /// Registers a session under its extension id.
    fn register_peripheral_extension(
        &self,
        extension_id: ExtensionId,
        extension: Arc<dyn PeripheralExtension>,
    );

    /// Delivers an event.
    fn emit(&self, event: HostEvent);
}

// ============================================================================
// ChannelSink
// ============================================================================

/// [`RuntimeSink`] that forwards events into a tokio channel and keeps a
/// registry of extensions.
///
/// # Example
///
/// ```ignore
/// let (sink, mut events) = ChannelSink::new();
/// let session = Session::builder()
///     .extension_id("microbit")
///     .device_options(DeviceOptions::services([0xf005_u16]))
///     .sink(sink.clone())
///     .build()?;
///
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// ```
pub struct ChannelSink {
    /// Event channel.
    events_tx: mpsc::UnboundedSender<HostEvent>,
    /// Registered extensions.
    extensions: RwLock<FxHashMap<ExtensionId, Arc<dyn PeripheralExtension>>>,
}

impl fmt::Debug for ChannelSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSink")
            .field("extensions", &self.extensions.read().len())
            .finish_non_exhaustive()
    }
}

impl ChannelSink {
    /// Creates a sink and the receiving end of its event channel.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<HostEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let sink = Arc::new(Self {
            events_tx,
            extensions: RwLock::new(FxHashMap::default()),
        });
        (sink, events_rx)
    }

    /// Looks up a registered extension.
    #[must_use]
    pub fn extension(&self, extension_id: &ExtensionId) -> Option<Arc<dyn PeripheralExtension>> {
        self.extensions.read().get(extension_id).cloned()
    }

    /// Returns the ids of all registered extensions.
    #[must_use]
    pub fn extension_ids(&self) -> Vec<ExtensionId> {
        self.extensions.read().keys().cloned().collect()
    }
}

impl RuntimeSink for ChannelSink {
    fn register_peripheral_extension(
        &self,
        extension_id: ExtensionId,
        extension: Arc<dyn PeripheralExtension>,
    ) {
        debug!(%extension_id, "Peripheral extension registered");
        self.extensions.write().insert(extension_id, extension);
    }

    fn emit(&self, event: HostEvent) {
        trace!(?event, "Host event");
        // Receiver gone means the host stopped listening
        let _ = self.events_tx.send(event);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct StubExtension {
        disconnected: AtomicBool,
    }

    #[async_trait]
    impl PeripheralExtension for StubExtension {
        async fn scan(&self) -> Result<()> {
            Ok(())
        }

        async fn connect(&self, _peripheral_id: PeripheralId) -> Result<()> {
            Ok(())
        }

        fn disconnect(&self) {
            self.disconnected.store(true, Ordering::SeqCst);
        }

        fn is_connected(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_event_extension_id() {
        let event = HostEvent::PeripheralError {
            extension_id: ExtensionId::new("wedo2"),
        };
        assert_eq!(event.extension_id().as_str(), "wedo2");
    }

    #[test]
    fn test_emit_forwards_events() {
        let (sink, mut events) = ChannelSink::new();
        sink.emit(HostEvent::PeripheralConnected {
            extension_id: ExtensionId::new("microbit"),
        });

        let event = events.try_recv().expect("event forwarded");
        assert!(matches!(event, HostEvent::PeripheralConnected { .. }));
    }

    #[test]
    fn test_emit_after_receiver_dropped_is_silent() {
        let (sink, events) = ChannelSink::new();
        drop(events);
        sink.emit(HostEvent::PeripheralError {
            extension_id: ExtensionId::new("microbit"),
        });
    }

    #[tokio::test]
    async fn test_registry_routes_actions() {
        let (sink, _events) = ChannelSink::new();
        let stub = Arc::new(StubExtension::default());
        sink.register_peripheral_extension(ExtensionId::new("ev3"), stub.clone());

        assert_eq!(sink.extension_ids(), vec![ExtensionId::new("ev3")]);
        assert!(sink.extension(&ExtensionId::new("missing")).is_none());

        let extension = sink.extension(&ExtensionId::new("ev3")).expect("registered");
        extension.scan().await.expect("scan");
        extension.disconnect();
        assert!(stub.disconnected.load(Ordering::SeqCst));
    }
}
