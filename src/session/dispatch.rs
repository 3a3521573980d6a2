//! Routing of gateway-initiated calls.

use serde_json::{Value, json};
use tracing::{debug, info, trace, warn};

use crate::error::Error;
use crate::host::HostEvent;
use crate::protocol::{Notification, PING_REPLY, Peripheral};

use super::core::Session;

impl Session {
    /// Handles one inbound call. A returned value is sent back as the reply.
    pub(super) fn handle_call(&self, method: &str, params: Value) -> Option<Value> {
        let notification = match Notification::parse(method, params) {
            Ok(notification) => notification,
            Err(e) => {
                warn!(session = %self.inner.uuid, method, error = %e, "Ignoring malformed gateway call");
                return None;
            }
        };

        match notification {
            Notification::DidDiscoverPeripheral(peripheral) => {
                self.on_peripheral_discovered(peripheral);
                None
            }

            Notification::CharacteristicDidChange { message } => {
                let handler = self.inner.data.lock().on_changed.clone();
                match handler {
                    Some(handler) => handler(message),
                    None => trace!(session = %self.inner.uuid, "Change without subscriber"),
                }
                None
            }

            Notification::Ping => Some(json!(PING_REPLY)),

            Notification::Unknown { method, .. } => {
                debug!(session = %self.inner.uuid, %method, "Ignoring unknown gateway call");
                None
            }
        }
    }

    /// Folds a discovery report into the table and publishes the table.
    fn on_peripheral_discovered(&self, peripheral: Peripheral) {
        let id = peripheral.id.clone();
        let (is_new, peripherals) = {
            let mut data = self.inner.data.lock();
            let is_new = data.peripherals.upsert(peripheral);
            (is_new, data.peripherals.clone())
        };

        debug!(
            session = %self.inner.uuid,
            peripheral = %id,
            is_new,
            total = peripherals.len(),
            "Peripheral discovered"
        );

        self.inner.sink.emit(HostEvent::PeripheralListUpdated {
            extension_id: self.inner.extension_id.clone(),
            peripherals,
        });
    }

    /// Runs once when the transport closes, after pending calls failed.
    pub(super) fn handle_close(&self, failure: Option<Error>) {
        self.inner.data.lock().on_changed = None;

        match failure {
            None => info!(session = %self.inner.uuid, "Session closed"),
            Some(e) => {
                warn!(session = %self.inner.uuid, error = %e, "Session transport failed");
                self.emit_error();
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
