//! Characteristic reads, writes and change subscriptions.

use std::future::Future;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::identifiers::{CharacteristicId, ServiceId};
use crate::protocol::{Command, Encoding, ReadParams, WriteParams};

use super::core::Session;

/// Callback for `characteristicDidChange`; receives the message as sent by
/// the gateway.
pub type ChangeHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Decodes a base64 characteristic message.
///
/// # Errors
///
/// Returns [`Error::Base64`](crate::Error::Base64) if `message` is not valid
/// base64.
pub fn decode_message(message: &str) -> Result<Vec<u8>> {
    Ok(BASE64.decode(message)?)
}

impl Session {
    /// Reads a characteristic.
    ///
    /// `on_changed` replaces the session's change callback even when
    /// `subscribe` is `false`; there is one slot per session. With
    /// `subscribe` set, `startNotifications: true` is sent.
    ///
    /// Resolves to the gateway's result. A rejection also emits
    /// [`HostEvent::PeripheralError`](crate::HostEvent::PeripheralError),
    /// even if the returned future is dropped first.
    pub fn read(
        &self,
        service_id: impl Into<ServiceId>,
        characteristic_id: impl Into<CharacteristicId>,
        subscribe: bool,
        on_changed: Option<ChangeHandler>,
    ) -> impl Future<Output = Result<Value>> + Send + 'static {
        self.inner.data.lock().on_changed = on_changed;

        let params = ReadParams {
            service_id: service_id.into(),
            characteristic_id: characteristic_id.into(),
            start_notifications: subscribe.then_some(true),
        };
        debug!(
            session = %self.inner.uuid,
            service = %params.service_id,
            characteristic = %params.characteristic_id,
            subscribe,
            "Reading characteristic"
        );

        self.send(Command::Read(params))
    }

    /// Writes a message to a characteristic.
    ///
    /// `encoding` is omitted from the call when `None`.
    pub fn write(
        &self,
        service_id: impl Into<ServiceId>,
        characteristic_id: impl Into<CharacteristicId>,
        message: impl Into<String>,
        encoding: Option<Encoding>,
    ) -> impl Future<Output = Result<Value>> + Send + 'static {
        let params = WriteParams {
            service_id: service_id.into(),
            characteristic_id: characteristic_id.into(),
            message: message.into(),
            encoding,
        };
        debug!(
            session = %self.inner.uuid,
            service = %params.service_id,
            characteristic = %params.characteristic_id,
            ?encoding,
            "Writing characteristic"
        );

        self.send(Command::Write(params))
    }

    /// Writes raw bytes, base64 encoded.
    pub fn write_bytes(
        &self,
        service_id: impl Into<ServiceId>,
        characteristic_id: impl Into<CharacteristicId>,
        bytes: &[u8],
    ) -> impl Future<Output = Result<Value>> + Send + 'static {
        self.write(
            service_id,
            characteristic_id,
            BASE64.encode(bytes),
            Some(Encoding::Base64),
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
