//! Discovery and connect.

use std::future::Future;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::host::HostEvent;
use crate::identifiers::PeripheralId;
use crate::protocol::{Command, ConnectParams};

use super::core::Session;
use super::state::Phase;

impl Session {
    /// Asks the gateway to scan with the session's device options.
    ///
    /// The `discover` call is issued immediately, before the transport is
    /// open if need be; it is sent exactly once, when the transport opens.
    /// Discovered peripherals arrive as
    /// [`HostEvent::PeripheralListUpdated`].
    pub fn request_device(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        {
            let mut data = self.inner.data.lock();
            data.discovery_requested = true;
            if data.phase == Phase::Ready {
                data.phase = Phase::Discovering;
            }
        }

        info!(
            session = %self.inner.uuid,
            extension = %self.inner.extension_id,
            "Requesting device discovery"
        );

        let reply = self.send(Command::Discover(self.inner.device_options.clone()));
        async move { reply.await.map(|_| ()) }
    }

    /// Connects to a discovered peripheral.
    ///
    /// On success the on-connect callback runs and
    /// [`HostEvent::PeripheralConnected`] is emitted, once each. On
    /// rejection [`HostEvent::PeripheralError`] is emitted and the session
    /// returns to discovering (or ready, if discovery was never requested),
    /// so connecting again or rediscovering are both possible. Only the
    /// latest connect still in flight moves the session back; a stale
    /// rejection leaves it as it is.
    ///
    /// The session reacts when the reply arrives, whether or not the
    /// returned future is still awaited.
    pub fn connect_device(
        &self,
        peripheral_id: impl Into<PeripheralId>,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let peripheral_id = peripheral_id.into();

        let generation = {
            let mut data = self.inner.data.lock();
            if !data.peripherals.contains(&peripheral_id) {
                debug!(
                    session = %self.inner.uuid,
                    peripheral = %peripheral_id,
                    "Connecting to a peripheral not reported by discovery"
                );
            }
            data.phase = Phase::Connecting;
            data.connect_generation += 1;
            data.connect_generation
        };

        info!(
            session = %self.inner.uuid,
            peripheral = %peripheral_id,
            "Connecting to peripheral"
        );

        let command = Command::Connect(ConnectParams {
            peripheral_id: peripheral_id.clone(),
        });
        let reply = self.send_with(command, move |session, result| {
            match &result {
                Ok(_) => session.on_connected(peripheral_id),
                Err(e) => session.on_connect_failed(&peripheral_id, generation, e),
            }
            result
        });

        async move { reply.await.map(|_| ()) }
    }

    fn on_connected(&self, peripheral_id: PeripheralId) {
        {
            let mut data = self.inner.data.lock();
            data.phase = Phase::Connected;
            data.connected_peripheral = Some(peripheral_id.clone());
        }

        info!(
            session = %self.inner.uuid,
            peripheral = %peripheral_id,
            "Peripheral connected"
        );

        self.inner.sink.emit(HostEvent::PeripheralConnected {
            extension_id: self.inner.extension_id.clone(),
        });

        if let Some(callback) = &self.inner.on_connect {
            callback();
        }
    }

    fn on_connect_failed(&self, peripheral_id: &PeripheralId, generation: u64, err: &Error) {
        let reset = {
            let mut data = self.inner.data.lock();
            let reset = data.phase == Phase::Connecting && data.connect_generation == generation;
            if reset {
                data.phase = if data.discovery_requested {
                    Phase::Discovering
                } else {
                    Phase::Ready
                };
            }
            reset
        };

        warn!(
            session = %self.inner.uuid,
            peripheral = %peripheral_id,
            error = %err,
            reset,
            "Connect failed"
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
