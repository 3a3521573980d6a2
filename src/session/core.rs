//! Session handle and shared state.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::host::{HostEvent, PeripheralExtension, RuntimeSink};
use crate::identifiers::{ExtensionId, PeripheralId};
use crate::protocol::{Command, DeviceOptions, Peripheral};
use crate::transport::{CompletionHook, Connection, Connector, LinkState, PendingReply};

use super::builder::SessionBuilder;
use super::characteristic::ChangeHandler;
use super::peripheral::PeripheralTable;
use super::state::{Phase, SessionState};

// ============================================================================
// Types
// ============================================================================

/// Callback run after each successful connect.
pub type ConnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Validated builder output.
pub(super) struct SessionConfig {
    pub(super) extension_id: ExtensionId,
    pub(super) device_options: DeviceOptions,
    pub(super) connector: Connector,
    pub(super) sink: Arc<dyn RuntimeSink>,
    pub(super) on_connect: Option<ConnectCallback>,
}

/// Mutable session state, guarded by one lock.
pub(super) struct SessionData {
    /// Protocol progress.
    pub(super) phase: Phase,
    /// Set once `request_device` has been called.
    pub(super) discovery_requested: bool,
    /// Latest report per discovered peripheral.
    pub(super) peripherals: PeripheralTable,
    /// Peripheral of the last successful connect.
    pub(super) connected_peripheral: Option<PeripheralId>,
    /// Bumped by every `connect_device`; only the latest may reset the phase.
    pub(super) connect_generation: u64,
    /// Single change-callback slot; the latest `read` wins.
    pub(super) on_changed: Option<ChangeHandler>,
}

pub(super) struct SessionInner {
    /// Instance id for logs.
    pub(super) uuid: Uuid,
    pub(super) extension_id: ExtensionId,
    pub(super) device_options: DeviceOptions,
    pub(super) connection: Connection,
    pub(super) sink: Arc<dyn RuntimeSink>,
    pub(super) on_connect: Option<ConnectCallback>,
    pub(super) data: Mutex<SessionData>,
}

// ============================================================================
// Session
// ============================================================================

/// Session with one hardware peripheral through the local gateway.
///
/// Cheap to clone; all clones drive the same transport. Operations issue
/// their call when invoked and return a future for the reply, so the order
/// of invocation is the order on the wire.
///
/// # Example
///
/// ```ignore
/// let session = Session::builder()
///     .extension_id("microbit")
///     .device_options(DeviceOptions::services([0xf005_u16]))
///     .sink(sink)
///     .build()?;
///
/// let discovery = session.request_device();
/// session.open()?;
/// discovery.await?;
/// ```
#[derive(Clone)]
pub struct Session {
    pub(super) inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("uuid", &self.inner.uuid)
            .field("extension_id", &self.inner.extension_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a builder for configuring a session.
    #[inline]
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Wires the connection handlers and registers with the sink.
    pub(super) fn from_config(config: SessionConfig) -> Self {
        let SessionConfig {
            extension_id,
            device_options,
            connector,
            sink,
            on_connect,
        } = config;

        let inner = Arc::new(SessionInner {
            uuid: Uuid::new_v4(),
            extension_id,
            device_options,
            connection: Connection::new(connector),
            sink,
            on_connect,
            data: Mutex::new(SessionData {
                phase: Phase::Ready,
                discovery_requested: false,
                peripherals: PeripheralTable::new(),
                connected_peripheral: None,
                connect_generation: 0,
                on_changed: None,
            }),
        });

        // Handlers hold weak references; the connection lives inside `inner`
        let weak = Arc::downgrade(&inner);
        inner
            .connection
            .set_notification_handler(Box::new(move |method: &str, params: Value| {
                let inner = weak.upgrade()?;
                Session { inner }.handle_call(method, params)
            }));

        let weak = Arc::downgrade(&inner);
        inner.connection.set_close_handler(Box::new(move |failure| {
            if let Some(inner) = weak.upgrade() {
                Session { inner }.handle_close(failure);
            }
        }));

        debug!(
            session = %inner.uuid,
            extension = %inner.extension_id,
            "Session created"
        );

        inner.sink.register_peripheral_extension(
            inner.extension_id.clone(),
            Arc::new(RegisteredSession(Arc::downgrade(&inner))),
        );

        Self { inner }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the instance id used in logs.
    #[inline]
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    /// Returns the extension id reported with host events.
    #[inline]
    #[must_use]
    pub fn extension_id(&self) -> &ExtensionId {
        &self.inner.extension_id
    }

    /// Returns the discovery filters.
    #[inline]
    #[must_use]
    pub fn device_options(&self) -> &DeviceOptions {
        &self.inner.device_options
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        let phase = self.inner.data.lock().phase;
        SessionState::derive(self.inner.connection.link_state(), phase)
    }

    /// Returns `true` in [`SessionState::Connected`].
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Returns a snapshot of every peripheral discovered so far.
    #[must_use]
    pub fn peripherals(&self) -> PeripheralTable {
        self.inner.data.lock().peripherals.clone()
    }

    /// Returns the latest discovery report for `id`.
    #[must_use]
    pub fn peripheral(&self, id: &PeripheralId) -> Option<Peripheral> {
        self.inner.data.lock().peripherals.peripheral(id)
    }

    /// Returns the peripheral of the last successful connect.
    #[must_use]
    pub fn connected_peripheral(&self) -> Option<PeripheralId> {
        self.inner.data.lock().connected_peripheral.clone()
    }

    /// Returns the number of calls awaiting a reply.
    #[inline]
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.connection.pending_count()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Opens the transport.
    ///
    /// Returns once the handshake has started. A failure to open is
    /// reported as [`HostEvent::PeripheralError`] and through
    /// [`wait_open`](Self::wait_open).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if already opened or outside a tokio
    /// runtime.
    pub fn open(&self) -> Result<()> {
        self.inner.connection.open()?;
        info!(
            session = %self.inner.uuid,
            extension = %self.inner.extension_id,
            "Session opening"
        );
        Ok(())
    }

    /// Waits for the transport to open.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if the open deadline expired
    /// - [`Error::ConnectionClosed`] if the transport closed first
    pub async fn wait_open(&self) -> Result<()> {
        self.inner.connection.wait_open().await
    }

    /// Closes the transport. Terminal.
    ///
    /// Outstanding calls fail with [`Error::ConnectionClosed`]. No error
    /// event is emitted.
    pub fn disconnect(&self) {
        info!(
            session = %self.inner.uuid,
            extension = %self.inner.extension_id,
            "Session disconnecting"
        );
        self.inner.connection.shutdown();
    }

    // ========================================================================
    // Internal
    // ========================================================================

    /// Issues a typed call.
    pub(super) fn send(&self, command: Command) -> PendingReply {
        self.send_with(command, |_, result| result)
    }

    /// Issues a typed call and applies `on_reply` to its outcome.
    ///
    /// `on_reply` runs when the outcome is known, even if the returned reply
    /// is dropped, and not at all once the session itself is gone.
    pub(super) fn send_with<F>(&self, command: Command, on_reply: F) -> PendingReply
    where
        F: FnOnce(&Session, Result<Value>) -> Result<Value> + Send + 'static,
    {
        let issued_after_close = matches!(self.inner.connection.link_state(), LinkState::Closed(_));
        let weak = Arc::downgrade(&self.inner);
        let hook: CompletionHook = Box::new(move |result: Result<Value>| match weak.upgrade() {
            Some(inner) => {
                let session = Session { inner };
                let result = on_reply(&session, result);
                session.report(&result, issued_after_close);
                result
            }
            None => result,
        });

        match command.params() {
            Ok(params) => self
                .inner
                .connection
                .call_with_hook(command.method(), params, hook),
            Err(e) => PendingReply::resolved(hook(Err(e))),
        }
    }

    /// Reports a failed call to the host.
    ///
    /// A transport failure that interrupts a call is reported once by the
    /// close handler; a call issued on a link that had already closed is
    /// reported here.
    fn report(&self, result: &Result<Value>, issued_after_close: bool) {
        if let Err(e) = result
            && (issued_after_close || !e.is_connection_error())
        {
            debug!(session = %self.inner.uuid, error = %e, "Call failed");
            self.emit_error();
        }
    }

    /// Emits [`HostEvent::PeripheralError`].
    pub(super) fn emit_error(&self) {
        self.inner.sink.emit(HostEvent::PeripheralError {
            extension_id: self.inner.extension_id.clone(),
        });
    }
}

// ============================================================================
// PeripheralExtension
// ============================================================================

#[async_trait]
impl PeripheralExtension for Session {
    async fn scan(&self) -> Result<()> {
        self.request_device().await
    }

    async fn connect(&self, peripheral_id: PeripheralId) -> Result<()> {
        self.connect_device(peripheral_id).await
    }

    fn disconnect(&self) {
        Session::disconnect(self);
    }

    fn is_connected(&self) -> bool {
        Session::is_connected(self)
    }
}

/// Handle stored in the sink's registry.
///
/// Weak so the registry does not keep the session alive.
struct RegisteredSession(Weak<SessionInner>);

impl RegisteredSession {
    fn session(&self) -> Result<Session> {
        self.0
            .upgrade()
            .map(|inner| Session { inner })
            .ok_or_else(|| Error::invalid_state("session was dropped"))
    }
}

#[async_trait]
impl PeripheralExtension for RegisteredSession {
    async fn scan(&self) -> Result<()> {
        let session = self.session()?;
        session.request_device().await
    }

    async fn connect(&self, peripheral_id: PeripheralId) -> Result<()> {
        let session = self.session()?;
        session.connect_device(peripheral_id).await
    }

    fn disconnect(&self) {
        if let Ok(session) = self.session() {
            session.disconnect();
        }
    }

    fn is_connected(&self) -> bool {
        self.session().is_ok_and(|session| session.is_connected())
    }
}

// ============================================================================
// Tests
// ============================================================================
