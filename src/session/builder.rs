//! Session configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::host::RuntimeSink;
use crate::identifiers::ExtensionId;
use crate::protocol::DeviceOptions;
use crate::transport::{Connector, DEFAULT_GATEWAY_URL, DEFAULT_OPEN_TIMEOUT};

use super::core::{ConnectCallback, Session, SessionConfig};

// ============================================================================
// SessionBuilder
// ============================================================================

/// Builder for configuring a [`Session`].
///
/// # Example
///
/// ```ignore
/// use peripheral_session::{ChannelSink, DeviceOptions, Session};
///
/// let (sink, events) = ChannelSink::new();
/// let session = Session::builder()
///     .extension_id("microbit")
///     .device_options(DeviceOptions::services([0xf005_u16]))
///     .sink(sink)
///     .on_connect(|| println!("connected"))
///     .build()?;
/// ```
#[derive(Clone)]
pub struct SessionBuilder {
    /// Host-facing extension id.
    extension_id: Option<ExtensionId>,
    /// Discovery filters.
    device_options: Option<DeviceOptions>,
    /// Host capability.
    sink: Option<Arc<dyn RuntimeSink>>,
    /// Gateway endpoint.
    gateway_url: String,
    /// Open deadline; `None` waits indefinitely.
    open_timeout: Option<Duration>,
    /// Runs after each successful connect.
    on_connect: Option<ConnectCallback>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("extension_id", &self.extension_id)
            .field("device_options", &self.device_options)
            .field("gateway_url", &self.gateway_url)
            .field("open_timeout", &self.open_timeout)
            .field("has_sink", &self.sink.is_some())
            .field("has_on_connect", &self.on_connect.is_some())
            .finish()
    }
}

impl SessionBuilder {
    /// Creates a builder with the default gateway endpoint and open timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            extension_id: None,
            device_options: None,
            sink: None,
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            open_timeout: Some(DEFAULT_OPEN_TIMEOUT),
            on_connect: None,
        }
    }

    /// Sets the extension id reported with every host event. Required.
    #[must_use]
    pub fn extension_id(mut self, extension_id: impl Into<ExtensionId>) -> Self {
        self.extension_id = Some(extension_id.into());
        self
    }

    /// Sets the discovery filters sent with `discover`. Required.
    #[must_use]
    pub fn device_options(mut self, device_options: DeviceOptions) -> Self {
        self.device_options = Some(device_options);
        self
    }

    /// Sets the host capability. Required.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn RuntimeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Overrides the gateway endpoint.
    #[must_use]
    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }

    /// Bounds how long [`Session::wait_open`] may take.
    #[must_use]
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = Some(timeout);
        self
    }

    /// Waits for the gateway indefinitely.
    #[must_use]
    pub fn no_open_timeout(mut self) -> Self {
        self.open_timeout = None;
        self
    }

    /// Sets a callback run after each successful connect.
    #[must_use]
    pub fn on_connect<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    /// Validates the configuration, creates the session and registers it
    /// with the sink.
    ///
    /// The transport is not opened; call [`Session::open`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required field is missing, the
    /// extension id is empty, or the gateway URL is invalid.
    pub fn build(self) -> Result<Session> {
        let extension_id = self
            .extension_id
            .ok_or_else(|| Error::config("extension_id is required"))?;
        if extension_id.is_empty() {
            return Err(Error::config("extension_id must not be empty"));
        }

        let device_options = self
            .device_options
            .ok_or_else(|| Error::config("device_options is required"))?;
        let sink = self.sink.ok_or_else(|| Error::config("sink is required"))?;

        let connector = Connector::new(&self.gateway_url)?.with_open_timeout(self.open_timeout);

        Ok(Session::from_config(SessionConfig {
            extension_id,
            device_options,
            connector,
            sink,
            on_connect: self.on_connect,
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================
