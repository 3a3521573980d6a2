//! WebSocket connector for the hardware gateway.
//!
//! # Connection Flow
//!
//! 1. Gateway process listens on a fixed loopback port
//! 2. [`Connector::open`] performs the TCP connect and WebSocket handshake
//! 3. The handshake is bounded by the open deadline, if one is set
//! 4. The resulting stream is handed to [`Connection`](super::Connection)

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Well-known loopback endpoint of the BLE gateway.
pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:20110/scratch/ble";

/// Default deadline for the gateway to accept the connection.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Types
// ============================================================================

/// Client-side WebSocket stream.
pub type GatewayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// Connector
// ============================================================================

/// Opens the single WebSocket connection a session uses.
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use peripheral_session::transport::Connector;
///
/// let connector = Connector::new("ws://127.0.0.1:20110/scratch/ble")?
///     .with_open_timeout(Some(Duration::from_secs(5)));
/// let stream = connector.open().await?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connector {
    /// Gateway endpoint.
    url: Url,
    /// Open deadline; `None` waits indefinitely.
    open_timeout: Option<Duration>,
}

impl Connector {
    /// Creates a connector from a URL string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL does not parse or does not use
    /// the `ws` scheme.
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::config(format!("invalid gateway URL {url:?}: {e}")))?;
        Self::from_url(url)
    }

    /// Creates a connector from a parsed URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the scheme is not `ws` or there is no host.
    pub fn from_url(url: Url) -> Result<Self> {
        if url.scheme() != "ws" {
            return Err(Error::config(format!(
                "gateway URL must use the ws scheme, got {:?}",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::config(format!("gateway URL {url} has no host")));
        }

        Ok(Self {
            url,
            open_timeout: Some(DEFAULT_OPEN_TIMEOUT),
        })
    }

    /// Sets the open deadline.
    #[inline]
    #[must_use]
    pub fn with_open_timeout(mut self, open_timeout: Option<Duration>) -> Self {
        self.open_timeout = open_timeout;
        self
    }

    /// Returns the gateway URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the open deadline.
    #[inline]
    #[must_use]
    pub fn open_timeout(&self) -> Option<Duration> {
        self.open_timeout
    }

    /// Connects to the gateway and completes the WebSocket handshake.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if the deadline passes first
    /// - [`Error::Connection`] if the connection is refused or the
    ///   handshake fails
    pub async fn open(&self) -> Result<GatewayStream> {
        let handshake = tokio_tungstenite::connect_async(self.url.as_str());

        let outcome = match self.open_timeout {
            Some(limit) => timeout(limit, handshake)
                .await
                .map_err(|_| Error::connection_timeout(limit.as_millis() as u64))?,
            None => handshake.await,
        };

        let (stream, response) = outcome
            .map_err(|e| Error::connection(format!("WebSocket handshake with {} failed: {e}", self.url)))?;

        debug!(url = %self.url, status = %response.status(), "Gateway handshake completed");

        Ok(stream)
    }
}

// ============================================================================
// Tests
// ============================================================================
