//! Outgoing gateway methods.
//!
//! | Method | Params |
//! |--------|--------|
//! | `discover` | [`DeviceOptions`] |
//! | `connect` | [`ConnectParams`] |
//! | `read` | [`ReadParams`] |
//! | `write` | [`WriteParams`] |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};
use crate::identifiers::{CharacteristicId, GattId, PeripheralId, ServiceId};

// ============================================================================
// Method Names
// ============================================================================

/// Start scanning with the session's device filters.
pub const DISCOVER: &str = "discover";

/// Connect to a discovered peripheral.
pub const CONNECT: &str = "connect";

/// Read a characteristic, optionally subscribing to changes.
pub const READ: &str = "read";

/// Write a characteristic.
pub const WRITE: &str = "write";

// ============================================================================
// DeviceOptions
// ============================================================================

/// Discovery filter configuration, echoed verbatim into every `discover`
/// call. Always a JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceOptions(Map<String, Value>);

impl DeviceOptions {
    /// Wraps an arbitrary filter object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `value` is not a JSON object.
    pub fn new(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::invalid_argument(format!(
                "device options must be a JSON object, got {other}"
            ))),
        }
    }

    /// Builds a single filter matching peripherals that advertise all of
    /// the given services.
    #[must_use]
    pub fn services(services: impl IntoIterator<Item = impl Into<GattId>>) -> Self {
        let services: Vec<GattId> = services.into_iter().map(Into::into).collect();
        let mut map = Map::new();
        map.insert("filters".to_string(), json!([{ "services": services }]));
        Self(map)
    }

    /// Returns the options as a JSON value.
    #[inline]
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encoding of a characteristic message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Base64-encoded bytes.
    Base64,
    /// Plain UTF-8 text.
    Utf8,
}

// ============================================================================
// Params
// ============================================================================

/// Parameters of `connect`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Peripheral to connect to.
    pub peripheral_id: PeripheralId,
}

/// Parameters of `read`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadParams {
    /// Service id.
    pub service_id: ServiceId,
    /// Characteristic id.
    pub characteristic_id: CharacteristicId,
    /// Present and `true` only when subscribing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_notifications: Option<bool>,
}

/// Parameters of `write`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteParams {
    /// Service id.
    pub service_id: ServiceId,
    /// Characteristic id.
    pub characteristic_id: CharacteristicId,
    /// Payload, interpreted per `encoding`.
    pub message: String,
    /// Omitted when the caller did not specify one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<Encoding>,
}

// ============================================================================
// Command
// ============================================================================

/// A typed outgoing call.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `discover`
    Discover(DeviceOptions),
    /// `connect`
    Connect(ConnectParams),
    /// `read`
    Read(ReadParams),
    /// `write`
    Write(WriteParams),
}

impl Command {
    /// Returns the wire method name.
    #[inline]
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::Discover(_) => DISCOVER,
            Self::Connect(_) => CONNECT,
            Self::Read(_) => READ,
            Self::Write(_) => WRITE,
        }
    }

    /// Serializes the parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn params(&self) -> Result<Value> {
        let value = match self {
            Self::Discover(options) => options.to_value(),
            Self::Connect(params) => serde_json::to_value(params)?,
            Self::Read(params) => serde_json::to_value(params)?,
            Self::Write(params) => serde_json::to_value(params)?,
        };
        Ok(value)
    }
}

// ============================================================================
// Tests
// ============================================================================
