//! Gateway-initiated calls.
//!
//! Every inbound call is resolved once into a [`Notification`] variant so
//! dispatch can match exhaustively.
//!
//! | Method | Variant | Reply |
//! |--------|---------|-------|
//! | `didDiscoverPeripheral` | [`Notification::DidDiscoverPeripheral`] | none |
//! | `characteristicDidChange` | [`Notification::CharacteristicDidChange`] | none |
//! | `ping` | [`Notification::Ping`] | `42` |
//! | anything else | [`Notification::Unknown`] | none |

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::PeripheralId;

// ============================================================================
// Method Names
// ============================================================================

/// A peripheral was seen during discovery.
pub const DID_DISCOVER_PERIPHERAL: &str = "didDiscoverPeripheral";

/// A subscribed characteristic changed.
pub const CHARACTERISTIC_DID_CHANGE: &str = "characteristicDidChange";

/// Gateway liveness check.
pub const PING: &str = "ping";

/// Value returned to every `ping`.
pub const PING_REPLY: i64 = 42;

// ============================================================================
// Peripheral
// ============================================================================

/// A peripheral reported by discovery.
///
/// The payload is kept exactly as the gateway sent it, including the
/// `peripheralId` field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Peripheral {
    /// Peripheral id.
    pub id: PeripheralId,
    /// Full discovery payload (name, signal strength, ...).
    pub payload: Value,
}

impl Peripheral {
    /// Returns the advertised name, if any.
    #[inline]
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.payload.get("name").and_then(Value::as_str)
    }

    /// Returns the received signal strength, if reported.
    #[inline]
    #[must_use]
    pub fn rssi(&self) -> Option<i64> {
        self.payload.get("rssi").and_then(Value::as_i64)
    }
}

// ============================================================================
// Notification
// ============================================================================

/// Parsed gateway call.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Peripheral discovered (or re-discovered).
    DidDiscoverPeripheral(Peripheral),

    /// Characteristic value changed.
    CharacteristicDidChange {
        /// New value, encoded as the gateway reports it.
        message: String,
    },

    /// Liveness check.
    Ping,

    /// Unrecognized method.
    Unknown {
        /// Method name.
        method: String,
        /// Raw params.
        params: Value,
    },
}

impl Notification {
    /// Resolves a method name and its params.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when a known method is missing a
    /// required field.
    pub fn parse(method: &str, params: Value) -> Result<Self> {
        match method {
            DID_DISCOVER_PERIPHERAL => {
                let id = params
                    .get("peripheralId")
                    .and_then(Value::as_str)
                    .map(PeripheralId::new)
                    .ok_or_else(|| {
                        Error::protocol("didDiscoverPeripheral without a string peripheralId")
                    })?;
                Ok(Self::DidDiscoverPeripheral(Peripheral {
                    id,
                    payload: params,
                }))
            }

            CHARACTERISTIC_DID_CHANGE => {
                let message = params
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| Error::protocol("characteristicDidChange without a message"))?;
                Ok(Self::CharacteristicDidChange { message })
            }

            PING => Ok(Self::Ping),

            _ => Ok(Self::Unknown {
                method: method.to_string(),
                params,
            }),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_discovery() {
        let params = json!({"peripheralId": "p1", "name": "BBC micro:bit", "rssi": -60});
        let parsed = Notification::parse("didDiscoverPeripheral", params.clone()).expect("parse");

        match parsed {
            Notification::DidDiscoverPeripheral(peripheral) => {
                assert_eq!(peripheral.id, PeripheralId::new("p1"));
                assert_eq!(peripheral.name(), Some("BBC micro:bit"));
                assert_eq!(peripheral.rssi(), Some(-60));
                assert_eq!(peripheral.payload, params);
            }
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[test]
    fn test_parse_discovery_requires_id() {
        let err = Notification::parse("didDiscoverPeripheral", json!({"name": "x"})).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_parse_characteristic_change() {
        let parsed =
            Notification::parse("characteristicDidChange", json!({"message": "AAE="})).expect("parse");
        assert_eq!(
            parsed,
            Notification::CharacteristicDidChange {
                message: "AAE=".to_string()
            }
        );
    }

    #[test]
    fn test_parse_ping_ignores_params() {
        assert_eq!(Notification::parse("ping", Value::Null).expect("parse"), Notification::Ping);
    }

    #[test]
    fn test_parse_unknown() {
        let parsed = Notification::parse("didDisconnect", json!({"a": 1})).expect("parse");
        match parsed {
            Notification::Unknown { method, params } => {
                assert_eq!(method, "didDisconnect");
                assert_eq!(params["a"], 1);
            }
            other => panic!("expected Unknown, got {other:?}"),
        }
    }
}
