//! Type-safe identifiers.
//!
//! Newtype wrappers keep correlation ids, peripheral ids and extension ids
//! from being mixed up at compile time.
//!
//! | Type | Wire form | Assigned by |
//! |------|-----------|-------------|
//! | [`RequestId`] | number | this client, monotonically |
//! | [`PeripheralId`] | string | gateway |
//! | [`ExtensionId`] | string | host runtime |
//! | [`GattId`] | number or string | device profile |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// RequestId
// ============================================================================

/// Correlation id attached to an outgoing call and echoed in its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Wraps a raw id.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric id.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// PeripheralId
// ============================================================================

/// Opaque peripheral identifier reported by the gateway during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Creates a peripheral id.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeripheralId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ============================================================================
// ExtensionId
// ============================================================================

/// Identifier under which a session registers with the host runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtensionId(String);

impl ExtensionId {
    /// Creates an extension id.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the id is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExtensionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ExtensionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ============================================================================
// GattId
// ============================================================================

/// Service or characteristic identifier.
///
/// Gateways accept either a numeric short id (`0xf005`) or a full UUID
/// string. The value is sent exactly as given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GattId {
    /// 16- or 32-bit assigned number.
    Short(u32),
    /// Full UUID or gateway-specific name.
    Name(String),
}

/// Identifier of a GATT service.
pub type ServiceId = GattId;

/// Identifier of a GATT characteristic.
pub type CharacteristicId = GattId;

impl fmt::Display for GattId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Short(id) => write!(f, "{id:#06x}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<u16> for GattId {
    fn from(id: u16) -> Self {
        Self::Short(u32::from(id))
    }
}

impl From<u32> for GattId {
    fn from(id: u32) -> Self {
        Self::Short(id)
    }
}

impl From<&str> for GattId {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for GattId {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<Uuid> for GattId {
    fn from(uuid: Uuid) -> Self {
        Self::Name(uuid.hyphenated().to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
