//! Discovered peripheral table.

use serde::Serialize;
use serde_json::Value;

use rustc_hash::FxHashMap;

use crate::identifiers::PeripheralId;
use crate::protocol::Peripheral;

/// Mapping from peripheral id to its most recent discovery payload.
///
/// Re-discovery of an id overwrites its payload; nothing is appended.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PeripheralTable(FxHashMap<PeripheralId, Value>);

impl PeripheralTable {
    /// Creates an empty table.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a discovery payload. Returns `true` if the id was new.
    pub fn upsert(&mut self, peripheral: Peripheral) -> bool {
        self.0.insert(peripheral.id, peripheral.payload).is_none()
    }

    /// Returns the latest payload for `id`.
    #[inline]
    #[must_use]
    pub fn get(&self, id: &PeripheralId) -> Option<&Value> {
        self.0.get(id)
    }

    /// Returns the latest report for `id` as a [`Peripheral`].
    #[must_use]
    pub fn peripheral(&self, id: &PeripheralId) -> Option<Peripheral> {
        self.0.get(id).map(|payload| Peripheral {
            id: id.clone(),
            payload: payload.clone(),
        })
    }

    /// Returns `true` if `id` has been discovered.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &PeripheralId) -> bool {
        self.0.contains_key(id)
    }

    /// Number of distinct peripherals.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing has been discovered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(id, payload)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&PeripheralId, &Value)> {
        self.0.iter()
    }
}
