//! JSON-RPC 2.0 envelopes.
//!
//! Outgoing [`Request`] and [`Reply`] frames, and the [`Incoming`]
//! classification applied to every frame received from the gateway.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// Constants
// ============================================================================

/// Protocol version tag carried by every frame.
pub const JSONRPC_VERSION: &str = "2.0";

// ============================================================================
// Request
// ============================================================================

/// A call from this client to the gateway.
///
/// # Format
///
/// ```json
/// {
///   "jsonrpc": "2.0",
///   "id": 1,
///   "method": "discover",
///   "params": { ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Always `"2.0"`.
    jsonrpc: &'static str,

    /// Correlation id echoed by the reply.
    pub id: RequestId,

    /// Method name.
    pub method: String,

    /// Method parameters.
    pub params: Value,
}

impl Request {
    /// Creates a request with the given id.
    #[inline]
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

// ============================================================================
// Reply
// ============================================================================

/// A reply from this client to a call the gateway made.
///
/// The id is echoed verbatim; calls that carried no id are answered with
/// `"id": null`.
///
/// # Format
///
/// ```json
/// { "jsonrpc": "2.0", "id": 5, "result": 42 }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    /// Always `"2.0"`.
    jsonrpc: &'static str,

    /// Id of the inbound call being answered.
    pub id: Option<Value>,

    /// Result value.
    pub result: Value,
}

impl Reply {
    /// Creates a success reply.
    #[inline]
    #[must_use]
    pub fn new(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }
}

// ============================================================================
// RpcError
// ============================================================================

/// JSON-RPC error object carried by a rejected reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i64,

    /// Human-readable message.
    #[serde(default)]
    pub message: String,

    /// Optional gateway-specific detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<RpcError> for Error {
    fn from(err: RpcError) -> Self {
        Error::rpc(err.code, err.message)
    }
}

// ============================================================================
// Response
// ============================================================================

/// A reply from the gateway to one of our calls.
#[derive(Debug, Clone)]
pub struct Response {
    /// Matches the request `id`.
    pub id: RequestId,

    /// Result value (`Null` when absent).
    pub result: Value,

    /// Error object, if the call was rejected.
    pub error: Option<RpcError>,
}

impl Response {
    /// Returns `true` if the gateway accepted the call.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Extracts the result value, returning error if the call was rejected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] carrying the gateway's code and message.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            None => Ok(self.result),
            Some(err) => Err(err.into()),
        }
    }
}

// ============================================================================
// InboundCall
// ============================================================================

/// A call made by the gateway: a notification, or a request expecting a
/// reply (such as `ping`).
#[derive(Debug, Clone)]
pub struct InboundCall {
    /// Id to echo in a reply; `None` for a plain notification.
    pub id: Option<Value>,

    /// Method name.
    pub method: String,

    /// Parameters (`Null` when absent).
    pub params: Value,
}

// ============================================================================
// Incoming
// ============================================================================

/// Any frame received from the gateway.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// Reply to one of our calls.
    Response(Response),
    /// Call initiated by the gateway.
    Call(InboundCall),
}

/// Raw shape shared by every JSON-RPC frame.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

impl Incoming {
    /// Decodes and classifies a text frame.
    ///
    /// A frame with a `method` is an inbound call. Otherwise it must carry
    /// a numeric `id` and is a reply.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the frame is not a JSON object
    /// - [`Error::Protocol`] if it is neither a call nor a reply
    pub fn decode(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)?;

        if let Some(method) = envelope.method {
            return Ok(Self::Call(InboundCall {
                id: envelope.id,
                method,
                params: envelope.params.unwrap_or(Value::Null),
            }));
        }

        let id = envelope
            .id
            .as_ref()
            .and_then(Value::as_u64)
            .map(RequestId::new)
            .ok_or_else(|| Error::protocol("frame has neither a method nor a numeric id"))?;

        Ok(Self::Response(Response {
            id,
            result: envelope.result.unwrap_or(Value::Null),
            error: envelope.error,
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================
