//! JSON-RPC envelopes exchanged with the Gateway over text frames.
//!
//! Outbound: `{"jsonrpc":"2.0","id":<int>,"method":"<name>","params":{...}}`
//! with the auth token (when configured) merged into `params`.
//!
//! Inbound frames are decoded leniently: anything that is a JSON object is an
//! envelope, a missing or non-integer `id` marks it unsolicited, and a `null`
//! `error` member counts as absent.

use serde::Serialize;
use serde_json::{Map, Value};

/// Protocol tag carried by every outbound envelope.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Params key the auth token is merged under.
pub const TOKEN_PARAM: &str = "token";

/// A request frame. Built once per call and never mutated after sending.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutboundEnvelope {
    /// Always [`PROTOCOL_VERSION`].
    pub jsonrpc: &'static str,
    /// Correlation id.
    pub id: u64,
    /// RPC method name.
    pub method: String,
    /// Call parameters (always an object on the wire).
    pub params: Map<String, Value>,
}

impl OutboundEnvelope {
    /// Build an envelope, merging `token` into the params object.
    ///
    /// `Value::Null` params become `{}`. Non-object params are wrapped as
    /// `{"value": ...}` so the wire shape stays an object. The configured
    /// token overrides any caller-supplied `token` key.
    pub fn new(id: u64, method: impl Into<String>, params: Value, token: Option<&str>) -> Self {
        let mut params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                let _ = map.insert("value".into(), other);
                map
            }
        };
        if let Some(token) = token {
            let _ = params.insert(TOKEN_PARAM.into(), Value::String(token.to_string()));
        }
        Self {
            jsonrpc: PROTOCOL_VERSION,
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialize to the text frame sent over the socket.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A decoded inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundEnvelope {
    /// Correlation id, absent for server pushes.
    pub id: Option<u64>,
    /// Success payload.
    pub result: Option<Value>,
    /// Error payload (any non-null `error` member).
    pub error: Option<Value>,
    /// The full frame, as offered to passive observers.
    pub raw: Value,
}

impl InboundEnvelope {
    /// Decode a text frame.
    ///
    /// Fails on invalid JSON and on JSON that is not an object.
    pub fn decode(frame: &str) -> Result<Self, DecodeError> {
        let raw: Value = serde_json::from_str(frame).map_err(DecodeError::Json)?;
        Self::from_value(raw)
    }

    /// Decode an already-parsed frame.
    pub fn from_value(raw: Value) -> Result<Self, DecodeError> {
        let Value::Object(map) = &raw else {
            return Err(DecodeError::NotAnObject);
        };
        let id = map.get("id").and_then(Value::as_u64);
        let result = map.get("result").cloned();
        let error = map.get("error").filter(|e| !e.is_null()).cloned();
        Ok(Self {
            id,
            result,
            error,
            raw,
        })
    }

    /// Whether this frame carries no correlation id.
    pub fn is_unsolicited(&self) -> bool {
        self.id.is_none()
    }

    /// Server-supplied error message, if the error payload has one.
    pub fn error_message(&self) -> Option<&str> {
        self.error
            .as_ref()
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
    }

    /// Push method name for unsolicited frames that carry one.
    pub fn method(&self) -> Option<&str> {
        self.raw.get("method").and_then(Value::as_str)
    }

    /// Consume the envelope into the call outcome: `Err(message)` when an
    /// error is present, otherwise the result (`null` when absent).
    pub fn into_outcome(self) -> Result<Value, Option<String>> {
        if self.error.is_some() {
            let message = self.error_message().map(str::to_string);
            Err(message)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

/// Why an inbound frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(serde_json::Error),
    /// Valid JSON, but not an envelope object.
    #[error("frame is not a JSON object")]
    NotAnObject,
}
