//! Wire frames exchanged between the host and workers.
//!
//! Every frame is a JSON object tagged by `type`:
//!
//! ```text
//! { "type": "call",     "callId": 7, "service": "worker", "method": "loadExtension", "args": [...] }
//! { "type": "response", "callId": 7, "service": "worker", "method": "loadExtension", "result": ... }
//! { "type": "response", "callId": 7, ..., "error": { "kind": "notFound", "message": "..." } }
//! { "type": "post",     "service": "...", "method": "...", "args": [...] }
//! ```
//!
//! `callId` appears only on call/response pairs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extensions::error::ExtensionResult;

/// Per-call correlation id.
pub type CallId = u64;

/// Name of the built-in service every worker exposes.
pub const WORKER_SERVICE: &str = "worker";

/// Method of [`WORKER_SERVICE`] that loads an extension by id.
pub const LOAD_EXTENSION_METHOD: &str = "loadExtension";

/// Service name of an extension instance hosted on a worker.
pub fn extension_service(worker: u32, extension_id: &str) -> String {
    format!("extension_{}_{}", worker, extension_id)
}

/// A frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireMessage {
    #[serde(rename_all = "camelCase")]
    Call {
        call_id: CallId,
        service: String,
        method: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    #[serde(rename_all = "camelCase")]
    Response {
        call_id: CallId,
        service: String,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },
    Post {
        service: String,
        method: String,
        #[serde(default)]
        args: Vec<Value>,
    },
}

impl WireMessage {
    /// Successful response to `call`.
    pub fn reply(call_id: CallId, service: &str, method: &str, result: Value) -> Self {
        WireMessage::Response {
            call_id,
            service: service.to_string(),
            method: method.to_string(),
            result: Some(result),
            error: None,
        }
    }

    /// Failed response to `call`.
    pub fn fail(call_id: CallId, service: &str, method: &str, error: WireError) -> Self {
        WireMessage::Response {
            call_id,
            service: service.to_string(),
            method: method.to_string(),
            result: None,
            error: Some(error),
        }
    }

    pub fn to_frame(&self) -> ExtensionResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_frame(frame: &str) -> ExtensionResult<Self> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// Failure category reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WireErrorKind {
    /// No extension with the requested id.
    NotFound,
    /// The extension constructor failed.
    Construction,
    /// No such service on the worker.
    UnknownService,
    /// Extension code failed while handling the call.
    Runtime,
    /// The call could not be decoded.
    Malformed,
}

/// Error payload of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: WireErrorKind,
    pub message: String,
}

impl WireError {
    pub fn new(kind: WireErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
