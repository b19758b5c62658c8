//! JSON-RPC 2.0 primitives shared by every stage of the lightgate
//! request pipeline: the wire-level [`Request`]/[`Response`] envelopes,
//! the implementation-specific error codes, and the closed catalog of
//! methods the gateway routes (see [`Method`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;

mod methods;

pub use methods::{Method, ParamsError};

/// The only protocol version the gateway accepts.
pub const VERSION: &str = "2.0";

/// Implementation-specific and standard JSON-RPC 2.0 error codes.
///
/// Codes in the `-32000..-32099` range are reserved for
/// implementation-defined server errors; the gateway uses them for the
/// policy and forwarding failures it can produce on its own.
pub mod codes {
    /// Invalid JSON was received by the server.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL: i64 = -32603;
    /// The requested result is not (or no longer) available.
    pub const RESULT_NOT_FOUND: i64 = -32604;

    /// The maximum batch size has been exceeded.
    pub const MAX_BATCH_SIZE_EXCEEDED: i64 = -32001;
    /// The client has been rate limited.
    pub const RATE_LIMIT_EXCEEDED: i64 = -32002;
    /// An error occurred when forwarding the request to a back-end node.
    pub const FORWARDING_ERROR: i64 = -32003;
    /// Processing the request took longer than the configured timeout.
    pub const TIMEOUT: i64 = -32004;
}

/// A JSON-RPC 2.0 request envelope.
///
/// Every field is tolerated absent when decoding so that malformed
/// requests reach the pipeline and are rejected with the proper
/// protocol error instead of a serde error. `{}` decodes to a request
/// with an empty version and method, which the validator then rejects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self { jsonrpc: VERSION.to_string(), id: id.into(), method: method.into(), params }
    }
}

/// A JSON-RPC 2.0 response envelope. Exactly one of `result`/`error`
/// is present on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    /// A successful response carrying `result`.
    pub fn result(id: Value, result: Value) -> Self {
        Self { jsonrpc: VERSION.to_string(), id, result: Some(result), error: None }
    }

    /// An error response carrying `error`.
    pub fn error(id: Value, error: ErrorObject) -> Self {
        Self { jsonrpc: VERSION.to_string(), id, result: None, error: Some(error) }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// The `error` member of a response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    pub fn with_data(code: i64, message: impl Into<String>, data: Value) -> Self {
        Self { code, message: message.into(), data: Some(data) }
    }

    pub fn invalid_version(got: &str) -> Self {
        Self::new(codes::INVALID_REQUEST, format!("invalid jsonrpc field: expected \"2.0\", got \"{got}\""))
    }

    pub fn unsupported_method(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("unsupported method {method}"))
    }

    pub fn invalid_params() -> Self {
        Self::new(codes::INVALID_PARAMS, "invalid parameters in request: parameters object does not match method")
    }

    pub fn rate_limited() -> Self {
        Self::new(codes::RATE_LIMIT_EXCEEDED, "rate limit exceeded")
    }
}
