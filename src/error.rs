//! Error types for the bridge.

use thiserror::Error;

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Bridge errors.
#[derive(Error, Debug)]
pub enum Error {
    /// JSON-RPC protocol error.
    #[error("JSON-RPC error: {code} - {message}")]
    JsonRpc {
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
        /// Additional data.
        data: Option<serde_json::Value>,
    },

    /// No tool is registered under the requested name.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The tool exists but declares no server method of this name.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// No page is connected to the dev server.
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// A tool handler or server method failed.
    #[error("{0}")]
    HandlerFailure(String),

    /// The counterparty settled the call with an error message.
    #[error("{0}")]
    CallRejected(String),

    /// The registry holding the call went away before it was settled.
    #[error("call {0} was abandoned before a result arrived")]
    CallAbandoned(String),

    /// The call exceeded the configured timeout.
    #[error("call {id} timed out after {millis}ms")]
    Timeout {
        /// Call id.
        id: String,
        /// Elapsed budget in milliseconds.
        millis: u64,
    },

    /// Invalid parameters.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Error::JsonRpc { code, .. } => *code,
            Error::ToolNotFound(_) | Error::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Error::InvalidParams(_) => codes::INVALID_PARAMS,
            Error::Serialization(_) => codes::PARSE_ERROR,
            Error::ChannelUnavailable(_) => -32000,
            Error::HandlerFailure(_) | Error::CallRejected(_) => -32001,
            Error::CallAbandoned(_) | Error::Timeout { .. } => -32002,
            Error::Io(_) => -32003,
            Error::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Convert to a JSON-RPC error object.
    pub fn to_json_rpc_error(&self) -> serde_json::Value {
        match self {
            Error::JsonRpc {
                code,
                message,
                data: Some(data),
            } => serde_json::json!({ "code": code, "message": message, "data": data }),
            _ => serde_json::json!({
                "code": self.code(),
                "message": self.to_string(),
            }),
        }
    }
}

/// Standard JSON-RPC error codes.
pub mod codes {
    /// Parse error.
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid request.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error.
    pub const INTERNAL_ERROR: i32 = -32603;
}
