//! Error types for the request pipeline, dispatcher and socket manager.
//!
//! # Design
//! Every failure is terminal for the call that produced it and is reported
//! exactly once. Non-2xx responses either land in `UnacceptableStatus` or,
//! when the request names an error model, in `ErrorModel` carrying the
//! decoded body.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

/// A decodable shape for non-2xx response bodies.
///
/// Implementors may expose a human-readable message through `message`.
pub trait ErrorModel: DeserializeOwned + fmt::Debug + Send + 'static {
    /// `false` only for the `NoErrorModel` sentinel.
    const DECODE: bool = true;

    fn message(&self) -> Option<String> {
        None
    }
}

/// Sentinel error model: no error body decoding is attempted.
#[derive(Debug, Deserialize)]
pub enum NoErrorModel {}

impl ErrorModel for NoErrorModel {
    const DECODE: bool = false;
}

impl ErrorModel for serde_json::Value {
    fn message(&self) -> Option<String> {
        self.get("message")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
    }
}

/// Errors returned by the HTTP pipeline.
#[derive(Debug, Error)]
pub enum ApiError<E = NoErrorModel> {
    /// The target URL could not be parsed.
    #[error("malformed URL `{url}`: {reason}")]
    UrlMalformed { url: String, reason: String },

    /// The request parameters could not be serialized to JSON.
    #[error("failed to build request body: {0}")]
    BodyConstruction(#[source] serde_json::Error),

    /// The transport failed before a response arrived.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The reply carried no body at all.
    #[error("response carried no data")]
    NoData,

    /// The reply was not an HTTP response.
    #[error("reply was not an HTTP response")]
    NoResponse,

    /// Status outside the acceptable range and no error model was named.
    #[error("unacceptable status code {0}")]
    UnacceptableStatus(u16),

    /// Status outside the acceptable range; the body decoded into the model.
    #[error("server returned {status}: {}", .message.as_deref().unwrap_or("structured error body"))]
    ErrorModel {
        status: u16,
        model: E,
        message: Option<String>,
    },

    /// Status outside the acceptable range; the body did not match the model.
    #[error("could not parse error body for status {status}")]
    ErrorBodyUndecodable { status: u16 },

    /// A successful body could not be decoded as JSON.
    #[error("failed to decode JSON response: {0}")]
    JsonDecode(#[source] serde_json::Error),

    /// The operation never reached a queue.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl<E> ApiError<E> {
    /// Status code carried by status-related variants.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::UnacceptableStatus(status)
            | ApiError::ErrorModel { status, .. }
            | ApiError::ErrorBodyUndecodable { status } => Some(*status),
            _ => None,
        }
    }

    /// Decoded error body, when one was produced.
    pub fn model(&self) -> Option<&E> {
        match self {
            ApiError::ErrorModel { model, .. } => Some(model),
            _ => None,
        }
    }
}

/// Failures raised by a `Transport` before any response is available.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Errors raised by the dispatcher on behalf of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("queue `{0}` not found")]
    QueueNotFound(String),
}

/// Failures delivered to a socket's receive callback.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("websocket connect failed: {0}")]
    Connect(#[source] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("websocket receive failed: {0}")]
    Receive(#[source] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("websocket closed by peer")]
    Closed,
}

/// Configuration parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}
