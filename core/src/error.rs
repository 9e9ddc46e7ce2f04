//! Error types for the gridmi client.
//!
//! # Design
//! Construction problems (`InvalidConfig`, `InvalidRequest`) are returned
//! synchronously from the call that caused them. Everything that happens after
//! a call is started (encoding, transport, status, decoding) reaches the caller
//! only through the handler's failure continuation.
//!
//! `Status` and `Decode` keep the raw response bytes so callers can inspect
//! what the server actually sent.

use std::time::Duration;

use thiserror::Error;

/// Boxed cause carried by `ClientError::Network`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the client, from configuration through decoding.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client configuration is unusable (bad base URL, zero timeout).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The request was malformed locally; no I/O was attempted.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A multipart part could not be read to completion.
    #[error("failed to encode multipart field `{field}`: {source}")]
    Encoding {
        field: String,
        #[source]
        source: std::io::Error,
    },

    /// Connection-level failure: refused, DNS, interrupted stream.
    #[error("network error: {0}")]
    Network(#[source] BoxError),

    /// The round trip did not finish within the configured timeout.
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The server answered with a non-2xx status.
    #[error("HTTP {status}")]
    Status { status: u16, body: Vec<u8> },

    /// The body did not match the configured payload type.
    #[error("failed to decode response: {message}")]
    Decode { message: String, raw: Vec<u8> },

    /// The worker pool could not be started.
    #[error("failed to start worker pool: {0}")]
    Startup(#[source] std::io::Error),
}

impl ClientError {
    pub(crate) fn network(cause: impl Into<BoxError>) -> Self {
        ClientError::Network(cause.into())
    }

    /// Raw response bytes, when the failure happened after a response arrived.
    pub fn raw_body(&self) -> Option<&[u8]> {
        match self {
            ClientError::Status { body, .. } => Some(body),
            ClientError::Decode { raw, .. } => Some(raw),
            _ => None,
        }
    }

    /// HTTP status code for `Status` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
