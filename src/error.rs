use std::time::Duration;

use thiserror::Error;

use crate::bus::TransportError;
use crate::envelope::{ErrorResponse, FailResponse};

/// A message that does not follow the request/reply protocol.
///
/// Surfaced on whichever side is decoding; never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("unknown envelope status: {0:?}")]
    UnknownStatus(String),
    #[error("{status} envelope is missing field `{field}`")]
    MissingField {
        status: &'static str,
        field: &'static str,
    },
    #[error("message is missing header `{0}`")]
    MissingHeader(&'static str),
    #[error("failed to encode payload: {0}")]
    Encode(String),
}

/// A registration or reply subscription could not be established.
///
/// This is the `error` half of the ready/error lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    #[error("invalid routing key {routing_key:?}: {reason}")]
    InvalidRoutingKey {
        routing_key: String,
        reason: &'static str,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A responder could not deliver its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The sender was already used for this request.
    #[error("reply already sent for request {correlation_id}")]
    AlreadySent { correlation_id: String },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid config: {0}")]
pub struct ConfigError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("correlation id {0} is already pending")]
    DuplicateCorrelationId(String),
}

/// No reply arrived before the request's deadline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("request {correlation_id} to {routing_key} timed out after {timeout:?}")]
pub struct TimeoutError {
    pub correlation_id: String,
    pub routing_key: String,
    pub timeout: Duration,
}

/// Every way a request can be rejected.
///
/// `Error` and `Fail` are outcomes the responder chose; the rest are failures
/// of the round trip itself.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    /// The responder replied with an error envelope.
    #[error("{0}")]
    Error(ErrorResponse),
    /// The responder replied with a fail envelope.
    #[error("{0}")]
    Fail(FailResponse),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    /// The request could not be published.
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

impl RequestError {
    /// The error envelope, if the responder replied with one.
    pub fn as_error(&self) -> Option<&ErrorResponse> {
        match self {
            RequestError::Error(e) => Some(e),
            _ => None,
        }
    }

    /// The fail envelope, if the responder replied with one.
    pub fn as_fail(&self) -> Option<&FailResponse> {
        match self {
            RequestError::Fail(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RequestError::Timeout(_))
    }
}
