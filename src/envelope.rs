//! Response envelopes and their wire encoding.
//!
//! A reply is one of three shapes, all tagged with the request's correlation id:
//!
//! ```json
//! { "status": "success", "data": "users", "correlationId": "..." }
//! { "status": "error", "message": "Something went wrong", "code": 500, "data": {...}, "correlationId": "..." }
//! { "status": "fail", "data": "Invalid data", "correlationId": "..." }
//! ```
//!
//! The key names are part of the wire contract and must not change.

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ProtocolError, RequestError};

/// Code used by `Codec::default()` when an error reply omits one.
pub const DEFAULT_ERROR_CODE: u32 = 500;

/// The `status` discriminator of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
    Fail,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Error => "error",
            Status::Fail => "fail",
        }
    }

    fn parse(status: &str) -> Option<Self> {
        match status {
            "success" => Some(Status::Success),
            "error" => Some(Status::Error),
            "fail" => Some(Status::Fail),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A handler-declared failure: something went wrong while serving the request.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub message: String,
    pub code: u32,
    /// Diagnostic payload (the originating error's description and causes).
    pub data: Value,
}

impl ErrorResponse {
    pub fn status(&self) -> Status {
        Status::Error
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "responder error {}: {}", self.code, self.message)
    }
}

/// A handler-declared soft failure, typically invalid input.
#[derive(Debug, Clone, PartialEq)]
pub struct FailResponse {
    pub data: Value,
}

impl FailResponse {
    pub fn status(&self) -> Status {
        Status::Fail
    }
}

impl fmt::Display for FailResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "responder rejected request: {}", self.data)
    }
}

/// The outcome carried by an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Success(Value),
    Error(ErrorResponse),
    Fail(FailResponse),
}

impl Response {
    pub fn status(&self) -> Status {
        match self {
            Response::Success(_) => Status::Success,
            Response::Error(_) => Status::Error,
            Response::Fail(_) => Status::Fail,
        }
    }

    /// Success resolves with its data; error and fail become rejections.
    pub fn into_result(self) -> Result<Value, RequestError> {
        match self {
            Response::Success(data) => Ok(data),
            Response::Error(e) => Err(RequestError::Error(e)),
            Response::Fail(f) => Err(RequestError::Fail(f)),
        }
    }
}

/// A reply, correlated to the request it answers.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub correlation_id: String,
    pub response: Response,
}

impl Envelope {
    pub fn status(&self) -> Status {
        self.response.status()
    }
}

/// Flat wire form shared by all three statuses.
#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<u32>,
    #[serde(rename = "correlationId")]
    correlation_id: String,
}

impl From<&Envelope> for WireEnvelope {
    fn from(envelope: &Envelope) -> Self {
        let (data, message, code) = match &envelope.response {
            Response::Success(data) => (Some(data.clone()), None, None),
            Response::Error(e) => (Some(e.data.clone()), Some(e.message.clone()), Some(e.code)),
            Response::Fail(f) => (Some(f.data.clone()), None, None),
        };
        WireEnvelope {
            status: envelope.status().as_str().to_string(),
            data,
            message,
            code,
            correlation_id: envelope.correlation_id.clone(),
        }
    }
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = ProtocolError;

    fn try_from(wire: WireEnvelope) -> Result<Self, ProtocolError> {
        let status =
            Status::parse(&wire.status).ok_or_else(|| ProtocolError::UnknownStatus(wire.status))?;
        let data = wire.data.unwrap_or(Value::Null);

        let response = match status {
            Status::Success => Response::Success(data),
            Status::Fail => Response::Fail(FailResponse { data }),
            Status::Error => Response::Error(ErrorResponse {
                message: wire.message.ok_or(ProtocolError::MissingField {
                    status: "error",
                    field: "message",
                })?,
                code: wire.code.ok_or(ProtocolError::MissingField {
                    status: "error",
                    field: "code",
                })?,
                data,
            }),
        };

        Ok(Envelope {
            correlation_id: wire.correlation_id,
            response,
        })
    }
}

/// Builds, encodes and decodes envelopes and request payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    default_error_code: u32,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_CODE)
    }
}

impl Codec {
    /// Create a codec that fills in `default_error_code` when an error reply has none.
    pub fn new(default_error_code: u32) -> Self {
        Self { default_error_code }
    }

    pub fn default_error_code(&self) -> u32 {
        self.default_error_code
    }

    /// Build a success envelope.
    pub fn success<T: Serialize + ?Sized>(
        &self,
        correlation_id: impl Into<String>,
        data: &T,
    ) -> Result<Envelope, ProtocolError> {
        Ok(Envelope {
            correlation_id: correlation_id.into(),
            response: Response::Success(to_value(data)?),
        })
    }

    /// Build an error envelope.
    ///
    /// `message` and `code` are kept verbatim; the error's description and
    /// its `source()` chain are attached as `data`.
    pub fn error<E: Error + ?Sized>(
        &self,
        correlation_id: impl Into<String>,
        message: impl Into<String>,
        error: &E,
        code: Option<u32>,
    ) -> Envelope {
        Envelope {
            correlation_id: correlation_id.into(),
            response: Response::Error(ErrorResponse {
                message: message.into(),
                code: code.unwrap_or(self.default_error_code),
                data: error_data(error),
            }),
        }
    }

    /// Build a fail envelope.
    pub fn fail<T: Serialize + ?Sized>(
        &self,
        correlation_id: impl Into<String>,
        data: &T,
    ) -> Result<Envelope, ProtocolError> {
        Ok(Envelope {
            correlation_id: correlation_id.into(),
            response: Response::Fail(FailResponse {
                data: to_value(data)?,
            }),
        })
    }

    /// Serialize an envelope to its JSON wire form.
    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(&WireEnvelope::from(envelope))
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse an envelope from its JSON wire form.
    pub fn decode(&self, bytes: &[u8]) -> Result<Envelope, ProtocolError> {
        let wire: WireEnvelope =
            serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Envelope::try_from(wire)
    }

    /// Pull `correlationId` out of a reply that does not decode as an envelope.
    pub fn correlation_id_of(&self, bytes: &[u8]) -> Option<String> {
        let value: Value = serde_json::from_slice(bytes).ok()?;
        value.get("correlationId")?.as_str().map(str::to_string)
    }

    /// Serialize a request payload.
    pub fn encode_request<T: Serialize + ?Sized>(
        &self,
        payload: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(payload).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse a request payload. An empty body is `null`.
    pub fn decode_request(&self, bytes: &[u8]) -> Result<Value, ProtocolError> {
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

fn to_value<T: Serialize + ?Sized>(data: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(data).map_err(|e| ProtocolError::Encode(e.to_string()))
}

fn error_data<E: Error + ?Sized>(error: &E) -> Value {
    let mut causes = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        causes.push(Value::String(cause.to_string()));
        source = cause.source();
    }
    json!({
        "message": error.to_string(),
        "causes": causes,
    })
}
