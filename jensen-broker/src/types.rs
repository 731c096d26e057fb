//! Rust struct definitions that ser/de to/from JSON-RPC messages.
//!
//! Requests are deliberately lenient on the way in: the version marker is read as a plain string
//! so that a request speaking some other version of the protocol can still be identified and
//! answered with a meaningful error, rather than being rejected as unparseable.  Responses are
//! strict on the way out and always carry the `"2.0"` marker.
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Re-export the structs and enums that are part of the JSON-RPC protocol
///
/// No need to re-invent this wheel.  The error codes and the version marker are exactly what we
/// would declare ourselves so we can just re-export.
pub use jsonrpsee_types::{error::ErrorCode, params::TwoPointZero};
pub use serde_json::Value as JsonValue;

/// The only protocol version this broker speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// Error code used for failures raised by the invoked operation itself.
///
/// JSON-RPC reserves `-32000` to `-32099` for implementation-defined server errors; this broker
/// only ever uses the first one.
pub const SERVER_ERROR_CODE: i32 = -32000;

/// Request Id
#[derive(Debug, PartialEq, Clone, Hash, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Id {
    /// Null
    Null,
    /// Numeric id, integral or not, of any magnitude JSON can carry
    Number(serde_json::Number),
    /// String id
    Str(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Null => f.write_str("null"),
            Id::Number(number) => write!(f, "{number}"),
            Id::Str(string) => write!(f, "\"{string}\""),
        }
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Id::Number(value.into())
    }
}

impl From<serde_json::Number> for Id {
    fn from(value: serde_json::Number) -> Self {
        Id::Number(value)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id::Str(value.to_string())
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Id::Str(value)
    }
}

/// A [JSON-RPC request object](https://www.jsonrpc.org/specification#request-object) as received
/// by the broker.
///
/// The `id` is optional; a request without one (or with a `null` one) is a notification, and the
/// broker never answers those.  `params` is always a positional list here: an omitted or `null`
/// `params` reads as the empty list, and named (object) params are not something the broker can
/// resolve overloads against, so they make the envelope invalid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// JSON-RPC version, as the caller sent it.
    pub jsonrpc: String,
    /// Name of the method to be invoked, in `Target.member` form.
    pub method: String,
    /// Positional parameter values of the request.
    #[serde(default, deserialize_with = "nullable_params")]
    pub params: Vec<JsonValue>,
    /// Request ID, absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
}

fn nullable_params<'de, D>(deserializer: D) -> std::result::Result<Vec<JsonValue>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Vec<JsonValue>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl Request {
    /// Create a JSON-RPC 2.0 method call.
    pub fn new(method: impl Into<String>, params: Vec<JsonValue>, id: impl Into<Option<Id>>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: id.into(),
        }
    }

    /// Create a JSON-RPC 2.0 notification, which is a request without an ID.
    pub fn notification(method: impl Into<String>, params: Vec<JsonValue>) -> Self {
        Self::new(method, params, None)
    }

    /// Notifications are fire-and-forget; the caller never gets a response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Split the method name at its last `.` into the target designator and the member name.
    ///
    /// Target designators may themselves contain dots (`billing.Ledger.post` names member `post`
    /// on target `billing.Ledger`).  Returns `None` if there is no separator or either side is
    /// empty.
    pub fn split_method(&self) -> Option<(&str, &str)> {
        let (target, member) = self.method.rsplit_once('.')?;
        if target.is_empty() || member.is_empty() {
            None
        } else {
            Some((target, member))
        }
    }
}

/// JSON-RPC Invalid request as defined in the [spec](https://www.jsonrpc.org/specification#request-object).
///
/// If the request has an invalid shape, but still has an id, we will try to deserialize it into
/// this struct so that when we send back the error response complaining about the invalid request
/// we can at least included the ID of the request for the client to match it up with the request
/// that caused the error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidRequest {
    /// Request ID
    #[serde(default)]
    pub id: Option<Id>,
}

/// JSON-RPC response object as defined in the [spec](https://www.jsonrpc.org/specification#response_object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// JSON-RPC version.
    pub jsonrpc: TwoPointZero,
    /// Payload which can be result or error.
    #[serde(flatten)]
    pub payload: ResponsePayload,
    /// Request ID
    pub id: Id,
}

impl Response {
    pub fn new(id: Id, payload: ResponsePayload) -> Self {
        Self {
            jsonrpc: TwoPointZero,
            payload,
            id,
        }
    }

    /// Create a owned successful response
    pub fn success(id: Id, result: JsonValue) -> Self {
        Self::new(id, ResponsePayload::success(result))
    }

    /// Create an error response
    pub fn error(id: Id, details: impl Into<ErrorDetails>) -> Self {
        Self::new(id, ResponsePayload::error(details))
    }

    /// The result of a successful response, `None` for error responses.
    pub fn result(&self) -> Option<&JsonValue> {
        match &self.payload {
            ResponsePayload::Success(SuccessResponse { result }) => Some(result),
            ResponsePayload::Error(_) => None,
        }
    }

    /// The error details of a failed response, `None` for successful responses.
    pub fn error_details(&self) -> Option<&ErrorDetails> {
        match &self.payload {
            ResponsePayload::Error(ErrorResponse { error }) => Some(error),
            ResponsePayload::Success(_) => None,
        }
    }
}

/// Possible payloads of a JSON RPC response
///
/// This is an `untagged` enum so that serde will try to deserialize into each variant in order
/// until one succeeds.  This works because successs responses should have `result` and error
/// responses should have `error`.  Being an enum, a response can never carry both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    /// Corresponds to failed JSON-RPC response with a error object with the field `error.
    Error(ErrorResponse),
    /// Corresponds to successful JSON-RPC response with the field `result`.
    Success(SuccessResponse),
}

impl ResponsePayload {
    /// Create a successful response payload
    pub fn success(result: JsonValue) -> Self {
        ResponsePayload::Success(SuccessResponse { result })
    }

    /// Create an error response payload
    pub fn error(details: impl Into<ErrorDetails>) -> Self {
        ResponsePayload::Error(details.into().into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub result: JsonValue,
}

impl From<JsonValue> for SuccessResponse {
    fn from(result: JsonValue) -> Self {
        Self { result }
    }
}

/// [Failed JSON-RPC response object](https://www.jsonrpc.org/specification#error_object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

impl From<ErrorDetails> for ErrorResponse {
    fn from(error: ErrorDetails) -> Self {
        Self { error }
    }
}

/// [JSON-RPC failed response error details](https://www.jsonrpc.org/specification#error_object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Code
    pub code: ErrorCode,
    /// Message
    pub message: String,
    /// Optional data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl ErrorDetails {
    pub fn new(code: ErrorCode, message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self {
            code,
            message: message.into(),
            data: data.into(),
        }
    }

    pub fn parse_error(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::ParseError, message, data)
    }
    pub fn invalid_request(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message, data)
    }
    pub fn method_not_found(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::MethodNotFound, message, data)
    }
    pub fn invalid_params(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::InvalidParams, message, data)
    }
    pub fn internal_error(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::InternalError, message, data)
    }
    pub fn server_error(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::ServerError(SERVER_ERROR_CODE), message, data)
    }
}

/// Name the JSON kind of a value, for diagnostics that describe what a caller actually sent.
pub(crate) fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
